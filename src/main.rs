#[macro_use]
extern crate rocket;

use std::sync::Arc;

use rocket::fs::FileServer;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::Request;
use serde_json::{json, Value};

use mailings::cache::ListCache;
use mailings::mailer::{ConfiguredMailer, MailTransport};
use mailings::rate_limit::RateLimiter;
use mailings::store::sqlite::SqliteStore;
use mailings::store::Store;
use mailings::{boot, db, routes};

fn error_body(status: Status, message: &str) -> Json<Value> {
    Json(json!({ "success": false, "status": status.code, "error": message }))
}

#[catch(400)]
fn bad_request() -> Json<Value> {
    error_body(Status::BadRequest, "Malformed request")
}

#[catch(401)]
fn unauthorized() -> Json<Value> {
    error_body(Status::Unauthorized, "Authentication required")
}

#[catch(403)]
fn forbidden() -> Json<Value> {
    error_body(Status::Forbidden, "Forbidden")
}

#[catch(404)]
fn not_found(req: &Request) -> Json<Value> {
    error_body(Status::NotFound, &format!("No route for {}", req.uri().path()))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    error_body(Status::UnprocessableEntity, "Request body could not be parsed")
}

#[catch(500)]
fn server_error() -> Json<Value> {
    error_body(Status::InternalServerError, "Internal server error")
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let db_path = db::db_path();
    if let Err(e) = boot::run(&db_path) {
        log::error!("{}. Aborting.", e);
        std::process::exit(1);
    }

    let store = match SqliteStore::new_at(&db_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to open database {}: {}", db_path, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = store.run_migrations().and_then(|_| store.seed_defaults()) {
        log::error!("Failed to prepare database: {}", e);
        std::process::exit(1);
    }
    log::info!("Database ready at {}", db_path);

    let store: Arc<dyn Store> = Arc::new(store);
    let transport: Arc<dyn MailTransport> = Arc::new(ConfiguredMailer::new(Arc::clone(&store)));

    rocket::build()
        .manage(store)
        .manage(transport)
        .manage(ListCache::new())
        .manage(RateLimiter::new())
        .mount("/api", routes::routes())
        .mount("/uploads", FileServer::from("data/uploads"))
        .register(
            "/",
            catchers![bad_request, unauthorized, forbidden, not_found, unprocessable, server_error],
        )
}
