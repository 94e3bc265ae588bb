pub mod accounts;
pub mod dashboard;
pub mod mailings;
pub mod messages;
pub mod recipients;

use std::time::Duration;

use rocket::http::Status;
use rocket::serde::json::Json;
use serde_json::{json, Value};

use crate::store::Store;
use crate::validation::ValidationErrors;

pub type ApiResponse = (Status, Json<Value>);

/// Success envelope. `data` must be an object; its keys are merged in.
pub fn ok(data: Value) -> ApiResponse {
    let mut body = json!({ "success": true });
    if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), data) {
        target.extend(extra);
    }
    (Status::Ok, Json(body))
}

pub fn created(data: Value) -> ApiResponse {
    let (_, body) = ok(data);
    (Status::Created, body)
}

pub fn fail(status: Status, message: &str) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "error": message })),
    )
}

pub fn invalid(errors: &ValidationErrors) -> ApiResponse {
    (
        Status::UnprocessableEntity,
        Json(json!({
            "success": false,
            "error": "Validation failed",
            "errors": errors.to_json(),
        })),
    )
}

pub fn not_found(what: &str) -> ApiResponse {
    fail(Status::NotFound, &format!("{} not found", what))
}

pub fn forbidden() -> ApiResponse {
    fail(Status::Forbidden, "You don't have permission to do that")
}

pub fn server_error(e: &str) -> ApiResponse {
    log::error!("request failed: {}", e);
    fail(Status::InternalServerError, e)
}

/// `(enabled, ttl)` from the cache settings.
pub fn cache_settings(store: &dyn Store) -> (bool, Duration) {
    let enabled = store.setting_get_bool("cache_enabled");
    let ttl = store.setting_get_i64("cache_ttl_secs").max(0) as u64;
    (enabled, Duration::from_secs(ttl))
}

/// Cache scope for a list: everything, or one owner's rows.
pub fn cache_scope(owner: Option<i64>) -> String {
    match owner {
        Some(id) => format!("owner:{}", id),
        None => "all".to_string(),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    let mut all = Vec::new();
    all.extend(accounts::routes());
    all.extend(recipients::routes());
    all.extend(messages::routes());
    all.extend(mailings::routes());
    all.extend(dashboard::routes());
    all
}
