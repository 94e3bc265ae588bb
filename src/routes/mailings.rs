use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    cache_scope, cache_settings, created, fail, forbidden, invalid, not_found, ok, server_error,
    ApiResponse,
};
use crate::cache::{ListCache, MAILING_LIST};
use crate::mailer::dispatch::{self, Dispatch};
use crate::mailer::MailTransport;
use crate::models::attempt::AttemptStatus;
use crate::models::group::Permission;
use crate::models::mailing::{Mailing, MailingForm, MailingStatus};
use crate::security::auth::AuthenticatedUser;
use crate::store::Store;
use crate::validation::{self, MailingInput, ValidationErrors};

fn mailing_json(store: &dyn Store, mailing: &Mailing) -> Value {
    let mut value = json!(mailing);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("recipient_ids".into(), json!(store.mailing_recipient_ids(mailing.id)));
        obj.insert(
            "attempts".into(),
            json!({
                "total": store.attempt_count_for_mailing(mailing.id, None),
                "success": store.attempt_count_for_mailing(mailing.id, Some(AttemptStatus::Success)),
                "failure": store.attempt_count_for_mailing(mailing.id, Some(AttemptStatus::Failure)),
            }),
        );
    }
    value
}

/// Parse the input and make sure the message and recipients exist and are
/// visible to the user.
fn build_form(
    store: &dyn Store,
    auth: &AuthenticatedUser,
    input: &MailingInput,
) -> Result<MailingForm, ValidationErrors> {
    let form = validation::parse_mailing(input)?;
    let mut errors = ValidationErrors::new();

    let all_messages = auth.can(store, Permission::CanViewAllMessages);
    match store.message_find_by_id(form.message_id) {
        Some(m) if all_messages || m.owner_id == Some(auth.user.id) => {}
        _ => errors.add("message_id", "Unknown message"),
    }

    let all_recipients = auth.can(store, Permission::CanViewAllRecipients);
    for rid in &form.recipient_ids {
        match store.recipient_find_by_id(*rid) {
            Some(r) if all_recipients || r.owner_id == Some(auth.user.id) => {}
            _ => errors.add("recipient_ids", format!("Unknown recipient: {}", rid)),
        }
    }

    errors.into_result(form)
}

#[get("/mailings?<status>")]
pub fn list(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    status: Option<&str>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let owner = auth.scope(store, Permission::CanViewAllMailings);

    let mailings: Vec<Mailing> = match status.filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<MailingStatus>() {
            Ok(st) => store.mailing_list(owner, Some(st)),
            Err(e) => {
                let mut errors = ValidationErrors::new();
                errors.add("status", e);
                return invalid(&errors);
            }
        },
        None => {
            let (enabled, ttl) = cache_settings(store);
            cache.get_or_load(enabled, ttl, MAILING_LIST, &cache_scope(owner), || {
                store.mailing_list(owner, None)
            })
        }
    };
    ok(json!({ "mailings": mailings }))
}

#[get("/mailings/<id>")]
pub fn detail(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    let store: &dyn Store = &***store;
    let mailing = match store.mailing_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Mailing"),
    };
    if mailing.owner_id != Some(auth.user.id) && !auth.can(store, Permission::CanViewAllMailings) {
        return forbidden();
    }
    ok(json!({ "mailing": mailing_json(store, &mailing) }))
}

#[post("/mailings", format = "json", data = "<body>")]
pub fn create(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    body: Json<MailingInput>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let form = match build_form(store, &auth, &body) {
        Ok(f) => f,
        Err(errors) => return invalid(&errors),
    };

    match store.mailing_create(&form, Some(auth.user.id)) {
        Ok(id) => {
            cache.invalidate(MAILING_LIST);
            log::info!("mailing {} created by {}", id, auth.user.email);
            let mailing = store.mailing_find_by_id(id).map(|m| mailing_json(store, &m));
            created(json!({ "id": id, "mailing": mailing }))
        }
        Err(e) => server_error(&e),
    }
}

#[put("/mailings/<id>", format = "json", data = "<body>")]
pub fn update(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
    body: Json<MailingInput>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.mailing_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Mailing"),
    };
    if existing.owner_id != Some(auth.user.id) {
        return forbidden();
    }
    let form = match build_form(store, &auth, &body) {
        Ok(f) => f,
        Err(errors) => return invalid(&errors),
    };

    match store.mailing_update(id, &form) {
        Ok(()) => {
            cache.invalidate(MAILING_LIST);
            let mailing = store.mailing_find_by_id(id).map(|m| mailing_json(store, &m));
            ok(json!({ "mailing": mailing }))
        }
        Err(e) => server_error(&e),
    }
}

#[delete("/mailings/<id>")]
pub fn delete(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.mailing_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Mailing"),
    };
    if existing.owner_id != Some(auth.user.id) && !auth.can(store, Permission::DeleteMailing) {
        return forbidden();
    }

    match store.mailing_delete(id) {
        Ok(()) => {
            cache.invalidate(MAILING_LIST);
            log::info!("mailing {} deleted by {}", id, auth.user.email);
            ok(json!({ "id": id }))
        }
        Err(e) => server_error(&e),
    }
}

/// Run the dispatch on the blocking pool; the SMTP round-trips would stall
/// the async workers otherwise.
#[post("/mailings/<id>/start")]
pub async fn start(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    transport: &State<Arc<dyn MailTransport>>,
    cache: &State<ListCache>,
    id: i64,
) -> ApiResponse {
    let mailing = match store.mailing_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Mailing"),
    };
    if mailing.owner_id != Some(auth.user.id) && !auth.user.is_admin() {
        return forbidden();
    }

    let store_arc = Arc::clone(store.inner());
    let transport_arc = Arc::clone(transport.inner());
    let joined = rocket::tokio::task::spawn_blocking(move || {
        dispatch::send_mailing(&*store_arc, &*transport_arc, id)
    })
    .await;

    match joined {
        Ok(Ok(Dispatch::Completed(report))) => {
            cache.invalidate(MAILING_LIST);
            ok(json!({ "report": report }))
        }
        Ok(Ok(Dispatch::Skipped(reason))) => fail(Status::Conflict, &reason.describe()),
        Ok(Err(e)) => server_error(&e),
        Err(e) => server_error(&format!("dispatch task failed: {}", e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub is_blocked: bool,
}

#[post("/mailings/<id>/block", format = "json", data = "<body>")]
pub fn block(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
    body: Json<BlockRequest>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanDisableMailings) {
        return forbidden();
    }
    if store.mailing_find_by_id(id).is_none() {
        return not_found("Mailing");
    }

    let result = if body.is_blocked {
        dispatch::block_mailing(store, id, &auth.user.email)
    } else {
        dispatch::unblock_mailing(store, id, &auth.user.email)
    };
    match result {
        Ok(()) => {
            cache.invalidate(MAILING_LIST);
            ok(json!({ "id": id, "is_blocked": body.is_blocked }))
        }
        Err(e) => server_error(&e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, detail, create, update, delete, start, block]
}
