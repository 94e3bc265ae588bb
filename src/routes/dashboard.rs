use std::sync::Arc;

use rocket::State;
use serde_json::json;

use super::{invalid, ok, server_error, ApiResponse};
use crate::models::attempt::AttemptStatus;
use crate::models::group::Permission;
use crate::models::mailing::MailingStatus;
use crate::security::auth::AuthenticatedUser;
use crate::store::Store;
use crate::validation::ValidationErrors;

/// Public counters for the landing page.
#[get("/home")]
pub fn home(store: &State<Arc<dyn Store>>) -> ApiResponse {
    ok(json!({
        "total_mailings": store.mailing_count(None),
        "active_mailings": store.mailing_count(Some(MailingStatus::Running)),
        "unique_recipients": store.recipient_count_distinct(),
    }))
}

#[get("/attempts?<mailing_id>&<status>")]
pub fn attempts(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    mailing_id: Option<i64>,
    status: Option<&str>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let status = match status.filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<AttemptStatus>() {
            Ok(s) => Some(s),
            Err(e) => {
                let mut errors = ValidationErrors::new();
                errors.add("status", e);
                return invalid(&errors);
            }
        },
        None => None,
    };
    let owner = auth.scope(store, Permission::CanViewAllMailingsAttempts);
    let attempts = store.attempt_list(owner, mailing_id, status);
    ok(json!({ "attempts": attempts }))
}

#[post("/attempts/clear")]
pub fn clear_attempts(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    let store: &dyn Store = &***store;
    let owner = auth.scope(store, Permission::CanViewAllMailingsAttempts);
    match store.attempt_clear(owner) {
        Ok(deleted) => {
            log::info!("{} attempt(s) cleared by {}", deleted, auth.user.email);
            ok(json!({ "deleted": deleted }))
        }
        Err(e) => server_error(&e),
    }
}

#[get("/statistics")]
pub fn statistics(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    match store.stats_get_or_create(auth.user.id) {
        Ok(stats) => ok(json!({ "statistics": stats })),
        Err(e) => server_error(&e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![home, attempts, clear_attempts, statistics]
}
