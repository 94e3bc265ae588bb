use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::json;

use super::{cache_scope, cache_settings, created, forbidden, invalid, not_found, ok, server_error, ApiResponse};
use crate::cache::{ListCache, RECIPIENT_LIST};
use crate::models::group::Permission;
use crate::models::recipient::{Recipient, RecipientForm};
use crate::security::auth::AuthenticatedUser;
use crate::store::Store;
use crate::validation::{self, ValidationErrors};

fn normalize(form: RecipientForm) -> RecipientForm {
    RecipientForm {
        email: form.email.trim().to_lowercase(),
        full_name: form.full_name.trim().to_string(),
        comment: form.comment,
    }
}

fn check_unique_email(store: &dyn Store, form: &RecipientForm, current: Option<i64>) -> Result<(), ValidationErrors> {
    match store.recipient_find_by_email(&form.email) {
        Some(existing) if Some(existing.id) != current => {
            let mut errors = ValidationErrors::new();
            errors.add("email", "A recipient with this email already exists");
            Err(errors)
        }
        _ => Ok(()),
    }
}

#[get("/recipients?<q>")]
pub fn list(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    q: Option<&str>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let owner = auth.scope(store, Permission::CanViewAllRecipients);
    let search = q.map(str::trim).filter(|s| !s.is_empty());

    let recipients: Vec<Recipient> = match search {
        Some(term) => store.recipient_list(owner, Some(term)),
        None => {
            let (enabled, ttl) = cache_settings(store);
            cache.get_or_load(enabled, ttl, RECIPIENT_LIST, &cache_scope(owner), || {
                store.recipient_list(owner, None)
            })
        }
    };
    ok(json!({ "recipients": recipients }))
}

#[get("/recipients/<id>")]
pub fn detail(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    let store: &dyn Store = &***store;
    let recipient = match store.recipient_find_by_id(id) {
        Some(r) => r,
        None => return not_found("Recipient"),
    };
    if recipient.owner_id != Some(auth.user.id) && !auth.can(store, Permission::CanViewAllRecipients) {
        return forbidden();
    }
    ok(json!({ "recipient": recipient }))
}

#[post("/recipients", format = "json", data = "<body>")]
pub fn create(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    body: Json<RecipientForm>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let form = normalize(body.into_inner());
    if let Err(errors) = validation::validate_recipient(&form).and_then(|_| check_unique_email(store, &form, None)) {
        return invalid(&errors);
    }

    match store.recipient_create(&form, Some(auth.user.id)) {
        Ok(id) => {
            cache.invalidate(RECIPIENT_LIST);
            log::info!("recipient {} created by {}", id, auth.user.email);
            created(json!({ "id": id, "recipient": store.recipient_find_by_id(id) }))
        }
        Err(e) => server_error(&e),
    }
}

#[put("/recipients/<id>", format = "json", data = "<body>")]
pub fn update(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
    body: Json<RecipientForm>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.recipient_find_by_id(id) {
        Some(r) => r,
        None => return not_found("Recipient"),
    };
    if existing.owner_id != Some(auth.user.id) {
        return forbidden();
    }
    let form = normalize(body.into_inner());
    if let Err(errors) = validation::validate_recipient(&form).and_then(|_| check_unique_email(store, &form, Some(id))) {
        return invalid(&errors);
    }

    match store.recipient_update(id, &form) {
        Ok(()) => {
            cache.invalidate(RECIPIENT_LIST);
            ok(json!({ "recipient": store.recipient_find_by_id(id) }))
        }
        Err(e) => server_error(&e),
    }
}

#[delete("/recipients/<id>")]
pub fn delete(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.recipient_find_by_id(id) {
        Some(r) => r,
        None => return not_found("Recipient"),
    };
    if existing.owner_id != Some(auth.user.id) && !auth.can(store, Permission::DeleteRecipient) {
        return forbidden();
    }

    match store.recipient_delete(id) {
        Ok(()) => {
            cache.invalidate(RECIPIENT_LIST);
            log::info!("recipient {} deleted by {}", id, auth.user.email);
            ok(json!({ "id": id }))
        }
        Err(e) => server_error(&e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, detail, create, update, delete]
}
