use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::json;

use super::{cache_scope, cache_settings, created, forbidden, invalid, not_found, ok, server_error, ApiResponse};
use crate::cache::{ListCache, MAILING_LIST, MESSAGE_LIST};
use crate::models::group::Permission;
use crate::models::message::{Message, MessageForm};
use crate::security::auth::AuthenticatedUser;
use crate::store::Store;
use crate::validation;

fn normalize(form: MessageForm) -> MessageForm {
    MessageForm {
        subject: form.subject.trim().to_string(),
        body: form.body,
    }
}

#[get("/messages?<q>")]
pub fn list(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    q: Option<&str>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let owner = auth.scope(store, Permission::CanViewAllMessages);

    let messages: Vec<Message> = match q.map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => store.message_list(owner, Some(term)),
        None => {
            let (enabled, ttl) = cache_settings(store);
            cache.get_or_load(enabled, ttl, MESSAGE_LIST, &cache_scope(owner), || {
                store.message_list(owner, None)
            })
        }
    };
    ok(json!({ "messages": messages }))
}

#[get("/messages/<id>")]
pub fn detail(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    let store: &dyn Store = &***store;
    let message = match store.message_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Message"),
    };
    if message.owner_id != Some(auth.user.id) && !auth.can(store, Permission::CanViewAllMessages) {
        return forbidden();
    }
    ok(json!({ "message": message }))
}

#[post("/messages", format = "json", data = "<body>")]
pub fn create(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    body: Json<MessageForm>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let form = normalize(body.into_inner());
    if let Err(errors) = validation::validate_message(&form) {
        return invalid(&errors);
    }

    match store.message_create(&form, Some(auth.user.id)) {
        Ok(id) => {
            cache.invalidate(MESSAGE_LIST);
            created(json!({ "id": id, "message": store.message_find_by_id(id) }))
        }
        Err(e) => server_error(&e),
    }
}

#[put("/messages/<id>", format = "json", data = "<body>")]
pub fn update(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
    body: Json<MessageForm>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.message_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Message"),
    };
    if existing.owner_id != Some(auth.user.id) {
        return forbidden();
    }
    let form = normalize(body.into_inner());
    if let Err(errors) = validation::validate_message(&form) {
        return invalid(&errors);
    }

    match store.message_update(id, &form) {
        Ok(()) => {
            cache.invalidate(MESSAGE_LIST);
            ok(json!({ "message": store.message_find_by_id(id) }))
        }
        Err(e) => server_error(&e),
    }
}

#[delete("/messages/<id>")]
pub fn delete(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    cache: &State<ListCache>,
    id: i64,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let existing = match store.message_find_by_id(id) {
        Some(m) => m,
        None => return not_found("Message"),
    };
    if existing.owner_id != Some(auth.user.id) && !auth.can(store, Permission::DeleteMessage) {
        return forbidden();
    }

    match store.message_delete(id) {
        Ok(()) => {
            // mailings using this message go with it
            cache.invalidate(MESSAGE_LIST);
            cache.invalidate(MAILING_LIST);
            log::info!("message {} deleted by {}", id, auth.user.email);
            ok(json!({ "id": id }))
        }
        Err(e) => server_error(&e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, detail, create, update, delete]
}
