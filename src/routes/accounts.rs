use std::path::{Component, Path};
use std::sync::Arc;

use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{CookieJar, Status};
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::json;

use super::{created, fail, forbidden, invalid, not_found, ok, server_error, ApiResponse};
use crate::mailer::{notify, MailTransport, TransportError};
use crate::models::group::Permission;
use crate::models::user::{User, UserForm, ROLE_USER};
use crate::rate_limit::RateLimiter;
use crate::security::auth::{self, AuthenticatedUser, ClientIp};
use crate::store::Store;
use crate::validation::{self, RegisterForm, ValidationErrors};

pub const UPLOAD_ROOT: &str = "data/uploads";
pub const AVATAR_DIR: &str = "data/uploads/avatars";

/// Delete a stored upload given its path relative to `root`.
/// Paths that try to leave the root are ignored.
fn remove_upload(root: &Path, relative: &str) {
    let rel = Path::new(relative);
    if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return;
    }
    if let Err(e) = std::fs::remove_file(root.join(rel)) {
        log::warn!("could not remove old upload {}: {}", relative, e);
    }
}

/// Point the user at `new_path`; the previous file goes only once the row
/// has been updated.
pub fn replace_avatar(
    store: &dyn Store,
    root: &Path,
    user: &User,
    new_path: &str,
) -> Result<(), String> {
    store.user_update_avatar(user.id, Some(new_path))?;
    if let Some(old) = user.avatar.as_deref().filter(|old| *old != new_path) {
        remove_upload(root, old);
    }
    Ok(())
}

/// Run a notification on the blocking pool and wait for it.
async fn send_mail<F>(job: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), TransportError> + Send + 'static,
{
    match rocket::tokio::task::spawn_blocking(job).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("mail task failed: {}", e)),
    }
}

fn email_taken(store: &dyn Store, email: &str, current: Option<i64>) -> bool {
    matches!(store.user_get_by_email(email), Some(u) if Some(u.id) != current)
}

// ── Registration ──

#[post("/register", format = "json", data = "<body>")]
pub async fn register(
    store: &State<Arc<dyn Store>>,
    transport: &State<Arc<dyn MailTransport>>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    body: Json<RegisterForm>,
) -> ApiResponse {
    let profile = match validation::validate_registration(&body) {
        Ok(p) => p,
        Err(errors) => return invalid(&errors),
    };
    if email_taken(&***store, &profile.email, None) {
        let mut errors = ValidationErrors::new();
        errors.add("email", "A user with this email already exists");
        return invalid(&errors);
    }

    let hash = match auth::hash_password(&body.password1) {
        Ok(h) => h,
        Err(e) => return server_error(&e),
    };
    let user_id = match store.user_create(&profile, &hash, ROLE_USER) {
        Ok(id) => id,
        Err(e) => return server_error(&e),
    };
    let user = match store.user_get_by_id(user_id) {
        Some(u) => u,
        None => return server_error("user vanished after insert"),
    };
    log::info!("user {} registered", user.email);

    if let Err(e) = auth::login(&***store, cookies, user.id, Some(&client_ip.0)) {
        return server_error(&e);
    }

    let (store_arc, transport_arc, welcome_user) =
        (Arc::clone(store.inner()), Arc::clone(transport.inner()), user.clone());
    if let Err(e) = send_mail(move || notify::send_welcome(&*store_arc, &*transport_arc, &welcome_user)).await {
        log::warn!("welcome email to {} failed: {}", user.email, e);
    }

    created(json!({ "user": user.safe_json() }))
}

#[get("/confirm-email/<token>")]
pub fn confirm_email(store: &State<Arc<dyn Store>>, token: &str) -> ApiResponse {
    let user = match store.user_get_by_confirm_token(token) {
        Some(u) => u,
        None => return fail(Status::NotFound, "Invalid confirmation link"),
    };
    match store.user_confirm_email(user.id) {
        Ok(true) => {
            log::info!("user {} confirmed their email", user.email);
            ok(json!({ "message": "Email confirmed" }))
        }
        Ok(false) => ok(json!({ "message": "Email already confirmed" })),
        Err(e) => server_error(&e),
    }
}

// ── Login / logout ──

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[post("/login", format = "json", data = "<body>")]
pub fn login(
    store: &State<Arc<dyn Store>>,
    limiter: &State<RateLimiter>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    body: Json<LoginRequest>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth::check_login_rate_limit(limiter, store, &client_ip.0) {
        log::warn!("login rate limit hit for {}", auth::hash_ip(&client_ip.0));
        return fail(Status::TooManyRequests, "Too many login attempts. Try again later.");
    }

    let user = match store.user_get_by_email(body.email.trim()) {
        Some(u) if auth::verify_password(&body.password, &u.password_hash) => u,
        _ => return fail(Status::Unauthorized, "Invalid email or password"),
    };
    if !user.is_active() {
        log::info!("blocked user {} refused at login", user.email);
        return fail(Status::Forbidden, "This account is blocked");
    }

    if let Err(e) = store.session_cleanup_expired() {
        log::warn!("session cleanup failed: {}", e);
    }
    if let Err(e) = auth::login(store, cookies, user.id, Some(&client_ip.0)) {
        return server_error(&e);
    }
    auth::reset_login_rate_limit(limiter, &client_ip.0);
    log::info!("user {} logged in", user.email);
    ok(json!({ "user": user.safe_json() }))
}

#[post("/logout")]
pub fn logout(store: &State<Arc<dyn Store>>, cookies: &CookieJar<'_>) -> ApiResponse {
    match auth::destroy_session(&***store, cookies) {
        Ok(()) => ok(json!({})),
        Err(e) => server_error(&e),
    }
}

// ── Passwords ──

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[post("/password-reset", format = "json", data = "<body>")]
pub async fn password_reset(
    store: &State<Arc<dyn Store>>,
    transport: &State<Arc<dyn MailTransport>>,
    body: Json<ResetRequest>,
) -> ApiResponse {
    let user = match store.user_get_by_email(body.email.trim()) {
        Some(u) => u,
        None => return fail(Status::NotFound, "No user with this email"),
    };

    let password = auth::generate_password();
    let hash = match auth::hash_password(&password) {
        Ok(h) => h,
        Err(e) => return server_error(&e),
    };
    if let Err(e) = store.user_update_password(user.id, &hash) {
        return server_error(&e);
    }
    if let Err(e) = store.session_delete_for_user(user.id) {
        log::warn!("could not drop sessions of {}: {}", user.email, e);
    }

    let email = user.email.clone();
    let (store_arc, transport_arc) = (Arc::clone(store.inner()), Arc::clone(transport.inner()));
    match send_mail(move || notify::send_new_password(&*store_arc, &*transport_arc, &user, &password)).await {
        Ok(()) => {
            log::info!("password reset for {}", email);
            ok(json!({ "message": "A new password was sent to your email" }))
        }
        Err(e) => server_error(&format!("Could not send the new password: {}", e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub password1: String,
    pub password2: String,
}

#[post("/password", format = "json", data = "<body>")]
pub async fn change_password(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    transport: &State<Arc<dyn MailTransport>>,
    body: Json<ChangePasswordRequest>,
) -> ApiResponse {
    let mut errors = ValidationErrors::new();
    if !auth::verify_password(&body.old_password, &auth.user.password_hash) {
        errors.add("old_password", "Wrong password");
    }
    validation::check_new_password(&mut errors, &body.password1, &body.password2);
    if !errors.is_empty() {
        return invalid(&errors);
    }

    let hash = match auth::hash_password(&body.password1) {
        Ok(h) => h,
        Err(e) => return server_error(&e),
    };
    if let Err(e) = store.user_update_password(auth.user.id, &hash) {
        return server_error(&e);
    }
    log::info!("user {} changed their password", auth.user.email);

    let user = auth.user;
    let (store_arc, transport_arc) = (Arc::clone(store.inner()), Arc::clone(transport.inner()));
    let email = user.email.clone();
    if let Err(e) = send_mail(move || notify::send_password_changed(&*store_arc, &*transport_arc, &user)).await {
        log::warn!("password change notice to {} failed: {}", email, e);
    }
    ok(json!({ "message": "Password changed" }))
}

// ── Profile ──

#[get("/profile")]
pub fn profile(auth: AuthenticatedUser) -> ApiResponse {
    ok(json!({ "user": auth.user.safe_json() }))
}

#[put("/profile", format = "json", data = "<body>")]
pub fn update_profile(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    body: Json<UserForm>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    let form = UserForm {
        email: body.email.trim().to_string(),
        username: body.username.trim().to_string(),
        first_name: body.first_name.trim().to_string(),
        phone_number: body.phone_number.clone().filter(|p| !p.is_empty()),
        country: body.country.clone().filter(|c| !c.is_empty()),
    };
    if let Err(errors) = validation::validate_profile(&form) {
        return invalid(&errors);
    }
    if email_taken(store, &form.email, Some(auth.user.id)) {
        let mut errors = ValidationErrors::new();
        errors.add("email", "A user with this email already exists");
        return invalid(&errors);
    }

    match store.user_update_profile(auth.user.id, &form) {
        Ok(()) => ok(json!({ "user": store.user_get_by_id(auth.user.id).map(|u| u.safe_json()) })),
        Err(e) => server_error(&e),
    }
}

#[derive(FromForm)]
pub struct AvatarUpload<'f> {
    pub avatar: TempFile<'f>,
}

#[post("/profile/avatar", data = "<form>")]
pub async fn upload_avatar(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    mut form: Form<AvatarUpload<'_>>,
) -> ApiResponse {
    let file = &mut form.avatar;
    let file_name = file
        .raw_name()
        .map(|rn| rn.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .or_else(|| file.content_type().and_then(|ct| ct.extension()).map(|e| format!("upload.{}", e)))
        .unwrap_or_default();

    if let Err(e) = validation::validate_avatar(&file_name, file.len()) {
        let mut errors = ValidationErrors::new();
        errors.add("avatar", e);
        return invalid(&errors);
    }

    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    let filename = format!("user{}_{}.{}", auth.user.id, uuid::Uuid::new_v4().simple(), ext);
    if let Err(e) = std::fs::create_dir_all(AVATAR_DIR) {
        return server_error(&format!("Could not create avatar directory: {}", e));
    }
    let dest = Path::new(AVATAR_DIR).join(&filename);
    if let Err(e) = file.move_copy_to(&dest).await {
        return server_error(&format!("Could not store avatar: {}", e));
    }

    let path = format!("avatars/{}", filename);
    match replace_avatar(&***store, Path::new(UPLOAD_ROOT), &auth.user, &path) {
        Ok(()) => ok(json!({ "avatar": path })),
        Err(e) => {
            let _ = std::fs::remove_file(&dest);
            server_error(&e)
        }
    }
}

// ── User management ──

#[get("/users")]
pub fn list_users(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    if !auth.can(&***store, Permission::CanManageUsers) {
        return forbidden();
    }
    let users: Vec<_> = store.user_list_all().iter().map(|u| u.safe_json()).collect();
    ok(json!({ "users": users }))
}

#[get("/users/<id>")]
pub fn user_detail(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    if auth.user.id != id && !auth.can(&***store, Permission::CanManageUsers) {
        return forbidden();
    }
    match store.user_get_by_id(id) {
        Some(user) => ok(json!({
            "user": user.safe_json(),
            "statistics": store.stats_get(user.id),
        })),
        None => not_found("User"),
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockUserRequest {
    pub is_blocked: bool,
}

#[post("/users/<id>/block", format = "json", data = "<body>")]
pub fn block_user(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    body: Json<BlockUserRequest>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanBlockUsers) {
        return forbidden();
    }
    if id == auth.user.id {
        return fail(Status::BadRequest, "You can't block yourself");
    }
    let target = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };

    match store.user_set_blocked(id, body.is_blocked) {
        Ok(()) => {
            log::info!(
                "user {} {} by {}",
                target.email,
                if body.is_blocked { "blocked" } else { "unblocked" },
                auth.user.email
            );
            ok(json!({ "id": id, "is_blocked": body.is_blocked }))
        }
        Err(e) => server_error(&e),
    }
}

#[delete("/users/<id>")]
pub fn delete_user(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanManageUsers) {
        return forbidden();
    }
    if id == auth.user.id {
        return fail(Status::BadRequest, "You can't delete yourself");
    }
    let target = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };
    match store.user_delete(id) {
        Ok(()) => {
            log::info!("user {} deleted by {}", target.email, auth.user.email);
            ok(json!({ "id": id }))
        }
        Err(e) => server_error(&e),
    }
}

/// Every named permission and whether the caller holds it.
#[get("/permissions")]
pub fn permissions(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    let store: &dyn Store = &***store;
    let perms: Vec<_> = Permission::ALL
        .iter()
        .map(|p| json!({ "name": p.as_str(), "granted": auth.can(store, *p) }))
        .collect();
    ok(json!({ "permissions": perms }))
}

// ── Groups ──

#[get("/groups")]
pub fn list_groups(auth: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanManageUsers) {
        return forbidden();
    }
    let groups: Vec<_> = store
        .group_list()
        .into_iter()
        .map(|g| json!({ "id": g.id, "name": g.name, "permissions": store.group_permissions(g.id) }))
        .collect();
    ok(json!({ "groups": groups }))
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub user_id: i64,
}

#[post("/groups/<id>/members", format = "json", data = "<body>")]
pub fn add_member(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    body: Json<MemberRequest>,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanManageUsers) {
        return forbidden();
    }
    if !store.group_list().iter().any(|g| g.id == id) {
        return not_found("Group");
    }
    if store.user_get_by_id(body.user_id).is_none() {
        return not_found("User");
    }
    match store.group_add_user(id, body.user_id) {
        Ok(()) => ok(json!({ "group_id": id, "user_id": body.user_id })),
        Err(e) => server_error(&e),
    }
}

#[delete("/groups/<id>/members/<user_id>")]
pub fn remove_member(
    auth: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    user_id: i64,
) -> ApiResponse {
    let store: &dyn Store = &***store;
    if !auth.can(store, Permission::CanManageUsers) {
        return forbidden();
    }
    match store.group_remove_user(id, user_id) {
        Ok(()) => ok(json!({ "group_id": id, "user_id": user_id })),
        Err(e) => server_error(&e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        register,
        confirm_email,
        login,
        logout,
        password_reset,
        change_password,
        profile,
        update_profile,
        upload_avatar,
        list_users,
        user_detail,
        block_user,
        delete_user,
        permissions,
        list_groups,
        add_member,
        remove_member,
    ]
}
