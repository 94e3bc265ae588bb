use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rocket::http::{Cookie, CookieJar, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::models::group::Permission;
use crate::models::user::User;
use crate::rate_limit::RateLimiter;
use crate::store::Store;

const SESSION_COOKIE: &str = "mailings_session";
const LOGIN_WINDOW_MINUTES: u64 = 15;
const GENERATED_PASSWORD_LEN: usize = 8;

// ── Client IP request guard ──

/// Proxy headers consulted before the socket peer, in order.
const IP_HEADERS: &[&str] = &["X-Real-IP", "X-Forwarded-For"];

/// Client address for rate limiting and session fingerprints.
pub struct ClientIp(pub String);

/// First non-empty address among the proxy headers. For `X-Forwarded-For`
/// the leftmost entry is the original client.
fn forwarded_ip(request: &Request<'_>) -> Option<String> {
    IP_HEADERS.iter().find_map(|name| {
        request
            .headers()
            .get_one(name)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = forwarded_ip(request)
            .or_else(|| request.client_ip().map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

// ── Authenticated user guard ──

/// Guard: any user with a valid session and a non-blocked account.
pub struct AuthenticatedUser {
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_session_user(request).await {
            Some(user) => Outcome::Success(AuthenticatedUser { user }),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

impl AuthenticatedUser {
    pub fn can(&self, store: &dyn Store, perm: Permission) -> bool {
        store.user_has_permission(&self.user, perm)
    }

    /// `None` when the user may see every row, otherwise their own id.
    pub fn scope(&self, store: &dyn Store, view_all: Permission) -> Option<i64> {
        if self.can(store, view_all) {
            None
        } else {
            Some(self.user.id)
        }
    }
}

async fn resolve_session_user(request: &Request<'_>) -> Option<User> {
    let store = request
        .guard::<&State<Arc<dyn Store>>>()
        .await
        .succeeded()?;
    let cookies = request.cookies();
    let session_id = cookies.get_private(SESSION_COOKIE)?.value().to_string();

    match store.session_get_user(&session_id) {
        Some(user) if user.is_active() => Some(user),
        _ => {
            cookies.remove_private(Cookie::from(SESSION_COOKIE));
            None
        }
    }
}

// ── Password utilities ──

pub fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| e.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Random alphanumeric password handed out by the reset flow.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

// ── Session management ──

pub fn create_session(store: &dyn Store, user_id: i64, ip: Option<&str>) -> Result<String, String> {
    let expiry_hours = store.setting_get_i64("session_expiry_hours").max(1);
    let session_id = uuid::Uuid::new_v4().to_string();
    let expires = Utc::now().naive_utc() + Duration::hours(expiry_hours);
    let ip_hash = ip.map(hash_ip);

    store.session_create(&session_id, user_id, expires, ip_hash.as_deref())?;
    Ok(session_id)
}

pub fn destroy_session(store: &dyn Store, cookies: &CookieJar<'_>) -> Result<(), String> {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        store.session_delete(cookie.value())?;
    }
    clear_session_cookie(cookies);
    Ok(())
}

/// Set the session cookie. `Secure` follows the scheme of `site_url`.
pub fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &str, store: &dyn Store) {
    let is_secure = store.setting_get_or("site_url", "").starts_with("https://");

    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(rocket::http::SameSite::Lax);
    cookie.set_path("/");
    if is_secure {
        cookie.set_secure(true);
    }
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
}

/// Log the user in: new session row plus cookie.
pub fn login(
    store: &dyn Store,
    cookies: &CookieJar<'_>,
    user_id: i64,
    ip: Option<&str>,
) -> Result<(), String> {
    let session_id = create_session(store, user_id, ip)?;
    set_session_cookie(cookies, &session_id, store);
    Ok(())
}

pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// Record a login attempt for `ip`; false once `login_rate_limit` attempts
/// were made within the window.
pub fn check_login_rate_limit(limiter: &RateLimiter, store: &dyn Store, ip: &str) -> bool {
    let max_attempts = store.setting_get_i64("login_rate_limit").max(1) as u64;
    let window = std::time::Duration::from_secs(LOGIN_WINDOW_MINUTES * 60);
    limiter.cleanup(window);
    limiter.check_and_record(&format!("login:{}", hash_ip(ip)), max_attempts, window)
}

pub fn reset_login_rate_limit(limiter: &RateLimiter, ip: &str) {
    limiter.reset(&format!("login:{}", hash_ip(ip)));
}
