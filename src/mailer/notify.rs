//! Account emails: confirmation link, generated password, password-change notice.

use crate::models::user::User;
use crate::store::Store;

use super::{sender_address, MailTransport, TransportError};

fn site(store: &dyn Store) -> (String, String) {
    let name = store.setting_get_or("site_name", "Mailings");
    let url = store
        .setting_get_or("site_url", "http://127.0.0.1:8000")
        .trim_end_matches('/')
        .to_string();
    (name, url)
}

pub fn confirm_link(store: &dyn Store, token: &str) -> String {
    let (_, url) = site(store);
    format!("{}/api/confirm-email/{}", url, token)
}

pub fn send_welcome(
    store: &dyn Store,
    transport: &dyn MailTransport,
    user: &User,
) -> Result<(), TransportError> {
    let (name, _) = site(store);
    let token = user.confirm_token.as_deref().unwrap_or_default();
    let subject = format!("Welcome to {}", name);
    let body = format!(
        "Hello {},\n\nThanks for registering with {}.\nConfirm your email address by opening this link:\n\n{}\n",
        user.first_name,
        name,
        confirm_link(store, token)
    );
    transport.send(&subject, &body, &sender_address(store), &user.email)
}

pub fn send_new_password(
    store: &dyn Store,
    transport: &dyn MailTransport,
    user: &User,
    password: &str,
) -> Result<(), TransportError> {
    let (name, _) = site(store);
    let subject = format!("{}: your new password", name);
    let body = format!(
        "Hello {},\n\nYour password was reset. Your new password is:\n\n{}\n\nChange it after signing in.\n",
        user.first_name, password
    );
    transport.send(&subject, &body, &sender_address(store), &user.email)
}

pub fn send_password_changed(
    store: &dyn Store,
    transport: &dyn MailTransport,
    user: &User,
) -> Result<(), TransportError> {
    let (name, _) = site(store);
    let subject = format!("{}: password changed", name);
    let body = format!(
        "Hello {},\n\nThe password for your account was just changed.\nIf this wasn't you, reset it right away.\n",
        user.first_name
    );
    transport.send(&subject, &body, &sender_address(store), &user.email)
}
