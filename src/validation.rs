use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;

use crate::models::mailing::{MailingForm, MailingStatus};
use crate::models::message::MessageForm;
use crate::models::recipient::RecipientForm;
use crate::models::user::UserForm;

pub const BANNED_WORDS: [&str; 9] = [
    "казино",
    "криптовалюта",
    "крипта",
    "биржа",
    "дешево",
    "бесплатно",
    "обман",
    "полиция",
    "радар",
];

pub const MAX_SUBJECT_LEN: usize = 150;
pub const MAX_FULL_NAME_LEN: usize = 100;
pub const MAX_USERNAME_LEN: usize = 50;
pub const MAX_PHONE_LEN: usize = 15;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_AVATAR_BYTES: u64 = 5 * 1024 * 1024;
pub const AVATAR_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

/// Field name → messages. Empty means the input is valid.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.0)
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// True if any banned word appears in `text` as a whole word, ignoring case.
pub fn contains_banned_word(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BANNED_WORDS.contains(&word))
}

fn check_banned(errors: &mut ValidationErrors, field: &str, value: &str) {
    if contains_banned_word(value) {
        errors.add(field, "Contains a forbidden word");
    }
}

fn check_required(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "This field is required");
    }
}

fn check_max_len(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(field, format!("Must be at most {} characters", max));
    }
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
        })
        .as_ref()
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

fn check_email(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "This field is required");
    } else if !is_valid_email(value.trim()) {
        errors.add(field, "Enter a valid email address");
    }
}

/// Phone numbers are optional; when given they must be at most 15 ASCII digits.
pub fn validate_phone(phone: &str) -> Result<(), String> {
    if !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err("Phone number must contain digits only".to_string());
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(format!(
            "Phone number must be at most {} digits",
            MAX_PHONE_LEN
        ));
    }
    Ok(())
}

/// Size and extension check for an uploaded avatar.
pub fn validate_avatar(file_name: &str, size: u64) -> Result<(), String> {
    if size > MAX_AVATAR_BYTES {
        return Err("Avatar must not exceed 5 MB".to_string());
    }
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !AVATAR_EXTENSIONS.contains(&ext.as_str()) {
        return Err("Avatar must be a .jpg, .jpeg or .png file".to_string());
    }
    Ok(())
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

// ── Forms ──

pub fn validate_message(form: &MessageForm) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_required(&mut errors, "subject", &form.subject);
    check_max_len(&mut errors, "subject", &form.subject, MAX_SUBJECT_LEN);
    check_banned(&mut errors, "subject", &form.subject);
    check_required(&mut errors, "body", &form.body);
    check_banned(&mut errors, "body", &form.body);
    errors.into_result(())
}

pub fn validate_recipient(form: &RecipientForm) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_email(&mut errors, "email", &form.email);
    check_required(&mut errors, "full_name", &form.full_name);
    check_max_len(&mut errors, "full_name", &form.full_name, MAX_FULL_NAME_LEN);
    errors.into_result(())
}

/// Profile fields shared by registration and profile edits.
pub fn validate_profile(form: &UserForm) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    profile_errors(&mut errors, form);
    errors.into_result(())
}

fn profile_errors(errors: &mut ValidationErrors, form: &UserForm) {
    check_email(errors, "email", &form.email);
    check_required(errors, "username", &form.username);
    check_max_len(errors, "username", &form.username, MAX_USERNAME_LEN);
    check_banned(errors, "username", &form.username);
    check_required(errors, "first_name", &form.first_name);
    check_banned(errors, "first_name", &form.first_name);
    if let Some(phone) = form.phone_number.as_deref().filter(|p| !p.is_empty()) {
        if let Err(e) = validate_phone(phone) {
            errors.add("phone_number", e);
        }
    }
}

pub fn check_new_password(errors: &mut ValidationErrors, password1: &str, password2: &str) {
    if password1.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password1",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }
    if password1 != password2 {
        errors.add("password2", "Passwords do not match");
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub first_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub password1: String,
    pub password2: String,
}

impl RegisterForm {
    pub fn profile(&self) -> UserForm {
        UserForm {
            email: self.email.trim().to_string(),
            username: self.username.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            phone_number: self.phone_number.clone().filter(|p| !p.is_empty()),
            country: self.country.clone().filter(|c| !c.is_empty()),
        }
    }
}

pub fn validate_registration(form: &RegisterForm) -> Result<UserForm, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let profile = form.profile();
    profile_errors(&mut errors, &profile);
    check_new_password(&mut errors, &form.password1, &form.password2);
    errors.into_result(profile)
}

/// Raw mailing input as posted by the client.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MailingInput {
    #[serde(default)]
    pub first_send_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub recipient_ids: Vec<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Parse and check mailing input. Existence and ownership of the referenced
/// message and recipients is checked by the caller.
pub fn parse_mailing(input: &MailingInput) -> Result<MailingForm, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let mut parse_time = |field: &str, raw: &Option<String>| -> Option<NaiveDateTime> {
        let raw = raw.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let parsed = parse_datetime(raw);
        if parsed.is_none() {
            errors.add(field, "Use the format YYYY-MM-DD HH:MM");
        }
        parsed
    };
    let first_send_time = parse_time("first_send_time", &input.first_send_time);
    let end_time = parse_time("end_time", &input.end_time);

    if let (Some(start), Some(end)) = (first_send_time, end_time) {
        if end < start {
            errors.add("end_time", "End time can't be earlier than the first send time");
        }
    }

    let message_id = match input.message_id {
        Some(id) => id,
        None => {
            errors.add("message_id", "This field is required");
            0
        }
    };

    let status = match input.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<MailingStatus>() {
            Ok(s) => Some(s),
            Err(_) => {
                errors.add("status", format!("Unknown status: {}", raw));
                None
            }
        },
        None => None,
    };

    let mut recipient_ids = input.recipient_ids.clone();
    recipient_ids.sort_unstable();
    recipient_ids.dedup();

    errors.into_result(MailingForm {
        first_send_time,
        end_time,
        message_id,
        recipient_ids,
        status,
    })
}
