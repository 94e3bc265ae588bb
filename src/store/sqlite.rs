use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::db::DbPool;
use crate::models::attempt::{AttemptStatus, MailingAttempt};
use crate::models::group::{Group, Permission};
use crate::models::mailing::{DispatchOutcome, Mailing, MailingForm, MailingStatus};
use crate::models::message::{Message, MessageForm};
use crate::models::recipient::{Recipient, RecipientForm};
use crate::models::session::Session;
use crate::models::settings::Setting;
use crate::models::statistics::UserStatistics;
use crate::models::user::{User, UserForm};

use super::Store;

/// SQLite-backed implementation of the Store trait.
/// Wraps the r2d2 connection pool and delegates to model methods.
pub struct SqliteStore {
    pub pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn new_at(path: &str) -> Result<Self, String> {
        let pool = crate::db::init_pool_at(path)?;
        Ok(Self { pool })
    }
}

impl Store for SqliteStore {
    // ── Lifecycle ───────────────────────────────────────────────────

    fn run_migrations(&self) -> Result<(), String> {
        crate::db::run_migrations(&self.pool).map_err(|e| e.to_string())
    }

    fn seed_defaults(&self) -> Result<(), String> {
        crate::db::seed_defaults(&self.pool).map_err(|e| e.to_string())
    }

    // ── Settings ────────────────────────────────────────────────────

    fn setting_get(&self, key: &str) -> Option<String> {
        Setting::get(&self.pool, key)
    }

    fn setting_set(&self, key: &str, value: &str) -> Result<(), String> {
        Setting::set(&self.pool, key, value)
    }

    fn setting_get_group(&self, prefix: &str) -> HashMap<String, String> {
        Setting::get_group(&self.pool, prefix)
    }

    // ── Users ───────────────────────────────────────────────────────

    fn user_get_by_id(&self, id: i64) -> Option<User> {
        User::get_by_id(&self.pool, id)
    }

    fn user_get_by_email(&self, email: &str) -> Option<User> {
        User::get_by_email(&self.pool, email)
    }

    fn user_get_by_confirm_token(&self, token: &str) -> Option<User> {
        User::get_by_confirm_token(&self.pool, token)
    }

    fn user_list_all(&self) -> Vec<User> {
        User::list_all(&self.pool)
    }

    fn user_create(&self, form: &UserForm, password_hash: &str, role: &str) -> Result<i64, String> {
        User::create(&self.pool, form, password_hash, role)
    }

    fn user_update_profile(&self, id: i64, form: &UserForm) -> Result<(), String> {
        User::update_profile(&self.pool, id, form)
    }

    fn user_update_password(&self, id: i64, password_hash: &str) -> Result<(), String> {
        User::update_password(&self.pool, id, password_hash)
    }

    fn user_update_avatar(&self, id: i64, avatar: Option<&str>) -> Result<(), String> {
        User::update_avatar(&self.pool, id, avatar)
    }

    fn user_update_role(&self, id: i64, role: &str) -> Result<(), String> {
        User::update_role(&self.pool, id, role)
    }

    fn user_confirm_email(&self, id: i64) -> Result<bool, String> {
        User::confirm_email(&self.pool, id)
    }

    fn user_set_blocked(&self, id: i64, blocked: bool) -> Result<(), String> {
        User::set_blocked(&self.pool, id, blocked)
    }

    fn user_delete(&self, id: i64) -> Result<(), String> {
        User::delete(&self.pool, id)
    }

    // ── Groups ──────────────────────────────────────────────────────

    fn group_get_or_create(&self, name: &str) -> Result<(Group, bool), String> {
        Group::get_or_create(&self.pool, name)
    }

    fn group_find_by_name(&self, name: &str) -> Option<Group> {
        Group::find_by_name(&self.pool, name)
    }

    fn group_list(&self) -> Vec<Group> {
        Group::list(&self.pool)
    }

    fn group_grant(&self, group_id: i64, permissions: &[Permission]) -> Result<(), String> {
        Group::grant(&self.pool, group_id, permissions)
    }

    fn group_permissions(&self, group_id: i64) -> Vec<Permission> {
        Group::permissions(&self.pool, group_id)
    }

    fn group_add_user(&self, group_id: i64, user_id: i64) -> Result<(), String> {
        Group::add_user(&self.pool, group_id, user_id)
    }

    fn group_remove_user(&self, group_id: i64, user_id: i64) -> Result<(), String> {
        Group::remove_user(&self.pool, group_id, user_id)
    }

    fn group_user_has_permission(&self, user_id: i64, perm: Permission) -> bool {
        Group::user_has_permission(&self.pool, user_id, perm)
    }

    // ── Sessions ────────────────────────────────────────────────────

    fn session_create(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
        ip_hash: Option<&str>,
    ) -> Result<(), String> {
        Session::create(&self.pool, session_id, user_id, expires_at, ip_hash)
    }

    fn session_get_user(&self, session_id: &str) -> Option<User> {
        Session::user(&self.pool, session_id)
    }

    fn session_delete(&self, session_id: &str) -> Result<(), String> {
        Session::delete(&self.pool, session_id)
    }

    fn session_delete_for_user(&self, user_id: i64) -> Result<(), String> {
        Session::delete_for_user(&self.pool, user_id)
    }

    fn session_cleanup_expired(&self) -> Result<usize, String> {
        Session::cleanup_expired(&self.pool)
    }

    // ── Recipients ──────────────────────────────────────────────────

    fn recipient_find_by_id(&self, id: i64) -> Option<Recipient> {
        Recipient::find_by_id(&self.pool, id)
    }

    fn recipient_find_by_email(&self, email: &str) -> Option<Recipient> {
        Recipient::find_by_email(&self.pool, email)
    }

    fn recipient_list(&self, owner: Option<i64>, search: Option<&str>) -> Vec<Recipient> {
        Recipient::list(&self.pool, owner, search)
    }

    fn recipient_for_mailing(&self, mailing_id: i64) -> Vec<Recipient> {
        Recipient::for_mailing(&self.pool, mailing_id)
    }

    fn recipient_count_distinct(&self) -> i64 {
        Recipient::count_distinct(&self.pool)
    }

    fn recipient_create(&self, form: &RecipientForm, owner_id: Option<i64>) -> Result<i64, String> {
        Recipient::create(&self.pool, form, owner_id)
    }

    fn recipient_update(&self, id: i64, form: &RecipientForm) -> Result<(), String> {
        Recipient::update(&self.pool, id, form)
    }

    fn recipient_delete(&self, id: i64) -> Result<(), String> {
        Recipient::delete(&self.pool, id)
    }

    // ── Messages ────────────────────────────────────────────────────

    fn message_find_by_id(&self, id: i64) -> Option<Message> {
        Message::find_by_id(&self.pool, id)
    }

    fn message_list(&self, owner: Option<i64>, search: Option<&str>) -> Vec<Message> {
        Message::list(&self.pool, owner, search)
    }

    fn message_create(&self, form: &MessageForm, owner_id: Option<i64>) -> Result<i64, String> {
        Message::create(&self.pool, form, owner_id)
    }

    fn message_update(&self, id: i64, form: &MessageForm) -> Result<(), String> {
        Message::update(&self.pool, id, form)
    }

    fn message_delete(&self, id: i64) -> Result<(), String> {
        Message::delete(&self.pool, id)
    }

    // ── Mailings ────────────────────────────────────────────────────

    fn mailing_find_by_id(&self, id: i64) -> Option<Mailing> {
        Mailing::find_by_id(&self.pool, id)
    }

    fn mailing_list(&self, owner: Option<i64>, status: Option<MailingStatus>) -> Vec<Mailing> {
        Mailing::list(&self.pool, owner, status)
    }

    fn mailing_count(&self, status: Option<MailingStatus>) -> i64 {
        Mailing::count(&self.pool, status)
    }

    fn mailing_recipient_ids(&self, id: i64) -> Vec<i64> {
        Mailing::recipient_ids(&self.pool, id)
    }

    fn mailing_create(&self, form: &MailingForm, owner_id: Option<i64>) -> Result<i64, String> {
        Mailing::create(&self.pool, form, owner_id)
    }

    fn mailing_update(&self, id: i64, form: &MailingForm) -> Result<(), String> {
        Mailing::update(&self.pool, id, form)
    }

    fn mailing_mark_running(&self, id: i64) -> Result<bool, String> {
        Mailing::mark_running(&self.pool, id)
    }

    fn mailing_finish_dispatch(
        &self,
        id: i64,
        status: MailingStatus,
        outcome: DispatchOutcome,
    ) -> Result<(), String> {
        Mailing::finish_dispatch(&self.pool, id, status, outcome)
    }

    fn mailing_set_blocked(&self, id: i64, blocked: bool) -> Result<(), String> {
        Mailing::set_blocked(&self.pool, id, blocked)
    }

    fn mailing_delete(&self, id: i64) -> Result<(), String> {
        Mailing::delete(&self.pool, id)
    }

    // ── Attempts ────────────────────────────────────────────────────

    fn attempt_create(
        &self,
        mailing_id: i64,
        owner_id: Option<i64>,
        recipient_email: &str,
        status: AttemptStatus,
        server_response: &str,
    ) -> Result<i64, String> {
        MailingAttempt::create(
            &self.pool,
            mailing_id,
            owner_id,
            recipient_email,
            status,
            server_response,
        )
    }

    fn attempt_list(
        &self,
        owner: Option<i64>,
        mailing_id: Option<i64>,
        status: Option<AttemptStatus>,
    ) -> Vec<MailingAttempt> {
        MailingAttempt::list(&self.pool, owner, mailing_id, status)
    }

    fn attempt_count_for_mailing(&self, mailing_id: i64, status: Option<AttemptStatus>) -> i64 {
        MailingAttempt::count_for_mailing(&self.pool, mailing_id, status)
    }

    fn attempt_clear(&self, owner: Option<i64>) -> Result<usize, String> {
        MailingAttempt::clear(&self.pool, owner)
    }

    // ── Statistics ──────────────────────────────────────────────────

    fn stats_get(&self, user_id: i64) -> Option<UserStatistics> {
        UserStatistics::get(&self.pool, user_id)
    }

    fn stats_get_or_create(&self, user_id: i64) -> Result<UserStatistics, String> {
        UserStatistics::get_or_create(&self.pool, user_id)
    }

    fn stats_update(&self, user_id: i64, success: bool) -> Result<(), String> {
        UserStatistics::update_statistics(&self.pool, user_id, success)
    }
}
