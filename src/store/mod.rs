use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::models::attempt::{AttemptStatus, MailingAttempt};
use crate::models::group::{Group, Permission};
use crate::models::mailing::{DispatchOutcome, Mailing, MailingForm, MailingStatus};
use crate::models::message::{Message, MessageForm};
use crate::models::recipient::{Recipient, RecipientForm};
use crate::models::statistics::UserStatistics;
use crate::models::user::{User, UserForm};

pub mod sqlite;

/// Unified data-access trait. Every database operation goes through here.
/// Implementation: `SqliteStore` (wraps rusqlite/r2d2).
pub trait Store: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────────
    fn run_migrations(&self) -> Result<(), String>;
    fn seed_defaults(&self) -> Result<(), String>;

    // ── Settings ────────────────────────────────────────────────────
    fn setting_get(&self, key: &str) -> Option<String>;
    fn setting_get_or(&self, key: &str, default: &str) -> String {
        self.setting_get(key).unwrap_or_else(|| default.to_string())
    }
    fn setting_get_bool(&self, key: &str) -> bool {
        self.setting_get(key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }
    fn setting_get_i64(&self, key: &str) -> i64 {
        self.setting_get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
    fn setting_set(&self, key: &str, value: &str) -> Result<(), String>;
    fn setting_get_group(&self, prefix: &str) -> HashMap<String, String>;

    // ── Users ───────────────────────────────────────────────────────
    fn user_get_by_id(&self, id: i64) -> Option<User>;
    fn user_get_by_email(&self, email: &str) -> Option<User>;
    fn user_get_by_confirm_token(&self, token: &str) -> Option<User>;
    fn user_list_all(&self) -> Vec<User>;
    fn user_create(&self, form: &UserForm, password_hash: &str, role: &str) -> Result<i64, String>;
    fn user_update_profile(&self, id: i64, form: &UserForm) -> Result<(), String>;
    fn user_update_password(&self, id: i64, password_hash: &str) -> Result<(), String>;
    fn user_update_avatar(&self, id: i64, avatar: Option<&str>) -> Result<(), String>;
    fn user_update_role(&self, id: i64, role: &str) -> Result<(), String>;
    fn user_confirm_email(&self, id: i64) -> Result<bool, String>;
    fn user_set_blocked(&self, id: i64, blocked: bool) -> Result<(), String>;
    fn user_delete(&self, id: i64) -> Result<(), String>;

    /// Admins hold every permission; everyone else through their groups.
    fn user_has_permission(&self, user: &User, perm: Permission) -> bool {
        user.is_admin() || self.group_user_has_permission(user.id, perm)
    }

    // ── Groups ──────────────────────────────────────────────────────
    fn group_get_or_create(&self, name: &str) -> Result<(Group, bool), String>;
    fn group_find_by_name(&self, name: &str) -> Option<Group>;
    fn group_list(&self) -> Vec<Group>;
    fn group_grant(&self, group_id: i64, permissions: &[Permission]) -> Result<(), String>;
    fn group_permissions(&self, group_id: i64) -> Vec<Permission>;
    fn group_add_user(&self, group_id: i64, user_id: i64) -> Result<(), String>;
    fn group_remove_user(&self, group_id: i64, user_id: i64) -> Result<(), String>;
    fn group_user_has_permission(&self, user_id: i64, perm: Permission) -> bool;

    // ── Sessions ────────────────────────────────────────────────────
    fn session_create(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
        ip_hash: Option<&str>,
    ) -> Result<(), String>;
    fn session_get_user(&self, session_id: &str) -> Option<User>;
    fn session_delete(&self, session_id: &str) -> Result<(), String>;
    fn session_delete_for_user(&self, user_id: i64) -> Result<(), String>;
    fn session_cleanup_expired(&self) -> Result<usize, String>;

    // ── Recipients ──────────────────────────────────────────────────
    fn recipient_find_by_id(&self, id: i64) -> Option<Recipient>;
    fn recipient_find_by_email(&self, email: &str) -> Option<Recipient>;
    fn recipient_list(&self, owner: Option<i64>, search: Option<&str>) -> Vec<Recipient>;
    fn recipient_for_mailing(&self, mailing_id: i64) -> Vec<Recipient>;
    fn recipient_count_distinct(&self) -> i64;
    fn recipient_create(&self, form: &RecipientForm, owner_id: Option<i64>) -> Result<i64, String>;
    fn recipient_update(&self, id: i64, form: &RecipientForm) -> Result<(), String>;
    fn recipient_delete(&self, id: i64) -> Result<(), String>;

    // ── Messages ────────────────────────────────────────────────────
    fn message_find_by_id(&self, id: i64) -> Option<Message>;
    fn message_list(&self, owner: Option<i64>, search: Option<&str>) -> Vec<Message>;
    fn message_create(&self, form: &MessageForm, owner_id: Option<i64>) -> Result<i64, String>;
    fn message_update(&self, id: i64, form: &MessageForm) -> Result<(), String>;
    fn message_delete(&self, id: i64) -> Result<(), String>;

    // ── Mailings ────────────────────────────────────────────────────
    fn mailing_find_by_id(&self, id: i64) -> Option<Mailing>;
    fn mailing_list(&self, owner: Option<i64>, status: Option<MailingStatus>) -> Vec<Mailing>;
    fn mailing_count(&self, status: Option<MailingStatus>) -> i64;
    fn mailing_recipient_ids(&self, id: i64) -> Vec<i64>;
    fn mailing_create(&self, form: &MailingForm, owner_id: Option<i64>) -> Result<i64, String>;
    fn mailing_update(&self, id: i64, form: &MailingForm) -> Result<(), String>;
    fn mailing_mark_running(&self, id: i64) -> Result<bool, String>;
    fn mailing_finish_dispatch(
        &self,
        id: i64,
        status: MailingStatus,
        outcome: DispatchOutcome,
    ) -> Result<(), String>;
    fn mailing_set_blocked(&self, id: i64, blocked: bool) -> Result<(), String>;
    fn mailing_delete(&self, id: i64) -> Result<(), String>;

    // ── Attempts ────────────────────────────────────────────────────
    fn attempt_create(
        &self,
        mailing_id: i64,
        owner_id: Option<i64>,
        recipient_email: &str,
        status: AttemptStatus,
        server_response: &str,
    ) -> Result<i64, String>;
    fn attempt_list(
        &self,
        owner: Option<i64>,
        mailing_id: Option<i64>,
        status: Option<AttemptStatus>,
    ) -> Vec<MailingAttempt>;
    fn attempt_count_for_mailing(&self, mailing_id: i64, status: Option<AttemptStatus>) -> i64;
    fn attempt_clear(&self, owner: Option<i64>) -> Result<usize, String>;

    // ── Statistics ──────────────────────────────────────────────────
    fn stats_get(&self, user_id: i64) -> Option<UserStatistics>;
    fn stats_get_or_create(&self, user_id: i64) -> Result<UserStatistics, String>;
    fn stats_update(&self, user_id: i64, success: bool) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    /// Create a fresh in-memory SqliteStore with migrations + seed applied.
    fn test_store() -> SqliteStore {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to create in-memory pool");
        let store = SqliteStore::new(pool);
        store.run_migrations().expect("migrations failed");
        store.seed_defaults().expect("seed failed");
        store
    }

    fn user_form(email: &str) -> UserForm {
        UserForm {
            email: email.to_string(),
            username: "tester".to_string(),
            first_name: "Test".to_string(),
            phone_number: None,
            country: None,
        }
    }

    // ── Settings ────────────────────────────────────────────────────

    #[test]
    fn test_setting_defaults_seeded() {
        let s = test_store();
        assert_eq!(s.setting_get_or("email_backend", "smtp"), "console");
        assert!(s.setting_get_bool("cache_enabled"));
        assert_eq!(s.setting_get_i64("cache_ttl_secs"), 300);
    }

    #[test]
    fn test_setting_get_or() {
        let s = test_store();
        assert_eq!(s.setting_get_or("missing", "fallback"), "fallback");
        s.setting_set("present", "val").unwrap();
        assert_eq!(s.setting_get_or("present", "fallback"), "val");
    }

    #[test]
    fn test_setting_group() {
        let s = test_store();
        s.setting_set("email_smtp_host", "smtp.example.com").unwrap();
        s.setting_set("email_smtp_port", "2525").unwrap();
        let group = s.setting_get_group("email_smtp_");
        assert_eq!(group.get("email_smtp_host").unwrap(), "smtp.example.com");
        assert_eq!(group.get("email_smtp_port").unwrap(), "2525");
        assert!(!group.contains_key("email_backend"));
    }

    #[test]
    fn test_setting_group_prefix_is_literal() {
        let s = test_store();
        s.setting_set("emailXsmtpXhost", "nope").unwrap();
        let group = s.setting_get_group("email_smtp_");
        assert!(!group.contains_key("emailXsmtpXhost"));
        assert_eq!(group.len(), 4);
    }

    // ── Permissions ─────────────────────────────────────────────────

    #[test]
    fn test_admin_has_every_permission() {
        let s = test_store();
        let id = s.user_create(&user_form("root@example.com"), "x", "admin").unwrap();
        let admin = s.user_get_by_id(id).unwrap();
        for perm in Permission::ALL {
            assert!(s.user_has_permission(&admin, perm));
        }
    }

    #[test]
    fn test_permission_through_group() {
        let s = test_store();
        let id = s.user_create(&user_form("m@example.com"), "x", "user").unwrap();
        let user = s.user_get_by_id(id).unwrap();
        assert!(!s.user_has_permission(&user, Permission::CanViewAllMailings));

        let (group, created) = s.group_get_or_create("managers").unwrap();
        assert!(created);
        s.group_grant(group.id, &Permission::MANAGER).unwrap();
        s.group_add_user(group.id, id).unwrap();

        assert!(s.user_has_permission(&user, Permission::CanViewAllMailings));
        assert!(s.user_has_permission(&user, Permission::CanDisableMailings));
        assert!(!s.user_has_permission(&user, Permission::CanManageUsers));

        s.group_remove_user(group.id, id).unwrap();
        assert!(!s.user_has_permission(&user, Permission::CanViewAllMailings));
    }

    #[test]
    fn test_group_get_or_create_is_idempotent() {
        let s = test_store();
        let (first, created) = s.group_get_or_create("managers").unwrap();
        assert!(created);
        let (second, created_again) = s.group_get_or_create("managers").unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(s.group_list().len(), 1);
    }

    // ── Statistics ──────────────────────────────────────────────────

    #[test]
    fn test_stats_increment() {
        let s = test_store();
        let id = s.user_create(&user_form("s@example.com"), "x", "user").unwrap();
        assert!(s.stats_get(id).is_none());
        assert!(s.stats_update(id, true).is_err());

        let fresh = s.stats_get_or_create(id).unwrap();
        assert_eq!(fresh.total_mailings, 0);

        s.stats_update(id, true).unwrap();
        s.stats_update(id, true).unwrap();
        s.stats_update(id, false).unwrap();

        let stats = s.stats_get(id).unwrap();
        assert_eq!(stats.total_mailings, 3);
        assert_eq!(stats.successful_mailings, 2);
        assert_eq!(stats.failed_mailings, 1);

        // get_or_create on an existing row never resets it
        assert_eq!(s.stats_get_or_create(id).unwrap(), stats);
    }
}
