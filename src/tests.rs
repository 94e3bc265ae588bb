#![cfg(test)]

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Duration, Utc};

use crate::db::{run_migrations, seed_defaults, DbPool};
use crate::mailer::console::ConsoleMailer;
use crate::mailer::dispatch::{self, Dispatch, SkipReason};
use crate::mailer::{self, notify, ConfiguredMailer, MailTransport, TransportError};
use crate::models::attempt::{AttemptStatus, MailingAttempt, SUCCESS_RESPONSE};
use crate::models::mailing::{DispatchOutcome, Mailing, MailingForm, MailingStatus};
use crate::models::message::{Message, MessageForm};
use crate::models::recipient::{Recipient, RecipientForm};
use crate::models::session::Session;
use crate::models::settings::Setting;
use crate::models::statistics::UserStatistics;
use crate::models::user::{User, UserForm};
use crate::routes::accounts::replace_avatar;
use crate::security::auth;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Fresh in-memory SQLite pool with migrations and seed defaults applied.
/// Named shared-cache DB so every pooled connection sees the same data.
fn test_pool() -> DbPool {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:mailings_testdb_{}?mode=memory&cache=shared", id);
    let manager = SqliteConnectionManager::file(uri)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
    let pool = Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test pool");
    run_migrations(&pool).expect("Failed to run migrations");
    seed_defaults(&pool).expect("Failed to seed defaults");
    pool
}

fn test_store() -> SqliteStore {
    SqliteStore::new(test_pool())
}

/// Fast bcrypt hash for tests (cost=4 instead of DEFAULT_COST=12).
fn fast_hash(password: &str) -> String {
    bcrypt::hash(password, 4).unwrap()
}

fn make_user(pool: &DbPool, email: &str) -> i64 {
    let form = UserForm {
        email: email.to_string(),
        username: email.split('@').next().unwrap().to_string(),
        first_name: "Test".to_string(),
        phone_number: None,
        country: None,
    };
    User::create(pool, &form, &fast_hash("password123"), "user").unwrap()
}

fn make_recipient(pool: &DbPool, email: &str, name: &str, owner: Option<i64>) -> i64 {
    let form = RecipientForm {
        email: email.to_string(),
        full_name: name.to_string(),
        comment: String::new(),
    };
    Recipient::create(pool, &form, owner).unwrap()
}

fn make_message(pool: &DbPool, subject: &str, owner: Option<i64>) -> i64 {
    let form = MessageForm {
        subject: subject.to_string(),
        body: "Hello there".to_string(),
    };
    Message::create(pool, &form, owner).unwrap()
}

fn make_mailing(pool: &DbPool, message_id: i64, recipients: &[i64], owner: Option<i64>) -> i64 {
    let form = MailingForm {
        first_send_time: None,
        end_time: None,
        message_id,
        recipient_ids: recipients.to_vec(),
        status: None,
    };
    Mailing::create(pool, &form, owner).unwrap()
}

/// Owner + message + the given recipients (email, full name) + mailing.
fn setup_mailing(store: &SqliteStore, recipients: &[(&str, &str)]) -> (i64, i64) {
    let owner = make_user(&store.pool, "owner@example.com");
    let message = make_message(&store.pool, "Monthly news", Some(owner));
    let ids: Vec<i64> = recipients
        .iter()
        .map(|(email, name)| make_recipient(&store.pool, email, name, Some(owner)))
        .collect();
    let mailing = make_mailing(&store.pool, message, &ids, Some(owner));
    (owner, mailing)
}

/// Transport that records every send and fails for a scripted set of addresses.
#[derive(Default)]
struct MockTransport {
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, String, String, String)>>,
}

impl MockTransport {
    fn failing_for(addresses: &[&str]) -> Self {
        MockTransport {
            failing: addresses.iter().map(|a| a.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, String, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn recipients(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, _, _, to)| to).collect()
    }
}

impl MailTransport for MockTransport {
    fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((
            subject.to_string(),
            body.to_string(),
            from.to_string(),
            to.to_string(),
        ));
        if self.failing.contains(to) {
            Err(TransportError::Send("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn report_of(result: Dispatch) -> dispatch::DispatchReport {
    match result {
        Dispatch::Completed(report) => report,
        other => panic!("expected a completed dispatch, got {:?}", other),
    }
}

// ═══════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════

#[test]
fn dispatch_all_succeed_finishes_mailing() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(
        &store,
        &[("c@example.com", "Carol"), ("a@example.com", "Alice"), ("b@example.com", "Bob")],
    );
    let transport = MockTransport::default();

    let report = report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.outcome, DispatchOutcome::Delivered);

    let mailing = store.mailing_find_by_id(mailing_id).unwrap();
    assert_eq!(mailing.status, MailingStatus::Finished);
    assert_eq!(mailing.outcome, DispatchOutcome::Delivered);

    // recipients are visited by full name
    assert_eq!(
        transport.recipients(),
        vec!["a@example.com", "b@example.com", "c@example.com"]
    );
    let (subject, body, from, _) = &transport.calls()[0];
    assert_eq!(subject, "Monthly news");
    assert_eq!(body, "Hello there");
    assert_eq!(from, "mailings@localhost");

    let attempts = store.attempt_list(None, Some(mailing_id), None);
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .iter()
        .all(|a| a.status == AttemptStatus::Success && a.server_response == SUCCESS_RESPONSE));
    assert!(attempts.iter().all(|a| a.owner_id == Some(owner)));

    let stats = store.stats_get(owner).unwrap();
    assert_eq!(stats.total_mailings, 3);
    assert_eq!(stats.successful_mailings, 3);
    assert_eq!(stats.failed_mailings, 0);
}

#[test]
fn dispatch_all_fail_stays_running() {
    let store = test_store();
    let (owner, mailing_id) =
        setup_mailing(&store, &[("a@example.com", "Alice"), ("b@example.com", "Bob")]);
    let transport = MockTransport::failing_for(&["a@example.com", "b@example.com"]);

    let report = report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.outcome, DispatchOutcome::Failed);

    let mailing = store.mailing_find_by_id(mailing_id).unwrap();
    assert_eq!(mailing.status, MailingStatus::Running);
    assert_eq!(mailing.outcome, DispatchOutcome::Failed);

    let failures = store.attempt_list(None, Some(mailing_id), Some(AttemptStatus::Failure));
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|a| a.server_response == "connection refused"));

    let stats = store.stats_get(owner).unwrap();
    assert_eq!(stats.total_mailings, 2);
    assert_eq!(stats.successful_mailings, 0);
    assert_eq!(stats.failed_mailings, 2);
}

#[test]
fn dispatch_mixed_results_is_partial() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(
        &store,
        &[("a@example.com", "Alice"), ("b@example.com", "Bob"), ("c@example.com", "Carol")],
    );
    let transport = MockTransport::failing_for(&["b@example.com"]);

    let report = report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    assert_eq!((report.succeeded, report.failed), (2, 1));
    assert_eq!(report.outcome, DispatchOutcome::Partial);
    assert_eq!(report.status, MailingStatus::Running);

    assert_eq!(
        store.attempt_count_for_mailing(mailing_id, Some(AttemptStatus::Success)),
        2
    );
    let failed = store.attempt_list(None, Some(mailing_id), Some(AttemptStatus::Failure));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_email.as_deref(), Some("b@example.com"));

    let stats = store.stats_get(owner).unwrap();
    assert_eq!(
        stats,
        UserStatistics {
            user_id: owner,
            total_mailings: 3,
            successful_mailings: 2,
            failed_mailings: 1,
        }
    );
}

#[test]
fn dispatch_blocked_mailing_has_no_effect() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    dispatch::block_mailing(&store, mailing_id, "admin@example.com").unwrap();
    let transport = MockTransport::default();

    let result = dispatch::send_mailing(&store, &transport, mailing_id).unwrap();
    assert_eq!(result, Dispatch::Skipped(SkipReason::Blocked));

    assert!(transport.calls().is_empty());
    assert_eq!(store.attempt_count_for_mailing(mailing_id, None), 0);
    assert_eq!(store.mailing_find_by_id(mailing_id).unwrap().status, MailingStatus::Created);
    assert!(store.stats_get(owner).is_none());
}

#[test]
fn dispatch_twice_is_a_no_op() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    let transport = MockTransport::default();

    report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    let again = dispatch::send_mailing(&store, &transport, mailing_id).unwrap();
    assert_eq!(
        again,
        Dispatch::Skipped(SkipReason::NotCreated(MailingStatus::Finished))
    );

    assert_eq!(transport.calls().len(), 1);
    assert_eq!(store.attempt_count_for_mailing(mailing_id, None), 1);
    assert_eq!(store.stats_get(owner).unwrap().total_mailings, 1);
}

#[test]
fn dispatch_running_mailing_is_skipped() {
    let store = test_store();
    let (_, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    let failing = MockTransport::failing_for(&["a@example.com"]);
    report_of(dispatch::send_mailing(&store, &failing, mailing_id).unwrap());
    assert_eq!(store.mailing_find_by_id(mailing_id).unwrap().status, MailingStatus::Running);

    let transport = MockTransport::default();
    let result = dispatch::send_mailing(&store, &transport, mailing_id).unwrap();
    assert_eq!(result, Dispatch::Skipped(SkipReason::NotCreated(MailingStatus::Running)));
    assert!(transport.calls().is_empty());
}

#[test]
fn dispatch_without_recipients_finishes() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(&store, &[]);

    let report = report_of(dispatch::send_mailing(&store, &MockTransport::default(), mailing_id).unwrap());
    assert_eq!(report.attempted, 0);
    assert_eq!(report.outcome, DispatchOutcome::Delivered);
    assert_eq!(store.mailing_find_by_id(mailing_id).unwrap().status, MailingStatus::Finished);
    // the statistics row exists but nothing was counted
    assert_eq!(store.stats_get(owner).unwrap().total_mailings, 0);
}

#[test]
fn dispatch_ownerless_mailing_records_no_statistics() {
    let store = test_store();
    let message = make_message(&store.pool, "Orphan", None);
    let r = make_recipient(&store.pool, "a@example.com", "Alice", None);
    let mailing_id = make_mailing(&store.pool, message, &[r], None);

    let report = report_of(dispatch::send_mailing(&store, &MockTransport::default(), mailing_id).unwrap());
    assert_eq!(report.succeeded, 1);

    let attempts = store.attempt_list(None, Some(mailing_id), None);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].owner_id, None);

    let conn = store.pool.get().unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM user_statistics", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn dispatch_unknown_mailing_is_an_error() {
    let store = test_store();
    assert!(dispatch::send_mailing(&store, &MockTransport::default(), 404).is_err());
}

#[test]
fn dispatch_bad_header_is_recorded_as_failure() {
    let store = test_store();
    let owner = make_user(&store.pool, "owner@example.com");
    let message = make_message(&store.pool, "Hi\r\nBcc: everyone@example.com", Some(owner));
    let r = make_recipient(&store.pool, "a@example.com", "Alice", Some(owner));
    let mailing_id = make_mailing(&store.pool, message, &[r], Some(owner));

    let report = report_of(dispatch::send_mailing(&store, &ConsoleMailer, mailing_id).unwrap());
    assert_eq!(report.failed, 1);

    let attempts = store.attempt_list(None, Some(mailing_id), None);
    assert_eq!(attempts[0].status, AttemptStatus::Failure);
    assert_eq!(
        attempts[0].server_response,
        "Invalid header: Header values can't contain newlines"
    );
    assert_eq!(store.stats_get(owner).unwrap().failed_mailings, 1);
}

#[test]
fn dispatch_through_console_backend() {
    let store = test_store();
    let (_, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    let transport = ConfiguredMailer::new(std::sync::Arc::new(SqliteStore::new(store.pool.clone())));

    let report = report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    assert_eq!(report.outcome, DispatchOutcome::Delivered);
}

#[test]
fn block_and_unblock_round_trip() {
    let store = test_store();
    let (_, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    let before = store.mailing_find_by_id(mailing_id).unwrap();
    let recipients_before = store.mailing_recipient_ids(mailing_id);

    dispatch::block_mailing(&store, mailing_id, "manager@example.com").unwrap();
    let blocked = store.mailing_find_by_id(mailing_id).unwrap();
    assert!(blocked.is_blocked);
    assert_eq!(blocked.status, before.status);
    assert_eq!(blocked.message_id, before.message_id);
    assert_eq!(store.mailing_recipient_ids(mailing_id), recipients_before);

    dispatch::unblock_mailing(&store, mailing_id, "manager@example.com").unwrap();
    assert!(!store.mailing_find_by_id(mailing_id).unwrap().is_blocked);

    assert!(dispatch::block_mailing(&store, 999, "manager@example.com").is_err());
}

#[test]
fn mark_running_claims_only_once() {
    let store = test_store();
    let (_, mailing_id) = setup_mailing(&store, &[]);
    assert!(store.mailing_mark_running(mailing_id).unwrap());
    assert!(!store.mailing_mark_running(mailing_id).unwrap());
}

// ═══════════════════════════════════════════════════════════
// Mailings, messages, recipients
// ═══════════════════════════════════════════════════════════

#[test]
fn mailing_update_replaces_recipients() {
    let store = test_store();
    let owner = make_user(&store.pool, "o@example.com");
    let message = make_message(&store.pool, "S", Some(owner));
    let a = make_recipient(&store.pool, "a@example.com", "Alice", Some(owner));
    let b = make_recipient(&store.pool, "b@example.com", "Bob", Some(owner));
    let id = make_mailing(&store.pool, message, &[a], Some(owner));

    let start = Utc::now().naive_utc();
    let form = MailingForm {
        first_send_time: Some(start),
        end_time: Some(start + Duration::hours(1)),
        message_id: message,
        recipient_ids: vec![b],
        status: None,
    };
    store.mailing_update(id, &form).unwrap();

    let mailing = store.mailing_find_by_id(id).unwrap();
    assert_eq!(mailing.status, MailingStatus::Created);
    assert!(mailing.first_send_time.is_some());
    assert_eq!(store.mailing_recipient_ids(id), vec![b]);
}

#[test]
fn mailing_list_filters_by_owner_and_status() {
    let store = test_store();
    let alice = make_user(&store.pool, "alice@example.com");
    let bob = make_user(&store.pool, "bob@example.com");
    let m1 = make_message(&store.pool, "A", Some(alice));
    let m2 = make_message(&store.pool, "B", Some(bob));
    let first = make_mailing(&store.pool, m1, &[], Some(alice));
    make_mailing(&store.pool, m1, &[], Some(alice));
    make_mailing(&store.pool, m2, &[], Some(bob));
    store.mailing_mark_running(first).unwrap();

    assert_eq!(store.mailing_list(None, None).len(), 3);
    assert_eq!(store.mailing_list(Some(alice), None).len(), 2);
    let running = store.mailing_list(None, Some(MailingStatus::Running));
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, first);
    assert_eq!(store.mailing_count(Some(MailingStatus::Running)), 1);
    assert_eq!(store.mailing_count(None), 3);
}

#[test]
fn recipient_list_search_and_order() {
    let store = test_store();
    let owner = make_user(&store.pool, "o@example.com");
    make_recipient(&store.pool, "zed@example.com", "Zed", Some(owner));
    make_recipient(&store.pool, "amy@example.com", "Amy", Some(owner));
    make_recipient(&store.pool, "other@example.org", "Mia", None);

    let names: Vec<String> = store
        .recipient_list(None, None)
        .into_iter()
        .map(|r| r.full_name)
        .collect();
    assert_eq!(names, vec!["Amy", "Mia", "Zed"]);

    assert_eq!(store.recipient_list(Some(owner), None).len(), 2);
    let found = store.recipient_list(None, Some("example.org"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email, "other@example.org");
    assert_eq!(store.recipient_count_distinct(), 3);
}

#[test]
fn recipient_email_is_unique() {
    let store = test_store();
    make_recipient(&store.pool, "a@example.com", "Alice", None);
    let dup = RecipientForm {
        email: "a@example.com".to_string(),
        full_name: "Again".to_string(),
        comment: String::new(),
    };
    assert!(store.recipient_create(&dup, None).is_err());
}

#[test]
fn search_treats_wildcards_literally() {
    let store = test_store();
    make_recipient(&store.pool, "axb@example.com", "Axb", None);
    make_recipient(&store.pool, "a_b@example.com", "A_b", None);
    make_recipient(&store.pool, "back\\slash@example.com", "Slash", None);

    let found = store.recipient_list(None, Some("a_b"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email, "a_b@example.com");
    assert!(store.recipient_list(None, Some("%")).is_empty());
    assert_eq!(store.recipient_list(None, Some("k\\s")).len(), 1);

    make_message(&store.pool, "50% off", None);
    make_message(&store.pool, "500 offers", None);
    let found = store.message_list(None, Some("50%"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subject, "50% off");
}

#[test]
fn like_pattern_escapes_metacharacters() {
    assert_eq!(crate::db::like_contains("a_b"), "%a\\_b%");
    assert_eq!(crate::db::like_contains("50%"), "%50\\%%");
    assert_eq!(crate::db::like_contains("plain"), "%plain%");
}

#[test]
fn message_search() {
    let store = test_store();
    make_message(&store.pool, "Spring sale", None);
    make_message(&store.pool, "Autumn news", None);
    let found = store.message_list(None, Some("spring"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subject, "Spring sale");
    let all: Vec<String> = store.message_list(None, None).into_iter().map(|m| m.subject).collect();
    assert_eq!(all, vec!["Autumn news", "Spring sale"]);
}

// ═══════════════════════════════════════════════════════════
// Cascades
// ═══════════════════════════════════════════════════════════

#[test]
fn deleting_mailing_deletes_attempts() {
    let store = test_store();
    let (_, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    report_of(dispatch::send_mailing(&store, &MockTransport::default(), mailing_id).unwrap());
    assert_eq!(store.attempt_list(None, None, None).len(), 1);

    store.mailing_delete(mailing_id).unwrap();
    assert!(store.attempt_list(None, None, None).is_empty());
    // recipients survive
    assert!(store.recipient_find_by_email("a@example.com").is_some());
}

#[test]
fn deleting_message_deletes_its_mailings() {
    let store = test_store();
    let message = make_message(&store.pool, "S", None);
    let mailing = make_mailing(&store.pool, message, &[], None);
    store.message_delete(message).unwrap();
    assert!(store.mailing_find_by_id(mailing).is_none());
}

#[test]
fn deleting_user_nulls_ownership() {
    let store = test_store();
    let (owner, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    store.stats_get_or_create(owner).unwrap();

    store.user_delete(owner).unwrap();

    assert_eq!(store.mailing_find_by_id(mailing_id).unwrap().owner_id, None);
    assert_eq!(store.recipient_find_by_email("a@example.com").unwrap().owner_id, None);
    assert!(store.stats_get(owner).is_none());
}

// ═══════════════════════════════════════════════════════════
// Attempts
// ═══════════════════════════════════════════════════════════

#[test]
fn attempts_scoped_and_cleared_per_owner() {
    let store = test_store();
    let alice = make_user(&store.pool, "alice@example.com");
    let bob = make_user(&store.pool, "bob@example.com");
    let ma = make_mailing(&store.pool, make_message(&store.pool, "A", Some(alice)), &[], Some(alice));
    let mb = make_mailing(&store.pool, make_message(&store.pool, "B", Some(bob)), &[], Some(bob));
    MailingAttempt::create(&store.pool, ma, Some(alice), "x@example.com", AttemptStatus::Success, SUCCESS_RESPONSE).unwrap();
    MailingAttempt::create(&store.pool, ma, Some(alice), "y@example.com", AttemptStatus::Failure, "boom").unwrap();
    MailingAttempt::create(&store.pool, mb, Some(bob), "z@example.com", AttemptStatus::Success, SUCCESS_RESPONSE).unwrap();

    assert_eq!(store.attempt_list(Some(alice), None, None).len(), 2);
    assert_eq!(store.attempt_list(None, None, Some(AttemptStatus::Success)).len(), 2);

    // newest first
    let alice_attempts = store.attempt_list(Some(alice), None, None);
    assert_eq!(alice_attempts[0].recipient_email.as_deref(), Some("y@example.com"));

    assert_eq!(store.attempt_clear(Some(alice)).unwrap(), 2);
    assert_eq!(store.attempt_list(None, None, None).len(), 1);
    assert_eq!(store.attempt_clear(None).unwrap(), 1);
}

// ═══════════════════════════════════════════════════════════
// Users, sessions, auth
// ═══════════════════════════════════════════════════════════

#[test]
fn user_lookup_is_case_insensitive() {
    let store = test_store();
    let id = make_user(&store.pool, "Mixed@Example.com");
    assert_eq!(store.user_get_by_email("mixed@example.com").unwrap().id, id);
}

#[test]
fn confirm_email_by_token() {
    let store = test_store();
    let id = make_user(&store.pool, "c@example.com");
    let user = store.user_get_by_id(id).unwrap();
    assert!(!user.email_confirmed);
    let token = user.confirm_token.clone().unwrap();

    let found = store.user_get_by_confirm_token(&token).unwrap();
    assert_eq!(found.id, id);
    assert!(store.user_confirm_email(id).unwrap());
    assert!(!store.user_confirm_email(id).unwrap());
    assert!(store.user_get_by_id(id).unwrap().email_confirmed);
}

#[test]
fn session_create_validate_destroy() {
    let store = test_store();
    let id = make_user(&store.pool, "s@example.com");

    let sid = auth::create_session(&store, id, Some("10.0.0.1")).unwrap();
    assert_eq!(store.session_get_user(&sid).unwrap().id, id);

    store.session_delete(&sid).unwrap();
    assert!(store.session_get_user(&sid).is_none());
}

#[test]
fn expired_sessions_are_ignored_and_cleaned() {
    let store = test_store();
    let id = make_user(&store.pool, "e@example.com");
    let past = Utc::now().naive_utc() - Duration::hours(1);
    Session::create(&store.pool, "old-session", id, past, None).unwrap();

    assert!(store.session_get_user("old-session").is_none());
    assert_eq!(store.session_cleanup_expired().unwrap(), 1);
}

#[test]
fn blocking_user_ends_sessions() {
    let store = test_store();
    let id = make_user(&store.pool, "b@example.com");
    let sid = auth::create_session(&store, id, None).unwrap();

    store.user_set_blocked(id, true).unwrap();
    assert!(store.session_get_user(&sid).is_none());
    assert!(!store.user_get_by_id(id).unwrap().is_active());

    store.user_set_blocked(id, false).unwrap();
    assert!(store.user_get_by_id(id).unwrap().is_active());
}

#[test]
fn password_change_is_verifiable() {
    let store = test_store();
    let id = make_user(&store.pool, "p@example.com");
    let user = store.user_get_by_id(id).unwrap();
    assert!(auth::verify_password("password123", &user.password_hash));

    store.user_update_password(id, &fast_hash("newpassword")).unwrap();
    let user = store.user_get_by_id(id).unwrap();
    assert!(!auth::verify_password("password123", &user.password_hash));
    assert!(auth::verify_password("newpassword", &user.password_hash));
}

#[test]
fn login_rate_limit_uses_setting() {
    let store = test_store();
    store.setting_set("login_rate_limit", "2").unwrap();
    let limiter = crate::rate_limit::RateLimiter::new();

    assert!(auth::check_login_rate_limit(&limiter, &store, "1.2.3.4"));
    assert!(auth::check_login_rate_limit(&limiter, &store, "1.2.3.4"));
    assert!(!auth::check_login_rate_limit(&limiter, &store, "1.2.3.4"));
    assert!(auth::check_login_rate_limit(&limiter, &store, "5.6.7.8"));

    auth::reset_login_rate_limit(&limiter, "1.2.3.4");
    assert!(auth::check_login_rate_limit(&limiter, &store, "1.2.3.4"));
}

// ═══════════════════════════════════════════════════════════
// Mail settings and notifications
// ═══════════════════════════════════════════════════════════

#[test]
fn sender_address_fallbacks() {
    let store = test_store();
    assert_eq!(mailer::sender_address(&store), "mailings@localhost");

    // a username that is not an address is not used as the sender
    store.setting_set("email_smtp_username", "relay").unwrap();
    assert_eq!(mailer::sender_address(&store), "mailings@localhost");

    store.setting_set("email_smtp_username", "relay@example.com").unwrap();
    assert_eq!(mailer::sender_address(&store), "relay@example.com");

    store.setting_set("email_from_address", "news@example.com").unwrap();
    assert_eq!(mailer::sender_address(&store), "news@example.com");
}

#[test]
fn smtp_username_is_sender_on_fresh_install() {
    let store = test_store();
    store.setting_set("email_backend", "smtp").unwrap();
    store.setting_set("email_smtp_host", "smtp.example.com").unwrap();
    store.setting_set("email_smtp_username", "relay@example.com").unwrap();
    assert_eq!(mailer::sender_address(&store), "relay@example.com");

    let (_, mailing_id) = setup_mailing(&store, &[("a@example.com", "Alice")]);
    let transport = MockTransport::default();
    report_of(dispatch::send_mailing(&store, &transport, mailing_id).unwrap());
    assert_eq!(transport.calls()[0].2, "relay@example.com");
}

#[test]
fn only_known_settings_have_defaults() {
    for key in ["email_backend", "email_from_address", "email_smtp_host", "cache_ttl_secs"] {
        assert!(Setting::default_for(key).is_some(), "{}", key);
    }
    assert_eq!(Setting::default_for("email_from_address"), Some(""));
    assert!(Setting::default_for("email_smtp_hots").is_none());
}

#[test]
fn configured_mailer_reports_backend_problems() {
    let store = std::sync::Arc::new(test_store());
    let transport = ConfiguredMailer::new(store.clone());

    store.setting_set("email_backend", "pigeon").unwrap();
    let err = transport.send("S", "B", "a@example.com", "b@example.com").unwrap_err();
    assert!(err.to_string().contains("Unknown email backend"));

    // smtp without a host never reaches the network
    store.setting_set("email_backend", "smtp").unwrap();
    let err = transport.send("S", "B", "a@example.com", "b@example.com").unwrap_err();
    assert!(matches!(err, TransportError::Send(_)));
}

#[test]
fn welcome_email_carries_confirm_link() {
    let store = test_store();
    store.setting_set("site_url", "https://mail.example.com/").unwrap();
    let id = make_user(&store.pool, "w@example.com");
    let user = store.user_get_by_id(id).unwrap();
    let transport = MockTransport::default();

    notify::send_welcome(&store, &transport, &user).unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let (_, body, _, to) = &calls[0];
    assert_eq!(to, "w@example.com");
    let expected = format!(
        "https://mail.example.com/api/confirm-email/{}",
        user.confirm_token.unwrap()
    );
    assert!(body.contains(&expected));
}

#[test]
fn new_password_email_contains_password() {
    let store = test_store();
    let id = make_user(&store.pool, "r@example.com");
    let user = store.user_get_by_id(id).unwrap();
    let transport = MockTransport::default();

    let password = auth::generate_password();
    notify::send_new_password(&store, &transport, &user, &password).unwrap();
    notify::send_password_changed(&store, &transport, &user).unwrap();

    let calls = transport.calls();
    assert!(calls[0].1.contains(&password));
    assert!(calls[1].0.contains("password changed"));
}

// ═══════════════════════════════════════════════════════════
// Avatars
// ═══════════════════════════════════════════════════════════

fn upload_root() -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!("mailings_uploads_{}", uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(root.join("avatars")).unwrap();
    root
}

#[test]
fn replacing_avatar_removes_old_file() {
    let store = test_store();
    let root = upload_root();
    let id = make_user(&store.pool, "pic@example.com");
    std::fs::write(root.join("avatars/old.png"), b"old").unwrap();
    store.user_update_avatar(id, Some("avatars/old.png")).unwrap();
    let user = store.user_get_by_id(id).unwrap();

    replace_avatar(&store, &root, &user, "avatars/new.png").unwrap();

    assert_eq!(
        store.user_get_by_id(id).unwrap().avatar.as_deref(),
        Some("avatars/new.png")
    );
    assert!(!root.join("avatars/old.png").exists());
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn failed_avatar_update_keeps_old_file() {
    let store = test_store();
    let root = upload_root();
    let id = make_user(&store.pool, "gone@example.com");
    std::fs::write(root.join("avatars/old.png"), b"old").unwrap();
    store.user_update_avatar(id, Some("avatars/old.png")).unwrap();
    let user = store.user_get_by_id(id).unwrap();
    store.user_delete(id).unwrap();

    assert!(replace_avatar(&store, &root, &user, "avatars/new.png").is_err());
    assert!(root.join("avatars/old.png").exists());
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn avatar_paths_outside_upload_root_are_left_alone() {
    let store = test_store();
    let root = upload_root();
    std::fs::write(root.join("keep.txt"), b"keep").unwrap();
    let id = make_user(&store.pool, "sneaky@example.com");
    store.user_update_avatar(id, Some("avatars/../keep.txt")).unwrap();
    let user = store.user_get_by_id(id).unwrap();

    replace_avatar(&store, &root, &user, "avatars/new.png").unwrap();
    assert!(root.join("keep.txt").exists());
    let _ = std::fs::remove_dir_all(&root);
}
