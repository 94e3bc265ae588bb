use log::{error, info, warn};
use serde::Serialize;

use crate::models::attempt::{AttemptStatus, SUCCESS_RESPONSE};
use crate::models::mailing::{DispatchOutcome, MailingStatus};
use crate::store::Store;

use super::{sender_address, MailTransport};

/// Why `send_mailing` left a mailing untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blocked,
    NotCreated(MailingStatus),
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            SkipReason::Blocked => "Mailing is blocked".to_string(),
            SkipReason::NotCreated(status) => format!("Mailing is already {}", status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub mailing_id: i64,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status: MailingStatus,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Skipped(SkipReason),
    Completed(DispatchReport),
}

/// Send a mailing's message to each of its recipients, once.
///
/// Only a non-blocked mailing in `created` state is dispatched; anything else
/// is reported as skipped with no side effects. Every recipient gets exactly
/// one attempt row and, when the mailing has an owner, one statistics
/// increment. Transport failures are recorded, never returned. The mailing
/// ends `finished` only when every send succeeded, otherwise it stays
/// `running` with the outcome telling partial from total failure.
///
/// Blocking I/O: call from a blocking context.
pub fn send_mailing(
    store: &dyn Store,
    transport: &dyn MailTransport,
    mailing_id: i64,
) -> Result<Dispatch, String> {
    let mailing = store
        .mailing_find_by_id(mailing_id)
        .ok_or_else(|| format!("Mailing {} not found", mailing_id))?;

    if mailing.is_blocked {
        info!("[dispatch] mailing {} is blocked, skipping", mailing_id);
        return Ok(Dispatch::Skipped(SkipReason::Blocked));
    }
    if mailing.status != MailingStatus::Created {
        info!(
            "[dispatch] mailing {} is {}, skipping",
            mailing_id, mailing.status
        );
        return Ok(Dispatch::Skipped(SkipReason::NotCreated(mailing.status)));
    }

    let message = store
        .message_find_by_id(mailing.message_id)
        .ok_or_else(|| format!("Message {} not found", mailing.message_id))?;

    // Conditional update: a concurrent dispatch or a block may have won the race.
    if !store.mailing_mark_running(mailing_id)? {
        let current = store
            .mailing_find_by_id(mailing_id)
            .ok_or_else(|| format!("Mailing {} not found", mailing_id))?;
        warn!(
            "[dispatch] mailing {} changed before it could start, skipping",
            mailing_id
        );
        let reason = if current.is_blocked {
            SkipReason::Blocked
        } else {
            SkipReason::NotCreated(current.status)
        };
        return Ok(Dispatch::Skipped(reason));
    }

    if let Some(owner_id) = mailing.owner_id {
        store.stats_get_or_create(owner_id)?;
    }

    let recipients = store.recipient_for_mailing(mailing_id);
    let from = sender_address(store);
    info!(
        "[dispatch] mailing {} started: {} recipient(s) from {}",
        mailing_id,
        recipients.len(),
        from
    );

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for recipient in &recipients {
        let (status, response) =
            match transport.send(&message.subject, &message.body, &from, &recipient.email) {
                Ok(()) => (AttemptStatus::Success, SUCCESS_RESPONSE.to_string()),
                Err(e) => {
                    warn!(
                        "[dispatch] mailing {}: send to {} failed: {}",
                        mailing_id, recipient.email, e
                    );
                    (AttemptStatus::Failure, e.to_string())
                }
            };

        if let Err(e) = store.attempt_create(
            mailing_id,
            mailing.owner_id,
            &recipient.email,
            status,
            &response,
        ) {
            error!(
                "[dispatch] mailing {}: failed to record attempt for {}: {}",
                mailing_id, recipient.email, e
            );
        }
        if let Some(owner_id) = mailing.owner_id {
            if let Err(e) = store.stats_update(owner_id, status == AttemptStatus::Success) {
                error!(
                    "[dispatch] mailing {}: failed to update statistics for user {}: {}",
                    mailing_id, owner_id, e
                );
            }
        }

        match status {
            AttemptStatus::Success => succeeded += 1,
            AttemptStatus::Failure => failed += 1,
        }
    }

    let final_status = if failed == 0 {
        MailingStatus::Finished
    } else {
        MailingStatus::Running
    };
    let outcome = DispatchOutcome::from_counts(recipients.len(), succeeded);
    store.mailing_finish_dispatch(mailing_id, final_status, outcome)?;

    info!(
        "[dispatch] mailing {} done: {} sent, {} failed, status {}, outcome {}",
        mailing_id, succeeded, failed, final_status, outcome
    );

    Ok(Dispatch::Completed(DispatchReport {
        mailing_id,
        attempted: recipients.len(),
        succeeded,
        failed,
        status: final_status,
        outcome,
    }))
}

/// Exclude a mailing from dispatch. `actor` is whoever asked, for the log.
pub fn block_mailing(store: &dyn Store, mailing_id: i64, actor: &str) -> Result<(), String> {
    set_blocked(store, mailing_id, true, actor)
}

pub fn unblock_mailing(store: &dyn Store, mailing_id: i64, actor: &str) -> Result<(), String> {
    set_blocked(store, mailing_id, false, actor)
}

fn set_blocked(store: &dyn Store, mailing_id: i64, blocked: bool, actor: &str) -> Result<(), String> {
    let mailing = store
        .mailing_find_by_id(mailing_id)
        .ok_or_else(|| format!("Mailing {} not found", mailing_id))?;
    store.mailing_set_blocked(mailing.id, blocked)?;
    let owner = mailing
        .owner_id
        .and_then(|id| store.user_get_by_id(id))
        .map(|u| u.email)
        .unwrap_or_else(|| "nobody".to_string());
    info!(
        "[dispatch] mailing {} (owner {}) {} by {}",
        mailing_id,
        owner,
        if blocked { "blocked" } else { "unblocked" },
        actor
    );
    Ok(())
}
