use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Coarse lifecycle. Dispatch only ever moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailingStatus {
    Created,
    Running,
    Finished,
}

impl MailingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailingStatus::Created => "created",
            MailingStatus::Running => "running",
            MailingStatus::Finished => "finished",
        }
    }
}

/// Result of the most recent dispatch, kept apart from the status so a
/// mailing with failed sends still ends in a queryable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Pending,
    Delivered,
    Partial,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Pending => "pending",
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::Partial => "partial",
            DispatchOutcome::Failed => "failed",
        }
    }

    pub fn from_counts(total: usize, succeeded: usize) -> Self {
        if succeeded == total {
            DispatchOutcome::Delivered
        } else if succeeded == 0 {
            DispatchOutcome::Failed
        } else {
            DispatchOutcome::Partial
        }
    }
}

macro_rules! text_enum {
    ($ty:ty, $($s:literal => $v:expr),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($v),)+
                    other => Err(format!("Invalid {}: {}", stringify!($ty), other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(MailingStatus,
    "created" => MailingStatus::Created,
    "running" => MailingStatus::Running,
    "finished" => MailingStatus::Finished,
);

text_enum!(DispatchOutcome,
    "pending" => DispatchOutcome::Pending,
    "delivered" => DispatchOutcome::Delivered,
    "partial" => DispatchOutcome::Partial,
    "failed" => DispatchOutcome::Failed,
);

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Mailing {
    pub id: i64,
    pub first_send_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub status: MailingStatus,
    pub outcome: DispatchOutcome,
    pub message_id: i64,
    pub owner_id: Option<i64>,
    pub is_blocked: bool,
    pub created_at: NaiveDateTime,
}

/// Validated input for create/update; see `validation::parse_mailing`.
#[derive(Debug, Clone)]
pub struct MailingForm {
    pub first_send_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub message_id: i64,
    pub recipient_ids: Vec<i64>,
    pub status: Option<MailingStatus>,
}

impl Mailing {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Mailing {
            id: row.get("id")?,
            first_send_time: row.get("first_send_time")?,
            end_time: row.get("end_time")?,
            status: row.get("status")?,
            outcome: row.get("outcome")?,
            message_id: row.get("message_id")?,
            owner_id: row.get("owner_id")?,
            is_blocked: row.get::<_, i32>("is_blocked")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM mailings WHERE id = ?1",
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list(pool: &DbPool, owner: Option<i64>, status: Option<MailingStatus>) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let mut sql = "SELECT * FROM mailings WHERE 1=1".to_string();
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(o) = owner {
            params_vec.push(Box::new(o));
            sql.push_str(&format!(" AND owner_id = ?{}", params_vec.len()));
        }
        if let Some(s) = status {
            params_vec.push(Box::new(s));
            sql.push_str(&format!(" AND status = ?{}", params_vec.len()));
        }
        sql.push_str(" ORDER BY id");

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_map(param_refs.as_slice(), Self::from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .unwrap_or_default()
    }

    pub fn count(pool: &DbPool, status: Option<MailingStatus>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        match status {
            Some(s) => conn
                .query_row(
                    "SELECT COUNT(*) FROM mailings WHERE status = ?1",
                    params![s],
                    |row| row.get(0),
                )
                .unwrap_or(0),
            None => conn
                .query_row("SELECT COUNT(*) FROM mailings", [], |row| row.get(0))
                .unwrap_or(0),
        }
    }

    pub fn recipient_ids(pool: &DbPool, id: i64) -> Vec<i64> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT recipient_id FROM mailing_recipients WHERE mailing_id = ?1 ORDER BY recipient_id",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![id], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn create(pool: &DbPool, form: &MailingForm, owner_id: Option<i64>) -> Result<i64, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        tx.execute(
            "INSERT INTO mailings (first_send_time, end_time, status, message_id, owner_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                form.first_send_time,
                form.end_time,
                form.status.unwrap_or(MailingStatus::Created),
                form.message_id,
                owner_id
            ],
        )
        .map_err(|e| e.to_string())?;
        let id = tx.last_insert_rowid();
        for recipient_id in &form.recipient_ids {
            tx.execute(
                "INSERT OR IGNORE INTO mailing_recipients (mailing_id, recipient_id) VALUES (?1, ?2)",
                params![id, recipient_id],
            )
            .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(id)
    }

    /// Replaces schedule, message and recipient set. Status is only touched when
    /// the form carries one.
    pub fn update(pool: &DbPool, id: i64, form: &MailingForm) -> Result<(), String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        tx.execute(
            "UPDATE mailings SET first_send_time = ?1, end_time = ?2, message_id = ?3 WHERE id = ?4",
            params![form.first_send_time, form.end_time, form.message_id, id],
        )
        .map_err(|e| e.to_string())?;
        if let Some(status) = form.status {
            tx.execute(
                "UPDATE mailings SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .map_err(|e| e.to_string())?;
        }
        tx.execute(
            "DELETE FROM mailing_recipients WHERE mailing_id = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        for recipient_id in &form.recipient_ids {
            tx.execute(
                "INSERT OR IGNORE INTO mailing_recipients (mailing_id, recipient_id) VALUES (?1, ?2)",
                params![id, recipient_id],
            )
            .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    /// Claims a `created` mailing for dispatch. Returns false when another
    /// caller got there first or the mailing is no longer `created`.
    pub fn mark_running(pool: &DbPool, id: i64) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE mailings SET status = 'running' WHERE id = ?1 AND status = 'created' AND is_blocked = 0",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }

    pub fn finish_dispatch(
        pool: &DbPool,
        id: i64,
        status: MailingStatus,
        outcome: DispatchOutcome,
    ) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE mailings SET status = ?1, outcome = ?2 WHERE id = ?3",
            params![status, outcome, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn set_blocked(pool: &DbPool, id: i64, blocked: bool) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE mailings SET is_blocked = ?1 WHERE id = ?2",
            params![blocked as i32, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Attempts and recipient links cascade.
    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM mailings WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
