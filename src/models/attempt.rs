use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const SUCCESS_RESPONSE: &str = "Email sent successfully.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptStatus::Success),
            "failure" => Ok(AttemptStatus::Failure),
            other => Err(format!("Invalid attempt status: {}", other)),
        }
    }
}

impl ToSql for AttemptStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttemptStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// One delivery outcome for one recipient. Rows are never updated.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MailingAttempt {
    pub id: i64,
    pub attempted_at: NaiveDateTime,
    pub status: AttemptStatus,
    pub server_response: String,
    pub recipient_email: Option<String>,
    pub mailing_id: i64,
    pub owner_id: Option<i64>,
}

impl MailingAttempt {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(MailingAttempt {
            id: row.get("id")?,
            attempted_at: row.get("attempted_at")?,
            status: row.get("status")?,
            server_response: row.get("server_response")?,
            recipient_email: row.get("recipient_email")?,
            mailing_id: row.get("mailing_id")?,
            owner_id: row.get("owner_id")?,
        })
    }

    pub fn create(
        pool: &DbPool,
        mailing_id: i64,
        owner_id: Option<i64>,
        recipient_email: &str,
        status: AttemptStatus,
        server_response: &str,
    ) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO mailing_attempts (status, server_response, recipient_email, mailing_id, owner_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![status, server_response, recipient_email, mailing_id, owner_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    /// `owner` restricts to attempts of that user's mailings.
    pub fn list(
        pool: &DbPool,
        owner: Option<i64>,
        mailing_id: Option<i64>,
        status: Option<AttemptStatus>,
    ) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let mut sql = "SELECT a.* FROM mailing_attempts a
                       JOIN mailings m ON m.id = a.mailing_id
                       WHERE 1=1"
            .to_string();
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(o) = owner {
            params_vec.push(Box::new(o));
            sql.push_str(&format!(" AND m.owner_id = ?{}", params_vec.len()));
        }
        if let Some(m) = mailing_id {
            params_vec.push(Box::new(m));
            sql.push_str(&format!(" AND a.mailing_id = ?{}", params_vec.len()));
        }
        if let Some(s) = status {
            params_vec.push(Box::new(s));
            sql.push_str(&format!(" AND a.status = ?{}", params_vec.len()));
        }
        sql.push_str(" ORDER BY a.attempted_at DESC, a.id DESC");

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_map(param_refs.as_slice(), Self::from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .unwrap_or_default()
    }

    pub fn count_for_mailing(pool: &DbPool, mailing_id: i64, status: Option<AttemptStatus>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        match status {
            Some(s) => conn.query_row(
                "SELECT COUNT(*) FROM mailing_attempts WHERE mailing_id = ?1 AND status = ?2",
                params![mailing_id, s],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COUNT(*) FROM mailing_attempts WHERE mailing_id = ?1",
                params![mailing_id],
                |row| row.get(0),
            ),
        }
        .unwrap_or(0)
    }

    /// Deletes every attempt, or only those of one owner's mailings.
    pub fn clear(pool: &DbPool, owner: Option<i64>) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        match owner {
            Some(o) => conn.execute(
                "DELETE FROM mailing_attempts
                 WHERE mailing_id IN (SELECT id FROM mailings WHERE owner_id = ?1)",
                params![o],
            ),
            None => conn.execute("DELETE FROM mailing_attempts", []),
        }
        .map_err(|e| e.to_string())
    }
}
