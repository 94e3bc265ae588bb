use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Per-user delivery counters. Only ever incremented.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct UserStatistics {
    pub user_id: i64,
    pub total_mailings: i64,
    pub successful_mailings: i64,
    pub failed_mailings: i64,
}

impl UserStatistics {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UserStatistics {
            user_id: row.get("user_id")?,
            total_mailings: row.get("total_mailings")?,
            successful_mailings: row.get("successful_mailings")?,
            failed_mailings: row.get("failed_mailings")?,
        })
    }

    pub fn get(pool: &DbPool, user_id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM user_statistics WHERE user_id = ?1",
            params![user_id],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_or_create(pool: &DbPool, user_id: i64) -> Result<Self, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT OR IGNORE INTO user_statistics (user_id) VALUES (?1)",
            params![user_id],
        )
        .map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT * FROM user_statistics WHERE user_id = ?1",
            params![user_id],
            Self::from_row,
        )
        .map_err(|e| e.to_string())
    }

    /// Single-statement increment so concurrent dispatches for the same owner
    /// cannot lose updates.
    pub fn update_statistics(pool: &DbPool, user_id: i64, success: bool) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let (ok, failed): (i64, i64) = if success { (1, 0) } else { (0, 1) };
        let changed = conn
            .execute(
                "UPDATE user_statistics
                 SET total_mailings = total_mailings + 1,
                     successful_mailings = successful_mailings + ?1,
                     failed_mailings = failed_mailings + ?2
                 WHERE user_id = ?3",
                params![ok, failed, user_id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err(format!("No statistics row for user {}", user_id));
        }
        Ok(())
    }
}
