use chrono::{NaiveDateTime, Utc};
use rusqlite::params;

use crate::db::DbPool;
use crate::models::user::User;

/// Login sessions keyed by an opaque random id carried in a private cookie.
pub struct Session;

impl Session {
    pub fn create(
        pool: &DbPool,
        session_id: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
        ip_hash: Option<&str>,
    ) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, ip_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, user_id, now, expires_at, ip_hash],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// The user behind an unexpired session.
    pub fn user(pool: &DbPool, session_id: &str) -> Option<User> {
        let user_id: i64 = {
            let conn = pool.get().ok()?;
            let now = Utc::now().naive_utc();
            conn.query_row(
                "SELECT user_id FROM sessions WHERE id = ?1 AND expires_at > ?2",
                params![session_id, now],
                |row| row.get(0),
            )
            .ok()?
        };
        User::get_by_id(pool, user_id)
    }

    pub fn delete(pool: &DbPool, session_id: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn delete_for_user(pool: &DbPool, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn cleanup_expired(pool: &DbPool) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute("DELETE FROM sessions WHERE expires_at < ?1", params![now])
            .map_err(|e| e.to_string())
    }
}
