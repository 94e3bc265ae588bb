use rusqlite::params;
use std::collections::HashMap;

use crate::db::DbPool;

/// Every runtime setting with its default. `db::seed_defaults` inserts
/// whatever is missing; lookups fall back to these when a row is gone.
pub const DEFAULTS: &[(&str, &str)] = &[
    // General
    ("site_name", "Mailings"),
    ("site_url", "http://127.0.0.1:8000"),
    // Accounts
    ("session_expiry_hours", "24"),
    ("login_rate_limit", "5"),
    // Email delivery
    ("email_backend", "console"),
    ("email_from_address", ""),
    ("email_smtp_host", ""),
    ("email_smtp_port", "587"),
    ("email_smtp_username", ""),
    ("email_smtp_password", ""),
    // List cache
    ("cache_enabled", "true"),
    ("cache_ttl_secs", "300"),
];

/// Key/value rows of the `settings` table.
pub struct Setting;

impl Setting {
    pub fn default_for(key: &str) -> Option<&'static str> {
        DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn get(pool: &DbPool, key: &str) -> Option<String> {
        let stored = pool.get().ok().and_then(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .ok()
            .flatten()
        });
        stored.or_else(|| Self::default_for(key).map(str::to_string))
    }

    pub fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Stored settings whose key starts with `prefix`, e.g. `email_smtp_`.
    /// Compared with `substr`, since `_` is a wildcard under LIKE.
    pub fn get_group(pool: &DbPool, prefix: &str) -> HashMap<String, String> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let mut stmt = match conn
            .prepare("SELECT key, value FROM settings WHERE substr(key, 1, length(?1)) = ?1")
        {
            Ok(s) => s,
            Err(_) => return HashMap::new(),
        };

        stmt.query_map(params![prefix], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }
}
