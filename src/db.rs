use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::models::settings::DEFAULTS;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Default database location, overridable with `MAILINGS_DB`.
pub const DEFAULT_DB_PATH: &str = "data/mailings.db";

pub fn db_path() -> String {
    std::env::var("MAILINGS_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/// `%term%` for a `LIKE ... ESCAPE '\'` match with `%`, `_` and `\` taken literally.
pub fn like_contains(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub fn init_pool_at(path: &str) -> Result<DbPool, String> {
    // foreign_keys is per-connection in SQLite, so every pooled connection sets it
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
    let pool = Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| e.to_string())?;

    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(|e| e.to_string())?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- Accounts
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            username TEXT NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            phone_number TEXT,
            avatar TEXT,
            country TEXT,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            is_blocked INTEGER NOT NULL DEFAULT 0,
            email_confirmed INTEGER NOT NULL DEFAULT 0,
            confirm_token TEXT UNIQUE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Permission groups
        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_permissions (
            group_id INTEGER NOT NULL,
            permission TEXT NOT NULL,
            UNIQUE(group_id, permission),
            FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS user_groups (
            user_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            UNIQUE(user_id, group_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
        );

        -- Login sessions
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            ip_hash TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        -- Contacts
        CREATE TABLE IF NOT EXISTS recipients (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            comment TEXT NOT NULL DEFAULT '',
            owner_id INTEGER,
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE SET NULL
        );

        -- Subject/body templates
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            owner_id INTEGER,
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS mailings (
            id INTEGER PRIMARY KEY,
            first_send_time DATETIME,
            end_time DATETIME,
            status TEXT NOT NULL DEFAULT 'created',
            outcome TEXT NOT NULL DEFAULT 'pending',
            message_id INTEGER NOT NULL,
            owner_id INTEGER,
            is_blocked INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE SET NULL
        );

        -- Many-to-many: mailings <-> recipients
        CREATE TABLE IF NOT EXISTS mailing_recipients (
            mailing_id INTEGER NOT NULL,
            recipient_id INTEGER NOT NULL,
            UNIQUE(mailing_id, recipient_id),
            FOREIGN KEY (mailing_id) REFERENCES mailings(id) ON DELETE CASCADE,
            FOREIGN KEY (recipient_id) REFERENCES recipients(id) ON DELETE CASCADE
        );

        -- Delivery audit trail, append-only
        CREATE TABLE IF NOT EXISTS mailing_attempts (
            id INTEGER PRIMARY KEY,
            attempted_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            status TEXT NOT NULL,
            server_response TEXT NOT NULL DEFAULT '',
            recipient_email TEXT,
            mailing_id INTEGER NOT NULL,
            owner_id INTEGER,
            FOREIGN KEY (mailing_id) REFERENCES mailings(id) ON DELETE CASCADE,
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attempts_mailing ON mailing_attempts(mailing_id);
        CREATE INDEX IF NOT EXISTS idx_attempts_date ON mailing_attempts(attempted_at);

        CREATE TABLE IF NOT EXISTS user_statistics (
            id INTEGER PRIMARY KEY,
            user_id INTEGER UNIQUE NOT NULL,
            total_mailings INTEGER NOT NULL DEFAULT 0,
            successful_mailings INTEGER NOT NULL DEFAULT 0,
            failed_mailings INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        -- Settings (key-value)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        ",
    )?;

    Ok(())
}

pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    for (key, value) in DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}
