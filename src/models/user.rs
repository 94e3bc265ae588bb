use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub phone_number: Option<String>,
    pub avatar: Option<String>,
    pub country: Option<String>,
    pub password_hash: String,
    pub role: String, // admin, user
    pub is_blocked: bool,
    pub email_confirmed: bool,
    pub confirm_token: Option<String>,
    pub created_at: String,
}

/// Profile fields shared by registration and profile edits.
#[derive(Debug, Deserialize, Clone)]
pub struct UserForm {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub phone_number: Option<String>,
    pub country: Option<String>,
}

impl User {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            first_name: row.get(3)?,
            phone_number: row.get(4)?,
            avatar: row.get(5)?,
            country: row.get(6)?,
            password_hash: row.get(7)?,
            role: row.get(8)?,
            is_blocked: row.get::<_, i32>(9)? != 0,
            email_confirmed: row.get::<_, i32>(10)? != 0,
            confirm_token: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    const SELECT_COLS: &'static str =
        "id, email, username, first_name, phone_number, avatar, country, password_hash, role, is_blocked, email_confirmed, confirm_token, created_at";

    // ── Lookups ──

    pub fn get_by_id(pool: &DbPool, id: i64) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_by_email(pool: &DbPool, email: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE",
                Self::SELECT_COLS
            ),
            params![email],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_by_confirm_token(pool: &DbPool, token: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE confirm_token = ?1", Self::SELECT_COLS),
            params![token],
            Self::from_row,
        )
        .ok()
    }

    pub fn list_all(pool: &DbPool) -> Vec<User> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY email ASC",
            Self::SELECT_COLS
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    // ── Create ──

    pub fn create(
        pool: &DbPool,
        form: &UserForm,
        password_hash: &str,
        role: &str,
    ) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO users (email, username, first_name, phone_number, country, password_hash, role, confirm_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                form.email,
                form.username,
                form.first_name,
                form.phone_number,
                form.country,
                password_hash,
                role,
                token
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    // ── Update ──

    pub fn update_profile(pool: &DbPool, id: i64, form: &UserForm) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET email = ?1, username = ?2, first_name = ?3, phone_number = ?4, country = ?5 WHERE id = ?6",
            params![
                form.email,
                form.username,
                form.first_name,
                form.phone_number,
                form.country,
                id
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn update_password(pool: &DbPool, id: i64, password_hash: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn update_avatar(pool: &DbPool, id: i64, avatar: Option<&str>) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET avatar = ?1 WHERE id = ?2",
                params![avatar, id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err(format!("User {} not found", id));
        }
        Ok(())
    }

    pub fn update_role(pool: &DbPool, id: i64, role: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("UPDATE users SET role = ?1 WHERE id = ?2", params![role, id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Returns false when the user was already confirmed.
    pub fn confirm_email(pool: &DbPool, id: i64) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET email_confirmed = 1 WHERE id = ?1 AND email_confirmed = 0",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }

    // ── Status management ──

    /// Blocking also signs the user out everywhere.
    pub fn set_blocked(pool: &DbPool, id: i64, blocked: bool) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET is_blocked = ?1 WHERE id = ?2",
            params![blocked as i32, id],
        )
        .map_err(|e| e.to_string())?;
        if blocked {
            conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    // ── Delete ──

    /// Owned recipients, messages and mailings survive with a NULL owner.
    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Helpers ──

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn is_active(&self) -> bool {
        !self.is_blocked
    }

    /// Return a safe version without password_hash or confirm_token
    pub fn safe_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "email": self.email,
            "username": self.username,
            "first_name": self.first_name,
            "phone_number": self.phone_number,
            "avatar": self.avatar,
            "country": self.country,
            "role": self.role,
            "is_blocked": self.is_blocked,
            "email_confirmed": self.email_confirmed,
            "created_at": self.created_at,
        })
    }
}
