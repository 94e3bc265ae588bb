use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Recipient {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub comment: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecipientForm {
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub comment: String,
}

impl Recipient {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Recipient {
            id: row.get("id")?,
            email: row.get("email")?,
            full_name: row.get("full_name")?,
            comment: row.get("comment")?,
            owner_id: row.get("owner_id")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM recipients WHERE id = ?1",
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn find_by_email(pool: &DbPool, email: &str) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM recipients WHERE email = ?1 COLLATE NOCASE",
            params![email],
            Self::from_row,
        )
        .ok()
    }

    /// `owner` restricts to one user's contacts; `search` matches email or full name.
    pub fn list(pool: &DbPool, owner: Option<i64>, search: Option<&str>) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let mut sql = "SELECT * FROM recipients WHERE 1=1".to_string();
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(o) = owner {
            params_vec.push(Box::new(o));
            sql.push_str(&format!(" AND owner_id = ?{}", params_vec.len()));
        }
        if let Some(q) = search.map(str::trim).filter(|q| !q.is_empty()) {
            params_vec.push(Box::new(crate::db::like_contains(q)));
            let idx = params_vec.len();
            sql.push_str(&format!(
                " AND (email LIKE ?{0} ESCAPE '\\' OR full_name LIKE ?{0} ESCAPE '\\')",
                idx
            ));
        }
        sql.push_str(" ORDER BY full_name");

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_map(param_refs.as_slice(), Self::from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .unwrap_or_default()
    }

    /// Recipients bound to a mailing, in dispatch order.
    pub fn for_mailing(pool: &DbPool, mailing_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT r.* FROM recipients r
             JOIN mailing_recipients mr ON mr.recipient_id = r.id
             WHERE mr.mailing_id = ?1
             ORDER BY r.full_name, r.id",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![mailing_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Distinct contact addresses across all users.
    pub fn count_distinct(pool: &DbPool) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(DISTINCT email) FROM recipients",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    pub fn create(pool: &DbPool, form: &RecipientForm, owner_id: Option<i64>) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO recipients (email, full_name, comment, owner_id) VALUES (?1, ?2, ?3, ?4)",
            params![form.email, form.full_name, form.comment, owner_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(pool: &DbPool, id: i64, form: &RecipientForm) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE recipients SET email = ?1, full_name = ?2, comment = ?3 WHERE id = ?4",
            params![form.email, form.full_name, form.comment, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM recipients WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
