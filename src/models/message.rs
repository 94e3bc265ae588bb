use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// A subject/body pair sent verbatim; there is no placeholder substitution.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub subject: String,
    pub body: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessageForm {
    pub subject: String,
    pub body: String,
}

impl Message {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Message {
            id: row.get("id")?,
            subject: row.get("subject")?,
            body: row.get("body")?,
            owner_id: row.get("owner_id")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM messages WHERE id = ?1",
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list(pool: &DbPool, owner: Option<i64>, search: Option<&str>) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let mut sql = "SELECT * FROM messages WHERE 1=1".to_string();
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(o) = owner {
            params_vec.push(Box::new(o));
            sql.push_str(&format!(" AND owner_id = ?{}", params_vec.len()));
        }
        if let Some(q) = search.map(str::trim).filter(|q| !q.is_empty()) {
            params_vec.push(Box::new(crate::db::like_contains(q)));
            let idx = params_vec.len();
            sql.push_str(&format!(
                " AND (subject LIKE ?{0} ESCAPE '\\' OR body LIKE ?{0} ESCAPE '\\')",
                idx
            ));
        }
        sql.push_str(" ORDER BY subject");

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_map(param_refs.as_slice(), Self::from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .unwrap_or_default()
    }

    pub fn create(pool: &DbPool, form: &MessageForm, owner_id: Option<i64>) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO messages (subject, body, owner_id) VALUES (?1, ?2, ?3)",
            params![form.subject, form.body, owner_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(pool: &DbPool, id: i64, form: &MessageForm) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE messages SET subject = ?1, body = ?2 WHERE id = ?3",
            params![form.subject, form.body, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Mailings built on this message go with it.
    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
