use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Named permissions a group can grant. Admins implicitly hold all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CanViewAllRecipients,
    CanViewAllMessages,
    CanViewAllMailings,
    CanDisableMailings,
    CanViewAllMailingsAttempts,
    CanManageUsers,
    CanBlockUsers,
    DeleteRecipient,
    DeleteMessage,
    DeleteMailing,
}

impl Permission {
    pub const ALL: [Permission; 10] = [
        Permission::CanViewAllRecipients,
        Permission::CanViewAllMessages,
        Permission::CanViewAllMailings,
        Permission::CanDisableMailings,
        Permission::CanViewAllMailingsAttempts,
        Permission::CanManageUsers,
        Permission::CanBlockUsers,
        Permission::DeleteRecipient,
        Permission::DeleteMessage,
        Permission::DeleteMailing,
    ];

    /// What `mailingctl create-manager-group` grants.
    pub const MANAGER: [Permission; 6] = [
        Permission::CanViewAllRecipients,
        Permission::CanViewAllMessages,
        Permission::CanViewAllMailings,
        Permission::CanViewAllMailingsAttempts,
        Permission::CanDisableMailings,
        Permission::CanBlockUsers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CanViewAllRecipients => "can_view_all_recipients",
            Permission::CanViewAllMessages => "can_view_all_messages",
            Permission::CanViewAllMailings => "can_view_all_mailings",
            Permission::CanDisableMailings => "can_disable_mailings",
            Permission::CanViewAllMailingsAttempts => "can_view_all_mailings_attempts",
            Permission::CanManageUsers => "can_manage_users",
            Permission::CanBlockUsers => "can_block_users",
            Permission::DeleteRecipient => "delete_recipient",
            Permission::DeleteMessage => "delete_message",
            Permission::DeleteMailing => "delete_mailing",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

impl Group {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Group {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }

    pub fn find_by_name(pool: &DbPool, name: &str) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM groups WHERE name = ?1",
            params![name],
            Self::from_row,
        )
        .ok()
    }

    /// Returns the group and whether it was created by this call.
    pub fn get_or_create(pool: &DbPool, name: &str) -> Result<(Self, bool), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO groups (name) VALUES (?1)",
                params![name],
            )
            .map_err(|e| e.to_string())?;
        let group = conn
            .query_row(
                "SELECT * FROM groups WHERE name = ?1",
                params![name],
                Self::from_row,
            )
            .map_err(|e| e.to_string())?;
        Ok((group, inserted > 0))
    }

    pub fn list(pool: &DbPool) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT * FROM groups ORDER BY name") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn grant(pool: &DbPool, group_id: i64, permissions: &[Permission]) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        for perm in permissions {
            conn.execute(
                "INSERT OR IGNORE INTO group_permissions (group_id, permission) VALUES (?1, ?2)",
                params![group_id, perm.as_str()],
            )
            .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn permissions(pool: &DbPool, group_id: i64) -> Vec<Permission> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT permission FROM group_permissions WHERE group_id = ?1 ORDER BY permission",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![group_id], |row| row.get::<_, String>(0))
            .map(|rows| {
                rows.filter_map(|r| r.ok())
                    .filter_map(|p| p.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_user(pool: &DbPool, group_id: i64, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
            params![user_id, group_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn remove_user(pool: &DbPool, group_id: i64, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM user_groups WHERE user_id = ?1 AND group_id = ?2",
            params![user_id, group_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Does any of the user's groups grant `perm`?
    pub fn user_has_permission(pool: &DbPool, user_id: i64, perm: Permission) -> bool {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return false,
        };
        conn.query_row(
            "SELECT 1 FROM user_groups ug
             JOIN group_permissions gp ON gp.group_id = ug.group_id
             WHERE ug.user_id = ?1 AND gp.permission = ?2
             LIMIT 1",
            params![user_id, perm.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .unwrap_or(false)
    }
}
