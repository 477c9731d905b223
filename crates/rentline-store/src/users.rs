//! CRUD operations for [`User`] records.

use rusqlite::params;
use rentline_shared::types::UserId;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{enum_at, timestamp_at, uuid_at, User};

impl Database {
    /// Insert a user, or refresh the display name and role of a known one.
    /// `created_at` of an existing row is preserved.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 role = excluded.role",
            params![
                user.id.to_string(),
                user.display_name,
                user.role.as_str(),
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, role, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_at(row, 0)?),
        display_name: row.get(1)?,
        role: enum_at(row, 2)?,
        created_at: timestamp_at(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use rentline_shared::types::{Principal, Role};

    #[test]
    fn upsert_refreshes_name_and_role() {
        let db = Database::open_in_memory().unwrap();
        let principal = Principal::new(UserId::new(), "Sam", Role::Customer);
        let first = User::from_principal(&principal);
        db.upsert_user(&first).unwrap();

        let promoted = User {
            display_name: "Sam K.".into(),
            role: Role::Staff,
            created_at: chrono::Utc::now() + chrono::Duration::days(1),
            ..first.clone()
        };
        db.upsert_user(&promoted).unwrap();

        let stored = db.get_user(principal.user_id).unwrap();
        assert_eq!(stored.display_name, "Sam K.");
        assert_eq!(stored.role, Role::Staff);
        assert_eq!(stored.created_at.timestamp(), first.created_at.timestamp());
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }
}
