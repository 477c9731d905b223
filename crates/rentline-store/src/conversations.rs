//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use rentline_shared::types::{ConversationId, ConversationStatus, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::messages::insert_message_on;
use crate::models::{enum_at, opt_uuid_at, timestamp_at, uuid_at, Conversation, Message};

const SELECT_COLUMNS: &str = "SELECT id, customer_id, assigned_staff_id, status, priority,
        subject, created_at, updated_at
 FROM conversations";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        insert_conversation_on(self.conn(), conversation)
    }

    /// Create a conversation together with its first message. Either both
    /// rows are written or neither is.
    pub fn start_conversation(
        &mut self,
        conversation: &Conversation,
        first_message: &Message,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        insert_conversation_on(&tx, conversation)?;
        insert_message_on(&tx, first_message)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    pub fn find_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .optional()?)
    }

    /// All conversations, most recently active first.
    pub fn list_conversations(&self, status: Option<ConversationStatus>) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(params![status.map(|s| s.as_str())], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Conversations opened by one customer, most recently active first.
    pub fn list_conversations_for_customer(
        &self,
        customer_id: UserId,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE customer_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(
            params![customer_id.to_string(), status.map(|s| s.as_str())],
            row_to_conversation,
        )?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the assigned staff member. Returns `false` if the
    /// conversation does not exist.
    pub fn assign_staff(
        &self,
        id: ConversationId,
        staff_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET assigned_staff_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![staff_id.to_string(), now.to_rfc3339(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_conversation_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now.to_rfc3339(), id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_conversation_on(conn: &rusqlite::Connection, conversation: &Conversation) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations
             (id, customer_id, assigned_staff_id, status, priority, subject, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            conversation.id.to_string(),
            conversation.customer_id.to_string(),
            conversation.assigned_staff_id.map(|s| s.to_string()),
            conversation.status.as_str(),
            conversation.priority.as_str(),
            conversation.subject,
            conversation.created_at.to_rfc3339(),
            conversation.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(uuid_at(row, 0)?),
        customer_id: UserId(uuid_at(row, 1)?),
        assigned_staff_id: opt_uuid_at(row, 2)?.map(UserId),
        status: enum_at(row, 3)?,
        priority: enum_at(row, 4)?,
        subject: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::User;
    use rentline_shared::types::{Principal, Priority, Role};

    fn user(db: &Database, role: Role) -> UserId {
        let principal = Principal::new(UserId::new(), "someone", role);
        db.upsert_user(&User::from_principal(&principal)).unwrap();
        principal.user_id
    }

    #[test]
    fn start_conversation_writes_both_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let customer = user(&db, Role::Customer);
        let conversation = Conversation::new(customer, "Damaged mirror", Priority::High);
        let message = Message::new(conversation.id, customer, "The left mirror is cracked");

        db.start_conversation(&conversation, &message).unwrap();

        let stored = db.get_conversation(conversation.id).unwrap();
        assert_eq!(stored.subject, "Damaged mirror");
        assert_eq!(stored.priority, Priority::High);
        assert!(stored.is_open());
        assert_eq!(
            db.get_messages_for_conversation(conversation.id, 10, 0)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn start_conversation_rolls_back_on_bad_sender() {
        let mut db = Database::open_in_memory().unwrap();
        let customer = user(&db, Role::Customer);
        let conversation = Conversation::new(customer, "Refund", Priority::Normal);
        // Sender does not exist, so the message insert violates its FK.
        let message = Message::new(conversation.id, UserId::new(), "hello");

        assert!(db.start_conversation(&conversation, &message).is_err());
        assert!(db.find_conversation(conversation.id).unwrap().is_none());
    }

    #[test]
    fn conversation_requires_existing_customer() {
        let db = Database::open_in_memory().unwrap();
        let conversation = Conversation::new(UserId::new(), "Orphan", Priority::Low);
        assert!(db.create_conversation(&conversation).is_err());
    }

    #[test]
    fn assign_staff_replaces_previous_assignee() {
        let db = Database::open_in_memory().unwrap();
        let customer = user(&db, Role::Customer);
        let first = user(&db, Role::Staff);
        let second = user(&db, Role::Staff);
        let conversation = Conversation::new(customer, "Booking change", Priority::Normal);
        db.create_conversation(&conversation).unwrap();

        assert!(db.assign_staff(conversation.id, first, Utc::now()).unwrap());
        assert!(db.assign_staff(conversation.id, second, Utc::now()).unwrap());

        let stored = db.get_conversation(conversation.id).unwrap();
        assert_eq!(stored.assigned_staff_id, Some(second));
    }

    #[test]
    fn assign_staff_on_missing_conversation_returns_false() {
        let db = Database::open_in_memory().unwrap();
        let staff = user(&db, Role::Staff);
        assert!(!db
            .assign_staff(ConversationId::new(), staff, Utc::now())
            .unwrap());
        assert!(matches!(
            db.get_conversation(ConversationId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_filters_by_status_and_customer() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, Role::Customer);
        let bob = user(&db, Role::Customer);

        let a1 = Conversation::new(alice, "a1", Priority::Normal);
        let a2 = Conversation::new(alice, "a2", Priority::Normal);
        let b1 = Conversation::new(bob, "b1", Priority::Normal);
        for c in [&a1, &a2, &b1] {
            db.create_conversation(c).unwrap();
        }
        db.set_conversation_status(a2.id, ConversationStatus::Closed, Utc::now())
            .unwrap();

        assert_eq!(db.list_conversations(None).unwrap().len(), 3);
        assert_eq!(
            db.list_conversations(Some(ConversationStatus::Open))
                .unwrap()
                .len(),
            2
        );
        let alice_open = db
            .list_conversations_for_customer(alice, Some(ConversationStatus::Open))
            .unwrap();
        assert_eq!(alice_open.len(), 1);
        assert_eq!(alice_open[0].id, a1.id);
        assert_eq!(
            db.list_conversations_for_customer(bob, None).unwrap().len(),
            1
        );
    }
}
