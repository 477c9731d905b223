use rusqlite::params;
use rentline_shared::types::{ConversationId, UserId};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{timestamp_at, uuid_at, Message};

impl Database {
    /// Store a message and bump the parent conversation's `updated_at`.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        insert_message_on(self.conn(), message)
    }

    /// Messages of one conversation in creation order.
    pub fn get_messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, content, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, content, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Whether `sender_id` has posted in a conversation.
    pub fn has_posted(&self, conversation_id: ConversationId, sender_id: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE conversation_id = ?1 AND sender_id = ?2)",
            params![conversation_id.to_string(), sender_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }
}

pub(crate) fn insert_message_on(conn: &rusqlite::Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id.to_string(),
            message.conversation_id.to_string(),
            message.sender_id.to_string(),
            message.content,
            message.created_at.to_rfc3339(),
        ],
    )?;
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![
            message.created_at.to_rfc3339(),
            message.conversation_id.to_string()
        ],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: ConversationId(uuid_at(row, 1)?),
        sender_id: UserId(uuid_at(row, 2)?),
        content: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{Conversation, User};
    use rentline_shared::types::{Principal, Priority, Role};

    fn seeded() -> (Database, Conversation) {
        let db = Database::open_in_memory().unwrap();
        let customer = Principal::new(UserId::new(), "Lee", Role::Customer);
        db.upsert_user(&User::from_principal(&customer)).unwrap();
        let conversation = Conversation::new(customer.user_id, "Pickup time", Priority::Normal);
        db.create_conversation(&conversation).unwrap();
        (db, conversation)
    }

    #[test]
    fn messages_come_back_in_insertion_order() {
        let (db, conversation) = seeded();
        for text in ["one", "two", "three"] {
            db.insert_message(&Message::new(conversation.id, conversation.customer_id, text))
                .unwrap();
        }

        let texts: Vec<String> = db
            .get_messages_for_conversation(conversation.id, 10, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);

        let page = db.get_messages_for_conversation(conversation.id, 1, 1).unwrap();
        assert_eq!(page[0].content, "two");
    }

    #[test]
    fn message_requires_existing_conversation_and_sender() {
        let (db, conversation) = seeded();

        let orphan = Message::new(ConversationId::new(), conversation.customer_id, "lost");
        assert!(db.insert_message(&orphan).is_err());

        let stranger = Message::new(conversation.id, UserId::new(), "who am i");
        assert!(db.insert_message(&stranger).is_err());
    }

    #[test]
    fn has_posted_is_per_conversation_and_sender() {
        let (db, conversation) = seeded();
        let customer = conversation.customer_id;
        assert!(!db.has_posted(conversation.id, customer).unwrap());

        db.insert_message(&Message::new(conversation.id, customer, "hi"))
            .unwrap();
        assert!(db.has_posted(conversation.id, customer).unwrap());
        assert!(!db.has_posted(conversation.id, UserId::new()).unwrap());
        assert!(!db.has_posted(ConversationId::new(), customer).unwrap());
    }

    #[test]
    fn get_message_by_id_round_trip() {
        let (db, conversation) = seeded();
        let message = Message::new(conversation.id, conversation.customer_id, "hello");
        db.insert_message(&message).unwrap();

        let stored = db.get_message_by_id(message.id).unwrap();
        assert_eq!(stored.content, "hello");
        assert!(matches!(
            db.get_message_by_id(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}
