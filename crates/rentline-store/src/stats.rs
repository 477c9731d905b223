//! Aggregate counters for the staff dashboard.

use rentline_shared::types::ConversationStatus;

use crate::database::Database;
use crate::error::Result;

/// Counters computed in one pass over the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupportCounts {
    pub pending_messages: u64,
    pub unresolved_reports: u64,
    pub open_conversations: u64,
    pub unassigned_conversations: u64,
}

// A customer message is pending while no other participant has written
// after it in the same open conversation.
const PENDING_MESSAGES_SQL: &str = "
SELECT COUNT(*)
FROM messages m
JOIN conversations c ON c.id = m.conversation_id
WHERE c.status = 'open'
  AND m.sender_id = c.customer_id
  AND m.seq > COALESCE(
        (SELECT MAX(r.seq) FROM messages r
         WHERE r.conversation_id = m.conversation_id
           AND r.sender_id <> c.customer_id),
        0)";

impl Database {
    pub fn count_pending_messages(&self) -> Result<u64> {
        let n: i64 = self.conn().query_row(PENDING_MESSAGES_SQL, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_unresolved_reports(&self) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM reports WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn count_conversations(&self, status: ConversationStatus, unassigned_only: bool) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversations
             WHERE status = ?1 AND (?2 = 0 OR assigned_staff_id IS NULL)",
            rusqlite::params![status.as_str(), unassigned_only],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn support_counts(&self) -> Result<SupportCounts> {
        Ok(SupportCounts {
            pending_messages: self.count_pending_messages()?,
            unresolved_reports: self.count_unresolved_reports()?,
            open_conversations: self.count_conversations(ConversationStatus::Open, false)?,
            unassigned_conversations: self.count_conversations(ConversationStatus::Open, true)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Message, Report, User};
    use chrono::Utc;
    use rentline_shared::types::{Principal, Priority, Role, UserId};

    fn user(db: &Database, role: Role) -> UserId {
        let principal = Principal::new(UserId::new(), "u", role);
        db.upsert_user(&User::from_principal(&principal)).unwrap();
        principal.user_id
    }

    #[test]
    fn pending_counts_customer_messages_after_last_staff_reply() {
        let mut db = Database::open_in_memory().unwrap();
        let customer = user(&db, Role::Customer);
        let staff = user(&db, Role::Staff);

        let conversation = Conversation::new(customer, "Keys", Priority::Normal);
        db.start_conversation(&conversation, &Message::new(conversation.id, customer, "1"))
            .unwrap();
        db.insert_message(&Message::new(conversation.id, customer, "2"))
            .unwrap();
        assert_eq!(db.count_pending_messages().unwrap(), 2);

        db.assign_staff(conversation.id, staff, Utc::now()).unwrap();
        db.insert_message(&Message::new(conversation.id, staff, "on it"))
            .unwrap();
        assert_eq!(db.count_pending_messages().unwrap(), 0);

        db.insert_message(&Message::new(conversation.id, customer, "3"))
            .unwrap();
        assert_eq!(db.count_pending_messages().unwrap(), 1);

        db.set_conversation_status(conversation.id, ConversationStatus::Closed, Utc::now())
            .unwrap();
        assert_eq!(db.count_pending_messages().unwrap(), 0);
    }

    #[test]
    fn support_counts_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let customer = user(&db, Role::Customer);
        let staff = user(&db, Role::Staff);

        let assigned = Conversation::new(customer, "a", Priority::Normal);
        let unassigned = Conversation::new(customer, "b", Priority::Normal);
        let closed = Conversation::new(customer, "c", Priority::Normal);
        for c in [&assigned, &unassigned, &closed] {
            db.create_conversation(c).unwrap();
        }
        db.assign_staff(assigned.id, staff, Utc::now()).unwrap();
        db.set_conversation_status(closed.id, ConversationStatus::Closed, Utc::now())
            .unwrap();

        let open_report = Report::new(customer, "x", "");
        let done_report = Report::new(customer, "y", "");
        db.create_report(&open_report).unwrap();
        db.create_report(&done_report).unwrap();
        db.resolve_report(done_report.id, Utc::now()).unwrap();

        let counts = db.support_counts().unwrap();
        assert_eq!(
            counts,
            SupportCounts {
                pending_messages: 0,
                unresolved_reports: 1,
                open_conversations: 2,
                unassigned_conversations: 1,
            }
        );
    }
}
