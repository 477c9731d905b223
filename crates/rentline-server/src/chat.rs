//! Chat relay.
//!
//! Every operation persists first and broadcasts second. Broadcasts go
//! through the [`ConnectionRegistry`] and are best effort: a peer that has
//! gone away simply misses the event.

use chrono::Utc;
use rentline_shared::constants::{MAX_MESSAGE_CHARS, MAX_SUBJECT_CHARS};
use rentline_shared::protocol::{error_codes, ChatMessage, ServerEvent};
use rentline_shared::types::{ConversationId, ConversationStatus, Principal, Priority, UserId};
use rentline_store::{Conversation, Database, Message, StoreError, User};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::registry::{ConnectionId, ConnectionRegistry, Group};
use crate::stats::StatsRelay;
use crate::state::SharedDb;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Conversation {0} not found")]
    NotFound(ConversationId),

    #[error("Conversation {0} is closed")]
    Closed(ConversationId),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => error_codes::NOT_FOUND,
            RelayError::Closed(_) => error_codes::CLOSED,
            RelayError::Forbidden(_) => error_codes::FORBIDDEN,
            RelayError::Invalid(_) => error_codes::INVALID,
            RelayError::Conflict(_) => error_codes::CONFLICT,
            RelayError::Store(_) => error_codes::INTERNAL,
        }
    }

    /// The event sent back to the connection whose command failed.
    pub fn to_event(&self) -> ServerEvent {
        let message = match self {
            RelayError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ServerEvent::error(self.code(), message)
    }
}

impl From<RelayError> for ServerError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound(_) => ServerError::NotFound(e.to_string()),
            RelayError::Closed(_) => ServerError::Conflict(e.to_string()),
            RelayError::Forbidden(msg) => ServerError::Forbidden(msg),
            RelayError::Invalid(msg) => ServerError::BadRequest(msg),
            RelayError::Conflict(msg) => ServerError::Conflict(msg),
            RelayError::Store(inner) => ServerError::Store(inner),
        }
    }
}

fn clean_text(text: &str, max_chars: usize, what: &str) -> Result<String, RelayError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RelayError::Invalid(format!("{what} must not be empty")));
    }
    if text.chars().count() > max_chars {
        return Err(RelayError::Invalid(format!(
            "{what} is longer than {max_chars} characters"
        )));
    }
    Ok(text.to_string())
}

fn load_conversation(db: &Database, id: ConversationId) -> Result<Conversation, RelayError> {
    db.find_conversation(id)?.ok_or(RelayError::NotFound(id))
}

#[derive(Clone)]
pub struct ChatRelay {
    db: SharedDb,
    registry: ConnectionRegistry,
    stats: StatsRelay,
}

impl ChatRelay {
    pub fn new(db: SharedDb, registry: ConnectionRegistry, stats: StatsRelay) -> Self {
        Self {
            db,
            registry,
            stats,
        }
    }

    /// Mirror the caller into the users table so that message and
    /// conversation foreign keys resolve.
    pub async fn ensure_user(&self, principal: &Principal) -> Result<(), RelayError> {
        let db = self.db.lock().await;
        db.upsert_user(&User::from_principal(principal))?;
        Ok(())
    }

    /// Whether `principal` may read a conversation.
    pub fn can_view(principal: &Principal, conversation: &Conversation) -> bool {
        principal.role.is_staff() || conversation.customer_id == principal.user_id
    }

    /// Subscribe `conn` to a conversation's group. Unknown conversations and
    /// conversations the caller may not see are ignored without an error.
    pub async fn join(&self, conn: ConnectionId, principal: &Principal, id: ConversationId) -> bool {
        let visible = {
            let db = self.db.lock().await;
            match db.find_conversation(id) {
                Ok(Some(conversation)) => Self::can_view(principal, &conversation),
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, conversation = %id, "Join lookup failed");
                    false
                }
            }
        };

        if !visible {
            debug!(conn, conversation = %id, user = %principal.user_id, "Ignoring join");
            return false;
        }

        self.registry.join(conn, Group::Conversation(id)).await;
        true
    }

    pub async fn leave(&self, conn: ConnectionId, id: ConversationId) -> bool {
        self.registry.leave(conn, Group::Conversation(id)).await
    }

    /// Persist a message and broadcast it to the conversation's group.
    pub async fn send(
        &self,
        principal: &Principal,
        id: ConversationId,
        text: &str,
    ) -> Result<ChatMessage, RelayError> {
        let text = clean_text(text, MAX_MESSAGE_CHARS, "message")?;

        let (conversation, message) = {
            let db = self.db.lock().await;
            let conversation = load_conversation(&db, id)?;
            if !conversation.is_open() {
                return Err(RelayError::Closed(id));
            }
            if !conversation.may_post(principal.user_id) {
                return Err(RelayError::Forbidden(
                    "only the customer and the assigned staff member may post".into(),
                ));
            }

            db.upsert_user(&User::from_principal(principal))?;
            let message = Message::new(id, principal.user_id, text);
            db.insert_message(&message)?;
            (conversation, message)
        };

        let chat = message.to_chat();
        let outcome = self
            .registry
            .send_to_group(
                Group::Conversation(id),
                ServerEvent::ReceiveMessage {
                    message: chat.clone(),
                },
            )
            .await;

        if conversation.assigned_staff_id.is_none() && principal.user_id == conversation.customer_id {
            self.registry
                .send_to_group(
                    Group::Staff,
                    ServerEvent::PendingMessage {
                        conversation: conversation.summary(),
                        message: chat.clone(),
                    },
                )
                .await;
        }

        debug!(
            conversation = %id,
            sender = %principal.user_id,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Message relayed"
        );

        self.stats.push().await;
        Ok(chat)
    }

    /// Assign `staff_id` to a conversation. Callable by staff and admins.
    ///
    /// Once the current assignee has posted, the assignment is fixed: every
    /// stored message must stay attributable to the customer or the assignee.
    pub async fn assign_staff(
        &self,
        principal: &Principal,
        id: ConversationId,
        staff_id: UserId,
    ) -> Result<Conversation, RelayError> {
        if !principal.role.is_staff() {
            return Err(RelayError::Forbidden("only staff may assign conversations".into()));
        }

        let (conversation, staff) = {
            let db = self.db.lock().await;
            db.upsert_user(&User::from_principal(principal))?;

            let conversation = load_conversation(&db, id)?;
            if !conversation.is_open() {
                return Err(RelayError::Closed(id));
            }

            let staff = match db.get_user(staff_id) {
                Ok(user) if user.role.is_staff() => user,
                Ok(_) => return Err(RelayError::Invalid(format!("{staff_id} is not a staff member"))),
                Err(StoreError::NotFound) => {
                    return Err(RelayError::Invalid(format!("unknown staff member {staff_id}")))
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(current) = conversation.assigned_staff_id {
                if current != staff_id && db.has_posted(id, current)? {
                    return Err(RelayError::Conflict(format!(
                        "conversation {id} is already handled by {current}"
                    )));
                }
            }

            db.assign_staff(id, staff_id, Utc::now())?;
            (load_conversation(&db, id)?, staff)
        };

        // The new assignee follows the conversation on all of its sockets.
        self.registry
            .join_user(staff_id, Group::Conversation(id))
            .await;

        self.registry
            .send_to_groups(
                &[Group::Conversation(id), Group::Staff],
                ServerEvent::StaffAssigned {
                    conversation_id: id,
                    staff_id,
                    staff_name: staff.display_name.clone(),
                    assigned_by: principal.user_id,
                },
            )
            .await;

        info!(
            conversation = %id,
            staff = %staff_id,
            by = %principal.user_id,
            "Staff assigned"
        );

        self.stats.push().await;
        Ok(conversation)
    }

    /// Open a conversation with its first message. `origin` is the hub
    /// connection that asked, which is subscribed to the new group.
    pub async fn start_conversation(
        &self,
        principal: &Principal,
        origin: Option<ConnectionId>,
        subject: &str,
        priority: Priority,
        text: &str,
    ) -> Result<(Conversation, ChatMessage), RelayError> {
        if principal.role.is_staff() {
            return Err(RelayError::Forbidden(
                "conversations are opened by customers".into(),
            ));
        }
        let subject = clean_text(subject, MAX_SUBJECT_CHARS, "subject")?;
        let text = clean_text(text, MAX_MESSAGE_CHARS, "message")?;

        let conversation = Conversation::new(principal.user_id, subject, priority);
        let message = Message::new(conversation.id, principal.user_id, text);
        {
            let mut db = self.db.lock().await;
            db.upsert_user(&User::from_principal(principal))?;
            db.start_conversation(&conversation, &message)?;
        }

        if let Some(conn) = origin {
            self.registry
                .join(conn, Group::Conversation(conversation.id))
                .await;
        }

        let chat = message.to_chat();
        self.registry
            .send_to_user(
                principal.user_id,
                ServerEvent::ConversationStarted {
                    conversation: conversation.summary(),
                },
            )
            .await;
        self.registry
            .send_to_group(
                Group::Staff,
                ServerEvent::PendingMessage {
                    conversation: conversation.summary(),
                    message: chat.clone(),
                },
            )
            .await;

        info!(
            conversation = %conversation.id,
            customer = %principal.user_id,
            priority = conversation.priority.as_str(),
            "Conversation started"
        );

        self.stats.push().await;
        Ok((conversation, chat))
    }

    /// Change a conversation's status. Staff may open or close any
    /// conversation; a customer may only close their own.
    pub async fn set_status(
        &self,
        principal: &Principal,
        id: ConversationId,
        status: ConversationStatus,
    ) -> Result<Conversation, RelayError> {
        let conversation = {
            let db = self.db.lock().await;
            let conversation = load_conversation(&db, id)?;

            let allowed = principal.role.is_staff()
                || (conversation.customer_id == principal.user_id
                    && status == ConversationStatus::Closed);
            if !allowed {
                return Err(RelayError::Forbidden(
                    "not allowed to change this conversation's status".into(),
                ));
            }
            if conversation.status == status {
                return Ok(conversation);
            }

            db.set_conversation_status(id, status, Utc::now())?;
            load_conversation(&db, id)?
        };

        self.registry
            .send_to_groups(
                &[Group::Conversation(id), Group::Staff],
                ServerEvent::ConversationStatusChanged {
                    conversation_id: id,
                    status,
                    changed_by: principal.user_id,
                },
            )
            .await;

        info!(conversation = %id, status = status.as_str(), "Conversation status changed");

        self.stats.push().await;
        Ok(conversation)
    }
}
