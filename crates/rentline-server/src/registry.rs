//! Live connection registry.
//!
//! Tracks which principal sits behind which websocket connection and which
//! broadcast groups each connection belongs to. All state lives behind one
//! mutex; membership is kept in both directions (group -> connections and
//! connection -> groups) so that unregistering is a single pass.
//!
//! Delivery is best effort: every connection owns a bounded queue and an
//! event that does not fit (or targets a connection whose writer is gone)
//! is dropped and counted, never retried.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rentline_shared::protocol::ServerEvent;
use rentline_shared::types::{ConversationId, Principal, UserId};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Unique per websocket connection for the lifetime of the process.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Everyone currently watching one conversation
    Conversation(ConversationId),
    /// Staff chat connections, notified of unassigned traffic and assignments
    Staff,
    /// Staff statistics dashboard connections
    StaffStats,
}

/// How many connections a broadcast reached.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

struct Connection {
    principal: Principal,
    sender: mpsc::Sender<ServerEvent>,
    groups: HashSet<Group>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<Group, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn add_member(&mut self, id: ConnectionId, group: Group) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.groups.insert(group) {
            return false;
        }
        self.groups.entry(group).or_default().insert(id);
        true
    }

    fn remove_member(&mut self, id: ConnectionId, group: Group) -> bool {
        let removed = self
            .connections
            .get_mut(&id)
            .map(|conn| conn.groups.remove(&group))
            .unwrap_or(false);
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
        removed
    }

    fn deliver<I>(&self, targets: I, event: &ServerEvent) -> BroadcastOutcome
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let mut outcome = BroadcastOutcome::default();
        for id in targets {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            match conn.sender.try_send(event.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    debug!(conn = id, event = event.kind(), "Dropping event for slow connection");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    outcome.dropped += 1;
                    debug!(conn = id, event = event.kind(), "Dropping event for closed connection");
                }
            }
        }
        outcome
    }
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` is the outbound queue length of every connection.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Register a live connection for `principal`. The returned receiver
    /// yields every event addressed to it until [`Self::unregister`].
    pub async fn register(&self, principal: Principal) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut inner = self.inner.lock().await;
        info!(
            conn = id,
            user = %principal.user_id,
            role = principal.role.as_str(),
            active = inner.connections.len() + 1,
            "Connection registered"
        );
        inner.connections.insert(
            id,
            Connection {
                principal,
                sender: tx,
                groups: HashSet::new(),
            },
        );

        (id, rx)
    }

    /// Remove a connection and every group membership it holds.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Principal> {
        let mut inner = self.inner.lock().await;
        let conn = inner.connections.remove(&id)?;

        for group in &conn.groups {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(&id);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
        }

        info!(
            conn = id,
            user = %conn.principal.user_id,
            groups = conn.groups.len(),
            active = inner.connections.len(),
            "Connection unregistered"
        );
        Some(conn.principal)
    }

    /// Subscribe a connection to a group. Returns `false` if it was already
    /// a member or is not registered.
    pub async fn join(&self, id: ConnectionId, group: Group) -> bool {
        self.inner.lock().await.add_member(id, group)
    }

    pub async fn leave(&self, id: ConnectionId, group: Group) -> bool {
        self.inner.lock().await.remove_member(id, group)
    }

    /// Subscribe every live connection of `user` to a group.
    pub async fn join_user(&self, user: UserId, group: Group) -> usize {
        let mut inner = self.inner.lock().await;
        let ids: Vec<ConnectionId> = inner
            .connections
            .iter()
            .filter(|(_, conn)| conn.principal.user_id == user)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter(|id| inner.add_member(*id, group))
            .count()
    }

    pub async fn send_to_connection(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.lock().await;
        inner.deliver([id], &event).delivered == 1
    }

    pub async fn send_to_group(&self, group: Group, event: ServerEvent) -> BroadcastOutcome {
        self.send_to_groups(&[group], event).await
    }

    /// Broadcast to the union of several groups. A connection that belongs
    /// to more than one of them receives the event once.
    pub async fn send_to_groups(&self, groups: &[Group], event: ServerEvent) -> BroadcastOutcome {
        let inner = self.inner.lock().await;
        let targets: HashSet<ConnectionId> = groups
            .iter()
            .filter_map(|g| inner.groups.get(g))
            .flatten()
            .copied()
            .collect();
        let outcome = inner.deliver(targets, &event);

        if outcome.delivered + outcome.dropped > 0 {
            debug!(
                event = event.kind(),
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "Broadcast"
            );
        }
        outcome
    }

    /// Send to every live connection of one user.
    pub async fn send_to_user(&self, user: UserId, event: ServerEvent) -> BroadcastOutcome {
        let inner = self.inner.lock().await;
        let targets: Vec<ConnectionId> = inner
            .connections
            .iter()
            .filter(|(_, conn)| conn.principal.user_id == user)
            .map(|(id, _)| *id)
            .collect();
        inner.deliver(targets, &event)
    }

    #[cfg(test)]
    pub async fn is_member(&self, id: ConnectionId, group: Group) -> bool {
        self.inner
            .lock()
            .await
            .groups
            .get(&group)
            .map(|members| members.contains(&id))
            .unwrap_or(false)
    }

    pub async fn group_size(&self, group: Group) -> usize {
        self.inner
            .lock()
            .await
            .groups
            .get(&group)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Distinct staff principals with at least one chat connection.
    pub async fn online_staff(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .groups
            .get(&Group::Staff)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.connections.get(id))
            .map(|conn| conn.principal.user_id)
            .collect::<HashSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentline_shared::types::Role;

    fn principal(role: Role) -> Principal {
        Principal::new(UserId::new(), "test", role)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new(8);
        let (a, _rx_a) = registry.register(principal(Role::Customer)).await;
        let (b, _rx_b) = registry.register(principal(Role::Customer)).await;

        assert_ne!(a, b);
        assert_eq!(registry.connection_count().await, 2);

        assert!(registry.unregister(a).await.is_some());
        assert!(registry.unregister(a).await.is_none());
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_double_join_delivers_once() {
        let registry = ConnectionRegistry::new(8);
        let group = Group::Conversation(ConversationId::new());
        let (id, mut rx) = registry.register(principal(Role::Customer)).await;

        assert!(registry.join(id, group).await);
        assert!(!registry.join(id, group).await);

        let outcome = registry.send_to_group(group, ServerEvent::Pong).await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(rx.recv().await, Some(ServerEvent::Pong));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_leaves_every_group() {
        let registry = ConnectionRegistry::new(8);
        let conversation = Group::Conversation(ConversationId::new());
        let (staff, _rx) = registry.register(principal(Role::Staff)).await;
        let (other, mut other_rx) = registry.register(principal(Role::Staff)).await;

        for group in [conversation, Group::Staff, Group::StaffStats] {
            registry.join(staff, group).await;
        }
        registry.join(other, conversation).await;

        registry.unregister(staff).await;

        for group in [conversation, Group::Staff, Group::StaffStats] {
            assert!(!registry.is_member(staff, group).await);
        }
        assert_eq!(registry.group_size(Group::Staff).await, 0);

        let outcome = registry.send_to_group(conversation, ServerEvent::Pong).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 1, dropped: 0 });
        assert_eq!(other_rx.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_union_broadcast_deduplicates() {
        let registry = ConnectionRegistry::new(8);
        let conversation = Group::Conversation(ConversationId::new());
        let (id, mut rx) = registry.register(principal(Role::Staff)).await;
        registry.join(id, conversation).await;
        registry.join(id, Group::Staff).await;

        let outcome = registry
            .send_to_groups(&[conversation, Group::Staff], ServerEvent::Pong)
            .await;
        assert_eq!(outcome.delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let registry = ConnectionRegistry::new(1);
        let group = Group::StaffStats;
        let (id, _rx) = registry.register(principal(Role::Staff)).await;
        registry.join(id, group).await;

        let first = registry.send_to_group(group, ServerEvent::Pong).await;
        let second = registry.send_to_group(group, ServerEvent::Pong).await;
        assert_eq!(first.delivered, 1);
        assert_eq!(second, BroadcastOutcome { delivered: 0, dropped: 1 });
    }

    #[tokio::test]
    async fn test_closed_receiver_drops() {
        let registry = ConnectionRegistry::new(4);
        let (id, rx) = registry.register(principal(Role::Customer)).await;
        drop(rx);

        assert!(!registry.send_to_connection(id, ServerEvent::Pong).await);
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_all_connections() {
        let registry = ConnectionRegistry::new(4);
        let user = principal(Role::Customer);
        let (_a, mut rx_a) = registry.register(user.clone()).await;
        let (_b, mut rx_b) = registry.register(user.clone()).await;
        let (_c, mut rx_c) = registry.register(principal(Role::Customer)).await;

        let outcome = registry.send_to_user(user.user_id, ServerEvent::Pong).await;
        assert_eq!(outcome.delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_user_and_online_staff() {
        let registry = ConnectionRegistry::new(4);
        let staff = principal(Role::Staff);
        let (a, _rx_a) = registry.register(staff.clone()).await;
        let (b, _rx_b) = registry.register(staff.clone()).await;
        registry.join(a, Group::Staff).await;
        registry.join(b, Group::Staff).await;

        assert_eq!(registry.online_staff().await, 1);

        let group = Group::Conversation(ConversationId::new());
        assert_eq!(registry.join_user(staff.user_id, group).await, 2);
        assert_eq!(registry.join_user(staff.user_id, group).await, 0);
        assert_eq!(registry.group_size(group).await, 2);
    }
}
