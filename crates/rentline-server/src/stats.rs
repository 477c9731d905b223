//! Statistics relay.
//!
//! Computes a full [`StatsSnapshot`] and pushes it to every connection in
//! [`Group::StaffStats`]. Runs on a fixed interval and after every chat or
//! report mutation.

use std::time::Duration;

use chrono::Utc;
use rentline_shared::protocol::{ServerEvent, StatsSnapshot};
use rentline_store::StoreError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::{BroadcastOutcome, ConnectionId, ConnectionRegistry, Group};
use crate::state::SharedDb;

#[derive(Clone)]
pub struct StatsRelay {
    db: SharedDb,
    registry: ConnectionRegistry,
}

impl StatsRelay {
    pub fn new(db: SharedDb, registry: ConnectionRegistry) -> Self {
        Self { db, registry }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        let counts = {
            let db = self.db.lock().await;
            db.support_counts()?
        };
        let online_staff = self.registry.online_staff().await;

        Ok(StatsSnapshot {
            pending_messages: counts.pending_messages,
            unresolved_reports: counts.unresolved_reports,
            open_conversations: counts.open_conversations,
            unassigned_conversations: counts.unassigned_conversations,
            online_staff: online_staff as u64,
            generated_at: Utc::now(),
        })
    }

    /// Push a fresh snapshot to all subscribers. Skips the database work
    /// when nobody is listening.
    pub async fn push(&self) -> BroadcastOutcome {
        if self.registry.group_size(Group::StaffStats).await == 0 {
            return BroadcastOutcome::default();
        }

        match self.snapshot().await {
            Ok(stats) => {
                self.registry
                    .send_to_group(Group::StaffStats, ServerEvent::StatsSnapshot { stats })
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Failed to compute statistics snapshot");
                BroadcastOutcome::default()
            }
        }
    }

    /// Send one snapshot to a single connection, e.g. right after it subscribes.
    pub async fn send_to(&self, conn: ConnectionId) -> bool {
        match self.snapshot().await {
            Ok(stats) => {
                self.registry
                    .send_to_connection(conn, ServerEvent::StatsSnapshot { stats })
                    .await
            }
            Err(e) => {
                warn!(error = %e, conn, "Failed to compute statistics snapshot");
                false
            }
        }
    }

    pub fn spawn_periodic(&self, every: Duration) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let outcome = relay.push().await;
                if outcome.delivered > 0 {
                    debug!(delivered = outcome.delivered, "Periodic statistics pushed");
                }
            }
        })
    }
}
