use std::net::IpAddr;
use std::sync::Arc;

use rentline_shared::constants::MAINTENANCE_SETTING_KEY;
use rentline_shared::token::{TokenSigner, TokenVerifier};
use rentline_shared::types::UserId;
use rentline_store::{Database, StoreError};
use tokio::sync::Mutex;

use crate::chat::ChatRelay;
use crate::config::ServerConfig;
use crate::maintenance::{MaintenanceGate, MaintenanceWindow};
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::stats::StatsRelay;

/// The SQLite handle shared by every request and hub connection.
pub type SharedDb = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub registry: ConnectionRegistry,
    pub chat: ChatRelay,
    pub stats: StatsRelay,
    pub maintenance: MaintenanceGate,
    pub verifier: TokenVerifier,
    pub http_limiter: RateLimiter<IpAddr>,
    pub chat_limiter: RateLimiter<UserId>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the relays together and restore the persisted maintenance window.
    pub fn build(config: ServerConfig, db: Database) -> Result<Self, StoreError> {
        let window = db
            .get_setting::<MaintenanceWindow>(MAINTENANCE_SETTING_KEY)?
            .unwrap_or_default();

        let db: SharedDb = Arc::new(Mutex::new(db));
        let registry = ConnectionRegistry::new(config.connection_buffer);
        let stats = StatsRelay::new(db.clone(), registry.clone());
        let chat = ChatRelay::new(db.clone(), registry.clone(), stats.clone());
        let maintenance = MaintenanceGate::new(window, config.maintenance_allow_paths.clone());
        let verifier = TokenSigner::from_seed(&config.token_signing_key).verifier();

        Ok(Self {
            db,
            registry,
            chat,
            stats,
            maintenance,
            verifier,
            http_limiter: RateLimiter::new(config.http_rate, config.http_burst),
            chat_limiter: RateLimiter::new(config.chat_rate, config.chat_burst),
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_build_restores_maintenance_window() {
        let db = Database::open_in_memory().unwrap();
        let window = MaintenanceWindow {
            active: true,
            message: Some("Fleet sync".into()),
            ..Default::default()
        };
        db.put_setting(MAINTENANCE_SETTING_KEY, &window).unwrap();

        let state = AppState::build(ServerConfig::new(":memory:", [9u8; 32]), db).unwrap();
        assert_eq!(*state.maintenance.current().await, window);
        assert!(state.maintenance.may_block("/api/conversations", Utc::now()).await);
    }

    #[tokio::test]
    async fn test_build_defaults_to_no_window() {
        let db = Database::open_in_memory().unwrap();
        let state = AppState::build(ServerConfig::new(":memory:", [9u8; 32]), db).unwrap();
        assert!(!state.maintenance.current().await.active);
        assert_eq!(state.registry.connection_count().await, 0);
    }
}
