//! Maintenance gate.
//!
//! While a maintenance window is in effect every `/api` request is answered
//! with `503 Service Unavailable`, except for allow-listed paths and callers
//! holding the admin role. The decision itself is the pure function
//! [`evaluate`]; [`MaintenanceGate`] owns the current window and swaps it as
//! a whole when an admin updates it.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth;
use crate::error::ServerError;
use crate::state::AppState;

const DEFAULT_MESSAGE: &str = "The service is undergoing scheduled maintenance";

/// A declared maintenance window. A missing bound is open-ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub active: bool,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl MaintenanceWindow {
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.start.map_or(true, |start| now >= start)
            && self.end.map_or(true, |end| now <= end)
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => {
                Err("maintenance end must not be before its start".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Block {
        message: String,
        until: Option<DateTime<Utc>>,
    },
}

/// `/api` itself or anything below it.
pub fn is_api_path(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn is_allowed(allow_paths: &[String], path: &str) -> bool {
    let path = path.trim_end_matches('/');
    allow_paths.iter().any(|allowed| allowed == path)
}

/// Decide whether a request may proceed.
pub fn evaluate(
    window: &MaintenanceWindow,
    allow_paths: &[String],
    path: &str,
    is_admin: bool,
    now: DateTime<Utc>,
) -> GateDecision {
    if !is_api_path(path) || is_allowed(allow_paths, path) || !window.is_in_effect(now) || is_admin
    {
        return GateDecision::Pass;
    }

    GateDecision::Block {
        message: window
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
        until: window.end,
    }
}

#[derive(Clone)]
pub struct MaintenanceGate {
    window: Arc<RwLock<Arc<MaintenanceWindow>>>,
    allow_paths: Arc<Vec<String>>,
}

impl MaintenanceGate {
    pub fn new(window: MaintenanceWindow, allow_paths: Vec<String>) -> Self {
        Self {
            window: Arc::new(RwLock::new(Arc::new(window))),
            allow_paths: Arc::new(allow_paths),
        }
    }

    pub async fn current(&self) -> Arc<MaintenanceWindow> {
        self.window.read().await.clone()
    }

    /// Install a new window, returning the one it replaced.
    pub async fn replace(&self, window: MaintenanceWindow) -> Arc<MaintenanceWindow> {
        let mut guard = self.window.write().await;
        let previous = std::mem::replace(&mut *guard, Arc::new(window));
        info!(
            active = guard.active,
            start = ?guard.start,
            end = ?guard.end,
            "Maintenance window updated"
        );
        previous
    }

    /// Whether a request to `path` needs the caller's role to be decided.
    pub async fn may_block(&self, path: &str, now: DateTime<Utc>) -> bool {
        evaluate(&*self.current().await, &self.allow_paths, path, false, now) != GateDecision::Pass
    }

    pub async fn check(&self, path: &str, is_admin: bool, now: DateTime<Utc>) -> GateDecision {
        evaluate(&*self.current().await, &self.allow_paths, path, is_admin, now)
    }
}

pub async fn maintenance_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let path = req.uri().path().to_string();

    // Only look at credentials when the window would otherwise block.
    if !state.maintenance.may_block(&path, now).await {
        return next.run(req).await;
    }

    let is_admin = auth::authenticate(&state.verifier, req.headers(), req.uri().query())
        .map(|principal| principal.role.is_admin())
        .unwrap_or(false);

    match state.maintenance.check(&path, is_admin, now).await {
        GateDecision::Pass => next.run(req).await,
        GateDecision::Block { message, until } => {
            debug!(path = %path, "Request blocked by maintenance window");
            ServerError::Maintenance { message, until }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn allow() -> Vec<String> {
        crate::config::default_allow_paths()
    }

    fn window_from(t0: DateTime<Utc>) -> MaintenanceWindow {
        MaintenanceWindow {
            active: true,
            start: Some(t0),
            end: Some(t0 + Duration::hours(1)),
            message: None,
        }
    }

    #[test]
    fn test_blocks_non_admin_inside_window() {
        let t0 = Utc::now();
        let window = window_from(t0);
        let now = t0 + Duration::minutes(30);

        assert_eq!(
            evaluate(&window, &allow(), "/api/bookings", false, now),
            GateDecision::Block {
                message: DEFAULT_MESSAGE.to_string(),
                until: window.end,
            }
        );
        assert_eq!(
            evaluate(&window, &allow(), "/api/bookings", true, now),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_allow_list_and_non_api_paths_pass() {
        let t0 = Utc::now();
        let window = window_from(t0);
        let now = t0 + Duration::minutes(30);

        for path in ["/api/health", "/api/health/", "/api/auth/login", "/hubs/chat", "/", "/apix"] {
            assert_eq!(
                evaluate(&window, &allow(), path, false, now),
                GateDecision::Pass,
                "{path} should pass"
            );
        }
        assert_ne!(
            evaluate(&window, &allow(), "/api", false, now),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_outside_window_passes() {
        let t0 = Utc::now();
        let window = window_from(t0);

        assert_eq!(
            evaluate(&window, &allow(), "/api/bookings", false, t0 - Duration::minutes(1)),
            GateDecision::Pass
        );
        assert_eq!(
            evaluate(&window, &allow(), "/api/bookings", false, t0 + Duration::hours(2)),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_inactive_flag_never_blocks() {
        let t0 = Utc::now();
        let window = MaintenanceWindow {
            active: false,
            ..window_from(t0)
        };
        assert_eq!(
            evaluate(&window, &allow(), "/api/bookings", false, t0),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_open_ended_window() {
        let window = MaintenanceWindow {
            active: true,
            ..Default::default()
        };
        assert!(window.is_in_effect(Utc::now()));
        assert!(matches!(
            evaluate(&window, &allow(), "/api/vehicles", false, Utc::now()),
            GateDecision::Block { until: None, .. }
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let t0 = Utc::now();
        let window = MaintenanceWindow {
            active: true,
            start: Some(t0),
            end: Some(t0 - Duration::minutes(1)),
            message: None,
        };
        assert!(window.validate().is_err());
        assert!(window_from(t0).validate().is_ok());
    }

    #[tokio::test]
    async fn test_gate_replace_swaps_whole_window() {
        let gate = MaintenanceGate::new(MaintenanceWindow::default(), allow());
        let now = Utc::now();
        assert_eq!(gate.check("/api/bookings", false, now).await, GateDecision::Pass);

        let previous = gate
            .replace(MaintenanceWindow {
                active: true,
                message: Some("Upgrading fleet database".into()),
                ..Default::default()
            })
            .await;
        assert!(!previous.active);

        assert_eq!(
            gate.check("/api/bookings", false, now).await,
            GateDecision::Block {
                message: "Upgrading fleet database".into(),
                until: None
            }
        );
        assert!(gate.may_block("/api/bookings", now).await);
        assert!(!gate.may_block("/api/health", now).await);
    }
}
