use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rentline_shared::constants::{
    CHAT_HUB_PATH, MAINTENANCE_SETTING_KEY, MAX_MESSAGE_CHARS, MAX_SUBJECT_CHARS, STATS_HUB_PATH,
};
use rentline_shared::protocol::{ChatMessage, ConversationSummary, StatsSnapshot};
use rentline_shared::types::{ConversationId, ConversationStatus, Priority};
use rentline_store::{Report, User};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::chat::ChatRelay;
use crate::error::ServerError;
use crate::hubs;
use crate::maintenance::{maintenance_middleware, MaintenanceWindow};
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/:id/messages", get(conversation_messages))
        .route("/api/stats", get(current_stats))
        .route("/api/reports", post(create_report))
        .route("/api/reports/:id/resolve", post(resolve_report))
        .route(
            "/api/admin/maintenance",
            get(get_maintenance).put(put_maintenance),
        )
        .route(CHAT_HUB_PATH, get(hubs::chat_hub))
        .route(STATS_HUB_PATH, get(hubs::stats_hub))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            maintenance_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.http_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct ConversationFilter {
    status: Option<ConversationStatus>,
}

#[derive(Deserialize)]
struct StartConversationRequest {
    subject: String,
    #[serde(default)]
    priority: Priority,
    text: String,
}

#[derive(Serialize)]
struct StartConversationResponse {
    conversation: ConversationSummary,
    message: ChatMessage,
}

#[derive(Deserialize)]
struct Page {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Deserialize)]
struct CreateReportRequest {
    subject: String,
    #[serde(default)]
    details: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Customers see their own conversations, staff see all of them.
async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(filter): Query<ConversationFilter>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let db = state.db.lock().await;
    let conversations = if principal.role.is_staff() {
        db.list_conversations(filter.status)?
    } else {
        db.list_conversations_for_customer(principal.user_id, filter.status)?
    };
    Ok(Json(conversations.iter().map(|c| c.summary()).collect()))
}

async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<StartConversationResponse>), ServerError> {
    let (conversation, message) = state
        .chat
        .start_conversation(&principal, None, &req.subject, req.priority, &req.text)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartConversationResponse {
            conversation: conversation.summary(),
            message,
        }),
    ))
}

async fn conversation_messages(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<ConversationId>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);

    let db = state.db.lock().await;
    let conversation = db
        .find_conversation(id)?
        .filter(|c| ChatRelay::can_view(&principal, c))
        .ok_or_else(|| ServerError::NotFound(format!("conversation {id}")))?;

    let messages = db.get_messages_for_conversation(conversation.id, limit, offset)?;
    Ok(Json(messages.iter().map(|m| m.to_chat()).collect()))
}

async fn current_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StatsSnapshot>, ServerError> {
    user.require_staff()?;
    Ok(Json(state.stats.snapshot().await?))
}

async fn create_report(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), ServerError> {
    let subject = req.subject.trim();
    if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_CHARS {
        return Err(ServerError::BadRequest(format!(
            "subject must be between 1 and {MAX_SUBJECT_CHARS} characters"
        )));
    }
    if req.details.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServerError::BadRequest(format!(
            "details must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }

    let report = Report::new(principal.user_id, subject, req.details.trim());
    {
        let db = state.db.lock().await;
        db.upsert_user(&User::from_principal(&principal))?;
        db.create_report(&report)?;
    }

    info!(report = %report.id, reporter = %principal.user_id, "Report filed");
    state.stats.push().await;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn resolve_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Report>, ServerError> {
    user.require_staff()?;

    let report = {
        let db = state.db.lock().await;
        if !db.resolve_report(id, Utc::now())? {
            // Distinguishes unknown ids (404) from repeated resolution.
            db.get_report(id)?;
            return Err(ServerError::Conflict(format!("report {id} is already resolved")));
        }
        db.get_report(id)?
    };

    info!(report = %id, by = %user.0.user_id, "Report resolved");
    state.stats.push().await;
    Ok(Json(report))
}

async fn get_maintenance(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MaintenanceWindow>, ServerError> {
    user.require_admin()?;
    Ok(Json(state.maintenance.current().await.as_ref().clone()))
}

/// Persist first, then swap, so a restart never resurrects an older window.
async fn put_maintenance(
    State(state): State<AppState>,
    user: AuthUser,
    Json(window): Json<MaintenanceWindow>,
) -> Result<Json<MaintenanceWindow>, ServerError> {
    user.require_admin()?;
    window.validate().map_err(ServerError::BadRequest)?;

    {
        let db = state.db.lock().await;
        db.put_setting(MAINTENANCE_SETTING_KEY, &window)?;
    }
    state.maintenance.replace(window.clone()).await;

    info!(by = %user.0.user_id, active = window.active, "Maintenance window replaced");
    Ok(Json(window))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
