use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::{
    domain::{Session, SessionId, UserId},
    error::{ApiError, ErrorCode},
};
use storage::Storage;
use tracing::{error, info};

mod config;
mod registry;
mod ws;

use config::{load_settings, prepare_database_url};
use registry::SessionRegistry;
use ws::ws_handler;

pub(crate) struct AppState {
    storage: Storage,
    registry: SessionRegistry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    title: String,
    owner_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;

    let registry = SessionRegistry::new(storage.clone());
    let state = AppState { storage, registry };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "session sync server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/sessions/:code", get(get_session_by_code))
        .route("/sessions/:session_id/end", post(end_session))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, (StatusCode, Json<ApiError>)> {
    if req.title.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "title cannot be empty")),
        ));
    }
    let session = state
        .storage
        .create_session(req.title.trim(), UserId(req.owner_id))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(ErrorCode::Internal, e.to_string())),
            )
        })?;
    info!(session_id = %session.id, code = %session.code, "session created");
    Ok(Json(session))
}

/// Point-in-time session read. This is the late-joiner catch-up path: a
/// viewer that joins mid-session reads the last-persisted viewer state here
/// instead of replaying the room's message history.
async fn get_session_by_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Session>, (StatusCode, Json<ApiError>)> {
    let session = state
        .storage
        .get_session_by_code(&code.to_uppercase())
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(ErrorCode::Internal, e.to_string())),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError::new(ErrorCode::NotFound, "session not found")),
            )
        })?;
    Ok(Json(session))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<Json<Session>, (StatusCode, Json<ApiError>)> {
    let session = state
        .storage
        .end_session(SessionId(session_id))
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(ErrorCode::Validation, e.to_string())),
            )
        })?;
    state.registry.broadcast_session_update(&session).await;
    info!(session_id = %session.id, "session ended");
    Ok(Json(session))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
