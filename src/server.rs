//! HTTP ingest endpoint.
//!
//! Fired scheduler tasks and bus push subscriptions deliver envelopes here.
//! The status code tells the sender whether to retry: `422` never, `500`
//! yes.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::app::App;
use crate::events::EventEnvelope;

/// Path accepting one event envelope per `POST`.
pub const EVENTS_ENDPOINT: &str = "/v1/events";

/// Liveness path.
pub const HEALTH_ENDPOINT: &str = "/health";

struct ServerState {
    app: Arc<App>,
    auth_token: Option<String>,
}

/// Build the ingest router. When `auth_token` is set, the events endpoint
/// requires `Authorization: Bearer <token>`.
pub fn build_router(app: Arc<App>, auth_token: Option<String>) -> Router {
    let state = Arc::new(ServerState { app, auth_token });
    Router::new()
        .route(EVENTS_ENDPOINT, post(handle_event))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

/// Serve `router` on `listener` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server stops unexpectedly.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    let addr = listener
        .local_addr()
        .context("failed to resolve bound address")?;
    info!(%addr, endpoint = EVENTS_ENDPOINT, "ingest server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("ingest server exited unexpectedly")?;

    info!("ingest server stopped");
    Ok(())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_event(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(token) = &state.auth_token {
        if !authorization_is_valid(&headers, token) {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token",
            );
        }
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "rejected malformed event envelope");
            return error_response(StatusCode::BAD_REQUEST, "invalid_envelope", e.to_string());
        }
    };

    let report = match state.app.ingest(&envelope).await {
        Ok(report) => report,
        Err(e) => {
            error!(event_id = %envelope.id, error = %e, "failed to record dead letter");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                e.to_string(),
            );
        }
    };

    let status = if report.has_retryable_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else if report.decode_error().is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    (status, Json(report.summary())).into_response()
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message.into(),
            }
        })),
    )
        .into_response()
}

fn authorization_is_valid(headers: &HeaderMap, auth_token: &str) -> bool {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return false;
    };
    let Ok(raw) = header.to_str() else {
        return false;
    };
    let Some(token) = raw.strip_prefix("Bearer ") else {
        return false;
    };
    token.trim() == auth_token
}
