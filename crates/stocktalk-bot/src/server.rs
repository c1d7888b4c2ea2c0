//! HTTP ingress for webhook deliveries
//!
//! Two routes: `POST /callback` receives signed event batches from the
//! messaging platform, `GET /healthz` answers liveness probes. Signature
//! verification happens inside the orchestrator on the raw body bytes, so
//! the handler extracts `Bytes` rather than a typed JSON body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use stocktalk_core::Error;

use crate::orchestrator::Orchestrator;
use crate::webhook::SIGNATURE_HEADER;

/// Shared state behind the HTTP handlers
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        );

    Router::new()
        .route("/callback", post(ingest_webhook))
        .route("/healthz", get(get_health))
        .layer(trace_layer)
        .with_state(state)
}

async fn ingest_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.orchestrator.handle_webhook(&body, signature).await {
        Ok(processed) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "processed": processed })),
        )
            .into_response(),
        Err(Error::Auth(message)) => {
            warn!("Rejected webhook delivery: {}", message);
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "status": "error", "error": message })),
            )
                .into_response()
        }
        Err(Error::Json(e)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "error": format!("invalid webhook payload: {e}"),
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Webhook handling failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Bind and run the server until a shutdown signal arrives.
///
/// After the listener drains, registered background tasks are awaited so a
/// screening run in flight can still land in its task record.
pub async fn serve(bind_addr: &str, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("stocktalk serving on {}", bind_addr);

    let app = router(Arc::new(AppState::new(orchestrator.clone())));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("http server shutdown completed");

    orchestrator.shutdown().await;
    info!("background tasks settled");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to install SIGTERM handler, ctrl-c only: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to await ctrl-c: {}", e);
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("received ctrl-c, shutting down"),
            _ = terminate.recv() => warn!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to await ctrl-c: {}", e);
        } else {
            warn!("received ctrl-c, shutting down");
        }
    }
}
