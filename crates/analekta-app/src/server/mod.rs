//! Notification webhook server.
//!
//! Exposes a health probe and a push endpoint for completion-notification
//! batches, for deployments where the transport delivers over HTTP instead
//! of a polled queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::services::context::{build_pipeline_context, PipelineContext};
use crate::services::notifications::{handle_batch, NotificationBatch};

const HEALTHZ_PATH: &str = "/v1/healthz";
const NOTIFICATIONS_PATH: &str = "/v1/notifications";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct HealthzResponse {
    status: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build pipeline context: {0}")]
    Context(String),
    #[error("server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Routes that need no shared state.
pub fn build_api_router() -> Router {
    Router::new().route(HEALTHZ_PATH, get(healthz))
}

/// The full application router: health probe plus the notification endpoint.
pub fn build_app_router(ctx: Arc<PipelineContext>) -> Router {
    Router::new()
        .route(NOTIFICATIONS_PATH, post(notifications))
        .with_state(ctx)
        .merge(build_api_router())
}

pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    let listen_addr = parse_listen_addr(&config.server.listen_addr)?;
    let ctx = build_pipeline_context(&config)
        .map_err(|err| ServerError::Context(err.to_string()))?;

    let listener = bind_listener(listen_addr).await?;
    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(%local_addr, "analekta server listening");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);
    let app = build_app_router(Arc::new(ctx));

    let mut server_future = Box::pin(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(broadcast_shutdown(shutdown_tx))
            .await
    });
    let mut drain_timeout = Box::pin(drain_timeout_future(shutdown_rx.clone()));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse { status: "ok" })
}

async fn notifications(
    State(ctx): State<Arc<PipelineContext>>,
    Json(batch): Json<NotificationBatch>,
) -> impl IntoResponse {
    let summary = handle_batch(&ctx, &batch).await;
    Json(summary)
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }
    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

async fn broadcast_shutdown(sender: watch::Sender<ShutdownEvent>) {
    let event = wait_for_shutdown().await;
    if let Err(error) = sender.send(event) {
        tracing::warn!(?event, %error, "failed to broadcast shutdown event");
    }
}

async fn drain_timeout_future(mut receiver: watch::Receiver<ShutdownEvent>) {
    if receiver.changed().await.is_ok() {
        let event = *receiver.borrow_and_update();
        tracing::info!(?event, "shutdown signal received; draining connections");
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        tracing::warn!(
            ?event,
            seconds = DRAIN_TIMEOUT.as_secs(),
            "graceful shutdown timed out; continuing shutdown"
        );
    }
}
