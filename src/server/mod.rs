//! HTTP surface: event tracking, maintenance flush and health check.

pub mod flush;
pub mod health;
pub mod signature;
pub mod track;

use crate::context::AppContext;
use crate::error::{Error, Result};
use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{info, warn};

pub const TIME_HEADER: &str = "X-Hamustro-Time";
pub const SIGNATURE_HEADER: &str = "X-Hamustro-Signature";
pub const MAINTENANCE_KEY_HEADER: &str = "X-Hamustro-Maintenance-Key";

pub type AppState = Arc<AppContext>;

/// Routes. Track and flush accept any method so they can answer 405 themselves.
pub fn router(ctx: AppState) -> Router {
    Router::new()
        .route("/api/v1/track", any(track::track_handler))
        .route("/api/flush", any(flush::flush_handler))
        .route("/api/health", get(health::health_handler))
        .with_state(ctx)
}

/// Listen on `address`.
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| Error::Config(format!("cannot listen on {address}: {e}")))?;
    info!(address = %address, "listening");
    Ok(listener)
}

/// Serve on `listener` until `signal` resolves, then refuse new work, let
/// open requests finish and stop the worker pool.
///
/// `grace` bounds everything after the signal: the HTTP drain and the pool
/// shutdown together. Past it the server task is aborted and
/// [`Error::ShutdownTimeout`] is returned.
pub async fn run<F>(
    ctx: AppState,
    listener: TcpListener,
    signal: F,
    grace: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (fired_tx, mut fired_rx) = oneshot::channel();
    let signal_ctx = Arc::clone(&ctx);
    let shutdown = async move {
        signal.await;
        signal_ctx.begin_shutdown();
        let _ = fired_tx.send(());
    };

    let app = router(Arc::clone(&ctx)).into_make_service_with_connect_info::<SocketAddr>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    // The shutdown future is dropped if the server fails first.
    let failed = tokio::select! {
        biased;
        Ok(()) = &mut fired_rx => None,
        served = &mut server => Some(served),
    };
    if let Some(served) = failed {
        ctx.shutdown().await;
        return joined(served);
    }

    let drained = tokio::time::timeout(grace, async {
        let served = (&mut server).await;
        ctx.shutdown().await;
        served
    })
    .await;
    match drained {
        Ok(served) => joined(served),
        Err(_) => {
            server.abort();
            Err(Error::ShutdownTimeout(grace))
        }
    }
}

fn joined(served: std::result::Result<std::io::Result<()>, JoinError>) -> Result<()> {
    served.map_err(|e| Error::Other(format!("server task failed: {e}")))??;
    Ok(())
}

/// Log a rejected request and build its response. The JSON error body is
/// only sent in verbose mode.
pub(crate) fn reject(ctx: &AppContext, status: StatusCode, message: &str) -> Response {
    warn!(status = status.as_u16(), "{message}");
    if ctx.verbose {
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    } else {
        status.into_response()
    }
}

/// Non-empty header value as a string.
pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
