//! `POST /api/flush`: ask every worker to save its buffer now.
//!
//! Only available when a maintenance key is configured. Clients send
//! `hex(sha256(maintenance_key))` in `X-Hamustro-Maintenance-Key`.

use super::{AppState, MAINTENANCE_KEY_HEADER, header, reject};
use crate::config::secrets::{constant_time_eq, sha256_hex};
use crate::engine::FlushOptions;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

pub async fn flush_handler(
    State(ctx): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(key) = ctx.config.maintenance_key.as_ref() else {
        return reject(
            &ctx,
            StatusCode::SERVICE_UNAVAILABLE,
            "maintenance key is not configured",
        );
    };
    if ctx.is_terminating() {
        return reject(&ctx, StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    if method != Method::POST {
        return reject(&ctx, StatusCode::METHOD_NOT_ALLOWED, "method is not POST");
    }

    let Some(given) = header(&headers, MAINTENANCE_KEY_HEADER) else {
        return reject(&ctx, StatusCode::METHOD_NOT_ALLOWED, "maintenance key is missing");
    };
    if !constant_time_eq(given, &sha256_hex(key)) {
        return reject(&ctx, StatusCode::METHOD_NOT_ALLOWED, "maintenance key is invalid");
    }

    info!("flushing workers");
    ctx.dispatcher.flush(FlushOptions { automatic: false }).await;
    StatusCode::OK.into_response()
}
