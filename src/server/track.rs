//! `POST /api/v1/track`: accept a signed collection of events.
//!
//! Status codes: 503 while shutting down, 405 for a wrong method or a bad
//! signature, 400 for an undecodable or inconsistent collection, 204 when
//! the collection carries no payloads, 200 once every event is queued.

use super::signature::{self, sign};
use super::{AppState, SIGNATURE_HEADER, TIME_HEADER, header, reject};
use crate::action::EventAction;
use crate::config::secrets::constant_time_eq;
use crate::event::Collection;
use crate::telemetry::metrics;
use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn track_handler(State(ctx): State<AppState>, request: Request) -> Response {
    if ctx.is_terminating() {
        return reject(&ctx, StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    if request.method() != Method::POST {
        return reject(&ctx, StatusCode::METHOD_NOT_ALLOWED, "method is not POST");
    }

    let (parts, body) = request.into_parts();
    let time = header(&parts.headers, TIME_HEADER);
    let given_signature = header(&parts.headers, SIGNATURE_HEADER);
    let check_signature = ctx.config.signature || time.is_some() || given_signature.is_some();

    if check_signature && time.is_none() {
        return reject(&ctx, StatusCode::METHOD_NOT_ALLOWED, "X-Hamustro-Time header is missing");
    }
    if check_signature && given_signature.is_none() {
        return reject(
            &ctx,
            StatusCode::METHOD_NOT_ALLOWED,
            "X-Hamustro-Signature header is missing",
        );
    }

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return reject(
                &ctx,
                StatusCode::BAD_REQUEST,
                &format!("cannot read request body: {e}"),
            );
        }
    };

    if let (true, Some(time), Some(given)) = (check_signature, time, given_signature) {
        let expected = sign(&body, time, &ctx.config.shared_secret);
        if !constant_time_eq(given, &expected) {
            return reject(
                &ctx,
                StatusCode::METHOD_NOT_ALLOWED,
                "X-Hamustro-Signature header is invalid",
            );
        }
    }

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let collection: Collection = match content_type.as_str() {
        "application/json" => match serde_json::from_slice(&body) {
            Ok(collection) => collection,
            Err(e) => {
                return reject(
                    &ctx,
                    StatusCode::BAD_REQUEST,
                    &format!("unmarshaling json collection failed: {e}"),
                );
            }
        },
        _ => {
            return reject(
                &ctx,
                StatusCode::BAD_REQUEST,
                "unsupported or missing Content-Type",
            );
        }
    };
    if !collection.is_valid() {
        return reject(
            &ctx,
            StatusCode::BAD_REQUEST,
            "json collection is missing required fields",
        );
    }
    if signature::session(&collection) != collection.session {
        return reject(
            &ctx,
            StatusCode::BAD_REQUEST,
            "collection's session attribute is invalid",
        );
    }
    if !collection.has_payloads() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let peer_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .and_then(|ip| match ip {
            IpAddr::V4(v4) => Some(v4.to_string()),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(|v4| v4.to_string()),
        });

    let events = collection.events();
    let count = events.len();
    for mut event in events {
        if event.ip.is_empty() {
            if let Some(ip) = &peer_ip {
                event.set_ip_address(ip.as_str());
            }
        }
        if ctx.config.masked_ip {
            event.truncate_ipv4_last_octet();
        }
        if ctx.queue.push(EventAction::new(event).into()).await.is_err() {
            return reject(&ctx, StatusCode::SERVICE_UNAVAILABLE, "job queue is closed");
        }
    }
    metrics::events_accepted().add(count as u64, &[]);
    debug!(events = count, "collection accepted");

    StatusCode::OK.into_response()
}
