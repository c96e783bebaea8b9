//! HTTP surface for the NYX gateway.
//!
//! Thin axum layer over `gateway-runtime`: bearer-session extraction, the
//! per-IP and per-account fixed-window limiters, risk checks on every
//! mutating route, and the stable error envelope.

pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::{Any, CorsLayer};

use gateway_runtime::Gateway;
use gateway_runtime::metrics;
use gateway_runtime::risk::{RequestLimiter, RiskEngine};

pub const MAX_BODY_BYTES: usize = 4096;
pub const IP_RATE_LIMIT: u32 = 120;
pub const ACCOUNT_RATE_LIMIT: u32 = 60;
pub const RATE_WINDOW_SECONDS: i64 = 60;

pub struct GatewayState {
    pub gateway: Gateway,
    pub risk: RiskEngine,
    pub ip_limiter: RequestLimiter,
    pub account_limiter: RequestLimiter,
}

impl GatewayState {
    pub fn new(gateway: Gateway) -> Self {
        let risk = RiskEngine::from_settings(&gateway.settings);
        Self {
            gateway,
            risk,
            ip_limiter: RequestLimiter::new(IP_RATE_LIMIT, RATE_WINDOW_SECONDS),
            account_limiter: RequestLimiter::new(ACCOUNT_RATE_LIMIT, RATE_WINDOW_SECONDS),
        }
    }
}

/// Per-IP limiter + request metrics for every route.
async fn track_request(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_ip = auth::client_ip_of(&request);

    if !state.ip_limiter.allow(&client_ip) {
        metrics::record_request(&method, &path, 429, std::time::Duration::ZERO);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(&method, &path, response.status().as_u16(), started.elapsed());
    Ok(response)
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::ops::router())
        .merge(routes::portal::router())
        .merge(routes::wallet::router())
        .merge(routes::exchange::router())
        .merge(routes::marketplace::router())
        .merge(routes::chat::router())
        .merge(routes::web2::router())
        .merge(routes::evidence::router())
        .merge(routes::entertainment::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
