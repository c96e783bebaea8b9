//! Bearer-session extraction.
//!
//! Handlers opt into authentication by taking a [`Session`] argument; the
//! extractor verifies the token MAC, loads the session row, and applies the
//! per-account limiter. Public endpoints simply omit it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::http::request::Parts;

use gateway_runtime::GatewayError;
use gateway_runtime::portal;
use gateway_runtime::store::PortalSession;

use crate::GatewayState;
use crate::error::ApiError;

pub struct Session(pub PortalSession);

impl FromRequestParts<Arc<GatewayState>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err(ApiError(GatewayError::AuthRequired));
        };
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError(GatewayError::AuthRequired));
        }

        let storage = state.gateway.storage()?;
        let session = portal::require_session(storage.conn(), &state.gateway.settings, token)
            .map_err(|err| match err {
                err @ GatewayError::AuthInvalid(_) => err,
                other => GatewayError::AuthInvalid(other.public_message()),
            })?;

        if !state.account_limiter.allow(&session.account_id) {
            return Err(ApiError(GatewayError::AccountRateLimit));
        }
        Ok(Self(session))
    }
}

/// Best-effort client address: `X-Forwarded-For` first, then the socket
/// peer, then "unknown" (tests drive the router without a socket).
pub fn client_ip_of(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extractor variant of [`client_ip_of`] for handlers.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Ok(Self(first.to_string()));
                }
            }
        }
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(ip))
    }
}
