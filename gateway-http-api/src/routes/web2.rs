//! Web2 guard endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::web2_guard;

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{parse_envelope, query_i64};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/web2/v1/allowlist", get(allowlist))
        .route("/web2/v1/request", post(guard_request))
        .route("/web2/v1/requests", get(guard_requests))
}

async fn allowlist() -> Json<Value> {
    Json(json!({"allowlist": web2_guard::list_allowlist()}))
}

async fn guard_request(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "web2_request",
        Some(&session.0.account_id),
        Some(&client_ip),
        None,
    )?;
    let response = web2_guard::execute_guard_request(
        state.gateway.engine.as_ref(),
        &state.gateway.settings,
        &state.gateway.paths,
        seed,
        &run_id,
        &payload,
        &session.0.account_id,
    )
    .await
    .inspect_err(|_| state.risk.record_failure("web2_request"))?;
    Ok(Json(response))
}

async fn guard_requests(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let rows = web2_guard::fetch_guard_requests(
        &state.gateway.paths,
        &session.0.account_id,
        limit,
        offset,
    )?;
    Ok(Json(json!({"requests": rows, "limit": limit, "offset": offset})))
}
