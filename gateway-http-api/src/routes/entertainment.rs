//! Entertainment endpoints: deterministic state steps over a seeded
//! catalog.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::gateway::ensure_entertainment_items;
use gateway_runtime::store;

use crate::GatewayState;
use crate::auth::ClientIp;
use crate::error::ApiResult;
use crate::routes::{parse_envelope, query_i64, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/entertainment/step", post(step))
        .route("/entertainment/items", get(items))
        .route("/entertainment/events", get(events))
}

async fn step(
    State(state): State<Arc<GatewayState>>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state
        .risk
        .check("entertainment_step", None, Some(&client_ip), None)?;
    let result = state
        .gateway
        .execute_run(seed, &run_id, "entertainment", "state_step", &payload, None)
        .inspect_err(|_| state.risk.record_failure("entertainment_step"))?;
    Ok(Json(run_response(&result)))
}

async fn items(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 100)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    ensure_entertainment_items(storage.conn())?;
    let items = store::list_entertainment_items(storage.conn(), limit, offset)?;
    Ok(Json(json!({"items": items, "limit": limit, "offset": offset})))
}

async fn events(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let item_id = params.get("item_id").map(String::as_str).filter(|s| !s.is_empty());
    let limit = query_i64(&params, "limit", 100)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let events = store::list_entertainment_events(storage.conn(), item_id, limit, offset)?;
    Ok(Json(json!({"events": events, "limit": limit, "offset": offset})))
}
