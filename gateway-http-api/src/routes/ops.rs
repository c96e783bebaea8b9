//! Operational surface: health, version, capabilities, metrics, discovery,
//! and the generic `/run` entry.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::{assets, metrics, portal};

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{fee_summary, merge, parse_envelope, payload_amount, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/version", get(version))
        .route("/capabilities", get(capabilities))
        .route("/metrics", get(metrics_text))
        .route("/discovery/feed", get(discovery_feed))
        .route("/run", post(run))
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn version() -> Json<Value> {
    Json(json!({
        "commit": option_env!("NYX_BUILD_COMMIT").unwrap_or("unknown"),
        "describe": env!("CARGO_PKG_VERSION"),
        "build": "testnet",
    }))
}

async fn capabilities() -> Json<Value> {
    let module_features = json!({
        "portal": {"auth": "mandatory", "profile": "enabled"},
        "wallet": {"faucet": "enabled", "transfer": "enabled", "airdrop": "enabled"},
        "exchange": {"trading": "enabled", "orderbook": "enabled"},
        "marketplace": {"listing": "enabled", "purchase": "enabled"},
        "chat": {"e2ee": "verified", "dm": "enabled"},
        "dapp": {"browser": "enabled"},
        "web2": {"guard": "enabled"},
    });
    let modules: Vec<&str> = vec![
        "chat",
        "dapp",
        "exchange",
        "marketplace",
        "portal",
        "wallet",
        "web2",
    ];
    Json(json!({
        "modules": modules,
        "module_features": module_features,
        "endpoints": [
            "/run",
            "/capabilities",
            "/portal/v1/me",
            "/portal/v1/activity",
            "/portal/v1/accounts/search",
            "/portal/v1/accounts/by_id",
            "/portal/v1/e2ee/identity",
            "/wallet/v1/balances",
            "/wallet/v1/transfers",
            "/wallet/v1/airdrop/tasks",
            "/wallet/v1/airdrop/claim",
            "/wallet/v1/faucet",
            "/wallet/v1/transfer",
            "/exchange/orderbook",
            "/exchange/v1/my_orders",
            "/exchange/v1/my_trades",
            "/marketplace/listings",
            "/marketplace/listings/search",
            "/marketplace/v1/my_purchases",
            "/chat/v1/conversations",
            "/chat/messages",
            "/web2/v1/allowlist",
            "/web2/v1/request",
            "/web2/v1/requests",
            "/evidence",
            "/evidence/v1/replay",
            "/export.zip",
            "/proof.zip",
        ],
        "assets": assets::supported_assets(),
        "exchange_pairs": [{"base": "ECHO", "quote": "NYXT", "status": "enabled"}],
    }))
}

async fn metrics_text() -> String {
    metrics::render_metrics()
}

async fn discovery_feed(State(state): State<Arc<GatewayState>>) -> ApiResult<Json<Value>> {
    let storage = state.gateway.storage()?;
    let rooms = portal::list_rooms(storage.conn(), 5, 0)?;
    let listings =
        gateway_runtime::marketplace::list_active_listings(storage.conn(), 5, 0)?;
    let mut feed: Vec<Value> = rooms
        .into_iter()
        .map(|room| json!({"type": "room", "data": room}))
        .collect();
    feed.extend(
        listings
            .into_iter()
            .map(|listing| json!({"type": "listing", "data": listing})),
    );
    Ok(Json(json!({ "feed": feed })))
}

/// Generic `(module, action)` execution for callers that speak the raw
/// protocol.
async fn run(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, _) = parse_envelope(&body)?;
    let module = body
        .get("module")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let action = body
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let payload = match body.get("payload") {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let risk_action = format!("{module}_{action}");
    state.risk.check(
        &risk_action,
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;

    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            &module,
            &action,
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure(&risk_action))?;

    let mut response = run_response(&result);
    let feeable = matches!(
        (module.as_str(), action.as_str()),
        ("exchange", "route_swap")
            | ("exchange", "place_order")
            | ("exchange", "cancel_order")
            | ("chat", "message_event")
            | ("marketplace", "listing_publish")
            | ("marketplace", "purchase_listing")
    );
    if feeable {
        response = merge(
            response,
            fee_summary(&state.gateway.settings, &module, &action, &payload, &result.run_id),
        );
    }
    Ok(Json(response))
}
