//! Marketplace endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::{marketplace, store};

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{fee_summary, merge, parse_envelope, payload_amount, query_i64, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/marketplace/listing", post(publish))
        .route("/marketplace/purchase", post(purchase))
        .route("/marketplace/listings", get(listings))
        .route("/marketplace/listings/search", get(search))
        .route("/marketplace/purchases", get(purchases))
        .route("/marketplace/v1/my_purchases", get(my_purchases))
}

async fn publish(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, mut payload) = parse_envelope(&body)?;
    // The session owner is the implicit publisher.
    payload
        .entry("publisher_id".to_string())
        .or_insert_with(|| Value::from(session.0.account_id.clone()));
    state.risk.check(
        "marketplace_listing",
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;
    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            "marketplace",
            "listing_publish",
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure("marketplace_listing"))?;
    let response = merge(
        run_response(&result),
        fee_summary(
            &state.gateway.settings,
            "marketplace",
            "listing_publish",
            &payload,
            &result.run_id,
        ),
    );
    Ok(Json(response))
}

async fn purchase(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, mut payload) = parse_envelope(&body)?;
    payload
        .entry("buyer_id".to_string())
        .or_insert_with(|| Value::from(session.0.account_id.clone()));
    state.risk.check(
        "marketplace_purchase",
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;
    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            "marketplace",
            "purchase_listing",
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure("marketplace_purchase"))?;
    let response = merge(
        run_response(&result),
        fee_summary(
            &state.gateway.settings,
            "marketplace",
            "purchase_listing",
            &payload,
            &result.run_id,
        ),
    );
    Ok(Json(response))
}

async fn listings(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let listings = marketplace::list_active_listings(storage.conn(), limit, offset)?;
    Ok(Json(json!({"listings": listings, "limit": limit, "offset": offset})))
}

async fn search(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let q = params.get("q").map(String::as_str).unwrap_or("");
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let listings = marketplace::search_listings(storage.conn(), q, limit, offset)?;
    Ok(Json(json!({
        "listings": listings,
        "limit": limit,
        "offset": offset,
        "q": q,
    })))
}

async fn purchases(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let listing_id = params.get("listing_id").map(String::as_str).filter(|s| !s.is_empty());
    let limit = query_i64(&params, "limit", 100)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let purchases = store::list_purchases(storage.conn(), listing_id, limit, offset)?;
    Ok(Json(json!({"purchases": purchases, "limit": limit, "offset": offset})))
}

async fn my_purchases(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    if !(1..=200).contains(&limit) {
        return Err(gateway_runtime::GatewayError::bad_request("limit out of bounds").into());
    }
    if offset < 0 {
        return Err(gateway_runtime::GatewayError::bad_request("offset out of bounds").into());
    }
    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT p.purchase_id, p.listing_id, p.buyer_id, p.qty, p.run_id,
                l.publisher_id, l.sku, l.title, l.price, l.status,
                r.state_hash, r.receipt_hashes, r.replay_ok
         FROM purchases p
         LEFT JOIN listings l ON l.listing_id = p.listing_id
         LEFT JOIN receipts r ON r.run_id = p.run_id
         WHERE p.buyer_id = ?1
         ORDER BY p.rowid DESC LIMIT ?2 OFFSET ?3",
        &[&session.0.account_id, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "purchases": rows,
        "limit": limit,
        "offset": offset,
    })))
}
