//! Exchange endpoints: order placement/cancellation plus the public book.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::store::{self, ORDER_BY_PRICE_ASC, ORDER_BY_PRICE_DESC, OrderFilter};
use gateway_runtime::GatewayError;

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{fee_summary, merge, parse_envelope, payload_amount, query_i64, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/exchange/place_order", post(place_order))
        .route("/exchange/cancel_order", post(cancel_order))
        .route("/exchange/orders", get(orders))
        .route("/exchange/trades", get(trades))
        .route("/exchange/orderbook", get(orderbook))
        .route("/exchange/v1/my_orders", get(my_orders))
        .route("/exchange/v1/my_trades", get(my_trades))
}

async fn place_order(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "exchange_order",
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;
    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            "exchange",
            "place_order",
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure("exchange_order"))?;
    let response = merge(
        run_response(&result),
        fee_summary(&state.gateway.settings, "exchange", "place_order", &payload, &result.run_id),
    );
    Ok(Json(response))
}

async fn cancel_order(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "exchange_cancel",
        Some(&session.0.account_id),
        Some(&client_ip),
        None,
    )?;
    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            "exchange",
            "cancel_order",
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure("exchange_cancel"))?;
    let response = merge(
        run_response(&result),
        fee_summary(&state.gateway.settings, "exchange", "cancel_order", &payload, &result.run_id),
    );
    Ok(Json(response))
}

fn status_filter(params: &HashMap<String, String>) -> ApiResult<Option<String>> {
    let status = params
        .get("status")
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("open");
    match status {
        "all" => Ok(None),
        "open" | "filled" | "cancelled" => Ok(Some(status.to_string())),
        _ => Err(GatewayError::bad_request("status invalid").into()),
    }
}

async fn orders(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 100)?;
    let offset = query_i64(&params, "offset", 0)?;
    let status = status_filter(&params)?;
    let storage = state.gateway.storage()?;
    let orders = store::list_orders(
        storage.conn(),
        &OrderFilter {
            side: params.get("side").map(String::as_str).filter(|s| !s.is_empty()),
            asset_in: params.get("asset_in").map(String::as_str).filter(|s| !s.is_empty()),
            asset_out: params.get("asset_out").map(String::as_str).filter(|s| !s.is_empty()),
            status: status.as_deref(),
        },
        ORDER_BY_PRICE_ASC,
        limit,
        offset,
    )?;
    Ok(Json(json!({"orders": orders, "limit": limit, "offset": offset})))
}

async fn trades(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 100)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let trades = store::list_trades(storage.conn(), limit, offset)?;
    Ok(Json(json!({"trades": trades, "limit": limit, "offset": offset})))
}

async fn orderbook(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let buys = store::list_orders(
        storage.conn(),
        &OrderFilter {
            side: Some("BUY"),
            status: Some("open"),
            ..Default::default()
        },
        ORDER_BY_PRICE_DESC,
        limit,
        offset,
    )?;
    let sells = store::list_orders(
        storage.conn(),
        &OrderFilter {
            side: Some("SELL"),
            status: Some("open"),
            ..Default::default()
        },
        ORDER_BY_PRICE_ASC,
        limit,
        offset,
    )?;
    Ok(Json(json!({"buy": buys, "sell": sells, "limit": limit, "offset": offset})))
}

async fn my_orders(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let status = params
        .get("status")
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("open");
    if !matches!(status, "open" | "filled" | "cancelled" | "all") {
        return Err(GatewayError::bad_request("status invalid").into());
    }

    let mut sql = String::from(
        "SELECT o.order_id, o.owner_address, o.side, o.amount, o.price, o.asset_in, o.asset_out,
                o.status, o.run_id, r.state_hash, r.receipt_hashes, r.replay_ok
         FROM orders o
         LEFT JOIN receipts r ON r.run_id = o.run_id
         WHERE o.owner_address = ?1",
    );
    let mut owned: Vec<String> = vec![session.0.account_id.clone()];
    for key in ["side", "asset_in", "asset_out"] {
        if let Some(value) = params.get(key).filter(|s| !s.is_empty()) {
            sql.push_str(&format!(" AND o.{key} = ?{}", owned.len() + 1));
            owned.push(value.clone());
        }
    }
    if status != "all" {
        sql.push_str(&format!(" AND o.status = ?{}", owned.len() + 1));
        owned.push(status.to_string());
    }
    sql.push_str(&format!(
        " ORDER BY o.rowid DESC LIMIT ?{} OFFSET ?{}",
        owned.len() + 1,
        owned.len() + 2
    ));

    let storage = state.gateway.storage()?;
    let mut rows = {
        let mut bind: Vec<&dyn gateway_runtime::rusqlite::ToSql> = Vec::new();
        for value in owned.iter() {
            bind.push(value);
        }
        bind.push(&limit);
        bind.push(&offset);
        store::query_json(storage.conn(), &sql, &bind)?
    };
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "orders": rows,
        "limit": limit,
        "offset": offset,
        "status": status,
    })))
}

async fn my_trades(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT t.trade_id, t.order_id, t.amount, t.price, t.run_id,
                o.side, o.asset_in, o.asset_out, o.status,
                r.state_hash, r.receipt_hashes, r.replay_ok
         FROM trades t
         JOIN orders o ON o.order_id = t.order_id
         LEFT JOIN receipts r ON r.run_id = t.run_id
         WHERE o.owner_address = ?1
         ORDER BY t.trade_id DESC LIMIT ?2 OFFSET ?3",
        &[&session.0.account_id, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "trades": rows,
        "limit": limit,
        "offset": offset,
    })))
}
