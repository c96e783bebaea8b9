//! Chat endpoints: v1 rooms with hash-chained messages plus the legacy
//! channel surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::{GatewayError, portal, store};

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{fee_summary, merge, parse_envelope, query_i64, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/chat/v1/rooms", post(create_room).get(list_rooms))
        .route(
            "/chat/v1/rooms/{room_id}/messages",
            post(post_message).get(list_room_messages),
        )
        .route("/chat/v1/conversations", get(conversations))
        .route("/chat/messages", get(channel_messages))
        .route("/chat/send", post(send))
}

async fn create_room(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::bad_request("room name invalid"))?;
    let is_public = body.get("is_public").and_then(Value::as_bool).unwrap_or(true);
    let storage = state.gateway.storage()?;
    let room = portal::create_room(storage.conn(), name, is_public)?;
    Ok(Json(json!({
        "room_id": room.room_id,
        "name": room.name,
        "created_at": room.created_at,
        "is_public": room.is_public,
    })))
}

async fn list_rooms(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let rooms = portal::list_rooms(storage.conn(), limit, offset)?;
    Ok(Json(json!({"rooms": rooms, "limit": limit, "offset": offset})))
}

async fn post_message(
    State(state): State<Arc<GatewayState>>,
    Path(room_id): Path<String>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let message_body = body
        .get("body")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("body required"))?;
    state.risk.check(
        "chat_message",
        Some(&session.0.account_id),
        Some(&client_ip),
        None,
    )?;
    let storage = state.gateway.storage()?;
    let (message, receipt) = portal::post_message(
        storage.conn(),
        &room_id,
        &session.0.account_id,
        message_body,
    )
    .inspect_err(|_| state.risk.record_failure("chat_message"))?;
    Ok(Json(json!({
        "message": message,
        "receipt": {
            "prev_digest": receipt.prev_digest,
            "msg_digest": receipt.msg_digest,
            "chain_head": receipt.chain_head,
        },
    })))
}

async fn list_room_messages(
    State(state): State<Arc<GatewayState>>,
    Path(room_id): Path<String>,
    _session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let after = match params.get("after").filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| GatewayError::bad_request("after invalid"))?,
        ),
        None => None,
    };
    let limit = query_i64(&params, "limit", 50)?;
    let storage = state.gateway.storage()?;
    let messages = portal::list_messages(storage.conn(), &room_id, after, limit)?;
    Ok(Json(json!({ "messages": messages })))
}

async fn conversations(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    if !(1..=200).contains(&limit) {
        return Err(GatewayError::bad_request("limit out of bounds").into());
    }
    if offset < 0 {
        return Err(GatewayError::bad_request("offset out of bounds").into());
    }
    let storage = state.gateway.storage()?;
    let rows = store::query_json(
        storage.conn(),
        "SELECT c.channel, c.max_rowid, m.message_id, m.sender_account_id, m.run_id
         FROM (SELECT channel, MAX(rowid) AS max_rowid FROM messages GROUP BY channel) c
         JOIN messages m ON m.rowid = c.max_rowid
         WHERE c.channel = 'lobby' OR c.channel LIKE ?1
         ORDER BY c.max_rowid DESC LIMIT ?2 OFFSET ?3",
        &[&format!("%{}%", session.0.account_id), &limit, &offset],
    )?;
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "conversations": rows,
        "limit": limit,
        "offset": offset,
    })))
}

/// Legacy channel read. Private channels are named after their
/// participants, so membership is a substring check on the channel name.
async fn channel_messages(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let channel = params
        .get("channel")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("channel required"))?;
    if channel != "lobby" && !channel.contains(&session.0.account_id) {
        return Err(GatewayError::ForbiddenChatChannel.into());
    }
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    if !(1..=200).contains(&limit) {
        return Err(GatewayError::bad_request("limit out of bounds").into());
    }
    if offset < 0 {
        return Err(GatewayError::bad_request("offset out of bounds").into());
    }
    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT m.message_id, m.channel, m.sender_account_id, m.body, m.run_id,
                r.state_hash, r.receipt_hashes, r.replay_ok
         FROM messages m
         LEFT JOIN receipts r ON r.run_id = m.run_id
         WHERE m.channel = ?1
         ORDER BY m.rowid DESC LIMIT ?2 OFFSET ?3",
        &[channel, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(Json(json!({
        "channel": channel,
        "messages": rows,
        "limit": limit,
        "offset": offset,
    })))
}

async fn send(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "chat_message",
        Some(&session.0.account_id),
        Some(&client_ip),
        None,
    )?;
    let result = state
        .gateway
        .execute_run(
            seed,
            &run_id,
            "chat",
            "message_event",
            &payload,
            Some(&session.0.account_id),
        )
        .inspect_err(|_| state.risk.record_failure("chat_message"))?;
    let response = merge(
        run_response(&result),
        fee_summary(&state.gateway.settings, "chat", "message_event", &payload, &result.run_id),
    );
    Ok(Json(response))
}
