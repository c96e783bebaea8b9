//! Identity portal endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::{GatewayError, portal, store, unix_now};

use crate::GatewayState;
use crate::auth::Session;
use crate::error::ApiResult;
use crate::routes::query_i64;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/portal/v1/accounts", post(create_account))
        .route("/portal/v1/auth/challenge", post(challenge))
        .route("/portal/v1/auth/verify", post(verify))
        .route("/portal/v1/auth/logout", post(logout))
        .route("/portal/v1/profile", post(update_profile))
        .route("/portal/v1/e2ee/identity", post(e2ee_identity))
        .route("/portal/v1/me", get(me))
        .route("/portal/v1/accounts/by_id", get(account_by_id))
        .route("/portal/v1/accounts/search", get(search_accounts))
        .route("/portal/v1/activity", get(activity))
        .route("/portal/v1/rooms/search", get(search_rooms))
}

fn str_field<'a>(body: &'a Value, key: &str) -> ApiResult<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request(format!("{key} required")).into())
}

async fn create_account(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let handle = str_field(&body, "handle")?;
    let pubkey = str_field(&body, "pubkey")?;
    let storage = state.gateway.storage()?;
    let account = portal::create_account(storage.conn(), handle, pubkey)?;
    Ok(Json(json!({
        "account_id": account.account_id,
        "handle": account.handle,
        "pubkey": account.public_key,
        "created_at": account.created_at,
        "status": account.status,
    })))
}

async fn challenge(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let account_id = str_field(&body, "account_id")?;
    let storage = state.gateway.storage()?;
    let challenge = portal::issue_challenge(storage.conn(), &state.gateway.settings, account_id)?;
    Ok(Json(json!({
        "nonce": challenge.nonce,
        "expires_at": challenge.expires_at,
    })))
}

async fn verify(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let account_id = str_field(&body, "account_id")?;
    let nonce = str_field(&body, "nonce")?;
    let signature = str_field(&body, "signature")?;
    let storage = state.gateway.storage()?;
    let session = portal::verify_challenge(
        storage.conn(),
        &state.gateway.settings,
        account_id,
        nonce,
        signature,
    )?;
    Ok(Json(json!({
        "access_token": session.token,
        "expires_at": session.expires_at,
    })))
}

async fn logout(
    State(state): State<Arc<GatewayState>>,
    session: Session,
) -> ApiResult<Json<Value>> {
    let storage = state.gateway.storage()?;
    portal::logout_session(storage.conn(), &session.0.token)?;
    Ok(Json(json!({"ok": true})))
}

async fn update_profile(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let handle = body.get("handle").and_then(Value::as_str);
    let bio = body.get("bio").and_then(Value::as_str);
    let storage = state.gateway.storage()?;
    let account = portal::update_profile(storage.conn(), &session.0.account_id, handle, bio)?;
    Ok(Json(json!({
        "account": {
            "account_id": account.account_id,
            "handle": account.handle,
            "wallet_address": account.wallet_address,
            "created_at": account.created_at,
            "status": account.status,
            "bio": account.bio,
        }
    })))
}

async fn e2ee_identity(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let public_jwk = body.get("public_jwk");
    let (jwk_object, jwk_text) = match public_jwk {
        Some(Value::Object(map)) => {
            let text = Value::Object(map.clone()).to_string();
            (map.clone(), text)
        }
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            let parsed: Value = serde_json::from_str(raw.trim())
                .map_err(|_| GatewayError::bad_request("public_jwk invalid"))?;
            let map = parsed
                .as_object()
                .ok_or_else(|| GatewayError::bad_request("public_jwk invalid"))?
                .clone();
            (map, raw.trim().to_string())
        }
        _ => return Err(GatewayError::bad_request("public_jwk required").into()),
    };
    if jwk_text.len() > 2048 {
        return Err(GatewayError::bad_request("public_jwk too long").into());
    }
    for key in ["kty", "crv", "x", "y"] {
        if jwk_object.get(key).and_then(Value::as_str).is_none() {
            return Err(GatewayError::bad_request("public_jwk invalid").into());
        }
    }

    let updated_at = unix_now();
    let storage = state.gateway.storage()?;
    portal::upsert_e2ee_identity(storage.conn(), &session.0.account_id, &jwk_text, updated_at)?;
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "public_jwk": Value::Object(jwk_object),
        "updated_at": updated_at,
    })))
}

async fn me(State(state): State<Arc<GatewayState>>, session: Session) -> ApiResult<Json<Value>> {
    let storage = state.gateway.storage()?;
    let account = portal::load_account(storage.conn(), &session.0.account_id)?
        .ok_or_else(|| GatewayError::bad_request("account not found"))?;
    Ok(Json(json!({
        "account_id": account.account_id,
        "handle": account.handle,
        "pubkey": account.public_key,
        "wallet_address": account.wallet_address,
        "created_at": account.created_at,
        "status": account.status,
    })))
}

fn decode_jwk(record: &mut Value) {
    if let Some(map) = record.as_object_mut() {
        let decoded = map
            .get("public_jwk")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
        map.insert("public_jwk".to_string(), decoded.unwrap_or(Value::Null));
    }
}

async fn account_by_id(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let account_id = params
        .get("account_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("account_id required"))?;
    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT a.account_id, a.handle, i.public_jwk
         FROM portal_accounts a
         LEFT JOIN e2ee_identities i ON i.account_id = a.account_id
         WHERE a.account_id = ?1",
        &[&account_id.to_string()],
    )?;
    let mut record = rows
        .pop()
        .ok_or_else(|| GatewayError::bad_request("account not found"))?;
    decode_jwk(&mut record);
    Ok(Json(json!({ "account": record })))
}

async fn search_accounts(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let q = params
        .get("q")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("q required"))?;
    let limit = query_i64(&params, "limit", 20)?;
    if !(1..=50).contains(&limit) {
        return Err(GatewayError::bad_request("limit out of bounds").into());
    }
    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT a.account_id, a.handle, i.public_jwk
         FROM portal_accounts a
         LEFT JOIN e2ee_identities i ON i.account_id = a.account_id
         WHERE a.handle LIKE ?1
         ORDER BY a.handle ASC LIMIT ?2",
        &[&format!("{q}%"), &limit],
    )?;
    for record in rows.iter_mut() {
        decode_jwk(record);
    }
    Ok(Json(json!({"accounts": rows, "q": q, "limit": limit})))
}

async fn activity(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = query_i64(&params, "limit", 50)?;
    let offset = query_i64(&params, "offset", 0)?;
    let storage = state.gateway.storage()?;
    let receipts = portal::list_account_activity(
        storage.conn(),
        &session.0.account_id,
        &session.0.account_id,
        limit,
        offset,
    )?;
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "receipts": receipts,
        "limit": limit,
        "offset": offset,
    })))
}

async fn search_rooms(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let q = params.get("q").map(String::as_str).unwrap_or("");
    let storage = state.gateway.storage()?;
    let rooms = portal::search_rooms(storage.conn(), q, 50)?;
    Ok(Json(json!({ "rooms": rooms })))
}
