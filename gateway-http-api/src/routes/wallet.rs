//! Wallet endpoints: faucet, transfer, airdrop, balances, history.
//!
//! The `/wallet/{faucet,transfer}` legacy forms accept unauthenticated
//! calls for parity with older clients; `legacy_unauth_endpoints = false`
//! turns them into 401s.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::error::MismatchField;
use gateway_runtime::{GatewayError, airdrop, assets, store};

use crate::GatewayState;
use crate::auth::{ClientIp, Session};
use crate::error::ApiResult;
use crate::routes::{parse_envelope, payload_amount, query_i64, run_response};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/wallet/v1/faucet", post(faucet_v1))
        .route("/wallet/faucet", post(faucet_legacy))
        .route("/wallet/v1/transfer", post(transfer_v1))
        .route("/wallet/transfer", post(transfer_legacy))
        .route("/wallet/v1/airdrop/claim", post(airdrop_claim_v1))
        .route("/wallet/airdrop/claim", post(airdrop_claim_v1))
        .route("/wallet/v1/airdrop/tasks", get(airdrop_tasks))
        .route("/wallet/v1/balances", get(balances))
        .route("/wallet/v1/transfers", get(transfers))
        .route("/wallet/balance", get(balance_legacy))
}

fn fee_fields(fee: &gateway_runtime::fees::FeeQuote) -> Value {
    json!({
        "fee_total": fee.total_paid,
        "fee_breakdown": {
            "protocol_fee_total": fee.protocol_fee_total,
            "platform_fee_amount": fee.platform_fee_amount,
        },
        "treasury_address": fee.fee_address,
    })
}

async fn faucet_v1(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "wallet_faucet",
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;
    let (result, balance, fee) = state
        .gateway
        .execute_wallet_faucet_v1(
            seed,
            &run_id,
            &payload,
            &session.0.account_id,
            Some(&client_ip),
        )
        .inspect_err(|_| state.risk.record_failure("wallet_faucet"))?;

    let mut response = run_response(&result);
    response["address"] = payload.get("address").cloned().unwrap_or(Value::Null);
    response["balance"] = json!(balance);
    response["payer"] = json!(session.0.account_id);
    Ok(Json(crate::routes::merge(response, fee_fields(&fee))))
}

async fn faucet_legacy(
    State(state): State<Arc<GatewayState>>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !state.gateway.settings.legacy_unauth_endpoints {
        return Err(GatewayError::AuthRequired.into());
    }
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state
        .risk
        .check("wallet_faucet", None, Some(&client_ip), payload_amount(&payload))?;
    let (result, balances, _fee) = state
        .gateway
        .execute_wallet_faucet(seed, &run_id, &payload)
        .inspect_err(|_| state.risk.record_failure("wallet_faucet"))?;

    let mut response = run_response(&result);
    response["address"] = payload.get("address").cloned().unwrap_or(Value::Null);
    response["balance"] = json!(balances.balance);
    Ok(Json(response))
}

async fn transfer_v1(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    let from_address = payload.get("from_address").and_then(Value::as_str);
    if from_address != Some(session.0.account_id.as_str()) {
        return Err(GatewayError::AddressMismatch {
            field: MismatchField::FromAddress,
        }
        .into());
    }
    state.risk.check(
        "wallet_transfer",
        Some(&session.0.account_id),
        Some(&client_ip),
        payload_amount(&payload),
    )?;
    let (result, balances, fee) = state
        .gateway
        .execute_wallet_transfer(seed, &run_id, &payload)
        .inspect_err(|_| state.risk.record_failure("wallet_transfer"))?;

    let mut response = run_response(&result);
    response["from_address"] = payload.get("from_address").cloned().unwrap_or(Value::Null);
    response["to_address"] = payload.get("to_address").cloned().unwrap_or(Value::Null);
    response["asset_id"] = payload
        .get("asset_id")
        .cloned()
        .unwrap_or_else(|| json!("NYXT"));
    response["amount"] = payload.get("amount").cloned().unwrap_or(Value::Null);
    response["payer"] = json!(session.0.account_id);
    response["from_balance"] = json!(balances.from_balance);
    response["to_balance"] = json!(balances.to_balance);
    response["treasury_balance"] = json!(balances.treasury_balance);
    Ok(Json(crate::routes::merge(response, fee_fields(&fee))))
}

async fn transfer_legacy(
    State(state): State<Arc<GatewayState>>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !state.gateway.settings.legacy_unauth_endpoints {
        return Err(GatewayError::AuthRequired.into());
    }
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state
        .risk
        .check("wallet_transfer", None, Some(&client_ip), payload_amount(&payload))?;
    let (result, balances, fee) = state
        .gateway
        .execute_wallet_transfer(seed, &run_id, &payload)
        .inspect_err(|_| state.risk.record_failure("wallet_transfer"))?;

    let mut response = run_response(&result);
    response["from_address"] = payload.get("from_address").cloned().unwrap_or(Value::Null);
    response["to_address"] = payload.get("to_address").cloned().unwrap_or(Value::Null);
    response["amount"] = payload.get("amount").cloned().unwrap_or(Value::Null);
    response["payer"] = payload.get("from_address").cloned().unwrap_or(Value::Null);
    response["from_balance"] = json!(balances.from_balance);
    response["to_balance"] = json!(balances.to_balance);
    response["treasury_balance"] = json!(balances.treasury_balance);
    Ok(Json(crate::routes::merge(response, fee_fields(&fee))))
}

async fn airdrop_claim_v1(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (seed, run_id, payload) = parse_envelope(&body)?;
    state.risk.check(
        "wallet_airdrop",
        Some(&session.0.account_id),
        Some(&client_ip),
        None,
    )?;
    let (result, balance, fee, claim) = state
        .gateway
        .execute_airdrop_claim_v1(seed, &run_id, &payload, &session.0.account_id)
        .inspect_err(|_| state.risk.record_failure("wallet_airdrop"))?;

    let mut response = run_response(&result);
    response["account_id"] = json!(session.0.account_id);
    response["task_id"] = json!(claim.task_id);
    response["reward"] = json!(claim.reward);
    response["completion_run_id"] = json!(claim.completion_run_id);
    response["balance"] = json!(balance);
    response["payer"] = json!(session.0.account_id);
    Ok(Json(crate::routes::merge(response, fee_fields(&fee))))
}

async fn airdrop_tasks(
    State(state): State<Arc<GatewayState>>,
    session: Session,
) -> ApiResult<Json<Value>> {
    let storage = state.gateway.storage()?;
    let tasks = airdrop::list_tasks(storage.conn(), &session.0.account_id)?;
    Ok(Json(json!({
        "account_id": session.0.account_id,
        "tasks": tasks,
    })))
}

async fn balances(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let address = params
        .get("address")
        .cloned()
        .unwrap_or_else(|| session.0.account_id.clone());
    if address != session.0.account_id {
        return Err(GatewayError::AddressMismatch {
            field: MismatchField::Address,
        }
        .into());
    }
    let storage = state.gateway.storage()?;
    let assets = assets::supported_assets();
    let mut balances = Vec::with_capacity(assets.len());
    for asset in &assets {
        balances.push(json!({
            "asset_id": asset.asset_id,
            "balance": store::get_wallet_balance(storage.conn(), &address, asset.asset_id)?,
        }));
    }
    Ok(Json(json!({
        "address": address,
        "assets": assets,
        "balances": balances,
    })))
}

async fn transfers(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let address = params
        .get("address")
        .cloned()
        .unwrap_or_else(|| session.0.account_id.clone());
    if address != session.0.account_id {
        return Err(GatewayError::AddressMismatch {
            field: MismatchField::Address,
        }
        .into());
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
        "SELECT wt.transfer_id, wt.from_address, wt.to_address, wt.asset_id, wt.amount,
                wt.fee_total, wt.treasury_address, wt.run_id,
                r.state_hash, r.receipt_hashes, r.replay_ok
         FROM wallet_transfers wt
         LEFT JOIN receipts r ON r.run_id = wt.run_id
         WHERE wt.from_address = ?1 OR wt.to_address = ?1
         ORDER BY wt.rowid DESC LIMIT ?2 OFFSET ?3",
        &[&address, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(Json(json!({
        "address": address,
        "transfers": rows,
        "limit": limit,
        "offset": offset,
    })))
}

async fn balance_legacy(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let address = params.get("address").cloned().unwrap_or_default();
    let asset_id = params
        .get("asset_id")
        .cloned()
        .unwrap_or_else(|| "NYXT".to_string());
    let balance = state.gateway.fetch_wallet_balance(&address, &asset_id)?;
    Ok(Json(json!({"address": address, "balance": balance})))
}
