//! Route modules plus the envelope/query helpers they share.

pub mod chat;
pub mod entertainment;
pub mod evidence;
pub mod exchange;
pub mod marketplace;
pub mod ops;
pub mod portal;
pub mod wallet;
pub mod web2;

use serde_json::{Map, Value, json};

use gateway_runtime::fees::route_fee;
use gateway_runtime::gateway::GatewayResult;
use gateway_runtime::settings::Settings;
use gateway_runtime::{GatewayError, Result};

/// Mutating request envelope: `{seed, run_id, payload}`. Legacy callers put
/// the action fields at the top level instead of under `payload`; those are
/// collected with `seed`/`run_id` stripped.
pub fn parse_envelope(body: &Value) -> Result<(i64, String, Map<String, Value>)> {
    let object = body
        .as_object()
        .ok_or_else(|| GatewayError::bad_request("payload must be object"))?;
    let seed = object
        .get("seed")
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::bad_request("seed must be int"))?;
    let run_id = object
        .get("run_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("run_id required"))?
        .to_string();
    let payload = match object.get("payload") {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(GatewayError::bad_request("payload must be object")),
        None => {
            let mut map = object.clone();
            map.remove("seed");
            map.remove("run_id");
            map
        }
    };
    Ok((seed, run_id, payload))
}

pub fn run_response(result: &GatewayResult) -> Value {
    json!({
        "run_id": result.run_id,
        "status": "complete",
        "state_hash": result.state_hash,
        "receipt_hashes": result.receipt_hashes,
        "replay_ok": result.replay_ok,
    })
}

pub fn fee_summary(
    settings: &Settings,
    module: &str,
    action: &str,
    payload: &Map<String, Value>,
    run_id: &str,
) -> Value {
    let record = route_fee(settings, module, action, payload, run_id);
    json!({
        "fee_total": record.total_paid,
        "fee_breakdown": {
            "protocol_fee_total": record.protocol_fee_total,
            "platform_fee_amount": record.platform_fee_amount,
        },
        "payer": "testnet-payer",
        "treasury_address": record.fee_address,
    })
}

pub fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
    base
}

/// The action's notional for risk accounting, when it has one.
pub fn payload_amount(payload: &Map<String, Value>) -> Option<i64> {
    payload.get("amount").and_then(Value::as_i64).or_else(|| {
        let price = payload.get("price").and_then(Value::as_i64)?;
        let qty = payload.get("qty").and_then(Value::as_i64).unwrap_or(1);
        Some(price.saturating_mul(qty))
    })
}

pub fn query_i64(params: &std::collections::HashMap<String, String>, key: &str, default: i64) -> Result<i64> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) if raw.is_empty() => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| GatewayError::bad_request(format!("{key} invalid"))),
    }
}
