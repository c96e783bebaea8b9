//! Per-action payload validation.
//!
//! Each mutating action gets a typed DTO. The DTO keeps the caller's
//! untouched extra fields so the evidence payload (normalized keys merged
//! over the caller's object) hashes exactly like the request that was
//! validated.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::assets::is_supported_asset;
use crate::error::{GatewayError, Result};

pub const MAX_AMOUNT: i64 = 1_000_000;
pub const MAX_PRICE: i64 = 1_000_000;

pub const ENTERTAINMENT_MODES: &[&str] = &["pulse", "drift", "scan"];

static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("regex"));

fn field<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    payload.get(key)
}

fn non_empty_str<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub fn require_text(payload: &Map<String, Value>, key: &str, max_len: usize) -> Result<String> {
    let Some(value) = non_empty_str(field(payload, key)) else {
        return Err(GatewayError::param_required(key));
    };
    let value = value.trim();
    if value.len() > max_len {
        return Err(GatewayError::param_invalid(key, format!("{key} too long")));
    }
    if !ADDRESS_PATTERN.is_match(value) {
        return Err(GatewayError::param_invalid(key, format!("{key} invalid")));
    }
    Ok(value.to_string())
}

pub fn validate_address_text(value: Option<&Value>, name: &str) -> Result<String> {
    let Some(text) = non_empty_str(value) else {
        return Err(GatewayError::bad_request(format!("{name} required")));
    };
    let text = text.trim();
    if !ADDRESS_PATTERN.is_match(text) {
        return Err(GatewayError::bad_request(format!("{name} invalid")));
    }
    Ok(text.to_string())
}

pub fn require_address(payload: &Map<String, Value>, key: &str) -> Result<String> {
    validate_address_text(field(payload, key), key)
}

pub fn require_amount(payload: &Map<String, Value>, key: &str, max_value: i64) -> Result<i64> {
    let Some(value) = field(payload, key) else {
        return Err(GatewayError::bad_request(format!("{key} must be int")));
    };
    let Some(amount) = value.as_i64() else {
        return Err(GatewayError::bad_request(format!("{key} must be int")));
    };
    if amount <= 0 || amount > max_value {
        return Err(GatewayError::bad_request(format!("{key} out of bounds")));
    }
    Ok(amount)
}

pub fn require_int(
    payload: &Map<String, Value>,
    key: &str,
    min_value: i64,
    max_value: Option<i64>,
) -> Result<i64> {
    let Some(value) = field(payload, key) else {
        return Err(GatewayError::bad_request(format!("{key} must be int")));
    };
    let Some(int) = value.as_i64() else {
        return Err(GatewayError::bad_request(format!("{key} must be int")));
    };
    if int < min_value {
        return Err(GatewayError::bad_request(format!("{key} out of bounds")));
    }
    if let Some(max) = max_value {
        if int > max {
            return Err(GatewayError::bad_request(format!("{key} out of bounds")));
        }
    }
    Ok(int)
}

/// Defaults to NYXT when absent.
pub fn require_asset_id(payload: &Map<String, Value>, key: &str) -> Result<String> {
    let value = match field(payload, key) {
        None | Some(Value::Null) => return Ok("NYXT".to_string()),
        Some(value) => value,
    };
    let Some(asset_id) = non_empty_str(Some(value)) else {
        return Err(GatewayError::bad_request(format!("{key} required")));
    };
    let asset_id = asset_id.trim();
    if !is_supported_asset(asset_id) {
        return Err(GatewayError::bad_request(format!("{key} unsupported")));
    }
    Ok(asset_id.to_string())
}

fn merge(original: &Map<String, Value>, normalized: &[(&str, Value)]) -> Map<String, Value> {
    let mut out = original.clone();
    for (key, value) in normalized {
        out.insert((*key).to_string(), value.clone());
    }
    out
}

// ── Wallet ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransferPayload {
    pub from_address: String,
    pub to_address: String,
    pub amount: i64,
    pub asset_id: String,
    normalized: Map<String, Value>,
}

impl TransferPayload {
    pub fn evidence_payload(&self) -> Value {
        Value::Object(self.normalized.clone())
    }
}

pub fn validate_wallet_transfer(payload: &Map<String, Value>) -> Result<TransferPayload> {
    let from_address = require_address(payload, "from_address")?;
    let to_address = require_address(payload, "to_address")?;
    let amount = require_amount(payload, "amount", MAX_AMOUNT)?;
    let asset_id = require_asset_id(payload, "asset_id")?;
    let normalized = merge(
        payload,
        &[
            ("from_address", Value::from(from_address.clone())),
            ("to_address", Value::from(to_address.clone())),
            ("amount", Value::from(amount)),
            ("asset_id", Value::from(asset_id.clone())),
        ],
    );
    Ok(TransferPayload {
        from_address,
        to_address,
        amount,
        asset_id,
        normalized,
    })
}

#[derive(Debug, Clone)]
pub struct FaucetPayload {
    pub address: String,
    pub amount: i64,
    pub asset_id: String,
    normalized: Map<String, Value>,
}

impl FaucetPayload {
    pub fn evidence_payload(&self) -> Value {
        Value::Object(self.normalized.clone())
    }
}

pub fn validate_wallet_faucet(payload: &Map<String, Value>) -> Result<FaucetPayload> {
    let address = require_address(payload, "address")?;
    let amount = require_amount(payload, "amount", MAX_AMOUNT)?;
    let asset_id = require_asset_id(payload, "asset_id")?;
    let normalized = merge(
        payload,
        &[
            ("address", Value::from(address.clone())),
            ("amount", Value::from(amount)),
            ("asset_id", Value::from(asset_id.clone())),
        ],
    );
    Ok(FaucetPayload {
        address,
        amount,
        asset_id,
        normalized,
    })
}

// ── Exchange ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrderPayload {
    pub side: String,
    pub amount: i64,
    pub price: i64,
    pub asset_in: String,
    pub asset_out: String,
    pub owner_address: String,
    normalized: Map<String, Value>,
}

impl OrderPayload {
    pub fn evidence_payload(&self) -> Value {
        Value::Object(self.normalized.clone())
    }
}

pub fn validate_place_order(payload: &Map<String, Value>) -> Result<OrderPayload> {
    for key in ["side", "amount", "price", "asset_in", "asset_out", "owner_address"] {
        if !payload.contains_key(key) {
            return Err(GatewayError::bad_request(format!("{key} required")));
        }
    }
    let side = field(payload, "side")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase();
    if side != "BUY" && side != "SELL" {
        return Err(GatewayError::bad_request("side invalid"));
    }
    let amount = require_int(payload, "amount", 1, Some(MAX_AMOUNT))?;
    let price = require_int(payload, "price", 1, Some(MAX_PRICE))?;
    let asset_in = require_asset_id(payload, "asset_in")?;
    let asset_out = require_asset_id(payload, "asset_out")?;
    let owner_address = validate_address_text(field(payload, "owner_address"), "owner_address")?;
    let normalized = merge(
        payload,
        &[
            ("side", Value::from(side.clone())),
            ("amount", Value::from(amount)),
            ("price", Value::from(price)),
            ("asset_in", Value::from(asset_in.clone())),
            ("asset_out", Value::from(asset_out.clone())),
            ("owner_address", Value::from(owner_address.clone())),
        ],
    );
    Ok(OrderPayload {
        side,
        amount,
        price,
        asset_in,
        asset_out,
        owner_address,
        normalized,
    })
}

#[derive(Debug, Clone)]
pub struct CancelPayload {
    pub order_id: String,
}

impl CancelPayload {
    pub fn evidence_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("order_id".to_string(), Value::from(self.order_id.clone()));
        Value::Object(map)
    }
}

pub fn validate_cancel(payload: &Map<String, Value>) -> Result<CancelPayload> {
    let Some(order_id) = non_empty_str(field(payload, "order_id")) else {
        return Err(GatewayError::bad_request("order_id required"));
    };
    Ok(CancelPayload {
        order_id: order_id.trim().to_string(),
    })
}

// ── Chat ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatPayload {
    pub channel: String,
    pub message: String,
}

impl ChatPayload {
    pub fn evidence_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("channel".to_string(), Value::from(self.channel.clone()));
        map.insert("message".to_string(), Value::from(self.message.clone()));
        Value::Object(map)
    }
}

/// The gateway only ever stores opaque E2EE envelopes: the message must be
/// a JSON object carrying non-empty `ciphertext` and `iv` strings.
pub fn validate_chat_payload(payload: &Map<String, Value>) -> Result<ChatPayload> {
    let Some(channel) = non_empty_str(field(payload, "channel")) else {
        return Err(GatewayError::bad_request("channel required"));
    };
    let Some(message) = non_empty_str(field(payload, "message")) else {
        return Err(GatewayError::bad_request("message required"));
    };
    if channel.len() > 64 {
        return Err(GatewayError::bad_request("channel too long"));
    }
    if message.len() > 2000 {
        return Err(GatewayError::bad_request("message too long"));
    }
    validate_e2ee_envelope(message)?;
    Ok(ChatPayload {
        channel: channel.to_string(),
        message: message.to_string(),
    })
}

pub fn validate_e2ee_envelope(message: &str) -> Result<()> {
    let parsed: Value = serde_json::from_str(message)
        .map_err(|_| GatewayError::bad_request("message must be e2ee json"))?;
    let Some(object) = parsed.as_object() else {
        return Err(GatewayError::bad_request("message must be e2ee json"));
    };
    if non_empty_str(object.get("ciphertext")).is_none() {
        return Err(GatewayError::bad_request("message missing ciphertext"));
    }
    if non_empty_str(object.get("iv")).is_none() {
        return Err(GatewayError::bad_request("message missing iv"));
    }
    Ok(())
}

// ── Marketplace ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ListingPayload {
    pub publisher_id: String,
    pub sku: String,
    pub title: String,
    pub price: i64,
    normalized: Map<String, Value>,
}

impl ListingPayload {
    pub fn evidence_payload(&self) -> Value {
        Value::Object(self.normalized.clone())
    }
}

pub fn validate_listing_payload(payload: &Map<String, Value>) -> Result<ListingPayload> {
    for key in ["publisher_id", "sku", "title", "price"] {
        if !payload.contains_key(key) {
            return Err(GatewayError::bad_request(format!("{key} required")));
        }
    }
    let publisher_id = validate_address_text(field(payload, "publisher_id"), "publisher_id")?;
    let sku = field(payload, "sku")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let title = field(payload, "title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let price = require_int(payload, "price", 1, Some(MAX_AMOUNT))?;
    if sku.is_empty() || sku.len() > 64 {
        return Err(GatewayError::bad_request("sku invalid"));
    }
    if title.is_empty() || title.len() > 128 {
        return Err(GatewayError::bad_request("title invalid"));
    }
    let normalized = merge(
        payload,
        &[
            ("publisher_id", Value::from(publisher_id.clone())),
            ("sku", Value::from(sku.clone())),
            ("title", Value::from(title.clone())),
            ("price", Value::from(price)),
        ],
    );
    Ok(ListingPayload {
        publisher_id,
        sku,
        title,
        price,
        normalized,
    })
}

#[derive(Debug, Clone)]
pub struct PurchasePayload {
    pub listing_id: String,
    pub buyer_id: String,
    pub qty: i64,
    normalized: Map<String, Value>,
}

impl PurchasePayload {
    pub fn evidence_payload(&self) -> Value {
        Value::Object(self.normalized.clone())
    }
}

pub fn validate_purchase_payload(payload: &Map<String, Value>) -> Result<PurchasePayload> {
    for key in ["listing_id", "buyer_id", "qty"] {
        if !payload.contains_key(key) {
            return Err(GatewayError::bad_request(format!("{key} required")));
        }
    }
    let listing_id = field(payload, "listing_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let buyer_id = validate_address_text(field(payload, "buyer_id"), "buyer_id")?;
    let qty = require_int(payload, "qty", 1, Some(100))?;
    if listing_id.is_empty() || listing_id.len() > 128 {
        return Err(GatewayError::bad_request("listing_id invalid"));
    }
    let normalized = merge(
        payload,
        &[
            ("listing_id", Value::from(listing_id.clone())),
            ("buyer_id", Value::from(buyer_id.clone())),
            ("qty", Value::from(qty)),
        ],
    );
    Ok(PurchasePayload {
        listing_id,
        buyer_id,
        qty,
        normalized,
    })
}

// ── Entertainment ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EntertainmentPayload {
    pub item_id: String,
    pub mode: String,
    pub step: i64,
}

impl EntertainmentPayload {
    pub fn evidence_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("item_id".to_string(), Value::from(self.item_id.clone()));
        map.insert("mode".to_string(), Value::from(self.mode.clone()));
        map.insert("step".to_string(), Value::from(self.step));
        Value::Object(map)
    }
}

pub fn validate_entertainment_payload(payload: &Map<String, Value>) -> Result<EntertainmentPayload> {
    let Some(item_id) = non_empty_str(field(payload, "item_id")) else {
        return Err(GatewayError::bad_request("item_id required"));
    };
    let mode = field(payload, "mode").and_then(Value::as_str).unwrap_or_default();
    if !ENTERTAINMENT_MODES.contains(&mode) {
        return Err(GatewayError::bad_request("mode invalid"));
    }
    let Some(step_value) = field(payload, "step") else {
        return Err(GatewayError::bad_request("step must be int"));
    };
    let Some(step) = step_value.as_i64() else {
        return Err(GatewayError::bad_request("step must be int"));
    };
    Ok(EntertainmentPayload {
        item_id: item_id.to_string(),
        mode: mode.to_string(),
        step,
    })
}
