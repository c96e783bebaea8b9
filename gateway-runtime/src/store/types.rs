//! Typed row records and the input validation they re-apply on insert.
//!
//! Inserts never trust their caller: identifiers, hashes, and amounts are
//! checked against the same restricted alphabets the HTTP validators use,
//! so a bug upstream cannot smuggle malformed data into the store.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GatewayError, Result};

static TEXT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./-]{1,128}$").expect("regex"));
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("regex"));
static HASH_64: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Fa-f0-9]{64}$").expect("regex"));
static HASH_RELAXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Fa-f0-9]{16,128}$").expect("regex"));
static PORTAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._=-]{24,512}$").expect("regex"));
static HEADER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,64}$").expect("regex"));
static ASSET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{3,12}$").expect("regex"));
static HANDLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_-]{3,24}$").expect("regex"));
static PUBKEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]{16,256}$").expect("regex"));
static NONCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Fa-f0-9]{32,128}$").expect("regex"));
static ROOM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_ -]{3,48}$").expect("regex"));
static MESSAGE_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\x00-\x08\x0B\x0C\x0E-\x1F]{1,512}$").expect("regex"));
static URL_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:/?&=._%+-]{1,512}$").expect("regex"));
static IP_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").expect("regex"));
static TASK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("regex"));
static STATUS_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,16}$").expect("regex"));
static CATEGORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("regex"));

fn invalid(name: &str) -> GatewayError {
    GatewayError::bad_request(format!("{name} invalid"))
}

fn required(name: &str) -> GatewayError {
    GatewayError::bad_request(format!("{name} required"))
}

pub fn validate_text(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &TEXT_DEFAULT)
}

fn validate_pattern(value: &str, name: &str, pattern: &Regex) -> Result<String> {
    if value.is_empty() {
        return Err(required(name));
    }
    if !pattern.is_match(value) {
        return Err(invalid(name));
    }
    Ok(value.to_string())
}

pub fn validate_int(value: i64, name: &str, min_value: i64, max_value: Option<i64>) -> Result<i64> {
    if value < min_value {
        return Err(GatewayError::bad_request(format!("{name} out of bounds")));
    }
    if let Some(max) = max_value {
        if value > max {
            return Err(GatewayError::bad_request(format!("{name} out of bounds")));
        }
    }
    Ok(value)
}

pub fn validate_wallet_address(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &ADDRESS)
}

pub fn validate_asset_id(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &ASSET)
}

pub fn validate_hash(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &HASH_64)
}

pub fn validate_state_hash(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &HASH_RELAXED)
}

pub fn validate_portal_token(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &PORTAL_TOKEN)
}

pub fn validate_handle(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &HANDLE)
}

pub fn validate_public_key(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &PUBKEY)
}

pub fn validate_nonce(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &NONCE)
}

pub fn validate_room_name(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &ROOM_NAME)
}

pub fn validate_message_body(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &MESSAGE_BODY)
}

pub fn validate_url_text(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &URL_TEXT)
}

pub fn validate_ip_text(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &IP_TEXT)
}

pub fn validate_task_id(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &TASK_ID)
}

pub fn validate_status_short(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &STATUS_SHORT)
}

pub fn validate_category(value: &str, name: &str) -> Result<String> {
    validate_pattern(value, name, &CATEGORY)
}

pub fn validate_side(value: &str) -> Result<String> {
    match value {
        "BUY" | "SELL" => Ok(value.to_string()),
        _ => Err(invalid("side")),
    }
}

pub fn validate_order_status(value: &str) -> Result<String> {
    match value {
        "open" | "filled" | "cancelled" => Ok(value.to_string()),
        _ => Err(invalid("status")),
    }
}

pub fn validate_listing_status(value: &str) -> Result<String> {
    match value {
        "active" | "sold" => Ok(value.to_string()),
        _ => Err(invalid("status")),
    }
}

pub fn validate_header_names(values: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(values.len());
    for item in values {
        out.push(validate_pattern(item, "header_names", &HEADER_NAME)?);
    }
    Ok(out)
}

// ── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EvidenceRun {
    pub run_id: String,
    pub module: String,
    pub action: String,
    pub seed: i64,
    pub state_hash: String,
    pub receipt_hashes: Vec<String>,
    pub replay_ok: bool,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub receipt_id: String,
    pub module: String,
    pub action: String,
    pub state_hash: String,
    pub receipt_hashes: Vec<String>,
    pub replay_ok: bool,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct FeeLedgerRecord {
    pub fee_id: String,
    pub module: String,
    pub action: String,
    pub protocol_fee_total: i64,
    pub platform_fee_amount: i64,
    pub total_paid: i64,
    pub fee_address: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub owner_address: String,
    pub side: String,
    pub amount: i64,
    pub price: i64,
    pub asset_in: String,
    pub asset_out: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub amount: i64,
    pub price: i64,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message_id: String,
    pub channel: String,
    pub sender_account_id: String,
    pub body: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct PortalAccount {
    pub account_id: String,
    pub handle: String,
    pub public_key: String,
    pub wallet_address: String,
    pub created_at: i64,
    pub status: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PortalChallenge {
    pub account_id: String,
    pub nonce: String,
    pub expires_at: i64,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct PortalSession {
    pub token: String,
    pub account_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct ChatRoom {
    pub room_id: String,
    pub name: String,
    pub created_at: i64,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_account_id: String,
    pub body: String,
    pub seq: i64,
    pub prev_digest: String,
    pub msg_digest: String,
    pub chain_head: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub listing_id: String,
    pub publisher_id: String,
    pub sku: String,
    pub title: String,
    pub price: i64,
    pub status: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct Purchase {
    pub purchase_id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub qty: i64,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct EntertainmentItem {
    pub item_id: String,
    pub title: String,
    pub summary: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct EntertainmentEvent {
    pub event_id: String,
    pub item_id: String,
    pub mode: String,
    pub step: i64,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct WalletTransfer {
    pub transfer_id: String,
    pub from_address: String,
    pub to_address: String,
    pub asset_id: String,
    pub amount: i64,
    pub fee_total: i64,
    pub treasury_address: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct Web2GuardRequest {
    pub request_id: String,
    pub account_id: String,
    pub run_id: String,
    pub url: String,
    pub method: String,
    pub request_hash: String,
    pub response_hash: String,
    pub response_status: i64,
    pub response_size: i64,
    pub response_truncated: bool,
    pub body_size: i64,
    pub header_names: Vec<String>,
    pub sealed_request: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct FaucetClaim {
    pub claim_id: String,
    pub account_id: String,
    pub address: String,
    pub asset_id: String,
    pub amount: i64,
    pub ip: String,
    pub created_at: i64,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct AirdropClaim {
    pub claim_id: String,
    pub account_id: String,
    pub task_id: String,
    pub reward: i64,
    pub created_at: i64,
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_alphabet() {
        assert!(validate_wallet_address("wallet-00aabbccddeeff11", "address").is_ok());
        assert!(validate_wallet_address("bad address", "address").is_err());
        assert!(validate_wallet_address("", "address").is_err());
    }

    #[test]
    fn hash_must_be_64_hex() {
        let digest = "a".repeat(64);
        assert!(validate_hash(&digest, "hash").is_ok());
        assert!(validate_hash("abc", "hash").is_err());
    }

    #[test]
    fn side_and_status_are_closed_sets() {
        assert!(validate_side("BUY").is_ok());
        assert!(validate_side("HOLD").is_err());
        assert!(validate_order_status("cancelled").is_ok());
        assert!(validate_order_status("expired").is_err());
        assert!(validate_listing_status("sold").is_ok());
        assert!(validate_listing_status("archived").is_err());
    }

    #[test]
    fn message_body_rejects_control_chars() {
        assert!(validate_message_body("{\"ciphertext\":\"x\",\"iv\":\"y\"}", "body").is_ok());
        assert!(validate_message_body("bad\x01body", "body").is_err());
    }
}
