//! Relational store over an embedded SQLite file.
//!
//! The schema is applied on every open. Statement timing is reported to the
//! metrics sink through the connection profile hook. Writes performed inside
//! the transactional executor go through a caller-held
//! [`rusqlite::Transaction`]; everything else autocommits.

mod migrations;
pub mod types;

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::identifiers::wallet_address as derive_wallet_address;
use crate::metrics;

pub use types::*;

pub struct Storage {
    conn: Connection,
}

fn profile_hook(sql: &str, duration: Duration) {
    metrics::record_db_query(sql, duration);
}

impl Storage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(db_path)?;
        conn.profile(Some(profile_hook));
        migrations::apply_migrations(&conn)?;
        // SQLite serialises writers; bump the busy timeout so concurrent
        // handlers queue instead of failing.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

// ── Row → JSON helpers ──────────────────────────────────────────────────────

fn value_ref_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(hex::encode(bytes)),
    }
}

/// Run an arbitrary SELECT and return each row as a JSON object keyed by
/// column name. Domain modules use this for their bespoke joins.
pub fn query_json(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let rows = stmt.query_map(params, move |row| {
        let mut map = Map::new();
        for (idx, name) in column_names.iter().enumerate() {
            map.insert(name.clone(), value_ref_to_json(row.get_ref(idx)?));
        }
        Ok(Value::Object(map))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Decode the stored `receipt_hashes` JSON column and normalise `replay_ok`
/// to a boolean, in place.
pub fn decode_receipt_fields(record: &mut Value) {
    if let Some(map) = record.as_object_mut() {
        if let Some(raw) = map.get("receipt_hashes").and_then(Value::as_str) {
            let hashes: Value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::Array(Vec::new()));
            map.insert("receipt_hashes".to_string(), hashes);
        }
        if let Some(flag) = map.get("replay_ok") {
            let as_bool = flag.as_i64().map(|v| v != 0).or(flag.as_bool()).unwrap_or(false);
            map.insert("replay_ok".to_string(), Value::Bool(as_bool));
        }
    }
}

fn encode_hashes(hashes: &[String]) -> Result<String> {
    if hashes.is_empty() {
        return Err(GatewayError::bad_request("receipt_hashes required"));
    }
    Ok(serde_json::to_string(hashes).unwrap_or_else(|_| "[]".to_string()))
}

pub fn validate_limit(limit: i64, max: i64) -> Result<i64> {
    validate_int(limit, "limit", 1, Some(max))
}

pub fn validate_offset(offset: i64) -> Result<i64> {
    validate_int(offset, "offset", 0, None)
}

// ── Evidence / receipts / fees ──────────────────────────────────────────────

pub fn insert_evidence_run(conn: &Connection, record: &EvidenceRun) -> Result<()> {
    let run_id = validate_text(&record.run_id, "run_id")?;
    let module = validate_text(&record.module, "module")?;
    let action = validate_text(&record.action, "action")?;
    let seed = validate_int(record.seed, "seed", 0, None)?;
    let state_hash = validate_state_hash(&record.state_hash, "state_hash")?;
    let receipt_hashes = encode_hashes(&record.receipt_hashes)?;
    conn.execute(
        "INSERT OR REPLACE INTO evidence_runs
         (run_id, module, action, seed, state_hash, receipt_hashes, replay_ok)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id,
            module,
            action,
            seed,
            state_hash,
            receipt_hashes,
            record.replay_ok as i64
        ],
    )?;
    Ok(())
}

pub fn insert_receipt(conn: &Connection, receipt: &Receipt) -> Result<()> {
    let receipt_id = validate_text(&receipt.receipt_id, "receipt_id")?;
    let module = validate_text(&receipt.module, "module")?;
    let action = validate_text(&receipt.action, "action")?;
    let state_hash = validate_state_hash(&receipt.state_hash, "state_hash")?;
    let receipt_hashes = encode_hashes(&receipt.receipt_hashes)?;
    let run_id = validate_text(&receipt.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO receipts
         (receipt_id, module, action, state_hash, receipt_hashes, replay_ok, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            receipt_id,
            module,
            action,
            state_hash,
            receipt_hashes,
            receipt.replay_ok as i64,
            run_id
        ],
    )?;
    Ok(())
}

pub fn list_receipts(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 500)?;
    let offset = validate_offset(offset)?;
    let mut rows = query_json(
        conn,
        "SELECT receipt_id, module, action, state_hash, receipt_hashes, replay_ok, run_id
         FROM receipts ORDER BY receipt_id ASC LIMIT ?1 OFFSET ?2",
        &[&limit, &offset],
    )?;
    for row in rows.iter_mut() {
        decode_receipt_fields(row);
    }
    Ok(rows)
}

pub fn insert_fee_ledger(conn: &Connection, record: &FeeLedgerRecord) -> Result<()> {
    let fee_id = validate_text(&record.fee_id, "fee_id")?;
    let module = validate_text(&record.module, "module")?;
    let action = validate_text(&record.action, "action")?;
    let protocol_fee_total = validate_int(record.protocol_fee_total, "protocol_fee_total", 1, None)?;
    let platform_fee_amount =
        validate_int(record.platform_fee_amount, "platform_fee_amount", 0, None)?;
    let total_paid = validate_int(record.total_paid, "total_paid", 1, None)?;
    let fee_address = validate_text(&record.fee_address, "fee_address")?;
    let run_id = validate_text(&record.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO fee_ledger
         (fee_id, module, action, protocol_fee_total, platform_fee_amount, total_paid, fee_address, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            fee_id,
            module,
            action,
            protocol_fee_total,
            platform_fee_amount,
            total_paid,
            fee_address,
            run_id
        ],
    )?;
    Ok(())
}

// ── Portal accounts / challenges / sessions ─────────────────────────────────

pub fn insert_portal_account(conn: &Connection, account: &PortalAccount) -> Result<()> {
    let account_id = validate_wallet_address(&account.account_id, "account_id")?;
    let handle = validate_handle(&account.handle, "handle")?;
    let public_key = validate_public_key(&account.public_key, "public_key")?;
    let wallet_address = validate_wallet_address(&account.wallet_address, "wallet_address")?;
    let created_at = validate_int(account.created_at, "created_at", 1, None)?;
    let status = validate_status_short(&account.status, "status")?;
    if let Some(bio) = &account.bio {
        if bio.len() > 256 {
            return Err(GatewayError::bad_request("bio too long"));
        }
    }
    conn.execute(
        "INSERT INTO portal_accounts
         (account_id, handle, public_key, wallet_address, created_at, status, bio)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            account_id,
            handle,
            public_key,
            wallet_address,
            created_at,
            status,
            account.bio
        ],
    )?;
    Ok(())
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortalAccount> {
    Ok(PortalAccount {
        account_id: row.get(0)?,
        handle: row.get(1)?,
        public_key: row.get(2)?,
        wallet_address: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created_at: row.get(4)?,
        status: row.get(5)?,
        bio: row.get(6)?,
    })
}

/// Accounts created before the wallet_address column existed get it derived
/// and backfilled on first read.
fn backfill_wallet_address(conn: &Connection, account: &mut PortalAccount) -> Result<()> {
    if account.wallet_address.is_empty() {
        account.wallet_address = derive_wallet_address(&account.account_id);
        conn.execute(
            "UPDATE portal_accounts SET wallet_address = ?1 WHERE account_id = ?2",
            params![account.wallet_address, account.account_id],
        )?;
    }
    Ok(())
}

pub fn load_portal_account(conn: &Connection, account_id: &str) -> Result<Option<PortalAccount>> {
    let account_id = validate_wallet_address(account_id, "account_id")?;
    let account = conn
        .query_row(
            "SELECT account_id, handle, public_key, wallet_address, created_at, status, bio
             FROM portal_accounts WHERE account_id = ?1",
            params![account_id],
            account_from_row,
        )
        .optional()?;
    match account {
        Some(mut account) => {
            backfill_wallet_address(conn, &mut account)?;
            Ok(Some(account))
        }
        None => Ok(None),
    }
}

pub fn load_portal_account_by_handle(conn: &Connection, handle: &str) -> Result<Option<PortalAccount>> {
    let handle = validate_handle(handle, "handle")?;
    let account = conn
        .query_row(
            "SELECT account_id, handle, public_key, wallet_address, created_at, status, bio
             FROM portal_accounts WHERE handle = ?1",
            params![handle],
            account_from_row,
        )
        .optional()?;
    match account {
        Some(mut account) => {
            backfill_wallet_address(conn, &mut account)?;
            Ok(Some(account))
        }
        None => Ok(None),
    }
}

pub fn insert_portal_challenge(conn: &Connection, challenge: &PortalChallenge) -> Result<()> {
    let account_id = validate_wallet_address(&challenge.account_id, "account_id")?;
    let nonce = validate_nonce(&challenge.nonce, "nonce")?;
    let expires_at = validate_int(challenge.expires_at, "expires_at", 1, None)?;
    conn.execute(
        "INSERT INTO portal_challenges (account_id, nonce, expires_at, used) VALUES (?1, ?2, ?3, ?4)",
        params![account_id, nonce, expires_at, challenge.used as i64],
    )?;
    Ok(())
}

/// Load a challenge and mark it used in the same call. A challenge that was
/// already used is returned with `used = true` so the caller can reject
/// replays explicitly.
pub fn consume_portal_challenge(
    conn: &Connection,
    account_id: &str,
    nonce: &str,
) -> Result<Option<PortalChallenge>> {
    let account_id = validate_wallet_address(account_id, "account_id")?;
    let nonce = validate_nonce(nonce, "nonce")?;
    let challenge = conn
        .query_row(
            "SELECT account_id, nonce, expires_at, used FROM portal_challenges
             WHERE account_id = ?1 AND nonce = ?2",
            params![account_id, nonce],
            |row| {
                Ok(PortalChallenge {
                    account_id: row.get(0)?,
                    nonce: row.get(1)?,
                    expires_at: row.get(2)?,
                    used: row.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()?;
    let Some(challenge) = challenge else {
        return Ok(None);
    };
    if !challenge.used {
        conn.execute(
            "UPDATE portal_challenges SET used = 1 WHERE account_id = ?1 AND nonce = ?2",
            params![account_id, nonce],
        )?;
    }
    Ok(Some(challenge))
}

pub fn insert_portal_session(conn: &Connection, session: &PortalSession) -> Result<()> {
    let token = validate_portal_token(&session.token, "token")?;
    let account_id = validate_wallet_address(&session.account_id, "account_id")?;
    let expires_at = validate_int(session.expires_at, "expires_at", 1, None)?;
    conn.execute(
        "INSERT INTO portal_sessions (token, account_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, account_id, expires_at],
    )?;
    Ok(())
}

pub fn load_portal_session(conn: &Connection, token: &str) -> Result<Option<PortalSession>> {
    let token = validate_portal_token(token, "token")?;
    Ok(conn
        .query_row(
            "SELECT token, account_id, expires_at FROM portal_sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(PortalSession {
                    token: row.get(0)?,
                    account_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn delete_portal_session(conn: &Connection, token: &str) -> Result<()> {
    let token = validate_portal_token(token, "token")?;
    conn.execute("DELETE FROM portal_sessions WHERE token = ?1", params![token])?;
    Ok(())
}

// ── Chat rooms and hash-chained messages ────────────────────────────────────

pub fn insert_chat_room(conn: &Connection, room: &ChatRoom) -> Result<()> {
    let room_id = validate_wallet_address(&room.room_id, "room_id")?;
    let name = validate_room_name(&room.name, "name")?;
    let created_at = validate_int(room.created_at, "created_at", 1, None)?;
    conn.execute(
        "INSERT OR REPLACE INTO chat_rooms (room_id, name, created_at, is_public)
         VALUES (?1, ?2, ?3, ?4)",
        params![room_id, name, created_at, room.is_public as i64],
    )?;
    Ok(())
}

pub fn list_chat_rooms(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 500)?;
    let offset = validate_offset(offset)?;
    query_json(
        conn,
        "SELECT room_id, name, created_at, is_public FROM chat_rooms
         ORDER BY created_at ASC, room_id ASC LIMIT ?1 OFFSET ?2",
        &[&limit, &offset],
    )
}

pub fn search_chat_rooms(conn: &Connection, query: &str, limit: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 500)?;
    let pattern = format!("%{query}%");
    query_json(
        conn,
        "SELECT room_id, name, created_at, is_public FROM chat_rooms
         WHERE name LIKE ?1 ORDER BY created_at ASC LIMIT ?2",
        &[&pattern, &limit],
    )
}

pub fn insert_chat_message(conn: &Connection, message: &ChatMessage) -> Result<()> {
    let message_id = validate_wallet_address(&message.message_id, "message_id")?;
    let room_id = validate_wallet_address(&message.room_id, "room_id")?;
    let sender = validate_wallet_address(&message.sender_account_id, "sender_account_id")?;
    let body = validate_message_body(&message.body, "body")?;
    let seq = validate_int(message.seq, "seq", 1, None)?;
    let prev_digest = validate_state_hash(&message.prev_digest, "prev_digest")?;
    let msg_digest = validate_state_hash(&message.msg_digest, "msg_digest")?;
    let chain_head = validate_state_hash(&message.chain_head, "chain_head")?;
    let created_at = validate_int(message.created_at, "created_at", 1, None)?;
    conn.execute(
        "INSERT OR REPLACE INTO chat_messages
         (message_id, room_id, sender_account_id, body, seq, prev_digest, msg_digest, chain_head, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            message_id,
            room_id,
            sender,
            body,
            seq,
            prev_digest,
            msg_digest,
            chain_head,
            created_at
        ],
    )?;
    Ok(())
}

/// Latest (seq, chain_head) for a room, if any messages exist.
pub fn last_chat_message(conn: &Connection, room_id: &str) -> Result<Option<(i64, String)>> {
    let room_id = validate_wallet_address(room_id, "room_id")?;
    Ok(conn
        .query_row(
            "SELECT seq, chain_head FROM chat_messages WHERE room_id = ?1
             ORDER BY seq DESC LIMIT 1",
            params![room_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

pub fn list_chat_messages(
    conn: &Connection,
    room_id: &str,
    after: Option<i64>,
    limit: i64,
) -> Result<Vec<Value>> {
    let room_id = validate_wallet_address(room_id, "room_id")?;
    let limit = validate_limit(limit, 500)?;
    match after {
        Some(after) => {
            let after = validate_int(after, "after", 0, None)?;
            query_json(
                conn,
                "SELECT message_id, room_id, sender_account_id, body, seq, prev_digest, msg_digest, chain_head, created_at
                 FROM chat_messages WHERE room_id = ?1 AND seq > ?2
                 ORDER BY seq ASC, message_id ASC LIMIT ?3",
                &[&room_id, &after, &limit],
            )
        }
        None => query_json(
            conn,
            "SELECT message_id, room_id, sender_account_id, body, seq, prev_digest, msg_digest, chain_head, created_at
             FROM chat_messages WHERE room_id = ?1
             ORDER BY seq ASC, message_id ASC LIMIT ?2",
            &[&room_id, &limit],
        ),
    }
}

// ── Orders and trades ───────────────────────────────────────────────────────

pub const ORDER_BY_PRICE_ASC: &str = "price ASC, order_id ASC";
pub const ORDER_BY_PRICE_DESC: &str = "price DESC, order_id ASC";

pub fn insert_order(conn: &Connection, order: &Order) -> Result<()> {
    let order_id = validate_text(&order.order_id, "order_id")?;
    let owner_address = validate_wallet_address(&order.owner_address, "owner_address")?;
    let side = validate_side(&order.side)?;
    let amount = validate_int(order.amount, "amount", 1, None)?;
    let price = validate_int(order.price, "price", 1, None)?;
    let asset_in = validate_text(&order.asset_in, "asset_in")?;
    let asset_out = validate_text(&order.asset_out, "asset_out")?;
    let run_id = validate_text(&order.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO orders
         (order_id, owner_address, side, amount, price, asset_in, asset_out, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![order_id, owner_address, side, amount, price, asset_in, asset_out, run_id],
    )?;
    Ok(())
}

pub fn update_order_amount(conn: &Connection, order_id: &str, new_amount: i64) -> Result<()> {
    let order_id = validate_text(order_id, "order_id")?;
    let amount = validate_int(new_amount, "amount", 0, None)?;
    conn.execute(
        "UPDATE orders SET amount = ?1 WHERE order_id = ?2",
        params![amount, order_id],
    )?;
    Ok(())
}

pub fn update_order_status(conn: &Connection, order_id: &str, status: &str) -> Result<()> {
    let order_id = validate_text(order_id, "order_id")?;
    let status = validate_order_status(status)?;
    conn.execute(
        "UPDATE orders SET status = ?1 WHERE order_id = ?2",
        params![status, order_id],
    )?;
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct OrderFilter<'a> {
    pub side: Option<&'a str>,
    pub asset_in: Option<&'a str>,
    pub asset_out: Option<&'a str>,
    /// `None` means no status clause at all ("all").
    pub status: Option<&'a str>,
}

pub fn list_orders(
    conn: &Connection,
    filter: &OrderFilter<'_>,
    order_by: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    if order_by != ORDER_BY_PRICE_ASC && order_by != ORDER_BY_PRICE_DESC {
        return Err(GatewayError::bad_request("order_by not allowed"));
    }
    let mut clauses: Vec<&str> = Vec::new();
    let mut owned: Vec<String> = Vec::new();
    if let Some(side) = filter.side {
        clauses.push("side = ?");
        owned.push(validate_side(side)?);
    }
    if let Some(asset_in) = filter.asset_in {
        clauses.push("asset_in = ?");
        owned.push(validate_text(asset_in, "asset_in")?);
    }
    if let Some(asset_out) = filter.asset_out {
        clauses.push("asset_out = ?");
        owned.push(validate_text(asset_out, "asset_out")?);
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        owned.push(validate_order_status(status)?);
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT * FROM orders {where_clause} ORDER BY {order_by} LIMIT ? OFFSET ?");
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    for value in owned.iter() {
        params.push(value);
    }
    params.push(&limit);
    params.push(&offset);
    query_json(conn, &sql, &params)
}

pub fn insert_trade(conn: &Connection, trade: &Trade) -> Result<()> {
    let trade_id = validate_text(&trade.trade_id, "trade_id")?;
    let order_id = validate_text(&trade.order_id, "order_id")?;
    let amount = validate_int(trade.amount, "amount", 1, None)?;
    let price = validate_int(trade.price, "price", 1, None)?;
    let run_id = validate_text(&trade.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO trades (trade_id, order_id, amount, price, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![trade_id, order_id, amount, price, run_id],
    )?;
    Ok(())
}

pub fn list_trades(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    query_json(
        conn,
        "SELECT * FROM trades ORDER BY trade_id ASC LIMIT ?1 OFFSET ?2",
        &[&limit, &offset],
    )
}

// ── Legacy channel message events ───────────────────────────────────────────

pub fn insert_message_event(conn: &Connection, message: &MessageEvent) -> Result<()> {
    let message_id = validate_text(&message.message_id, "message_id")?;
    let channel = validate_text(&message.channel, "channel")?;
    let sender = validate_wallet_address(&message.sender_account_id, "sender_account_id")?;
    if message.body.is_empty() {
        return Err(GatewayError::bad_request("body required"));
    }
    if message.body.len() > 2048 {
        return Err(GatewayError::bad_request("body too long"));
    }
    let run_id = validate_text(&message.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO messages (message_id, channel, sender_account_id, body, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![message_id, channel, sender, message.body, run_id],
    )?;
    Ok(())
}

// ── Marketplace ─────────────────────────────────────────────────────────────

pub fn insert_listing(conn: &Connection, listing: &Listing) -> Result<()> {
    let listing_id = validate_text(&listing.listing_id, "listing_id")?;
    let publisher_id = validate_text(&listing.publisher_id, "publisher_id")?;
    let sku = validate_text(&listing.sku, "sku")?;
    if listing.title.is_empty() {
        return Err(GatewayError::bad_request("title required"));
    }
    if listing.title.len() > 128 {
        return Err(GatewayError::bad_request("title too long"));
    }
    let price = validate_int(listing.price, "price", 1, None)?;
    let status = validate_listing_status(&listing.status)?;
    let run_id = validate_text(&listing.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO listings
         (listing_id, publisher_id, sku, title, price, status, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![listing_id, publisher_id, sku, listing.title, price, status, run_id],
    )?;
    Ok(())
}

pub fn list_listings(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    query_json(
        conn,
        "SELECT * FROM listings WHERE status = 'active' ORDER BY listing_id ASC LIMIT ?1 OFFSET ?2",
        &[&limit, &offset],
    )
}

pub fn insert_purchase(conn: &Connection, purchase: &Purchase) -> Result<()> {
    let purchase_id = validate_text(&purchase.purchase_id, "purchase_id")?;
    let listing_id = validate_text(&purchase.listing_id, "listing_id")?;
    let buyer_id = validate_text(&purchase.buyer_id, "buyer_id")?;
    let qty = validate_int(purchase.qty, "qty", 1, None)?;
    let run_id = validate_text(&purchase.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO purchases (purchase_id, listing_id, buyer_id, qty, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![purchase_id, listing_id, buyer_id, qty, run_id],
    )?;
    Ok(())
}

pub fn list_purchases(
    conn: &Connection,
    listing_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    match listing_id {
        Some(listing_id) => {
            let listing_id = validate_text(listing_id, "listing_id")?;
            query_json(
                conn,
                "SELECT * FROM purchases WHERE listing_id = ?1
                 ORDER BY purchase_id ASC LIMIT ?2 OFFSET ?3",
                &[&listing_id, &limit, &offset],
            )
        }
        None => query_json(
            conn,
            "SELECT * FROM purchases ORDER BY purchase_id ASC LIMIT ?1 OFFSET ?2",
            &[&limit, &offset],
        ),
    }
}

// ── Entertainment ───────────────────────────────────────────────────────────

pub fn insert_entertainment_item(conn: &Connection, item: &EntertainmentItem) -> Result<()> {
    let item_id = validate_text(&item.item_id, "item_id")?;
    if item.title.is_empty() || item.title.len() > 128 {
        return Err(GatewayError::bad_request("title invalid"));
    }
    if item.summary.is_empty() || item.summary.len() > 256 {
        return Err(GatewayError::bad_request("summary invalid"));
    }
    let category = validate_category(&item.category, "category")?;
    conn.execute(
        "INSERT OR IGNORE INTO entertainment_items (item_id, title, summary, category)
         VALUES (?1, ?2, ?3, ?4)",
        params![item_id, item.title, item.summary, category],
    )?;
    Ok(())
}

pub fn list_entertainment_items(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    query_json(
        conn,
        "SELECT * FROM entertainment_items ORDER BY item_id ASC LIMIT ?1 OFFSET ?2",
        &[&limit, &offset],
    )
}

pub fn insert_entertainment_event(conn: &Connection, event: &EntertainmentEvent) -> Result<()> {
    let event_id = validate_text(&event.event_id, "event_id")?;
    let item_id = validate_text(&event.item_id, "item_id")?;
    let mode = validate_category(&event.mode, "mode")?;
    let step = validate_int(event.step, "step", 0, None)?;
    let run_id = validate_text(&event.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO entertainment_events (event_id, item_id, mode, step, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_id, item_id, mode, step, run_id],
    )?;
    Ok(())
}

pub fn list_entertainment_events(
    conn: &Connection,
    item_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let limit = validate_limit(limit, 1000)?;
    let offset = validate_offset(offset)?;
    match item_id {
        Some(item_id) => {
            let item_id = validate_text(item_id, "item_id")?;
            query_json(
                conn,
                "SELECT * FROM entertainment_events WHERE item_id = ?1
                 ORDER BY event_id ASC LIMIT ?2 OFFSET ?3",
                &[&item_id, &limit, &offset],
            )
        }
        None => query_json(
            conn,
            "SELECT * FROM entertainment_events ORDER BY event_id ASC LIMIT ?1 OFFSET ?2",
            &[&limit, &offset],
        ),
    }
}

// ── Wallet accounts and transfers ───────────────────────────────────────────

pub fn ensure_wallet_account(conn: &Connection, address: &str, asset_id: &str) -> Result<()> {
    let address = validate_wallet_address(address, "address")?;
    let asset = validate_asset_id(asset_id, "asset_id")?;
    conn.execute(
        "INSERT OR IGNORE INTO wallet_accounts (address, asset_id, balance) VALUES (?1, ?2, 0)",
        params![address, asset],
    )?;
    Ok(())
}

pub fn get_wallet_balance(conn: &Connection, address: &str, asset_id: &str) -> Result<i64> {
    let address = validate_wallet_address(address, "address")?;
    let asset = validate_asset_id(asset_id, "asset_id")?;
    let balance = conn
        .query_row(
            "SELECT balance FROM wallet_accounts WHERE address = ?1 AND asset_id = ?2",
            params![address, asset],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

pub fn set_wallet_balance(conn: &Connection, address: &str, balance: i64, asset_id: &str) -> Result<()> {
    let address = validate_wallet_address(address, "address")?;
    let asset = validate_asset_id(asset_id, "asset_id")?;
    let balance = validate_int(balance, "balance", 0, None)?;
    ensure_wallet_account(conn, &address, &asset)?;
    conn.execute(
        "UPDATE wallet_accounts SET balance = ?1 WHERE address = ?2 AND asset_id = ?3",
        params![balance, address, asset],
    )?;
    Ok(())
}

pub fn insert_wallet_transfer(conn: &Connection, transfer: &WalletTransfer) -> Result<()> {
    let transfer_id = validate_text(&transfer.transfer_id, "transfer_id")?;
    let from_address = validate_wallet_address(&transfer.from_address, "from_address")?;
    let to_address = validate_wallet_address(&transfer.to_address, "to_address")?;
    let asset_id = validate_asset_id(&transfer.asset_id, "asset_id")?;
    let amount = validate_int(transfer.amount, "amount", 0, None)?;
    let fee_total = validate_int(transfer.fee_total, "fee_total", 0, None)?;
    let treasury_address = validate_wallet_address(&transfer.treasury_address, "treasury_address")?;
    let run_id = validate_text(&transfer.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO wallet_transfers
         (transfer_id, from_address, to_address, asset_id, amount, fee_total, treasury_address, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            transfer_id,
            from_address,
            to_address,
            asset_id,
            amount,
            fee_total,
            treasury_address,
            run_id
        ],
    )?;
    Ok(())
}

// ── Web2 guard / faucet / airdrop rows ──────────────────────────────────────

pub fn insert_web2_guard_request(conn: &Connection, request: &Web2GuardRequest) -> Result<()> {
    let request_id = validate_text(&request.request_id, "request_id")?;
    let account_id = validate_wallet_address(&request.account_id, "account_id")?;
    let run_id = validate_text(&request.run_id, "run_id")?;
    let url = validate_url_text(&request.url, "url")?;
    if request.method != "GET" && request.method != "POST" {
        return Err(GatewayError::bad_request("method invalid"));
    }
    let request_hash = validate_hash(&request.request_hash, "request_hash")?;
    let response_hash = validate_hash(&request.response_hash, "response_hash")?;
    let response_status = validate_int(request.response_status, "response_status", 0, Some(999))?;
    let response_size = validate_int(request.response_size, "response_size", 0, Some(5_000_000))?;
    let body_size = validate_int(request.body_size, "body_size", 0, Some(5_000_000))?;
    let header_names = validate_header_names(&request.header_names)?;
    let header_json = serde_json::to_string(&header_names).unwrap_or_else(|_| "[]".to_string());
    if let Some(sealed) = &request.sealed_request {
        if sealed.len() > 4096 {
            return Err(GatewayError::bad_request("sealed_request too long"));
        }
    }
    let created_at = validate_int(request.created_at, "created_at", 1, None)?;
    conn.execute(
        "INSERT OR REPLACE INTO web2_guard_requests
         (request_id, account_id, run_id, url, method, request_hash, response_hash,
          response_status, response_size, response_truncated, body_size, header_names,
          sealed_request, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            request_id,
            account_id,
            run_id,
            url,
            request.method,
            request_hash,
            response_hash,
            response_status,
            response_size,
            request.response_truncated as i64,
            body_size,
            header_json,
            request.sealed_request,
            created_at
        ],
    )?;
    Ok(())
}

/// List guard requests for an account, newest first. The sealed request
/// payload never leaves the store; only its presence is reported.
pub fn list_web2_guard_requests(
    conn: &Connection,
    account_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let account_id = validate_wallet_address(account_id, "account_id")?;
    let limit = validate_limit(limit, 500)?;
    let offset = validate_offset(offset)?;
    let mut rows = query_json(
        conn,
        "SELECT * FROM web2_guard_requests WHERE account_id = ?1
         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        &[&account_id, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        if let Some(map) = row.as_object_mut() {
            let headers = map
                .get("header_names")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .unwrap_or_else(|| Value::Array(Vec::new()));
            map.insert("header_names".to_string(), headers);
            let truncated = map
                .get("response_truncated")
                .and_then(Value::as_i64)
                .unwrap_or(0)
                != 0;
            map.insert("response_truncated".to_string(), Value::Bool(truncated));
            let sealed_present = map
                .get("sealed_request")
                .map(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                .unwrap_or(false);
            map.remove("sealed_request");
            map.insert("sealed_request_present".to_string(), Value::Bool(sealed_present));
        }
    }
    Ok(rows)
}

pub fn insert_faucet_claim(conn: &Connection, claim: &FaucetClaim) -> Result<()> {
    let claim_id = validate_text(&claim.claim_id, "claim_id")?;
    let account_id = validate_wallet_address(&claim.account_id, "account_id")?;
    let address = validate_wallet_address(&claim.address, "address")?;
    let asset_id = validate_asset_id(&claim.asset_id, "asset_id")?;
    let amount = validate_int(claim.amount, "amount", 1, None)?;
    let ip = if claim.ip.is_empty() {
        "unknown".to_string()
    } else {
        validate_ip_text(&claim.ip, "ip")?
    };
    let created_at = validate_int(claim.created_at, "created_at", 1, None)?;
    let run_id = validate_text(&claim.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO faucet_claims
         (claim_id, account_id, address, asset_id, amount, ip, created_at, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![claim_id, account_id, address, asset_id, amount, ip, created_at, run_id],
    )?;
    Ok(())
}

pub fn insert_airdrop_claim(conn: &Connection, claim: &AirdropClaim) -> Result<()> {
    let claim_id = validate_text(&claim.claim_id, "claim_id")?;
    let account_id = validate_wallet_address(&claim.account_id, "account_id")?;
    let task_id = validate_task_id(&claim.task_id, "task_id")?;
    let reward = validate_int(claim.reward, "reward", 1, None)?;
    let created_at = validate_int(claim.created_at, "created_at", 1, None)?;
    let run_id = validate_text(&claim.run_id, "run_id")?;
    conn.execute(
        "INSERT OR REPLACE INTO airdrop_claims
         (claim_id, account_id, task_id, reward, created_at, run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![claim_id, account_id, task_id, reward, created_at, run_id],
    )?;
    Ok(())
}

// ── Generic single-row fetch ────────────────────────────────────────────────

const LOAD_BY_ID_TABLES: &[&str] = &[
    "evidence_runs",
    "orders",
    "trades",
    "messages",
    "listings",
    "purchases",
    "entertainment_items",
    "entertainment_events",
    "receipts",
    "fee_ledger",
    "web2_guard_requests",
];

static KEY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,32}$").expect("regex"));

pub fn load_by_id(conn: &Connection, table: &str, key: &str, value: &str) -> Result<Option<Value>> {
    if !LOAD_BY_ID_TABLES.contains(&table) {
        return Err(GatewayError::bad_request("table not allowed"));
    }
    if !KEY_NAME.is_match(key) {
        return Err(GatewayError::bad_request("key invalid"));
    }
    let value = validate_text(value, "value")?;
    let sql = format!("SELECT * FROM {table} WHERE {key} = ?1");
    let rows = query_json(conn, &sql, &[&value])?;
    Ok(rows.into_iter().next())
}
