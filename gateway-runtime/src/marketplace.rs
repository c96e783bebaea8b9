//! Marketplace executors: publish a listing, purchase it, search.
//!
//! Both mutating paths run on the executor's connection inside its
//! transaction; a purchase moves `price * qty` NYXT buyer → publisher with
//! the fee riding the same ledger call.

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::fees::{FeeQuote, route_fee};
use crate::identifiers::deterministic_id;
use crate::ledger::{self, TransferParams};
use crate::settings::Settings;
use crate::store::{self, Listing, Purchase, get_wallet_balance};
use crate::validation::{validate_listing_payload, validate_purchase_payload};

pub fn list_active_listings(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    store::list_listings(conn, limit, offset)
}

pub fn search_listings(
    conn: &Connection,
    query: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let query = query.trim();
    if query.is_empty() {
        return store::list_listings(conn, limit, offset);
    }
    if query.len() > 64 {
        return Err(GatewayError::bad_request("q too long"));
    }
    let limit = store::validate_limit(limit, 200)?;
    let offset = store::validate_offset(offset)?;
    let pattern = format!("%{query}%");
    store::query_json(
        conn,
        "SELECT * FROM listings WHERE status = 'active' AND (sku LIKE ?1 OR title LIKE ?1)
         ORDER BY listing_id ASC LIMIT ?2 OFFSET ?3",
        &[&pattern, &limit, &offset],
    )
}

/// Insert an active listing and charge the publish fee in NYXT.
pub fn publish_listing(
    conn: &Connection,
    settings: &Settings,
    run_id: &str,
    payload: &Map<String, Value>,
    caller_wallet_address: &str,
) -> Result<FeeQuote> {
    let validated = validate_listing_payload(payload)?;
    if validated.publisher_id != caller_wallet_address {
        return Err(GatewayError::bad_request("publisher_id mismatch"));
    }
    let fee = route_fee(settings, "marketplace", "listing_publish", payload, run_id);
    let nyxt_balance = get_wallet_balance(conn, caller_wallet_address, "NYXT")?;
    if nyxt_balance < fee.total_paid {
        return Err(GatewayError::InsufficientBalance(
            "insufficient NYXT balance for fee".to_string(),
        ));
    }
    store::insert_listing(
        conn,
        &Listing {
            listing_id: deterministic_id("listing", run_id),
            publisher_id: validated.publisher_id.clone(),
            sku: validated.sku.clone(),
            title: validated.title.clone(),
            price: validated.price,
            status: "active".to_string(),
            run_id: run_id.to_string(),
        },
    )?;
    ledger::apply_transfer(
        conn,
        &TransferParams {
            transfer_id: &deterministic_id("fee", run_id),
            from_address: caller_wallet_address,
            to_address: &fee.fee_address,
            asset_id: "NYXT",
            amount: 0,
            fee_total: fee.total_paid,
            treasury_address: &fee.fee_address,
            run_id,
        },
    )?;
    store::insert_fee_ledger(conn, &fee.to_record())?;
    Ok(fee)
}

/// Purchase an active listing: transfer `price * qty` NYXT to the publisher
/// plus the fee to the treasury, record the purchase, and mark the listing
/// sold.
pub fn purchase_listing(
    conn: &Connection,
    settings: &Settings,
    run_id: &str,
    payload: &Map<String, Value>,
    caller_wallet_address: &str,
) -> Result<FeeQuote> {
    let validated = validate_purchase_payload(payload)?;
    if validated.buyer_id != caller_wallet_address {
        return Err(GatewayError::bad_request("buyer_id mismatch"));
    }
    let listing = store::load_by_id(conn, "listings", "listing_id", &validated.listing_id)?
        .ok_or_else(|| GatewayError::bad_request("listing_id not found"))?;
    let status = listing
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("active");
    if status != "active" {
        return Err(GatewayError::bad_request("listing not available"));
    }
    let price = listing
        .get("price")
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::bad_request("listing row malformed"))?;
    let publisher_id = listing
        .get("publisher_id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::bad_request("listing row malformed"))?;

    let total_price = price * validated.qty;
    let fee = route_fee(settings, "marketplace", "purchase_listing", payload, run_id);
    let nyxt_balance = get_wallet_balance(conn, caller_wallet_address, "NYXT")?;
    if nyxt_balance < total_price + fee.total_paid {
        return Err(GatewayError::InsufficientBalance(
            "insufficient NYXT balance for amount + fee".to_string(),
        ));
    }

    ledger::apply_transfer(
        conn,
        &TransferParams {
            transfer_id: &deterministic_id("purchase-xfer", run_id),
            from_address: &validated.buyer_id,
            to_address: publisher_id,
            asset_id: "NYXT",
            amount: total_price,
            fee_total: fee.total_paid,
            treasury_address: &fee.fee_address,
            run_id,
        },
    )?;
    store::insert_purchase(
        conn,
        &Purchase {
            purchase_id: deterministic_id("purchase", run_id),
            listing_id: validated.listing_id.clone(),
            buyer_id: validated.buyer_id.clone(),
            qty: validated.qty,
            run_id: run_id.to_string(),
        },
    )?;
    conn.execute(
        "UPDATE listings SET status = 'sold' WHERE listing_id = ?1",
        rusqlite::params![validated.listing_id],
    )?;
    store::insert_fee_ledger(conn, &fee.to_record())?;
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::apply_faucet;
    use crate::store::Storage;
    use serde_json::json;

    fn open_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::open(&dir.path().join("market.db")).expect("open");
        (dir, storage)
    }

    fn listing_payload(publisher: &str) -> Map<String, Value> {
        json!({
            "publisher_id": publisher,
            "sku": "sku-1",
            "title": "Item One",
            "price": 10,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn publish_then_purchase_marks_sold() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        apply_faucet(conn, "publisher-1", 100, "NYXT").unwrap();
        apply_faucet(conn, "buyer-1", 100, "NYXT").unwrap();

        publish_listing(conn, &settings, "run-pub", &listing_payload("publisher-1"), "publisher-1")
            .unwrap();
        let listing_id = deterministic_id("listing", "run-pub");

        let purchase = json!({"listing_id": listing_id, "buyer_id": "buyer-1", "qty": 2})
            .as_object()
            .unwrap()
            .clone();
        let fee = purchase_listing(conn, &settings, "run-buy", &purchase, "buyer-1").unwrap();

        let row = store::load_by_id(conn, "listings", "listing_id", &listing_id)
            .unwrap()
            .unwrap();
        assert_eq!(row["status"], json!("sold"));

        // Buyer paid price*qty to the publisher plus the fee to treasury.
        assert_eq!(
            get_wallet_balance(conn, "buyer-1", "NYXT").unwrap(),
            100 - 20 - fee.total_paid
        );
        assert!(get_wallet_balance(conn, "publisher-1", "NYXT").unwrap() >= 100 + 20 - 2);

        // A sold listing cannot be purchased again.
        let err = purchase_listing(conn, &settings, "run-buy2", &purchase, "buyer-1").unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn publisher_must_match_caller() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        apply_faucet(conn, "publisher-2", 100, "NYXT").unwrap();
        let err = publish_listing(
            conn,
            &settings,
            "run-x",
            &listing_payload("publisher-2"),
            "somebody-else",
        )
        .unwrap_err();
        assert!(err.to_string().contains("publisher_id mismatch"));
    }

    #[test]
    fn purchase_requires_amount_plus_fee() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        apply_faucet(conn, "publisher-3", 100, "NYXT").unwrap();
        publish_listing(conn, &settings, "run-p3", &listing_payload("publisher-3"), "publisher-3")
            .unwrap();
        let listing_id = deterministic_id("listing", "run-p3");

        apply_faucet(conn, "poor-buyer", 10, "NYXT").unwrap();
        let purchase = json!({"listing_id": listing_id, "buyer_id": "poor-buyer", "qty": 1})
            .as_object()
            .unwrap()
            .clone();
        let err = purchase_listing(conn, &settings, "run-b3", &purchase, "poor-buyer").unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn search_matches_sku_and_title() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        apply_faucet(conn, "publisher-4", 100, "NYXT").unwrap();
        publish_listing(conn, &settings, "run-s1", &listing_payload("publisher-4"), "publisher-4")
            .unwrap();

        assert_eq!(search_listings(conn, "Item", 50, 0).unwrap().len(), 1);
        assert_eq!(search_listings(conn, "sku-1", 50, 0).unwrap().len(), 1);
        assert!(search_listings(conn, "nothing", 50, 0).unwrap().is_empty());
    }
}
