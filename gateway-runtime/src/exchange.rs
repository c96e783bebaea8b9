//! Continuous-double-auction order book with cross-asset settlement.
//!
//! ECHO is base, NYXT is quote. A BUY order's `amount` is its remaining
//! quote; a SELL order's `amount` is its remaining base. Fills settle at the
//! maker's price, and each fill performs two zero-fee ledger transfers (the
//! gateway fee for the order is charged once by the executor, not per fill).
//!
//! All writes happen on the caller's connection; the executor owns the
//! surrounding transaction, so any error unwinds every fill.

use rusqlite::Connection;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::hashing::sha256_hex;
use crate::ledger::{self, TransferParams};
use crate::store::{
    self, ORDER_BY_PRICE_ASC, ORDER_BY_PRICE_DESC, Order, OrderFilter, Trade, get_wallet_balance,
};

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub order: Order,
    pub trades: Vec<Trade>,
}

fn trade_id(order_id: &str, counter_id: &str, amount: i64) -> String {
    let digest = sha256_hex(format!("trade:{order_id}:{counter_id}:{amount}").as_bytes());
    format!("trade-{}", &digest[..16])
}

struct Maker {
    order_id: String,
    owner_address: String,
    price: i64,
    amount: i64,
}

fn fetch_opposites(conn: &Connection, order: &Order) -> Result<Vec<Maker>> {
    let (side, order_by) = if order.side == "BUY" {
        ("SELL", ORDER_BY_PRICE_ASC)
    } else {
        ("BUY", ORDER_BY_PRICE_DESC)
    };
    let rows = store::list_orders(
        conn,
        &OrderFilter {
            side: Some(side),
            asset_in: Some(&order.asset_out),
            asset_out: Some(&order.asset_in),
            status: Some("open"),
        },
        order_by,
        100,
        0,
    )?;
    let mut makers = Vec::with_capacity(rows.len());
    for row in rows {
        let get_str = |key: &str| {
            row.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| GatewayError::bad_request("order row malformed"))
        };
        let get_int = |key: &str| {
            row.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| GatewayError::bad_request("order row malformed"))
        };
        makers.push(Maker {
            order_id: get_str("order_id")?,
            owner_address: get_str("owner_address")?,
            price: get_int("price")?,
            amount: get_int("amount")?,
        });
    }
    Ok(makers)
}

/// Insert the taker order and match it against the resting book.
pub fn place_order(conn: &Connection, fee_address: &str, order: Order) -> Result<ExchangeOutcome> {
    let current_balance = get_wallet_balance(conn, &order.owner_address, &order.asset_in)?;
    if current_balance < order.amount {
        return Err(GatewayError::InsufficientBalance(format!(
            "insufficient {} balance",
            order.asset_in
        )));
    }

    store::insert_order(conn, &order)?;

    let mut trades: Vec<Trade> = Vec::new();
    let mut remaining = order.amount;

    for maker in fetch_opposites(conn, &order)? {
        if order.side == "BUY" && order.price < maker.price {
            break;
        }
        if order.side == "SELL" && order.price > maker.price {
            break;
        }
        if maker.price <= 0 {
            continue;
        }

        // Fill sizing in base units, floor division against the maker price.
        let (trade_base, trade_quote, maker_remaining);
        if order.side == "BUY" {
            let seller_base_available = maker.amount;
            let max_base = remaining / maker.price;
            let base = seller_base_available.min(max_base);
            if base <= 0 {
                break;
            }
            trade_base = base;
            trade_quote = base * maker.price;
            maker_remaining = seller_base_available - base;
        } else {
            let buyer_quote_available = maker.amount;
            let max_base = buyer_quote_available / maker.price;
            let base = remaining.min(max_base);
            if base <= 0 {
                break;
            }
            trade_base = base;
            trade_quote = base * maker.price;
            maker_remaining = buyer_quote_available - trade_quote;
        }

        let fill_id = trade_id(&order.order_id, &maker.order_id, trade_base);
        let (taker_sends, maker_sends) = if order.side == "BUY" {
            (trade_quote, trade_base)
        } else {
            (trade_base, trade_quote)
        };

        ledger::apply_transfer(
            conn,
            &TransferParams {
                transfer_id: &format!("{fill_id}-taker-to-maker"),
                from_address: &order.owner_address,
                to_address: &maker.owner_address,
                asset_id: &order.asset_in,
                amount: taker_sends,
                fee_total: 0,
                treasury_address: fee_address,
                run_id: &order.run_id,
            },
        )?;
        ledger::apply_transfer(
            conn,
            &TransferParams {
                transfer_id: &format!("{fill_id}-maker-to-taker"),
                from_address: &maker.owner_address,
                to_address: &order.owner_address,
                asset_id: &order.asset_out,
                amount: maker_sends,
                fee_total: 0,
                treasury_address: fee_address,
                run_id: &order.run_id,
            },
        )?;

        let taker_trade = Trade {
            trade_id: format!("{fill_id}-t"),
            order_id: order.order_id.clone(),
            amount: trade_base,
            price: maker.price,
            run_id: order.run_id.clone(),
        };
        store::insert_trade(conn, &taker_trade)?;
        store::insert_trade(
            conn,
            &Trade {
                trade_id: format!("{fill_id}-m"),
                order_id: maker.order_id.clone(),
                amount: trade_base,
                price: maker.price,
                run_id: order.run_id.clone(),
            },
        )?;
        trades.push(taker_trade);

        store::update_order_amount(conn, &maker.order_id, maker_remaining)?;
        if maker_remaining == 0 {
            store::update_order_status(conn, &maker.order_id, "filled")?;
        }

        remaining -= if order.side == "BUY" { trade_quote } else { trade_base };
        if remaining == 0 {
            break;
        }
    }

    store::update_order_amount(conn, &order.order_id, remaining)?;
    if remaining == 0 {
        store::update_order_status(conn, &order.order_id, "filled")?;
    }

    Ok(ExchangeOutcome { order, trades })
}

pub fn cancel_order(conn: &Connection, order_id: &str) -> Result<()> {
    store::update_order_status(conn, order_id, "cancelled")
}
