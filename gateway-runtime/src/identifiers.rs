//! Deterministic identifier derivations.
//!
//! Every derived ID is a pure function of the caller-supplied `run_id` (or
//! of another already-derived ID), so a replayed run reproduces the exact
//! same rows.

use crate::hashing::sha256_hex;

const ID_HEX_LEN: usize = 16;

pub fn deterministic_id(prefix: &str, run_id: &str) -> String {
    let digest = sha256_hex(format!("{prefix}:{run_id}").as_bytes());
    format!("{prefix}-{}", &digest[..ID_HEX_LEN])
}

pub fn order_id(run_id: &str) -> String {
    deterministic_id("order", run_id)
}

pub fn receipt_id(run_id: &str) -> String {
    deterministic_id("receipt", run_id)
}

pub fn wallet_address(account_id: &str) -> String {
    let digest = sha256_hex(format!("wallet:{account_id}").as_bytes());
    format!("wallet-{}", &digest[..ID_HEX_LEN])
}
