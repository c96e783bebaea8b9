//! Multi-asset ledger primitives.
//!
//! All balance math re-reads from the store inside the caller's transaction;
//! nothing is cached. Fees are always settled in NYXT regardless of the
//! transferred asset.

use rusqlite::Connection;

use crate::assets::FEE_ASSET;
use crate::error::{GatewayError, Result};
use crate::store::{
    self, WalletTransfer, ensure_wallet_account, get_wallet_balance, set_wallet_balance,
};

pub const FAUCET_SOURCE: &str = "faucet";

#[derive(Debug, Clone, Copy)]
pub struct TransferBalances {
    pub from_balance: i64,
    pub to_balance: i64,
    pub treasury_balance: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct FaucetBalances {
    pub balance: i64,
    pub treasury_balance: i64,
}

pub struct TransferParams<'a> {
    pub transfer_id: &'a str,
    pub from_address: &'a str,
    pub to_address: &'a str,
    pub asset_id: &'a str,
    pub amount: i64,
    pub fee_total: i64,
    pub treasury_address: &'a str,
    pub run_id: &'a str,
}

/// Move `amount` of `asset_id` from → to and the fee to the treasury in
/// NYXT. When the transferred asset is NYXT itself, amount and fee are
/// debited together. A failed precondition leaves every balance untouched.
pub fn apply_transfer(conn: &Connection, params: &TransferParams<'_>) -> Result<TransferBalances> {
    if params.from_address == params.to_address {
        return Err(GatewayError::bad_request("from_address must differ"));
    }
    let amount = store::validate_int(params.amount, "amount", 0, None)?;
    let fee_total = store::validate_int(params.fee_total, "fee_total", 0, None)?;

    ensure_wallet_account(conn, params.from_address, params.asset_id)?;
    ensure_wallet_account(conn, params.to_address, params.asset_id)?;
    ensure_wallet_account(conn, params.treasury_address, FEE_ASSET)?;

    let current = get_wallet_balance(conn, params.from_address, params.asset_id)?;
    if current < amount {
        return Err(GatewayError::InsufficientBalance(format!(
            "insufficient {} balance",
            params.asset_id
        )));
    }

    let new_from = if params.asset_id == FEE_ASSET {
        if current < amount + fee_total {
            return Err(GatewayError::InsufficientBalance(
                "insufficient balance for amount + fee".to_string(),
            ));
        }
        current - (amount + fee_total)
    } else {
        let nyxt_balance = get_wallet_balance(conn, params.from_address, FEE_ASSET)?;
        if nyxt_balance < fee_total {
            return Err(GatewayError::InsufficientBalance(
                "insufficient NYXT for fee".to_string(),
            ));
        }
        set_wallet_balance(conn, params.from_address, nyxt_balance - fee_total, FEE_ASSET)?;
        current - amount
    };

    let new_to = get_wallet_balance(conn, params.to_address, params.asset_id)? + amount;
    let new_treasury = get_wallet_balance(conn, params.treasury_address, FEE_ASSET)? + fee_total;

    set_wallet_balance(conn, params.from_address, new_from, params.asset_id)?;
    set_wallet_balance(conn, params.to_address, new_to, params.asset_id)?;
    set_wallet_balance(conn, params.treasury_address, new_treasury, FEE_ASSET)?;

    store::insert_wallet_transfer(
        conn,
        &WalletTransfer {
            transfer_id: params.transfer_id.to_string(),
            from_address: params.from_address.to_string(),
            to_address: params.to_address.to_string(),
            asset_id: params.asset_id.to_string(),
            amount,
            fee_total,
            treasury_address: params.treasury_address.to_string(),
            run_id: params.run_id.to_string(),
        },
    )?;

    Ok(TransferBalances {
        from_balance: new_from,
        to_balance: new_to,
        treasury_balance: new_treasury,
    })
}

/// Credit an address from the synthetic faucet source without a debit.
pub fn apply_faucet(conn: &Connection, address: &str, amount: i64, asset_id: &str) -> Result<i64> {
    let amount = store::validate_int(amount, "amount", 1, None)?;
    ensure_wallet_account(conn, address, asset_id)?;
    let new_balance = get_wallet_balance(conn, address, asset_id)? + amount;
    set_wallet_balance(conn, address, new_balance, asset_id)?;
    Ok(new_balance)
}

/// Faucet credit plus the NYXT fee credited to the treasury; records a
/// transfer row sourced from the synthetic `faucet` address.
pub fn apply_faucet_with_fee(
    conn: &Connection,
    address: &str,
    amount: i64,
    fee_total: i64,
    treasury_address: &str,
    run_id: &str,
    asset_id: &str,
) -> Result<FaucetBalances> {
    let amount = store::validate_int(amount, "amount", 1, None)?;
    let fee_total = store::validate_int(fee_total, "fee_total", 0, None)?;

    ensure_wallet_account(conn, address, asset_id)?;
    ensure_wallet_account(conn, treasury_address, FEE_ASSET)?;

    let new_balance = get_wallet_balance(conn, address, asset_id)? + amount;
    let new_treasury = get_wallet_balance(conn, treasury_address, FEE_ASSET)? + fee_total;
    set_wallet_balance(conn, address, new_balance, asset_id)?;
    set_wallet_balance(conn, treasury_address, new_treasury, FEE_ASSET)?;

    store::insert_wallet_transfer(
        conn,
        &WalletTransfer {
            transfer_id: format!("faucet-{run_id}"),
            from_address: FAUCET_SOURCE.to_string(),
            to_address: address.to_string(),
            asset_id: asset_id.to_string(),
            amount,
            fee_total,
            treasury_address: treasury_address.to_string(),
            run_id: run_id.to_string(),
        },
    )?;

    Ok(FaucetBalances {
        balance: new_balance,
        treasury_balance: new_treasury,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;

    fn open_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::open(&dir.path().join("ledger.db")).expect("open");
        (dir, storage)
    }

    #[test]
    fn nyxt_transfer_debits_amount_plus_fee() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        apply_faucet(conn, "alice", 100, "NYXT").unwrap();
        let balances = apply_transfer(
            conn,
            &TransferParams {
                transfer_id: "xfer-1",
                from_address: "alice",
                to_address: "bob",
                asset_id: "NYXT",
                amount: 40,
                fee_total: 2,
                treasury_address: "treasury-000000001",
                run_id: "run-1",
            },
        )
        .unwrap();
        assert_eq!(balances.from_balance, 58);
        assert_eq!(balances.to_balance, 40);
        assert_eq!(balances.treasury_balance, 2);
    }

    #[test]
    fn cross_asset_transfer_takes_fee_in_nyxt() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        apply_faucet(conn, "alice", 50, "ECHO").unwrap();
        apply_faucet(conn, "alice", 10, "NYXT").unwrap();
        let balances = apply_transfer(
            conn,
            &TransferParams {
                transfer_id: "xfer-2",
                from_address: "alice",
                to_address: "bob",
                asset_id: "ECHO",
                amount: 30,
                fee_total: 3,
                treasury_address: "treasury-000000001",
                run_id: "run-2",
            },
        )
        .unwrap();
        assert_eq!(balances.from_balance, 20);
        assert_eq!(balances.to_balance, 30);
        assert_eq!(balances.treasury_balance, 3);
        assert_eq!(get_wallet_balance(conn, "alice", "NYXT").unwrap(), 7);
    }

    #[test]
    fn insufficient_balance_leaves_state_unchanged() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        apply_faucet(conn, "sender-1", 2, "NYXT").unwrap();
        let err = apply_transfer(
            conn,
            &TransferParams {
                transfer_id: "xfer-3",
                from_address: "sender-1",
                to_address: "receiver-1",
                asset_id: "NYXT",
                amount: 10,
                fee_total: 1,
                treasury_address: "treasury-000000001",
                run_id: "run-3",
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(get_wallet_balance(conn, "sender-1", "NYXT").unwrap(), 2);
        assert_eq!(get_wallet_balance(conn, "receiver-1", "NYXT").unwrap(), 0);
    }

    #[test]
    fn self_transfer_rejected() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        apply_faucet(conn, "alice", 100, "NYXT").unwrap();
        assert!(
            apply_transfer(
                conn,
                &TransferParams {
                    transfer_id: "xfer-4",
                    from_address: "alice",
                    to_address: "alice",
                    asset_id: "NYXT",
                    amount: 1,
                    fee_total: 0,
                    treasury_address: "treasury-000000001",
                    run_id: "run-4",
                },
            )
            .is_err()
        );
    }
}
