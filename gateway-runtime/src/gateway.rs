//! The transactional action executor.
//!
//! Every mutating call follows the same shape: validate → ownership check →
//! fee quote → evidence run → domain mutation → fee settlement → one commit.
//! All writes since the evidence insert share a single transaction, so a
//! failure anywhere unwinds the whole call and the fee is never taken when
//! the mutation fails.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::airdrop;
use crate::chat;
use crate::error::{GatewayError, MismatchField, Result};
use crate::evidence::{EvidenceOutcome, ProofEngine, RunInputs, run_and_record};
use crate::exchange;
use crate::fees::{FeeQuote, route_fee};
use crate::identifiers::{deterministic_id, order_id};
use crate::ledger::{self, FaucetBalances, TransferBalances, TransferParams};
use crate::marketplace;
use crate::paths::Paths;
use crate::settings::Settings;
use crate::store::{
    self, EntertainmentEvent, EntertainmentItem, FaucetClaim, Order, Storage, get_wallet_balance,
};
use crate::time_util::unix_now;
use crate::validation;

#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub run_id: String,
    pub state_hash: String,
    pub receipt_hashes: Vec<String>,
    pub replay_ok: bool,
}

impl GatewayResult {
    fn from_outcome(run_id: &str, outcome: &EvidenceOutcome) -> Self {
        Self {
            run_id: run_id.to_string(),
            state_hash: outcome.state_hash.clone(),
            receipt_hashes: outcome.receipt_hashes.clone(),
            replay_ok: outcome.replay_ok,
        }
    }
}

/// Long-lived handle composing the proof engine, settings snapshot, and
/// filesystem roots. One per process; connections are opened per request.
pub struct Gateway {
    pub engine: Arc<dyn ProofEngine>,
    pub settings: Settings,
    pub paths: Paths,
}

fn entertainment_items() -> Vec<EntertainmentItem> {
    vec![
        EntertainmentItem {
            item_id: "ent-001".to_string(),
            title: "Signal Drift".to_string(),
            summary: "Deterministic state steps for testnet alpha.".to_string(),
            category: "pulse".to_string(),
        },
        EntertainmentItem {
            item_id: "ent-002".to_string(),
            title: "Echo Field".to_string(),
            summary: "Bounded steps with stable evidence output.".to_string(),
            category: "drift".to_string(),
        },
        EntertainmentItem {
            item_id: "ent-003".to_string(),
            title: "Arc Loop".to_string(),
            summary: "Preview-only loop with deterministic receipts.".to_string(),
            category: "scan".to_string(),
        },
    ]
}

pub fn ensure_entertainment_items(conn: &rusqlite::Connection) -> Result<()> {
    for item in entertainment_items() {
        store::insert_entertainment_item(conn, &item)?;
    }
    Ok(())
}

impl Gateway {
    pub fn new(engine: Arc<dyn ProofEngine>, settings: Settings, paths: Paths) -> Self {
        Self {
            engine,
            settings,
            paths,
        }
    }

    pub fn storage(&self) -> Result<Storage> {
        Storage::open(&self.paths.db_path)
    }

    /// Route a `(module, action)` mutation through the full pipeline.
    pub fn execute_run(
        &self,
        seed: i64,
        run_id: &str,
        module: &str,
        action: &str,
        payload: &Map<String, Value>,
        caller_account_id: Option<&str>,
    ) -> Result<GatewayResult> {
        if module == "marketplace" && action == "order_intent" {
            return Err(GatewayError::bad_request("action not supported"));
        }

        // Validate + ownership before touching the store.
        let mut evidence_payload = Value::Object(payload.clone());
        let mut order_payload = None;
        let mut cancel_payload = None;
        let mut chat_payload = None;
        let mut entertainment_payload = None;

        match (module, action) {
            ("exchange", "place_order") => {
                let validated = validation::validate_place_order(payload)?;
                if let Some(caller) = caller_account_id {
                    if validated.owner_address != caller {
                        return Err(GatewayError::bad_request("owner_address mismatch"));
                    }
                }
                evidence_payload = validated.evidence_payload();
                order_payload = Some(validated);
            }
            ("exchange", "cancel_order") => {
                let validated = validation::validate_cancel(payload)?;
                evidence_payload = validated.evidence_payload();
                cancel_payload = Some(validated);
            }
            ("chat", "message_event") => {
                let validated = validation::validate_chat_payload(payload)?;
                evidence_payload = validated.evidence_payload();
                chat_payload = Some(validated);
            }
            ("marketplace", "purchase_listing") => {
                let caller =
                    caller_account_id.ok_or(GatewayError::AuthRequired)?;
                let validated = validation::validate_purchase_payload(payload)?;
                if validated.buyer_id != caller {
                    return Err(GatewayError::bad_request("buyer_id mismatch"));
                }
                evidence_payload = validated.evidence_payload();
            }
            ("marketplace", "listing_publish") => {
                let caller =
                    caller_account_id.ok_or(GatewayError::AuthRequired)?;
                let validated = validation::validate_listing_payload(payload)?;
                if validated.publisher_id != caller {
                    return Err(GatewayError::bad_request("publisher_id mismatch"));
                }
                evidence_payload = validated.evidence_payload();
            }
            ("entertainment", "state_step") => {
                let validated = validation::validate_entertainment_payload(payload)?;
                evidence_payload = validated.evidence_payload();
                entertainment_payload = Some(validated);
            }
            _ => {}
        }

        let mut storage = self.storage()?;
        let tx = storage.transaction()?;

        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module,
                action,
                payload: &evidence_payload,
            },
            &self.paths.run_root,
        )?;

        // Exchange and chat charge their admission fee up front.
        let mut fee_record: Option<FeeQuote> = None;
        if module == "exchange"
            && matches!(action, "route_swap" | "place_order" | "cancel_order")
        {
            let fee = route_fee(&self.settings, module, action, payload, run_id);
            store::insert_fee_ledger(&tx, &fee.to_record())?;
            fee_record = Some(fee);
        }
        if module == "chat" && action == "message_event" {
            fee_record = Some(route_fee(&self.settings, module, action, payload, run_id));
        }

        if let Some(order) = order_payload {
            if let (Some(fee), Some(caller)) = (&fee_record, caller_account_id) {
                let nyxt_balance = get_wallet_balance(&tx, caller, "NYXT")?;
                let mut required = fee.total_paid;
                if order.asset_in == "NYXT" {
                    required += order.amount;
                }
                if nyxt_balance < required {
                    return Err(GatewayError::InsufficientBalance(
                        "insufficient NYXT balance for amount + fee".to_string(),
                    ));
                }
            }
            exchange::place_order(
                &tx,
                &self.settings.treasury_address,
                Order {
                    order_id: order_id(run_id),
                    owner_address: order.owner_address.clone(),
                    side: order.side.clone(),
                    amount: order.amount,
                    price: order.price,
                    asset_in: order.asset_in.clone(),
                    asset_out: order.asset_out.clone(),
                    run_id: run_id.to_string(),
                },
            )?;
        }
        if let Some(cancel) = cancel_payload {
            if let Some(caller) = caller_account_id {
                let record = store::load_by_id(&tx, "orders", "order_id", &cancel.order_id)?
                    .ok_or_else(|| GatewayError::bad_request("order_id not found"))?;
                let owner = record.get("owner_address").and_then(Value::as_str);
                if owner != Some(caller) {
                    return Err(GatewayError::bad_request("order_id ownership mismatch"));
                }
                let status = record
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("open");
                if status != "open" {
                    return Err(GatewayError::bad_request("order not cancellable"));
                }
            }
            exchange::cancel_order(&tx, &cancel.order_id)?;
        }
        if let Some(fee) = &fee_record {
            if module == "exchange" && matches!(action, "place_order" | "cancel_order") {
                let caller = caller_account_id.ok_or(GatewayError::AuthRequired)?;
                ledger::apply_transfer(
                    &tx,
                    &TransferParams {
                        transfer_id: &deterministic_id("fee", run_id),
                        from_address: caller,
                        to_address: &fee.fee_address,
                        asset_id: "NYXT",
                        amount: 0,
                        fee_total: fee.total_paid,
                        treasury_address: &fee.fee_address,
                        run_id,
                    },
                )?;
            }
        }

        if let Some(message) = chat_payload {
            let caller = caller_account_id.ok_or(GatewayError::AuthRequired)?;
            if let Some(fee) = &fee_record {
                let nyxt_balance = get_wallet_balance(&tx, caller, "NYXT")?;
                if nyxt_balance < fee.total_paid {
                    return Err(GatewayError::InsufficientBalance(
                        "insufficient NYXT balance for fee".to_string(),
                    ));
                }
                ledger::apply_transfer(
                    &tx,
                    &TransferParams {
                        transfer_id: &deterministic_id("fee", run_id),
                        from_address: caller,
                        to_address: &fee.fee_address,
                        asset_id: "NYXT",
                        amount: 0,
                        fee_total: fee.total_paid,
                        treasury_address: &fee.fee_address,
                        run_id,
                    },
                )?;
                store::insert_fee_ledger(&tx, &fee.to_record())?;
            }
            let mut event_payload = Map::new();
            event_payload.insert("channel".to_string(), Value::from(message.channel.clone()));
            event_payload.insert("message".to_string(), Value::from(message.message.clone()));
            chat::record_message_event(&tx, run_id, &event_payload, caller)?;
        }

        if module == "marketplace" && action == "listing_publish" {
            let caller = caller_account_id.ok_or(GatewayError::AuthRequired)?;
            marketplace::publish_listing(&tx, &self.settings, run_id, payload, caller)?;
        }
        if module == "marketplace" && action == "purchase_listing" {
            let caller = caller_account_id.ok_or(GatewayError::AuthRequired)?;
            marketplace::purchase_listing(&tx, &self.settings, run_id, payload, caller)?;
        }

        if let Some(step) = entertainment_payload {
            ensure_entertainment_items(&tx)?;
            store::load_by_id(&tx, "entertainment_items", "item_id", &step.item_id)?
                .ok_or_else(|| GatewayError::bad_request("item_id not found"))?;
            store::insert_entertainment_event(
                &tx,
                &EntertainmentEvent {
                    event_id: deterministic_id("ent-event", run_id),
                    item_id: step.item_id.clone(),
                    mode: step.mode.clone(),
                    step: step.step,
                    run_id: run_id.to_string(),
                },
            )?;
        }

        if module == "dapp" && action == "sign_request" {
            let dapp_url = validation::require_text(payload, "dapp_url", 128)?;
            let method = validation::require_text(payload, "method", 64)?;
            tx.execute(
                "INSERT OR REPLACE INTO messages (message_id, channel, body, run_id)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    deterministic_id("dapp-sig", run_id),
                    dapp_url,
                    format!("Signed: {method}"),
                    run_id
                ],
            )?;
        }

        tx.commit()?;
        Ok(GatewayResult::from_outcome(run_id, &outcome))
    }

    /// Wallet transfer, shared by the legacy and v1 endpoints. The v1 caller
    /// enforces the `from_address` ownership check before calling in.
    pub fn execute_wallet_transfer(
        &self,
        seed: i64,
        run_id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(GatewayResult, TransferBalances, FeeQuote)> {
        let validated = validation::validate_wallet_transfer(payload)?;
        let fee = route_fee(&self.settings, "wallet", "transfer", payload, run_id);

        let mut storage = self.storage()?;
        let tx = storage.transaction()?;

        let from_balance = get_wallet_balance(&tx, &validated.from_address, &validated.asset_id)?;
        let nyxt_balance = get_wallet_balance(&tx, &validated.from_address, "NYXT")?;
        if validated.asset_id == "NYXT" {
            if nyxt_balance < validated.amount + fee.total_paid {
                return Err(GatewayError::InsufficientBalance(
                    "insufficient balance for amount + fee".to_string(),
                ));
            }
        } else {
            if from_balance < validated.amount {
                return Err(GatewayError::InsufficientBalance(format!(
                    "insufficient {} balance",
                    validated.asset_id
                )));
            }
            if nyxt_balance < fee.total_paid {
                return Err(GatewayError::InsufficientBalance(
                    "insufficient NYXT balance for fee".to_string(),
                ));
            }
        }

        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module: "wallet",
                action: "transfer",
                payload: &validated.evidence_payload(),
            },
            &self.paths.run_root,
        )?;
        let balances = ledger::apply_transfer(
            &tx,
            &TransferParams {
                transfer_id: &deterministic_id("wallet", run_id),
                from_address: &validated.from_address,
                to_address: &validated.to_address,
                asset_id: &validated.asset_id,
                amount: validated.amount,
                fee_total: fee.total_paid,
                treasury_address: &fee.fee_address,
                run_id,
            },
        )?;
        store::insert_fee_ledger(&tx, &fee.to_record())?;
        tx.commit()?;

        Ok((GatewayResult::from_outcome(run_id, &outcome), balances, fee))
    }

    /// Legacy faucet without throttling. Kept for parity; gated at the HTTP
    /// layer by `legacy_unauth_endpoints`.
    pub fn execute_wallet_faucet(
        &self,
        seed: i64,
        run_id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(GatewayResult, FaucetBalances, FeeQuote)> {
        let validated = validation::validate_wallet_faucet(payload)?;
        let fee = route_fee(&self.settings, "wallet", "faucet", payload, run_id);

        let mut storage = self.storage()?;
        let tx = storage.transaction()?;
        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module: "wallet",
                action: "faucet",
                payload: &validated.evidence_payload(),
            },
            &self.paths.run_root,
        )?;
        let balances = ledger::apply_faucet_with_fee(
            &tx,
            &validated.address,
            validated.amount,
            fee.total_paid,
            &fee.fee_address,
            run_id,
            &validated.asset_id,
        )?;
        store::insert_fee_ledger(&tx, &fee.to_record())?;
        tx.commit()?;

        Ok((GatewayResult::from_outcome(run_id, &outcome), balances, fee))
    }

    /// Throttled v1 faucet. Every cap is checked inside the same
    /// transaction that records the claim.
    pub fn execute_wallet_faucet_v1(
        &self,
        seed: i64,
        run_id: &str,
        payload: &Map<String, Value>,
        account_id: &str,
        client_ip: Option<&str>,
    ) -> Result<(GatewayResult, i64, FeeQuote)> {
        let validated = validation::validate_wallet_faucet(payload)?;
        if validated.address != account_id {
            return Err(GatewayError::AddressMismatch {
                field: MismatchField::FaucetAddress,
            });
        }

        let ip = client_ip.unwrap_or("").trim();
        let ip = if ip.is_empty() { "unknown" } else { ip };
        let now = unix_now();
        let window_start = now - 24 * 60 * 60;
        let cooldown = self.settings.faucet_cooldown_seconds;
        let max_amount = self.settings.faucet_max_amount_per_24h;
        let max_claims = self.settings.faucet_max_claims_per_24h;
        let ip_max_claims = self.settings.faucet_ip_max_claims_per_24h;

        let mut storage = self.storage()?;
        let tx = storage.transaction()?;

        if cooldown > 0 {
            let last_at: Option<i64> = {
                use rusqlite::OptionalExtension;
                tx.query_row(
                    "SELECT created_at FROM faucet_claims WHERE account_id = ?1
                     ORDER BY created_at DESC LIMIT 1",
                    rusqlite::params![account_id],
                    |row| row.get(0),
                )
                .optional()?
            };
            if let Some(last_at) = last_at {
                let retry_after = cooldown - (now - last_at);
                if retry_after > 0 {
                    return Err(GatewayError::FaucetCooldown {
                        retry_after_seconds: retry_after,
                    });
                }
            }
        }

        let (total_amount, claim_count): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM faucet_claims
             WHERE account_id = ?1 AND created_at >= ?2",
            rusqlite::params![account_id, window_start],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if max_claims > 0 && claim_count >= max_claims {
            return Err(GatewayError::FaucetDailyClaimsExceeded {
                max_claims_per_24h: max_claims,
            });
        }
        if max_amount > 0 && total_amount + validated.amount > max_amount {
            return Err(GatewayError::FaucetDailyAmountExceeded {
                max_amount_per_24h: max_amount,
                already_claimed_amount_24h: total_amount,
            });
        }
        let ip_claim_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM faucet_claims WHERE ip = ?1 AND created_at >= ?2",
            rusqlite::params![ip, window_start],
            |row| row.get(0),
        )?;
        if ip_max_claims > 0 && ip_claim_count >= ip_max_claims {
            return Err(GatewayError::FaucetIpLimitExceeded {
                ip_max_claims_per_24h: ip_max_claims,
            });
        }

        let fee = route_fee(&self.settings, "wallet", "faucet", payload, run_id);
        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module: "wallet",
                action: "faucet",
                payload: &validated.evidence_payload(),
            },
            &self.paths.run_root,
        )?;
        let balances = ledger::apply_faucet_with_fee(
            &tx,
            &validated.address,
            validated.amount,
            fee.total_paid,
            &fee.fee_address,
            run_id,
            &validated.asset_id,
        )?;
        store::insert_fee_ledger(&tx, &fee.to_record())?;
        store::insert_faucet_claim(
            &tx,
            &FaucetClaim {
                claim_id: deterministic_id("faucet-claim", run_id),
                account_id: account_id.to_string(),
                address: validated.address.clone(),
                asset_id: validated.asset_id.clone(),
                amount: validated.amount,
                ip: ip.to_string(),
                created_at: now,
                run_id: run_id.to_string(),
            },
        )?;
        tx.commit()?;

        Ok((
            GatewayResult::from_outcome(run_id, &outcome),
            balances.balance,
            fee,
        ))
    }

    /// Session-scoped airdrop claim.
    pub fn execute_airdrop_claim_v1(
        &self,
        seed: i64,
        run_id: &str,
        payload: &Map<String, Value>,
        account_id: &str,
    ) -> Result<(GatewayResult, i64, FeeQuote, airdrop::ClaimOutcome)> {
        let mut storage = self.storage()?;
        let tx = storage.transaction()?;

        let (task, completion_run_id) = airdrop::prepare_claim(&tx, account_id, payload)?;
        let evidence_payload = json!({
            "task_id": task.task_id,
            "reward": task.reward,
            "account_id": account_id,
        });
        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module: "wallet",
                action: "airdrop",
                payload: &evidence_payload,
            },
            &self.paths.run_root,
        )?;
        let claim =
            airdrop::apply_claim(&tx, &self.settings, run_id, account_id, task, completion_run_id)?;
        tx.commit()?;

        let balance = claim.balances.balance;
        let fee = claim.fee.clone();
        Ok((
            GatewayResult::from_outcome(run_id, &outcome),
            balance,
            fee,
            claim,
        ))
    }

    /// Legacy unauthenticated airdrop claim, deduplicated by the transfer
    /// prefix it writes.
    pub fn execute_airdrop_claim(
        &self,
        seed: i64,
        run_id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(GatewayResult, FaucetBalances, FeeQuote)> {
        let address = validation::require_address(payload, "address")?;
        let task_id = payload
            .get("task_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::bad_request("task_id required"))?;
        let reward = payload
            .get("reward")
            .and_then(Value::as_i64)
            .filter(|r| *r > 0)
            .ok_or_else(|| GatewayError::bad_request("reward invalid"))?;

        let fee = route_fee(&self.settings, "wallet", "airdrop", payload, run_id);

        let mut storage = self.storage()?;
        let tx = storage.transaction()?;
        let already: Option<i64> = {
            use rusqlite::OptionalExtension;
            tx.query_row(
                "SELECT 1 FROM wallet_transfers WHERE to_address = ?1 AND run_id LIKE ?2",
                rusqlite::params![address, format!("airdrop-{task_id}-%")],
                |row| row.get(0),
            )
            .optional()?
        };
        if already.is_some() {
            return Err(GatewayError::bad_request("airdrop already claimed for this task"));
        }

        let outcome = run_and_record(
            self.engine.as_ref(),
            &tx,
            &RunInputs {
                seed,
                run_id,
                module: "wallet",
                action: "airdrop",
                payload: &Value::Object(payload.clone()),
            },
            &self.paths.run_root,
        )?;
        let balances = ledger::apply_faucet_with_fee(
            &tx,
            &address,
            reward,
            fee.total_paid,
            &fee.fee_address,
            &format!("airdrop-{task_id}-{run_id}"),
            "NYXT",
        )?;
        store::insert_fee_ledger(&tx, &fee.to_record())?;
        tx.commit()?;

        Ok((GatewayResult::from_outcome(run_id, &outcome), balances, fee))
    }

    pub fn fetch_wallet_balance(&self, address: &str, asset_id: &str) -> Result<i64> {
        let storage = self.storage()?;
        get_wallet_balance(storage.conn(), address, asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::LocalProofEngine;
    use crate::ledger::apply_faucet;

    fn test_gateway() -> (tempfile::TempDir, Gateway) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(dir.path().join("gateway.db"), dir.path().join("runs"));
        paths.ensure_dirs().unwrap();
        let gateway = Gateway::new(
            Arc::new(LocalProofEngine),
            Settings::dev_defaults(),
            paths,
        );
        (dir, gateway)
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn transfer_full_pipeline_writes_the_triple() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "alice", 100, "NYXT").unwrap();
        }
        let payload = obj(json!({
            "from_address": "alice",
            "to_address": "bob",
            "amount": 10,
            "asset_id": "NYXT",
        }));
        let (result, balances, fee) = gateway
            .execute_wallet_transfer(123, "run-t1", &payload)
            .unwrap();
        assert_eq!(result.run_id, "run-t1");
        assert!(result.replay_ok);
        assert_eq!(balances.to_balance, 10);
        assert_eq!(balances.from_balance, 100 - 10 - fee.total_paid);

        let storage = gateway.storage().unwrap();
        let receipt = store::load_by_id(storage.conn(), "receipts", "run_id", "run-t1")
            .unwrap()
            .unwrap();
        assert_eq!(receipt["state_hash"], json!(result.state_hash));
        let fee_row = store::load_by_id(storage.conn(), "fee_ledger", "run_id", "run-t1")
            .unwrap()
            .unwrap();
        assert_eq!(fee_row["total_paid"], json!(fee.total_paid));
        let run_row = store::load_by_id(storage.conn(), "evidence_runs", "run_id", "run-t1")
            .unwrap()
            .unwrap();
        assert_eq!(run_row["seed"], json!(123));
    }

    #[test]
    fn transfer_insufficient_balance_rolls_back_everything() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "sender-1", 2, "NYXT").unwrap();
        }
        let payload = obj(json!({
            "from_address": "sender-1",
            "to_address": "receiver-1",
            "amount": 10,
        }));
        let err = gateway
            .execute_wallet_transfer(123, "run-t2", &payload)
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

        let storage = gateway.storage().unwrap();
        assert!(
            store::load_by_id(storage.conn(), "receipts", "run_id", "run-t2")
                .unwrap()
                .is_none()
        );
        assert!(
            store::load_by_id(storage.conn(), "fee_ledger", "run_id", "run-t2")
                .unwrap()
                .is_none()
        );
        assert_eq!(
            gateway.fetch_wallet_balance("sender-1", "NYXT").unwrap(),
            2
        );
    }

    #[test]
    fn place_order_charges_fee_and_matches() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "seller-1", 1000, "ECHO").unwrap();
            apply_faucet(storage.conn(), "seller-1", 10, "NYXT").unwrap();
            apply_faucet(storage.conn(), "buyer-1", 1000, "NYXT").unwrap();
        }
        let sell = obj(json!({
            "side": "SELL", "amount": 5, "price": 10,
            "asset_in": "ECHO", "asset_out": "NYXT",
            "owner_address": "seller-1",
        }));
        gateway
            .execute_run(123, "run-sell", "exchange", "place_order", &sell, Some("seller-1"))
            .unwrap();

        let buy = obj(json!({
            "side": "BUY", "amount": 50, "price": 12,
            "asset_in": "NYXT", "asset_out": "ECHO",
            "owner_address": "buyer-1",
        }));
        gateway
            .execute_run(123, "run-buy", "exchange", "place_order", &buy, Some("buyer-1"))
            .unwrap();

        // Seller delivered 5 ECHO for 50 NYXT; both sides paid an order fee.
        assert_eq!(gateway.fetch_wallet_balance("seller-1", "ECHO").unwrap(), 995);
        assert_eq!(gateway.fetch_wallet_balance("buyer-1", "ECHO").unwrap(), 5);
        let buyer_nyxt = gateway.fetch_wallet_balance("buyer-1", "NYXT").unwrap();
        assert!(buyer_nyxt < 950, "fee must come on top of the fill");

        let storage = gateway.storage().unwrap();
        let open = store::list_orders(
            storage.conn(),
            &store::OrderFilter {
                status: Some("open"),
                ..Default::default()
            },
            store::ORDER_BY_PRICE_ASC,
            100,
            0,
        )
        .unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn cancel_requires_ownership() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "seller-2", 100, "ECHO").unwrap();
            apply_faucet(storage.conn(), "seller-2", 10, "NYXT").unwrap();
            apply_faucet(storage.conn(), "mallory", 10, "NYXT").unwrap();
        }
        let sell = obj(json!({
            "side": "SELL", "amount": 5, "price": 10,
            "asset_in": "ECHO", "asset_out": "NYXT",
            "owner_address": "seller-2",
        }));
        gateway
            .execute_run(123, "run-s2", "exchange", "place_order", &sell, Some("seller-2"))
            .unwrap();
        let cancel = obj(json!({"order_id": order_id("run-s2")}));
        let err = gateway
            .execute_run(123, "run-c2", "exchange", "cancel_order", &cancel, Some("mallory"))
            .unwrap_err();
        assert!(err.to_string().contains("ownership mismatch"));

        gateway
            .execute_run(123, "run-c3", "exchange", "cancel_order", &cancel, Some("seller-2"))
            .unwrap();
        let storage = gateway.storage().unwrap();
        let row = store::load_by_id(storage.conn(), "orders", "order_id", &order_id("run-s2"))
            .unwrap()
            .unwrap();
        assert_eq!(row["status"], json!("cancelled"));
    }

    #[test]
    fn failed_match_never_takes_a_fee() {
        let (_dir, gateway) = test_gateway();
        // Buyer has NYXT for the fee but the order admission fails on the
        // order amount itself.
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "buyer-3", 10, "NYXT").unwrap();
        }
        let buy = obj(json!({
            "side": "BUY", "amount": 500, "price": 10,
            "asset_in": "NYXT", "asset_out": "ECHO",
            "owner_address": "buyer-3",
        }));
        let err = gateway
            .execute_run(123, "run-b3", "exchange", "place_order", &buy, Some("buyer-3"))
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        let storage = gateway.storage().unwrap();
        assert!(
            store::load_by_id(storage.conn(), "fee_ledger", "run_id", "run-b3")
                .unwrap()
                .is_none()
        );
        assert_eq!(gateway.fetch_wallet_balance("buyer-3", "NYXT").unwrap(), 10);
    }

    #[test]
    fn evidence_is_reproducible_across_run_ids() {
        let (_dir, gateway) = test_gateway();
        let payload = obj(json!({
            "asset_in": "asset-a", "asset_out": "asset-b", "amount": 5, "min_out": 3,
        }));
        let first = gateway
            .execute_run(123, "run-a", "exchange", "route_swap", &payload, Some("acct-1"))
            .unwrap();
        let second = gateway
            .execute_run(123, "run-b", "exchange", "route_swap", &payload, Some("acct-1"))
            .unwrap();
        assert_eq!(first.state_hash, second.state_hash);
        assert_eq!(first.receipt_hashes, second.receipt_hashes);
    }

    #[test]
    fn faucet_v1_enforces_address_and_cooldown() {
        let (_dir, gateway) = test_gateway();
        let payload = obj(json!({"address": "acct-f1", "amount": 100, "asset_id": "NYXT"}));
        let err = gateway
            .execute_wallet_faucet_v1(123, "run-f0", &payload, "someone-else", Some("1.2.3.4"))
            .unwrap_err();
        assert_eq!(err.code(), "FAUCET_ADDRESS_MISMATCH");
        assert_eq!(err.http_status(), 403);

        let (_, balance, _) = gateway
            .execute_wallet_faucet_v1(123, "run-f1", &payload, "acct-f1", Some("1.2.3.4"))
            .unwrap();
        assert_eq!(balance, 100);

        let err = gateway
            .execute_wallet_faucet_v1(123, "run-f2", &payload, "acct-f1", Some("1.2.3.4"))
            .unwrap_err();
        assert_eq!(err.code(), "FAUCET_COOLDOWN");
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn airdrop_claim_v1_store_task() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            store::insert_purchase(
                storage.conn(),
                &store::Purchase {
                    purchase_id: "purchase-9".to_string(),
                    listing_id: "listing-9".to_string(),
                    buyer_id: "acct-a1".to_string(),
                    qty: 1,
                    run_id: "run-store".to_string(),
                },
            )
            .unwrap();
        }
        let payload = obj(json!({"task_id": "store_1"}));
        let (result, balance, fee, claim) = gateway
            .execute_airdrop_claim_v1(123, "run-ad1", &payload, "acct-a1")
            .unwrap();
        assert!(result.replay_ok);
        assert_eq!(balance, 200);
        assert_eq!(claim.reward, 200);
        assert!(fee.total_paid >= 1);

        let err = gateway
            .execute_airdrop_claim_v1(123, "run-ad2", &payload, "acct-a1")
            .unwrap_err();
        assert_eq!(err.code(), "TASK_ALREADY_CLAIMED");
    }

    #[test]
    fn chat_message_event_charges_and_records() {
        let (_dir, gateway) = test_gateway();
        {
            let storage = gateway.storage().unwrap();
            apply_faucet(storage.conn(), "acct-chat", 50, "NYXT").unwrap();
        }
        let payload = obj(json!({
            "channel": "lobby",
            "message": "{\"ciphertext\":\"abc\",\"iv\":\"def\"}",
        }));
        gateway
            .execute_run(123, "run-m1", "chat", "message_event", &payload, Some("acct-chat"))
            .unwrap();
        let storage = gateway.storage().unwrap();
        let row = store::load_by_id(storage.conn(), "messages", "run_id", "run-m1")
            .unwrap()
            .unwrap();
        assert_eq!(row["channel"], json!("lobby"));
        assert!(gateway.fetch_wallet_balance("acct-chat", "NYXT").unwrap() < 50);
    }

    #[test]
    fn entertainment_step_requires_known_item() {
        let (_dir, gateway) = test_gateway();
        let bad = obj(json!({"item_id": "ent-999", "mode": "pulse", "step": 1}));
        assert!(
            gateway
                .execute_run(123, "run-e0", "entertainment", "state_step", &bad, None)
                .is_err()
        );
        let good = obj(json!({"item_id": "ent-001", "mode": "pulse", "step": 1}));
        gateway
            .execute_run(123, "run-e1", "entertainment", "state_step", &good, None)
            .unwrap();
    }
}
