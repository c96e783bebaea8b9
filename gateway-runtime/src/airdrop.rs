//! Airdrop task catalog and claims.
//!
//! Tasks become claimable when the account has a matching prior row: an
//! executed trade, a sent message, or a completed purchase. Claims are
//! unique per (account, task).

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value, json};

use crate::error::{GatewayError, Result};
use crate::fees::{FeeQuote, route_fee};
use crate::identifiers::deterministic_id;
use crate::ledger::{self, FaucetBalances};
use crate::settings::Settings;
use crate::store::{self, AirdropClaim};
use crate::time_util::unix_now;
use crate::validation::validate_address_text;

#[derive(Debug)]
pub struct AirdropTask {
    pub task_id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub reward: i64,
}

pub const AIRDROP_TASKS: &[AirdropTask] = &[
    AirdropTask {
        task_id: "trade_1",
        title: "Complete 1 trade",
        description: "Get an order filled on NYXT/ECHO.",
        reward: 250,
    },
    AirdropTask {
        task_id: "chat_1",
        title: "Send 1 E2EE DM",
        description: "Send one encrypted DM message.",
        reward: 100,
    },
    AirdropTask {
        task_id: "store_1",
        title: "Buy 1 item",
        description: "Complete one marketplace purchase.",
        reward: 200,
    },
];

fn task_by_id(task_id: &str) -> Option<&'static AirdropTask> {
    AIRDROP_TASKS.iter().find(|task| task.task_id == task_id)
}

/// Earliest run that satisfies the task for this account, if any.
fn completion_run_id(conn: &Connection, task_id: &str, account_id: &str) -> Result<Option<String>> {
    let sql = match task_id {
        "trade_1" => {
            "SELECT o.run_id AS run_id FROM trades t
             JOIN orders o ON o.order_id = t.order_id
             WHERE o.owner_address = ?1
             ORDER BY t.trade_id ASC LIMIT 1"
        }
        "chat_1" => {
            "SELECT run_id FROM messages WHERE sender_account_id = ?1
             ORDER BY message_id ASC LIMIT 1"
        }
        "store_1" => {
            "SELECT run_id FROM purchases WHERE buyer_id = ?1
             ORDER BY purchase_id ASC LIMIT 1"
        }
        _ => return Ok(None),
    };
    Ok(conn
        .query_row(sql, rusqlite::params![account_id], |row| row.get::<_, String>(0))
        .optional()?)
}

/// Catalog with per-account completed/claimed/claimable flags.
pub fn list_tasks(conn: &Connection, account_id: &str) -> Result<Vec<Value>> {
    let account_id = validate_address_text(Some(&Value::from(account_id)), "account_id")?;

    let claimed_rows = store::query_json(
        conn,
        "SELECT task_id, reward, created_at, run_id FROM airdrop_claims WHERE account_id = ?1",
        &[&account_id],
    )?;
    let claimed: std::collections::HashMap<String, Value> = claimed_rows
        .into_iter()
        .filter_map(|row| {
            let task_id = row.get("task_id")?.as_str()?.to_string();
            Some((task_id, row))
        })
        .collect();

    let mut out = Vec::with_capacity(AIRDROP_TASKS.len());
    for task in AIRDROP_TASKS {
        let completion = completion_run_id(conn, task.task_id, &account_id)?;
        let claim = claimed.get(task.task_id);
        let completed = completion.is_some();
        let claimed_flag = claim.is_some();
        out.push(json!({
            "task_id": task.task_id,
            "title": task.title,
            "description": task.description,
            "reward": task.reward,
            "completed": completed,
            "completion_run_id": completion,
            "claimed": claimed_flag,
            "claim_run_id": claim.and_then(|row| row.get("run_id").cloned()),
            "claimable": completed && !claimed_flag,
        }));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub task_id: String,
    pub reward: i64,
    pub completion_run_id: String,
    pub balances: FaucetBalances,
    pub fee: FeeQuote,
}

/// Validate a claim request and pick the task. Runs before evidence so a
/// rejected claim records nothing.
pub fn prepare_claim(
    conn: &Connection,
    account_id: &str,
    payload: &Map<String, Value>,
) -> Result<(&'static AirdropTask, String)> {
    let account_id = validate_address_text(Some(&Value::from(account_id)), "account_id")?;
    let task_id = payload
        .get("task_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::param_required("task_id"))?;
    store::types::validate_task_id(task_id, "task_id")
        .map_err(|_| GatewayError::param_invalid("task_id", "task_id invalid"))?;
    let task = task_by_id(task_id).ok_or_else(|| GatewayError::TaskUnknown {
        task_id: task_id.to_string(),
    })?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT run_id FROM airdrop_claims WHERE account_id = ?1 AND task_id = ?2",
            rusqlite::params![account_id, task_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(claim_run_id) = existing {
        return Err(GatewayError::TaskAlreadyClaimed {
            task_id: task_id.to_string(),
            claim_run_id,
        });
    }

    let completion = completion_run_id(conn, task_id, &account_id)?.ok_or_else(|| {
        GatewayError::TaskIncomplete {
            task_id: task_id.to_string(),
        }
    })?;
    Ok((task, completion))
}

/// Apply the reward and record the claim. Called after evidence succeeded,
/// inside the executor's transaction.
pub fn apply_claim(
    conn: &Connection,
    settings: &Settings,
    run_id: &str,
    account_id: &str,
    task: &AirdropTask,
    completion_run_id: String,
) -> Result<ClaimOutcome> {
    let fee_payload: Map<String, Value> = json!({"amount": task.reward})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let fee = route_fee(settings, "wallet", "airdrop", &fee_payload, run_id);

    let balances = ledger::apply_faucet_with_fee(
        conn,
        account_id,
        task.reward,
        fee.total_paid,
        &fee.fee_address,
        &format!("airdrop-{}-{run_id}", task.task_id),
        "NYXT",
    )?;
    store::insert_fee_ledger(conn, &fee.to_record())?;
    store::insert_airdrop_claim(
        conn,
        &AirdropClaim {
            claim_id: deterministic_id("airdrop-claim", run_id),
            account_id: account_id.to_string(),
            task_id: task.task_id.to_string(),
            reward: task.reward,
            created_at: unix_now(),
            run_id: run_id.to_string(),
        },
    )?;

    Ok(ClaimOutcome {
        task_id: task.task_id.to_string(),
        reward: task.reward,
        completion_run_id,
        balances,
        fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Purchase, Storage};

    fn open_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::open(&dir.path().join("airdrop.db")).expect("open");
        (dir, storage)
    }

    fn record_purchase(conn: &rusqlite::Connection, buyer: &str) {
        store::insert_purchase(
            conn,
            &Purchase {
                purchase_id: "purchase-1".to_string(),
                listing_id: "listing-1".to_string(),
                buyer_id: buyer.to_string(),
                qty: 1,
                run_id: "run-store".to_string(),
            },
        )
        .unwrap();
    }

    #[test]
    fn tasks_report_claimable_after_completion() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let tasks = list_tasks(conn, "acct-1").unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t["claimable"] == json!(false)));

        record_purchase(conn, "acct-1");
        let tasks = list_tasks(conn, "acct-1").unwrap();
        let store_task = tasks.iter().find(|t| t["task_id"] == json!("store_1")).unwrap();
        assert_eq!(store_task["claimable"], json!(true));
        assert_eq!(store_task["completion_run_id"], json!("run-store"));
    }

    #[test]
    fn claim_is_idempotent_per_task() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        record_purchase(conn, "acct-2");

        let payload: Map<String, Value> =
            json!({"task_id": "store_1"}).as_object().unwrap().clone();
        let (task, completion) = prepare_claim(conn, "acct-2", &payload).unwrap();
        assert_eq!(task.reward, 200);
        let outcome =
            apply_claim(conn, &settings, "run-claim", "acct-2", task, completion).unwrap();
        assert_eq!(outcome.balances.balance, 200);

        let err = prepare_claim(conn, "acct-2", &payload).unwrap_err();
        assert_eq!(err.code(), "TASK_ALREADY_CLAIMED");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn incomplete_task_rejected() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let payload: Map<String, Value> =
            json!({"task_id": "trade_1"}).as_object().unwrap().clone();
        let err = prepare_claim(conn, "acct-3", &payload).unwrap_err();
        assert_eq!(err.code(), "TASK_INCOMPLETE");
    }

    #[test]
    fn unknown_task_is_404() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let payload: Map<String, Value> =
            json!({"task_id": "moon_1"}).as_object().unwrap().clone();
        let err = prepare_claim(conn, "acct-4", &payload).unwrap_err();
        assert_eq!(err.code(), "TASK_UNKNOWN");
        assert_eq!(err.http_status(), 404);
    }
}
