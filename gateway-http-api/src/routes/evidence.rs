//! Evidence surface: run inspection, replay verification, artifact reads,
//! and export bundles.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use gateway_runtime::{GatewayError, store};

use crate::GatewayState;
use crate::auth::Session;
use crate::error::{ApiError, ApiResult};
use crate::routes::query_i64;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/evidence", get(evidence))
        .route("/evidence/v1/replay", post(replay))
        .route("/status", get(status))
        .route("/artifact", get(artifact))
        .route("/export.zip", get(export_zip))
        .route("/proof.zip", get(proof_zip))
        .route("/list", get(list_runs))
}

fn require_run_id(params: &HashMap<String, String>) -> ApiResult<String> {
    params
        .get("run_id")
        .filter(|s| !s.is_empty())
        .cloned()
        .ok_or_else(|| GatewayError::bad_request("run_id required").into())
}

async fn evidence(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let run_id = require_run_id(&params)?;
    let document = state
        .gateway
        .engine
        .load(&run_id, &state.gateway.paths.run_root)?;
    Ok(Json(json!({
        "protocol_anchor": document.protocol_anchor,
        "inputs": document.inputs,
        "outputs": document.outputs,
        "receipt_hashes": document.receipt_hashes,
        "state_hash": document.state_hash,
        "replay_ok": document.replay_ok,
        "stdout": document.stdout,
    })))
}

async fn status(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let run_id = require_run_id(&params)?;
    let document = state
        .gateway
        .engine
        .load(&run_id, &state.gateway.paths.run_root)?;
    Ok(Json(json!({
        "status": "complete",
        "replay_ok": document.replay_ok,
    })))
}

/// Replay verdict straight from the proof engine.
async fn replay(
    State(state): State<Arc<GatewayState>>,
    _session: Session,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let run_id = body
        .get("run_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("run_id required"))?;
    let verdict = state
        .gateway
        .engine
        .verify_run(run_id, &state.gateway.paths.run_root)?;
    Ok(Json(verdict))
}

async fn artifact(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = require_run_id(&params)?;
    let name = params.get("name").cloned().unwrap_or_default();
    let path = state
        .gateway
        .engine
        .safe_artifact(&state.gateway.paths.run_root, &run_id, &name)?;
    let data = std::fs::read(path).map_err(GatewayError::from)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}

async fn export_zip(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = require_run_id(&params)?;
    let data = state
        .gateway
        .engine
        .build_export(&run_id, &state.gateway.paths.run_root)?;
    Ok(([(header::CONTENT_TYPE, "application/zip")], data))
}

/// Bundle every run under a caller-owned prefix: one export zip per run
/// plus a manifest.
async fn proof_zip(
    State(state): State<Arc<GatewayState>>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    use std::io::Write;

    let prefix = params
        .get("prefix")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::bad_request("prefix required"))?;
    if prefix.len() > 64
        || !prefix
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(GatewayError::bad_request("prefix invalid").into());
    }
    let limit = query_i64(&params, "limit", 200)?;
    if !(1..=500).contains(&limit) {
        return Err(GatewayError::bad_request("limit out of bounds").into());
    }

    let storage = state.gateway.storage()?;
    let mut rows = store::query_json(
        storage.conn(),
        "SELECT DISTINCT r.run_id, r.module, r.action, r.state_hash, r.receipt_hashes, r.replay_ok
         FROM receipts r
         WHERE r.run_id LIKE ?1
           AND r.run_id IN (
             SELECT run_id FROM wallet_transfers WHERE from_address = ?2 OR to_address = ?2
             UNION
             SELECT run_id FROM orders WHERE owner_address = ?2
             UNION
             SELECT run_id FROM listings WHERE publisher_id = ?2
             UNION
             SELECT run_id FROM purchases WHERE buyer_id = ?2
             UNION
             SELECT run_id FROM messages WHERE sender_account_id = ?2
           )
         ORDER BY r.run_id ASC
         LIMIT ?3",
        &[&format!("{prefix}%"), &session.0.account_id, &limit],
    )?;
    if rows.is_empty() {
        return Err(GatewayError::bad_request("no runs found for prefix").into());
    }
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }

    let buffer = std::io::Cursor::new(Vec::new());
    let mut archive = zip::ZipWriter::new(buffer);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    let mut manifest_runs = Vec::with_capacity(rows.len());
    for row in &rows {
        let run_id = row
            .get("run_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        manifest_runs.push(json!({
            "run_id": run_id,
            "module": row.get("module").cloned().unwrap_or(Value::Null),
            "action": row.get("action").cloned().unwrap_or(Value::Null),
            "state_hash": row.get("state_hash").cloned().unwrap_or(Value::Null),
            "receipt_hashes": row.get("receipt_hashes").cloned().unwrap_or(json!([])),
            "replay_ok": row.get("replay_ok").cloned().unwrap_or(json!(false)),
        }));
        let export = state
            .gateway
            .engine
            .build_export(&run_id, &state.gateway.paths.run_root)
            .map_err(|err| {
                GatewayError::bad_request(format!("export failed for {run_id}: {err}"))
            })?;
        archive
            .start_file(format!("runs/{run_id}.zip"), options)
            .map_err(|err| GatewayError::bad_request(format!("proof bundle failed: {err}")))?;
        archive.write_all(&export).map_err(GatewayError::from)?;
    }

    let manifest = json!({
        "kind": "nyx-proof-package",
        "version": 1,
        "account_id": session.0.account_id,
        "prefix": prefix,
        "runs": manifest_runs,
    });
    archive
        .start_file("manifest.json", options)
        .map_err(|err| GatewayError::bad_request(format!("proof bundle failed: {err}")))?;
    archive
        .write_all(manifest.to_string().as_bytes())
        .map_err(GatewayError::from)?;
    let buffer = archive
        .finish()
        .map_err(|err| GatewayError::bad_request(format!("proof bundle failed: {err}")))?;

    Ok((
        [(header::CONTENT_TYPE, "application/zip")],
        buffer.into_inner(),
    ))
}

async fn list_runs(State(state): State<Arc<GatewayState>>) -> ApiResult<Json<Value>> {
    let runs = state.gateway.engine.list_runs(&state.gateway.paths.run_root)?;
    Ok(Json(json!({ "runs": runs })))
}
