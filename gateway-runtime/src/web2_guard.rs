//! Outbound web2 guard: declarative allowlist, SSRF screening, bounded
//! request/response, and evidence binding.
//!
//! Rules, in order: https only, no userinfo, no custom port, non-IP host,
//! no `..` path segment, then host + path-prefix + method must match an
//! allowlist entry and every resolved address must be public. The fee is
//! charged only after the evidence run succeeded, so a denied request
//! costs nothing and leaves no row.

use std::net::{IpAddr, ToSocketAddrs};

use percent_encoding::percent_decode_str;
use serde_json::{Map, Value, json};
use url::{Host, Url};

use crate::error::{GatewayError, Result};
use crate::evidence::{ProofEngine, RunInputs, run_and_record};
use crate::fees::route_fee;
use crate::hashing::sha256_hex;
use crate::identifiers::deterministic_id;
use crate::ledger::{self, TransferParams};
use crate::paths::Paths;
use crate::settings::Settings;
use crate::store::{self, Storage, Web2GuardRequest, get_wallet_balance};
use crate::time_util::unix_now;

pub const MAX_URL_LEN: usize = 256;
pub const MAX_BODY_BYTES: usize = 2_048;
pub const MAX_RESPONSE_BYTES: usize = 100_000;
pub const MAX_SEALED_LEN: usize = 4_096;
pub const TIMEOUT_SECONDS: u64 = 8;

#[derive(Debug)]
pub struct AllowlistEntry {
    pub id: &'static str,
    pub label: &'static str,
    pub base_url: &'static str,
    pub host: &'static str,
    pub path_prefix: &'static str,
    pub methods: &'static [&'static str],
}

pub const ALLOWLIST: &[AllowlistEntry] = &[
    AllowlistEntry {
        id: "github",
        label: "GitHub API",
        base_url: "https://api.github.com",
        host: "api.github.com",
        path_prefix: "/",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "0x-ethereum",
        label: "0x Swap API (Ethereum)",
        base_url: "https://api.0x.org",
        host: "api.0x.org",
        path_prefix: "/swap",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "jupiter",
        label: "Jupiter Swap API",
        base_url: "https://api.jup.ag/swap/v1",
        host: "api.jup.ag",
        path_prefix: "/swap/v1",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "magiceden-solana",
        label: "Magic Eden Solana API",
        base_url: "https://api-mainnet.magiceden.dev/v2",
        host: "api-mainnet.magiceden.dev",
        path_prefix: "/v2",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "magiceden-evm",
        label: "Magic Eden EVM API",
        base_url: "https://api-mainnet.magiceden.dev/v4/evm-public",
        host: "api-mainnet.magiceden.dev",
        path_prefix: "/v4/evm-public",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "coingecko",
        label: "CoinGecko API",
        base_url: "https://api.coingecko.com/api/v3",
        host: "api.coingecko.com",
        path_prefix: "/api/v3",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "coincap",
        label: "CoinCap API",
        base_url: "https://api.coincap.io/v2",
        host: "api.coincap.io",
        path_prefix: "/v2",
        methods: &["GET"],
    },
    AllowlistEntry {
        id: "httpbin",
        label: "HttpBin",
        base_url: "https://httpbin.org",
        host: "httpbin.org",
        path_prefix: "/",
        methods: &["GET", "POST"],
    },
];

pub fn list_allowlist() -> Vec<Value> {
    ALLOWLIST
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "label": entry.label,
                "base_url": entry.base_url,
                "methods": entry.methods,
            })
        })
        .collect()
}

fn deny(message: &str, details: Value) -> GatewayError {
    GatewayError::AllowlistDeny {
        message: message.to_string(),
        details,
    }
}

fn require_url(payload: &Map<String, Value>) -> Result<String> {
    let Some(url) = payload.get("url").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return Err(GatewayError::param_required("url"));
    };
    let url = url.trim();
    if url.len() > MAX_URL_LEN {
        return Err(GatewayError::param_invalid("url", "url too long"));
    }
    Ok(url.to_string())
}

fn require_method(payload: &Map<String, Value>) -> Result<String> {
    let Some(method) = payload.get("method").and_then(Value::as_str).filter(|s| !s.is_empty())
    else {
        return Err(GatewayError::param_invalid("method", "method invalid"));
    };
    let method = method.trim().to_uppercase();
    if method != "GET" && method != "POST" {
        return Err(GatewayError::param_invalid("method", "method not allowed"));
    }
    Ok(method)
}

fn coerce_body(value: Option<&Value>) -> Result<String> {
    let body = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    if body.len() > MAX_BODY_BYTES {
        return Err(GatewayError::param_invalid("body", "body too large"));
    }
    Ok(body)
}

fn coerce_sealed_request(value: Option<&Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let sealed = text.trim().to_string();
            if sealed.len() > MAX_SEALED_LEN {
                return Err(GatewayError::param_invalid(
                    "sealed_request",
                    "sealed_request too long",
                ));
            }
            Ok(Some(sealed))
        }
        Some(_) => Err(GatewayError::param_invalid(
            "sealed_request",
            "sealed_request invalid",
        )),
    }
}

fn request_hash(method: &str, url: &str, body: &str, allowlist_id: &str) -> String {
    sha256_hex(format!("{allowlist_id}:{method}:{url}:{body}").as_bytes())
}

fn guard_headers(method: &str) -> Vec<(&'static str, &'static str)> {
    let mut headers = vec![
        ("User-Agent", "NYX-Web2Guard/1.0"),
        ("Accept", "application/json"),
    ];
    if method == "POST" {
        headers.push(("Content-Type", "application/json"));
    }
    headers
}

/// Parse + policy-check the URL and find its allowlist entry. Pure; the
/// DNS screen runs separately.
pub fn match_allowlist(url: &str, method: &str) -> Result<&'static AllowlistEntry> {
    let parsed = Url::parse(url).map_err(|_| deny("url invalid", json!({ "url": url })))?;
    if parsed.scheme() != "https" {
        return Err(deny("https required", json!({ "url": url })));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(deny("url userinfo not allowed", Value::Null));
    }
    if parsed.port().is_some_and(|port| port != 443) {
        return Err(deny("custom port not allowed", Value::Null));
    }
    let host = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_lowercase(),
        Some(_) => return Err(deny("ip host not allowed", Value::Null)),
        None => return Err(deny("host required", Value::Null)),
    };
    let decoded_path = percent_decode_str(parsed.path()).decode_utf8_lossy();
    if decoded_path.split('/').any(|segment| segment == "..") {
        return Err(deny("path traversal not allowed", Value::Null));
    }

    for entry in ALLOWLIST {
        if host == entry.host
            && parsed.path().starts_with(entry.path_prefix)
            && entry.methods.contains(&method)
        {
            return Ok(entry);
        }
    }
    Err(deny("host not allowlisted", json!({ "host": host })))
}

/// Rebuild the URL against the allowlisted host so only path + query
/// survive from caller input.
pub fn normalized_url(url: &str, entry: &AllowlistEntry) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| deny("url invalid", Value::Null))?;
    let mut safe = format!("https://{}{}", entry.host, parsed.path());
    if let Some(query) = parsed.query() {
        safe.push('?');
        safe.push_str(query);
    }
    Ok(safe)
}

fn ipv4_public(ip: std::net::Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        // 240.0.0.0/4 reserved block
        || ip.octets()[0] >= 240)
}

fn ipv6_public(ip: std::net::Ipv6Addr) -> bool {
    let segments = ip.segments();
    !(ip.is_loopback()
        || ip.is_multicast()
        || ip.is_unspecified()
        // fc00::/7 unique-local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80)
}

pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => ipv4_public(v4),
        IpAddr::V6(v6) => ipv6_public(v6),
    }
}

/// Resolve the host and refuse it when any address lands in a private or
/// otherwise non-routable range.
async fn ensure_public_host(hostname: &str) -> Result<()> {
    let target = format!("{hostname}:443");
    let host_for_err = hostname.to_string();
    let addrs = tokio::task::spawn_blocking(move || target.to_socket_addrs())
        .await
        .map_err(|_| deny("host resolution failed", Value::Null))?
        .map_err(|_| deny("host resolution failed", json!({ "host": host_for_err })))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if !is_public_ip(addr.ip()) {
            return Err(deny(
                "host resolves to private ip",
                json!({ "host": hostname }),
            ));
        }
    }
    if !any {
        return Err(deny("host resolution failed", json!({ "host": hostname })));
    }
    Ok(())
}

struct UpstreamResult {
    status: i64,
    body: Vec<u8>,
    truncated: bool,
    error_hint: Option<String>,
}

async fn perform_request(url: &str, method: &str, body: &str) -> UpstreamResult {
    let client = match reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(TIMEOUT_SECONDS))
        .build()
    {
        Ok(client) => client,
        Err(_) => {
            return UpstreamResult {
                status: 0,
                body: Vec::new(),
                truncated: false,
                error_hint: Some("unavailable".to_string()),
            };
        }
    };

    let mut request = if method == "POST" {
        let builder = client.post(url);
        if body.is_empty() {
            builder
        } else {
            builder.body(body.to_string())
        }
    } else {
        client.get(url)
    };
    for (name, value) in guard_headers(method) {
        request = request.header(name, value);
    }

    let mut response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let hint = if err.is_timeout() { "timeout" } else { "unavailable" };
            return UpstreamResult {
                status: 0,
                body: Vec::new(),
                truncated: false,
                error_hint: Some(hint.to_string()),
            };
        }
    };

    if response.status().is_redirection() {
        return UpstreamResult {
            status: 0,
            body: Vec::new(),
            truncated: false,
            error_hint: Some("redirect".to_string()),
        };
    }

    let status = i64::from(response.status().as_u16());
    let mut raw: Vec<u8> = Vec::new();
    let mut truncated = false;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                raw.extend_from_slice(&chunk);
                if raw.len() > MAX_RESPONSE_BYTES {
                    truncated = true;
                    raw.truncate(MAX_RESPONSE_BYTES);
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                let hint = if err.is_timeout() { "timeout" } else { "unavailable" };
                return UpstreamResult {
                    status: 0,
                    body: Vec::new(),
                    truncated: false,
                    error_hint: Some(hint.to_string()),
                };
            }
        }
    }

    let error_hint = if status >= 400 {
        // Body still captured; the hint marks the upstream failure.
        Some(format!("http_{status}"))
    } else {
        None
    };
    UpstreamResult {
        status,
        body: raw,
        truncated,
        error_hint,
    }
}

/// Full guard pipeline for `POST /web2/v1/request`.
pub async fn execute_guard_request(
    engine: &dyn ProofEngine,
    settings: &Settings,
    paths: &Paths,
    seed: i64,
    run_id: &str,
    payload: &Map<String, Value>,
    account_id: &str,
) -> Result<Value> {
    if account_id.is_empty() {
        return Err(GatewayError::AuthRequired);
    }

    let url = require_url(payload)?;
    let method = require_method(payload)?;
    let body_text = coerce_body(payload.get("body"))?;
    let sealed_request = coerce_sealed_request(payload.get("sealed_request"))?;
    if method == "GET" && !body_text.is_empty() {
        return Err(GatewayError::param_invalid("body", "body not allowed for GET"));
    }

    let entry = match_allowlist(&url, &method)?;
    ensure_public_host(entry.host).await?;
    let safe_url = normalized_url(&url, entry)?;
    let req_hash = request_hash(&method, &safe_url, &body_text, entry.id);

    let upstream = perform_request(&safe_url, &method, &body_text).await;
    let response_hash = sha256_hex(&upstream.body);
    let response_size = upstream.body.len() as i64;
    let body_size = body_text.len() as i64;
    let mut response_preview = String::from_utf8_lossy(&upstream.body).into_owned();
    if response_preview.len() > 2000 {
        response_preview = format!("{}…", truncate_chars(&response_preview, 2000));
    }

    let fee_payload: Map<String, Value> =
        json!({"amount": 1}).as_object().cloned().unwrap_or_default();
    let fee = route_fee(settings, "web2", "guard_request", &fee_payload, run_id);

    let mut storage = Storage::open(&paths.db_path)?;
    let tx = storage.transaction()?;

    let balance = get_wallet_balance(&tx, account_id, "NYXT")?;
    if balance < fee.total_paid {
        return Err(GatewayError::InsufficientBalance(
            "insufficient balance for fee".to_string(),
        ));
    }

    let evidence_payload = json!({
        "url": safe_url,
        "method": method,
        "allowlist_id": entry.id,
        "request_hash": req_hash,
        "response_hash": response_hash,
        "response_status": upstream.status,
        "response_size": response_size,
        "response_truncated": upstream.truncated,
        "body_size": body_size,
        "upstream_error": upstream.error_hint.clone().unwrap_or_default(),
    });
    let outcome = run_and_record(
        engine,
        &tx,
        &RunInputs {
            seed,
            run_id,
            module: "web2",
            action: "guard_request",
            payload: &evidence_payload,
        },
        &paths.run_root,
    )?;

    let balances = ledger::apply_transfer(
        &tx,
        &TransferParams {
            transfer_id: &deterministic_id("web2-fee", run_id),
            from_address: account_id,
            to_address: &fee.fee_address,
            asset_id: "NYXT",
            amount: 0,
            fee_total: fee.total_paid,
            treasury_address: &fee.fee_address,
            run_id,
        },
    )?;
    store::insert_fee_ledger(&tx, &fee.to_record())?;

    let header_names: Vec<String> = {
        let mut names: Vec<String> = guard_headers(&method)
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        names.sort();
        names
    };
    store::insert_web2_guard_request(
        &tx,
        &Web2GuardRequest {
            request_id: deterministic_id("web2-req", run_id),
            account_id: account_id.to_string(),
            run_id: run_id.to_string(),
            url: safe_url.clone(),
            method: method.clone(),
            request_hash: req_hash.clone(),
            response_hash: response_hash.clone(),
            response_status: upstream.status,
            response_size,
            response_truncated: upstream.truncated,
            body_size,
            header_names,
            sealed_request,
            created_at: unix_now(),
        },
    )?;
    tx.commit()?;

    tracing::info!(
        account_id,
        allowlist_id = entry.id,
        request_hash = %req_hash,
        response_status = upstream.status,
        response_size,
        response_truncated = upstream.truncated,
        upstream_error = upstream.error_hint.as_deref().unwrap_or(""),
        "web2_guard_request"
    );

    let upstream_ok =
        upstream.status > 0 && (200..300).contains(&upstream.status) && upstream.error_hint.is_none();
    Ok(json!({
        "run_id": run_id,
        "status": "complete",
        "state_hash": outcome.state_hash,
        "receipt_hashes": outcome.receipt_hashes,
        "replay_ok": outcome.replay_ok,
        "request_id": deterministic_id("web2-req", run_id),
        "request_hash": req_hash,
        "response_hash": response_hash,
        "response_status": upstream.status,
        "response_size": response_size,
        "response_truncated": upstream.truncated,
        "body_size": body_size,
        "upstream_ok": upstream_ok,
        "upstream_error": upstream.error_hint,
        "response_preview": response_preview,
        "fee_total": fee.total_paid,
        "fee_breakdown": {
            "protocol_fee_total": fee.protocol_fee_total,
            "platform_fee_amount": fee.platform_fee_amount,
        },
        "treasury_address": fee.fee_address,
        "from_balance": balances.from_balance,
        "treasury_balance": balances.treasury_balance,
    }))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn fetch_guard_requests(
    paths: &Paths,
    account_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let storage = Storage::open(&paths.db_path)?;
    store::list_web2_guard_requests(storage.conn(), account_id, limit, offset)
}
