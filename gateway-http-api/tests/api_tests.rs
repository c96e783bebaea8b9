//! Integration tests for the gateway HTTP API.
//!
//! Drives a real axum router against a temp data directory: portal
//! onboarding, wallet flows, exchange matching, marketplace, chat rooms,
//! the web2 guard denial path, and evidence replay.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

use gateway_http_api::{GatewayState, build_router};
use gateway_runtime::evidence::LocalProofEngine;
use gateway_runtime::{Gateway, Paths, Settings};

struct TestApp {
    _dir: tempfile::TempDir,
    state: Arc<GatewayState>,
}

impl TestApp {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(dir.path().join("gateway.db"), dir.path().join("runs"));
        paths.ensure_dirs().expect("dirs");
        let gateway = Gateway::new(Arc::new(LocalProofEngine), Settings::dev_defaults(), paths);
        Self {
            _dir: dir,
            state: Arc::new(GatewayState::new(gateway)),
        }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    /// Create an account and walk the challenge/verify handshake.
    async fn onboard(&self, handle: &str) -> (String, String) {
        let pubkey = STANDARD.encode([7u8; 32]);
        let (status, account) = self
            .post(
                "/portal/v1/accounts",
                None,
                json!({"handle": handle, "pubkey": pubkey}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "account create failed: {account}");
        let account_id = account["account_id"].as_str().unwrap().to_string();

        let (status, challenge) = self
            .post(
                "/portal/v1/auth/challenge",
                None,
                json!({"account_id": account_id}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let nonce = challenge["nonce"].as_str().unwrap();

        let key = STANDARD.decode(&pubkey).unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(nonce.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let (status, verified) = self
            .post(
                "/portal/v1/auth/verify",
                None,
                json!({"account_id": account_id, "nonce": nonce, "signature": signature}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "verify failed: {verified}");
        let token = verified["access_token"].as_str().unwrap().to_string();
        (account_id, token)
    }

    /// Seed an account with funds through the legacy faucet (no throttle).
    async fn fund(&self, address: &str, amount: i64, asset_id: &str) {
        let (status, body) = self
            .post(
                "/wallet/faucet",
                None,
                json!({
                    "seed": 123,
                    "run_id": format!("fund-{address}-{asset_id}-{amount}"),
                    "payload": {"address": address, "amount": amount, "asset_id": asset_id},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "faucet failed: {body}");
    }
}

#[tokio::test]
async fn healthz_is_public() {
    let app = TestApp::new();
    let (status, body) = app.get("/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn private_endpoints_require_bearer() {
    let app = TestApp::new();
    let (status, body) = app.get("/portal/v1/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("AUTH_REQUIRED"));

    let (status, body) = app.get("/portal/v1/me", Some("bogus-token-000000000000")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("AUTH_INVALID"));
}

#[tokio::test]
async fn onboarding_and_me() {
    let app = TestApp::new();
    let (account_id, token) = app.onboard("alice_01").await;
    let (status, body) = app.get("/portal/v1/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account_id"], json!(account_id));
    assert_eq!(body["handle"], json!("alice_01"));

    // Logout invalidates the session.
    let (status, _) = app.post("/portal/v1/auth/logout", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/portal/v1/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn faucet_v1_and_balances() {
    let app = TestApp::new();
    let (account_id, token) = app.onboard("bob_01").await;

    let (status, body) = app
        .post(
            "/wallet/v1/faucet",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-faucet-1",
                "payload": {"address": account_id, "amount": 500, "asset_id": "NYXT"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], json!("complete"));
    assert_eq!(body["balance"], json!(500));
    assert!(body["fee_total"].as_i64().unwrap() >= 1);
    assert!(body["replay_ok"].as_bool().unwrap());

    // Address other than the session account is a 403.
    let (status, body) = app
        .post(
            "/wallet/v1/faucet",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-faucet-2",
                "payload": {"address": "someone-else", "amount": 10},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("FAUCET_ADDRESS_MISMATCH"));

    let (status, body) = app
        .get(&format!("/wallet/v1/balances?address={account_id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let balances = body["balances"].as_array().unwrap();
    let nyxt = balances
        .iter()
        .find(|b| b["asset_id"] == json!("NYXT"))
        .unwrap();
    assert_eq!(nyxt["balance"], json!(500));

    // Another account's balances are off limits.
    let (status, body) = app
        .get("/wallet/v1/balances?address=other-account", Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("ADDRESS_MISMATCH"));
}

#[tokio::test]
async fn transfer_v1_moves_funds_and_writes_receipt() {
    let app = TestApp::new();
    let (alice, alice_token) = app.onboard("alice_02").await;
    let (bob, _bob_token) = app.onboard("bob_02").await;
    app.fund(&alice, 1000, "NYXT").await;

    let (status, body) = app
        .post(
            "/wallet/v1/transfer",
            Some(&alice_token),
            json!({
                "seed": 123,
                "run_id": "run-xfer-1",
                "payload": {
                    "from_address": alice,
                    "to_address": bob,
                    "amount": 100,
                    "asset_id": "NYXT",
                },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["to_balance"], json!(100));
    let fee_total = body["fee_total"].as_i64().unwrap();
    assert_eq!(body["from_balance"], json!(1000 - 100 - fee_total));
    assert_eq!(
        body["fee_total"].as_i64().unwrap(),
        body["fee_breakdown"]["protocol_fee_total"].as_i64().unwrap()
            + body["fee_breakdown"]["platform_fee_amount"].as_i64().unwrap()
    );

    // Sending from someone else's wallet is a 403.
    let (status, body) = app
        .post(
            "/wallet/v1/transfer",
            Some(&alice_token),
            json!({
                "seed": 123,
                "run_id": "run-xfer-2",
                "payload": {"from_address": bob, "to_address": alice, "amount": 1},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("FROM_ADDRESS_MISMATCH"));
}

#[tokio::test]
async fn transfer_insufficient_balance_is_rejected() {
    let app = TestApp::new();
    let (alice, token) = app.onboard("poor_01").await;
    app.fund(&alice, 2, "NYXT").await;
    let (status, body) = app
        .post(
            "/wallet/v1/transfer",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-xfer-poor",
                "payload": {"from_address": alice, "to_address": "receiver-x", "amount": 10},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("INSUFFICIENT_BALANCE"));
}

#[tokio::test]
async fn exchange_full_match_clears_the_book() {
    let app = TestApp::new();
    let (seller, seller_token) = app.onboard("seller_01").await;
    let (buyer, buyer_token) = app.onboard("buyer_01").await;
    app.fund(&seller, 1000, "ECHO").await;
    app.fund(&seller, 50, "NYXT").await;
    app.fund(&buyer, 1000, "NYXT").await;

    let (status, body) = app
        .post(
            "/exchange/place_order",
            Some(&seller_token),
            json!({
                "seed": 123,
                "run_id": "run-sell-1",
                "payload": {
                    "side": "SELL", "amount": 5, "price": 10,
                    "asset_in": "ECHO", "asset_out": "NYXT",
                    "owner_address": seller,
                },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .post(
            "/exchange/place_order",
            Some(&buyer_token),
            json!({
                "seed": 123,
                "run_id": "run-buy-1",
                "payload": {
                    "side": "BUY", "amount": 50, "price": 12,
                    "asset_in": "NYXT", "asset_out": "ECHO",
                    "owner_address": buyer,
                },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, book) = app.get("/exchange/orderbook", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(book["buy"].as_array().unwrap().is_empty());
    assert!(book["sell"].as_array().unwrap().is_empty());

    let (_, trades) = app.get("/exchange/trades", None).await;
    assert_eq!(trades["trades"].as_array().unwrap().len(), 2);

    let (_, my_trades) = app.get("/exchange/v1/my_trades", Some(&buyer_token)).await;
    assert_eq!(my_trades["trades"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn marketplace_publish_and_purchase() {
    let app = TestApp::new();
    let (publisher, publisher_token) = app.onboard("seller_02").await;
    let (_buyer, buyer_token) = app.onboard("buyer_02").await;
    app.fund(&publisher, 100, "NYXT").await;
    let buyer_id = app.onboard("buyer_03").await; // fresh account with funds
    let (buyer3, buyer3_token) = buyer_id;
    app.fund(&buyer3, 100, "NYXT").await;

    let (status, body) = app
        .post(
            "/marketplace/listing",
            Some(&publisher_token),
            json!({
                "seed": 123,
                "run_id": "run-listing-1",
                "payload": {
                    "publisher_id": publisher,
                    "sku": "sku-1",
                    "title": "Item One",
                    "price": 10,
                },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, listings) = app.get("/marketplace/listings", None).await;
    let listing_id = listings["listings"][0]["listing_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(
            "/marketplace/purchase",
            Some(&buyer3_token),
            json!({
                "seed": 123,
                "run_id": "run-purchase-1",
                "payload": {"listing_id": listing_id, "buyer_id": buyer3, "qty": 1},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Sold listings leave the active list and cannot be bought again.
    let (_, listings) = app.get("/marketplace/listings", None).await;
    assert!(listings["listings"].as_array().unwrap().is_empty());

    let (status, body) = app
        .post(
            "/marketplace/purchase",
            Some(&buyer_token),
            json!({
                "seed": 123,
                "run_id": "run-purchase-2",
                "payload": {"listing_id": listing_id, "buyer_id": _buyer, "qty": 1},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn chat_rooms_maintain_a_hash_chain() {
    let app = TestApp::new();
    let (_account, token) = app.onboard("chatter_01").await;

    let (status, room) = app
        .post("/chat/v1/rooms", Some(&token), json!({"name": "general"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{room}");
    let room_id = room["room_id"].as_str().unwrap().to_string();

    let envelope = json!({"ciphertext": "aaa", "iv": "bbb"}).to_string();
    let (status, first) = app
        .post(
            &format!("/chat/v1/rooms/{room_id}/messages"),
            Some(&token),
            json!({"body": envelope}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    let (status, second) = app
        .post(
            &format!("/chat/v1/rooms/{room_id}/messages"),
            Some(&token),
            json!({"body": envelope}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        second["receipt"]["prev_digest"],
        first["receipt"]["chain_head"]
    );

    // Plaintext bodies never make it into a room.
    let (status, _) = app
        .post(
            &format!("/chat/v1/rooms/{room_id}/messages"),
            Some(&token),
            json!({"body": "plain text"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, messages) = app
        .get(&format!("/chat/v1/rooms/{room_id}/messages"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn web2_guard_denies_ip_literal_without_charging() {
    let app = TestApp::new();
    let (account, token) = app.onboard("guard_01").await;
    app.fund(&account, 100, "NYXT").await;

    let (status, body) = app
        .post(
            "/web2/v1/request",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-guard-1",
                "payload": {"url": "https://127.0.0.1/", "method": "GET"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("ALLOWLIST_DENY"));

    // No fee taken, no guard row recorded.
    let (_, balances) = app
        .get(&format!("/wallet/v1/balances?address={account}"), Some(&token))
        .await;
    let nyxt = balances["balances"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["asset_id"] == json!("NYXT"))
        .unwrap();
    assert_eq!(nyxt["balance"], json!(100));

    let (_, requests) = app.get("/web2/v1/requests", Some(&token)).await;
    assert!(requests["requests"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn allowlist_is_published() {
    let app = TestApp::new();
    let (status, body) = app.get("/web2/v1/allowlist", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["allowlist"].as_array().unwrap();
    assert!(entries.iter().any(|e| e["id"] == json!("github")));
    assert!(entries.iter().any(|e| e["id"] == json!("httpbin")));
}

#[tokio::test]
async fn evidence_and_replay_round_trip() {
    let app = TestApp::new();
    let (alice, token) = app.onboard("prover_01").await;
    app.fund(&alice, 100, "NYXT").await;

    let (status, body) = app
        .post(
            "/wallet/v1/transfer",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-replay-1",
                "payload": {"from_address": alice, "to_address": "receiver-1", "amount": 5},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let state_hash = body["state_hash"].as_str().unwrap().to_string();

    let (status, evidence) = app.get("/evidence?run_id=run-replay-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(evidence["state_hash"], json!(state_hash));

    let (status, verdict) = app
        .post("/evidence/v1/replay", Some(&token), json!({"run_id": "run-replay-1"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["replay_ok"], json!(true));
    assert_eq!(verdict["state_hash"], json!(state_hash));

    let (status, runs) = app.get("/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!runs["runs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn artifact_reads_are_sandboxed() {
    let app = TestApp::new();
    let (alice, token) = app.onboard("artifact_01").await;
    app.fund(&alice, 100, "NYXT").await;
    let (status, _) = app
        .post(
            "/wallet/v1/transfer",
            Some(&token),
            json!({
                "seed": 123,
                "run_id": "run-artifact-1",
                "payload": {"from_address": alice, "to_address": "receiver-1", "amount": 5},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get("/artifact?run_id=run-artifact-1&name=evidence.json", None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get("/artifact?run_id=run-artifact-1&name=../run_id.txt", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn airdrop_store_task_via_api() {
    let app = TestApp::new();
    let (publisher, publisher_token) = app.onboard("shop_01").await;
    let (buyer, buyer_token) = app.onboard("shopper_01").await;
    app.fund(&publisher, 100, "NYXT").await;
    app.fund(&buyer, 100, "NYXT").await;

    app.post(
        "/marketplace/listing",
        Some(&publisher_token),
        json!({
            "seed": 123,
            "run_id": "run-ad-listing",
            "payload": {"publisher_id": publisher, "sku": "sku-ad", "title": "Airdrop Item", "price": 5},
        }),
    )
    .await;
    let (_, listings) = app.get("/marketplace/listings", None).await;
    let listing_id = listings["listings"][0]["listing_id"].as_str().unwrap().to_string();
    let (status, _) = app
        .post(
            "/marketplace/purchase",
            Some(&buyer_token),
            json!({
                "seed": 123,
                "run_id": "run-ad-purchase",
                "payload": {"listing_id": listing_id, "buyer_id": buyer, "qty": 1},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, tasks) = app.get("/wallet/v1/airdrop/tasks", Some(&buyer_token)).await;
    let store_task = tasks["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["task_id"] == json!("store_1"))
        .unwrap()
        .clone();
    assert_eq!(store_task["claimable"], json!(true));

    let (status, claim) = app
        .post(
            "/wallet/v1/airdrop/claim",
            Some(&buyer_token),
            json!({"seed": 123, "run_id": "run-ad-claim", "payload": {"task_id": "store_1"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{claim}");
    assert_eq!(claim["reward"], json!(200));

    let (status, body) = app
        .post(
            "/wallet/v1/airdrop/claim",
            Some(&buyer_token),
            json!({"seed": 123, "run_id": "run-ad-claim-2", "payload": {"task_id": "store_1"}}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("TASK_ALREADY_CLAIMED"));
}

#[tokio::test]
async fn capabilities_lists_the_surface() {
    let app = TestApp::new();
    let (status, body) = app.get("/capabilities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e == &json!("/wallet/v1/transfer"))
    );
    assert_eq!(body["exchange_pairs"][0]["base"], json!("ECHO"));
}

#[tokio::test]
async fn metrics_render_after_traffic() {
    let app = TestApp::new();
    let _ = app.get("/healthz", None).await;
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("nyx_gateway_http_requests_total"));
}
