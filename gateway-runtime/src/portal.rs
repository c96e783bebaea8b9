//! Identity portal: accounts, challenge/response onboarding, sessions,
//! rooms, and the per-room message hash chain.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rusqlite::Connection;
use serde_json::{Value, json};
use sha2::Sha256;

use crate::auth;
use crate::error::{GatewayError, Result};
use crate::hashing::{canonical_json, sha256_hex};
use crate::identifiers::wallet_address as derive_wallet_address;
use crate::settings::Settings;
use crate::store::{
    self, ChatMessage, ChatRoom, PortalAccount, PortalChallenge, PortalSession,
};
use crate::time_util::unix_now;
use crate::validation::validate_e2ee_envelope;

pub const GENESIS_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

fn portal_error(message: impl Into<String>) -> GatewayError {
    GatewayError::bad_request(message)
}

fn derive_account_id(handle: &str, pubkey: &str) -> String {
    let digest = sha256_hex(format!("portal:acct:{handle}:{pubkey}").as_bytes());
    format!("acct-{}", &digest[..16])
}

fn validate_handle(handle: &str) -> Result<String> {
    if handle.len() < 3 || handle.len() > 24 {
        return Err(portal_error("handle length invalid"));
    }
    let ok = handle
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-');
    if !ok {
        return Err(portal_error("handle invalid"));
    }
    Ok(handle.to_string())
}

fn validate_pubkey(pubkey: &str) -> Result<String> {
    if pubkey.is_empty() {
        return Err(portal_error("pubkey required"));
    }
    if pubkey.len() > 256 {
        return Err(portal_error("pubkey too long"));
    }
    let raw = STANDARD
        .decode(pubkey.as_bytes())
        .map_err(|_| portal_error("pubkey invalid"))?;
    if raw.len() < 16 {
        return Err(portal_error("pubkey invalid"));
    }
    Ok(pubkey.to_string())
}

pub fn create_account(conn: &Connection, handle: &str, pubkey: &str) -> Result<PortalAccount> {
    let handle = validate_handle(handle)?;
    let pubkey = validate_pubkey(pubkey)?;
    if store::load_portal_account_by_handle(conn, &handle)?.is_some() {
        return Err(portal_error("handle unavailable"));
    }
    let account_id = derive_account_id(&handle, &pubkey);
    let account = PortalAccount {
        wallet_address: derive_wallet_address(&account_id),
        account_id,
        handle,
        public_key: pubkey,
        created_at: unix_now(),
        status: "active".to_string(),
        bio: None,
    };
    store::insert_portal_account(conn, &account)?;
    Ok(account)
}

pub fn load_account(conn: &Connection, account_id: &str) -> Result<Option<PortalAccount>> {
    store::load_portal_account(conn, account_id)
}

pub fn issue_challenge(
    conn: &Connection,
    settings: &Settings,
    account_id: &str,
) -> Result<PortalChallenge> {
    let account = store::load_portal_account(conn, account_id)?
        .ok_or_else(|| portal_error("account not found"))?;
    let issued_at = unix_now();
    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);
    let nonce = sha256_hex(
        format!(
            "nonce:{}:{issued_at}:{}:{}",
            account.account_id,
            settings.portal_session_secret,
            hex::encode(entropy)
        )
        .as_bytes(),
    );
    let challenge = PortalChallenge {
        account_id: account.account_id,
        nonce,
        expires_at: issued_at + settings.portal_challenge_ttl,
        used: false,
    };
    store::insert_portal_challenge(conn, &challenge)?;
    Ok(challenge)
}

// TODO: replace the symmetric MAC with a real Ed25519 signature check once
// clients can produce one; the HMAC construction is a testnet stand-in.
fn verify_signature(pubkey: &str, nonce: &str, signature_b64: &str) -> bool {
    let Ok(key) = STANDARD.decode(pubkey.as_bytes()) else {
        return false;
    };
    let Ok(provided) = STANDARD.decode(signature_b64.as_bytes()) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).expect("hmac accepts any key size");
    mac.update(nonce.as_bytes());
    mac.verify_slice(&provided).is_ok()
}

pub fn verify_challenge(
    conn: &Connection,
    settings: &Settings,
    account_id: &str,
    nonce: &str,
    signature: &str,
) -> Result<PortalSession> {
    let challenge = store::consume_portal_challenge(conn, account_id, nonce)?
        .ok_or_else(|| portal_error("challenge not found"))?;
    if challenge.used {
        return Err(portal_error("challenge already used"));
    }
    if unix_now() > challenge.expires_at {
        return Err(portal_error("challenge expired"));
    }
    let account = store::load_portal_account(conn, account_id)?
        .ok_or_else(|| portal_error("account not found"))?;
    if !verify_signature(&account.public_key, nonce, signature) {
        return Err(portal_error("signature invalid"));
    }

    let expires_at = unix_now() + settings.portal_session_ttl;
    let session_id = auth::generate_session_id();
    let token = auth::issue_token(
        account_id,
        &session_id,
        expires_at,
        &settings.portal_session_secret,
    );
    let session = PortalSession {
        token,
        account_id: account_id.to_string(),
        expires_at,
    };
    store::insert_portal_session(conn, &session)?;
    Ok(session)
}

/// Accepts iff the MAC verifies, the session row exists, its account matches
/// the token subject, and the row has not expired.
pub fn require_session(conn: &Connection, settings: &Settings, token: &str) -> Result<PortalSession> {
    let payload = auth::verify_token(token, &settings.portal_session_secret)?;
    let session = store::load_portal_session(conn, token)
        .map_err(|_| GatewayError::AuthInvalid("session not found".to_string()))?
        .ok_or_else(|| GatewayError::AuthInvalid("session not found".to_string()))?;
    if session.account_id != payload.account_id {
        return Err(GatewayError::AuthInvalid("session account mismatch".to_string()));
    }
    if unix_now() > session.expires_at {
        return Err(GatewayError::AuthInvalid("session expired".to_string()));
    }
    Ok(session)
}

pub fn logout_session(conn: &Connection, token: &str) -> Result<()> {
    store::delete_portal_session(conn, token)
}

pub fn update_profile(
    conn: &Connection,
    account_id: &str,
    handle: Option<&str>,
    bio: Option<&str>,
) -> Result<PortalAccount> {
    let account =
        load_account(conn, account_id)?.ok_or_else(|| portal_error("account not found"))?;

    let new_handle = match handle {
        Some(handle) => {
            let handle = validate_handle(handle)?;
            if handle != account.handle
                && store::load_portal_account_by_handle(conn, &handle)?.is_some()
            {
                return Err(portal_error("handle unavailable"));
            }
            handle
        }
        None => account.handle.clone(),
    };
    let new_bio = match bio {
        Some(bio) => {
            if bio.len() > 256 {
                return Err(portal_error("bio too long"));
            }
            Some(bio.to_string())
        }
        None => account.bio.clone(),
    };

    conn.execute(
        "UPDATE portal_accounts SET handle = ?1, bio = ?2 WHERE account_id = ?3",
        rusqlite::params![new_handle, new_bio, account_id],
    )?;
    load_account(conn, account_id)?.ok_or_else(|| portal_error("account not found"))
}

pub fn upsert_e2ee_identity(
    conn: &Connection,
    account_id: &str,
    public_jwk: &str,
    updated_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO e2ee_identities (account_id, public_jwk, updated_at)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![account_id, public_jwk, updated_at],
    )?;
    Ok(())
}

// ── Rooms and hash-chained messages ─────────────────────────────────────────

pub fn create_room(conn: &Connection, name: &str, is_public: bool) -> Result<ChatRoom> {
    if name.is_empty() || name.len() > 48 {
        return Err(portal_error("room name invalid"));
    }
    let created_at = unix_now();
    let digest = sha256_hex(format!("{name}:{created_at}").as_bytes());
    let room = ChatRoom {
        room_id: format!("room-{}", &digest[..12]),
        name: name.to_string(),
        created_at,
        is_public,
    };
    store::insert_chat_room(conn, &room)?;
    Ok(room)
}

pub fn list_rooms(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Value>> {
    store::list_chat_rooms(conn, limit, offset)
}

pub fn search_rooms(conn: &Connection, query: &str, limit: i64) -> Result<Vec<Value>> {
    store::search_chat_rooms(conn, query, limit)
}

#[derive(Debug, Clone)]
pub struct MessageReceipt {
    pub prev_digest: String,
    pub msg_digest: String,
    pub chain_head: String,
}

/// Append an E2EE envelope to a room's chain. Returns the canonicalised
/// message fields plus the chain receipt.
pub fn post_message(
    conn: &Connection,
    room_id: &str,
    sender_account_id: &str,
    body: &str,
) -> Result<(Value, MessageReceipt)> {
    if body.is_empty() || body.len() > 512 {
        return Err(portal_error("message invalid"));
    }
    validate_e2ee_envelope(body)?;

    let (prev_digest, seq) = match store::last_chat_message(conn, room_id)? {
        Some((last_seq, chain_head)) => (chain_head, last_seq + 1),
        None => (GENESIS_DIGEST.to_string(), 1),
    };
    let message_id = {
        let digest = sha256_hex(format!("{room_id}:{seq}").as_bytes());
        format!("msg-{}", &digest[..12])
    };
    let message_fields = json!({
        "message_id": message_id,
        "room_id": room_id,
        "sender_account_id": sender_account_id,
        "body": body,
        "seq": seq,
    });
    let msg_digest = sha256_hex(canonical_json(&message_fields).as_bytes());
    let chain_head = sha256_hex(format!("{prev_digest}{msg_digest}").as_bytes());

    store::insert_chat_message(
        conn,
        &ChatMessage {
            message_id,
            room_id: room_id.to_string(),
            sender_account_id: sender_account_id.to_string(),
            body: body.to_string(),
            seq,
            prev_digest: prev_digest.clone(),
            msg_digest: msg_digest.clone(),
            chain_head: chain_head.clone(),
            created_at: unix_now(),
        },
    )?;

    Ok((
        message_fields,
        MessageReceipt {
            prev_digest,
            msg_digest,
            chain_head,
        },
    ))
}

pub fn list_messages(
    conn: &Connection,
    room_id: &str,
    after: Option<i64>,
    limit: i64,
) -> Result<Vec<Value>> {
    store::list_chat_messages(conn, room_id, after, limit)
}

/// Receipts linked to anything this account touched: transfers by wallet
/// address, orders, chain messages, listings, purchases.
pub fn list_account_activity(
    conn: &Connection,
    account_id: &str,
    wallet_address: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>> {
    let mut rows = store::query_json(
        conn,
        "SELECT
           r.receipt_id, r.module, r.action, r.state_hash, r.receipt_hashes, r.replay_ok, r.run_id,
           f.total_paid AS fee_total,
           f.protocol_fee_total AS protocol_fee_total,
           f.platform_fee_amount AS platform_fee_amount,
           f.fee_address AS treasury_address
         FROM receipts r
         LEFT JOIN fee_ledger f ON f.run_id = r.run_id
         WHERE r.run_id IN (
             SELECT run_id FROM wallet_transfers WHERE from_address = ?1 OR to_address = ?1
             UNION
             SELECT run_id FROM orders WHERE owner_address = ?1
             UNION
             SELECT run_id FROM messages WHERE sender_account_id = ?2
             UNION
             SELECT run_id FROM listings WHERE publisher_id = ?1
             UNION
             SELECT run_id FROM purchases WHERE buyer_id = ?1
         )
         ORDER BY r.receipt_id DESC
         LIMIT ?3 OFFSET ?4",
        &[&wallet_address, &account_id, &limit, &offset],
    )?;
    for row in rows.iter_mut() {
        store::decode_receipt_fields(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;

    fn open_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::open(&dir.path().join("portal.db")).expect("open");
        (dir, storage)
    }

    fn test_pubkey() -> String {
        STANDARD.encode([7u8; 32])
    }

    fn sign(pubkey: &str, nonce: &str) -> String {
        let key = STANDARD.decode(pubkey).unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(nonce.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn account_create_derives_stable_ids() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let account = create_account(conn, "alice_01", &test_pubkey()).unwrap();
        assert!(account.account_id.starts_with("acct-"));
        assert!(account.wallet_address.starts_with("wallet-"));
        assert_ne!(account.account_id, account.handle);

        let err = create_account(conn, "alice_01", &test_pubkey()).unwrap_err();
        assert!(err.to_string().contains("handle unavailable"));
    }

    #[test]
    fn handle_rules() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        assert!(create_account(conn, "ab", &test_pubkey()).is_err());
        assert!(create_account(conn, "Upper", &test_pubkey()).is_err());
        assert!(create_account(conn, "ok-name_9", &test_pubkey()).is_ok());
    }

    #[test]
    fn pubkey_must_be_base64_with_16_raw_bytes() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        assert!(create_account(conn, "bob_one", "!!!").is_err());
        let short = STANDARD.encode([1u8; 8]);
        assert!(create_account(conn, "bob_one", &short).is_err());
    }

    #[test]
    fn challenge_verify_issues_session() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        let pubkey = test_pubkey();
        let account = create_account(conn, "carol_01", &pubkey).unwrap();
        let challenge = issue_challenge(conn, &settings, &account.account_id).unwrap();

        let signature = sign(&pubkey, &challenge.nonce);
        let session =
            verify_challenge(conn, &settings, &account.account_id, &challenge.nonce, &signature)
                .unwrap();
        assert_eq!(session.account_id, account.account_id);

        let restored = require_session(conn, &settings, &session.token).unwrap();
        assert_eq!(restored.account_id, account.account_id);
    }

    #[test]
    fn challenge_nonce_is_single_use() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        let pubkey = test_pubkey();
        let account = create_account(conn, "dave_01", &pubkey).unwrap();
        let challenge = issue_challenge(conn, &settings, &account.account_id).unwrap();
        let signature = sign(&pubkey, &challenge.nonce);

        verify_challenge(conn, &settings, &account.account_id, &challenge.nonce, &signature)
            .unwrap();
        let err = verify_challenge(
            conn,
            &settings,
            &account.account_id,
            &challenge.nonce,
            &signature,
        )
        .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn bad_signature_rejected() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        let account = create_account(conn, "erin_01", &test_pubkey()).unwrap();
        let challenge = issue_challenge(conn, &settings, &account.account_id).unwrap();
        let err = verify_challenge(
            conn,
            &settings,
            &account.account_id,
            &challenge.nonce,
            &STANDARD.encode(b"not-a-mac"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("signature invalid"));
    }

    #[test]
    fn logout_invalidates_session() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let settings = Settings::dev_defaults();
        let pubkey = test_pubkey();
        let account = create_account(conn, "fred_01", &pubkey).unwrap();
        let challenge = issue_challenge(conn, &settings, &account.account_id).unwrap();
        let session = verify_challenge(
            conn,
            &settings,
            &account.account_id,
            &challenge.nonce,
            &sign(&pubkey, &challenge.nonce),
        )
        .unwrap();
        logout_session(conn, &session.token).unwrap();
        let err = require_session(conn, &settings, &session.token).unwrap_err();
        assert_eq!(err.code(), "AUTH_INVALID");
    }

    #[test]
    fn message_chain_is_continuous() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let room = create_room(conn, "general", true).unwrap();
        let envelope = "{\"ciphertext\":\"aaa\",\"iv\":\"bbb\"}";
        let (_, first) = post_message(conn, &room.room_id, "acct-1", envelope).unwrap();
        let (_, second) = post_message(conn, &room.room_id, "acct-2", envelope).unwrap();
        let (_, third) = post_message(conn, &room.room_id, "acct-1", envelope).unwrap();

        assert_eq!(first.prev_digest, GENESIS_DIGEST);
        assert_eq!(second.prev_digest, first.chain_head);
        assert_eq!(third.prev_digest, second.chain_head);
        assert_eq!(
            third.chain_head,
            sha256_hex(format!("{}{}", third.prev_digest, third.msg_digest).as_bytes())
        );

        let messages = list_messages(conn, &room.room_id, None, 50).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["seq"], json!(1));
        assert_eq!(messages[2]["seq"], json!(3));
    }

    #[test]
    fn plaintext_message_rejected() {
        let (_dir, storage) = open_storage();
        let conn = storage.conn();
        let room = create_room(conn, "general", true).unwrap();
        assert!(post_message(conn, &room.room_id, "acct-1", "hello world").is_err());
    }
}
