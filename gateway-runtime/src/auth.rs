//! Session token issue/verify.
//!
//! Tokens are compact JWT-shaped strings: base64url(no-pad) header and
//! payload with sorted keys, MACed with HMAC-SHA256 over
//! `header.payload`. Verification is constant-time and the payload is only
//! parsed after the MAC checks out.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::json;
use sha2::Sha256;

use crate::error::{GatewayError, Result};
use crate::hashing::canonical_json;
use crate::time_util::unix_now;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct TokenPayload {
    pub account_id: String,
    pub session_id: String,
    pub expires_at: i64,
}

pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn mac_bytes(secret: &str, signing_input: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(signing_input);
    mac.finalize().into_bytes().to_vec()
}

pub fn issue_token(account_id: &str, session_id: &str, expires_at: i64, secret: &str) -> String {
    let header = canonical_json(&json!({"alg": "HS256", "typ": "JWT"}));
    let payload = canonical_json(&json!({
        "exp": expires_at,
        "iat": unix_now(),
        "sid": session_id,
        "sub": account_id,
        "ver": TOKEN_VERSION,
    }));
    let header_b64 = URL_SAFE_NO_PAD.encode(header.as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = mac_bytes(secret, signing_input.as_bytes());
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature))
}

pub fn verify_token(token: &str, secret: &str) -> Result<TokenPayload> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, sig_b64] = parts.as_slice() else {
        return Err(GatewayError::AuthInvalid("token invalid".to_string()));
    };
    let signing_input = format!("{header_b64}.{payload_b64}");
    let provided = URL_SAFE_NO_PAD
        .decode(sig_b64.as_bytes())
        .map_err(|_| GatewayError::AuthInvalid("token signature invalid".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| GatewayError::AuthInvalid("token signature invalid".to_string()))?;

    let payload_raw = URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| GatewayError::AuthInvalid("token payload invalid".to_string()))?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_raw)
        .map_err(|_| GatewayError::AuthInvalid("token payload invalid".to_string()))?;

    let account_id = payload
        .get("sub")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::AuthInvalid("token subject invalid".to_string()))?;
    let session_id = payload
        .get("sid")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::AuthInvalid("token session invalid".to_string()))?;
    let expires_at = payload
        .get("exp")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| GatewayError::AuthInvalid("token expiry invalid".to_string()))?;
    if unix_now() > expires_at {
        return Err(GatewayError::AuthInvalid("token expired".to_string()));
    }

    Ok(TokenPayload {
        account_id: account_id.to_string(),
        session_id: session_id.to_string(),
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "testnet-session-secret";

    #[test]
    fn issued_token_verifies() {
        let exp = unix_now() + 3600;
        let token = issue_token("acct-0011223344556677", &generate_session_id(), exp, SECRET);
        let payload = verify_token(&token, SECRET).unwrap();
        assert_eq!(payload.account_id, "acct-0011223344556677");
        assert_eq!(payload.expires_at, exp);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("acct-x", "sid", unix_now() + 3600, SECRET);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = issue_token("acct-x", "sid", unix_now() + 3600, SECRET);
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = URL_SAFE_NO_PAD.encode(b"{\"sub\":\"acct-evil\"}");
        assert!(verify_token(&parts.join("."), SECRET).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("acct-x", "sid", unix_now() - 1, SECRET);
        let err = verify_token(&token, SECRET).unwrap_err();
        assert_eq!(err.code(), "AUTH_INVALID");
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(verify_token("nonsense", SECRET).is_err());
        assert!(verify_token("a.b", SECRET).is_err());
        assert!(verify_token("a.b.c.d", SECRET).is_err());
    }
}
