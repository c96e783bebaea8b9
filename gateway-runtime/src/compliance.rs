//! Optional compliance clearance call. Disabled by default; when enabled,
//! a deny or (with fail-closed) an unreachable service blocks the action.

use serde_json::{Value, json};

use crate::error::{ComplianceCode, GatewayError, Result};
use crate::settings::Settings;
use crate::time_util::unix_now;

pub async fn require_clearance(
    settings: &Settings,
    account_id: Option<&str>,
    wallet_address: Option<&str>,
    module: &str,
    action: &str,
    run_id: &str,
) -> Result<Value> {
    if !settings.compliance_enabled {
        return Ok(json!({"status": "skipped"}));
    }

    let (Some(account_id), Some(wallet_address)) = (account_id, wallet_address) else {
        return Err(GatewayError::Compliance {
            code: ComplianceCode::AuthRequired,
            message: "compliance requires authenticated identity".to_string(),
            details: Value::Null,
        });
    };
    if settings.compliance_url.is_empty() {
        return Err(GatewayError::Compliance {
            code: ComplianceCode::ConfigMissing,
            message: "compliance url not configured".to_string(),
            details: Value::Null,
        });
    }

    let payload = json!({
        "account_id": account_id,
        "wallet_address": wallet_address,
        "module": module,
        "action": action,
        "run_id": run_id,
        "timestamp": unix_now(),
        "metadata": {},
    });

    let unavailable = |err: String| -> Result<Value> {
        if settings.compliance_fail_closed {
            Err(GatewayError::Compliance {
                code: ComplianceCode::Unavailable,
                message: "compliance service unavailable".to_string(),
                details: json!({ "error": err }),
            })
        } else {
            Ok(json!({"status": "unavailable", "error": err}))
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(
            settings.compliance_timeout_seconds as u64,
        ))
        .build()
    {
        Ok(client) => client,
        Err(err) => return unavailable(err.to_string()),
    };
    let response = match client
        .post(&settings.compliance_url)
        .json(&payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return unavailable(err.to_string()),
    };
    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(err) => return unavailable(err.to_string()),
    };

    let decision = body
        .get("decision")
        .or_else(|| body.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    if matches!(decision.as_str(), "allow" | "approved" | "ok") {
        return Ok(json!({"status": "ok", "decision": decision}));
    }
    Err(GatewayError::Compliance {
        code: ComplianceCode::Blocked,
        message: "compliance decision blocked".to_string(),
        details: json!({ "decision": if decision.is_empty() { "deny".to_string() } else { decision } }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_compliance_is_skipped() {
        let settings = Settings::dev_defaults();
        let verdict = require_clearance(&settings, None, None, "wallet", "transfer", "run-1")
            .await
            .unwrap();
        assert_eq!(verdict["status"], json!("skipped"));
    }

    #[tokio::test]
    async fn enabled_without_identity_is_rejected() {
        let mut settings = Settings::dev_defaults();
        settings.compliance_enabled = true;
        settings.compliance_url = "https://compliance.invalid/check".to_string();
        let err = require_clearance(&settings, None, None, "wallet", "transfer", "run-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMPLIANCE_AUTH_REQUIRED");
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn unreachable_service_fails_open_when_configured() {
        let mut settings = Settings::dev_defaults();
        settings.compliance_enabled = true;
        settings.compliance_url = "http://127.0.0.1:1/check".to_string();
        settings.compliance_fail_closed = false;
        let verdict = require_clearance(
            &settings,
            Some("acct-1"),
            Some("wallet-1"),
            "wallet",
            "transfer",
            "run-1",
        )
        .await
        .unwrap();
        assert_eq!(verdict["status"], json!("unavailable"));

        settings.compliance_fail_closed = true;
        let err = require_clearance(
            &settings,
            Some("acct-1"),
            Some("wallet-1"),
            "wallet",
            "transfer",
            "run-1",
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "COMPLIANCE_UNAVAILABLE");
        assert_eq!(err.http_status(), 503);
    }
}
