//! Validated environment snapshot.
//!
//! Every knob has an explicit default and bounds; anything out of range is
//! a boot-time error rather than a runtime surprise. `dev` keeps documented
//! fallbacks for the session secret and treasury address, `staging`/`prod`
//! refuse to start without real values.

use crate::error::{GatewayError, Result};

const ENV_CHOICES: &[&str] = &["dev", "staging", "prod"];
const RISK_MODE_CHOICES: &[&str] = &["off", "monitor", "enforce"];
const ADDRESS_MIN_LEN: usize = 8;
const SESSION_SECRET_MIN_LEN: usize = 32;
const KEY_MIN_LEN: usize = 8;

const DEV_SESSION_SECRET: &str = "testnet-session-secret";
const DEV_TREASURY_ADDRESS: &str = "0x0Aa313fCE773786C8425a13B96DB64205c5edCBc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMode {
    Off,
    Monitor,
    Enforce,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub portal_session_secret: String,
    pub portal_challenge_ttl: i64,
    pub portal_session_ttl: i64,
    pub treasury_address: String,
    pub platform_fee_bps: i64,
    pub protocol_fee_min: Option<i64>,
    pub faucet_cooldown_seconds: i64,
    pub faucet_max_amount_per_24h: i64,
    pub faucet_max_claims_per_24h: i64,
    pub faucet_ip_max_claims_per_24h: i64,
    pub legacy_unauth_endpoints: bool,
    pub compliance_enabled: bool,
    pub compliance_url: String,
    pub compliance_timeout_seconds: i64,
    pub compliance_fail_closed: bool,
    pub risk_mode: RiskMode,
    pub risk_global_mutations_paused: bool,
    pub risk_global_max_per_min: i64,
    pub risk_global_max_amount_per_min: i64,
    pub risk_account_max_per_min: i64,
    pub risk_account_max_amount_per_min: i64,
    pub risk_ip_max_per_min: i64,
    pub risk_ip_max_amount_per_min: i64,
    pub risk_transfer_max_per_min: i64,
    pub risk_faucet_max_per_min: i64,
    pub risk_airdrop_max_per_min: i64,
    pub risk_exchange_orders_per_min: i64,
    pub risk_exchange_cancels_per_min: i64,
    pub risk_marketplace_orders_per_min: i64,
    pub risk_chat_messages_per_min: i64,
    pub risk_max_transfer_amount: i64,
    pub risk_max_faucet_amount: i64,
    pub risk_max_airdrop_amount: i64,
    pub risk_max_order_notional: i64,
    pub risk_max_store_notional: i64,
    pub risk_breaker_errors_per_min: i64,
    pub risk_breaker_window_seconds: i64,
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_default().trim().to_string()
}

fn require_env_choice(value: &str) -> Result<Environment> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Ok(Environment::Dev);
    }
    match normalized.as_str() {
        "dev" => Ok(Environment::Dev),
        "staging" => Ok(Environment::Staging),
        "prod" => Ok(Environment::Prod),
        _ => Err(GatewayError::Settings(format!(
            "NYX_ENV must be one of {}",
            ENV_CHOICES.join(", ")
        ))),
    }
}

fn require_risk_mode(value: &str, env: Environment) -> Result<RiskMode> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Ok(match env {
            Environment::Dev => RiskMode::Off,
            Environment::Staging => RiskMode::Monitor,
            Environment::Prod => RiskMode::Enforce,
        });
    }
    match normalized.as_str() {
        "off" => Ok(RiskMode::Off),
        "monitor" => Ok(RiskMode::Monitor),
        "enforce" => Ok(RiskMode::Enforce),
        _ => Err(GatewayError::Settings(format!(
            "NYX_RISK_MODE must be one of {}",
            RISK_MODE_CHOICES.join(", ")
        ))),
    }
}

fn require_int(name: &str, default: i64, min_value: i64, max_value: i64) -> Result<i64> {
    let raw = env_var(name);
    if raw.is_empty() {
        return Ok(default);
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| GatewayError::Settings(format!("{name} must be int")))?;
    if value < min_value || value > max_value {
        return Err(GatewayError::Settings(format!("{name} out of bounds")));
    }
    Ok(value)
}

fn optional_int(name: &str, min_value: i64, max_value: i64) -> Result<Option<i64>> {
    let raw = env_var(name);
    if raw.is_empty() {
        return Ok(None);
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| GatewayError::Settings(format!("{name} must be int")))?;
    if value < min_value || value > max_value {
        return Err(GatewayError::Settings(format!("{name} out of bounds")));
    }
    Ok(Some(value))
}

fn require_bool(name: &str, default: bool) -> Result<bool> {
    let raw = env_var(name).to_lowercase();
    if raw.is_empty() {
        return Ok(default);
    }
    match raw.as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(GatewayError::Settings(format!("{name} must be boolean"))),
    }
}

fn require_secret(env: Environment) -> Result<String> {
    let secret = env_var("NYX_PORTAL_SESSION_SECRET");
    if secret.is_empty() {
        if env == Environment::Dev {
            return Ok(DEV_SESSION_SECRET.to_string());
        }
        return Err(GatewayError::Settings(
            "NYX_PORTAL_SESSION_SECRET required for staging/prod".to_string(),
        ));
    }
    if env != Environment::Dev && secret.len() < SESSION_SECRET_MIN_LEN {
        return Err(GatewayError::Settings(
            "NYX_PORTAL_SESSION_SECRET too short for staging/prod".to_string(),
        ));
    }
    Ok(secret)
}

fn require_treasury_address(env: Environment) -> Result<String> {
    let mut address = env_var("NYX_TESTNET_TREASURY_ADDRESS");
    if address.is_empty() {
        address = env_var("NYX_TESTNET_FEE_ADDRESS");
    }
    if address.is_empty() {
        if env == Environment::Dev {
            return Ok(DEV_TREASURY_ADDRESS.to_string());
        }
        return Err(GatewayError::Settings(
            "NYX_TESTNET_TREASURY_ADDRESS required for staging/prod".to_string(),
        ));
    }
    if address.len() < ADDRESS_MIN_LEN {
        return Err(GatewayError::Settings(
            "NYX_TESTNET_TREASURY_ADDRESS too short".to_string(),
        ));
    }
    Ok(address)
}

fn validate_uuid_key(name: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    let hyphens_at = [8usize, 13, 18, 23];
    let well_formed = value.len() == 36
        && value.chars().enumerate().all(|(i, ch)| {
            if hyphens_at.contains(&i) {
                ch == '-'
            } else {
                ch.is_ascii_hexdigit()
            }
        });
    if !well_formed {
        return Err(GatewayError::Settings(format!("{name} must be UUID format")));
    }
    Ok(value.to_string())
}

fn validate_generic_key(name: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    if value.len() < KEY_MIN_LEN {
        return Err(GatewayError::Settings(format!("{name} too short")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(GatewayError::Settings(format!("{name} invalid")));
    }
    Ok(value.to_string())
}

impl Settings {
    /// Build a settings snapshot from the process environment.
    pub fn from_env() -> Result<Self> {
        let env = require_env_choice(&env_var("NYX_ENV"))?;
        let portal_session_secret = require_secret(env)?;
        let portal_challenge_ttl = require_int("NYX_PORTAL_CHALLENGE_TTL", 300, 60, 3600)?;
        let portal_session_ttl = require_int("NYX_PORTAL_SESSION_TTL", 3600, 300, 24 * 60 * 60)?;
        let treasury_address = require_treasury_address(env)?;
        let platform_fee_bps = require_int("NYX_PLATFORM_FEE_BPS", 10, 0, 10_000)?;
        let protocol_fee_min = optional_int("NYX_PROTOCOL_FEE_MIN", 0, 1_000_000_000)?;
        let faucet_cooldown_seconds =
            require_int("NYX_FAUCET_COOLDOWN_SECONDS", 24 * 60 * 60, 0, 30 * 24 * 60 * 60)?;
        let faucet_max_amount_per_24h =
            require_int("NYX_FAUCET_MAX_AMOUNT_PER_24H", 1_000, 0, 1_000_000_000)?;
        let faucet_max_claims_per_24h = require_int("NYX_FAUCET_MAX_CLAIMS_PER_24H", 1, 0, 1000)?;
        let faucet_ip_max_claims_per_24h =
            require_int("NYX_FAUCET_IP_MAX_CLAIMS_PER_24H", 5, 0, 10_000)?;
        let legacy_unauth_endpoints = require_bool("NYX_LEGACY_UNAUTH_ENDPOINTS", true)?;

        // Third-party keys are validated even though the integrations that
        // consume them live outside this crate; a malformed key is a config
        // error either way.
        validate_uuid_key("NYX_0X_API_KEY", &env_var("NYX_0X_API_KEY"))?;
        validate_uuid_key("NYX_JUPITER_API_KEY", &env_var("NYX_JUPITER_API_KEY"))?;
        validate_generic_key("NYX_MAGIC_EDEN_API_KEY", &env_var("NYX_MAGIC_EDEN_API_KEY"))?;
        validate_generic_key("NYX_PAYEVM_API_KEY", &env_var("NYX_PAYEVM_API_KEY"))?;

        let compliance_enabled = require_bool("NYX_COMPLIANCE_ENABLED", false)?;
        let compliance_url = env_var("NYX_COMPLIANCE_URL");
        let compliance_timeout_seconds = require_int("NYX_COMPLIANCE_TIMEOUT_SECONDS", 3, 1, 60)?;
        let compliance_fail_closed = require_bool("NYX_COMPLIANCE_FAIL_CLOSED", true)?;
        if compliance_enabled && env != Environment::Dev && compliance_url.is_empty() {
            return Err(GatewayError::Settings(
                "NYX_COMPLIANCE_URL required when compliance is enabled".to_string(),
            ));
        }

        let risk_mode = require_risk_mode(&env_var("NYX_RISK_MODE"), env)?;

        Ok(Self {
            env,
            portal_session_secret,
            portal_challenge_ttl,
            portal_session_ttl,
            treasury_address,
            platform_fee_bps,
            protocol_fee_min,
            faucet_cooldown_seconds,
            faucet_max_amount_per_24h,
            faucet_max_claims_per_24h,
            faucet_ip_max_claims_per_24h,
            legacy_unauth_endpoints,
            compliance_enabled,
            compliance_url,
            compliance_timeout_seconds,
            compliance_fail_closed,
            risk_mode,
            risk_global_mutations_paused: require_bool("NYX_RISK_GLOBAL_MUTATIONS_PAUSED", false)?,
            risk_global_max_per_min: require_int("NYX_RISK_GLOBAL_MAX_PER_MIN", 600, 0, 100_000)?,
            risk_global_max_amount_per_min: require_int(
                "NYX_RISK_GLOBAL_MAX_AMOUNT_PER_MIN",
                10_000_000,
                0,
                1_000_000_000_000,
            )?,
            risk_account_max_per_min: require_int("NYX_RISK_ACCOUNT_MAX_PER_MIN", 120, 0, 100_000)?,
            risk_account_max_amount_per_min: require_int(
                "NYX_RISK_ACCOUNT_MAX_AMOUNT_PER_MIN",
                2_000_000,
                0,
                1_000_000_000_000,
            )?,
            risk_ip_max_per_min: require_int("NYX_RISK_IP_MAX_PER_MIN", 240, 0, 100_000)?,
            risk_ip_max_amount_per_min: require_int(
                "NYX_RISK_IP_MAX_AMOUNT_PER_MIN",
                3_000_000,
                0,
                1_000_000_000_000,
            )?,
            risk_transfer_max_per_min: require_int("NYX_RISK_TRANSFER_MAX_PER_MIN", 30, 0, 100_000)?,
            risk_faucet_max_per_min: require_int("NYX_RISK_FAUCET_MAX_PER_MIN", 30, 0, 100_000)?,
            risk_airdrop_max_per_min: require_int("NYX_RISK_AIRDROP_MAX_PER_MIN", 30, 0, 100_000)?,
            risk_exchange_orders_per_min: require_int(
                "NYX_RISK_EXCHANGE_ORDERS_PER_MIN",
                60,
                0,
                100_000,
            )?,
            risk_exchange_cancels_per_min: require_int(
                "NYX_RISK_EXCHANGE_CANCELS_PER_MIN",
                120,
                0,
                100_000,
            )?,
            risk_marketplace_orders_per_min: require_int(
                "NYX_RISK_MARKETPLACE_ORDERS_PER_MIN",
                60,
                0,
                100_000,
            )?,
            risk_chat_messages_per_min: require_int(
                "NYX_RISK_CHAT_MESSAGES_PER_MIN",
                120,
                0,
                100_000,
            )?,
            risk_max_transfer_amount: require_int(
                "NYX_RISK_MAX_TRANSFER_AMOUNT",
                250_000,
                0,
                1_000_000_000_000,
            )?,
            risk_max_faucet_amount: require_int(
                "NYX_RISK_MAX_FAUCET_AMOUNT",
                10_000,
                0,
                1_000_000_000_000,
            )?,
            risk_max_airdrop_amount: require_int(
                "NYX_RISK_MAX_AIRDROP_AMOUNT",
                50_000,
                0,
                1_000_000_000_000,
            )?,
            risk_max_order_notional: require_int(
                "NYX_RISK_MAX_ORDER_NOTIONAL",
                500_000,
                0,
                1_000_000_000_000,
            )?,
            risk_max_store_notional: require_int(
                "NYX_RISK_MAX_STORE_NOTIONAL",
                250_000,
                0,
                1_000_000_000_000,
            )?,
            risk_breaker_errors_per_min: require_int(
                "NYX_RISK_BREAKER_ERRORS_PER_MIN",
                40,
                0,
                100_000,
            )?,
            risk_breaker_window_seconds: require_int(
                "NYX_RISK_BREAKER_WINDOW_SECONDS",
                60,
                10,
                3600,
            )?,
        })
    }

    /// Dev defaults without touching the process environment. Used by tests
    /// and anywhere a snapshot needs to be constructed directly.
    pub fn dev_defaults() -> Self {
        Self {
            env: Environment::Dev,
            portal_session_secret: DEV_SESSION_SECRET.to_string(),
            portal_challenge_ttl: 300,
            portal_session_ttl: 3600,
            treasury_address: DEV_TREASURY_ADDRESS.to_string(),
            platform_fee_bps: 10,
            protocol_fee_min: None,
            faucet_cooldown_seconds: 24 * 60 * 60,
            faucet_max_amount_per_24h: 1_000,
            faucet_max_claims_per_24h: 1,
            faucet_ip_max_claims_per_24h: 5,
            legacy_unauth_endpoints: true,
            compliance_enabled: false,
            compliance_url: String::new(),
            compliance_timeout_seconds: 3,
            compliance_fail_closed: true,
            risk_mode: RiskMode::Off,
            risk_global_mutations_paused: false,
            risk_global_max_per_min: 600,
            risk_global_max_amount_per_min: 10_000_000,
            risk_account_max_per_min: 120,
            risk_account_max_amount_per_min: 2_000_000,
            risk_ip_max_per_min: 240,
            risk_ip_max_amount_per_min: 3_000_000,
            risk_transfer_max_per_min: 30,
            risk_faucet_max_per_min: 30,
            risk_airdrop_max_per_min: 30,
            risk_exchange_orders_per_min: 60,
            risk_exchange_cancels_per_min: 120,
            risk_marketplace_orders_per_min: 60,
            risk_chat_messages_per_min: 120,
            risk_max_transfer_amount: 250_000,
            risk_max_faucet_amount: 10_000,
            risk_max_airdrop_amount: 50_000,
            risk_max_order_notional: 500_000,
            risk_max_store_notional: 250_000,
            risk_breaker_errors_per_min: 40,
            risk_breaker_window_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_key_validation() {
        assert!(validate_uuid_key("K", "b0a1c2d3-e4f5-6789-abcd-ef0123456789").is_ok());
        assert!(validate_uuid_key("K", "not-a-uuid").is_err());
        assert!(validate_uuid_key("K", "").unwrap().is_empty());
    }

    #[test]
    fn generic_key_validation() {
        assert!(validate_generic_key("K", "abcd1234").is_ok());
        assert!(validate_generic_key("K", "short").is_err());
        assert!(validate_generic_key("K", "has space9").is_err());
    }

    #[test]
    fn dev_defaults_sane() {
        let settings = Settings::dev_defaults();
        assert_eq!(settings.env, Environment::Dev);
        assert!(settings.portal_session_secret.len() >= 8);
        assert!(settings.treasury_address.len() >= 8);
        assert_eq!(settings.faucet_max_claims_per_24h, 1);
    }

    #[test]
    fn risk_mode_defaults_by_env() {
        assert_eq!(require_risk_mode("", Environment::Dev).unwrap(), RiskMode::Off);
        assert_eq!(
            require_risk_mode("", Environment::Staging).unwrap(),
            RiskMode::Monitor
        );
        assert_eq!(
            require_risk_mode("", Environment::Prod).unwrap(),
            RiskMode::Enforce
        );
        assert!(require_risk_mode("loud", Environment::Dev).is_err());
    }
}
