use thiserror::Error;

/// Closed error taxonomy for the gateway. Every variant carries a stable
/// code string and an HTTP status so the surface layer never has to guess.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("auth required")]
    AuthRequired,

    #[error("{0}")]
    AuthInvalid(String),

    #[error("{param} required")]
    ParamRequired { param: String },

    #[error("{message}")]
    ParamInvalid { param: String, message: String },

    #[error("{field} must match authenticated account")]
    AddressMismatch { field: MismatchField },

    #[error("airdrop already claimed")]
    TaskAlreadyClaimed { task_id: String, claim_run_id: String },

    #[error("task not completed")]
    TaskIncomplete { task_id: String },

    #[error("task_id not supported")]
    TaskUnknown { task_id: String },

    #[error("faucet cooldown active")]
    FaucetCooldown { retry_after_seconds: i64 },

    #[error("daily faucet claim limit exceeded")]
    FaucetDailyClaimsExceeded { max_claims_per_24h: i64 },

    #[error("daily faucet amount limit exceeded")]
    FaucetDailyAmountExceeded {
        max_amount_per_24h: i64,
        already_claimed_amount_24h: i64,
    },

    #[error("ip faucet claim limit exceeded")]
    FaucetIpLimitExceeded { ip_max_claims_per_24h: i64 },

    #[error("{0}")]
    InsufficientBalance(String),

    #[error("{message}")]
    AllowlistDeny {
        message: String,
        details: serde_json::Value,
    },

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("upstream http error {0}")]
    UpstreamHttpError(u16),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream returned invalid json")]
    UpstreamBadJson,

    #[error("{message}")]
    RiskLimit {
        message: String,
        details: serde_json::Value,
    },

    #[error("rate limit exceeded")]
    AccountRateLimit,

    #[error("not a channel participant")]
    ForbiddenChatChannel,

    #[error("{message}")]
    Compliance {
        code: ComplianceCode,
        message: String,
        details: serde_json::Value,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("evidence error: {0}")]
    Evidence(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which ownership check failed. Each maps to its own 403 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchField {
    Address,
    FromAddress,
    FaucetAddress,
}

impl std::fmt::Display for MismatchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::FromAddress => write!(f, "from_address"),
            Self::FaucetAddress => write!(f, "faucet address"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceCode {
    AuthRequired,
    ConfigMissing,
    Blocked,
    Unavailable,
}

impl GatewayError {
    pub fn param_required(param: &str) -> Self {
        Self::ParamRequired {
            param: param.to_string(),
        }
    }

    pub fn param_invalid(param: &str, message: impl Into<String>) -> Self {
        Self::ParamInvalid {
            param: param.to_string(),
            message: message.into(),
        }
    }

    pub fn allowlist_deny(message: impl Into<String>) -> Self {
        Self::AllowlistDeny {
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Stable code string used in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthInvalid(_) => "AUTH_INVALID",
            Self::ParamRequired { .. } => "PARAM_REQUIRED",
            Self::ParamInvalid { .. } => "PARAM_INVALID",
            Self::AddressMismatch { field } => match field {
                MismatchField::Address => "ADDRESS_MISMATCH",
                MismatchField::FromAddress => "FROM_ADDRESS_MISMATCH",
                MismatchField::FaucetAddress => "FAUCET_ADDRESS_MISMATCH",
            },
            Self::TaskAlreadyClaimed { .. } => "TASK_ALREADY_CLAIMED",
            Self::TaskIncomplete { .. } => "TASK_INCOMPLETE",
            Self::TaskUnknown { .. } => "TASK_UNKNOWN",
            Self::FaucetCooldown { .. } => "FAUCET_COOLDOWN",
            Self::FaucetDailyClaimsExceeded { .. } => "FAUCET_DAILY_CLAIMS_EXCEEDED",
            Self::FaucetDailyAmountExceeded { .. } => "FAUCET_DAILY_AMOUNT_EXCEEDED",
            Self::FaucetIpLimitExceeded { .. } => "FAUCET_IP_LIMIT_EXCEEDED",
            Self::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            Self::AllowlistDeny { .. } => "ALLOWLIST_DENY",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::UpstreamHttpError(_) => "UPSTREAM_HTTP_ERROR",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamBadJson => "UPSTREAM_BAD_JSON",
            Self::RiskLimit { .. } => "RISK_LIMIT",
            Self::AccountRateLimit => "ACCOUNT_RATE_LIMIT",
            Self::ForbiddenChatChannel => "FORBIDDEN_CHAT_CHANNEL",
            Self::Compliance { code, .. } => match code {
                ComplianceCode::AuthRequired => "COMPLIANCE_AUTH_REQUIRED",
                ComplianceCode::ConfigMissing => "COMPLIANCE_CONFIG_MISSING",
                ComplianceCode::Blocked => "COMPLIANCE_BLOCKED",
                ComplianceCode::Unavailable => "COMPLIANCE_UNAVAILABLE",
            },
            Self::BadRequest(_) | Self::Settings(_) | Self::Evidence(_) => "BAD_REQUEST",
            Self::Db(_) | Self::Io(_) => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthRequired | Self::AuthInvalid(_) => 401,
            Self::AddressMismatch { .. } | Self::ForbiddenChatChannel => 403,
            Self::TaskAlreadyClaimed { .. } | Self::TaskIncomplete { .. } => 409,
            Self::TaskUnknown { .. } => 404,
            Self::FaucetCooldown { .. }
            | Self::FaucetDailyClaimsExceeded { .. }
            | Self::FaucetDailyAmountExceeded { .. }
            | Self::FaucetIpLimitExceeded { .. }
            | Self::RiskLimit { .. }
            | Self::AccountRateLimit => 429,
            Self::UpstreamTimeout => 504,
            Self::UpstreamHttpError(_) | Self::UpstreamUnavailable(_) | Self::UpstreamBadJson => {
                502
            }
            Self::Compliance { code, .. } => match code {
                ComplianceCode::AuthRequired => 401,
                ComplianceCode::ConfigMissing => 500,
                ComplianceCode::Blocked => 403,
                ComplianceCode::Unavailable => 503,
            },
            Self::Db(_) | Self::Io(_) => 500,
            _ => 400,
        }
    }

    /// Structured detail object for the error envelope; Null when a variant
    /// carries nothing beyond its message.
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::ParamRequired { param } | Self::ParamInvalid { param, .. } => {
                serde_json::json!({ "param": param })
            }
            Self::TaskAlreadyClaimed {
                task_id,
                claim_run_id,
            } => serde_json::json!({ "task_id": task_id, "claim_run_id": claim_run_id }),
            Self::TaskIncomplete { task_id } | Self::TaskUnknown { task_id } => {
                serde_json::json!({ "task_id": task_id })
            }
            Self::FaucetCooldown {
                retry_after_seconds,
            } => serde_json::json!({ "retry_after_seconds": retry_after_seconds }),
            Self::FaucetDailyClaimsExceeded { max_claims_per_24h } => {
                serde_json::json!({ "max_claims_per_24h": max_claims_per_24h })
            }
            Self::FaucetDailyAmountExceeded {
                max_amount_per_24h,
                already_claimed_amount_24h,
            } => serde_json::json!({
                "max_amount_per_24h": max_amount_per_24h,
                "already_claimed_amount_24h": already_claimed_amount_24h,
            }),
            Self::FaucetIpLimitExceeded {
                ip_max_claims_per_24h,
            } => serde_json::json!({ "ip_max_claims_per_24h": ip_max_claims_per_24h }),
            Self::AllowlistDeny { details, .. }
            | Self::RiskLimit { details, .. }
            | Self::Compliance { details, .. } => details.clone(),
            _ => serde_json::Value::Null,
        }
    }

    /// Message safe to show to callers. Database and IO failures are
    /// programming/environment errors and must not leak internals.
    pub fn public_message(&self) -> String {
        match self {
            Self::Db(_) => "internal storage error".to_string(),
            Self::Io(_) => "internal io error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
