//! Fixed-window request limiting and the risk engine.
//!
//! These are the only long-lived mutable structures in the process; each
//! keeps its counters behind a single mutex. Windows are identified by
//! `now / window_seconds`, so counters reset when the window id changes.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::settings::{RiskMode, Settings};
use crate::time_util::unix_now;

/// Per-key fixed-window counter used for the IP and account rate limits.
pub struct RequestLimiter {
    limit: u32,
    window_seconds: i64,
    state: Mutex<HashMap<String, (u32, i64)>>,
}

impl RequestLimiter {
    pub fn new(limit: u32, window_seconds: i64) -> Self {
        Self {
            limit,
            window_seconds,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = unix_now();
        let mut state = self.state.lock().expect("limiter lock");
        let entry = state.entry(key.to_string()).or_insert((0, now));
        if now - entry.1 >= self.window_seconds {
            *entry = (0, now);
        }
        if entry.0 >= self.limit {
            return false;
        }
        entry.0 += 1;
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct RiskLimit {
    max_count: Option<i64>,
    max_amount: Option<i64>,
    window_seconds: i64,
}

struct RiskCounters {
    /// key → (count, amount, window id)
    counters: HashMap<String, (i64, i64, i64)>,
    /// action → (error count, window id)
    error_counters: HashMap<String, (i64, i64)>,
    /// action → window id the breaker is open for
    breaker_windows: HashMap<String, i64>,
}

pub struct RiskEngine {
    mode: RiskMode,
    global_paused: bool,
    global_limit: RiskLimit,
    account_limit: RiskLimit,
    ip_limit: RiskLimit,
    action_limits: HashMap<&'static str, RiskLimit>,
    breaker_errors_per_min: i64,
    breaker_window_seconds: i64,
    state: Mutex<RiskCounters>,
}

fn minute_limit(max_count: i64, max_amount: Option<i64>) -> RiskLimit {
    RiskLimit {
        max_count: Some(max_count),
        max_amount,
        window_seconds: 60,
    }
}

impl RiskEngine {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut action_limits: HashMap<&'static str, RiskLimit> = HashMap::new();
        action_limits.insert(
            "wallet_faucet",
            minute_limit(settings.risk_faucet_max_per_min, Some(settings.risk_max_faucet_amount)),
        );
        action_limits.insert(
            "wallet_transfer",
            minute_limit(
                settings.risk_transfer_max_per_min,
                Some(settings.risk_max_transfer_amount),
            ),
        );
        action_limits.insert(
            "wallet_airdrop",
            minute_limit(
                settings.risk_airdrop_max_per_min,
                Some(settings.risk_max_airdrop_amount),
            ),
        );
        action_limits.insert(
            "exchange_order",
            minute_limit(
                settings.risk_exchange_orders_per_min,
                Some(settings.risk_max_order_notional),
            ),
        );
        action_limits.insert(
            "exchange_cancel",
            minute_limit(settings.risk_exchange_cancels_per_min, None),
        );
        action_limits.insert(
            "marketplace_purchase",
            minute_limit(
                settings.risk_marketplace_orders_per_min,
                Some(settings.risk_max_store_notional),
            ),
        );
        action_limits.insert(
            "chat_message",
            minute_limit(settings.risk_chat_messages_per_min, None),
        );

        Self {
            mode: settings.risk_mode,
            global_paused: settings.risk_global_mutations_paused,
            global_limit: minute_limit(
                settings.risk_global_max_per_min,
                Some(settings.risk_global_max_amount_per_min),
            ),
            account_limit: minute_limit(
                settings.risk_account_max_per_min,
                Some(settings.risk_account_max_amount_per_min),
            ),
            ip_limit: minute_limit(
                settings.risk_ip_max_per_min,
                Some(settings.risk_ip_max_amount_per_min),
            ),
            action_limits,
            breaker_errors_per_min: settings.risk_breaker_errors_per_min,
            breaker_window_seconds: settings.risk_breaker_window_seconds,
            state: Mutex::new(RiskCounters {
                counters: HashMap::new(),
                error_counters: HashMap::new(),
                breaker_windows: HashMap::new(),
            }),
        }
    }

    fn window(&self, window_seconds: i64) -> i64 {
        unix_now() / window_seconds.max(1)
    }

    fn deny(
        &self,
        scope: &str,
        dimension: &str,
        limit: i64,
        current: i64,
        amount: i64,
    ) -> Result<()> {
        let message = format!("risk limit exceeded: {scope} {dimension} {current}/{limit}");
        if self.mode == RiskMode::Monitor {
            tracing::warn!(scope, dimension, limit, current, amount, "risk limit exceeded");
            return Ok(());
        }
        Err(GatewayError::RiskLimit {
            message,
            details: json!({
                "scope": scope,
                "dimension": dimension,
                "limit": limit,
                "current": current,
                "amount": amount,
            }),
        })
    }

    fn check_limit(
        &self,
        counters: &mut RiskCounters,
        label: &str,
        key: String,
        limit: RiskLimit,
        amount: i64,
    ) -> Result<()> {
        if limit.max_count.is_none() && limit.max_amount.is_none() {
            return Ok(());
        }
        let window_id = self.window(limit.window_seconds);
        let entry = counters.counters.entry(key).or_insert((0, 0, window_id));
        if entry.2 != window_id {
            *entry = (0, 0, window_id);
        }
        entry.0 += 1;
        entry.1 += amount.max(0);
        let (count, total_amount, _) = *entry;
        if let Some(max_count) = limit.max_count {
            if count > max_count {
                self.deny(label, "count", max_count, count, amount)?;
            }
        }
        if let Some(max_amount) = limit.max_amount {
            if total_amount > max_amount {
                self.deny(label, "amount", max_amount, total_amount, amount)?;
            }
        }
        Ok(())
    }

    /// Gate one mutating action. `amount` is the action's notional where it
    /// has one.
    pub fn check(
        &self,
        action: &str,
        account_id: Option<&str>,
        client_ip: Option<&str>,
        amount: Option<i64>,
    ) -> Result<()> {
        if self.mode == RiskMode::Off {
            return Ok(());
        }
        let amount = amount.unwrap_or(0);
        let mut guard = self.state.lock().expect("risk lock");
        let state = &mut *guard;

        if self.global_paused {
            self.deny("global_pause", "count", 0, 1, amount)?;
        }
        let breaker_window = self.window(self.breaker_window_seconds);
        if state.breaker_windows.get(action) == Some(&breaker_window) {
            self.deny("circuit_breaker", "count", 0, 1, amount)?;
        }

        self.check_limit(
            state,
            "global",
            format!("global:{action}"),
            self.global_limit,
            amount,
        )?;
        if let Some(account_id) = account_id {
            self.check_limit(
                state,
                "account",
                format!("account:{account_id}:{action}"),
                self.account_limit,
                amount,
            )?;
        }
        if let Some(client_ip) = client_ip {
            self.check_limit(
                state,
                "ip",
                format!("ip:{client_ip}:{action}"),
                self.ip_limit,
                amount,
            )?;
        }
        if let Some(limit) = self.action_limits.get(action).copied() {
            self.check_limit(
                state,
                &format!("action:{action}"),
                format!("action:{action}"),
                limit,
                amount,
            )?;
        }
        Ok(())
    }

    /// Count a handler failure toward the per-action circuit breaker.
    pub fn record_failure(&self, action: &str) {
        if self.breaker_errors_per_min <= 0 {
            return;
        }
        let window_id = self.window(self.breaker_window_seconds);
        let mut guard = self.state.lock().expect("risk lock");
        let state = &mut *guard;
        let entry = state
            .error_counters
            .entry(action.to_string())
            .or_insert((0, window_id));
        if entry.1 != window_id {
            *entry = (0, window_id);
        }
        entry.0 += 1;
        let count = entry.0;
        if count >= self.breaker_errors_per_min {
            state.breaker_windows.insert(action.to_string(), window_id);
            tracing::warn!(action, count, "circuit breaker opened");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcing() -> RiskEngine {
        let mut settings = Settings::dev_defaults();
        settings.risk_mode = RiskMode::Enforce;
        RiskEngine::from_settings(&settings)
    }

    #[test]
    fn limiter_blocks_after_limit() {
        let limiter = RequestLimiter::new(3, 60);
        assert!(limiter.allow("ip-1"));
        assert!(limiter.allow("ip-1"));
        assert!(limiter.allow("ip-1"));
        assert!(!limiter.allow("ip-1"));
        assert!(limiter.allow("ip-2"));
    }

    #[test]
    fn off_mode_never_denies() {
        let engine = RiskEngine::from_settings(&Settings::dev_defaults());
        for _ in 0..1000 {
            engine
                .check("wallet_transfer", Some("acct"), Some("ip"), Some(1))
                .unwrap();
        }
    }

    #[test]
    fn enforce_mode_denies_over_count() {
        let mut settings = Settings::dev_defaults();
        settings.risk_mode = RiskMode::Enforce;
        settings.risk_transfer_max_per_min = 2;
        let engine = RiskEngine::from_settings(&settings);
        engine.check("wallet_transfer", None, None, Some(1)).unwrap();
        engine.check("wallet_transfer", None, None, Some(1)).unwrap();
        let err = engine
            .check("wallet_transfer", None, None, Some(1))
            .unwrap_err();
        assert_eq!(err.code(), "RISK_LIMIT");
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn enforce_mode_denies_over_amount() {
        let mut settings = Settings::dev_defaults();
        settings.risk_mode = RiskMode::Enforce;
        settings.risk_max_transfer_amount = 100;
        let engine = RiskEngine::from_settings(&settings);
        engine.check("wallet_transfer", None, None, Some(80)).unwrap();
        let err = engine
            .check("wallet_transfer", None, None, Some(80))
            .unwrap_err();
        assert_eq!(err.code(), "RISK_LIMIT");
    }

    #[test]
    fn global_pause_rejects_everything() {
        let mut settings = Settings::dev_defaults();
        settings.risk_mode = RiskMode::Enforce;
        settings.risk_global_mutations_paused = true;
        let engine = RiskEngine::from_settings(&settings);
        assert!(engine.check("wallet_transfer", None, None, None).is_err());
        assert!(engine.check("chat_message", None, None, None).is_err());
    }

    #[test]
    fn breaker_opens_after_error_burst() {
        let mut settings = Settings::dev_defaults();
        settings.risk_mode = RiskMode::Enforce;
        settings.risk_breaker_errors_per_min = 3;
        let engine = RiskEngine::from_settings(&settings);
        engine.check("exchange_order", None, None, None).unwrap();
        for _ in 0..3 {
            engine.record_failure("exchange_order");
        }
        let err = engine.check("exchange_order", None, None, None).unwrap_err();
        assert_eq!(err.code(), "RISK_LIMIT");
        // Other actions are unaffected.
        engine.check("exchange_cancel", None, None, None).unwrap();
    }
}
