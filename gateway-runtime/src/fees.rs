//! Fee pricer and ledger binding.
//!
//! A quote is a pure function of (module, action, canonicalised payload,
//! run_id) plus the configured knobs, so replaying a run reproduces the
//! identical ledger row. Only the payer is rebindable, via [`FeeQuote::sponsor`].

use serde_json::{Map, Value};

use crate::identifiers::deterministic_id;
use crate::settings::Settings;
use crate::store::FeeLedgerRecord;

#[derive(Debug, Clone)]
pub struct FeeQuote {
    pub fee_id: String,
    pub module: String,
    pub action: String,
    pub protocol_fee_total: i64,
    pub platform_fee_amount: i64,
    pub total_paid: i64,
    pub fee_address: String,
    pub run_id: String,
    pub payer: Option<String>,
}

impl FeeQuote {
    /// Rebind the payer without touching any amount.
    pub fn sponsor(mut self, payer: &str) -> Self {
        self.payer = Some(payer.to_string());
        self
    }

    pub fn to_record(&self) -> FeeLedgerRecord {
        FeeLedgerRecord {
            fee_id: self.fee_id.clone(),
            module: self.module.clone(),
            action: self.action.clone(),
            protocol_fee_total: self.protocol_fee_total,
            platform_fee_amount: self.platform_fee_amount,
            total_paid: self.total_paid,
            fee_address: self.fee_address.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

/// Notional the platform fee scales with: `amount`, else `price * qty`,
/// else `price`, else 1.
fn payload_notional(payload: &Map<String, Value>) -> i64 {
    let int_field = |key: &str| payload.get(key).and_then(Value::as_i64).filter(|v| *v > 0);
    if let Some(amount) = int_field("amount") {
        return amount;
    }
    if let Some(price) = int_field("price") {
        let qty = int_field("qty").unwrap_or(1);
        return price.saturating_mul(qty);
    }
    1
}

fn platform_fee(notional: i64, bps: i64) -> i64 {
    if bps <= 0 {
        return 0;
    }
    // Round-half-up in integer space.
    let scaled = notional.saturating_mul(bps).saturating_add(5_000) / 10_000;
    scaled.max(1)
}

pub fn route_fee(
    settings: &Settings,
    module: &str,
    action: &str,
    payload: &Map<String, Value>,
    run_id: &str,
) -> FeeQuote {
    let notional = payload_notional(payload);
    let protocol_fee_total = settings.protocol_fee_min.unwrap_or(1).max(1);
    let platform_fee_amount = platform_fee(notional, settings.platform_fee_bps);
    FeeQuote {
        fee_id: deterministic_id("fee", run_id),
        module: module.to_string(),
        action: action.to_string(),
        protocol_fee_total,
        platform_fee_amount,
        total_paid: protocol_fee_total + platform_fee_amount,
        fee_address: settings.treasury_address.clone(),
        run_id: run_id.to_string(),
        payer: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn fee_is_positive_and_additive_for_every_mutation() {
        let settings = Settings::dev_defaults();
        let scenarios: &[(&str, &str, Value)] = &[
            ("wallet", "transfer", json!({"amount": 10})),
            ("wallet", "faucet", json!({"amount": 100})),
            ("wallet", "airdrop", json!({"amount": 100})),
            ("exchange", "place_order", json!({"amount": 5, "price": 10})),
            ("exchange", "cancel_order", json!({"amount": 1})),
            ("marketplace", "listing_publish", json!({"price": 10})),
            ("marketplace", "purchase_listing", json!({"qty": 1, "price": 10})),
            ("chat", "message_event", json!({"amount": 1})),
            ("web2", "guard_request", json!({"amount": 1})),
        ];
        for (module, action, body) in scenarios {
            let quote = route_fee(
                &settings,
                module,
                action,
                &payload(body.clone()),
                &format!("run-{module}-{action}"),
            );
            assert!(quote.total_paid >= 1, "{module}.{action} must charge");
            assert!(quote.protocol_fee_total >= 1);
            assert!(quote.platform_fee_amount >= 0);
            assert_eq!(
                quote.total_paid,
                quote.protocol_fee_total + quote.platform_fee_amount
            );
        }
    }

    #[test]
    fn quote_is_reproducible_for_same_inputs() {
        let settings = Settings::dev_defaults();
        let body = payload(json!({"amount": 42, "price": 7}));
        let first = route_fee(&settings, "exchange", "place_order", &body, "run-q");
        let second = route_fee(&settings, "exchange", "place_order", &body, "run-q");
        assert_eq!(first.fee_id, second.fee_id);
        assert_eq!(first.total_paid, second.total_paid);
    }

    #[test]
    fn platform_fee_floor_is_one_when_bps_enabled() {
        let settings = Settings::dev_defaults();
        // notional 10 at 10 bps rounds to 0, floor kicks in
        let quote = route_fee(
            &settings,
            "marketplace",
            "listing_publish",
            &payload(json!({"price": 10})),
            "run-floor",
        );
        assert_eq!(quote.platform_fee_amount, 1);
    }

    #[test]
    fn zero_bps_means_no_platform_fee() {
        let mut settings = Settings::dev_defaults();
        settings.platform_fee_bps = 0;
        let quote = route_fee(
            &settings,
            "wallet",
            "transfer",
            &payload(json!({"amount": 500})),
            "run-nobps",
        );
        assert_eq!(quote.platform_fee_amount, 0);
        assert_eq!(quote.total_paid, quote.protocol_fee_total);
    }

    #[test]
    fn sponsor_rebinds_payer_only() {
        let settings = Settings::dev_defaults();
        let quote = route_fee(
            &settings,
            "wallet",
            "transfer",
            &payload(json!({"amount": 10})),
            "run-s",
        );
        let total = quote.total_paid;
        let sponsored = quote.sponsor("sponsor-account");
        assert_eq!(sponsored.payer.as_deref(), Some("sponsor-account"));
        assert_eq!(sponsored.total_paid, total);
    }
}
