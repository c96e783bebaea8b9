//! Supported-asset registry. Closed set; NYXT is always the fee asset.

use serde::Serialize;

pub const FEE_ASSET: &str = "NYXT";

const SUPPORTED: &[(&str, &str)] = &[
    ("ECHO", "Echo Test Asset"),
    ("NYXT", "NYX Testnet Token"),
    ("USDX", "NYX Testnet Stable"),
];

#[derive(Debug, Clone, Serialize)]
pub struct AssetInfo {
    pub asset_id: &'static str,
    pub name: &'static str,
}

pub fn supported_assets() -> Vec<AssetInfo> {
    SUPPORTED
        .iter()
        .map(|(asset_id, name)| AssetInfo { asset_id, name })
        .collect()
}

pub fn is_supported_asset(asset_id: &str) -> bool {
    SUPPORTED.iter().any(|(id, _)| *id == asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_closed() {
        assert!(is_supported_asset("NYXT"));
        assert!(is_supported_asset("ECHO"));
        assert!(is_supported_asset("USDX"));
        assert!(!is_supported_asset("BTC"));
        assert!(!is_supported_asset("nyxt"));
    }

    #[test]
    fn listing_is_sorted() {
        let ids: Vec<&str> = supported_assets().iter().map(|a| a.asset_id).collect();
        assert_eq!(ids, vec!["ECHO", "NYXT", "USDX"]);
    }
}
