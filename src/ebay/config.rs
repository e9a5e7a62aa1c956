use crate::http::{env_bool, env_u64};
use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static TRADING_URL: Lazy<String> = Lazy::new(|| {
    if let Ok(url) = env::var("EBAY_TRADING_URL")
        && !url.trim().is_empty()
    {
        return url.trim().to_string();
    }
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com/ws/api.dll".to_string()
    } else {
        "https://api.sandbox.ebay.com/ws/api.dll".to_string()
    }
});

/// Static Trading API credentials. The auth token is long-lived and goes
/// into every request body as-is.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub endpoint: String,
    pub auth_token: String,
    pub dev_id: String,
    pub app_id: String,
    pub cert_id: String,
    pub site_id: u32,
    pub compat_level: u32,
    pub timeout_secs: u64,
}

impl TradingConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: TRADING_URL.clone(),
            auth_token: env::var("EBAY_AUTH_TOKEN").unwrap_or_default(),
            dev_id: env::var("EBAY_DEV_ID").unwrap_or_default(),
            app_id: env::var("EBAY_APP_ID").unwrap_or_default(),
            cert_id: env::var("EBAY_CERT_ID").unwrap_or_default(),
            site_id: env::var("EBAY_SITE_ID")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            compat_level: env_u64("EBAY_COMPAT_LEVEL", 1193) as u32,
            timeout_secs: env_u64("EBAY_TRADING_TIMEOUT_SECS", 60),
        }
    }
}

/// Seller-level settings shared by every listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingDefaults {
    pub country: String,
    pub currency: String,
    pub postal_code: Option<String>,
    pub location: Option<String>,
    pub dispatch_days: u32,
    pub returns_accepted: bool,
    pub return_days: u32,
    pub shipping_service: String,
    pub shipping_cost: f64,
}

impl Default for ListingDefaults {
    fn default() -> Self {
        Self {
            country: "US".into(),
            currency: "USD".into(),
            postal_code: None,
            location: None,
            dispatch_days: 3,
            returns_accepted: true,
            return_days: 30,
            shipping_service: "USPSGroundAdvantage".into(),
            shipping_cost: 0.0,
        }
    }
}

impl ListingDefaults {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            country: env::var("LISTING_COUNTRY").unwrap_or(base.country),
            currency: env::var("LISTING_CURRENCY").unwrap_or(base.currency),
            postal_code: env::var("LISTING_POSTAL_CODE")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            location: env::var("LISTING_LOCATION")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            dispatch_days: env_u64("LISTING_DISPATCH_DAYS", base.dispatch_days as u64) as u32,
            returns_accepted: env_bool("LISTING_RETURNS_ACCEPTED", base.returns_accepted),
            return_days: env_u64("LISTING_RETURN_DAYS", base.return_days as u64) as u32,
            shipping_service: env::var("LISTING_SHIPPING_SERVICE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(base.shipping_service),
            shipping_cost: env::var("LISTING_SHIPPING_COST")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(base.shipping_cost),
        }
    }
}
