use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// A captured photo as handed over by the UI. Read-only for the core.
#[derive(Debug, Clone)]
pub struct Photo {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl Photo {
    pub fn new(data: Vec<u8>, filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Hosting result for one photo. Exactly one of `url` / `error` is set.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostedPhoto {
    pub index: usize,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl HostedPhoto {
    pub fn hosted(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            url: None,
            error: Some(error.into()),
        }
    }

    pub fn is_hosted(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ListingType {
    Book,
    Cd,
    Dvd,
    Vhs,
    #[default]
    General,
}

impl ListingType {
    pub fn from_tag(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "book" | "books" => ListingType::Book,
            "cd" | "cds" | "music cd" => ListingType::Cd,
            "dvd" | "dvds" | "blu-ray" | "bluray" => ListingType::Dvd,
            "vhs" | "vhs tape" => ListingType::Vhs,
            _ => ListingType::General,
        }
    }

    pub fn is_book(&self) -> bool {
        matches!(self, ListingType::Book)
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ListingType::Cd | ListingType::Dvd | ListingType::Vhs)
    }
}

impl From<String> for ListingType {
    fn from(value: String) -> Self {
        ListingType::from_tag(&value)
    }
}

/// Normalized, user-editable listing metadata. Built from the model output and
/// posted as-is once the user is done editing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: f64,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default,
        alias = "itemSpecifics",
        alias = "specifics",
        deserialize_with = "lenient_specifics"
    )]
    pub item_specifics: BTreeMap<String, String>,
    #[serde(default, alias = "shippingMethod", alias = "shipping")]
    pub shipping_method: Option<String>,
    #[serde(default = "default_quantity", deserialize_with = "lenient_quantity")]
    pub quantity: u32,
    #[serde(default, alias = "listingType", alias = "type")]
    pub listing_type: ListingType,
}

fn default_quantity() -> u32 {
    1
}

fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .trim()
            .trim_start_matches(['$', '£', '€'])
            .replace(',', "")
            .trim()
            .parse::<f64>()
            .unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|q| *q > 0).unwrap_or(1))
}

fn lenient_specifics<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => return None,
            };
            Some((key, text))
        })
        .collect())
}

/// A draft paired with the hosted photo URLs it will be posted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostableListing {
    pub draft: ListingDraft,
    #[serde(default, alias = "photoUrls")]
    pub photo_urls: Vec<String>,
}

impl PostableListing {
    pub fn valid_photo_urls(&self) -> Vec<String> {
        self.photo_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| url.to_string())
            .collect()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeInfo {
    pub name: String,
    pub amount: String,
    pub currency: Option<String>,
}

/// Outcome of one Trading API submission. The raw response is always kept.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceResult {
    pub success: bool,
    pub item_id: Option<String>,
    pub fees: Option<FeeInfo>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub raw: String,
}

impl MarketplaceResult {
    pub fn failure(error: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            success: false,
            item_id: None,
            fees: None,
            error: Some(error.into()),
            warnings: Vec::new(),
            raw: raw.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostFailure {
    MissingPhotos,
    InvalidListing,
    Marketplace,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: usize,
    pub title: String,
    pub failure: Option<PostFailure>,
    pub result: MarketplaceResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

/// Output of one analysis: the untouched model text plus per-photo hosting.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub raw_response: String,
    pub hosted_photos: Vec<HostedPhoto>,
    pub stages: Vec<StageReport>,
}

impl AnalysisResult {
    #[cfg(test)]
    pub fn hosted_urls(&self) -> Vec<String> {
        self.hosted_photos
            .iter()
            .filter_map(|photo| photo.url.clone())
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
