//! Condition, category and shipping vocabularies for the Trading API.
//!
//! The tables are a snapshot of one marketplace taxonomy and will drift, so
//! they are plain data: a built-in versioned default that a YAML file can
//! replace wholesale (`MAPPING_TABLES_PATH`). Category routing is a
//! best-effort keyword heuristic and does not guarantee the marketplace
//! accepts the category for a given item.

use crate::models::ListingType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("reading mapping tables from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing mapping tables in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("mapping tables {0} contain an empty code")]
    EmptyCode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionEntry {
    pub code: String,
    pub label: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRule {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingRule {
    pub code: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaCategories {
    pub cd: CategoryRule,
    pub dvd: CategoryRule,
    pub vhs: CategoryRule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingTables {
    pub version: String,
    pub conditions: Vec<ConditionEntry>,
    /// Legacy or deprecated names rewritten before lookup.
    #[serde(default)]
    pub condition_redirects: BTreeMap<String, String>,
    pub default_media_condition: String,
    pub default_general_condition: String,
    /// Checked in order; the first rule with a matching keyword wins.
    pub book_categories: Vec<CategoryRule>,
    pub default_book_category: CategoryRule,
    pub media_categories: MediaCategories,
    #[serde(default)]
    pub general_categories: Vec<CategoryRule>,
    pub default_general_category: CategoryRule,
    #[serde(default)]
    pub shipping_services: Vec<ShippingRule>,
    pub media_shipping_service: String,
}

fn rule(code: &str, label: &str, keywords: &[&str]) -> CategoryRule {
    CategoryRule {
        code: code.into(),
        label: label.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn condition(code: &str, label: &str, names: &[&str]) -> ConditionEntry {
    ConditionEntry {
        code: code.into(),
        label: label.into(),
        names: names.iter().map(|n| n.to_string()).collect(),
    }
}

impl Default for MappingTables {
    fn default() -> Self {
        let redirects = [
            ("like new", "very good"),
            ("used like new", "very good"),
            ("excellent", "very good"),
            ("poor", "acceptable"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            version: "2024-06".into(),
            conditions: vec![
                condition("1000", "New", &["new", "brand new", "new with tags", "sealed"]),
                condition(
                    "1500",
                    "New other",
                    &["new other", "open box", "new without tags", "new without box"],
                ),
                condition("1750", "New with defects", &["new with defects"]),
                condition("2000", "Certified refurbished", &["certified refurbished"]),
                condition("2500", "Seller refurbished", &["seller refurbished", "refurbished"]),
                condition("3000", "Used", &["used", "pre owned", "preowned"]),
                condition("4000", "Very Good", &["very good", "used very good"]),
                condition("5000", "Good", &["good", "used good"]),
                condition("6000", "Acceptable", &["acceptable", "fair", "used acceptable"]),
                condition(
                    "7000",
                    "For parts or not working",
                    &["for parts or not working", "for parts", "not working"],
                ),
            ],
            condition_redirects: redirects,
            default_media_condition: "5000".into(),
            default_general_condition: "3000".into(),
            book_categories: vec![
                rule(
                    "171242",
                    "Textbooks",
                    &["textbook", "education", "reference", "study guide", "academic", "workbook"],
                ),
                rule(
                    "279",
                    "Children's",
                    &["children", "child", "kids", "juvenile", "picture book", "young adult"],
                ),
                rule(
                    "171228",
                    "Fiction & Literature",
                    &[
                        "science fiction",
                        "sci-fi",
                        "sci fi",
                        "novel",
                        "thriller",
                        "mystery",
                        "romance",
                        "fantasy",
                    ],
                ),
                rule(
                    "171243",
                    "Nonfiction",
                    &[
                        "nonfiction",
                        "non-fiction",
                        "non fiction",
                        "biography",
                        "memoir",
                        "history",
                        "self-help",
                        "cooking",
                        "business",
                        "science",
                    ],
                ),
                rule(
                    "171228",
                    "Fiction & Literature",
                    &["fiction", "literature", "fable", "poetry"],
                ),
            ],
            default_book_category: rule("171228", "Fiction & Literature", &[]),
            media_categories: MediaCategories {
                cd: rule("176984", "Music CDs", &[]),
                dvd: rule("617", "DVDs & Blu-ray Discs", &[]),
                vhs: rule("309", "VHS Tapes", &[]),
            },
            general_categories: vec![
                rule("139971", "Video Games", &["video game", "nintendo", "playstation", "xbox"]),
                rule("293", "Consumer Electronics", &["electronics", "camera", "headphones", "phone"]),
                rule("11450", "Clothing, Shoes & Accessories", &["clothing", "shoe", "apparel", "jacket"]),
                rule("220", "Toys & Hobbies", &["toy", "lego", "puzzle", "board game"]),
                rule("1", "Collectibles", &["collectible", "vintage", "antique"]),
                rule("11700", "Home & Garden", &["home", "kitchen", "garden", "decor"]),
            ],
            default_general_category: rule("88433", "Everything Else", &[]),
            shipping_services: vec![
                ShippingRule {
                    code: "USPSPriorityMailExpress".into(),
                    keywords: vec!["express".into()],
                },
                ShippingRule {
                    code: "USPSMedia".into(),
                    keywords: vec!["media".into()],
                },
                ShippingRule {
                    code: "USPSPriority".into(),
                    keywords: vec!["priority".into()],
                },
                ShippingRule {
                    code: "USPSGroundAdvantage".into(),
                    keywords: vec!["ground".into(), "first class".into(), "first-class".into()],
                },
            ],
            media_shipping_service: "USPSMedia".into(),
        }
    }
}

impl MappingTables {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let tables: MappingTables =
            serde_yaml::from_str(&raw).map_err(|source| MappingError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tables.validate()?;
        Ok(tables)
    }

    /// Built-in tables unless `MAPPING_TABLES_PATH` names a replacement.
    pub fn from_env() -> Result<Self, MappingError> {
        match std::env::var("MAPPING_TABLES_PATH") {
            Ok(path) if !path.trim().is_empty() => {
                let tables = Self::load(path.trim())?;
                info!(target = "relay.api", version = %tables.version, "loaded mapping tables");
                Ok(tables)
            }
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), MappingError> {
        let codes = self
            .conditions
            .iter()
            .map(|c| c.code.as_str())
            .chain([
                self.default_media_condition.as_str(),
                self.default_general_condition.as_str(),
                self.default_book_category.code.as_str(),
                self.default_general_category.code.as_str(),
                self.media_shipping_service.as_str(),
            ])
            .chain(self.book_categories.iter().map(|c| c.code.as_str()))
            .chain(self.general_categories.iter().map(|c| c.code.as_str()));
        for code in codes {
            if code.trim().is_empty() {
                return Err(MappingError::EmptyCode(self.version.clone()));
            }
        }
        Ok(())
    }
}

/// Resolved category: always a code from the tables, never free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCode {
    pub code: String,
    pub label: String,
}

impl From<&CategoryRule> for CategoryCode {
    fn from(rule: &CategoryRule) -> Self {
        Self {
            code: rule.code.clone(),
            label: rule.label.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingFieldNormalizer {
    tables: MappingTables,
}

impl Default for ListingFieldNormalizer {
    fn default() -> Self {
        Self::new(MappingTables::default())
    }
}

impl ListingFieldNormalizer {
    pub fn new(tables: MappingTables) -> Self {
        Self { tables }
    }

    #[cfg(test)]
    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    pub fn condition_code(&self, condition: &str, listing_type: ListingType) -> String {
        let mut key = normalize_key(condition);
        if let Some(target) = self.tables.condition_redirects.get(&key) {
            key = normalize_key(target);
        }
        if let Some(entry) = self
            .tables
            .conditions
            .iter()
            .find(|entry| entry.names.iter().any(|name| normalize_key(name) == key))
        {
            return entry.code.clone();
        }
        if listing_type.is_book() || listing_type.is_media() {
            self.tables.default_media_condition.clone()
        } else {
            self.tables.default_general_condition.clone()
        }
    }

    pub fn category_code(&self, listing_type: ListingType, category: &str) -> CategoryCode {
        let haystack = category.to_lowercase();
        match listing_type {
            ListingType::Book => first_match(&self.tables.book_categories, &haystack)
                .unwrap_or(&self.tables.default_book_category)
                .into(),
            ListingType::Cd => (&self.tables.media_categories.cd).into(),
            ListingType::Dvd => (&self.tables.media_categories.dvd).into(),
            ListingType::Vhs => (&self.tables.media_categories.vhs).into(),
            ListingType::General => first_match(&self.tables.general_categories, &haystack)
                .unwrap_or(&self.tables.default_general_category)
                .into(),
        }
    }

    pub fn shipping_service(
        &self,
        method: Option<&str>,
        listing_type: ListingType,
        fallback: &str,
    ) -> String {
        let method = method.map(|m| m.to_lowercase()).unwrap_or_default();
        if let Some(rule) = self.tables.shipping_services.iter().find(|rule| {
            rule.keywords
                .iter()
                .any(|keyword| method.contains(&keyword.to_lowercase()))
        }) {
            return rule.code.clone();
        }
        if listing_type.is_book() || listing_type.is_media() {
            self.tables.media_shipping_service.clone()
        } else {
            fallback.to_string()
        }
    }
}

fn first_match<'a>(rules: &'a [CategoryRule], haystack: &str) -> Option<&'a CategoryRule> {
    rules.iter().find(|rule| {
        rule.keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()))
    })
}

fn normalize_key(value: &str) -> String {
    value
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub const BOOK_TITLE: &str = "Book Title";
pub const AUTHOR: &str = "Author";
pub const FORMAT: &str = "Format";
pub const LANGUAGE: &str = "Language";
pub const TOPIC: &str = "Topic";
pub const PUBLISHER: &str = "Publisher";
pub const PUBLICATION_YEAR: &str = "Publication Year";
pub const ISBN: &str = "ISBN";

/// Every book request considers these keys, in this order.
pub const BOOK_SPECIFICS: [&str; 8] = [
    BOOK_TITLE,
    AUTHOR,
    FORMAT,
    LANGUAGE,
    TOPIC,
    PUBLISHER,
    PUBLICATION_YEAR,
    ISBN,
];

/// Case- and separator-insensitive lookup so `author`, `book_title` and
/// `Book Title` all hit the same specific.
pub fn specific_value<'a>(specifics: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    let wanted = compact_key(key);
    specifics
        .iter()
        .find(|(name, _)| compact_key(name) == wanted)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn compact_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Values for the fixed book keys. Author and Book Title fall back to a
/// best-effort split of the listing title, which can be wrong (a title that
/// contains "by" as part of its name). Format and Language fall back to
/// literal defaults. Topic, Publisher, Publication Year and ISBN are never
/// invented and stay empty when absent.
pub fn book_specifics(title: &str, specifics: &BTreeMap<String, String>) -> Vec<(&'static str, String)> {
    BOOK_SPECIFICS
        .iter()
        .map(|key| {
            let value = match specific_value(specifics, key) {
                Some(value) => value.to_string(),
                None => match *key {
                    BOOK_TITLE => derive_book_title(title),
                    AUTHOR => derive_author(title).unwrap_or_else(|| "Unknown".into()),
                    FORMAT => "Paperback".into(),
                    LANGUAGE => "English".into(),
                    _ => String::new(),
                },
            };
            (*key, value)
        })
        .collect()
}

fn by_position(title: &str) -> Option<usize> {
    title.to_ascii_lowercase().rfind(" by ")
}

/// Listing title minus a trailing "by {author}", then a subtitle after `:`,
/// then a trailing " - description".
pub fn derive_book_title(title: &str) -> String {
    let mut rest = title.trim();
    if let Some(pos) = by_position(rest) {
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find(':') {
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.rfind(" - ") {
        rest = &rest[..pos];
    }
    let rest = rest.trim();
    if rest.is_empty() {
        title.trim().to_string()
    } else {
        rest.to_string()
    }
}

pub fn derive_author(title: &str) -> Option<String> {
    let trimmed = title.trim();
    let pos = by_position(trimmed)?;
    let mut author = &trimmed[pos + " by ".len()..];
    for stop in [" - ", "(", ",", "|", ":"] {
        if let Some(cut) = author.find(stop) {
            author = &author[..cut];
        }
    }
    let author = author.trim();
    (!author.is_empty()).then(|| author.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> ListingFieldNormalizer {
        ListingFieldNormalizer::default()
    }

    #[test]
    fn every_condition_name_maps_to_a_code() {
        let n = normalizer();
        for entry in &n.tables().conditions {
            for name in &entry.names {
                let code = n.condition_code(name, ListingType::General);
                assert!(!code.is_empty());
                assert_eq!(code, entry.code, "{name}");
            }
        }
        for name in ["Very Good", "Good", "Acceptable"] {
            assert!(!n.condition_code(name, ListingType::Book).is_empty());
        }
    }

    #[test]
    fn like_new_redirects_to_very_good() {
        let n = normalizer();
        assert_eq!(
            n.condition_code("Like New", ListingType::Book),
            n.condition_code("Very Good", ListingType::Book)
        );
        assert_eq!(n.condition_code("LIKE_NEW", ListingType::General), "4000");
    }

    #[test]
    fn unknown_condition_falls_back_by_type() {
        let n = normalizer();
        assert_eq!(n.condition_code("", ListingType::Book), "5000");
        assert_eq!(n.condition_code("gently loved", ListingType::Dvd), "5000");
        assert_eq!(n.condition_code("gently loved", ListingType::General), "3000");
    }

    #[test]
    fn book_categories_follow_priority() {
        let n = normalizer();
        assert_eq!(n.category_code(ListingType::Book, "History / Nonfiction").label, "Nonfiction");
        assert_eq!(n.category_code(ListingType::Book, "Mystery novel").label, "Fiction & Literature");
        assert_eq!(n.category_code(ListingType::Book, "Children's fiction").label, "Children's");
        assert_eq!(n.category_code(ListingType::Book, "Calculus Textbook").label, "Textbooks");
        assert_eq!(n.category_code(ListingType::Book, "").code, "171228");
    }

    #[test]
    fn fiction_genres_beat_nonfiction_nouns() {
        let n = normalizer();
        for category in [
            "Science Fiction",
            "Business thriller novel",
            "Sci-Fi novel",
            "Historical romance",
            "Science fantasy",
        ] {
            assert_eq!(
                n.category_code(ListingType::Book, category).label,
                "Fiction & Literature",
                "{category}"
            );
        }
        assert_eq!(n.category_code(ListingType::Book, "Popular science").label, "Nonfiction");
        assert_eq!(n.category_code(ListingType::Book, "Business strategy").label, "Nonfiction");
        assert_eq!(n.category_code(ListingType::Book, "Young adult fantasy").label, "Children's");
    }

    #[test]
    fn media_and_general_categories() {
        let n = normalizer();
        assert_eq!(n.category_code(ListingType::Cd, "rock").code, "176984");
        assert_eq!(n.category_code(ListingType::Dvd, "").code, "617");
        assert_eq!(n.category_code(ListingType::Vhs, "anything").code, "309");
        assert_eq!(n.category_code(ListingType::General, "Kitchen mixer").code, "11700");
        assert_eq!(n.category_code(ListingType::General, "???").code, "88433");
    }

    #[test]
    fn shipping_service_mapping() {
        let n = normalizer();
        assert_eq!(
            n.shipping_service(Some("Priority Mail Express"), ListingType::General, "X"),
            "USPSPriorityMailExpress"
        );
        assert_eq!(n.shipping_service(Some("media mail"), ListingType::General, "X"), "USPSMedia");
        assert_eq!(n.shipping_service(None, ListingType::Book, "X"), "USPSMedia");
        assert_eq!(n.shipping_service(Some("pigeon"), ListingType::General, "X"), "X");
    }

    #[test]
    fn title_heuristics() {
        assert_eq!(derive_book_title("Dune: Deluxe Edition by Frank Herbert"), "Dune");
        assert_eq!(
            derive_author("Dune: Deluxe Edition by Frank Herbert - Hardcover").as_deref(),
            Some("Frank Herbert")
        );
        assert_eq!(derive_book_title("The Road - Great Condition"), "The Road");
        assert_eq!(derive_book_title("Stand By Me by Stephen King"), "Stand By Me");
        assert_eq!(derive_author("Stand By Me by Stephen King").as_deref(), Some("Stephen King"));
        assert_eq!(derive_author("Untitled Journal"), None);
    }

    #[test]
    fn book_specifics_fill_only_missing_keys() {
        let mut given = BTreeMap::new();
        given.insert("author".to_string(), "Ursula K. Le Guin".to_string());
        given.insert("ISBN".to_string(), " ".to_string());
        let filled = book_specifics("A Wizard of Earthsea by Someone Else", &given);
        let map: BTreeMap<_, _> = filled.into_iter().collect();
        assert_eq!(map[AUTHOR], "Ursula K. Le Guin");
        assert_eq!(map[BOOK_TITLE], "A Wizard of Earthsea");
        assert_eq!(map[FORMAT], "Paperback");
        assert_eq!(map[LANGUAGE], "English");
        assert_eq!(map[ISBN], "");
        assert_eq!(map.len(), BOOK_SPECIFICS.len());
    }

    #[test]
    fn book_specifics_default_author() {
        let filled = book_specifics("Field Notes", &BTreeMap::new());
        assert!(filled.contains(&(AUTHOR, "Unknown".to_string())));
    }

    #[test]
    fn tables_round_trip_through_yaml() {
        let yaml = serde_yaml::to_string(&MappingTables::default()).unwrap();
        let parsed: MappingTables = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, MappingTables::default());
        parsed.validate().unwrap();
    }

    #[test]
    fn empty_code_is_rejected() {
        let mut tables = MappingTables::default();
        tables.default_general_category.code = " ".into();
        assert!(matches!(tables.validate(), Err(MappingError::EmptyCode(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = MappingTables::load("/nonexistent/mapping.yaml").unwrap_err();
        assert!(matches!(err, MappingError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/mapping.yaml"));
    }
}
