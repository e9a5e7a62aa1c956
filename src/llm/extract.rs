use crate::models::ListingDraft;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("model response is not a json object")]
    NotJson { raw: String },
    #[error("listing fields do not match the draft shape: {reason}")]
    Shape { reason: String, raw: String },
}

impl ExtractError {
    pub fn raw(&self) -> &str {
        match self {
            ExtractError::NotJson { raw } | ExtractError::Shape { raw, .. } => raw,
        }
    }
}

/// Pulls one JSON object out of free-form model text.
///
/// The trimmed text is tried as-is first. Otherwise the span from the first
/// `{` to the last `}` is parsed, which covers prose before and after the
/// object as well as markdown fences.
pub fn extract_json(raw: &str) -> Result<Value, ExtractError> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let span = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => {
            return Err(ExtractError::NotJson {
                raw: raw.to_string(),
            });
        }
    };

    match serde_json::from_str::<Value>(span) {
        Ok(value @ Value::Object(_)) => Ok(value),
        _ => Err(ExtractError::NotJson {
            raw: raw.to_string(),
        }),
    }
}

/// Raw model text -> draft. Field defaults come from the draft's serde
/// shape; nothing is invented when the text is not JSON.
pub fn extract_listing(raw: &str) -> Result<ListingDraft, ExtractError> {
    let value = extract_json(raw)?;
    serde_json::from_value::<ListingDraft>(value).map_err(|err| ExtractError::Shape {
        reason: err.to_string(),
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingType;
    use serde_json::json;

    #[test]
    fn pure_json() {
        assert_eq!(extract_json("{\"a\":1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn json_wrapped_in_prose() {
        assert_eq!(
            extract_json("prefix text {\"a\":1} suffix").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn json_inside_markdown_fence() {
        let raw = "Here you go:\n```json\n{\"title\": \"Lamp\", \"nested\": {\"x\": 2}}\n```\nThanks";
        assert_eq!(
            extract_json(raw).unwrap(),
            json!({"title": "Lamp", "nested": {"x": 2}})
        );
    }

    #[test]
    fn not_json_keeps_raw_text() {
        let err = extract_json("not json").unwrap_err();
        assert!(matches!(err, ExtractError::NotJson { .. }));
        assert_eq!(err.raw(), "not json");
    }

    #[test]
    fn broken_span_is_rejected() {
        let err = extract_json("{\"a\": 1 and {\"b\": }").unwrap_err();
        assert_eq!(err.raw(), "{\"a\": 1 and {\"b\": }");
    }

    #[test]
    fn top_level_array_is_not_an_object() {
        assert!(extract_json("[1, 2, 3]").is_err());
    }

    #[test]
    fn listing_from_model_text() {
        let raw = r#"Sure! {"title": "The Hobbit by J.R.R. Tolkien", "price": 9.5,
            "condition": "Good", "category": "Fantasy fiction", "listing_type": "book",
            "item_specifics": {"Author": "J.R.R. Tolkien"}}"#;
        let draft = extract_listing(raw).unwrap();
        assert_eq!(draft.title, "The Hobbit by J.R.R. Tolkien");
        assert_eq!(draft.listing_type, ListingType::Book);
        assert_eq!(draft.item_specifics["Author"], "J.R.R. Tolkien");
    }

    #[test]
    fn listing_with_wrong_field_types_is_shape_error() {
        let err = extract_listing(r#"{"title": {"nested": true}}"#).unwrap_err();
        assert!(matches!(err, ExtractError::Shape { .. }));
    }
}
