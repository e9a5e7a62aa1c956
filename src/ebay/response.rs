use crate::models::{FeeInfo, MarketplaceResult};

const PARSE_FAILURE: &str = "parse failure";

/// Reads a Trading API response with targeted tag lookups rather than a full
/// XML parse. Never fails: unreadable input becomes an unsuccessful result
/// with the raw text attached.
pub fn parse_response(xml: &str) -> MarketplaceResult {
    let Some(ack) = tag_text(xml, "Ack") else {
        return MarketplaceResult::failure(PARSE_FAILURE, xml);
    };
    let success = matches!(ack.trim(), "Success" | "Warning");

    let errors = error_blocks(xml);
    let warnings: Vec<String> = errors
        .iter()
        .filter(|block| block.severity.eq_ignore_ascii_case("Warning"))
        .filter_map(|block| block.message())
        .collect();

    if !success {
        let message = errors
            .iter()
            .find(|block| !block.severity.eq_ignore_ascii_case("Warning"))
            .or_else(|| errors.first())
            .and_then(|block| block.message())
            .unwrap_or_else(|| format!("marketplace returned {}", ack.trim()));
        return MarketplaceResult {
            warnings,
            ..MarketplaceResult::failure(message, xml)
        };
    }

    MarketplaceResult {
        success: true,
        item_id: tag_text(xml, "ItemID")
            .map(|id| unescape(id.trim()))
            .filter(|id| !id.is_empty()),
        fees: fee(xml, "InsertionFee").or_else(|| fee(xml, "ListingFee")),
        error: None,
        warnings,
        raw: xml.to_string(),
    }
}

struct ErrorBlock {
    severity: String,
    long_message: Option<String>,
    short_message: Option<String>,
}

impl ErrorBlock {
    fn message(&self) -> Option<String> {
        self.long_message
            .clone()
            .or_else(|| self.short_message.clone())
    }
}

fn error_blocks(xml: &str) -> Vec<ErrorBlock> {
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Errors>") {
        let body_start = start + "<Errors>".len();
        let Some(len) = rest[body_start..].find("</Errors>") else {
            break;
        };
        let body = &rest[body_start..body_start + len];
        let text = |tag: &str| {
            tag_text(body, tag)
                .map(|value| unescape(value.trim()))
                .filter(|value| !value.is_empty())
        };
        blocks.push(ErrorBlock {
            severity: text("SeverityCode").unwrap_or_else(|| "Error".into()),
            long_message: text("LongMessage"),
            short_message: text("ShortMessage"),
        });
        rest = &rest[body_start + len + "</Errors>".len()..];
    }
    blocks
}

/// `<Fee><Name>{name}</Name><Fee currencyID="USD">0.35</Fee></Fee>`: the
/// amount is the first `Fee` element opened after the matching name.
fn fee(xml: &str, name: &str) -> Option<FeeInfo> {
    let marker = format!("<Name>{name}</Name>");
    let after = &xml[xml.find(&marker)? + marker.len()..];
    let open = after.find("<Fee")?;
    let tag_end = after[open..].find('>')? + open;
    let attributes = &after[open + "<Fee".len()..tag_end];
    let body = &after[tag_end + 1..];
    let amount = body[..body.find("</Fee>")?].trim();
    if amount.is_empty() {
        return None;
    }
    Some(FeeInfo {
        name: name.to_string(),
        amount: amount.to_string(),
        currency: attribute(attributes, "currencyID"),
    })
}

/// Text of the first `<tag>` or `<tag attr=..>` element.
fn tag_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search = 0;
    while let Some(found) = xml[search..].find(&open) {
        let start = search + found;
        let after_name = start + open.len();
        match xml[after_name..].chars().next() {
            Some('>') | Some(' ') => {
                let content_start = xml[after_name..].find('>')? + after_name + 1;
                let len = xml[content_start..].find(&close)?;
                return Some(&xml[content_start..content_start + len]);
            }
            _ => search = after_name,
        }
    }
    None
}

fn attribute(attributes: &str, name: &str) -> Option<String> {
    let key = format!("{name}=\"");
    let start = attributes.find(&key)? + key.len();
    let len = attributes[start..].find('"')?;
    Some(unescape(&attributes[start..start + len]))
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AddFixedPriceItemResponse xmlns="urn:ebay:apis:eBLBaseComponents">
  <Timestamp>2024-06-01T10:00:00.000Z</Timestamp>
  <Ack>Success</Ack>
  <Version>1193</Version>
  <ItemID>110554213375</ItemID>
  <Fees>
    <Fee><Name>AuctionLengthFee</Name><Fee currencyID="USD">0.0</Fee></Fee>
    <Fee><Name>InsertionFee</Name><Fee currencyID="USD">0.35</Fee></Fee>
    <Fee><Name>ListingFee</Name><Fee currencyID="USD">0.35</Fee></Fee>
  </Fees>
</AddFixedPriceItemResponse>"#;

    const WARNING: &str = r#"<AddFixedPriceItemResponse>
  <Ack>Warning</Ack>
  <Errors>
    <ShortMessage>Picture too small.</ShortMessage>
    <LongMessage>Your picture is smaller than 500 pixels &amp; may look blurry.</LongMessage>
    <SeverityCode>Warning</SeverityCode>
  </Errors>
  <ItemID>42</ItemID>
</AddFixedPriceItemResponse>"#;

    const FAILURE: &str = r#"<AddFixedPriceItemResponse>
  <Ack>Failure</Ack>
  <Errors>
    <ShortMessage>Info.</ShortMessage>
    <LongMessage>Item specifics could be improved.</LongMessage>
    <SeverityCode>Warning</SeverityCode>
  </Errors>
  <Errors>
    <ShortMessage>Category is not valid.</ShortMessage>
    <LongMessage>The category selected is not a leaf category.</LongMessage>
    <ErrorCode>87</ErrorCode>
    <SeverityCode>Error</SeverityCode>
  </Errors>
</AddFixedPriceItemResponse>"#;

    #[test]
    fn minimal_success() {
        let result = parse_response("<Ack>Success</Ack><ItemID>123</ItemID>");
        assert!(result.success);
        assert_eq!(result.item_id.as_deref(), Some("123"));
        assert!(result.error.is_none());
    }

    #[test]
    fn minimal_failure() {
        let result =
            parse_response("<Ack>Failure</Ack><Errors><LongMessage>Bad category</LongMessage></Errors>");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Bad category"));
    }

    #[test]
    fn garbage_is_a_failure_not_a_panic() {
        for input in ["", "garbage", "<Ack>Success", "<<<>>>", "<Ack>"] {
            let result = parse_response(input);
            assert!(!result.success, "{input}");
            assert_eq!(result.error.as_deref(), Some(PARSE_FAILURE));
            assert_eq!(result.raw, input);
        }
    }

    #[test]
    fn full_success_with_fees() {
        let result = parse_response(SUCCESS);
        assert!(result.success);
        assert_eq!(result.item_id.as_deref(), Some("110554213375"));
        let fees = result.fees.expect("fees");
        assert_eq!(fees.name, "InsertionFee");
        assert_eq!(fees.amount, "0.35");
        assert_eq!(fees.currency.as_deref(), Some("USD"));
        assert_eq!(result.raw, SUCCESS);
    }

    #[test]
    fn warning_ack_is_success_with_warnings() {
        let result = parse_response(WARNING);
        assert!(result.success);
        assert_eq!(result.item_id.as_deref(), Some("42"));
        assert_eq!(
            result.warnings,
            vec!["Your picture is smaller than 500 pixels & may look blurry.".to_string()]
        );
    }

    #[test]
    fn failure_prefers_error_severity() {
        let result = parse_response(FAILURE);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("The category selected is not a leaf category.")
        );
        assert_eq!(result.warnings.len(), 1);
        assert!(result.item_id.is_none());
    }

    #[test]
    fn failure_without_messages() {
        let result = parse_response("<Ack>PartialFailure</Ack>");
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("marketplace returned PartialFailure")
        );
    }

    #[test]
    fn tag_lookup_skips_longer_names() {
        assert_eq!(tag_text("<ItemIDs>1</ItemIDs><ItemID>2</ItemID>", "ItemID"), Some("2"));
    }
}
