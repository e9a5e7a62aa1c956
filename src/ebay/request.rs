use crate::ebay::config::ListingDefaults;
use crate::ebay::mapping::{
    BOOK_SPECIFICS, CategoryCode, ISBN, ListingFieldNormalizer, book_specifics, compact_key,
};
use crate::models::ListingDraft;
use serde::Serialize;
use std::sync::Arc;

pub const ADD_FIXED_PRICE_ITEM: &str = "AddFixedPriceItem";
const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestVariant {
    General,
    Book,
}

/// A ready-to-send Trading API document. Pure data, no I/O happened yet.
#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceRequest {
    pub call_name: &'static str,
    pub variant: RequestVariant,
    pub category: CategoryCode,
    pub condition_id: String,
    pub xml: String,
}

/// Serializes drafts into `AddFixedPriceItem` XML.
///
/// Output depends only on the draft, the photo URLs and the builder's
/// configuration: no clocks, no random ids. Every free-text value goes
/// through [`escape_xml`].
#[derive(Debug, Clone)]
pub struct MarketplaceRequestBuilder {
    normalizer: Arc<ListingFieldNormalizer>,
    defaults: ListingDefaults,
    auth_token: String,
}

impl MarketplaceRequestBuilder {
    pub fn new(
        normalizer: Arc<ListingFieldNormalizer>,
        defaults: ListingDefaults,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            normalizer,
            defaults,
            auth_token: auth_token.into(),
        }
    }

    pub fn build(&self, draft: &ListingDraft, photo_urls: &[String]) -> MarketplaceRequest {
        if draft.listing_type.is_book() {
            self.build_book(draft, photo_urls)
        } else {
            self.build_general(draft, photo_urls)
        }
    }

    pub fn build_general(&self, draft: &ListingDraft, photo_urls: &[String]) -> MarketplaceRequest {
        let specifics: Vec<(String, String)> = draft
            .item_specifics
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.assemble(draft, photo_urls, RequestVariant::General, &specifics, None)
    }

    pub fn build_book(&self, draft: &ListingDraft, photo_urls: &[String]) -> MarketplaceRequest {
        let mut specifics: Vec<(String, String)> = book_specifics(&draft.title, &draft.item_specifics)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        let fixed: Vec<String> = BOOK_SPECIFICS.iter().map(|key| compact_key(key)).collect();
        specifics.extend(
            draft
                .item_specifics
                .iter()
                .filter(|(name, _)| !fixed.contains(&compact_key(name)))
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        let isbn = specifics
            .iter()
            .find(|(name, _)| name == ISBN)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self.assemble(
            draft,
            photo_urls,
            RequestVariant::Book,
            &specifics,
            isbn.as_deref(),
        )
    }

    fn assemble(
        &self,
        draft: &ListingDraft,
        photo_urls: &[String],
        variant: RequestVariant,
        specifics: &[(String, String)],
        isbn: Option<&str>,
    ) -> MarketplaceRequest {
        let category = self
            .normalizer
            .category_code(draft.listing_type, &draft.category);
        let condition_id = self
            .normalizer
            .condition_code(&draft.condition, draft.listing_type);
        let shipping_service = self.normalizer.shipping_service(
            draft.shipping_method.as_deref(),
            draft.listing_type,
            &self.defaults.shipping_service,
        );
        let currency = escape_xml(&self.defaults.currency);

        let mut xml = String::with_capacity(2048);
        xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        xml.push_str("<AddFixedPriceItemRequest xmlns=\"urn:ebay:apis:eBLBaseComponents\">\n");
        xml.push_str("  <RequesterCredentials>\n");
        element(&mut xml, 4, "eBayAuthToken", &self.auth_token);
        xml.push_str("  </RequesterCredentials>\n");
        element(&mut xml, 2, "ErrorLanguage", "en_US");
        element(&mut xml, 2, "WarningLevel", "High");
        xml.push_str("  <Item>\n");
        element(&mut xml, 4, "Title", &clamp_title(&draft.title));
        let description = if draft.description.trim().is_empty() {
            draft.title.trim()
        } else {
            draft.description.as_str()
        };
        element(&mut xml, 4, "Description", description);
        xml.push_str("    <PrimaryCategory>\n");
        element(&mut xml, 6, "CategoryID", &category.code);
        xml.push_str("    </PrimaryCategory>\n");
        xml.push_str(&format!(
            "    <StartPrice currencyID=\"{currency}\">{}</StartPrice>\n",
            format_amount(draft.price)
        ));
        element(&mut xml, 4, "CategoryMappingAllowed", "true");
        element(&mut xml, 4, "ConditionID", &condition_id);
        element(&mut xml, 4, "Country", &self.defaults.country);
        element(&mut xml, 4, "Currency", &self.defaults.currency);
        element(
            &mut xml,
            4,
            "DispatchTimeMax",
            &self.defaults.dispatch_days.to_string(),
        );
        element(&mut xml, 4, "ListingDuration", "GTC");
        element(&mut xml, 4, "ListingType", "FixedPriceItem");
        if let Some(location) = &self.defaults.location {
            element(&mut xml, 4, "Location", location);
        }
        if let Some(postal_code) = &self.defaults.postal_code {
            element(&mut xml, 4, "PostalCode", postal_code);
        }
        element(&mut xml, 4, "Quantity", &draft.quantity.max(1).to_string());

        if !photo_urls.is_empty() {
            xml.push_str("    <PictureDetails>\n");
            element(&mut xml, 6, "GalleryType", "Gallery");
            for url in photo_urls {
                element(&mut xml, 6, "PictureURL", url);
            }
            xml.push_str("    </PictureDetails>\n");
        }

        if let Some(isbn) = isbn {
            xml.push_str("    <ProductListingDetails>\n");
            element(&mut xml, 6, "ISBN", isbn);
            element(&mut xml, 6, "IncludeStockPhotoURL", "false");
            element(&mut xml, 6, "UseStockPhotoURLAsGallery", "false");
            xml.push_str("    </ProductListingDetails>\n");
        }

        let pairs: Vec<&(String, String)> = specifics
            .iter()
            .filter(|(name, value)| !name.trim().is_empty() && !value.trim().is_empty())
            .collect();
        if !pairs.is_empty() {
            xml.push_str("    <ItemSpecifics>\n");
            for (name, value) in pairs {
                xml.push_str("      <NameValueList>\n");
                element(&mut xml, 8, "Name", name.trim());
                element(&mut xml, 8, "Value", value.trim());
                xml.push_str("      </NameValueList>\n");
            }
            xml.push_str("    </ItemSpecifics>\n");
        }

        xml.push_str("    <ShippingDetails>\n");
        element(&mut xml, 6, "ShippingType", "Flat");
        xml.push_str("      <ShippingServiceOptions>\n");
        element(&mut xml, 8, "ShippingServicePriority", "1");
        element(&mut xml, 8, "ShippingService", &shipping_service);
        xml.push_str(&format!(
            "        <ShippingServiceCost currencyID=\"{currency}\">{}</ShippingServiceCost>\n",
            format_amount(self.defaults.shipping_cost)
        ));
        xml.push_str("      </ShippingServiceOptions>\n");
        xml.push_str("    </ShippingDetails>\n");

        xml.push_str("    <ReturnPolicy>\n");
        if self.defaults.returns_accepted {
            element(&mut xml, 6, "ReturnsAcceptedOption", "ReturnsAccepted");
            element(
                &mut xml,
                6,
                "ReturnsWithinOption",
                &format!("Days_{}", self.defaults.return_days),
            );
            element(&mut xml, 6, "ShippingCostPaidByOption", "Buyer");
        } else {
            element(&mut xml, 6, "ReturnsAcceptedOption", "ReturnsNotAccepted");
        }
        xml.push_str("    </ReturnPolicy>\n");
        xml.push_str("  </Item>\n");
        xml.push_str("</AddFixedPriceItemRequest>\n");

        MarketplaceRequest {
            call_name: ADD_FIXED_PRICE_ITEM,
            variant,
            category,
            condition_id,
            xml,
        }
    }
}

fn element(out: &mut String, indent: usize, name: &str, value: &str) {
    out.push_str(&" ".repeat(indent));
    out.push('<');
    out.push_str(name);
    out.push('>');
    out.push_str(&escape_xml(value));
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

/// Escapes `& < > " '` and drops control characters XML 1.0 cannot carry.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn clamp_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        trimmed.to_string()
    } else {
        trimmed
            .chars()
            .take(MAX_TITLE_CHARS)
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}

fn format_amount(value: f64) -> String {
    if value.is_finite() && value > 0.0 {
        format!("{value:.2}")
    } else {
        "0.00".to_string()
    }
}
