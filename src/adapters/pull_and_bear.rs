use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

use crate::adapters::{map_size_state, Candidate, SelectorChain, SiteAdapter};
use crate::browser::PageHandle;
use crate::models::{ExtractedProduct, Site, SizeAvailability, UNKNOWN_NAME};
use crate::utils::error::Result;
use crate::utils::text::{parse_discount_percent, parse_price};

/// Pull&Bear product paths end in an `l`-prefixed numeric article id:
/// `/pt/camisola-basica-l09876543`.
static PRODUCT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-l(\d{7,})(\.html)?$").unwrap());

const NAME_CHAIN: SelectorChain = SelectorChain::new(
    "name",
    &[
        Candidate::text("h1.product-detail-name"),
        Candidate::text(r#"[data-qa-id="product-name"]"#),
        Candidate::attr(r#"meta[property="og:title"]"#, "content"),
    ],
);

const CURRENT_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "current_price",
    &[
        Candidate::text(r#"[data-qa-id="product-price-sale"]"#),
        Candidate::text(".product-price .sale"),
        Candidate::text(".product-price"),
    ],
);

const REFERENCE_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "reference_price",
    &[
        Candidate::text(r#"[data-qa-id="product-price-original"]"#),
        Candidate::text(".product-price .crossed"),
    ],
);

const DISCOUNT_CHAIN: SelectorChain = SelectorChain::new(
    "discount",
    &[
        Candidate::text(r#"[data-qa-id="product-price-discount"]"#),
        Candidate::text(".product-price .discount"),
    ],
);

const IMAGE_CHAIN: SelectorChain = SelectorChain::new(
    "image",
    &[
        Candidate::attr(r#"meta[property="og:image"]"#, "content"),
        Candidate::attr(".product-image img", "src"),
    ],
);

const SIZE_ROW_SELECTORS: [&str; 2] = [
    r#"button[data-qa-id="size-selector-option"]"#,
    "ul.size-list button.size-button",
];

pub struct PullAndBearAdapter;

impl SiteAdapter for PullAndBearAdapter {
    fn site(&self) -> Site {
        Site::PullAndBear
    }

    fn validate_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => PRODUCT_PATH.is_match(parsed.path()),
            Err(_) => false,
        }
    }

    /// Size buttons hydrate behind a length-selector accordion.
    fn prepare_page(&self, page: &PageHandle) -> Result<()> {
        page.evaluate(
            r#"
            (() => {
                const opener = document.querySelector('.size-selector-opener, [data-qa-id="open-size-selector"]');
                if (opener) { opener.click(); return true; }
                return false;
            })();
            "#,
        )?;
        page.wait_for("ul.size-list", Duration::from_secs(3))?;
        Ok(())
    }

    fn extract(&self, html: &str, _url: &str) -> ExtractedProduct {
        let document = Html::parse_document(html);

        ExtractedProduct {
            name: NAME_CHAIN
                .first_match(&document)
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            current_price: CURRENT_PRICE_CHAIN
                .first_match(&document)
                .as_deref()
                .and_then(parse_price),
            reference_price: REFERENCE_PRICE_CHAIN
                .first_match(&document)
                .as_deref()
                .and_then(parse_price),
            discount_percent: DISCOUNT_CHAIN
                .first_match(&document)
                .as_deref()
                .and_then(parse_discount_percent),
            sizes: extract_sizes(&document),
            image_url: IMAGE_CHAIN.first_match(&document),
        }
    }
}

fn extract_sizes(document: &Html) -> Vec<SizeAvailability> {
    for row_selector in SIZE_ROW_SELECTORS {
        let Ok(selector) = Selector::parse(row_selector) else {
            continue;
        };
        let rows: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if rows.is_empty() {
            continue;
        }
        return rows.iter().filter_map(|row| extract_size_row(row)).collect();
    }
    Vec::new()
}

fn extract_size_row(row: &ElementRef<'_>) -> Option<SizeAvailability> {
    let label = row.text().collect::<Vec<_>>().join(" ").trim().to_string();
    if label.is_empty() {
        return None;
    }

    let action_tag = row.value().attr("data-qa-action").map(str::to_string);
    let disabled = row.value().attr("disabled").is_some()
        || row
            .value()
            .attr("class")
            .is_some_and(|c| c.contains("disabled"));

    let mut size = map_size_state(action_tag.as_deref(), disabled);
    size.label = label;
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_validate_url() {
        let adapter = PullAndBearAdapter;
        assert!(adapter.validate_url("https://www.pullandbear.com/pt/camisola-basica-l09876543"));
        assert!(adapter.validate_url("https://www.pullandbear.com/pt/jeans-l01234567.html"));
        assert!(!adapter.validate_url("https://www.pullandbear.com/pt/homem-n6491"));
        assert!(!adapter.validate_url(""));
    }

    #[test]
    fn test_extract_fixture() {
        let html = r#"
          <h1 class="product-detail-name">Camisola básica</h1>
          <div class="product-price">
            <span data-qa-id="product-price-original">17,99 €</span>
            <span data-qa-id="product-price-sale">12,99 €</span>
          </div>
          <ul class="size-list">
            <button class="size-button" data-qa-id="size-selector-option" data-qa-action="add-to-cart">S</button>
            <button class="size-button" data-qa-id="size-selector-option" data-qa-action="size-low-on-stock">M</button>
            <button class="size-button disabled" data-qa-id="size-selector-option" data-qa-action="notify-me" disabled>L</button>
          </ul>
        "#;
        let extracted = PullAndBearAdapter.extract(html, "u");

        assert_eq!(extracted.name, "Camisola básica");
        assert_eq!(extracted.current_price, Some(dec("12.99")));
        assert_eq!(extracted.reference_price, Some(dec("17.99")));
        assert_eq!(extracted.sizes.len(), 3);
        assert!(extracted.sizes[0].available);
        assert!(extracted.sizes[1].low_stock);
        assert!(!extracted.sizes[2].available);
    }

    #[test]
    fn test_extract_missing_name_yields_sentinel() {
        let extracted = PullAndBearAdapter.extract("<span>nada aqui</span>", "u");
        assert_eq!(extracted.name, UNKNOWN_NAME);
        assert!(extracted.current_price.is_none());
    }
}
