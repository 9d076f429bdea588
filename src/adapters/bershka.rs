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

/// Bershka product paths carry a `c<category>p<product>` id pair:
/// `/pt/casaco-oversize-c0p112233445.html`.
static PRODUCT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-c\d+p(\d{6,})\.html$").unwrap());

const NAME_CHAIN: SelectorChain = SelectorChain::new(
    "name",
    &[
        Candidate::text(r#"h1[data-qa-anchor="productName"]"#),
        Candidate::text("h1.product-title"),
        Candidate::attr(r#"meta[property="og:title"]"#, "content"),
    ],
);

const CURRENT_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "current_price",
    &[
        Candidate::text(r#"[data-qa-anchor="productItemPrice"] .current-price-elem"#),
        Candidate::text(".current-price-elem"),
        Candidate::text(".product-price span"),
    ],
);

const REFERENCE_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "reference_price",
    &[
        Candidate::text(r#"[data-qa-anchor="productItemPrice"] .old-price-elem"#),
        Candidate::text(".old-price-elem"),
    ],
);

const DISCOUNT_CHAIN: SelectorChain = SelectorChain::new(
    "discount",
    &[
        Candidate::text(r#"[data-qa-anchor="productItemPrice"] .discount-percentage"#),
        Candidate::text(".discount-percentage"),
    ],
);

const IMAGE_CHAIN: SelectorChain = SelectorChain::new(
    "image",
    &[
        Candidate::attr(r#"meta[property="og:image"]"#, "content"),
        Candidate::attr(".product-image-container img", "src"),
    ],
);

const SIZE_ROW_SELECTORS: [&str; 2] = [
    r#"[data-qa-anchor="sizeListItem"]"#,
    "li.size-item",
];

pub struct BershkaAdapter;

impl SiteAdapter for BershkaAdapter {
    fn site(&self) -> Site {
        Site::Bershka
    }

    fn validate_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => PRODUCT_PATH.is_match(parsed.path()),
            Err(_) => false,
        }
    }

    fn prepare_page(&self, page: &PageHandle) -> Result<()> {
        // Sizes render inline on Bershka; just wait for the list to hydrate.
        page.wait_for(SIZE_ROW_SELECTORS[1], Duration::from_secs(3))?;
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

    let classes = row.value().attr("class").unwrap_or_default();
    let action_tag = row
        .value()
        .attr("data-qa-action")
        .map(str::to_string)
        .or_else(|| {
            // Bershka encodes stock level in modifier classes.
            if classes.contains("is-back-soon") || classes.contains("low-stock") {
                Some("size-low-on-stock".to_string())
            } else if classes.contains("is-disabled") || classes.contains("out-of-stock") {
                Some("size-out-of-stock".to_string())
            } else {
                None
            }
        });
    let disabled = classes.contains("is-disabled") || row.value().attr("disabled").is_some();

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
        let adapter = BershkaAdapter;
        assert!(adapter.validate_url("https://www.bershka.com/pt/casaco-oversize-c0p112233445.html"));
        assert!(!adapter.validate_url("https://www.bershka.com/pt/novidades-n1234.html"));
        assert!(!adapter.validate_url("bershka"));
    }

    #[test]
    fn test_extract_fixture() {
        let html = r#"
          <head><meta property="og:image" content="https://static.bershka.net/casaco.jpg"></head>
          <h1 data-qa-anchor="productName">Casaco oversize</h1>
          <div data-qa-anchor="productItemPrice">
            <span class="old-price-elem">35,99 €</span>
            <span class="discount-percentage">-30%</span>
            <span class="current-price-elem">25,19 €</span>
          </div>
          <ul>
            <li class="size-item" data-qa-anchor="sizeListItem">S</li>
            <li class="size-item low-stock" data-qa-anchor="sizeListItem">M</li>
            <li class="size-item is-disabled" data-qa-anchor="sizeListItem">L</li>
          </ul>
        "#;
        let extracted = BershkaAdapter.extract(html, "u");

        assert_eq!(extracted.name, "Casaco oversize");
        assert_eq!(extracted.current_price, Some(dec("25.19")));
        assert_eq!(extracted.reference_price, Some(dec("35.99")));
        assert_eq!(extracted.discount_percent, Some(30));
        assert_eq!(extracted.sizes.len(), 3);
        assert!(extracted.sizes[0].available && !extracted.sizes[0].low_stock);
        assert!(extracted.sizes[1].available && extracted.sizes[1].low_stock);
        assert!(!extracted.sizes[2].available);
    }

    #[test]
    fn test_extract_missing_name_yields_sentinel() {
        let extracted = BershkaAdapter.extract("<div>vazio</div>", "u");
        assert_eq!(extracted.name, UNKNOWN_NAME);
    }
}
