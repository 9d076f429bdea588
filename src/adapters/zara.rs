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

/// Zara product paths end in a `p`-prefixed numeric product id:
/// `/pt/pt/casaco-p02753752.html`.
static PRODUCT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-p(\d{6,})\.html$").unwrap());

const NAME_CHAIN: SelectorChain = SelectorChain::new(
    "name",
    &[
        Candidate::text(r#"h1[data-qa-qualifier="product-detail-info-name"]"#),
        Candidate::text("h1.product-detail-info__header-name"),
        Candidate::attr(r#"meta[property="og:title"]"#, "content"),
    ],
);

const CURRENT_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "current_price",
    &[
        Candidate::text(r#"span[data-qa-qualifier="price-amount-current"] .money-amount__main"#),
        Candidate::text(".price-current__amount .money-amount__main"),
        Candidate::text(".price__amount .money-amount__main"),
    ],
);

const REFERENCE_PRICE_CHAIN: SelectorChain = SelectorChain::new(
    "reference_price",
    &[
        Candidate::text(r#"span[data-qa-qualifier="price-amount-old"] .money-amount__main"#),
        Candidate::text(".price-old__amount .money-amount__main"),
    ],
);

const DISCOUNT_CHAIN: SelectorChain = SelectorChain::new(
    "discount",
    &[
        Candidate::text(r#"span[data-qa-qualifier="price-discount-percentage"]"#),
        Candidate::text(".price-current__discount-percentage"),
    ],
);

const IMAGE_CHAIN: SelectorChain = SelectorChain::new(
    "image",
    &[
        Candidate::attr(r#"meta[property="og:image"]"#, "content"),
        Candidate::attr("picture.media-image img", "src"),
    ],
);

/// Size rows, most specific markup generation first.
const SIZE_ROW_SELECTORS: [&str; 2] = [
    r#"[data-qa-qualifier="size-selector-sizes-size"]"#,
    "li.size-selector-sizes-size",
];

const SIZE_LABEL_SELECTORS: [&str; 2] = [
    r#"[data-qa-qualifier="size-selector-sizes-size-label"]"#,
    ".size-selector-sizes-size__label",
];

pub struct ZaraAdapter;

impl SiteAdapter for ZaraAdapter {
    fn site(&self) -> Site {
        Site::Zara
    }

    fn validate_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => PRODUCT_PATH.is_match(parsed.path()),
            Err(_) => false,
        }
    }

    /// The size list is rendered only after the selector is opened.
    fn prepare_page(&self, page: &PageHandle) -> Result<()> {
        page.evaluate(
            r#"
            (() => {
                const trigger = document.querySelector(
                    'button[data-qa-action="size-selector-show"], .product-detail-size-info__main-label'
                );
                if (trigger) { trigger.click(); return true; }
                return false;
            })();
            "#,
        )?;
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
    let label = first_text(row, &SIZE_LABEL_SELECTORS)
        .or_else(|| {
            let text = row.text().collect::<Vec<_>>().join(" ").trim().to_string();
            (!text.is_empty()).then_some(text)
        })?;

    let button = Selector::parse("button").ok()?;
    let (action_tag, disabled) = match row.select(&button).next() {
        Some(btn) => (
            btn.value().attr("data-qa-action").map(str::to_string),
            btn.value().attr("disabled").is_some()
                || btn.value().attr("class").is_some_and(|c| c.contains("disabled")),
        ),
        None => (
            row.value().attr("data-qa-action").map(str::to_string),
            row.value().attr("class").is_some_and(|c| c.contains("disabled")),
        ),
    };

    let mut size = map_size_state(action_tag.as_deref(), disabled);
    size.label = label;
    Some(size)
}

fn first_text(row: &ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(element) = row.select(&selector).next() {
            let text = element.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}
