//! Per-retailer capability bundles: URL validation, optional pre-extraction
//! page interaction, and HTML-to-structured-data extraction built on ordered
//! selector fallback chains.

use scraper::{ElementRef, Html, Selector};

use crate::browser::PageHandle;
use crate::models::{ExtractedProduct, Site, SizeAvailability};
use crate::utils::error::Result;

pub mod bershka;
pub mod pull_and_bear;
pub mod zara;

pub use bershka::BershkaAdapter;
pub use pull_and_bear::PullAndBearAdapter;
pub use zara::ZaraAdapter;

/// What to read from a matched element.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Text,
    Attr(&'static str),
}

/// One candidate selector for a field.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub selector: &'static str,
    pub target: Target,
}

impl Candidate {
    pub const fn text(selector: &'static str) -> Self {
        Self {
            selector,
            target: Target::Text,
        }
    }

    pub const fn attr(selector: &'static str, attr: &'static str) -> Self {
        Self {
            selector,
            target: Target::Attr(attr),
        }
    }
}

/// Ordered fallback chain for one field. Candidates are tried in order and
/// the first non-empty match wins, so retailer markup drift degrades through
/// the chain instead of breaking extraction outright.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain {
    pub field: &'static str,
    pub candidates: &'static [Candidate],
}

impl SelectorChain {
    pub const fn new(field: &'static str, candidates: &'static [Candidate]) -> Self {
        Self { field, candidates }
    }

    /// First non-empty match across the candidate list.
    pub fn first_match(&self, document: &Html) -> Option<String> {
        for candidate in self.candidates {
            let Ok(selector) = Selector::parse(candidate.selector) else {
                continue;
            };
            for element in document.select(&selector) {
                let value = read_target(&element, candidate.target);
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }
}

fn read_target(element: &ElementRef<'_>, target: Target) -> String {
    match target {
        Target::Text => element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string(),
        Target::Attr(attr) => element
            .value()
            .attr(attr)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

/// Map a site's size action tag onto availability flags. Unrecognized tags
/// fall back to the element's structural disabled state instead of dropping
/// the size entry.
pub fn map_size_state(action_tag: Option<&str>, structurally_disabled: bool) -> SizeAvailability {
    match action_tag.map(str::to_ascii_lowercase).as_deref() {
        Some(tag) if tag.contains("low") => SizeAvailability::low(""),
        Some(tag) if tag.contains("in-stock") || tag.contains("add-to-cart") => {
            SizeAvailability::in_stock("")
        }
        Some(tag)
            if tag.contains("out-of-stock")
                || tag.contains("notify")
                || tag.contains("similar") =>
        {
            SizeAvailability::out_of_stock("")
        }
        _ => SizeAvailability::new("", !structurally_disabled, false),
    }
}

/// Per-retailer scraping capabilities. Implementations are stateless.
pub trait SiteAdapter: Send + Sync {
    fn site(&self) -> Site;

    /// Whether a URL points at a scrapeable product page on this site.
    /// Malformed URLs return false, never an error.
    fn validate_url(&self, url: &str) -> bool;

    /// Best-effort interaction needed before the full data is in the DOM
    /// (e.g. opening a size selector). Errors are caught and logged by the
    /// orchestrator; extraction proceeds on whatever HTML is available.
    fn prepare_page(&self, _page: &PageHandle) -> Result<()> {
        Ok(())
    }

    /// Extract structured product data from captured HTML. Never fails: a
    /// page with no matching name candidates yields the unknown-name
    /// sentinel, which the orchestrator classifies as a parse failure.
    fn extract(&self, html: &str, url: &str) -> ExtractedProduct;
}

/// Adapter for enumerated sites no one has written an adapter for yet. Its
/// validation always fails, so the orchestrator rejects these URLs before
/// any network activity.
pub struct UnsupportedAdapter {
    site: Site,
}

impl SiteAdapter for UnsupportedAdapter {
    fn site(&self) -> Site {
        self.site
    }

    fn validate_url(&self, _url: &str) -> bool {
        false
    }

    fn extract(&self, _html: &str, _url: &str) -> ExtractedProduct {
        ExtractedProduct {
            name: crate::models::UNKNOWN_NAME.to_string(),
            ..Default::default()
        }
    }
}

static ZARA: ZaraAdapter = ZaraAdapter;
static BERSHKA: BershkaAdapter = BershkaAdapter;
static PULL_AND_BEAR: PullAndBearAdapter = PullAndBearAdapter;
static STRADIVARIUS: UnsupportedAdapter = UnsupportedAdapter {
    site: Site::Stradivarius,
};

/// Total lookup from site to adapter. Unimplemented sites resolve to an
/// always-rejecting adapter rather than a missing entry.
pub fn adapter_for(site: Site) -> &'static dyn SiteAdapter {
    match site {
        Site::Zara => &ZARA,
        Site::Bershka => &BERSHKA,
        Site::PullAndBear => &PULL_AND_BEAR,
        Site::Stradivarius => &STRADIVARIUS,
    }
}
