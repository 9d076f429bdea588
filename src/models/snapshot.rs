use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Site;
use crate::utils::error::AppError;

/// Sentinel used by adapters when every name selector candidate came up empty.
/// The orchestrator converts it into a parse failure instead of persisting junk.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// Explicit and derived discounts may disagree by this many points before the
/// disagreement is worth logging.
const DISCOUNT_TOLERANCE: u8 = 5;

/// One size option as shown on the product page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeAvailability {
    pub label: String,
    pub available: bool,
    pub low_stock: bool,
}

impl SizeAvailability {
    /// A low-stock size is still purchasable, so `low_stock` forces `available`.
    pub fn new(label: impl Into<String>, available: bool, low_stock: bool) -> Self {
        Self {
            label: label.into(),
            available: available || low_stock,
            low_stock,
        }
    }

    pub fn in_stock(label: impl Into<String>) -> Self {
        Self::new(label, true, false)
    }

    pub fn low(label: impl Into<String>) -> Self {
        Self::new(label, true, true)
    }

    pub fn out_of_stock(label: impl Into<String>) -> Self {
        Self::new(label, false, false)
    }
}

/// Raw adapter output for one page: everything the markup yielded, nothing
/// validated yet. Becomes a `ProductSnapshot` or a parse failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedProduct {
    pub name: String,
    pub current_price: Option<Decimal>,
    pub reference_price: Option<Decimal>,
    pub discount_percent: Option<u8>,
    pub sizes: Vec<SizeAvailability>,
    pub image_url: Option<String>,
}

impl ExtractedProduct {
    pub fn has_name(&self) -> bool {
        !self.name.is_empty() && self.name != UNKNOWN_NAME
    }
}

/// A point-in-time capture of a product's price and size availability.
/// The unit handed to the storage gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSnapshot {
    pub site: Site,
    pub url: String,
    pub name: String,
    pub current_price: Decimal,
    pub reference_price: Option<Decimal>,
    pub discount_percent: Option<u8>,
    pub sizes: Vec<SizeAvailability>,
    pub image_url: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ProductSnapshot {
    /// Validate an extraction into a snapshot. Fails when the name sentinel is
    /// still in place or no non-negative current price was found.
    pub fn from_extracted(
        site: Site,
        url: &str,
        extracted: ExtractedProduct,
    ) -> Result<Self, AppError> {
        if !extracted.has_name() {
            return Err(AppError::Parse {
                message: format!("no name candidate matched for {url}"),
            });
        }

        let current_price = extracted.current_price.ok_or_else(|| AppError::Parse {
            message: format!("no price candidate matched for {url}"),
        })?;
        if current_price < Decimal::ZERO {
            return Err(AppError::Parse {
                message: format!("negative price {current_price} for {url}"),
            });
        }

        let discount_percent = reconcile_discount(
            extracted.discount_percent,
            Some(current_price),
            extracted.reference_price,
        );

        Ok(Self {
            site,
            url: url.to_string(),
            name: extracted.name,
            current_price,
            reference_price: extracted.reference_price,
            discount_percent,
            sizes: extracted.sizes,
            image_url: extracted.image_url,
            captured_at: Utc::now(),
        })
    }
}

/// Flags from the storage gateway describing what an upsert actually changed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSummary {
    pub first_seen: bool,
    pub price_changed: bool,
    pub stock_changed: bool,
}

/// Resolve the discount percentage for a snapshot.
///
/// Policy: an explicit percentage asserted by the page wins. When the page
/// asserts nothing and both prices are known with reference > current, the
/// discount is derived by rounding `(reference - current) / reference * 100`.
/// A page-asserted value that disagrees with the derived one by more than a
/// few points is kept but logged, since the page is what the shopper sees.
pub fn reconcile_discount(
    explicit: Option<u8>,
    current: Option<Decimal>,
    reference: Option<Decimal>,
) -> Option<u8> {
    let derived = derive_discount(current, reference);

    match (explicit, derived) {
        (Some(stated), Some(computed)) => {
            if stated.abs_diff(computed) > DISCOUNT_TOLERANCE {
                warn!(stated, computed, "page discount disagrees with price delta");
            }
            Some(stated)
        }
        (Some(stated), None) => Some(stated),
        (None, derived) => derived,
    }
}

fn derive_discount(current: Option<Decimal>, reference: Option<Decimal>) -> Option<u8> {
    let current = current?;
    let reference = reference?;
    if reference <= current || reference.is_zero() {
        return None;
    }
    let pct = ((reference - current) / reference * Decimal::from(100))
        .to_f64()?
        .round();
    if pct > 0.0 && pct <= 100.0 {
        Some(pct as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_low_stock_implies_available() {
        let size = SizeAvailability::new("M", false, true);
        assert!(size.available);
        assert!(size.low_stock);

        let plain = SizeAvailability::out_of_stock("L");
        assert!(!plain.available);
        assert!(!plain.low_stock);
    }

    #[test]
    fn test_derived_discount_rounding() {
        // 49.95 -> 39.95 is a 20.02% cut, rounds to 20.
        assert_eq!(
            reconcile_discount(None, Some(dec("39.95")), Some(dec("49.95"))),
            Some(20)
        );
        // Half of 100.
        assert_eq!(
            reconcile_discount(None, Some(dec("50")), Some(dec("100"))),
            Some(50)
        );
    }

    #[test]
    fn test_no_discount_when_reference_not_higher() {
        assert_eq!(reconcile_discount(None, Some(dec("50")), Some(dec("50"))), None);
        assert_eq!(reconcile_discount(None, Some(dec("60")), Some(dec("50"))), None);
        assert_eq!(reconcile_discount(None, Some(dec("60")), None), None);
    }

    #[test]
    fn test_explicit_discount_wins_over_derived() {
        // Page says 30, prices say 20; the page's assertion is kept.
        assert_eq!(
            reconcile_discount(Some(30), Some(dec("40")), Some(dec("50"))),
            Some(30)
        );
        assert_eq!(reconcile_discount(Some(15), None, None), Some(15));
    }

    #[test]
    fn test_derived_discount_within_one_point_of_exact() {
        // Derived discount stays within ±1 of the exact percentage.
        let cases = [("39.95", "49.95"), ("19.99", "29.99"), ("7.99", "9.99")];
        for (cur, reference) in cases {
            let current = dec(cur);
            let refp = dec(reference);
            let got = reconcile_discount(None, Some(current), Some(refp)).unwrap() as f64;
            let exact = ((refp - current) / refp * Decimal::from(100)).to_f64().unwrap();
            assert!((got - exact).abs() <= 1.0, "{cur} vs {reference}: {got} vs {exact}");
        }
    }

    #[test]
    fn test_snapshot_requires_name_and_price() {
        let site = Site::Zara;
        let url = "https://www.zara.com/pt/pt/x-p01234567.html";

        let no_name = ExtractedProduct {
            name: UNKNOWN_NAME.to_string(),
            current_price: Some(dec("10")),
            ..Default::default()
        };
        assert!(ProductSnapshot::from_extracted(site, url, no_name).is_err());

        let no_price = ExtractedProduct {
            name: "Casaco".to_string(),
            ..Default::default()
        };
        assert!(ProductSnapshot::from_extracted(site, url, no_price).is_err());

        let ok = ExtractedProduct {
            name: "Casaco".to_string(),
            current_price: Some(dec("39.95")),
            reference_price: Some(dec("49.95")),
            ..Default::default()
        };
        let snapshot = ProductSnapshot::from_extracted(site, url, ok).unwrap();
        assert_eq!(snapshot.discount_percent, Some(20));
        assert_eq!(snapshot.site, Site::Zara);
        assert!(snapshot.captured_at <= Utc::now());
    }
}
