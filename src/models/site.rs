use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// The fixed set of supported retailers. Used as the routing key for site
/// adapters and session files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT")]
pub enum Site {
    #[sqlx(rename = "zara")]
    Zara,
    #[sqlx(rename = "bershka")]
    Bershka,
    #[sqlx(rename = "pullandbear")]
    PullAndBear,
    #[sqlx(rename = "stradivarius")]
    Stradivarius,
}

impl Site {
    pub const ALL: [Site; 4] = [
        Site::Zara,
        Site::Bershka,
        Site::PullAndBear,
        Site::Stradivarius,
    ];

    /// Lowercase hostname fragment identifying the retailer.
    fn host_marker(self) -> &'static str {
        match self {
            Site::Zara => "zara",
            Site::Bershka => "bershka",
            Site::PullAndBear => "pullandbear",
            Site::Stradivarius => "stradivarius",
        }
    }

    /// Human-facing brand name for display and stored snapshots.
    pub fn brand_name(self) -> &'static str {
        match self {
            Site::Zara => "Zara",
            Site::Bershka => "Bershka",
            Site::PullAndBear => "Pull&Bear",
            Site::Stradivarius => "Stradivarius",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host_marker())
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Site::ALL
            .into_iter()
            .find(|site| site.host_marker() == lower)
            .ok_or_else(|| format!("unknown site: {s}"))
    }
}

/// Identify the retailer from a product URL by hostname substring match.
///
/// Case-insensitive; malformed URLs and unknown hosts yield `None`.
pub fn detect_site(url: &str) -> Option<Site> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Site::ALL
        .into_iter()
        .find(|site| host.contains(site.host_marker()))
}
