//! Fingerprint shaping for automated visits: a stable plausible device
//! identity per site, automation-marker masking, and a blocklist that keeps
//! background tracker noise off the wire.

use crate::models::Site;

/// Plausible current desktop user agents. One is pinned per site so the
/// fingerprint stays consistent across runs instead of rotating per request.
pub const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Deterministic user agent for a site: same identity on every visit.
pub fn user_agent_for(site: Site) -> &'static str {
    let idx = Site::ALL.iter().position(|s| *s == site).unwrap_or(0);
    USER_AGENTS[idx % USER_AGENTS.len()]
}

/// Accept-Language / platform pair matching the pinned agent's locale story.
pub const ACCEPT_LANGUAGE: &str = "pt-PT,pt;q=0.9,en;q=0.8";
pub const TIMEZONE: &str = "Europe/Lisbon";
pub const LOCALE: &str = "pt-PT";

/// Hosts whose requests are aborted inside the page: analytics and trackers
/// contribute nothing to extraction and inflate latency.
pub const BLOCKED_HOSTS: [&str; 10] = [
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.net",
    "facebook.com/tr",
    "hotjar.com",
    "clarity.ms",
    "criteo.com",
    "scorecardresearch.com",
    "newrelic.com",
];

/// Font downloads are blocked as well; extraction never needs them.
pub const BLOCKED_EXTENSIONS: [&str; 4] = [".woff", ".woff2", ".ttf", ".otf"];

pub fn is_blocked_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if BLOCKED_HOSTS.iter().any(|host| lower.contains(host)) {
        return true;
    }
    let path_end = lower.split('?').next().unwrap_or(&lower);
    BLOCKED_EXTENSIONS.iter().any(|ext| path_end.ends_with(ext))
}

/// Body fragments that identify anti-bot interstitials across the vendors
/// these retailers deploy.
pub const CHALLENGE_MARKERS: [&str; 7] = [
    "cf-challenge",
    "challenge-platform",
    "Just a moment",
    "_Incapsula_Resource",
    "datadome",
    "px-captcha",
    "Pardon Our Interruption",
];

pub fn looks_like_challenge(html: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Chromium switches for a low-signal launch.
pub const CHROME_ARGS: [&str; 7] = [
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-infobars",
    "--window-size=1920,1080",
];

/// Script evaluated on every new document before site code runs. Masks the
/// automation markers headless Chromium leaks by default.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['pt-PT', 'pt', 'en'] });
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3, 4, 5].map(() => ({ name: 'Chromium PDF Plugin' })),
    });
    window.chrome = window.chrome || { runtime: {} };
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) =>
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters);
})();
"#;

/// Build the init script that replays persisted localStorage entries into the
/// fresh context. Runs on every document; the context is per-site, so the
/// origin always matches.
pub fn storage_replay_script(entries: &std::collections::HashMap<String, String>) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let pairs = serde_json::to_string(&entries).ok()?;
    Some(format!(
        r#"(() => {{
    try {{
        const entries = {pairs};
        for (const [key, value] of Object.entries(entries)) {{
            if (window.localStorage.getItem(key) === null) {{
                window.localStorage.setItem(key, value);
            }}
        }}
    }} catch (_) {{}}
}})();"#
    ))
}

/// Script that serializes the page's localStorage for persistence at context
/// close. Evaluates to a JSON object string.
pub const STORAGE_HARVEST_SCRIPT: &str = r#"
(() => {
    try {
        const out = {};
        for (let i = 0; i < window.localStorage.length; i++) {
            const key = window.localStorage.key(i);
            out[key] = window.localStorage.getItem(key);
        }
        return JSON.stringify(out);
    } catch (_) {
        return "{}";
    }
})();
"#;
