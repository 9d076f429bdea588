use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::ErrorReason;
use headless_chrome::protocol::cdp::{Emulation, Network, Page};
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::models::{ScrapeOptions, Site};
use crate::session::{SessionState, SessionStore, StoredCookie};
use crate::stealth;
use crate::utils::error::{AppError, Result};

/// Classified navigation failure. Returned as a value so the orchestrator can
/// pattern-match; navigation never raises for these cases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NavFailure {
    /// HTTP 403 on the document request: the IP or session is flagged.
    Blocked,
    /// A known anti-bot interstitial was served instead of the product page.
    Challenge,
    /// Navigation exceeded the configured timeout.
    Timeout,
    /// Anything else, with the underlying message.
    Unknown(String),
}

/// Outcome of one navigation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavResult {
    pub http_status: Option<i64>,
    pub failure: Option<NavFailure>,
}

impl NavResult {
    pub fn success(http_status: Option<i64>) -> Self {
        Self {
            http_status,
            failure: None,
        }
    }

    pub fn failed(failure: NavFailure, http_status: Option<i64>) -> Self {
        Self {
            http_status,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Thin page wrapper handed to site adapters for best-effort interaction.
pub struct PageHandle {
    tab: Arc<Tab>,
}

impl PageHandle {
    /// Run a script in the page, returning its JSON value when there is one.
    pub fn evaluate(&self, script: &str) -> Result<Option<serde_json::Value>> {
        let object = self
            .tab
            .evaluate(script, false)
            .map_err(AppError::browser)?;
        Ok(object.value)
    }

    /// Wait for an element to appear. Used after interactions that mutate the
    /// DOM before extraction can proceed.
    pub fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(AppError::browser)
    }
}

/// One isolated browsing context bound to a site: an incognito context with a
/// single tab carrying the site's persisted identity.
pub struct SiteContext {
    tab: Arc<Tab>,
    site: Site,
    /// (url, status) pairs observed by the response handler during navigation.
    statuses: Arc<StdMutex<Vec<(String, i64)>>>,
}

impl SiteContext {
    pub fn site(&self) -> Site {
        self.site
    }

    pub fn page(&self) -> PageHandle {
        PageHandle {
            tab: Arc::clone(&self.tab),
        }
    }

    /// Snapshot of the current document HTML.
    pub fn content(&self) -> Result<String> {
        self.tab.get_content().map_err(AppError::browser)
    }

    fn status_for(&self, url: &str, final_url: &str) -> Option<i64> {
        let statuses = self.statuses.lock().ok()?;
        statuses
            .iter()
            .find(|(u, _)| u == url)
            .or_else(|| statuses.iter().find(|(u, _)| u == final_url))
            .map(|(_, status)| *status)
    }
}

/// Owns the shared browser process and the lifecycle of per-site contexts.
///
/// The browser is an explicitly managed singleton: `acquire` returns the live
/// process when connected and launches otherwise, with launches serialized by
/// the slot mutex so concurrent callers cannot race two processes into
/// existence.
pub struct BrowserManager {
    config: ScraperConfig,
    sessions: Arc<SessionStore>,
    slot: Mutex<Option<Arc<Browser>>>,
}

impl BrowserManager {
    pub fn new(config: ScraperConfig, sessions: Arc<SessionStore>) -> Self {
        Self {
            config,
            sessions,
            slot: Mutex::new(None),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Idempotent singleton acquisition. Returns the existing process when it
    /// still answers, relaunches when it died underneath us.
    pub async fn acquire(&self, headless: bool) -> Result<Arc<Browser>> {
        let mut slot = self.slot.lock().await;

        if let Some(browser) = slot.as_ref() {
            if browser.get_version().is_ok() {
                return Ok(Arc::clone(browser));
            }
            warn!("shared browser process no longer responding, relaunching");
            *slot = None;
        }

        let browser = Arc::new(self.launch(headless)?);
        *slot = Some(Arc::clone(&browser));
        info!(headless, "launched shared browser process");
        Ok(browser)
    }

    fn launch(&self, headless: bool) -> Result<Browser> {
        let args: Vec<&OsStr> = stealth::CHROME_ARGS.iter().map(OsStr::new).collect();
        let mut launch_options = LaunchOptions::default_builder()
            .headless(headless)
            .sandbox(false) // often needed in containerized environments
            .idle_browser_timeout(Duration::from_secs(self.config.idle_browser_timeout_secs))
            .args(args)
            .build()
            .map_err(AppError::browser)?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        Browser::new(launch_options).map_err(AppError::browser)
    }

    /// Close the shared browser. Called after a batch completes or on fatal
    /// orchestrator error, never mid-batch.
    pub async fn release(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            info!("released shared browser process");
        }
    }

    /// Open a fresh isolated context for one scrape attempt: incognito
    /// context + tab, fingerprint overrides, stealth init script, the site's
    /// persisted session replayed in, and tracker/font request blocking.
    pub fn open_context(
        &self,
        browser: &Browser,
        site: Site,
        options: &ScrapeOptions,
    ) -> Result<SiteContext> {
        let incognito = browser.new_context().map_err(AppError::browser)?;
        let tab = incognito.new_tab().map_err(AppError::browser)?;

        tab.set_default_timeout(Duration::from_secs(options.timeout_secs));

        let user_agent = stealth::user_agent_for(site);
        tab.set_user_agent(user_agent, Some(stealth::ACCEPT_LANGUAGE), None)
            .map_err(AppError::browser)?;

        tab.call_method(Emulation::SetTimezoneOverride {
            timezone_id: stealth::TIMEZONE.to_string(),
        })
        .map_err(AppError::browser)?;
        tab.call_method(Emulation::SetLocaleOverride {
            locale: Some(stealth::LOCALE.to_string()),
        })
        .map_err(AppError::browser)?;

        self.add_init_script(&tab, stealth::STEALTH_SCRIPT)?;

        if let Some(state) = self.sessions.load(site) {
            self.replay_session(&tab, site, &state)?;
        }

        let statuses = Arc::new(StdMutex::new(Vec::new()));
        self.install_request_filter(&tab, Arc::clone(&statuses))?;

        debug!(%site, user_agent, "opened isolated context");
        Ok(SiteContext {
            tab,
            site,
            statuses,
        })
    }

    fn add_init_script(&self, tab: &Arc<Tab>, source: &str) -> Result<()> {
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: source.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map(|_| ())
        .map_err(AppError::browser)
    }

    /// Re-inject persisted cookies and queue localStorage replay.
    fn replay_session(&self, tab: &Arc<Tab>, site: Site, state: &SessionState) -> Result<()> {
        for cookie in &state.cookies {
            let result = tab.call_method(Network::SetCookie {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                url: None,
                domain: Some(cookie.domain.clone()),
                path: Some(cookie.path.clone()),
                secure: Some(cookie.secure),
                http_only: Some(cookie.http_only),
                same_site: None,
                expires: cookie.expires,
                priority: None,
                same_party: None,
                source_scheme: None,
                source_port: None,
                partition_key: None,
            });
            if let Err(e) = result {
                // One stale cookie should not void the rest of the identity.
                debug!(%site, cookie = %cookie.name, error = %e, "cookie injection failed");
            }
        }

        if let Some(script) = stealth::storage_replay_script(&state.local_storage) {
            self.add_init_script(tab, &script)?;
        }

        debug!(%site, cookies = state.cookies.len(), "replayed persisted session");
        Ok(())
    }

    /// Abort tracker and font requests before they hit the wire, and record
    /// document response statuses for navigation classification.
    fn install_request_filter(
        &self,
        tab: &Arc<Tab>,
        statuses: Arc<StdMutex<Vec<(String, i64)>>>,
    ) -> Result<()> {
        let patterns = vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_Type: None,
            request_stage: Some(RequestStage::Request),
        }];
        tab.enable_fetch(Some(&patterns), None)
            .map_err(AppError::browser)?;

        let interceptor = Arc::new(
            move |_transport: Arc<Transport>, _session_id: SessionId, event: RequestPausedEvent| {
                if stealth::is_blocked_url(&event.params.request.url) {
                    RequestPausedDecision::Fail(FailRequest {
                        request_id: event.params.request_id,
                        error_reason: ErrorReason::BlockedByClient,
                    })
                } else {
                    RequestPausedDecision::Continue(None)
                }
            },
        );
        tab.enable_request_interception(interceptor)
            .map_err(AppError::browser)?;

        tab.register_response_handling(
            "navigation-status",
            Box::new(move |params, _get_body| {
                if let Ok(mut seen) = statuses.lock() {
                    // Bounded: only navigations matter, not every subresource.
                    if seen.len() < 64 {
                        seen.push((params.response.url.clone(), params.response.status as i64));
                    }
                }
            }),
        )
        .map_err(AppError::browser)?;

        Ok(())
    }

    /// Navigate the context's tab to a product URL and classify the result.
    /// Failures come back as `NavResult` values, never as errors.
    pub async fn navigate(&self, ctx: &SiteContext, url: &str) -> NavResult {
        // Short randomized pause so batched navigations do not tick like a
        // metronome.
        let delay_ms = {
            let (min, max) = self.config.pre_nav_delay_ms;
            rand::thread_rng().gen_range(min..=max.max(min))
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        if let Err(e) = ctx.tab.navigate_to(url) {
            return classify_nav_error(&e.to_string());
        }
        if let Err(e) = ctx.tab.wait_until_navigated() {
            return classify_nav_error(&e.to_string());
        }

        let final_url = ctx.tab.get_url();
        let status = ctx.status_for(url, &final_url);
        if status == Some(403) {
            return NavResult::failed(NavFailure::Blocked, status);
        }

        // Challenge pages often settle in after the document loads; give the
        // interstitial a moment and check twice before trusting the verdict.
        match ctx.tab.get_content() {
            Ok(html) if stealth::looks_like_challenge(&html) => {
                tokio::time::sleep(Duration::from_millis(self.config.challenge_settle_ms)).await;
                let recheck = ctx.tab.get_content().unwrap_or(html);
                if stealth::looks_like_challenge(&recheck) {
                    return NavResult::failed(NavFailure::Challenge, status);
                }
            }
            Ok(_) => {}
            Err(e) => {
                return NavResult::failed(NavFailure::Unknown(e.to_string()), status);
            }
        }

        NavResult::success(status)
    }

    /// Persist the context's current identity and release the tab.
    ///
    /// Runs on success and failure paths alike: a blocked or challenged
    /// attempt still yields cookies worth keeping. Session persistence is a
    /// full replace, and its failures degrade rather than propagate.
    pub fn close_context(&self, ctx: SiteContext) {
        let state = self.harvest_session(&ctx);
        self.sessions.save(ctx.site, state);

        if let Err(e) = ctx.tab.close(true) {
            debug!(site = %ctx.site, error = %e, "tab close failed");
        }
    }

    fn harvest_session(&self, ctx: &SiteContext) -> SessionState {
        let cookies = match ctx.tab.get_cookies() {
            Ok(cookies) => cookies
                .into_iter()
                .map(|c| StoredCookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    secure: c.secure,
                    http_only: c.http_only,
                    expires: if c.session { None } else { Some(c.expires) },
                })
                .collect(),
            Err(e) => {
                debug!(site = %ctx.site, error = %e, "cookie harvest failed");
                Vec::new()
            }
        };

        let local_storage = ctx
            .tab
            .evaluate(stealth::STORAGE_HARVEST_SCRIPT, false)
            .ok()
            .and_then(|obj| obj.value)
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
            .unwrap_or_default();

        SessionState {
            cookies,
            local_storage,
            saved_at: None, // stamped by the store
        }
    }
}

fn classify_nav_error(message: &str) -> NavResult {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        NavResult::failed(NavFailure::Timeout, None)
    } else {
        NavResult::failed(NavFailure::Unknown(message.to_string()), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_nav_error() {
        let timeout = classify_nav_error("navigating to page timed out");
        assert_eq!(timeout.failure, Some(NavFailure::Timeout));

        let other = classify_nav_error("connection refused");
        assert_eq!(
            other.failure,
            Some(NavFailure::Unknown("connection refused".to_string()))
        );
        assert!(other.http_status.is_none());
    }

    #[test]
    fn test_nav_result_success() {
        let ok = NavResult::success(Some(200));
        assert!(ok.is_success());
        assert_eq!(ok.http_status, Some(200));

        let blocked = NavResult::failed(NavFailure::Blocked, Some(403));
        assert!(!blocked.is_success());
    }
}
