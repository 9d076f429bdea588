//! Drives one URL through the full pipeline: site detection, URL validation,
//! navigation, extraction, validation, persistence. Every exit is a
//! `ScrapeOutcome` value; the orchestrator itself never returns an error for
//! a bad page.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::adapters::{adapter_for, SiteAdapter};
use crate::browser::{BrowserManager, NavFailure, SiteContext};
use crate::models::{
    detect_site, BatchOptions, FailureKind, ProductSnapshot, ScrapeOptions, ScrapeOutcome,
};
use crate::storage::StorageGateway;

fn failure_kind(failure: &NavFailure) -> FailureKind {
    match failure {
        NavFailure::Blocked => FailureKind::Blocked,
        NavFailure::Challenge => FailureKind::Challenge,
        NavFailure::Timeout => FailureKind::Timeout,
        NavFailure::Unknown(_) => FailureKind::Unknown,
    }
}

fn failure_message(failure: &NavFailure, url: &str) -> String {
    match failure {
        NavFailure::Blocked => format!("document request for {url} returned 403"),
        NavFailure::Challenge => format!("anti-bot interstitial served for {url}"),
        NavFailure::Timeout => format!("navigation to {url} timed out"),
        NavFailure::Unknown(message) => message.clone(),
    }
}

pub struct ScrapeOrchestrator {
    browser: Arc<BrowserManager>,
    gateway: Arc<dyn StorageGateway>,
    /// One scrape at a time, process-wide. Retail sites correlate parallel
    /// automated visits from one IP; throughput is not the goal here.
    run_lock: Mutex<()>,
}

impl ScrapeOrchestrator {
    pub fn new(browser: Arc<BrowserManager>, gateway: Arc<dyn StorageGateway>) -> Self {
        Self {
            browser,
            gateway,
            run_lock: Mutex::new(()),
        }
    }

    pub fn browser(&self) -> &BrowserManager {
        &self.browser
    }

    /// Scrape a single product URL. The shared browser is released afterwards;
    /// use `scrape_many` to keep it warm across URLs.
    #[instrument(skip(self, options))]
    pub async fn scrape(&self, url: &str, options: &ScrapeOptions) -> ScrapeOutcome {
        let _guard = self.run_lock.lock().await;
        let outcome = self.attempt(url, options).await;
        self.browser.release().await;
        outcome
    }

    /// Scrape a list of URLs sequentially with randomized pacing. Outcomes
    /// come back in input order; one URL's failure never aborts the rest.
    #[instrument(skip(self, urls, options), fields(urls = urls.len()))]
    pub async fn scrape_many(&self, urls: &[String], options: &BatchOptions) -> Vec<ScrapeOutcome> {
        let _guard = self.run_lock.lock().await;
        let mut outcomes = Vec::with_capacity(urls.len());

        for (index, url) in urls.iter().enumerate() {
            if index > 0 {
                let delay_ms = {
                    let (min, max) = options.delay_range_ms;
                    rand::thread_rng().gen_range(min..=max.max(min))
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let outcome = self.attempt(url, &options.scrape).await;
            info!(url, status = outcome.http_status(), "batch item finished");
            outcomes.push(outcome);
        }

        self.browser.release().await;
        outcomes
    }

    async fn attempt(&self, url: &str, options: &ScrapeOptions) -> ScrapeOutcome {
        let Some(site) = detect_site(url) else {
            return ScrapeOutcome::Rejected {
                reason: format!("no supported site recognized in {url}"),
            };
        };

        let adapter = adapter_for(site);
        if !adapter.validate_url(url) {
            return ScrapeOutcome::Rejected {
                reason: format!("{url} is not a product page on {site}"),
            };
        }

        let browser = match self.browser.acquire(options.headless).await {
            Ok(browser) => browser,
            Err(e) => return ScrapeOutcome::failed(FailureKind::Unknown, e.to_string()),
        };

        let ctx = match self.browser.open_context(&browser, site, options) {
            Ok(ctx) => ctx,
            Err(e) => return ScrapeOutcome::failed(FailureKind::Unknown, e.to_string()),
        };

        let nav = self.browser.navigate(&ctx, url).await;
        if let Some(failure) = &nav.failure {
            let outcome = ScrapeOutcome::failed(failure_kind(failure), failure_message(failure, url));
            self.browser.close_context(ctx);
            return outcome;
        }

        let html = self.capture_html(ctx, adapter, url);
        let extracted = adapter.extract(&html, url);

        let snapshot = match ProductSnapshot::from_extracted(site, url, extracted) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return ScrapeOutcome::Failed {
                    kind: FailureKind::ParseError,
                    message: e.to_string(),
                    raw_html: Some(html),
                }
            }
        };

        let change = if options.persist {
            match self.gateway.record_snapshot(&snapshot).await {
                Ok(change) => Some(change),
                Err(e) => {
                    return ScrapeOutcome::failed(
                        FailureKind::Unknown,
                        format!("persistence failed for {url}: {e}"),
                    )
                }
            }
        } else {
            None
        };

        info!(
            url,
            name = %snapshot.name,
            price = %snapshot.current_price,
            sizes = snapshot.sizes.len(),
            "scrape succeeded"
        );
        ScrapeOutcome::Success { snapshot, change }
    }

    /// Run the adapter's page preparation and capture the document. The
    /// context is always closed here, so the session is persisted whether or
    /// not the capture was useful.
    fn capture_html(&self, ctx: SiteContext, adapter: &dyn SiteAdapter, url: &str) -> String {
        if let Err(e) = adapter.prepare_page(&ctx.page()) {
            warn!(url, error = %e, "page preparation failed, extracting as-is");
        }

        let html = match ctx.content() {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "document capture failed");
                String::new()
            }
        };

        self.browser.close_context(ctx);
        html
    }
}
