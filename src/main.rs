use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use moda_watcher::browser::BrowserManager;
use moda_watcher::config::AppConfig;
use moda_watcher::models::{BatchOptions, ScrapeOptions, Site};
use moda_watcher::orchestrator::ScrapeOrchestrator;
use moda_watcher::session::SessionStore;
use moda_watcher::storage::{MemoryGateway, SqliteGateway, StorageGateway};

#[derive(Parser)]
#[command(name = "moda-watcher", version, about = "Price and stock tracker for fashion retail sites")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a single product URL and print the outcome as JSON
    Scrape {
        url: String,
        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
        /// Skip the storage gateway; just print what was extracted
        #[arg(long)]
        no_persist: bool,
        /// Navigation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Scrape several URLs sequentially with randomized pacing
    Batch {
        /// Product URLs, or none when --file is given
        urls: Vec<String>,
        /// File with one URL per line
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        headed: bool,
        #[arg(long)]
        no_persist: bool,
    },
    /// Inspect or clear persisted per-site sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// Show which sites have a stored session and how old it is
    List,
    /// Delete the stored session for one site
    Clear { site: Site },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("moda_watcher=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Command::Scrape {
            url,
            headed,
            no_persist,
            timeout,
        } => {
            let orchestrator = build_orchestrator(&config, no_persist).await?;
            let options = ScrapeOptions {
                headless: !headed,
                persist: !no_persist,
                timeout_secs: timeout.unwrap_or(config.scraper.default_timeout_secs),
            };

            let outcome = orchestrator.scrape(&url, &options).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Command::Batch {
            urls,
            file,
            headed,
            no_persist,
        } => {
            let urls = collect_urls(urls, file)?;
            if urls.is_empty() {
                anyhow::bail!("no URLs given; pass them as arguments or via --file");
            }

            let orchestrator = build_orchestrator(&config, no_persist).await?;
            let options = BatchOptions {
                scrape: ScrapeOptions {
                    headless: !headed,
                    persist: !no_persist,
                    timeout_secs: config.scraper.default_timeout_secs,
                },
                delay_range_ms: config.batch.delay_range_ms,
            };

            let outcomes = orchestrator.scrape_many(&urls, &options).await;
            let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            info!(total = urls.len(), succeeded, "batch finished");

            if succeeded < urls.len() {
                std::process::exit(1);
            }
        }
        Command::Sessions { action } => {
            let sessions = SessionStore::new(&config.sessions.root);
            match action {
                SessionsAction::List => {
                    for site in Site::ALL {
                        if sessions.has(site) {
                            println!("{site}: saved {} minutes ago", sessions.age_minutes(site));
                        } else {
                            println!("{site}: no stored session");
                        }
                    }
                }
                SessionsAction::Clear { site } => {
                    sessions.delete(site);
                    println!("cleared session for {site}");
                }
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(
    config: &AppConfig,
    no_persist: bool,
) -> Result<ScrapeOrchestrator> {
    let sessions = Arc::new(SessionStore::new(&config.sessions.root));
    let browser = Arc::new(BrowserManager::new(config.scraper.clone(), sessions));

    let gateway: Arc<dyn StorageGateway> = if no_persist {
        Arc::new(MemoryGateway::new())
    } else {
        Arc::new(SqliteGateway::connect(&config.storage.database_url).await?)
    };

    Ok(ScrapeOrchestrator::new(browser, gateway))
}

fn collect_urls(mut urls: Vec<String>, file: Option<PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let body = std::fs::read_to_string(&path)?;
        urls.extend(
            body.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(urls)
}
