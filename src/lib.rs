pub mod adapters;
pub mod browser;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod stealth;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::ScrapeOrchestrator;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
