use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap a headless_chrome failure, which surfaces as anyhow::Error.
    pub fn browser(err: impl std::fmt::Display) -> Self {
        AppError::Browser(err.to_string())
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
