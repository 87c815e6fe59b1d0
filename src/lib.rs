//! Tierfetch: budget-aware, escalating page fetcher
//!
//! This crate fetches pages for a competitor-monitoring scraper. Each domain walks
//! an ordered sequence of transport tiers (direct, datacenter proxy, anti-bot
//! requester, FlareSolverr, residential burst), escalating on failure, while daily
//! byte budgets and residential burst limits keep bandwidth in check.

pub mod budget;
pub mod config;
pub mod flow;
pub mod residential;
pub mod transport;
pub mod url;

use thiserror::Error;

/// Main error type for Tierfetch operations
#[derive(Debug, Error)]
pub enum TierfetchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Missing domain in URL: {0}")]
    MissingDomain(String),

    #[error("Residential pool error: {0}")]
    ResidentialPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
}

/// Failure of a single transport step
///
/// Step errors never reach callers of `fetch`; the executor translates each one
/// into an [`flow::Outcome`] and feeds it to the domain's flow state.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Proxy unavailable: {0}")]
    ProxyUnavailable(String),

    #[error("Residential budget exceeded for {domain}: {reason}")]
    ResidentialBudgetExceeded { domain: String, reason: String },

    #[error("Connect timeout for {url}")]
    ConnectTimeout { url: String },

    #[error("Read timeout for {url}")]
    ReadTimeout { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Captcha challenge served for {url}")]
    Captcha { url: String },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Residential pool error: {0}")]
    Pool(String),
}

impl StepError {
    /// Classifies a reqwest failure for `url`
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_connect() && err.is_timeout() {
            StepError::ConnectTimeout { url }
        } else if err.is_timeout() {
            StepError::ReadTimeout { url }
        } else if err.is_redirect() {
            StepError::RedirectLimit { url }
        } else if let Some(status) = err.status() {
            StepError::HttpStatus {
                url,
                status: status.as_u16(),
            }
        } else {
            StepError::Http { url, source: err }
        }
    }

    /// Maps this failure to the outcome that drives escalation
    pub fn outcome(&self) -> flow::Outcome {
        use flow::Outcome;
        match self {
            StepError::ProxyUnavailable(_) => Outcome::ProxyUnavailable,
            StepError::ResidentialBudgetExceeded { .. } => Outcome::FatalError,
            StepError::ConnectTimeout { .. } => Outcome::ConnectTimeout,
            StepError::ReadTimeout { .. } => Outcome::HttpTimeout,
            StepError::HttpStatus { status: 403, .. } => Outcome::Http403,
            StepError::HttpStatus { status: 429, .. } => Outcome::Http429,
            StepError::HttpStatus { status: 503, .. } => Outcome::Http503,
            StepError::HttpStatus { .. } => Outcome::FatalError,
            StepError::Captcha { .. } => Outcome::Captcha,
            StepError::RedirectLimit { .. } => Outcome::FatalError,
            StepError::Http { .. } => Outcome::FatalError,
            StepError::Pool(_) => Outcome::ProxyUnavailable,
        }
    }
}

/// Locks a mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Result type alias for Tierfetch operations
pub type Result<T> = std::result::Result<T, TierfetchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for a single transport step
pub type StepResult<T> = std::result::Result<T, StepError>;

// Re-export commonly used types
pub use budget::{BudgetStatus, DailyBucket, TrafficBudgetManager};
pub use config::Config;
pub use flow::{Outcome, ProxyFlowController, ProxyFlowState, TransportStep};
pub use residential::ResidentialBurstController;
pub use transport::{FetchMetadata, FetchOutput, TransportStepExecutor};
pub use url::extract_domain;
