//! Configuration module for Tierfetch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The resulting [`Config`] is built once at startup and handed to every component.
//!
//! # Example
//!
//! ```no_run
//! use tierfetch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tierfetch.toml")).unwrap();
//! println!("Global hard cap: {} MB", config.budget.global_hard_mb_per_day);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BandwidthConfig, BudgetConfig, Config, DatacenterConfig, FetchPolicy, FlareSolverrConfig,
    MalformedLinePolicy, ResidentialConfig, SiteBudget, SiteProfile, TransportConfig,
    UnknownOutcomePolicy,
};

pub(crate) use types::default_sequence;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
