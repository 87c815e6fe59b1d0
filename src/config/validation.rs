use crate::config::types::{
    BandwidthConfig, BudgetConfig, Config, DatacenterConfig, FlareSolverrConfig,
    ResidentialConfig, SiteProfile, TransportConfig,
};
use crate::flow::TransportStep;
use crate::residential::MAX_COOLDOWN_SECS;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Largest accepted adaptive cooldown multiplier
const MAX_COOLDOWN_MULTIPLIER: f64 = 100.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_budget_config(&config.budget)?;
    validate_transport_config(&config.transport)?;
    validate_bandwidth_config(&config.bandwidth)?;
    validate_datacenter_config(&config.datacenter)?;
    validate_flaresolverr_config(&config.flaresolverr)?;
    validate_residential_config(&config.residential)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates a soft/hard pair expressed in MB
fn validate_limits(label: &str, soft: f64, hard: f64) -> Result<(), ConfigError> {
    if !soft.is_finite() || soft < 0.0 || !hard.is_finite() || hard < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} limits must be non-negative numbers, got soft={} hard={}",
            label, soft, hard
        )));
    }

    if soft > 0.0 && hard > 0.0 && soft > hard {
        return Err(ConfigError::Validation(format!(
            "{} soft limit ({} MB) exceeds hard limit ({} MB)",
            label, soft, hard
        )));
    }

    Ok(())
}

fn validate_budget_config(config: &BudgetConfig) -> Result<(), ConfigError> {
    validate_limits(
        "global",
        config.global_soft_mb_per_day,
        config.global_hard_mb_per_day,
    )?;
    validate_limits(
        "global residential",
        config.residential_soft_mb_per_day,
        config.residential_hard_mb_per_day,
    )?;

    if !(config.throttle_ratio > 0.0 && config.throttle_ratio <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "throttle_ratio must be in (0, 1], got {}",
            config.throttle_ratio
        )));
    }

    Ok(())
}

/// Validates a step sequence: non-empty and free of duplicates
fn validate_sequence(label: &str, sequence: &[TransportStep]) -> Result<(), ConfigError> {
    if sequence.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} sequence cannot be empty",
            label
        )));
    }

    let mut seen = HashSet::new();
    for step in sequence {
        if !seen.insert(step) {
            return Err(ConfigError::Validation(format!(
                "{} sequence lists '{}' more than once",
                label, step
            )));
        }
    }

    Ok(())
}

fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    validate_sequence("default", &config.default_sequence)?;

    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 256, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.connect_timeout_secs == 0 || config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "connect and request timeouts must be at least one second".to_string(),
        ));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.max_redirect_hops == 0 {
        return Err(ConfigError::Validation(
            "max_redirect_hops must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_bandwidth_config(config: &BandwidthConfig) -> Result<(), ConfigError> {
    if config.chunk_size_bytes == 0 {
        return Err(ConfigError::Validation(
            "chunk_size_bytes must be >= 1".to_string(),
        ));
    }

    if config.abort_on_large && config.max_page_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_page_bytes must be >= 1 when abort_on_large is set".to_string(),
        ));
    }

    if config
        .early_termination_markers
        .iter()
        .chain(config.captcha_markers.iter())
        .any(|m| m.is_empty())
    {
        return Err(ConfigError::Validation(
            "body markers cannot be empty strings".to_string(),
        ));
    }

    Ok(())
}

fn validate_datacenter_config(config: &DatacenterConfig) -> Result<(), ConfigError> {
    for proxy in &config.proxies {
        Url::parse(proxy).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid datacenter proxy '{}': {}", proxy, e))
        })?;
    }
    Ok(())
}

fn validate_flaresolverr_config(config: &FlareSolverrConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    let endpoint = config.endpoint.as_deref().ok_or_else(|| {
        ConfigError::Validation("flaresolverr is enabled but has no endpoint".to_string())
    })?;

    Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid flaresolverr endpoint: {}", e)))?;

    Ok(())
}

fn validate_residential_config(config: &ResidentialConfig) -> Result<(), ConfigError> {
    if config.endpoint.is_some() && config.source_file.is_some() {
        return Err(ConfigError::Validation(
            "residential endpoint and source_file are mutually exclusive".to_string(),
        ));
    }

    if config.username.is_some() != config.password.is_some() {
        return Err(ConfigError::Validation(
            "residential username and password must be set together".to_string(),
        ));
    }

    validate_limits("residential provider", 0.0, config.provider_daily_mb)?;
    validate_limits("residential per-domain", 0.0, config.per_domain_daily_mb)?;

    if config.max_consecutive_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "max_consecutive_requests must be >= 1, got {}",
            config.max_consecutive_requests
        )));
    }

    if config.daily_burst_allowance < 1 {
        return Err(ConfigError::Validation(format!(
            "daily_burst_allowance must be >= 1, got {}",
            config.daily_burst_allowance
        )));
    }

    if config.cooldown_after_burst_sec > MAX_COOLDOWN_SECS {
        return Err(ConfigError::Validation(format!(
            "cooldown_after_burst_sec must be <= {}, got {}",
            MAX_COOLDOWN_SECS, config.cooldown_after_burst_sec
        )));
    }

    if !(config.cooldown_multiplier.is_finite()
        && (1.0..=MAX_COOLDOWN_MULTIPLIER).contains(&config.cooldown_multiplier))
    {
        return Err(ConfigError::Validation(format!(
            "cooldown_multiplier must be between 1.0 and {}, got {}",
            MAX_COOLDOWN_MULTIPLIER, config.cooldown_multiplier
        )));
    }

    Ok(())
}

fn validate_sites(sites: &[SiteProfile]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for site in sites {
        validate_domain_string(&site.domain)?;

        if !seen.insert(site.domain.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Site '{}' is configured more than once",
                site.domain
            )));
        }

        if !site.fetch_policy.sequence.is_empty() {
            validate_sequence(&site.domain, &site.fetch_policy.sequence)?;
        }

        validate_limits(
            &site.domain,
            site.budget.soft_mb_per_day,
            site.budget.hard_mb_per_day,
        )?;

        if let Some(residential) = site.budget.residential_mb_per_day {
            validate_limits(&site.domain, 0.0, residential)?;
        }
    }

    Ok(())
}

/// Validates a site domain (lowercase host, no scheme or path)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidDomain(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidDomain(format!(
            "Domain '{}' must be a lowercase host name",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidDomain(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidDomain(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidDomain(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
