use crate::flow::TransportStep;
use serde::Deserialize;

/// Main configuration structure for Tierfetch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub budget: BudgetConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
    #[serde(default)]
    pub datacenter: DatacenterConfig,
    #[serde(default)]
    pub flaresolverr: FlareSolverrConfig,
    #[serde(default)]
    pub residential: ResidentialConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteProfile>,
}

impl Config {
    /// Returns the site profile registered for `domain`, if any
    pub fn site(&self, domain: &str) -> Option<&SiteProfile> {
        self.sites.iter().find(|s| s.domain == domain)
    }
}

/// Global daily traffic budget
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Soft limit across all sites, in MB per UTC day (0 disables throttling)
    #[serde(rename = "global-soft-mb-per-day")]
    pub global_soft_mb_per_day: f64,

    /// Hard limit across all sites, in MB per UTC day (0 means unlimited)
    #[serde(rename = "global-hard-mb-per-day")]
    pub global_hard_mb_per_day: f64,

    /// Soft limit for residential traffic across all sites
    #[serde(rename = "residential-soft-mb-per-day", default)]
    pub residential_soft_mb_per_day: f64,

    /// Hard limit for residential traffic across all sites
    #[serde(rename = "residential-hard-mb-per-day", default)]
    pub residential_hard_mb_per_day: f64,

    /// Fraction of the soft limit at which throttling is advised
    #[serde(rename = "throttle-ratio", default = "default_throttle_ratio")]
    pub throttle_ratio: f64,
}

fn default_throttle_ratio() -> f64 {
    0.8
}

/// Streaming guards applied while reading response bodies
#[derive(Debug, Clone, Deserialize)]
pub struct BandwidthConfig {
    /// Size of the slices the body is inspected in
    #[serde(rename = "chunk-size-bytes", default = "default_chunk_size")]
    pub chunk_size_bytes: usize,

    /// Maximum number of bytes kept from one response
    #[serde(rename = "max-page-bytes", default = "default_max_page_bytes")]
    pub max_page_bytes: u64,

    /// Stop reading once `max_page_bytes` is reached
    #[serde(rename = "abort-on-large", default = "default_true")]
    pub abort_on_large: bool,

    /// Case-insensitive substrings after which the rest of the body is not needed
    #[serde(rename = "early-termination-markers", default)]
    pub early_termination_markers: Vec<String>,

    /// Case-insensitive substrings identifying a CAPTCHA interstitial
    #[serde(rename = "captcha-markers", default)]
    pub captcha_markers: Vec<String>,
}

fn default_chunk_size() -> usize {
    16 * 1024
}

fn default_max_page_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_page_bytes: default_max_page_bytes(),
            abort_on_large: true,
            early_termination_markers: Vec::new(),
            captcha_markers: Vec::new(),
        }
    }
}

/// What a flow state does with an outcome it has no rule for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOutcomePolicy {
    /// Stay on the current step
    #[default]
    Hold,
    /// Escalate to the next step once per occurrence
    Escalate,
}

/// HTTP transport behaviour shared by every step
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Step sequence for sites without their own fetch policy
    #[serde(rename = "default-sequence", default = "default_sequence")]
    pub default_sequence: Vec<TransportStep>,

    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Global bound on in-flight fetches, independent of domain
    #[serde(rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: u32,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Hops followed when resolving a redirect loop by hand
    #[serde(rename = "max-redirect-hops", default = "default_redirect_hops")]
    pub max_redirect_hops: u32,

    #[serde(rename = "unknown-outcome-policy", default)]
    pub unknown_outcome_policy: UnknownOutcomePolicy,
}

pub(crate) fn default_sequence() -> Vec<TransportStep> {
    vec![
        TransportStep::Direct,
        TransportStep::DatacenterProxy,
        TransportStep::Antibot,
        TransportStep::Flaresolverr,
    ]
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

fn default_redirect_hops() -> u32 {
    8
}

/// Datacenter proxy pool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatacenterConfig {
    #[serde(default)]
    pub proxies: Vec<String>,
}

/// FlareSolverr endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FlareSolverrConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the FlareSolverr service (e.g. `http://localhost:8191/v1`)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(rename = "max-timeout-ms", default = "default_flaresolverr_timeout")]
    pub max_timeout_ms: u64,
}

fn default_flaresolverr_timeout() -> u64 {
    60_000
}

impl Default for FlareSolverrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            max_timeout_ms: default_flaresolverr_timeout(),
        }
    }
}

/// What to do with a credential-file line that is not `host:port:user:pass`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedLinePolicy {
    #[default]
    Skip,
    Warn,
    Fail,
}

/// Residential proxy pool and burst limits
#[derive(Debug, Clone, Deserialize)]
pub struct ResidentialConfig {
    /// Static gateway endpoint, `host:port` or a full proxy URL
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// File of `host:port:user:pass` lines, one egress picked per request
    #[serde(rename = "source-file", default)]
    pub source_file: Option<String>,

    #[serde(rename = "malformed-line-policy", default)]
    pub malformed_line_policy: MalformedLinePolicy,

    /// Provider-wide daily cap shared by every domain (0 means unlimited)
    #[serde(rename = "provider-daily-mb", default)]
    pub provider_daily_mb: f64,

    /// Per-domain daily cap for sites without `residential-mb-per-day`
    #[serde(rename = "per-domain-daily-mb", default)]
    pub per_domain_daily_mb: f64,

    #[serde(rename = "max-consecutive-requests", default = "default_max_consecutive")]
    pub max_consecutive_requests: u32,

    #[serde(rename = "cooldown-after-burst-sec", default = "default_cooldown")]
    pub cooldown_after_burst_sec: u64,

    #[serde(rename = "daily-burst-allowance", default = "default_burst_allowance")]
    pub daily_burst_allowance: u32,

    #[serde(rename = "adaptive-cooldown", default)]
    pub adaptive_cooldown: bool,

    #[serde(rename = "cooldown-multiplier", default = "default_multiplier")]
    pub cooldown_multiplier: f64,

    #[serde(rename = "success-cooldown-reset", default)]
    pub success_cooldown_reset: bool,
}

fn default_max_consecutive() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    300
}

fn default_burst_allowance() -> u32 {
    50
}

fn default_multiplier() -> f64 {
    1.5
}

impl Default for ResidentialConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            source_file: None,
            malformed_line_policy: MalformedLinePolicy::Skip,
            provider_daily_mb: 0.0,
            per_domain_daily_mb: 0.0,
            max_consecutive_requests: default_max_consecutive(),
            cooldown_after_burst_sec: default_cooldown(),
            daily_burst_allowance: default_burst_allowance(),
            adaptive_cooldown: false,
            cooldown_multiplier: default_multiplier(),
            success_cooldown_reset: false,
        }
    }
}

/// Per-site fetch and budget policy
#[derive(Debug, Clone, Deserialize)]
pub struct SiteProfile {
    /// Site domain (e.g., "shop.example.com")
    pub domain: String,

    #[serde(rename = "allow-residential", default)]
    pub allow_residential: bool,

    #[serde(rename = "fetch-policy", default)]
    pub fetch_policy: FetchPolicy,

    #[serde(default)]
    pub budget: SiteBudget,
}

/// Ordered transport steps for a site
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchPolicy {
    #[serde(default)]
    pub sequence: Vec<TransportStep>,
}

/// Daily byte limits for a site, in MB
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteBudget {
    #[serde(rename = "soft-mb-per-day", default)]
    pub soft_mb_per_day: f64,

    #[serde(rename = "hard-mb-per-day", default)]
    pub hard_mb_per_day: f64,

    #[serde(rename = "residential-mb-per-day", default)]
    pub residential_mb_per_day: Option<f64>,
}
