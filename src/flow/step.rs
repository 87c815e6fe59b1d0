//! Transport steps and step outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named transport tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStep {
    /// Plain GET, no proxy
    Direct,
    /// GET through a rotating datacenter proxy
    DatacenterProxy,
    /// Anti-bot retrying requester (browser automation pipeline)
    Antibot,
    /// CAPTCHA-solving proxy
    Flaresolverr,
    /// Residential proxy, gated by burst and budget limits
    ResidentialBurst,
}

impl TransportStep {
    /// Returns the label used in configuration, metadata and counters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::DatacenterProxy => "datacenter_proxy",
            Self::Antibot => "antibot",
            Self::Flaresolverr => "flaresolverr",
            Self::ResidentialBurst => "residential_burst",
        }
    }

    /// Returns true if traffic on this step is billed to residential budgets
    pub fn is_residential(&self) -> bool {
        matches!(self, Self::ResidentialBurst)
    }
}

impl fmt::Display for TransportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label of the terminal flow position
pub const UNAVAILABLE: &str = "unavailable";

/// Classified result of attempting a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    ConnectTimeout,
    HttpTimeout,
    Http403,
    Http429,
    Http503,
    Captcha,
    ProxyUnavailable,
    FatalError,
}

/// How an outcome moves a flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Terminal success, stop escalating
    Settle,
    /// Escalate once the outcome has been seen this many times on the step
    AfterOccurrences(u32),
    /// Escalate right away
    Immediate,
    /// No rule; the unknown-outcome policy decides
    Unclassified,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ConnectTimeout => "connect_timeout",
            Self::HttpTimeout => "http_timeout",
            Self::Http403 => "http_403",
            Self::Http429 => "http_429",
            Self::Http503 => "http_503",
            Self::Captcha => "captcha",
            Self::ProxyUnavailable => "proxy_unavailable",
            Self::FatalError => "fatal_error",
        }
    }

    /// Returns the escalation rule for this outcome
    pub fn escalation(&self) -> Escalation {
        match self {
            Self::Success => Escalation::Settle,
            Self::ConnectTimeout => Escalation::AfterOccurrences(2),
            Self::Http403
            | Self::Http429
            | Self::Http503
            | Self::Captcha
            | Self::ProxyUnavailable
            | Self::FatalError => Escalation::Immediate,
            Self::HttpTimeout => Escalation::Unclassified,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
