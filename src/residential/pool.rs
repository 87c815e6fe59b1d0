//! Residential egress resolution
//!
//! The residential tier egresses either through one static gateway (resolved
//! once) or through a credential file of `host:port:user:pass` lines, which is
//! re-read and sampled on every request.

use crate::config::{MalformedLinePolicy, ResidentialConfig};
use crate::{StepError, TierfetchError};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use url::Url;

/// One resolved residential proxy
#[derive(Clone, PartialEq, Eq)]
pub struct ResidentialEgress {
    /// Proxy URL including credentials
    pub proxy_url: String,
    /// `host:port`, safe to log
    pub label: String,
}

impl std::fmt::Debug for ResidentialEgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentialEgress")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Source of residential egresses
#[derive(Debug, Clone)]
pub enum ResidentialPool {
    /// No residential pool configured
    Unconfigured,
    /// Fixed gateway, resolved at construction
    Static(ResidentialEgress),
    /// Credential file sampled per request
    File {
        path: PathBuf,
        policy: MalformedLinePolicy,
    },
}

impl ResidentialPool {
    /// Builds the pool from configuration, resolving a static endpoint once
    pub fn from_config(config: &ResidentialConfig) -> Result<Self, TierfetchError> {
        if let Some(path) = &config.source_file {
            return Ok(ResidentialPool::File {
                path: PathBuf::from(path),
                policy: config.malformed_line_policy,
            });
        }

        match &config.endpoint {
            Some(endpoint) => {
                let egress = build_egress(
                    endpoint,
                    config.username.as_deref(),
                    config.password.as_deref(),
                )
                .ok_or_else(|| {
                    TierfetchError::ResidentialPool(format!(
                        "Invalid residential endpoint '{}'",
                        endpoint
                    ))
                })?;
                Ok(ResidentialPool::Static(egress))
            }
            None => Ok(ResidentialPool::Unconfigured),
        }
    }

    /// Picks the egress for the next residential request
    pub async fn resolve(&self) -> Result<ResidentialEgress, StepError> {
        match self {
            ResidentialPool::Unconfigured => Err(StepError::ProxyUnavailable(
                "no residential pool configured".to_string(),
            )),
            ResidentialPool::Static(egress) => Ok(egress.clone()),
            ResidentialPool::File { path, policy } => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    StepError::Pool(format!("Failed to read {}: {}", path.display(), e))
                })?;

                let egresses = parse_credential_lines(&content, *policy)?;
                egresses
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .ok_or_else(|| {
                        StepError::ProxyUnavailable(format!(
                            "no usable residential credentials in {}",
                            path.display()
                        ))
                    })
            }
        }
    }
}

/// Parses `host:port:user:pass` lines
///
/// Blank lines and `#` comments are ignored. Other malformed lines are handled
/// per `policy`.
pub fn parse_credential_lines(
    content: &str,
    policy: MalformedLinePolicy,
) -> Result<Vec<ResidentialEgress>, StepError> {
    let mut egresses = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_credential_line(line) {
            Some(egress) => egresses.push(egress),
            None => match policy {
                MalformedLinePolicy::Skip => {}
                MalformedLinePolicy::Warn => {
                    tracing::warn!(line = index + 1, "Skipping malformed residential credential line");
                }
                MalformedLinePolicy::Fail => {
                    return Err(StepError::Pool(format!(
                        "Malformed residential credential on line {}",
                        index + 1
                    )));
                }
            },
        }
    }

    Ok(egresses)
}

/// Parses one `host:port:user:pass` line
pub fn parse_credential_line(line: &str) -> Option<ResidentialEgress> {
    let parts: Vec<&str> = line.trim().splitn(4, ':').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let (host, port, user, pass) = (parts[0], parts[1], parts[2], parts[3]);
    port.parse::<u16>().ok()?;

    build_egress(&format!("{}:{}", host, port), Some(user), Some(pass))
}

/// Builds a proxy URL from an endpoint and optional credentials
fn build_egress(endpoint: &str, username: Option<&str>, password: Option<&str>) -> Option<ResidentialEgress> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_string();
    let label = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };

    if let Some(user) = username {
        url.set_username(user).ok()?;
    }
    if let Some(pass) = password {
        url.set_password(Some(pass)).ok()?;
    }

    Some(ResidentialEgress {
        proxy_url: url.to_string(),
        label,
    })
}
