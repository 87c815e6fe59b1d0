//! Manual redirect resolution
//!
//! Used when a step fails with a redirect-limit error. The chain is walked by
//! hand with a non-following client until a hop answers without redirecting.

use reqwest::header::LOCATION;
use reqwest::Client;
use std::collections::HashSet;
use url::Url;

/// Result of walking a redirect chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectResolution {
    /// A hop answered without redirecting
    Resolved(Url),
    /// The chain looped, broke, or exceeded the hop budget
    Unresolved(String),
}

/// Follows redirects from `start` for at most `max_hops` hops
///
/// `client` must not follow redirects itself.
pub async fn resolve_redirects(client: &Client, start: &Url, max_hops: u32) -> RedirectResolution {
    let mut current = start.clone();
    let mut seen = HashSet::new();
    seen.insert(current.to_string());

    for hop in 0..max_hops {
        let response = match client.get(current.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                return RedirectResolution::Unresolved(format!(
                    "hop {} to {} failed: {}",
                    hop, current, e
                ))
            }
        };

        if !response.status().is_redirection() {
            tracing::debug!(from = %start, to = %current, hops = hop, "Redirect chain resolved");
            return RedirectResolution::Resolved(current);
        }

        let location = match response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(location) => location.to_string(),
            None => {
                return RedirectResolution::Unresolved(format!(
                    "{} redirected without a Location header",
                    current
                ))
            }
        };

        let next = match current.join(&location) {
            Ok(next) => next,
            Err(e) => {
                return RedirectResolution::Unresolved(format!(
                    "invalid Location '{}': {}",
                    location, e
                ))
            }
        };

        if !seen.insert(next.to_string()) {
            return RedirectResolution::Unresolved(format!("redirect loop at {}", next));
        }

        current = next;
    }

    RedirectResolution::Unresolved(format!(
        "no canonical target within {} hops from {}",
        max_hops, start
    ))
}
