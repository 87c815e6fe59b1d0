//! External collaborators used by the proxied transport steps
//!
//! The executor only depends on the traits here. Two implementations ship with
//! the crate: [`StaticProxyPool`] for datacenter proxies and
//! [`FlareSolverrClient`] for a FlareSolverr service.

use crate::config::{DatacenterConfig, FlareSolverrConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Response produced by the anti-bot retrying requester
#[derive(Debug, Clone)]
pub struct RetriedResponse {
    pub content: String,
    pub response_time: f64,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub proxy_used: Option<String>,
}

/// Anti-bot request pipeline that retries internally
#[async_trait]
pub trait RetryingRequester: Send + Sync {
    async fn make_request_with_retry(&self, url: &str) -> Option<RetriedResponse>;
}

/// Result of a solved CAPTCHA-protected GET
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub response: String,
    pub status: u16,
    /// Seconds the solver spent on the page
    pub load_time: f64,
}

/// CAPTCHA-solving proxy
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn solve_get_request(&self, url: &str) -> Option<CaptchaSolution>;
}

/// Source of validated datacenter proxies
#[async_trait]
pub trait ProxyRotator: Send + Sync {
    async fn get_validated_proxy(&self) -> Option<String>;
}

/// Round-robin rotation over a fixed proxy list
#[derive(Debug)]
pub struct StaticProxyPool {
    proxies: Vec<String>,
    next: AtomicUsize,
}

impl StaticProxyPool {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            next: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &DatacenterConfig) -> Self {
        Self::new(config.proxies.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[async_trait]
impl ProxyRotator for StaticProxyPool {
    async fn get_validated_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[index].clone())
    }
}

/// Client for a FlareSolverr `/v1` endpoint
pub struct FlareSolverrClient {
    client: Client,
    endpoint: String,
    max_timeout_ms: u64,
    enabled: bool,
}

#[derive(Serialize)]
struct FlareSolverrRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout: u64,
}

#[derive(Deserialize)]
struct FlareSolverrResponse {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<FlareSolverrSolution>,
    #[serde(rename = "startTimestamp", default)]
    start_timestamp: u64,
    #[serde(rename = "endTimestamp", default)]
    end_timestamp: u64,
}

#[derive(Deserialize)]
struct FlareSolverrSolution {
    status: u16,
    #[serde(default)]
    response: String,
}

impl FlareSolverrClient {
    pub fn new(config: &FlareSolverrConfig) -> Result<Self, reqwest::Error> {
        // The service itself waits up to max_timeout; leave headroom on top
        let client = Client::builder()
            .timeout(Duration::from_millis(config.max_timeout_ms) + Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone().unwrap_or_default(),
            max_timeout_ms: config.max_timeout_ms,
            enabled: config.enabled && config.endpoint.is_some(),
        })
    }
}

#[async_trait]
impl CaptchaSolver for FlareSolverrClient {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn solve_get_request(&self, url: &str) -> Option<CaptchaSolution> {
        let request = FlareSolverrRequest {
            cmd: "request.get",
            url,
            max_timeout: self.max_timeout_ms,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, error = %e, "FlareSolverr request failed");
                return None;
            }
        };

        let body: FlareSolverrResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url, error = %e, "FlareSolverr returned an unreadable response");
                return None;
            }
        };

        if body.status != "ok" {
            tracing::warn!(url, message = %body.message, "FlareSolverr could not solve the page");
            return None;
        }

        let load_time = body.end_timestamp.saturating_sub(body.start_timestamp) as f64 / 1000.0;
        body.solution.map(|solution| CaptchaSolution {
            response: solution.response,
            status: solution.status,
            load_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_proxy_pool_round_robin() {
        let pool = StaticProxyPool::new(vec![
            "http://10.0.0.1:3128".to_string(),
            "http://10.0.0.2:3128".to_string(),
        ]);

        assert_eq!(
            pool.get_validated_proxy().await.as_deref(),
            Some("http://10.0.0.1:3128")
        );
        assert_eq!(
            pool.get_validated_proxy().await.as_deref(),
            Some("http://10.0.0.2:3128")
        );
        assert_eq!(
            pool.get_validated_proxy().await.as_deref(),
            Some("http://10.0.0.1:3128")
        );
    }

    #[tokio::test]
    async fn test_empty_pool_has_no_proxy() {
        let pool = StaticProxyPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.get_validated_proxy().await.is_none());
    }

    fn solver_for(server: &MockServer, enabled: bool) -> FlareSolverrClient {
        FlareSolverrClient::new(&FlareSolverrConfig {
            enabled,
            endpoint: Some(format!("{}/v1", server.uri())),
            max_timeout_ms: 5_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_flaresolverr_solution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(body_partial_json(serde_json::json!({
                "cmd": "request.get",
                "url": "https://shop.example.com/p/1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "message": "Challenge solved!",
                "solution": {
                    "url": "https://shop.example.com/p/1",
                    "status": 200,
                    "response": "<html>solved</html>"
                },
                "startTimestamp": 1_000,
                "endTimestamp": 3_500
            })))
            .mount(&server)
            .await;

        let solver = solver_for(&server, true);
        assert!(solver.is_enabled());

        let solution = solver
            .solve_get_request("https://shop.example.com/p/1")
            .await
            .unwrap();
        assert_eq!(solution.status, 200);
        assert_eq!(solution.response, "<html>solved</html>");
        assert_eq!(solution.load_time, 2.5);
    }

    #[tokio::test]
    async fn test_flaresolverr_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Timeout after 5.0 seconds."
            })))
            .mount(&server)
            .await;

        let solver = solver_for(&server, true);
        assert!(solver
            .solve_get_request("https://shop.example.com/")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_flaresolverr_disabled() {
        let server = MockServer::start().await;
        let solver = solver_for(&server, false);
        assert!(!solver.is_enabled());
    }
}
