//! Transport step execution
//!
//! This module runs a domain's current transport step, including:
//! - Building HTTP clients, with or without a proxy
//! - Guarded streaming reads for the budget-consuming tiers
//! - Classifying step failures into outcomes that drive escalation
//! - Budget bookkeeping after every step that produced bytes
//! - Manual resolution of redirect loops

use crate::config::{Config, TransportConfig};
use crate::flow::{Escalation, Outcome, ProxyFlowController, TransportStep};
use crate::residential::ResidentialPool;
use crate::transport::collaborators::{
    CaptchaSolver, FlareSolverrClient, ProxyRotator, RetryingRequester, StaticProxyPool,
};
use crate::transport::redirect::{resolve_redirects, RedirectResolution};
use crate::transport::stream_guard::{contains_marker, StreamGuard};
use crate::url::extract_domain;
use crate::{StepError, StepResult, TierfetchError};
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use url::Url;

/// Redirects a step client follows before failing with a redirect error
const CLIENT_REDIRECT_LIMIT: usize = 5;

/// Details of how a page was fetched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchMetadata {
    pub status_code: u16,
    pub content_type: Option<String>,
    /// Proxy used, without credentials
    pub proxy: Option<String>,
    pub transport_step: String,
    pub domain: String,
    /// Set when a budget advised throttling or blocked further use
    pub budget_reason: Option<String>,
}

/// A fetched page
#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub html: String,
    pub elapsed_seconds: f64,
    pub metadata: FetchMetadata,
}

/// What a successful step hands back to the fetch loop
#[derive(Debug)]
struct StepResponse {
    body: Vec<u8>,
    status: u16,
    content_type: Option<String>,
    proxy: Option<String>,
    budget_reason: Option<String>,
}

/// Builds an HTTP client for one transport step
///
/// # Arguments
///
/// * `config` - Timeouts and user agent
/// * `proxy` - Proxy to route through, if any
/// * `redirect` - Redirect policy
pub fn build_http_client(
    config: &TransportConfig,
    proxy: Option<Proxy>,
    redirect: Policy,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(redirect)
        .gzip(true)
        .brotli(true);

    builder = match proxy {
        Some(proxy) => builder.proxy(proxy),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Strips credentials from a proxy URL for logs and metadata
pub fn redact_proxy(proxy: &str) -> String {
    match Url::parse(proxy) {
        Ok(url) => match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => "proxy".to_string(),
        },
        Err(_) => "proxy".to_string(),
    }
}

/// Fetches pages by walking each domain's transport steps
pub struct TransportStepExecutor {
    config: Arc<Config>,
    controller: Arc<ProxyFlowController>,
    direct_client: Client,
    resolver_client: Client,
    guard: StreamGuard,
    residential_pool: ResidentialPool,
    proxy_rotator: Option<Arc<dyn ProxyRotator>>,
    antibot: Option<Arc<dyn RetryingRequester>>,
    captcha_solver: Option<Arc<dyn CaptchaSolver>>,
    limiter: Arc<Semaphore>,
}

impl TransportStepExecutor {
    /// Creates an executor without collaborators
    ///
    /// Steps whose collaborator is missing fail with `proxy_unavailable` and
    /// escalate.
    pub fn new(
        config: Arc<Config>,
        controller: Arc<ProxyFlowController>,
    ) -> Result<Self, TierfetchError> {
        let direct_client = build_http_client(
            &config.transport,
            None,
            Policy::limited(CLIENT_REDIRECT_LIMIT),
        )?;
        let resolver_client = build_http_client(&config.transport, None, Policy::none())?;
        let residential_pool = ResidentialPool::from_config(&config.residential)?;
        let limiter = Arc::new(Semaphore::new(
            config.transport.max_concurrent_fetches as usize,
        ));

        Ok(Self {
            guard: StreamGuard::from_config(&config.bandwidth),
            config,
            controller,
            direct_client,
            resolver_client,
            residential_pool,
            proxy_rotator: None,
            antibot: None,
            captcha_solver: None,
            limiter,
        })
    }

    /// Creates an executor with the collaborators configuration can provide:
    /// the static datacenter pool and FlareSolverr
    pub fn from_config(config: Config) -> Result<Self, TierfetchError> {
        let config = Arc::new(config);
        let controller = Arc::new(ProxyFlowController::new(config.clone(), Utc::now()));
        let mut executor = Self::new(config.clone(), controller)?;

        let pool = StaticProxyPool::from_config(&config.datacenter);
        if !pool.is_empty() {
            executor = executor.with_proxy_rotator(Arc::new(pool));
        }

        if config.flaresolverr.enabled {
            let solver = FlareSolverrClient::new(&config.flaresolverr)?;
            executor = executor.with_captcha_solver(Arc::new(solver));
        }

        Ok(executor)
    }

    pub fn with_proxy_rotator(mut self, rotator: Arc<dyn ProxyRotator>) -> Self {
        self.proxy_rotator = Some(rotator);
        self
    }

    pub fn with_antibot(mut self, requester: Arc<dyn RetryingRequester>) -> Self {
        self.antibot = Some(requester);
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha_solver = Some(solver);
        self
    }

    pub fn controller(&self) -> &Arc<ProxyFlowController> {
        &self.controller
    }

    /// Fetches `url`, escalating through the domain's transport steps
    ///
    /// # Returns
    ///
    /// * `Some(FetchOutput)` - A step succeeded
    /// * `None` - The domain is currently unavailable: every step is exhausted,
    ///   a redirect loop could not be resolved, or the current step failed in a
    ///   way that does not escalate
    pub async fn fetch(&self, url: &str) -> Option<FetchOutput> {
        let _permit = self.limiter.acquire().await.ok()?;

        let mut target = match Url::parse(url) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(url, error = %e, "Refusing to fetch unparseable URL");
                return None;
            }
        };
        let domain = match extract_domain(&target) {
            Some(domain) => domain,
            None => {
                tracing::warn!(url, "Refusing to fetch URL without a host");
                return None;
            }
        };

        let started = Instant::now();
        let mut redirect_retried = false;

        loop {
            let step = match self.controller.current_step(&domain) {
                Some(step) => step,
                None => {
                    tracing::warn!(domain = %domain, url, "All transport steps exhausted");
                    return None;
                }
            };

            tracing::debug!(domain = %domain, step = %step, url = %target, "Attempting transport step");

            match self.run_step(step, &domain, &target).await {
                Ok(response) => {
                    self.controller
                        .record_outcome(&domain, step, Outcome::Success);
                    if step.is_residential() {
                        self.controller.residential().record_success(&domain);
                    }
                    return Some(self.finish(response, step, &domain, started));
                }
                Err(StepError::RedirectLimit { .. }) if !redirect_retried => {
                    match resolve_redirects(
                        &self.resolver_client,
                        &target,
                        self.config.transport.max_redirect_hops,
                    )
                    .await
                    {
                        RedirectResolution::Resolved(resolved) => {
                            tracing::info!(domain = %domain, from = %target, to = %resolved, "Retrying with resolved redirect target");
                            target = resolved;
                            redirect_retried = true;
                        }
                        RedirectResolution::Unresolved(reason) => {
                            tracing::warn!(domain = %domain, url = %target, reason = %reason, "Unresolved redirect loop");
                            self.controller.tally(&domain, Outcome::FatalError);
                            return None;
                        }
                    }
                }
                Err(error) if redirect_retried => {
                    tracing::warn!(domain = %domain, url = %target, error = %error, "Retry with resolved redirect target failed");
                    self.controller.tally(&domain, Outcome::FatalError);
                    return None;
                }
                Err(error) => {
                    let outcome = error.outcome();
                    if matches!(error, StepError::ResidentialBudgetExceeded { .. }) {
                        tracing::warn!(domain = %domain, step = %step, error = %error, "Residential quota denied");
                    } else {
                        tracing::info!(domain = %domain, step = %step, outcome = %outcome, error = %error, "Transport step failed");
                    }

                    let escalated = self.controller.record_outcome(&domain, step, outcome);
                    let moved = self.controller.current_step(&domain) != Some(step);
                    if !escalated && !moved && outcome.escalation() == Escalation::Unclassified {
                        tracing::warn!(domain = %domain, step = %step, outcome = %outcome, "Failure does not escalate, giving up on this fetch");
                        return None;
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        response: StepResponse,
        step: TransportStep,
        domain: &str,
        started: Instant,
    ) -> FetchOutput {
        FetchOutput {
            html: String::from_utf8_lossy(&response.body).into_owned(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            metadata: FetchMetadata {
                status_code: response.status,
                content_type: response.content_type,
                proxy: response.proxy,
                transport_step: step.as_str().to_string(),
                domain: domain.to_string(),
                budget_reason: response.budget_reason,
            },
        }
    }

    async fn run_step(
        &self,
        step: TransportStep,
        domain: &str,
        url: &Url,
    ) -> StepResult<StepResponse> {
        let mut response = match step {
            TransportStep::Direct => self.http_get(&self.direct_client, url, None).await?,
            TransportStep::DatacenterProxy => self.datacenter_get(url).await?,
            TransportStep::Antibot => self.antibot_get(url).await?,
            TransportStep::Flaresolverr => self.flaresolverr_get(url).await?,
            TransportStep::ResidentialBurst => return self.residential_get(domain, url).await,
        };

        let status =
            self.controller
                .budget()
                .consume(domain, response.body.len() as u64, step, Utc::now());
        if status.should_throttle || status.blocked {
            response.budget_reason = status.reason;
        }

        if step != TransportStep::Flaresolverr {
            self.check_captcha(url, &response.body)?;
        }

        Ok(response)
    }

    async fn http_get(
        &self,
        client: &Client,
        url: &Url,
        proxy: Option<String>,
    ) -> StepResult<StepResponse> {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| StepError::from_reqwest(url.as_str(), e))?;

        check_status(url, response.status().as_u16())?;

        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let body = self
            .guard
            .read(response)
            .await
            .map_err(|e| StepError::from_reqwest(url.as_str(), e))?;

        Ok(StepResponse {
            body: body.bytes,
            status,
            content_type,
            proxy,
            budget_reason: None,
        })
    }

    async fn datacenter_get(&self, url: &Url) -> StepResult<StepResponse> {
        let rotator = self.proxy_rotator.as_ref().ok_or_else(|| {
            StepError::ProxyUnavailable("no datacenter proxy rotation configured".to_string())
        })?;
        let proxy_url = rotator.get_validated_proxy().await.ok_or_else(|| {
            StepError::ProxyUnavailable("no validated datacenter proxy".to_string())
        })?;

        let client = self.proxied_client(&proxy_url)?;
        self.http_get(&client, url, Some(redact_proxy(&proxy_url)))
            .await
    }

    async fn antibot_get(&self, url: &Url) -> StepResult<StepResponse> {
        let requester = self.antibot.as_ref().ok_or_else(|| {
            StepError::ProxyUnavailable("no anti-bot requester configured".to_string())
        })?;

        let response = requester
            .make_request_with_retry(url.as_str())
            .await
            .filter(|r| !r.content.is_empty())
            .ok_or_else(|| {
                StepError::ProxyUnavailable("anti-bot requester returned no content".to_string())
            })?;

        check_status(url, response.status)?;

        let content_type = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone());

        Ok(StepResponse {
            body: response.content.into_bytes(),
            status: response.status,
            content_type,
            proxy: response.proxy_used.as_deref().map(redact_proxy),
            budget_reason: None,
        })
    }

    async fn flaresolverr_get(&self, url: &Url) -> StepResult<StepResponse> {
        let solver = self
            .captcha_solver
            .as_ref()
            .filter(|s| s.is_enabled())
            .ok_or_else(|| StepError::ProxyUnavailable("flaresolverr is disabled".to_string()))?;

        let solution = solver.solve_get_request(url.as_str()).await.ok_or_else(|| {
            StepError::ProxyUnavailable("flaresolverr returned no solution".to_string())
        })?;

        check_status(url, solution.status)?;
        tracing::debug!(url = %url, load_time = solution.load_time, "FlareSolverr solved page");

        Ok(StepResponse {
            body: solution.response.into_bytes(),
            status: solution.status,
            content_type: None,
            proxy: Some("flaresolverr".to_string()),
            budget_reason: None,
        })
    }

    /// Residential fetch; budget enforcement runs after the bytes are in
    ///
    /// A request that pushes the domain over its residential budget still
    /// returns its content, and the block applies from the next request.
    async fn residential_get(&self, domain: &str, url: &Url) -> StepResult<StepResponse> {
        if !self.controller.can_use_residential(domain, Utc::now()) {
            return Err(StepError::ResidentialBudgetExceeded {
                domain: domain.to_string(),
                reason: "burst cooldown, daily cap or budget block in effect".to_string(),
            });
        }

        let egress = self.residential_pool.resolve().await?;
        let client = self.proxied_client(&egress.proxy_url)?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| StepError::from_reqwest(url.as_str(), e))?;

        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| StepError::from_reqwest(url.as_str(), e))?;

        let verdict =
            self.controller
                .record_residential_request(domain, body.len() as u64, Utc::now());

        check_status(url, status)?;
        self.check_captcha(url, &body)?;

        let budget_reason = if verdict.blocked {
            tracing::warn!(
                domain,
                egress = %egress.label,
                reason = verdict.reason.as_deref().unwrap_or(""),
                "Residential budget exceeded by this request; content kept, tier closed for today"
            );
            verdict.reason
        } else if verdict.should_throttle {
            verdict.reason
        } else {
            None
        };

        Ok(StepResponse {
            body: body.to_vec(),
            status,
            content_type,
            proxy: Some(egress.label),
            budget_reason,
        })
    }

    fn proxied_client(&self, proxy_url: &str) -> StepResult<Client> {
        let proxy = Proxy::all(proxy_url).map_err(|e| {
            StepError::ProxyUnavailable(format!(
                "invalid proxy {}: {}",
                redact_proxy(proxy_url),
                e
            ))
        })?;

        build_http_client(
            &self.config.transport,
            Some(proxy),
            Policy::limited(CLIENT_REDIRECT_LIMIT),
        )
        .map_err(|e| StepError::ProxyUnavailable(format!("failed to build proxied client: {}", e)))
    }

    fn check_captcha(&self, url: &Url, body: &[u8]) -> StepResult<()> {
        let markers = &self.config.bandwidth.captcha_markers;
        if markers.iter().any(|m| contains_marker(body, m)) {
            return Err(StepError::Captcha {
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

fn check_status(url: &Url, status: u16) -> StepResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StepError::HttpStatus {
            url: url.to_string(),
            status,
        })
    }
}

fn content_type_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
