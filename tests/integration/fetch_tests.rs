//! End-to-end fetches through the transport sequence

use crate::support::{bare_executor, config, domain_of, executor, site};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tierfetch::transport::{RetriedResponse, RetryingRequester, StaticProxyPool};
use tierfetch::TransportStep;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_direct_success_with_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html><span class=\"price\">19.99</span></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor("");
    let output = executor
        .fetch(&format!("{}/p/1", server.uri()))
        .await
        .expect("Direct fetch should succeed");

    assert!(output.html.contains("19.99"));
    assert!(output.elapsed_seconds >= 0.0);
    assert_eq!(output.metadata.status_code, 200);
    assert_eq!(output.metadata.transport_step, "direct");
    assert_eq!(output.metadata.domain, domain_of(&server));
    assert_eq!(
        output.metadata.content_type.as_deref(),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(output.metadata.proxy, None);
    assert_eq!(output.metadata.budget_reason, None);

    let snapshot = executor.controller().snapshot(chrono::Utc::now());
    assert!(snapshot.global.usage_mb > 0.0);
}

#[tokio::test]
async fn test_blocked_everywhere_makes_domain_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    // Default sequence; no proxy pool, anti-bot requester or FlareSolverr
    let executor = executor("");
    let url = format!("{}/p/1", server.uri());

    assert!(executor.fetch(&url).await.is_none());
    assert_eq!(executor.controller().current_step(&domain_of(&server)), None);

    // Unavailable is sticky: the site is not contacted again
    assert!(executor.fetch(&url).await.is_none());
}

#[tokio::test]
async fn test_escalation_to_datacenter_is_sticky() {
    let site_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&site_server)
        .await;

    // Plain-HTTP proxying sends the absolute URL to the proxy
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>via proxy</html>"))
        .expect(2)
        .mount(&proxy)
        .await;

    let executor = bare_executor(config(&site(
        &site_server,
        r#"["direct", "datacenter_proxy"]"#,
        "",
    )))
    .with_proxy_rotator(Arc::new(StaticProxyPool::new(vec![proxy.uri()])));

    let url = format!("{}/p/1", site_server.uri());
    let first = executor.fetch(&url).await.expect("Proxy fetch should succeed");
    assert_eq!(first.metadata.transport_step, "datacenter_proxy");
    assert_eq!(
        first.metadata.proxy.as_deref(),
        Some(proxy.address().to_string().as_str())
    );
    assert!(first.html.contains("via proxy"));

    let second = executor.fetch(&url).await.expect("Proxy fetch should succeed");
    assert_eq!(second.metadata.transport_step, "datacenter_proxy");
    assert_eq!(
        executor.controller().current_step(&domain_of(&site_server)),
        Some(TransportStep::DatacenterProxy)
    );
}

struct CannedRequester {
    calls: AtomicUsize,
}

#[async_trait]
impl RetryingRequester for CannedRequester {
    async fn make_request_with_retry(&self, url: &str) -> Option<RetriedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(RetriedResponse {
            content: format!("<html>anti-bot copy of {}</html>", url),
            response_time: 0.4,
            status: 200,
            headers: HashMap::from([("Content-Type".to_string(), "text/html".to_string())]),
            proxy_used: Some("http://user:pw@10.1.1.1:8080".to_string()),
        })
    }
}

#[tokio::test]
async fn test_antibot_after_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let requester = Arc::new(CannedRequester {
        calls: AtomicUsize::new(0),
    });
    let executor = bare_executor(config(&site(&server, r#"["direct", "antibot"]"#, "")))
        .with_antibot(requester.clone());

    let output = executor
        .fetch(&format!("{}/p/2", server.uri()))
        .await
        .expect("Anti-bot fetch should succeed");

    assert_eq!(output.metadata.transport_step, "antibot");
    assert_eq!(output.metadata.content_type.as_deref(), Some("text/html"));
    assert_eq!(output.metadata.proxy.as_deref(), Some("10.1.1.1:8080"));
    assert!(output.html.contains("/p/2"));
    assert_eq!(requester.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_captcha_page_escalates_to_flaresolverr() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><div class=\"g-recaptcha\"></div></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let solver = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "message": "Challenge solved!",
            "solution": {"status": 200, "response": "<html>real page</html>"},
            "startTimestamp": 0,
            "endTimestamp": 1200
        })))
        .expect(1)
        .mount(&solver)
        .await;

    let executor = executor(&format!(
        r#"
[bandwidth]
captcha-markers = ["g-recaptcha"]

[flaresolverr]
enabled = true
endpoint = "{}/v1"

{}
"#,
        solver.uri(),
        site(&server, r#"["direct", "flaresolverr"]"#, "")
    ));

    let output = executor
        .fetch(&format!("{}/", server.uri()))
        .await
        .expect("FlareSolverr fetch should succeed");

    assert_eq!(output.metadata.transport_step, "flaresolverr");
    assert_eq!(output.metadata.proxy.as_deref(), Some("flaresolverr"));
    assert_eq!(output.html, "<html>real page</html>");
}

#[tokio::test]
async fn test_early_termination_marker() {
    let server = MockServer::start().await;
    let mut body = String::from("<html><span class=\"price\">5.00</span><!-- END-PRICES -->");
    body.push_str(&"<p>reviews</p>".repeat(2000));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .mount(&server)
        .await;

    let executor = executor(
        r#"
[bandwidth]
chunk-size-bytes = 64
early-termination-markers = ["end-prices"]
"#,
    );

    let output = executor
        .fetch(&format!("{}/p/3", server.uri()))
        .await
        .expect("Fetch should succeed");

    assert!(output.html.contains("5.00"));
    assert!(output.html.len() < body.len());
    assert!(output.html.len() <= "<html><span class=\"price\">5.00</span><!-- END-PRICES -->".len() + 64);
}

#[tokio::test]
async fn test_size_cap_truncates_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 50_000]))
        .mount(&server)
        .await;

    let executor = executor(
        r#"
[bandwidth]
chunk-size-bytes = 1024
max-page-bytes = 10000
"#,
    );

    let output = executor
        .fetch(&format!("{}/big", server.uri()))
        .await
        .expect("Fetch should succeed");
    assert_eq!(output.html.len(), 10_000);
}

#[tokio::test]
async fn test_site_soft_limit_annotates_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 20 * 1024]))
        .mount(&server)
        .await;

    let executor = executor(&format!(
        r#"
{}

[site.budget]
soft-mb-per-day = 0.01
hard-mb-per-day = 1
"#,
        site(&server, r#"["direct"]"#, "")
    ));

    let output = executor
        .fetch(&format!("{}/p/4", server.uri()))
        .await
        .expect("Throttled fetch still returns content");

    let reason = output
        .metadata
        .budget_reason
        .expect("Throttle reason should be reported");
    assert!(reason.contains("soft limit"));
}

#[tokio::test]
async fn test_long_redirect_chain_is_resolved() {
    let server = MockServer::start().await;
    for i in 0..7 {
        Mock::given(method("GET"))
            .and(path(format!("/r{}", i)))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("/r{}", i + 1).as_str()),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/r7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>canonical</html>"))
        .mount(&server)
        .await;

    let executor = executor("");
    let output = executor
        .fetch(&format!("{}/r0", server.uri()))
        .await
        .expect("Resolved redirect target should be fetched");

    assert_eq!(output.html, "<html>canonical</html>");
    assert_eq!(output.metadata.transport_step, "direct");
}

#[tokio::test]
async fn test_redirect_loop_gives_up_without_escalating() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/a"))
        .mount(&server)
        .await;

    let executor = executor("");
    assert!(executor
        .fetch(&format!("{}/a", server.uri()))
        .await
        .is_none());
    assert_eq!(
        executor.controller().current_step(&domain_of(&server)),
        Some(TransportStep::Direct)
    );
}

#[tokio::test]
async fn test_read_timeout_holds_step_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut held = config("");
    held.transport.request_timeout_secs = 1;
    let executor = bare_executor(held);
    assert!(executor
        .fetch(&format!("{}/slow", server.uri()))
        .await
        .is_none());
    assert_eq!(
        executor.controller().current_step(&domain_of(&server)),
        Some(TransportStep::Direct)
    );

    let mut escalating = config("");
    escalating.transport.request_timeout_secs = 1;
    escalating.transport.unknown_outcome_policy =
        tierfetch::config::UnknownOutcomePolicy::Escalate;
    let executor = bare_executor(escalating);
    // Every later step lacks a collaborator, so escalation ends unavailable
    assert!(executor
        .fetch(&format!("{}/slow", server.uri()))
        .await
        .is_none());
    assert_eq!(executor.controller().current_step(&domain_of(&server)), None);
}

#[tokio::test]
async fn test_unparseable_url_is_refused() {
    let executor = executor("");
    assert!(executor.fetch("not a url").await.is_none());
}

#[tokio::test]
async fn test_timeout_retries_on_step_reached_by_concurrent_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut config = config(&site(&server, r#"["direct", "antibot"]"#, ""));
    config.transport.request_timeout_secs = 1;
    let requester = Arc::new(CannedRequester {
        calls: AtomicUsize::new(0),
    });
    let executor = bare_executor(config).with_antibot(requester.clone());

    let slow_url = format!("{}/slow", server.uri());
    let blocked_url = format!("{}/blocked", server.uri());
    let (slow, blocked) = tokio::join!(executor.fetch(&slow_url), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        executor.fetch(&blocked_url).await
    });

    // The 403 moved the domain to antibot while the slow request was in flight
    let blocked = blocked.expect("Blocked page should be fetched via antibot");
    assert_eq!(blocked.metadata.transport_step, "antibot");

    let slow = slow.expect("Timed-out fetch should retry on the new step");
    assert_eq!(slow.metadata.transport_step, "antibot");
    assert!(slow.html.contains("/slow"));
    assert_eq!(requester.calls.load(Ordering::SeqCst), 2);

    let flow = executor.controller().start_flow(&domain_of(&server));
    let state = flow.lock().unwrap();
    assert_eq!(state.failure_count("direct", tierfetch::Outcome::HttpTimeout), 1);
    assert_eq!(state.failure_count("antibot", tierfetch::Outcome::HttpTimeout), 0);
}
