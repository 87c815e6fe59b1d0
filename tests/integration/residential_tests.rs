//! Residential burst tier behind a mock gateway

use crate::support::{domain_of, executor, site};
use std::io::Write;
use tempfile::NamedTempFile;
use tierfetch::TransportStep;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn blocked_site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_residential_daily_cap() {
    let site_server = blocked_site().await;

    let gateway = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'r'; 600 * 1024]))
        .expect(2)
        .mount(&gateway)
        .await;

    let executor = executor(&format!(
        r#"
[residential]
endpoint = "{}"
max-consecutive-requests = 10

{}

[site.budget]
residential-mb-per-day = 1
"#,
        gateway.uri(),
        site(
            &site_server,
            r#"["direct", "residential_burst"]"#,
            "allow-residential = true"
        )
    ));
    let url = format!("{}/p/1", site_server.uri());
    let domain = domain_of(&site_server);

    let first = executor.fetch(&url).await.expect("First residential fetch");
    assert_eq!(first.metadata.transport_step, "residential_burst");
    assert_eq!(first.html.len(), 600 * 1024);
    assert_eq!(first.metadata.budget_reason, None);

    // Goes over the cap: content is kept, the reason is reported
    let second = executor.fetch(&url).await.expect("Second residential fetch");
    assert_eq!(second.html.len(), 600 * 1024);
    assert!(second.metadata.budget_reason.is_some());

    // Third is denied before any bytes move, and the domain has nothing left
    assert!(executor.fetch(&url).await.is_none());
    assert_eq!(executor.controller().current_step(&domain), None);
    assert!(!executor
        .controller()
        .can_use_residential(&domain, chrono::Utc::now()));

    let snapshot = executor.controller().snapshot(chrono::Utc::now());
    assert!(snapshot.residential_bursts[&domain].blocked);
}

#[tokio::test]
async fn test_residential_stripped_without_permission() {
    let site_server = blocked_site().await;

    let gateway = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>residential</html>"))
        .expect(0)
        .mount(&gateway)
        .await;

    let executor = executor(&format!(
        r#"
[residential]
endpoint = "{}"

{}
"#,
        gateway.uri(),
        site(&site_server, r#"["direct", "residential_burst"]"#, "")
    ));

    assert!(executor
        .fetch(&format!("{}/p/1", site_server.uri()))
        .await
        .is_none());
}

#[tokio::test]
async fn test_residential_burst_cooldown() {
    let site_server = blocked_site().await;

    let gateway = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>residential</html>"))
        .expect(2)
        .mount(&gateway)
        .await;

    let executor = executor(&format!(
        r#"
[residential]
endpoint = "{}"
max-consecutive-requests = 2
cooldown-after-burst-sec = 600

{}
"#,
        gateway.uri(),
        site(
            &site_server,
            r#"["direct", "residential_burst"]"#,
            "allow-residential = true"
        )
    ));
    let url = format!("{}/p/1", site_server.uri());

    assert!(executor.fetch(&url).await.is_some());
    assert!(executor.fetch(&url).await.is_some());

    let burst = executor
        .controller()
        .residential()
        .domain_snapshot(&domain_of(&site_server), chrono::Utc::now());
    assert!(burst.cooldown_until.is_some());

    // Cooling down: the residential step is refused and the flow escalates past it
    assert!(executor.fetch(&url).await.is_none());
}

#[tokio::test]
async fn test_residential_credential_file() {
    let site_server = blocked_site().await;

    let gateway = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>via pool</html>"))
        .expect(1)
        .mount(&gateway)
        .await;

    let mut credentials = NamedTempFile::new().unwrap();
    writeln!(credentials, "# rotating pool").unwrap();
    writeln!(credentials, "not-a-credential").unwrap();
    writeln!(
        credentials,
        "{}:{}:alice:s3cret",
        gateway.address().ip(),
        gateway.address().port()
    )
    .unwrap();

    let executor = executor(&format!(
        r#"
[residential]
source-file = "{}"

{}
"#,
        credentials.path().display(),
        site(
            &site_server,
            r#"["direct", "residential_burst"]"#,
            "allow-residential = true"
        )
    ));

    let output = executor
        .fetch(&format!("{}/p/9", site_server.uri()))
        .await
        .expect("Residential fetch through the credential file");

    assert_eq!(output.metadata.transport_step, "residential_burst");
    assert_eq!(
        output.metadata.proxy.as_deref(),
        Some(gateway.address().to_string().as_str())
    );
    assert_eq!(
        executor
            .controller()
            .current_step(&domain_of(&site_server)),
        Some(TransportStep::ResidentialBurst)
    );
}
