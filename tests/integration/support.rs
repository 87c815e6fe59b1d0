use std::sync::Arc;
use tierfetch::config::{parse_config, Config};
use tierfetch::{ProxyFlowController, TransportStepExecutor};
use wiremock::MockServer;

/// Parses a config with test-friendly timeouts plus `extra` TOML
pub fn config(extra: &str) -> Config {
    parse_config(&format!(
        r#"
[budget]
global-soft-mb-per-day = 0
global-hard-mb-per-day = 0

[transport]
connect-timeout-secs = 2
request-timeout-secs = 5
max-concurrent-fetches = 4

{}
"#,
        extra
    ))
    .expect("Failed to parse test config")
}

/// Builds an executor with only config-provided collaborators
pub fn executor(extra: &str) -> TransportStepExecutor {
    TransportStepExecutor::from_config(config(extra)).expect("Failed to build executor")
}

/// Builds an executor without any collaborators
pub fn bare_executor(config: Config) -> TransportStepExecutor {
    let config = Arc::new(config);
    let controller = Arc::new(ProxyFlowController::new(config.clone(), chrono::Utc::now()));
    TransportStepExecutor::new(config, controller).expect("Failed to build executor")
}

/// Domain key of a mock server (its host, without port)
pub fn domain_of(server: &MockServer) -> String {
    url::Url::parse(&server.uri())
        .expect("Failed to parse mock server URI")
        .host_str()
        .expect("Mock server URI has no host")
        .to_string()
}

/// A site block for the mock server's domain
pub fn site(server: &MockServer, sequence: &str, extra: &str) -> String {
    format!(
        r#"
[[site]]
domain = "{}"
{}

[site.fetch-policy]
sequence = {}
"#,
        domain_of(server),
        extra,
        sequence
    )
}
