//! Transport layer
//!
//! This module executes the transport steps that make up a domain's fetch
//! sequence, along with the collaborators the proxied steps rely on, the
//! bandwidth guard for response bodies and manual redirect resolution.

mod collaborators;
mod executor;
mod redirect;
mod stream_guard;

pub use collaborators::{
    CaptchaSolution, CaptchaSolver, FlareSolverrClient, ProxyRotator, RetriedResponse,
    RetryingRequester, StaticProxyPool,
};
pub use executor::{
    build_http_client, redact_proxy, FetchMetadata, FetchOutput, TransportStepExecutor,
};
pub use redirect::{resolve_redirects, RedirectResolution};
pub use stream_guard::{contains_marker, GuardedBody, StopReason, StreamGuard};
