//! Integration tests for the transport executor
//!
//! These tests use wiremock servers as target sites, proxies and FlareSolverr,
//! and drive full fetches through the executor.

mod fetch_tests;
mod residential_tests;
mod support;
