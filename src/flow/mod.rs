//! Transport escalation
//!
//! Each domain owns a [`ProxyFlowState`]: an ordered list of transport steps
//! that advances when a step fails. The [`ProxyFlowController`] caches one
//! state per domain and owns the budget manager and residential controller.

mod controller;
mod state;
mod step;

pub use controller::ProxyFlowController;
pub use state::ProxyFlowState;
pub use step::{Escalation, Outcome, TransportStep, UNAVAILABLE};
