//! Residential proxy tier
//!
//! # Components
//!
//! - `ResidentialBurstController`: per-domain burst counting, cooldowns and
//!   daily caps, plus a provider-wide cap shared by every domain
//! - `ResidentialPool`: resolves which residential egress a request uses

mod burst;
mod pool;

pub use burst::{
    BurstSettings, BurstSnapshot, ResidentialBurstController, ResidentialDomainState,
    MAX_COOLDOWN_SECS,
};
pub use pool::{parse_credential_line, parse_credential_lines, ResidentialEgress, ResidentialPool};
