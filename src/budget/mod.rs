//! Daily traffic budgets
//!
//! Byte usage is tracked in [`DailyBucket`]s that roll over at UTC midnight.
//! The [`TrafficBudgetManager`] combines a global bucket, a global residential
//! bucket and per-site buckets into a single [`BudgetStatus`] per request.

mod bucket;
mod manager;
mod status;

pub use bucket::{BucketSnapshot, DailyBucket};
pub use manager::{BudgetSnapshot, TrafficBudgetManager};
pub use status::BudgetStatus;

/// Bytes in one configured megabyte
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Converts a configured MB figure to bytes
pub fn mb_to_bytes(mb: f64) -> u64 {
    if mb <= 0.0 {
        return 0;
    }
    (mb * BYTES_PER_MB as f64).round() as u64
}

/// Converts a byte count to MB for reporting
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}
