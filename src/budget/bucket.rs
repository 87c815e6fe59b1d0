use crate::budget::{bytes_to_mb, BudgetStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Byte counter with soft/hard daily limits
///
/// The window is the UTC calendar day. Rollover happens lazily: the first
/// call that observes a new date resets `usage_bytes` to zero. A limit of 0
/// disables that limit.
#[derive(Debug, Clone)]
pub struct DailyBucket {
    name: String,
    soft_limit_bytes: u64,
    hard_limit_bytes: u64,
    throttle_ratio: f64,
    window_start: NaiveDate,
    usage_bytes: u64,
}

/// Reporting view of a bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub usage_mb: f64,
    pub soft_mb: f64,
    pub hard_mb: f64,
    pub window_start: NaiveDate,
}

impl DailyBucket {
    pub fn new(
        name: impl Into<String>,
        soft_limit_bytes: u64,
        hard_limit_bytes: u64,
        throttle_ratio: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            soft_limit_bytes,
            hard_limit_bytes,
            throttle_ratio,
            window_start: now.date_naive(),
            usage_bytes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage_bytes(&self) -> u64 {
        self.usage_bytes
    }

    pub fn hard_limit_bytes(&self) -> u64 {
        self.hard_limit_bytes
    }

    pub fn window_start(&self) -> NaiveDate {
        self.window_start
    }

    /// Replaces both limits, keeping today's usage
    pub fn set_limits(&mut self, soft_limit_bytes: u64, hard_limit_bytes: u64) {
        self.soft_limit_bytes = soft_limit_bytes;
        self.hard_limit_bytes = hard_limit_bytes;
    }

    /// Resets usage if `now` falls on a later UTC day than the window
    ///
    /// Returns true if the window rolled.
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today != self.window_start {
            self.window_start = today;
            self.usage_bytes = 0;
            true
        } else {
            false
        }
    }

    /// Charges `bytes_used` against the bucket and returns the verdict
    ///
    /// Once the hard limit has been reached, further calls are blocked and add
    /// nothing. The call that crosses the hard limit is still charged, so usage
    /// can overshoot by at most one request.
    pub fn consume(&mut self, bytes_used: u64, now: DateTime<Utc>) -> BudgetStatus {
        self.roll(now);

        if self.hard_limit_bytes > 0 && self.usage_bytes >= self.hard_limit_bytes {
            return BudgetStatus::blocked(self.hard_reason());
        }

        self.usage_bytes = self.usage_bytes.saturating_add(bytes_used);

        let usage_ratio = if self.soft_limit_bytes > 0 {
            self.usage_bytes as f64 / self.soft_limit_bytes as f64
        } else {
            0.0
        };

        if self.hard_limit_bytes > 0 && self.usage_bytes > self.hard_limit_bytes {
            return BudgetStatus::blocked(self.hard_reason());
        }

        if self.soft_limit_bytes > 0 && usage_ratio >= self.throttle_ratio {
            return BudgetStatus::throttled(
                format!(
                    "{} soft limit at {:.0}% ({:.2}/{:.2} MB)",
                    self.name,
                    usage_ratio * 100.0,
                    bytes_to_mb(self.usage_bytes),
                    bytes_to_mb(self.soft_limit_bytes)
                ),
                usage_ratio,
            );
        }

        BudgetStatus::allowed(usage_ratio)
    }

    /// Adds usage without producing a verdict
    pub fn add(&mut self, bytes_used: u64, now: DateTime<Utc>) {
        self.roll(now);
        self.usage_bytes = self.usage_bytes.saturating_add(bytes_used);
    }

    /// Returns true if today's usage has reached a non-zero hard limit
    pub fn hard_limit_reached(&mut self, now: DateTime<Utc>) -> bool {
        self.roll(now);
        self.hard_limit_bytes > 0 && self.usage_bytes >= self.hard_limit_bytes
    }

    pub fn snapshot(&mut self, now: DateTime<Utc>) -> BucketSnapshot {
        self.roll(now);
        BucketSnapshot {
            usage_mb: bytes_to_mb(self.usage_bytes),
            soft_mb: bytes_to_mb(self.soft_limit_bytes),
            hard_mb: bytes_to_mb(self.hard_limit_bytes),
            window_start: self.window_start,
        }
    }

    fn hard_reason(&self) -> String {
        format!(
            "{} hard limit reached ({:.2} MB)",
            self.name,
            bytes_to_mb(self.hard_limit_bytes)
        )
    }
}
