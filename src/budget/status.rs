use serde::Serialize;

/// Verdict of a budget check
///
/// Produced fresh by every consume call. Verdicts from several buckets are
/// combined with [`BudgetStatus::merge`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub allowed: bool,
    pub should_throttle: bool,
    pub blocked: bool,
    pub reason: Option<String>,
    pub usage_ratio: f64,
}

impl BudgetStatus {
    /// An unconditional allow, also the identity for merging
    pub fn allowed(usage_ratio: f64) -> Self {
        Self {
            allowed: true,
            should_throttle: false,
            blocked: false,
            reason: None,
            usage_ratio,
        }
    }

    /// Allowed, but the caller should slow down
    pub fn throttled(reason: impl Into<String>, usage_ratio: f64) -> Self {
        Self {
            allowed: true,
            should_throttle: true,
            blocked: false,
            reason: Some(reason.into()),
            usage_ratio,
        }
    }

    /// Hard limit reached
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            should_throttle: false,
            blocked: true,
            reason: Some(reason.into()),
            usage_ratio: 1.0,
        }
    }

    /// Combines two verdicts
    ///
    /// AND of `allowed`, OR of `blocked` and `should_throttle`, MAX of the
    /// usage ratio, reasons joined with `"; "`.
    pub fn merge(self, other: BudgetStatus) -> BudgetStatus {
        let reason = match (self.reason, other.reason) {
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };

        BudgetStatus {
            allowed: self.allowed && other.allowed,
            should_throttle: self.should_throttle || other.should_throttle,
            blocked: self.blocked || other.blocked,
            reason,
            usage_ratio: self.usage_ratio.max(other.usage_ratio),
        }
    }

    /// Merges any number of verdicts, starting from a plain allow
    pub fn merge_all(statuses: impl IntoIterator<Item = BudgetStatus>) -> BudgetStatus {
        statuses
            .into_iter()
            .fold(BudgetStatus::allowed(0.0), BudgetStatus::merge)
    }
}

impl Default for BudgetStatus {
    fn default() -> Self {
        Self::allowed(0.0)
    }
}
