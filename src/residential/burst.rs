//! Residential burst and cooldown gate

use crate::budget::{bytes_to_mb, mb_to_bytes, BudgetStatus, DailyBucket};
use crate::config::ResidentialConfig;
use crate::lock;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Longest cooldown a burst can impose, in seconds
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

/// Burst limits in runtime units
#[derive(Debug, Clone)]
pub struct BurstSettings {
    pub max_consecutive_requests: u32,
    pub cooldown_after_burst_secs: f64,
    pub daily_burst_allowance: u32,
    pub adaptive_cooldown: bool,
    pub cooldown_multiplier: f64,
    pub success_cooldown_reset: bool,
    pub provider_daily_bytes: u64,
    pub per_domain_daily_bytes: u64,
}

impl From<&ResidentialConfig> for BurstSettings {
    fn from(config: &ResidentialConfig) -> Self {
        Self {
            max_consecutive_requests: config.max_consecutive_requests,
            cooldown_after_burst_secs: config.cooldown_after_burst_sec as f64,
            daily_burst_allowance: config.daily_burst_allowance,
            adaptive_cooldown: config.adaptive_cooldown,
            cooldown_multiplier: config.cooldown_multiplier,
            success_cooldown_reset: config.success_cooldown_reset,
            provider_daily_bytes: mb_to_bytes(config.provider_daily_mb),
            per_domain_daily_bytes: mb_to_bytes(config.per_domain_daily_mb),
        }
    }
}

/// Residential usage and burst position for one domain
#[derive(Debug, Clone)]
pub struct ResidentialDomainState {
    pub requests_in_burst: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub current_cooldown_secs: f64,
    pub burst_count: u32,
    pub daily_usage: DailyBucket,
    pub blocked: bool,
    pub last_budget_status: Option<BudgetStatus>,
    day: NaiveDate,
}

impl ResidentialDomainState {
    fn new(domain: &str, limit_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            requests_in_burst: 0,
            cooldown_until: None,
            current_cooldown_secs: 0.0,
            burst_count: 0,
            daily_usage: DailyBucket::new(
                format!("{} residential burst", domain),
                0,
                limit_bytes,
                1.0,
                now,
            ),
            blocked: false,
            last_budget_status: None,
            day: now.date_naive(),
        }
    }

    /// Starts a fresh day: counters, budget verdicts and usage reset
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.requests_in_burst = 0;
            self.burst_count = 0;
            self.current_cooldown_secs = 0.0;
            self.blocked = false;
            self.last_budget_status = None;
        }
        self.daily_usage.roll(now);
    }

    fn budget_blocked(&self) -> bool {
        self.blocked
            || self
                .last_budget_status
                .as_ref()
                .map(|s| s.blocked)
                .unwrap_or(false)
    }
}

/// Reporting view of one domain's burst state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstSnapshot {
    pub requests_in_burst: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub blocked: bool,
    pub usage_mb: f64,
    pub limit_mb: f64,
}

/// Per-domain burst/cooldown gate for the residential tier
///
/// Each domain's state has its own mutex; the outer map lock is only held to
/// find or insert a state. Lock order is domain state, then provider bucket.
pub struct ResidentialBurstController {
    settings: BurstSettings,
    domain_limits: Mutex<HashMap<String, u64>>,
    states: Mutex<HashMap<String, Arc<Mutex<ResidentialDomainState>>>>,
    provider: Mutex<DailyBucket>,
}

impl ResidentialBurstController {
    pub fn new(config: &ResidentialConfig, now: DateTime<Utc>) -> Self {
        Self::with_settings(BurstSettings::from(config), now)
    }

    pub fn with_settings(settings: BurstSettings, now: DateTime<Utc>) -> Self {
        let provider = DailyBucket::new(
            "residential_provider",
            0,
            settings.provider_daily_bytes,
            1.0,
            now,
        );

        Self {
            settings,
            domain_limits: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            provider: Mutex::new(provider),
        }
    }

    pub fn settings(&self) -> &BurstSettings {
        &self.settings
    }

    /// Sets the daily residential cap for `domain`, overriding the default
    pub fn set_domain_limit(&self, domain: &str, limit_bytes: u64) {
        lock(&self.domain_limits).insert(domain.to_string(), limit_bytes);

        let existing = lock(&self.states).get(domain).cloned();
        if let Some(state) = existing {
            lock(&state).daily_usage.set_limits(0, limit_bytes);
        }
    }

    fn state(&self, domain: &str, now: DateTime<Utc>) -> Arc<Mutex<ResidentialDomainState>> {
        if let Some(state) = lock(&self.states).get(domain) {
            return state.clone();
        }

        let limit = lock(&self.domain_limits)
            .get(domain)
            .copied()
            .unwrap_or(self.settings.per_domain_daily_bytes);

        lock(&self.states)
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ResidentialDomainState::new(domain, limit, now))))
            .clone()
    }

    /// Returns true if a residential request for `domain` may start now
    pub fn can_start_request(&self, domain: &str, now: DateTime<Utc>) -> bool {
        let state = self.state(domain, now);
        let mut state = lock(&state);
        state.roll(now);

        if state.budget_blocked() {
            tracing::debug!(domain, "Residential blocked by budget");
            return false;
        }

        if let Some(until) = state.cooldown_until {
            if now < until {
                tracing::debug!(domain, cooldown_until = %until, "Residential cooling down");
                return false;
            }
        }

        if lock(&self.provider).hard_limit_reached(now) {
            tracing::debug!(domain, "Residential provider daily cap reached");
            return false;
        }

        if state.daily_usage.hard_limit_reached(now) {
            tracing::debug!(domain, "Residential domain daily cap reached");
            return false;
        }

        state.requests_in_burst < self.settings.daily_burst_allowance
    }

    /// Records one residential request and its byte usage
    ///
    /// Bytes are added to the domain and provider buckets without producing a
    /// verdict; throttling is reported by the budget manager instead. Reaching
    /// `max_consecutive_requests` starts a cooldown.
    pub fn record_request(&self, domain: &str, bytes_used: u64, now: DateTime<Utc>) {
        let state = self.state(domain, now);
        let mut state = lock(&state);
        state.roll(now);

        state.requests_in_burst += 1;
        state.daily_usage.add(bytes_used, now);
        lock(&self.provider).add(bytes_used, now);

        if state.requests_in_burst >= self.settings.max_consecutive_requests {
            state.burst_count += 1;

            let base = self.settings.cooldown_after_burst_secs;
            state.current_cooldown_secs = if self.settings.adaptive_cooldown && state.burst_count > 1
            {
                base.max(state.current_cooldown_secs * self.settings.cooldown_multiplier)
            } else {
                base
            };

            state.current_cooldown_secs =
                state.current_cooldown_secs.min(MAX_COOLDOWN_SECS as f64);
            let until = now
                .checked_add_signed(Duration::milliseconds(
                    (state.current_cooldown_secs * 1000.0) as i64,
                ))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.cooldown_until = Some(until);

            tracing::info!(
                domain,
                burst_count = state.burst_count,
                cooldown_secs = state.current_cooldown_secs,
                "Residential burst complete, cooling down"
            );
        }
    }

    /// Clears burst counters after a success when configured to
    pub fn record_success(&self, domain: &str) {
        if !self.settings.success_cooldown_reset {
            return;
        }

        let existing = lock(&self.states).get(domain).cloned();
        if let Some(state) = existing {
            let mut state = lock(&state);
            state.requests_in_burst = 0;
            state.burst_count = 0;
            state.current_cooldown_secs = 0.0;
            state.cooldown_until = None;
        }
    }

    /// Stores the latest budget verdict for `domain`
    ///
    /// A blocked verdict keeps the domain off the residential tier until the
    /// next UTC day or an explicit [`lift_budget_block`](Self::lift_budget_block).
    pub fn update_budget_status(&self, domain: &str, status: BudgetStatus, now: DateTime<Utc>) {
        let state = self.state(domain, now);
        let mut state = lock(&state);
        state.roll(now);

        if status.blocked && !state.blocked {
            tracing::warn!(
                domain,
                reason = status.reason.as_deref().unwrap_or(""),
                "Residential budget block engaged"
            );
        }
        state.blocked = state.blocked || status.blocked;
        state.last_budget_status = Some(status);
    }

    /// Clears a budget block for `domain`
    pub fn lift_budget_block(&self, domain: &str) {
        let existing = lock(&self.states).get(domain).cloned();
        if let Some(state) = existing {
            let mut state = lock(&state);
            state.blocked = false;
            state.last_budget_status = None;
            tracing::info!(domain, "Residential budget block lifted");
        }
    }

    pub fn domain_snapshot(&self, domain: &str, now: DateTime<Utc>) -> BurstSnapshot {
        let state = self.state(domain, now);
        let mut state = lock(&state);
        state.roll(now);
        snapshot_of(&state)
    }

    /// Snapshots every domain that has touched the residential tier
    pub fn snapshot_all(&self, now: DateTime<Utc>) -> BTreeMap<String, BurstSnapshot> {
        let states: Vec<_> = lock(&self.states)
            .iter()
            .map(|(domain, state)| (domain.clone(), state.clone()))
            .collect();

        states
            .into_iter()
            .map(|(domain, state)| {
                let mut state = lock(&state);
                state.roll(now);
                (domain, snapshot_of(&state))
            })
            .collect()
    }
}

fn snapshot_of(state: &ResidentialDomainState) -> BurstSnapshot {
    BurstSnapshot {
        requests_in_burst: state.requests_in_burst,
        cooldown_until: state.cooldown_until,
        blocked: state.budget_blocked(),
        usage_mb: bytes_to_mb(state.daily_usage.usage_bytes()),
        limit_mb: bytes_to_mb(state.daily_usage.hard_limit_bytes()),
    }
}
