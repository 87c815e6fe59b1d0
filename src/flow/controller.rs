use crate::budget::{BudgetSnapshot, BudgetStatus, TrafficBudgetManager};
use crate::config::Config;
use crate::flow::{Outcome, ProxyFlowState, TransportStep};
use crate::lock;
use crate::residential::ResidentialBurstController;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Owns per-domain flow states together with the budget and residential gates
///
/// A domain's flow state is created on first use and kept for the life of the
/// controller, so escalation position carries over between fetches.
pub struct ProxyFlowController {
    config: Arc<Config>,
    flows: Mutex<HashMap<String, Arc<Mutex<ProxyFlowState>>>>,
    budget: Arc<TrafficBudgetManager>,
    residential: Arc<ResidentialBurstController>,
}

impl ProxyFlowController {
    /// Builds the controller and wires the residential controller into the
    /// budget manager
    pub fn new(config: Arc<Config>, now: DateTime<Utc>) -> Self {
        let residential = Arc::new(ResidentialBurstController::new(&config.residential, now));
        let budget = Arc::new(TrafficBudgetManager::new(
            &config.budget,
            &config.sites,
            Some(residential.clone()),
            now,
        ));

        Self {
            config,
            flows: Mutex::new(HashMap::new()),
            budget,
            residential,
        }
    }

    pub fn budget(&self) -> &TrafficBudgetManager {
        &self.budget
    }

    pub fn residential(&self) -> &ResidentialBurstController {
        &self.residential
    }

    /// Returns the cached flow state for `domain`, creating it on first use
    pub fn start_flow(&self, domain: &str) -> Arc<Mutex<ProxyFlowState>> {
        if let Some(flow) = lock(&self.flows).get(domain) {
            return flow.clone();
        }

        let state = self.build_state(domain);
        lock(&self.flows)
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .clone()
    }

    /// Rebuilds `domain`'s flow from its policy, discarding escalation history
    pub fn reset_flow(&self, domain: &str) {
        let state = self.build_state(domain);
        let existing = lock(&self.flows).get(domain).cloned();
        match existing {
            Some(flow) => *lock(&flow) = state,
            None => {
                lock(&self.flows).insert(domain.to_string(), Arc::new(Mutex::new(state)));
            }
        }
        tracing::info!(domain, "Flow state reset");
    }

    fn build_state(&self, domain: &str) -> ProxyFlowState {
        let site = self.config.site(domain);

        let sequence = site
            .map(|s| s.fetch_policy.sequence.clone())
            .filter(|seq| !seq.is_empty())
            .unwrap_or_else(|| self.config.transport.default_sequence.clone());

        let mut state =
            ProxyFlowState::new(sequence, self.config.transport.unknown_outcome_policy);

        if !site.map(|s| s.allow_residential).unwrap_or(false) {
            state.strip_step(TransportStep::ResidentialBurst);
        }

        tracing::debug!(
            domain,
            step = state.current_label(),
            "Flow state created"
        );
        state
    }

    pub fn current_step(&self, domain: &str) -> Option<TransportStep> {
        let flow = self.start_flow(domain);
        let step = lock(&flow).current_step();
        step
    }

    /// Feeds an outcome observed on `attempted` into `domain`'s flow
    ///
    /// If another fetch has already moved the flow off `attempted`, the outcome
    /// is only counted. Returns true if the flow escalated.
    pub fn record_outcome(&self, domain: &str, attempted: TransportStep, outcome: Outcome) -> bool {
        let flow = self.start_flow(domain);
        let mut state = lock(&flow);

        if state.current_step() != Some(attempted) {
            state.tally_for(attempted.as_str(), outcome);
            return false;
        }

        let escalated = state.record_outcome(outcome);
        if escalated {
            tracing::info!(
                domain,
                from = %attempted,
                to = state.current_label(),
                outcome = %outcome,
                "Escalating transport step"
            );
        }
        escalated
    }

    /// Counts an outcome without moving `domain`'s flow
    pub fn tally(&self, domain: &str, outcome: Outcome) {
        let flow = self.start_flow(domain);
        lock(&flow).tally(outcome);
    }

    pub fn can_use_residential(&self, domain: &str, now: DateTime<Utc>) -> bool {
        self.residential.can_start_request(domain, now)
    }

    /// Charges a completed residential request to the budgets
    ///
    /// Usage is recorded in the burst controller only when the merged verdict
    /// allows it. The verdict is returned either way so the caller can react to
    /// a block after the fact.
    pub fn record_residential_request(
        &self,
        domain: &str,
        bytes_used: u64,
        now: DateTime<Utc>,
    ) -> BudgetStatus {
        let status = self
            .budget
            .consume(domain, bytes_used, TransportStep::ResidentialBurst, now);

        if status.allowed {
            self.residential.record_request(domain, bytes_used, now);
        }

        status
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        self.budget.snapshot(now)
    }
}
