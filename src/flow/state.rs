//! Per-domain escalation state machine

use crate::config::UnknownOutcomePolicy;
use crate::flow::step::{Escalation, Outcome, TransportStep, UNAVAILABLE};
use std::collections::{HashMap, VecDeque};

/// Ordered transport steps for one domain, advanced by failure outcomes
///
/// `current_step` is `None` once every step has been exhausted (the
/// `"unavailable"` position). A success outcome clears `remaining_steps` but
/// leaves `current_step` in place, so later fetches reuse the step that worked.
#[derive(Debug, Clone)]
pub struct ProxyFlowState {
    initial_sequence: Vec<TransportStep>,
    remaining_steps: VecDeque<TransportStep>,
    current_step: Option<TransportStep>,
    failure_counters: HashMap<String, u32>,
    unknown_outcome_policy: UnknownOutcomePolicy,
}

impl ProxyFlowState {
    /// Creates a flow positioned on the first step of `sequence`
    pub fn new(sequence: Vec<TransportStep>, unknown_outcome_policy: UnknownOutcomePolicy) -> Self {
        let mut remaining_steps: VecDeque<TransportStep> = sequence.iter().copied().collect();
        let current_step = remaining_steps.pop_front();

        Self {
            initial_sequence: sequence,
            remaining_steps,
            current_step,
            failure_counters: HashMap::new(),
            unknown_outcome_policy,
        }
    }

    pub fn current_step(&self) -> Option<TransportStep> {
        self.current_step
    }

    /// Label of the current position, `"unavailable"` when exhausted
    pub fn current_label(&self) -> &'static str {
        self.current_step
            .map(|s| s.as_str())
            .unwrap_or(UNAVAILABLE)
    }

    pub fn remaining_steps(&self) -> impl Iterator<Item = &TransportStep> {
        self.remaining_steps.iter()
    }

    pub fn initial_sequence(&self) -> &[TransportStep] {
        &self.initial_sequence
    }

    pub fn is_unavailable(&self) -> bool {
        self.current_step.is_none()
    }

    /// Number of times `outcome` was recorded while on `step_label`
    pub fn failure_count(&self, step_label: &str, outcome: Outcome) -> u32 {
        self.failure_counters
            .get(&counter_key(step_label, outcome))
            .copied()
            .unwrap_or(0)
    }

    pub fn failure_counters(&self) -> &HashMap<String, u32> {
        &self.failure_counters
    }

    /// Feeds an outcome for the current step into the state machine
    ///
    /// Returns true if the flow escalated to another step (or to unavailable).
    pub fn record_outcome(&mut self, outcome: Outcome) -> bool {
        if self.current_step.is_none() {
            self.tally(outcome);
            return false;
        }

        match outcome.escalation() {
            Escalation::Settle => {
                self.remaining_steps.clear();
                false
            }
            Escalation::AfterOccurrences(n) => {
                if self.tally(outcome) >= n {
                    self.escalate();
                    true
                } else {
                    false
                }
            }
            Escalation::Immediate => {
                self.tally(outcome);
                self.escalate();
                true
            }
            Escalation::Unclassified => {
                self.tally(outcome);
                match self.unknown_outcome_policy {
                    UnknownOutcomePolicy::Hold => false,
                    UnknownOutcomePolicy::Escalate => {
                        self.escalate();
                        true
                    }
                }
            }
        }
    }

    /// Counts an outcome against the current step without moving the flow
    pub fn tally(&mut self, outcome: Outcome) -> u32 {
        self.tally_for(self.current_label(), outcome)
    }

    /// Counts an outcome against `step_label`, which need not be current
    pub fn tally_for(&mut self, step_label: &str, outcome: Outcome) -> u32 {
        let counter = self
            .failure_counters
            .entry(counter_key(step_label, outcome))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    /// Removes `step` from the flow, advancing past it if it is current
    pub fn strip_step(&mut self, step: TransportStep) {
        self.remaining_steps.retain(|s| *s != step);
        if self.current_step == Some(step) {
            self.escalate();
        }
    }

    fn escalate(&mut self) {
        self.current_step = self.remaining_steps.pop_front();
    }
}

fn counter_key(step_label: &str, outcome: Outcome) -> String {
    format!("{}:{}", step_label, outcome)
}
