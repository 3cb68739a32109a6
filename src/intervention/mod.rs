//! Intervention state machine.
//!
//! Turns detections into remediation payloads and escalates to a human
//! once automated interventions are exhausted.
//!
//! ```text
//! Idle ──intervene──> Intervening ──count reaches max──> Escalated
//!  ^                       │                                 │
//!  └──no detections────────┘                                 │
//!  └──────────────reset_intervention_count───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`guidance`] - Remediation templates per loop category

pub mod guidance;

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::action::ActionLog;
use crate::config::InterventionConfig;
use crate::detection::{should_intervene, DetectionSummary, LoopDetection, LoopType, PatternDetector, Severity};

/// Where the intervention cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionState {
    /// No loop is being acted on.
    #[default]
    Idle,
    /// At least one remediation has been issued.
    Intervening,
    /// Automated interventions are exhausted; only a reset leaves this state.
    Escalated,
}

impl fmt::Display for InterventionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Intervening => "intervening",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Kind of guidance a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionType {
    /// Remediation for a specific loop category.
    Loop(LoopType),
    /// Fallback for unknown categories.
    Generic,
    /// Request for human input.
    Escalation,
}

impl InterventionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loop(loop_type) => loop_type.as_str(),
            Self::Generic => "generic",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for InterventionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InterventionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Guidance handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionPayload {
    pub intervention_type: InterventionType,
    pub severity: Severity,
    pub guidance: String,
    pub suggested_tools: Vec<String>,
    pub blocked_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    pub requires_user_input: bool,
    pub detections: Vec<DetectionSummary>,
}

impl InterventionPayload {
    /// True for the terminal payload that demands human input.
    #[must_use]
    pub fn is_escalation(&self) -> bool {
        self.intervention_type == InterventionType::Escalation
    }
}

/// Snapshot of the intervention counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterventionStatus {
    pub intervention_count: u32,
    pub max_interventions: u32,
    pub interventions_remaining: u32,
    pub escalation_imminent: bool,
    pub state: InterventionState,
}

/// Decides when to intervene and tracks how often it has.
#[derive(Debug, Clone)]
pub struct InterventionSystem {
    config: InterventionConfig,
    count: u32,
    state: InterventionState,
}

impl Default for InterventionSystem {
    fn default() -> Self {
        Self::new(InterventionConfig::default())
    }
}

impl InterventionSystem {
    #[must_use]
    pub fn new(config: InterventionConfig) -> Self {
        Self {
            config,
            count: 0,
            state: InterventionState::Idle,
        }
    }

    /// Runs detection over `log` and returns guidance if it is warranted.
    pub fn check_and_intervene(
        &mut self,
        detector: &mut PatternDetector,
        log: &ActionLog,
    ) -> Option<InterventionPayload> {
        let detections = detector.detect_all_loops(log);
        self.evaluate(&detections)
    }

    /// Advances the state machine with one pass worth of detections.
    ///
    /// Once escalated, every call returns the escalation payload until
    /// [`reset_intervention_count`](Self::reset_intervention_count).
    pub fn evaluate(&mut self, detections: &[LoopDetection]) -> Option<InterventionPayload> {
        if self.state == InterventionState::Escalated {
            return Some(guidance::escalation(
                detections,
                self.count,
                self.config.max_interventions,
            ));
        }

        if detections.is_empty() {
            if self.count > 0 {
                info!("No loops detected, resetting intervention count");
            }
            self.count = 0;
            self.state = InterventionState::Idle;
            return None;
        }

        if !should_intervene(detections, &self.config) {
            info!(
                detections = detections.len(),
                "Loops detected below intervention threshold"
            );
            return None;
        }

        self.count += 1;
        warn!(
            count = self.count,
            max = self.config.max_interventions,
            loop_type = %detections[0].loop_type,
            severity = %detections[0].severity,
            "Intervening on detected loop"
        );

        if self.count >= self.config.max_interventions {
            warn!(count = self.count, "Interventions exhausted, escalating to user");
            self.state = InterventionState::Escalated;
            return Some(guidance::escalation(
                detections,
                self.count,
                self.config.max_interventions,
            ));
        }

        self.state = InterventionState::Intervening;
        Some(guidance::remediation(detections))
    }

    /// Clears the counter and leaves escalation.
    pub fn reset_intervention_count(&mut self) {
        if self.count > 0 || self.state != InterventionState::Idle {
            info!(previous = self.count, state = %self.state, "Resetting intervention count");
        }
        self.count = 0;
        self.state = InterventionState::Idle;
    }

    #[must_use]
    pub fn status(&self) -> InterventionStatus {
        let max = self.config.max_interventions;
        InterventionStatus {
            intervention_count: self.count,
            max_interventions: max,
            interventions_remaining: max.saturating_sub(self.count),
            escalation_imminent: self.count + 1 >= max,
            state: self.state,
        }
    }

    #[must_use]
    pub fn state(&self) -> InterventionState {
        self.state
    }

    #[must_use]
    pub fn intervention_count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn config(&self) -> &InterventionConfig {
        &self.config
    }
}
