//! Loop detection over the action log.
//!
//! The [`PatternDetector`] runs seven independent detectors over the
//! trailing actions, drops detections the current phase explains, and
//! returns the rest ordered critical first. When the progress gate reports
//! a changed error signature, detection short-circuits to nothing.
//!
//! # Modules
//!
//! - [`detectors`] - The individual loop detectors
//! - [`imports`] - Textual import graph for circular dependency detection
//! - [`filter`] - Phase-aware false positive suppression

pub mod detectors;
pub mod filter;
pub mod imports;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{Action, ActionLog};
use crate::config::{DetectionThresholds, GuardConfig, InterventionConfig};
use crate::signature::{ErrorSignature, ProgressGate};

/// Category of unproductive repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    /// One action signature repeated.
    ActionLoop,
    /// One file edited over and over at the same spot.
    ModificationLoop,
    /// The same target analyzed again and again.
    ConversationLoop,
    /// Files read during the run import each other.
    CircularDependency,
    /// The (phase, file, tool) sequence cycles.
    StateCycle,
    /// A multi-step action pattern repeats.
    PatternRepetition,
    /// A phase keeps running without changing anything.
    NoProgressLoop,
}

impl LoopType {
    /// Every loop type, in detector order.
    pub const ALL: [LoopType; 7] = [
        Self::ActionLoop,
        Self::ModificationLoop,
        Self::ConversationLoop,
        Self::CircularDependency,
        Self::StateCycle,
        Self::PatternRepetition,
        Self::NoProgressLoop,
    ];

    /// The snake_case tag used in payloads and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionLoop => "action_loop",
            Self::ModificationLoop => "modification_loop",
            Self::ConversationLoop => "conversation_loop",
            Self::CircularDependency => "circular_dependency",
            Self::StateCycle => "state_cycle",
            Self::PatternRepetition => "pattern_repetition",
            Self::NoProgressLoop => "no_progress_loop",
        }
    }
}

impl fmt::Display for LoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                format!(
                    "Unknown loop type '{}'. Valid options: {}",
                    s,
                    Self::ALL.map(|t| t.as_str()).join(", ")
                )
            })
    }
}

/// Detection severity.
///
/// Variants are declared most severe first, so the derived ordering sorts
/// critical before high before medium before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort rank: critical 0, high 1, medium 2, low 3.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!(
                "Unknown severity '{}'. Valid options: critical, high, medium, low",
                s
            )),
        }
    }
}

/// One detected loop and the actions that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDetection {
    pub loop_type: LoopType,
    pub severity: Severity,
    pub description: String,
    pub evidence: Vec<String>,
    pub suggestion: String,
    pub actions_involved: Vec<Action>,
}

impl LoopDetection {
    /// The detection without its actions, as carried in payloads.
    #[must_use]
    pub fn summary(&self) -> DetectionSummary {
        DetectionSummary {
            loop_type: self.loop_type,
            severity: self.severity,
            description: self.description.clone(),
            evidence: self.evidence.clone(),
            suggestion: self.suggestion.clone(),
            action_count: self.actions_involved.len(),
        }
    }

    /// The file the involved actions operate on, if any.
    #[must_use]
    pub fn target_file(&self) -> Option<&str> {
        self.actions_involved
            .iter()
            .find_map(|a| a.file_path.as_deref())
    }
}

/// Audit form of a [`LoopDetection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub loop_type: LoopType,
    pub severity: Severity,
    pub description: String,
    pub evidence: Vec<String>,
    pub suggestion: String,
    pub action_count: usize,
}

/// Decides whether detections warrant an intervention.
///
/// True when critical detections reach `critical_to_intervene` or high
/// detections reach `high_to_intervene`.
#[must_use]
pub fn should_intervene(detections: &[LoopDetection], config: &InterventionConfig) -> bool {
    let critical = detections
        .iter()
        .filter(|d| d.severity == Severity::Critical)
        .count();
    let high = detections
        .iter()
        .filter(|d| d.severity == Severity::High)
        .count();
    critical >= config.critical_to_intervene || high >= config.high_to_intervene
}

/// Renders detections as the alert block embedded in guidance.
#[must_use]
pub fn loop_summary(detections: &[LoopDetection]) -> String {
    if detections.is_empty() {
        return "No loops detected. System is making progress.".to_string();
    }

    let mut lines = vec![
        "LOOP DETECTION ALERT".to_string(),
        format!("Detected {} potential loop(s):", detections.len()),
    ];
    for (i, detection) in detections.iter().enumerate() {
        lines.push(String::new());
        lines.push(format!(
            "{}. {} [{}]",
            i + 1,
            detection.loop_type.as_str().to_uppercase(),
            detection.severity.as_str().to_uppercase()
        ));
        lines.push(format!("   {}", detection.description));
        lines.push("   Evidence:".to_string());
        for evidence in &detection.evidence {
            lines.push(format!("     - {}", evidence));
        }
        lines.push(format!("   Suggestion: {}", detection.suggestion));
    }
    lines.join("\n")
}

/// Runs the loop detectors and keeps a bounded record of past detections.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    thresholds: DetectionThresholds,
    intervention: InterventionConfig,
    gate: ProgressGate,
    history: VecDeque<LoopDetection>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

impl PatternDetector {
    #[must_use]
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            thresholds: config.detection.clone(),
            intervention: config.intervention.clone(),
            gate: ProgressGate::new(),
            history: VecDeque::new(),
        }
    }

    /// Detection thresholds in use.
    #[must_use]
    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Forwards the current error to the progress gate.
    pub fn set_current_error(&mut self, signature: Option<ErrorSignature>) {
        self.gate.set_current_error(signature);
    }

    /// Clears the gate's change flag for a cycle whose error could not be
    /// fingerprinted.
    pub fn skip_progress_check(&mut self) {
        self.gate.skip_cycle();
    }

    /// True if the error signature changed this cycle.
    #[must_use]
    pub fn is_making_progress(&self) -> bool {
        self.gate.is_making_progress()
    }

    #[must_use]
    pub fn gate(&self) -> &ProgressGate {
        &self.gate
    }

    /// Runs every detector and returns the surviving detections, critical
    /// first.
    ///
    /// Returns nothing while the progress gate reports progress.
    pub fn detect_all_loops(&mut self, log: &ActionLog) -> Vec<LoopDetection> {
        if self.gate.is_making_progress() {
            debug!("Progress detected, skipping loop detection");
            return Vec::new();
        }

        let t = &self.thresholds;
        let mut detections = Vec::new();
        detections.extend(detectors::action_loops(log, t));
        detections.extend(detectors::modification_loops(log, t));
        detections.extend(detectors::conversation_loops(log, t));
        detections.extend(detectors::circular_dependencies(log, t));
        detections.extend(detectors::state_cycles(log, t));
        detections.extend(detectors::pattern_repetition(log, t));
        detections.extend(detectors::no_progress_loops(log, t));

        let raw = detections.len();
        let mut detections = filter::filter_phase_aware(detections, log, t);
        detections.sort_by_key(|d| d.severity.rank());

        debug!(
            raw,
            kept = detections.len(),
            actions = log.len(),
            "Loop detection pass complete"
        );

        self.remember(&detections);
        detections
    }

    fn remember(&mut self, detections: &[LoopDetection]) {
        let cap = self.thresholds.detection_history;
        for detection in detections {
            self.history.push_back(detection.clone());
        }
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    /// Detections from recent passes, oldest first.
    #[must_use]
    pub fn detection_history(&self) -> &VecDeque<LoopDetection> {
        &self.history
    }

    /// How often each loop type appears in the detection history.
    #[must_use]
    pub fn pattern_frequency(&self) -> BTreeMap<LoopType, usize> {
        let mut frequency = BTreeMap::new();
        for detection in &self.history {
            *frequency.entry(detection.loop_type).or_insert(0) += 1;
        }
        frequency
    }

    /// Decides whether detections warrant an intervention.
    #[must_use]
    pub fn should_intervene(&self, detections: &[LoopDetection]) -> bool {
        should_intervene(detections, &self.intervention)
    }

    /// Renders detections as a human-readable alert block.
    #[must_use]
    pub fn loop_summary(&self, detections: &[LoopDetection]) -> String {
        loop_summary(detections)
    }
}
