//! The orchestrator-facing facade.
//!
//! [`LoopGuard`] owns one agent stream's action log, detector, progress
//! tracker and intervention state. The orchestrator records every tool call,
//! reports the latest error once per cycle, and asks whether to intervene.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionLog, ToolCall};
use crate::config::GuardConfig;
use crate::detection::{LoopDetection, PatternDetector};
use crate::intervention::{InterventionPayload, InterventionStatus, InterventionSystem};
use crate::signature::{ErrorSignature, ProgressTracker};

/// Tool names that mark a call the orchestrator could not identify.
const UNIDENTIFIED_TOOLS: &[&str] = &["", "unknown", "unspecified_tool"];

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub detections: Vec<LoopDetection>,
    pub intervention: Option<InterventionPayload>,
}

/// Loop detection and intervention for a single agent stream.
#[derive(Debug)]
pub struct LoopGuard {
    config: GuardConfig,
    log: ActionLog,
    detector: PatternDetector,
    tracker: ProgressTracker,
    interventions: InterventionSystem,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl LoopGuard {
    /// Creates a guard with an in-memory log.
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self::with_log(config, ActionLog::new())
    }

    /// Creates a guard for `project_dir`, replaying and appending to the
    /// configured history file when history is enabled.
    #[must_use]
    pub fn open(project_dir: &Path, config: GuardConfig) -> Self {
        let log = if config.history.enabled {
            ActionLog::with_history(config.history_path(project_dir))
        } else {
            ActionLog::new()
        };
        Self::with_log(config, log)
    }

    /// Creates a guard over an existing log.
    #[must_use]
    pub fn with_log(config: GuardConfig, log: ActionLog) -> Self {
        let detector = PatternDetector::new(&config);
        let interventions = InterventionSystem::new(config.intervention.clone());
        Self {
            config,
            log,
            detector,
            tracker: ProgressTracker::new(),
            interventions,
        }
    }

    /// Records one tool invocation.
    pub fn record_action(&mut self, call: ToolCall) -> &Action {
        self.log.record(call)
    }

    /// Records a round of tool calls paired with their results.
    ///
    /// Each call is a JSON object with `tool` (or `name`) and `args`. Calls
    /// whose tool cannot be identified are skipped. Returns how many were
    /// recorded.
    pub fn record_tool_calls(&mut self, phase: &str, agent: &str, calls: &[(Value, Value)]) -> usize {
        let mut recorded = 0;
        for (call, result) in calls {
            let tool = call
                .get("tool")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .or_else(|| call.get("name").and_then(Value::as_str))
                .unwrap_or("");
            if UNIDENTIFIED_TOOLS.contains(&tool) {
                debug!(call = %call, "Skipping tool call without a tool name");
                continue;
            }

            let args = call.get("args").cloned().unwrap_or(Value::Null);
            let file_path = args
                .get("file_path")
                .or_else(|| args.get("filepath"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let success = result.get("success").and_then(Value::as_bool).unwrap_or(false);

            let mut tool_call = ToolCall::new(phase, agent, tool)
                .with_args(args)
                .with_result(result.clone())
                .with_success(success);
            if let Some(path) = file_path {
                tool_call = tool_call.with_file(path);
            }
            self.log.record(tool_call);
            recorded += 1;
        }
        recorded
    }

    /// Reports this cycle's error, or `None` if the cycle succeeded.
    ///
    /// A changed signature counts as progress and resets the intervention
    /// count.
    pub fn set_current_error(&mut self, signature: Option<ErrorSignature>) {
        self.detector.set_current_error(signature);
        if self.detector.is_making_progress() {
            self.interventions.reset_intervention_count();
        }
    }

    /// Reports this cycle's raw error objects.
    ///
    /// Feeds the progress tracker, then sets the gate to the first error
    /// that can be fingerprinted. An empty list means the cycle succeeded.
    /// When errors exist but none can be fingerprinted, the progress check
    /// is skipped for this cycle.
    pub fn observe_errors(&mut self, errors: &[Value]) {
        self.tracker.add_iteration(errors);

        match errors.iter().find_map(ErrorSignature::from_error) {
            Some(first) => self.set_current_error(Some(first)),
            None if errors.is_empty() => self.set_current_error(None),
            None => {
                warn!(
                    errors = errors.len(),
                    "Could not fingerprint any error, skipping progress check"
                );
                self.detector.skip_progress_check();
            }
        }
    }

    /// Runs detection and returns guidance if it is warranted.
    pub fn check_and_intervene(&mut self) -> Option<InterventionPayload> {
        self.assess().intervention
    }

    /// Runs detection and returns both the detections and any guidance.
    pub fn assess(&mut self) -> Assessment {
        let detections = self.detector.detect_all_loops(&self.log);
        let intervention = self.interventions.evaluate(&detections);
        if let Some(payload) = &intervention {
            info!(
                kind = %payload.intervention_type,
                severity = %payload.severity,
                requires_user_input = payload.requires_user_input,
                "Intervention issued"
            );
        }
        Assessment {
            detections,
            intervention,
        }
    }

    /// Leaves escalation after a human has stepped in.
    pub fn reset_intervention_count(&mut self) {
        self.interventions.reset_intervention_count();
    }

    /// Moves the history file aside and starts an empty log.
    pub fn archive_history(&mut self) -> Option<PathBuf> {
        self.log.archive()
    }

    #[must_use]
    pub fn status(&self) -> InterventionStatus {
        self.interventions.status()
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    #[must_use]
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Mutable log access, e.g. for replaying actions with fixed timestamps.
    pub fn log_mut(&mut self) -> &mut ActionLog {
        &mut self.log
    }

    #[must_use]
    pub fn detector(&self) -> &PatternDetector {
        &self.detector
    }

    #[must_use]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    #[must_use]
    pub fn interventions(&self) -> &InterventionSystem {
        &self.interventions
    }
}
