//! Configuration management for loopguard.
//!
//! Settings are read from `<project>/.loopguard/settings.json`. Every field
//! has a default, so a partial file (or no file at all) is valid.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "detection": {
//!     "actionRepeat": 4,
//!     "actionSeverity": { "critical": 12, "high": 8, "medium": 5 }
//!   },
//!   "intervention": {
//!     "maxInterventions": 5
//!   },
//!   "history": {
//!     "enabled": false
//!   }
//! }
//! ```

use crate::detection::Severity;
use crate::error::{LoopGuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory (relative to the project) holding settings and history.
pub const STATE_DIR: &str = ".loopguard";

/// Settings file name inside [`STATE_DIR`].
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Default action history file name inside [`STATE_DIR`].
pub const DEFAULT_HISTORY_FILENAME: &str = "action_history.jsonl";

/// Count cutoffs mapping a repeat count onto a [`Severity`].
///
/// A count at or above `critical` is critical, at or above `high` is high,
/// at or above `medium` is medium, and anything lower is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCutoffs {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
}

impl SeverityCutoffs {
    /// Creates cutoffs with custom values.
    #[must_use]
    pub const fn new(critical: usize, high: usize, medium: usize) -> Self {
        Self {
            critical,
            high,
            medium,
        }
    }

    /// Classify a count into a severity.
    #[must_use]
    pub fn classify(&self, count: usize) -> Severity {
        if count >= self.critical {
            Severity::Critical
        } else if count >= self.high {
            Severity::High
        } else if count >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Validates that the cutoffs are ordered.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.medium == 0 {
            return Err("medium cutoff must be at least 1".to_string());
        }
        if self.high < self.medium {
            return Err(format!(
                "high cutoff ({}) is below medium cutoff ({})",
                self.high, self.medium
            ));
        }
        if self.critical < self.high {
            return Err(format!(
                "critical cutoff ({}) is below high cutoff ({})",
                self.critical, self.high
            ));
        }
        Ok(())
    }
}

fn default_repeat_cutoffs() -> SeverityCutoffs {
    SeverityCutoffs::new(10, 7, 5)
}

fn default_cycle_cutoffs() -> SeverityCutoffs {
    SeverityCutoffs::new(5, 4, 3)
}

/// Thresholds and windows for the loop detectors.
///
/// The defaults are empirically tuned values, not derived constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionThresholds {
    /// Consecutive identical actions before an action loop is reported.
    #[serde(default = "default_action_repeat")]
    pub action_repeat: usize,
    /// Occurrences of one signature inside the frequency window.
    #[serde(default = "default_frequency_repeat")]
    pub frequency_repeat: usize,
    /// Trailing time window for the frequency check, in seconds.
    #[serde(default = "default_frequency_window_secs")]
    pub frequency_window_secs: u64,
    /// Severity cutoffs for action loops.
    #[serde(default = "default_repeat_cutoffs")]
    pub action_severity: SeverityCutoffs,

    /// Modifications of one file before it is examined for a modification loop.
    #[serde(default = "default_modification_repeat")]
    pub modification_repeat: usize,
    /// Trailing actions scanned for modifications.
    #[serde(default = "default_modification_window")]
    pub modification_window: usize,
    /// A file is flagged when the fraction of modifications with a unique
    /// target falls below this ratio.
    #[serde(default = "default_modification_unique_ratio")]
    pub modification_unique_ratio: f64,
    /// Severity cutoffs for modification loops.
    #[serde(default = "default_repeat_cutoffs")]
    pub modification_severity: SeverityCutoffs,

    /// Times one target may be analyzed before a conversation loop is reported.
    #[serde(default = "default_conversation_repeat")]
    pub conversation_repeat: usize,
    /// Trailing actions scanned for analysis tools.
    #[serde(default = "default_conversation_window")]
    pub conversation_window: usize,

    /// Trailing actions whose `read_file` results feed the import graph.
    #[serde(default = "default_import_window")]
    pub import_window: usize,

    /// Trailing actions used to build the state sequence.
    #[serde(default = "default_state_window")]
    pub state_window: usize,
    /// Shortest state period considered.
    #[serde(default = "default_state_min_period")]
    pub state_min_period: usize,
    /// Repetitions of a state period needed to report a cycle.
    #[serde(default = "default_state_min_cycles")]
    pub state_min_cycles: usize,

    /// Trailing actions searched for a repeating multi-step pattern.
    #[serde(default = "default_pattern_window")]
    pub pattern_window: usize,
    /// Repetitions of a pattern needed to report it.
    #[serde(default = "default_pattern_min_cycles")]
    pub pattern_min_cycles: usize,
    /// Severity cutoffs (by cycle count) for pattern repetition.
    #[serde(default = "default_cycle_cutoffs")]
    pub pattern_severity: SeverityCutoffs,

    /// Trailing actions grouped by phase for the no-progress check.
    #[serde(default = "default_no_progress_window")]
    pub no_progress_window: usize,
    /// Actions a phase needs before it can be judged.
    #[serde(default = "default_no_progress_min_actions")]
    pub no_progress_min_actions: usize,
    /// A phase is stuck when mutating tools make up less than this ratio.
    #[serde(default = "default_no_progress_mutation_ratio")]
    pub no_progress_mutation_ratio: f64,

    /// In the debugging phase, modification loops whose unique-target
    /// ratio is at least this value are suppressed.
    #[serde(default = "default_debugging_unique_ratio")]
    pub debugging_unique_ratio: f64,

    /// Number of past detections kept for cross-pass frequency analysis.
    #[serde(default = "default_detection_history")]
    pub detection_history: usize,
}

fn default_action_repeat() -> usize {
    3
}

fn default_frequency_repeat() -> usize {
    5
}

fn default_frequency_window_secs() -> u64 {
    300
}

fn default_modification_repeat() -> usize {
    4
}

fn default_modification_window() -> usize {
    50
}

fn default_modification_unique_ratio() -> f64 {
    0.5
}

fn default_conversation_repeat() -> usize {
    3
}

fn default_conversation_window() -> usize {
    20
}

fn default_import_window() -> usize {
    30
}

fn default_state_window() -> usize {
    30
}

fn default_state_min_period() -> usize {
    3
}

fn default_state_min_cycles() -> usize {
    2
}

fn default_pattern_window() -> usize {
    20
}

fn default_pattern_min_cycles() -> usize {
    2
}

fn default_no_progress_window() -> usize {
    20
}

fn default_no_progress_min_actions() -> usize {
    5
}

fn default_no_progress_mutation_ratio() -> f64 {
    0.2
}

fn default_debugging_unique_ratio() -> f64 {
    0.7
}

fn default_detection_history() -> usize {
    50
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            action_repeat: default_action_repeat(),
            frequency_repeat: default_frequency_repeat(),
            frequency_window_secs: default_frequency_window_secs(),
            action_severity: default_repeat_cutoffs(),
            modification_repeat: default_modification_repeat(),
            modification_window: default_modification_window(),
            modification_unique_ratio: default_modification_unique_ratio(),
            modification_severity: default_repeat_cutoffs(),
            conversation_repeat: default_conversation_repeat(),
            conversation_window: default_conversation_window(),
            import_window: default_import_window(),
            state_window: default_state_window(),
            state_min_period: default_state_min_period(),
            state_min_cycles: default_state_min_cycles(),
            pattern_window: default_pattern_window(),
            pattern_min_cycles: default_pattern_min_cycles(),
            pattern_severity: default_cycle_cutoffs(),
            no_progress_window: default_no_progress_window(),
            no_progress_min_actions: default_no_progress_min_actions(),
            no_progress_mutation_ratio: default_no_progress_mutation_ratio(),
            debugging_unique_ratio: default_debugging_unique_ratio(),
            detection_history: default_detection_history(),
        }
    }
}

impl DetectionThresholds {
    /// Validates the detection thresholds.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let counts = [
            ("actionRepeat", self.action_repeat),
            ("frequencyRepeat", self.frequency_repeat),
            ("modificationRepeat", self.modification_repeat),
            ("modificationWindow", self.modification_window),
            ("conversationRepeat", self.conversation_repeat),
            ("conversationWindow", self.conversation_window),
            ("importWindow", self.import_window),
            ("stateWindow", self.state_window),
            ("stateMinCycles", self.state_min_cycles),
            ("patternWindow", self.pattern_window),
            ("patternMinCycles", self.pattern_min_cycles),
            ("noProgressWindow", self.no_progress_window),
            ("noProgressMinActions", self.no_progress_min_actions),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(format!("{} must be at least 1", name));
            }
        }

        if self.frequency_window_secs == 0 {
            return Err("frequencyWindowSecs must be at least 1".to_string());
        }
        if self.state_min_period < 2 {
            return Err(format!(
                "stateMinPeriod must be at least 2, got {}",
                self.state_min_period
            ));
        }

        let ratios = [
            ("modificationUniqueRatio", self.modification_unique_ratio),
            ("noProgressMutationRatio", self.no_progress_mutation_ratio),
            ("debuggingUniqueRatio", self.debugging_unique_ratio),
        ];
        for (name, value) in ratios {
            if !value.is_finite() {
                return Err(format!("{} is not a finite number", name));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within 0.0..=1.0, got {}", name, value));
            }
        }

        let cutoffs = [
            ("actionSeverity", &self.action_severity),
            ("modificationSeverity", &self.modification_severity),
            ("patternSeverity", &self.pattern_severity),
        ];
        for (name, value) in cutoffs {
            value.validate().map_err(|e| format!("{}: {}", name, e))?;
        }

        Ok(())
    }
}

/// Intervention escalation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionConfig {
    /// Interventions allowed before escalating to external input.
    #[serde(default = "default_max_interventions")]
    pub max_interventions: u32,
    /// Critical detections that alone warrant an intervention.
    #[serde(default = "default_critical_to_intervene")]
    pub critical_to_intervene: usize,
    /// High detections that together warrant an intervention.
    #[serde(default = "default_high_to_intervene")]
    pub high_to_intervene: usize,
}

fn default_max_interventions() -> u32 {
    3
}

fn default_critical_to_intervene() -> usize {
    1
}

fn default_high_to_intervene() -> usize {
    2
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            max_interventions: default_max_interventions(),
            critical_to_intervene: default_critical_to_intervene(),
            high_to_intervene: default_high_to_intervene(),
        }
    }
}

impl InterventionConfig {
    /// Validates the intervention settings.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_interventions == 0 {
            return Err("maxInterventions must be at least 1".to_string());
        }
        if self.critical_to_intervene == 0 {
            return Err("criticalToIntervene must be at least 1".to_string());
        }
        if self.high_to_intervene == 0 {
            return Err("highToIntervene must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Action history persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Whether actions are appended to the history file.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// History file name inside the state directory.
    #[serde(default = "default_history_file")]
    pub file_name: String,
}

fn default_true() -> bool {
    true
}

fn default_history_file() -> String {
    DEFAULT_HISTORY_FILENAME.to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: default_history_file(),
        }
    }
}

/// Project configuration loaded from `.loopguard/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub detection: DetectionThresholds,

    #[serde(default)]
    pub intervention: InterventionConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

impl GuardConfig {
    /// Load configuration from a project directory.
    ///
    /// A missing settings file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LoopGuardError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path).map_err(|e| {
            LoopGuardError::config_with_path(e.to_string(), settings_path.clone())
        })?;
        serde_json::from_str(&content)
            .map_err(|e| LoopGuardError::config_with_path(e.to_string(), settings_path))
    }

    /// Get the state directory for a project
    pub fn state_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR)
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join(SETTINGS_FILENAME)
    }

    /// Get the configured history file path for a project
    pub fn history_path(&self, project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join(&self.history.file_name)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns [`LoopGuardError::InvalidConfig`] naming the failing section.
    pub fn validate(&self) -> Result<()> {
        self.detection
            .validate()
            .map_err(|reason| LoopGuardError::invalid_config("detection", reason))?;
        self.intervention
            .validate()
            .map_err(|reason| LoopGuardError::invalid_config("intervention", reason))?;
        if self.history.file_name.trim().is_empty() {
            return Err(LoopGuardError::invalid_config(
                "history",
                "fileName must not be empty",
            ));
        }
        Ok(())
    }
}
