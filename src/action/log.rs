//! The append-only action log and its pattern queries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{tools, Action, HistoryFile, ToolCall};

/// Upper bound for time windows, keeps `chrono::Duration` in range.
const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Start of the trailing window of `window_secs` ending at `reference`.
pub(crate) fn window_start(reference: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    reference - window(window_secs)
}

/// Filters for [`ActionLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    pub phase: Option<String>,
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub file_path: Option<String>,
}

impl ActionFilter {
    /// A filter matching every action.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    #[must_use]
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    #[must_use]
    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Returns true if the action satisfies every set field.
    #[must_use]
    pub fn matches(&self, action: &Action) -> bool {
        self.phase.as_deref().is_none_or(|p| action.phase == p)
            && self.agent.as_deref().is_none_or(|a| action.agent == a)
            && self.tool.as_deref().is_none_or(|t| action.tool == t)
            && self
                .file_path
                .as_deref()
                .is_none_or(|f| action.file_path.as_deref() == Some(f))
    }
}

/// A period found at the start of a sequence and how often it repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatingPeriod<T> {
    pub pattern: Vec<T>,
    pub cycles: usize,
}

/// Finds the shortest period at the start of `sequence` that repeats.
///
/// Period lengths are tried from `min_period` up to half the sequence
/// length. For each, the sequence is cut into consecutive chunks of that
/// length and the chunks equal to the first one are counted until the
/// first mismatch. The first length reaching `min_cycles` wins, so a
/// shorter period always beats a longer one that also matches.
#[must_use]
pub fn find_repeating_period<T: PartialEq + Clone>(
    sequence: &[T],
    min_period: usize,
    min_cycles: usize,
) -> Option<RepeatingPeriod<T>> {
    let min_period = min_period.max(1);
    for period in min_period..=sequence.len() / 2 {
        let pattern = &sequence[..period];
        let cycles = sequence
            .chunks_exact(period)
            .take_while(|chunk| *chunk == pattern)
            .count();
        if cycles >= min_cycles {
            return Some(RepeatingPeriod {
                pattern: pattern.to_vec(),
                cycles,
            });
        }
    }
    None
}

/// Aggregate statistics over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStatistics {
    pub total_actions: usize,
    pub time_span_secs: f64,
    pub actions_per_minute: f64,
    pub by_phase: BTreeMap<String, usize>,
    pub by_tool: BTreeMap<String, usize>,
    pub by_file: BTreeMap<String, usize>,
    /// Fraction of successful actions, `None` for an empty log.
    pub success_rate: Option<f64>,
}

/// Append-only, time-ordered record of agent tool invocations.
#[derive(Debug, Default)]
pub struct ActionLog {
    actions: Vec<Action>,
    history: Option<HistoryFile>,
}

impl ActionLog {
    /// Creates an in-memory log with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log persisted to `path`, replaying any existing history.
    ///
    /// Unreadable history is logged and ignored; the log then starts empty
    /// but keeps appending to the same file.
    pub fn with_history<P: AsRef<Path>>(path: P) -> Self {
        let history = HistoryFile::new(path);
        let actions = match history.load() {
            Ok(actions) => actions,
            Err(e) => {
                warn!(
                    path = %history.path().display(),
                    error = %e,
                    "Failed to load action history, continuing in memory"
                );
                Vec::new()
            }
        };
        if !actions.is_empty() {
            info!(
                path = %history.path().display(),
                count = actions.len(),
                "Replayed action history"
            );
        }
        Self {
            actions,
            history: Some(history),
        }
    }

    /// Returns the history file path, if persistence is configured.
    #[must_use]
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history.as_ref().map(|h| h.path().to_path_buf())
    }

    /// Records a tool invocation stamped with the current time.
    ///
    /// A persistence failure is logged and otherwise ignored.
    pub fn record(&mut self, call: ToolCall) -> &Action {
        let action = call.into_action(Utc::now());
        self.append(action, true)
    }

    /// Appends a pre-built action without persisting it.
    ///
    /// Used for replaying history and for tests that need fixed timestamps.
    pub fn push(&mut self, action: Action) -> &Action {
        self.append(action, false)
    }

    fn append(&mut self, action: Action, persist: bool) -> &Action {
        debug!(
            phase = %action.phase,
            agent = %action.agent,
            tool = %action.tool,
            success = action.success,
            "Action recorded"
        );
        if persist {
            if let Some(history) = &self.history {
                if let Err(e) = history.append(&action) {
                    warn!(
                        path = %history.path().display(),
                        error = %e,
                        "Failed to persist action, continuing in memory"
                    );
                }
            }
        }
        let idx = self.actions.len();
        self.actions.push(action);
        &self.actions[idx]
    }

    /// All actions, oldest first.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The most recent action.
    #[must_use]
    pub fn latest(&self) -> Option<&Action> {
        self.actions.last()
    }

    /// The last `count` actions, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> &[Action] {
        let start = self.actions.len().saturating_sub(count);
        &self.actions[start..]
    }

    /// The most recent `count` actions matching `filter`, oldest first.
    ///
    /// Filtering happens before truncation, so recency is computed within
    /// the matching set.
    #[must_use]
    pub fn query(&self, count: usize, filter: &ActionFilter) -> Vec<&Action> {
        let matching: Vec<&Action> = self.actions.iter().filter(|a| filter.matches(a)).collect();
        let start = matching.len().saturating_sub(count);
        matching[start..].to_vec()
    }

    /// Signatures of the last `count` actions, oldest first.
    #[must_use]
    pub fn signature_sequence(&self, count: usize) -> Vec<String> {
        self.recent(count).iter().map(Action::signature).collect()
    }

    /// Occurrences of each signature within the trailing window ending now.
    #[must_use]
    pub fn frequency(&self, window_secs: u64) -> BTreeMap<String, usize> {
        self.frequency_at(window_secs, Utc::now())
    }

    /// Occurrences of each signature within the window ending at `reference`.
    #[must_use]
    pub fn frequency_at(&self, window_secs: u64, reference: DateTime<Utc>) -> BTreeMap<String, usize> {
        let cutoff = window_start(reference, window_secs);
        let mut frequency = BTreeMap::new();
        for action in self.actions.iter().filter(|a| a.timestamp >= cutoff) {
            *frequency.entry(action.signature()).or_insert(0) += 1;
        }
        frequency
    }

    /// Returns the shared signature and `threshold` if the last `threshold`
    /// actions all share one signature.
    ///
    /// This is a streak check: any differing action inside the trailing
    /// `threshold` breaks it.
    #[must_use]
    pub fn immediate_repeat(&self, threshold: usize) -> Option<(String, usize)> {
        if threshold == 0 || self.actions.len() < threshold {
            return None;
        }
        let mut signatures = self.recent(threshold).iter().map(Action::signature);
        let first = signatures.next()?;
        if signatures.all(|s| s == first) {
            Some((first, threshold))
        } else {
            None
        }
    }

    /// The trailing run of identical signatures and its length.
    #[must_use]
    pub fn current_streak(&self) -> Option<(String, usize)> {
        let last = self.actions.last()?.signature();
        let len = self
            .actions
            .iter()
            .rev()
            .take_while(|a| a.signature() == last)
            .count();
        Some((last, len))
    }

    /// Finds the shortest multi-step pattern (period 2 or more) repeating
    /// at least `min_cycles` times in the trailing `window_size` actions.
    ///
    /// Returns `None` when fewer than `window_size` actions exist.
    #[must_use]
    pub fn alternating_pattern(
        &self,
        window_size: usize,
        min_cycles: usize,
    ) -> Option<(Vec<String>, usize)> {
        if window_size == 0 || self.actions.len() < window_size {
            return None;
        }
        let sequence = self.signature_sequence(window_size);
        find_repeating_period(&sequence, 2, min_cycles).map(|p| (p.pattern, p.cycles))
    }

    /// Writes to `file_path` (`str_replace`, `full_file_rewrite`,
    /// `create_file`), optionally limited to a trailing window ending now.
    #[must_use]
    pub fn modifications_for(&self, file_path: &str, window_secs: Option<u64>) -> Vec<&Action> {
        let cutoff = window_secs.map(|secs| window_start(Utc::now(), secs));
        self.actions
            .iter()
            .filter(|a| a.file_path.as_deref() == Some(file_path))
            .filter(|a| tools::FILE_WRITE.contains(&a.tool.as_str()))
            .filter(|a| cutoff.is_none_or(|c| a.timestamp >= c))
            .collect()
    }

    /// Aggregate statistics over the whole log.
    #[must_use]
    pub fn statistics(&self) -> ActionStatistics {
        let (Some(first), Some(last)) = (self.actions.first(), self.actions.last()) else {
            return ActionStatistics::default();
        };

        let time_span_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        let mut stats = ActionStatistics {
            total_actions: self.actions.len(),
            time_span_secs,
            actions_per_minute: if time_span_secs > 0.0 {
                self.actions.len() as f64 / (time_span_secs / 60.0)
            } else {
                0.0
            },
            ..ActionStatistics::default()
        };

        let mut successes = 0usize;
        for action in &self.actions {
            *stats.by_phase.entry(action.phase.clone()).or_insert(0) += 1;
            *stats.by_tool.entry(action.tool.clone()).or_insert(0) += 1;
            if let Some(path) = &action.file_path {
                *stats.by_file.entry(path.clone()).or_insert(0) += 1;
            }
            if action.success {
                successes += 1;
            }
        }
        stats.success_rate = Some(successes as f64 / self.actions.len() as f64);
        stats
    }

    /// Drops all actions and moves the history file aside.
    ///
    /// Returns the archive path when the file was renamed.
    pub fn archive(&mut self) -> Option<PathBuf> {
        self.actions.clear();
        let history = self.history.as_ref()?;
        match history.archive() {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    path = %history.path().display(),
                    error = %e,
                    "Failed to archive action history"
                );
                None
            }
        }
    }

    /// Drops all actions and deletes the history file.
    pub fn clear(&mut self) {
        self.actions.clear();
        if let Some(history) = &self.history {
            if let Err(e) = history.remove() {
                warn!(
                    path = %history.path().display(),
                    error = %e,
                    "Failed to remove action history file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ActionBuilder;
    use serde_json::json;
    use tempfile::TempDir;

    fn log_of(actions: Vec<Action>) -> ActionLog {
        let mut log = ActionLog::new();
        for action in actions {
            log.push(action);
        }
        log
    }

    fn read(file: &str) -> Action {
        ActionBuilder::new("read_file").file(file).build()
    }

    #[test]
    fn test_record_returns_new_action() {
        let mut log = ActionLog::new();
        let action = log.record(
            ToolCall::new("coding", "main", "str_replace")
                .with_args(json!({"old_str": "x"}))
                .with_file("a.py"),
        );
        assert_eq!(action.tool, "str_replace");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_query_filters_before_truncating() {
        let log = log_of(vec![
            ActionBuilder::new("read_file").phase("qa").file("a.py").build(),
            ActionBuilder::new("read_file").phase("coding").file("b.py").build(),
            ActionBuilder::new("read_file").phase("qa").file("c.py").build(),
            ActionBuilder::new("read_file").phase("coding").file("d.py").build(),
        ]);

        let qa = log.query(2, &ActionFilter::any().phase("qa"));
        let files: Vec<_> = qa.iter().filter_map(|a| a.file_path.as_deref()).collect();
        assert_eq!(files, vec!["a.py", "c.py"]);

        let one = log.query(1, &ActionFilter::any().phase("qa").file_path("a.py"));
        assert_eq!(one.len(), 1);
        assert!(log.query(5, &ActionFilter::any().tool("str_replace")).is_empty());
    }

    #[test]
    fn test_immediate_repeat_at_threshold() {
        let log = log_of((0..4).map(|_| read("a.py")).collect());
        assert_eq!(
            log.immediate_repeat(3),
            Some(("read_file(file:a.py)".to_string(), 3))
        );
        assert_eq!(
            log.immediate_repeat(4),
            Some(("read_file(file:a.py)".to_string(), 4))
        );
    }

    #[test]
    fn test_immediate_repeat_below_threshold() {
        let log = log_of(vec![read("a.py"), read("a.py")]);
        assert!(log.immediate_repeat(3).is_none());

        let broken = log_of(vec![read("a.py"), read("b.py"), read("a.py"), read("a.py")]);
        assert!(broken.immediate_repeat(3).is_none());
        assert!(broken.immediate_repeat(0).is_none());
    }

    #[test]
    fn test_current_streak() {
        let log = log_of(vec![read("b.py"), read("a.py"), read("a.py"), read("a.py")]);
        assert_eq!(log.current_streak(), Some(("read_file(file:a.py)".to_string(), 3)));
        assert!(ActionLog::new().current_streak().is_none());
    }

    #[test]
    fn test_alternating_pattern_prefers_shortest_period() {
        let log = log_of(vec![
            read("a.py"),
            read("b.py"),
            read("a.py"),
            read("b.py"),
            read("a.py"),
            read("b.py"),
        ]);
        let (pattern, cycles) = log.alternating_pattern(6, 2).unwrap();
        assert_eq!(pattern.len(), 2);
        assert_eq!(cycles, 3);
    }

    #[test]
    fn test_alternating_pattern_requires_full_window() {
        let log = log_of(vec![read("a.py"), read("b.py"), read("a.py"), read("b.py")]);
        assert!(log.alternating_pattern(6, 2).is_none());
        assert!(log.alternating_pattern(4, 2).is_some());
    }

    #[test]
    fn test_alternating_pattern_three_step() {
        let files = ["a.py", "b.py", "c.py"];
        let log = log_of(
            files
                .iter()
                .cycle()
                .take(9)
                .map(|f| read(f))
                .collect(),
        );
        let (pattern, cycles) = log.alternating_pattern(9, 2).unwrap();
        assert_eq!(pattern.len(), 3);
        assert_eq!(cycles, 3);
    }

    #[test]
    fn test_alternating_pattern_none_for_distinct_actions() {
        let log = log_of((0..6).map(|i| read(&format!("f{i}.py"))).collect());
        assert!(log.alternating_pattern(6, 2).is_none());
    }

    #[test]
    fn test_find_repeating_period_stops_at_first_mismatch() {
        let seq = ["a", "b", "a", "b", "c", "d", "a", "b"];
        let found = find_repeating_period(&seq, 2, 2).unwrap();
        assert_eq!(found.pattern, vec!["a", "b"]);
        assert_eq!(found.cycles, 2);
        assert!(find_repeating_period(&seq, 2, 3).is_none());
    }

    #[test]
    fn test_frequency_respects_window() {
        let base = Utc::now();
        let log = log_of(vec![
            ActionBuilder::new("read_file").file("a.py").at(base - Duration::seconds(600)).build(),
            ActionBuilder::new("read_file").file("a.py").at(base - Duration::seconds(100)).build(),
            ActionBuilder::new("read_file").file("a.py").at(base).build(),
            ActionBuilder::new("search_code").at(base).build(),
        ]);

        let freq = log.frequency_at(300, base);
        assert_eq!(freq.get("read_file(file:a.py)"), Some(&2));
        assert_eq!(freq.get("search_code()"), Some(&1));
    }

    #[test]
    fn test_modifications_for_file() {
        let log = log_of(vec![
            ActionBuilder::new("str_replace").file("a.py").arg("old_str", "x").build(),
            ActionBuilder::new("read_file").file("a.py").build(),
            ActionBuilder::new("create_file").file("a.py").build(),
            ActionBuilder::new("str_replace").file("b.py").arg("old_str", "x").build(),
            ActionBuilder::new("full_file_rewrite")
                .file("a.py")
                .at(Utc::now() - Duration::seconds(3600))
                .build(),
        ]);
        assert_eq!(log.modifications_for("a.py", None).len(), 3);
        assert_eq!(log.modifications_for("a.py", Some(60)).len(), 2);
    }

    #[test]
    fn test_statistics() {
        let base = Utc::now();
        let log = log_of(vec![
            ActionBuilder::new("read_file").phase("qa").file("a.py").at(base).build(),
            ActionBuilder::new("str_replace")
                .phase("coding")
                .file("a.py")
                .failed()
                .at(base + Duration::seconds(60))
                .build(),
        ]);
        let stats = log.statistics();
        assert_eq!(stats.total_actions, 2);
        assert!((stats.time_span_secs - 60.0).abs() < 0.001);
        assert!((stats.actions_per_minute - 2.0).abs() < 0.001);
        assert_eq!(stats.by_file.get("a.py"), Some(&2));
        assert_eq!(stats.by_phase.get("qa"), Some(&1));
        assert_eq!(stats.success_rate, Some(0.5));

        assert_eq!(ActionLog::new().statistics().success_rate, None);
    }

    #[test]
    fn test_history_replay_and_clear() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".loopguard/action_history.jsonl");

        {
            let mut log = ActionLog::with_history(&path);
            log.record(ToolCall::new("coding", "main", "read_file").with_file("a.py"));
            log.record(ToolCall::new("coding", "main", "str_replace").with_file("a.py"));
        }

        let mut replayed = ActionLog::with_history(&path);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed.actions()[1].tool, "str_replace");

        replayed.clear();
        assert!(replayed.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_persistence_failure_does_not_block_recording() {
        let temp = TempDir::new().unwrap();
        // A directory where the history file should be makes every append fail.
        let path = temp.path().join("history.jsonl");
        std::fs::create_dir_all(&path).unwrap();

        let mut log = ActionLog::with_history(&path);
        log.record(ToolCall::new("coding", "main", "read_file"));
        assert_eq!(log.len(), 1);
    }
}
