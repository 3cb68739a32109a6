//! Progress gate and per-iteration bug transition tracking.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::ErrorSignature;

/// Tracks the current error signature and whether it changed this cycle.
///
/// A change is structural inequality with the previous value, so `None`
/// to `Some`, `Some` to `None` and `Some(a)` to `Some(b)` all count, while
/// `None` to `None` does not.
#[derive(Debug, Clone, Default)]
pub struct ProgressGate {
    current: Option<ErrorSignature>,
    changed: bool,
}

impl ProgressGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new current error and records whether it differs from the
    /// previous one.
    pub fn set_current_error(&mut self, signature: Option<ErrorSignature>) {
        self.changed = signature != self.current;
        if self.changed {
            info!(
                previous = ?self.current.as_ref().map(ToString::to_string),
                current = ?signature.as_ref().map(ToString::to_string),
                "Error signature changed, progress detected"
            );
        } else {
            debug!("Error signature unchanged");
        }
        self.current = signature;
    }

    /// Clears the change flag without touching the stored signature.
    ///
    /// Used when this cycle's error could not be fingerprinted, so loop
    /// detection runs as if nothing changed.
    pub fn skip_cycle(&mut self) {
        if self.changed {
            debug!("Skipping progress gate for this cycle");
        }
        self.changed = false;
    }

    /// True if the last [`set_current_error`](Self::set_current_error)
    /// changed the signature.
    #[must_use]
    pub fn is_making_progress(&self) -> bool {
        self.changed
    }

    /// The stored error signature.
    #[must_use]
    pub fn current(&self) -> Option<&ErrorSignature> {
        self.current.as_ref()
    }
}

/// Classification of the change between two iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    /// Some bugs fixed and some new ones appeared.
    BugTransition,
    /// Bugs fixed and nothing new.
    BugFixed,
    /// New bugs and nothing fixed.
    NewBug,
    /// The same bugs persist.
    NoProgress,
}

impl TransitionKind {
    /// True for transitions showing that work had an effect.
    #[must_use]
    pub fn is_progress(&self) -> bool {
        !matches!(self, Self::NoProgress)
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BugTransition => write!(f, "BUG_TRANSITION"),
            Self::BugFixed => write!(f, "BUG_FIXED"),
            Self::NewBug => write!(f, "NEW_BUG"),
            Self::NoProgress => write!(f, "NO_PROGRESS"),
        }
    }
}

/// Set difference between the last two iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugTransition {
    pub kind: TransitionKind,
    pub fixed: BTreeSet<ErrorSignature>,
    pub new: BTreeSet<ErrorSignature>,
    pub persisting: BTreeSet<ErrorSignature>,
}

/// Cumulative counters of a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub iterations: usize,
    pub bugs_fixed: usize,
    pub bugs_discovered: usize,
    pub current_bugs: usize,
}

/// Accumulates one error signature set per iteration.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    previous: Option<BTreeSet<ErrorSignature>>,
    current: Option<BTreeSet<ErrorSignature>>,
    iterations: usize,
    bugs_fixed: usize,
    bugs_discovered: usize,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an iteration from raw error objects.
    ///
    /// Errors that cannot be fingerprinted are ignored.
    pub fn add_iteration(&mut self, errors: &[Value]) {
        let signatures = errors.iter().filter_map(ErrorSignature::from_error).collect();
        self.add_signatures(signatures);
    }

    /// Records an iteration from already-built signatures.
    pub fn add_signatures(&mut self, signatures: BTreeSet<ErrorSignature>) {
        self.iterations += 1;
        if let Some(previous) = &self.current {
            self.bugs_fixed += previous.difference(&signatures).count();
            self.bugs_discovered += signatures.difference(previous).count();
        }
        self.previous = self.current.take();
        self.current = Some(signatures);

        if let Some(transition) = self.detect_transition() {
            info!(
                iteration = self.iterations,
                kind = %transition.kind,
                fixed = transition.fixed.len(),
                new = transition.new.len(),
                persisting = transition.persisting.len(),
                "Bug transition"
            );
        }
    }

    /// Classifies the change between the last two iterations.
    ///
    /// Returns `None` with fewer than two iterations, or when both were
    /// free of errors.
    #[must_use]
    pub fn detect_transition(&self) -> Option<BugTransition> {
        let (previous, current) = (self.previous.as_ref()?, self.current.as_ref()?);

        let fixed: BTreeSet<_> = previous.difference(current).cloned().collect();
        let new: BTreeSet<_> = current.difference(previous).cloned().collect();
        let persisting: BTreeSet<_> = previous.intersection(current).cloned().collect();

        let kind = match (fixed.is_empty(), new.is_empty()) {
            (false, false) => TransitionKind::BugTransition,
            (false, true) => TransitionKind::BugFixed,
            (true, false) => TransitionKind::NewBug,
            (true, true) if !persisting.is_empty() => TransitionKind::NoProgress,
            (true, true) => return None,
        };

        Some(BugTransition {
            kind,
            fixed,
            new,
            persisting,
        })
    }

    /// True if the latest transition fixed or discovered bugs.
    #[must_use]
    pub fn is_making_progress(&self) -> bool {
        self.detect_transition()
            .is_some_and(|t| t.kind.is_progress())
    }

    /// Signatures recorded in the latest iteration.
    #[must_use]
    pub fn current_errors(&self) -> BTreeSet<ErrorSignature> {
        self.current.clone().unwrap_or_default()
    }

    /// Signatures recorded in the iteration before the latest.
    #[must_use]
    pub fn previous_errors(&self) -> BTreeSet<ErrorSignature> {
        self.previous.clone().unwrap_or_default()
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            iterations: self.iterations,
            bugs_fixed: self.bugs_fixed,
            bugs_discovered: self.bugs_discovered,
            current_bugs: self.current.as_ref().map_or(0, BTreeSet::len),
        }
    }

    /// Human-readable report of the latest transition.
    #[must_use]
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let mut out = format!(
            "Iteration {}: {} current bug(s), {} fixed, {} discovered",
            stats.iterations, stats.current_bugs, stats.bugs_fixed, stats.bugs_discovered
        );

        let Some(transition) = self.detect_transition() else {
            return out;
        };

        out.push_str(&format!("\nTransition: {}", transition.kind));
        let sections = [
            ("Fixed", &transition.fixed),
            ("New", &transition.new),
            ("Persisting", &transition.persisting),
        ];
        for (label, set) in sections {
            for sig in set {
                out.push_str(&format!("\n  {} [{}] {}", label, sig.short_id(), sig));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig(line: i64) -> ErrorSignature {
        ErrorSignature::new("KeyError", "'url'", "fetch.py", line)
    }

    fn set(sigs: &[ErrorSignature]) -> BTreeSet<ErrorSignature> {
        sigs.iter().cloned().collect()
    }

    #[test]
    fn test_gate_detects_change() {
        let mut gate = ProgressGate::new();
        gate.set_current_error(Some(sig(1)));
        assert!(gate.is_making_progress());

        gate.set_current_error(Some(sig(1)));
        assert!(!gate.is_making_progress());

        gate.set_current_error(Some(sig(2)));
        assert!(gate.is_making_progress());

        gate.set_current_error(None);
        assert!(gate.is_making_progress());

        gate.set_current_error(None);
        assert!(!gate.is_making_progress());
    }

    #[test]
    fn test_gate_skip_cycle_keeps_signature() {
        let mut gate = ProgressGate::new();
        gate.set_current_error(Some(sig(1)));
        gate.skip_cycle();
        assert!(!gate.is_making_progress());
        assert_eq!(gate.current(), Some(&sig(1)));
    }

    #[test]
    fn test_no_transition_before_two_iterations() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.detect_transition().is_none());
        tracker.add_signatures(set(&[sig(1)]));
        assert!(tracker.detect_transition().is_none());
        assert!(!tracker.is_making_progress());
    }

    #[test]
    fn test_transition_kinds() {
        let mut tracker = ProgressTracker::new();
        tracker.add_signatures(set(&[sig(1), sig(2)]));

        tracker.add_signatures(set(&[sig(2), sig(3)]));
        let t = tracker.detect_transition().unwrap();
        assert_eq!(t.kind, TransitionKind::BugTransition);
        assert_eq!(t.fixed, set(&[sig(1)]));
        assert_eq!(t.new, set(&[sig(3)]));
        assert_eq!(t.persisting, set(&[sig(2)]));

        tracker.add_signatures(set(&[sig(2)]));
        assert_eq!(tracker.detect_transition().unwrap().kind, TransitionKind::BugFixed);

        tracker.add_signatures(set(&[sig(2), sig(4)]));
        assert_eq!(tracker.detect_transition().unwrap().kind, TransitionKind::NewBug);

        tracker.add_signatures(set(&[sig(2), sig(4)]));
        assert_eq!(tracker.detect_transition().unwrap().kind, TransitionKind::NoProgress);
        assert!(!tracker.is_making_progress());

        tracker.add_signatures(BTreeSet::new());
        tracker.add_signatures(BTreeSet::new());
        assert!(tracker.detect_transition().is_none());
    }

    #[test]
    fn test_stats_count_once_per_iteration() {
        let mut tracker = ProgressTracker::new();
        tracker.add_signatures(set(&[sig(1)]));
        tracker.add_signatures(set(&[sig(2)]));

        // Reading twice must not double count.
        let _ = tracker.detect_transition();
        let _ = tracker.detect_transition();

        let stats = tracker.stats();
        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.bugs_fixed, 1);
        assert_eq!(stats.bugs_discovered, 1);
        assert_eq!(stats.current_bugs, 1);
    }

    #[test]
    fn test_add_iteration_skips_unparseable_errors() {
        let mut tracker = ProgressTracker::new();
        tracker.add_iteration(&[
            json!({"type": "KeyError", "message": "'url'", "file": "fetch.py", "line": 1}),
            json!("not an error object"),
        ]);
        assert_eq!(tracker.current_errors(), set(&[sig(1)]));
    }

    #[test]
    fn test_summary_lists_transition() {
        let mut tracker = ProgressTracker::new();
        tracker.add_signatures(set(&[sig(1)]));
        tracker.add_signatures(set(&[sig(2)]));
        let summary = tracker.summary();
        assert!(summary.contains("BUG_TRANSITION"));
        assert!(summary.contains("Fixed"));
        assert!(summary.contains("fetch.py:2"));
    }
}
