//! Phase-aware false positive suppression.
//!
//! Some phases legitimately look repetitive: QA reads many files,
//! investigation gathers context, debugging tries several fixes on one
//! file. Each detection is judged against the actions it cites (or the
//! recent actions when it cites none) and the phase of the newest action.
//! The outcome depends only on that phase and those actions, so filtering
//! an already filtered list changes nothing.

use std::collections::HashSet;

use tracing::debug;

use super::detectors::unique_target_fraction;
use super::{LoopDetection, LoopType};
use crate::action::{tools, Action, ActionLog};
use crate::config::DetectionThresholds;

/// Recent actions used for detections that cite none.
const FALLBACK_WINDOW: usize = 20;

/// Phase name used when the log is empty.
const UNKNOWN_PHASE: &str = "unknown";

/// Drops detections explained by normal behavior of the current phase.
#[must_use]
pub fn filter_phase_aware(
    detections: Vec<LoopDetection>,
    log: &ActionLog,
    t: &DetectionThresholds,
) -> Vec<LoopDetection> {
    let recent = log.recent(FALLBACK_WINDOW);
    let phase = log.latest().map_or(UNKNOWN_PHASE, |a| a.phase.as_str());

    detections
        .into_iter()
        .filter(|detection| {
            let actions = if detection.actions_involved.is_empty() {
                recent
            } else {
                detection.actions_involved.as_slice()
            };
            let suppressed = is_expected_for_phase(phase, detection.loop_type, actions, t);
            if suppressed {
                debug!(
                    phase,
                    loop_type = %detection.loop_type,
                    "Suppressed detection as normal phase behavior"
                );
            }
            !suppressed
        })
        .collect()
}

/// True if `loop_type` over `actions` is normal behavior in `phase`.
#[must_use]
pub fn is_expected_for_phase(
    phase: &str,
    loop_type: LoopType,
    actions: &[Action],
    t: &DetectionThresholds,
) -> bool {
    match (phase, loop_type) {
        (
            "qa",
            LoopType::ConversationLoop | LoopType::PatternRepetition | LoopType::StateCycle,
        ) => is_multi_file_review(actions),
        ("investigation", LoopType::ConversationLoop | LoopType::PatternRepetition) => {
            uses_only(actions, tools::INVESTIGATION)
        }
        ("debugging", LoopType::ModificationLoop) => unique_target_fraction(actions)
            .is_some_and(|fraction| fraction >= t.debugging_unique_ratio),
        _ => false,
    }
}

fn uses_only(actions: &[Action], allowed: &[&str]) -> bool {
    actions.iter().all(|a| allowed.contains(&a.tool.as_str()))
}

/// Read-only review tools spread over more than one file.
fn is_multi_file_review(actions: &[Action]) -> bool {
    let files: HashSet<&str> = actions
        .iter()
        .filter_map(|a| a.file_path.as_deref())
        .collect();
    uses_only(actions, tools::REVIEW) && files.len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Severity;
    use crate::testing::ActionBuilder;

    fn detection(loop_type: LoopType, actions: Vec<Action>) -> LoopDetection {
        LoopDetection {
            loop_type,
            severity: Severity::High,
            description: String::new(),
            evidence: Vec::new(),
            suggestion: String::new(),
            actions_involved: actions,
        }
    }

    fn reads(phase: &str, files: &[&str]) -> Vec<Action> {
        files
            .iter()
            .map(|f| ActionBuilder::new("read_file").phase(phase).file(*f).build())
            .collect()
    }

    fn log_of(actions: &[Action]) -> ActionLog {
        let mut log = ActionLog::new();
        for action in actions {
            log.push(action.clone());
        }
        log
    }

    #[test]
    fn test_qa_multi_file_review_is_suppressed() {
        let actions = reads("qa", &["a.py", "b.py", "a.py", "b.py"]);
        let log = log_of(&actions);
        let kept = filter_phase_aware(
            vec![
                detection(LoopType::PatternRepetition, actions.clone()),
                detection(LoopType::ActionLoop, actions.clone()),
            ],
            &log,
            &DetectionThresholds::default(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].loop_type, LoopType::ActionLoop);
    }

    #[test]
    fn test_qa_single_file_is_kept() {
        let actions = reads("qa", &["a.py", "a.py", "a.py"]);
        let log = log_of(&actions);
        let kept = filter_phase_aware(
            vec![detection(LoopType::ConversationLoop, actions)],
            &log,
            &DetectionThresholds::default(),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_same_actions_outside_qa_are_kept() {
        let actions = reads("coding", &["a.py", "b.py", "a.py", "b.py"]);
        let log = log_of(&actions);
        let kept = filter_phase_aware(
            vec![detection(LoopType::PatternRepetition, actions)],
            &log,
            &DetectionThresholds::default(),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_investigation_allowlist() {
        let mut actions = reads("investigation", &["a.py", "a.py"]);
        actions.push(
            ActionBuilder::new("investigate_data_flow")
                .phase("investigation")
                .build(),
        );
        let log = log_of(&actions);
        let t = DetectionThresholds::default();

        assert!(filter_phase_aware(
            vec![detection(LoopType::ConversationLoop, actions.clone())],
            &log,
            &t
        )
        .is_empty());

        let mut with_edit = actions.clone();
        with_edit.push(
            ActionBuilder::new("str_replace")
                .phase("investigation")
                .file("a.py")
                .build(),
        );
        assert_eq!(
            filter_phase_aware(
                vec![detection(LoopType::ConversationLoop, with_edit)],
                &log,
                &t
            )
            .len(),
            1
        );
    }

    #[test]
    fn test_debugging_suppression_follows_unique_ratio() {
        let edits: Vec<Action> = ["a", "b", "c", "a"]
            .iter()
            .map(|old| {
                ActionBuilder::new("str_replace")
                    .phase("debugging")
                    .file("x.py")
                    .arg("old_str", *old)
                    .build()
            })
            .collect();
        let log = log_of(&edits);

        // Two of four targets are unique: below 0.7, kept.
        let t = DetectionThresholds::default();
        assert_eq!(
            filter_phase_aware(
                vec![detection(LoopType::ModificationLoop, edits.clone())],
                &log,
                &t
            )
            .len(),
            1
        );

        let lenient = DetectionThresholds {
            debugging_unique_ratio: 0.5,
            ..DetectionThresholds::default()
        };
        assert!(filter_phase_aware(
            vec![detection(LoopType::ModificationLoop, edits)],
            &log,
            &lenient
        )
        .is_empty());
    }

    #[test]
    fn test_empty_actions_fall_back_to_recent() {
        let actions = reads("qa", &["a.py", "b.py", "c.py"]);
        let log = log_of(&actions);
        let kept = filter_phase_aware(
            vec![detection(LoopType::StateCycle, Vec::new())],
            &log,
            &DetectionThresholds::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let actions = reads("qa", &["a.py", "b.py", "a.py", "b.py"]);
        let log = log_of(&actions);
        let t = DetectionThresholds::default();
        let input = vec![
            detection(LoopType::PatternRepetition, actions.clone()),
            detection(LoopType::ActionLoop, actions.clone()),
            detection(LoopType::NoProgressLoop, actions),
        ];
        let once = filter_phase_aware(input, &log, &t);
        let twice = filter_phase_aware(once.clone(), &log, &t);
        assert_eq!(once, twice);
    }
}
