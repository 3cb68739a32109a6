//! The individual loop detectors.
//!
//! Each detector reads a trailing window of the [`ActionLog`] and returns
//! zero or more [`LoopDetection`]s. Detectors are independent; ordering and
//! filtering happen in [`PatternDetector`](super::PatternDetector).

use std::collections::{BTreeMap, HashMap};

use super::{imports, LoopDetection, LoopType, Severity};
use crate::action::log::window_start;
use crate::action::{find_repeating_period, truncate_chars, Action, ActionLog};
use crate::config::DetectionThresholds;

/// Characters of a command used as a conversation loop target.
const COMMAND_TARGET_CHARS: usize = 50;

fn span_secs(actions: &[&Action]) -> f64 {
    match (actions.first(), actions.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0
        }
        _ => 0.0,
    }
}

fn owned(actions: &[&Action]) -> Vec<Action> {
    actions.iter().map(|a| (*a).clone()).collect()
}

/// Fraction of edit targets (`old_str`, first 100 characters) that occur
/// exactly once among `actions`.
///
/// Only in-place modifications carrying an `old_str` count. Returns `None`
/// when there is no such modification.
#[must_use]
pub fn unique_target_fraction<'a, I>(actions: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Action>,
{
    let targets: Vec<String> = actions
        .into_iter()
        .filter(|a| a.is_modification())
        .filter_map(Action::edit_target)
        .collect();
    if targets.is_empty() {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for target in &targets {
        *counts.entry(target.as_str()).or_insert(0) += 1;
    }
    let unique = targets.iter().filter(|t| counts[t.as_str()] == 1).count();
    Some(unique as f64 / targets.len() as f64)
}

/// Same action signature repeated.
///
/// Reports the trailing streak when it reaches `action_repeat`, with
/// severity from its length, and any other signature occurring
/// `frequency_repeat` times within the frequency window. The window ends at
/// the newest action.
#[must_use]
pub fn action_loops(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let mut detections = Vec::new();
    let Some(latest) = log.latest() else {
        return detections;
    };

    let mut streak_signature = None;
    if log.immediate_repeat(t.action_repeat).is_some() {
        if let Some((signature, count)) = log.current_streak() {
            let recent: Vec<&Action> = log.recent(count).iter().collect();
            detections.push(LoopDetection {
                loop_type: LoopType::ActionLoop,
                severity: t.action_severity.classify(count),
                description: format!("Same action repeated {} times consecutively", count),
                evidence: vec![
                    format!("Action: {}", signature),
                    format!("Repeated: {} times", count),
                    format!("Time span: {:.1}s", span_secs(&recent)),
                ],
                suggestion: "Try a different approach or tool. Consider using the ask tool \
                             to request guidance."
                    .to_string(),
                actions_involved: owned(&recent),
            });
            streak_signature = Some(signature);
        }
    }

    let reference = latest.timestamp;
    let cutoff = window_start(reference, t.frequency_window_secs);
    let window_minutes = t.frequency_window_secs as f64 / 60.0;
    for (signature, count) in log.frequency_at(t.frequency_window_secs, reference) {
        if count < t.frequency_repeat || streak_signature.as_deref() == Some(signature.as_str()) {
            continue;
        }
        let involved: Vec<&Action> = log
            .actions()
            .iter()
            .filter(|a| a.timestamp >= cutoff && a.signature() == signature)
            .collect();
        detections.push(LoopDetection {
            loop_type: LoopType::ActionLoop,
            severity: Severity::Medium,
            description: format!(
                "Action repeated {} times in {:.0} minutes",
                count, window_minutes
            ),
            evidence: vec![
                format!("Action: {}", signature),
                format!("Frequency: {} times in {:.0} minutes", count, window_minutes),
            ],
            suggestion: "This action may not be effective. Consider alternative approaches."
                .to_string(),
            actions_involved: owned(&involved),
        });
    }

    detections
}

/// One file edited repeatedly at the same spot.
///
/// Files with at least `modification_repeat` in-place modifications in the
/// trailing `modification_window` actions are flagged when the fraction of
/// unique edit targets falls below `modification_unique_ratio`.
#[must_use]
pub fn modification_loops(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let mut by_file: BTreeMap<&str, Vec<&Action>> = BTreeMap::new();
    for action in log.recent(t.modification_window) {
        if let (Some(path), true) = (action.file_path.as_deref(), action.is_modification()) {
            by_file.entry(path).or_default().push(action);
        }
    }

    let mut detections = Vec::new();
    for (path, modifications) in by_file {
        if modifications.len() < t.modification_repeat {
            continue;
        }
        let Some(unique_fraction) = unique_target_fraction(modifications.iter().copied()) else {
            continue;
        };
        if unique_fraction >= t.modification_unique_ratio {
            continue;
        }

        let targets = modifications.iter().filter(|a| a.edit_target().is_some()).count();
        let unique = (unique_fraction * targets as f64).round() as usize;
        detections.push(LoopDetection {
            loop_type: LoopType::ModificationLoop,
            severity: t.modification_severity.classify(modifications.len()),
            description: format!(
                "File modified {} times, mostly targeting the same code",
                modifications.len()
            ),
            evidence: vec![
                format!("File: {}", path),
                format!("Modifications: {}", modifications.len()),
                format!("Time span: {:.1}s", span_secs(&modifications)),
                format!("Unique targets: {}/{}", unique, targets),
            ],
            suggestion: "The current approach is not working. Read the file to see its \
                         current state, use full_file_rewrite instead of str_replace, or \
                         consult a specialist."
                .to_string(),
            actions_involved: owned(&modifications),
        });
    }
    detections
}

fn analysis_target(action: &Action) -> Option<String> {
    if let Some(path) = &action.file_path {
        return Some(path.clone());
    }
    action
        .arg_str("command")
        .map(|c| truncate_chars(c, COMMAND_TARGET_CHARS).to_string())
}

/// The same target analyzed again and again.
///
/// Among analysis tools in the trailing `conversation_window` actions, any
/// file path or command prefix seen `conversation_repeat` times is flagged
/// at medium severity.
#[must_use]
pub fn conversation_loops(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let mut by_target: BTreeMap<String, Vec<&Action>> = BTreeMap::new();
    for action in log.recent(t.conversation_window) {
        if !action.is_analysis() {
            continue;
        }
        if let Some(target) = analysis_target(action) {
            by_target.entry(target).or_default().push(action);
        }
    }

    by_target
        .into_iter()
        .filter(|(_, actions)| actions.len() >= t.conversation_repeat)
        .map(|(target, actions)| LoopDetection {
            loop_type: LoopType::ConversationLoop,
            severity: Severity::Medium,
            description: format!("Repeatedly analyzing the same target {} times", actions.len()),
            evidence: vec![
                format!("Target: {}", target),
                format!("Analysis count: {}", actions.len()),
            ],
            suggestion: "You have already analyzed this. Use the information you gathered \
                         to make a decision and take action."
                .to_string(),
            actions_involved: owned(&actions),
        })
        .collect()
}

/// Files read during the run that import each other.
///
/// See [`imports`] for how the graph is built.
#[must_use]
pub fn circular_dependencies(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let window = log.recent(t.import_window);
    let graph = imports::ImportGraph::from_actions(window);

    graph
        .cycles()
        .into_iter()
        .map(|cycle| {
            let chain = cycle.join(" -> ");
            let involved: Vec<&Action> = window
                .iter()
                .filter(|a| {
                    graph
                        .module_of(a)
                        .is_some_and(|m| cycle.iter().any(|c| c == &m))
                })
                .collect();
            let members = &cycle[..cycle.len().saturating_sub(1)];
            let mut evidence = vec![
                format!("Cycle: {}", chain),
                format!("Length: {} files", members.len()),
            ];
            for module in members {
                if let Some(targets) = graph.imports_of(module) {
                    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
                    evidence.push(format!("{} imports {}", module, targets.join(", ")));
                }
            }
            LoopDetection {
                loop_type: LoopType::CircularDependency,
                severity: Severity::High,
                description: format!("Circular dependency detected: {}", chain),
                evidence,
                suggestion: "Break the circular dependency by moving shared code into a \
                             separate module or injecting the dependency."
                    .to_string(),
                actions_involved: owned(&involved),
            }
        })
        .collect()
}

/// The (phase, file, tool) sequence repeating.
///
/// Searches the trailing `state_window` actions for the shortest period of
/// at least `state_min_period` states repeating `state_min_cycles` times
/// from the start of the window. Only the first period found is reported.
#[must_use]
pub fn state_cycles(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let window = log.recent(t.state_window);
    let states: Vec<(&str, &str, &str)> = window
        .iter()
        .map(|a| {
            (
                a.phase.as_str(),
                a.file_path.as_deref().unwrap_or("none"),
                a.tool.as_str(),
            )
        })
        .collect();

    let Some(found) = find_repeating_period(&states, t.state_min_period, t.state_min_cycles)
    else {
        return Vec::new();
    };

    let len = found.pattern.len();
    let path = found
        .pattern
        .iter()
        .map(|(phase, _, tool)| format!("{}:{}", phase, tool))
        .collect::<Vec<_>>()
        .join(" -> ");
    vec![LoopDetection {
        loop_type: LoopType::StateCycle,
        severity: Severity::High,
        description: format!(
            "System cycling through the same {} states {} times",
            len, found.cycles
        ),
        evidence: vec![
            format!("Pattern length: {} states", len),
            format!("Cycles: {}", found.cycles),
            format!("States: {}", path),
        ],
        suggestion: "The system is stuck in a cycle. Try a completely different approach \
                     or ask for guidance."
            .to_string(),
        actions_involved: window[..len * found.cycles].to_vec(),
    }]
}

/// A multi-step action pattern repeating.
///
/// Uses [`ActionLog::alternating_pattern`] over `pattern_window` actions,
/// with severity from the cycle count.
#[must_use]
pub fn pattern_repetition(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let Some((pattern, cycles)) = log.alternating_pattern(t.pattern_window, t.pattern_min_cycles)
    else {
        return Vec::new();
    };

    let window = log.recent(t.pattern_window);
    vec![LoopDetection {
        loop_type: LoopType::PatternRepetition,
        severity: t.pattern_severity.classify(cycles),
        description: format!("Multi-step pattern repeated {} times", cycles),
        evidence: vec![
            format!("Pattern: {}", pattern.join(" -> ")),
            format!("Cycles: {}", cycles),
            format!("Pattern length: {} actions", pattern.len()),
        ],
        suggestion: "This multi-step pattern is repeating without progress. Consult a \
                     specialist, try a fundamentally different approach, or ask for guidance."
            .to_string(),
        actions_involved: window[..pattern.len() * cycles].to_vec(),
    }]
}

/// A phase running without changing anything.
///
/// Groups the trailing `no_progress_window` actions by phase. A phase with
/// at least `no_progress_min_actions` actions, of which mutating tools make
/// up less than `no_progress_mutation_ratio`, is flagged at high severity.
#[must_use]
pub fn no_progress_loops(log: &ActionLog, t: &DetectionThresholds) -> Vec<LoopDetection> {
    let mut phases: Vec<(&str, Vec<&Action>)> = Vec::new();
    for action in log.recent(t.no_progress_window) {
        match phases.iter_mut().find(|(phase, _)| *phase == action.phase) {
            Some((_, actions)) => actions.push(action),
            None => phases.push((action.phase.as_str(), vec![action])),
        }
    }

    phases
        .into_iter()
        .filter(|(_, actions)| actions.len() >= t.no_progress_min_actions)
        .filter_map(|(phase, actions)| {
            let mutations = actions.iter().filter(|a| a.is_mutating()).count();
            let ratio = mutations as f64 / actions.len() as f64;
            if ratio >= t.no_progress_mutation_ratio {
                return None;
            }
            Some(LoopDetection {
                loop_type: LoopType::NoProgressLoop,
                severity: Severity::High,
                description: format!("{} phase running repeatedly without making changes", phase),
                evidence: vec![
                    format!("Phase: {}", phase),
                    format!("Actions: {}", actions.len()),
                    format!("Modifications: {} ({:.0}%)", mutations, ratio * 100.0),
                    format!("Read-only actions: {}", actions.len() - mutations),
                ],
                suggestion: format!(
                    "Phase {} is stuck in analysis. Force a transition to the next phase or \
                     ask for guidance.",
                    phase
                ),
                actions_involved: owned(&actions),
            })
        })
        .collect()
}
