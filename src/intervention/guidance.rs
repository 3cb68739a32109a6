//! Remediation templates for each loop category.
//!
//! Every [`LoopType`] maps to exactly one template through an exhaustive
//! match, so adding a category without a template fails to compile. Empty
//! detection lists and unrecognized type tags get the generic template.

use super::{InterventionPayload, InterventionType};
use crate::action::tools;
use crate::detection::{loop_summary, LoopDetection, LoopType, Severity};

/// Static parts of a remediation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationTemplate {
    /// Banner line, e.g. `ACTION LOOP DETECTED`.
    pub title: &'static str,
    /// One-line description of the situation, if any.
    pub situation: Option<&'static str>,
    /// Numbered steps the agent must take.
    pub steps: &'static [&'static str],
    /// Closing directive.
    pub critical: &'static str,
    pub suggested_tools: &'static [&'static str],
    pub blocked_tools: &'static [&'static str],
}

/// Template for a loop category.
#[must_use]
pub fn template_for(loop_type: LoopType) -> RemediationTemplate {
    match loop_type {
        LoopType::ActionLoop => RemediationTemplate {
            title: "ACTION LOOP DETECTED",
            situation: None,
            steps: &[
                "STOP using the current tool and approach. It is not working.",
                "READ the current file state to see what actually exists.",
                "ANALYZE why the action keeps failing.",
                "TRY a completely different approach: full_file_rewrite instead of \
                 str_replace, read the file before editing to see exact indentation, \
                 change the search pattern, check command output for errors.",
            ],
            critical: "Do NOT repeat the same action again. If no alternative exists, \
                       use the ask tool to request guidance.",
            suggested_tools: &[tools::READ_FILE, tools::SEARCH_CODE, tools::ASK],
            blocked_tools: &[],
        },
        LoopType::ModificationLoop => RemediationTemplate {
            title: "MODIFICATION LOOP DETECTED",
            situation: Some("The file has been modified repeatedly without success."),
            steps: &[
                "READ the file to see its CURRENT state, not what you expect it to be.",
                "VERIFY the code you are replacing still exists.",
                "CHECK the exact indentation in the file.",
                "USE full_file_rewrite instead of str_replace.",
                "CONSULT a specialist if the file is in an inconsistent state.",
            ],
            critical: "Previous attempts may already have changed the code. Do NOT \
                       retry the same replacement.",
            suggested_tools: &[
                tools::READ_FILE,
                tools::FULL_FILE_REWRITE,
                tools::CONSULT_SPECIALIST,
                tools::ASK,
            ],
            blocked_tools: &[tools::STR_REPLACE],
        },
        LoopType::ConversationLoop => RemediationTemplate {
            title: "CONVERSATION LOOP DETECTED",
            situation: Some("You are analyzing the same thing repeatedly without acting."),
            steps: &[
                "STOP gathering information. You have enough.",
                "REVIEW what the previous analyses showed.",
                "DECIDE based on that information.",
                "ACT to implement a solution.",
            ],
            critical: "Do NOT read the same file or run the same command again. Move \
                       from analysis to action.",
            suggested_tools: &[
                tools::STR_REPLACE,
                tools::FULL_FILE_REWRITE,
                tools::CREATE_FILE,
                tools::ASK,
            ],
            blocked_tools: &[tools::READ_FILE, tools::SEARCH_CODE, tools::LIST_DIRECTORY],
        },
        LoopType::CircularDependency => RemediationTemplate {
            title: "CIRCULAR DEPENDENCY DETECTED",
            situation: Some("The modules read so far import each other."),
            steps: &[
                "IDENTIFY the full dependency chain.",
                "BREAK the cycle: move shared code into a separate module, inject the \
                 dependency, or remove the circular reference.",
                "CONSULT a specialist for the refactoring design.",
            ],
            critical: "Do NOT add further imports between the modules in the cycle.",
            suggested_tools: &[
                tools::CONSULT_SPECIALIST,
                tools::CREATE_FILE,
                tools::STR_REPLACE,
                tools::ASK,
            ],
            blocked_tools: &[],
        },
        LoopType::StateCycle => RemediationTemplate {
            title: "STATE CYCLE DETECTED",
            situation: Some("The system is cycling through the same states."),
            steps: &[
                "BREAK the cycle with a fundamentally different approach.",
                "CONSULT a specialist for a fresh perspective.",
                "RECONSIDER whether the current strategy is viable at all.",
                "RESTART with a different strategy.",
            ],
            critical: "The current execution path is circular. Exit it now.",
            suggested_tools: &[tools::CONSULT_SPECIALIST, tools::ASK],
            blocked_tools: &[],
        },
        LoopType::PatternRepetition => RemediationTemplate {
            title: "PATTERN REPETITION DETECTED",
            situation: Some("A multi-step pattern is repeating without progress."),
            steps: &[
                "STOP the current sequence of actions.",
                "ANALYZE why the pattern is not working.",
                "CONSULT a specialist for a different perspective.",
                "TRY a completely different approach.",
            ],
            critical: "Repeating the same pattern will not produce a different result.",
            suggested_tools: &[tools::CONSULT_SPECIALIST, tools::ASK],
            blocked_tools: &[],
        },
        LoopType::NoProgressLoop => RemediationTemplate {
            title: "NO PROGRESS DETECTED",
            situation: Some("The phase keeps running without changing anything."),
            steps: &[
                "STOP analyzing. The analysis is complete.",
                "MAKE the change the analysis points to.",
                "If no change is needed, FINISH the phase and move to the next one.",
            ],
            critical: "Do NOT run another read-only pass over the same code.",
            suggested_tools: &[
                tools::STR_REPLACE,
                tools::FULL_FILE_REWRITE,
                tools::CREATE_FILE,
                tools::ASK,
            ],
            blocked_tools: &[],
        },
    }
}

const GENERIC: RemediationTemplate = RemediationTemplate {
    title: "LOOP DETECTED",
    situation: None,
    steps: &[
        "STOP the current approach.",
        "ANALYZE what is not working.",
        "TRY a different strategy.",
        "CONSULT a specialist if needed.",
        "ASK for guidance if stuck.",
    ],
    critical: "The current approach is not making progress. Do something different.",
    suggested_tools: &[tools::ASK, tools::CONSULT_SPECIALIST],
    blocked_tools: &[],
};

fn render(template: &RemediationTemplate, summary: &str, target_file: Option<&str>) -> String {
    let mut guidance = format!("{} - INTERVENTION REQUIRED\n\n", template.title);
    guidance.push_str(summary);
    guidance.push_str("\n\n");

    if let Some(file) = target_file {
        guidance.push_str(&format!("Target file: '{}'\n", file));
    }
    if let Some(situation) = template.situation {
        guidance.push_str(situation);
        guidance.push('\n');
    }

    guidance.push_str("\nIMMEDIATE ACTIONS REQUIRED:\n");
    for (i, step) in template.steps.iter().enumerate() {
        guidance.push_str(&format!("{}. {}\n", i + 1, step));
    }
    guidance.push_str(&format!("\nCRITICAL: {}\n", template.critical));
    guidance
}

fn to_strings(tools: &[&str]) -> Vec<String> {
    tools.iter().map(|t| (*t).to_string()).collect()
}

/// Payload for the most severe detection.
///
/// `detections` must be sorted critical first, as
/// [`PatternDetector::detect_all_loops`](crate::detection::PatternDetector::detect_all_loops)
/// returns them. An empty list yields the generic payload.
#[must_use]
pub fn remediation(detections: &[LoopDetection]) -> InterventionPayload {
    let Some(most_severe) = detections.first() else {
        return generic(detections);
    };

    let template = template_for(most_severe.loop_type);
    let summary = loop_summary(detections);

    let (target_file, blocked_tools) = match most_severe.loop_type {
        LoopType::ActionLoop => (
            None,
            most_severe
                .actions_involved
                .first()
                .map(|a| vec![a.tool.clone()])
                .unwrap_or_default(),
        ),
        LoopType::ModificationLoop => (
            Some(
                most_severe
                    .target_file()
                    .unwrap_or("unknown")
                    .to_string(),
            ),
            to_strings(template.blocked_tools),
        ),
        _ => (None, to_strings(template.blocked_tools)),
    };

    InterventionPayload {
        intervention_type: InterventionType::Loop(most_severe.loop_type),
        severity: most_severe.severity,
        guidance: render(&template, &summary, target_file.as_deref()),
        suggested_tools: to_strings(template.suggested_tools),
        blocked_tools,
        target_file,
        requires_user_input: false,
        detections: detections.iter().map(LoopDetection::summary).collect(),
    }
}

/// Payload for a loop category given by its tag.
///
/// Unrecognized tags get the generic payload.
#[must_use]
pub fn remediation_for_tag(tag: &str, detections: &[LoopDetection]) -> InterventionPayload {
    match tag.parse::<LoopType>() {
        Ok(loop_type) if detections.first().map(|d| d.loop_type) == Some(loop_type) => {
            remediation(detections)
        }
        Ok(loop_type) => {
            let template = template_for(loop_type);
            InterventionPayload {
                intervention_type: InterventionType::Loop(loop_type),
                severity: detections.first().map_or(Severity::Medium, |d| d.severity),
                guidance: render(&template, &loop_summary(detections), None),
                suggested_tools: to_strings(template.suggested_tools),
                blocked_tools: to_strings(template.blocked_tools),
                target_file: None,
                requires_user_input: false,
                detections: detections.iter().map(LoopDetection::summary).collect(),
            }
        }
        Err(_) => generic(detections),
    }
}

/// Fallback payload for missing or unrecognized detections.
#[must_use]
pub fn generic(detections: &[LoopDetection]) -> InterventionPayload {
    InterventionPayload {
        intervention_type: InterventionType::Generic,
        severity: detections.first().map_or(Severity::Medium, |d| d.severity),
        guidance: render(&GENERIC, &loop_summary(detections), None),
        suggested_tools: to_strings(GENERIC.suggested_tools),
        blocked_tools: Vec::new(),
        target_file: None,
        requires_user_input: false,
        detections: detections.iter().map(LoopDetection::summary).collect(),
    }
}

/// Terminal payload once automated interventions are exhausted.
#[must_use]
pub fn escalation(detections: &[LoopDetection], count: u32, max: u32) -> InterventionPayload {
    let mut guidance = String::from("ESCALATION REQUIRED\n\n");
    guidance.push_str(
        "Repeated interventions have failed. The system is stuck in a loop.\n\n",
    );
    guidance.push_str(&loop_summary(detections));
    guidance.push_str("\n\nINTERVENTION HISTORY:\n");
    guidance.push_str(&format!("- Intervention attempts: {}\n", count));
    guidance.push_str(&format!("- Maximum attempts: {}\n", max));
    guidance.push_str("\nREQUIRED ACTION:\nYou MUST use the ask tool to request guidance.\n\n");
    guidance.push_str("Explain:\n");
    guidance.push_str("1. What you have been trying to do\n");
    guidance.push_str("2. Which loops were detected\n");
    guidance.push_str("3. Which interventions were tried\n");
    guidance.push_str("4. What guidance you need to proceed\n");
    guidance.push_str("\nDO NOT attempt any more actions without external input.\n");

    InterventionPayload {
        intervention_type: InterventionType::Escalation,
        severity: Severity::Critical,
        guidance,
        suggested_tools: vec![tools::ASK.to_string()],
        blocked_tools: to_strings(tools::ESCALATION_BLOCKED),
        target_file: None,
        requires_user_input: true,
        detections: detections.iter().map(LoopDetection::summary).collect(),
    }
}
