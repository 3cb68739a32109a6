//! Assertions over detector output.

use crate::detection::{LoopDetection, LoopType, Severity};

/// Assert that a detection of `loop_type` is present and return it.
///
/// # Panics
///
/// Panics listing the detected types if none matches.
pub fn assert_detected(detections: &[LoopDetection], loop_type: LoopType) -> &LoopDetection {
    match detections.iter().find(|d| d.loop_type == loop_type) {
        Some(detection) => detection,
        None => panic!(
            "Expected a {} detection, got: {:?}",
            loop_type,
            detected_types(detections)
        ),
    }
}

/// Assert that no detection of `loop_type` is present.
///
/// # Panics
///
/// Panics if one is found.
pub fn assert_not_detected(detections: &[LoopDetection], loop_type: LoopType) {
    assert!(
        detections.iter().all(|d| d.loop_type != loop_type),
        "Expected no {} detection, got: {:?}",
        loop_type,
        detected_types(detections)
    );
}

/// Assert that detections are ordered critical first.
///
/// # Panics
///
/// Panics if a less severe detection precedes a more severe one.
pub fn assert_sorted_by_severity(detections: &[LoopDetection]) {
    assert!(
        detections
            .windows(2)
            .all(|w| w[0].severity.rank() <= w[1].severity.rank()),
        "Detections not sorted by severity: {:?}",
        detected_types(detections)
    );
}

fn detected_types(detections: &[LoopDetection]) -> Vec<(LoopType, Severity)> {
    detections.iter().map(|d| (d.loop_type, d.severity)).collect()
}
