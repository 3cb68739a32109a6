//! Testing infrastructure for loopguard.
//!
//! - **Fixtures**: [`ActionBuilder`] and helpers producing action sequences
//!   with controllable timestamps
//! - **Assertions**: checks over detector output
//!
//! # Example
//!
//! ```rust
//! use loopguard::detection::{LoopType, PatternDetector};
//! use loopguard::testing::{assert_detected, identical_replacements, log_from};
//!
//! let log = log_from(identical_replacements("foo.py", "def bar():", 5));
//! let detections = PatternDetector::default().detect_all_loops(&log);
//! assert_detected(&detections, LoopType::ModificationLoop);
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
