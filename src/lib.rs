//! loopguard - Loop detection and intervention for autonomous coding agents
//!
//! Watches the stream of tool calls an LLM agent makes, recognizes when it
//! is stuck repeating itself, and hands back directive guidance (with tools
//! to block and tools to prefer) until it either recovers or a human has to
//! step in.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`action`] - Append-only action log with optional JSONL persistence
//! - [`config`] - Configuration loading and validation
//! - [`detection`] - The seven loop detectors and the phase-aware filter
//! - [`error`] - Custom error types and handling
//! - [`guard`] - The [`LoopGuard`] facade the orchestrator talks to
//! - [`intervention`] - Remediation templates and the escalation state machine
//! - [`signature`] - Error fingerprints, the progress gate and bug transitions
//! - [`testing`] - Testing infrastructure (fixtures, assertions)
//!
//! # Example
//!
//! ```rust
//! use loopguard::action::ToolCall;
//! use loopguard::{GuardConfig, LoopGuard};
//! use serde_json::json;
//!
//! let mut guard = LoopGuard::new(GuardConfig::default());
//! guard.record_action(
//!     ToolCall::new("coding", "main", "str_replace")
//!         .with_file("foo.py")
//!         .with_args(json!({"old_str": "def bar():", "new_str": "def bar(x):"})),
//! );
//! guard.set_current_error(None);
//!
//! if let Some(payload) = guard.check_and_intervene() {
//!     println!("{}", payload.guidance);
//! }
//! ```

pub mod action;
pub mod config;
pub mod detection;
pub mod error;
pub mod guard;
pub mod intervention;
pub mod signature;
pub mod testing;

// Re-export commonly used types
pub use error::{LoopGuardError, Result};

pub use action::{Action, ActionLog, ToolCall};
pub use config::{DetectionThresholds, GuardConfig, InterventionConfig};
pub use detection::{LoopDetection, LoopType, PatternDetector, Severity};
pub use guard::{Assessment, LoopGuard};
pub use intervention::{
    InterventionPayload, InterventionState, InterventionStatus, InterventionSystem,
    InterventionType,
};
pub use signature::{ErrorSignature, ProgressTracker};
