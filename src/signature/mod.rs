//! Error fingerprints and progress tracking.
//!
//! An [`ErrorSignature`] identifies "the same bug" across iterations by its
//! type, message, file and line. Two consumers build on it:
//!
//! - [`ProgressGate`] holds the single current signature and reports whether
//!   it changed this cycle. A change suppresses all loop detection.
//! - [`ProgressTracker`] keeps one signature set per iteration and classifies
//!   the transition between the last two for progress reporting.

pub mod progress;

pub use progress::{BugTransition, ProgressGate, ProgressStats, ProgressTracker, TransitionKind};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error type used when the error carries none.
const DEFAULT_ERROR_TYPE: &str = "RuntimeError";

/// File name used when neither the error nor its traceback names one.
const UNKNOWN_FILE: &str = "unknown";

/// Structural fingerprint of an error.
///
/// Equality and hashing cover all four fields; there is no fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorSignature {
    pub error_type: String,
    pub message: String,
    pub file: String,
    pub line: i64,
}

impl ErrorSignature {
    /// Creates a signature from its parts.
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: i64,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            file: file.into(),
            line,
        }
    }

    /// Builds a signature from a raw error object.
    ///
    /// Reads `type`, `message`, `file`, `line` and `traceback`. When a
    /// Python-style traceback is present, its exception line (`Type: msg`)
    /// overrides type and message, and its innermost `File "...", line N`
    /// frame fills in file and line if the object lacks them.
    ///
    /// Returns `None` for non-object input, for fields of the wrong JSON
    /// type, and for objects carrying no type, message or traceback.
    #[must_use]
    pub fn from_error(error: &Value) -> Option<Self> {
        let obj = error.as_object()?;

        let raw_type = str_field(obj, "type")?;
        let raw_message = str_field(obj, "message")?;
        let raw_file = str_field(obj, "file")?;
        let traceback = str_field(obj, "traceback")?.filter(|t| !t.trim().is_empty());
        let raw_line = match obj.get("line") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_i64()?),
            Some(Value::String(s)) => Some(s.trim().parse::<i64>().ok()?),
            Some(_) => return None,
        };

        if raw_type.is_none() && raw_message.is_none() && traceback.is_none() {
            return None;
        }

        let mut error_type = raw_type.unwrap_or(DEFAULT_ERROR_TYPE).to_string();
        let mut message = raw_message.unwrap_or_default().to_string();
        let mut file = raw_file.unwrap_or(UNKNOWN_FILE).to_string();
        let mut line = raw_line.unwrap_or(0);

        if let Some(tb) = traceback {
            if let Some((tb_type, tb_message)) = exception_line(tb) {
                error_type = tb_type;
                message = tb_message;
            }
            if file == UNKNOWN_FILE || line == 0 {
                if let Some((frame_file, frame_line)) = innermost_frame(tb) {
                    file = frame_file;
                    line = frame_line;
                }
            }
        }

        Some(Self {
            error_type,
            message,
            file,
            line,
        })
    }

    /// First 8 hex characters of the md5 of `type:message:file:line`.
    #[must_use]
    pub fn short_id(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}",
            self.error_type, self.message, self.file, self.line
        );
        let digest = format!("{:x}", md5::compute(content.as_bytes()));
        digest[..8].to_string()
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}:{}",
            self.error_type, self.message, self.file, self.line
        )
    }
}

/// `Some(None)` for an absent or null field, `None` for a non-string one.
fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<Option<&'a str>> {
    match obj.get(key) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.as_str())),
        Some(_) => None,
    }
}

/// The last traceback line that is neither a frame nor the header, split
/// into `(type, message)` at its first colon.
fn exception_line(traceback: &str) -> Option<(String, String)> {
    let last = traceback
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("File") && !l.starts_with("Traceback"))?;
    let (kind, message) = last.split_once(':')?;
    Some((kind.trim().to_string(), message.trim().to_string()))
}

/// File and line of the last `File "path", line N, in fn` frame.
fn innermost_frame(traceback: &str) -> Option<(String, i64)> {
    traceback
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("File"))
        .filter_map(parse_frame)
        .last()
}

fn parse_frame(frame: &str) -> Option<(String, i64)> {
    let mut parts = frame.split(',');
    let file = parts
        .next()?
        .trim_start_matches("File")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    let line = parts
        .next()?
        .trim()
        .strip_prefix("line")?
        .trim()
        .parse::<i64>()
        .ok()?;
    Some((file.to_string(), line))
}
