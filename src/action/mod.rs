//! Action history for loop detection.
//!
//! Every tool invocation an agent makes is recorded as an immutable
//! [`Action`] in the append-only [`ActionLog`]. The log is the single
//! source of truth the detectors read from.
//!
//! # Modules
//!
//! - [`log`] - The in-memory log and its pattern queries
//! - [`history`] - JSONL persistence for crash recovery

pub mod history;
pub mod log;

pub use history::HistoryFile;
pub use log::{find_repeating_period, ActionFilter, ActionLog, ActionStatistics, RepeatingPeriod};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Characters of an argument kept in an action signature.
pub const SIGNATURE_SNIPPET_CHARS: usize = 50;

/// Characters of `old_str` compared when looking for repeated edit targets.
pub const TARGET_SNIPPET_CHARS: usize = 100;

/// Tool names the detectors and remediation templates reason about.
pub mod tools {
    pub const STR_REPLACE: &str = "str_replace";
    pub const FULL_FILE_REWRITE: &str = "full_file_rewrite";
    pub const CREATE_FILE: &str = "create_file";
    pub const DELETE_FILE: &str = "delete_file";
    pub const READ_FILE: &str = "read_file";
    pub const SEARCH_CODE: &str = "search_code";
    pub const LIST_DIRECTORY: &str = "list_directory";
    pub const EXECUTE_COMMAND: &str = "execute_command";
    pub const ASK: &str = "ask";
    pub const CONSULT_SPECIALIST: &str = "consult_specialist";

    /// Tools that edit an existing file in place.
    pub const MODIFICATION: &[&str] = &[STR_REPLACE, FULL_FILE_REWRITE];

    /// Tools that write file content.
    pub const FILE_WRITE: &[&str] = &[STR_REPLACE, FULL_FILE_REWRITE, CREATE_FILE];

    /// Tools that change the workspace.
    pub const MUTATING: &[&str] = &[STR_REPLACE, FULL_FILE_REWRITE, CREATE_FILE, DELETE_FILE];

    /// Read-only tools used to analyze the workspace.
    pub const ANALYSIS: &[&str] = &[READ_FILE, SEARCH_CODE, LIST_DIRECTORY, EXECUTE_COMMAND];

    /// Tools a QA review legitimately repeats across many files.
    pub const REVIEW: &[&str] = &[READ_FILE, SEARCH_CODE, LIST_DIRECTORY];

    /// Tools an investigation legitimately repeats while gathering context.
    pub const INVESTIGATION: &[&str] = &[
        READ_FILE,
        SEARCH_CODE,
        LIST_DIRECTORY,
        EXECUTE_COMMAND,
        "investigate_data_flow",
        "investigate_parameter_removal",
        "get_function_signature",
    ];

    /// Tools withheld from an agent once the loop has been escalated.
    pub const ESCALATION_BLOCKED: &[&str] = &[
        STR_REPLACE,
        FULL_FILE_REWRITE,
        CREATE_FILE,
        DELETE_FILE,
        EXECUTE_COMMAND,
    ];
}

/// Returns the longest prefix of `s` holding at most `max_chars` characters.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Rfc3339(DateTime<Utc>),
        EpochSeconds(f64),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Rfc3339(ts) => Ok(ts),
            Repr::EpochSeconds(secs) => from_epoch_seconds(secs)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", secs))),
        }
    }

    pub(super) fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let micros = (secs * 1_000_000.0).round();
        if micros.abs() > i64::MAX as f64 {
            return None;
        }
        DateTime::from_timestamp_micros(micros as i64)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A single recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Written as RFC 3339; float epoch seconds are also accepted on read.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub agent: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub result: Option<Map<String, Value>>,
    #[serde(default)]
    pub file_path: Option<String>,
    pub success: bool,
}

impl Action {
    /// Normalized key identifying the shape of this action.
    ///
    /// Built from the tool name, the file path, and the first 50 characters
    /// of `old_str` and `content` when present, e.g.
    /// `str_replace(file:foo.py,old:def bar():)`.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut parts = Vec::new();
        if let Some(path) = &self.file_path {
            parts.push(format!("file:{}", path));
        }
        if let Some(old) = self.args.get("old_str") {
            let text = value_text(old);
            parts.push(format!("old:{}", truncate_chars(&text, SIGNATURE_SNIPPET_CHARS)));
        }
        if let Some(content) = self.args.get("content") {
            let text = value_text(content);
            parts.push(format!(
                "content:{}",
                truncate_chars(&text, SIGNATURE_SNIPPET_CHARS)
            ));
        }
        format!("{}({})", self.tool, parts.join(","))
    }

    /// Returns a string argument by name.
    #[must_use]
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// The edit target (`old_str` truncated to 100 characters), if any.
    #[must_use]
    pub fn edit_target(&self) -> Option<String> {
        self.args
            .get("old_str")
            .map(|v| truncate_chars(&value_text(v), TARGET_SNIPPET_CHARS).to_string())
    }

    /// The `content` field of the tool result, if any.
    #[must_use]
    pub fn result_content(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("content"))
            .and_then(Value::as_str)
    }

    /// True for in-place edits (`str_replace`, `full_file_rewrite`).
    #[must_use]
    pub fn is_modification(&self) -> bool {
        tools::MODIFICATION.contains(&self.tool.as_str())
    }

    /// True for any tool that changes the workspace.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        tools::MUTATING.contains(&self.tool.as_str())
    }

    /// True for read-only analysis tools.
    #[must_use]
    pub fn is_analysis(&self) -> bool {
        tools::ANALYSIS.contains(&self.tool.as_str())
    }
}

/// A tool invocation about to be recorded.
///
/// ```rust
/// use loopguard::action::ToolCall;
/// use serde_json::json;
///
/// let call = ToolCall::new("coding", "main", "str_replace")
///     .with_args(json!({"old_str": "def bar():", "new_str": "def bar(x):"}))
///     .with_file("foo.py")
///     .failed();
/// assert!(!call.success);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub phase: String,
    pub agent: String,
    pub tool: String,
    pub args: Map<String, Value>,
    pub result: Option<Map<String, Value>>,
    pub file_path: Option<String>,
    pub success: bool,
}

impl ToolCall {
    /// Creates a successful call with no arguments.
    pub fn new(phase: impl Into<String>, agent: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            agent: agent.into(),
            tool: tool.into(),
            args: Map::new(),
            result: None,
            file_path: None,
            success: true,
        }
    }

    /// Sets the arguments. A non-object value is stored under `value`.
    #[must_use]
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = into_map(args);
        self
    }

    /// Sets the tool result. A non-object value is stored under `value`.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(into_map(result));
        self
    }

    /// Sets the file the call operated on.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets whether the call succeeded.
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Marks the call as failed.
    #[must_use]
    pub fn failed(self) -> Self {
        self.with_success(false)
    }

    /// Stamps the call into an [`Action`].
    #[must_use]
    pub fn into_action(self, timestamp: DateTime<Utc>) -> Action {
        Action {
            timestamp,
            phase: self.phase,
            agent: self.agent,
            tool: self.tool,
            args: self.args,
            result: self.result,
            file_path: self.file_path,
            success: self.success,
        }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_accepts_epoch_seconds() {
        let line = json!({
            "timestamp": 1_700_000_000.25,
            "phase": "coding",
            "agent": "main",
            "tool": "read_file",
            "args": {"file_path": "a.py"},
            "result": null,
            "file_path": "a.py",
            "success": true
        });
        let action: Action = serde_json::from_value(line).unwrap();
        assert_eq!(action.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(action.timestamp.timestamp_subsec_millis(), 250);
        assert!(action.result.is_none());

        let whole: Action = serde_json::from_value(json!({
            "timestamp": 1_700_000_000,
            "phase": "coding",
            "agent": "main",
            "tool": "read_file",
            "success": false
        }))
        .unwrap();
        assert_eq!(whole.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_action_timestamp_written_as_rfc3339() {
        let a = action("read_file", json!({}), None);
        let value = serde_json::to_value(&a).unwrap();
        let text = value["timestamp"].as_str().unwrap();
        assert_eq!(DateTime::parse_from_rfc3339(text).unwrap(), a.timestamp);
    }

    #[test]
    fn test_action_rejects_unusable_timestamps() {
        let line = |ts: Value| {
            json!({"timestamp": ts, "phase": "p", "agent": "a", "tool": "t", "success": true})
        };
        assert!(serde_json::from_value::<Action>(line(json!("yesterday"))).is_err());
        assert!(serde_json::from_value::<Action>(line(json!(1e300))).is_err());
        assert!(timestamp::from_epoch_seconds(f64::NAN).is_none());
    }

    fn action(tool: &str, args: Value, file: Option<&str>) -> Action {
        let mut call = ToolCall::new("coding", "main", tool).with_args(args);
        if let Some(f) = file {
            call = call.with_file(f);
        }
        call.into_action(Utc::now())
    }

    #[test]
    fn test_signature_for_replacement() {
        let a = action(
            "str_replace",
            json!({"old_str": "def bar():", "new_str": "def bar(x):"}),
            Some("foo.py"),
        );
        assert_eq!(a.signature(), "str_replace(file:foo.py,old:def bar():)");
    }

    #[test]
    fn test_signature_truncates_long_arguments() {
        let long = "x".repeat(200);
        let a = action("full_file_rewrite", json!({ "content": long }), Some("a.py"));
        let sig = a.signature();
        assert_eq!(sig, format!("full_file_rewrite(file:a.py,content:{})", "x".repeat(50)));
    }

    #[test]
    fn test_signature_without_arguments() {
        let a = action("list_directory", json!({}), None);
        assert_eq!(a.signature(), "list_directory()");
    }

    #[test]
    fn test_signature_ignores_unrelated_arguments() {
        let a = action("read_file", json!({"offset": 10}), Some("a.py"));
        let b = action("read_file", json!({"offset": 99}), Some("a.py"));
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_edit_target_truncates_to_100_chars() {
        let a = action("str_replace", json!({"old_str": "y".repeat(150)}), Some("a.py"));
        assert_eq!(a.edit_target().map(|t| t.len()), Some(100));
        let b = action("full_file_rewrite", json!({"content": "z"}), Some("a.py"));
        assert!(b.edit_target().is_none());
    }

    #[test]
    fn test_tool_classification() {
        let edit = action("str_replace", json!({}), Some("a.py"));
        assert!(edit.is_modification());
        assert!(edit.is_mutating());
        assert!(!edit.is_analysis());

        let create = action("create_file", json!({}), Some("a.py"));
        assert!(!create.is_modification());
        assert!(create.is_mutating());

        let read = action("read_file", json!({}), Some("a.py"));
        assert!(read.is_analysis());
        assert!(!read.is_mutating());
    }

    #[test]
    fn test_tool_call_non_object_args() {
        let call = ToolCall::new("qa", "main", "execute_command").with_args(json!("ls -la"));
        assert_eq!(call.args.get("value"), Some(&json!("ls -la")));
    }

    #[test]
    fn test_action_serializes_field_names() {
        let a = action("read_file", json!({"path": "a.py"}), Some("a.py"));
        let value = serde_json::to_value(&a).unwrap();
        for field in [
            "timestamp", "phase", "agent", "tool", "args", "result", "file_path", "success",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_result_content() {
        let a = ToolCall::new("coding", "main", "read_file")
            .with_file("a.py")
            .with_result(json!({"content": "import b"}))
            .into_action(Utc::now());
        assert_eq!(a.result_content(), Some("import b"));
    }
}
