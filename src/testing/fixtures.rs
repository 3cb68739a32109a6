//! Action fixtures with controllable timestamps.
//!
//! Shared by unit tests, integration tests and benchmarks.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::action::{Action, ActionLog, ToolCall};

/// Builder for a single [`Action`].
///
/// Defaults to a successful call in the `coding` phase by agent `main`,
/// stamped with the current time.
///
/// # Example
///
/// ```rust
/// use loopguard::testing::ActionBuilder;
///
/// let action = ActionBuilder::new("str_replace")
///     .phase("debugging")
///     .file("foo.py")
///     .arg("old_str", "def bar():")
///     .build();
/// assert_eq!(action.signature(), "str_replace(file:foo.py,old:def bar():)");
/// ```
#[derive(Debug, Clone)]
pub struct ActionBuilder {
    call: ToolCall,
    timestamp: Option<DateTime<Utc>>,
}

impl ActionBuilder {
    #[must_use]
    pub fn new(tool: &str) -> Self {
        Self {
            call: ToolCall::new("coding", "main", tool),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn phase(mut self, phase: &str) -> Self {
        self.call.phase = phase.to_string();
        self
    }

    #[must_use]
    pub fn agent(mut self, agent: &str) -> Self {
        self.call.agent = agent.to_string();
        self
    }

    #[must_use]
    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.call = self.call.with_file(path);
        self
    }

    /// Sets one argument.
    #[must_use]
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.call.args.insert(key.to_string(), value.into());
        self
    }

    /// Replaces all arguments.
    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.call = self.call.with_args(args);
        self
    }

    #[must_use]
    pub fn result(mut self, result: Value) -> Self {
        self.call = self.call.with_result(result);
        self
    }

    #[must_use]
    pub fn failed(mut self) -> Self {
        self.call = self.call.failed();
        self
    }

    /// Fixes the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn build(self) -> Action {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        self.call.into_action(timestamp)
    }

    /// Builds `count` copies one second apart, starting at the fixed
    /// timestamp or now.
    #[must_use]
    pub fn repeat(self, count: usize) -> Vec<Action> {
        let base = self.timestamp.unwrap_or_else(Utc::now);
        (0..count)
            .map(|i| self.clone().at(base + Duration::seconds(i as i64)).build())
            .collect()
    }
}

/// Restamps `actions` one second apart, starting at `start`.
#[must_use]
pub fn sequential(actions: Vec<Action>, start: DateTime<Utc>) -> Vec<Action> {
    actions
        .into_iter()
        .enumerate()
        .map(|(i, mut action)| {
            action.timestamp = start + Duration::seconds(i as i64);
            action
        })
        .collect()
}

/// Repeats `pattern` until `total` actions exist, one second apart.
#[must_use]
pub fn cycle_of(pattern: &[Action], total: usize) -> Vec<Action> {
    let actions = pattern.iter().cycle().take(total).cloned().collect();
    sequential(actions, Utc::now() - Duration::seconds(total as i64))
}

/// An in-memory log holding `actions` in order.
#[must_use]
pub fn log_from<I: IntoIterator<Item = Action>>(actions: I) -> ActionLog {
    let mut log = ActionLog::new();
    for action in actions {
        log.push(action);
    }
    log
}

/// `count` identical `str_replace` calls on `file` targeting `old_str`.
#[must_use]
pub fn identical_replacements(file: &str, old_str: &str, count: usize) -> Vec<Action> {
    ActionBuilder::new("str_replace")
        .file(file)
        .arg("old_str", old_str)
        .arg("new_str", format!("{old_str} # fixed"))
        .repeat(count)
}

/// A raw error object in the shape the orchestrator reports.
#[must_use]
pub fn error_object(error_type: &str, message: &str, file: &str, line: i64) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::from(error_type));
    map.insert("message".to_string(), Value::from(message));
    map.insert("file".to_string(), Value::from(file));
    map.insert("line".to_string(), Value::from(line));
    Value::Object(map)
}
