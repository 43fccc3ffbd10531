//! Desired state: which keys must be present with which values, or absent.

use crate::grammar::Grammar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Whether the keys of a [`DesiredState`] must exist or must not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Present,
    Absent,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Present => f.write_str("present"),
            Intent::Absent => f.write_str("absent"),
        }
    }
}

/// A single value, or a list for keys that repeat once per element
/// (`blacklist bluetooth`, `blacklist rivafb`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DesiredValue {
    Scalar(String),
    List(Vec<String>),
}

impl DesiredValue {
    fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            DesiredValue::Scalar(v) => std::slice::from_ref(v),
            DesiredValue::List(items) => items,
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for DesiredValue {
    fn from(value: &str) -> Self {
        DesiredValue::Scalar(value.to_string())
    }
}

impl From<String> for DesiredValue {
    fn from(value: String) -> Self {
        DesiredValue::Scalar(value)
    }
}

impl From<Vec<String>> for DesiredValue {
    fn from(items: Vec<String>) -> Self {
        DesiredValue::List(items)
    }
}

impl From<Vec<&str>> for DesiredValue {
    fn from(items: Vec<&str>) -> Self {
        DesiredValue::List(items.into_iter().map(str::to_string).collect())
    }
}

/// Keys with their desired values under one intent.
///
/// The intent applies uniformly to every key of the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    intent: Intent,
    entries: BTreeMap<String, DesiredValue>,
}

impl DesiredState {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            entries: BTreeMap::new(),
        }
    }

    pub fn present() -> Self {
        Self::new(Intent::Present)
    }

    pub fn absent() -> Self {
        Self::new(Intent::Absent)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DesiredValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DesiredValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn from_entries(intent: Intent, entries: BTreeMap<String, DesiredValue>) -> Self {
        Self { intent, entries }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &DesiredValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every key and value against `grammar`.
    ///
    /// Anything that would be written as a line that reads back differently
    /// is rejected, since it would never reach a fixed point.
    pub fn validate(&self, grammar: Grammar) -> Result<(), InvalidInput> {
        let mut issues = Vec::new();
        for (key, value) in &self.entries {
            if let Some(reason) = key_problem(key, grammar) {
                issues.push(InputIssue::Key {
                    key: key.clone(),
                    reason,
                });
            }
            for v in value.values() {
                if let Some(reason) = value_problem(v, self.intent, grammar) {
                    issues.push(InputIssue::Value {
                        key: key.clone(),
                        value: v.to_string(),
                        reason,
                    });
                }
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(InvalidInput { grammar, issues })
        }
    }
}

fn key_problem(key: &str, grammar: Grammar) -> Option<&'static str> {
    if key.is_empty() {
        return Some("key is empty");
    }
    if key.chars().any(char::is_whitespace) {
        return Some("key contains whitespace");
    }
    if key.starts_with('#') {
        return Some("key would be read as a comment");
    }
    if grammar.splits_on_equals() && key.contains('=') {
        return Some("key contains the '=' separator");
    }
    None
}

fn value_problem(value: &str, intent: Intent, grammar: Grammar) -> Option<&'static str> {
    if value.contains(['\n', '\r']) {
        return Some("value contains a line break");
    }
    if grammar.splits_on_equals() && value != value.trim() {
        return Some("value has surrounding whitespace that would be trimmed on read");
    }
    if grammar == Grammar::Space && value.chars().any(char::is_whitespace) {
        return Some(match intent {
            Intent::Present => "value contains whitespace and would be written as an ambiguous line",
            Intent::Absent => "value contains whitespace and can never match a space-separated line",
        });
    }
    None
}

/// Check that several states requested in one pass can all hold at once.
///
/// A key may not be requested under both intents. Present states may share a
/// key only when both give it a list (the lists merge) or the same scalar.
/// Absent states always agree: the key or the named elements go away.
pub fn check_conflicts(states: &[DesiredState], grammar: Grammar) -> Result<(), InvalidInput> {
    let mut issues = Vec::new();
    for (i, a) in states.iter().enumerate() {
        for b in &states[i + 1..] {
            for (key, value) in &a.entries {
                let Some(other) = b.entries.get(key) else {
                    continue;
                };
                let issue = match (a.intent, b.intent) {
                    (Intent::Absent, Intent::Absent) => continue,
                    (Intent::Present, Intent::Present) => match (value, other) {
                        (DesiredValue::List(_), DesiredValue::List(_)) => continue,
                        (DesiredValue::Scalar(x), DesiredValue::Scalar(y)) if x == y => continue,
                        _ => InputIssue::Mismatch { key: key.clone() },
                    },
                    _ => InputIssue::Conflict { key: key.clone() },
                };
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            }
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(InvalidInput { grammar, issues })
    }
}

/// Desired state that cannot be reconciled under the declared grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub grammar: Grammar,
    pub issues: Vec<InputIssue>,
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid desired state for {} grammar: ", self.grammar)?;
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidInput {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputIssue {
    Key {
        key: String,
        reason: &'static str,
    },
    Value {
        key: String,
        value: String,
        reason: &'static str,
    },
    Conflict {
        key: String,
    },
    Mismatch {
        key: String,
    },
}

impl fmt::Display for InputIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputIssue::Key { key, reason } => write!(f, "key '{key}': {reason}"),
            InputIssue::Value { key, value, reason } => {
                write!(f, "key '{key}' value '{value}': {reason}")
            }
            InputIssue::Conflict { key } => {
                write!(f, "key '{key}' is requested both present and absent")
            }
            InputIssue::Mismatch { key } => {
                write!(f, "key '{key}' is requested present with different values")
            }
        }
    }
}
