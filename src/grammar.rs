//! Line grammars for key/value configuration files.
//!
//! Exactly three grammars are supported and a grammar is always declared by
//! the caller, never inferred from content:
//!
//! | Grammar        | Example              | Written as        |
//! |----------------|----------------------|-------------------|
//! | `OpenEquals`   | `nfs.lockd.tcp = 1`  | `KEY = VALUE`     |
//! | `ClosedEquals` | `SELINUX=enforcing`  | `KEY=VALUE`       |
//! | `Space`        | `blacklist bluetooth`| `KEY VALUE`       |

use crate::lines::strip_terminator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grammar {
    /// `key = value`
    #[serde(alias = "openeq")]
    OpenEquals,
    /// `key=value`
    #[serde(alias = "closedeq")]
    ClosedEquals,
    /// `key value`
    Space,
}

/// Classification of a single line under a grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch<'a> {
    /// Comment, blank line, or a line without a separator.
    NotData,
    /// A well-formed key/value line.
    Data { key: &'a str, value: &'a str },
    /// Starts with a key but carries extra tokens. Never matched, never edited.
    Ambiguous { key: &'a str },
}

impl<'a> LineMatch<'a> {
    /// The key and value if this is a clean data line with exactly `key`.
    pub fn value_for(&self, key: &str) -> Option<&'a str> {
        match *self {
            LineMatch::Data { key: k, value } if k == key => Some(value),
            _ => None,
        }
    }
}

impl Grammar {
    pub const ALL: [Grammar; 3] = [Grammar::OpenEquals, Grammar::ClosedEquals, Grammar::Space];

    /// Classify `line` (with or without its terminator).
    pub fn match_line<'a>(&self, line: &'a str) -> LineMatch<'a> {
        let body = strip_terminator(line);
        if is_comment_or_blank(body) {
            return LineMatch::NotData;
        }
        match self {
            Grammar::OpenEquals | Grammar::ClosedEquals => match_equals(body),
            Grammar::Space => match_space(body),
        }
    }

    /// Render one data line in this grammar's write format, with terminator.
    pub fn format_line(&self, key: &str, value: &str) -> String {
        let line = match self {
            Grammar::OpenEquals => format!("{key} = {value}"),
            Grammar::ClosedEquals => format!("{key}={value}"),
            Grammar::Space => format!("{key} {value}"),
        };
        // An empty value re-reads as the same key with an empty value.
        let mut line = line.trim_end().to_string();
        line.push('\n');
        line
    }

    pub fn name(&self) -> &'static str {
        match self {
            Grammar::OpenEquals => "open-equals",
            Grammar::ClosedEquals => "closed-equals",
            Grammar::Space => "space",
        }
    }

    pub fn splits_on_equals(&self) -> bool {
        matches!(self, Grammar::OpenEquals | Grammar::ClosedEquals)
    }
}

fn is_comment_or_blank(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn match_equals(body: &str) -> LineMatch<'_> {
    let Some((key, value)) = body.split_once('=') else {
        return LineMatch::NotData;
    };
    let key = key.trim();
    if key.is_empty() {
        return LineMatch::NotData;
    }
    LineMatch::Data {
        key,
        value: value.trim(),
    }
}

fn match_space(body: &str) -> LineMatch<'_> {
    let mut tokens = body.split_whitespace();
    let Some(key) = tokens.next() else {
        return LineMatch::NotData;
    };
    let value = tokens.next().unwrap_or("");
    if tokens.next().is_some() {
        return LineMatch::Ambiguous { key };
    }
    LineMatch::Data { key, value }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Grammar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open-equals" | "openeq" => Ok(Grammar::OpenEquals),
            "closed-equals" | "closedeq" => Ok(Grammar::ClosedEquals),
            "space" => Ok(Grammar::Space),
            other => Err(format!(
                "unknown grammar '{other}' (expected open-equals, closed-equals or space)"
            )),
        }
    }
}
