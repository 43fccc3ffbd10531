//! Rewriter: apply a [`FixSet`] to a line sequence.
//!
//! Removals run first, then stale lines of replaced keys are dropped, then a
//! single marker comment and the corrected lines are appended. Comments,
//! blank lines and ambiguous lines are never touched and keep their relative
//! order.

use crate::grammar::{Grammar, LineMatch};
use crate::lines::LineRecord;
use crate::reconcile::{Fix, FixSet, Removal};

pub const DEFAULT_TOOL: &str = "kv-remediate";

/// Produces corrected line sequences for one grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewriter {
    grammar: Grammar,
    marker: String,
}

impl Rewriter {
    pub fn new(grammar: Grammar) -> Self {
        Self::with_tool(grammar, DEFAULT_TOOL)
    }

    /// Use `# added by <tool>` as the marker comment.
    pub fn with_tool(grammar: Grammar, tool: &str) -> Self {
        Self {
            grammar,
            marker: format!("# added by {tool}\n"),
        }
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Return the new line sequence; `lines` is not modified.
    pub fn rewrite(&self, lines: &LineRecord, fixes: &FixSet) -> LineRecord {
        let grammar = self.grammar;
        let mut out = lines.clone();

        out.retain(|line| match grammar.match_line(line) {
            LineMatch::Data { key, value } => match fixes.removeables.get(key) {
                Some(Removal::Key) => false,
                Some(Removal::Elements(items)) => !items.iter().any(|item| item == value),
                None => true,
            },
            _ => true,
        });

        // List fixables only append: their existing elements are still wanted.
        out.retain(|line| match grammar.match_line(line) {
            LineMatch::Data { key, .. } => !matches!(fixes.fixables.get(key), Some(Fix::Value(_))),
            _ => true,
        });

        if !fixes.fixables.is_empty() {
            out.push(self.marker.clone());
            for (key, fix) in &fixes.fixables {
                match fix {
                    Fix::Value(value) => out.push(grammar.format_line(key, value)),
                    Fix::Elements(items) => {
                        for item in items {
                            out.push(grammar.format_line(key, item));
                        }
                    }
                }
            }
        }

        tracing::debug!(
            %grammar,
            before = lines.len(),
            after = out.len(),
            "rewrote lines"
        );
        out
    }
}
