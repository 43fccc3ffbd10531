//! One read-decide-write pass over a single configuration file.
//!
//! A session reads the file once, reconciles any number of desired states
//! against that snapshot and, when asked, writes the rewritten lines back
//! atomically. An unreadable file never yields a fix set: the audit reports
//! no fixes together with the read failure, and callers must treat that as
//! a failure rather than compliance.

use crate::desired::{check_conflicts, DesiredState, InvalidInput};
use crate::grammar::Grammar;
use crate::journal::{ChangeJournal, EventId, JournalError, RuleId};
use crate::lines::{LineRecord, UnreadableSource, WriteError};
use crate::reconcile::{reconcile_all, FixSet};
use crate::rewrite::Rewriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileSession {
    path: PathBuf,
    grammar: Grammar,
    lines: LineRecord,
    unreadable: Option<UnreadableSource>,
}

/// Result of auditing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub fixes: FixSet,
    pub unreadable: Option<UnreadableSource>,
}

impl AuditReport {
    /// Compliant means: readable, and nothing to fix.
    pub fn is_compliant(&self) -> bool {
        self.unreadable.is_none() && self.fixes.is_empty()
    }
}

impl FileSession {
    /// Read `path` fresh. A failed read is kept, not returned.
    pub fn open(path: impl AsRef<Path>, grammar: Grammar) -> Self {
        let path = path.as_ref().to_path_buf();
        let (lines, unreadable) = match LineRecord::read(&path) {
            Ok(lines) => (lines, None),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "source unreadable");
                (LineRecord::new(), Some(err))
            }
        };
        Self {
            path,
            grammar,
            lines,
            unreadable,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn lines(&self) -> &LineRecord {
        &self.lines
    }

    pub fn unreadable(&self) -> Option<&UnreadableSource> {
        self.unreadable.as_ref()
    }

    /// Reconcile `states` against the lines read at open.
    ///
    /// Desired state is validated even when the file could not be read.
    pub fn audit(&self, states: &[DesiredState]) -> Result<AuditReport, InvalidInput> {
        if let Some(unreadable) = &self.unreadable {
            check_conflicts(states, self.grammar)?;
            for state in states {
                state.validate(self.grammar)?;
            }
            return Ok(AuditReport {
                fixes: FixSet::default(),
                unreadable: Some(unreadable.clone()),
            });
        }

        let fixes = reconcile_all(states, &self.lines, self.grammar)?;
        Ok(AuditReport {
            fixes,
            unreadable: None,
        })
    }

    /// The corrected lines, or `None` when there is nothing to change.
    pub fn plan(&self, fixes: &FixSet, rewriter: &Rewriter) -> Option<LineRecord> {
        if fixes.is_empty() || self.unreadable.is_some() {
            return None;
        }
        Some(rewriter.rewrite(&self.lines, fixes))
    }

    /// Atomically write `planned` without journaling.
    pub fn commit(&self, planned: &LineRecord) -> Result<(), WriteError> {
        planned.commit(&self.path)?;
        tracing::info!(path = %self.path.display(), "committed file");
        Ok(())
    }

    /// Snapshot the original content into `journal`, then commit `planned`.
    ///
    /// If the commit fails the journal entry is dropped again, so the
    /// journal never references a change that did not happen.
    pub fn commit_journaled(
        &self,
        planned: &LineRecord,
        journal: &mut ChangeJournal,
        rule: RuleId,
    ) -> Result<EventId, JournalError> {
        let original = self.lines.to_text();
        let new_content = planned.to_text();
        let id = journal.record_file_change(
            rule,
            &self.path,
            original.as_bytes(),
            new_content.as_bytes(),
        )?;

        if let Err(err) = planned.commit(&self.path) {
            if let Err(forget_err) = journal.forget(id) {
                tracing::warn!(%id, error = %forget_err, "could not drop journal entry after failed commit");
            }
            return Err(err.into());
        }
        tracing::info!(%id, path = %self.path.display(), "committed file");
        Ok(id)
    }
}
