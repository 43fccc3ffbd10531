//! Policy applicator: audits and remediates rules against a root directory.
//!
//! This module provides the per-rule drivers that:
//! - Resolve each rule's file under the root
//! - Audit the file with a fresh read (fail-open: unreadable is a failure)
//! - Clear the rule's stale journal history before remediating
//! - Journal every mutation before or as it happens
//! - Revert a rule's recorded changes, newest first

use crate::config::schema::{PolicyConfig, RuleDefinition};
use crate::desired::InvalidInput;
use crate::guard::{GuardError, RootGuard};
use crate::journal::{
    Change, ChangeEvent, ChangeJournal, EventId, HostControl, JournalError, RuleId,
};
use crate::lines::{atomic_write, LineRecord, UnreadableSource, WriteError};
use crate::perms::Ownership;
use crate::reconcile::{reconcile_all, FixSet};
use crate::rewrite::Rewriter;
use crate::session::FileSession;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What a rule would change, or did change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub fixes: FixSet,
    /// The file does not exist and the rule creates it.
    pub missing: bool,
    /// Current and enforced ownership, when they differ.
    pub permissions: Option<(Ownership, Ownership)>,
    /// Old and new text, when the content changes.
    pub content: Option<(String, String)>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        !self.missing && self.fixes.is_empty() && self.permissions.is_none()
    }
}

impl fmt::Display for Findings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.missing {
            parts.push("create file".to_string());
        }
        if !self.fixes.is_empty() {
            parts.push(self.fixes.to_string());
        }
        if let Some((before, after)) = &self.permissions {
            parts.push(format!("permissions {before} -> {after}"));
        }
        if parts.is_empty() {
            write!(f, "no changes")
        } else {
            write!(f, "{}", parts.join("; "))
        }
    }
}

/// Result of checking or applying a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RuleOutcome should be checked for compliance"]
pub enum RuleOutcome {
    /// Nothing to do.
    Compliant { file: PathBuf },
    /// Check only: the rule would change `file`.
    NonCompliant { file: PathBuf, findings: Findings },
    /// Apply: the rule changed `file` and journaled `events`.
    Remediated {
        file: PathBuf,
        findings: Findings,
        events: Vec<EventId>,
    },
}

impl RuleOutcome {
    pub fn file(&self) -> &Path {
        match self {
            RuleOutcome::Compliant { file }
            | RuleOutcome::NonCompliant { file, .. }
            | RuleOutcome::Remediated { file, .. } => file,
        }
    }

    pub fn findings(&self) -> Option<&Findings> {
        match self {
            RuleOutcome::Compliant { .. } => None,
            RuleOutcome::NonCompliant { findings, .. }
            | RuleOutcome::Remediated { findings, .. } => Some(findings),
        }
    }
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOutcome::Compliant { file } => write!(f, "compliant: {}", file.display()),
            RuleOutcome::NonCompliant { file, findings } => {
                write!(f, "non-compliant: {} ({})", file.display(), findings)
            }
            RuleOutcome::Remediated {
                file,
                findings,
                events,
            } => {
                let ids: Vec<String> = events.iter().map(EventId::to_string).collect();
                write!(
                    f,
                    "remediated: {} ({}) [{}]",
                    file.display(),
                    findings,
                    ids.join(", ")
                )
            }
        }
    }
}

/// Errors while checking or applying a rule.
#[derive(Debug)]
pub enum ApplicationError {
    /// Rule file resolves outside the root or into the journal
    Guard(GuardError),
    /// Rule file could not be read and is not created by the rule
    Unreadable(UnreadableSource),
    /// Desired state cannot be reconciled under the rule's grammar
    InvalidInput(InvalidInput),
    /// Atomic write failed
    Write(WriteError),
    /// Journal could not record or clear an event
    Journal(JournalError),
    /// File creation or permission I/O failed
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// Permissions table could not be turned into an ownership
    Permissions { file: PathBuf, reason: String },
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Guard(e) => write!(f, "path error: {}", e),
            ApplicationError::Unreadable(e) => write!(f, "audit failed: {}", e),
            ApplicationError::InvalidInput(e) => write!(f, "{}", e),
            ApplicationError::Write(e) => write!(f, "write failed: {}", e),
            ApplicationError::Journal(e) => write!(f, "journal error: {}", e),
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::Permissions { file, reason } => {
                write!(f, "invalid permissions for {}: {}", file.display(), reason)
            }
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Guard(e) => Some(e),
            ApplicationError::Unreadable(e) => Some(e),
            ApplicationError::InvalidInput(e) => Some(e),
            ApplicationError::Write(e) => Some(e),
            ApplicationError::Journal(e) => Some(e),
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::Permissions { .. } => None,
        }
    }
}

impl From<GuardError> for ApplicationError {
    fn from(e: GuardError) -> Self {
        ApplicationError::Guard(e)
    }
}

impl From<InvalidInput> for ApplicationError {
    fn from(e: InvalidInput) -> Self {
        ApplicationError::InvalidInput(e)
    }
}

impl From<WriteError> for ApplicationError {
    fn from(e: WriteError) -> Self {
        ApplicationError::Write(e)
    }
}

impl From<JournalError> for ApplicationError {
    fn from(e: JournalError) -> Self {
        ApplicationError::Journal(e)
    }
}

/// Audit every rule without touching the filesystem.
///
/// `NonCompliant` findings are exactly what [`apply_policies`] would do.
pub fn check_policies(
    config: &PolicyConfig,
    guard: &RootGuard,
) -> Vec<(RuleId, Result<RuleOutcome, ApplicationError>)> {
    let rewriter_tool = config.meta.tool();
    config
        .rules
        .iter()
        .map(|rule| {
            let outcome = inspect_rule(rule, guard, rewriter_tool).map(|inspection| {
                if inspection.findings.is_empty() {
                    RuleOutcome::Compliant {
                        file: inspection.path,
                    }
                } else {
                    RuleOutcome::NonCompliant {
                        file: inspection.path,
                        findings: inspection.findings,
                    }
                }
            });
            (rule.id, outcome)
        })
        .collect()
}

/// Remediate every non-compliant rule, journaling each change.
///
/// Compliant rules are left alone and keep their journal history. A
/// non-compliant rule first drops its previous history, so the journal
/// only ever describes the most recent fix of each rule.
pub fn apply_policies(
    config: &PolicyConfig,
    guard: &RootGuard,
    journal: &mut ChangeJournal,
) -> Vec<(RuleId, Result<RuleOutcome, ApplicationError>)> {
    let tool = config.meta.tool();
    config
        .rules
        .iter()
        .map(|rule| (rule.id, apply_rule(rule, guard, tool, journal)))
        .collect()
}

/// Revert every recorded change of `rule`, newest first.
///
/// Stops at the first failure; changes reverted before it stay reverted and
/// the rest stay in the journal.
pub fn revert_rule(
    journal: &mut ChangeJournal,
    rule: RuleId,
    host: &mut dyn HostControl,
) -> Result<Vec<ChangeEvent>, JournalError> {
    let mut reverted = Vec::new();
    for id in journal.find_by_rule(rule).into_iter().rev() {
        reverted.push(journal.revert(id, host)?);
    }
    Ok(reverted)
}

struct Inspection {
    path: PathBuf,
    session: FileSession,
    findings: Findings,
    planned: Option<LineRecord>,
}

fn inspect_rule(
    rule: &RuleDefinition,
    guard: &RootGuard,
    tool: &str,
) -> Result<Inspection, ApplicationError> {
    let path = guard.resolve(&rule.file)?;
    let session = FileSession::open(&path, rule.grammar);
    let rewriter = Rewriter::with_tool(rule.grammar, tool);
    let states = rule.desired_states();
    let report = session.audit(&states)?;

    let mut findings = Findings::default();
    let planned = match report.unreadable {
        Some(unreadable) if unreadable.is_missing() && rule.create => {
            let empty = LineRecord::new();
            findings.missing = true;
            findings.fixes = reconcile_all(&states, &empty, rule.grammar)?;
            Some(rewriter.rewrite(&empty, &findings.fixes))
        }
        Some(unreadable) => return Err(ApplicationError::Unreadable(unreadable)),
        None => {
            findings.fixes = report.fixes;
            session.plan(&findings.fixes, &rewriter)
        }
    };

    if let Some(planned) = &planned {
        findings.content = Some((session.lines().to_text(), planned.to_text()));
    }

    if let (Some(permissions), false) = (&rule.permissions, findings.missing) {
        let current = Ownership::of(&path).map_err(|source| ApplicationError::Io {
            path: path.clone(),
            source,
        })?;
        let target = permissions
            .target(current)
            .map_err(|reason| ApplicationError::Permissions {
                file: path.clone(),
                reason,
            })?;
        if target != current {
            findings.permissions = Some((current, target));
        }
    }

    tracing::debug!(
        rule = rule.id,
        path = %path.display(),
        findings = %findings,
        "inspected rule"
    );
    Ok(Inspection {
        path,
        session,
        findings,
        planned,
    })
}

fn apply_rule(
    rule: &RuleDefinition,
    guard: &RootGuard,
    tool: &str,
    journal: &mut ChangeJournal,
) -> Result<RuleOutcome, ApplicationError> {
    let inspection = inspect_rule(rule, guard, tool)?;
    if inspection.findings.is_empty() {
        return Ok(RuleOutcome::Compliant {
            file: inspection.path,
        });
    }

    let cleared = journal.clear_rule(rule.id)?;
    if cleared > 0 {
        tracing::debug!(rule = rule.id, cleared, "dropped previous fix history");
    }

    let events = if inspection.findings.missing {
        create_file(rule, &inspection, journal)?
    } else {
        update_file(rule.id, &inspection, journal)?
    };

    tracing::info!(rule = rule.id, path = %inspection.path.display(), events = events.len(), "remediated rule");
    Ok(RuleOutcome::Remediated {
        file: inspection.path,
        findings: inspection.findings,
        events,
    })
}

/// Create the file and journal only its creation: deleting the file undoes
/// the content and permissions written here too.
fn create_file(
    rule: &RuleDefinition,
    inspection: &Inspection,
    journal: &mut ChangeJournal,
) -> Result<Vec<EventId>, ApplicationError> {
    let path = &inspection.path;
    let io_err = |source| ApplicationError::Io {
        path: path.clone(),
        source,
    };

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    let id = match journal.record(rule.id, Change::FileCreated { path: path.clone() }) {
        Ok(id) => id,
        Err(err) => {
            let _ = fs::remove_file(path);
            return Err(err.into());
        }
    };

    if let Some(planned) = &inspection.planned {
        atomic_write(path, planned.to_text().as_bytes(), None)?;
    }
    if let Some(permissions) = &rule.permissions {
        let current = Ownership::of(path).map_err(io_err)?;
        let target = permissions
            .target(current)
            .map_err(|reason| ApplicationError::Permissions {
                file: path.clone(),
                reason,
            })?;
        target.apply(path).map_err(io_err)?;
    }
    Ok(vec![id])
}

fn update_file(
    rule: RuleId,
    inspection: &Inspection,
    journal: &mut ChangeJournal,
) -> Result<Vec<EventId>, ApplicationError> {
    let path = &inspection.path;
    let mut events = Vec::new();

    if let Some(planned) = &inspection.planned {
        events.push(inspection.session.commit_journaled(planned, journal, rule)?);
    }

    if let Some((before, after)) = inspection.findings.permissions {
        let id = journal.record(
            rule,
            Change::Permission {
                path: path.clone(),
                before,
                after,
            },
        )?;
        if let Err(source) = after.apply(path) {
            if let Err(err) = journal.forget(id) {
                tracing::warn!(%id, error = %err, "could not drop journal entry after failed chmod");
            }
            return Err(ApplicationError::Io {
                path: path.clone(),
                source,
            });
        }
        events.push(id);
    }
    Ok(events)
}
