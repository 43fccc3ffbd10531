//! kv-remediate: key/value configuration auditing and reversible remediation
//!
//! Audits line-oriented configuration files (`KEY=VALUE`, `KEY = VALUE`,
//! `KEY VALUE`) against a desired state, rewrites non-compliant files with
//! the fewest possible line changes, and journals every mutation so it can
//! be undone exactly once.
//!
//! # Architecture
//!
//! Every pass is read, decide, write:
//!
//! - [`LineRecord`] reads a file fresh and keeps each line byte-for-byte.
//! - [`Grammar::match_line`] classifies a line as data, ambiguous or neither.
//! - [`reconcile`] compares a [`DesiredState`] with the lines and yields a
//!   [`FixSet`] of keys to write and keys to delete.
//! - [`Rewriter`] applies the fix set, touching only the affected lines.
//! - [`ChangeJournal`] records the before-state of each committed change and
//!   reverts it on request.
//!
//! # Safety
//!
//! - Atomic file writes (tempfile + fsync + rename), ownership preserved
//! - Unreadable files are reported, never treated as compliant
//! - Comments, blank lines and ambiguous lines are never modified
//! - Idempotent: a second pass over a fixed file is a no-op
//! - Policy paths are confined to a root and kept out of the journal
//!
//! # Example
//!
//! ```no_run
//! use kv_remediate::{reconcile, DesiredState, Grammar, LineRecord, Rewriter};
//!
//! let lines = LineRecord::read("/etc/selinux/config").unwrap();
//! let desired = DesiredState::present().with("SELINUX", "permissive");
//! let fixes = reconcile(&desired, &lines, Grammar::ClosedEquals).unwrap();
//!
//! if !fixes.is_empty() {
//!     let fixed = Rewriter::new(Grammar::ClosedEquals).rewrite(&lines, &fixes);
//!     fixed.commit("/etc/selinux/config").unwrap();
//! }
//! ```

pub mod config;
pub mod desired;
pub mod grammar;
pub mod guard;
pub mod journal;
pub mod lines;
pub mod perms;
pub mod reconcile;
pub mod rewrite;
pub mod session;

// Re-exports
pub use config::{
    apply_policies, check_policies, load_from_path, load_from_str, revert_rule,
    ApplicationError, ConfigError, PolicyConfig, RuleOutcome,
};
pub use desired::{DesiredState, DesiredValue, Intent, InvalidInput};
pub use grammar::{Grammar, LineMatch};
pub use guard::{GuardError, RootGuard};
pub use journal::{
    Change, ChangeEvent, ChangeJournal, EventId, EventKind, HostControl, JournalError, RuleId,
};
pub use lines::{LineRecord, UnreadableSource, WriteError};
pub use perms::Ownership;
pub use reconcile::{reconcile, reconcile_all, Fix, FixSet, Removal};
pub use rewrite::Rewriter;
pub use session::{AuditReport, FileSession};
