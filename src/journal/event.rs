use crate::perms::Ownership;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Rule number that owns a group of journal events.
pub type RuleId = u32;

/// Identifier of one journal event: the owning rule plus a per-rule sequence.
///
/// Ordered by rule, then by sequence. Rendered as `RRRR:SSS` with zero
/// padding (`0018:001`); the legacy concatenated form `0018001` is also
/// accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub rule: RuleId,
    pub seq: u32,
}

impl EventId {
    pub fn new(rule: RuleId, seq: u32) -> Self {
        Self { rule, seq }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}:{:03}", self.rule, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventIdError(String);

impl fmt::Display for ParseEventIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid event id '{}' (expected RRRR:SSS or a 7-digit legacy id)",
            self.0
        )
    }
}

impl std::error::Error for ParseEventIdError {}

impl FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseEventIdError(s.to_string());
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

        let (rule, seq) = match s.split_once(':') {
            Some((rule, seq)) => (rule, seq),
            None if s.len() == 7 => s.split_at(4),
            None => return Err(err()),
        };
        if !all_digits(rule) || !all_digits(seq) {
            return Err(err());
        }
        Ok(EventId {
            rule: rule.parse().map_err(|_| err())?,
            seq: seq.parse().map_err(|_| err())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    Installed,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Enabled,
    Disabled,
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageState::Installed => f.write_str("installed"),
            PackageState::Removed => f.write_str("removed"),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Enabled => f.write_str("enabled"),
            ServiceState::Disabled => f.write_str("disabled"),
        }
    }
}

/// The mutation an event describes, with the state needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Change {
    /// File content replaced. The original bytes are retained as a snapshot
    /// owned by the journal.
    FileContent {
        path: PathBuf,
        before: Ownership,
        /// xxh3 of the content written by the fix.
        after_fingerprint: u64,
    },
    Permission {
        path: PathBuf,
        before: Ownership,
        after: Ownership,
    },
    FileCreated {
        path: PathBuf,
    },
    PackageState {
        package: String,
        before: PackageState,
        after: PackageState,
    },
    ServiceState {
        service: String,
        before: ServiceState,
        after: ServiceState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileContentChange,
    PermissionChange,
    FileCreated,
    PackageStateChange,
    ServiceStateChange,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::FileContentChange => "file-content",
            EventKind::PermissionChange => "permission",
            EventKind::FileCreated => "file-created",
            EventKind::PackageStateChange => "package-state",
            EventKind::ServiceStateChange => "service-state",
        };
        f.write_str(name)
    }
}

impl Change {
    pub fn kind(&self) -> EventKind {
        match self {
            Change::FileContent { .. } => EventKind::FileContentChange,
            Change::Permission { .. } => EventKind::PermissionChange,
            Change::FileCreated { .. } => EventKind::FileCreated,
            Change::PackageState { .. } => EventKind::PackageStateChange,
            Change::ServiceState { .. } => EventKind::ServiceStateChange,
        }
    }

    /// Path or identifier of the thing that was changed.
    pub fn target(&self) -> String {
        match self {
            Change::FileContent { path, .. }
            | Change::Permission { path, .. }
            | Change::FileCreated { path } => path.display().to_string(),
            Change::PackageState { package, .. } => package.clone(),
            Change::ServiceState { service, .. } => service.clone(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::FileContent { path, .. } => write!(f, "content of {}", path.display()),
            Change::Permission {
                path,
                before,
                after,
            } => write!(f, "{} {} -> {}", path.display(), before, after),
            Change::FileCreated { path } => write!(f, "created {}", path.display()),
            Change::PackageState {
                package,
                before,
                after,
            } => write!(f, "package {package} {before} -> {after}"),
            Change::ServiceState {
                service,
                before,
                after,
            } => write!(f, "service {service} {before} -> {after}"),
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: EventId,
    pub change: Change,
}
