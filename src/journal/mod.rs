//! Change journal: reversible records of every mutation a fix performs.

pub mod event;
pub mod host;
pub mod store;

pub use event::{
    Change, ChangeEvent, EventId, EventKind, PackageState, ParseEventIdError, RuleId,
    ServiceState,
};
pub use host::{HostControl, HostError, NoHost};
pub use store::{ChangeJournal, JournalError};
