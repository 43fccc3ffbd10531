use super::event::{Change, ChangeEvent, EventId, RuleId};
use super::host::{HostControl, HostError};
use crate::lines::{atomic_write, fingerprint_bytes, WriteError};
use crate::perms::Ownership;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INDEX_FILE: &str = "journal.json";
const SNAPSHOT_DIR: &str = "snapshots";
const INDEX_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("unknown event id: {0}")]
    UnknownEventId(EventId),

    #[error("file content changes must be recorded with a snapshot: {0}")]
    MissingSnapshot(PathBuf),

    #[error("journal I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("journal write failed: {0}")]
    Write(#[from] WriteError),

    #[error("corrupt journal index {path}: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported journal version {found} in {path}")]
    Version { path: PathBuf, found: u32 },

    #[error("cannot revert {id}: {source}")]
    Host {
        id: EventId,
        #[source]
        source: HostError,
    },
}

impl JournalError {
    fn io(path: &Path, source: io::Error) -> Self {
        JournalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalIndex {
    version: u32,
    /// Next sequence per rule. Never decremented, so ids are not reused.
    next_seq: BTreeMap<RuleId, u32>,
    events: Vec<ChangeEvent>,
}

/// Ordered, persistent log of reversible changes.
///
/// Layout under the journal directory:
///
/// ```text
/// journal.json          index: sequences and events
/// snapshots/RRRR-SSS    original bytes of files changed by FileContent events
/// ```
///
/// Every mutation rewrites the index atomically. One driver per journal
/// directory is assumed; there is no locking.
#[derive(Debug)]
pub struct ChangeJournal {
    dir: PathBuf,
    index: JournalIndex,
}

impl ChangeJournal {
    /// Open (or create) the journal stored in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        let snapshots = dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&snapshots).map_err(|e| JournalError::io(&snapshots, e))?;

        let index_path = dir.join(INDEX_FILE);
        let index = match fs::read(&index_path) {
            Ok(bytes) => {
                let index: JournalIndex =
                    serde_json::from_slice(&bytes).map_err(|source| JournalError::Index {
                        path: index_path.clone(),
                        source,
                    })?;
                if index.version != INDEX_VERSION {
                    return Err(JournalError::Version {
                        path: index_path,
                        found: index.version,
                    });
                }
                index
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => JournalIndex {
                version: INDEX_VERSION,
                ..JournalIndex::default()
            },
            Err(e) => return Err(JournalError::io(&index_path, e)),
        };

        tracing::debug!(dir = %dir.display(), events = index.events.len(), "opened change journal");
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All events, ordered by id.
    pub fn events(&self) -> &[ChangeEvent] {
        &self.index.events
    }

    pub fn len(&self) -> usize {
        self.index.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.events.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&ChangeEvent> {
        self.position(id).map(|pos| &self.index.events[pos])
    }

    /// Ids of every event recorded for `rule`, oldest first.
    pub fn find_by_rule(&self, rule: RuleId) -> Vec<EventId> {
        self.index
            .events
            .iter()
            .filter(|event| event.id.rule == rule)
            .map(|event| event.id)
            .collect()
    }

    /// Append a change that needs no file snapshot.
    ///
    /// File content changes must go through [`record_file_change`](Self::record_file_change).
    pub fn record(&mut self, rule: RuleId, change: Change) -> Result<EventId, JournalError> {
        if let Change::FileContent { path, .. } = &change {
            return Err(JournalError::MissingSnapshot(path.clone()));
        }
        let id = self.allocate(rule);
        self.insert(ChangeEvent { id, change })?;
        tracing::info!(%id, "recorded change");
        Ok(id)
    }

    /// Retain `original` as the snapshot of `path` and append a file content
    /// change. Call before committing the new content.
    pub fn record_file_change(
        &mut self,
        rule: RuleId,
        path: &Path,
        original: &[u8],
        new_content: &[u8],
    ) -> Result<EventId, JournalError> {
        let before = Ownership::of(path).map_err(|e| JournalError::io(path, e))?;
        let id = self.allocate(rule);
        let snapshot = self.snapshot_path(id);
        // Owner-only, owned like the journal itself.
        let snapshot_dir = self.dir.join(SNAPSHOT_DIR);
        let journal_owner =
            Ownership::of(&snapshot_dir).map_err(|e| JournalError::io(&snapshot_dir, e))?;
        let private = Ownership {
            mode: 0o600,
            ..journal_owner
        };
        atomic_write(&snapshot, original, Some(private))?;

        let event = ChangeEvent {
            id,
            change: Change::FileContent {
                path: path.to_path_buf(),
                before,
                after_fingerprint: fingerprint_bytes(new_content),
            },
        };
        if let Err(err) = self.insert(event) {
            let _ = fs::remove_file(&snapshot);
            return Err(err);
        }
        tracing::info!(%id, path = %path.display(), "recorded file content change");
        Ok(id)
    }

    /// Drop an event without reverting it.
    pub fn forget(&mut self, id: EventId) -> Result<ChangeEvent, JournalError> {
        let event = self.remove(&[id])?.remove(0);
        tracing::debug!(%id, "forgot change");
        Ok(event)
    }

    /// Drop the whole history of `rule` without reverting it.
    ///
    /// Used before recomputing a fresh fix so stale entries never accumulate.
    pub fn clear_rule(&mut self, rule: RuleId) -> Result<usize, JournalError> {
        let ids = self.find_by_rule(rule);
        if !ids.is_empty() {
            self.remove(&ids)?;
            tracing::debug!(rule, cleared = ids.len(), "cleared rule history");
        }
        Ok(ids.len())
    }

    /// Restore the target of `id` to its before-state and remove the event.
    ///
    /// Fails with [`JournalError::UnknownEventId`] for ids that were never
    /// recorded or were already reverted. On any other failure the event
    /// stays in the journal.
    pub fn revert(
        &mut self,
        id: EventId,
        host: &mut dyn HostControl,
    ) -> Result<ChangeEvent, JournalError> {
        let event = self
            .get(id)
            .cloned()
            .ok_or(JournalError::UnknownEventId(id))?;

        match &event.change {
            Change::FileContent {
                path,
                before,
                after_fingerprint,
            } => {
                let snapshot = self.snapshot_path(id);
                let original = fs::read(&snapshot).map_err(|e| JournalError::io(&snapshot, e))?;
                match fs::read(path) {
                    Ok(current) if fingerprint_bytes(&current) != *after_fingerprint => {
                        tracing::warn!(
                            %id,
                            path = %path.display(),
                            "file changed since it was fixed; restoring original anyway"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(%id, path = %path.display(), error = %e, "fixed file is unreadable");
                    }
                }
                atomic_write(path, &original, Some(*before))?;
            }
            Change::Permission { path, before, .. } => {
                before.apply(path).map_err(|e| JournalError::io(path, e))?;
            }
            Change::FileCreated { path } => match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(%id, path = %path.display(), "created file is already gone");
                }
                Err(e) => return Err(JournalError::io(path, e)),
            },
            Change::PackageState {
                package, before, ..
            } => host
                .set_package_state(package, *before)
                .map_err(|source| JournalError::Host { id, source })?,
            Change::ServiceState {
                service, before, ..
            } => host
                .set_service_state(service, *before)
                .map_err(|source| JournalError::Host { id, source })?,
        }

        let event = self.remove(&[id])?.remove(0);
        tracing::info!(%id, change = %event.change, "reverted change");
        Ok(event)
    }

    fn allocate(&mut self, rule: RuleId) -> EventId {
        let next = self.index.next_seq.entry(rule).or_insert(1);
        let id = EventId::new(rule, *next);
        *next += 1;
        id
    }

    fn position(&self, id: EventId) -> Option<usize> {
        self.index
            .events
            .binary_search_by(|event| event.id.cmp(&id))
            .ok()
    }

    fn insert(&mut self, event: ChangeEvent) -> Result<(), JournalError> {
        let id = event.id;
        let pos = match self.index.events.binary_search_by(|e| e.id.cmp(&id)) {
            Ok(pos) | Err(pos) => pos,
        };
        self.index.events.insert(pos, event);
        if let Err(err) = self.save() {
            self.index.events.remove(pos);
            return Err(err);
        }
        Ok(())
    }

    /// Remove events from the index and persist it, then drop their
    /// snapshots. If the index cannot be saved the events are put back and
    /// every snapshot is kept.
    fn remove(&mut self, ids: &[EventId]) -> Result<Vec<ChangeEvent>, JournalError> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.position(*id) {
                Some(pos) => removed.push(self.index.events.remove(pos)),
                None => {
                    self.restore(removed);
                    return Err(JournalError::UnknownEventId(*id));
                }
            }
        }
        if let Err(err) = self.save() {
            self.restore(removed);
            return Err(err);
        }

        for event in &removed {
            if !matches!(event.change, Change::FileContent { .. }) {
                continue;
            }
            let snapshot = self.snapshot_path(event.id);
            match fs::remove_file(&snapshot) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(id = %event.id, error = %e, "could not remove snapshot"),
            }
        }
        Ok(removed)
    }

    fn restore(&mut self, events: Vec<ChangeEvent>) {
        for event in events {
            let pos = match self.index.events.binary_search_by(|e| e.id.cmp(&event.id)) {
                Ok(pos) | Err(pos) => pos,
            };
            self.index.events.insert(pos, event);
        }
    }

    fn save(&self) -> Result<(), JournalError> {
        let path = self.dir.join(INDEX_FILE);
        let bytes = serde_json::to_vec_pretty(&self.index).map_err(|source| JournalError::Index {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &bytes, None)?;
        Ok(())
    }

    fn snapshot_path(&self, id: EventId) -> PathBuf {
        self.dir
            .join(SNAPSHOT_DIR)
            .join(format!("{:04}-{:03}", id.rule, id.seq))
    }
}
