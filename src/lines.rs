//! Line storage for one configuration file.
//!
//! A [`LineRecord`] holds the raw lines of a file exactly as read, each with
//! its own terminator, so untouched lines are written back byte-for-byte.
//! Commits go through [`atomic_write`]: tempfile in the same directory, fsync,
//! rename. A reader never observes a partially written file.

use crate::perms::Ownership;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The target file could not be read.
///
/// Reconciliation treats this as "no changes computable" (fail-open); callers
/// must still surface it as an audit failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot read {path}: {reason}")]
pub struct UnreadableSource {
    pub path: PathBuf,
    pub kind: io::ErrorKind,
    pub reason: String,
}

impl UnreadableSource {
    fn new(path: &Path, err: &io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    /// True when the file simply does not exist.
    pub fn is_missing(&self) -> bool {
        self.kind == io::ErrorKind::NotFound
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("path has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    fn io(path: &Path, source: io::Error) -> Self {
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Ordered raw lines of a text file, 1:1 with the on-disk bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRecord {
    lines: Vec<String>,
}

impl LineRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split text into lines, keeping each line's terminator.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    /// Read a file fresh from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, UnreadableSource> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| UnreadableSource::new(path, &e))?;
        let text = String::from_utf8(bytes).map_err(|e| {
            UnreadableSource::new(path, &io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        Ok(Self::from_text(&text))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Replace the line at `index`, returning the previous text.
    pub fn set(&mut self, index: usize, line: impl Into<String>) -> Option<String> {
        let slot = self.lines.get_mut(index)?;
        Some(std::mem::replace(slot, line.into()))
    }

    /// Keep only the lines for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.lines.retain(|line| keep(line));
    }

    /// Append a line, terminating it and the current last line if needed.
    pub fn push(&mut self, line: impl Into<String>) {
        if let Some(last) = self.lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        let mut line = line.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.lines.push(line);
    }

    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    /// xxh3 fingerprint of the full content.
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.to_text().as_bytes())
    }

    /// Atomically replace `path` with this content, keeping its permissions.
    pub fn commit(&self, path: impl AsRef<Path>) -> Result<(), WriteError> {
        atomic_write(path.as_ref(), self.to_text().as_bytes(), None)
    }
}

impl<'a> IntoIterator for &'a LineRecord {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Fingerprint raw bytes the same way [`LineRecord::fingerprint`] does.
pub fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// Atomic file write: tempfile + fsync + rename.
///
/// The temp file is created next to `path` so the rename never crosses a
/// filesystem. Ownership comes from `ownership` when given, otherwise from the
/// existing target, otherwise the tempfile default (0600) is widened to 0644.
/// On any failure the temp file is dropped and `path` is unchanged.
pub fn atomic_write(
    path: &Path,
    content: &[u8],
    ownership: Option<Ownership>,
) -> Result<(), WriteError> {
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(WriteError::NoParent(path.to_path_buf())),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| WriteError::io(path, e))?;
    temp.write_all(content).map_err(|e| WriteError::io(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| WriteError::io(path, e))?;

    let target = match ownership {
        Some(owned) => Some(owned),
        None => match Ownership::of(path) {
            Ok(owned) => Some(owned),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(WriteError::io(path, e)),
        },
    };
    let applied = match target {
        Some(owned) => owned.apply(temp.path()),
        None => Ownership::of(temp.path()).and_then(|mut fresh| {
            fresh.mode = 0o644;
            fresh.apply(temp.path())
        }),
    };
    applied.map_err(|e| WriteError::io(path, e))?;

    temp.persist(path).map_err(|e| WriteError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_keeps_terminators() {
        let record = LineRecord::from_text("a=1\n\n# note\r\nlast");
        assert_eq!(record.lines(), ["a=1\n", "\n", "# note\r\n", "last"]);
        assert_eq!(record.to_text(), "a=1\n\n# note\r\nlast");
    }

    #[test]
    fn test_push_terminates_previous_line() {
        let mut record = LineRecord::from_text("a=1");
        record.push("b=2");
        assert_eq!(record.to_text(), "a=1\nb=2\n");
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("x\r\n"), "x");
        assert_eq!(strip_terminator("x\n"), "x");
        assert_eq!(strip_terminator("x"), "x");
    }

    #[test]
    fn test_read_missing_file_is_unreadable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = LineRecord::read(temp_dir.path().join("nope")).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn test_read_invalid_utf8_is_unreadable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("bin");
        fs::write(&file, [0xff, 0xfe, b'\n']).unwrap();
        let err = LineRecord::read(&file).unwrap_err();
        assert_eq!(err.kind, io::ErrorKind::InvalidData);
        assert!(!err.is_missing());
    }

    #[test]
    fn test_commit_replaces_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("sshd_config");
        fs::write(&file, b"PermitRootLogin yes\n").unwrap();

        let mut record = LineRecord::read(&file).unwrap();
        record.set(0, "PermitRootLogin no\n");
        record.commit(&file).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "PermitRootLogin no\n");
        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "no temp file should be left behind");
    }

    #[test]
    #[cfg(unix)]
    fn test_commit_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("exports");
        fs::write(&file, b"all_squash\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).unwrap();

        LineRecord::from_text("/srv *(ro)\n").commit(&file).unwrap();

        assert_eq!(Ownership::of(&file).unwrap().mode, 0o640);
    }

    #[test]
    #[cfg(unix)]
    fn test_new_file_gets_default_mode() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("fresh.conf");
        atomic_write(&file, b"", None).unwrap();
        assert_eq!(Ownership::of(&file).unwrap().mode, 0o644);
    }

    #[test]
    fn test_write_into_missing_directory_fails_cleanly() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("missing/dir/conf");
        let err = LineRecord::from_text("a=b\n").commit(&file).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert!(!file.exists());
    }

    #[test]
    fn test_fingerprint_matches_bytes() {
        let record = LineRecord::from_text("k v\n");
        assert_eq!(record.fingerprint(), fingerprint_bytes(b"k v\n"));
    }
}
