//! File ownership and permission bits.
//!
//! Captured before a mutation so the journal can restore them exactly, and
//! enforced by policies that declare an owner or mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Owner, group and permission bits of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only (`0o7777` mask), never the file type.
    pub mode: u32,
}

impl Ownership {
    pub const MODE_MASK: u32 = 0o7777;

    /// Read the current ownership of `path`.
    #[cfg(unix)]
    pub fn of(path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let meta = fs::metadata(path)?;
        Ok(Self {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & Self::MODE_MASK,
        })
    }

    #[cfg(not(unix))]
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
        Ok(Self { uid: 0, gid: 0, mode })
    }

    /// Apply mode, then owner and group if they differ from the current ones.
    ///
    /// Ownership is only changed when needed so that unprivileged callers can
    /// still restore the mode of files they own.
    #[cfg(unix)]
    pub fn apply(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let current = Self::of(path)?;
        if current.uid != self.uid || current.gid != self.gid {
            std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid))?;
        }
        fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
    }

    #[cfg(not(unix))]
    pub fn apply(&self, path: &Path) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(self.mode & 0o222 == 0);
        fs::set_permissions(path, perms)
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {:04o}", self.uid, self.gid, self.mode)
    }
}

/// Parse an octal mode string such as `"0644"`, `"644"` or `"0o600"`.
pub fn parse_mode(input: &str) -> Result<u32, String> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    if digits.is_empty() {
        return Err("mode is empty".to_string());
    }
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| format!("invalid octal mode '{trimmed}': {e}"))?;
    if mode > Ownership::MODE_MASK {
        return Err(format!("mode '{trimmed}' exceeds 7777"));
    }
    Ok(mode)
}
