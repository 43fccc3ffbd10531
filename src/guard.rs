use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Resolves policy file paths under a root directory.
///
/// Every policy path, absolute or not, is taken relative to the root, so
/// `/etc/ssh/sshd_config` with root `/srv/image` becomes
/// `/srv/image/etc/ssh/sshd_config`. The result must stay inside the root
/// after symlinks are resolved and must not fall in a forbidden directory
/// (the journal's own storage).
#[derive(Debug, Clone)]
pub struct RootGuard {
    root: PathBuf,
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("path is outside root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("path is empty")]
    EmptyPath,

    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RootGuard {
    /// Create a guard for `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, GuardError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| GuardError::Resolve {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root,
            forbidden_paths: Vec::new(),
        })
    }

    /// Refuse any path inside `dir`.
    pub fn forbid(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        self.forbidden_paths.push(dir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a policy path onto the root.
    ///
    /// The file itself need not exist yet (rules may create it); the deepest
    /// existing ancestor is canonicalized and checked instead.
    pub fn resolve(&self, file: &str) -> Result<PathBuf, GuardError> {
        let mut relative = PathBuf::new();
        for component in Path::new(file.trim()).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(GuardError::OutsideRoot {
                        path: PathBuf::from(file),
                        root: self.root.clone(),
                    })
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(GuardError::EmptyPath);
        }

        let candidate = self.root.join(&relative);
        let resolved = canonicalize_existing(&candidate)?;
        self.check(&resolved)?;
        Ok(resolved)
    }

    fn check(&self, path: &Path) -> Result<(), GuardError> {
        if !path.starts_with(&self.root) {
            return Err(GuardError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            });
        }
        for forbidden in &self.forbidden_paths {
            if path.starts_with(forbidden) {
                return Err(GuardError::ForbiddenPath {
                    path: path.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn canonicalize_existing(path: &Path) -> Result<PathBuf, GuardError> {
    let mut existing = path;
    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        existing = parent;
                    }
                    _ => {
                        return Err(GuardError::Resolve {
                            path: path.to_path_buf(),
                            source: e,
                        })
                    }
                }
            }
            Err(source) => {
                return Err(GuardError::Resolve {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_absolute_policy_path_is_rerooted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("etc/selinux")).unwrap();
        fs::write(root.join("etc/selinux/config"), b"").unwrap();

        let guard = RootGuard::new(root).unwrap();
        let resolved = guard.resolve("/etc/selinux/config").unwrap();
        assert_eq!(
            resolved,
            root.canonicalize().unwrap().join("etc/selinux/config")
        );
        assert_eq!(guard.resolve("etc/selinux/config").unwrap(), resolved);
    }

    #[test]
    fn test_missing_file_resolves_under_existing_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(temp_dir.path()).unwrap();
        let resolved = guard.resolve("/etc/exports").unwrap();
        assert!(resolved.starts_with(guard.root()));
        assert!(resolved.ends_with("etc/exports"));
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(temp_dir.path()).unwrap();
        assert!(matches!(
            guard.resolve("etc/../../passwd"),
            Err(GuardError::OutsideRoot { .. })
        ));
        assert!(matches!(guard.resolve("/"), Err(GuardError::EmptyPath)));
    }

    #[test]
    fn test_journal_dir_is_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let journal = root.join("var/lib/kv-remediate");
        fs::create_dir_all(&journal).unwrap();

        let guard = RootGuard::new(root).unwrap().forbid(&journal);
        assert!(matches!(
            guard.resolve("/var/lib/kv-remediate/journal.json"),
            Err(GuardError::ForbiddenPath { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_escape_is_rejected() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("etc")).unwrap();
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, root.join("etc/ssh")).unwrap();

        let guard = RootGuard::new(&root).unwrap();
        assert!(matches!(
            guard.resolve("/etc/ssh/sshd_config"),
            Err(GuardError::OutsideRoot { .. })
        ));
    }
}
