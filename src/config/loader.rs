use crate::config::schema::{PolicyConfig, ValidationError};
use crate::journal::RuleId;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    NoPolicies {
        path: PathBuf,
    },
    DuplicateRule {
        rule_id: RuleId,
        first: PathBuf,
        second: PathBuf,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read policy from {}: {}", path.display(), source)
            }
            ConfigError::Walk { path, source } => {
                write!(f, "failed to scan {} for policies: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse policy TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse policy TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid policy ({}): {}", path.display(), source),
                None => write!(f, "invalid policy: {}", source),
            },
            ConfigError::NoPolicies { path } => {
                write!(f, "no *.toml policy files found in {}", path.display())
            }
            ConfigError::DuplicateRule {
                rule_id,
                first,
                second,
            } => write!(
                f,
                "rule {} is defined in both {} and {}",
                rule_id,
                first.display(),
                second.display()
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Walk { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::NoPolicies { .. } | ConfigError::DuplicateRule { .. } => None,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PolicyConfig, ConfigError> {
    let config: PolicyConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PolicyConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Policy files named by `path`: the file itself, or the `*.toml` files
/// directly inside a directory, sorted by name.
pub fn policy_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let path = path.as_ref();
    let meta = fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ConfigError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "toml")
        {
            files.push(entry.into_path());
        }
    }
    if files.is_empty() {
        return Err(ConfigError::NoPolicies {
            path: path.to_path_buf(),
        });
    }
    Ok(files)
}

/// Load every policy under `path`. Rule ids must be unique across files,
/// since the journal groups events by rule.
pub fn load_policies(path: impl AsRef<Path>) -> Result<Vec<(PathBuf, PolicyConfig)>, ConfigError> {
    let mut owners: BTreeMap<RuleId, PathBuf> = BTreeMap::new();
    let mut policies = Vec::new();
    for file in policy_files(path)? {
        let config = load_from_path(&file)?;
        for rule in &config.rules {
            if let Some(first) = owners.insert(rule.id, file.clone()) {
                return Err(ConfigError::DuplicateRule {
                    rule_id: rule.id,
                    first,
                    second: file,
                });
            }
        }
        tracing::debug!(path = %file.display(), rules = config.rules.len(), "loaded policy");
        policies.push((file, config));
    }
    Ok(policies)
}
