use crate::desired::{check_conflicts, DesiredState, DesiredValue, Intent, InvalidInput};
use crate::grammar::Grammar;
use crate::journal::RuleId;
use crate::perms::{parse_mode, Ownership};
use crate::rewrite::DEFAULT_TOOL;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Highest rule number that still fits the four-digit event id prefix.
pub const MAX_RULE_ID: RuleId = 9999;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PolicyConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if rule.id == 0 || rule.id > MAX_RULE_ID {
                issues.push(ValidationIssue::InvalidId { rule_id: rule.id });
            }
            if !seen.insert(rule.id) {
                issues.push(ValidationIssue::DuplicateId { rule_id: rule.id });
            }
            if rule.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: rule.id,
                    field: "file",
                });
            }
            if rule.present.is_empty() && rule.absent.is_empty() && rule.permissions.is_none() {
                issues.push(ValidationIssue::NothingToEnforce { rule_id: rule.id });
            }
            if let Some(permissions) = &rule.permissions {
                if let Err(message) = permissions.validate() {
                    issues.push(ValidationIssue::InvalidPermissions {
                        rule_id: rule.id,
                        message,
                    });
                }
            }
            if let Err(source) = rule.validate_desired() {
                issues.push(ValidationIssue::InvalidDesired {
                    rule_id: rule.id,
                    source,
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Name written into the marker comment above appended lines.
    #[serde(default)]
    pub tool: Option<String>,
}

impl Metadata {
    pub fn tool(&self) -> &str {
        match self.tool.as_deref().map(str::trim) {
            Some(tool) if !tool.is_empty() => tool,
            _ => DEFAULT_TOOL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDefinition {
    pub id: RuleId,
    #[serde(default)]
    pub name: String,
    pub file: String,
    pub grammar: Grammar,
    /// Create the file when it does not exist.
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub present: BTreeMap<String, DesiredValue>,
    #[serde(default)]
    pub absent: BTreeMap<String, DesiredValue>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

impl RuleDefinition {
    /// Desired states in reconciliation order: present, then absent.
    pub fn desired_states(&self) -> Vec<DesiredState> {
        let mut states = Vec::new();
        if !self.present.is_empty() {
            states.push(DesiredState::from_entries(
                Intent::Present,
                self.present.clone(),
            ));
        }
        if !self.absent.is_empty() {
            states.push(DesiredState::from_entries(Intent::Absent, self.absent.clone()));
        }
        states
    }

    fn validate_desired(&self) -> Result<(), InvalidInput> {
        let states = self.desired_states();
        check_conflicts(&states, self.grammar)?;
        for state in &states {
            state.validate(self.grammar)?;
        }
        Ok(())
    }

    /// `0018 selinux-mode`, or just the number when unnamed.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("{:04}", self.id)
        } else {
            format!("{:04} {}", self.id, self.name)
        }
    }
}

/// Owner and mode a rule enforces on its file. Unset fields are left alone.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
}

impl Permissions {
    pub fn validate(&self) -> Result<(), String> {
        if self.mode.is_none() && self.uid.is_none() && self.gid.is_none() {
            return Err("permissions table sets none of mode, uid, gid".to_string());
        }
        if let Some(mode) = &self.mode {
            parse_mode(mode)?;
        }
        Ok(())
    }

    /// `current` with the enforced fields overridden.
    pub fn target(&self, current: Ownership) -> Result<Ownership, String> {
        let mode = match &self.mode {
            Some(mode) => parse_mode(mode)?,
            None => current.mode,
        };
        Ok(Ownership {
            uid: self.uid.unwrap_or(current.uid),
            gid: self.gid.unwrap_or(current.gid),
            mode,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyRuleList,
    InvalidId {
        rule_id: RuleId,
    },
    DuplicateId {
        rule_id: RuleId,
    },
    MissingField {
        rule_id: RuleId,
        field: &'static str,
    },
    NothingToEnforce {
        rule_id: RuleId,
    },
    InvalidPermissions {
        rule_id: RuleId,
        message: String,
    },
    InvalidDesired {
        rule_id: RuleId,
        source: InvalidInput,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "policy contains no rules"),
            ValidationIssue::InvalidId { rule_id } => {
                write!(f, "rule id {rule_id} is out of range (1..={MAX_RULE_ID})")
            }
            ValidationIssue::DuplicateId { rule_id } => {
                write!(f, "rule id {rule_id} is defined more than once")
            }
            ValidationIssue::MissingField { rule_id, field } => {
                write!(f, "rule {rule_id} missing required field '{field}'")
            }
            ValidationIssue::NothingToEnforce { rule_id } => write!(
                f,
                "rule {rule_id} has no present, absent or permissions entries"
            ),
            ValidationIssue::InvalidPermissions { rule_id, message } => {
                write!(f, "rule {rule_id} has invalid permissions: {message}")
            }
            ValidationIssue::InvalidDesired { rule_id, source } => {
                write!(f, "rule {rule_id}: {source}")
            }
        }
    }
}
