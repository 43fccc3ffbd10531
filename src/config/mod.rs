pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_policies, check_policies, revert_rule, ApplicationError, Findings, RuleOutcome,
};
pub use loader::{load_from_path, load_from_str, load_policies, policy_files, ConfigError};
pub use schema::{
    Metadata, Permissions, PolicyConfig, RuleDefinition, ValidationError, ValidationIssue,
    MAX_RULE_ID,
};
