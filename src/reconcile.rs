//! Reconciliation: compare desired state with a file's lines.
//!
//! Pure functions from (desired state, lines, grammar) to a [`FixSet`]. No
//! file access happens here; reading and fail-open handling live in
//! [`crate::session`].

use crate::desired::{check_conflicts, DesiredState, DesiredValue, Intent, InvalidInput};
use crate::grammar::{Grammar, LineMatch};
use crate::lines::LineRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What must be written for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Fix {
    /// Replace every clean line of the key with one `key value` line.
    Value(String),
    /// Append these list elements; existing elements stay where they are.
    Elements(Vec<String>),
}

/// What must be deleted for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Removal {
    /// Every clean line of the key, whatever its value.
    Key,
    /// Only the lines carrying one of these elements.
    Elements(Vec<String>),
}

/// Keys to write (`fixables`) and keys to delete (`removeables`).
///
/// A key never appears in both maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixSet {
    pub fixables: BTreeMap<String, Fix>,
    pub removeables: BTreeMap<String, Removal>,
}

impl FixSet {
    pub fn is_empty(&self) -> bool {
        self.fixables.is_empty() && self.removeables.is_empty()
    }

    /// Number of individual lines to add or delete.
    pub fn change_count(&self) -> usize {
        let fixes: usize = self
            .fixables
            .values()
            .map(|fix| match fix {
                Fix::Value(_) => 1,
                Fix::Elements(items) => items.len(),
            })
            .sum();
        let removals: usize = self
            .removeables
            .values()
            .map(|removal| match removal {
                Removal::Key => 1,
                Removal::Elements(items) => items.len(),
            })
            .sum();
        fixes + removals
    }

    fn absorb(&mut self, other: FixSet) {
        for (key, fix) in other.fixables {
            if let (Some(Fix::Elements(existing)), Fix::Elements(more)) =
                (self.fixables.get_mut(&key), &fix)
            {
                extend_unique(existing, more);
                continue;
            }
            self.fixables.insert(key, fix);
        }
        for (key, removal) in other.removeables {
            match (self.removeables.get_mut(&key), &removal) {
                (Some(Removal::Key), _) => continue,
                (Some(Removal::Elements(existing)), Removal::Elements(more)) => {
                    extend_unique(existing, more);
                    continue;
                }
                _ => {}
            }
            self.removeables.insert(key, removal);
        }
    }
}

fn extend_unique(existing: &mut Vec<String>, more: &[String]) {
    for item in more {
        if !existing.contains(item) {
            existing.push(item.clone());
        }
    }
}

impl fmt::Display for FixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            Ok(())
        };
        for (key, fix) in &self.fixables {
            sep(f)?;
            match fix {
                Fix::Value(value) => write!(f, "set {key}={value}")?,
                Fix::Elements(items) => write!(f, "add {key} [{}]", items.join(", "))?,
            }
        }
        for (key, removal) in &self.removeables {
            sep(f)?;
            match removal {
                Removal::Key => write!(f, "remove {key}")?,
                Removal::Elements(items) => write!(f, "remove {key} [{}]", items.join(", "))?,
            }
        }
        if first {
            write!(f, "no changes")?;
        }
        Ok(())
    }
}

/// Compute the fix set for one desired state.
///
/// Invalid desired state is rejected before any line is examined.
pub fn reconcile(
    desired: &DesiredState,
    lines: &LineRecord,
    grammar: Grammar,
) -> Result<FixSet, InvalidInput> {
    desired.validate(grammar)?;
    let parsed: Vec<LineMatch<'_>> = lines.iter().map(|line| grammar.match_line(line)).collect();
    let mut fixes = FixSet::default();

    for (key, value) in desired.entries() {
        match (desired.intent(), value) {
            (Intent::Present, DesiredValue::Scalar(want)) => {
                if !scalar_compliant(&parsed, key, want) {
                    fixes
                        .fixables
                        .insert(key.to_string(), Fix::Value(want.clone()));
                }
            }
            (Intent::Present, DesiredValue::List(items)) => {
                let missing = select_elements(items, |item| !has_element(&parsed, key, item));
                if !missing.is_empty() {
                    fixes
                        .fixables
                        .insert(key.to_string(), Fix::Elements(missing));
                }
            }
            (Intent::Absent, DesiredValue::Scalar(_)) => {
                if parsed.iter().any(|m| m.value_for(key).is_some()) {
                    fixes.removeables.insert(key.to_string(), Removal::Key);
                }
            }
            (Intent::Absent, DesiredValue::List(items)) => {
                let present = select_elements(items, |item| has_element(&parsed, key, item));
                if !present.is_empty() {
                    fixes
                        .removeables
                        .insert(key.to_string(), Removal::Elements(present));
                }
            }
        }
    }

    tracing::debug!(
        intent = %desired.intent(),
        %grammar,
        keys = desired.len(),
        fixables = fixes.fixables.len(),
        removeables = fixes.removeables.len(),
        "reconciled desired state"
    );
    Ok(fixes)
}

/// Reconcile several desired states against the same lines in one pass.
///
/// States that cannot all hold at once are rejected; see [`check_conflicts`].
pub fn reconcile_all(
    states: &[DesiredState],
    lines: &LineRecord,
    grammar: Grammar,
) -> Result<FixSet, InvalidInput> {
    check_conflicts(states, grammar)?;
    for state in states {
        state.validate(grammar)?;
    }
    let mut fixes = FixSet::default();
    for state in states {
        fixes.absorb(reconcile(state, lines, grammar)?);
    }
    Ok(fixes)
}

/// A scalar key is compliant when at least one clean line carries the wanted
/// value and no clean line carries another one.
fn scalar_compliant(parsed: &[LineMatch<'_>], key: &str, want: &str) -> bool {
    let mut found = false;
    for value in parsed.iter().filter_map(|m| m.value_for(key)) {
        if value != want {
            return false;
        }
        found = true;
    }
    found
}

fn has_element(parsed: &[LineMatch<'_>], key: &str, item: &str) -> bool {
    parsed.iter().any(|m| m.value_for(key) == Some(item))
}

fn select_elements(items: &[String], mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for item in items {
        if keep(item) && !selected.contains(item) {
            selected.push(item.clone());
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> LineRecord {
        LineRecord::from_text(text)
    }

    #[test]
    fn test_selinux_both_keys_fixable() {
        let desired = DesiredState::present()
            .with("SELINUX", "permissive")
            .with("SELINUXTYPE", "targeted");
        let fixes = reconcile(
            &desired,
            &lines("SELINUX=disabled\nSELINUXTYPE=mls\n"),
            Grammar::ClosedEquals,
        )
        .unwrap();
        assert_eq!(fixes.fixables.len(), 2);
        assert_eq!(
            fixes.fixables["SELINUX"],
            Fix::Value("permissive".to_string())
        );
        assert!(fixes.removeables.is_empty());
    }

    #[test]
    fn test_compliant_scalar_yields_empty_set() {
        let desired = DesiredState::present().with("ClientAliveInterval", "900");
        let fixes = reconcile(
            &desired,
            &lines("# keepalive\nClientAliveInterval 900\n"),
            Grammar::Space,
        )
        .unwrap();
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_missing_key_is_fixable() {
        let desired = DesiredState::present().with("LOCKD_TCPPORT", "32803");
        let fixes = reconcile(&desired, &lines("# empty\n"), Grammar::ClosedEquals).unwrap();
        assert!(fixes.fixables.contains_key("LOCKD_TCPPORT"));
    }

    #[test]
    fn test_later_conflicting_value_wins() {
        let desired = DesiredState::present().with("key", "right");
        let fixes = reconcile(
            &desired,
            &lines("key=right\nother=1\nkey=wrong\n"),
            Grammar::ClosedEquals,
        )
        .unwrap();
        assert!(fixes.fixables.contains_key("key"));
    }

    #[test]
    fn test_earlier_conflicting_value_also_fails() {
        let desired = DesiredState::present().with("key", "right");
        let fixes = reconcile(
            &desired,
            &lines("key=wrong\nkey=right\n"),
            Grammar::ClosedEquals,
        )
        .unwrap();
        assert!(fixes.fixables.contains_key("key"));
    }

    #[test]
    fn test_commented_key_counts_as_missing() {
        let desired = DesiredState::present().with("PermitRootLogin", "no");
        let fixes = reconcile(&desired, &lines("#PermitRootLogin no\n"), Grammar::Space).unwrap();
        assert!(fixes.fixables.contains_key("PermitRootLogin"));
    }

    #[test]
    fn test_prefix_key_is_not_a_match() {
        let desired = DesiredState::absent().with("root", "");
        let fixes = reconcile(&desired, &lines("rootpw secret\n"), Grammar::Space).unwrap();
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_list_partiality() {
        let desired = DesiredState::present().with("key", vec!["a", "b", "c"]);
        let fixes = reconcile(&desired, &lines("key a\n"), Grammar::Space).unwrap();
        assert_eq!(
            fixes.fixables["key"],
            Fix::Elements(vec!["b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_list_fully_present_is_compliant() {
        let desired = DesiredState::present().with("blacklist", vec!["hisax", "rivafb"]);
        let fixes = reconcile(
            &desired,
            &lines("blacklist rivafb\nblacklist hisax\nblacklist bluetooth\n"),
            Grammar::Space,
        )
        .unwrap();
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_absent_scalar_ignores_value() {
        let desired = DesiredState::absent().with("no_root_squash", "");
        let fixes = reconcile(
            &desired,
            &lines("no_root_squash yes\n"),
            Grammar::Space,
        )
        .unwrap();
        assert_eq!(fixes.removeables["no_root_squash"], Removal::Key);
    }

    #[test]
    fn test_absent_list_only_present_elements() {
        let desired = DesiredState::absent().with("blacklist", vec!["bluetooth", "floppy"]);
        let fixes = reconcile(
            &desired,
            &lines("blacklist bluetooth\nblacklist rivafb\nblacklist hisax\n"),
            Grammar::Space,
        )
        .unwrap();
        assert_eq!(
            fixes.removeables["blacklist"],
            Removal::Elements(vec!["bluetooth".to_string()])
        );
    }

    #[test]
    fn test_ambiguous_line_is_skipped() {
        let text = "rpc.statd 662/tcp extra\n";
        let present = DesiredState::present().with("rpc.statd", "662/tcp");
        let fixes = reconcile(&present, &lines(text), Grammar::Space).unwrap();
        // The ambiguous line neither satisfies nor conflicts.
        assert_eq!(
            fixes.fixables["rpc.statd"],
            Fix::Value("662/tcp".to_string())
        );

        let absent = DesiredState::absent().with("rpc.statd", "");
        let fixes = reconcile(&absent, &lines(text), Grammar::Space).unwrap();
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_invalid_input_rejected_before_scan() {
        let desired = DesiredState::present().with("bad key", "x");
        assert!(reconcile(&desired, &lines("a=b\n"), Grammar::ClosedEquals).is_err());
    }

    #[test]
    fn test_reconcile_all_merges_intents() {
        let present = DesiredState::present().with("STATD_PORT", "662");
        let absent = DesiredState::absent().with("MOUNTD_PORT", "");
        let fixes = reconcile_all(
            &[present, absent],
            &lines("MOUNTD_PORT=892\n"),
            Grammar::ClosedEquals,
        )
        .unwrap();
        assert!(fixes.fixables.contains_key("STATD_PORT"));
        assert!(fixes.removeables.contains_key("MOUNTD_PORT"));
        assert_eq!(fixes.change_count(), 2);
    }

    #[test]
    fn test_reconcile_all_rejects_conflict() {
        let present = DesiredState::present().with("k", "v");
        let absent = DesiredState::absent().with("k", "");
        assert!(reconcile_all(&[present, absent], &lines(""), Grammar::Space).is_err());
    }

    #[test]
    fn test_reconcile_all_rejects_differing_values() {
        let one = DesiredState::present().with("k", "1");
        let two = DesiredState::present().with("k", "2");
        let err = reconcile_all(&[one, two], &lines("k=0\n"), Grammar::ClosedEquals).unwrap_err();
        assert!(err.to_string().contains("different values"));
    }

    #[test]
    fn test_display_summary() {
        let mut fixes = FixSet::default();
        assert_eq!(fixes.to_string(), "no changes");
        fixes
            .fixables
            .insert("k".to_string(), Fix::Value("v".to_string()));
        fixes.removeables.insert("gone".to_string(), Removal::Key);
        assert_eq!(fixes.to_string(), "set k=v, remove gone");
    }
}
