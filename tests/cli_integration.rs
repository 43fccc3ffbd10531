//! Integration tests for the command-line interface
//!
//! Tests apply, status, history and revert against a temporary root

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const SELINUX_BEFORE: &str = "SELINUX=disabled\nSELINUXTYPE=targeted\n";
const SELINUX_AFTER: &str = "SELINUXTYPE=targeted\n# added by kv-remediate\nSELINUX=permissive\n";

struct Setup {
    dir: TempDir,
}

impl Setup {
    /// Root with one SELinux config and a policy file outside the root.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let selinux = dir.path().join("root/etc/selinux");
        fs::create_dir_all(&selinux).unwrap();
        fs::write(selinux.join("config"), SELINUX_BEFORE).unwrap();

        fs::write(
            dir.path().join("policy.toml"),
            r#"[meta]
name = "cli"

[[rules]]
id = 18
name = "selinux-mode"
file = "/etc/selinux/config"
grammar = "closed-equals"

[rules.present]
SELINUX = "permissive"
"#,
        )
        .unwrap();

        Self { dir }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    fn policy(&self) -> PathBuf {
        self.dir.path().join("policy.toml")
    }

    fn journal(&self) -> PathBuf {
        self.dir.path().join("journal")
    }

    fn config_text(&self) -> String {
        fs::read_to_string(self.root().join("etc/selinux/config")).unwrap()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kv-remediate"))
            .args(args)
            .env_remove("KV_REMEDIATE_JOURNAL")
            .env("NO_COLOR", "1")
            .output()
            .unwrap()
    }

    fn apply(&self, extra: &[&str]) -> Output {
        let policy = self.policy();
        let root = self.root();
        let journal = self.journal();
        let mut args = vec![
            "apply",
            "--policy",
            path_str(&policy),
            "--root",
            path_str(&root),
            "--journal",
            path_str(&journal),
        ];
        args.extend_from_slice(extra);
        self.run(&args)
    }

    fn status(&self) -> Output {
        let policy = self.policy();
        let root = self.root();
        self.run(&["status", "--policy", path_str(&policy), "--root", path_str(&root)])
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_apply_help() {
    let setup = Setup::new();
    let output = setup.run(&["apply", "--help"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Remediate every non-compliant rule"));
}

#[test]
fn test_status_reports_non_compliance() {
    let setup = Setup::new();
    let output = setup.status();

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("Compliance Report"));
    assert!(out.contains("NON-COMPLIANT"));
    assert!(out.contains("0018 selinux-mode"));
    assert_eq!(setup.config_text(), SELINUX_BEFORE);
}

#[test]
fn test_apply_then_status_is_compliant() {
    let setup = Setup::new();
    let output = setup.apply(&[]);

    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Remediated"));
    assert!(out.contains("journaled 0018:001"));
    assert!(out.contains("Summary:"));
    assert_eq!(setup.config_text(), SELINUX_AFTER);

    let status = setup.status();
    assert!(status.status.success());
    assert!(stdout(&status).contains("COMPLIANT"));
}

#[test]
fn test_apply_idempotent() {
    let setup = Setup::new();
    setup.apply(&[]);
    let output = setup.apply(&[]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Already compliant"));
    assert_eq!(setup.config_text(), SELINUX_AFTER);
}

#[test]
fn test_apply_dry_run_with_diff() {
    let setup = Setup::new();
    let output = setup.apply(&["--dry-run", "--diff"]);

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("DRY RUN"));
    assert!(out.contains("Would remediate"));
    assert!(out.contains("-SELINUX=disabled"));
    assert!(out.contains("+SELINUX=permissive"));
    assert_eq!(setup.config_text(), SELINUX_BEFORE);
    assert!(!setup.journal().join("journal.json").exists());
}

#[test]
fn test_history_and_revert_by_event() {
    let setup = Setup::new();
    setup.apply(&[]);
    let journal = setup.journal();

    let history = setup.run(&["history", "--journal", path_str(&journal)]);
    assert!(history.status.success());
    let out = stdout(&history);
    assert!(out.contains("0018:001"));
    assert!(out.contains("file-content"));

    let revert = setup.run(&["revert", "0018:001", "--journal", path_str(&journal)]);
    assert!(revert.status.success(), "{}", stderr(&revert));
    assert!(stdout(&revert).contains("Reverted 0018:001"));
    assert_eq!(setup.config_text(), SELINUX_BEFORE);

    // A second revert of the same event fails and changes nothing.
    let again = setup.run(&["revert", "0018001", "--journal", path_str(&journal)]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("unknown event id"));
    assert_eq!(setup.config_text(), SELINUX_BEFORE);
}

#[test]
fn test_revert_by_rule() {
    let setup = Setup::new();
    setup.apply(&[]);
    let journal = setup.journal();

    let output = setup.run(&["revert", "--rule", "18", "--journal", path_str(&journal)]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(setup.config_text(), SELINUX_BEFORE);

    let output = setup.run(&["revert", "--rule", "18", "--journal", path_str(&journal)]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Nothing to revert"));
}

#[test]
fn test_revert_requires_target() {
    let setup = Setup::new();
    let journal = setup.journal();
    let output = setup.run(&["revert", "--journal", path_str(&journal)]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_file_fails_apply() {
    let setup = Setup::new();
    fs::remove_file(setup.root().join("etc/selinux/config")).unwrap();

    let output = setup.apply(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("create = true"));
    assert!(stdout(&output).contains("1 failed"));
}

#[test]
fn test_dry_run_refuses_journal_directory() {
    let setup = Setup::new();
    let journal = setup.root().join("var/lib/kv-remediate");
    fs::create_dir_all(&journal).unwrap();
    fs::write(journal.join("notes.conf"), "mode=old\n").unwrap();
    let policy = setup.dir.path().join("journal-policy.toml");
    fs::write(
        &policy,
        r#"[meta]
name = "journal"

[[rules]]
id = 30
name = "journal-notes"
file = "/var/lib/kv-remediate/notes.conf"
grammar = "closed-equals"

[rules.present]
mode = "new"
"#,
    )
    .unwrap();

    let root = setup.root();
    let output = setup.run(&[
        "apply",
        "--policy",
        path_str(&policy),
        "--root",
        path_str(&root),
        "--journal",
        path_str(&journal),
        "--dry-run",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("forbidden directory"));
    assert!(!stdout(&output).contains("Would remediate"));
    assert_eq!(
        fs::read_to_string(journal.join("notes.conf")).unwrap(),
        "mode=old\n"
    );
}
