use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kv_remediate::config::{
    apply_policies, check_policies, load_policies, revert_rule, ApplicationError, PolicyConfig,
    RuleOutcome,
};
use kv_remediate::guard::RootGuard;
use kv_remediate::journal::{ChangeJournal, EventId, NoHost, RuleId};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const JOURNAL_ENV: &str = "KV_REMEDIATE_JOURNAL";
const DEFAULT_JOURNAL_DIR: &str = "/var/lib/kv-remediate";

#[derive(Parser)]
#[command(name = "kv-remediate")]
#[command(about = "Audit and remediate key/value configuration files", long_about = None)]
#[command(version)]
struct Cli {
    /// Log library decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remediate every non-compliant rule and journal the changes
    Apply {
        /// Policy file, or directory of *.toml policy files
        #[arg(short, long)]
        policy: PathBuf,

        /// Directory that policy paths are resolved under
        #[arg(short, long, default_value = "/")]
        root: PathBuf,

        /// Journal directory (default: $KV_REMEDIATE_JOURNAL or /var/lib/kv-remediate)
        #[arg(short, long)]
        journal: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Audit rules without changing anything
    Status {
        /// Policy file, or directory of *.toml policy files
        #[arg(short, long)]
        policy: PathBuf,

        /// Directory that policy paths are resolved under
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
    },

    /// List journaled changes
    History {
        /// Only show changes of this rule
        #[arg(long)]
        rule: Option<RuleId>,

        /// Journal directory (default: $KV_REMEDIATE_JOURNAL or /var/lib/kv-remediate)
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Undo journaled changes
    Revert {
        /// Event to revert (RRRR:SSS)
        #[arg(required_unless_present = "rule", conflicts_with = "rule")]
        event: Option<EventId>,

        /// Revert every change of this rule, newest first
        #[arg(long)]
        rule: Option<RuleId>,

        /// Journal directory (default: $KV_REMEDIATE_JOURNAL or /var/lib/kv-remediate)
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the level picked by --verbose.
    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    match cli.command {
        Commands::Apply {
            policy,
            root,
            journal,
            dry_run,
            diff,
        } => cmd_apply(&policy, &root, journal, dry_run, diff),

        Commands::Status { policy, root } => cmd_status(&policy, &root),

        Commands::History { rule, journal } => cmd_history(rule, journal),

        Commands::Revert {
            event,
            rule,
            journal,
        } => cmd_revert(event, rule, journal),
    }
}

/// Resolve the journal directory.
///
/// Priority order:
/// 1. Explicit --journal flag
/// 2. KV_REMEDIATE_JOURNAL environment variable
/// 3. /var/lib/kv-remediate
fn resolve_journal_dir(cli_journal: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_journal {
        return path;
    }
    match env::var(JOURNAL_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_JOURNAL_DIR),
    }
}

fn open_journal(cli_journal: Option<PathBuf>) -> Result<ChangeJournal> {
    let dir = resolve_journal_dir(cli_journal);
    ChangeJournal::open(&dir)
        .with_context(|| format!("failed to open journal at {}", dir.display()))
}

fn load(policy: &Path) -> Result<Vec<(PathBuf, PolicyConfig)>> {
    Ok(load_policies(policy)?)
}

/// Helper: Show unified diff between original and remediated content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!(
        "{}",
        format!("+++ {} (remediated)", file.display()).dimmed()
    );

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn print_error(rule: RuleId, error: &ApplicationError) {
    eprintln!("{} {:04}: Error - {}", "✗".red(), rule, error);
    if let ApplicationError::Unreadable(unreadable) = error {
        if unreadable.is_missing() {
            eprintln!("  Set `create = true` on the rule to create the file");
        }
    }
}

fn cmd_apply(
    policy: &Path,
    root: &Path,
    journal: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let policies = load(policy)?;

    let journal_dir = resolve_journal_dir(journal);
    let mut journal = if dry_run {
        None
    } else {
        Some(open_journal(Some(journal_dir.clone()))?)
    };
    // The journal directory is off limits in dry runs too.
    let guard = RootGuard::new(root)?.forbid(&journal_dir);

    println!("Root: {}", guard.root().display());
    if dry_run {
        println!("{}", "[DRY RUN - showing what would be remediated]".cyan());
    }
    println!();

    let mut total_remediated = 0;
    let mut total_compliant = 0;
    let mut total_failed = 0;

    for (policy_file, config) in &policies {
        println!("Loading rules from {}...", policy_file.display());

        let results = match journal.as_mut() {
            Some(journal) => apply_policies(config, &guard, journal),
            None => check_policies(config, &guard),
        };

        for (rule, result) in results {
            match result {
                Ok(RuleOutcome::Compliant { file }) => {
                    println!(
                        "{} {:04}: Already compliant: {}",
                        "⊙".yellow(),
                        rule,
                        file.display()
                    );
                    total_compliant += 1;
                }
                Ok(outcome) => {
                    let verb = if dry_run {
                        "Would remediate"
                    } else {
                        "Remediated"
                    };
                    println!(
                        "{} {:04}: {} {}",
                        "✓".green(),
                        rule,
                        verb,
                        outcome.file().display()
                    );
                    if let Some(findings) = outcome.findings() {
                        println!("  {}", findings.to_string().dimmed());
                        if show_diff {
                            if let Some((before, after)) = &findings.content {
                                display_diff(outcome.file(), before, after);
                            }
                        }
                    }
                    if let RuleOutcome::Remediated { events, .. } = &outcome {
                        for id in events {
                            println!("  journaled {}", id.to_string().cyan());
                        }
                    }
                    total_remediated += 1;
                }
                Err(e) => {
                    print_error(rule, &e);
                    total_failed += 1;
                }
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    let label = if dry_run { "to remediate" } else { "remediated" };
    println!("  {} {}", format!("{}", total_remediated).green(), label);
    println!(
        "  {} already compliant",
        format!("{}", total_compliant).yellow()
    );
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(policy: &Path, root: &Path) -> Result<()> {
    let policies = load(policy)?;
    let guard = RootGuard::new(root)?;

    println!("{}", "Compliance Report".bold());
    println!("Root: {}", guard.root().display());
    println!();

    let mut compliant = Vec::new();
    let mut non_compliant = Vec::new();
    let mut failed = Vec::new();

    for (_, config) in &policies {
        let labels: Vec<(RuleId, String)> = config
            .rules
            .iter()
            .map(|rule| (rule.id, rule.label()))
            .collect();
        for (rule, result) in check_policies(config, &guard) {
            let label = labels
                .iter()
                .find(|(id, _)| *id == rule)
                .map(|(_, label)| label.clone())
                .unwrap_or_else(|| format!("{rule:04}"));
            match result {
                Ok(RuleOutcome::Compliant { .. }) => compliant.push(label),
                Ok(outcome) => {
                    let detail = outcome
                        .findings()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    non_compliant.push((label, detail));
                }
                Err(e) => failed.push((label, e.to_string())),
            }
        }
    }

    if !compliant.is_empty() {
        println!(
            "{} {} ({} rules)",
            "✓".green(),
            "COMPLIANT".green().bold(),
            compliant.len()
        );
        for label in &compliant {
            println!("  - {}", label);
        }
        println!();
    }

    if !non_compliant.is_empty() {
        println!(
            "{} {} ({} rules)",
            "⊙".yellow(),
            "NON-COMPLIANT".yellow().bold(),
            non_compliant.len()
        );
        for (label, detail) in &non_compliant {
            println!("  - {} ({})", label, detail.dimmed());
        }
        println!();
    }

    if !failed.is_empty() {
        println!(
            "{} {} ({} rules)",
            "✗".red(),
            "FAILED".red().bold(),
            failed.len()
        );
        for (label, reason) in &failed {
            println!("  - {} ({})", label, reason.dimmed());
        }
        println!();
    }

    if !non_compliant.is_empty() || !failed.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_history(rule: Option<RuleId>, journal: Option<PathBuf>) -> Result<()> {
    let journal = open_journal(journal)?;

    let events: Vec<_> = journal
        .events()
        .iter()
        .filter(|event| rule.is_none_or(|rule| event.id.rule == rule))
        .collect();

    if events.is_empty() {
        println!("{}", "No journaled changes".dimmed());
        return Ok(());
    }

    for event in events {
        println!(
            "{}  {:<14} {}",
            event.id.to_string().cyan(),
            event.change.kind().to_string(),
            event.change
        );
    }

    Ok(())
}

fn cmd_revert(
    event: Option<EventId>,
    rule: Option<RuleId>,
    journal: Option<PathBuf>,
) -> Result<()> {
    let mut journal = open_journal(journal)?;
    let mut host = NoHost;

    let reverted = match (event, rule) {
        (Some(id), _) => vec![journal.revert(id, &mut host)?],
        (None, Some(rule)) => revert_rule(&mut journal, rule, &mut host)?,
        (None, None) => anyhow::bail!("either an event id or --rule is required"),
    };

    if reverted.is_empty() {
        println!("{}", "Nothing to revert".dimmed());
        return Ok(());
    }

    for event in &reverted {
        println!("{} Reverted {}: {}", "✓".green(), event.id, event.change);
    }

    Ok(())
}
