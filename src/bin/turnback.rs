//! # Turnback CLI - inspect and maintain conversation checkpoints
//!
//! Command-line access to the checkpoint namespace a conversation host keeps
//! in a git repository.
//!
//! ## Usage
//! ```bash
//! # Everything in the namespace, newest first
//! turnback list
//!
//! # Checkpoints of one session
//! turnback --session abc status
//!
//! # Put files back the way they were when entry e42 was sent
//! turnback --session abc restore e42
//!
//! # Changed your mind
//! turnback --session abc undo
//!
//! # Drop everything
//! turnback clean --all-sessions
//! ```

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use turnback::utils::format_age;
use turnback::{
    CheckpointRef, PointerKind, RestoreResult, RestoreSource, SystemGit, Turnback, TurnbackBuilder,
};

/// Turnback CLI - worktree checkpoints for branching conversations
#[derive(Parser)]
#[command(name = "turnback")]
#[command(version)]
#[command(about = "Inspect, restore and prune conversation checkpoints stored in git")]
#[command(long_about = None)]
struct Cli {
    /// Path inside the repository (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Session to act on (defaults to the most recently active one)
    #[arg(short, long, global = true, env = "TURNBACK_SESSION")]
    session: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pointers in the namespace
    #[command(alias = "ls")]
    List {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the checkpoint index of a session
    Status,

    /// Capture the worktree and bind it to an entry
    #[command(alias = "cp")]
    Capture {
        /// Conversation entry id
        #[arg(short, long)]
        entry: String,
    },

    /// Restore files to the checkpoint of an entry
    #[command(alias = "rs")]
    Restore {
        /// Conversation entry id
        entry: String,
    },

    /// Undo the last restore
    Undo,

    /// Apply the retention cap now
    Prune {
        /// Cap to apply instead of the configured one
        #[arg(long)]
        max: Option<usize>,
    },

    /// Delete pointers
    Clean {
        /// Delete every session's pointers, not just one
        #[arg(long)]
        all_sessions: bool,
    },

    /// Summarize sessions with pointers in the namespace
    Sessions,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("turnback=debug")
    } else {
        EnvFilter::try_from_env("TURNBACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let mut engine = TurnbackBuilder::new()
        .build(&root_path)
        .with_context(|| format!("cannot open checkpoints in {}", root_path.display()))?;

    match cli.command {
        Commands::List { limit } => cmd_list(&engine, limit),
        Commands::Sessions => cmd_sessions(&engine),
        Commands::Clean { all_sessions: true } => cmd_clean(&mut engine, true),
        command => {
            let session = match cli.session {
                Some(session) => session,
                None => default_session(&engine, matches!(command, Commands::Capture { .. }))?,
            };
            engine
                .attach_session(&session)
                .with_context(|| format!("cannot attach to session {}", session))?;

            match command {
                Commands::Status => cmd_status(&engine),
                Commands::Capture { entry } => cmd_capture(&mut engine, &entry),
                Commands::Restore { entry } => cmd_restore(&mut engine, &entry),
                Commands::Undo => cmd_undo(&mut engine),
                Commands::Prune { max } => cmd_prune(&mut engine, max),
                Commands::Clean { .. } => cmd_clean(&mut engine, false),
                Commands::List { .. } | Commands::Sessions => unreachable!("handled above"),
            }
        }
    }
}

/// Most recently active session, or a fresh one when `allow_new` is set
fn default_session(engine: &Turnback<SystemGit>, allow_new: bool) -> anyhow::Result<String> {
    let newest = engine
        .sessions()?
        .into_iter()
        .find_map(|summary| summary.session);
    match newest {
        Some(session) => Ok(session),
        None if allow_new => Ok(format!("cli-{}", uuid::Uuid::new_v4())),
        None => bail!("no sessions found; pass --session"),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn kind_label(kind: PointerKind) -> ColoredString {
    match kind {
        PointerKind::Checkpoint => "checkpoint".green(),
        PointerKind::BeforeRestore => "backup".yellow(),
        PointerKind::Resume => "resume".cyan(),
        PointerKind::Recovery => "recovery".magenta(),
    }
}

fn print_pointer(pointer: &CheckpointRef) {
    let now = Utc::now();
    let name = &pointer.pointer;
    print!(
        "  {} {:<10} {:>10} ago ",
        pointer.snapshot.short().yellow().bold(),
        kind_label(name.kind),
        format_age(name.created_at(), now).dimmed()
    );
    match &name.session {
        Some(session) => print!("{} ", session.cyan()),
        None => print!("{} ", "(legacy)".dimmed()),
    }
    if let Some(entry) = &name.entry_id {
        print!("{}", entry);
    }
    println!();
}

/// List every pointer, newest first
fn cmd_list(engine: &Turnback<SystemGit>, limit: Option<usize>) -> anyhow::Result<()> {
    let pointers = engine.list()?;
    if pointers.is_empty() {
        println!("{}", "No checkpoints found.".yellow());
        return Ok(());
    }

    println!("{} {}", "Pointers under".blue().bold(), engine.store().namespace().cyan());
    println!();
    let count = limit.unwrap_or(pointers.len()).min(pointers.len());
    for pointer in pointers.iter().take(count) {
        print_pointer(pointer);
    }
    if count < pointers.len() {
        println!("  ... and {} more", pointers.len() - count);
    }
    Ok(())
}

/// Show the session's index and recovery points
fn cmd_status(engine: &Turnback<SystemGit>) -> anyhow::Result<()> {
    let session = engine
        .session()
        .context("no session attached")?;

    println!("{} {}", "Session".blue().bold(), session.session_id().cyan());
    println!("  Worktree: {}", engine.store().worktree().display());
    println!(
        "  Checkpoints: {} (cap {})",
        session.index().len(),
        engine.config().max_checkpoints_per_session
    );
    println!(
        "  Resume point: {}",
        if session.resume_pointer().is_some() { "yes".green() } else { "no".dimmed() }
    );
    let undo = turnback::RestoreCoordinator::undo_available(engine.store(), session.session_id());
    println!("  Undo available: {}", if undo { "yes".green() } else { "no".dimmed() });
    if let Some(recovery) =
        turnback::RestoreCoordinator::latest_recovery(engine.store(), session.session_id())?
    {
        println!("  Recovery point: {}", recovery.name.dimmed());
    }

    let mut entries: Vec<_> = session.index().iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1));
    if !entries.is_empty() {
        println!("\n{}", "Entries:".bold());
        for (entry, pointer) in entries {
            println!("  {} -> {}", entry.yellow(), pointer.dimmed());
        }
    }
    Ok(())
}

fn cmd_capture(engine: &mut Turnback<SystemGit>, entry: &str) -> anyhow::Result<()> {
    let pb = spinner("Capturing worktree...");
    let bound = engine.capture_for_entry(entry);
    pb.finish_and_clear();
    let bound = bound.with_context(|| format!("cannot capture checkpoint for {}", entry))?;

    println!(
        "{} Checkpoint {} bound to {}",
        "✓".green().bold(),
        bound.snapshot.short().yellow().bold(),
        bound.entry_id.cyan()
    );
    println!("  Pointer: {}", bound.pointer.dimmed());
    if !bound.pruned.deleted.is_empty() {
        println!("  Pruned: {} old checkpoint(s)", bound.pruned.deleted.len());
    }
    Ok(())
}

fn print_restore(result: &RestoreResult) {
    println!("{} {}", "✓".green().bold(), result.summary());
    if let Some(backup) = &result.backup_pointer {
        let label = match result.source {
            RestoreSource::Backup => "Recovery",
            _ => "Backup",
        };
        println!("  {}: {}", label, backup.dimmed());
    }
    for path in &result.removed_paths {
        println!("  {} {}", "-".red(), path);
    }
    println!(
        "  Time: {}",
        humantime::format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
}

fn cmd_restore(engine: &mut Turnback<SystemGit>, entry: &str) -> anyhow::Result<()> {
    let pb = spinner("Restoring files...");
    let result = engine.restore_entry(entry);
    pb.finish_and_clear();
    let result = result.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    print_restore(&result);
    Ok(())
}

fn cmd_undo(engine: &mut Turnback<SystemGit>) -> anyhow::Result<()> {
    let pb = spinner("Undoing last restore...");
    let result = engine.undo();
    pb.finish_and_clear();
    let result = result.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    print_restore(&result);
    Ok(())
}

fn cmd_prune(engine: &mut Turnback<SystemGit>, max: Option<usize>) -> anyhow::Result<()> {
    let report = engine.prune(max)?;
    if report.deleted.is_empty() {
        println!("{}", "Nothing to prune.".green());
    } else {
        println!("{} Pruned {} checkpoint(s)", "✓".green().bold(), report.deleted.len());
        for name in &report.deleted {
            println!("  {} {}", "-".red(), name.dimmed());
        }
    }
    if report.failures > 0 {
        println!("  {} {} deletion(s) failed", "!".yellow().bold(), report.failures);
    }
    Ok(())
}

fn cmd_clean(engine: &mut Turnback<SystemGit>, all_sessions: bool) -> anyhow::Result<()> {
    let deleted = engine.clean(all_sessions)?;
    let scope = match engine.session() {
        Some(session) if !all_sessions => format!("session {}", session.session_id()),
        _ => "all sessions".to_string(),
    };
    println!("{} Deleted {} pointer(s) for {}", "✓".green().bold(), deleted, scope);
    Ok(())
}

fn cmd_sessions(engine: &Turnback<SystemGit>) -> anyhow::Result<()> {
    let sessions = engine.sessions()?;
    if sessions.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return Ok(());
    }

    let now = Utc::now();
    println!("{}", "Sessions:".blue().bold());
    println!();
    for summary in sessions {
        let name = match &summary.session {
            Some(session) => session.cyan(),
            None => "(legacy)".dimmed(),
        };
        let newest = chrono::DateTime::from_timestamp_millis(summary.newest_ms as i64)
            .map(|t| format!("{} ago", format_age(t, now)))
            .unwrap_or_default();
        println!(
            "  {} {} checkpoint(s), {} backup(s), {} resume point(s) {}",
            name,
            summary.checkpoints,
            summary.backups,
            summary.resumes,
            newest.dimmed()
        );
    }
    Ok(())
}
