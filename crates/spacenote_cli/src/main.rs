//! Space maintenance CLI.
//!
//! # Responsibility
//! - Create and open Spaces outside the app, printing migration progress.
//! - Inspect and roll back migration state for local testing.

use clap::{Parser, Subcommand};
use spacenote_core::{default_log_level, init_logging, EventLine, SpaceError, SpaceManager};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "spacenote")]
#[command(about = "Maintenance tool for SpaceNote spaces", version)]
struct Cli {
    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "SPACENOTE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, env = "SPACENOTE_LOG_DIR")]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new Space and migrate its store
    Create {
        /// Space directory; must not exist yet
        path: PathBuf,
    },

    /// Open a Space, applying pending migrations
    Open {
        path: PathBuf,
    },

    /// Print every known migration and when it was applied, without migrating
    Status {
        path: PathBuf,
    },

    /// Revert the most recently applied migration
    Rollback {
        path: PathBuf,
    },

    /// Print core ping and version
    Ping,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let command = cli.command.name();
    match run(cli.command) {
        Ok(()) => {
            EventLine::ok("cli_command", "cli")
                .field("command", command)
                .emit();
            ExitCode::SUCCESS
        }
        Err(err) => {
            EventLine::error("cli_command", "cli")
                .field("command", command)
                .field("error_kind", err.kind())
                .field("error", &err)
                .emit();
            eprintln!("error [{}]: {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Open { .. } => "open",
            Self::Status { .. } => "status",
            Self::Rollback { .. } => "rollback",
            Self::Ping => "ping",
        }
    }
}

fn run(command: Commands) -> Result<(), SpaceError> {
    let manager = SpaceManager::with_defaults();
    match command {
        Commands::Create { path } => {
            let report = manager.create(&path)?;
            println!(
                "created {} (applied {} migration(s))",
                path.display(),
                report.applied.len()
            );
        }
        Commands::Open { path } => {
            let space = manager.open_with_progress(&path, &mut |step| {
                println!(
                    "[{}/{}] migration {} {}",
                    step.current, step.total, step.id, step.name
                )
            })?;
            println!("opened {}", space.path().display());
            manager.close(&path)?;
        }
        Commands::Status { path } => {
            for status in manager.inspect_migrations(&path)? {
                match status.applied_at {
                    Some(applied_at) => {
                        println!("{:>4} {:<32} applied_at={applied_at}", status.id, status.name)
                    }
                    None => println!("{:>4} {:<32} pending", status.id, status.name),
                }
            }
        }
        Commands::Rollback { path } => {
            let space = manager.open(&path)?;
            match space.rollback_last_migration()? {
                Some(id) => println!("rolled back migration {id}"),
                None => println!("nothing to roll back"),
            }
            manager.close(&path)?;
        }
        Commands::Ping => {
            println!("spacenote_core ping={}", spacenote_core::ping());
            println!("spacenote_core version={}", spacenote_core::core_version());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn status_parses_path_and_global_flags() {
        let cli = Cli::try_parse_from([
            "spacenote",
            "--log-level",
            "warn",
            "status",
            "/tmp/space",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
        assert_eq!(cli.command.name(), "status");
        assert!(matches!(cli.command, Commands::Status { ref path } if path.ends_with("space")));
    }

    #[test]
    fn status_reads_without_migrating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space");
        super::run(Commands::Create { path: path.clone() }).unwrap();
        super::run(Commands::Status { path: path.clone() }).unwrap();
        assert!(super::run(Commands::Status {
            path: dir.path().join("missing")
        })
        .is_err());
    }
}
