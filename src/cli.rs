use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tfmigrate - apply terraform state migrations safely
#[derive(Parser, Debug)]
#[command(name = "tfmigrate")]
#[command(about = "Plan and apply terraform state migrations, verified by a clean plan")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (default: ./.tfmigrate.json if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Terraform executable (overrides TFMIGRATE_EXEC_PATH)
    #[arg(long, global = true)]
    pub exec_path: Option<String>,

    /// Abort any single terraform invocation after this many seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the migrated state and check that it plans clean
    Plan {
        /// Migration file; without it, every unapplied migration in history mode
        file: Option<PathBuf>,
    },
    /// Plan, then push the migrated state and record it in history
    Apply {
        /// Migration file; without it, every unapplied migration in history mode
        file: Option<PathBuf>,
    },
    /// List migration files
    List {
        #[arg(long, value_enum, default_value_t = ListStatus::All)]
        status: ListStatus,
    },
    /// Edit the migration history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// Forget every applied migration
    Clear,
    /// Forget one applied migration
    Delete {
        /// Migration file name, e.g. 20201012010101_foo.json
        id: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    /// Every migration file
    All,
    /// Files without a history record
    Unapplied,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["tfmigrate"]).is_err());
    }

    #[test]
    fn test_cli_plan_with_file() {
        let cli = Cli::try_parse_from(["tfmigrate", "plan", "tfmigrate/20201012010101_foo.json"])
            .unwrap();
        match cli.command {
            Commands::Plan { file } => {
                assert_eq!(file, Some(PathBuf::from("tfmigrate/20201012010101_foo.json")));
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_cli_apply_history_mode_with_globals() {
        let cli = Cli::try_parse_from([
            "tfmigrate",
            "apply",
            "--config",
            "ci/.tfmigrate.json",
            "--exec-path",
            "tofu",
            "--timeout",
            "600",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Apply { file: None }));
        assert_eq!(cli.config, Some(PathBuf::from("ci/.tfmigrate.json")));
        assert_eq!(cli.exec_path.as_deref(), Some("tofu"));
        assert_eq!(cli.timeout, Some(600));
    }

    #[test]
    fn test_cli_rejects_zero_timeout() {
        assert!(Cli::try_parse_from(["tfmigrate", "--timeout", "0", "plan"]).is_err());
    }

    #[test]
    fn test_cli_list_status() {
        let cli = Cli::try_parse_from(["tfmigrate", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List { status: ListStatus::All }));

        let cli = Cli::try_parse_from(["tfmigrate", "list", "--status", "unapplied"]).unwrap();
        assert!(matches!(cli.command, Commands::List { status: ListStatus::Unapplied }));

        assert!(Cli::try_parse_from(["tfmigrate", "list", "--status", "applied"]).is_err());
    }

    #[test]
    fn test_cli_history_commands() {
        let cli = Cli::try_parse_from(["tfmigrate", "history", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { action: HistoryCommands::Clear }
        ));

        let cli =
            Cli::try_parse_from(["tfmigrate", "history", "delete", "20201012010101_foo.json"])
                .unwrap();
        match cli.command {
            Commands::History {
                action: HistoryCommands::Delete { id },
            } => assert_eq!(id, "20201012010101_foo.json"),
            _ => panic!("Expected History Delete command"),
        }

        assert!(Cli::try_parse_from(["tfmigrate", "history", "delete"]).is_err());
    }
}
