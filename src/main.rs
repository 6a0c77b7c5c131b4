//! tfmigrate - main entry point

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tfmigrate::cli::{Cli, Commands, HistoryCommands, ListStatus};
use tfmigrate::config::{DEFAULT_CONFIG_FILE, LOG_ENV, TfmigrateConfig};
use tfmigrate::history::{HistoryController, Storage, list_migration_files};
use tfmigrate::process_guard::{self, CancelToken, ProcessGuard};
use tfmigrate::tfmigrate::{MigrationFile, MigratorOptions};

/// Initialize the logger; `TFMIGRATE_LOG` overrides the default `info` filter
fn init_logger() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logger();
    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    // First signal cancels the in-flight terraform call; a second one exits.
    let cancel = CancelToken::new();
    if let Err(e) = process_guard::init_signal_handlers(cancel.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    match run(cli, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, cancel: CancelToken) -> Result<()> {
    let config = TfmigrateConfig::load_or_default(cli.config.as_deref())?;
    let options = MigratorOptions {
        exec_path: cli.exec_path,
        timeout: cli.timeout.map(Duration::from_secs),
        cancel,
    };

    match cli.command {
        Commands::Plan { file } => run_plan(&config, file.as_deref(), &options),
        Commands::Apply { file } => run_apply(&config, file.as_deref(), &options),
        Commands::List { status } => run_list(&config, status),
        Commands::History { action } => run_history(&config, action),
    }
}

fn history_controller(
    config: &TfmigrateConfig,
) -> Result<Option<HistoryController<Box<dyn Storage>>>> {
    let Some(history) = &config.history else {
        return Ok(None);
    };
    let controller = HistoryController::load(&config.migration_dir, history.storage.new_storage())
        .context("Failed to load migration history")?;
    Ok(Some(controller))
}

fn require_history(config: &TfmigrateConfig) -> Result<HistoryController<Box<dyn Storage>>> {
    history_controller(config)?.with_context(|| {
        format!("no history storage is configured in {}", DEFAULT_CONFIG_FILE)
    })
}

fn file_name(file: Option<&Path>) -> Option<String> {
    file.map(|f| f.to_string_lossy().into_owned())
}

fn load_single(file: Option<&Path>) -> Result<(&Path, MigrationFile)> {
    let file = file.with_context(|| {
        format!(
            "a migration file is required when no history is configured in {}",
            DEFAULT_CONFIG_FILE
        )
    })?;
    let migration = MigrationFile::load_from_file(file)?;
    Ok((file, migration))
}

fn run_plan(config: &TfmigrateConfig, file: Option<&Path>, options: &MigratorOptions) -> Result<()> {
    match history_controller(config)? {
        Some(controller) => {
            let planned = controller.plan(file_name(file).as_deref(), options)?;
            if planned.is_empty() {
                println!("no unapplied migrations");
            }
            for id in planned {
                println!("plan succeeded: {}", id);
            }
        }
        None => {
            let (path, migration) = load_single(file)?;
            migration.migrator(options)?.plan()?;
            println!("plan succeeded: {}", path.display());
        }
    }
    Ok(())
}

fn run_apply(config: &TfmigrateConfig, file: Option<&Path>, options: &MigratorOptions) -> Result<()> {
    match history_controller(config)? {
        Some(mut controller) => {
            let applied = controller.apply(file_name(file).as_deref(), options)?;
            if applied.is_empty() {
                println!("no unapplied migrations");
            }
            for id in applied {
                println!("apply succeeded: {}", id);
            }
        }
        None => {
            let (path, migration) = load_single(file)?;
            migration.migrator(options)?.apply()?;
            info!("history is not configured; {} was not recorded", path.display());
            println!("apply succeeded: {}", path.display());
        }
    }
    Ok(())
}

fn run_list(config: &TfmigrateConfig, status: ListStatus) -> Result<()> {
    let files = match status {
        ListStatus::All => match history_controller(config)? {
            Some(controller) => controller.migrations().to_vec(),
            None => list_migration_files(&config.migration_dir, None)?,
        },
        ListStatus::Unapplied => require_history(config)?.unapplied_migrations(),
    };

    for file in files {
        println!("{}", file);
    }
    Ok(())
}

fn run_history(config: &TfmigrateConfig, action: HistoryCommands) -> Result<()> {
    let mut controller = require_history(config)?;
    match action {
        HistoryCommands::Clear => {
            controller.clear_history()?;
            println!("history cleared");
        }
        HistoryCommands::Delete { id } => {
            if controller.delete_record(&id)? {
                println!("deleted: {}", id);
            } else {
                println!("not found in history: {}", id);
            }
        }
    }
    Ok(())
}
