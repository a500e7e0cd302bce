//! Ou Dedetai - main entry point
//!
//! Parses the command line, sets up logging and signal handling, then runs
//! the selected operation on a worker thread while the main thread answers
//! its questions on the terminal.

use anyhow::Context;
use oudedetai::cli::{Cli, Commands};
use oudedetai::commands::{Session, step_table};
use oudedetai::config::{APP_NAME, BINARY_NAME, EphemeralConfig, state_dir};
use oudedetai::error::{DedetaiError, Result};
use oudedetai::frontend::{FrontEnd, HeadlessFrontEnd, prompt_channel};
use oudedetai::process_guard::{self, ProcessGuard};
use oudedetai::sanity;
use oudedetai::terminal::TerminalFrontEnd;
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after a cancelled operation
const EXIT_CANCELLED: u8 = 130;

/// Initialize file logging. `RUST_LOG` wins over the configured level.
fn init_logging(overrides: &EphemeralConfig) -> anyhow::Result<()> {
    let path = overrides
        .app_log_path
        .clone()
        .unwrap_or_else(|| state_dir().join(format!("{BINARY_NAME}.log")));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if overrides.delete_log {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    let file = options
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let level = overrides.log_level.as_deref().unwrap_or("warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;
    Ok(())
}

fn run(
    command: Commands,
    overrides: EphemeralConfig,
    frontend: Arc<dyn FrontEnd>,
    interrupt: Arc<AtomicBool>,
) -> Result<()> {
    let mut session = Session::open(overrides, frontend, interrupt)?;
    session.run(&command)
}

/// Run on a worker thread, serving its prompts on the terminal until it ends.
fn run_interactive(
    command: Commands,
    overrides: EphemeralConfig,
    interrupt: Arc<AtomicBool>,
) -> Result<()> {
    let (worker_frontend, server) = prompt_channel();
    let worker = std::thread::Builder::new()
        .name(format!("{BINARY_NAME}-worker"))
        .spawn(move || run(command, overrides, Arc::new(worker_frontend), interrupt))?;

    let terminal = TerminalFrontEnd::stdio();
    server.serve(&terminal);
    debug!("Prompt server finished, joining worker");

    worker
        .join()
        .unwrap_or_else(|_| Err(DedetaiError::general("worker thread panicked")))
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    let command = cli.command();

    if command == Commands::ListSteps {
        println!("{}", step_table());
        return ExitCode::SUCCESS;
    }

    let overrides = match EphemeralConfig::load() {
        Ok(overrides) => cli.apply(overrides),
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&overrides) {
        eprintln!("Warning: {e:#}");
    }
    info!("{} {} starting", APP_NAME, env!("CARGO_PKG_VERSION"));

    let interrupt = match process_guard::init_signal_handlers() {
        Ok(flag) => flag,
        Err(e) => {
            warn!("Failed to initialize signal handlers: {}", e);
            process_guard::interrupt_flag()
        }
    };
    let _guard = ProcessGuard::new();

    if command != Commands::ShowConfig {
        if let Err(e) = sanity::ensure_environment(overrides.run_as_root_permitted) {
            error!("{}", e);
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    }

    let result = if cli.headless {
        run(command, overrides, Arc::new(HeadlessFrontEnd), interrupt)
    } else {
        run_interactive(command, overrides, interrupt)
    };

    match result {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(DedetaiError::NothingToDo(reason)) => {
            info!("Nothing to do: {}", reason);
            eprintln!("Nothing to do: {reason}");
            ExitCode::SUCCESS
        }
        Err(e @ DedetaiError::Cancelled(_)) => {
            warn!("{}", e);
            eprintln!("{e}");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
