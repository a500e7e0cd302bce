//! Ou Dedetai library
//!
//! Installs Logos or Verbum into a Wine prefix and manages the result:
//! configuration resolution, the install step chain, the running app and
//! backups of its user data.

pub mod backup;
pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod config;
pub mod config_file;
pub mod control;
pub mod error;
pub mod frontend;
pub mod fs_utils;
pub mod install_state;
pub mod installer;
pub mod network;
pub mod process_guard;
pub mod process_monitor;
pub mod progress;
pub mod sanity;
pub mod terminal;
pub mod types;
pub mod wine;

// Re-export main types for convenience
pub use backup::{BackupEngine, BackupPlan, BackupReport, DiskUsage, list_backups};
pub use command_runner::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use config::{Config, ConfigField, EphemeralConfig};
pub use config_file::{LegacyConfig, PersistentConfig};
pub use error::{DedetaiError, Result};
pub use frontend::{ChannelFrontEnd, FrontEnd, HeadlessFrontEnd, PromptServer, prompt_channel};
pub use install_state::{InstallChain, InstallStep, StepExecutor, StepOutcome};
pub use installer::Installer;
pub use network::{Downloader, ReleaseCatalog};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use process_monitor::{AppLauncher, ProcessMonitor, ProcessTable};
pub use types::{BackupMode, ManagedState, Product, ReleaseChannel, WineBinaryCode};
