use crate::config::{EphemeralConfig, expand_tilde};
use crate::install_state::InstallStep;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ou Dedetai - install and manage Logos or Verbum under Wine
#[derive(Parser, Debug)]
#[command(name = "oudedetai")]
#[command(about = "Installer and control panel for FaithLife Bible software on Linux")]
#[command(version)]
pub struct Cli {
    /// Configuration file to read and write
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug messages and silence WINEDEBUG
    #[arg(short = 'D', long, global = true)]
    pub debug: bool,

    /// Log informational messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never prompt; fail when a value is missing from the configuration.
    ///
    /// Every question the installer would ask becomes a fatal error, so
    /// unattended runs need a complete configuration file or environment.
    #[arg(long, global = true)]
    pub headless: bool,

    /// Directory to install into
    #[arg(long, global = true, value_name = "DIR")]
    pub install_dir: Option<String>,

    /// Extra directory searched for wine binaries
    #[arg(long, global = true, value_name = "DIR")]
    pub custom_binary_path: Option<String>,

    /// Skip installing fonts into the prefix
    #[arg(long, global = true)]
    pub skip_fonts: bool,

    /// Skip every winetricks step
    #[arg(long, global = true)]
    pub skip_winetricks: bool,

    /// Skip installing system dependencies
    #[arg(long, global = true)]
    pub skip_dependencies: bool,

    /// Ignore cached release lookups
    #[arg(long, global = true)]
    pub check_for_updates: bool,

    /// Run the product installer without its UI
    #[arg(long, global = true)]
    pub passive: bool,

    /// Start with an empty log file
    #[arg(long, global = true)]
    pub delete_log: bool,

    /// Permit running as root
    #[arg(long, global = true)]
    pub allow_root: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Install the product, resuming where a previous run stopped
    InstallApp {
        /// Stop after this step (e.g. `install-dirs`, `prefix-init`)
        #[arg(long, value_name = "STEP")]
        until: Option<InstallStep>,
    },
    /// Run the install chain through the system dependency check
    InstallDependencies,
    /// Run the install chain through the ICU data files
    InstallIcu,
    /// Run the install chain through the desktop shortcuts
    CreateShortcuts,
    /// Launch the installed product and wait for it to exit
    RunInstalledApp,
    /// Stop a running product, whoever started it
    StopInstalledApp,
    /// Run the indexer and wait for it to finish
    RunIndexing,
    /// Use a wine AppImage and relink the wine executables to it
    SetAppimage {
        /// Path to the `.AppImage` file
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Switch to the newest recommended wine AppImage
    UpdateLatestAppimage,
    /// Run winetricks in the product's wine prefix
    RunWinetricks {
        /// Arguments passed to winetricks
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run wine in the product's wine prefix
    RunWine {
        /// Arguments passed to wine
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Delete every search index
    RemoveIndexFiles,
    /// Delete the library catalog
    RemoveLibraryCatalog,
    /// Turn the product's own logging on or off
    ToggleAppLogging,
    /// Switch the product between stable and beta releases
    ToggleBeta,
    /// Switch this tool between stable and dev builds
    ToggleDevChannel,
    /// Copy the product's user data into the backup directory
    Backup,
    /// Restore user data from a previous backup
    Restore,
    /// Remove the installation and its configuration
    Uninstall,
    /// List the installation steps in order
    ListSteps,
    /// Print the stored configuration as JSON
    ShowConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The selected command; no command means install.
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::InstallApp { until: None })
    }

    /// Layer command-line flags over the environment-derived overrides.
    pub fn apply(&self, mut overrides: EphemeralConfig) -> EphemeralConfig {
        if let Some(config) = &self.config {
            overrides.config_path = config.clone();
            overrides.config_source = config.exists().then(|| config.clone());
        }
        if self.debug {
            overrides.log_level = Some("debug".to_string());
            overrides.wine_debug = Some(String::new());
        } else if self.verbose && overrides.log_level.is_none() {
            overrides.log_level = Some("info".to_string());
            overrides.wine_debug = Some(String::new());
        }
        if let Some(dir) = &self.install_dir {
            overrides.install_dir = Some(expand_tilde(dir));
        }
        if let Some(dir) = &self.custom_binary_path {
            overrides.custom_binary_path = Some(expand_tilde(dir));
        }
        overrides.install_fonts_skip |= self.skip_fonts;
        overrides.winetricks_skip |= self.skip_winetricks;
        overrides.install_dependencies_skip |= self.skip_dependencies;
        overrides.check_updates_now |= self.check_for_updates;
        overrides.install_passive |= self.passive;
        overrides.delete_log |= self.delete_log;
        overrides.run_as_root_permitted |= self.allow_root;
        overrides
    }
}
