//! Command dispatch
//!
//! A [`Session`] bundles the resolved configuration with the command runner,
//! downloader and interrupt flag every operation needs, and runs one
//! [`Commands`] value to completion on the calling thread.

use crate::backup::{self, BackupEngine};
use crate::cli::Commands;
use crate::command_runner::{CommandRunner, SystemCommandRunner};
use crate::config::{expand_tilde, Config, ConfigField, EphemeralConfig};
use crate::control;
use crate::error::{DedetaiError, Result};
use crate::frontend::FrontEnd;
use crate::install_state::{InstallChain, InstallStep};
use crate::installer::Installer;
use crate::network::{CurlDownloader, Downloader, OnlineCatalog};
use crate::process_monitor::{
    ProcessImages, ProcessMonitor, SysinfoProcessTable, WineAppLauncher,
};
use crate::types::ManagedState;
use crate::wine::{classify_binary, Wine};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::info;

/// How often the process table is checked while the app runs
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Printable table of install steps.
pub fn step_table() -> String {
    InstallStep::all_steps()
        .iter()
        .map(|step| format!("{:>2}  {:<28} {}", step.order() + 1, step.name(), step.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything one operation needs.
pub struct Session {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    interrupt: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            runner,
            downloader,
            interrupt,
        }
    }

    /// Load the configuration and wire up the system runner and curl.
    pub fn open(
        overrides: EphemeralConfig,
        frontend: Arc<dyn FrontEnd>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        let fetch_runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
        let downloader: Arc<dyn Downloader> = Arc::new(CurlDownloader::new(fetch_runner));
        let catalog = Arc::new(OnlineCatalog::new(Arc::clone(&downloader)));
        let config = Config::load(overrides, frontend, catalog)?;
        let runner = Arc::new(SystemCommandRunner::with_log(config.app_wine_log_path()));
        Ok(Self::new(config, runner, downloader, interrupt))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    fn frontend(&self) -> Arc<dyn FrontEnd> {
        Arc::clone(self.config.frontend())
    }

    /// Run one command.
    pub fn run(&mut self, command: &Commands) -> Result<()> {
        info!("Running command: {:?}", command);
        match command {
            Commands::InstallApp { until } => self.install(until.unwrap_or(InstallStep::last())),
            Commands::InstallDependencies => self.install(InstallStep::SystemDependencies),
            Commands::InstallIcu => self.install(InstallStep::IcuDataFiles),
            Commands::CreateShortcuts => self.install(InstallStep::LauncherShortcuts),
            Commands::RunInstalledApp => self.run_installed_app(),
            Commands::StopInstalledApp => self.stop_installed_app(),
            Commands::RunIndexing => self.run_indexing(),
            Commands::SetAppimage { path } => self.set_appimage(path),
            Commands::UpdateLatestAppimage => self.update_latest_appimage(),
            Commands::RunWinetricks { args } => self.run_winetricks(args),
            Commands::RunWine { args } => {
                println!("{}", self.run_wine(args)?);
                Ok(())
            }
            Commands::RemoveIndexFiles => control::remove_all_index_files(&mut self.config).map(drop),
            Commands::RemoveLibraryCatalog => {
                control::remove_library_catalog(&mut self.config).map(drop)
            }
            Commands::ToggleAppLogging => {
                control::toggle_product_logging(&mut self.config, Arc::clone(&self.runner)).map(drop)
            }
            Commands::ToggleBeta => {
                let channel = self.config.toggle_product_release_channel();
                self.frontend()
                    .status(&format!("Product release channel: {channel}"), None);
                Ok(())
            }
            Commands::ToggleDevChannel => {
                let channel = self.config.toggle_app_release_channel();
                self.frontend()
                    .status(&format!("Release channel: {channel}"), None);
                Ok(())
            }
            Commands::Backup => {
                let engine = BackupEngine::new(self.frontend(), Arc::clone(&self.interrupt));
                backup::backup(&mut self.config, &engine).map(drop)
            }
            Commands::Restore => {
                let engine = BackupEngine::new(self.frontend(), Arc::clone(&self.interrupt));
                backup::restore(&mut self.config, &engine).map(drop)
            }
            Commands::Uninstall => control::uninstall(&mut self.config).map(drop),
            Commands::ListSteps => {
                println!("{}", step_table());
                Ok(())
            }
            Commands::ShowConfig => {
                println!("{}", self.show_config()?);
                Ok(())
            }
        }
    }

    /// Run the install chain through `target`.
    pub fn install(&mut self, target: InstallStep) -> Result<()> {
        let frontend = self.frontend();
        let mut chain = InstallChain::new(Arc::clone(&frontend)).with_interrupt(Arc::clone(&self.interrupt));
        let mut installer = Installer::new(
            &mut self.config,
            Arc::clone(&self.runner),
            Arc::clone(&self.downloader),
        );
        chain.run_until(target, &mut installer)?;
        if target == InstallStep::last() {
            frontend.status("Installation complete", Some(100));
        }
        Ok(())
    }

    /// Stored configuration as pretty JSON.
    pub fn show_config(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.config.persistent())?)
    }

    fn monitor(&mut self) -> Result<ProcessMonitor<SysinfoProcessTable, WineAppLauncher>> {
        let product = self.config.product()?;
        let exe = self
            .config
            .installed_exe()?
            .ok_or_else(|| DedetaiError::process(format!("{product} is not installed")))?;
        let wine_user = self
            .config
            .wine_user()?
            .ok_or_else(|| DedetaiError::process("cannot tell which wine user owns the install"))?;
        let images = ProcessImages::new(product, &wine_user, &exe);
        let wine = Wine::new(self.config.wine_env()?, Arc::clone(&self.runner));
        let launcher = WineAppLauncher::new(
            wine,
            exe,
            &images,
            self.config.product_version()?,
            self.config.peek(ConfigField::ProductRelease),
        );
        Ok(ProcessMonitor::new(SysinfoProcessTable::new(), launcher, images))
    }

    fn run_installed_app(&mut self) -> Result<()> {
        let product = self.config.product()?;
        let mut monitor = self.monitor()?;
        monitor.start()?;
        self.frontend().status(&format!("Running {product}"), None);
        monitor.wait_until_stopped(MONITOR_INTERVAL, &self.interrupt);
        self.frontend().status(&format!("{product} has exited"), None);
        Ok(())
    }

    /// Stop the product if it is running, whether or not this run launched it.
    pub fn stop_installed_app(&mut self) -> Result<()> {
        let product = self.config.product()?;
        let mut monitor = self.monitor()?;
        monitor.poll();
        if monitor.app_state() == ManagedState::Stopped {
            self.frontend().status(&format!("{product} is not running"), None);
            return Ok(());
        }
        monitor.stop();
        self.frontend().status(&format!("{product} stopped"), None);
        Ok(())
    }

    /// Make `path` the wine binary and relink the bin dir to it.
    pub fn set_appimage(&mut self, path: &str) -> Result<()> {
        let appimage = expand_tilde(path.trim());
        if !appimage.is_file() {
            return Err(DedetaiError::validation(format!("{path:?} is not a file")));
        }
        if !classify_binary(&appimage, None, None).is_appimage() {
            return Err(DedetaiError::validation(format!(
                "{path:?} is not an AppImage"
            )));
        }
        self.config
            .set(ConfigField::WineBinary, &appimage.display().to_string())?;
        self.install(InstallStep::WineExecutables)?;
        self.frontend()
            .status(&format!("Wine now runs from {}", appimage.display()), None);
        Ok(())
    }

    /// Look up the newest recommended AppImage and switch to it.
    pub fn update_latest_appimage(&mut self) -> Result<()> {
        let url = self.config.refresh_recommended_appimage_url()?;
        info!("Latest recommended AppImage: {}", url);
        let target = self.config.recommended_appimage_target()?;
        self.config
            .set(ConfigField::WineBinary, &target.display().to_string())?;
        self.install(InstallStep::WineExecutables)?;
        self.frontend()
            .status(&format!("Wine now runs from {}", target.display()), None);
        Ok(())
    }

    /// Run winetricks in the prefix with `args` passed through.
    pub fn run_winetricks(&mut self, args: &[String]) -> Result<()> {
        let winetricks = self.config.winetricks_binary()?;
        if !winetricks.is_file() {
            return Err(DedetaiError::process(format!(
                "winetricks not found at {}",
                winetricks.display()
            )));
        }
        let wine = Wine::new(self.config.wine_env()?, Arc::clone(&self.runner));
        wine.winetricks(&winetricks, args)
    }

    /// Run wine in the prefix; returns its standard output.
    pub fn run_wine(&mut self, args: &[String]) -> Result<String> {
        let wine = Wine::new(self.config.wine_env()?, Arc::clone(&self.runner));
        Ok(wine.run(args)?.stdout)
    }

    fn run_indexing(&mut self) -> Result<()> {
        let mut monitor = self.monitor()?;
        monitor.poll();
        monitor.stop();
        monitor.start_indexing()?;
        self.frontend().status("Indexing", None);
        monitor.wait_until_indexed(MONITOR_INTERVAL, &self.interrupt);
        self.frontend().status("Indexing finished", None);
        Ok(())
    }
}
