//! Managed application lifecycle
//!
//! [`ProcessMonitor`] reconciles what we asked for (start/stop) with what
//! the process table shows. The product runs as several wine processes:
//! a splash launcher, the login window, the CEF renderer and, separately,
//! the indexer. Polling is driven by the caller.
//!
//! A single empty observation is not trusted: wine briefly drops processes
//! while the splash hands over to the login window, so a running app is only
//! declared stopped after [`STOP_AFTER_EMPTY_POLLS`] consecutive empty polls.

use crate::error::{DedetaiError, Result};
use crate::process_guard::force_kill;
use crate::types::{ManagedState, Product};
use crate::wine::{Wine, check_wine_rules};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strum::{Display, EnumIter, IntoEnumIterator};
use sysinfo::System;
use tracing::{debug, info, warn};

/// Consecutive polls without processes before Running becomes Stopped
pub const STOP_AFTER_EMPTY_POLLS: u32 = 2;

/// Polls a launch may go unseen before it is given up on
pub const START_TIMEOUT_POLLS: u32 = 120;

/// Which part of the product a process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ProcessRole {
    Splash,
    Login,
    Renderer,
    Indexer,
}

impl ProcessRole {
    /// Roles that make up the main application
    pub const APP: [ProcessRole; 3] = [Self::Splash, Self::Login, Self::Renderer];
}

/// One OS process matched by image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
}

/// Command-line fragments identifying each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessImages {
    pub splash: String,
    pub login: String,
    pub renderer: String,
    pub indexer: String,
}

impl ProcessImages {
    /// Images for `product` installed for `wine_user`; `splash_exe` is the
    /// installed launcher inside the prefix.
    pub fn new(product: Product, wine_user: &str, splash_exe: &Path) -> Self {
        let system = format!("C:\\users\\{wine_user}\\AppData\\Local\\{product}\\System");
        Self {
            splash: splash_exe.display().to_string(),
            login: format!("{system}\\{product}.exe"),
            renderer: format!("{system}\\{product}CEF.exe"),
            indexer: format!("{system}\\{product}Indexer.exe"),
        }
    }

    pub fn image(&self, role: ProcessRole) -> &str {
        match role {
            ProcessRole::Splash => &self.splash,
            ProcessRole::Login => &self.login,
            ProcessRole::Renderer => &self.renderer,
            ProcessRole::Indexer => &self.indexer,
        }
    }
}

/// Read access to the OS process table, plus kill.
pub trait ProcessTable: Send {
    /// Take a fresh snapshot. Called once per poll before any [`Self::find`].
    fn refresh(&mut self) {}

    /// Processes whose command line or executable contains `image`.
    fn find(&mut self, image: &str) -> Vec<ProcessInfo>;

    /// Force-kill `pids`.
    fn kill(&mut self, pids: &[u32]) -> Result<()>;
}

/// [`ProcessTable`] over sysinfo.
pub struct SysinfoProcessTable {
    system: System,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn refresh(&mut self) {
        self.system.refresh_processes();
    }

    fn find(&mut self, image: &str) -> Vec<ProcessInfo> {
        let own = std::process::id();
        let mut found: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own)
            .filter_map(|(pid, process)| {
                let command = process.cmd().join(" ");
                let exe_matches = process
                    .exe()
                    .is_some_and(|exe| exe.to_string_lossy().contains(image));
                (command.contains(image) || exe_matches).then(|| ProcessInfo {
                    pid: pid.as_u32(),
                    command,
                })
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    fn kill(&mut self, pids: &[u32]) -> Result<()> {
        let failed: Vec<String> = pids
            .iter()
            .filter_map(|&pid| force_kill(pid).err().map(|e| format!("{pid}: {e}")))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DedetaiError::process(format!("failed to kill {}", failed.join(", "))))
        }
    }
}

/// Starts the product's processes.
pub trait AppLauncher: Send {
    /// Refuse to launch on an unsuitable wine. Default: accept.
    fn check_release(&mut self) -> Result<()> {
        Ok(())
    }

    fn launch_app(&mut self) -> Result<u32>;

    fn launch_indexer(&mut self) -> Result<u32>;

    fn wineserver_kill(&mut self) -> Result<()>;

    fn wineserver_wait(&mut self) -> Result<()>;
}

/// [`AppLauncher`] running the installed product through wine.
pub struct WineAppLauncher {
    wine: Wine,
    app_exe: PathBuf,
    indexer_image: String,
    product_version: String,
    product_release: Option<String>,
}

impl WineAppLauncher {
    pub fn new(
        wine: Wine,
        app_exe: PathBuf,
        images: &ProcessImages,
        product_version: String,
        product_release: Option<String>,
    ) -> Self {
        Self {
            wine,
            app_exe,
            indexer_image: images.indexer.clone(),
            product_version,
            product_release,
        }
    }
}

impl AppLauncher for WineAppLauncher {
    fn check_release(&mut self) -> Result<()> {
        let release = self.wine.release()?;
        check_wine_rules(&release, self.product_release.as_deref(), &self.product_version)
            .map_err(DedetaiError::process)
    }

    fn launch_app(&mut self) -> Result<u32> {
        let exe = self.app_exe.display().to_string();
        self.wine.spawn(&[exe])
    }

    fn launch_indexer(&mut self) -> Result<u32> {
        self.wine.spawn(&[self.indexer_image.as_str()])
    }

    fn wineserver_kill(&mut self) -> Result<()> {
        self.wine.wineserver_kill()
    }

    fn wineserver_wait(&mut self) -> Result<()> {
        self.wine.wineserver_wait()
    }
}

/// Desired-vs-observed state machine for the app and the indexer.
pub struct ProcessMonitor<T: ProcessTable, L: AppLauncher> {
    table: T,
    launcher: L,
    images: ProcessImages,
    app_state: ManagedState,
    indexing_state: ManagedState,
    spawned: HashMap<ProcessRole, u32>,
    observed: HashMap<ProcessRole, Vec<ProcessInfo>>,
    empty_app_polls: u32,
    empty_indexer_polls: u32,
}

impl<T: ProcessTable, L: AppLauncher> ProcessMonitor<T, L> {
    pub fn new(table: T, launcher: L, images: ProcessImages) -> Self {
        Self {
            table,
            launcher,
            images,
            app_state: ManagedState::Stopped,
            indexing_state: ManagedState::Stopped,
            spawned: HashMap::new(),
            observed: HashMap::new(),
            empty_app_polls: 0,
            empty_indexer_polls: 0,
        }
    }

    #[inline]
    pub fn app_state(&self) -> ManagedState {
        self.app_state
    }

    #[inline]
    pub fn indexing_state(&self) -> ManagedState {
        self.indexing_state
    }

    /// Processes seen for `role` at the last poll
    pub fn observed(&self, role: ProcessRole) -> &[ProcessInfo] {
        self.observed.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// PID we launched for `role`, if any
    pub fn spawned_pid(&self, role: ProcessRole) -> Option<u32> {
        self.spawned.get(&role).copied()
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn seen(&self, role: ProcessRole) -> bool {
        !self.observed(role).is_empty()
    }

    /// Launch the app. A no-op unless it is stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.app_state != ManagedState::Stopped {
            debug!("start ignored, app is {}", self.app_state);
            return Ok(());
        }
        self.launcher.check_release()?;

        self.app_state = ManagedState::Starting;
        self.empty_app_polls = 0;
        match self.launcher.launch_app() {
            Ok(pid) => {
                info!("Started app (PID {})", pid);
                self.spawned.insert(ProcessRole::Splash, pid);
                Ok(())
            }
            Err(e) => {
                self.app_state = ManagedState::Stopped;
                Err(e)
            }
        }
    }

    fn collect_pids(&self, roles: &[ProcessRole]) -> Vec<u32> {
        let mut pids: Vec<u32> = roles
            .iter()
            .filter_map(|r| self.spawned_pid(*r))
            .chain(roles.iter().flat_map(|r| self.observed(*r).iter().map(|p| p.pid)))
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    fn kill_roles(&mut self, roles: &[ProcessRole]) {
        let pids = self.collect_pids(roles);
        if pids.is_empty() {
            info!("No processes to kill");
        } else if let Err(e) = self.table.kill(&pids) {
            warn!("{}", e);
            if let Err(e) = self.launcher.wineserver_kill() {
                warn!("wineserver -k failed: {}", e);
            }
        }
        for role in roles {
            self.spawned.remove(role);
            self.observed.remove(role);
        }
    }

    fn wait_for_wineserver(&mut self) {
        if let Err(e) = self.launcher.wineserver_wait() {
            warn!("wineserver -w failed: {}", e);
        }
    }

    /// Kill the app's processes and wait for wine to settle.
    pub fn stop(&mut self) {
        if self.app_state == ManagedState::Stopped {
            return;
        }
        self.app_state = ManagedState::Stopping;
        self.kill_roles(&ProcessRole::APP);
        self.app_state = ManagedState::Stopped;
        self.empty_app_polls = 0;
        self.wait_for_wineserver();
    }

    /// Launch the indexer. A no-op unless it is stopped.
    pub fn start_indexing(&mut self) -> Result<()> {
        if self.indexing_state != ManagedState::Stopped {
            return Ok(());
        }
        self.indexing_state = ManagedState::Starting;
        self.empty_indexer_polls = 0;
        match self.launcher.launch_indexer() {
            Ok(pid) => {
                info!("Started indexer (PID {})", pid);
                self.spawned.insert(ProcessRole::Indexer, pid);
                Ok(())
            }
            Err(e) => {
                self.indexing_state = ManagedState::Stopped;
                Err(e)
            }
        }
    }

    pub fn stop_indexing(&mut self) {
        if self.indexing_state == ManagedState::Stopped {
            return;
        }
        self.indexing_state = ManagedState::Stopping;
        self.kill_roles(&[ProcessRole::Indexer]);
        self.indexing_state = ManagedState::Stopped;
        self.empty_indexer_polls = 0;
        self.wait_for_wineserver();
    }

    /// Observe the process table once and advance both state machines.
    pub fn poll(&mut self) {
        self.table.refresh();
        for role in ProcessRole::iter() {
            let found = self.table.find(self.images.image(role));
            self.observed.insert(role, found);
        }
        self.poll_app();
        self.poll_indexer();
    }

    fn poll_app(&mut self) {
        let main_window = self.seen(ProcessRole::Login) || self.seen(ProcessRole::Renderer);
        let any = main_window || self.seen(ProcessRole::Splash);

        match self.app_state {
            ManagedState::Stopped if main_window => {
                info!("Found running app");
                self.app_state = ManagedState::Running;
            }
            ManagedState::Stopped if any => {
                info!("App is starting");
                self.app_state = ManagedState::Starting;
            }
            ManagedState::Starting if main_window => {
                info!("App is running");
                self.app_state = ManagedState::Running;
            }
            ManagedState::Starting if !any => {
                self.empty_app_polls += 1;
                if self.empty_app_polls >= START_TIMEOUT_POLLS {
                    warn!("App never appeared after launch");
                    self.app_state = ManagedState::Stopped;
                    self.empty_app_polls = 0;
                    self.spawned.remove(&ProcessRole::Splash);
                }
            }
            ManagedState::Starting => self.empty_app_polls = 0,
            ManagedState::Running if any => self.empty_app_polls = 0,
            ManagedState::Running => {
                self.empty_app_polls += 1;
                if self.empty_app_polls >= STOP_AFTER_EMPTY_POLLS {
                    info!("App has exited");
                    self.app_state = ManagedState::Stopped;
                    self.empty_app_polls = 0;
                    self.spawned.remove(&ProcessRole::Splash);
                    self.wait_for_wineserver();
                }
            }
            _ => {}
        }
    }

    fn poll_indexer(&mut self) {
        let seen = self.seen(ProcessRole::Indexer);
        match self.indexing_state {
            ManagedState::Stopped | ManagedState::Starting if seen => {
                info!("Indexer is running");
                self.indexing_state = ManagedState::Running;
            }
            ManagedState::Starting => {
                self.empty_indexer_polls += 1;
                if self.empty_indexer_polls >= START_TIMEOUT_POLLS {
                    warn!("Indexer never appeared after launch");
                    self.indexing_state = ManagedState::Stopped;
                    self.empty_indexer_polls = 0;
                    self.spawned.remove(&ProcessRole::Indexer);
                }
            }
            ManagedState::Running if seen => self.empty_indexer_polls = 0,
            ManagedState::Running => {
                self.empty_indexer_polls += 1;
                if self.empty_indexer_polls >= STOP_AFTER_EMPTY_POLLS {
                    info!("Indexer has exited");
                    self.indexing_state = ManagedState::Stopped;
                    self.empty_indexer_polls = 0;
                    self.spawned.remove(&ProcessRole::Indexer);
                }
            }
            _ => {}
        }
    }

    /// Poll every `interval` until the app has come and gone, stopping it
    /// when `interrupt` is set.
    pub fn wait_until_stopped(&mut self, interval: Duration, interrupt: &AtomicBool) {
        loop {
            if interrupt.load(Ordering::SeqCst) {
                info!("Interrupted, stopping app");
                self.stop();
                return;
            }
            self.poll();
            if self.app_state == ManagedState::Stopped {
                return;
            }
            std::thread::sleep(interval);
        }
    }

    /// As [`Self::wait_until_stopped`] for the indexer.
    pub fn wait_until_indexed(&mut self, interval: Duration, interrupt: &AtomicBool) {
        loop {
            if interrupt.load(Ordering::SeqCst) {
                info!("Interrupted, stopping indexer");
                self.stop_indexing();
                return;
            }
            self.poll();
            if self.indexing_state == ManagedState::Stopped {
                return;
            }
            std::thread::sleep(interval);
        }
    }
}
