//! Install step chain
//!
//! The installation is an ordered list of idempotent steps. Running to a
//! target step runs every step before it first, so any step can be used as
//! an entry point and a half-finished install resumes by simply running the
//! chain again: completed steps find their work already done.
//!
//! # Step Flow
//!
//! ```text
//! Product → Version → Release → InstallDir → WineBinary → WinetricksBinary
//!     → FontsChoice → DependenciesChoice → InstallationConfig → InstallDirs
//!     → SystemDependencies → AppImageDownload → WineExecutables
//!     → WinetricksExecutable → PremadeBottle → ProductInstallerDownload
//!     → PrefixInit → WinetricksApplied → IcuDataFiles → ProductInstalled
//!     → ConfigFile → LauncherExecutable → LauncherShortcuts
//! ```

use crate::error::{DedetaiError, Result};
use crate::frontend::FrontEnd;
use crate::progress::ProgressReporter;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::{EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, error, info};

/// Install steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum InstallStep {
    Product = 0,
    Version = 1,
    Release = 2,
    InstallDir = 3,
    WineBinary = 4,
    WinetricksBinary = 5,
    FontsChoice = 6,
    DependenciesChoice = 7,
    InstallationConfig = 8,
    InstallDirs = 9,
    SystemDependencies = 10,
    AppImageDownload = 11,
    WineExecutables = 12,
    WinetricksExecutable = 13,
    PremadeBottle = 14,
    ProductInstallerDownload = 15,
    PrefixInit = 16,
    WinetricksApplied = 17,
    IcuDataFiles = 18,
    ProductInstalled = 19,
    ConfigFile = 20,
    LauncherExecutable = 21,
    LauncherShortcuts = 22,
}

impl InstallStep {
    /// Position in the chain (0-based)
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Kebab-case name used on the command line
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub const fn first() -> Self {
        Self::Product
    }

    pub const fn last() -> Self {
        Self::LauncherShortcuts
    }

    /// Returns the next step, or None after the last one
    pub const fn next(self) -> Option<Self> {
        let all = Self::all_steps();
        let i = self.order() as usize + 1;
        if i < all.len() { Some(all[i]) } else { None }
    }

    /// Returns the previous step, or None for the first one
    pub const fn previous(self) -> Option<Self> {
        match self.order() {
            0 => None,
            i => Some(Self::all_steps()[i as usize - 1]),
        }
    }

    /// Status line shown while the step runs
    pub const fn description(self) -> &'static str {
        match self {
            Self::Product => "Choose product…",
            Self::Version => "Choose version…",
            Self::Release => "Choose product release…",
            Self::InstallDir => "Choose installation folder…",
            Self::WineBinary => "Choose wine binary…",
            Self::WinetricksBinary => "Choose winetricks binary…",
            Self::FontsChoice => "Ensuring install fonts choice…",
            Self::DependenciesChoice => "Ensuring check system dependencies choice…",
            Self::InstallationConfig => "Ensuring installation config is set…",
            Self::InstallDirs => "Ensuring installation directories…",
            Self::SystemDependencies => "Ensuring system dependencies are met…",
            Self::AppImageDownload => "Ensuring wine AppImage is downloaded…",
            Self::WineExecutables => "Ensuring wine executables are available…",
            Self::WinetricksExecutable => "Ensuring winetricks executable is available…",
            Self::PremadeBottle => "Ensuring premade wine bottle is downloaded…",
            Self::ProductInstallerDownload => "Ensuring product installer is downloaded…",
            Self::PrefixInit => "Ensuring wine prefix is initialized…",
            Self::WinetricksApplied => "Ensuring winetricks & other settings are applied…",
            Self::IcuDataFiles => "Ensuring ICU data files are installed…",
            Self::ProductInstalled => "Ensuring product is installed…",
            Self::ConfigFile => "Ensuring config file is up-to-date…",
            Self::LauncherExecutable => "Ensuring launcher executable is installed…",
            Self::LauncherShortcuts => "Ensuring launcher shortcuts are created…",
        }
    }

    /// Returns all steps in order
    pub const fn all_steps() -> &'static [Self] {
        &[
            Self::Product,
            Self::Version,
            Self::Release,
            Self::InstallDir,
            Self::WineBinary,
            Self::WinetricksBinary,
            Self::FontsChoice,
            Self::DependenciesChoice,
            Self::InstallationConfig,
            Self::InstallDirs,
            Self::SystemDependencies,
            Self::AppImageDownload,
            Self::WineExecutables,
            Self::WinetricksExecutable,
            Self::PremadeBottle,
            Self::ProductInstallerDownload,
            Self::PrefixInit,
            Self::WinetricksApplied,
            Self::IcuDataFiles,
            Self::ProductInstalled,
            Self::ConfigFile,
            Self::LauncherExecutable,
            Self::LauncherShortcuts,
        ]
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// What a step did when it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step changed something
    Performed,
    /// The step's postcondition already held
    AlreadySatisfied,
    /// Disabled by configuration (skip flags, version rules)
    Skipped,
}

/// Performs the effect of a single step.
pub trait StepExecutor {
    fn execute(&mut self, step: InstallStep) -> Result<StepOutcome>;
}

/// Drives steps head-to-tail and keeps progress across runs.
pub struct InstallChain {
    progress: ProgressReporter,
    interrupt: Option<Arc<AtomicBool>>,
    failed_at: Option<InstallStep>,
    history: Vec<(InstallStep, StepOutcome)>,
}

impl InstallChain {
    pub fn new(frontend: Arc<dyn FrontEnd>) -> Self {
        Self {
            progress: ProgressReporter::new(frontend),
            interrupt: None,
            failed_at: None,
            history: Vec::with_capacity(InstallStep::all_steps().len()),
        }
    }

    /// Stop before the next step once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Run every step up to and including `target`.
    ///
    /// The first failing step stops the chain; it is recorded in
    /// [`Self::failed_at`] and its error is returned.
    pub fn run_until<E: StepExecutor>(&mut self, target: InstallStep, executor: &mut E) -> Result<()> {
        let steps = &InstallStep::all_steps()[..=usize::from(target.order())];
        self.progress.add_steps(steps.len() as u64);
        self.failed_at = None;

        for &step in steps {
            if self.interrupt.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
                self.failed_at = Some(step);
                return Err(DedetaiError::cancelled(format!("interrupted before: {step}")));
            }

            self.progress.advance(step.description());
            match executor.execute(step) {
                Ok(outcome) => {
                    match outcome {
                        StepOutcome::Performed => info!("{} done", step.name()),
                        StepOutcome::AlreadySatisfied => {
                            debug!("{} already satisfied", step.name())
                        }
                        StepOutcome::Skipped => info!("{} skipped", step.name()),
                    }
                    self.history.push((step, outcome));
                }
                Err(e) => {
                    error!("Install step {} failed: {}", step.name(), e);
                    self.failed_at = Some(step);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Run the whole chain.
    pub fn run_all<E: StepExecutor>(&mut self, executor: &mut E) -> Result<()> {
        self.run_until(InstallStep::last(), executor)
    }

    /// Step at which the last run stopped, if it failed
    #[inline]
    pub fn failed_at(&self) -> Option<InstallStep> {
        self.failed_at
    }

    /// Every step that completed in this process, in order
    pub fn history(&self) -> &[(InstallStep, StepOutcome)] {
        &self.history
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }
}
