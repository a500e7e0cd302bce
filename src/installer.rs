//! Installer module
//!
//! Effects of every [`InstallStep`]. Each step checks its postcondition
//! first and only acts when it does not hold yet, so the chain can be
//! replayed after an interruption.

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::config::{BINARY_NAME, Config, ConfigField};
use crate::config_file::PersistentConfig;
use crate::error::{DedetaiError, Result};
use crate::frontend::DOWNLOAD;
use crate::fs_utils::{copy_tree, make_executable, remove_path, replace_symlink};
use crate::install_state::{InstallStep, StepExecutor, StepOutcome};
use crate::network::{Downloader, PREMADE_BOTTLE_URL, WINETRICKS_URL};
use crate::sanity::{check_dependencies, is_executable};
use crate::types::WineBinaryCode;
use crate::wine::{Wine, file_name_from_url, prefix_tweaks};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Marker left by a complete ICU install, relative to the prefix
pub const ICU_MARKER: &str = "drive_c/windows/globalization/ICU/LICENSE-ICU.txt";

/// Links in the bin dir pointing at the selected AppImage
const APPIMAGE_LINKS: &[&str] = &["wine", "wine64", "wineserver"];

/// Install step effects over one configuration.
pub struct Installer<'a> {
    config: &'a mut Config,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    current_exe: Option<PathBuf>,
    applications_dir: PathBuf,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a mut Config,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let applications_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("applications");
        Self {
            config,
            runner,
            downloader,
            current_exe: std::env::current_exe().ok(),
            applications_dir,
        }
    }

    /// Where `.desktop` launchers are written.
    pub fn with_applications_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.applications_dir = dir.into();
        self
    }

    /// Executable copied into the install dir as the launcher; `None` skips it.
    pub fn with_current_exe(mut self, exe: Option<PathBuf>) -> Self {
        self.current_exe = exe;
        self
    }

    fn wine(&mut self) -> Result<Wine> {
        Ok(Wine::new(self.config.wine_env()?, self.runner.clone()))
    }

    fn data_dir(&mut self) -> Result<PathBuf> {
        Ok(self.config.install_dir()?.join("data"))
    }

    fn tar_extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        let spec = CommandSpec::new("tar").args([
            "xzf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            dest.display().to_string(),
        ]);
        self.runner.run(&spec)?.ensure_success(&spec.display())
    }

    fn choose(&mut self, field: ConfigField) -> Result<StepOutcome> {
        let known = self.config.peek(field).is_some();
        let value = self.config.get(field)?;
        debug!("> {} = {}", field.key(), value);
        Ok(if known {
            StepOutcome::AlreadySatisfied
        } else {
            StepOutcome::Performed
        })
    }

    fn ensure_wine_choice(&mut self) -> Result<StepOutcome> {
        if self.config.peek(ConfigField::WineBinary).is_none()
            || self.config.peek(ConfigField::WineBinaryCode).is_none()
        {
            // The prompt offers the recommended AppImage first
            self.config.recommended_appimage_url()?;
        }
        let outcome = self.choose(ConfigField::WineBinary)?;
        let code = self.config.wine_binary_code()?;
        debug!("> wine_binary_code = {}", code);
        Ok(outcome)
    }

    fn ensure_installation_config(&mut self) -> Result<StepOutcome> {
        let name = self.config.installer_file_name()?;
        let url = self.config.installer_download_url()?;
        debug!("> installer = {} from {}", name, url);
        Ok(StepOutcome::AlreadySatisfied)
    }

    fn ensure_install_dirs(&mut self) -> Result<StepOutcome> {
        let bin_dir = self.config.installer_binary_dir()?;
        let prefix = self.config.wine_prefix()?;
        if bin_dir.is_dir() && prefix.is_dir() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        fs::create_dir_all(&bin_dir)?;
        fs::create_dir_all(&prefix)?;
        info!("Created {} and {}", bin_dir.display(), prefix.display());
        Ok(StepOutcome::Performed)
    }

    fn ensure_sys_deps(&mut self) -> Result<StepOutcome> {
        if self.config.skip_dependencies() {
            return Ok(StepOutcome::Skipped);
        }
        check_dependencies()?;
        Ok(StepOutcome::AlreadySatisfied)
    }

    fn ensure_appimage_download(&mut self) -> Result<StepOutcome> {
        if self.config.wine_binary_code()? != WineBinaryCode::Recommended {
            return Ok(StepOutcome::Skipped);
        }
        let url = self.config.recommended_appimage_url()?;
        let name = self.config.recommended_appimage_file_name()?;
        let download_dir = self.config.download_dir();
        if download_dir.join(&name).is_file() {
            debug!("> {} already downloaded", name);
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let path = self.downloader.ensure_file(&url, &name, &download_dir)?;
        debug!("> {} exists", path.display());
        Ok(StepOutcome::Performed)
    }

    fn ensure_wine_executables(&mut self) -> Result<StepOutcome> {
        let code = self.config.wine_binary_code()?;
        if !code.is_appimage() {
            debug!("No links needed for {} wine binary", code);
            return Ok(StepOutcome::Skipped);
        }

        let bin_dir = self.config.installer_binary_dir()?;
        let source = if code == WineBinaryCode::Recommended {
            self.config
                .download_dir()
                .join(self.config.recommended_appimage_file_name()?)
        } else {
            match self.config.wine_appimage_path()? {
                Some(path) => path,
                None => self.config.wine_binary()?,
            }
        };
        let file_name = source
            .file_name()
            .ok_or_else(|| DedetaiError::install(format!("no file name in {}", source.display())))?
            .to_os_string();
        let appimage = bin_dir.join(&file_name);

        fs::create_dir_all(&bin_dir)?;
        if !appimage.is_file() {
            info!("Copying {} to {}", source.display(), bin_dir.display());
            fs::copy(&source, &appimage).map_err(|e| {
                DedetaiError::install(format!("cannot copy {}: {e}", source.display()))
            })?;
        }
        make_executable(&appimage)?;

        let link_name = self.config.wine_appimage_link_file_name();
        replace_symlink(&Path::new(".").join(&file_name), &bin_dir.join(&link_name))?;
        for link in APPIMAGE_LINKS {
            replace_symlink(&Path::new(".").join(&link_name), &bin_dir.join(link))?;
        }
        Ok(StepOutcome::Performed)
    }

    fn ensure_winetricks_executable(&mut self) -> Result<StepOutcome> {
        if self.config.winetricks_choice()? != DOWNLOAD {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let bin_dir = self.config.installer_binary_dir()?;
        let winetricks = bin_dir.join("winetricks");
        if is_executable(&winetricks) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let path = self.downloader.ensure_file(WINETRICKS_URL, "winetricks", &bin_dir)?;
        make_executable(&path)?;
        Ok(StepOutcome::Performed)
    }

    fn ensure_premade_bottle(&mut self) -> Result<StepOutcome> {
        if self.config.product_version()? != "9" {
            return Ok(StepOutcome::Skipped);
        }
        if self.config.wine_prefix()?.join("system.reg").is_file() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let name = file_name_from_url(PREMADE_BOTTLE_URL).unwrap_or_else(|| "wine64_bottle.tar.gz".to_string());
        let archive = self
            .downloader
            .ensure_file(PREMADE_BOTTLE_URL, &name, &self.config.download_dir())?;
        let data_dir = self.data_dir()?;
        self.tar_extract(&archive, &data_dir)?;
        Ok(StepOutcome::Performed)
    }

    fn ensure_installer_download(&mut self) -> Result<StepOutcome> {
        let name = self.config.installer_file_name()?;
        let target = self.data_dir()?.join(&name);
        if target.is_file() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let url = self.config.installer_download_url()?;
        let downloaded = self
            .downloader
            .ensure_file(&url, &name, &self.config.download_dir())?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&downloaded, &target)?;
        info!("Copied {} to {}", downloaded.display(), target.display());
        Ok(StepOutcome::Performed)
    }

    fn ensure_prefix_init(&mut self) -> Result<StepOutcome> {
        if self.config.wine_prefix()?.join("system.reg").is_file() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let wine = self.wine()?;
        wine.run_with_overrides(&["wineboot", "--init"], Some("mscoree="))?;
        wine.wineserver_wait()?;
        Ok(StepOutcome::Performed)
    }

    fn ensure_winetricks_applied(&mut self) -> Result<StepOutcome> {
        if self.config.skip_winetricks() {
            return Ok(StepOutcome::Skipped);
        }
        let product = self.config.product()?;
        let winetricks = self.config.winetricks_binary()?;
        let wine = self.wine()?;

        let mut applied = false;
        for tweak in prefix_tweaks(product, self.config.skip_fonts()) {
            applied |= wine.apply_tweak(&tweak, &winetricks)?;
        }
        wine.wineserver_wait()?;
        Ok(if applied {
            StepOutcome::Performed
        } else {
            StepOutcome::AlreadySatisfied
        })
    }

    fn ensure_icu_data_files(&mut self) -> Result<StepOutcome> {
        let prefix = self.config.wine_prefix()?;
        if prefix.join(ICU_MARKER).is_file() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let url = self.config.catalog().icu_archive_url()?;
        let name = file_name_from_url(&url)
            .ok_or_else(|| DedetaiError::network(format!("no file name in {url}")))?;
        let archive = self
            .downloader
            .ensure_file(&url, &name, &self.config.download_dir())?;

        let drive_c = prefix.join("drive_c");
        self.tar_extract(&archive, &drive_c)?;
        let never = AtomicBool::new(false);
        copy_tree(&drive_c.join("icu-win/windows"), &drive_c.join("windows"), &never)?;
        Ok(StepOutcome::Performed)
    }

    fn ensure_product_installed(&mut self) -> Result<StepOutcome> {
        if self.config.installed_exe()?.is_some() {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let msi = self.data_dir()?.join(self.config.installer_file_name()?);
        let mut args = vec!["msiexec".to_string(), "/i".to_string(), msi.display().to_string()];
        if self.config.install_passive() {
            args.push("/passive".to_string());
        }
        let wine = self.wine()?;
        wine.run(&args)?;
        wine.wineserver_wait()?;

        match self.config.installed_exe()? {
            Some(exe) => {
                info!("Installed {}", exe.display());
                Ok(StepOutcome::Performed)
            }
            None => Err(DedetaiError::install(format!(
                "{} was not found after running the installer",
                self.config.product()?
            ))),
        }
    }

    fn ensure_config_file(&mut self) -> Result<StepOutcome> {
        let path = self.config.config_path().to_path_buf();
        let on_disk = PersistentConfig::load_from_path(&path, |_| None).ok();
        if path.is_file() && on_disk.as_ref() == Some(self.config.persistent()) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        self.config.write();
        Ok(StepOutcome::Performed)
    }

    fn ensure_launcher_executable(&mut self) -> Result<StepOutcome> {
        let Some(current) = self.current_exe.clone() else {
            return Ok(StepOutcome::Skipped);
        };
        let launcher = self.config.install_dir()?.join(BINARY_NAME);
        let same = match (fs::canonicalize(&current), fs::canonicalize(&launcher)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        remove_path(&launcher)?;
        info!("Copying launcher to {}", launcher.display());
        fs::copy(&current, &launcher)?;
        make_executable(&launcher)?;
        Ok(StepOutcome::Performed)
    }

    fn ensure_launcher_shortcuts(&mut self) -> Result<StepOutcome> {
        let product = self.config.product()?;
        let install_dir = self.config.install_dir()?;
        let launcher = install_dir.join(BINARY_NAME);
        let icon = install_dir.join(format!("data/{}-128-icon.png", product.feed_name()));
        let icon_line = if icon.is_file() {
            format!("Icon={}\n", icon.display())
        } else {
            String::new()
        };

        let entries = [
            (
                format!("{product}Bible.desktop"),
                format!(
                    "[Desktop Entry]\nName={product}Bible\nComment=A Bible Study Library with Built-In Tools\n\
                     Exec={} run-installed-app\n{icon_line}Terminal=false\nType=Application\nCategories=Education;\n",
                    launcher.display()
                ),
            ),
            (
                format!("{product}Bible-ControlPanel.desktop"),
                format!(
                    "[Desktop Entry]\nName={product}Bible Control Panel\nComment=Perform various tasks for {product} app\n\
                     Exec={}\n{icon_line}Terminal=false\nType=Application\nCategories=Education;\n",
                    launcher.display()
                ),
            ),
        ];

        fs::create_dir_all(&self.applications_dir)?;
        let mut outcome = StepOutcome::AlreadySatisfied;
        for (name, contents) in entries {
            let path = self.applications_dir.join(name);
            if fs::read_to_string(&path).is_ok_and(|existing| existing == contents) {
                debug!("> {} is current", path.display());
                continue;
            }
            remove_path(&path)?;
            info!("Creating desktop launcher at {}", path.display());
            fs::write(&path, contents)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            outcome = StepOutcome::Performed;
        }
        Ok(outcome)
    }
}

impl StepExecutor for Installer<'_> {
    fn execute(&mut self, step: InstallStep) -> Result<StepOutcome> {
        match step {
            InstallStep::Product => self.choose(ConfigField::Product),
            InstallStep::Version => self.choose(ConfigField::ProductVersion),
            InstallStep::Release => self.choose(ConfigField::ProductRelease),
            InstallStep::InstallDir => self.choose(ConfigField::InstallDir),
            InstallStep::WineBinary => self.ensure_wine_choice(),
            InstallStep::WinetricksBinary => self.choose(ConfigField::WinetricksBinary),
            InstallStep::FontsChoice => {
                debug!("> skip fonts = {}", self.config.skip_fonts());
                Ok(StepOutcome::AlreadySatisfied)
            }
            InstallStep::DependenciesChoice => {
                debug!("> skip dependencies = {}", self.config.skip_dependencies());
                Ok(StepOutcome::AlreadySatisfied)
            }
            InstallStep::InstallationConfig => self.ensure_installation_config(),
            InstallStep::InstallDirs => self.ensure_install_dirs(),
            InstallStep::SystemDependencies => self.ensure_sys_deps(),
            InstallStep::AppImageDownload => self.ensure_appimage_download(),
            InstallStep::WineExecutables => self.ensure_wine_executables(),
            InstallStep::WinetricksExecutable => self.ensure_winetricks_executable(),
            InstallStep::PremadeBottle => self.ensure_premade_bottle(),
            InstallStep::ProductInstallerDownload => self.ensure_installer_download(),
            InstallStep::PrefixInit => self.ensure_prefix_init(),
            InstallStep::WinetricksApplied => self.ensure_winetricks_applied(),
            InstallStep::IcuDataFiles => self.ensure_icu_data_files(),
            InstallStep::ProductInstalled => self.ensure_product_installed(),
            InstallStep::ConfigFile => self.ensure_config_file(),
            InstallStep::LauncherExecutable => self.ensure_launcher_executable(),
            InstallStep::LauncherShortcuts => self.ensure_launcher_shortcuts(),
        }
    }
}
