//! Configuration resolution
//!
//! [`Config`] layers the per-run [`EphemeralConfig`] over the persisted
//! [`PersistentConfig`]. Reading a field that is still unset asks the
//! front-end, validates the answer through the field's setter, writes the
//! file and fires the front-end's config-changed hook. A field that already
//! has a value is returned without asking again.
//!
//! Fields declare their dependents. Changing a field clears every dependent
//! (transitively), so for example a new product version forces the release,
//! install directory and wine choices to be asked again.

use crate::config_file::{LegacyConfig, PersistentConfig, now_timestamp, parse_bool};
use crate::error::{DedetaiError, Result};
use crate::frontend::{DOWNLOAD, FrontEnd, PROMPT_OPTION_DIRECTORY, PROMPT_OPTION_FILE, is_prompt_sigil};
use crate::network::ReleaseCatalog;
use crate::sanity::find_in_path;
use crate::types::{PRODUCT_VERSIONS, Product, ReleaseChannel, WineBinaryCode};
use crate::wine::{
    self, APPIMAGE_LINK_NAME, DEFAULT_WINE_DEBUG, WineEnv, classify_binary, file_name_from_url,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, error, info, warn};

pub const APP_NAME: &str = "Ou Dedetai";
pub const BINARY_NAME: &str = "oudedetai";
const VENDOR_DIR: &str = "FaithLife-Community";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// `$XDG_CONFIG_HOME/FaithLife-Community`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(VENDOR_DIR)
}

/// `$XDG_STATE_HOME/FaithLife-Community`
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| home_dir().join(".local/state"))
        .join(VENDOR_DIR)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(format!("{BINARY_NAME}.json"))
}

/// Older config locations, read when the current file is absent.
pub fn legacy_config_files() -> Vec<PathBuf> {
    let home = home_dir();
    vec![
        home.join(".config/FaithLife-Community/oudedetai"),
        home.join(".config/FaithLife-Community/Logos_on_Linux.json"),
        home.join(".config/Logos_on_Linux/Logos_on_Linux.json"),
        home.join(".config/Logos_on_Linux/Logos_on_Linux.conf"),
    ]
}

/// Expand a leading `~` against the user's home directory.
pub fn expand_tilde(value: &str) -> PathBuf {
    match value.strip_prefix('~') {
        Some("") => home_dir(),
        Some(rest) if rest.starts_with('/') => home_dir().join(rest.trim_start_matches('/')),
        _ => PathBuf::from(value),
    }
}

// =============================================================================
// Ephemeral overrides
// =============================================================================

/// Per-run overrides from the environment and command line. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EphemeralConfig {
    /// Where the configuration is written
    pub config_path: PathBuf,
    /// Where the configuration was read from (a legacy file on first run)
    pub config_source: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub installer_binary_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub wineserver_binary: Option<PathBuf>,
    pub wine_prefix: Option<PathBuf>,
    pub wine_appimage_path: Option<PathBuf>,
    pub wine_appimage_link_file_name: Option<String>,
    pub custom_binary_path: Option<PathBuf>,
    pub faithlife_product_release: Option<String>,
    pub faithlife_installer_name: Option<String>,
    pub faithlife_installer_download_url: Option<String>,
    /// `debug` or `info` when requested through DEBUG/VERBOSE
    pub log_level: Option<String>,
    pub wine_debug: Option<String>,
    pub wine_dll_overrides: Option<String>,
    pub app_log_path: Option<PathBuf>,
    pub app_wine_log_path: Option<PathBuf>,
    pub winetricks_unattended: Option<bool>,
    pub winetricks_skip: bool,
    pub install_dependencies_skip: bool,
    pub install_fonts_skip: bool,
    pub check_updates_now: bool,
    pub delete_log: bool,
    pub install_passive: bool,
    pub run_as_root_permitted: bool,
}

impl EphemeralConfig {
    /// Overrides with nothing set but the config path.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            ..Self::default()
        }
    }

    /// Build overrides from a legacy view. `env` supplies values that are
    /// only honoured from the environment, never from a file.
    pub fn from_legacy<F>(legacy: &LegacyConfig, config_path: PathBuf, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str| legacy.get(key).map(PathBuf::from);
        let string = |key: &str| legacy.get(key).map(str::to_string);

        let mut log_level = None;
        let mut wine_debug = string("WINEDEBUG");
        if legacy.flag("DEBUG") == Some(true) {
            log_level = Some("debug".to_string());
            wine_debug = Some(String::new());
        } else if legacy.flag("VERBOSE") == Some(true) {
            log_level = Some("info".to_string());
            wine_debug = Some(String::new());
        }

        Self {
            config_path,
            config_source: legacy.config_file.clone(),
            install_dir: env("INSTALLDIR").map(PathBuf::from),
            installer_binary_dir: path("APPDIR_BINDIR"),
            download_dir: None,
            wineserver_binary: path("WINESERVER_EXE"),
            wine_prefix: path("WINEPREFIX"),
            wine_appimage_path: path("SELECTED_APPIMAGE_FILENAME"),
            wine_appimage_link_file_name: string("APPIMAGE_LINK_SELECTION_NAME"),
            custom_binary_path: path("CUSTOMBINPATH"),
            faithlife_product_release: string("LOGOS_VERSION"),
            faithlife_installer_name: string("LOGOS_EXECUTABLE"),
            faithlife_installer_download_url: string("LOGOS64_URL"),
            log_level,
            wine_debug,
            wine_dll_overrides: string("WINEDLLOVERRIDES"),
            app_log_path: path("LOGOS_LOG"),
            app_wine_log_path: path("wine_log"),
            winetricks_unattended: legacy.flag("WINETRICKS_UNATTENDED"),
            winetricks_skip: legacy.flag("SKIP_WINETRICKS").unwrap_or(false),
            install_dependencies_skip: legacy.flag("SKIP_DEPENDENCIES").unwrap_or(false),
            install_fonts_skip: legacy.flag("SKIP_FONTS").unwrap_or(false),
            check_updates_now: legacy.flag("CHECK_UPDATES").unwrap_or(false),
            delete_log: legacy.flag("DELETE_LOG").unwrap_or(false),
            install_passive: false,
            run_as_root_permitted: false,
        }
    }

    /// Locate the configuration and build overrides from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_env(|key| std::env::var(key).ok(), &legacy_config_files())
    }

    /// As [`Self::load`] with an explicit environment and legacy search list.
    pub fn load_with_env<F>(env: F, legacy_files: &[PathBuf]) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = env("CONFIG_PATH")
            .map(|p| expand_tilde(&p))
            .unwrap_or_else(default_config_path);

        let source = if config_path.exists() {
            Some(config_path.clone())
        } else {
            legacy_files.iter().find(|p| p.exists()).cloned()
        };

        let legacy = match &source {
            Some(source) => LegacyConfig::load_from_path(source, &env)?,
            None => {
                debug!("Couldn't find config file, loading defaults...");
                LegacyConfig::from_env(&env)
            }
        };
        Ok(Self::from_legacy(&legacy, config_path, &env))
    }
}

// =============================================================================
// Field table
// =============================================================================

/// Persisted fields that can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ConfigField {
    Product,
    ProductVersion,
    ProductRelease,
    InstallDir,
    WineBinary,
    WineBinaryCode,
    WinetricksBinary,
    BackupDir,
}

impl ConfigField {
    /// JSON key in the config file
    pub const fn key(self) -> &'static str {
        match self {
            Self::Product => "faithlife_product",
            Self::ProductVersion => "faithlife_product_version",
            Self::ProductRelease => "faithlife_product_release",
            Self::InstallDir => "install_dir",
            Self::WineBinary => "wine_binary",
            Self::WineBinaryCode => "wine_binary_code",
            Self::WinetricksBinary => "winetricks_binary",
            Self::BackupDir => "backup_dir",
        }
    }

    /// Fields cleared directly when this one changes
    pub const fn dependents(self) -> &'static [ConfigField] {
        match self {
            Self::Product => &[Self::ProductVersion, Self::ProductRelease],
            Self::ProductVersion => &[
                Self::ProductRelease,
                Self::InstallDir,
                Self::WineBinary,
                Self::WineBinaryCode,
                Self::WinetricksBinary,
            ],
            Self::WineBinary => &[Self::WineBinaryCode],
            Self::ProductRelease
            | Self::InstallDir
            | Self::WineBinaryCode
            | Self::WinetricksBinary
            | Self::BackupDir => &[],
        }
    }

    /// Transitive closure of [`Self::dependents`], in discovery order.
    pub fn invalidated(self) -> Vec<ConfigField> {
        let mut out: Vec<ConfigField> = Vec::new();
        let mut queue: Vec<ConfigField> = self.dependents().to_vec();
        while let Some(field) = queue.pop() {
            if field == self || out.contains(&field) {
                continue;
            }
            out.push(field);
            queue.extend_from_slice(field.dependents());
        }
        out
    }

    /// Fields the install chain asks for, in order
    pub fn prompted() -> impl Iterator<Item = ConfigField> {
        Self::iter().filter(|f| *f != Self::WineBinaryCode)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// The single configuration instance of a run.
pub struct Config {
    raw: PersistentConfig,
    overrides: EphemeralConfig,
    frontend: Arc<dyn FrontEnd>,
    catalog: Arc<dyn ReleaseCatalog>,
}

impl Config {
    pub fn new(
        raw: PersistentConfig,
        overrides: EphemeralConfig,
        frontend: Arc<dyn FrontEnd>,
        catalog: Arc<dyn ReleaseCatalog>,
    ) -> Self {
        Self {
            raw,
            overrides,
            frontend,
            catalog,
        }
    }

    /// Read the persisted configuration named by `overrides` and expire stale caches.
    pub fn load(
        overrides: EphemeralConfig,
        frontend: Arc<dyn FrontEnd>,
        catalog: Arc<dyn ReleaseCatalog>,
    ) -> Result<Self> {
        let source = overrides
            .config_source
            .clone()
            .unwrap_or_else(|| overrides.config_path.clone());
        let raw = PersistentConfig::load_from_path(&source, |key| std::env::var(key).ok())
            .map_err(|e| DedetaiError::config(format!("{e:#}")))?;
        let mut config = Self::new(raw, overrides, frontend, catalog);
        config.expire_cache(now_timestamp());
        Ok(config)
    }

    /// Clear cached lookups if they are due (or an update check was requested).
    pub fn expire_cache(&mut self, now: f64) {
        if self.overrides.check_updates_now || self.raw.cache_expired(now) {
            debug!("Clearing cached network lookups");
            self.raw.clear_cache(now);
            self.write();
        }
    }

    pub fn frontend(&self) -> &Arc<dyn FrontEnd> {
        &self.frontend
    }

    pub fn overrides(&self) -> &EphemeralConfig {
        &self.overrides
    }

    pub fn persistent(&self) -> &PersistentConfig {
        &self.raw
    }

    pub fn catalog(&self) -> &Arc<dyn ReleaseCatalog> {
        &self.catalog
    }

    /// File the configuration is written to
    pub fn config_path(&self) -> &Path {
        &self.overrides.config_path
    }

    /// Persist the current values. Failures are logged; the run continues.
    pub fn write(&self) {
        match self.raw.save_to_file(&self.overrides.config_path) {
            Ok(()) => self.frontend.config_changed(),
            Err(e) => error!("Error writing config file {:?}: {:#}", self.overrides.config_path, e),
        }
    }

    fn raw_field(&self, field: ConfigField) -> Option<String> {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        match field {
            ConfigField::Product => self.raw.faithlife_product.clone(),
            ConfigField::ProductVersion => self.raw.faithlife_product_version.clone(),
            ConfigField::ProductRelease => self.raw.faithlife_product_release.clone(),
            ConfigField::InstallDir => path(&self.raw.install_dir),
            ConfigField::WineBinary => self.raw.wine_binary.clone(),
            ConfigField::WineBinaryCode => self.raw.wine_binary_code.clone(),
            ConfigField::WinetricksBinary => self.raw.winetricks_binary.clone(),
            ConfigField::BackupDir => path(&self.raw.backup_dir),
        }
    }

    fn store(&mut self, field: ConfigField, value: Option<String>) {
        match field {
            ConfigField::Product => self.raw.faithlife_product = value,
            ConfigField::ProductVersion => self.raw.faithlife_product_version = value,
            ConfigField::ProductRelease => self.raw.faithlife_product_release = value,
            ConfigField::InstallDir => self.raw.install_dir = value.map(PathBuf::from),
            ConfigField::WineBinary => self.raw.wine_binary = value,
            ConfigField::WineBinaryCode => self.raw.wine_binary_code = value,
            ConfigField::WinetricksBinary => self.raw.winetricks_binary = value,
            ConfigField::BackupDir => self.raw.backup_dir = value.map(PathBuf::from),
        }
    }

    /// Current value without asking: override first, then persisted.
    pub fn peek(&self, field: ConfigField) -> Option<String> {
        let overridden = match field {
            ConfigField::InstallDir => self
                .overrides
                .install_dir
                .as_ref()
                .map(|p| p.display().to_string()),
            ConfigField::ProductRelease => self.overrides.faithlife_product_release.clone(),
            _ => None,
        };
        overridden.or_else(|| self.raw_field(field))
    }

    /// Value of `field`, asking the front-end if it is unset.
    pub fn get(&mut self, field: ConfigField) -> Result<String> {
        if let Some(value) = self.peek(field) {
            return Ok(value);
        }
        if field == ConfigField::WineBinaryCode {
            return self.wine_binary_code().map(|c| c.to_string());
        }

        let (question, options) = self.question(field)?;
        loop {
            let answer = self.frontend.ask(&question, &options)?;
            match self.set(field, &answer) {
                Ok(()) => break,
                Err(e) if e.is_recoverable() => {
                    warn!("Rejected answer for {}: {}", field.key(), e);
                    self.frontend.status(&e.to_string(), None);
                }
                Err(e) => return Err(e),
            }
        }
        self.peek(field)
            .ok_or_else(|| DedetaiError::config(format!("{} unset after answer", field.key())))
    }

    /// Validate and store `value`, clearing dependents if it changed.
    pub fn set(&mut self, field: ConfigField, value: &str) -> Result<()> {
        let value = self.validate(field, value)?;
        if self.raw_field(field).as_deref() == Some(value.as_str()) {
            return Ok(());
        }

        info!("Setting {} to {}", field.key(), value);
        for dependent in field.invalidated() {
            if self.raw_field(dependent).is_some() {
                debug!("Clearing {} (depends on {})", dependent.key(), field.key());
            }
            self.store(dependent, None);
        }
        match field {
            ConfigField::Product | ConfigField::ProductVersion => {
                self.raw.faithlife_product_releases = None;
            }
            ConfigField::WineBinary => self.overrides.wine_appimage_path = None,
            _ => {}
        }
        self.store(field, Some(value));
        self.write();
        Ok(())
    }

    /// Clear `field` and its dependents so they are asked again.
    pub fn reset(&mut self, field: ConfigField) {
        for dependent in field.invalidated() {
            self.store(dependent, None);
        }
        self.store(field, None);
        self.write();
    }

    fn validate(&self, field: ConfigField, value: &str) -> Result<String> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DedetaiError::validation(format!("{} cannot be empty", field.key())));
        }
        if is_prompt_sigil(value) {
            return Err(DedetaiError::validation(format!("{value:?} is not a valid path")));
        }

        match field {
            ConfigField::Product => value
                .parse::<Product>()
                .map(|p| p.to_string())
                .map_err(|_| DedetaiError::validation(format!("Unknown product {value:?}"))),
            ConfigField::ProductVersion => {
                if PRODUCT_VERSIONS.contains(&value) {
                    Ok(value.to_string())
                } else {
                    Err(DedetaiError::validation(format!(
                        "Version must be one of {PRODUCT_VERSIONS:?}"
                    )))
                }
            }
            ConfigField::ProductRelease => {
                if value.chars().all(|c| c.is_ascii_digit() || c == '.') {
                    Ok(value.to_string())
                } else {
                    Err(DedetaiError::validation(format!("{value:?} is not a release number")))
                }
            }
            ConfigField::InstallDir | ConfigField::BackupDir => {
                Ok(expand_tilde(value).display().to_string())
            }
            ConfigField::WineBinary => {
                let path = expand_tilde(value);
                let recommended = self.cached_recommended_file_name();
                let is_recommended_target = path
                    .file_name()
                    .is_some_and(|n| recommended.as_deref() == Some(&*n.to_string_lossy()));
                if path.is_file() || is_recommended_target {
                    Ok(path.display().to_string())
                } else {
                    Err(DedetaiError::validation(format!("{value:?} is not a file")))
                }
            }
            ConfigField::WinetricksBinary => {
                if value == DOWNLOAD {
                    return Ok(value.to_string());
                }
                let path = expand_tilde(value);
                if path.is_file() {
                    Ok(path.display().to_string())
                } else {
                    Err(DedetaiError::validation(format!(
                        "{value:?} is neither {DOWNLOAD:?} nor an existing file"
                    )))
                }
            }
            ConfigField::WineBinaryCode => value
                .parse::<WineBinaryCode>()
                .map(|c| c.to_string())
                .map_err(|_| DedetaiError::validation(format!("Unknown wine binary code {value:?}"))),
        }
    }

    fn question(&mut self, field: ConfigField) -> Result<(String, Vec<String>)> {
        let question_and_options = match field {
            ConfigField::Product => (
                "Choose which FaithLife product the script should install: ".to_string(),
                Product::iter().map(|p| p.to_string()).collect(),
            ),
            ConfigField::ProductVersion => (
                format!("Which version of {} should the script install?: ", self.product()?),
                PRODUCT_VERSIONS.iter().map(|v| v.to_string()).collect(),
            ),
            ConfigField::ProductRelease => (
                format!(
                    "Which version of {} {} do you want to install?: ",
                    self.product()?,
                    self.product_version()?
                ),
                self.product_releases()?,
            ),
            ConfigField::InstallDir => {
                let product = self.product()?;
                let version = self.product_version()?;
                let default = home_dir().join(format!("{product}Bible{version}"));
                (
                    format!("Where should {product} files be installed to?: "),
                    vec![default.display().to_string(), PROMPT_OPTION_DIRECTORY.to_string()],
                )
            }
            ConfigField::WineBinary => {
                let product = self.product()?;
                let version = self.product_version()?;
                let install_dir = self.install_dir()?;
                let mut options = vec![self.recommended_appimage_target()?.display().to_string()];
                let search = wine::default_search_dirs(
                    &home_dir(),
                    &self.installer_binary_dir()?,
                    self.overrides.custom_binary_path.as_deref(),
                );
                for binary in wine::find_wine_binaries(&search) {
                    let binary = binary.display().to_string();
                    if !options.contains(&binary) {
                        options.push(binary);
                    }
                }
                options.push(PROMPT_OPTION_FILE.to_string());
                (
                    format!(
                        "Which Wine AppImage or binary should the script use to install {product} v{version} in {}?: ",
                        install_dir.display()
                    ),
                    options,
                )
            }
            ConfigField::WinetricksBinary => {
                let mut options = vec![DOWNLOAD.to_string()];
                if let Some(local) = find_in_path("winetricks") {
                    options.push(local.display().to_string());
                }
                (
                    format!(
                        "Should the script use the system's local winetricks or download the latest winetricks from the Internet? The script needs to set some Wine options that {} requires on Linux.",
                        self.product()?
                    ),
                    options,
                )
            }
            ConfigField::BackupDir => (
                "New or existing folder to store backups in: ".to_string(),
                vec![PROMPT_OPTION_DIRECTORY.to_string()],
            ),
            ConfigField::WineBinaryCode => {
                return Err(DedetaiError::config("wine binary code is derived, not asked"));
            }
        };
        Ok(question_and_options)
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn product(&mut self) -> Result<Product> {
        let value = self.get(ConfigField::Product)?;
        value
            .parse()
            .map_err(|_| DedetaiError::config(format!("Unknown product {value:?}")))
    }

    pub fn product_version(&mut self) -> Result<String> {
        self.get(ConfigField::ProductVersion)
    }

    pub fn product_release(&mut self) -> Result<String> {
        self.get(ConfigField::ProductRelease)
    }

    pub fn install_dir(&mut self) -> Result<PathBuf> {
        self.get(ConfigField::InstallDir).map(PathBuf::from)
    }

    pub fn wine_binary(&mut self) -> Result<PathBuf> {
        self.get(ConfigField::WineBinary).map(PathBuf::from)
    }

    /// Winetricks choice as stored (`Download` or a path).
    pub fn winetricks_choice(&mut self) -> Result<String> {
        self.get(ConfigField::WinetricksBinary)
    }

    /// Winetricks executable to run; `Download` resolves into the bin dir.
    pub fn winetricks_binary(&mut self) -> Result<PathBuf> {
        let choice = self.winetricks_choice()?;
        if choice == DOWNLOAD {
            Ok(self.installer_binary_dir()?.join("winetricks"))
        } else {
            Ok(PathBuf::from(choice))
        }
    }

    pub fn backup_dir(&mut self) -> Result<PathBuf> {
        self.get(ConfigField::BackupDir).map(PathBuf::from)
    }

    /// Stored code, or classified from the chosen binary and stored.
    pub fn wine_binary_code(&mut self) -> Result<WineBinaryCode> {
        if let Some(code) = self.raw.wine_binary_code.as_deref() {
            if let Ok(code) = code.parse() {
                return Ok(code);
            }
            warn!("Ignoring unknown wine binary code {:?}", code);
        }
        let binary = self.wine_binary()?;
        let code = classify_binary(
            &binary,
            self.cached_recommended_file_name().as_deref(),
            self.overrides.custom_binary_path.as_deref(),
        );
        self.raw.wine_binary_code = Some(code.to_string());
        self.write();
        Ok(code)
    }

    pub fn installer_binary_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.overrides.installer_binary_dir {
            return Ok(dir.clone());
        }
        Ok(self.install_dir()?.join("data/bin"))
    }

    pub fn wine_prefix(&mut self) -> Result<PathBuf> {
        if let Some(prefix) = &self.overrides.wine_prefix {
            return Ok(prefix.clone());
        }
        Ok(self.install_dir()?.join("data/wine64_bottle"))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.overrides
            .download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| home_dir().join("Downloads"))
    }

    pub fn wine_appimage_link_file_name(&self) -> String {
        self.overrides
            .wine_appimage_link_file_name
            .clone()
            .unwrap_or_else(|| APPIMAGE_LINK_NAME.to_string())
    }

    fn cached_recommended_file_name(&self) -> Option<String> {
        self.raw.wine_appimage_url.as_deref().and_then(file_name_from_url)
    }

    /// URL of the recommended AppImage, looked up once per cache lifetime.
    pub fn recommended_appimage_url(&mut self) -> Result<String> {
        if let Some(url) = &self.raw.wine_appimage_url {
            return Ok(url.clone());
        }
        let url = self.catalog.recommended_appimage_url()?;
        self.raw.wine_appimage_url = Some(url.clone());
        self.write();
        Ok(url)
    }

    /// Look the recommended AppImage up again, ignoring the cached URL.
    pub fn refresh_recommended_appimage_url(&mut self) -> Result<String> {
        self.raw.wine_appimage_url = None;
        self.recommended_appimage_url()
    }

    pub fn recommended_appimage_file_name(&mut self) -> Result<String> {
        let url = self.recommended_appimage_url()?;
        file_name_from_url(&url)
            .ok_or_else(|| DedetaiError::network(format!("no file name in {url}")))
    }

    /// Where the recommended AppImage lives once installed.
    pub fn recommended_appimage_target(&mut self) -> Result<PathBuf> {
        let name = self.recommended_appimage_file_name()?;
        Ok(self.installer_binary_dir()?.join(name))
    }

    /// AppImage backing the wine binaries, if any.
    pub fn wine_appimage_path(&mut self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.overrides.wine_appimage_path {
            return Ok(Some(path.clone()));
        }
        if self.wine_binary_code()?.is_appimage() {
            return self.wine_binary().map(Some);
        }
        Ok(None)
    }

    /// `wine64` to invoke. AppImages are reached through links in the bin dir.
    pub fn wine64_binary(&mut self) -> Result<PathBuf> {
        if self.wine_binary_code()?.is_appimage() {
            return Ok(self.installer_binary_dir()?.join("wine64"));
        }
        let binary = self.wine_binary()?;
        if binary.file_name().is_some_and(|n| n == "wine64") {
            return Ok(binary);
        }
        Ok(binary.with_file_name("wine64"))
    }

    pub fn wineserver_binary(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.overrides.wineserver_binary {
            return Ok(path.clone());
        }
        Ok(self.wine64_binary()?.with_file_name("wineserver"))
    }

    pub fn wine_debug(&self) -> String {
        self.overrides
            .wine_debug
            .clone()
            .unwrap_or_else(|| DEFAULT_WINE_DEBUG.to_string())
    }

    pub fn wine_dll_overrides(&self) -> String {
        self.overrides.wine_dll_overrides.clone().unwrap_or_default()
    }

    pub fn wine_env(&mut self) -> Result<WineEnv> {
        Ok(WineEnv {
            wine64: self.wine64_binary()?,
            wineserver: self.wineserver_binary()?,
            prefix: self.wine_prefix()?,
            debug: self.wine_debug(),
            dll_overrides: self.wine_dll_overrides(),
        })
    }

    pub fn app_log_path(&self) -> PathBuf {
        self.overrides
            .app_log_path
            .clone()
            .unwrap_or_else(|| state_dir().join(format!("{BINARY_NAME}.log")))
    }

    pub fn app_wine_log_path(&self) -> PathBuf {
        self.overrides
            .app_wine_log_path
            .clone()
            .unwrap_or_else(|| state_dir().join("wine.log"))
    }

    pub fn skip_fonts(&self) -> bool {
        self.overrides.install_fonts_skip
    }

    pub fn skip_winetricks(&self) -> bool {
        self.overrides.winetricks_skip
    }

    pub fn skip_dependencies(&self) -> bool {
        self.overrides.install_dependencies_skip
    }

    pub fn install_passive(&self) -> bool {
        self.overrides.install_passive
    }

    /// Releases offered for the chosen product and version, cached.
    pub fn product_releases(&mut self) -> Result<Vec<String>> {
        if let Some(releases) = &self.raw.faithlife_product_releases {
            return Ok(releases.clone());
        }
        let product = self.product()?;
        let version = self.product_version()?;
        let channel = self.raw.faithlife_product_release_channel;
        let releases = self.catalog.product_releases(product, &version, channel)?;
        self.raw.faithlife_product_releases = Some(releases.clone());
        self.write();
        Ok(releases)
    }

    /// `<Product>_v<release>-x64.msi`
    pub fn installer_file_name(&mut self) -> Result<String> {
        if let Some(name) = &self.overrides.faithlife_installer_name {
            return Ok(name.clone());
        }
        let product = self.product()?;
        let release = self.product_release()?;
        Ok(format!("{product}_v{release}-x64.msi"))
    }

    pub fn installer_download_url(&mut self) -> Result<String> {
        if let Some(url) = &self.overrides.faithlife_installer_download_url {
            return Ok(url.clone());
        }
        let product = self.product()?;
        let version = self.product_version()?;
        let release = self.product_release()?;
        Ok(format!(
            "https://downloads.logoscdn.com/LBS{version}{}Installer/{release}/{product}-x64.msi",
            product.url_segment()
        ))
    }

    /// Installed `<Product>.exe` inside the prefix, if present.
    pub fn installed_exe(&mut self) -> Result<Option<PathBuf>> {
        let product = self.product()?;
        let users = self.wine_prefix()?.join("drive_c/users");
        let Ok(entries) = fs::read_dir(&users) else {
            return Ok(None);
        };
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| {
                e.path()
                    .join("AppData/Local")
                    .join(product.to_string())
                    .join(format!("{product}.exe"))
            })
            .filter(|p| p.is_file())
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    /// Windows user name owning the installation.
    pub fn wine_user(&mut self) -> Result<Option<String>> {
        Ok(self.installed_exe()?.as_deref().and_then(wine_user_from_path))
    }

    /// `AppData/Local/<Product>` directory holding the product's data.
    pub fn app_data_dir(&mut self) -> Result<PathBuf> {
        self.installed_exe()?
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .ok_or_else(|| DedetaiError::config("the product is not installed"))
    }

    pub fn product_logging(&self) -> bool {
        self.raw.faithlife_product_logging.unwrap_or(false)
    }

    pub fn set_product_logging(&mut self, enabled: bool) {
        self.raw.faithlife_product_logging = Some(enabled);
        self.write();
    }

    pub fn product_release_channel(&self) -> ReleaseChannel {
        self.raw.faithlife_product_release_channel
    }

    /// Switch between the stable and beta product feeds.
    pub fn toggle_product_release_channel(&mut self) -> ReleaseChannel {
        let next = match self.raw.faithlife_product_release_channel {
            ReleaseChannel::Stable => ReleaseChannel::Beta,
            _ => ReleaseChannel::Stable,
        };
        self.raw.faithlife_product_release_channel = next;
        self.raw.faithlife_product_releases = None;
        self.write();
        next
    }

    pub fn app_release_channel(&self) -> ReleaseChannel {
        self.raw.app_release_channel
    }

    /// Switch this tool between stable and dev builds.
    pub fn toggle_app_release_channel(&mut self) -> ReleaseChannel {
        let next = match self.raw.app_release_channel {
            ReleaseChannel::Stable => ReleaseChannel::Dev,
            _ => ReleaseChannel::Stable,
        };
        self.raw.app_release_channel = next;
        self.raw.app_latest_version = None;
        self.raw.app_latest_version_url = None;
        self.write();
        next
    }
}

/// Path segment following `users` in a prefix path.
pub fn wine_user_from_path(path: &Path) -> Option<String> {
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy().to_string());
    components.find(|c| c == "users")?;
    components.next()
}

/// Truthy environment flag.
pub fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| parse_bool(&v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_dependents_closure() {
        let product = ConfigField::Product.invalidated();
        for field in [
            ConfigField::ProductVersion,
            ConfigField::ProductRelease,
            ConfigField::InstallDir,
            ConfigField::WineBinary,
            ConfigField::WineBinaryCode,
            ConfigField::WinetricksBinary,
        ] {
            assert!(product.contains(&field), "{field} should be invalidated by product");
        }
        assert!(!product.contains(&ConfigField::BackupDir));
        assert_eq!(ConfigField::WineBinary.invalidated(), vec![ConfigField::WineBinaryCode]);
        assert!(ConfigField::BackupDir.invalidated().is_empty());
    }

    #[test]
    fn test_prompted_excludes_derived_code() {
        assert!(!ConfigField::prompted().any(|f| f == ConfigField::WineBinaryCode));
        assert_eq!(ConfigField::prompted().count(), 7);
    }

    #[test]
    fn test_wine_user_from_path() {
        let exe = Path::new("/p/drive_c/users/alice/AppData/Local/Logos/Logos.exe");
        assert_eq!(wine_user_from_path(exe).as_deref(), Some("alice"));
        assert_eq!(wine_user_from_path(Path::new("/usr/bin/wine64")), None);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
        assert!(expand_tilde("~/LogosBible10").is_absolute());
        assert_eq!(expand_tilde("~user"), PathBuf::from("~user"));
        assert_eq!(expand_tilde("data/bin"), PathBuf::from("data/bin"));
    }

    #[test]
    fn test_ephemeral_from_legacy_debug_clears_winedebug() {
        let env: HashMap<&str, &str> =
            HashMap::from([("DEBUG", "true"), ("WINEDEBUG", "fixme-all"), ("SKIP_FONTS", "1")]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());
        let legacy = LegacyConfig::from_env(lookup);
        let eph = EphemeralConfig::from_legacy(&legacy, PathBuf::from("/c.json"), lookup);
        assert_eq!(eph.log_level.as_deref(), Some("debug"));
        assert_eq!(eph.wine_debug.as_deref(), Some(""));
        assert!(eph.install_fonts_skip);
        assert!(!eph.winetricks_skip);
    }

    #[test]
    fn test_load_with_env_prefers_legacy_file_when_current_missing() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("Logos_on_Linux.conf");
        fs::write(&legacy, "FLPRODUCT=Verbum\nSKIP_WINETRICKS=yes\n").unwrap();
        let current = dir.path().join("oudedetai.json");
        let current_str = current.display().to_string();

        let env = |key: &str| (key == "CONFIG_PATH").then(|| current_str.clone());
        let eph = EphemeralConfig::load_with_env(env, &[legacy.clone()]).unwrap();

        assert_eq!(eph.config_path, current);
        assert_eq!(eph.config_source, Some(legacy));
        assert!(eph.winetricks_skip);
    }
}
