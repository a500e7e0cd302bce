//! Configuration file handling
//!
//! The persisted configuration is a JSON document with snake_case keys.
//! Older releases wrote flat `KEY=value` files (and JSON with the same
//! upper-case keys); those are read once through [`LegacyConfig`] and mapped
//! onto [`PersistentConfig`]. During that read, environment variables named
//! after a legacy key take precedence over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::types::ReleaseChannel;

/// How long cached network lookups stay valid
pub const CACHE_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Keys understood by the legacy reader; anything else is ignored.
pub const LEGACY_KEYS: &[&str] = &[
    "FLPRODUCT",
    "TARGETVERSION",
    "TARGET_RELEASE_VERSION",
    "current_logos_version",
    "curses_colors",
    "INSTALLDIR",
    "WINETRICKSBIN",
    "WINEBIN_CODE",
    "WINE_EXE",
    "WINECMD_ENCODING",
    "LOGS",
    "BACKUPDIR",
    "LAST_UPDATED",
    "RECOMMENDED_WINE64_APPIMAGE_URL",
    "LLI_LATEST_VERSION",
    "logos_release_channel",
    "lli_release_channel",
    "APPIMAGE_LINK_SELECTION_NAME",
    "APPDIR_BINDIR",
    "CHECK_UPDATES",
    "CONFIG_FILE",
    "CUSTOMBINPATH",
    "DEBUG",
    "DELETE_LOG",
    "LOGOS_LOG",
    "wine_log",
    "LOGOS_EXE",
    "LOGOS_EXECUTABLE",
    "LOGOS_VERSION",
    "LOGOS64_URL",
    "SELECTED_APPIMAGE_FILENAME",
    "SKIP_DEPENDENCIES",
    "SKIP_FONTS",
    "SKIP_WINETRICKS",
    "VERBOSE",
    "WINEDEBUG",
    "WINEDLLOVERRIDES",
    "WINEPREFIX",
    "WINESERVER_EXE",
    "WINETRICKS_UNATTENDED",
];

/// Parse the truthy spellings used by the old shell installer.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Seconds since the epoch, as stored in `last_updated`
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Values from a pre-JSON configuration, restricted to [`LEGACY_KEYS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyConfig {
    values: BTreeMap<String, String>,
    /// File this configuration was read from (or would have been)
    pub config_file: Option<PathBuf>,
}

impl LegacyConfig {
    /// Parse a `KEY=value` document. Quotes are stripped, `#` starts a comment.
    pub fn parse_conf(text: &str) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.split('#').next().unwrap_or_default();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            values.insert(key.trim().to_string(), value.to_string());
        }
        values
    }

    /// Read `path` (`.json` or `.conf`), then let `env` override every legacy key.
    pub fn load_from_path<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = BTreeMap::new();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        if path.exists() {
            match extension {
                "json" => {
                    let text = fs::read_to_string(path)
                        .with_context(|| format!("Failed to read config file: {:?}", path))?;
                    let doc: serde_json::Map<String, serde_json::Value> =
                        serde_json::from_str(&text)
                            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
                    for (key, value) in doc {
                        let value = match value {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Null => continue,
                            other => other.to_string(),
                        };
                        values.insert(key, value);
                    }
                }
                "conf" => {
                    info!("Reading from legacy config file {:?}", path);
                    let text = fs::read_to_string(path)
                        .with_context(|| format!("Failed to read config file: {:?}", path))?;
                    values = Self::parse_conf(&text);
                }
                _ => debug!("Not reading values from {:?}", path),
            }
        }

        Ok(Self::restrict(values, env, Some(path.to_path_buf())))
    }

    /// Legacy view built from the environment alone.
    pub fn from_env<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::restrict(BTreeMap::new(), env, None)
    }

    fn restrict<F>(mut values: BTreeMap<String, String>, env: F, config_file: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut kept = BTreeMap::new();
        for key in LEGACY_KEYS {
            if let Some(value) = env(key) {
                values.insert(key.to_string(), value);
            }
            if let Some(value) = values.remove(*key) {
                kept.insert(key.to_string(), value);
            }
        }
        Self {
            values: kept,
            config_file,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Boolean view of a key; `None` when unset.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Choices the user made, stored across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    pub faithlife_product: Option<String>,
    pub faithlife_product_version: Option<String>,
    pub faithlife_product_release: Option<String>,
    pub faithlife_product_logging: Option<bool>,
    pub install_dir: Option<PathBuf>,
    pub winetricks_binary: Option<String>,
    pub wine_binary: Option<String>,
    pub wine_binary_code: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub faithlife_product_release_channel: ReleaseChannel,
    pub app_release_channel: ReleaseChannel,

    // Cached network lookups
    pub faithlife_product_releases: Option<Vec<String>>,
    pub wine_appimage_url: Option<String>,
    pub app_latest_version_url: Option<String>,
    pub app_latest_version: Option<String>,
    pub last_updated: Option<f64>,
}

impl PersistentConfig {
    /// Map legacy keys onto persistent fields.
    pub fn from_legacy(legacy: &LegacyConfig) -> Self {
        let channel = |key: &str| {
            legacy
                .get(key)
                .and_then(|v| v.parse::<ReleaseChannel>().ok())
                .unwrap_or_default()
        };
        Self {
            faithlife_product: legacy.get("FLPRODUCT").map(str::to_string),
            faithlife_product_version: legacy.get("TARGETVERSION").map(str::to_string),
            faithlife_product_release: legacy.get("TARGET_RELEASE_VERSION").map(str::to_string),
            faithlife_product_logging: legacy.flag("LOGS"),
            install_dir: legacy.get("INSTALLDIR").map(PathBuf::from),
            winetricks_binary: legacy.get("WINETRICKSBIN").map(str::to_string),
            wine_binary: legacy.get("WINE_EXE").map(str::to_string),
            wine_binary_code: legacy.get("WINEBIN_CODE").map(str::to_string),
            backup_dir: legacy.get("BACKUPDIR").map(PathBuf::from),
            faithlife_product_release_channel: channel("logos_release_channel"),
            app_release_channel: channel("lli_release_channel"),
            ..Self::default()
        }
    }

    /// Load the configuration at `path`.
    ///
    /// Legacy keys are read first (with `env` precedence); current keys in a
    /// JSON file then win over them.
    pub fn load_from_path<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let legacy = LegacyConfig::load_from_path(path, env)?;
        let base = Self::from_legacy(&legacy);

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if !(is_json && path.exists()) {
            return Ok(base.absolutized());
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let file: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        let mut merged = match serde_json::to_value(&base)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in file {
            if merged.contains_key(&key) {
                merged.insert(key, value);
            }
        }
        let config: Self = serde_json::from_value(serde_json::Value::Object(merged))
            .with_context(|| format!("Invalid values in config file: {:?}", path))?;
        Ok(config.absolutized())
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let mut json = serde_json::to_string_pretty(&self.relativized())
            .context("Failed to serialize configuration")?;
        json.push('\n');
        fs::write(path, json).with_context(|| format!("Failed to write config file: {:?}", path))?;
        info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Whether cached lookups are older than [`CACHE_LIFETIME`] at `now`.
    pub fn cache_expired(&self, now: f64) -> bool {
        match self.last_updated {
            Some(stamp) => now - stamp >= CACHE_LIFETIME.as_secs_f64(),
            None => true,
        }
    }

    /// Forget cached lookups and restart the lifetime at `now`.
    pub fn clear_cache(&mut self, now: f64) {
        self.faithlife_product_releases = None;
        self.wine_appimage_url = None;
        self.app_latest_version_url = None;
        self.app_latest_version = None;
        self.last_updated = Some(now);
    }

    /// Copy with paths inside the install dir stored as `./<rest>`.
    fn relativized(&self) -> Self {
        let mut out = self.clone();
        let Some(install_dir) = &self.install_dir else {
            return out;
        };
        let relative = |value: &Option<String>| -> Option<String> {
            let value = value.as_ref()?;
            match Path::new(value).strip_prefix(install_dir) {
                Ok(rest) => Some(Path::new(".").join(rest).display().to_string()),
                Err(_) => Some(value.clone()),
            }
        };
        out.wine_binary = relative(&self.wine_binary);
        out.winetricks_binary = relative(&self.winetricks_binary);
        if let Some(backup) = &self.backup_dir {
            if let Ok(rest) = backup.strip_prefix(install_dir) {
                out.backup_dir = Some(Path::new(".").join(rest));
            }
        }
        out
    }

    /// Inverse of [`Self::relativized`]: resolve relative paths against the install dir.
    ///
    /// Bare words such as `Download` are sentinels, not paths, and pass through.
    fn absolutized(mut self) -> Self {
        let Some(install_dir) = self.install_dir.clone() else {
            return self;
        };
        let absolute = |value: Option<String>| -> Option<String> {
            let value = value?;
            let path = Path::new(&value);
            let is_path = value.starts_with("./") || value.contains('/');
            if path.is_relative() && is_path {
                let rest = path.strip_prefix(".").unwrap_or(path);
                Some(install_dir.join(rest).display().to_string())
            } else {
                Some(value)
            }
        };
        self.wine_binary = absolute(self.wine_binary.take());
        self.winetricks_binary = absolute(self.winetricks_binary.take());
        if let Some(backup) = &self.backup_dir {
            if backup.is_relative() {
                let rest = backup.strip_prefix(".").unwrap_or(backup);
                self.backup_dir = Some(install_dir.join(rest));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_conf_strips_quotes_and_comments() {
        let values = LegacyConfig::parse_conf(
            "# comment\nFLPRODUCT=\"Logos\"\nTARGETVERSION='10' # trailing\n\nbroken line\n",
        );
        assert_eq!(values.get("FLPRODUCT").map(String::as_str), Some("Logos"));
        assert_eq!(values.get("TARGETVERSION").map(String::as_str), Some("10"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_legacy_conf_migrates_with_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Logos_on_Linux.conf");
        fs::write(
            &path,
            "FLPRODUCT=Logos\nTARGETVERSION=9\nINSTALLDIR=/home/u/LogosBible9\nUNKNOWN=1\n",
        )
        .unwrap();

        let env = |key: &str| (key == "TARGETVERSION").then(|| "10".to_string());
        let legacy = LegacyConfig::load_from_path(&path, env).unwrap();
        assert_eq!(legacy.get("TARGETVERSION"), Some("10"));
        assert_eq!(legacy.get("UNKNOWN"), None);

        let config = PersistentConfig::from_legacy(&legacy);
        assert_eq!(config.faithlife_product.as_deref(), Some("Logos"));
        assert_eq!(config.faithlife_product_version.as_deref(), Some("10"));
        assert_eq!(config.install_dir, Some(PathBuf::from("/home/u/LogosBible9")));
    }

    #[test]
    fn test_json_current_keys_override_legacy_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oudedetai.json");
        fs::write(
            &path,
            r#"{"FLPRODUCT": "Logos", "faithlife_product": "Verbum", "curses_colors": "Dark"}"#,
        )
        .unwrap();

        let config = PersistentConfig::load_from_path(&path, no_env).unwrap();
        assert_eq!(config.faithlife_product.as_deref(), Some("Verbum"));
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let config =
            PersistentConfig::load_from_path(&dir.path().join("absent.json"), no_env).unwrap();
        assert_eq!(config, PersistentConfig::default());
    }

    #[test]
    fn test_paths_stored_relative_to_install_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = PersistentConfig {
            install_dir: Some(PathBuf::from("/opt/LogosBible10")),
            wine_binary: Some("/opt/LogosBible10/data/bin/wine64".to_string()),
            winetricks_binary: Some("Download".to_string()),
            ..PersistentConfig::default()
        };
        config.save_to_file(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"wine_binary\": \"./data/bin/wine64\""));

        let loaded = PersistentConfig::load_from_path(&path, no_env).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_binary_directly_in_install_dir_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let install_dir = dir.path().join("LogosBible10");
        let config = PersistentConfig {
            install_dir: Some(install_dir.clone()),
            wine_binary: Some(install_dir.join("wine.AppImage").display().to_string()),
            winetricks_binary: Some(install_dir.join("winetricks").display().to_string()),
            backup_dir: Some(install_dir.join("backups")),
            ..PersistentConfig::default()
        };
        config.save_to_file(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"wine_binary\": \"./wine.AppImage\""));

        let loaded = PersistentConfig::load_from_path(&path, no_env).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_older_relative_paths_still_resolve() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"install_dir": "/opt/LogosBible10", "wine_binary": "data/bin/wine64", "winetricks_binary": "Download"}"#,
        )
        .unwrap();

        let loaded = PersistentConfig::load_from_path(&path, no_env).unwrap();
        assert_eq!(loaded.wine_binary.as_deref(), Some("/opt/LogosBible10/data/bin/wine64"));
        assert_eq!(loaded.winetricks_binary.as_deref(), Some("Download"));
    }

    #[test]
    fn test_cache_expiry() {
        let mut config = PersistentConfig::default();
        assert!(config.cache_expired(1000.0));

        config.faithlife_product_releases = Some(vec!["30.0.0.0".to_string()]);
        config.clear_cache(1000.0);
        assert!(config.faithlife_product_releases.is_none());
        assert!(!config.cache_expired(1000.0 + 3600.0));
        assert!(config.cache_expired(1000.0 + CACHE_LIFETIME.as_secs_f64()));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("True"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("no"));
        assert!(!parse_bool(""));
    }
}
