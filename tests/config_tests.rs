//! Tests for configuration resolution
//!
//! These tests verify:
//! - Asking only for unset fields, and only once
//! - Re-asking after a rejected answer
//! - Cascading invalidation of dependent fields
//! - Cache expiry and persistence round trips

mod common;

use common::{APPIMAGE_URL, ScriptedFrontEnd, StaticCatalog, config_in, overrides_in};
use oudedetai::config::{Config, ConfigField};
use oudedetai::config_file::PersistentConfig;
use oudedetai::error::DedetaiError;
use oudedetai::frontend::HeadlessFrontEnd;
use oudedetai::types::{Product, ReleaseChannel, WineBinaryCode};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn complete_raw(dir: &std::path::Path) -> PersistentConfig {
    PersistentConfig {
        faithlife_product: Some("Logos".to_string()),
        faithlife_product_version: Some("10".to_string()),
        faithlife_product_release: Some("10.1.0.0012".to_string()),
        install_dir: Some(dir.join("LogosBible10")),
        wine_binary: Some("/usr/bin/wine64".to_string()),
        wine_binary_code: Some("System".to_string()),
        winetricks_binary: Some("Download".to_string()),
        backup_dir: Some(dir.join("backups")),
        faithlife_product_releases: Some(vec!["10.1.0.0012".to_string()]),
        ..PersistentConfig::default()
    }
}

// =============================================================================
// Asking
// =============================================================================

#[test]
fn test_get_asks_once_and_memoizes() {
    let dir = TempDir::new().unwrap();
    let frontend = ScriptedFrontEnd::new(&["Logos"]);
    let mut config = config_in(
        dir.path(),
        PersistentConfig::default(),
        frontend.clone(),
        StaticCatalog::new(&[]),
    );

    assert_eq!(config.product().unwrap(), Product::Logos);
    assert_eq!(config.product().unwrap(), Product::Logos);
    assert_eq!(frontend.questions().len(), 1);
    assert_eq!(frontend.questions()[0].1, vec!["Logos".to_string(), "Verbum".to_string()]);
    assert!(frontend.config_changes() >= 1);
}

#[test]
fn test_rejected_answer_is_asked_again() {
    let dir = TempDir::new().unwrap();
    let frontend = ScriptedFrontEnd::new(&["Libronix", "verbum"]);
    let mut config = config_in(
        dir.path(),
        PersistentConfig::default(),
        frontend.clone(),
        StaticCatalog::new(&[]),
    );

    assert_eq!(config.product().unwrap(), Product::Verbum);
    assert_eq!(frontend.questions().len(), 2);
    assert!(
        frontend
            .statuses()
            .iter()
            .any(|(message, _)| message.contains("Libronix"))
    );
    assert_eq!(config.peek(ConfigField::Product).as_deref(), Some("Verbum"));
}

#[test]
fn test_headless_missing_value_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        PersistentConfig::default(),
        Arc::new(HeadlessFrontEnd),
        StaticCatalog::new(&[]),
    );

    let result = config.product();
    assert!(matches!(result, Err(DedetaiError::Headless(_))));
}

#[test]
fn test_headless_complete_config_needs_no_answers() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        Arc::new(HeadlessFrontEnd),
        StaticCatalog::new(&[]),
    );

    assert_eq!(config.product_release().unwrap(), "10.1.0.0012");
    assert_eq!(config.wine_binary_code().unwrap(), WineBinaryCode::System);
    assert_eq!(
        config.winetricks_binary().unwrap(),
        dir.path().join("LogosBible10/data/bin/winetricks")
    );
}

#[test]
fn test_release_options_come_from_catalog_once() {
    let dir = TempDir::new().unwrap();
    let frontend = ScriptedFrontEnd::new(&["10.0.3.0001"]);
    let catalog = StaticCatalog::new(&["10.1.0.0012", "10.0.3.0001"]);
    let raw = PersistentConfig {
        faithlife_product: Some("Logos".to_string()),
        faithlife_product_version: Some("10".to_string()),
        ..PersistentConfig::default()
    };
    let mut config = config_in(dir.path(), raw, frontend.clone(), catalog.clone());

    assert_eq!(config.product_release().unwrap(), "10.0.3.0001");
    assert_eq!(
        frontend.questions()[0].1,
        vec!["10.1.0.0012".to_string(), "10.0.3.0001".to_string()]
    );
    config.product_releases().unwrap();
    assert_eq!(catalog.release_calls(), 1);
}

#[test]
fn test_install_dir_override_is_not_asked() {
    let dir = TempDir::new().unwrap();
    let frontend = ScriptedFrontEnd::new(&[]);
    let mut overrides = overrides_in(dir.path());
    overrides.install_dir = Some(PathBuf::from("/opt/LogosBible10"));
    let mut config = Config::new(
        PersistentConfig::default(),
        overrides,
        frontend.clone(),
        StaticCatalog::new(&[]),
    );

    assert_eq!(config.install_dir().unwrap(), PathBuf::from("/opt/LogosBible10"));
    assert!(frontend.questions().is_empty());
}

// =============================================================================
// Cascading invalidation
// =============================================================================

#[test]
fn test_version_change_clears_dependents() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    config.set(ConfigField::ProductVersion, "9").unwrap();

    for field in [
        ConfigField::ProductRelease,
        ConfigField::InstallDir,
        ConfigField::WineBinary,
        ConfigField::WineBinaryCode,
        ConfigField::WinetricksBinary,
    ] {
        assert_eq!(config.peek(field), None, "{field} should be cleared");
    }
    assert_eq!(config.peek(ConfigField::Product).as_deref(), Some("Logos"));
    assert!(config.peek(ConfigField::BackupDir).is_some());
    assert_eq!(config.persistent().faithlife_product_releases, None);
}

#[test]
fn test_product_change_clears_everything_but_backups() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    config.set(ConfigField::Product, "Verbum").unwrap();

    assert_eq!(config.peek(ConfigField::ProductVersion), None);
    assert_eq!(config.peek(ConfigField::WineBinary), None);
    assert!(config.peek(ConfigField::BackupDir).is_some());
}

#[test]
fn test_setting_same_value_keeps_dependents() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    config.set(ConfigField::ProductVersion, "10").unwrap();
    assert_eq!(config.peek(ConfigField::ProductRelease).as_deref(), Some("10.1.0.0012"));
    assert!(config.peek(ConfigField::WineBinary).is_some());
}

#[test]
fn test_wine_binary_change_reclassifies() {
    let dir = TempDir::new().unwrap();
    let appimage = dir.path().join("Custom-Wine.AppImage");
    std::fs::write(&appimage, b"ELF").unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    config
        .set(ConfigField::WineBinary, &appimage.display().to_string())
        .unwrap();
    assert_eq!(config.peek(ConfigField::WineBinaryCode), None);
    assert_eq!(config.wine_binary_code().unwrap(), WineBinaryCode::AppImage);
    assert_eq!(config.peek(ConfigField::WineBinaryCode).as_deref(), Some("AppImage"));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_wine_binary_must_exist_unless_recommended() {
    let dir = TempDir::new().unwrap();
    let raw = PersistentConfig {
        wine_appimage_url: Some(APPIMAGE_URL.to_string()),
        last_updated: Some(oudedetai::config_file::now_timestamp()),
        ..complete_raw(dir.path())
    };
    let mut config = config_in(
        dir.path(),
        raw,
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    let missing = config.set(ConfigField::WineBinary, "/nonexistent/bin/wine64");
    assert!(matches!(missing, Err(DedetaiError::Validation(_))));

    let target = dir.path().join("LogosBible10/data/bin").join(common::APPIMAGE_NAME);
    config
        .set(ConfigField::WineBinary, &target.display().to_string())
        .unwrap();
    assert_eq!(config.wine_binary_code().unwrap(), WineBinaryCode::Recommended);
}

#[test]
fn test_sigils_and_empty_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        PersistentConfig::default(),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    for value in ["", "   ", "Choose Directory"] {
        let result = config.set(ConfigField::InstallDir, value);
        assert!(matches!(result, Err(DedetaiError::Validation(_))), "{value:?}");
    }
    assert!(config.set(ConfigField::ProductVersion, "8").is_err());
    assert!(config.set(ConfigField::ProductRelease, "latest").is_err());
}

// =============================================================================
// Persistence and caches
// =============================================================================

#[test]
fn test_choices_survive_reload() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        PersistentConfig::default(),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );
    config.set(ConfigField::Product, "Verbum").unwrap();
    config.set(ConfigField::ProductVersion, "10").unwrap();

    let mut reloaded = Config::load(
        overrides_in(dir.path()),
        Arc::new(HeadlessFrontEnd),
        StaticCatalog::new(&[]),
    )
    .unwrap();
    assert_eq!(reloaded.product().unwrap(), Product::Verbum);
    assert_eq!(reloaded.product_version().unwrap(), "10");
}

#[test]
fn test_cache_expires_after_lifetime() {
    let dir = TempDir::new().unwrap();
    let raw = PersistentConfig {
        faithlife_product_releases: Some(vec!["10.1.0.0012".to_string()]),
        wine_appimage_url: Some(APPIMAGE_URL.to_string()),
        last_updated: Some(1_000.0),
        ..PersistentConfig::default()
    };
    let mut config = config_in(
        dir.path(),
        raw,
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    config.expire_cache(1_060.0);
    assert!(config.persistent().faithlife_product_releases.is_some());

    config.expire_cache(1_000.0 + 13.0 * 3600.0);
    assert_eq!(config.persistent().faithlife_product_releases, None);
    assert_eq!(config.persistent().wine_appimage_url, None);
}

#[test]
fn test_release_channel_toggle_drops_release_cache() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(
        dir.path(),
        complete_raw(dir.path()),
        ScriptedFrontEnd::new(&[]),
        StaticCatalog::new(&[]),
    );

    assert_eq!(config.toggle_product_release_channel(), ReleaseChannel::Beta);
    assert_eq!(config.persistent().faithlife_product_releases, None);
    assert_eq!(config.toggle_product_release_channel(), ReleaseChannel::Stable);
    assert_eq!(config.toggle_app_release_channel(), ReleaseChannel::Dev);
}
