//! Type-safe configuration types for oudedetai
//!
//! Stringly-typed values from the config file and the environment are parsed
//! into these enums at the edges so the rest of the crate can match
//! exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Faithlife product managed by this tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Product {
    Logos,
    Verbum,
}

impl Product {
    /// Path segment used by the installer download URL
    pub const fn url_segment(self) -> &'static str {
        match self {
            Self::Logos => "/",
            Self::Verbum => "/Verbum/",
        }
    }

    /// Lowercase name used by release feeds
    pub const fn feed_name(self) -> &'static str {
        match self {
            Self::Logos => "logos",
            Self::Verbum => "verbum",
        }
    }
}

/// Supported major versions of the product, newest first
pub const PRODUCT_VERSIONS: &[&str] = &["10", "9"];

/// Release channel for either the product or this tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Beta,
    Dev,
}

/// How the selected Wine binary was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum WineBinaryCode {
    /// The AppImage we recommend and download ourselves
    Recommended,
    /// A user-supplied AppImage
    AppImage,
    /// Wine from the distribution
    System,
    Proton,
    PlayOnLinux,
    /// Binary under the user's custom binary path
    Custom,
}

impl WineBinaryCode {
    /// Whether the binary is an AppImage that must be linked into the bin dir
    pub const fn is_appimage(self) -> bool {
        matches!(self, Self::Recommended | Self::AppImage)
    }
}

/// Observed lifecycle of a managed subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ManagedState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Direction of a backup engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackupMode {
    Backup,
    Restore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_product_parses_case_insensitively() {
        assert_eq!(Product::from_str("logos").ok(), Some(Product::Logos));
        assert_eq!(Product::from_str("Verbum").ok(), Some(Product::Verbum));
        assert!(Product::from_str("Libronix").is_err());
    }

    #[test]
    fn test_product_display_round_trips_through_json() {
        let json = serde_json::to_string(&Product::Verbum).unwrap_or_default();
        assert_eq!(json, "\"Verbum\"");
        assert_eq!(Product::Logos.to_string(), "Logos");
    }

    #[test]
    fn test_release_channel_lowercase() {
        assert_eq!(ReleaseChannel::Beta.to_string(), "beta");
        assert_eq!(ReleaseChannel::from_str("STABLE").ok(), Some(ReleaseChannel::Stable));
    }

    #[test]
    fn test_appimage_codes() {
        let appimage: Vec<_> = WineBinaryCode::iter().filter(|c| c.is_appimage()).collect();
        assert_eq!(appimage, vec![WineBinaryCode::Recommended, WineBinaryCode::AppImage]);
    }

    #[test]
    fn test_managed_state_display() {
        assert_eq!(ManagedState::Running.to_string(), "RUNNING");
        assert_eq!(ManagedState::default(), ManagedState::Stopped);
    }
}
