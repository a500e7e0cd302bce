//! Downloads and release lookups
//!
//! Fetching is delegated to `curl` through the [`CommandRunner`]; this module
//! only decides what to fetch, where it lands, and how to read the answers.

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::error::{DedetaiError, Result};
use crate::types::{Product, ReleaseChannel};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const WINE_APPIMAGE_RELEASES_URL: &str =
    "https://api.github.com/repos/FaithLife-Community/wine-appimages/releases/latest";
pub const ICU_RELEASES_URL: &str =
    "https://api.github.com/repos/FaithLife-Community/icu/releases/latest";
pub const WINETRICKS_URL: &str =
    "https://raw.githubusercontent.com/Winetricks/winetricks/refs/tags/20250102/src/winetricks";
pub const PREMADE_BOTTLE_URL: &str =
    "https://github.com/ferion11/wine64_bottle_dotnet/releases/download/v5.11b/wine64_bottle.tar.gz";

/// How many product releases are offered
const RELEASE_CHOICES: usize = 5;

/// Release feed for a product version and channel
pub fn release_feed_url(product: Product, version: &str, channel: ReleaseChannel) -> String {
    format!(
        "https://clientservices.logos.com/update/v1/feed/{}{}/{}.xml",
        product.feed_name(),
        version,
        channel
    )
}

/// Fetches remote files.
pub trait Downloader: Send + Sync {
    /// Body of `url` as text.
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// Make sure `dest_dir/file_name` exists, downloading `url` if it does not.
    fn ensure_file(&self, url: &str, file_name: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Remote lookups whose answers are cached in the configuration.
pub trait ReleaseCatalog: Send + Sync {
    /// Newest-first product releases for the chosen version and channel.
    fn product_releases(
        &self,
        product: Product,
        version: &str,
        channel: ReleaseChannel,
    ) -> Result<Vec<String>>;

    /// URL of the wine AppImage we recommend.
    fn recommended_appimage_url(&self) -> Result<String>;

    /// URL of the ICU data archive.
    fn icu_archive_url(&self) -> Result<String>;
}

/// [`Downloader`] that shells out to curl.
pub struct CurlDownloader {
    runner: Arc<dyn CommandRunner>,
}

impl CurlDownloader {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Downloader for CurlDownloader {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let spec = CommandSpec::new("curl").args(["-fsSL", url]);
        let output = self.runner.run(&spec)?;
        output
            .ensure_success(&format!("fetch {url}"))
            .map_err(|e| DedetaiError::network(e.to_string()))?;
        Ok(output.stdout)
    }

    fn ensure_file(&self, url: &str, file_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let target = dest_dir.join(file_name);
        if target.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            debug!("{} already downloaded", target.display());
            return Ok(target);
        }

        fs::create_dir_all(dest_dir)?;
        let partial = dest_dir.join(format!("{file_name}.part"));
        info!("Downloading {} to {}", url, target.display());
        let spec = CommandSpec::new("curl").args([
            "-fL".to_string(),
            "--retry".to_string(),
            "3".to_string(),
            "-C".to_string(),
            "-".to_string(),
            "-o".to_string(),
            partial.display().to_string(),
            url.to_string(),
        ]);
        self.runner
            .run(&spec)?
            .ensure_success(&format!("download {url}"))
            .map_err(|e| DedetaiError::network(e.to_string()))?;
        fs::rename(&partial, &target)?;
        Ok(target)
    }
}

/// [`ReleaseCatalog`] backed by the public feeds.
pub struct OnlineCatalog {
    downloader: Arc<dyn Downloader>,
}

impl OnlineCatalog {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self { downloader }
    }

    fn latest_asset(&self, releases_url: &str, suffix: &str) -> Result<String> {
        let body = self.downloader.fetch_text(releases_url)?;
        asset_url_with_suffix(&body, suffix).ok_or_else(|| {
            DedetaiError::network(format!("no asset ending in {suffix} at {releases_url}"))
        })
    }
}

impl ReleaseCatalog for OnlineCatalog {
    fn product_releases(
        &self,
        product: Product,
        version: &str,
        channel: ReleaseChannel,
    ) -> Result<Vec<String>> {
        let url = release_feed_url(product, version, channel);
        let feed = self.downloader.fetch_text(&url)?;
        let releases = parse_release_feed(&feed, RELEASE_CHOICES)?;
        if releases.is_empty() {
            return Err(DedetaiError::network(format!("no releases listed at {url}")));
        }
        Ok(releases)
    }

    fn recommended_appimage_url(&self) -> Result<String> {
        self.latest_asset(WINE_APPIMAGE_RELEASES_URL, ".AppImage")
    }

    fn icu_archive_url(&self) -> Result<String> {
        self.latest_asset(ICU_RELEASES_URL, "icu-win.tar.gz")
    }
}

fn compare_releases(a: &str, b: &str) -> Ordering {
    let parts = |s: &str| -> Vec<u64> { s.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    parts(a).cmp(&parts(b))
}

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const LOGOS_UPDATE_NS: &str = "http://services.logos.com/update";

/// Releases listed in an update feed, newest first.
///
/// Reads `feed/entry/logos:version` only; other elements are ignored even
/// when they hold version-like text.
pub fn parse_release_feed(xml: &str, limit: usize) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| DedetaiError::network(format!("malformed release feed: {e}")))?;

    let root = doc.root_element();
    if root.tag_name().name() != "feed" || root.tag_name().namespace() != Some(ATOM_NS) {
        return Err(DedetaiError::network(format!(
            "release feed root is <{}>, expected an Atom <feed>",
            root.tag_name().name()
        )));
    }

    let mut releases: Vec<String> = Vec::new();
    let entries = root
        .children()
        .filter(|n| n.has_tag_name((ATOM_NS, "entry")));
    for entry in entries {
        let Some(version) = entry
            .children()
            .find(|n| n.has_tag_name((LOGOS_UPDATE_NS, "version")))
        else {
            continue;
        };
        let text = version.text().unwrap_or_default().trim();
        let well_formed = text.contains('.') && text.split('.').all(|p| {
            !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())
        });
        if !well_formed {
            debug!("Skipping feed entry with version {:?}", text);
            continue;
        }
        if !releases.iter().any(|r| r == text) {
            releases.push(text.to_string());
        }
    }
    releases.sort_by(|a, b| compare_releases(b, a));
    releases.truncate(limit);
    Ok(releases)
}

/// First `browser_download_url` in a GitHub release document ending with `suffix`.
pub fn asset_url_with_suffix(release_json: &str, suffix: &str) -> Option<String> {
    let doc: serde_json::Value = serde_json::from_str(release_json).ok()?;
    doc.get("assets")?
        .as_array()?
        .iter()
        .filter_map(|asset| asset.get("browser_download_url")?.as_str())
        .find(|url| url.ends_with(suffix))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeCurl {
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl CommandRunner for FakeCurl {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            // Emulate curl -o by creating the output file
            if let Some(pos) = spec.args.iter().position(|a| a == "-o") {
                fs::write(&spec.args[pos + 1], b"payload")?;
            }
            Ok(CommandOutput {
                success: true,
                exit_code: Some(0),
                ..CommandOutput::default()
            })
        }

        fn spawn(&self, _spec: &CommandSpec) -> Result<u32> {
            Ok(1)
        }
    }

    #[test]
    fn test_release_feed_url() {
        assert_eq!(
            release_feed_url(Product::Verbum, "10", ReleaseChannel::Beta),
            "https://clientservices.logos.com/update/v1/feed/verbum10/beta.xml"
        );
    }

    fn feed(entries: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:logos="http://services.logos.com/update">
  <title>Logos 30 Stable</title>
  {entries}
</feed>"#
        )
    }

    #[test]
    fn test_parse_release_feed_sorts_and_dedupes() {
        let xml = feed(
            "<entry><logos:version>30.0.0.0256</logos:version></entry>
             <entry><logos:version>30.1.0.0008</logos:version></entry>
             <entry><logos:version>30.1.0.0008</logos:version></entry>
             <entry><logos:version>29.2.0.0019</logos:version></entry>",
        );
        assert_eq!(
            parse_release_feed(&xml, 2).unwrap(),
            vec!["30.1.0.0008".to_string(), "30.0.0.0256".to_string()]
        );
    }

    #[test]
    fn test_parse_release_feed_ignores_other_version_elements() {
        let xml = feed(
            "<entry>
               <logos:minimumOSVersion>10.0</logos:minimumOSVersion>
               <logos:version>30.1.0.0008</logos:version>
             </entry>
             <entry><minimumVersion>9.1</minimumVersion><title>9.1</title></entry>
             <entry><logos:version>latest</logos:version></entry>
             <logos:version>31.0.0.0001</logos:version>",
        );
        assert_eq!(parse_release_feed(&xml, 5).unwrap(), vec!["30.1.0.0008".to_string()]);
    }

    #[test]
    fn test_parse_release_feed_rejects_non_feed() {
        assert!(matches!(
            parse_release_feed("<html><body>maintenance</body></html>", 5),
            Err(DedetaiError::Network(_))
        ));
        assert!(matches!(
            parse_release_feed("<feed><entry>", 5),
            Err(DedetaiError::Network(_))
        ));
    }

    #[test]
    fn test_asset_url_with_suffix() {
        let doc = r#"{"assets": [
            {"browser_download_url": "https://x/wine.zsync"},
            {"browser_download_url": "https://x/wine-devel_10.5-x86_64.AppImage"}
        ]}"#;
        assert_eq!(
            asset_url_with_suffix(doc, ".AppImage").as_deref(),
            Some("https://x/wine-devel_10.5-x86_64.AppImage")
        );
        assert_eq!(asset_url_with_suffix("not json", ".AppImage"), None);
    }

    #[test]
    fn test_ensure_file_downloads_once() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeCurl::default());
        let downloader = CurlDownloader::new(runner.clone());

        let path = downloader
            .ensure_file("https://x/Logos_v30.1-x64.msi", "Logos_v30.1-x64.msi", dir.path())
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");

        downloader
            .ensure_file("https://x/Logos_v30.1-x64.msi", "Logos_v30.1-x64.msi", dir.path())
            .unwrap();
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
        assert!(!dir.path().join("Logos_v30.1-x64.msi.part").exists());
    }
}
