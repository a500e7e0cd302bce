//! Wine compatibility layer
//!
//! Thin wrapper over the wine binaries: environment construction, wineserver
//! control, registry edits, winetricks and version rules. Everything runs
//! through a [`CommandRunner`] so install steps can be exercised without a
//! real wine.

use crate::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{DedetaiError, Result};
use crate::types::{Product, WineBinaryCode};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

/// Symlink name pointing at the active AppImage
pub const APPIMAGE_LINK_NAME: &str = "selected_wine.AppImage";
pub const DEFAULT_WINE_DEBUG: &str = "err+all";

// =============================================================================
// Binary classification and discovery
// =============================================================================

/// Decide how a wine binary was obtained from its path alone.
pub fn classify_binary(
    path: &Path,
    recommended_file_name: Option<&str>,
    custom_bin_dir: Option<&Path>,
) -> WineBinaryCode {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if recommended_file_name.is_some_and(|r| !r.is_empty() && r == file_name) {
        return WineBinaryCode::Recommended;
    }
    if file_name.to_ascii_lowercase().ends_with(".appimage") {
        return WineBinaryCode::AppImage;
    }

    let has_segment = |needle: &str| {
        path.components().any(|c| {
            c.as_os_str()
                .to_string_lossy()
                .to_ascii_lowercase()
                .contains(needle)
        })
    };
    if has_segment("proton") {
        return WineBinaryCode::Proton;
    }
    if has_segment("playonlinux") {
        return WineBinaryCode::PlayOnLinux;
    }
    if custom_bin_dir.is_some_and(|dir| path.starts_with(dir)) {
        return WineBinaryCode::Custom;
    }
    WineBinaryCode::System
}

/// Last path segment of a download URL.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let name = url.rsplit('/').next()?.split('?').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Directories searched for wine binaries, most specific first.
pub fn default_search_dirs(home: &Path, bin_dir: &Path, custom: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = vec![bin_dir.to_path_buf()];
    if let Some(custom) = custom {
        dirs.push(custom.to_path_buf());
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/usr/bin"));
    dirs.extend(subdirs_with_prefix(Path::new("/opt"), "wine").map(|d| d.join("bin")));
    dirs.extend(
        subdirs_with_prefix(&home.join(".steam/steam/steamapps/common"), "Proton")
            .map(|d| d.join("files/bin")),
    );
    dirs.extend(subdirs_with_prefix(&home.join(".PlayOnLinux/wine/linux-amd64"), "").map(|d| d.join("bin")));
    dirs
}

fn subdirs_with_prefix(parent: &Path, prefix: &str) -> impl Iterator<Item = PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(parent)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| e.path().is_dir() && e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| e.path())
        .collect();
    found.sort();
    found.into_iter()
}

/// `wine64` executables and wine AppImages found in `dirs`, deduplicated.
pub fn find_wine_binaries(dirs: &[PathBuf]) -> Vec<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let mut found = Vec::new();
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default();
                name == "wine64" || (name.starts_with("wine") && name.ends_with(".appimage"))
            })
            .filter(|p| {
                p.metadata()
                    .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        for candidate in candidates {
            if !found.contains(&candidate) {
                found.push(candidate);
            }
        }
    }
    found
}

// =============================================================================
// Version rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum WineBranch {
    Stable,
    Devel,
    Staging,
    Proton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WineRelease {
    pub major: u32,
    pub minor: u32,
    pub branch: WineBranch,
}

impl std::fmt::Display for WineRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wine-{}.{} ({})", self.major, self.minor, self.branch)
    }
}

/// Parse `wine --version` output such as `wine-9.10 (Staging)` or `wine-10.0-rc5`.
pub fn parse_wine_release(output: &str) -> Option<WineRelease> {
    let mut parts = output.split_whitespace();
    let version = parts.next()?.strip_prefix("wine-")?;
    let branch_hint = parts
        .next()
        .map(|b| b.trim_start_matches('(').trim_end_matches(')'));

    let mut numbers = version.split('.');
    let major: u32 = numbers.next()?.parse().ok()?;
    let minor_raw = numbers.next()?;
    let minor: u32 = minor_raw.split('-').next()?.parse().ok()?;
    if major == 0 {
        return None;
    }

    let branch = match branch_hint.and_then(|b| b.parse::<WineBranch>().ok()) {
        Some(branch) => branch,
        // x.0 is always the stable branch
        None if minor_raw.starts_with('0') => WineBranch::Stable,
        None => WineBranch::Devel,
    };

    Some(WineRelease {
        major,
        minor,
        branch,
    })
}

/// True when a dotted product release is at least `major.minor`.
pub fn release_at_least(release: &str, major: u32, minor: u32) -> bool {
    let mut parts = release.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let (rel_major, rel_minor) = (parts.next().unwrap_or(0), parts.next().unwrap_or(0));
    (rel_major, rel_minor) >= (major, minor)
}

struct WineRule {
    major: u32,
    proton: bool,
    minor_bad: &'static [u32],
    allowed: &'static [WineBranch],
    devel_allowed_from: Option<u32>,
}

const WINE_RULES: &[WineRule] = &[
    WineRule {
        major: 7,
        proton: true,
        minor_bad: &[],
        allowed: &[WineBranch::Staging, WineBranch::Proton],
        devel_allowed_from: None,
    },
    WineRule {
        major: 8,
        proton: false,
        minor_bad: &[0],
        allowed: &[WineBranch::Staging],
        devel_allowed_from: Some(16),
    },
    WineRule {
        major: 9,
        proton: false,
        minor_bad: &[],
        allowed: &[WineBranch::Devel, WineBranch::Staging],
        devel_allowed_from: None,
    },
    WineRule {
        major: 10,
        proton: false,
        minor_bad: &[],
        allowed: &[WineBranch::Stable, WineBranch::Devel, WineBranch::Staging],
        devel_allowed_from: None,
    },
];

/// Check a wine release against what the product needs.
///
/// Returns the reason on rejection.
pub fn check_wine_rules(
    release: &WineRelease,
    product_release: Option<&str>,
    product_version: &str,
) -> std::result::Result<(), String> {
    let (major_min, minor_min) = match product_version {
        "10" if product_release.is_some_and(|r| release_at_least(r, 30, 1)) => (7, 18),
        "10" => (9, 10),
        "9" => (7, 0),
        other => return Err(format!("Unknown product version {other}")),
    };

    let Some(rule) = WINE_RULES.iter().find(|r| r.major == release.major) else {
        if release.major < major_min {
            return Err(format!(
                "Wine version {}.{} is below minimum required ({major_min}.{minor_min}).",
                release.major, release.minor
            ));
        }
        return Ok(());
    };

    if !rule.allowed.contains(&release.branch) {
        let devel_ok = rule
            .devel_allowed_from
            .is_some_and(|from| release.minor >= from)
            && matches!(release.branch, WineBranch::Devel | WineBranch::Staging);
        if !devel_ok {
            return Err(format!(
                "Wine release needs to be one of {:?}. Current release: {}.",
                rule.allowed.iter().map(ToString::to_string).collect::<Vec<_>>(),
                release.branch
            ));
        }
    }
    if rule.minor_bad.contains(&release.minor) {
        return Err(format!(
            "Wine version {}.{} will not work.",
            release.major, release.minor
        ));
    }
    let below = release.major < major_min
        || (release.major == major_min && release.minor < minor_min && !rule.proton);
    if below {
        return Err(format!(
            "Wine version {}.{} is below minimum required ({major_min}.{minor_min}).",
            release.major, release.minor
        ));
    }
    Ok(())
}

// =============================================================================
// Prefix tweaks
// =============================================================================

/// Registry hive file inside the prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFile {
    User,
    System,
}

impl RegistryFile {
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::User => "user.reg",
            Self::System => "system.reg",
        }
    }
}

/// True when `marker` appears in the given hive of `prefix`.
pub fn registry_contains(prefix: &Path, hive: RegistryFile, marker: &str) -> bool {
    fs::read_to_string(prefix.join(hive.file_name()))
        .map(|text| text.contains(marker))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TweakAction {
    /// Import a `.reg` document with regedit
    RegFile { name: String, contents: String },
    /// Run winetricks with these verbs
    Winetricks(Vec<String>),
    /// Run a wine program with these arguments
    Wine(Vec<String>),
}

/// One marker-gated change to the wine prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixTweak {
    pub name: String,
    pub hive: RegistryFile,
    pub marker: String,
    pub action: TweakAction,
}

fn reg_file(name: &str, body: &str) -> TweakAction {
    TweakAction::RegFile {
        name: name.to_string(),
        contents: format!("REGEDIT4\n\n{body}\n"),
    }
}

/// Tweaks applied after prefix creation, in order.
pub fn prefix_tweaks(product: Product, skip_fonts: bool) -> Vec<PrefixTweak> {
    let mut tweaks = vec![
        PrefixTweak {
            name: "Disable winemenubuilder".to_string(),
            hive: RegistryFile::User,
            marker: "\"winemenubuilder.exe\"=\"\"".to_string(),
            action: reg_file(
                "disable-winemenubuilder",
                "[HKEY_CURRENT_USER\\Software\\Wine\\DllOverrides]\n\"winemenubuilder.exe\"=\"\"",
            ),
        },
        PrefixTweak {
            name: "Set renderer to GDI".to_string(),
            hive: RegistryFile::User,
            marker: "\"renderer\"=\"gdi\"".to_string(),
            action: reg_file(
                "renderer-gdi",
                "[HKEY_CURRENT_USER\\Software\\Wine\\Direct3D]\n\"renderer\"=\"gdi\"",
            ),
        },
        PrefixTweak {
            name: "Enable RGB font smoothing".to_string(),
            hive: RegistryFile::User,
            marker: "\"FontSmoothingType\"=dword:00000002".to_string(),
            action: reg_file(
                "fontsmoothing",
                "[HKEY_CURRENT_USER\\Control Panel\\Desktop]\n\
                 \"FontSmoothing\"=\"2\"\n\
                 \"FontSmoothingGamma\"=dword:00000578\n\
                 \"FontSmoothingOrientation\"=dword:00000001\n\
                 \"FontSmoothingType\"=dword:00000002",
            ),
        },
    ];

    if !skip_fonts {
        tweaks.push(PrefixTweak {
            name: "Install fonts".to_string(),
            hive: RegistryFile::System,
            marker: "\"Tahoma (TrueType)\"=\"tahoma.ttf\"".to_string(),
            action: TweakAction::Winetricks(vec!["corefonts".to_string(), "tahoma".to_string()]),
        });
    }

    tweaks.push(PrefixTweak {
        name: "Install d3dcompiler_47".to_string(),
        hive: RegistryFile::User,
        marker: "\"*d3dcompiler_47\"=\"native\"".to_string(),
        action: TweakAction::Winetricks(vec!["d3dcompiler_47".to_string()]),
    });
    tweaks.push(PrefixTweak {
        name: format!("Set {product} to Windows 10"),
        hive: RegistryFile::System,
        marker: "\"ProductName\"=\"Microsoft Windows 10\"".to_string(),
        action: TweakAction::Wine(
            ["winecfg", "/v", "win10"].map(String::from).to_vec(),
        ),
    });
    tweaks.push(PrefixTweak {
        name: format!("Set {product}Indexer to Windows 10"),
        hive: RegistryFile::User,
        marker: format!("[Software\\\\Wine\\\\AppDefaults\\\\{product}Indexer.exe]"),
        action: TweakAction::Wine(vec![
            "reg".to_string(),
            "add".to_string(),
            format!("HKCU\\Software\\Wine\\AppDefaults\\{product}Indexer.exe"),
            "/v".to_string(),
            "Version".to_string(),
            "/t".to_string(),
            "REG_SZ".to_string(),
            "/d".to_string(),
            "win10".to_string(),
            "/f".to_string(),
        ]),
    });
    tweaks
}

// =============================================================================
// Invocation
// =============================================================================

/// Everything needed to address one wine prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineEnv {
    pub wine64: PathBuf,
    pub wineserver: PathBuf,
    pub prefix: PathBuf,
    pub debug: String,
    pub dll_overrides: String,
}

impl WineEnv {
    /// Environment variables for a wine invocation.
    pub fn vars(&self, extra_dll_overrides: Option<&str>) -> Vec<(String, String)> {
        let mut overrides = self.dll_overrides.clone();
        if let Some(extra) = extra_dll_overrides {
            if !overrides.is_empty() {
                overrides.push(';');
            }
            overrides.push_str(extra);
        }
        let wine = self.wine64.display().to_string();
        vec![
            ("WINE".to_string(), wine.clone()),
            ("WINEDEBUG".to_string(), self.debug.clone()),
            ("WINEDLLOVERRIDES".to_string(), overrides),
            ("WINELOADER".to_string(), wine),
            ("WINEPREFIX".to_string(), self.prefix.display().to_string()),
            ("WINESERVER".to_string(), self.wineserver.display().to_string()),
        ]
    }
}

/// Runs programs inside one prefix.
#[derive(Clone)]
pub struct Wine {
    env: WineEnv,
    runner: Arc<dyn CommandRunner>,
}

impl Wine {
    pub fn new(env: WineEnv, runner: Arc<dyn CommandRunner>) -> Self {
        Self { env, runner }
    }

    pub fn env(&self) -> &WineEnv {
        &self.env
    }

    pub fn prefix(&self) -> &Path {
        &self.env.prefix
    }

    fn spec<S: AsRef<str>>(&self, args: &[S], extra_dll_overrides: Option<&str>) -> CommandSpec {
        CommandSpec::new(&self.env.wine64)
            .args(args.iter().map(|a| a.as_ref().to_string()))
            .envs(self.env.vars(extra_dll_overrides))
    }

    /// Run `wine64 <args>` to completion and require success.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<CommandOutput> {
        self.run_with_overrides(args, None)
    }

    pub fn run_with_overrides<S: AsRef<str>>(
        &self,
        args: &[S],
        extra_dll_overrides: Option<&str>,
    ) -> Result<CommandOutput> {
        let spec = self.spec(args, extra_dll_overrides);
        let output = self.runner.run(&spec)?;
        output.ensure_success(&spec.display())?;
        Ok(output)
    }

    /// Start `wine64 <args>` in the background.
    pub fn spawn<S: AsRef<str>>(&self, args: &[S]) -> Result<u32> {
        self.runner.spawn(&self.spec(args, None))
    }

    fn wineserver(&self, flag: &str) -> Result<()> {
        let spec = CommandSpec::new(&self.env.wineserver)
            .arg(flag)
            .envs(self.env.vars(None));
        self.runner.run(&spec)?.ensure_success(&spec.display())
    }

    /// `wineserver -k`
    pub fn wineserver_kill(&self) -> Result<()> {
        self.wineserver("-k")
    }

    /// `wineserver -w`: block until the prefix is idle.
    pub fn wineserver_wait(&self) -> Result<()> {
        self.wineserver("-w")
    }

    /// Query the binary's version.
    pub fn release(&self) -> Result<WineRelease> {
        let spec = CommandSpec::new(&self.env.wine64).arg("--version");
        let output = self.runner.run(&spec)?;
        output.ensure_success("wine --version")?;
        parse_wine_release(output.stdout.trim()).ok_or_else(|| {
            DedetaiError::command(format!(
                "could not parse wine version from {:?}",
                output.stdout.trim()
            ))
        })
    }

    /// Import a registry document with regedit.
    pub fn import_registry(&self, name: &str, contents: &str) -> Result<()> {
        let reg_path = self.env.prefix.join(format!("{name}.reg"));
        fs::write(&reg_path, contents)?;
        let path = reg_path.display().to_string();
        let result = self.run(&["regedit.exe", path.as_str()]);
        if let Err(e) = fs::remove_file(&reg_path) {
            debug!("Could not remove {}: {}", reg_path.display(), e);
        }
        result?;
        self.wineserver_wait()
    }

    /// Run winetricks against the prefix.
    pub fn winetricks<S: AsRef<str>>(&self, winetricks: &Path, verbs: &[S]) -> Result<()> {
        let spec = CommandSpec::new(winetricks)
            .arg("-q")
            .args(verbs.iter().map(|v| v.as_ref().to_string()))
            .envs(self.env.vars(None))
            .envs([("WINETRICKS_SUPER_QUIET", "1")]);
        self.runner.run(&spec)?.ensure_success(&spec.display())?;
        self.wineserver_wait()
    }

    /// Apply `tweak` unless its marker is already present.
    /// Returns whether anything was done.
    pub fn apply_tweak(&self, tweak: &PrefixTweak, winetricks: &Path) -> Result<bool> {
        if registry_contains(&self.env.prefix, tweak.hive, &tweak.marker) {
            debug!("{}: already applied", tweak.name);
            return Ok(false);
        }
        info!("{}", tweak.name);
        match &tweak.action {
            TweakAction::RegFile { name, contents } => self.import_registry(name, contents)?,
            TweakAction::Winetricks(verbs) => self.winetricks(winetricks, verbs)?,
            TweakAction::Wine(args) => {
                self.run(args)?;
                self.wineserver_wait()?;
            }
        }
        Ok(true)
    }

    /// Read a single value with `wine reg query`. Failures are logged, not raised.
    pub fn registry_value(&self, key: &str, name: &str) -> Option<String> {
        let spec = self.spec(&["reg", "query", key, "/v", name], None);
        match self.runner.run(&spec) {
            Ok(output) if output.success => output
                .stdout
                .lines()
                .find(|line| line.trim_start().starts_with(name))
                .and_then(|line| line.split_whitespace().last())
                .map(str::to_string),
            Ok(_) => {
                warn!("Failed to get registry value: {}\\{}", key, name);
                None
            }
            Err(e) => {
                warn!("Failed to get registry value: {}\\{}: {}", key, name, e);
                None
            }
        }
    }

    /// Turn the product's own logging on or off.
    pub fn set_app_logging(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "0001" } else { "0000" };
        self.run(&[
            "reg",
            "add",
            "HKCU\\Software\\Logos4\\Logging",
            "/v",
            "Enabled",
            "/t",
            "REG_DWORD",
            "/d",
            value,
            "/f",
        ])?;
        self.wineserver_wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        specs: Mutex<Vec<CommandSpec>>,
        stdout: String,
    }

    impl CommandRunner for Recorder {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.specs.lock().unwrap().push(spec.clone());
            Ok(CommandOutput {
                stdout: self.stdout.clone(),
                success: true,
                exit_code: Some(0),
                ..CommandOutput::default()
            })
        }

        fn spawn(&self, spec: &CommandSpec) -> Result<u32> {
            self.specs.lock().unwrap().push(spec.clone());
            Ok(4242)
        }
    }

    fn wine_in(prefix: &Path, runner: Arc<Recorder>) -> Wine {
        Wine::new(
            WineEnv {
                wine64: PathBuf::from("/opt/bin/wine64"),
                wineserver: PathBuf::from("/opt/bin/wineserver"),
                prefix: prefix.to_path_buf(),
                debug: DEFAULT_WINE_DEBUG.to_string(),
                dll_overrides: String::new(),
            },
            runner,
        )
    }

    #[test]
    fn test_classify_appimage_case_insensitive() {
        let code = classify_binary(Path::new("/home/u/wine-devel_9.19-x86_64.APPIMAGE"), None, None);
        assert_eq!(code, WineBinaryCode::AppImage);
    }

    #[test]
    fn test_classify_proton_and_system() {
        let proton = Path::new("/home/u/.steam/steam/steamapps/common/Proton 9.0/files/bin/wine64");
        assert_eq!(classify_binary(proton, None, None), WineBinaryCode::Proton);
        assert_eq!(
            classify_binary(Path::new("/usr/bin/wine64"), None, None),
            WineBinaryCode::System
        );
        assert_eq!(
            classify_binary(Path::new("/home/u/.PlayOnLinux/wine/linux-amd64/9.0/bin/wine64"), None, None),
            WineBinaryCode::PlayOnLinux
        );
    }

    #[test]
    fn test_classify_recommended_and_custom() {
        let name = "wine-devel_10.5-x86_64.AppImage";
        let path = PathBuf::from("/home/u/LogosBible10/data/bin").join(name);
        assert_eq!(classify_binary(&path, Some(name), None), WineBinaryCode::Recommended);
        assert_eq!(
            classify_binary(Path::new("/srv/mywine/bin/wine64"), None, Some(Path::new("/srv/mywine"))),
            WineBinaryCode::Custom
        );
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.org/releases/wine-devel_10.5-x86_64.AppImage").as_deref(),
            Some("wine-devel_10.5-x86_64.AppImage")
        );
        assert_eq!(file_name_from_url("https://example.org/"), None);
    }

    #[test]
    fn test_parse_wine_release() {
        let staging = parse_wine_release("wine-9.10 (Staging)").unwrap();
        assert_eq!((staging.major, staging.minor, staging.branch), (9, 10, WineBranch::Staging));

        let rc = parse_wine_release("wine-10.0-rc5").unwrap();
        assert_eq!((rc.major, rc.minor, rc.branch), (10, 0, WineBranch::Stable));

        let devel = parse_wine_release("wine-9.19").unwrap();
        assert_eq!(devel.branch, WineBranch::Devel);

        assert!(parse_wine_release("garbage").is_none());
    }

    #[test]
    fn test_wine_rules() {
        let release = |major, minor, branch| WineRelease { major, minor, branch };

        assert!(check_wine_rules(&release(10, 0, WineBranch::Stable), None, "10").is_ok());
        assert!(check_wine_rules(&release(9, 5, WineBranch::Devel), None, "10").is_err());
        assert!(check_wine_rules(&release(9, 5, WineBranch::Devel), Some("30.1.0.0008"), "10").is_ok());
        assert!(check_wine_rules(&release(8, 0, WineBranch::Staging), None, "9").is_err());
        assert!(check_wine_rules(&release(8, 16, WineBranch::Devel), None, "9").is_ok());
        assert!(check_wine_rules(&release(8, 10, WineBranch::Devel), None, "9").is_err());
        assert!(check_wine_rules(&release(9, 1, WineBranch::Stable), None, "9").is_err());
    }

    #[test]
    fn test_prefix_tweak_order() {
        let names: Vec<String> = prefix_tweaks(Product::Logos, false)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "Disable winemenubuilder",
                "Set renderer to GDI",
                "Enable RGB font smoothing",
                "Install fonts",
                "Install d3dcompiler_47",
                "Set Logos to Windows 10",
                "Set LogosIndexer to Windows 10",
            ]
        );
        assert_eq!(prefix_tweaks(Product::Verbum, true).len(), 6);
    }

    #[test]
    fn test_apply_tweak_skips_when_marker_present() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("user.reg"),
            "[Software\\\\Wine\\\\DllOverrides]\n\"winemenubuilder.exe\"=\"\"\n",
        )
        .unwrap();
        let runner = Arc::new(Recorder::default());
        let wine = wine_in(dir.path(), Arc::clone(&runner));

        let tweaks = prefix_tweaks(Product::Logos, false);
        assert!(!wine.apply_tweak(&tweaks[0], Path::new("/bin/winetricks")).unwrap());
        assert!(runner.specs.lock().unwrap().is_empty());

        assert!(wine.apply_tweak(&tweaks[1], Path::new("/bin/winetricks")).unwrap());
        let specs = runner.specs.lock().unwrap();
        assert_eq!(specs[0].args[0], "regedit.exe");
        assert_eq!(specs[1].args, vec!["-w"]);
        assert!(!dir.path().join("renderer-gdi.reg").exists());
    }

    #[test]
    fn test_env_vars_append_dll_overrides() {
        let env = WineEnv {
            wine64: PathBuf::from("/b/wine64"),
            wineserver: PathBuf::from("/b/wineserver"),
            prefix: PathBuf::from("/p"),
            debug: "-all".to_string(),
            dll_overrides: "d3d9=n".to_string(),
        };
        let vars = env.vars(Some("mscoree="));
        assert!(vars.contains(&("WINEDLLOVERRIDES".to_string(), "d3d9=n;mscoree=".to_string())));
        assert!(vars.contains(&("WINEPREFIX".to_string(), "/p".to_string())));
    }

    #[test]
    fn test_registry_value_parses_query_output() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(Recorder {
            stdout: "HKEY_CURRENT_USER\\Software\\Logos4\\Logging\n    Enabled    REG_DWORD    0x1\n".to_string(),
            ..Recorder::default()
        });
        let wine = wine_in(dir.path(), runner);
        assert_eq!(
            wine.registry_value("HKCU\\Software\\Logos4\\Logging", "Enabled").as_deref(),
            Some("0x1")
        );
    }
}
