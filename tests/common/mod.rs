//! Shared fakes for the integration tests.
//!
//! A scripted front-end that answers from a queue, a release catalog with
//! fixed answers, a downloader that writes placeholder files and a command
//! runner that records instead of running.

#![allow(dead_code)]

use oudedetai::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use oudedetai::config::{Config, EphemeralConfig};
use oudedetai::config_file::PersistentConfig;
use oudedetai::error::{DedetaiError, Result};
use oudedetai::frontend::FrontEnd;
use oudedetai::network::{Downloader, ReleaseCatalog};
use oudedetai::types::{Product, ReleaseChannel};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const APPIMAGE_URL: &str =
    "https://example.invalid/releases/download/v10.0-1/wine-devel_10.0-x86_64.AppImage";
pub const APPIMAGE_NAME: &str = "wine-devel_10.0-x86_64.AppImage";

// =============================================================================
// Front-end
// =============================================================================

/// Answers questions from a fixed script and records everything it is told.
pub struct ScriptedFrontEnd {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<(String, Vec<String>)>>,
    statuses: Mutex<Vec<(String, Option<u8>)>>,
    config_changes: AtomicUsize,
}

impl ScriptedFrontEnd {
    pub fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            questions: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            config_changes: AtomicUsize::new(0),
        })
    }

    pub fn questions(&self) -> Vec<(String, Vec<String>)> {
        self.questions.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, Option<u8>)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.statuses().into_iter().filter_map(|(_, p)| p).collect()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }

    pub fn config_changes(&self) -> usize {
        self.config_changes.load(Ordering::SeqCst)
    }
}

impl FrontEnd for ScriptedFrontEnd {
    fn ask(&self, question: &str, options: &[String]) -> Result<String> {
        self.questions
            .lock()
            .unwrap()
            .push((question.to_string(), options.to_vec()));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DedetaiError::cancelled(format!("unscripted question: {question}")))
    }

    fn status(&self, message: &str, percent: Option<u8>) {
        self.statuses
            .lock()
            .unwrap()
            .push((message.to_string(), percent));
    }

    fn config_changed(&self) {
        self.config_changes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Network
// =============================================================================

/// Catalog with canned answers that counts release lookups.
pub struct StaticCatalog {
    pub releases: Vec<String>,
    release_calls: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(releases: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            releases: releases.iter().map(|r| r.to_string()).collect(),
            release_calls: AtomicUsize::new(0),
        })
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

impl ReleaseCatalog for StaticCatalog {
    fn product_releases(
        &self,
        _product: Product,
        _version: &str,
        _channel: ReleaseChannel,
    ) -> Result<Vec<String>> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.releases.clone())
    }

    fn recommended_appimage_url(&self) -> Result<String> {
        Ok(APPIMAGE_URL.to_string())
    }

    fn icu_archive_url(&self) -> Result<String> {
        Ok("https://example.invalid/icu/icu-win-72.1.tar.gz".to_string())
    }
}

/// Writes a placeholder file instead of downloading.
#[derive(Default)]
pub struct FakeDownloader {
    fetched: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Downloader for FakeDownloader {
    fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(String::new())
    }

    fn ensure_file(&self, url: &str, file_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let target = dest_dir.join(file_name);
        if !target.is_file() {
            self.fetched.lock().unwrap().push(url.to_string());
            fs::create_dir_all(dest_dir)?;
            fs::write(&target, format!("payload from {url}"))?;
        }
        Ok(target)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Records every command line and reports success.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(spec.display());
        Ok(CommandOutput {
            success: true,
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<u32> {
        self.commands.lock().unwrap().push(spec.display());
        Ok(4242)
    }
}

// =============================================================================
// Config
// =============================================================================

/// Overrides that keep every path inside `dir`.
pub fn overrides_in(dir: &Path) -> EphemeralConfig {
    let mut overrides = EphemeralConfig::new(dir.join("oudedetai.json"));
    overrides.download_dir = Some(dir.join("downloads"));
    overrides.app_log_path = Some(dir.join("oudedetai.log"));
    overrides.app_wine_log_path = Some(dir.join("wine.log"));
    overrides
}

/// A configuration rooted in `dir` starting from `raw`.
pub fn config_in(
    dir: &Path,
    raw: PersistentConfig,
    frontend: Arc<dyn FrontEnd>,
    catalog: Arc<dyn ReleaseCatalog>,
) -> Config {
    Config::new(raw, overrides_in(dir), frontend, catalog)
}
