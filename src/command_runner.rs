//! External command execution
//!
//! Every external program (wine, winetricks, curl, tar) goes through a
//! [`CommandRunner`]. The system implementation spawns in a new process group
//! and registers the PID with the [`ChildRegistry`](crate::process_guard)
//! so an interrupted run never leaves wine helpers behind. Tests substitute a
//! recording runner.

use crate::error::{DedetaiError, Result};
use crate::process_guard::{CommandProcessGroup, register_child, unregister_child};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// A program invocation: path, arguments, extra environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Program and arguments as a single line for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// File name of the program, used to label tracked process groups.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).in_new_process_group();
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Output from a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Turn a failed exit into a [`DedetaiError::Command`].
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self.exit_code.unwrap_or(-1);
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(DedetaiError::command(format!("{context} (exit code {code})")))
        } else {
            Err(DedetaiError::command(format!(
                "{context} (exit code {code}): {stderr}"
            )))
        }
    }
}

/// Runs external programs.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Start in the background and return the PID. The child is reaped by
    /// the runner.
    fn spawn(&self, spec: &CommandSpec) -> Result<u32>;
}

/// Runner backed by `std::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    /// Background process output is appended here (the wine log)
    log_path: Option<PathBuf>,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log_path: impl AsRef<Path>) -> Self {
        Self {
            log_path: Some(log_path.as_ref().to_path_buf()),
        }
    }

    fn background_stdio(&self) -> (Stdio, Stdio) {
        let Some(path) = &self.log_path else {
            return (Stdio::null(), Stdio::null());
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log = OpenOptions::new().create(true).append(true).open(path);
        match log.and_then(|out| out.try_clone().map(|err| (out, err))) {
            Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
            Err(e) => {
                warn!("Cannot open {}: {}", path.display(), e);
                (Stdio::null(), Stdio::null())
            }
        }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        info!("Running: {}", spec.display());
        debug!("Environment overrides: {:?}", spec.env);

        let child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DedetaiError::command(format!("failed to spawn {}: {e}", spec.display())))?;
        let pid = child.id();
        register_child(pid, spec.program_name());

        let output = child.wait_with_output();
        unregister_child(pid);
        let output = output?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        if !result.success {
            debug!(
                "{} exited with {:?}: {}",
                spec.program.display(),
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<u32> {
        info!("Starting: {}", spec.display());
        let (stdout, stderr) = self.background_stdio();
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| DedetaiError::command(format!("failed to spawn {}: {e}", spec.display())))?;
        let pid = child.id();
        register_child(pid, spec.program_name());

        std::thread::spawn(move || {
            match child.wait() {
                Ok(status) => debug!("Background PID {} exited: {}", pid, status),
                Err(e) => warn!("Failed waiting for PID {}: {}", pid, e),
            }
            unregister_child(pid);
        });

        Ok(pid)
    }
}
