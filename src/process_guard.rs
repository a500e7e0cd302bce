//! Lifecycle of the helper processes we start
//!
//! Wine helpers (`wineboot`, `msiexec`, `winetricks`) and the managed
//! application are each started as the leader of a fresh process group, so
//! signalling the group reaches `wineserver` and friends as well. Live groups
//! are kept in a global [`ChildRegistry`] keyed by leader PID.
//!
//! Teardown is two-phase: SIGTERM to every group, a grace period, then
//! SIGKILL for whatever is left. It runs at most once per registry.
//!
//! Signals are read on a dedicated thread. The first SIGINT only raises the
//! interrupt flag so long operations can unwind at their next checkpoint.
//! A second SIGINT, or any SIGTERM or SIGHUP, tears the groups down and
//! exits with `128 + signal`.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Grace period when the guard goes out of scope at normal exit.
pub const EXIT_GRACE: Duration = Duration::from_secs(5);
/// Grace period when a terminating signal arrived.
pub const SIGNAL_GRACE: Duration = Duration::from_secs(3);

const SURVIVOR_POLL: Duration = Duration::from_millis(100);

static REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();
static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// What a teardown did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Teardown {
    /// Groups gone before the grace period ran out
    pub exited: Vec<u32>,
    /// Groups that needed SIGKILL
    pub killed: Vec<u32>,
}

/// Process groups started by us that have not been reaped yet.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Group leader PID → program name, for log lines
    groups: HashMap<u32, String>,
    torn_down: bool,
}

impl ChildRegistry {
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32, label: impl Into<String>) {
        let label = label.into();
        debug!("Tracking {} (PID {})", label, pid);
        self.groups.insert(pid, label);
    }

    pub fn unregister(&mut self, pid: u32) {
        if let Some(label) = self.groups.remove(&pid) {
            debug!("{} (PID {}) reaped", label, pid);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn label(&self, pid: u32) -> &str {
        self.groups.get(&pid).map(String::as_str).unwrap_or("child")
    }

    /// Signal every tracked group with `signal`, falling back to the leader alone.
    fn signal_all(&self, pids: &[u32], signal: Signal) {
        for &pid in pids {
            if let Err(group_err) = signal_group(pid, signal) {
                debug!(
                    "{} to group {} failed ({}), signalling leader",
                    signal, pid, group_err
                );
                if let Err(e) = signal_pid(pid, signal) {
                    warn!("Cannot send {} to {} (PID {}): {}", signal, self.label(pid), pid, e);
                }
            }
        }
    }

    /// SIGTERM every group, wait up to `grace`, SIGKILL the rest.
    pub fn terminate_all(&mut self, grace: Duration) -> Teardown {
        if self.torn_down {
            debug!("Teardown already ran");
            return Teardown::default();
        }
        self.torn_down = true;

        let mut pids: Vec<u32> = self.groups.keys().copied().collect();
        if pids.is_empty() {
            return Teardown::default();
        }
        pids.sort_unstable();
        info!("Stopping {} helper process group(s)", pids.len());

        self.signal_all(&pids, Signal::SIGTERM);

        let deadline = Instant::now() + grace;
        let mut survivors = pids.clone();
        while !survivors.is_empty() && Instant::now() < deadline {
            std::thread::sleep(SURVIVOR_POLL);
            survivors.retain(|&pid| is_process_alive(pid));
        }

        if !survivors.is_empty() {
            for &pid in &survivors {
                error!("{} (PID {}) ignored SIGTERM, killing", self.label(pid), pid);
            }
            self.signal_all(&survivors, Signal::SIGKILL);
        }

        let exited = pids
            .iter()
            .copied()
            .filter(|pid| !survivors.contains(pid))
            .collect();
        self.groups.clear();
        Teardown {
            exited,
            killed: survivors,
        }
    }
}

/// Track a freshly spawned group leader.
pub fn register_child(pid: u32, label: impl Into<String>) {
    match ChildRegistry::global().lock() {
        Ok(mut registry) => registry.register(pid, label),
        Err(e) => warn!("Child registry poisoned, PID {} untracked: {}", pid, e),
    }
}

pub fn unregister_child(pid: u32) {
    match ChildRegistry::global().lock() {
        Ok(mut registry) => registry.unregister(pid),
        Err(e) => warn!("Child registry poisoned, PID {} left tracked: {}", pid, e),
    }
}

fn signal_pid(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// A negative PID addresses the whole group.
fn signal_group(leader: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(leader as i32)), signal)
}

/// SIGKILL a single process, used for processes we only observed.
pub fn force_kill(pid: u32) -> Result<(), nix::Error> {
    signal_pid(pid, Signal::SIGKILL)
}

/// Whether `pid` exists and is neither a zombie nor dead.
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !matches!(proc_state(&stat), Some('Z' | 'X')),
        Err(_) => true,
    }
}

/// State letter from a `/proc/<pid>/stat` line.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses (`wine64-preloader`, `C:\windows\system32\...`), so the state
/// is read after the last `)`.
fn proc_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

/// Terminates every tracked group when dropped. `main` holds one for the
/// lifetime of the process.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            let teardown = registry.terminate_all(EXIT_GRACE);
            if !teardown.killed.is_empty() {
                warn!("Force-killed helper groups: {:?}", teardown.killed);
            }
        }
    }
}

/// Process-wide flag raised by the first SIGINT.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    INTERRUPTED
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

/// Start the signal thread for SIGINT, SIGTERM and SIGHUP.
pub fn init_signal_handlers() -> Result<Arc<AtomicBool>, std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let interrupted = interrupt_flag();
    let flag = Arc::clone(&interrupted);
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("oudedetai-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                if sig == SIGINT && !flag.swap(true, Ordering::SeqCst) {
                    info!("Interrupt received, cancelling at the next checkpoint");
                    continue;
                }
                let name = Signal::try_from(sig).map(|s| s.as_str()).unwrap_or("signal");
                info!("{} received, shutting down", name);
                if let Ok(mut registry) = ChildRegistry::global().lock() {
                    registry.terminate_all(SIGNAL_GRACE);
                }
                std::process::exit(128 + sig);
            }
        })?;

    Ok(interrupted)
}

/// Start a [`std::process::Command`] as the leader of a new process group.
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls run between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                // Die with the spawning thread so a crash never strands msiexec
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use std::process::Command;

    /// Reap `pid` or wait for it to vanish.
    fn reaped_within(pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return true,
                Err(nix::errno::Errno::ECHILD) if !is_process_alive(pid) => return true,
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        false
    }

    #[test]
    fn test_register_and_reap() {
        let mut registry = ChildRegistry::default();
        registry.register(1234, "wineboot");
        registry.register(5678, "msiexec");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.label(5678), "msiexec");

        registry.unregister(1234);
        registry.unregister(1234);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_teardown_stops_a_sleeping_group() {
        let child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid, "sleep");
        assert!(is_process_alive(pid));

        let teardown = registry.terminate_all(Duration::from_secs(2));

        assert!(reaped_within(pid, Duration::from_secs(2)));
        assert!(registry.is_empty());
        assert_eq!(teardown.exited.len() + teardown.killed.len(), 1);
    }

    #[test]
    fn test_teardown_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999, "ghost");
        registry.terminate_all(Duration::from_millis(10));

        registry.register(999_998, "ghost");
        assert_eq!(registry.terminate_all(Duration::from_millis(10)), Teardown::default());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_proc_state_skips_command_name() {
        assert_eq!(proc_state("42 (sleep) S 1 42 42"), Some('S'));
        assert_eq!(proc_state("42 (wine64 (pre) loader) Z 1 42"), Some('Z'));
        assert_eq!(proc_state("garbage"), None);
    }

    #[test]
    fn test_missing_pid_is_not_alive() {
        assert!(force_kill(999_999).is_err());
        assert!(!is_process_alive(999_999));
    }

    #[test]
    fn test_interrupt_flag_is_shared() {
        assert!(Arc::ptr_eq(&interrupt_flag(), &interrupt_flag()));
    }
}
