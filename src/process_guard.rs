//! Process lifecycle management for external tools
//!
//! Every provisioning tool (`wipefs`, `parted`, `cryptsetup`, `pacstrap`, ...)
//! runs as a child of this process. If the installer dies or is interrupted
//! while one of them is writing to the disk, the child must not keep going
//! on its own.
//!
//! - Children are spawned in their own process group with a parent-death signal
//! - Their PIDs are tracked in a global registry
//! - SIGINT/SIGTERM/SIGHUP raise a cancellation request and terminate the
//!   tracked groups (SIGTERM, then SIGKILL after a grace period)
//! - The pipeline polls [`cancel_requested`] between stages and unwinds
//!   through the normal error path, so cleanup still runs
//!
//! A second signal while a cancellation is already pending exits at once,
//! after [`CleanupRegistry::run`] has wiped live key files and removed the
//! working directory. Destructors do not run on that path.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();
static CLEANUP_REGISTRY: OnceLock<Arc<Mutex<CleanupRegistry>>> = OnceLock::new();

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether an operator signal asked the run to stop.
pub fn cancel_requested() -> bool {
    CANCEL_REQUESTED.load(Ordering::SeqCst)
}

/// Registry tracking spawned tool processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, then SIGKILL whatever outlives
    /// `grace_period`.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            return;
        }
        let pids: Vec<u32> = self.pids.drain().collect();
        tracing::info!("Stopping {} running tool(s)", pids.len());

        signal_groups(&pids, Signal::SIGTERM);

        let deadline = Instant::now() + grace_period;
        while Instant::now() < deadline {
            if !pids.iter().any(|&pid| is_process_alive(pid)) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let stubborn: Vec<u32> = pids.into_iter().filter(|&pid| is_process_alive(pid)).collect();
        if !stubborn.is_empty() {
            tracing::warn!("Killing {} tool(s) that ignored SIGTERM", stubborn.len());
            signal_groups(&stubborn, Signal::SIGKILL);
        }
    }
}

/// Filesystem state that must not outlive the process.
///
/// Owners register on creation and unregister once their own `Drop` has
/// cleaned up. Only the forced-exit path calls [`CleanupRegistry::run`].
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    /// Key file path and the number of bytes to overwrite.
    key_files: HashMap<PathBuf, usize>,
    dirs: HashSet<PathBuf>,
}

impl CleanupRegistry {
    pub fn global() -> Arc<Mutex<CleanupRegistry>> {
        CLEANUP_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(CleanupRegistry::default())))
            .clone()
    }

    pub fn register_key_file(&mut self, path: &Path, size: usize) {
        self.key_files.insert(path.to_path_buf(), size);
    }

    pub fn unregister_key_file(&mut self, path: &Path) {
        self.key_files.remove(path);
    }

    pub fn register_dir(&mut self, path: &Path) {
        self.dirs.insert(path.to_path_buf());
    }

    pub fn unregister_dir(&mut self, path: &Path) {
        self.dirs.remove(path);
    }

    pub fn is_empty(&self) -> bool {
        self.key_files.is_empty() && self.dirs.is_empty()
    }

    /// Zero and unlink every key file, then remove every directory.
    pub fn run(&mut self) {
        for (path, size) in self.key_files.drain() {
            if let Ok(mut file) = OpenOptions::new().write(true).open(&path) {
                let _ = file.write_all(&vec![0u8; size]);
                let _ = file.sync_all();
            }
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove key file {}: {}", path.display(), e);
            }
        }
        for dir in self.dirs.drain() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => tracing::info!("Removed {}", dir.display()),
                Err(e) => tracing::warn!("Failed to remove {}: {}", dir.display(), e),
            }
        }
    }
}

/// Signal each group, falling back to the bare PID when the group is gone.
fn signal_groups(pids: &[u32], signal: Signal) {
    for &pid in pids {
        if let Err(group_err) = send_signal_to_group(pid, signal) {
            if let Err(e) = send_signal(pid, signal) {
                tracing::debug!("{} to {} failed: {} / {}", signal, pid, group_err, e);
            }
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group, so grandchildren spawned by
/// `arch-chroot` or `pacstrap` receive the signal too.
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Running, as opposed to gone or a zombie.
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all tracked children on drop.
/// Held by `main` for the whole run.
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
        tracing::debug!("ProcessGuard dropped, terminating remaining children");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
/// Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            if CANCEL_REQUESTED.swap(true, Ordering::SeqCst) {
                tracing::warn!("Received {} again, exiting immediately", signal_name);
                if let Ok(mut registry) = ChildRegistry::global().lock() {
                    registry.terminate_all(Duration::from_millis(500));
                }
                if let Ok(mut cleanup) = CleanupRegistry::global().lock() {
                    cleanup.run();
                }
                std::process::exit(128 + sig);
            }

            tracing::warn!("Received {}, cancelling installation...", signal_name);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of its own process group, and have the
    /// kernel send it SIGTERM if this process dies first.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between
        // fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
