//! Lifecycle management for ssh/sftp child processes
//!
//! Every remote step is an OpenSSH client process. If the deploy is
//! interrupted (Ctrl+C, SIGTERM from CI, a step timeout) those local clients
//! and anything else in their process group are torn down.
//!
//! This only covers the local side. Without a pty (`ssh -tt`) sshd does not
//! signal the remote `sh` when the client goes away, so a remote
//! `pip install` may still run to completion on the target.
//!
//! - Children are spawned in their own process group with a parent-death signal
//! - Their group IDs live in a global registry
//! - On a signal or guard drop every group gets SIGTERM, then SIGKILL after a grace period

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry of running transport process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    groups: HashSet<u32>,
    /// Set once a shutdown sweep has run
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.groups.insert(pid);
        tracing::debug!(pid, "registered transport process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.groups.remove(&pid);
        tracing::debug!(pid, "unregistered transport process");
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// Terminate every tracked group. Runs at most once per registry.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.groups.is_empty() {
            return;
        }

        tracing::info!("terminating {} transport process group(s)", self.groups.len());
        let groups: Vec<u32> = self.groups.drain().collect();
        for &pgid in &groups {
            signal_group(pgid, Signal::SIGTERM);
        }
        wait_or_kill(&groups, grace_period);
    }
}

/// Register a freshly spawned child with the global registry
pub fn register_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }
}

/// Remove a finished child from the global registry
pub fn unregister_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }
}

/// SIGTERM one process group, SIGKILL it if still alive after `grace_period`.
pub fn terminate_group(pgid: u32, grace_period: Duration) {
    signal_group(pgid, Signal::SIGTERM);
    wait_or_kill(&[pgid], grace_period);
}

fn signal_group(pgid: u32, sig: Signal) {
    let group = Pid::from_raw(pgid as i32);
    // Fall back to the leader alone if the group is already gone
    if let Err(e) = signal::killpg(group, sig) {
        tracing::debug!(pgid, error = %e, "killpg failed, signalling leader");
        let _ = signal::kill(group, sig);
    }
}

fn wait_or_kill(groups: &[u32], grace_period: Duration) {
    let deadline = Instant::now() + grace_period;
    while Instant::now() < deadline {
        if groups.iter().all(|&pgid| !leader_alive(pgid)) {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    for &pgid in groups.iter().filter(|&&pgid| leader_alive(pgid)) {
        tracing::warn!(pgid, "process group ignored SIGTERM, sending SIGKILL");
        signal_group(pgid, Signal::SIGKILL);
    }
}

/// Leader exists and is not a zombie (`/proc/<pid>/stat` state Z or X)
fn leader_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // comm may contain spaces; the state follows its closing paren
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// RAII guard held by `main`; sweeps the registry on every exit path
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
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
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            tracing::warn!("received {}, aborting deployment", name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate the child in its own group
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions (setpgid, prctl)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn wait_for_process_death(child: &mut std::process::Child, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(_)) = child.try_wait() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");

        let mut registry = ChildRegistry::default();
        registry.register(child.id());
        registry.terminate_all(Duration::from_millis(500));

        assert!(wait_for_process_death(&mut child, Duration::from_secs(2)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_group_escalates_to_sigkill() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sh");

        std::thread::sleep(Duration::from_millis(50));
        terminate_group(child.id(), Duration::from_millis(200));

        assert!(wait_for_process_death(&mut child, Duration::from_secs(3)));
    }

    #[test]
    fn test_cleanup_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.register(999_999);
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1, "second sweep must be a no-op");
    }

    #[test]
    fn test_leader_alive_nonexistent() {
        assert!(!leader_alive(999_999));
    }
}
