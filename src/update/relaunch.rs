use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{Result, UpdateError};

/// Everything needed to start the replacement process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchRequest {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl RelaunchRequest {
    /// Same arguments and working directory as the running process
    pub fn for_current_process(executable: PathBuf) -> Self {
        Self {
            executable,
            args: env::args_os().skip(1).collect(),
            working_dir: env::current_dir().ok(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        detach_session(&mut cmd);
        cmd
    }

    /// Start the child; returns as soon as it has been spawned
    pub fn spawn(&self) -> Result<Child> {
        self.command()
            .spawn()
            .map_err(|source| UpdateError::Relaunch {
                path: self.executable.clone(),
                source,
            })
    }
}

/// Put the child in its own session so it outlives our terminal and signals
#[cfg(unix)]
fn detach_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_session(_cmd: &mut Command) {}

/// Replaces the current process with a fresh one
pub trait Relauncher: Send + Sync {
    fn relaunch(&self, request: &RelaunchRequest);
}

/// Spawns the new binary and exits. A spawn failure is fatal: the running
/// image's file has already been moved aside, so there is nothing to fall
/// back to.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRelauncher;

impl Relauncher for ProcessRelauncher {
    fn relaunch(&self, request: &RelaunchRequest) {
        match request.spawn() {
            Ok(child) => {
                info!(
                    "Started {} as pid {}, exiting",
                    request.executable.display(),
                    child.id()
                );
                std::process::exit(0);
            }
            Err(e) => {
                error!("Relaunch failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

enum Signal {
    Cancel,
    FireNow,
}

/// Handle to a relaunch waiting out its delay on a background thread.
///
/// Dropping the handle does not cancel the relaunch.
pub struct PendingRelaunch {
    signal: Sender<Signal>,
    handle: JoinHandle<()>,
    deadline: Instant,
}

impl fmt::Debug for PendingRelaunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRelaunch")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl PendingRelaunch {
    /// Time left before the relaunch fires on its own
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(self) {
        self.finish(Some(Signal::Cancel));
    }

    /// Skip the rest of the delay
    pub fn fire_now(self) {
        self.finish(Some(Signal::FireNow));
    }

    /// Block until the relaunch has run
    pub fn wait(self) {
        self.finish(None);
    }

    fn finish(self, signal: Option<Signal>) {
        if let Some(signal) = signal {
            // The worker may already be gone if the delay elapsed
            let _ = self.signal.send(signal);
        }
        if self.handle.join().is_err() {
            warn!("Relaunch worker panicked");
        }
    }
}

/// Run `relauncher` with `request` after `delay` on a background thread
pub fn schedule(
    delay: Duration,
    relauncher: Arc<dyn Relauncher>,
    request: RelaunchRequest,
) -> PendingRelaunch {
    let (tx, rx) = mpsc::channel();
    let deadline = Instant::now() + delay;

    info!("Restarting in {}s", delay.as_secs());
    let handle = thread::spawn(move || {
        let fire = match rx.recv_timeout(delay) {
            Ok(Signal::FireNow) | Err(RecvTimeoutError::Timeout) => true,
            Ok(Signal::Cancel) => false,
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                true
            }
        };

        if fire {
            relauncher.relaunch(&request);
        } else {
            info!("Relaunch of {} cancelled", request.executable.display());
        }
    });

    PendingRelaunch {
        signal: tx,
        handle,
        deadline,
    }
}
