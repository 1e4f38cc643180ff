//! Backend process spawning and termination.
//!
//! The residency table exclusively owns each handle; termination only ever
//! happens through the lifecycle controller.

use std::process::{Child, Command};

use crate::error::{GatewayError, Result};

/// A spawned backend inference process.
pub trait ModelProcess: Send {
    /// OS process id, if the handle is still attached.
    fn id(&self) -> Option<u32>;

    /// Ask the backend to exit. Idempotent; must not block on the exit.
    fn terminate(&mut self);
}

/// Spawns backend processes from their catalog `load_command`.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &str) -> Result<Box<dyn ModelProcess>>;
}

/// Production spawner running the load command through `sh -c`.
pub struct ShellSpawner;

impl ProcessSpawner for ShellSpawner {
    fn spawn(&self, command: &str) -> Result<Box<dyn ModelProcess>> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|e| GatewayError::SpawnFailed(format!("{:?}: {}", command, e)))?;
        tracing::debug!("Spawned backend pid {} for {:?}", child.id(), command);
        Ok(Box::new(ShellProcess { child: Some(child) }))
    }
}

struct ShellProcess {
    child: Option<Child>,
}

impl ModelProcess for ShellProcess {
    fn id(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                tracing::warn!("SIGTERM to pid {} failed: {}", child.id(), e);
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = child.kill() {
                tracing::warn!("Killing pid {} failed: {}", child.id(), e);
            }
        }

        // Reap off the hot path; the backend may take a while to exit.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
    }
}
