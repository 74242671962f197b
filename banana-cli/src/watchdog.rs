use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

/// Wall-clock ceiling for a whole invocation.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
/// Same code `timeout(1)` uses.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Process-wide deadline enforced from a supervising thread.
///
/// Dropping the watchdog disarms it.
#[derive(Debug)]
pub struct Watchdog {
    disarm: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Terminate the process with [`TIMEOUT_EXIT_CODE`] once `deadline` passes.
    pub fn arm(deadline: Duration) -> io::Result<Self> {
        Self::arm_with(deadline, move || expire(deadline))
    }

    /// Run `on_expire` on the watchdog thread once `deadline` passes.
    pub fn arm_with<F>(deadline: Duration, on_expire: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (disarm, expired) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(deadline) {
                    on_expire();
                }
            })?;

        Ok(Self {
            disarm: Some(disarm),
            handle: Some(handle),
        })
    }
}

/// Diagnostic emitted when the deadline passes.
pub fn timeout_message(deadline: Duration) -> String {
    if deadline.subsec_nanos() == 0 {
        format!("timed out after {}s", deadline.as_secs())
    } else {
        format!("timed out after {}ms", deadline.as_millis())
    }
}

fn expire(deadline: Duration) -> ! {
    error!("{}", timeout_message(deadline));
    std::process::exit(TIMEOUT_EXIT_CODE);
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        drop(self.disarm.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
