//! Pause/cancel context shared by every worker of a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often a paused worker re-checks the flags.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct Flags {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

/// Cheap to clone; all clones observe the same flags.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    flags: Arc<Flags>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    /// Cancellation is sticky. A paused run that is cancelled unblocks.
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    /// Suspension point: returns immediately when running, blocks while
    /// paused, and fails once the run is cancelled.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        loop {
            if self.is_cancelled() {
                return Err(Cancelled);
            }
            if !self.is_paused() {
                return Ok(());
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
    }

    /// Sleeps for `duration` in poll-sized slices. Returns `false` if the run
    /// was cancelled before the time elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(PAUSE_POLL_INTERVAL));
        }
    }
}
