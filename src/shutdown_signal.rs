//! Cooperative cancellation for batch runs and the viewer server.
//!
//! Signal handlers only flip an atomic flag. Long-running loops poll it
//! between units of work, so files are never abandoned half-written. A
//! second SIGINT while shutdown is already pending exits immediately with
//! status 130, for blocking calls that cannot poll.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::error::{PipelineError, Result};

const PAUSE_SLICE: Duration = Duration::from_millis(100);
const FORCED_EXIT_STATUS: i32 = 130;

/// Shared interrupt state set from signal handlers.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    signaled: Arc<AtomicBool>,
    signal_num: AtomicI32,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Marks shutdown as requested. Only touches atomics, so it is safe to
    /// call from a signal handler.
    pub fn trigger(&self, signal_num: i32) {
        self.signal_num.store(signal_num, Ordering::Release);
        self.signaled.store(true, Ordering::Release);
    }

    pub fn signal_name(&self) -> &'static str {
        match self.signal_num.load(Ordering::Acquire) {
            SIGINT => "SIGINT",
            SIGTERM => "SIGTERM",
            #[cfg(unix)]
            signal_hook::consts::SIGHUP => "SIGHUP",
            0 => "none",
            _ => "unknown",
        }
    }

    /// Returns `Cancelled` once shutdown has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_signaled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `delay` in short slices, bailing out early on shutdown.
    pub fn pause(&self, delay: Duration) -> Result<()> {
        let deadline = Instant::now() + delay;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(deadline.saturating_duration_since(now).min(PAUSE_SLICE));
        }
    }
}

/// Registers SIGINT and SIGTERM (plus SIGHUP on unix) to trigger `shutdown`.
/// A repeated SIGINT terminates the process.
pub fn install_signal_handlers(shutdown: Arc<ShutdownSignal>) -> std::io::Result<()> {
    // Registered first, so the condition reads the flag as it was before
    // this SIGINT's own trigger runs.
    signal_hook::flag::register_conditional_shutdown(
        SIGINT,
        FORCED_EXIT_STATUS,
        Arc::clone(&shutdown.signaled),
    )?;

    let shutdown_sigint = shutdown.clone();
    // SAFETY: the handler only stores into atomics.
    unsafe {
        signal_hook::low_level::register(SIGINT, move || shutdown_sigint.trigger(SIGINT))?;
    }

    let shutdown_sigterm = shutdown.clone();
    // SAFETY: as above.
    unsafe {
        signal_hook::low_level::register(SIGTERM, move || shutdown_sigterm.trigger(SIGTERM))?;
    }

    #[cfg(unix)]
    {
        use signal_hook::consts::SIGHUP;
        let shutdown_sighup = shutdown;
        // SAFETY: as above.
        unsafe {
            signal_hook::low_level::register(SIGHUP, move || shutdown_sighup.trigger(SIGHUP))?;
        }
    }

    Ok(())
}
