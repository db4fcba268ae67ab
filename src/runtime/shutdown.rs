//! Process-wide shutdown flag.
//!
//! The signal handler only ever sets the flag; reactors only ever read it,
//! once per loop iteration. Nothing clears it.

use signal_hook::consts::{SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write-once, read-many termination request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// A flag not yet hooked to any signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook SIGINT and SIGTERM to the flag.
    ///
    /// A second signal after the flag is already set terminates the process
    /// immediately with status 1, so a stuck drain can still be interrupted.
    pub fn install() -> io::Result<Self> {
        let signal = Self::new();
        for sig in [SIGINT, SIGTERM] {
            // Order matters: the conditional exit checks the flag before the
            // plain handler sets it.
            signal_hook::flag::register_conditional_shutdown(sig, 1, Arc::clone(&signal.flag))?;
            signal_hook::flag::register(sig, Arc::clone(&signal.flag))?;
        }
        Ok(signal)
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
