//! Shutdown signaling
//!
//! One process-wide atomic flag observed by every worker between iterations.
//! Workers finish the request in hand, drain their input queue, and exit;
//! teardown joins threads in the reverse of start-up order.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shutdown flag shared by all pipeline workers
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    flag: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
