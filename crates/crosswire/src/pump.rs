//! Shared state of the event-loop pump.
//!
//! The loop itself lives on [`crate::Bridge`]; this context object carries
//! the flags and the single-slot deferred error that outlive one iteration.
//! Callback errors land here (they cannot propagate through the interpreter
//! mid-dispatch) and are re-raised exactly once by the next loop entry or
//! single-step call.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::BridgeError;

/// A callback error parked until the pump can surface it.
pub(crate) struct PendingError {
    pub origin: String,
    pub error: BridgeError,
}

pub(crate) struct PumpContext {
    dispatching: AtomicBool,
    quit: AtomicBool,
    pending: Mutex<Option<PendingError>>,
}

impl PumpContext {
    pub fn new() -> Self {
        PumpContext {
            dispatching: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    pub fn set_dispatching(&self, on: bool) {
        self.dispatching.store(on, Ordering::SeqCst);
    }

    /// Claim the dispatch loop; fails if another loop is already running.
    pub fn begin_dispatch(&self) -> Result<(), BridgeError> {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BridgeError::PumpBusy);
        }
        Ok(())
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn clear_quit(&self) {
        self.quit.store(false, Ordering::SeqCst);
    }

    /// Park a callback error. The slot holds one error; a second arriving
    /// before the first is surfaced is dropped with a warning.
    pub fn set_pending(&self, origin: &str, error: BridgeError) {
        let mut slot = self.pending.lock();
        if slot.is_none() {
            *slot = Some(PendingError {
                origin: origin.to_string(),
                error,
            });
        } else {
            tracing::warn!(origin, %error, "callback error dropped, slot already occupied");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Drain the slot. Only the pump calls this.
    pub fn take_pending(&self) -> Option<PendingError> {
        self.pending.lock().take()
    }
}
