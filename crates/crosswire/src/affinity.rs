//! Owner-thread affinity.

use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::BridgeError;
use crate::hooks::HostHooks;
use crate::pump::PumpContext;

/// How long a foreign thread waits for the owner to enter its event loop
/// before failing fast.
const DISPATCH_POLLS: u32 = 10;
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captures the thread a session is bound to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AffinityToken {
    owner: ThreadId,
}

impl AffinityToken {
    pub fn capture() -> Self {
        AffinityToken {
            owner: thread::current().id(),
        }
    }

    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }
}

/// Block until the owner thread is dispatching events, polling for at most
/// one second. Fails with [`BridgeError::NotInEventLoop`] rather than
/// letting a marshaled call hang forever.
pub(crate) fn wait_for_dispatch(
    pump: &PumpContext,
    hooks: &dyn HostHooks,
) -> Result<(), BridgeError> {
    for _ in 0..DISPATCH_POLLS {
        if pump.is_dispatching() {
            return Ok(());
        }
        hooks.release_host();
        thread::sleep(DISPATCH_POLL_INTERVAL);
        hooks.acquire_host();
    }
    if pump.is_dispatching() {
        Ok(())
    } else {
        Err(BridgeError::NotInEventLoop)
    }
}
