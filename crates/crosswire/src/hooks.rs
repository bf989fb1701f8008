//! Host-runtime hooks consumed by the bridge.

use crate::error::BridgeError;

/// The host runtime's side of the lock-handoff protocol, plus the small set
/// of host services the bridge consumes.
///
/// `release_host` / `acquire_host` bracket every window in which a bridge
/// thread blocks or runs interpreter code, so a host with its own global
/// lock can let its other threads proceed. The defaults are no-ops for
/// hosts without one.
pub trait HostHooks: Send + Sync {
    /// Name of the host program, used to derive the default application name.
    fn program_name(&self) -> Option<String> {
        None
    }

    /// Called once per event-loop iteration. Returning an error stops the
    /// loop and surfaces as [`BridgeError::Interrupted`]-style failure.
    fn check_signals(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    /// Leave host-execution context (about to block or run interpreter code).
    fn release_host(&self) {}

    /// Re-enter host-execution context.
    fn acquire_host(&self) {}
}

/// Hooks for hosts with no global lock and no signal handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl HostHooks for DefaultHooks {}
