//! Host callbacks registered with the interpreter.
//!
//! The registry tracks what the host has handed to the interpreter: named
//! commands, file handlers, timer tokens. The interpreter owns the actual
//! callback boxes; dropping a box is its deletion notification and is the
//! single point that releases the registry entry, so explicit deletion,
//! redefinition, and interpreter teardown all converge on one release path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::bridge::{Bridge, BridgeShared};
use crate::channel::Op;
use crate::codec;
use crate::error::BridgeError;
use crate::interp::{InterpCommand, TimerId};
use crate::value::{TypedValue, Value};

/// A host command callable.
pub type CommandFn = dyn Fn(&[Value]) -> Result<Value, BridgeError> + Send + Sync;

pub(crate) struct CallbackRegistry {
    commands: DashMap<String, Arc<CommandFn>>,
    file_handlers: DashMap<i32, u32>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry {
            commands: DashMap::new(),
            file_handlers: DashMap::new(),
        }
    }

    pub fn insert_command(&self, name: &str, callable: Arc<CommandFn>) {
        self.commands.insert(name.to_string(), callable);
    }

    pub fn remove_command(&self, name: &str) {
        self.commands.remove(name);
    }

    /// Remove only if the entry still belongs to `callable`. A redefined
    /// command replaces the entry first; the old binding's deletion
    /// notification must not take the replacement with it.
    pub fn remove_command_if(&self, name: &str, callable: &Arc<CommandFn>) {
        self.commands.remove_if(name, |_, v| Arc::ptr_eq(v, callable));
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn insert_file_handler(&self, fd: i32, mask: u32) {
        self.file_handlers.insert(fd, mask);
    }

    pub fn remove_file_handler(&self, fd: i32) {
        self.file_handlers.remove(&fd);
    }

    pub fn has_file_handler(&self, fd: i32) -> bool {
        self.file_handlers.contains_key(&fd)
    }
}

/// The command box handed to the interpreter.
///
/// Invocation happens on the thread driving the interpreter, mid-dispatch;
/// errors from the host callable are parked in the pump's deferred-error
/// slot rather than propagated through the interpreter.
pub(crate) struct CommandBinding {
    name: String,
    callable: Arc<CommandFn>,
    shared: Weak<BridgeShared>,
}

impl CommandBinding {
    pub fn new(name: String, callable: Arc<CommandFn>, shared: Weak<BridgeShared>) -> Self {
        CommandBinding {
            name,
            callable,
            shared,
        }
    }
}

impl InterpCommand for CommandBinding {
    fn invoke(&mut self, argv: &[TypedValue]) -> Result<TypedValue, String> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(BridgeError::Closed.to_string());
        };
        let _host = shared.locks.enter_host();
        let args: Vec<Value> = argv.iter().map(codec::from_typed).collect();
        match (self.callable)(&args) {
            Ok(v) => match codec::to_typed(&v) {
                Ok(tv) => Ok(tv),
                Err(e) => {
                    let msg = e.to_string();
                    shared.pump.set_pending(&self.name, e);
                    Err(msg)
                }
            },
            Err(e) => {
                tracing::debug!(command = %self.name, %e, "command handler failed, deferring");
                let msg = e.to_string();
                shared.pump.set_pending(&self.name, e);
                Err(msg)
            }
        }
    }
}

impl Drop for CommandBinding {
    fn drop(&mut self) {
        // Deletion notification from the interpreter.
        if let Some(shared) = self.shared.upgrade() {
            shared.registry.remove_command_if(&self.name, &self.callable);
        }
    }
}

/// Handle to a pending one-shot timer.
pub struct TimerToken {
    id: TimerId,
    fired: Arc<AtomicBool>,
    bridge: Bridge,
}

impl TimerToken {
    pub(crate) fn new(id: TimerId, fired: Arc<AtomicBool>, bridge: Bridge) -> Self {
        TimerToken { id, fired, bridge }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Whether the callback has already run.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Cancel the timer. Before it fires this suppresses the callback;
    /// after it fires it is a no-op, not an error.
    pub fn cancel(&self) -> Result<(), BridgeError> {
        if self.fired() {
            return Ok(());
        }
        self.bridge.invoke(Op::DeleteTimer { id: self.id }).map(|_| ())
    }
}

impl fmt::Debug for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerToken(id={}, fired={})", self.id, self.fired())
    }
}
