//! The cross-thread invocation channel.
//!
//! A foreign thread packages its operation as an [`InvocationEvent`], queues
//! it tail-FIFO, alerts the owner thread's event wait, and blocks on the
//! event's completion latch. The owner thread dequeues inside its dispatch
//! loop, performs the operation, and signals the latch with the outcome.
//! There is no cancellation; ordering is global FIFO across callers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::BridgeError;
use crate::hooks::HostHooks;
use crate::interp::{InterpCommand, TimerId};
use crate::value::Value;

/// One marshalable bridge operation.
pub(crate) enum Op {
    Call {
        args: Vec<Value>,
        global: bool,
    },
    Eval {
        script: String,
        global: bool,
    },
    EvalFile {
        path: PathBuf,
    },
    Record {
        script: String,
    },
    Expr {
        expr: String,
    },
    GetVar {
        name: String,
        elem: Option<String>,
        global: bool,
    },
    SetVar {
        name: String,
        elem: Option<String>,
        value: Value,
        global: bool,
    },
    UnsetVar {
        name: String,
        elem: Option<String>,
        global: bool,
    },
    AddErrorInfo {
        info: String,
    },
    CreateCommand {
        name: String,
        command: Box<dyn InterpCommand>,
    },
    DeleteCommand {
        name: String,
    },
    CreateTimer {
        delay_ms: u64,
        callback: Box<dyn FnOnce() + Send>,
    },
    DeleteTimer {
        id: TimerId,
    },
}

/// The completion latch of one marshaled invocation: a dedicated mutex and
/// condition variable around a single output slot.
pub(crate) struct Completion {
    slot: Mutex<Option<Result<Value, BridgeError>>>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Completion {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Deposit the outcome and wake the waiter. Called by the owner thread.
    pub fn signal(&self, result: Result<Value, BridgeError>) {
        let mut slot = self.slot.lock();
        *slot = Some(result);
        self.cond.notify_one();
    }

    /// Block until the owner thread signals, releasing host context for the
    /// duration.
    pub fn wait(&self, hooks: &dyn HostHooks) -> Result<Value, BridgeError> {
        hooks.release_host();
        let mut slot = self.slot.lock();
        let out = loop {
            if let Some(result) = slot.take() {
                break result;
            }
            self.cond.wait(&mut slot);
        };
        drop(slot);
        hooks.acquire_host();
        out
    }
}

pub(crate) struct InvocationEvent {
    pub op: Op,
    pub done: Arc<Completion>,
}

/// Tail-FIFO queue of marshaled invocations, with a running total for
/// observability (owner-thread calls must never touch it).
pub(crate) struct EventQueue {
    queue: Mutex<VecDeque<InvocationEvent>>,
    submitted: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            queue: Mutex::new(VecDeque::new()),
            submitted: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: InvocationEvent) {
        self.queue.lock().push_back(event);
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn try_pop(&self) -> Option<InvocationEvent> {
        self.queue.lock().pop_front()
    }

    /// Total events ever enqueued.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }
}
