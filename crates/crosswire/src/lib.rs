//! crosswire: drive an embedded, thread-affine command interpreter from any
//! host thread.
//!
//! The interpreter behind a session accepts calls only on the thread that
//! created it (its owner thread). A [`Bridge`] hides that restriction:
//! operations from the owner thread run directly under the lock brackets in
//! [`locks`], while operations from any other thread are packaged as
//! invocation events, queued to the owner thread's event loop, and awaited
//! on a per-event completion latch. Values cross the boundary through the
//! [`codec`], either as interpreter list strings or tag-by-tag as typed
//! values.
//!
//! ```no_run
//! use crosswire::{Bridge, BridgeOptions, Value};
//! # fn interp() -> Box<dyn crosswire::Interp> { unimplemented!() }
//!
//! let bridge = Bridge::new(interp(), BridgeOptions::default())?;
//! bridge.set_var("greeting", Value::Str("hello".into()))?;
//! let n = bridge.expr_long("6 * 7")?;
//! assert_eq!(n, 42);
//! bridge.main_loop(0)?;
//! # Ok::<(), crosswire::BridgeError>(())
//! ```

mod affinity;
mod bridge;
mod channel;
pub mod codec;
mod error;
mod hooks;
mod interp;
mod locks;
mod pump;
mod registry;
pub mod value;

pub use bridge::{Bridge, BridgeOptions};
pub use error::BridgeError;
pub use hooks::{DefaultHooks, HostHooks};
pub use interp::{
    ALL_EVENTS, Alerter, DONT_WAIT, EXCEPTION, FILE_EVENTS, IDLE_EVENTS, Interp, InterpCommand,
    READABLE, TIMER_EVENTS, TimerId, WINDOW_EVENTS, WRITABLE,
};
pub use registry::{CommandFn, TimerToken};
pub use value::{Obj, Opaque, TypedValue, Value};
