//! The embedded interpreter as the bridge sees it.
//!
//! The interpreter itself (command tables, windowing, native event sources)
//! is out of scope; this trait is the exact surface the bridge drives.
//! Implementations are single-threaded internally; the bridge guarantees
//! every method runs on the thread that created the session, or under the
//! target lock when the interpreter is not internally threaded.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::value::TypedValue;

/// Identifies a pending timer registration.
pub type TimerId = u64;

/// Wakes the interpreter's blocking event wait from another thread.
pub type Alerter = Arc<dyn Fn() + Send + Sync>;

/// Event-class selection for one pump step. Zero selects all classes.
pub const DONT_WAIT: u32 = 1 << 1;
pub const WINDOW_EVENTS: u32 = 1 << 2;
pub const FILE_EVENTS: u32 = 1 << 3;
pub const TIMER_EVENTS: u32 = 1 << 4;
pub const IDLE_EVENTS: u32 = 1 << 5;
pub const ALL_EVENTS: u32 = WINDOW_EVENTS | FILE_EVENTS | TIMER_EVENTS | IDLE_EVENTS;

/// File-handler interest mask.
pub const READABLE: u32 = 1 << 1;
pub const WRITABLE: u32 = 1 << 2;
pub const EXCEPTION: u32 = 1 << 3;

/// A host command as handed to the interpreter.
///
/// Dropping the box is the interpreter's deletion notification: it fires
/// exactly once, whether the command was deleted explicitly, redefined, or
/// torn down with the interpreter.
pub trait InterpCommand: Send {
    fn invoke(&mut self, argv: &[TypedValue]) -> Result<TypedValue, String>;
}

/// The embedded command interpreter.
///
/// Errors are the interpreter's diagnostic text; the bridge wraps them.
pub trait Interp: Send {
    /// Evaluate a script, optionally at global scope.
    fn eval(&mut self, script: &str, global: bool) -> Result<TypedValue, String>;

    /// Evaluate a script file.
    fn eval_file(&mut self, path: &Path) -> Result<TypedValue, String>;

    /// Record a statement in the interpreter's history without evaluating it.
    fn record(&mut self, script: &str) -> Result<TypedValue, String>;

    /// Invoke a command from a pre-built argument vector, bypassing script
    /// substitution.
    fn call(&mut self, argv: &[TypedValue], global: bool) -> Result<TypedValue, String>;

    /// Evaluate an expression.
    fn expr(&mut self, expr: &str) -> Result<TypedValue, String>;

    fn get_var(
        &mut self,
        name: &str,
        elem: Option<&str>,
        global: bool,
    ) -> Result<TypedValue, String>;

    fn set_var(
        &mut self,
        name: &str,
        elem: Option<&str>,
        value: TypedValue,
        global: bool,
    ) -> Result<(), String>;

    fn unset_var(&mut self, name: &str, elem: Option<&str>, global: bool) -> Result<(), String>;

    /// Append supplemental context to the interpreter's error trace.
    fn add_error_info(&mut self, info: &str);

    /// Register a command; an existing command of the same name is replaced
    /// (and its box dropped).
    fn register_command(&mut self, name: &str, command: Box<dyn InterpCommand>)
    -> Result<(), String>;

    fn delete_command(&mut self, name: &str) -> Result<(), String>;

    /// Schedule a one-shot timer. The callback box is dropped after firing
    /// or on deletion, whichever comes first.
    fn create_timer(&mut self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId;

    /// Delete a pending timer. Unknown ids (already fired) are a no-op.
    fn delete_timer(&mut self, id: TimerId);

    /// Watch a file descriptor; replaces any existing handler for `fd`.
    fn create_file_handler(
        &mut self,
        fd: i32,
        mask: u32,
        callback: Box<dyn FnMut(u32) + Send>,
    ) -> Result<(), String>;

    fn delete_file_handler(&mut self, fd: i32) -> Result<(), String>;

    /// Process at most one pending event of the selected classes and return
    /// whether anything was processed. Without [`DONT_WAIT`] the step may
    /// block until an event or an alert arrives.
    fn pump_once(&mut self, flags: u32) -> bool;

    /// Number of open toplevel windows.
    fn open_windows(&self) -> usize {
        0
    }

    /// True when the interpreter serializes access internally and may be
    /// entered concurrently with its own blocking event wait.
    fn is_threaded(&self) -> bool {
        false
    }

    /// A handle that wakes a blocking [`Interp::pump_once`] from another
    /// thread. Required for threaded interpreters.
    fn alerter(&self) -> Option<Alerter> {
        None
    }
}
