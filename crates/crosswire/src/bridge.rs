//! The bridge session: public operations and the event-loop pump.
//!
//! A `Bridge` is created on the thread that owns the interpreter. Any thread
//! may clone and use it; operations that touch interpreter state run
//! directly when the calling thread may do so, and are otherwise marshaled
//! to the owner thread through the invocation channel while the caller
//! blocks on the completion latch.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::affinity::{AffinityToken, wait_for_dispatch};
use crate::channel::{Completion, EventQueue, InvocationEvent, Op};
use crate::codec;
use crate::error::BridgeError;
use crate::hooks::{DefaultHooks, HostHooks};
use crate::interp::{ALL_EVENTS, Alerter, DONT_WAIT, Interp, TimerId};
use crate::locks::LockCoordinator;
use crate::pump::PumpContext;
use crate::registry::{CallbackRegistry, CommandBinding, CommandFn, TimerToken};
use crate::value::{TypedValue, Value};

/// How long an idle non-threaded loop iteration sleeps before polling again.
const IDLE_NAP: Duration = Duration::from_millis(20);

/// Session bootstrap options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Application name published to the interpreter (first letter
    /// lower-cased). Empty means: derive from the host program name.
    pub app_name: String,
    /// Display/screen to publish in the interpreter's environment.
    pub screen_name: Option<String>,
    /// Whether the interpreter should consider the session interactive.
    pub interactive: bool,
    /// Return typed results instead of strings.
    pub want_objects: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            app_name: String::new(),
            screen_name: None,
            interactive: false,
            want_objects: true,
        }
    }
}

pub(crate) struct BridgeShared {
    pub(crate) locks: LockCoordinator,
    pub(crate) queue: EventQueue,
    pub(crate) pump: PumpContext,
    pub(crate) registry: CallbackRegistry,
    pub(crate) hooks: Arc<dyn HostHooks>,
    pub(crate) affinity: AffinityToken,
    pub(crate) threaded: bool,
    pub(crate) want_objects: AtomicBool,
    pub(crate) alert: Option<Alerter>,
}

/// A session driving one embedded interpreter.
///
/// Cheap to clone; all clones share the session. The session must be
/// created on, and its event loop run from, the thread the interpreter is
/// bound to.
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Clone for Bridge {
    fn clone(&self) -> Self {
        Bridge {
            shared: self.shared.clone(),
        }
    }
}

enum ResultConv {
    /// Honor the session's `want_objects` setting.
    Session,
    /// Always convert by type tag.
    Typed,
    /// Always collapse to the string form.
    Text,
}

impl Bridge {
    /// Create a session with no host-runtime hooks.
    pub fn new(interp: Box<dyn Interp>, options: BridgeOptions) -> Result<Self, BridgeError> {
        Self::with_hooks(interp, options, Arc::new(DefaultHooks))
    }

    /// Create a session, wiring in the host runtime's hooks.
    pub fn with_hooks(
        mut interp: Box<dyn Interp>,
        options: BridgeOptions,
        hooks: Arc<dyn HostHooks>,
    ) -> Result<Self, BridgeError> {
        let threaded = interp.is_threaded();
        let alert = interp.alerter();
        bootstrap(&mut *interp, &options, hooks.as_ref()).map_err(BridgeError::Target)?;
        tracing::debug!(threaded, want_objects = options.want_objects, "session created");
        Ok(Bridge {
            shared: Arc::new(BridgeShared {
                locks: LockCoordinator::new(interp, hooks.clone()),
                queue: EventQueue::new(),
                pump: PumpContext::new(),
                registry: CallbackRegistry::new(),
                hooks,
                affinity: AffinityToken::capture(),
                threaded,
                want_objects: AtomicBool::new(options.want_objects),
                alert,
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────

    /// Run an operation locally or marshal it to the owner thread.
    pub(crate) fn invoke(&self, op: Op) -> Result<Value, BridgeError> {
        let shared = &self.shared;
        if shared.threaded && !shared.affinity.is_owner() {
            wait_for_dispatch(&shared.pump, shared.hooks.as_ref())?;
            let done = Arc::new(Completion::new());
            shared.queue.push(InvocationEvent {
                op,
                done: done.clone(),
            });
            if let Some(alert) = &shared.alert {
                alert();
            }
            tracing::debug!(total = shared.queue.submitted(), "invocation marshaled");
            done.wait(shared.hooks.as_ref())
        } else {
            self.perform(op)
        }
    }

    fn run_target<F>(&self, conv: ResultConv, f: F) -> Result<Value, BridgeError>
    where
        F: FnOnce(&mut (dyn Interp + 'static)) -> Result<TypedValue, String>,
    {
        let mut guard = self.shared.locks.enter_target();
        let raw = f(guard.interp());
        let overlap = guard.into_overlap();
        let out = match raw {
            Ok(tv) => Ok(match conv {
                ResultConv::Session => codec::result_to_value(tv, self.wants_objects()),
                ResultConv::Typed => codec::from_typed(&tv),
                ResultConv::Text => Value::Str(tv.string_form()),
            }),
            Err(diag) => Err(BridgeError::Target(diag)),
        };
        drop(overlap);
        out
    }

    fn perform(&self, op: Op) -> Result<Value, BridgeError> {
        match op {
            Op::Call { args, global } => {
                let argv = codec::to_typed_args(&args)?;
                self.run_target(ResultConv::Session, move |i| i.call(&argv, global))
            }
            Op::Eval { script, global } => {
                self.run_target(ResultConv::Text, move |i| i.eval(&script, global))
            }
            Op::EvalFile { path } => {
                self.run_target(ResultConv::Text, move |i| i.eval_file(&path))
            }
            Op::Record { script } => {
                self.run_target(ResultConv::Text, move |i| i.record(&script))
            }
            Op::Expr { expr } => self.run_target(ResultConv::Typed, move |i| i.expr(&expr)),
            Op::GetVar { name, elem, global } => self.run_target(ResultConv::Typed, move |i| {
                i.get_var(&name, elem.as_deref(), global)
            }),
            Op::SetVar {
                name,
                elem,
                value,
                global,
            } => {
                let tv = codec::to_typed(&value)?;
                self.run_target(ResultConv::Text, move |i| {
                    i.set_var(&name, elem.as_deref(), tv, global)?;
                    Ok(TypedValue::Text(String::new()))
                })
            }
            Op::UnsetVar { name, elem, global } => self.run_target(ResultConv::Text, move |i| {
                i.unset_var(&name, elem.as_deref(), global)?;
                Ok(TypedValue::Text(String::new()))
            }),
            Op::AddErrorInfo { info } => self.run_target(ResultConv::Text, move |i| {
                i.add_error_info(&info);
                Ok(TypedValue::Text(String::new()))
            }),
            Op::CreateCommand { name, command } => {
                self.run_target(ResultConv::Text, move |i| {
                    i.register_command(&name, command)?;
                    Ok(TypedValue::Text(String::new()))
                })
            }
            Op::DeleteCommand { name } => self.run_target(ResultConv::Text, move |i| {
                i.delete_command(&name)?;
                Ok(TypedValue::Text(String::new()))
            }),
            Op::CreateTimer { delay_ms, callback } => {
                self.run_target(ResultConv::Typed, move |i| {
                    let id = i.create_timer(Duration::from_millis(delay_ms), callback);
                    Ok(TypedValue::Int(id as i64))
                })
            }
            Op::DeleteTimer { id } => self.run_target(ResultConv::Text, move |i| {
                i.delete_timer(id);
                Ok(TypedValue::Text(String::new()))
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Evaluation and calls
    // ─────────────────────────────────────────────────────────────────────

    /// Invoke a command from a pre-built argument vector, bypassing script
    /// substitution. A `Nil` argument ends the vector early.
    pub fn call(&self, args: &[Value]) -> Result<Value, BridgeError> {
        self.invoke(Op::Call {
            args: args.to_vec(),
            global: false,
        })
    }

    /// [`Bridge::call`] at global scope.
    pub fn global_call(&self, args: &[Value]) -> Result<Value, BridgeError> {
        self.invoke(Op::Call {
            args: args.to_vec(),
            global: true,
        })
    }

    /// Evaluate a script; the result is its string form.
    pub fn eval(&self, script: &str) -> Result<Value, BridgeError> {
        self.invoke(Op::Eval {
            script: script.to_string(),
            global: false,
        })
    }

    pub fn global_eval(&self, script: &str) -> Result<Value, BridgeError> {
        self.invoke(Op::Eval {
            script: script.to_string(),
            global: true,
        })
    }

    /// Evaluate a script file.
    pub fn eval_file(&self, path: impl AsRef<Path>) -> Result<Value, BridgeError> {
        self.invoke(Op::EvalFile {
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Record a statement in the interpreter's history without running it.
    pub fn record(&self, script: &str) -> Result<Value, BridgeError> {
        self.invoke(Op::Record {
            script: script.to_string(),
        })
    }

    /// Append supplemental context to the interpreter's error trace.
    pub fn add_error_info(&self, info: &str) -> Result<(), BridgeError> {
        self.invoke(Op::AddErrorInfo {
            info: info.to_string(),
        })
        .map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Variables
    // ─────────────────────────────────────────────────────────────────────

    fn var_get(&self, name: &str, elem: Option<&str>, global: bool) -> Result<Value, BridgeError> {
        self.invoke(Op::GetVar {
            name: name.to_string(),
            elem: elem.map(str::to_string),
            global,
        })
    }

    fn var_set(
        &self,
        name: &str,
        elem: Option<&str>,
        value: Value,
        global: bool,
    ) -> Result<(), BridgeError> {
        self.invoke(Op::SetVar {
            name: name.to_string(),
            elem: elem.map(str::to_string),
            value,
            global,
        })
        .map(|_| ())
    }

    fn var_unset(&self, name: &str, elem: Option<&str>, global: bool) -> Result<(), BridgeError> {
        self.invoke(Op::UnsetVar {
            name: name.to_string(),
            elem: elem.map(str::to_string),
            global,
        })
        .map(|_| ())
    }

    /// Read a variable; the result is always converted by type tag.
    pub fn get_var(&self, name: &str) -> Result<Value, BridgeError> {
        self.var_get(name, None, false)
    }

    pub fn get_var_element(&self, name: &str, elem: &str) -> Result<Value, BridgeError> {
        self.var_get(name, Some(elem), false)
    }

    pub fn global_get_var(&self, name: &str) -> Result<Value, BridgeError> {
        self.var_get(name, None, true)
    }

    pub fn global_get_var_element(&self, name: &str, elem: &str) -> Result<Value, BridgeError> {
        self.var_get(name, Some(elem), true)
    }

    pub fn set_var(&self, name: &str, value: Value) -> Result<(), BridgeError> {
        self.var_set(name, None, value, false)
    }

    pub fn set_var_element(
        &self,
        name: &str,
        elem: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        self.var_set(name, Some(elem), value, false)
    }

    pub fn global_set_var(&self, name: &str, value: Value) -> Result<(), BridgeError> {
        self.var_set(name, None, value, true)
    }

    pub fn global_set_var_element(
        &self,
        name: &str,
        elem: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        self.var_set(name, Some(elem), value, true)
    }

    pub fn unset_var(&self, name: &str) -> Result<(), BridgeError> {
        self.var_unset(name, None, false)
    }

    pub fn unset_var_element(&self, name: &str, elem: &str) -> Result<(), BridgeError> {
        self.var_unset(name, Some(elem), false)
    }

    pub fn global_unset_var(&self, name: &str) -> Result<(), BridgeError> {
        self.var_unset(name, None, true)
    }

    pub fn global_unset_var_element(&self, name: &str, elem: &str) -> Result<(), BridgeError> {
        self.var_unset(name, Some(elem), true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions and scalar coercion
    // ─────────────────────────────────────────────────────────────────────

    /// Evaluate an expression; the result is its string form.
    pub fn expr_string(&self, expr: &str) -> Result<Value, BridgeError> {
        let v = self.invoke(Op::Expr {
            expr: expr.to_string(),
        })?;
        Ok(Value::Str(v.string_form()?))
    }

    pub fn expr_long(&self, expr: &str) -> Result<i64, BridgeError> {
        let v = self.invoke(Op::Expr {
            expr: expr.to_string(),
        })?;
        codec::get_int(&v)
    }

    pub fn expr_double(&self, expr: &str) -> Result<f64, BridgeError> {
        let v = self.invoke(Op::Expr {
            expr: expr.to_string(),
        })?;
        codec::get_double(&v)
    }

    pub fn expr_boolean(&self, expr: &str) -> Result<bool, BridgeError> {
        let v = self.invoke(Op::Expr {
            expr: expr.to_string(),
        })?;
        codec::get_boolean(&v)
    }

    /// Coerce to an integer using the interpreter's literal syntax.
    pub fn get_int(&self, v: &Value) -> Result<i64, BridgeError> {
        codec::get_int(v)
    }

    pub fn get_double(&self, v: &Value) -> Result<f64, BridgeError> {
        codec::get_double(v)
    }

    pub fn get_boolean(&self, v: &Value) -> Result<bool, BridgeError> {
        codec::get_boolean(v)
    }

    // ─────────────────────────────────────────────────────────────────────
    // List utilities
    // ─────────────────────────────────────────────────────────────────────

    /// Split a string into its top-level list elements.
    pub fn split_list(&self, s: &str) -> Result<Vec<String>, BridgeError> {
        codec::split_list(s)
    }

    /// Recursively split a value into nested lists; never fails.
    pub fn split(&self, v: &Value) -> Value {
        match v {
            Value::Str(s) => codec::split(s),
            Value::List(_) => codec::split_value(v),
            other => other.clone(),
        }
    }

    /// Render values as one interpreter list string.
    pub fn merge(&self, values: &[Value]) -> Result<String, BridgeError> {
        codec::merge(values)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands, timers, file handlers
    // ─────────────────────────────────────────────────────────────────────

    /// Register a host callable as an interpreter command.
    ///
    /// The callable runs on the thread driving the interpreter, mid-dispatch,
    /// and may call back into this session; nested operations reuse the
    /// thread's interpreter access. Errors it returns are parked and surface
    /// from the next event-loop entry or single step.
    pub fn create_command<F>(&self, name: &str, callable: F) -> Result<(), BridgeError>
    where
        F: Fn(&[Value]) -> Result<Value, BridgeError> + Send + Sync + 'static,
    {
        let callable: Arc<CommandFn> = Arc::new(callable);
        self.shared.registry.insert_command(name, callable.clone());
        let binding = CommandBinding::new(
            name.to_string(),
            callable,
            Arc::downgrade(&self.shared),
        );
        match self.invoke(Op::CreateCommand {
            name: name.to_string(),
            command: Box::new(binding),
        }) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.shared.registry.remove_command(name);
                Err(e)
            }
        }
    }

    /// Delete a command; blocks until the interpreter confirms.
    pub fn delete_command(&self, name: &str) -> Result<(), BridgeError> {
        self.invoke(Op::DeleteCommand {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    /// Whether a host command of this name is currently registered.
    pub fn has_command(&self, name: &str) -> bool {
        self.shared.registry.has_command(name)
    }

    /// Schedule a one-shot timer callback.
    pub fn create_timer_handler<F>(
        &self,
        delay_ms: u64,
        callable: F,
    ) -> Result<TimerToken, BridgeError>
    where
        F: FnOnce() -> Result<(), BridgeError> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_mark = fired.clone();
        let shared_weak = Arc::downgrade(&self.shared);
        let wrapper: Box<dyn FnOnce() + Send> = Box::new(move || {
            fired_mark.store(true, Ordering::SeqCst);
            let Some(shared) = shared_weak.upgrade() else {
                return;
            };
            let _host = shared.locks.enter_host();
            if let Err(e) = callable() {
                shared.pump.set_pending("timer", e);
            }
        });
        let id = codec::get_int(&self.invoke(Op::CreateTimer {
            delay_ms,
            callback: wrapper,
        })?)? as TimerId;
        Ok(TimerToken::new(id, fired, self.clone()))
    }

    /// Watch a file descriptor. Refused when the interpreter is threaded:
    /// the handler could fire concurrently with host code and nothing would
    /// serialize it.
    pub fn create_file_handler<F>(
        &self,
        fd: i32,
        mask: u32,
        callable: F,
    ) -> Result<(), BridgeError>
    where
        F: FnMut(u32) -> Result<(), BridgeError> + Send + 'static,
    {
        if self.shared.threaded {
            return Err(BridgeError::FileHandlersUnsupported);
        }
        let shared_weak = Arc::downgrade(&self.shared);
        let mut callable = callable;
        let wrapper: Box<dyn FnMut(u32) + Send> = Box::new(move |ready| {
            let Some(shared) = shared_weak.upgrade() else {
                return;
            };
            let _host = shared.locks.enter_host();
            if let Err(e) = callable(ready) {
                shared.pump.set_pending("file handler", e);
            }
        });
        self.run_target(ResultConv::Text, move |i| {
            i.create_file_handler(fd, mask, wrapper)?;
            Ok(TypedValue::Text(String::new()))
        })?;
        self.shared.registry.insert_file_handler(fd, mask);
        Ok(())
    }

    pub fn delete_file_handler(&self, fd: i32) -> Result<(), BridgeError> {
        if self.shared.threaded {
            return Err(BridgeError::FileHandlersUnsupported);
        }
        self.run_target(ResultConv::Text, move |i| {
            i.delete_file_handler(fd)?;
            Ok(TypedValue::Text(String::new()))
        })?;
        self.shared.registry.remove_file_handler(fd);
        Ok(())
    }

    pub fn has_file_handler(&self, fd: i32) -> bool {
        self.shared.registry.has_file_handler(fd)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────

    /// Run the event loop until the open-window count drops to `threshold`,
    /// [`Bridge::quit`] is called, or a deferred callback error surfaces.
    ///
    /// Must run on the owner thread; at most one loop per session at a time.
    pub fn main_loop(&self, threshold: usize) -> Result<(), BridgeError> {
        let shared = &self.shared;
        if shared.threaded && !shared.affinity.is_owner() {
            return Err(BridgeError::WrongThread);
        }
        shared.pump.begin_dispatch()?;
        let active = DispatchGuard { pump: &shared.pump };
        tracing::debug!(threshold, "entering event loop");
        loop {
            if shared.pump.quit_requested() || shared.pump.has_pending() {
                break;
            }
            let windows = {
                let mut guard = shared.locks.enter_target();
                guard.interp().open_windows()
            };
            if windows <= threshold {
                break;
            }
            self.dispatch_step(ALL_EVENTS);
            shared.hooks.check_signals()?;
        }
        drop(active);
        if let Some(p) = shared.pump.take_pending() {
            tracing::debug!(origin = %p.origin, "surfacing deferred callback error");
            return Err(p.error);
        }
        tracing::debug!("event loop finished");
        Ok(())
    }

    /// Process at most one event (a marshaled invocation takes precedence
    /// over interpreter events); returns whether anything was processed.
    /// Surfaces a deferred callback error if one is parked.
    pub fn do_one_event(&self, flags: u32) -> Result<bool, BridgeError> {
        let shared = &self.shared;
        if shared.threaded && !shared.affinity.is_owner() {
            return Err(BridgeError::WrongThread);
        }
        // Zero class bits selects all classes.
        let flags = if flags & !DONT_WAIT == 0 {
            flags | ALL_EVENTS
        } else {
            flags
        };
        let activity = self.dispatch_step(flags);
        if let Some(p) = shared.pump.take_pending() {
            return Err(p.error);
        }
        Ok(activity)
    }

    fn dispatch_step(&self, flags: u32) -> bool {
        let shared = &self.shared;
        if let Some(event) = shared.queue.try_pop() {
            tracing::debug!("dispatching marshaled invocation");
            let result = self.perform(event.op);
            event.done.signal(result);
            return true;
        }
        let mut guard = shared.locks.enter_target();
        let activity = if shared.threaded {
            guard.interp().pump_once(flags)
        } else {
            // Never block the interpreter while other threads may want the
            // target lock.
            guard.interp().pump_once(flags | DONT_WAIT)
        };
        drop(guard);
        if !activity && !shared.threaded && flags & DONT_WAIT == 0 {
            shared.hooks.release_host();
            thread::sleep(IDLE_NAP);
            shared.hooks.acquire_host();
        }
        activity
    }

    /// Ask a running event loop to stop. Callable from any thread.
    pub fn quit(&self) {
        self.shared.pump.request_quit();
        if let Some(alert) = &self.shared.alert {
            alert();
        }
    }

    /// Declare that the owner thread dispatches events itself (for example
    /// via repeated [`Bridge::do_one_event`]), so marshaled calls from other
    /// threads proceed without a running [`Bridge::main_loop`].
    pub fn will_dispatch(&self) {
        self.shared.pump.set_dispatching(true);
    }

    /// Whether an event loop (or a [`Bridge::will_dispatch`] declaration) is
    /// active.
    pub fn is_dispatching(&self) -> bool {
        self.shared.pump.is_dispatching()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session state
    // ─────────────────────────────────────────────────────────────────────

    /// Switch between typed and string results for subsequent calls.
    pub fn want_objects(&self, on: bool) {
        self.shared.want_objects.store(on, Ordering::SeqCst);
    }

    pub fn wants_objects(&self) -> bool {
        self.shared.want_objects.load(Ordering::SeqCst)
    }

    pub fn is_threaded(&self) -> bool {
        self.shared.threaded
    }

    /// Total invocations ever marshaled through the channel. Owner-thread
    /// calls never contribute.
    pub fn marshaled_events(&self) -> u64 {
        self.shared.queue.submitted()
    }
}

struct DispatchGuard<'a> {
    pump: &'a PumpContext,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.pump.set_dispatching(false);
        self.pump.clear_quit();
    }
}

fn bootstrap(
    interp: &mut dyn Interp,
    options: &BridgeOptions,
    hooks: &dyn HostHooks,
) -> Result<(), String> {
    // The interpreter's own exit command would take the whole host down.
    let _ = interp.delete_command("exit");
    if let Some(screen) = &options.screen_name {
        interp.set_var("env", Some("DISPLAY"), TypedValue::Text(screen.clone()), true)?;
    }
    interp.set_var(
        "interactive",
        None,
        TypedValue::Text(if options.interactive { "1" } else { "0" }.to_string()),
        true,
    )?;
    let mut app_name = if options.app_name.is_empty() {
        hooks
            .program_name()
            .map(|p| base_name(&p))
            .unwrap_or_else(|| "app".to_string())
    } else {
        options.app_name.clone()
    };
    if let Some(first) = app_name.get(..1) {
        app_name = first.to_ascii_lowercase() + &app_name[1..];
    }
    interp.set_var("argv0", None, TypedValue::Text(app_name), true)?;
    Ok(())
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
