//! A scripted in-memory interpreter for exercising the bridge.
//!
//! Supports a handful of builtin commands, variables, one-shot timers, file
//! handlers, and deferred work items that test threads can inject to make
//! the interpreter call back into the host during a pump step.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crosswire::{
    ALL_EVENTS, Alerter, DONT_WAIT, FILE_EVENTS, Interp, InterpCommand, Opaque, TIMER_EVENTS,
    TimerId, TypedValue, codec,
};

/// Route bridge logs into the test harness; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Timer {
    id: TimerId,
    due: Instant,
    callback: Box<dyn FnOnce() + Send>,
}

enum WorkItem {
    Invoke { name: String, args: Vec<TypedValue> },
}

struct FakeShared {
    windows: AtomicUsize,
    native_calls: AtomicUsize,
    work: Mutex<VecDeque<WorkItem>>,
    ready_fds: Mutex<VecDeque<(i32, u32)>>,
    alerted: Mutex<bool>,
    alert_cond: Condvar,
}

impl FakeShared {
    fn alert(&self) {
        *self.alerted.lock() = true;
        self.alert_cond.notify_all();
    }
}

/// Test-side handle onto interpreter state that outlives handing the
/// interpreter box to the bridge.
#[derive(Clone)]
pub struct FakeHandle {
    shared: Arc<FakeShared>,
}

impl FakeHandle {
    pub fn set_windows(&self, n: usize) {
        self.shared.windows.store(n, Ordering::SeqCst);
    }

    pub fn windows(&self) -> usize {
        self.shared.windows.load(Ordering::SeqCst)
    }

    /// Total command-vector invocations the interpreter has performed.
    pub fn native_calls(&self) -> usize {
        self.shared.native_calls.load(Ordering::SeqCst)
    }

    /// Schedule a command invocation to happen inside a future pump step,
    /// the way native event sources fire callbacks.
    pub fn queue_invoke(&self, name: &str, args: &[TypedValue]) {
        self.shared.work.lock().push_back(WorkItem::Invoke {
            name: name.to_string(),
            args: args.to_vec(),
        });
        self.shared.alert();
    }

    /// Mark a watched file descriptor ready.
    pub fn mark_file_ready(&self, fd: i32, mask: u32) {
        self.shared.ready_fds.lock().push_back((fd, mask));
        self.shared.alert();
    }
}

pub struct FakeInterp {
    threaded: bool,
    vars: HashMap<(String, Option<String>), TypedValue>,
    commands: HashMap<String, Box<dyn InterpCommand>>,
    timers: Vec<Timer>,
    history: Vec<String>,
    error_info: String,
    file_handlers: HashMap<i32, Box<dyn FnMut(u32) + Send>>,
    next_timer: TimerId,
    shared: Arc<FakeShared>,
}

impl FakeInterp {
    pub fn new(threaded: bool) -> (FakeInterp, FakeHandle) {
        let shared = Arc::new(FakeShared {
            windows: AtomicUsize::new(0),
            native_calls: AtomicUsize::new(0),
            work: Mutex::new(VecDeque::new()),
            ready_fds: Mutex::new(VecDeque::new()),
            alerted: Mutex::new(false),
            alert_cond: Condvar::new(),
        });
        let interp = FakeInterp {
            threaded,
            vars: HashMap::new(),
            commands: HashMap::new(),
            timers: Vec::new(),
            history: Vec::new(),
            error_info: String::new(),
            file_handlers: HashMap::new(),
            next_timer: 1,
            shared: shared.clone(),
        };
        (interp, FakeHandle { shared })
    }

    fn dispatch(&mut self, argv: &[TypedValue]) -> Result<TypedValue, String> {
        let Some(head) = argv.first() else {
            return Err("invalid command name \"\"".to_string());
        };
        let name = head.string_form();
        let rest = &argv[1..];
        match name.as_str() {
            "echo" => Ok(match rest.len() {
                0 => TypedValue::Text(String::new()),
                1 => rest[0].clone(),
                _ => TypedValue::List(rest.to_vec()),
            }),
            "set" => match rest {
                [var] => self.lookup_var(&var.string_form(), None),
                [var, value] => {
                    self.vars
                        .insert((var.string_form(), None), value.clone());
                    Ok(value.clone())
                }
                _ => Err("wrong # args: should be \"set varName ?newValue?\"".to_string()),
            },
            "listify" => Ok(TypedValue::List(rest.to_vec())),
            "opaque" => match rest {
                [kind, text] => {
                    let display = text.string_form();
                    Ok(TypedValue::Opaque(Opaque::new(
                        &kind.string_form(),
                        display.clone(),
                        move |_: &String| display.clone(),
                    )))
                }
                _ => Err("wrong # args: should be \"opaque kind text\"".to_string()),
            },
            "destroy" => {
                let w = self.shared.windows.load(Ordering::SeqCst);
                self.shared
                    .windows
                    .store(w.saturating_sub(1), Ordering::SeqCst);
                Ok(TypedValue::Text(String::new()))
            }
            "fail" => Err(match rest.first() {
                Some(msg) => msg.string_form(),
                None => "forced failure".to_string(),
            }),
            _ => match self.commands.remove(&name) {
                Some(mut cmd) => {
                    let result = cmd.invoke(rest);
                    self.commands.entry(name).or_insert(cmd);
                    result
                }
                None => Err(format!("invalid command name \"{name}\"")),
            },
        }
    }

    fn lookup_var(&self, name: &str, elem: Option<&str>) -> Result<TypedValue, String> {
        self.vars
            .get(&(name.to_string(), elem.map(str::to_string)))
            .cloned()
            .ok_or_else(|| format!("can't read \"{name}\": no such variable"))
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.due).min()
    }

    fn step(&mut self, flags: u32) -> bool {
        let classes = if flags & !DONT_WAIT == 0 {
            ALL_EVENTS
        } else {
            flags
        };
        let work = self.shared.work.lock().pop_front();
        if let Some(WorkItem::Invoke { name, args }) = work {
            let mut argv = vec![TypedValue::Text(name)];
            argv.extend(args);
            // Background errors have nowhere to go; callbacks park theirs.
            let _ = self.dispatch(&argv);
            return true;
        }
        if classes & FILE_EVENTS != 0 {
            let ready = self.shared.ready_fds.lock().pop_front();
            if let Some((fd, mask)) = ready {
                if let Some(mut handler) = self.file_handlers.remove(&fd) {
                    handler(mask);
                    self.file_handlers.entry(fd).or_insert(handler);
                }
                return true;
            }
        }
        if classes & TIMER_EVENTS != 0 {
            let now = Instant::now();
            if let Some(pos) = self.timers.iter().position(|t| t.due <= now) {
                let timer = self.timers.remove(pos);
                (timer.callback)();
                return true;
            }
        }
        false
    }
}

impl Interp for FakeInterp {
    fn eval(&mut self, script: &str, _global: bool) -> Result<TypedValue, String> {
        let words = codec::split_list(script).map_err(|e| e.to_string())?;
        if words.is_empty() {
            return Ok(TypedValue::Text(String::new()));
        }
        let argv: Vec<TypedValue> = words.into_iter().map(TypedValue::Text).collect();
        self.dispatch(&argv)
    }

    fn eval_file(&mut self, path: &Path) -> Result<TypedValue, String> {
        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut last = TypedValue::Text(String::new());
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            last = self.eval(line, true)?;
        }
        Ok(last)
    }

    fn record(&mut self, script: &str) -> Result<TypedValue, String> {
        self.history.push(script.to_string());
        Ok(TypedValue::Text(String::new()))
    }

    fn call(&mut self, argv: &[TypedValue], _global: bool) -> Result<TypedValue, String> {
        self.shared.native_calls.fetch_add(1, Ordering::SeqCst);
        self.dispatch(argv)
    }

    fn expr(&mut self, expr: &str) -> Result<TypedValue, String> {
        let t = expr.trim();
        if let Ok(i) = t.parse::<i64>() {
            return Ok(TypedValue::Int(i));
        }
        if let Ok(d) = t.parse::<f64>() {
            return Ok(TypedValue::Double(d));
        }
        match t {
            "true" => return Ok(TypedValue::Bool(true)),
            "false" => return Ok(TypedValue::Bool(false)),
            _ => {}
        }
        let parts: Vec<&str> = t.split_whitespace().collect();
        if let [a, op, b] = parts.as_slice() {
            let (a, b) = match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return Err(format!("syntax error in expression \"{t}\"")),
            };
            return match *op {
                "+" => Ok(TypedValue::Int(a + b)),
                "-" => Ok(TypedValue::Int(a - b)),
                "*" => Ok(TypedValue::Int(a * b)),
                "<" => Ok(TypedValue::Bool(a < b)),
                "==" => Ok(TypedValue::Bool(a == b)),
                _ => Err(format!("syntax error in expression \"{t}\"")),
            };
        }
        Err(format!("syntax error in expression \"{t}\""))
    }

    fn get_var(
        &mut self,
        name: &str,
        elem: Option<&str>,
        _global: bool,
    ) -> Result<TypedValue, String> {
        self.lookup_var(name, elem)
    }

    fn set_var(
        &mut self,
        name: &str,
        elem: Option<&str>,
        value: TypedValue,
        _global: bool,
    ) -> Result<(), String> {
        self.vars
            .insert((name.to_string(), elem.map(str::to_string)), value);
        Ok(())
    }

    fn unset_var(&mut self, name: &str, elem: Option<&str>, _global: bool) -> Result<(), String> {
        self.vars
            .remove(&(name.to_string(), elem.map(str::to_string)))
            .map(|_| ())
            .ok_or_else(|| format!("can't unset \"{name}\": no such variable"))
    }

    fn add_error_info(&mut self, info: &str) {
        self.error_info.push_str(info);
        self.error_info.push('\n');
    }

    fn register_command(
        &mut self,
        name: &str,
        command: Box<dyn InterpCommand>,
    ) -> Result<(), String> {
        // Replacing drops the old box, which is its deletion notification.
        self.commands.insert(name.to_string(), command);
        Ok(())
    }

    fn delete_command(&mut self, name: &str) -> Result<(), String> {
        self.commands
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| format!("can't delete \"{name}\": command doesn't exist"))
    }

    fn create_timer(&mut self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        self.timers.push(Timer {
            id,
            due: Instant::now() + delay,
            callback,
        });
        id
    }

    fn delete_timer(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }

    fn create_file_handler(
        &mut self,
        fd: i32,
        _mask: u32,
        callback: Box<dyn FnMut(u32) + Send>,
    ) -> Result<(), String> {
        self.file_handlers.insert(fd, callback);
        Ok(())
    }

    fn delete_file_handler(&mut self, fd: i32) -> Result<(), String> {
        self.file_handlers
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| format!("no file handler for descriptor {fd}"))
    }

    fn pump_once(&mut self, flags: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(50);
        loop {
            if self.step(flags) {
                return true;
            }
            if flags & DONT_WAIT != 0 {
                return false;
            }
            let wait_until = match self.next_due() {
                Some(due) => due.min(deadline),
                None => deadline,
            };
            {
                let mut alerted = self.shared.alerted.lock();
                if *alerted {
                    *alerted = false;
                    return false;
                }
                self.shared.alert_cond.wait_until(&mut alerted, wait_until);
                if *alerted {
                    *alerted = false;
                    return false;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    fn open_windows(&self) -> usize {
        self.shared.windows.load(Ordering::SeqCst)
    }

    fn is_threaded(&self) -> bool {
        self.threaded
    }

    fn alerter(&self) -> Option<Alerter> {
        let shared = self.shared.clone();
        Some(Arc::new(move || shared.alert()))
    }
}
