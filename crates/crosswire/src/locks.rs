//! The two-domain lock coordinator.
//!
//! Interpreter access always goes through a bracket: `enter_target` leaves
//! host-execution context, takes the target lock, and records the driving
//! thread together with its interpreter access; dropping the guard undoes
//! all of it. `into_overlap` re-enters host context while the target lock is
//! still held, for converting results before releasing the interpreter.
//! `enter_host` is the inverse bracket used inside interpreter-invoked
//! callbacks.
//!
//! Callbacks may drive the interpreter again: `enter_target` on the thread
//! already inside a bracket reuses the recorded access instead of
//! re-locking, so target brackets nest freely between `enter_host` and its
//! drop. Only foreign threads contend for the mutex, and they marshal
//! through the invocation channel instead.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};

use crate::hooks::HostHooks;
use crate::interp::Interp;

/// The driving thread's interpreter access, recorded for nested brackets.
struct Reentry {
    thread: ThreadId,
    ptr: *mut (dyn Interp + 'static),
}

// The pointer is only ever dereferenced by the thread recorded next to it.
unsafe impl Send for Reentry {}

pub(crate) struct LockCoordinator {
    target: Mutex<Box<dyn Interp>>,
    hooks: Arc<dyn HostHooks>,
    driving: Mutex<Option<Reentry>>,
}

impl LockCoordinator {
    pub fn new(interp: Box<dyn Interp>, hooks: Arc<dyn HostHooks>) -> Self {
        LockCoordinator {
            target: Mutex::new(interp),
            hooks,
            driving: Mutex::new(None),
        }
    }

    /// Leave host context and take the target lock. On the thread already
    /// inside a bracket this nests, reusing the recorded access.
    pub fn enter_target(&self) -> TargetGuard<'_> {
        let nested = {
            let driving = self.driving.lock();
            match driving.as_ref() {
                Some(r) if r.thread == thread::current().id() => Some(r.ptr),
                _ => None,
            }
        };
        self.hooks.release_host();
        if let Some(ptr) = nested {
            return TargetGuard {
                coord: self,
                access: Some(Access::Nested(ptr)),
            };
        }
        let mut interp = self.target.lock();
        let ptr = &mut **interp as *mut (dyn Interp + 'static);
        *self.driving.lock() = Some(Reentry {
            thread: thread::current().id(),
            ptr,
        });
        TargetGuard {
            coord: self,
            access: Some(Access::Locked(interp)),
        }
    }

    /// Re-enter host context inside a callback invoked by the interpreter.
    /// The driving record stays in place so the callback can open nested
    /// target brackets.
    pub fn enter_host(&self) -> HostGuard<'_> {
        self.hooks.acquire_host();
        HostGuard { coord: self }
    }

    #[cfg(test)]
    fn driving_thread(&self) -> Option<ThreadId> {
        self.driving.lock().as_ref().map(|r| r.thread)
    }
}

enum Access<'a> {
    Locked(MutexGuard<'a, Box<dyn Interp>>),
    Nested(*mut (dyn Interp + 'static)),
}

/// Exclusive access to the interpreter; host context is released for the
/// duration.
pub(crate) struct TargetGuard<'a> {
    coord: &'a LockCoordinator,
    access: Option<Access<'a>>,
}

impl<'a> TargetGuard<'a> {
    pub fn interp(&mut self) -> &mut (dyn Interp + 'static) {
        match self.access.as_mut() {
            Some(Access::Locked(guard)) => &mut ***guard,
            // Safety: the pointer was recorded by this thread's outer
            // bracket, which still owns the lock; the interpreter hands
            // control to callbacks only at its re-entry points, and this
            // borrow ends before the callback returns to it.
            Some(Access::Nested(ptr)) => unsafe { &mut **ptr },
            None => unreachable!("target access already released"),
        }
    }

    /// Re-acquire host context while still holding the target lock. The
    /// overlap window is for converting interpreter results; dropping the
    /// returned guard releases the target lock.
    pub fn into_overlap(mut self) -> OverlapGuard<'a> {
        let access = match self.access.take() {
            Some(access) => access,
            None => unreachable!("target access already released"),
        };
        self.coord.hooks.acquire_host();
        OverlapGuard {
            coord: self.coord,
            access,
        }
    }
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        match self.access.take() {
            Some(Access::Locked(guard)) => {
                *self.coord.driving.lock() = None;
                drop(guard);
                self.coord.hooks.acquire_host();
            }
            Some(Access::Nested(_)) => {
                // The outer bracket still owns the lock and the record.
                self.coord.hooks.acquire_host();
            }
            None => {}
        }
    }
}

/// Both domains held at once; ends the bracket by releasing the target lock.
pub(crate) struct OverlapGuard<'a> {
    coord: &'a LockCoordinator,
    access: Access<'a>,
}

impl Drop for OverlapGuard<'_> {
    fn drop(&mut self) {
        if matches!(self.access, Access::Locked(_)) {
            *self.coord.driving.lock() = None;
            // Target lock releases when the access field drops.
        }
    }
}

/// Host context held inside an interpreter-invoked callback.
pub(crate) struct HostGuard<'a> {
    coord: &'a LockCoordinator,
}

impl Drop for HostGuard<'_> {
    fn drop(&mut self) {
        self.coord.hooks.release_host();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{InterpCommand, TimerId};
    use crate::value::TypedValue;
    use std::path::Path;
    use std::time::Duration;

    struct NullInterp;

    impl Interp for NullInterp {
        fn eval(&mut self, _: &str, _: bool) -> Result<TypedValue, String> {
            Ok(TypedValue::Text(String::new()))
        }
        fn eval_file(&mut self, _: &Path) -> Result<TypedValue, String> {
            Ok(TypedValue::Text(String::new()))
        }
        fn record(&mut self, _: &str) -> Result<TypedValue, String> {
            Ok(TypedValue::Text(String::new()))
        }
        fn call(&mut self, _: &[TypedValue], _: bool) -> Result<TypedValue, String> {
            Ok(TypedValue::Text(String::new()))
        }
        fn expr(&mut self, _: &str) -> Result<TypedValue, String> {
            Ok(TypedValue::Text(String::new()))
        }
        fn get_var(&mut self, _: &str, _: Option<&str>, _: bool) -> Result<TypedValue, String> {
            Err("no such variable".to_string())
        }
        fn set_var(
            &mut self,
            _: &str,
            _: Option<&str>,
            _: TypedValue,
            _: bool,
        ) -> Result<(), String> {
            Ok(())
        }
        fn unset_var(&mut self, _: &str, _: Option<&str>, _: bool) -> Result<(), String> {
            Ok(())
        }
        fn add_error_info(&mut self, _: &str) {}
        fn register_command(
            &mut self,
            _: &str,
            _: Box<dyn InterpCommand>,
        ) -> Result<(), String> {
            Ok(())
        }
        fn delete_command(&mut self, _: &str) -> Result<(), String> {
            Ok(())
        }
        fn create_timer(&mut self, _: Duration, _: Box<dyn FnOnce() + Send>) -> TimerId {
            0
        }
        fn delete_timer(&mut self, _: TimerId) {}
        fn create_file_handler(
            &mut self,
            _: i32,
            _: u32,
            _: Box<dyn FnMut(u32) + Send>,
        ) -> Result<(), String> {
            Ok(())
        }
        fn delete_file_handler(&mut self, _: i32) -> Result<(), String> {
            Ok(())
        }
        fn pump_once(&mut self, _: u32) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        log: Mutex<Vec<&'static str>>,
    }

    impl HostHooks for RecordingHooks {
        fn release_host(&self) {
            self.log.lock().push("release");
        }
        fn acquire_host(&self) {
            self.log.lock().push("acquire");
        }
    }

    fn coordinator() -> (LockCoordinator, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::default());
        let coord = LockCoordinator::new(Box::new(NullInterp), hooks.clone());
        (coord, hooks)
    }

    #[test]
    fn test_target_bracket_releases_and_reacquires_host() {
        let (coord, hooks) = coordinator();
        {
            let mut guard = coord.enter_target();
            assert!(!guard.interp().pump_once(0));
            assert_eq!(coord.driving_thread(), Some(thread::current().id()));
        }
        assert_eq!(coord.driving_thread(), None);
        assert_eq!(*hooks.log.lock(), vec!["release", "acquire"]);
    }

    #[test]
    fn test_overlap_reacquires_host_before_target_release() {
        let (coord, hooks) = coordinator();
        {
            let guard = coord.enter_target();
            let overlap = guard.into_overlap();
            assert_eq!(*hooks.log.lock(), vec!["release", "acquire"]);
            drop(overlap);
        }
        assert_eq!(coord.driving_thread(), None);
        // Overlap already holds the host; ending it adds nothing.
        assert_eq!(*hooks.log.lock(), vec!["release", "acquire"]);
        // Target lock is free again.
        let _second = coord.enter_target();
    }

    #[test]
    fn test_host_bracket_keeps_driving_record() {
        let (coord, _hooks) = coordinator();
        let _target = coord.enter_target();
        {
            let _host = coord.enter_host();
            assert_eq!(coord.driving_thread(), Some(thread::current().id()));
        }
        assert_eq!(coord.driving_thread(), Some(thread::current().id()));
    }

    #[test]
    fn test_nested_bracket_reuses_target_access() {
        let (coord, hooks) = coordinator();
        let mut outer = coord.enter_target();
        assert!(!outer.interp().pump_once(0));
        {
            let _host = coord.enter_host();
            // A callback on the driving thread re-enters without re-locking.
            let mut nested = coord.enter_target();
            assert!(!nested.interp().pump_once(0));
            assert_eq!(coord.driving_thread(), Some(thread::current().id()));
        }
        drop(outer);
        assert_eq!(coord.driving_thread(), None);
        assert_eq!(
            *hooks.log.lock(),
            vec!["release", "acquire", "release", "acquire", "release", "acquire"]
        );
    }
}
