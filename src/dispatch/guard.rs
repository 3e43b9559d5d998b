/*
 * Refuse
 * Copyright (C) 2020 Andrew Moffat
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

//! The boundary between handler code and libfuse.  Nothing a handler does,
//! including panicking, may unwind into C, and every outcome has to become a
//! status libfuse understands.

use crate::err::{FuseError, FuseResult};
use crate::log::{next_request, FUSEOP_TAG, FUSE_TAG};
use libc::c_int;
use log::{debug, error, warn};
use parking_lot::Mutex;
use refuse_sys::{fuse_session, LibFuse};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

/// Something that went wrong badly enough to end the session
pub enum Fault {
    Panic(Box<dyn Any + Send + 'static>),
    Error(FuseError),
}

impl std::fmt::Debug for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Panic(payload) => write!(f, "Panic({})", panic_message(payload.as_ref())),
            Fault::Error(e) => write!(f, "Error({})", e),
        }
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Holds the first fault of a session.  Later ones are logged and dropped.
#[derive(Debug, Default)]
pub struct FaultSlot {
    fault: Mutex<Option<Fault>>,
}

impl FaultSlot {
    pub fn record(&self, fault: Fault) {
        let mut slot = self.fault.lock();
        if slot.is_none() {
            *slot = Some(fault);
        } else {
            warn!(target: FUSE_TAG, "Dropping subsequent fault {:?}", fault);
        }
    }

    pub fn take(&self) -> Option<Fault> {
        self.fault.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.fault.lock().is_some()
    }
}

/// Asks the native loop to stop dispatching.
pub trait SessionControl: Send + Sync {
    fn exit(&self);
}

impl<C: SessionControl + ?Sized> SessionControl for Arc<C> {
    fn exit(&self) {
        (**self).exit()
    }
}

/// Exits the high-level session that is calling us, via `fuse_get_context`.
/// Only meaningful from inside a callback.
pub struct ContextExit;

impl SessionControl for ContextExit {
    fn exit(&self) {
        if let Some(lib) = LibFuse::loaded() {
            unsafe {
                let ctx = (lib.fuse_get_context)();
                if !ctx.is_null() && !(*ctx).fuse.is_null() {
                    (lib.fuse_exit)((*ctx).fuse);
                }
            }
        }
    }
}

/// Exits a low-level session.  The session pointer only exists after the
/// dispatcher has been handed to libfuse, so it is filled in late.
#[derive(Default)]
pub struct SessionExit {
    session: AtomicPtr<fuse_session>,
}

impl SessionExit {
    pub fn set_session(&self, session: *mut fuse_session) {
        self.session.store(session, Ordering::SeqCst);
    }
}

impl SessionControl for SessionExit {
    fn exit(&self) {
        let session = self.session.load(Ordering::SeqCst);
        if session.is_null() {
            return;
        }
        if let Some(lib) = LibFuse::loaded() {
            unsafe { (lib.fuse_session_exit)(session) }
        }
    }
}

/// The fault slot and exit control shared by every callback of a session.
pub struct Supervisor {
    faults: FaultSlot,
    control: Box<dyn SessionControl>,
    exiting: AtomicBool,
}

impl Supervisor {
    pub fn new(control: Box<dyn SessionControl>) -> Self {
        Self {
            faults: FaultSlot::default(),
            control,
            exiting: AtomicBool::new(false),
        }
    }

    pub fn faults(&self) -> &FaultSlot {
        &self.faults
    }

    pub fn control(&self) -> &dyn SessionControl {
        self.control.as_ref()
    }

    /// Idempotent
    pub fn request_exit(&self) {
        if !self.exiting.swap(true, Ordering::SeqCst) {
            debug!(target: FUSE_TAG, "Requesting session exit");
            self.control.exit();
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Records the fault and ends the session
    pub fn abort(&self, fault: Fault) {
        self.faults.record(fault);
        self.request_exit();
    }

    /// The negative status for a failed operation.  Fatal errors are
    /// recorded and end the session.
    pub fn status_of(&self, op: &str, e: FuseError) -> c_int {
        match e {
            FuseError::Code {
                errno: Some(num), ..
            } if num > 0 => {
                debug!(target: FUSEOP_TAG, "{} failed: {}", op, e);
                -num
            }
            FuseError::Code { .. } => {
                error!(
                    target: FUSEOP_TAG,
                    "{} failed without a valid errno: {}", op, e
                );
                -libc::EINVAL
            }
            FuseError::Fatal(_) => {
                error!(target: FUSEOP_TAG, "{} failed fatally: {}", op, e);
                self.abort(Fault::Error(e));
                -libc::EINVAL
            }
        }
    }
}

fn run<F>(op: &'static str, supervisor: &Supervisor, fatal_panics: bool, f: F) -> c_int
where
    F: FnOnce() -> FuseResult<c_int>,
{
    next_request();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => supervisor.status_of(op, e),
        Err(payload) => {
            error!(
                target: FUSEOP_TAG,
                "{} panicked: {}",
                op,
                panic_message(payload.as_ref())
            );
            if fatal_panics {
                supervisor.abort(Fault::Panic(payload));
            }
            -libc::EINVAL
        }
    }
}

/// Runs one handler call.  A panic is reported as `EINVAL`.
pub fn guard<F>(op: &'static str, supervisor: &Supervisor, f: F) -> c_int
where
    F: FnOnce() -> FuseResult<c_int>,
{
    run(op, supervisor, false, f)
}

/// For callbacks that have no way to report failure (init): any error or
/// panic is recorded and ends the session.
pub fn guard_fatal<F>(op: &'static str, supervisor: &Supervisor, f: F) -> c_int
where
    F: FnOnce() -> FuseResult<c_int>,
{
    run(op, supervisor, true, || {
        f().map_err(|e| match e {
            FuseError::Fatal(_) => e,
            other => FuseError::Fatal(format!("{} failed: {}", op, other)),
        })
    })
}
