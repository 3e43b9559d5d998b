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

use crate::err::{FuseError, FuseResult};
use libc::c_int;
use parking_lot::Mutex;
use refuse_sys::{fuse_pollhandle, LibFuse};
use std::ptr::NonNull;

type NotifyFn = unsafe extern "C" fn(*mut fuse_pollhandle) -> c_int;
type DestroyFn = unsafe extern "C" fn(*mut fuse_pollhandle);

/// A kernel poll registration.  Notifying consumes it; dropping it without
/// notifying releases it.
pub struct PollHandle {
    ptr: NonNull<fuse_pollhandle>,
    notify: NotifyFn,
    destroy: DestroyFn,
}

// libfuse poll handles may be notified from any thread
unsafe impl Send for PollHandle {}

impl PollHandle {
    /// # Safety
    /// `ptr` must be null or a poll handle libfuse handed us and nobody else
    /// owns.
    pub unsafe fn from_raw(ptr: *mut fuse_pollhandle, lib: &LibFuse) -> Option<Self> {
        Self::with_fns(ptr, lib.fuse_notify_poll, lib.fuse_pollhandle_destroy)
    }

    /// # Safety
    /// As [`PollHandle::from_raw`], and `notify`/`destroy` must be valid for
    /// `ptr`.
    pub unsafe fn with_fns(
        ptr: *mut fuse_pollhandle,
        notify: NotifyFn,
        destroy: DestroyFn,
    ) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            notify,
            destroy,
        })
    }

    /// Tells the kernel to poll again.
    pub fn notify(self) -> FuseResult<()> {
        let rc = unsafe { (self.notify)(self.ptr.as_ptr()) };
        if rc < 0 {
            Err(FuseError::raw(-rc))
        } else {
            Ok(())
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.ptr.as_ptr()) }
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PollHandle({:p})", self.ptr)
    }
}

/// Holds the most recent poll registration for something pollable.  A new
/// registration replaces and releases the previous one under the lock, so
/// concurrent polls from the multithreaded loop can't leak or double free.
#[derive(Debug, Default)]
pub struct PollSlot {
    handle: Mutex<Option<PollHandle>>,
}

impl PollSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, handle: Option<PollHandle>) {
        let mut slot = self.handle.lock();
        // the old handle, if any, is destroyed here while we still hold the lock
        *slot = handle;
    }

    pub fn take(&self) -> Option<PollHandle> {
        self.handle.lock().take()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Notifies and releases the held registration.  Returns whether there
    /// was one.
    pub fn notify(&self) -> FuseResult<bool> {
        match self.take() {
            Some(handle) => handle.notify().map(|_| true),
            None => Ok(false),
        }
    }
}
