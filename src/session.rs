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

//! Mounting a handler and running the native loop until unmount.

use crate::conf::{type_fsname, FuseOptions};
use crate::dispatch::guard::{ContextExit, Fault, SessionExit, Supervisor};
use crate::dispatch::table::operations_table;
use crate::dispatch::Dispatcher;
use crate::err::MountError;
use crate::log::FUSE_TAG;
use crate::lowlevel::dispatch::lowlevel_table;
use crate::lowlevel::{LowLevelDispatcher, LowLevelOperations, NativeSink, Replies};
use crate::ops::Operations;
use libc::{c_char, c_int, c_void, gid_t, mode_t, pid_t, uid_t};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use refuse_sys::{
    fuse_args, fuse_chan, fuse_lowlevel_ops, fuse_operations, fuse_session, Abi, LibFuse,
};
use std::ffi::{CString, NulError};
use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

/// argv[0] for libfuse
pub const PROGNAME: &str = "refuse";

/// Who made the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
    pub umask: mode_t,
}

/// The caller of the high-level request being serviced on this thread.
/// `None` outside of a callback.
pub fn context() -> Option<Context> {
    let lib = LibFuse::loaded()?;
    let ctx = unsafe { (lib.fuse_get_context)().as_ref()? };
    if ctx.fuse.is_null() {
        return None;
    }
    Some(Context {
        uid: ctx.uid,
        gid: ctx.gid,
        pid: ctx.pid,
        umask: ctx.umask,
    })
}

/// An argument vector libfuse can parse.  The strings stay owned here, so
/// this has to outlive every native call that was handed its `fuse_args`.
struct Argv {
    _args: Vec<CString>,
    ptrs: Vec<*mut c_char>,
}

impl Argv {
    fn new(args: &[String]) -> Result<Self, NulError> {
        let owned = args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ptrs: Vec<*mut c_char> = owned.iter().map(|a| a.as_ptr() as *mut c_char).collect();
        ptrs.push(ptr::null_mut());
        Ok(Self {
            _args: owned,
            ptrs,
        })
    }

    fn argc(&self) -> c_int {
        (self.ptrs.len() - 1) as c_int
    }

    fn fuse_args(&mut self) -> fuse_args {
        fuse_args {
            argc: self.argc(),
            argv: self.ptrs.as_mut_ptr(),
            allocated: 0,
        }
    }
}

/// SIGINT at its default disposition for as long as this lives.  libfuse
/// only installs its own exit handlers over default dispositions.
struct SigintDefault {
    old: SigAction,
}

impl SigintDefault {
    fn install() -> Result<Self, Errno> {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let old = unsafe { sigaction(Signal::SIGINT, &default) }?;
        Ok(Self { old })
    }
}

impl Drop for SigintDefault {
    fn drop(&mut self) {
        if let Err(e) = unsafe { sigaction(Signal::SIGINT, &self.old) } {
            warn!(target: FUSE_TAG, "Couldn't restore the SIGINT handler: {}", e);
        }
    }
}

/// Turns whatever the dispatcher recorded, and the loop's exit code, into
/// the result of a mount
fn finish(supervisor: &Supervisor, code: c_int) -> Result<(), MountError> {
    match supervisor.faults().take() {
        Some(Fault::Panic(payload)) => {
            error!(target: FUSE_TAG, "Re-raising a handler panic");
            std::panic::resume_unwind(payload)
        }
        Some(Fault::Error(e)) => Err(MountError::Fault(e)),
        None if code != 0 => Err(MountError::Exit(code)),
        None => Ok(()),
    }
}

/// Mounts `ops` at `mountpoint` and serves it until unmounted.
///
/// This blocks for the life of the filesystem (unless `foreground` is off,
/// in which case libfuse daemonizes first).  A panic in `init`, or any
/// fatal error, ends the session and is re-raised or returned here.
pub fn mount<T: Operations>(
    ops: T,
    mountpoint: &str,
    options: FuseOptions,
) -> Result<(), MountError> {
    let abi = Abi::host()?;
    let lib = LibFuse::global()?;
    info!(target: FUSE_TAG, "Bound {} for {:?}", lib.path(), abi.platform);

    let options = options.with_default_fsname(&type_fsname::<T>());
    let table = operations_table::<T>(
        ops.supported(),
        options.nullpath_ok,
        abi.platform.endian,
    );
    let args = options.to_args(PROGNAME, mountpoint);
    debug!(target: FUSE_TAG, "Aggregating fuse args {:?}", args);
    let mut argv = Argv::new(&args)?;

    let supervisor = Supervisor::new(Box::new(ContextExit));
    let dispatcher = Box::new(Dispatcher::new(ops, abi, &options, supervisor));
    let user_data = &*dispatcher as *const Dispatcher<T> as *mut c_void;

    let code = {
        let _sigint = SigintDefault::install()?;
        info!(target: FUSE_TAG, "Mounting {}", mountpoint);
        unsafe {
            (lib.fuse_main_real)(
                argv.argc(),
                argv.ptrs.as_mut_ptr(),
                &table,
                size_of::<fuse_operations>(),
                user_data,
            )
        }
    };
    info!(target: FUSE_TAG, "Unmounted {} with {}", mountpoint, code);

    finish(dispatcher.supervisor(), code)
}

struct Channel<'a> {
    lib: &'static LibFuse,
    mountpoint: &'a CString,
    chan: *mut fuse_chan,
}

impl<'a> Channel<'a> {
    fn mount(
        lib: &'static LibFuse,
        mountpoint: &'a CString,
        args: &mut fuse_args,
    ) -> Result<Self, MountError> {
        debug!(target: FUSE_TAG, "Mounting {:?}", mountpoint);
        let chan = unsafe { (lib.fuse_mount)(mountpoint.as_ptr(), args) };
        if chan.is_null() {
            error!(target: FUSE_TAG, "fuse_chan was NULL!");
            return Err(MountError::BadFuseChannel);
        }
        Ok(Self {
            lib,
            mountpoint,
            chan,
        })
    }
}

impl Drop for Channel<'_> {
    fn drop(&mut self) {
        info!(target: FUSE_TAG, "Unmounting {:?}", self.mountpoint);
        unsafe { (self.lib.fuse_unmount)(self.mountpoint.as_ptr(), self.chan) }
    }
}

struct Session {
    lib: &'static LibFuse,
    se: *mut fuse_session,
}

impl Session {
    fn new(
        lib: &'static LibFuse,
        args: &mut fuse_args,
        ops: &fuse_lowlevel_ops,
        user_data: *mut c_void,
    ) -> Result<Self, MountError> {
        debug!(target: FUSE_TAG, "Creating fuse session");
        let se = unsafe {
            (lib.fuse_lowlevel_new)(args, ops, size_of::<fuse_lowlevel_ops>(), user_data)
        };
        if se.is_null() {
            error!(target: FUSE_TAG, "fuse session was NULL!");
            return Err(MountError::BadFuseSession);
        }
        Ok(Self { lib, se })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(target: FUSE_TAG, "Destroying fuse session");
        unsafe { (self.lib.fuse_session_destroy)(self.se) }
    }
}

struct SignalHandlers {
    lib: &'static LibFuse,
    se: *mut fuse_session,
}

impl SignalHandlers {
    fn install(lib: &'static LibFuse, se: *mut fuse_session) -> Result<Self, MountError> {
        debug!(target: FUSE_TAG, "Installing fuse signal handlers");
        if unsafe { (lib.fuse_set_signal_handlers)(se) } == -1 {
            return Err(MountError::SignalHandlers);
        }
        Ok(Self { lib, se })
    }
}

impl Drop for SignalHandlers {
    fn drop(&mut self) {
        unsafe { (self.lib.fuse_remove_signal_handlers)(self.se) }
    }
}

struct AttachedChannel {
    lib: &'static LibFuse,
    chan: *mut fuse_chan,
}

impl AttachedChannel {
    fn attach(session: &Session, channel: &Channel<'_>) -> Self {
        unsafe { (session.lib.fuse_session_add_chan)(session.se, channel.chan) };
        Self {
            lib: session.lib,
            chan: channel.chan,
        }
    }
}

impl Drop for AttachedChannel {
    fn drop(&mut self) {
        unsafe { (self.lib.fuse_session_remove_chan)(self.chan) }
    }
}

/// Mounts an inode-based handler and serves it until unmounted.  Always
/// runs in the foreground.
pub fn mount_lowlevel<T: LowLevelOperations>(
    ops: T,
    mountpoint: &str,
    options: FuseOptions,
) -> Result<(), MountError> {
    let abi = Abi::host()?;
    let lib = LibFuse::global()?;
    info!(target: FUSE_TAG, "Bound {} for {:?}", lib.path(), abi.platform);

    let options = options.with_default_fsname(&type_fsname::<T>());
    let args = options.to_lowlevel_args(PROGNAME);
    debug!(target: FUSE_TAG, "Aggregating fuse args {:?}", args);
    let c_mountpoint = CString::new(mountpoint)?;
    let mut argv = Argv::new(&args)?;
    // fuse_mount strips the mount options out, and fuse_lowlevel_new gets
    // what's left, so both share one fuse_args
    let mut fuse_args = argv.fuse_args();

    let exit = Arc::new(SessionExit::default());
    let replies = Replies::new(
        Box::new(NativeSink::new(lib)),
        abi,
        options.encoding,
        options.use_ns,
        Supervisor::new(Box::new(exit.clone())),
    );
    let dispatcher = Box::new(LowLevelDispatcher::new(ops, replies));
    let user_data = &*dispatcher as *const LowLevelDispatcher<T> as *mut c_void;
    let table = lowlevel_table::<T>();

    let code = {
        // torn down in reverse, so the unmount comes last
        let channel = Channel::mount(lib, &c_mountpoint, &mut fuse_args)?;
        let session = Session::new(lib, &mut fuse_args, &table, user_data)?;
        exit.set_session(session.se);
        let _sigint = SigintDefault::install()?;
        let _handlers = SignalHandlers::install(lib, session.se)?;
        let _attached = AttachedChannel::attach(&session, &channel);

        info!(target: FUSE_TAG, "Serving {}", mountpoint);
        let code = unsafe {
            if options.nothreads {
                (lib.fuse_session_loop)(session.se)
            } else {
                (lib.fuse_session_loop_mt)(session.se)
            }
        };
        exit.set_session(ptr::null_mut());
        code
    };
    info!(target: FUSE_TAG, "Unmounted {} with {}", mountpoint, code);

    finish(dispatcher.replies().supervisor(), code)
}
