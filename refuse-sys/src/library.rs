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

//! Locating and binding libfuse at runtime.

use crate::bindings::*;
use crate::err::LibraryError;
use libc::{c_char, c_int, c_void};
use log::{debug, info, warn};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::OnceLock;

/// Log target for library discovery and binding
pub const LIB_TAG: &str = "fuse_lib";

/// Environment variable naming an explicit library file to try first
pub const LIBRARY_PATH_ENV: &str = "FUSE_LIBRARY_PATH";

/// A `dlopen`ed shared object, closed on drop
pub struct Library {
    handle: *mut c_void,
    path: String,
}

// the handle is only used for dlsym/dlclose, both of which are thread safe
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

fn dl_error() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

impl Library {
    /// Opens `path`, exporting its symbols to later loads when `global` is set
    pub fn open(path: &str, global: bool) -> Result<Self, LibraryError> {
        let c_path = CString::new(path)?;
        let mode = libc::RTLD_NOW | if global { libc::RTLD_GLOBAL } else { libc::RTLD_LOCAL };
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), mode) };
        if handle.is_null() {
            return Err(LibraryError::NotFound {
                candidates: vec![path.to_string()],
                reason: dl_error(),
            });
        }
        debug!(target: LIB_TAG, "Opened {}", path);
        Ok(Self {
            handle,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolves `symbol` as a value of type `T`, which must be a function
    /// pointer type matching the symbol's C signature.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &'static str) -> Result<T, LibraryError> {
        if std::mem::size_of::<T>() != std::mem::size_of::<*mut c_void>() {
            return Err(LibraryError::SymbolSize {
                symbol,
                size: std::mem::size_of::<T>(),
            });
        }
        let missing = || LibraryError::MissingSymbol {
            library: self.path.clone(),
            symbol,
        };
        let c_symbol = CString::new(symbol).map_err(|_| missing())?;
        let ptr = libc::dlsym(self.handle, c_symbol.as_ptr());
        if ptr.is_null() {
            return Err(missing());
        }
        Ok(std::mem::transmute_copy::<*mut c_void, T>(&ptr))
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

/// The library names to try, in order, after the environment override.
pub fn candidates() -> Vec<String> {
    let mut names = vec![];
    if let Ok(path) = std::env::var(LIBRARY_PATH_ENV) {
        if !path.is_empty() {
            names.push(path);
        }
    }

    if cfg!(target_os = "macos") {
        names.extend(
            [
                "/usr/local/lib/libfuse.2.dylib",
                "/usr/local/lib/libfuse.dylib",
                "/usr/local/lib/libosxfuse.2.dylib",
                "/usr/local/lib/libfuse-t.dylib",
                "libfuse.2.dylib",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    } else {
        names.extend(["libfuse.so.2", "libfuse.so"].iter().map(|s| s.to_string()));
    }
    names
}

// libraries that must be loaded globally before libfuse itself
fn preload() -> Vec<Library> {
    let mut deps = vec![];
    if cfg!(target_os = "macos") {
        match Library::open("libiconv.2.dylib", true) {
            Ok(lib) => deps.push(lib),
            Err(e) => warn!(target: LIB_TAG, "Couldn't preload iconv: {}", e),
        }
    }
    deps
}

macro_rules! entry_points {
    ($($name:ident: fn($($arg:ty),*) $(-> $ret:ty)?;)*) => {
        /// Typed entry points into a bound libfuse
        pub struct LibFuse {
            $(pub $name: unsafe extern "C" fn($($arg),*) $(-> $ret)?,)*
            lib: Library,
            _deps: Vec<Library>,
        }

        impl LibFuse {
            unsafe fn bind(lib: Library, deps: Vec<Library>) -> Result<Self, LibraryError> {
                Ok(Self {
                    $($name: lib.symbol(stringify!($name))?,)*
                    lib,
                    _deps: deps,
                })
            }
        }
    };
}

entry_points! {
    fuse_main_real: fn(c_int, *mut *mut c_char, *const fuse_operations, usize, *mut c_void) -> c_int;
    fuse_get_context: fn() -> *mut fuse_context;
    fuse_exit: fn(*mut fuse);
    fuse_mount: fn(*const c_char, *mut fuse_args) -> *mut fuse_chan;
    fuse_unmount: fn(*const c_char, *mut fuse_chan);
    fuse_lowlevel_new: fn(*mut fuse_args, *const fuse_lowlevel_ops, usize, *mut c_void) -> *mut fuse_session;
    fuse_session_add_chan: fn(*mut fuse_session, *mut fuse_chan);
    fuse_session_remove_chan: fn(*mut fuse_chan);
    fuse_session_destroy: fn(*mut fuse_session);
    fuse_session_loop: fn(*mut fuse_session) -> c_int;
    fuse_session_loop_mt: fn(*mut fuse_session) -> c_int;
    fuse_session_exit: fn(*mut fuse_session);
    fuse_set_signal_handlers: fn(*mut fuse_session) -> c_int;
    fuse_remove_signal_handlers: fn(*mut fuse_session);
    fuse_req_userdata: fn(fuse_req_t) -> *mut c_void;
    fuse_req_ctx: fn(fuse_req_t) -> *const fuse_ctx;
    fuse_reply_err: fn(fuse_req_t, c_int) -> c_int;
    fuse_reply_none: fn(fuse_req_t);
    fuse_reply_entry: fn(fuse_req_t, *const fuse_entry_param) -> c_int;
    fuse_reply_create: fn(fuse_req_t, *const fuse_entry_param, *const fuse_file_info) -> c_int;
    fuse_reply_attr: fn(fuse_req_t, *const stat, f64) -> c_int;
    fuse_reply_readlink: fn(fuse_req_t, *const c_char) -> c_int;
    fuse_reply_open: fn(fuse_req_t, *const fuse_file_info) -> c_int;
    fuse_reply_write: fn(fuse_req_t, usize) -> c_int;
    fuse_reply_buf: fn(fuse_req_t, *const c_char, usize) -> c_int;
    fuse_reply_statfs: fn(fuse_req_t, *const statvfs) -> c_int;
    fuse_reply_xattr: fn(fuse_req_t, usize) -> c_int;
    fuse_add_direntry: fn(fuse_req_t, *mut c_char, usize, *const c_char, *const stat, fuse_off_t) -> usize;
    fuse_notify_poll: fn(*mut fuse_pollhandle) -> c_int;
    fuse_pollhandle_destroy: fn(*mut fuse_pollhandle);
}

static GLOBAL: OnceLock<LibFuse> = OnceLock::new();

impl LibFuse {
    /// Binds the library at an explicit path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LibraryError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let deps = preload();
        let lib = Library::open(&path, false)?;
        unsafe { Self::bind(lib, deps) }
    }

    /// Walks [`candidates`] and binds the first library that opens.
    pub fn load() -> Result<Self, LibraryError> {
        let names = candidates();
        let deps = preload();
        let mut reasons = vec![];

        for name in &names {
            match Library::open(name, false) {
                Ok(lib) => {
                    info!(target: LIB_TAG, "Using {}", name);
                    return unsafe { Self::bind(lib, deps) };
                }
                Err(e) => {
                    debug!(target: LIB_TAG, "{}", e);
                    if let LibraryError::NotFound { reason, .. } = e {
                        reasons.push(reason);
                    }
                }
            }
        }

        Err(LibraryError::NotFound {
            candidates: names,
            reason: reasons.join("; "),
        })
    }

    /// The process-wide binding, loaded on first use.  Sessions and the
    /// native callbacks all go through this one.
    pub fn global() -> Result<&'static Self, LibraryError> {
        if let Some(lib) = GLOBAL.get() {
            return Ok(lib);
        }
        let lib = Self::load()?;
        // if another thread won the race, ours is simply dropped
        Ok(GLOBAL.get_or_init(|| lib))
    }

    /// The process-wide binding, if something has already loaded it.
    pub fn loaded() -> Option<&'static Self> {
        GLOBAL.get()
    }

    pub fn path(&self) -> &str {
        self.lib.path()
    }
}
