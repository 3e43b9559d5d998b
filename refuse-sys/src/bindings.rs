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

//! The libfuse 2.9 C declarations we call through or hand tables to.
//!
//! `struct stat`, `struct statvfs`, `struct timespec` and `fuse_file_info`
//! are deliberately opaque here; their layouts come from [`crate::layout`].
//! The operation tables are handed to libfuse along with their size, and
//! libfuse zero-fills any trailing slots it knows about and we don't, so the
//! platform specific tails (osxfuse's extended attribute setters and such)
//! are omitted.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_uint, c_ulong, c_void, dev_t, gid_t, mode_t, pid_t, uid_t};

macro_rules! opaque {
    ($($name:ident),*) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(
    fuse,
    fuse_chan,
    fuse_session,
    fuse_req,
    fuse_pollhandle,
    fuse_conn_info,
    fuse_file_info,
    stat,
    statvfs,
    timespec
);

pub type fuse_req_t = *mut fuse_req;
pub type fuse_ino_t = c_ulong;
/// libfuse is always built with 64 bit file offsets
pub type fuse_off_t = i64;

#[repr(C)]
pub struct fuse_args {
    pub argc: c_int,
    pub argv: *mut *mut c_char,
    pub allocated: c_int,
}

#[repr(C)]
pub struct fuse_context {
    pub fuse: *mut fuse,
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
    pub private_data: *mut c_void,
    pub umask: mode_t,
}

#[repr(C)]
pub struct fuse_ctx {
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
    pub umask: mode_t,
}

/// Opaque `fuse_entry_param`, laid out by [`crate::layout::EntryParamLayout`]
#[repr(C)]
pub struct fuse_entry_param {
    _private: [u8; 0],
}

pub type fuse_fill_dir_t = Option<
    unsafe extern "C" fn(buf: *mut c_void, name: *const c_char, stbuf: *const stat, off: fuse_off_t) -> c_int,
>;

/// Bit indices of the single-bit members packed into `fuse_operations::flags`.
/// With nullpath_ok set, operations on open handles may receive a null path.
pub const FLAG_NULLPATH_OK: u32 = 0;
pub const FLAG_NOPATH: u32 = 1;
pub const FLAG_UTIME_OMIT_OK: u32 = 2;

#[cfg(not(target_os = "macos"))]
pub type setxattr_fn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, usize, c_int) -> c_int;
#[cfg(target_os = "macos")]
pub type setxattr_fn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, usize, c_int, u32) -> c_int;

#[cfg(not(target_os = "macos"))]
pub type getxattr_fn = unsafe extern "C" fn(*const c_char, *const c_char, *mut c_char, usize) -> c_int;
#[cfg(target_os = "macos")]
pub type getxattr_fn =
    unsafe extern "C" fn(*const c_char, *const c_char, *mut c_char, usize, u32) -> c_int;

#[repr(C)]
pub struct fuse_operations {
    pub getattr: Option<unsafe extern "C" fn(*const c_char, *mut stat) -> c_int>,
    pub readlink: Option<unsafe extern "C" fn(*const c_char, *mut c_char, usize) -> c_int>,
    pub getdir: *mut c_void,
    pub mknod: Option<unsafe extern "C" fn(*const c_char, mode_t, dev_t) -> c_int>,
    pub mkdir: Option<unsafe extern "C" fn(*const c_char, mode_t) -> c_int>,
    pub unlink: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub rmdir: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub symlink: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub rename: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub link: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub chmod: Option<unsafe extern "C" fn(*const c_char, mode_t) -> c_int>,
    pub chown: Option<unsafe extern "C" fn(*const c_char, uid_t, gid_t) -> c_int>,
    pub truncate: Option<unsafe extern "C" fn(*const c_char, fuse_off_t) -> c_int>,
    pub utime: *mut c_void,
    pub open: Option<unsafe extern "C" fn(*const c_char, *mut fuse_file_info) -> c_int>,
    pub read: Option<
        unsafe extern "C" fn(*const c_char, *mut c_char, usize, fuse_off_t, *mut fuse_file_info) -> c_int,
    >,
    pub write: Option<
        unsafe extern "C" fn(*const c_char, *const c_char, usize, fuse_off_t, *mut fuse_file_info) -> c_int,
    >,
    pub statfs: Option<unsafe extern "C" fn(*const c_char, *mut statvfs) -> c_int>,
    pub flush: Option<unsafe extern "C" fn(*const c_char, *mut fuse_file_info) -> c_int>,
    pub release: Option<unsafe extern "C" fn(*const c_char, *mut fuse_file_info) -> c_int>,
    pub fsync: Option<unsafe extern "C" fn(*const c_char, c_int, *mut fuse_file_info) -> c_int>,
    pub setxattr: Option<setxattr_fn>,
    pub getxattr: Option<getxattr_fn>,
    pub listxattr: Option<unsafe extern "C" fn(*const c_char, *mut c_char, usize) -> c_int>,
    pub removexattr: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub opendir: Option<unsafe extern "C" fn(*const c_char, *mut fuse_file_info) -> c_int>,
    pub readdir: Option<
        unsafe extern "C" fn(
            *const c_char,
            *mut c_void,
            fuse_fill_dir_t,
            fuse_off_t,
            *mut fuse_file_info,
        ) -> c_int,
    >,
    pub releasedir: Option<unsafe extern "C" fn(*const c_char, *mut fuse_file_info) -> c_int>,
    pub fsyncdir: Option<unsafe extern "C" fn(*const c_char, c_int, *mut fuse_file_info) -> c_int>,
    pub init: Option<unsafe extern "C" fn(*mut fuse_conn_info) -> *mut c_void>,
    pub destroy: Option<unsafe extern "C" fn(*mut c_void)>,
    pub access: Option<unsafe extern "C" fn(*const c_char, c_int) -> c_int>,
    pub create: Option<unsafe extern "C" fn(*const c_char, mode_t, *mut fuse_file_info) -> c_int>,
    pub ftruncate: Option<unsafe extern "C" fn(*const c_char, fuse_off_t, *mut fuse_file_info) -> c_int>,
    pub fgetattr: Option<unsafe extern "C" fn(*const c_char, *mut stat, *mut fuse_file_info) -> c_int>,
    pub lock: Option<
        unsafe extern "C" fn(*const c_char, *mut fuse_file_info, c_int, *mut libc::flock) -> c_int,
    >,
    pub utimens: Option<unsafe extern "C" fn(*const c_char, *const timespec) -> c_int>,
    pub bmap: Option<unsafe extern "C" fn(*const c_char, usize, *mut u64) -> c_int>,
    pub flags: c_uint,
    pub ioctl: Option<
        unsafe extern "C" fn(
            *const c_char,
            c_int,
            *mut c_void,
            *mut fuse_file_info,
            c_uint,
            *mut c_void,
        ) -> c_int,
    >,
    pub poll: Option<
        unsafe extern "C" fn(*const c_char, *mut fuse_file_info, *mut fuse_pollhandle, *mut c_uint) -> c_int,
    >,
    pub write_buf: *mut c_void,
    pub read_buf: *mut c_void,
    pub flock: *mut c_void,
    pub fallocate: *mut c_void,
}

impl Default for fuse_operations {
    fn default() -> Self {
        // every member is either a nullable fn pointer, a raw pointer or an
        // integer, so all-zeroes is the empty table
        unsafe { std::mem::zeroed() }
    }
}

#[cfg(not(target_os = "macos"))]
pub type ll_setxattr_fn =
    unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, *const c_char, usize, c_int);
#[cfg(target_os = "macos")]
pub type ll_setxattr_fn =
    unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, *const c_char, usize, c_int, u32);

#[cfg(not(target_os = "macos"))]
pub type ll_getxattr_fn = unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, usize);
#[cfg(target_os = "macos")]
pub type ll_getxattr_fn = unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, usize, u32);

type ll_fi_fn = unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *mut fuse_file_info);
type ll_name_fn = unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char);

#[repr(C)]
pub struct fuse_lowlevel_ops {
    pub init: Option<unsafe extern "C" fn(*mut c_void, *mut fuse_conn_info)>,
    pub destroy: Option<unsafe extern "C" fn(*mut c_void)>,
    pub lookup: Option<ll_name_fn>,
    pub forget: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, c_ulong)>,
    pub getattr: Option<ll_fi_fn>,
    pub setattr: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *mut stat, c_int, *mut fuse_file_info)>,
    pub readlink: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t)>,
    pub mknod: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, mode_t, dev_t)>,
    pub mkdir: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, mode_t)>,
    pub unlink: Option<ll_name_fn>,
    pub rmdir: Option<ll_name_fn>,
    pub symlink: Option<unsafe extern "C" fn(fuse_req_t, *const c_char, fuse_ino_t, *const c_char)>,
    pub rename: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, fuse_ino_t, *const c_char),
    >,
    pub link: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, fuse_ino_t, *const c_char)>,
    pub open: Option<ll_fi_fn>,
    pub read: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, usize, fuse_off_t, *mut fuse_file_info)>,
    pub write: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, usize, fuse_off_t, *mut fuse_file_info),
    >,
    pub flush: Option<ll_fi_fn>,
    pub release: Option<ll_fi_fn>,
    pub fsync: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, c_int, *mut fuse_file_info)>,
    pub opendir: Option<ll_fi_fn>,
    pub readdir: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, usize, fuse_off_t, *mut fuse_file_info)>,
    pub releasedir: Option<ll_fi_fn>,
    pub fsyncdir: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, c_int, *mut fuse_file_info)>,
    pub statfs: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t)>,
    pub setxattr: Option<ll_setxattr_fn>,
    pub getxattr: Option<ll_getxattr_fn>,
    pub listxattr: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, usize)>,
    pub removexattr: Option<ll_name_fn>,
    pub access: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, c_int)>,
    pub create: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, mode_t, *mut fuse_file_info),
    >,
    pub getlk: *mut c_void,
    pub setlk: *mut c_void,
    pub bmap: *mut c_void,
    pub ioctl: *mut c_void,
    pub poll: *mut c_void,
    pub write_buf: *mut c_void,
    pub retrieve_reply: *mut c_void,
    pub forget_multi: *mut c_void,
    pub flock: *mut c_void,
    pub fallocate: *mut c_void,
}

impl Default for fuse_lowlevel_ops {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Bits of the `to_set` argument of the low-level setattr
pub const FUSE_SET_ATTR_MODE: c_int = 1 << 0;
pub const FUSE_SET_ATTR_UID: c_int = 1 << 1;
pub const FUSE_SET_ATTR_GID: c_int = 1 << 2;
pub const FUSE_SET_ATTR_SIZE: c_int = 1 << 3;
pub const FUSE_SET_ATTR_ATIME: c_int = 1 << 4;
pub const FUSE_SET_ATTR_MTIME: c_int = 1 << 5;
pub const FUSE_SET_ATTR_ATIME_NOW: c_int = 1 << 7;
pub const FUSE_SET_ATTR_MTIME_NOW: c_int = 1 << 8;
