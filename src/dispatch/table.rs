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

//! The `extern "C"` entry points handed to libfuse in `fuse_operations`.
//! Each one finds our [`Dispatcher`] through the request context's
//! `private_data` and forwards to it.

use super::Dispatcher;
use crate::ops::{OpSet, Operations};
use libc::{c_char, c_int, c_uint, c_void, dev_t, gid_t, mode_t, uid_t};
use refuse_sys::{
    fuse_conn_info, fuse_file_info, fuse_fill_dir_t, fuse_off_t, fuse_operations,
    fuse_pollhandle, stat, statvfs, timespec, Endian, LibFuse, FLAG_NULLPATH_OK,
};
use std::ptr;

/// The dispatcher `mount` passed to `fuse_main_real` as user data
unsafe fn dispatcher<'a, T: Operations>() -> Option<&'a Dispatcher<T>> {
    let lib = LibFuse::loaded()?;
    let ctx = (lib.fuse_get_context)();
    if ctx.is_null() {
        return None;
    }
    ((*ctx).private_data as *const Dispatcher<T>).as_ref()
}

macro_rules! trampolines {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            unsafe extern "C" fn $name<T: Operations>($($arg: $ty),*) -> c_int {
                match dispatcher::<T>() {
                    Some(d) => d.$name($($arg),*),
                    None => -libc::EIO,
                }
            }
        )*
    };
}

trampolines! {
    getattr(path: *const c_char, st: *mut stat);
    fgetattr(path: *const c_char, st: *mut stat, fi: *mut fuse_file_info);
    readlink(path: *const c_char, buf: *mut c_char, size: usize);
    mknod(path: *const c_char, mode: mode_t, dev: dev_t);
    mkdir(path: *const c_char, mode: mode_t);
    unlink(path: *const c_char);
    rmdir(path: *const c_char);
    symlink(target: *const c_char, link: *const c_char);
    rename(old: *const c_char, new: *const c_char);
    link(target: *const c_char, link: *const c_char);
    chmod(path: *const c_char, mode: mode_t);
    chown(path: *const c_char, uid: uid_t, gid: gid_t);
    truncate(path: *const c_char, length: fuse_off_t);
    ftruncate(path: *const c_char, length: fuse_off_t, fi: *mut fuse_file_info);
    open(path: *const c_char, fi: *mut fuse_file_info);
    read(path: *const c_char, buf: *mut c_char, size: usize, offset: fuse_off_t, fi: *mut fuse_file_info);
    write(path: *const c_char, buf: *const c_char, size: usize, offset: fuse_off_t, fi: *mut fuse_file_info);
    statfs(path: *const c_char, st: *mut statvfs);
    flush(path: *const c_char, fi: *mut fuse_file_info);
    release(path: *const c_char, fi: *mut fuse_file_info);
    fsync(path: *const c_char, datasync: c_int, fi: *mut fuse_file_info);
    listxattr(path: *const c_char, list: *mut c_char, size: usize);
    removexattr(path: *const c_char, name: *const c_char);
    opendir(path: *const c_char, fi: *mut fuse_file_info);
    readdir(path: *const c_char, buf: *mut c_void, filler: fuse_fill_dir_t, offset: fuse_off_t, fi: *mut fuse_file_info);
    releasedir(path: *const c_char, fi: *mut fuse_file_info);
    fsyncdir(path: *const c_char, datasync: c_int, fi: *mut fuse_file_info);
    access(path: *const c_char, mask: c_int);
    create(path: *const c_char, mode: mode_t, fi: *mut fuse_file_info);
    lock(path: *const c_char, fi: *mut fuse_file_info, cmd: c_int, lock: *mut libc::flock);
    utimens(path: *const c_char, times: *const timespec);
    bmap(path: *const c_char, blocksize: usize, idx: *mut u64);
    ioctl(path: *const c_char, cmd: c_int, arg: *mut c_void, fi: *mut fuse_file_info, flags: c_uint, data: *mut c_void);
    poll(path: *const c_char, fi: *mut fuse_file_info, ph: *mut fuse_pollhandle, reventsp: *mut c_uint);
}

#[cfg(not(target_os = "macos"))]
unsafe extern "C" fn setxattr<T: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    options: c_int,
) -> c_int {
    match dispatcher::<T>() {
        Some(d) => d.setxattr(path, name, value, size, options, 0),
        None => -libc::EIO,
    }
}

#[cfg(target_os = "macos")]
unsafe extern "C" fn setxattr<T: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    options: c_int,
    position: u32,
) -> c_int {
    match dispatcher::<T>() {
        Some(d) => d.setxattr(path, name, value, size, options, position),
        None => -libc::EIO,
    }
}

#[cfg(not(target_os = "macos"))]
unsafe extern "C" fn getxattr<T: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
) -> c_int {
    match dispatcher::<T>() {
        Some(d) => d.getxattr(path, name, value, size, 0),
        None => -libc::EIO,
    }
}

#[cfg(target_os = "macos")]
unsafe extern "C" fn getxattr<T: Operations>(
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
    position: u32,
) -> c_int {
    match dispatcher::<T>() {
        Some(d) => d.getxattr(path, name, value, size, position),
        None => -libc::EIO,
    }
}

// libfuse stores init's return value as the new private_data, so it has to
// hand back the pointer it was given
unsafe extern "C" fn init<T: Operations>(_conn: *mut fuse_conn_info) -> *mut c_void {
    let lib = match LibFuse::loaded() {
        Some(lib) => lib,
        None => return ptr::null_mut(),
    };
    let ctx = (lib.fuse_get_context)();
    if ctx.is_null() {
        return ptr::null_mut();
    }
    let data = (*ctx).private_data;
    if let Some(d) = (data as *const Dispatcher<T>).as_ref() {
        d.init();
    }
    data
}

unsafe extern "C" fn destroy<T: Operations>(data: *mut c_void) {
    if let Some(d) = (data as *const Dispatcher<T>).as_ref() {
        d.destroy();
    }
}

macro_rules! slots {
    ($table:ident, $set:ident, $($flag:ident => $($slot:ident),+;)*) => {
        $(
            if $set.contains(OpSet::$flag) {
                $($table.$slot = Some($slot::<T>);)+
            }
        )*
    };
}

/// The native operation table for `T`, with only the slots in `set` filled.
/// An empty slot is reported to the kernel as `ENOSYS` by libfuse itself.
/// `endian` places the flag bits the way the host compiler lays out bitfields.
pub fn operations_table<T: Operations>(
    set: OpSet,
    nullpath_ok: bool,
    endian: Endian,
) -> fuse_operations {
    let mut table = fuse_operations::default();
    slots!(table, set,
        GETATTR => getattr, fgetattr;
        READLINK => readlink;
        MKNOD => mknod;
        MKDIR => mkdir;
        UNLINK => unlink;
        RMDIR => rmdir;
        SYMLINK => symlink;
        RENAME => rename;
        LINK => link;
        CHMOD => chmod;
        CHOWN => chown;
        TRUNCATE => truncate, ftruncate;
        OPEN => open;
        READ => read;
        WRITE => write;
        STATFS => statfs;
        FLUSH => flush;
        RELEASE => release;
        FSYNC => fsync;
        SETXATTR => setxattr;
        GETXATTR => getxattr;
        LISTXATTR => listxattr;
        REMOVEXATTR => removexattr;
        OPENDIR => opendir;
        READDIR => readdir;
        RELEASEDIR => releasedir;
        FSYNCDIR => fsyncdir;
        INIT => init;
        DESTROY => destroy;
        ACCESS => access;
        CREATE => create;
        LOCK => lock;
        UTIMENS => utimens;
        BMAP => bmap;
        IOCTL => ioctl;
        POLL => poll;
    );
    if nullpath_ok {
        table.flags |= endian.bitfield_mask(FLAG_NULLPATH_OK);
    }
    table
}
