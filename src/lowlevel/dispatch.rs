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

use super::reply::{Replies, Request};
use super::{LowLevelOperations, SetAttr};
use crate::dispatch::guard::{guard, guard_fatal, panic_message};
use crate::err::FuseResult;
use crate::log::{next_request, FUSEOP_TAG};
use crate::marshal::{self, FileInfo};
use libc::{c_char, c_int, c_ulong, c_void, dev_t, mode_t};
use log::{error, info};
use nix::errno::Errno;
use refuse_sys::{
    fuse_conn_info, fuse_file_info, fuse_ino_t, fuse_lowlevel_ops, fuse_off_t, fuse_req_t, stat,
    LibFuse,
};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Routes low-level callbacks to a [`LowLevelOperations`] handler
pub struct LowLevelDispatcher<T: LowLevelOperations> {
    ops: T,
    replies: Replies,
}

impl<T: LowLevelOperations> LowLevelDispatcher<T> {
    pub fn new(ops: T, replies: Replies) -> Self {
        Self { ops, replies }
    }

    pub fn ops(&self) -> &T {
        &self.ops
    }

    pub fn replies(&self) -> &Replies {
        &self.replies
    }

    /// Hands the request to `f`.  If `f` panics, the request it was holding
    /// is answered as it unwinds.
    fn run<F>(&self, op: &'static str, req: fuse_req_t, f: F)
    where
        F: FnOnce(Request<'_>),
    {
        next_request();
        let request = self.replies.request(req, op);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || f(request))) {
            error!(
                target: FUSEOP_TAG,
                "{} panicked: {}",
                op,
                panic_message(payload.as_ref())
            );
        }
    }

    unsafe fn name(&self, ptr: *const c_char) -> FuseResult<String> {
        match self.replies.encoding().decode_ptr(ptr)? {
            Some(name) => Ok(name),
            None => Err(Errno::EINVAL.into()),
        }
    }

    unsafe fn file_info(&self, fi: *mut fuse_file_info) -> Option<FileInfo> {
        if fi.is_null() {
            return None;
        }
        let layout = &self.replies.abi().file_info;
        let buf = std::slice::from_raw_parts(fi as *const u8, layout.layout.size);
        Some(FileInfo::read(layout, buf))
    }

    unsafe fn info(&self, fi: *mut fuse_file_info) -> FileInfo {
        self.file_info(fi).unwrap_or_default()
    }

    pub fn init(&self) -> c_int {
        guard_fatal("init", self.replies.supervisor(), || {
            info!(target: FUSEOP_TAG, "init");
            self.ops.init()?;
            Ok(0)
        })
    }

    pub fn destroy(&self) -> c_int {
        guard("destroy", self.replies.supervisor(), || {
            info!(target: FUSEOP_TAG, "destroy");
            self.ops.destroy();
            Ok(0)
        })
    }

    pub unsafe fn lookup(&self, req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
        self.run("lookup", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "lookup {:?} in {}", name, parent);
                self.ops.lookup(r, parent as u64, &name)
            })
        })
    }

    pub unsafe fn forget(&self, req: fuse_req_t, ino: fuse_ino_t, nlookup: c_ulong) {
        self.run("forget", req, |r| {
            info!(target: FUSEOP_TAG, "forget {} by {}", ino, nlookup);
            self.ops.forget(r, ino as u64, nlookup as u64)
        })
    }

    pub unsafe fn getattr(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("getattr", req, |r| {
            info!(target: FUSEOP_TAG, "getattr {}", ino);
            let info = self.file_info(fi);
            self.ops.getattr(r, ino as u64, info.as_ref())
        })
    }

    pub unsafe fn setattr(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        attr: *mut stat,
        to_set: c_int,
        fi: *mut fuse_file_info,
    ) {
        self.run("setattr", req, |r| {
            let to_set = SetAttr::from_bits_truncate(to_set as u32);
            info!(target: FUSEOP_TAG, "setattr {} {:?}", ino, to_set);
            if attr.is_null() {
                return r.reply_err(Errno::EINVAL);
            }
            let abi = self.replies.abi();
            let buf = std::slice::from_raw_parts(attr as *const u8, abi.stat.size);
            let attrs = marshal::stat_to_map(abi, buf, self.replies.use_ns());
            let info = self.file_info(fi);
            self.ops.setattr(r, ino as u64, attrs, to_set, info.as_ref())
        })
    }

    pub unsafe fn readlink(&self, req: fuse_req_t, ino: fuse_ino_t) {
        self.run("readlink", req, |r| {
            info!(target: FUSEOP_TAG, "readlink {}", ino);
            self.ops.readlink(r, ino as u64)
        })
    }

    pub unsafe fn mknod(
        &self,
        req: fuse_req_t,
        parent: fuse_ino_t,
        name: *const c_char,
        mode: mode_t,
        rdev: dev_t,
    ) {
        self.run("mknod", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "mknod {:?} in {}, mode {:o}", name, parent, mode);
                self.ops.mknod(r, parent as u64, &name, mode as u32, rdev as u64)
            })
        })
    }

    pub unsafe fn mkdir(&self, req: fuse_req_t, parent: fuse_ino_t, name: *const c_char, mode: mode_t) {
        self.run("mkdir", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "mkdir {:?} in {}, mode {:o}", name, parent, mode);
                self.ops.mkdir(r, parent as u64, &name, mode as u32)
            })
        })
    }

    pub unsafe fn unlink(&self, req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
        self.run("unlink", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "unlink {:?} in {}", name, parent);
                self.ops.unlink(r, parent as u64, &name)
            })
        })
    }

    pub unsafe fn rmdir(&self, req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
        self.run("rmdir", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "rmdir {:?} in {}", name, parent);
                self.ops.rmdir(r, parent as u64, &name)
            })
        })
    }

    pub unsafe fn symlink(
        &self,
        req: fuse_req_t,
        target: *const c_char,
        parent: fuse_ino_t,
        name: *const c_char,
    ) {
        self.run("symlink", req, |r| {
            let names = self.name(target).and_then(|t| Ok((t, self.name(name)?)));
            r.with(names, |r, (target, name)| {
                info!(target: FUSEOP_TAG, "symlink {:?} in {} to {:?}", name, parent, target);
                self.ops.symlink(r, &target, parent as u64, &name)
            })
        })
    }

    pub unsafe fn rename(
        &self,
        req: fuse_req_t,
        parent: fuse_ino_t,
        name: *const c_char,
        newparent: fuse_ino_t,
        newname: *const c_char,
    ) {
        self.run("rename", req, |r| {
            let names = self.name(name).and_then(|n| Ok((n, self.name(newname)?)));
            r.with(names, |r, (name, newname)| {
                info!(
                    target: FUSEOP_TAG,
                    "rename {:?} in {} to {:?} in {}", name, parent, newname, newparent
                );
                self.ops
                    .rename(r, parent as u64, &name, newparent as u64, &newname)
            })
        })
    }

    pub unsafe fn link(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        newparent: fuse_ino_t,
        newname: *const c_char,
    ) {
        self.run("link", req, |r| {
            r.with(self.name(newname), |r, newname| {
                info!(target: FUSEOP_TAG, "link {} as {:?} in {}", ino, newname, newparent);
                self.ops.link(r, ino as u64, newparent as u64, &newname)
            })
        })
    }

    pub unsafe fn open(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("open", req, |r| {
            info!(target: FUSEOP_TAG, "open {}", ino);
            self.ops.open(r, ino as u64, self.info(fi))
        })
    }

    pub unsafe fn read(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        size: usize,
        off: fuse_off_t,
        fi: *mut fuse_file_info,
    ) {
        self.run("read", req, |r| {
            info!(target: FUSEOP_TAG, "read {}, {} bytes at offset {}", ino, size, off);
            self.ops.read(r, ino as u64, size, off, self.info(fi))
        })
    }

    pub unsafe fn write(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        buf: *const c_char,
        size: usize,
        off: fuse_off_t,
        fi: *mut fuse_file_info,
    ) {
        self.run("write", req, |r| {
            info!(target: FUSEOP_TAG, "write {}, {} bytes at offset {}", ino, size, off);
            let data = if buf.is_null() || size == 0 {
                &[][..]
            } else {
                std::slice::from_raw_parts(buf as *const u8, size)
            };
            self.ops.write(r, ino as u64, data, off, self.info(fi))
        })
    }

    pub unsafe fn flush(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("flush", req, |r| {
            info!(target: FUSEOP_TAG, "flush {}", ino);
            self.ops.flush(r, ino as u64, self.info(fi))
        })
    }

    pub unsafe fn release(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("release", req, |r| {
            info!(target: FUSEOP_TAG, "release {}", ino);
            self.ops.release(r, ino as u64, self.info(fi))
        })
    }

    pub unsafe fn fsync(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        datasync: c_int,
        fi: *mut fuse_file_info,
    ) {
        self.run("fsync", req, |r| {
            info!(target: FUSEOP_TAG, "fsync {}, datasync {}", ino, datasync);
            self.ops.fsync(r, ino as u64, datasync != 0, self.info(fi))
        })
    }

    pub unsafe fn opendir(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("opendir", req, |r| {
            info!(target: FUSEOP_TAG, "opendir {}", ino);
            self.ops.opendir(r, ino as u64, self.info(fi))
        })
    }

    pub unsafe fn readdir(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        size: usize,
        off: fuse_off_t,
        fi: *mut fuse_file_info,
    ) {
        self.run("readdir", req, |r| {
            info!(target: FUSEOP_TAG, "readdir {}, {} bytes from offset {}", ino, size, off);
            self.ops.readdir(r, ino as u64, size, off, self.info(fi))
        })
    }

    pub unsafe fn releasedir(&self, req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
        self.run("releasedir", req, |r| {
            info!(target: FUSEOP_TAG, "releasedir {}", ino);
            self.ops.releasedir(r, ino as u64, self.info(fi))
        })
    }

    pub unsafe fn fsyncdir(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        datasync: c_int,
        fi: *mut fuse_file_info,
    ) {
        self.run("fsyncdir", req, |r| {
            info!(target: FUSEOP_TAG, "fsyncdir {}", ino);
            self.ops.fsyncdir(r, ino as u64, datasync != 0, self.info(fi))
        })
    }

    pub unsafe fn statfs(&self, req: fuse_req_t, ino: fuse_ino_t) {
        self.run("statfs", req, |r| {
            info!(target: FUSEOP_TAG, "statfs {}", ino);
            self.ops.statfs(r, ino as u64)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub unsafe fn setxattr(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        name: *const c_char,
        value: *const c_char,
        size: usize,
        flags: c_int,
        position: u32,
    ) {
        self.run("setxattr", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "setxattr {} {}, {} bytes", ino, name, size);
                let value = if value.is_null() || size == 0 {
                    &[][..]
                } else {
                    std::slice::from_raw_parts(value as *const u8, size)
                };
                self.ops.setxattr(r, ino as u64, &name, value, flags, position)
            })
        })
    }

    pub unsafe fn getxattr(
        &self,
        req: fuse_req_t,
        ino: fuse_ino_t,
        name: *const c_char,
        size: usize,
        position: u32,
    ) {
        self.run("getxattr", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "getxattr {} {}, bufsize {}", ino, name, size);
                self.ops.getxattr(r, ino as u64, &name, size, position)
            })
        })
    }

    pub unsafe fn listxattr(&self, req: fuse_req_t, ino: fuse_ino_t, size: usize) {
        self.run("listxattr", req, |r| {
            info!(target: FUSEOP_TAG, "listxattr {}, bufsize {}", ino, size);
            self.ops.listxattr(r, ino as u64, size)
        })
    }

    pub unsafe fn removexattr(&self, req: fuse_req_t, ino: fuse_ino_t, name: *const c_char) {
        self.run("removexattr", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "removexattr {} {}", ino, name);
                self.ops.removexattr(r, ino as u64, &name)
            })
        })
    }

    pub unsafe fn access(&self, req: fuse_req_t, ino: fuse_ino_t, mask: c_int) {
        self.run("access", req, |r| {
            info!(target: FUSEOP_TAG, "access {}, mask {:o}", ino, mask);
            self.ops.access(r, ino as u64, mask)
        })
    }

    pub unsafe fn create(
        &self,
        req: fuse_req_t,
        parent: fuse_ino_t,
        name: *const c_char,
        mode: mode_t,
        fi: *mut fuse_file_info,
    ) {
        self.run("create", req, |r| {
            r.with(self.name(name), |r, name| {
                info!(target: FUSEOP_TAG, "create {:?} in {}, mode {:o}", name, parent, mode);
                self.ops
                    .create(r, parent as u64, &name, mode as u32, self.info(fi))
            })
        })
    }
}

/// The dispatcher `mount_lowlevel` registered as the session's user data
unsafe fn dispatcher<'a, T: LowLevelOperations>(
    lib: &LibFuse,
    req: fuse_req_t,
) -> Option<&'a LowLevelDispatcher<T>> {
    ((lib.fuse_req_userdata)(req) as *const LowLevelDispatcher<T>).as_ref()
}

macro_rules! trampolines {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            unsafe extern "C" fn $name<T: LowLevelOperations>(req: fuse_req_t, $($arg: $ty),*) {
                let lib = match LibFuse::loaded() {
                    Some(lib) => lib,
                    None => return,
                };
                match dispatcher::<T>(lib, req) {
                    Some(d) => d.$name(req, $($arg),*),
                    None => {
                        (lib.fuse_reply_err)(req, libc::EIO);
                    }
                }
            }
        )*
    };
}

trampolines! {
    lookup(parent: fuse_ino_t, name: *const c_char);
    forget(ino: fuse_ino_t, nlookup: c_ulong);
    getattr(ino: fuse_ino_t, fi: *mut fuse_file_info);
    setattr(ino: fuse_ino_t, attr: *mut stat, to_set: c_int, fi: *mut fuse_file_info);
    readlink(ino: fuse_ino_t);
    mknod(parent: fuse_ino_t, name: *const c_char, mode: mode_t, rdev: dev_t);
    mkdir(parent: fuse_ino_t, name: *const c_char, mode: mode_t);
    unlink(parent: fuse_ino_t, name: *const c_char);
    rmdir(parent: fuse_ino_t, name: *const c_char);
    symlink(target: *const c_char, parent: fuse_ino_t, name: *const c_char);
    rename(parent: fuse_ino_t, name: *const c_char, newparent: fuse_ino_t, newname: *const c_char);
    link(ino: fuse_ino_t, newparent: fuse_ino_t, newname: *const c_char);
    open(ino: fuse_ino_t, fi: *mut fuse_file_info);
    read(ino: fuse_ino_t, size: usize, off: fuse_off_t, fi: *mut fuse_file_info);
    write(ino: fuse_ino_t, buf: *const c_char, size: usize, off: fuse_off_t, fi: *mut fuse_file_info);
    flush(ino: fuse_ino_t, fi: *mut fuse_file_info);
    release(ino: fuse_ino_t, fi: *mut fuse_file_info);
    fsync(ino: fuse_ino_t, datasync: c_int, fi: *mut fuse_file_info);
    opendir(ino: fuse_ino_t, fi: *mut fuse_file_info);
    readdir(ino: fuse_ino_t, size: usize, off: fuse_off_t, fi: *mut fuse_file_info);
    releasedir(ino: fuse_ino_t, fi: *mut fuse_file_info);
    fsyncdir(ino: fuse_ino_t, datasync: c_int, fi: *mut fuse_file_info);
    statfs(ino: fuse_ino_t);
    listxattr(ino: fuse_ino_t, size: usize);
    removexattr(ino: fuse_ino_t, name: *const c_char);
    access(ino: fuse_ino_t, mask: c_int);
    create(parent: fuse_ino_t, name: *const c_char, mode: mode_t, fi: *mut fuse_file_info);
}

#[cfg(not(target_os = "macos"))]
unsafe extern "C" fn setxattr<T: LowLevelOperations>(
    req: fuse_req_t,
    ino: fuse_ino_t,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
) {
    if let Some(lib) = LibFuse::loaded() {
        match dispatcher::<T>(lib, req) {
            Some(d) => d.setxattr(req, ino, name, value, size, flags, 0),
            None => {
                (lib.fuse_reply_err)(req, libc::EIO);
            }
        }
    }
}

#[cfg(target_os = "macos")]
unsafe extern "C" fn setxattr<T: LowLevelOperations>(
    req: fuse_req_t,
    ino: fuse_ino_t,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
    position: u32,
) {
    if let Some(lib) = LibFuse::loaded() {
        match dispatcher::<T>(lib, req) {
            Some(d) => d.setxattr(req, ino, name, value, size, flags, position),
            None => {
                (lib.fuse_reply_err)(req, libc::EIO);
            }
        }
    }
}

#[cfg(not(target_os = "macos"))]
unsafe extern "C" fn getxattr<T: LowLevelOperations>(
    req: fuse_req_t,
    ino: fuse_ino_t,
    name: *const c_char,
    size: usize,
) {
    if let Some(lib) = LibFuse::loaded() {
        match dispatcher::<T>(lib, req) {
            Some(d) => d.getxattr(req, ino, name, size, 0),
            None => {
                (lib.fuse_reply_err)(req, libc::EIO);
            }
        }
    }
}

#[cfg(target_os = "macos")]
unsafe extern "C" fn getxattr<T: LowLevelOperations>(
    req: fuse_req_t,
    ino: fuse_ino_t,
    name: *const c_char,
    size: usize,
    position: u32,
) {
    if let Some(lib) = LibFuse::loaded() {
        match dispatcher::<T>(lib, req) {
            Some(d) => d.getxattr(req, ino, name, size, position),
            None => {
                (lib.fuse_reply_err)(req, libc::EIO);
            }
        }
    }
}

unsafe extern "C" fn init<T: LowLevelOperations>(userdata: *mut c_void, _conn: *mut fuse_conn_info) {
    if let Some(d) = (userdata as *const LowLevelDispatcher<T>).as_ref() {
        d.init();
    }
}

unsafe extern "C" fn destroy<T: LowLevelOperations>(userdata: *mut c_void) {
    if let Some(d) = (userdata as *const LowLevelDispatcher<T>).as_ref() {
        d.destroy();
    }
}

/// Every low-level slot we know how to dispatch.  Handlers fall back to
/// their trait defaults rather than leaving slots empty.
pub fn lowlevel_table<T: LowLevelOperations>() -> fuse_lowlevel_ops {
    fuse_lowlevel_ops {
        init: Some(init::<T>),
        destroy: Some(destroy::<T>),
        lookup: Some(lookup::<T>),
        forget: Some(forget::<T>),
        getattr: Some(getattr::<T>),
        setattr: Some(setattr::<T>),
        readlink: Some(readlink::<T>),
        mknod: Some(mknod::<T>),
        mkdir: Some(mkdir::<T>),
        unlink: Some(unlink::<T>),
        rmdir: Some(rmdir::<T>),
        symlink: Some(symlink::<T>),
        rename: Some(rename::<T>),
        link: Some(link::<T>),
        open: Some(open::<T>),
        read: Some(read::<T>),
        write: Some(write::<T>),
        flush: Some(flush::<T>),
        release: Some(release::<T>),
        fsync: Some(fsync::<T>),
        opendir: Some(opendir::<T>),
        readdir: Some(readdir::<T>),
        releasedir: Some(releasedir::<T>),
        fsyncdir: Some(fsyncdir::<T>),
        statfs: Some(statfs::<T>),
        setxattr: Some(setxattr::<T>),
        getxattr: Some(getxattr::<T>),
        listxattr: Some(listxattr::<T>),
        removexattr: Some(removexattr::<T>),
        access: Some(access::<T>),
        create: Some(create::<T>),
        ..Default::default()
    }
}
