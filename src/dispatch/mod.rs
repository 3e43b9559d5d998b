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

//! Routes high-level libfuse callbacks to an [`Operations`] handler.
//!
//! Every method here takes the native arguments of its callback, decodes
//! them, calls the handler under [`guard`], and encodes the result back into
//! libfuse's buffers and status codes.  The `extern "C"` side lives in
//! [`table`].

pub mod guard;
pub mod table;

use crate::attr::AttrMap;
use crate::codec::Encoding;
use crate::conf::FuseOptions;
use crate::err::{FuseError, FuseResult};
use crate::log::FUSEOP_TAG;
use crate::marshal::{self, FileInfo};
use crate::ops::{Fh, Operations};
use crate::poll::PollHandle;
use guard::{guard, guard_fatal, Supervisor};
use libc::{c_char, c_int, c_uint, c_void, dev_t, gid_t, mode_t, uid_t};
use log::{debug, info, warn};
use nix::errno::Errno;
use refuse_sys::{
    fuse_file_info, fuse_fill_dir_t, fuse_off_t, fuse_pollhandle, stat, statvfs, timespec, Abi,
    LibFuse,
};
use std::ffi::CString;
use std::ptr;

#[cfg(not(target_os = "macos"))]
const IOCTL_SIZE_MASK: u32 = 0x3fff;
#[cfg(target_os = "macos")]
const IOCTL_SIZE_MASK: u32 = 0x1fff;

/// The size of the data argument encoded in an ioctl command number
pub fn ioctl_data_size(cmd: u32) -> usize {
    ((cmd >> 16) & IOCTL_SIZE_MASK) as usize
}

unsafe fn bytes<'a>(ptr: *const c_char, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

unsafe fn bytes_mut<'a>(ptr: *mut c_char, len: usize) -> &'a mut [u8] {
    if ptr.is_null() || len == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(ptr as *mut u8, len)
    }
}

fn status(n: usize) -> FuseResult<c_int> {
    if n > c_int::max_value() as usize {
        return Err(FuseError::uncoded(format!("{} doesn't fit a status", n)));
    }
    Ok(n as c_int)
}

pub struct Dispatcher<T: Operations> {
    ops: T,
    abi: Abi,
    encoding: Encoding,
    raw_fi: bool,
    use_ns: bool,
    supervisor: Supervisor,
}

impl<T: Operations> Dispatcher<T> {
    pub fn new(ops: T, abi: Abi, options: &FuseOptions, supervisor: Supervisor) -> Self {
        Self {
            ops,
            abi,
            encoding: options.encoding,
            raw_fi: options.raw_fi,
            use_ns: options.use_ns,
            supervisor,
        }
    }

    pub fn ops(&self) -> &T {
        &self.ops
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    unsafe fn path(&self, ptr: *const c_char) -> FuseResult<String> {
        Ok(self.encoding.decode_ptr(ptr)?.unwrap_or_default())
    }

    unsafe fn name(&self, ptr: *const c_char) -> FuseResult<String> {
        match self.encoding.decode_ptr(ptr)? {
            Some(name) => Ok(name),
            None => Err(Errno::EINVAL.into()),
        }
    }

    unsafe fn info_buf<'a>(&self, fi: *mut fuse_file_info) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(fi as *mut u8, self.abi.file_info.layout.size)
    }

    /// Hands `f` the file handle in whichever form the mount asked for.  In
    /// raw mode the handler sees the whole `fuse_file_info`, and whatever it
    /// changes is stored back.
    unsafe fn with_fh<R, F>(&self, fi: *mut fuse_file_info, f: F) -> R
    where
        F: FnOnce(Fh<'_>) -> R,
    {
        if fi.is_null() {
            return f(Fh::Absent);
        }
        let layout = &self.abi.file_info;
        let buf = self.info_buf(fi);
        let mut info = FileInfo::read(layout, buf);
        if self.raw_fi {
            let res = f(Fh::Info(&mut info));
            info.write_back(layout, buf, true);
            res
        } else {
            f(Fh::Handle(info.fh))
        }
    }

    /// open, opendir and create: the handler returns the handle, which goes
    /// back into `fi`
    unsafe fn with_new_handle<F>(&self, fi: *mut fuse_file_info, f: F) -> FuseResult<c_int>
    where
        F: FnOnce(&mut FileInfo) -> FuseResult<u64>,
    {
        let layout = &self.abi.file_info;
        if fi.is_null() {
            f(&mut FileInfo::default())?;
            return Ok(0);
        }
        let buf = self.info_buf(fi);
        let mut info = FileInfo::read(layout, buf);
        info.fh = f(&mut info)?;
        info.write_back(layout, buf, self.raw_fi);
        Ok(0)
    }

    fn attrs_into_stat(&self, attrs: &AttrMap, st: *mut stat) -> FuseResult<()> {
        if st.is_null() {
            return Err(Errno::EINVAL.into());
        }
        let buf = unsafe { std::slice::from_raw_parts_mut(st as *mut u8, self.abi.stat.size) };
        marshal::map_to_stat(&self.abi, attrs, buf, self.use_ns);
        Ok(())
    }

    pub unsafe fn getattr(&self, path: *const c_char, st: *mut stat) -> c_int {
        self.fgetattr(path, st, ptr::null_mut())
    }

    pub unsafe fn fgetattr(
        &self,
        path: *const c_char,
        st: *mut stat,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("getattr", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "getattr {:?}", path);
            let attrs = self.with_fh(fi, |fh| self.ops.getattr(&path, fh))?;
            debug!(target: FUSEOP_TAG, "stat for {:?} is {:?}", path, attrs);
            self.attrs_into_stat(&attrs, st)?;
            Ok(0)
        })
    }

    pub unsafe fn readlink(&self, path: *const c_char, buf: *mut c_char, size: usize) -> c_int {
        guard("readlink", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "readlink {:?}", path);
            let target = self.ops.readlink(&path)?;
            marshal::copy_link(&target, bytes_mut(buf, size));
            Ok(0)
        })
    }

    pub unsafe fn mknod(&self, path: *const c_char, mode: mode_t, dev: dev_t) -> c_int {
        guard("mknod", &self.supervisor, || {
            let path = self.path(path)?;
            info!(
                target: FUSEOP_TAG,
                "mknod for {:?}, mode {:o}, device {}", path, mode, dev
            );
            self.ops.mknod(&path, mode as u32, dev as u64)?;
            Ok(0)
        })
    }

    pub unsafe fn mkdir(&self, path: *const c_char, mode: mode_t) -> c_int {
        guard("mkdir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "mkdir {:?} with mode {:o}", path, mode);
            self.ops.mkdir(&path, mode as u32)?;
            Ok(0)
        })
    }

    pub unsafe fn unlink(&self, path: *const c_char) -> c_int {
        guard("unlink", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "unlink {:?}", path);
            self.ops.unlink(&path)?;
            Ok(0)
        })
    }

    pub unsafe fn rmdir(&self, path: *const c_char) -> c_int {
        guard("rmdir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "rmdir {:?}", path);
            self.ops.rmdir(&path)?;
            Ok(0)
        })
    }

    /// libfuse passes the link's contents first and the new link's path second
    pub unsafe fn symlink(&self, target: *const c_char, link: *const c_char) -> c_int {
        guard("symlink", &self.supervisor, || {
            let target = self.path(target)?;
            let link = self.path(link)?;
            info!(target: FUSEOP_TAG, "symlink {:?} to {:?}", link, target);
            self.ops.symlink(&link, &target)?;
            Ok(0)
        })
    }

    pub unsafe fn rename(&self, old: *const c_char, new: *const c_char) -> c_int {
        guard("rename", &self.supervisor, || {
            let old = self.path(old)?;
            let new = self.path(new)?;
            info!(target: FUSEOP_TAG, "rename {:?} to {:?}", old, new);
            self.ops.rename(&old, &new)?;
            Ok(0)
        })
    }

    /// As with symlink, the existing file comes first
    pub unsafe fn link(&self, target: *const c_char, link: *const c_char) -> c_int {
        guard("link", &self.supervisor, || {
            let target = self.path(target)?;
            let link = self.path(link)?;
            info!(target: FUSEOP_TAG, "link {:?} to {:?}", link, target);
            self.ops.link(&link, &target)?;
            Ok(0)
        })
    }

    pub unsafe fn chmod(&self, path: *const c_char, mode: mode_t) -> c_int {
        guard("chmod", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "chmod {:?} with mode {:o}", path, mode);
            self.ops.chmod(&path, mode as u32)?;
            Ok(0)
        })
    }

    pub unsafe fn chown(&self, path: *const c_char, uid: uid_t, gid: gid_t) -> c_int {
        guard("chown", &self.supervisor, || {
            let path = self.path(path)?;
            info!(
                target: FUSEOP_TAG,
                "chown {:?} with uid:gid {}:{}", path, uid, gid
            );
            self.ops.chown(
                &path,
                marshal::unchanged_id(uid as u32),
                marshal::unchanged_id(gid as u32),
            )?;
            Ok(0)
        })
    }

    pub unsafe fn truncate(&self, path: *const c_char, length: fuse_off_t) -> c_int {
        self.ftruncate(path, length, ptr::null_mut())
    }

    pub unsafe fn ftruncate(
        &self,
        path: *const c_char,
        length: fuse_off_t,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("truncate", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "truncate {:?} to {}", path, length);
            self.with_fh(fi, |fh| self.ops.truncate(&path, length, fh))?;
            Ok(0)
        })
    }

    pub unsafe fn open(&self, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
        guard("open", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "open {:?}", path);
            self.with_new_handle(fi, |info| self.ops.open(&path, info))
        })
    }

    pub unsafe fn read(
        &self,
        path: *const c_char,
        buf: *mut c_char,
        size: usize,
        offset: fuse_off_t,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("read", &self.supervisor, || {
            let path = self.path(path)?;
            info!(
                target: FUSEOP_TAG,
                "read {:?}, {} bytes at offset {}", path, size, offset
            );
            let data = self.with_fh(fi, |fh| self.ops.read(&path, size, offset, fh))?;
            if data.len() > size {
                return Err(FuseError::uncoded(format!(
                    "read returned {} bytes, more than the {} requested",
                    data.len(),
                    size
                )));
            }
            bytes_mut(buf, size)[..data.len()].copy_from_slice(&data);
            status(data.len())
        })
    }

    pub unsafe fn write(
        &self,
        path: *const c_char,
        buf: *const c_char,
        size: usize,
        offset: fuse_off_t,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("write", &self.supervisor, || {
            let path = self.path(path)?;
            info!(
                target: FUSEOP_TAG,
                "write {:?}, {} bytes at offset {}", path, size, offset
            );
            let data = bytes(buf, size);
            let written = self.with_fh(fi, |fh| self.ops.write(&path, data, offset, fh))?;
            debug!(target: FUSEOP_TAG, "wrote {} bytes", written);
            status(written)
        })
    }

    pub unsafe fn statfs(&self, path: *const c_char, st: *mut statvfs) -> c_int {
        guard("statfs", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "statfs {:?}", path);
            let attrs = self.ops.statfs(&path)?;
            if st.is_null() {
                return Err(Errno::EINVAL.into());
            }
            let buf = std::slice::from_raw_parts_mut(st as *mut u8, self.abi.statvfs.size);
            marshal::map_to_statvfs(&self.abi, &attrs, buf);
            Ok(0)
        })
    }

    pub unsafe fn flush(&self, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
        guard("flush", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "flush {:?}", path);
            self.with_fh(fi, |fh| self.ops.flush(&path, fh))?;
            Ok(0)
        })
    }

    pub unsafe fn release(&self, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
        guard("release", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "release {:?}", path);
            self.with_fh(fi, |fh| self.ops.release(&path, fh))?;
            Ok(0)
        })
    }

    pub unsafe fn fsync(&self, path: *const c_char, datasync: c_int, fi: *mut fuse_file_info) -> c_int {
        guard("fsync", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "fsync {:?}, datasync {}", path, datasync);
            self.with_fh(fi, |fh| self.ops.fsync(&path, datasync != 0, fh))?;
            Ok(0)
        })
    }

    pub unsafe fn setxattr(
        &self,
        path: *const c_char,
        name: *const c_char,
        value: *const c_char,
        size: usize,
        options: c_int,
        position: u32,
    ) -> c_int {
        guard("setxattr", &self.supervisor, || {
            let path = self.path(path)?;
            let name = self.name(name)?;
            let value = bytes(value, size);
            info!(
                target: FUSEOP_TAG,
                "setxattr for {:?}, name {}, {} bytes, position {}, options {}",
                path,
                name,
                size,
                position,
                options
            );
            self.ops.setxattr(&path, &name, value, options, position)?;
            Ok(0)
        })
    }

    pub unsafe fn getxattr(
        &self,
        path: *const c_char,
        name: *const c_char,
        value: *mut c_char,
        size: usize,
        position: u32,
    ) -> c_int {
        guard("getxattr", &self.supervisor, || {
            let path = self.path(path)?;
            let name = self.name(name)?;
            info!(
                target: FUSEOP_TAG,
                "getxattr for {:?}, name {}, bufsize {}", path, name, size
            );
            let data = self.ops.getxattr(&path, &name, position)?;
            let dst = if value.is_null() { None } else { Some(bytes_mut(value, size)) };
            status(marshal::copy_sized(&data, dst)?)
        })
    }

    pub unsafe fn listxattr(&self, path: *const c_char, list: *mut c_char, size: usize) -> c_int {
        guard("listxattr", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "listxattr {:?}, bufsize {}", path, size);
            let names = self
                .ops
                .listxattr(&path)?
                .iter()
                .map(|name| self.encoding.encode(name))
                .collect::<FuseResult<Vec<_>>>()?;
            let data = marshal::join_names(&names);
            let dst = if list.is_null() { None } else { Some(bytes_mut(list, size)) };
            status(marshal::copy_sized(&data, dst)?)
        })
    }

    pub unsafe fn removexattr(&self, path: *const c_char, name: *const c_char) -> c_int {
        guard("removexattr", &self.supervisor, || {
            let path = self.path(path)?;
            let name = self.name(name)?;
            info!(target: FUSEOP_TAG, "removexattr for {:?}, name {}", path, name);
            self.ops.removexattr(&path, &name)?;
            Ok(0)
        })
    }

    pub unsafe fn opendir(&self, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
        guard("opendir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "opendir {:?}", path);
            self.with_new_handle(fi, |info| self.ops.opendir(&path, info))
        })
    }

    /// Entries go to libfuse's filler one at a time, with a `stat` when the
    /// handler supplied attributes.  A full filler ends the listing; libfuse
    /// comes back with the last accepted entry's offset.
    pub unsafe fn readdir(
        &self,
        path: *const c_char,
        buf: *mut c_void,
        filler: fuse_fill_dir_t,
        offset: fuse_off_t,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("readdir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "readdir {:?} from offset {}", path, offset);
            let filler = filler.ok_or(Errno::EINVAL)?;
            let entries = self.with_fh(fi, |fh| self.ops.readdir(&path, offset, fh))?;

            let mut stbuf = self.abi.stat.zeroed();
            for entry in entries {
                let name = CString::new(self.encoding.encode(&entry.name)?)?;
                let st = match &entry.attrs {
                    Some(attrs) => {
                        marshal::map_to_stat(&self.abi, attrs, &mut stbuf, self.use_ns);
                        stbuf.as_ptr() as *const stat
                    }
                    None => ptr::null(),
                };
                if filler(buf, name.as_ptr(), st, entry.offset) != 0 {
                    debug!(target: FUSEOP_TAG, "readdir buffer full at {:?}", entry.name);
                    break;
                }
            }
            Ok(0)
        })
    }

    pub unsafe fn releasedir(&self, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
        guard("releasedir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "releasedir {:?}", path);
            self.with_fh(fi, |fh| self.ops.releasedir(&path, fh))?;
            Ok(0)
        })
    }

    pub unsafe fn fsyncdir(
        &self,
        path: *const c_char,
        datasync: c_int,
        fi: *mut fuse_file_info,
    ) -> c_int {
        guard("fsyncdir", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "fsyncdir on {:?}", path);
            self.with_fh(fi, |fh| self.ops.fsyncdir(&path, datasync != 0, fh))?;
            Ok(0)
        })
    }

    /// Nothing can be reported from here, so failures end the session
    pub fn init(&self) -> c_int {
        guard_fatal("init", &self.supervisor, || {
            info!(target: FUSEOP_TAG, "init");
            self.ops.init("/")?;
            Ok(0)
        })
    }

    pub fn destroy(&self) -> c_int {
        guard("destroy", &self.supervisor, || {
            info!(target: FUSEOP_TAG, "destroy");
            self.ops.destroy("/")?;
            Ok(0)
        })
    }

    pub unsafe fn access(&self, path: *const c_char, mask: c_int) -> c_int {
        guard("access", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "access {:?}, mask {:o}", path, mask);
            self.ops.access(&path, mask)?;
            Ok(0)
        })
    }

    pub unsafe fn create(&self, path: *const c_char, mode: mode_t, fi: *mut fuse_file_info) -> c_int {
        guard("create", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "create {:?} with mode {:o}", path, mode);
            self.with_new_handle(fi, |info| self.ops.create(&path, mode as u32, info))
        })
    }

    pub unsafe fn lock(
        &self,
        path: *const c_char,
        fi: *mut fuse_file_info,
        cmd: c_int,
        lock: *mut libc::flock,
    ) -> c_int {
        guard("lock", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "lock {:?}, cmd {}", path, cmd);
            let lock = lock.as_mut().ok_or(Errno::EINVAL)?;
            self.with_fh(fi, |fh| self.ops.lock(&path, fh, cmd, lock))?;
            Ok(0)
        })
    }

    /// A null `times` means "now" for both
    pub unsafe fn utimens(&self, path: *const c_char, times: *const timespec) -> c_int {
        guard("utimens", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "utimens {:?}", path);
            let times = if times.is_null() {
                None
            } else {
                let buf =
                    std::slice::from_raw_parts(times as *const u8, self.abi.timespec.size * 2);
                Some(marshal::read_timespecs(&self.abi, buf))
            };
            self.ops.utimens(&path, times)?;
            Ok(0)
        })
    }

    pub unsafe fn bmap(&self, path: *const c_char, blocksize: usize, idx: *mut u64) -> c_int {
        guard("bmap", &self.supervisor, || {
            let path = self.path(path)?;
            let idx = idx.as_mut().ok_or(Errno::EINVAL)?;
            info!(target: FUSEOP_TAG, "bmap {:?}, blocksize {}, index {}", path, blocksize, idx);
            *idx = self.ops.bmap(&path, blocksize, *idx)?;
            Ok(0)
        })
    }

    pub unsafe fn ioctl(
        &self,
        path: *const c_char,
        cmd: c_int,
        arg: *mut c_void,
        fi: *mut fuse_file_info,
        flags: c_uint,
        data: *mut c_void,
    ) -> c_int {
        guard("ioctl", &self.supervisor, || {
            let path = self.path(path)?;
            let cmd = cmd as u32;
            let size = ioctl_data_size(cmd);
            info!(
                target: FUSEOP_TAG,
                "ioctl {:?}, cmd {:#x}, {} data bytes", path, cmd, size
            );
            let data = bytes_mut(data as *mut c_char, size);
            self.with_fh(fi, |fh| {
                self.ops.ioctl(&path, cmd, arg as usize, fh, flags as u32, data)
            })
        })
    }

    pub unsafe fn poll(
        &self,
        path: *const c_char,
        fi: *mut fuse_file_info,
        ph: *mut fuse_pollhandle,
        reventsp: *mut c_uint,
    ) -> c_int {
        guard("poll", &self.supervisor, || {
            let path = self.path(path)?;
            info!(target: FUSEOP_TAG, "poll {:?}", path);
            let handle = match LibFuse::loaded() {
                Some(lib) => PollHandle::from_raw(ph, lib),
                None => {
                    if !ph.is_null() {
                        warn!(target: FUSEOP_TAG, "Dropping poll handle, no library bound");
                    }
                    None
                }
            };
            let revents = self.with_fh(fi, |fh| self.ops.poll(&path, fh, handle))?;
            if let Some(out) = reventsp.as_mut() {
                *out = revents as c_uint;
            }
            Ok(0)
        })
    }
}
