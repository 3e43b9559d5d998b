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

//! Answering low-level requests.

use super::readdir;
use super::Entry;
use crate::attr::AttrMap;
use crate::codec::Encoding;
use crate::dispatch::guard::Supervisor;
use crate::err::{FuseError, FuseResult};
use crate::log::FUSEOP_TAG;
use crate::marshal::{self, FileInfo};
use crate::ops::DirEntry;
use crate::session::Context;
use libc::c_int;
use log::{debug, error, warn};
use nix::errno::Errno;
use refuse_sys::{fuse_entry_param, fuse_file_info, fuse_req_t, stat, statvfs, Abi, LibFuse};
use std::ffi::{CStr, CString};
use std::ptr;

/// Where replies go.  Structures arrive already laid out for the platform.
pub trait ReplySink: Send + Sync {
    fn err(&self, req: fuse_req_t, errno: c_int) -> c_int;
    fn none(&self, req: fuse_req_t);
    fn entry(&self, req: fuse_req_t, entry: &[u8]) -> c_int;
    fn create(&self, req: fuse_req_t, entry: &[u8], fi: &[u8]) -> c_int;
    fn attr(&self, req: fuse_req_t, attr: &[u8], timeout: f64) -> c_int;
    fn readlink(&self, req: fuse_req_t, link: &CStr) -> c_int;
    fn open(&self, req: fuse_req_t, fi: &[u8]) -> c_int;
    fn write(&self, req: fuse_req_t, count: usize) -> c_int;
    fn buf(&self, req: fuse_req_t, data: &[u8]) -> c_int;
    fn statfs(&self, req: fuse_req_t, st: &[u8]) -> c_int;
    fn xattr(&self, req: fuse_req_t, size: usize) -> c_int;

    /// Serializes one dirent into `buf` and returns its size.  An empty `buf`
    /// only measures.
    fn add_direntry(&self, req: fuse_req_t, buf: &mut [u8], name: &CStr, st: &[u8], off: i64)
        -> usize;

    fn context(&self, req: fuse_req_t) -> Option<Context>;
}

/// Replies through libfuse
pub struct NativeSink {
    lib: &'static LibFuse,
}

impl NativeSink {
    pub fn new(lib: &'static LibFuse) -> Self {
        Self { lib }
    }
}

impl ReplySink for NativeSink {
    fn err(&self, req: fuse_req_t, errno: c_int) -> c_int {
        unsafe { (self.lib.fuse_reply_err)(req, errno) }
    }

    fn none(&self, req: fuse_req_t) {
        unsafe { (self.lib.fuse_reply_none)(req) }
    }

    fn entry(&self, req: fuse_req_t, entry: &[u8]) -> c_int {
        unsafe { (self.lib.fuse_reply_entry)(req, entry.as_ptr() as *const fuse_entry_param) }
    }

    fn create(&self, req: fuse_req_t, entry: &[u8], fi: &[u8]) -> c_int {
        unsafe {
            (self.lib.fuse_reply_create)(
                req,
                entry.as_ptr() as *const fuse_entry_param,
                fi.as_ptr() as *const fuse_file_info,
            )
        }
    }

    fn attr(&self, req: fuse_req_t, attr: &[u8], timeout: f64) -> c_int {
        unsafe { (self.lib.fuse_reply_attr)(req, attr.as_ptr() as *const stat, timeout) }
    }

    fn readlink(&self, req: fuse_req_t, link: &CStr) -> c_int {
        unsafe { (self.lib.fuse_reply_readlink)(req, link.as_ptr()) }
    }

    fn open(&self, req: fuse_req_t, fi: &[u8]) -> c_int {
        unsafe { (self.lib.fuse_reply_open)(req, fi.as_ptr() as *const fuse_file_info) }
    }

    fn write(&self, req: fuse_req_t, count: usize) -> c_int {
        unsafe { (self.lib.fuse_reply_write)(req, count) }
    }

    fn buf(&self, req: fuse_req_t, data: &[u8]) -> c_int {
        let ptr = if data.is_empty() {
            ptr::null()
        } else {
            data.as_ptr() as *const libc::c_char
        };
        unsafe { (self.lib.fuse_reply_buf)(req, ptr, data.len()) }
    }

    fn statfs(&self, req: fuse_req_t, st: &[u8]) -> c_int {
        unsafe { (self.lib.fuse_reply_statfs)(req, st.as_ptr() as *const statvfs) }
    }

    fn xattr(&self, req: fuse_req_t, size: usize) -> c_int {
        unsafe { (self.lib.fuse_reply_xattr)(req, size) }
    }

    fn add_direntry(
        &self,
        req: fuse_req_t,
        buf: &mut [u8],
        name: &CStr,
        st: &[u8],
        off: i64,
    ) -> usize {
        let ptr = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr() as *mut libc::c_char
        };
        unsafe {
            (self.lib.fuse_add_direntry)(
                req,
                ptr,
                buf.len(),
                name.as_ptr(),
                st.as_ptr() as *const stat,
                off,
            )
        }
    }

    fn context(&self, req: fuse_req_t) -> Option<Context> {
        let ctx = unsafe { (self.lib.fuse_req_ctx)(req).as_ref()? };
        Some(Context {
            uid: ctx.uid,
            gid: ctx.gid,
            pid: ctx.pid,
            umask: ctx.umask,
        })
    }
}

/// What every request of a session shares
pub struct Replies {
    sink: Box<dyn ReplySink>,
    abi: Abi,
    encoding: Encoding,
    use_ns: bool,
    supervisor: Supervisor,
}

impl Replies {
    pub fn new(
        sink: Box<dyn ReplySink>,
        abi: Abi,
        encoding: Encoding,
        use_ns: bool,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            sink,
            abi,
            encoding,
            use_ns,
            supervisor,
        }
    }

    pub fn request(&self, req: fuse_req_t, op: &'static str) -> Request<'_> {
        Request {
            req,
            op,
            replies: self,
            replied: false,
        }
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn use_ns(&self) -> bool {
        self.use_ns
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }
}

/// One kernel request, answered by exactly one `reply_*`.  Every reply
/// consumes the request; a request dropped without a reply is answered
/// with `EIO` (or `EINVAL`, when dropped by a panicking handler).
pub struct Request<'a> {
    req: fuse_req_t,
    op: &'static str,
    replies: &'a Replies,
    replied: bool,
}

// libfuse lets any thread reply to a request
unsafe impl Send for Request<'_> {}

impl<'a> Request<'a> {
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// The uid, gid, pid and umask of the calling process
    pub fn context(&self) -> Option<Context> {
        self.replies.sink.context(self.req)
    }

    pub fn abi(&self) -> &Abi {
        &self.replies.abi
    }

    /// Replies with the error in `res`, or hands the request on with the value
    pub fn with<V, F>(self, res: FuseResult<V>, f: F)
    where
        F: FnOnce(Self, V),
    {
        match res {
            Ok(v) => f(self, v),
            Err(e) => self.reply_error(e),
        }
    }

    fn finish<F>(mut self, f: F)
    where
        F: FnOnce(&dyn ReplySink, fuse_req_t) -> c_int,
    {
        self.replied = true;
        let rc = f(self.replies.sink.as_ref(), self.req);
        if rc < 0 {
            warn!(
                target: FUSEOP_TAG,
                "{} reply failed: {}",
                self.op,
                Errno::from_raw(-rc)
            );
        }
    }

    /// A positive errno, or 0 for plain success
    pub fn reply_err(self, errno: Errno) {
        debug!(target: FUSEOP_TAG, "{} replying {}", self.op, errno);
        self.finish(|sink, req| sink.err(req, errno as c_int))
    }

    pub fn reply_ok(self) {
        self.finish(|sink, req| sink.err(req, 0))
    }

    /// Replies with the errno of `e`, going through the same translation as
    /// high-level status codes.  A fatal error ends the session.
    pub fn reply_error(self, e: FuseError) {
        let status = self.replies.supervisor.status_of(self.op, e);
        self.finish(|sink, req| sink.err(req, -status))
    }

    /// For forget, which has no reply
    pub fn reply_none(mut self) {
        self.replied = true;
        self.replies.sink.none(self.req)
    }

    pub fn reply_entry(self, entry: &Entry) {
        let buf = self.entry_param(entry);
        self.finish(|sink, req| sink.entry(req, &buf))
    }

    pub fn reply_create(self, entry: &Entry, info: &FileInfo) {
        let buf = self.entry_param(entry);
        let fi = self.file_info(info);
        self.finish(|sink, req| sink.create(req, &buf, &fi))
    }

    pub fn reply_attr(self, attrs: &AttrMap, timeout: f64) {
        let abi = &self.replies.abi;
        let mut buf = abi.stat.zeroed();
        marshal::map_to_stat(abi, attrs, &mut buf, self.replies.use_ns);
        self.finish(|sink, req| sink.attr(req, &buf, timeout))
    }

    pub fn reply_readlink(self, target: &[u8]) {
        match CString::new(target) {
            Ok(link) => self.finish(|sink, req| sink.readlink(req, &link)),
            Err(e) => self.reply_error(e.into()),
        }
    }

    pub fn reply_open(self, info: &FileInfo) {
        let fi = self.file_info(info);
        self.finish(|sink, req| sink.open(req, &fi))
    }

    pub fn reply_write(self, count: usize) {
        self.finish(|sink, req| sink.write(req, count))
    }

    pub fn reply_buf(self, data: &[u8]) {
        self.finish(|sink, req| sink.buf(req, data))
    }

    pub fn reply_statfs(self, attrs: &AttrMap) {
        let abi = &self.replies.abi;
        let mut buf = abi.statvfs.zeroed();
        marshal::map_to_statvfs(abi, attrs, &mut buf);
        self.finish(|sink, req| sink.statfs(req, &buf))
    }

    /// The bare size reply of an xattr size query
    pub fn reply_xattr_size(self, size: usize) {
        self.finish(|sink, req| sink.xattr(req, size))
    }

    /// A getxattr answer for a caller with a `size` byte buffer: the needed
    /// size when `size` is 0, `ERANGE` when the value doesn't fit, else the
    /// value itself.
    pub fn reply_xattr(self, size: usize, value: &[u8]) {
        if size == 0 {
            self.reply_xattr_size(value.len())
        } else if value.len() > size {
            self.reply_err(Errno::ERANGE)
        } else {
            self.reply_buf(value)
        }
    }

    /// As [`Request::reply_xattr`], for the NUL separated name list
    pub fn reply_listxattr<S: AsRef<str>>(self, size: usize, names: &[S]) {
        let encoding = self.replies.encoding;
        let encoded: FuseResult<Vec<Vec<u8>>> =
            names.iter().map(|n| encoding.encode(n.as_ref())).collect();
        match encoded {
            Ok(encoded) => {
                let data = marshal::join_names(&encoded);
                self.reply_xattr(size, &data)
            }
            Err(e) => self.reply_error(e),
        }
    }

    /// Sends the slice of `entries` that belongs at `off` in a `size` byte
    /// buffer.  The kernel keeps asking with later offsets until it gets an
    /// empty reply.  Entries without attributes are sent with a zeroed stat.
    pub fn reply_readdir(self, size: usize, off: i64, entries: &[DirEntry]) {
        match self.dirents(size, off, entries) {
            Ok(buf) => self.reply_buf(&buf),
            Err(e) => self.reply_error(e),
        }
    }

    fn dirents(&self, size: usize, off: i64, entries: &[DirEntry]) -> FuseResult<Vec<u8>> {
        let abi = &self.replies.abi;
        let sink = self.replies.sink.as_ref();

        let mut prepared = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = CString::new(self.replies.encoding.encode(&entry.name)?)?;
            let mut st = abi.stat.zeroed();
            if let Some(attrs) = &entry.attrs {
                marshal::map_to_stat(abi, attrs, &mut st, self.replies.use_ns);
            }
            let entry_size = sink.add_direntry(self.req, &mut [], &name, &st, 0);
            prepared.push((name, st, entry_size));
        }

        let sizes: Vec<usize> = prepared.iter().map(|(_, _, s)| *s).collect();
        let off = if off < 0 { 0 } else { off as usize };
        let range = readdir::window(&sizes, off, size);
        let which = readdir::entries_in(&sizes, &range);

        let mut buf = vec![0; range.len()];
        let mut pos = 0;
        for (name, st, entry_size) in &prepared[which] {
            let next = pos + entry_size;
            let end_offset = (range.start + next) as i64;
            sink.add_direntry(self.req, &mut buf[pos..next], name, st, end_offset);
            pos = next;
        }
        Ok(buf)
    }

    fn entry_param(&self, entry: &Entry) -> Vec<u8> {
        marshal::entry_param(
            &self.replies.abi,
            entry.ino,
            entry.generation,
            &entry.attrs,
            entry.attr_timeout,
            entry.entry_timeout,
            self.replies.use_ns,
        )
    }

    fn file_info(&self, info: &FileInfo) -> Vec<u8> {
        let layout = &self.replies.abi.file_info;
        let mut buf = layout.layout.zeroed();
        info.write(layout, &mut buf);
        buf
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.replied {
            return;
        }
        let errno = if std::thread::panicking() {
            libc::EINVAL
        } else {
            error!(target: FUSEOP_TAG, "{} was never replied to", self.op);
            libc::EIO
        };
        self.replied = true;
        self.replies.sink.err(self.req, errno);
    }
}
