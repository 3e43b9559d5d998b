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

//! A reply sink that records instead of talking to libfuse

use libc::c_int;
use parking_lot::Mutex;
use refuse::session::Context;
use refuse::lowlevel::ReplySink;
use refuse_sys::fuse_req_t;
use std::convert::TryInto;
use std::ffi::CStr;
use std::sync::Arc;

/// The uid every recorded request claims to come from
pub const CALLER_UID: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Err(c_int),
    None,
    Entry(Vec<u8>),
    Create(Vec<u8>, Vec<u8>),
    Attr(Vec<u8>, f64),
    Readlink(Vec<u8>),
    Open(Vec<u8>),
    Write(usize),
    Buf(Vec<u8>),
    Statfs(Vec<u8>),
    Xattr(usize),
}

/// A fake dirent: offset, name length, then the name, padded to 8 bytes
pub fn dirent_size(name: &str) -> usize {
    (16 + name.len() + 7) & !7
}

/// Decodes a buffer of fake dirents into `(name, next offset)` pairs
pub fn parse_dirents(mut buf: &[u8]) -> Vec<(String, i64)> {
    let mut out = vec![];
    while !buf.is_empty() {
        let off = i64::from_le_bytes(buf[..8].try_into().unwrap());
        let len = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
        let name = String::from_utf8(buf[16..16 + len].to_vec()).unwrap();
        buf = &buf[dirent_size(&name)..];
        out.push((name, off));
    }
    out
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    replies: Arc<Mutex<Vec<(usize, Reply)>>>,
}

impl RecordingSink {
    /// Every reply so far, with the request it answered
    pub fn replies(&self) -> Vec<(usize, Reply)> {
        self.replies.lock().clone()
    }

    /// The one and only reply to `req`
    pub fn reply_to(&self, req: fuse_req_t) -> Reply {
        let matching: Vec<Reply> = self
            .replies()
            .into_iter()
            .filter(|(id, _)| *id == req as usize)
            .map(|(_, reply)| reply)
            .collect();
        assert_eq!(matching.len(), 1, "expected one reply, got {:?}", matching);
        matching.into_iter().next().unwrap()
    }

    fn push(&self, req: fuse_req_t, reply: Reply) -> c_int {
        self.replies.lock().push((req as usize, reply));
        0
    }
}

impl ReplySink for RecordingSink {
    fn err(&self, req: fuse_req_t, errno: c_int) -> c_int {
        self.push(req, Reply::Err(errno))
    }

    fn none(&self, req: fuse_req_t) {
        self.push(req, Reply::None);
    }

    fn entry(&self, req: fuse_req_t, entry: &[u8]) -> c_int {
        self.push(req, Reply::Entry(entry.to_vec()))
    }

    fn create(&self, req: fuse_req_t, entry: &[u8], fi: &[u8]) -> c_int {
        self.push(req, Reply::Create(entry.to_vec(), fi.to_vec()))
    }

    fn attr(&self, req: fuse_req_t, attr: &[u8], timeout: f64) -> c_int {
        self.push(req, Reply::Attr(attr.to_vec(), timeout))
    }

    fn readlink(&self, req: fuse_req_t, link: &CStr) -> c_int {
        self.push(req, Reply::Readlink(link.to_bytes().to_vec()))
    }

    fn open(&self, req: fuse_req_t, fi: &[u8]) -> c_int {
        self.push(req, Reply::Open(fi.to_vec()))
    }

    fn write(&self, req: fuse_req_t, count: usize) -> c_int {
        self.push(req, Reply::Write(count))
    }

    fn buf(&self, req: fuse_req_t, data: &[u8]) -> c_int {
        self.push(req, Reply::Buf(data.to_vec()))
    }

    fn statfs(&self, req: fuse_req_t, st: &[u8]) -> c_int {
        self.push(req, Reply::Statfs(st.to_vec()))
    }

    fn xattr(&self, req: fuse_req_t, size: usize) -> c_int {
        self.push(req, Reply::Xattr(size))
    }

    fn add_direntry(
        &self,
        _req: fuse_req_t,
        buf: &mut [u8],
        name: &CStr,
        _st: &[u8],
        off: i64,
    ) -> usize {
        let name = name.to_bytes();
        let size = (16 + name.len() + 7) & !7;
        if buf.len() >= size {
            buf[..8].copy_from_slice(&off.to_le_bytes());
            buf[8..16].copy_from_slice(&(name.len() as u64).to_le_bytes());
            buf[16..16 + name.len()].copy_from_slice(name);
        }
        size
    }

    fn context(&self, _req: fuse_req_t) -> Option<Context> {
        Some(Context {
            uid: CALLER_UID,
            gid: CALLER_UID,
            pid: 42,
            umask: 0o022,
        })
    }
}
