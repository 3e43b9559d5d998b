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

//! The inode-based request/reply interface.
//!
//! Unlike [`crate::ops::Operations`], handlers here don't return results.
//! Each method gets a [`Request`] and answers it with one of its `reply_*`
//! methods, possibly later and from another thread.

pub mod dispatch;
pub mod readdir;
pub mod reply;

use crate::attr::AttrMap;
use crate::err::FuseResult;
use crate::marshal::FileInfo;
use crate::ops::{DirEntry, S_IFDIR};
use bitflags::bitflags;
use nix::errno::Errno;
use refuse_sys::{
    FUSE_SET_ATTR_ATIME, FUSE_SET_ATTR_ATIME_NOW, FUSE_SET_ATTR_GID, FUSE_SET_ATTR_MODE,
    FUSE_SET_ATTR_MTIME, FUSE_SET_ATTR_MTIME_NOW, FUSE_SET_ATTR_SIZE, FUSE_SET_ATTR_UID,
};

pub use dispatch::LowLevelDispatcher;
pub use reply::{NativeSink, Replies, ReplySink, Request};

/// The root directory's inode
pub const ROOT_INO: u64 = 1;

bitflags! {
    /// Which attributes a setattr call changes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetAttr: u32 {
        const MODE = FUSE_SET_ATTR_MODE as u32;
        const UID = FUSE_SET_ATTR_UID as u32;
        const GID = FUSE_SET_ATTR_GID as u32;
        const SIZE = FUSE_SET_ATTR_SIZE as u32;
        const ATIME = FUSE_SET_ATTR_ATIME as u32;
        const MTIME = FUSE_SET_ATTR_MTIME as u32;
        const ATIME_NOW = FUSE_SET_ATTR_ATIME_NOW as u32;
        const MTIME_NOW = FUSE_SET_ATTR_MTIME_NOW as u32;
    }
}

/// A lookup result
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub ino: u64,
    pub generation: u64,
    pub attrs: AttrMap,
    pub attr_timeout: f64,
    pub entry_timeout: f64,
}

impl Entry {
    /// An entry cached for one second, like the root getattr default
    pub fn new(ino: u64, attrs: AttrMap) -> Self {
        Self {
            ino,
            generation: 0,
            attrs,
            attr_timeout: 1.0,
            entry_timeout: 1.0,
        }
    }
}

fn root_attrs() -> AttrMap {
    AttrMap::new()
        .with("st_ino", ROOT_INO)
        .with("st_mode", S_IFDIR | 0o755)
        .with("st_nlink", 2u32)
}

/// An inode-based filesystem.  As with the path-based interface, every
/// method has a default, and together they describe an empty read-only root.
pub trait LowLevelOperations: Send + Sync {
    /// Any error ends the session before the first request
    fn init(&self) -> FuseResult<()> {
        Ok(())
    }

    fn destroy(&self) {}

    fn lookup(&self, req: Request<'_>, _parent: u64, _name: &str) {
        req.reply_err(Errno::ENOENT)
    }

    fn forget(&self, req: Request<'_>, _ino: u64, _nlookup: u64) {
        req.reply_none()
    }

    fn getattr(&self, req: Request<'_>, ino: u64, _fi: Option<&FileInfo>) {
        if ino == ROOT_INO {
            req.reply_attr(&root_attrs(), 1.0)
        } else {
            req.reply_err(Errno::ENOENT)
        }
    }

    /// `attrs` is the whole incoming stat; `to_set` says which of it counts
    fn setattr(
        &self,
        req: Request<'_>,
        _ino: u64,
        _attrs: AttrMap,
        _to_set: SetAttr,
        _fi: Option<&FileInfo>,
    ) {
        req.reply_err(Errno::EROFS)
    }

    fn readlink(&self, req: Request<'_>, _ino: u64) {
        req.reply_err(Errno::ENOENT)
    }

    fn mknod(&self, req: Request<'_>, _parent: u64, _name: &str, _mode: u32, _rdev: u64) {
        req.reply_err(Errno::EROFS)
    }

    fn mkdir(&self, req: Request<'_>, _parent: u64, _name: &str, _mode: u32) {
        req.reply_err(Errno::EROFS)
    }

    fn unlink(&self, req: Request<'_>, _parent: u64, _name: &str) {
        req.reply_err(Errno::EROFS)
    }

    fn rmdir(&self, req: Request<'_>, _parent: u64, _name: &str) {
        req.reply_err(Errno::EROFS)
    }

    /// Creates `name` in `parent`, pointing at `target`
    fn symlink(&self, req: Request<'_>, _target: &str, _parent: u64, _name: &str) {
        req.reply_err(Errno::EROFS)
    }

    fn rename(
        &self,
        req: Request<'_>,
        _parent: u64,
        _name: &str,
        _newparent: u64,
        _newname: &str,
    ) {
        req.reply_err(Errno::EROFS)
    }

    fn link(&self, req: Request<'_>, _ino: u64, _newparent: u64, _newname: &str) {
        req.reply_err(Errno::EROFS)
    }

    fn open(&self, req: Request<'_>, _ino: u64, info: FileInfo) {
        req.reply_open(&info)
    }

    fn read(&self, req: Request<'_>, _ino: u64, _size: usize, _off: i64, _info: FileInfo) {
        req.reply_err(Errno::EIO)
    }

    fn write(&self, req: Request<'_>, _ino: u64, _data: &[u8], _off: i64, _info: FileInfo) {
        req.reply_err(Errno::EROFS)
    }

    fn flush(&self, req: Request<'_>, _ino: u64, _info: FileInfo) {
        req.reply_err(Errno::ENOSYS)
    }

    fn release(&self, req: Request<'_>, _ino: u64, _info: FileInfo) {
        req.reply_ok()
    }

    fn fsync(&self, req: Request<'_>, _ino: u64, _datasync: bool, _info: FileInfo) {
        req.reply_err(Errno::ENOSYS)
    }

    fn opendir(&self, req: Request<'_>, _ino: u64, info: FileInfo) {
        req.reply_open(&info)
    }

    fn readdir(&self, req: Request<'_>, ino: u64, size: usize, off: i64, _info: FileInfo) {
        if ino != ROOT_INO {
            return req.reply_err(Errno::ENOENT);
        }
        let entries = vec![
            DirEntry::with_attrs(".", root_attrs(), 0),
            DirEntry::with_attrs("..", root_attrs(), 0),
        ];
        req.reply_readdir(size, off, &entries)
    }

    fn releasedir(&self, req: Request<'_>, _ino: u64, _info: FileInfo) {
        req.reply_ok()
    }

    fn fsyncdir(&self, req: Request<'_>, _ino: u64, _datasync: bool, _info: FileInfo) {
        req.reply_err(Errno::ENOSYS)
    }

    fn statfs(&self, req: Request<'_>, _ino: u64) {
        req.reply_statfs(&AttrMap::new())
    }

    fn setxattr(
        &self,
        req: Request<'_>,
        _ino: u64,
        _name: &str,
        _value: &[u8],
        _flags: i32,
        _position: u32,
    ) {
        req.reply_err(Errno::ENOSYS)
    }

    /// `size` is the caller's buffer size; see [`Request::reply_xattr`]
    fn getxattr(&self, req: Request<'_>, _ino: u64, _name: &str, _size: usize, _position: u32) {
        req.reply_err(Errno::ENOSYS)
    }

    fn listxattr(&self, req: Request<'_>, _ino: u64, _size: usize) {
        req.reply_err(Errno::ENOSYS)
    }

    fn removexattr(&self, req: Request<'_>, _ino: u64, _name: &str) {
        req.reply_err(Errno::ENOSYS)
    }

    fn access(&self, req: Request<'_>, _ino: u64, _mask: i32) {
        req.reply_err(Errno::ENOSYS)
    }

    fn create(&self, req: Request<'_>, _parent: u64, _name: &str, _mode: u32, _info: FileInfo) {
        req.reply_err(Errno::ENOSYS)
    }
}
