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

//! The path-based filesystem interface.

use crate::attr::{AttrMap, Timestamp};
use crate::err::FuseResult;
use crate::log::FUSEFS_TAG;
use crate::marshal::FileInfo;
use crate::poll::PollHandle;
use bitflags::bitflags;
use log::debug;
use nix::errno::Errno;

bitflags! {
    /// The operations a handler wants wired into the native table.  An
    /// operation left out is reported to the kernel as unimplemented and
    /// its method is never called.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpSet: u64 {
        const GETATTR = 1 << 0;
        const READLINK = 1 << 1;
        const MKNOD = 1 << 2;
        const MKDIR = 1 << 3;
        const UNLINK = 1 << 4;
        const RMDIR = 1 << 5;
        const SYMLINK = 1 << 6;
        const RENAME = 1 << 7;
        const LINK = 1 << 8;
        const CHMOD = 1 << 9;
        const CHOWN = 1 << 10;
        const TRUNCATE = 1 << 11;
        const OPEN = 1 << 12;
        const READ = 1 << 13;
        const WRITE = 1 << 14;
        const STATFS = 1 << 15;
        const FLUSH = 1 << 16;
        const RELEASE = 1 << 17;
        const FSYNC = 1 << 18;
        const SETXATTR = 1 << 19;
        const GETXATTR = 1 << 20;
        const LISTXATTR = 1 << 21;
        const REMOVEXATTR = 1 << 22;
        const OPENDIR = 1 << 23;
        const READDIR = 1 << 24;
        const RELEASEDIR = 1 << 25;
        const FSYNCDIR = 1 << 26;
        const INIT = 1 << 27;
        const DESTROY = 1 << 28;
        const ACCESS = 1 << 29;
        const CREATE = 1 << 30;
        const LOCK = 1 << 31;
        const UTIMENS = 1 << 32;
        const BMAP = 1 << 33;
        const IOCTL = 1 << 34;
        const POLL = 1 << 35;
    }
}

impl OpSet {
    /// Everything with a useful default.  lock, bmap, ioctl and poll have no
    /// sensible fallback and must be asked for.
    pub fn defaults() -> Self {
        Self::all() - (Self::LOCK | Self::BMAP | Self::IOCTL | Self::POLL)
    }
}

impl Default for OpSet {
    fn default() -> Self {
        Self::defaults()
    }
}

/// The file handle as seen by a handler.
#[derive(Debug)]
pub enum Fh<'a> {
    /// The call isn't about an open file (eg. getattr on a path)
    Absent,
    Handle(u64),
    /// The whole `fuse_file_info`, when mounted with `raw_fi`
    Info(&'a mut FileInfo),
}

impl<'a> Fh<'a> {
    pub fn handle(&self) -> Option<u64> {
        match self {
            Fh::Absent => None,
            Fh::Handle(fh) => Some(*fh),
            Fh::Info(info) => Some(info.fh),
        }
    }
}

/// One readdir result.  `attrs` and `offset` are optional; a non-zero offset
/// makes libfuse resume the next readdir call from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub attrs: Option<AttrMap>,
    pub offset: i64,
}

impl DirEntry {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attrs: None,
            offset: 0,
        }
    }

    pub fn with_attrs<S: Into<String>>(name: S, attrs: AttrMap, offset: i64) -> Self {
        Self {
            name: name.into(),
            attrs: Some(attrs),
            offset,
        }
    }
}

impl From<&str> for DirEntry {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DirEntry {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

pub const S_IFDIR: u32 = 0o040000;

/// A path-based filesystem.  Every method has a default, so an implementor
/// only writes the operations it cares about and still gets a valid,
/// if restricted, filesystem.
///
/// Methods take `&self` because libfuse calls them from many threads at once
/// unless mounted with `nothreads`.  Use interior mutability, and your own
/// locking, for any state.
///
/// Path-less calls (libfuse passing no path for an open file) see `""`.
pub trait Operations: Send + Sync {
    fn supported(&self) -> OpSet {
        OpSet::defaults()
    }

    /// Called once the mount is up.  A failure here can't be reported to
    /// the kernel, so any error ends the session and is returned by `mount`.
    fn init(&self, _path: &str) -> FuseResult<()> {
        Ok(())
    }

    fn destroy(&self, _path: &str) -> FuseResult<()> {
        Ok(())
    }

    fn getattr(&self, path: &str, _fh: Fh<'_>) -> FuseResult<AttrMap> {
        debug!(target: FUSEFS_TAG, "Calling default getattr implementation");
        if path != "/" {
            return Err(Errno::ENOENT.into());
        }
        Ok(AttrMap::new()
            .with("st_mode", S_IFDIR | 0o755)
            .with("st_nlink", 2u32))
    }

    fn readlink(&self, _path: &str) -> FuseResult<Vec<u8>> {
        Err(Errno::ENOENT.into())
    }

    fn mknod(&self, _path: &str, _mode: u32, _dev: u64) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn mkdir(&self, _path: &str, _mode: u32) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn unlink(&self, _path: &str) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn rmdir(&self, _path: &str) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    /// Creates `link` pointing at `target`, as in `ln -s target link`
    fn symlink(&self, _link: &str, _target: &str) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn rename(&self, _old: &str, _new: &str) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    /// Creates the hard link `link` to the existing `target`
    fn link(&self, _link: &str, _target: &str) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn chmod(&self, _path: &str, _mode: u32) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    /// `None` leaves that id as it is
    fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    fn truncate(&self, _path: &str, _length: i64, _fh: Fh<'_>) -> FuseResult<()> {
        Err(Errno::EROFS.into())
    }

    /// Returns the handle to associate with the open file.  In raw mode the
    /// handler may also set `direct_io`, `keep_cache` and `nonseekable`.
    fn open(&self, _path: &str, _info: &mut FileInfo) -> FuseResult<u64> {
        Ok(0)
    }

    /// Returns at most `size` bytes.  Fewer bytes is a short read.
    fn read(&self, _path: &str, _size: usize, _offset: i64, _fh: Fh<'_>) -> FuseResult<Vec<u8>> {
        Err(Errno::EIO.into())
    }

    /// Returns the number of bytes written
    fn write(&self, _path: &str, _data: &[u8], _offset: i64, _fh: Fh<'_>) -> FuseResult<usize> {
        Err(Errno::EROFS.into())
    }

    /// Keys are `statvfs` field names (`f_bsize`, `f_blocks`, ...)
    fn statfs(&self, _path: &str) -> FuseResult<AttrMap> {
        Ok(AttrMap::new())
    }

    fn flush(&self, _path: &str, _fh: Fh<'_>) -> FuseResult<()> {
        Ok(())
    }

    fn release(&self, _path: &str, _fh: Fh<'_>) -> FuseResult<()> {
        Ok(())
    }

    fn fsync(&self, _path: &str, _datasync: bool, _fh: Fh<'_>) -> FuseResult<()> {
        Ok(())
    }

    /// `position` is only ever non-zero on macOS
    fn setxattr(
        &self,
        _path: &str,
        _name: &str,
        _value: &[u8],
        _options: i32,
        _position: u32,
    ) -> FuseResult<()> {
        Err(Errno::ENOTSUP.into())
    }

    fn getxattr(&self, _path: &str, _name: &str, _position: u32) -> FuseResult<Vec<u8>> {
        Err(Errno::ENOTSUP.into())
    }

    fn listxattr(&self, _path: &str) -> FuseResult<Vec<String>> {
        Ok(vec![])
    }

    fn removexattr(&self, _path: &str, _name: &str) -> FuseResult<()> {
        Err(Errno::ENOTSUP.into())
    }

    fn opendir(&self, _path: &str, _info: &mut FileInfo) -> FuseResult<u64> {
        Ok(0)
    }

    fn readdir(&self, _path: &str, _offset: i64, _fh: Fh<'_>) -> FuseResult<Vec<DirEntry>> {
        debug!(target: FUSEFS_TAG, "Calling default readdir implementation");
        Ok(vec![".".into(), "..".into()])
    }

    fn releasedir(&self, _path: &str, _fh: Fh<'_>) -> FuseResult<()> {
        Ok(())
    }

    fn fsyncdir(&self, _path: &str, _datasync: bool, _fh: Fh<'_>) -> FuseResult<()> {
        Ok(())
    }

    fn access(&self, _path: &str, _mask: i32) -> FuseResult<()> {
        Ok(())
    }

    fn create(&self, _path: &str, _mode: u32, _info: &mut FileInfo) -> FuseResult<u64> {
        Ok(0)
    }

    fn lock(&self, _path: &str, _fh: Fh<'_>, _cmd: i32, _lock: &mut libc::flock) -> FuseResult<()> {
        Err(Errno::ENOSYS.into())
    }

    /// `None` means "set both to now"
    fn utimens(&self, _path: &str, _times: Option<(Timestamp, Timestamp)>) -> FuseResult<()> {
        Ok(())
    }

    fn bmap(&self, _path: &str, _blocksize: usize, _idx: u64) -> FuseResult<u64> {
        Err(Errno::ENOSYS.into())
    }

    /// `data` is the in/out buffer, sized from the command number.  `arg` is
    /// the caller's raw argument.
    fn ioctl(
        &self,
        _path: &str,
        _cmd: u32,
        _arg: usize,
        _fh: Fh<'_>,
        _flags: u32,
        _data: &mut [u8],
    ) -> FuseResult<i32> {
        Err(Errno::ENOTTY.into())
    }

    /// Returns the ready events.  `handle` is present when the kernel wants
    /// to be told about readiness later; keep it to notify, drop it to
    /// release it.
    fn poll(&self, _path: &str, _fh: Fh<'_>, _handle: Option<PollHandle>) -> FuseResult<u32> {
        Err(Errno::ENOSYS.into())
    }
}
