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

//! Conversions between native structures (as raw bytes described by a
//! [`StructLayout`]) and their handler-facing forms.

use crate::attr::{AttrMap, AttrValue, Timestamp};
use crate::err::FuseResult;
use crate::log::ABI_TAG;
use log::trace;
use nix::errno::Errno;
use refuse_sys::layout::{FieldKind, FileInfoLayout};
use refuse_sys::{Abi, FileInfoFlag, StructLayout};

fn time_value(ts: Timestamp, use_ns: bool) -> AttrValue {
    if use_ns {
        AttrValue::Int(ts.as_nanos())
    } else {
        AttrValue::Float(ts.as_secs_f64())
    }
}

/// Every non-reserved field of `buf` as an attribute.  Timestamps come out as
/// integer nanoseconds when `use_ns` is set, float seconds otherwise.
pub fn read_struct(layout: &StructLayout, buf: &[u8], use_ns: bool) -> AttrMap {
    let mut map = AttrMap::new();
    for field in layout.fields().iter().filter(|f| !f.is_reserved()) {
        let value = match field.kind {
            FieldKind::Signed => AttrValue::Int(layout.read_signed(buf, field)),
            FieldKind::Unsigned => AttrValue::UInt(layout.read_unsigned(buf, field)),
            FieldKind::Double => AttrValue::Float(layout.read_double(buf, field)),
            FieldKind::Timespec => {
                let (sec, nsec) = layout.read_timespec(buf, field);
                time_value(Timestamp::new(sec, nsec), use_ns)
            }
            FieldKind::Spare => continue,
        };
        map.insert(field.name, value);
    }
    map
}

/// Copies the attributes that name a field of `layout` into `buf`.  Unknown
/// keys are skipped and fields without a key keep their current bytes.
pub fn write_struct(layout: &StructLayout, buf: &mut [u8], attrs: &AttrMap, use_ns: bool) {
    for (key, value) in attrs {
        let field = match layout.field(key) {
            Some(field) if !field.is_reserved() => field,
            _ => {
                trace!(target: ABI_TAG, "Ignoring {} for {}", key, layout.name);
                continue;
            }
        };
        match field.kind {
            FieldKind::Signed | FieldKind::Unsigned => {
                layout.write_signed(buf, field, value.as_i64())
            }
            FieldKind::Double => {
                let v = match *value {
                    AttrValue::Float(f) => f,
                    other => other.as_i64() as f64,
                };
                layout.write_double(buf, field, v)
            }
            FieldKind::Timespec => {
                let ts = value.as_timestamp(use_ns);
                layout.write_timespec(buf, field, ts.sec, ts.nsec)
            }
            FieldKind::Spare => {}
        }
    }
}

pub fn stat_to_map(abi: &Abi, buf: &[u8], use_ns: bool) -> AttrMap {
    read_struct(&abi.stat, buf, use_ns)
}

/// Zeroes `buf` then fills it from `attrs`, the way a getattr reply is built
pub fn map_to_stat(abi: &Abi, attrs: &AttrMap, buf: &mut [u8], use_ns: bool) {
    for b in buf[..abi.stat.size].iter_mut() {
        *b = 0;
    }
    write_struct(&abi.stat, buf, attrs, use_ns)
}

pub fn statvfs_to_map(abi: &Abi, buf: &[u8]) -> AttrMap {
    read_struct(&abi.statvfs, buf, false)
}

pub fn map_to_statvfs(abi: &Abi, attrs: &AttrMap, buf: &mut [u8]) {
    for b in buf[..abi.statvfs.size].iter_mut() {
        *b = 0;
    }
    write_struct(&abi.statvfs, buf, attrs, false)
}

/// The `[atime, mtime]` pair handed to utimens
pub fn read_timespecs(abi: &Abi, buf: &[u8]) -> (Timestamp, Timestamp) {
    let layout = &abi.timespec;
    let sec = &layout.fields()[0];
    let nsec = &layout.fields()[1];
    let read = |base: usize| {
        let part = &buf[base..base + layout.size];
        Timestamp::new(
            layout.read_signed(part, sec),
            layout.read_signed(part, nsec),
        )
    };
    (read(0), read(layout.size))
}

/// A `fuse_entry_param` for a lookup style reply
pub fn entry_param(
    abi: &Abi,
    ino: u64,
    generation: u64,
    attrs: &AttrMap,
    attr_timeout: f64,
    entry_timeout: f64,
    use_ns: bool,
) -> Vec<u8> {
    let ep = &abi.entry_param;
    // the words and doubles of fuse_entry_param share stat's byte order
    let l = &abi.stat;
    let mut buf = vec![0; ep.size];
    l.write_unsigned(&mut buf, &ep.ino, ino);
    l.write_unsigned(&mut buf, &ep.generation, generation);
    let attr_end = ep.attr_offset + l.size;
    write_struct(l, &mut buf[ep.attr_offset..attr_end], attrs, use_ns);
    l.write_double(&mut buf, &ep.attr_timeout, attr_timeout);
    l.write_double(&mut buf, &ep.entry_timeout, entry_timeout);
    buf
}

/// The handler-facing copy of `fuse_file_info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// open(2) flags
    pub flags: i32,
    pub writepage: i32,
    pub direct_io: bool,
    pub keep_cache: bool,
    pub flush: bool,
    pub nonseekable: bool,
    pub flock_release: bool,
    pub fh: u64,
    pub lock_owner: u64,
}

impl FileInfo {
    pub fn read(layout: &FileInfoLayout, buf: &[u8]) -> Self {
        let l = &layout.layout;
        let get = |name: &str| l.get(buf, name).unwrap_or(0);
        Self {
            flags: get("flags") as i32,
            writepage: get("writepage") as i32,
            direct_io: layout.get_flag(buf, FileInfoFlag::DirectIo),
            keep_cache: layout.get_flag(buf, FileInfoFlag::KeepCache),
            flush: layout.get_flag(buf, FileInfoFlag::Flush),
            nonseekable: layout.get_flag(buf, FileInfoFlag::NonSeekable),
            flock_release: layout.get_flag(buf, FileInfoFlag::FlockRelease),
            fh: get("fh") as u64,
            lock_owner: get("lock_owner") as u64,
        }
    }

    /// Stores the handle back into the native structure.  With `raw` the
    /// flags a handler may change on open are stored as well.
    pub fn write_back(&self, layout: &FileInfoLayout, buf: &mut [u8], raw: bool) {
        layout.layout.set(buf, "fh", self.fh as i64);
        if raw {
            layout.set_flag(buf, FileInfoFlag::DirectIo, self.direct_io);
            layout.set_flag(buf, FileInfoFlag::KeepCache, self.keep_cache);
            layout.set_flag(buf, FileInfoFlag::NonSeekable, self.nonseekable);
        }
    }

    /// Writes every member, for handing a fresh `fuse_file_info` to libfuse
    pub fn write(&self, layout: &FileInfoLayout, buf: &mut [u8]) {
        let l = &layout.layout;
        l.set(buf, "flags", self.flags as i64);
        l.set(buf, "writepage", self.writepage as i64);
        l.set(buf, "lock_owner", self.lock_owner as i64);
        layout.set_flag(buf, FileInfoFlag::Flush, self.flush);
        layout.set_flag(buf, FileInfoFlag::FlockRelease, self.flock_release);
        self.write_back(layout, buf, true);
    }
}

/// chown passes `(uid_t)-1` for an id that should stay as it is
pub fn unchanged_id(id: u32) -> Option<u32> {
    if id.wrapping_add(1) == 0 {
        None
    } else {
        Some(id)
    }
}

/// The xattr copy protocol: with no (or an empty) destination, report the
/// size needed.  A destination too small for `data` is `ERANGE`, never a
/// truncated copy.
pub fn copy_sized(data: &[u8], dst: Option<&mut [u8]>) -> FuseResult<usize> {
    match dst {
        Some(dst) if !dst.is_empty() => {
            if dst.len() < data.len() {
                return Err(Errno::ERANGE.into());
            }
            dst[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
        _ => Ok(data.len()),
    }
}

/// readlink copies at most `dst.len() - 1` bytes and always terminates.
pub fn copy_link(target: &[u8], dst: &mut [u8]) {
    if dst.is_empty() {
        return;
    }
    let n = target.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&target[..n]);
    dst[n] = 0;
}

/// The listxattr payload: every name followed by a NUL
pub fn join_names<S: AsRef<[u8]>>(names: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_ref());
        out.push(0);
    }
    out
}
