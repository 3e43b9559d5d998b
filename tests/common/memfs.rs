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

//! A small in-memory path-based filesystem to drive the dispatcher with

use nix::errno::Errno;
use parking_lot::Mutex;
use refuse::attr::{AttrMap, Timestamp};
use refuse::err::{FuseError, FuseResult};
use refuse::marshal::FileInfo;
use refuse::ops::{DirEntry, Fh, OpSet, Operations, S_IFDIR};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const MTIME: i64 = 1_600_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
    Link(String),
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn is_child(dir: &str, path: &str) -> bool {
    path != dir && parent(path) == dir
}

/// Every call is recorded as "op path" (plus whatever else the op cares
/// about), so tests can see exactly what the dispatcher decoded.
pub struct MemFs {
    nodes: Mutex<BTreeMap<String, Node>>,
    xattrs: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    times: Mutex<BTreeMap<String, Option<(Timestamp, Timestamp)>>>,
    next_fh: AtomicU64,
    pub calls: Mutex<Vec<String>>,
    pub supported: OpSet,
}

impl Default for MemFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            xattrs: Mutex::new(BTreeMap::new()),
            times: Mutex::new(BTreeMap::new()),
            next_fh: AtomicU64::new(10),
            calls: Mutex::new(vec![]),
            supported: OpSet::defaults(),
        }
    }
}

impl MemFs {
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.nodes
            .lock()
            .insert(path.to_string(), Node::File(contents.to_vec()));
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.nodes.lock().insert(path.to_string(), Node::Dir);
        self
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.nodes.lock().get(path).cloned()
    }

    pub fn times(&self, path: &str) -> Option<Option<(Timestamp, Timestamp)>> {
        self.times.lock().get(path).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record<S: Into<String>>(&self, call: S) {
        self.calls.lock().push(call.into());
    }

    fn attrs(node: &Node) -> AttrMap {
        let mtime = Timestamp::new(MTIME, 0);
        match node {
            Node::Dir => AttrMap::new()
                .with("st_mode", S_IFDIR | 0o755)
                .with("st_nlink", 2u32)
                .with("st_mtime", mtime),
            Node::File(data) => AttrMap::new()
                .with("st_mode", S_IFREG | 0o644)
                .with("st_nlink", 1u32)
                .with("st_size", data.len())
                .with("st_mtime", mtime),
            Node::Link(target) => AttrMap::new()
                .with("st_mode", S_IFLNK | 0o777)
                .with("st_nlink", 1u32)
                .with("st_size", target.len()),
        }
    }

    fn insert_new(&self, path: &str, node: Node) -> FuseResult<()> {
        let mut nodes = self.nodes.lock();
        match nodes.get(parent(path)) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::ENOTDIR.into()),
            None => return Err(Errno::ENOENT.into()),
        }
        if nodes.contains_key(path) {
            return Err(Errno::EEXIST.into());
        }
        nodes.insert(path.to_string(), node);
        Ok(())
    }

    fn new_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::SeqCst)
    }
}

impl Operations for MemFs {
    fn supported(&self) -> OpSet {
        self.supported
    }

    fn init(&self, path: &str) -> FuseResult<()> {
        self.record(format!("init {}", path));
        Ok(())
    }

    fn destroy(&self, path: &str) -> FuseResult<()> {
        self.record(format!("destroy {}", path));
        Ok(())
    }

    fn getattr(&self, path: &str, fh: Fh<'_>) -> FuseResult<AttrMap> {
        self.record(format!("getattr {} {:?}", path, fh.handle()));
        match self.nodes.lock().get(path) {
            Some(node) => Ok(Self::attrs(node)),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn readlink(&self, path: &str) -> FuseResult<Vec<u8>> {
        match self.nodes.lock().get(path) {
            Some(Node::Link(target)) => Ok(target.as_bytes().to_vec()),
            Some(_) => Err(Errno::EINVAL.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn mknod(&self, path: &str, mode: u32, dev: u64) -> FuseResult<()> {
        self.record(format!("mknod {} {:o} {}", path, mode, dev));
        self.insert_new(path, Node::File(vec![]))
    }

    fn mkdir(&self, path: &str, mode: u32) -> FuseResult<()> {
        self.record(format!("mkdir {} {:o}", path, mode));
        self.insert_new(path, Node::Dir)
    }

    fn unlink(&self, path: &str) -> FuseResult<()> {
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Dir) => Err(Errno::EISDIR.into()),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn rmdir(&self, path: &str) -> FuseResult<()> {
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Dir) => {
                if nodes.keys().any(|k| is_child(path, k)) {
                    return Err(Errno::ENOTEMPTY.into());
                }
                nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(Errno::ENOTDIR.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn symlink(&self, link: &str, target: &str) -> FuseResult<()> {
        self.record(format!("symlink {} -> {}", link, target));
        self.insert_new(link, Node::Link(target.to_string()))
    }

    fn rename(&self, old: &str, new: &str) -> FuseResult<()> {
        let mut nodes = self.nodes.lock();
        let node = nodes.remove(old).ok_or(Errno::ENOENT)?;
        nodes.insert(new.to_string(), node);
        Ok(())
    }

    fn link(&self, link: &str, target: &str) -> FuseResult<()> {
        self.record(format!("link {} -> {}", link, target));
        let node = self.node(target).ok_or(Errno::ENOENT)?;
        self.insert_new(link, node)
    }

    fn chmod(&self, path: &str, mode: u32) -> FuseResult<()> {
        self.record(format!("chmod {} {:o}", path, mode));
        Ok(())
    }

    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FuseResult<()> {
        self.record(format!("chown {} {:?} {:?}", path, uid, gid));
        Ok(())
    }

    fn truncate(&self, path: &str, length: i64, fh: Fh<'_>) -> FuseResult<()> {
        self.record(format!("truncate {} {} {:?}", path, length, fh.handle()));
        match self.nodes.lock().get_mut(path) {
            Some(Node::File(data)) => {
                data.resize(length as usize, 0);
                Ok(())
            }
            Some(_) => Err(Errno::EISDIR.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn open(&self, path: &str, info: &mut FileInfo) -> FuseResult<u64> {
        self.record(format!("open {} {:o}", path, info.flags));
        if self.node(path).is_none() {
            return Err(Errno::ENOENT.into());
        }
        info.keep_cache = true;
        Ok(self.new_handle())
    }

    fn read(&self, path: &str, size: usize, offset: i64, fh: Fh<'_>) -> FuseResult<Vec<u8>> {
        self.record(format!("read {} {:?}", path, fh.handle()));
        match self.nodes.lock().get(path) {
            Some(Node::File(data)) => {
                let start = (offset as usize).min(data.len());
                let end = (start + size).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(_) => Err(Errno::EISDIR.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8], offset: i64, fh: Fh<'_>) -> FuseResult<usize> {
        self.record(format!("write {} {:?}", path, fh.handle()));
        match self.nodes.lock().get_mut(path) {
            Some(Node::File(contents)) => {
                let offset = offset as usize;
                if contents.len() < offset + data.len() {
                    contents.resize(offset + data.len(), 0);
                }
                contents[offset..offset + data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            Some(_) => Err(Errno::EISDIR.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn statfs(&self, _path: &str) -> FuseResult<AttrMap> {
        Ok(AttrMap::new()
            .with("f_bsize", 4096u32)
            .with("f_blocks", 100u64)
            .with("f_namemax", 255u32))
    }

    fn release(&self, path: &str, fh: Fh<'_>) -> FuseResult<()> {
        self.record(format!("release {} {:?}", path, fh.handle()));
        Ok(())
    }

    fn setxattr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
        options: i32,
        _position: u32,
    ) -> FuseResult<()> {
        let key = (path.to_string(), name.to_string());
        let mut xattrs = self.xattrs.lock();
        if options & libc::XATTR_CREATE != 0 && xattrs.contains_key(&key) {
            return Err(Errno::EEXIST.into());
        }
        xattrs.insert(key, value.to_vec());
        Ok(())
    }

    fn getxattr(&self, path: &str, name: &str, _position: u32) -> FuseResult<Vec<u8>> {
        self.xattrs
            .lock()
            .get(&(path.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| FuseError::raw(libc::ENODATA))
    }

    fn listxattr(&self, path: &str) -> FuseResult<Vec<String>> {
        Ok(self
            .xattrs
            .lock()
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn removexattr(&self, path: &str, name: &str) -> FuseResult<()> {
        self.xattrs
            .lock()
            .remove(&(path.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| FuseError::raw(libc::ENODATA))
    }

    fn opendir(&self, path: &str, _info: &mut FileInfo) -> FuseResult<u64> {
        match self.node(path) {
            Some(Node::Dir) => Ok(self.new_handle()),
            Some(_) => Err(Errno::ENOTDIR.into()),
            None => Err(Errno::ENOENT.into()),
        }
    }

    fn readdir(&self, path: &str, offset: i64, fh: Fh<'_>) -> FuseResult<Vec<DirEntry>> {
        self.record(format!("readdir {} {} {:?}", path, offset, fh.handle()));
        let nodes = self.nodes.lock();
        let mut entries: Vec<DirEntry> = vec![".".into(), "..".into()];
        for (child, node) in nodes.iter().filter(|(k, _)| is_child(path, k)) {
            let name = child.rsplit('/').next().unwrap_or_default();
            entries.push(DirEntry::with_attrs(name, Self::attrs(node), 0));
        }
        Ok(entries)
    }

    fn access(&self, path: &str, mask: i32) -> FuseResult<()> {
        self.record(format!("access {} {}", path, mask));
        Ok(())
    }

    fn create(&self, path: &str, mode: u32, _info: &mut FileInfo) -> FuseResult<u64> {
        self.record(format!("create {} {:o}", path, mode));
        self.insert_new(path, Node::File(vec![]))?;
        Ok(self.new_handle())
    }

    fn utimens(&self, path: &str, times: Option<(Timestamp, Timestamp)>) -> FuseResult<()> {
        self.times.lock().insert(path.to_string(), times);
        Ok(())
    }
}
