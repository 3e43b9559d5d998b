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

use super::TestResult;
use crate::common::cstr;
use crate::common::memfs::S_IFREG;
use crate::common::sink::{Reply, CALLER_UID};
use crate::common::LowLevelHelper;
use libc::c_char;
use nix::errno::Errno;
use parking_lot::Mutex;
use refuse::attr::AttrMap;
use refuse::dispatch::guard::Fault;
use refuse::err::{FuseError, FuseResult};
use refuse::lowlevel::{Entry, LowLevelOperations, Request, SetAttr, ROOT_INO};
use refuse::marshal::{self, FileInfo};
use refuse_sys::{stat, FUSE_SET_ATTR_MODE, FUSE_SET_ATTR_SIZE};
use std::ptr;

const HELLO_INO: u64 = 2;
const LINK_INO: u64 = 3;
const HELLO: &[u8] = b"hello world";

fn hello_attrs() -> AttrMap {
    AttrMap::new()
        .with("st_ino", HELLO_INO)
        .with("st_mode", S_IFREG | 0o444)
        .with("st_nlink", 1u32)
        .with("st_size", HELLO.len())
}

/// One file, and a handler for every way a request can be answered (or not)
#[derive(Default)]
struct Hello {
    written: Mutex<Vec<u8>>,
    setattr: Mutex<Option<(SetAttr, AttrMap)>>,
    symlinks: Mutex<Vec<(String, u64, String)>>,
    fail_init: bool,
}

impl LowLevelOperations for Hello {
    fn init(&self) -> FuseResult<()> {
        if self.fail_init {
            return Err(FuseError::raw(libc::EIO));
        }
        Ok(())
    }

    fn lookup(&self, req: Request<'_>, parent: u64, name: &str) {
        match (parent, name) {
            (ROOT_INO, "hello") => {
                let mut entry = Entry::new(HELLO_INO, hello_attrs());
                entry.attr_timeout = 2.5;
                req.reply_entry(&entry)
            }
            (ROOT_INO, "whoami") => {
                let uid = req.context().map(|c| c.uid).unwrap_or_default();
                req.reply_entry(&Entry::new(uid as u64, AttrMap::new()))
            }
            _ => req.reply_err(Errno::ENOENT),
        }
    }

    fn forget(&self, req: Request<'_>, _ino: u64, _nlookup: u64) {
        req.reply_none()
    }

    fn getattr(&self, req: Request<'_>, ino: u64, _fi: Option<&FileInfo>) {
        if ino == HELLO_INO {
            req.reply_attr(&hello_attrs(), 1.0)
        } else {
            req.reply_err(Errno::ENOENT)
        }
    }

    fn setattr(
        &self,
        req: Request<'_>,
        _ino: u64,
        attrs: AttrMap,
        to_set: SetAttr,
        _fi: Option<&FileInfo>,
    ) {
        *self.setattr.lock() = Some((to_set, attrs));
        req.reply_attr(&hello_attrs(), 1.0)
    }

    fn readlink(&self, req: Request<'_>, ino: u64) {
        if ino == LINK_INO {
            req.reply_readlink(b"hello")
        } else {
            req.reply_err(Errno::EINVAL)
        }
    }

    // never answers
    fn mkdir(&self, _req: Request<'_>, _parent: u64, _name: &str, _mode: u32) {}

    fn unlink(&self, _req: Request<'_>, _parent: u64, name: &str) {
        panic!("can't unlink {}", name)
    }

    fn rmdir(&self, req: Request<'_>, _parent: u64, _name: &str) {
        req.reply_error(FuseError::fatal("directory table corrupt"))
    }

    fn symlink(&self, req: Request<'_>, target: &str, parent: u64, name: &str) {
        self.symlinks
            .lock()
            .push((target.to_string(), parent, name.to_string()));
        req.reply_entry(&Entry::new(LINK_INO, AttrMap::new()))
    }

    fn open(&self, req: Request<'_>, _ino: u64, mut info: FileInfo) {
        info.fh = 7;
        info.direct_io = true;
        req.reply_open(&info)
    }

    fn read(&self, req: Request<'_>, _ino: u64, size: usize, off: i64, _info: FileInfo) {
        let start = (off as usize).min(HELLO.len());
        let end = (start + size).min(HELLO.len());
        req.reply_buf(&HELLO[start..end])
    }

    fn write(&self, req: Request<'_>, _ino: u64, data: &[u8], _off: i64, _info: FileInfo) {
        self.written.lock().extend_from_slice(data);
        req.reply_write(data.len())
    }

    fn statfs(&self, req: Request<'_>, _ino: u64) {
        req.reply_statfs(&AttrMap::new().with("f_bsize", 512u32))
    }

    fn getxattr(&self, req: Request<'_>, _ino: u64, name: &str, size: usize, _position: u32) {
        if name == "user.greeting" {
            req.reply_xattr(size, b"hi there")
        } else {
            req.reply_err(Errno::ENODATA)
        }
    }

    fn listxattr(&self, req: Request<'_>, _ino: u64, size: usize) {
        req.reply_listxattr(size, &["user.a", "user.greeting"])
    }

    // replies from another thread
    fn access(&self, req: Request<'_>, _ino: u64, _mask: i32) {
        std::thread::scope(|s| {
            s.spawn(move || req.reply_ok());
        })
    }

    fn create(&self, req: Request<'_>, _parent: u64, _name: &str, _mode: u32, mut info: FileInfo) {
        info.fh = 9;
        req.reply_create(&Entry::new(4, hello_attrs()), &info)
    }
}

fn entry_of(th: &LowLevelHelper<Hello>, buf: &[u8]) -> (u64, AttrMap, f64) {
    let ep = &th.abi.entry_param;
    let l = &th.abi.stat;
    let ino = l.read_unsigned(buf, &ep.ino);
    let attrs = th.stat(&buf[ep.attr_offset..ep.attr_offset + l.size]);
    (ino, attrs, l.read_double(buf, &ep.attr_timeout))
}

#[test]
fn test_lookup() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let (hello, missing) = (cstr("hello"), cstr("nope"));

    let req = th.req();
    unsafe { th.dispatcher.lookup(req, 1, hello.as_ptr()) };
    match th.sink.reply_to(req) {
        Reply::Entry(buf) => {
            assert_eq!(buf.len(), th.abi.entry_param.size);
            let (ino, attrs, timeout) = entry_of(&th, &buf);
            assert_eq!(ino, HELLO_INO);
            assert_eq!(attrs.get_i64("st_size"), Some(HELLO.len() as i64));
            assert_eq!(timeout, 2.5);
        }
        other => panic!("unexpected {:?}", other),
    }

    let req = th.req();
    unsafe { th.dispatcher.lookup(req, 1, missing.as_ptr()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::ENOENT));

    let req = th.req();
    unsafe { th.dispatcher.lookup(req, 1, ptr::null()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::EINVAL));
    Ok(())
}

#[test]
fn test_context() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("whoami");
    let req = th.req();
    unsafe { th.dispatcher.lookup(req, 1, name.as_ptr()) };
    match th.sink.reply_to(req) {
        Reply::Entry(buf) => assert_eq!(entry_of(&th, &buf).0, CALLER_UID as u64),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_getattr_and_forget() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());

    let req = th.req();
    unsafe { th.dispatcher.getattr(req, HELLO_INO as _, ptr::null_mut()) };
    match th.sink.reply_to(req) {
        Reply::Attr(buf, timeout) => {
            let attrs = th.stat(&buf);
            assert_eq!(attrs.get_i64("st_mode"), Some((S_IFREG | 0o444) as i64));
            assert_eq!(timeout, 1.0);
        }
        other => panic!("unexpected {:?}", other),
    }

    let req = th.req();
    unsafe { th.dispatcher.forget(req, HELLO_INO as _, 1) };
    assert_eq!(th.sink.reply_to(req), Reply::None);
    Ok(())
}

#[test]
fn test_setattr() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let mut st = th.abi.stat.zeroed();
    marshal::map_to_stat(
        &th.abi,
        &AttrMap::new().with("st_mode", 0o600u32).with("st_size", 3u64),
        &mut st,
        false,
    );

    let req = th.req();
    let to_set = FUSE_SET_ATTR_MODE | FUSE_SET_ATTR_SIZE;
    unsafe {
        th.dispatcher.setattr(
            req,
            HELLO_INO as _,
            st.as_mut_ptr() as *mut stat,
            to_set,
            ptr::null_mut(),
        )
    };
    assert!(matches!(th.sink.reply_to(req), Reply::Attr(_, _)));

    let (flags, attrs) = th.dispatcher.ops().setattr.lock().clone().unwrap();
    assert_eq!(flags, SetAttr::MODE | SetAttr::SIZE);
    assert_eq!(attrs.get_i64("st_mode"), Some(0o600));
    assert_eq!(attrs.get_i64("st_size"), Some(3));
    Ok(())
}

#[test]
fn test_open_read_write() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());

    let mut fi = th.abi.file_info.layout.zeroed();
    let req = th.req();
    unsafe { th.dispatcher.open(req, HELLO_INO as _, fi.as_mut_ptr() as *mut _) };
    match th.sink.reply_to(req) {
        Reply::Open(buf) => {
            let info = FileInfo::read(&th.abi.file_info, &buf);
            assert_eq!(info.fh, 7);
            assert!(info.direct_io);
        }
        other => panic!("unexpected {:?}", other),
    }

    let req = th.req();
    unsafe { th.dispatcher.read(req, HELLO_INO as _, 5, 6, ptr::null_mut()) };
    assert_eq!(th.sink.reply_to(req), Reply::Buf(b"world".to_vec()));

    let data = b"more";
    let req = th.req();
    unsafe {
        th.dispatcher.write(
            req,
            HELLO_INO as _,
            data.as_ptr() as *const c_char,
            data.len(),
            0,
            ptr::null_mut(),
        )
    };
    assert_eq!(th.sink.reply_to(req), Reply::Write(4));
    assert_eq!(*th.dispatcher.ops().written.lock(), b"more".to_vec());
    Ok(())
}

#[test]
fn test_create() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("new");
    let mut fi = th.abi.file_info.layout.zeroed();
    let req = th.req();
    unsafe {
        th.dispatcher
            .create(req, 1, name.as_ptr(), 0o644, fi.as_mut_ptr() as *mut _)
    };
    match th.sink.reply_to(req) {
        Reply::Create(entry, info) => {
            assert_eq!(entry_of(&th, &entry).0, 4);
            assert_eq!(FileInfo::read(&th.abi.file_info, &info).fh, 9);
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_symlink_and_readlink() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let (target, name) = (cstr("hello"), cstr("ln"));

    let req = th.req();
    unsafe { th.dispatcher.symlink(req, target.as_ptr(), 1, name.as_ptr()) };
    assert!(matches!(th.sink.reply_to(req), Reply::Entry(_)));
    assert_eq!(
        *th.dispatcher.ops().symlinks.lock(),
        vec![("hello".to_string(), 1, "ln".to_string())]
    );

    let req = th.req();
    unsafe { th.dispatcher.readlink(req, LINK_INO as _) };
    assert_eq!(th.sink.reply_to(req), Reply::Readlink(b"hello".to_vec()));
    Ok(())
}

#[test]
fn test_statfs() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let req = th.req();
    unsafe { th.dispatcher.statfs(req, 1) };
    match th.sink.reply_to(req) {
        Reply::Statfs(buf) => {
            let st = marshal::statvfs_to_map(&th.abi, &buf);
            assert_eq!(st.get_i64("f_bsize"), Some(512));
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_xattrs() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("user.greeting");

    let getxattr = |size: usize| {
        let req = th.req();
        unsafe { th.dispatcher.getxattr(req, 1, name.as_ptr(), size, 0) };
        th.sink.reply_to(req)
    };
    assert_eq!(getxattr(0), Reply::Xattr(8));
    assert_eq!(getxattr(64), Reply::Buf(b"hi there".to_vec()));
    assert_eq!(getxattr(4), Reply::Err(libc::ERANGE));

    let listxattr = |size: usize| {
        let req = th.req();
        unsafe { th.dispatcher.listxattr(req, 1, size) };
        th.sink.reply_to(req)
    };
    assert_eq!(listxattr(0), Reply::Xattr(21));
    assert_eq!(
        listxattr(21),
        Reply::Buf(b"user.a\0user.greeting\0".to_vec())
    );
    assert_eq!(listxattr(20), Reply::Err(libc::ERANGE));
    Ok(())
}

#[test]
fn test_reply_from_another_thread() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let req = th.req();
    unsafe { th.dispatcher.access(req, 1, libc::R_OK) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(0));
    Ok(())
}

#[test]
fn test_unanswered_request() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("d");
    let req = th.req();
    unsafe { th.dispatcher.mkdir(req, 1, name.as_ptr(), 0o755) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::EIO));
    Ok(())
}

#[test]
fn test_panicking_handler() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("f");
    let req = th.req();
    unsafe { th.dispatcher.unlink(req, 1, name.as_ptr()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::EINVAL));
    assert_eq!(th.exits.count(), 0);
    Ok(())
}

#[test]
fn test_fatal_reply() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    let name = cstr("d");
    let req = th.req();
    unsafe { th.dispatcher.rmdir(req, 1, name.as_ptr()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::EINVAL));
    assert_eq!(th.exits.count(), 1);
    assert!(matches!(
        th.dispatcher.replies().supervisor().faults().take(),
        Some(Fault::Error(FuseError::Fatal(_)))
    ));
    Ok(())
}

#[test]
fn test_init() -> TestResult {
    let th = LowLevelHelper::new(Hello::default());
    assert_eq!(th.dispatcher.init(), 0);
    assert_eq!(th.exits.count(), 0);

    let th = LowLevelHelper::new(Hello {
        fail_init: true,
        ..Hello::default()
    });
    th.dispatcher.init();
    assert_eq!(th.exits.count(), 1);
    assert!(th.dispatcher.replies().supervisor().faults().is_set());
    Ok(())
}

#[test]
fn test_defaults() -> TestResult {
    struct Empty;
    impl LowLevelOperations for Empty {}

    let th = LowLevelHelper::new(Empty);
    let name = cstr("x");
    let data = b"x";

    let req = th.req();
    unsafe { th.dispatcher.lookup(req, 1, name.as_ptr()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::ENOENT));

    let req = th.req();
    unsafe { th.dispatcher.getattr(req, 1, ptr::null_mut()) };
    assert!(matches!(th.sink.reply_to(req), Reply::Attr(_, _)));

    let req = th.req();
    unsafe {
        th.dispatcher.write(
            req,
            1,
            data.as_ptr() as *const c_char,
            1,
            0,
            ptr::null_mut(),
        )
    };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::EROFS));

    let req = th.req();
    unsafe { th.dispatcher.open(req, 1, ptr::null_mut()) };
    assert!(matches!(th.sink.reply_to(req), Reply::Open(_)));

    let req = th.req();
    unsafe { th.dispatcher.release(req, 1, ptr::null_mut()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(0));

    let req = th.req();
    unsafe { th.dispatcher.flush(req, 1, ptr::null_mut()) };
    assert_eq!(th.sink.reply_to(req), Reply::Err(libc::ENOSYS));
    Ok(())
}
