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

use super::{TestHelper, TestResult};
use crate::common::cstr;
use crate::common::memfs::MemFs;
use refuse::codec::Encoding;
use refuse::conf::FuseOptions;
use refuse::ops::Operations;
use std::ffi::CString;
use std::ptr;

fn fs() -> MemFs {
    MemFs::default().with_file("/a", b"")
}

#[test]
fn test_get_protocol() -> TestResult {
    let th = TestHelper::new(fs());
    assert_eq!(th.setxattr("/a", "user.color", b"green", 0), 0);

    // a size query reports the length without copying
    let (status, _) = th.getxattr("/a", "user.color", 0);
    assert_eq!(status, 5);

    let (status, buf) = th.getxattr("/a", "user.color", 16);
    assert_eq!(status, 5);
    assert_eq!(&buf[..5], b"green");

    // never a truncated value
    let (status, buf) = th.getxattr("/a", "user.color", 3);
    assert_eq!(status, -libc::ERANGE);
    assert_eq!(buf, vec![0, 0, 0]);

    let (status, _) = th.getxattr("/a", "user.missing", 16);
    assert_eq!(status, -libc::ENODATA);
    Ok(())
}

#[test]
fn test_set_options() -> TestResult {
    let th = TestHelper::new(fs());
    assert_eq!(th.setxattr("/a", "user.k", b"1", libc::XATTR_CREATE), 0);
    assert_eq!(
        th.setxattr("/a", "user.k", b"2", libc::XATTR_CREATE),
        -libc::EEXIST
    );
    assert_eq!(th.setxattr("/a", "user.k", b"", 0), 0);
    let (status, _) = th.getxattr("/a", "user.k", 0);
    assert_eq!(status, 0);
    Ok(())
}

#[test]
fn test_list_protocol() -> TestResult {
    let th = TestHelper::new(fs());

    let (status, _) = th.listxattr("/a", 0);
    assert_eq!(status, 0);

    th.setxattr("/a", "user.a", b"x", 0);
    th.setxattr("/a", "user.bb", b"y", 0);

    let (status, _) = th.listxattr("/a", 0);
    assert_eq!(status, 15);

    let (status, buf) = th.listxattr("/a", 64);
    assert_eq!(status, 15);
    assert_eq!(&buf[..15], b"user.a\0user.bb\0");

    let (status, _) = th.listxattr("/a", 10);
    assert_eq!(status, -libc::ERANGE);
    Ok(())
}

#[test]
fn test_remove() -> TestResult {
    let th = TestHelper::new(fs());
    let (path, name) = (cstr("/a"), cstr("user.gone"));
    th.setxattr("/a", "user.gone", b"soon", 0);

    assert_eq!(
        unsafe { th.dispatcher.removexattr(path.as_ptr(), name.as_ptr()) },
        0
    );
    assert_eq!(th.getxattr("/a", "user.gone", 0).0, -libc::ENODATA);
    assert_eq!(
        unsafe { th.dispatcher.removexattr(path.as_ptr(), name.as_ptr()) },
        -libc::ENODATA
    );
    Ok(())
}

#[test]
fn test_null_name() -> TestResult {
    let th = TestHelper::new(fs());
    let path = cstr("/a");
    let status = unsafe {
        th.dispatcher
            .getxattr(path.as_ptr(), ptr::null(), ptr::null_mut(), 0, 0)
    };
    assert_eq!(status, -libc::EINVAL);
    Ok(())
}

#[test]
fn test_bad_utf8_name() -> TestResult {
    let th = TestHelper::new(fs());
    let path = cstr("/a");
    let name = CString::new(vec![b'u', 0xff]).unwrap();
    let status = unsafe {
        th.dispatcher
            .removexattr(path.as_ptr(), name.as_ptr())
    };
    assert_eq!(status, -libc::EILSEQ);
    Ok(())
}

#[test]
fn test_latin1_names() -> TestResult {
    let options = FuseOptions {
        encoding: Encoding::Latin1,
        ..FuseOptions::default()
    };
    let th = TestHelper::with_options(fs(), options);
    let path = cstr("/a");
    let name = CString::new(vec![b'u', b'.', 0xe9]).unwrap();
    let value = b"v";

    let status = unsafe {
        th.dispatcher.setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_char,
            value.len(),
            0,
            0,
        )
    };
    assert_eq!(status, 0);
    assert_eq!(th.ops().listxattr("/a").unwrap(), vec!["u.\u{e9}"]);

    let (status, buf) = th.listxattr("/a", 16);
    assert_eq!(status, 4);
    assert_eq!(&buf[..4], &[b'u', b'.', 0xe9, 0]);
    Ok(())
}

struct Empty;
impl Operations for Empty {}

#[test]
fn test_defaults() -> TestResult {
    let th = TestHelper::new(Empty);
    assert_eq!(th.setxattr("/", "user.x", b"1", 0), -libc::ENOTSUP);
    assert_eq!(th.getxattr("/", "user.x", 0).0, -libc::ENOTSUP);
    assert_eq!(th.listxattr("/", 0).0, 0);
    Ok(())
}
