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
use refuse::dispatch::guard::{panic_message, Fault};
use refuse::err::{FuseError, FuseResult};
use refuse::ops::{Fh, Operations};
use std::sync::atomic::{AtomicBool, Ordering};

/// Misbehaves differently depending on the path
#[derive(Default)]
struct Faulty {
    init_fails: bool,
    init_panics: bool,
    reached: AtomicBool,
}

impl Operations for Faulty {
    fn init(&self, _path: &str) -> FuseResult<()> {
        if self.init_panics {
            panic!("init exploded");
        }
        if self.init_fails {
            return Err(FuseError::raw(libc::EACCES));
        }
        Ok(())
    }

    fn read(&self, path: &str, size: usize, _offset: i64, _fh: Fh<'_>) -> FuseResult<Vec<u8>> {
        self.reached.store(true, Ordering::SeqCst);
        match path {
            "/panic" => panic!("read bug"),
            "/greedy" => Ok(vec![b'x'; size + 1]),
            "/negative" => Err(FuseError::raw(-libc::ENOENT)),
            "/zero" => Err(FuseError::raw(0)),
            "/uncoded" => Err(FuseError::uncoded("no idea")),
            "/io" => {
                std::fs::File::open("/definitely/not/here")?;
                Ok(vec![])
            }
            _ => Ok(b"fine".to_vec()),
        }
    }

    fn write(&self, path: &str, data: &[u8], _offset: i64, _fh: Fh<'_>) -> FuseResult<usize> {
        if path == "/fatal" {
            return Err(FuseError::fatal("backing store lost"));
        }
        Ok(data.len())
    }
}

#[test]
fn test_panic_is_contained() -> TestResult {
    let th = TestHelper::new(Faulty::default());
    assert_eq!(th.read("/panic", 10, 0), Err(-libc::EINVAL));
    assert!(th.ops().reached.load(Ordering::SeqCst));

    // the session carries on
    assert_eq!(th.exits.count(), 0);
    assert!(!th.dispatcher.supervisor().faults().is_set());
    assert_eq!(th.read("/ok", 10, 0).unwrap(), b"fine");
    Ok(())
}

#[test]
fn test_bad_codes() -> TestResult {
    let th = TestHelper::new(Faulty::default());
    assert_eq!(th.read("/negative", 10, 0), Err(-libc::EINVAL));
    assert_eq!(th.read("/zero", 10, 0), Err(-libc::EINVAL));
    assert_eq!(th.read("/uncoded", 10, 0), Err(-libc::EINVAL));
    assert_eq!(th.read("/io", 10, 0), Err(-libc::ENOENT));
    assert_eq!(th.exits.count(), 0);
    Ok(())
}

#[test]
fn test_oversized_read() -> TestResult {
    let th = TestHelper::new(Faulty::default());
    assert_eq!(th.read("/greedy", 4, 0), Err(-libc::EINVAL));
    Ok(())
}

#[test]
fn test_fatal_error_ends_session() -> TestResult {
    let th = TestHelper::new(Faulty::default());
    assert_eq!(th.write("/fatal", b"data", 0), -libc::EINVAL);
    assert_eq!(th.write("/fatal", b"data", 0), -libc::EINVAL);
    // the exit is only requested once, and the first fault is kept
    assert_eq!(th.exits.count(), 1);
    assert!(th.dispatcher.supervisor().exit_requested());

    match th.dispatcher.supervisor().faults().take() {
        Some(Fault::Error(FuseError::Fatal(msg))) => assert_eq!(msg, "backing store lost"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(th.write("/other", b"data", 0), 4);
    Ok(())
}

#[test]
fn test_init_panic() -> TestResult {
    let th = TestHelper::new(Faulty {
        init_panics: true,
        ..Faulty::default()
    });
    assert_eq!(th.dispatcher.init(), -libc::EINVAL);
    assert_eq!(th.exits.count(), 1);
    match th.dispatcher.supervisor().faults().take() {
        Some(Fault::Panic(payload)) => {
            assert_eq!(panic_message(payload.as_ref()), "init exploded")
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_init_error() -> TestResult {
    let th = TestHelper::new(Faulty {
        init_fails: true,
        ..Faulty::default()
    });
    th.dispatcher.init();
    assert_eq!(th.exits.count(), 1);
    assert!(matches!(
        th.dispatcher.supervisor().faults().take(),
        Some(Fault::Error(FuseError::Fatal(_)))
    ));
    Ok(())
}

#[test]
fn test_bad_path_bytes() -> TestResult {
    let th = TestHelper::new(Faulty::default());
    let path = std::ffi::CString::new(vec![b'/', 0xc3]).unwrap();
    let mut buf = vec![0u8; 8];
    let status = unsafe {
        th.dispatcher.read(
            path.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            0,
            std::ptr::null_mut(),
        )
    };
    assert_eq!(status, -libc::EILSEQ);
    assert!(!th.ops().reached.load(Ordering::SeqCst));

    let ok = cstr("/ok");
    assert!(unsafe { th.dispatcher.unlink(ok.as_ptr()) } < 0);
    Ok(())
}
