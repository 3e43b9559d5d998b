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

use nix::errno::Errno;
use nix::errno::Errno::{EIO, EPERM};
use refuse_sys::{LibraryError, UnsupportedPlatform};
use std::error::Error;
use std::ffi::NulError;
use std::fmt::Formatter;
use std::io::ErrorKind;

pub type BoxedError = Box<dyn Error + Send + Sync>;

/// What a handler returns when an operation fails.
#[derive(Debug)]
pub enum FuseError {
    /// Reported to the kernel as the negated errno.  A missing or negative
    /// code is a handler bug and is reported as `EINVAL`.
    Code {
        errno: Option<i32>,
        original: Option<BoxedError>,
    },
    /// Ends the session.  The error is handed back to the caller of `mount`
    /// once the native loop has exited.
    Fatal(String),
}

pub type FuseResult<T> = Result<T, FuseError>;

impl FuseError {
    pub fn raw(errno: i32) -> Self {
        FuseError::Code {
            errno: Some(errno),
            original: None,
        }
    }

    /// A failure that carries no code at all
    pub fn uncoded<E: Into<BoxedError>>(original: E) -> Self {
        FuseError::Code {
            errno: None,
            original: Some(original.into()),
        }
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        FuseError::Fatal(msg.into())
    }

    pub fn with_source<E: Into<BoxedError>>(errno: Errno, original: E) -> Self {
        FuseError::Code {
            errno: Some(errno as i32),
            original: Some(original.into()),
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            FuseError::Code { errno, .. } => *errno,
            FuseError::Fatal(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FuseError::Fatal(_))
    }
}

impl From<Errno> for FuseError {
    fn from(num: Errno) -> Self {
        FuseError::Code {
            errno: Some(num as i32),
            original: None,
        }
    }
}

impl From<NulError> for FuseError {
    fn from(e: NulError) -> Self {
        FuseError::Code {
            errno: Some(libc::EINVAL),
            original: Some(Box::new(e)),
        }
    }
}

fn map_io_err(e: &std::io::Error) -> Errno {
    match e.kind() {
        ErrorKind::InvalidData => EIO,
        ErrorKind::PermissionDenied => EPERM,
        _ => Errno::from_raw(e.raw_os_error().unwrap_or(EIO as i32)),
    }
}

impl From<std::io::Error> for FuseError {
    fn from(e: std::io::Error) -> Self {
        FuseError::Code {
            errno: Some(map_io_err(&e) as i32),
            original: Some(Box::new(e)),
        }
    }
}

impl Error for FuseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FuseError::Code {
                original: Some(original),
                ..
            } => Some(original.as_ref() as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

impl std::fmt::Display for FuseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FuseError::Code {
                errno: Some(num),
                original,
            } => {
                write!(f, "{}", Errno::from_raw(*num))?;
                if let Some(original) = original {
                    write!(f, " ({})", original)?;
                }
                Ok(())
            }
            FuseError::Code {
                errno: None,
                original,
            } => match original {
                Some(original) => write!(f, "Uncoded error ({})", original),
                None => write!(f, "Uncoded error"),
            },
            FuseError::Fatal(msg) => write!(f, "Fatal: {}", msg),
        }
    }
}

/// Why a mount did not run to a clean unmount.
#[derive(Debug)]
pub enum MountError {
    Library(LibraryError),
    Platform(UnsupportedPlatform),
    BadArgument(NulError),
    Signal(Errno),
    /// `fuse_mount` returned no channel
    BadFuseChannel,
    /// `fuse_lowlevel_new` returned no session
    BadFuseSession,
    SignalHandlers,
    /// The native loop ended with a non-zero status
    Exit(i32),
    /// A handler reported a fatal error
    Fault(FuseError),
}

impl From<LibraryError> for MountError {
    fn from(e: LibraryError) -> Self {
        MountError::Library(e)
    }
}

impl From<UnsupportedPlatform> for MountError {
    fn from(e: UnsupportedPlatform) -> Self {
        MountError::Platform(e)
    }
}

impl From<NulError> for MountError {
    fn from(e: NulError) -> Self {
        MountError::BadArgument(e)
    }
}

impl From<Errno> for MountError {
    fn from(e: Errno) -> Self {
        MountError::Signal(e)
    }
}

impl Error for MountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MountError::Library(e) => Some(e),
            MountError::Platform(e) => Some(e),
            MountError::BadArgument(e) => Some(e),
            MountError::Signal(e) => Some(e),
            MountError::Fault(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for MountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MountError::Library(e) => write!(f, "{}", e),
            MountError::Platform(e) => write!(f, "{}", e),
            MountError::BadArgument(e) => write!(f, "Bad mount argument: {}", e),
            MountError::Signal(e) => write!(f, "Couldn't change signal disposition: {}", e),
            MountError::Exit(code) => write!(f, "Fuse exited with status {}", code),
            MountError::Fault(e) => write!(f, "Filesystem failed: {}", e),
            // just use Debug for the rest
            e => write!(f, "{:?}", e),
        }
    }
}
