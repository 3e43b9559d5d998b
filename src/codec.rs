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

use crate::err::{FuseError, FuseResult};
use libc::c_char;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::str::FromStr;

/// How path and name bytes from the kernel are turned into text, and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(format!("Unknown encoding {}", other)),
        }
    }
}

impl Encoding {
    /// Bytes that aren't valid in this encoding fail with `EILSEQ`.
    pub fn decode(self, bytes: &[u8]) -> FuseResult<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| FuseError::with_source(Errno::EILSEQ, e)),
            Encoding::Latin1 => Ok(bytes.iter().map(|b| *b as char).collect()),
        }
    }

    pub fn encode(self, text: &str) -> FuseResult<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    if (c as u32) < 256 {
                        Ok(c as u8)
                    } else {
                        Err(Errno::EILSEQ.into())
                    }
                })
                .collect(),
        }
    }

    /// Decodes a NUL terminated string from the native layer.  A null pointer
    /// is a path-less call and decodes to `None`.
    ///
    /// # Safety
    /// `ptr` must be null or point at a NUL terminated string that outlives
    /// the call.
    pub unsafe fn decode_ptr(self, ptr: *const c_char) -> FuseResult<Option<String>> {
        if ptr.is_null() {
            return Ok(None);
        }
        self.decode(CStr::from_ptr(ptr).to_bytes()).map(Some)
    }
}
