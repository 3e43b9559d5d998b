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

use std::ffi::NulError;

/// The host (or a requested target) has no layout table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedPlatform {
    pub os: String,
    pub arch: String,
}

impl std::error::Error for UnsupportedPlatform {}

impl std::fmt::Display for UnsupportedPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unsupported platform {}/{}", self.os, self.arch)
    }
}

#[derive(Debug, Clone)]
pub enum LibraryError {
    /// None of the candidate paths could be opened
    NotFound {
        candidates: Vec<String>,
        reason: String,
    },
    MissingSymbol {
        library: String,
        symbol: &'static str,
    },
    /// The requested type can't hold a symbol address
    SymbolSize {
        symbol: &'static str,
        size: usize,
    },
    BadPath(String),
    Unsupported(UnsupportedPlatform),
}

impl From<NulError> for LibraryError {
    fn from(e: NulError) -> Self {
        LibraryError::BadPath(e.to_string())
    }
}

impl From<UnsupportedPlatform> for LibraryError {
    fn from(e: UnsupportedPlatform) -> Self {
        LibraryError::Unsupported(e)
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Unsupported(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::NotFound { candidates, reason } => write!(
                f,
                "Unable to find libfuse (tried {}): {}",
                candidates.join(", "),
                reason
            ),
            LibraryError::MissingSymbol { library, symbol } => {
                write!(f, "{} does not export {}", library, symbol)
            }
            LibraryError::SymbolSize { symbol, size } => write!(
                f,
                "Can't bind {} as a {} byte value, it is pointer sized",
                symbol, size
            ),
            LibraryError::BadPath(e) => write!(f, "Bad library path: {}", e),
            LibraryError::Unsupported(e) => write!(f, "{}", e),
        }
    }
}
