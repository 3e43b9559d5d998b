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

//! Runtime bindings to libfuse 2.x.
//!
//! Nothing here links against libfuse.  The library is located and bound when
//! first needed (see [`LibFuse::global`]), and the native structures it
//! exchanges with us are described per platform by [`layout::Abi`].

pub mod bindings;
pub mod err;
pub mod layout;
pub mod library;

pub use bindings::*;
pub use err::{LibraryError, UnsupportedPlatform};
pub use layout::{Abi, Endian, FileInfoFlag, Platform, StructLayout};
pub use library::{LibFuse, LIB_TAG};
