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

//! Userspace filesystems on top of libfuse 2.x.
//!
//! Implement [`Operations`] for a path-based filesystem, or
//! [`LowLevelOperations`] for an inode-based one, and hand it to [`mount`] or
//! [`mount_lowlevel`].  libfuse is bound at runtime, so nothing here needs it
//! at build time.

#![warn(
    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::option_expect_used,
    clippy::multiple_crate_versions,
    clippy::implicit_return,
    clippy::result_expect_used,
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::missing_safety_doc,
    clippy::shadow_reuse,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::wildcard_enum_match_arm
)]

pub mod attr;
pub mod codec;
pub mod conf;
pub mod dispatch;
pub mod err;
pub mod log;
pub mod lowlevel;
pub mod marshal;
pub mod ops;
pub mod poll;
pub mod session;

pub use attr::{AttrMap, AttrValue, Timestamp};
pub use codec::Encoding;
pub use conf::{FuseOptions, OptValue};
pub use err::{FuseError, FuseResult, MountError};
pub use lowlevel::{Entry, LowLevelOperations, Request, SetAttr, ROOT_INO};
pub use marshal::FileInfo;
pub use ops::{DirEntry, Fh, OpSet, Operations};
pub use poll::{PollHandle, PollSlot};
pub use session::{context, mount, mount_lowlevel, Context};
