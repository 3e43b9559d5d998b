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

//! Declaration order matters, offsets are derived from it.

use super::CType::*;
use super::{Arch, CType, Os, Platform};
use crate::err::UnsupportedPlatform;

type Decl = &'static [(&'static str, CType)];

const LINUX_X86_64_STAT: Decl = &[
    ("st_dev", U64),
    ("st_ino", U64),
    ("st_nlink", U64),
    ("st_mode", U32),
    ("st_uid", U32),
    ("st_gid", U32),
    ("__pad0", I32),
    ("st_rdev", U64),
    ("st_size", I64),
    ("st_blksize", I64),
    ("st_blocks", I64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("__glibc_reserved", Spare(8, 3)),
];

// asm-generic layout, shared by aarch64 and riscv64
const LINUX_GENERIC_STAT: Decl = &[
    ("st_dev", U64),
    ("st_ino", U64),
    ("st_mode", U32),
    ("st_nlink", U32),
    ("st_uid", U32),
    ("st_gid", U32),
    ("st_rdev", U64),
    ("__pad1", U64),
    ("st_size", I64),
    ("st_blksize", I32),
    ("__pad2", I32),
    ("st_blocks", I64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("__glibc_reserved", Spare(4, 2)),
];

// stat64, which is what a largefile libfuse uses on i386 and arm.  the two
// differ only in how 8 byte members are aligned.
const LINUX_STAT64: Decl = &[
    ("st_dev", U64),
    ("__pad1", U32),
    ("__st_ino", U32),
    ("st_mode", U32),
    ("st_nlink", U32),
    ("st_uid", U32),
    ("st_gid", U32),
    ("st_rdev", U64),
    ("__pad2", U32),
    ("st_size", I64),
    ("st_blksize", I32),
    ("st_blocks", I64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("st_ino", U64),
];

const LINUX_PPC_STAT: Decl = &[
    ("st_dev", U64),
    ("st_ino", U64),
    ("st_mode", U32),
    ("st_nlink", U32),
    ("st_uid", U32),
    ("st_gid", U32),
    ("st_rdev", U64),
    ("__pad2", U16),
    ("st_size", I64),
    ("st_blksize", I32),
    ("st_blocks", I64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("__glibc_reserved4", ULong),
    ("__glibc_reserved5", ULong),
];

const LINUX_PPC64_STAT: Decl = &[
    ("st_dev", U64),
    ("st_ino", U64),
    ("st_nlink", U64),
    ("st_mode", U32),
    ("st_uid", U32),
    ("st_gid", U32),
    ("__pad2", I32),
    ("st_rdev", U64),
    ("st_size", I64),
    ("st_blksize", I64),
    ("st_blocks", I64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("__glibc_reserved", Spare(8, 3)),
];

const MACOS_STAT: Decl = &[
    ("st_dev", I32),
    ("st_mode", U16),
    ("st_nlink", U16),
    ("st_ino", U64),
    ("st_uid", U32),
    ("st_gid", U32),
    ("st_rdev", I32),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("st_birthtime", Timespec),
    ("st_size", I64),
    ("st_blocks", I64),
    ("st_blksize", I32),
    ("st_flags", U32),
    ("st_gen", U32),
    ("st_lspare", I32),
    ("st_qspare", Spare(8, 2)),
];

const FREEBSD_STAT: Decl = &[
    ("st_dev", U64),
    ("st_ino", U64),
    ("st_nlink", U64),
    ("st_mode", U16),
    ("__st_padding0", I16),
    ("st_uid", U32),
    ("st_gid", U32),
    ("__st_padding1", I32),
    ("st_rdev", U64),
    ("st_atime", Timespec),
    ("st_mtime", Timespec),
    ("st_ctime", Timespec),
    ("st_birthtime", Timespec),
    ("st_size", I64),
    ("st_blocks", I64),
    ("st_blksize", I32),
    ("st_flags", U32),
    ("st_gen", U64),
    ("__st_spare", Spare(8, 10)),
];

const LINUX_STATVFS: Decl = &[
    ("f_bsize", ULong),
    ("f_frsize", ULong),
    ("f_blocks", U64),
    ("f_bfree", U64),
    ("f_bavail", U64),
    ("f_files", U64),
    ("f_ffree", U64),
    ("f_favail", U64),
    ("f_fsid", ULong),
    ("f_flag", ULong),
    ("f_namemax", ULong),
    ("__f_spare", Spare(4, 6)),
];

const LINUX_32_STATVFS: Decl = &[
    ("f_bsize", ULong),
    ("f_frsize", ULong),
    ("f_blocks", U64),
    ("f_bfree", U64),
    ("f_bavail", U64),
    ("f_files", U64),
    ("f_ffree", U64),
    ("f_favail", U64),
    ("f_fsid", ULong),
    ("__f_unused", I32),
    ("f_flag", ULong),
    ("f_namemax", ULong),
    ("__f_spare", Spare(4, 6)),
];

const MACOS_STATVFS: Decl = &[
    ("f_bsize", ULong),
    ("f_frsize", ULong),
    ("f_blocks", U32),
    ("f_bfree", U32),
    ("f_bavail", U32),
    ("f_files", U32),
    ("f_ffree", U32),
    ("f_favail", U32),
    ("f_fsid", ULong),
    ("f_flag", ULong),
    ("f_namemax", ULong),
];

const FREEBSD_STATVFS: Decl = &[
    ("f_bavail", U64),
    ("f_bfree", U64),
    ("f_blocks", U64),
    ("f_favail", U64),
    ("f_ffree", U64),
    ("f_files", U64),
    ("f_bsize", ULong),
    ("f_flag", ULong),
    ("f_frsize", ULong),
    ("f_fsid", ULong),
    ("f_namemax", ULong),
];

pub const TIMESPEC: Decl = &[("tv_sec", Long), ("tv_nsec", Long)];

// direct_io, keep_cache, flush, nonseekable and flock_release live in __bits
pub const FILE_INFO: Decl = &[
    ("flags", I32),
    ("fh_old", ULong),
    ("writepage", I32),
    ("__bits", U32),
    ("fh", U64),
    ("lock_owner", U64),
];

fn unsupported(platform: &Platform) -> UnsupportedPlatform {
    UnsupportedPlatform {
        os: format!("{:?}", platform.os),
        arch: format!("{:?}", platform.arch),
    }
}

pub fn stat_decl(platform: &Platform) -> Result<Decl, UnsupportedPlatform> {
    match (platform.os, platform.arch) {
        (Os::Linux, Arch::X86_64) => Ok(LINUX_X86_64_STAT),
        (Os::Linux, Arch::Aarch64) | (Os::Linux, Arch::Riscv64) => Ok(LINUX_GENERIC_STAT),
        (Os::Linux, Arch::X86) | (Os::Linux, Arch::Arm) => Ok(LINUX_STAT64),
        (Os::Linux, Arch::PowerPc) => Ok(LINUX_PPC_STAT),
        (Os::Linux, Arch::PowerPc64) => Ok(LINUX_PPC64_STAT),
        (Os::MacOs, Arch::X86_64) | (Os::MacOs, Arch::Aarch64) => Ok(MACOS_STAT),
        (Os::FreeBsd, Arch::X86_64) | (Os::FreeBsd, Arch::Aarch64) => Ok(FREEBSD_STAT),
        _ => Err(unsupported(platform)),
    }
}

pub fn statvfs_decl(platform: &Platform) -> Result<Decl, UnsupportedPlatform> {
    match platform.os {
        Os::Linux if platform.word_size == 4 => Ok(LINUX_32_STATVFS),
        Os::Linux => Ok(LINUX_STATVFS),
        Os::MacOs => Ok(MACOS_STATVFS),
        Os::FreeBsd => Ok(FREEBSD_STATVFS),
    }
}
