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

//! Byte-level descriptions of the native structures libfuse hands us.
//!
//! Rather than compile one set of `#[repr(C)]` structs per target, every
//! supported (os, arch) pair gets a declaration table in [`tables`].  A table
//! is resolved into a [`StructLayout`] by applying the natural C alignment
//! rules for the platform, so the same code can describe (and be tested
//! against) platforms other than the host.

use crate::err::UnsupportedPlatform;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

mod tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    FreeBsd,
}

impl Os {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linux" => Some(Os::Linux),
            "macos" | "darwin" => Some(Os::MacOs),
            "freebsd" => Some(Os::FreeBsd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Riscv64,
    Arm,
    PowerPc,
    PowerPc64,
}

impl Arch {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x86_64" | "amd64" => Some(Arch::X86_64),
            "x86" | "i386" | "i686" => Some(Arch::X86),
            "aarch64" | "arm64" => Some(Arch::Aarch64),
            "riscv64" => Some(Arch::Riscv64),
            "arm" | "armv7" => Some(Arch::Arm),
            "powerpc" | "ppc" => Some(Arch::PowerPc),
            "powerpc64" | "ppc64" | "ppc64le" => Some(Arch::PowerPc64),
            _ => None,
        }
    }

    fn word_size(self) -> usize {
        match self {
            Arch::X86 | Arch::Arm | Arch::PowerPc => 4,
            _ => 8,
        }
    }

    // i386 is the only target we support that aligns 8 byte scalars to 4
    fn max_align(self) -> usize {
        match self {
            Arch::X86 => 4,
            _ => 8,
        }
    }

    fn default_endian(self) -> Endian {
        match self {
            Arch::PowerPc | Arch::PowerPc64 => Endian::Big,
            _ => Endian::Little,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// The mask of the `index`th single-bit member of a 32-bit C bitfield.
    /// GCC allocates from the most significant bit on big-endian targets.
    pub fn bitfield_mask(self, index: u32) -> u32 {
        match self {
            Endian::Little => 1 << index,
            Endian::Big => 1 << (31 - index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    pub word_size: usize,
    pub endian: Endian,
    pub max_align: usize,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Result<Self, UnsupportedPlatform> {
        let supported = match os {
            Os::Linux => true,
            Os::MacOs | Os::FreeBsd => matches!(arch, Arch::X86_64 | Arch::Aarch64),
        };
        if !supported {
            return Err(UnsupportedPlatform {
                os: format!("{:?}", os),
                arch: format!("{:?}", arch),
            });
        }

        Ok(Self {
            os,
            arch,
            word_size: arch.word_size(),
            endian: arch.default_endian(),
            max_align: arch.max_align(),
        })
    }

    /// Little-endian ppc64 and friends
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn host() -> Result<Self, UnsupportedPlatform> {
        let unsupported = || UnsupportedPlatform {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        };
        let os = Os::from_name(std::env::consts::OS).ok_or_else(unsupported)?;
        let arch = Arch::from_name(std::env::consts::ARCH).ok_or_else(unsupported)?;
        let endian = if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        };
        Ok(Self::new(os, arch)?.with_endian(endian))
    }
}

/// A C field type as it appears in a declaration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// `long`, word sized
    Long,
    /// `unsigned long`, word sized
    ULong,
    /// `struct timespec`, two words
    Timespec,
    /// `double`
    Double,
    /// An array of `count` integers `width` bytes wide, never interpreted
    Spare(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Signed,
    Unsigned,
    Timespec,
    Double,
    Spare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub offset: usize,
    pub size: usize,
}

impl Field {
    /// Padding and reserved members are named with a leading double
    /// underscore, or are spare arrays, and are never surfaced as attributes.
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with("__") || self.kind == FieldKind::Spare
    }
}

pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

impl CType {
    fn size_align(self, platform: &Platform) -> (usize, usize) {
        let word = platform.word_size;
        let (size, natural) = match self {
            CType::I16 | CType::U16 => (2, 2),
            CType::I32 | CType::U32 => (4, 4),
            CType::I64 | CType::U64 | CType::Double => (8, 8),
            CType::Long | CType::ULong => (word, word),
            CType::Timespec => (2 * word, word),
            CType::Spare(width, count) => (width * count, width),
        };
        (size, natural.min(platform.max_align))
    }

    fn kind(self) -> FieldKind {
        match self {
            CType::I16 | CType::I32 | CType::I64 | CType::Long => FieldKind::Signed,
            CType::U16 | CType::U32 | CType::U64 | CType::ULong => FieldKind::Unsigned,
            CType::Timespec => FieldKind::Timespec,
            CType::Double => FieldKind::Double,
            CType::Spare(..) => FieldKind::Spare,
        }
    }
}

/// A resolved structure: field offsets, total size, alignment and the byte
/// order used to read and write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub endian: Endian,
    pub word_size: usize,
    fields: Vec<Field>,
}

impl StructLayout {
    pub fn build(name: &'static str, platform: &Platform, decl: &[(&'static str, CType)]) -> Self {
        let mut offset = 0;
        let mut align = 1;
        let mut fields = Vec::with_capacity(decl.len());

        for (field_name, ctype) in decl {
            let (size, field_align) = ctype.size_align(platform);
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            fields.push(Field {
                name: field_name,
                kind: ctype.kind(),
                offset,
                size,
            });
            offset += size;
        }

        Self {
            name,
            size: align_up(offset, align),
            align,
            endian: platform.endian,
            word_size: platform.word_size,
            fields,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn zeroed(&self) -> Vec<u8> {
        vec![0; self.size]
    }

    fn read_int_at(&self, buf: &[u8], offset: usize, size: usize) -> i64 {
        let bytes = &buf[offset..offset + size];
        match self.endian {
            Endian::Little => LittleEndian::read_int(bytes, size),
            Endian::Big => BigEndian::read_int(bytes, size),
        }
    }

    fn read_uint_at(&self, buf: &[u8], offset: usize, size: usize) -> u64 {
        let bytes = &buf[offset..offset + size];
        match self.endian {
            Endian::Little => LittleEndian::read_uint(bytes, size),
            Endian::Big => BigEndian::read_uint(bytes, size),
        }
    }

    // write_int truncates to the low `size` bytes, which is the C conversion
    // rule for both signed and unsigned narrowing
    fn write_int_at(&self, buf: &mut [u8], offset: usize, size: usize, value: i64) {
        let bytes = &mut buf[offset..offset + size];
        match self.endian {
            Endian::Little => LittleEndian::write_int(bytes, value, size),
            Endian::Big => BigEndian::write_int(bytes, value, size),
        }
    }

    pub fn read_signed(&self, buf: &[u8], field: &Field) -> i64 {
        self.read_int_at(buf, field.offset, field.size)
    }

    pub fn read_unsigned(&self, buf: &[u8], field: &Field) -> u64 {
        self.read_uint_at(buf, field.offset, field.size)
    }

    pub fn write_signed(&self, buf: &mut [u8], field: &Field, value: i64) {
        self.write_int_at(buf, field.offset, field.size, value)
    }

    pub fn write_unsigned(&self, buf: &mut [u8], field: &Field, value: u64) {
        self.write_int_at(buf, field.offset, field.size, value as i64)
    }

    pub fn read_timespec(&self, buf: &[u8], field: &Field) -> (i64, i64) {
        let word = self.word_size;
        (
            self.read_int_at(buf, field.offset, word),
            self.read_int_at(buf, field.offset + word, word),
        )
    }

    pub fn write_timespec(&self, buf: &mut [u8], field: &Field, sec: i64, nsec: i64) {
        let word = self.word_size;
        self.write_int_at(buf, field.offset, word, sec);
        self.write_int_at(buf, field.offset + word, word, nsec);
    }

    pub fn read_double(&self, buf: &[u8], field: &Field) -> f64 {
        f64::from_bits(self.read_uint_at(buf, field.offset, 8))
    }

    pub fn write_double(&self, buf: &mut [u8], field: &Field, value: f64) {
        self.write_int_at(buf, field.offset, 8, value.to_bits() as i64)
    }

    /// Reads a named integer field, sign extending when the C type is signed.
    pub fn get(&self, buf: &[u8], name: &str) -> Option<i64> {
        let field = self.field(name)?;
        match field.kind {
            FieldKind::Signed => Some(self.read_signed(buf, field)),
            FieldKind::Unsigned => Some(self.read_unsigned(buf, field) as i64),
            _ => None,
        }
    }

    /// Writes a named integer field.  Returns false if the field does not
    /// exist or is not an integer.
    pub fn set(&self, buf: &mut [u8], name: &str, value: i64) -> bool {
        match self.field(name) {
            Some(field) if matches!(field.kind, FieldKind::Signed | FieldKind::Unsigned) => {
                self.write_signed(buf, field, value);
                true
            }
            _ => false,
        }
    }
}

/// The single-bit members packed after `writepage` in `fuse_file_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInfoFlag {
    DirectIo,
    KeepCache,
    Flush,
    NonSeekable,
    FlockRelease,
}

impl FileInfoFlag {
    fn index(self) -> u32 {
        match self {
            FileInfoFlag::DirectIo => 0,
            FileInfoFlag::KeepCache => 1,
            FileInfoFlag::Flush => 2,
            FileInfoFlag::NonSeekable => 3,
            FileInfoFlag::FlockRelease => 4,
        }
    }
}

/// `fuse_file_info` plus the position of its bitfield members, which GCC
/// allocates from the most significant bit on big-endian targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfoLayout {
    pub layout: StructLayout,
}

impl FileInfoLayout {
    pub fn mask(&self, flag: FileInfoFlag) -> u32 {
        self.layout.endian.bitfield_mask(flag.index())
    }

    pub fn bits_field(&self) -> &Field {
        // always present, it's in every table
        &self.layout.fields()[3]
    }

    pub fn get_flag(&self, buf: &[u8], flag: FileInfoFlag) -> bool {
        let bits = self.layout.read_unsigned(buf, self.bits_field()) as u32;
        bits & self.mask(flag) != 0
    }

    pub fn set_flag(&self, buf: &mut [u8], flag: FileInfoFlag, on: bool) {
        let field = self.bits_field().clone();
        let mut bits = self.layout.read_unsigned(buf, &field) as u32;
        if on {
            bits |= self.mask(flag);
        } else {
            bits &= !self.mask(flag);
        }
        self.layout.write_unsigned(buf, &field, bits as u64);
    }
}

/// `fuse_entry_param`, which embeds a whole `struct stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryParamLayout {
    pub ino: Field,
    pub generation: Field,
    pub attr_offset: usize,
    pub attr_timeout: Field,
    pub entry_timeout: Field,
    pub size: usize,
}

impl EntryParamLayout {
    fn build(platform: &Platform, stat: &StructLayout) -> Self {
        let word = platform.word_size;
        let double_align = 8.min(platform.max_align);
        let attr_offset = align_up(2 * word, stat.align);
        let attr_timeout_offset = align_up(attr_offset + stat.size, double_align);
        let align = word.max(stat.align).max(double_align);

        Self {
            ino: Field {
                name: "ino",
                kind: FieldKind::Unsigned,
                offset: 0,
                size: word,
            },
            generation: Field {
                name: "generation",
                kind: FieldKind::Unsigned,
                offset: word,
                size: word,
            },
            attr_offset,
            attr_timeout: Field {
                name: "attr_timeout",
                kind: FieldKind::Double,
                offset: attr_timeout_offset,
                size: 8,
            },
            entry_timeout: Field {
                name: "entry_timeout",
                kind: FieldKind::Double,
                offset: attr_timeout_offset + 8,
                size: 8,
            },
            size: align_up(attr_timeout_offset + 16, align),
        }
    }
}

/// Everything the marshalling layer needs to know about one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abi {
    pub platform: Platform,
    pub stat: StructLayout,
    pub statvfs: StructLayout,
    pub timespec: StructLayout,
    pub file_info: FileInfoLayout,
    pub entry_param: EntryParamLayout,
}

impl Abi {
    pub fn for_platform(platform: Platform) -> Result<Self, UnsupportedPlatform> {
        let stat = StructLayout::build("stat", &platform, tables::stat_decl(&platform)?);
        let statvfs = StructLayout::build("statvfs", &platform, tables::statvfs_decl(&platform)?);
        let timespec = StructLayout::build("timespec", &platform, tables::TIMESPEC);
        let file_info = FileInfoLayout {
            layout: StructLayout::build("fuse_file_info", &platform, tables::FILE_INFO),
        };
        let entry_param = EntryParamLayout::build(&platform, &stat);

        Ok(Self {
            platform,
            stat,
            statvfs,
            timespec,
            file_info,
            entry_param,
        })
    }

    pub fn host() -> Result<Self, UnsupportedPlatform> {
        Self::for_platform(Platform::host()?)
    }
}
