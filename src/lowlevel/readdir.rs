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

//! Paging a directory listing into the kernel's readdir buffer.
//!
//! The whole listing is laid out as consecutive dirents, each carrying the
//! byte position where it ends as its offset.  The kernel resumes with the
//! offset of the last entry it got, so every reply is the run of whole
//! entries starting at the first one at or past `off`, cut before the first
//! entry that would overflow `size`.

use std::ops::Range;

/// The byte range of the reply, given each entry's serialized size
pub fn window(sizes: &[usize], off: usize, size: usize) -> Range<usize> {
    let mut pos = 0;
    let mut start = None;
    let mut end = 0;

    for entry_size in sizes {
        let next = pos + entry_size;
        if pos >= off {
            let first = *start.get_or_insert(pos);
            if next - first > size {
                break;
            }
            end = next;
        }
        pos = next;
    }

    match start {
        Some(first) if end > first => first..end,
        _ => 0..0,
    }
}

/// Which entries, by index, fall inside [`window`]'s range
pub fn entries_in(sizes: &[usize], range: &Range<usize>) -> Range<usize> {
    if range.is_empty() {
        return 0..0;
    }
    let mut pos = 0;
    let mut first = None;
    for (idx, entry_size) in sizes.iter().enumerate() {
        if pos == range.start && first.is_none() {
            first = Some(idx);
        }
        pos += entry_size;
        if pos == range.end {
            if let Some(first) = first {
                return first..idx + 1;
            }
        }
    }
    0..0
}
