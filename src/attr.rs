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

//! Name-keyed attribute maps, the handler-facing form of `stat` and
//! `statvfs`.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A `timespec`, normalized so that `0 <= nsec < 1e9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self {
            sec: sec + nsec.div_euclid(NANOS_PER_SEC),
            nsec: nsec.rem_euclid(NANOS_PER_SEC),
        }
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(0, nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.floor();
        let nsec = ((secs - whole) * NANOS_PER_SEC as f64).round() as i64;
        Self::new(whole as i64, nsec)
    }

    pub fn as_nanos(&self) -> i64 {
        self.sec
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nsec)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 / NANOS_PER_SEC as f64
    }

    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::new(now.timestamp(), now.timestamp_subsec_nanos() as i64)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos() as i64),
            Err(e) => {
                let d = e.duration();
                Self::new(-(d.as_secs() as i64), -(d.subsec_nanos() as i64))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Time(Timestamp),
}

impl AttrValue {
    /// The value as a C integer, truncating floats toward zero.
    pub fn as_i64(&self) -> i64 {
        match *self {
            AttrValue::Int(v) => v,
            AttrValue::UInt(v) => v as i64,
            AttrValue::Float(v) => v as i64,
            AttrValue::Time(t) => t.sec,
        }
    }

    /// The value as a timestamp.  Bare integers are nanoseconds when
    /// `use_ns` is set and whole seconds otherwise.
    pub fn as_timestamp(&self, use_ns: bool) -> Timestamp {
        match *self {
            AttrValue::Time(t) => t,
            AttrValue::Float(v) => Timestamp::from_secs_f64(v),
            AttrValue::Int(v) if use_ns => Timestamp::from_nanos(v),
            AttrValue::UInt(v) if use_ns => Timestamp::from_nanos(v as i64),
            v => Timestamp::new(v.as_i64(), 0),
        }
    }
}

macro_rules! attr_from {
    ($($t:ty => $variant:ident as $target:ty),*) => {
        $(
            impl From<$t> for AttrValue {
                fn from(v: $t) -> Self {
                    AttrValue::$variant(v as $target)
                }
            }
        )*
    };
}

attr_from!(
    i64 => Int as i64,
    i32 => Int as i64,
    u64 => UInt as u64,
    u32 => UInt as u64,
    u16 => UInt as u64,
    usize => UInt as u64,
    f64 => Float as f64
);

impl From<Timestamp> for AttrValue {
    fn from(t: Timestamp) -> Self {
        AttrValue::Time(t)
    }
}

impl From<SystemTime> for AttrValue {
    fn from(t: SystemTime) -> Self {
        AttrValue::Time(t.into())
    }
}

/// An ordered map of native field names (`st_mode`, `f_bsize`, ...) to
/// values.  Keys that don't name a field of the target structure are ignored
/// when marshalling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttrMap(BTreeMap<String, AttrValue>);

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`AttrMap::insert`]
    pub fn with<V: Into<AttrValue>>(mut self, key: &str, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<V: Into<AttrValue>>(&mut self, key: &str, value: V) -> Option<AttrValue> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).map(AttrValue::as_i64)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, AttrValue> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a AttrMap {
    type Item = (&'a String, &'a AttrValue);
    type IntoIter = btree_map::Iter<'a, String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> std::iter::FromIterator<(K, V)> for AttrMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        AttrMap(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
