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

//! Mount options, and how they become libfuse's argument vector.

use crate::codec::Encoding;
use ::config::{ConfigError, Map, Source, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ENV_PREFIX: &str = "REFUSE";

pub const DEFAULT_CONFIG_TOML: &str = r#"
[fuse]
foreground = true
debug = false
nothreads = false
allow_other = false
ro = false
raw_fi = false
use_ns = false
nullpath_ok = false
encoding = "utf-8"
"#;

/// The value of a pass-through `-o` option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptValue {
    /// `true` passes the bare key, `false` leaves it out
    Flag(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Flag(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseOptions {
    /// Don't daemonize.  Always the case for the low-level protocol.
    pub foreground: bool,
    /// libfuse's own request tracing
    pub debug: bool,
    /// A single dispatch thread
    pub nothreads: bool,
    pub allow_other: bool,
    pub ro: bool,
    /// Hand handlers the whole `fuse_file_info` instead of the handle
    pub raw_fi: bool,
    /// Timestamps as integer nanoseconds instead of float seconds
    pub use_ns: bool,
    /// Let libfuse pass no path to operations on open handles
    pub nullpath_ok: bool,
    pub encoding: Encoding,
    /// Defaults to the handler's type name
    pub fsname: Option<String>,
    pub extra: BTreeMap<String, OptValue>,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            foreground: true,
            debug: false,
            nothreads: false,
            allow_other: false,
            ro: false,
            raw_fi: false,
            use_ns: false,
            nullpath_ok: false,
            encoding: Encoding::Utf8,
            fsname: None,
            extra: BTreeMap::new(),
        }
    }
}

macro_rules! opt_expand {
    (flag, $conf:ident, $opts:ident, $name:ident) => {
        if $conf.$name {
            $opts.push(String::from(stringify!($name)));
        }
    };
    (str, $conf:ident, $opts:ident, $name:ident) => {
        if let Some(val) = &$conf.$name {
            $opts.push(format!("{}={}", stringify!($name), val));
        }
    };
}

impl FuseOptions {
    pub fn from_config(config: &::config::Config) -> Result<Self, ConfigError> {
        config.get::<Self>("fuse")
    }

    /// Builder for a pass-through option
    pub fn with_option<V: Into<OptValue>>(mut self, key: &str, value: V) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// The comma separated `-o` list
    pub fn mount_opts(&self) -> Vec<String> {
        let mut opts = vec![];
        opt_expand!(flag, self, opts, allow_other);
        opt_expand!(flag, self, opts, ro);
        opt_expand!(str, self, opts, fsname);

        for (key, value) in &self.extra {
            match value {
                OptValue::Flag(true) => opts.push(key.clone()),
                OptValue::Flag(false) => {}
                OptValue::Int(v) => opts.push(format!("{}={}", key, v)),
                OptValue::Str(v) => opts.push(format!("{}={}", key, v)),
            }
        }
        opts
    }

    fn push_opts(&self, args: &mut Vec<String>) {
        let opts = self.mount_opts();
        if !opts.is_empty() {
            args.push("-o".to_string());
            args.push(opts.join(","));
        }
    }

    /// The `fuse_main` argument vector
    pub fn to_args(&self, progname: &str, mountpoint: &str) -> Vec<String> {
        let mut args = vec![progname.to_string()];
        if self.foreground {
            args.push("-f".to_string());
        }
        if self.debug {
            args.push("-d".to_string());
        }
        if self.nothreads {
            args.push("-s".to_string());
        }
        self.push_opts(&mut args);
        args.push(mountpoint.to_string());
        args
    }

    /// The arguments for `fuse_mount` and `fuse_lowlevel_new`, which take the
    /// mountpoint separately and don't know about -f and -s
    pub fn to_lowlevel_args(&self, progname: &str) -> Vec<String> {
        let mut args = vec![progname.to_string()];
        if self.debug {
            args.push("-d".to_string());
        }
        self.push_opts(&mut args);
        args
    }

    pub(crate) fn with_default_fsname(&self, fsname: &str) -> Self {
        let mut opts = self.clone();
        if opts.fsname.is_none() {
            opts.fsname = Some(fsname.to_string());
        }
        opts
    }
}

/// The short type name of a handler, used as its default fsname
pub fn type_fsname<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[derive(Debug, Clone)]
pub struct MapSource(pub Map<String, Value>);

impl Source for MapSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Merges our default toml, the given source, and `REFUSE_` environment
/// variables (`REFUSE_FUSE__DEBUG=true` sets `fuse.debug`), in that order.
pub fn build<T>(source: T) -> Result<::config::Config, ConfigError>
where
    T: Source + Send + Sync + 'static,
{
    ::config::Config::builder()
        .add_source(::config::File::from_str(
            DEFAULT_CONFIG_TOML,
            ::config::FileFormat::Toml,
        ))
        .add_source(source)
        .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
}
