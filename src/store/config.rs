// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Store configuration.
//!
//! Hosts that carry configuration as a loose option map parse it once with
//! [`StoreConfig::from_options`]; every recognised key is listed below and
//! anything else is rejected.
//!
//! | key | type | effect |
//! |---|---|---|
//! | `path` | string, required | storage location |
//! | `create_if_missing` | bool | create the store if absent |
//! | `num_concurrent` | positive integer | session pool size (default 10) |
//! | `compaction_mode` | `"auto"` | engine compaction, fixed to automatic |
//! | `multi_kv_instances` | `false` | single namespace per path |
//! | `sync_writes` | bool | fsync every commit |
//! | `write_buffer_size` | positive integer | memtable size in bytes |
//! | `bloom_filter_bits` | positive number | bloom filter bits per key |

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::engine::{CompactionMode, DurabilityMode, EngineConfig};

use super::StoreError;

/// Default session pool size.
pub const DEFAULT_CONCURRENT: usize = 10;

/// A loosely typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl OptionValue {
    fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Number(_) => "number",
            OptionValue::String(_) => "string",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Number(n) => write!(f, "{}", n),
            OptionValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Number(value)
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        OptionValue::Number(f64::from(value))
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::String(value)
    }
}

/// A loose option map as handed over by a host application.
pub type Options = BTreeMap<String, OptionValue>;

/// Typed store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Storage location.
    pub path: PathBuf,
    /// Session pool size; bounds concurrent readers and writers.
    pub num_concurrent: usize,
    /// Engine options.
    pub engine: EngineConfig,
}

impl StoreConfig {
    /// Creates a configuration for `path` with defaults for everything else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            num_concurrent: DEFAULT_CONCURRENT,
            engine: EngineConfig::default(),
        }
    }

    /// Creates the store if it does not exist.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.engine.create_if_missing = create;
        self
    }

    /// Sets the session pool size.
    pub fn with_num_concurrent(mut self, n: usize) -> Self {
        self.num_concurrent = n;
        self
    }

    /// Sets the commit durability mode.
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.engine.durability = durability;
        self
    }

    /// Replaces the engine options wholesale.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Checks the configuration before anything is opened.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("must specify path".to_string()));
        }
        if self.num_concurrent == 0 {
            return Err(StoreError::Config(
                "num_concurrent must be at least 1".to_string(),
            ));
        }
        if self.engine.compaction_mode != CompactionMode::Auto {
            return Err(StoreError::Config(
                "compaction mode must be automatic".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a loose option map.
    pub fn from_options(options: &Options) -> Result<Self, StoreError> {
        let path = match options.get("path") {
            Some(OptionValue::String(path)) if !path.is_empty() => path.clone(),
            Some(OptionValue::String(_)) | None => {
                return Err(StoreError::Config("must specify path".to_string()))
            }
            Some(other) => return Err(mistyped("path", "string", other)),
        };

        let mut config = StoreConfig::new(path);

        for (key, value) in options {
            match key.as_str() {
                "path" => {}
                "create_if_missing" => config.engine.create_if_missing = as_bool(key, value)?,
                "num_concurrent" => config.num_concurrent = as_positive_int(key, value)?,
                "compaction_mode" => match value {
                    OptionValue::String(mode) if mode == "auto" => {
                        config.engine.compaction_mode = CompactionMode::Auto
                    }
                    OptionValue::String(mode) => {
                        return Err(StoreError::Config(format!(
                            "compaction_mode {:?} is not supported, only \"auto\"",
                            mode
                        )))
                    }
                    other => return Err(mistyped(key, "string", other)),
                },
                "multi_kv_instances" => {
                    if as_bool(key, value)? {
                        return Err(StoreError::Config(
                            "multi_kv_instances must be false: one namespace per path".to_string(),
                        ));
                    }
                }
                "sync_writes" => {
                    config.engine.durability = if as_bool(key, value)? {
                        DurabilityMode::FsyncEveryWrite
                    } else {
                        DurabilityMode::WalOnly
                    }
                }
                "write_buffer_size" => {
                    config.engine.write_buffer_size = Some(as_positive_int(key, value)?)
                }
                "bloom_filter_bits" => match value {
                    OptionValue::Number(bits) if *bits > 0.0 && bits.is_finite() => {
                        config.engine.bloom_filter_bits = Some(*bits)
                    }
                    OptionValue::Number(bits) => {
                        return Err(StoreError::Config(format!(
                            "bloom_filter_bits must be positive, got {}",
                            bits
                        )))
                    }
                    other => return Err(mistyped(key, "number", other)),
                },
                unknown => {
                    return Err(StoreError::Config(format!("unknown option {:?}", unknown)))
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn mistyped(key: &str, expected: &str, got: &OptionValue) -> StoreError {
    StoreError::Config(format!(
        "option {:?} must be a {}, got {} {}",
        key,
        expected,
        got.type_name(),
        got
    ))
}

fn as_bool(key: &str, value: &OptionValue) -> Result<bool, StoreError> {
    match value {
        OptionValue::Bool(b) => Ok(*b),
        other => Err(mistyped(key, "bool", other)),
    }
}

fn as_positive_int(key: &str, value: &OptionValue) -> Result<usize, StoreError> {
    match value {
        OptionValue::Number(n) if *n >= 1.0 && n.fract() == 0.0 && *n <= usize::MAX as f64 => {
            Ok(*n as usize)
        }
        OptionValue::Number(n) => Err(StoreError::Config(format!(
            "option {:?} must be a positive integer, got {}",
            key, n
        ))),
        other => Err(mistyped(key, "number", other)),
    }
}
