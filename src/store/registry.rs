// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Name-to-constructor registry for store implementations.
//!
//! The host application owns the registry and decides what goes into it;
//! nothing is registered implicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::merge::MergeOperator;

use super::{Options, Store, StoreError};

/// Name under which the RocksDB-backed store registers.
pub const NAME: &str = "rocksdb";

/// Builds a store from a merge operator and a loose option map.
pub type StoreConstructor =
    fn(Option<Arc<dyn MergeOperator>>, &Options) -> Result<Store, StoreError>;

/// Registered store constructors, keyed by name.
#[derive(Default)]
pub struct Registry {
    constructors: BTreeMap<String, StoreConstructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `name`. Names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: StoreConstructor,
    ) -> Result<(), StoreError> {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(StoreError::Config(format!(
                "store {:?} is already registered",
                name
            )));
        }
        self.constructors.insert(name, constructor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<StoreConstructor> {
        self.constructors.get(name).copied()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Opens a store with the constructor registered under `name`.
    pub fn open(
        &self,
        name: &str,
        merge: Option<Arc<dyn MergeOperator>>,
        options: &Options,
    ) -> Result<Store, StoreError> {
        let constructor = self
            .get(name)
            .ok_or_else(|| StoreError::Config(format!("unknown store {:?}", name)))?;
        constructor(merge, options)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// Adds the RocksDB-backed store to `registry` under [`NAME`].
pub fn register(registry: &mut Registry) -> Result<(), StoreError> {
    registry.register(NAME, Store::open_with_options)
}
