// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! snapkv: a snapshot-isolated key-value store with pooled sessions and
//! watermark-driven partition rollback.
//!
//! The crate layers a store controller over a versioned storage engine. Readers
//! see a stable snapshot, writers commit atomically and each commit leaves a
//! marker that rollback can later rewind to.

pub mod engine;
pub mod merge;
pub mod store;

pub use engine::{
    CommitMarker, Engine, EngineConfig, EngineError, EngineSession, EngineSnapshot, KvsMarker,
    Mutation, RocksEngine, SeqNum, SnapshotPoint,
};
pub use merge::{ConcatMerge, FnMerge, MergeOperator, U64AddMerge};
pub use store::{
    Batch, BatchOp, OptionValue, Options, PoolStats, Reader, Registry, Store, StoreConfig,
    StoreError, Writer,
};
