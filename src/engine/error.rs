// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine error types.

use super::SeqNum;

/// Errors raised by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("no snapshot available at sequence {seq}")]
    SnapshotUnavailable { seq: SeqNum },

    #[error("unknown sequence number {seq}")]
    UnknownSequence { seq: SeqNum },

    #[error("missing column family {0}")]
    MissingColumnFamily(&'static str),

    #[error("key too large: {size} > {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} > {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("merge operator {operator} failed for key {key:?}")]
    MergeFailed { operator: String, key: Vec<u8> },

    #[error("merge mutation without a merge operator for key {key:?}")]
    MissingMergeOperator { key: Vec<u8> },

    #[error("engine is closed")]
    Closed,
}
