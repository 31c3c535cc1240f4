// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Store error types.

use std::time::Duration;

use crate::engine::{EngineError, SeqNum};

/// Errors returned by the store, its readers and writers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("store, reader or writer is closed")]
    Closed,

    #[error("writer already committed")]
    AlreadyCommitted,

    #[error("commit marker {seq} covers {sub_stores} sub-stores, expected exactly one")]
    Consistency { seq: SeqNum, sub_stores: usize },

    #[error("watermark for partition {partition:?} is {len} bytes, expected 8")]
    Encoding { partition: String, len: usize },

    #[error("no commit for partition {partition:?} below sequence {target}: full rollback required")]
    RollbackUnavailable { partition: String, target: u64 },

    #[error("merge requested but no merge operator is configured")]
    NoMergeOperator,

    #[error("timed out after {0:?} waiting for a pooled session")]
    PoolTimeout(Duration),
}
