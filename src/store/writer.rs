// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Exclusive writers and write batches.

use std::sync::Arc;

use crate::engine::{EngineSession, Mutation, RocksSession, SeqNum};
use crate::merge::MergeOperator;

use super::pool::Lease;
use super::watermark::encode_watermark;
use super::StoreError;

/// One operation in a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// Combined with the key's value through the store's merge operator.
    Merge { key: Vec<u8>, operand: Vec<u8> },
}

impl BatchOp {
    fn as_mutation(&self) -> Mutation<'_> {
        match self {
            BatchOp::Set { key, value } => Mutation::Set { key, value },
            BatchOp::Delete { key } => Mutation::Delete { key },
            BatchOp::Merge { key, operand } => Mutation::Merge { key, operand },
        }
    }
}

/// An ordered list of mutations applied to a writer in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn merge(&mut self, key: impl Into<Vec<u8>>, operand: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Merge {
            key: key.into(),
            operand: operand.into(),
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Removes all operations, keeping the allocation.
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    fn has_merge(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, BatchOp::Merge { .. }))
    }
}

/// An exclusive write session.
///
/// Reads see committed state plus this writer's own uncommitted mutations.
/// Mutations become visible to others only through [`Writer::commit`], which
/// may be called once. Closing or dropping an uncommitted writer discards its
/// mutations.
pub struct Writer<S: EngineSession = RocksSession> {
    lease: Option<Lease<S>>,
    merge: Option<Arc<dyn MergeOperator>>,
    committed: bool,
}

impl<S: EngineSession> Writer<S> {
    pub(crate) fn new(lease: Lease<S>, merge: Option<Arc<dyn MergeOperator>>) -> Self {
        Self {
            lease: Some(lease),
            merge,
            committed: false,
        }
    }

    fn session(&self) -> Result<&Lease<S>, StoreError> {
        self.lease.as_ref().ok_or(StoreError::Closed)
    }

    fn session_mut(&mut self) -> Result<&mut Lease<S>, StoreError> {
        if self.committed && self.lease.is_some() {
            return Err(StoreError::AlreadyCommitted);
        }
        self.lease.as_mut().ok_or(StoreError::Closed)
    }

    /// Reads a key, including this writer's uncommitted mutations.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.session()?.get(key)?)
    }

    /// Buffers a write.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.session_mut()?.set(key, value)?)
    }

    /// Buffers a deletion.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.session_mut()?.delete(key)?)
    }

    /// Buffers the partition watermark.
    pub fn set_watermark(&mut self, partition: &str, seq: u64) -> Result<(), StoreError> {
        self.set(partition.as_bytes(), &encode_watermark(seq))
    }

    /// Applies a batch to the buffer in order, all or nothing.
    ///
    /// A batch containing merges is rejected up front when no merge operator
    /// is configured. Merges on keys this writer has not written are kept as
    /// operands and folded into the newest committed value at commit time.
    pub fn apply(&mut self, batch: &Batch) -> Result<(), StoreError> {
        if batch.has_merge() && self.merge.is_none() {
            return Err(StoreError::NoMergeOperator);
        }

        let mutations: Vec<Mutation<'_>> = batch.ops().iter().map(BatchOp::as_mutation).collect();
        let merge = self.merge.clone();
        Ok(self.session_mut()?.apply(&mutations, merge.as_ref())?)
    }

    /// Number of buffered mutations.
    pub fn pending(&self) -> Result<usize, StoreError> {
        Ok(self.session()?.pending())
    }

    /// Atomically applies all buffered mutations.
    ///
    /// Returns the new commit's sequence number.
    pub fn commit(&mut self) -> Result<SeqNum, StoreError> {
        let merge = self.merge.clone();
        let session = self.session_mut()?;
        let seq = session.commit(merge.as_deref())?;
        self.committed = true;
        Ok(seq)
    }

    /// Returns the session to the pool, discarding uncommitted mutations.
    pub fn close(&mut self) -> Result<(), StoreError> {
        self.lease.take().map(drop).ok_or(StoreError::Closed)
    }

    /// Returns true once the writer has been closed.
    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }
}
