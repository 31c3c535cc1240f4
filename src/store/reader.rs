// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Snapshot readers.

use crate::engine::{prefix_end, EngineSession, EngineSnapshot, RocksSession, SeqNum, SnapshotPoint};

use super::pool::Lease;
use super::StoreError;

/// An immutable view of the store as of the moment it was opened.
///
/// Commits made after the reader was opened are never visible through it.
/// The reader holds one pooled session until [`Reader::close`] or drop.
pub struct Reader<S: EngineSession = RocksSession> {
    // Declared before `lease` so the snapshot is dropped first.
    snapshot: Option<S::Snapshot>,
    lease: Option<Lease<S>>,
}

impl<S: EngineSession> Reader<S> {
    pub(crate) fn new(lease: Lease<S>) -> Result<Self, StoreError> {
        let snapshot = lease.snapshot(SnapshotPoint::InMemoryLatest)?;
        Ok(Self {
            snapshot: Some(snapshot),
            lease: Some(lease),
        })
    }

    fn snapshot(&self) -> Result<&S::Snapshot, StoreError> {
        self.snapshot.as_ref().ok_or(StoreError::Closed)
    }

    /// Sequence number the reader is bound to.
    pub fn seq(&self) -> Result<SeqNum, StoreError> {
        Ok(self.snapshot()?.seq())
    }

    /// Reads a key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshot()?.get(key)?)
    }

    /// Reads several keys; results are in request order.
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let snapshot = self.snapshot()?;
        keys.iter()
            .map(|key| snapshot.get(key.as_ref()).map_err(StoreError::from))
            .collect()
    }

    /// Returns up to `limit` pairs with keys in `[start, end)`.
    ///
    /// `end = None` scans to the end of the keyspace.
    pub fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self.snapshot()?.scan(start, end, limit)?)
    }

    /// Returns up to `limit` pairs whose keys start with `prefix`.
    pub fn prefix_scan(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let end = prefix_end(prefix);
        self.scan(prefix, end.as_deref(), limit)
    }

    /// Releases the snapshot and returns the session to the pool.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or(StoreError::Closed)?;
        drop(snapshot);
        self.lease.take();
        Ok(())
    }

    /// Returns true once the reader has been closed.
    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }
}
