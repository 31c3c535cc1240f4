// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage engine capability interface.
//!
//! The adapter layer never touches on-disk structures directly. Everything it
//! needs from the engine is expressed by three traits:
//!
//! - [`Engine`]: an opened store that hands out sessions.
//! - [`EngineSession`]: a connection with a private write buffer, able to
//!   commit, snapshot, list commit markers and roll back.
//! - [`EngineSnapshot`]: an immutable view bound to one sequence number.
//!
//! [`RocksEngine`] is the bundled implementation. It keeps every committed
//! version of a key tagged with its commit sequence number, which is what
//! makes snapshots at historical commit markers and rollback possible.
//!
//! # Example
//!
//! ```no_run
//! use snapkv::engine::{Engine, EngineConfig, EngineSession, EngineSnapshot, RocksEngine, SnapshotPoint};
//! use std::path::Path;
//!
//! let engine = RocksEngine::open(Path::new("/tmp/snapkv"), &EngineConfig::default()).unwrap();
//! let mut session = engine.session().unwrap();
//!
//! session.set(b"key", b"value").unwrap();
//! let seq = session.commit(None).unwrap();
//!
//! let snapshot = session.snapshot(SnapshotPoint::At(seq)).unwrap();
//! assert_eq!(snapshot.get(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

mod error;
mod key;
mod marker;
mod rocks;

pub use error::EngineError;
pub use key::{
    decode_value, decode_version_key, encode_value, encode_version_key, extract_user_key,
    prefix_end, scan_start, user_key_prefix, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
pub use marker::{decode_marker, encode_marker, marker_key, CommitMarker, KvsMarker};
pub use rocks::{
    CompactionMode, DurabilityMode, EngineConfig, RocksEngine, RocksSession, RocksSnapshot,
    DEFAULT_KVS_NAME, MARKERS_CF, META_CF,
};

use std::fmt;
use std::sync::Arc;

use crate::merge::MergeOperator;

/// Position in a store's commit history.
///
/// Zero denotes the empty store. Every commit allocates the next value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqNum(pub u64);

impl SeqNum {
    /// Sequence number of a store with no commits.
    pub const ZERO: SeqNum = SeqNum(0);

    /// Returns the raw value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns the sequence number following this one.
    #[inline]
    pub fn next(self) -> SeqNum {
        SeqNum(self.0 + 1)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeqNum {
    fn from(value: u64) -> Self {
        SeqNum(value)
    }
}

/// Where a snapshot should be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPoint {
    /// The latest committed state, held in memory for the snapshot's lifetime.
    InMemoryLatest,
    /// The state as of a specific commit marker.
    At(SeqNum),
}

/// One buffered mutation handed to [`EngineSession::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation<'a> {
    Set { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
    /// Folded into the committed value through the merge operator when the
    /// session commits, or into a value already buffered for the key.
    Merge { key: &'a [u8], operand: &'a [u8] },
}

impl Mutation<'_> {
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } | Mutation::Merge { key, .. } => {
                key
            }
        }
    }
}

/// An opened store that produces sessions.
pub trait Engine: Send + Sync {
    type Session: EngineSession;

    /// Opens a new session on the store.
    fn session(&self) -> Result<Self::Session, EngineError>;

    /// Returns the sequence number of the newest commit.
    fn last_seq(&self) -> SeqNum;

    /// Flushes and closes the store, releasing the underlying database.
    ///
    /// Every session, snapshot and later call fails with
    /// [`EngineError::Closed`].
    fn close(&self) -> Result<(), EngineError>;
}

/// A connection to the engine.
///
/// Mutations are buffered in the session until [`EngineSession::commit`].
pub trait EngineSession: Send {
    type Snapshot: EngineSnapshot;

    /// Discards buffered mutations and rebases the session on the newest commit.
    fn reset(&mut self);

    /// Opens an immutable snapshot.
    fn snapshot(&self, point: SnapshotPoint) -> Result<Self::Snapshot, EngineError>;

    /// Reads a key, consulting the session's buffer before committed state.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Buffers a write.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Buffers a deletion.
    fn delete(&mut self, key: &[u8]) -> Result<(), EngineError>;

    /// Buffers `mutations` in order, all or nothing.
    ///
    /// `Merge` mutations need `merge`; without it the call fails with
    /// [`EngineError::MissingMergeOperator`] and nothing is buffered.
    fn apply(
        &mut self,
        mutations: &[Mutation<'_>],
        merge: Option<&Arc<dyn MergeOperator>>,
    ) -> Result<(), EngineError>;

    /// Returns the number of keys with buffered mutations.
    fn pending(&self) -> usize;

    /// Atomically applies the buffer and appends a commit marker.
    ///
    /// Buffered merges are folded into the newest committed value. For plain
    /// writes, when `merge` is given, keys committed by other sessions since
    /// this session was last reset are resolved through it.
    fn commit(&mut self, merge: Option<&dyn MergeOperator>) -> Result<SeqNum, EngineError>;

    /// Lists the store's commit markers, newest first.
    fn commit_markers(&self) -> Result<Vec<CommitMarker>, EngineError>;

    /// Discards every commit newer than `seq`.
    fn rollback(&mut self, seq: SeqNum) -> Result<(), EngineError>;
}

/// An immutable point-in-time view.
pub trait EngineSnapshot: Send {
    /// Sequence number this snapshot is bound to.
    fn seq(&self) -> SeqNum;

    /// Reads a key as of the snapshot.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Returns live pairs with keys in `[start, end)` in key order.
    ///
    /// `end = None` scans to the end of the keyspace.
    fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError>;
}
