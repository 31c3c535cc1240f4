// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Snapshot-isolated store with pooled sessions and partition rollback.
//!
//! A [`Store`] owns an engine and a fixed pool of engine sessions. Every
//! [`Reader`] and [`Writer`] leases one session for its lifetime, so the pool
//! size bounds how many can be open at once; further requests block until a
//! lease is returned.
//!
//! # Key Concepts
//!
//! - **Readers** take an in-memory snapshot at lease time and never observe
//!   later commits.
//! - **Writers** buffer mutations and apply them atomically on commit. Each
//!   commit appends one commit marker carrying its sequence number.
//! - **Rollback** walks the commit markers newest first and rewinds the store
//!   to the newest commit whose partition watermark is below a target.
//!
//! # Example
//!
//! ```no_run
//! use snapkv::store::{Store, StoreConfig};
//!
//! let config = StoreConfig::new("/tmp/snapkv").with_create_if_missing(true);
//! let store = Store::open(config, None).unwrap();
//!
//! let mut writer = store.writer().unwrap();
//! writer.set(b"key", b"value").unwrap();
//! writer.set_watermark("p1", 5).unwrap();
//! writer.commit().unwrap();
//! writer.close().unwrap();
//!
//! let reader = store.reader().unwrap();
//! assert_eq!(reader.get(b"key").unwrap(), Some(b"value".to_vec()));
//! drop(reader);
//!
//! store.rollback("p1", 10).unwrap();
//! store.close().unwrap();
//! ```

mod config;
mod error;
mod pool;
mod reader;
mod registry;
mod rollback;
mod watermark;
mod writer;

pub use config::{OptionValue, Options, StoreConfig, DEFAULT_CONCURRENT};
pub use error::StoreError;
pub use pool::{Lease, PoolStats, SessionPool};
pub use reader::Reader;
pub use registry::{register, Registry, StoreConstructor, NAME};
pub use watermark::{decode_watermark, encode_watermark, WATERMARK_LEN};
pub use writer::{Batch, BatchOp, Writer};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::engine::{CommitMarker, Engine, RocksEngine, SeqNum};
use crate::merge::MergeOperator;

/// A logical store.
///
/// Safe to share between threads; readers and writers are independent leases.
pub struct Store<E: Engine = RocksEngine> {
    path: PathBuf,
    // Dropped before the engine so pooled sessions go first.
    pool: SessionPool<E::Session>,
    engine: E,
    merge: Option<Arc<dyn MergeOperator>>,
    closed: AtomicBool,
}

impl Store<RocksEngine> {
    /// Opens the RocksDB-backed store described by `config`.
    #[instrument(skip_all, fields(path = %config.path.display()))]
    pub fn open(
        config: StoreConfig,
        merge: Option<Arc<dyn MergeOperator>>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let engine = RocksEngine::open(&config.path, &config.engine)?;
        Self::with_engine(engine, config.path, config.num_concurrent, merge)
    }

    /// Opens a store from a loose option map.
    pub fn open_with_options(
        merge: Option<Arc<dyn MergeOperator>>,
        options: &Options,
    ) -> Result<Self, StoreError> {
        let config = StoreConfig::from_options(options)?;
        Self::open(config, merge)
    }
}

impl<E: Engine> Store<E> {
    /// Builds a store over an already opened engine.
    pub fn with_engine(
        engine: E,
        path: impl Into<PathBuf>,
        num_concurrent: usize,
        merge: Option<Arc<dyn MergeOperator>>,
    ) -> Result<Self, StoreError> {
        if num_concurrent == 0 {
            return Err(StoreError::Config(
                "num_concurrent must be at least 1".to_string(),
            ));
        }

        let sessions = (0..num_concurrent)
            .map(|_| engine.session())
            .collect::<Result<Vec<_>, _>>()?;

        let path = path.into();
        info!(
            path = %path.display(),
            num_concurrent,
            merge = merge.as_ref().map(|mo| mo.name()),
            last_seq = engine.last_seq().get(),
            "opened store"
        );

        Ok(Self {
            path,
            pool: SessionPool::new(sessions),
            engine,
            merge,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Opens a reader over the latest committed state.
    ///
    /// Blocks while every pooled session is leased.
    pub fn reader(&self) -> Result<Reader<E::Session>, StoreError> {
        self.ensure_open()?;
        Reader::new(self.pool.acquire()?)
    }

    /// Like [`Store::reader`], failing with [`StoreError::PoolTimeout`] after `timeout`.
    pub fn reader_timeout(&self, timeout: Duration) -> Result<Reader<E::Session>, StoreError> {
        self.ensure_open()?;
        Reader::new(self.pool.acquire_timeout(timeout)?)
    }

    /// Opens a writer.
    ///
    /// Blocks while every pooled session is leased.
    pub fn writer(&self) -> Result<Writer<E::Session>, StoreError> {
        self.ensure_open()?;
        Ok(Writer::new(self.pool.acquire()?, self.merge.clone()))
    }

    /// Like [`Store::writer`], failing with [`StoreError::PoolTimeout`] after `timeout`.
    pub fn writer_timeout(&self, timeout: Duration) -> Result<Writer<E::Session>, StoreError> {
        self.ensure_open()?;
        Ok(Writer::new(
            self.pool.acquire_timeout(timeout)?,
            self.merge.clone(),
        ))
    }

    /// Rewinds the store to the newest commit whose watermark for
    /// `partition` is strictly below `target`, discarding every later commit.
    ///
    /// Returns the sequence number rolled back to. Fails with
    /// [`StoreError::RollbackUnavailable`] when no commit qualifies, in which
    /// case the partition has to be rebuilt from scratch.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn rollback(&self, partition: &str, target: u64) -> Result<SeqNum, StoreError> {
        self.ensure_open()?;
        let mut lease = self.pool.acquire()?;
        rollback::rollback_partition(&mut *lease, partition, target)
    }

    /// Lists commit markers, newest first.
    pub fn commit_markers(&self) -> Result<Vec<CommitMarker>, StoreError> {
        self.ensure_open()?;
        let lease = self.pool.acquire()?;
        Ok(lease.commit_markers()?)
    }

    /// Sequence number of the newest commit.
    pub fn last_seq(&self) -> SeqNum {
        self.engine.last_seq()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn merge_operator(&self) -> Option<&dyn MergeOperator> {
        self.merge.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the pool and the engine. Calling it again is a no-op.
    ///
    /// The database is released before this returns, so the path can be
    /// opened again. Readers and writers still open fail with
    /// [`StoreError::Engine`] on their next call; their sessions are dropped
    /// when they are released.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let outstanding = self.pool.close();
        self.engine.close()?;
        info!(outstanding, "closed store");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, KvsMarker};
    use crate::merge::{ConcatMerge, FnMerge, U64AddMerge};
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_store(num_concurrent: usize) -> (Store, TempDir) {
        create_test_store_with_merge(num_concurrent, None)
    }

    fn create_test_store_with_merge(
        num_concurrent: usize,
        merge: Option<Arc<dyn MergeOperator>>,
    ) -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path())
            .with_create_if_missing(true)
            .with_num_concurrent(num_concurrent);
        let store = Store::open(config, merge).unwrap();
        (store, dir)
    }

    fn commit(store: &Store, pairs: &[(&str, &str)], watermark: Option<u64>) -> SeqNum {
        let mut writer = store.writer().unwrap();
        for (k, v) in pairs {
            writer.set(k.as_bytes(), v.as_bytes()).unwrap();
        }
        if let Some(seq) = watermark {
            writer.set_watermark("p1", seq).unwrap();
        }
        writer.commit().unwrap()
    }

    #[test]
    fn test_open_requires_existing_path_without_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");

        let result = Store::open(StoreConfig::new(&path), None);
        assert!(matches!(result, Err(StoreError::Engine(_))));

        let store = Store::open(StoreConfig::new(&path).with_create_if_missing(true), None).unwrap();
        store.close().unwrap();

        // Now present: opening without create succeeds
        let store = Store::open(StoreConfig::new(&path), None).unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_open_empty_path() {
        assert!(matches!(
            Store::open(StoreConfig::new(""), None),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_second_open_of_same_path_fails() {
        let (store, dir) = create_test_store(1);
        let result = Store::open(StoreConfig::new(dir.path()), None);
        assert!(matches!(result, Err(StoreError::Engine(_))));
        store.close().unwrap();
    }

    #[test]
    fn test_pool_sized_by_config() {
        let (store, _dir) = create_test_store(3);
        assert_eq!(store.pool_stats(), PoolStats { capacity: 3, idle: 3, leased: 0 });

        let reader = store.reader().unwrap();
        let writer = store.writer().unwrap();
        assert_eq!(store.pool_stats().leased, 2);

        drop(reader);
        drop(writer);
        assert_eq!(store.pool_stats().idle, 3);
    }

    #[test]
    fn test_reader_isolated_from_later_commit() {
        let (store, _dir) = create_test_store(4);
        commit(&store, &[("key", "v1")], None);

        let reader = store.reader().unwrap();
        let mut writer = store.writer().unwrap();
        writer.set(b"key", b"v2").unwrap();
        writer.set(b"new", b"x").unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();

        assert_eq!(reader.get(b"key").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(reader.get(b"new").unwrap(), None);
        assert_eq!(reader.scan(b"", None, 10).unwrap().len(), 1);

        let fresh = store.reader().unwrap();
        assert_eq!(fresh.get(b"key").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(fresh.get(b"new").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_commit_visible_and_markers_monotonic() {
        let (store, _dir) = create_test_store(2);

        let mut previous = SeqNum::ZERO;
        for i in 0..5 {
            let seq = commit(&store, &[("key", i.to_string().as_str())], None);
            assert!(seq > previous);
            assert_eq!(store.commit_markers().unwrap()[0].seq, seq);
            assert_eq!(store.last_seq(), seq);
            previous = seq;
        }

        let reader = store.reader().unwrap();
        assert_eq!(reader.seq().unwrap(), previous);
        assert_eq!(reader.get(b"key").unwrap(), Some(b"4".to_vec()));
    }

    #[test]
    fn test_reader_ranges() {
        let (store, _dir) = create_test_store(2);
        commit(
            &store,
            &[("user/1", "a"), ("user/2", "b"), ("user/3", "c"), ("zone/1", "z")],
            None,
        );

        let reader = store.reader().unwrap();
        let users = reader.prefix_scan(b"user/", 100).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0], (b"user/1".to_vec(), b"a".to_vec()));

        let bounded = reader.scan(b"user/2", Some(b"zone/"), 100).unwrap();
        assert_eq!(bounded.len(), 2);

        let got = reader.multi_get(&[&b"user/1"[..], b"missing", b"zone/1"]).unwrap();
        assert_eq!(got, vec![Some(b"a".to_vec()), None, Some(b"z".to_vec())]);
    }

    #[test]
    fn test_closed_reader_and_writer() {
        let (store, _dir) = create_test_store(2);

        let mut reader = store.reader().unwrap();
        reader.close().unwrap();
        assert!(reader.is_closed());
        assert!(matches!(reader.get(b"k"), Err(StoreError::Closed)));
        assert!(matches!(reader.close(), Err(StoreError::Closed)));

        let mut writer = store.writer().unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.set(b"k", b"v"), Err(StoreError::Closed)));
        assert!(matches!(writer.commit(), Err(StoreError::Closed)));
        assert!(matches!(writer.close(), Err(StoreError::Closed)));

        assert_eq!(store.pool_stats().idle, 2);
    }

    #[test]
    fn test_single_commit_per_writer() {
        let (store, _dir) = create_test_store(1);
        let mut writer = store.writer().unwrap();
        writer.set(b"k", b"v").unwrap();
        writer.commit().unwrap();

        assert!(matches!(writer.commit(), Err(StoreError::AlreadyCommitted)));
        assert!(matches!(writer.set(b"k", b"w"), Err(StoreError::AlreadyCommitted)));
        assert_eq!(writer.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_uncommitted_writer_leaves_store_unchanged() {
        let (store, _dir) = create_test_store(2);
        commit(&store, &[("key", "v1")], None);
        let before_seq = store.last_seq();

        let mut writer = store.writer().unwrap();
        writer.set(b"key", b"v2").unwrap();
        writer.delete(b"key").unwrap();
        writer.set(b"other", b"x").unwrap();
        assert_eq!(writer.get(b"other").unwrap(), Some(b"x".to_vec()));
        writer.close().unwrap();

        assert_eq!(store.last_seq(), before_seq);
        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"key").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(reader.get(b"other").unwrap(), None);
        assert_eq!(store.commit_markers().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_writer_discards_buffer() {
        let (store, _dir) = create_test_store(1);
        {
            let mut writer = store.writer().unwrap();
            writer.set(b"key", b"v").unwrap();
        }
        // Same single session is handed out again with an empty buffer
        let writer = store.writer().unwrap();
        assert_eq!(writer.pending().unwrap(), 0);
        assert_eq!(writer.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_pool_exhaustion_blocks_writers() {
        let (store, _dir) = create_test_store(2);
        let store = Arc::new(store);

        let first = store.writer().unwrap();
        let _second = store.writer().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut writer = store.writer().unwrap();
                writer.set(b"late", b"1").unwrap();
                tx.send(writer.commit().unwrap()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(matches!(
            store.writer_timeout(Duration::from_millis(10)),
            Err(StoreError::PoolTimeout(_))
        ));

        drop(first);
        let seq = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert_eq!(seq, SeqNum(1));
    }

    #[test]
    fn test_concurrent_writers_disjoint_keys() {
        let (store, _dir) = create_test_store(4);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut writer = store.writer().unwrap();
                    writer.set(format!("key{}", i).as_bytes(), b"v").unwrap();
                    writer.commit().unwrap()
                })
            })
            .collect();

        let mut seqs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seqs.sort();
        seqs.dedup();
        assert_eq!(seqs.len(), 8);

        let reader = store.reader().unwrap();
        assert_eq!(reader.prefix_scan(b"key", 100).unwrap().len(), 8);
    }

    #[test]
    fn test_merge_operator_resolves_conflict() {
        let (store, _dir) = create_test_store_with_merge(2, Some(Arc::new(ConcatMerge)));
        commit(&store, &[("key", "a")], None);

        let mut first = store.writer().unwrap();
        let mut second = store.writer().unwrap();
        first.set(b"key", b"b").unwrap();
        second.set(b"key", b"c").unwrap();
        first.commit().unwrap();
        second.commit().unwrap();
        drop(first);
        drop(second);

        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"key").unwrap(), Some(b"bc".to_vec()));
    }

    #[test]
    fn test_batch_apply() {
        let (store, _dir) = create_test_store_with_merge(1, Some(Arc::new(U64AddMerge)));

        let mut batch = Batch::new();
        batch
            .set(&b"a"[..], &b"1"[..])
            .set(&b"b"[..], &b"2"[..])
            .delete(&b"a"[..])
            .merge(&b"count"[..], 3u64.to_be_bytes().to_vec())
            .merge(&b"count"[..], 4u64.to_be_bytes().to_vec());
        assert_eq!(batch.len(), 5);

        let mut writer = store.writer().unwrap();
        writer.apply(&batch).unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();

        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"a").unwrap(), None);
        assert_eq!(reader.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reader.get(b"count").unwrap(), Some(7u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn test_batch_merge_without_operator() {
        let (store, _dir) = create_test_store(1);
        let mut batch = Batch::new();
        batch.set(&b"a"[..], &b"1"[..]).merge(&b"b"[..], &b"x"[..]);

        let mut writer = store.writer().unwrap();
        assert!(matches!(writer.apply(&batch), Err(StoreError::NoMergeOperator)));
        assert_eq!(writer.pending().unwrap(), 0);
    }

    #[test]
    fn test_rollback_picks_newest_satisfying_commit() {
        let (store, _dir) = create_test_store(2);
        let c1 = commit(&store, &[("data", "one")], Some(5));
        let c2 = commit(&store, &[("data", "two")], Some(15));
        let _c3 = commit(&store, &[("data", "three")], Some(25));

        let seq = store.rollback("p1", 20).unwrap();

        assert_eq!(seq, c2);
        assert!(seq > c1);
        assert_eq!(store.last_seq(), c2);
        assert_eq!(store.commit_markers().unwrap()[0].seq, c2);

        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"data").unwrap(), Some(b"two".to_vec()));
        assert_eq!(reader.get(b"p1").unwrap(), Some(encode_watermark(15).to_vec()));
    }

    #[test]
    fn test_rollback_skips_commits_without_watermark() {
        let (store, _dir) = create_test_store(2);
        let c1 = commit(&store, &[("data", "one")], Some(5));
        // Deleting the watermark leaves later snapshots without one
        let mut writer = store.writer().unwrap();
        writer.delete(b"p1").unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();
        commit(&store, &[("data", "three")], None);

        assert_eq!(store.rollback("p1", 20).unwrap(), c1);
    }

    #[test]
    fn test_rollback_unavailable_leaves_store_untouched() {
        let (store, _dir) = create_test_store(2);
        commit(&store, &[("data", "one")], Some(5));
        let last = commit(&store, &[("data", "two")], Some(15));

        let result = store.rollback("p1", 5);

        assert!(matches!(result, Err(StoreError::RollbackUnavailable { .. })));
        assert_eq!(store.last_seq(), last);
        assert_eq!(store.commit_markers().unwrap().len(), 2);
        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"data").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_rollback_bad_watermark_encoding() {
        let (store, _dir) = create_test_store(2);
        commit(&store, &[("data", "one")], Some(5));
        let last = commit(&store, &[("p1", "oops")], None);

        assert!(matches!(
            store.rollback("p1", 20),
            Err(StoreError::Encoding { len: 4, .. })
        ));
        assert_eq!(store.last_seq(), last);
    }

    #[test]
    fn test_rollback_inconsistent_marker() {
        let (store, _dir) = create_test_store(2);
        commit(&store, &[("data", "one")], Some(5));
        commit(&store, &[("data", "two")], Some(15));

        let bad = CommitMarker {
            seq: SeqNum(3),
            kvs: vec![
                KvsMarker { name: "default".to_string(), seq: SeqNum(3) },
                KvsMarker { name: "extra".to_string(), seq: SeqNum(3) },
            ],
        };
        store.engine().put_raw_marker(&bad).unwrap();

        let result = store.rollback("p1", 20);

        assert!(matches!(
            result,
            Err(StoreError::Consistency { seq: SeqNum(3), sub_stores: 2 })
        ));
        assert_eq!(store.commit_markers().unwrap().len(), 3);
        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"data").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_rollback_returns_session() {
        let (store, _dir) = create_test_store(1);
        commit(&store, &[("data", "one")], Some(5));

        assert!(store.rollback("p1", 1).is_err());
        assert_eq!(store.pool_stats().idle, 1);
        store.rollback("p1", 10).unwrap();
        assert_eq!(store.pool_stats().idle, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (store, _dir) = create_test_store(2);
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.reader(), Err(StoreError::Closed)));
        assert!(matches!(store.writer(), Err(StoreError::Closed)));
        assert!(matches!(store.rollback("p1", 1), Err(StoreError::Closed)));
    }

    #[test]
    fn test_open_with_options() {
        let dir = TempDir::new().unwrap();
        let mut options = Options::new();
        options.insert("path".to_string(), dir.path().to_string_lossy().into_owned().into());
        options.insert("create_if_missing".to_string(), true.into());
        options.insert("num_concurrent".to_string(), 3u32.into());

        let store = Store::open_with_options(Some(Arc::new(ConcatMerge)), &options).unwrap();
        assert_eq!(store.pool_stats().capacity, 3);
        assert_eq!(store.merge_operator().map(|mo| mo.name()), Some("concat"));
        store.close().unwrap();
    }

    #[test]
    fn test_reader_keeps_view_across_rollback() {
        let (store, _dir) = create_test_store(3);
        commit(&store, &[("data", "one")], Some(5));
        commit(&store, &[("data", "two")], Some(15));
        let c3 = commit(&store, &[("data", "three")], Some(25));

        let reader = store.reader().unwrap();
        let rolled_to = store.rollback("p1", 10).unwrap();
        let later = commit(&store, &[("data", "later")], None);

        assert!(later > c3);
        assert_eq!(reader.seq().unwrap(), c3);
        assert_eq!(reader.get(b"data").unwrap(), Some(b"three".to_vec()));
        assert_eq!(reader.get(b"p1").unwrap(), Some(encode_watermark(25).to_vec()));

        let fresh = store.reader().unwrap();
        assert_eq!(fresh.get(b"data").unwrap(), Some(b"later".to_vec()));
        assert_eq!(fresh.get(b"p1").unwrap(), Some(encode_watermark(5).to_vec()));

        let seqs: Vec<_> = store.commit_markers().unwrap().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![later, rolled_to]);
    }

    #[test]
    fn test_close_releases_path() {
        let (store, dir) = create_test_store(2);
        commit(&store, &[("key", "value")], None);
        let mut reader = store.reader().unwrap();

        store.close().unwrap();
        assert!(matches!(reader.get(b"key"), Err(StoreError::Engine(_))));

        let reopened = Store::open(StoreConfig::new(dir.path()), None).unwrap();
        let fresh = reopened.reader().unwrap();
        assert_eq!(fresh.get(b"key").unwrap(), Some(b"value".to_vec()));

        reader.close().unwrap();
        assert!(store.is_closed());
    }

    #[test]
    fn test_batch_merge_conflict_counts_base_once() {
        let (store, _dir) = create_test_store_with_merge(2, Some(Arc::new(U64AddMerge)));
        let mut seed = store.writer().unwrap();
        seed.set(b"count", &10u64.to_be_bytes()).unwrap();
        seed.commit().unwrap();
        seed.close().unwrap();

        let mut first = store.writer().unwrap();
        let mut second = store.writer().unwrap();
        let mut plus_three = Batch::new();
        plus_three.merge(&b"count"[..], 3u64.to_be_bytes().to_vec());
        let mut plus_four = Batch::new();
        plus_four.merge(&b"count"[..], 4u64.to_be_bytes().to_vec());

        first.apply(&plus_three).unwrap();
        second.apply(&plus_four).unwrap();
        second.commit().unwrap();
        first.commit().unwrap();
        drop(first);
        drop(second);

        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"count").unwrap(), Some(17u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn test_batch_merge_conflict_concat() {
        let (store, _dir) = create_test_store_with_merge(2, Some(Arc::new(ConcatMerge)));
        commit(&store, &[("key", "a")], None);

        let mut first = store.writer().unwrap();
        let mut second = store.writer().unwrap();
        let mut append_x = Batch::new();
        append_x.merge(&b"key"[..], &b"x"[..]);
        let mut append_y = Batch::new();
        append_y.merge(&b"key"[..], &b"y"[..]);

        first.apply(&append_x).unwrap();
        second.apply(&append_y).unwrap();
        assert_eq!(first.get(b"key").unwrap(), Some(b"ax".to_vec()));
        second.commit().unwrap();
        first.commit().unwrap();
        drop(first);
        drop(second);

        let reader = store.reader().unwrap();
        assert_eq!(reader.get(b"key").unwrap(), Some(b"ayx".to_vec()));
    }

    #[test]
    fn test_failed_batch_buffers_nothing() {
        let reject = FnMerge::new(
            "reject",
            |_key: &[u8], _existing: Option<&[u8]>, _operand: &[u8]| None,
        );
        let (store, _dir) = create_test_store_with_merge(1, Some(Arc::new(reject)));

        let mut writer = store.writer().unwrap();
        writer.set(b"a", b"kept").unwrap();

        let mut batch = Batch::new();
        batch
            .set(&b"b"[..], &b"new"[..])
            .merge(&b"a"[..], &b"boom"[..]);
        assert!(matches!(
            writer.apply(&batch),
            Err(StoreError::Engine(EngineError::MergeFailed { .. }))
        ));

        assert_eq!(writer.pending().unwrap(), 1);
        assert_eq!(writer.get(b"a").unwrap(), Some(b"kept".to_vec()));
        assert_eq!(writer.get(b"b").unwrap(), None);
    }
}
