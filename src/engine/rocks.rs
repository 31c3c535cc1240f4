// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed sequence-numbered engine.
//!
//! Every committed write is stored as a version tagged with its commit
//! sequence number. Readers pin a [`View`]: the newest visible commit plus the
//! commits hidden by rollbacks. Sequence numbers are allocated from a
//! persisted high-water mark that never rewinds, so a commit made after a
//! rollback can never land inside a view taken before it.
//!
//! Rollback hides the discarded commits at once and deletes their versions
//! when no reader pinned before the rollback is left.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch, WriteOptions, DEFAULT_COLUMN_FAMILY_NAME,
};
use tracing::{debug, info, warn};

use crate::merge::MergeOperator;

use super::{
    decode_marker, decode_value, decode_version_key, encode_marker, encode_value,
    encode_version_key, extract_user_key, marker_key, scan_start, user_key_prefix,
    CommitMarker, Engine, EngineError, EngineSession, EngineSnapshot, Mutation, SeqNum,
    SnapshotPoint, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

/// Column family holding commit markers.
pub const MARKERS_CF: &str = "commit_markers";

/// Column family holding the sequence high-water mark and pending rollbacks.
pub const META_CF: &str = "meta";

/// Name recorded for the single sub-store in every commit marker.
pub const DEFAULT_KVS_NAME: &str = "default";

const HIGH_WATER_KEY: &[u8] = b"high_water";
const DISCARD_PREFIX: &[u8] = b"discard/";

type Db = DBWithThreadMode<MultiThreaded>;

/// Durability mode for commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Commits are written to the WAL but not fsynced.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Every commit is fsynced.
    FsyncEveryWrite,
}

/// Background compaction behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionMode {
    #[default]
    Auto,
    Manual,
}

/// Engine-level options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Create the database if the path does not exist.
    pub create_if_missing: bool,
    /// Compaction behaviour.
    pub compaction_mode: CompactionMode,
    /// Commit durability.
    pub durability: DurabilityMode,
    /// Memtable size in bytes (None = RocksDB default).
    pub write_buffer_size: Option<usize>,
    /// Bloom filter bits per key (None = no filter).
    pub bloom_filter_bits: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            compaction_mode: CompactionMode::Auto,
            durability: DurabilityMode::WalOnly,
            write_buffer_size: None,
            bloom_filter_bits: Some(10.0),
        }
    }
}

impl EngineConfig {
    /// Sets whether a missing database is created.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets the commit durability mode.
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the compaction mode.
    pub fn with_compaction_mode(mut self, mode: CompactionMode) -> Self {
        self.compaction_mode = mode;
        self
    }

    /// Sets the memtable size.
    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = Some(bytes);
        self
    }

    /// Sets the bloom filter bits per key.
    pub fn with_bloom_filter_bits(mut self, bits: f64) -> Self {
        self.bloom_filter_bits = Some(bits);
        self
    }

    fn to_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(self.create_if_missing);
        opts.create_missing_column_families(true);
        opts.set_disable_auto_compactions(self.compaction_mode == CompactionMode::Manual);
        opts.set_level_compaction_dynamic_level_bytes(true);

        if let Some(size) = self.write_buffer_size {
            opts.set_write_buffer_size(size);
        }

        if let Some(bits) = self.bloom_filter_bits {
            let mut block_opts = BlockBasedOptions::default();
            block_opts.set_bloom_filter(bits, false);
            opts.set_block_based_table_factory(&block_opts);
        }

        opts
    }
}

fn validate_key(key: &[u8]) -> Result<(), EngineError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn validate_value(value: &[u8]) -> Result<(), EngineError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(EngineError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn be_u64(raw: &[u8]) -> Result<u64, EngineError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| EngineError::Corruption(format!("expected 8 bytes, got {}", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

fn column_family<'a>(
    db: &'a Db,
    name: &'static str,
) -> Result<Arc<BoundColumnFamily<'a>>, EngineError> {
    db.cf_handle(name).ok_or(EngineError::MissingColumnFamily(name))
}

/// Commits discarded by one rollback: sequence numbers in `(after, through]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Discarded {
    after: SeqNum,
    through: SeqNum,
    /// First view epoch that hides the range.
    epoch: u64,
}

impl Discarded {
    fn contains(&self, seq: SeqNum) -> bool {
        seq > self.after && seq <= self.through
    }

    fn meta_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(DISCARD_PREFIX.len() + 16);
        key.extend_from_slice(DISCARD_PREFIX);
        key.extend_from_slice(&self.after.get().to_be_bytes());
        key.extend_from_slice(&self.through.get().to_be_bytes());
        key
    }

    fn from_meta_key(key: &[u8], epoch: u64) -> Result<Self, EngineError> {
        let raw = key
            .strip_prefix(DISCARD_PREFIX)
            .filter(|raw| raw.len() == 16)
            .ok_or_else(|| EngineError::Corruption(format!("bad discard record {:?}", key)))?;
        let (after, through) = raw.split_at(8);
        Ok(Self {
            after: SeqNum(be_u64(after)?),
            through: SeqNum(be_u64(through)?),
            epoch,
        })
    }
}

/// What a reader observes.
#[derive(Debug, Clone, Default)]
struct View {
    /// Newest visible commit.
    seq: SeqNum,
    /// Bumped by every rollback.
    epoch: u64,
    /// Rolled back commits whose versions still exist on disk.
    discarded: Arc<Vec<Discarded>>,
}

impl View {
    fn hides(&self, seq: SeqNum) -> bool {
        seq > self.seq || self.discarded.iter().any(|range| range.contains(seq))
    }
}

struct ViewState {
    view: View,
    /// Live snapshots per view epoch.
    pins: BTreeMap<u64, usize>,
}

impl ViewState {
    /// Discarded ranges that every pinned view already hides.
    fn purgeable(&self) -> Vec<Discarded> {
        let oldest_pin = self.pins.keys().next().copied();
        self.view
            .discarded
            .iter()
            .filter(|range| oldest_pin.map_or(true, |epoch| epoch >= range.epoch))
            .copied()
            .collect()
    }
}

/// Newest version of `key` visible in `view`, with its sequence number.
fn visible_version(
    db: &Db,
    key: &[u8],
    view: &View,
) -> Result<Option<(SeqNum, Option<Vec<u8>>)>, EngineError> {
    validate_key(key)?;

    let prefix = user_key_prefix(key);
    let seek = encode_version_key(key, view.seq);
    for item in db.iterator(IteratorMode::From(&seek, Direction::Forward)) {
        let (encoded_key, value) = item?;
        if !encoded_key.starts_with(&prefix) {
            break;
        }
        let (_, seq) = decode_version_key(&encoded_key)?;
        if view.hides(seq) {
            continue;
        }
        return Ok(Some((seq, decode_value(&value)?.map(<[u8]>::to_vec))));
    }
    Ok(None)
}

fn read_at(db: &Db, key: &[u8], view: &View) -> Result<Option<Vec<u8>>, EngineError> {
    Ok(visible_version(db, key, view)?.and_then(|(_, value)| value))
}

fn scan_at(
    db: &Db,
    start: &[u8],
    end: Option<&[u8]>,
    limit: usize,
    view: &View,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
    let mut results = Vec::with_capacity(limit.min(1000));
    let mut decided: Option<Vec<u8>> = None;

    let seek = scan_start(start);
    for item in db.iterator(IteratorMode::From(&seek, Direction::Forward)) {
        if results.len() >= limit {
            break;
        }

        let (encoded_key, value) = item?;
        let user_key = extract_user_key(&encoded_key)?;

        if let Some(end) = end {
            if user_key.as_slice() >= end {
                break;
            }
        }

        // Newest visible version already handled for this key
        if decided.as_deref() == Some(user_key.as_slice()) {
            continue;
        }

        let (_, version_seq) = decode_version_key(&encoded_key)?;
        if view.hides(version_seq) {
            continue;
        }

        if let Some(live) = decode_value(&value)? {
            results.push((user_key.clone(), live.to_vec()));
        }
        decided = Some(user_key);
    }

    Ok(results)
}

fn marker_exists(db: &Db, seq: SeqNum) -> Result<bool, EngineError> {
    let cf = column_family(db, MARKERS_CF)?;
    Ok(db.get_cf(&cf, marker_key(seq))?.is_some())
}

fn load_markers(db: &Db) -> Result<Vec<CommitMarker>, EngineError> {
    let cf = column_family(db, MARKERS_CF)?;
    let mut markers = Vec::new();
    for item in db.iterator_cf(&cf, IteratorMode::End) {
        let (key, value) = item?;
        markers.push(decode_marker(&key, &value)?);
    }
    Ok(markers)
}

/// Folds merge operands into `existing`, oldest operand first.
fn fold_operands<'o>(
    operator: &dyn MergeOperator,
    key: &[u8],
    existing: Option<Vec<u8>>,
    operands: impl IntoIterator<Item = &'o [u8]>,
) -> Result<Option<Vec<u8>>, EngineError> {
    let mut acc = existing;
    for operand in operands {
        let merged = operator
            .full_merge(key, acc.as_deref(), operand)
            .ok_or_else(|| EngineError::MergeFailed {
                operator: operator.name().to_string(),
                key: key.to_vec(),
            })?;
        acc = Some(merged);
    }
    Ok(acc)
}

/// A session's buffered state for one key.
#[derive(Clone)]
enum Pending {
    Put(Vec<u8>),
    Delete,
    /// Operands applied on top of the committed value at commit time.
    Merge {
        operator: Arc<dyn MergeOperator>,
        operands: Vec<Vec<u8>>,
    },
}

impl Pending {
    fn from_value(value: Option<Vec<u8>>) -> Self {
        value.map_or(Pending::Delete, Pending::Put)
    }
}

/// Combines a key's buffered state with one more mutation.
fn stage(
    previous: Option<Pending>,
    mutation: Mutation<'_>,
    merge: Option<&Arc<dyn MergeOperator>>,
) -> Result<Pending, EngineError> {
    match mutation {
        Mutation::Set { value, .. } => {
            validate_value(value)?;
            Ok(Pending::Put(value.to_vec()))
        }
        Mutation::Delete { .. } => Ok(Pending::Delete),
        Mutation::Merge { key, operand } => {
            let operator = merge.ok_or_else(|| EngineError::MissingMergeOperator {
                key: key.to_vec(),
            })?;
            validate_value(operand)?;
            match previous {
                Some(Pending::Put(value)) => Ok(Pending::from_value(fold_operands(
                    operator.as_ref(),
                    key,
                    Some(value),
                    [operand],
                )?)),
                Some(Pending::Delete) => Ok(Pending::from_value(fold_operands(
                    operator.as_ref(),
                    key,
                    None,
                    [operand],
                )?)),
                Some(Pending::Merge {
                    operator,
                    mut operands,
                }) => {
                    operands.push(operand.to_vec());
                    Ok(Pending::Merge { operator, operands })
                }
                None => Ok(Pending::Merge {
                    operator: Arc::clone(operator),
                    operands: vec![operand.to_vec()],
                }),
            }
        }
    }
}

/// State shared by the engine, its sessions and their snapshots.
struct Shared {
    path: PathBuf,
    /// `None` once the engine is closed.
    db: RwLock<Option<Db>>,
    state: Mutex<ViewState>,
    /// Highest sequence number ever allocated.
    high_water: AtomicU64,
    commit_lock: Mutex<()>,
    write_opts: WriteOptions,
    sync_write_opts: WriteOptions,
}

impl Shared {
    fn db(&self) -> Result<MappedRwLockReadGuard<'_, Db>, EngineError> {
        RwLockReadGuard::try_map(self.db.read(), Option::as_ref).map_err(|_| EngineError::Closed)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.db.read().is_none() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn view(&self) -> View {
        self.state.lock().view.clone()
    }

    fn last_seq(&self) -> SeqNum {
        self.state.lock().view.seq
    }

    /// Returns the current view, holding back purges that would affect it.
    fn pin(&self) -> View {
        let mut state = self.state.lock();
        let view = state.view.clone();
        *state.pins.entry(view.epoch).or_insert(0) += 1;
        view
    }

    fn unpin(&self, epoch: u64) {
        let purge = {
            let mut state = self.state.lock();
            if let Some(count) = state.pins.get_mut(&epoch) {
                *count -= 1;
                if *count == 0 {
                    state.pins.remove(&epoch);
                }
            }
            !state.purgeable().is_empty()
        };
        if !purge {
            return;
        }

        let result = self.db().and_then(|db| self.purge(&db));
        match result {
            Ok(()) | Err(EngineError::Closed) => {}
            Err(err) => warn!(error = %err, "failed to purge rolled back versions"),
        }
    }

    /// Deletes the versions of every discarded range no pinned view can see.
    fn purge(&self, db: &Db) -> Result<(), EngineError> {
        let ranges = self.state.lock().purgeable();
        if ranges.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        let mut versions = 0usize;
        for item in db.iterator(IteratorMode::Start) {
            let (encoded_key, _) = item?;
            let (_, seq) = decode_version_key(&encoded_key)?;
            if ranges.iter().any(|range| range.contains(seq)) {
                batch.delete(&encoded_key);
                versions += 1;
            }
        }

        let meta = column_family(db, META_CF)?;
        for range in &ranges {
            batch.delete_cf(&meta, range.meta_key());
        }
        db.write_opt(batch, &self.sync_write_opts)?;

        {
            let mut state = self.state.lock();
            let remaining: Vec<Discarded> = state
                .view
                .discarded
                .iter()
                .filter(|range| !ranges.contains(range))
                .copied()
                .collect();
            state.view.discarded = Arc::new(remaining);
        }

        debug!(ranges = ranges.len(), versions, "purged rolled back versions");
        Ok(())
    }

    /// Returns the merged value when another session committed `key` after `base`.
    fn resolve_conflict(
        db: &Db,
        view: &View,
        merge: &dyn MergeOperator,
        key: &[u8],
        incoming: &[u8],
        base: SeqNum,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        match visible_version(db, key, view)? {
            Some((committed, Some(existing))) if committed > base => {
                debug!(
                    operator = merge.name(),
                    committed = committed.get(),
                    base = base.get(),
                    "resolving write conflict with merge operator"
                );
                fold_operands(merge, key, Some(existing), [incoming])
            }
            _ => Ok(None),
        }
    }

    fn commit(
        &self,
        pending: &BTreeMap<Vec<u8>, Pending>,
        base: SeqNum,
        merge: Option<&dyn MergeOperator>,
    ) -> Result<SeqNum, EngineError> {
        let db = self.db()?;
        let _guard = self.commit_lock.lock();
        let view = self.view();
        let seq = SeqNum(self.high_water.load(Ordering::Acquire)).next();

        let mut batch = WriteBatch::default();
        for (key, entry) in pending {
            let stored: Option<Cow<'_, [u8]>> = match entry {
                Pending::Put(value) => {
                    let resolved = match merge {
                        Some(mo) => Self::resolve_conflict(&db, &view, mo, key, value, base)?,
                        None => None,
                    };
                    Some(resolved.map_or(Cow::Borrowed(value.as_slice()), Cow::Owned))
                }
                Pending::Delete => None,
                Pending::Merge { operator, operands } => {
                    let existing = read_at(&db, key, &view)?;
                    fold_operands(
                        operator.as_ref(),
                        key,
                        existing,
                        operands.iter().map(Vec::as_slice),
                    )?
                    .map(Cow::Owned)
                }
            };
            batch.put(encode_version_key(key, seq), encode_value(stored.as_deref()));
        }

        let markers = column_family(&db, MARKERS_CF)?;
        let marker = CommitMarker::single(DEFAULT_KVS_NAME, seq);
        batch.put_cf(&markers, marker_key(seq), encode_marker(&marker));

        let meta = column_family(&db, META_CF)?;
        batch.put_cf(&meta, HIGH_WATER_KEY, seq.get().to_be_bytes());

        db.write_opt(batch, &self.write_opts)?;
        self.high_water.store(seq.get(), Ordering::Release);
        self.state.lock().view.seq = seq;

        debug!(seq = seq.get(), mutations = pending.len(), "committed");
        Ok(seq)
    }

    fn rollback(&self, target: SeqNum) -> Result<(), EngineError> {
        let db = self.db()?;
        let _guard = self.commit_lock.lock();
        let view = self.view();

        if target > view.seq || (target != SeqNum::ZERO && !marker_exists(&db, target)?) {
            return Err(EngineError::UnknownSequence { seq: target });
        }
        if target == view.seq {
            debug!(seq = target.get(), "rollback target is the newest commit");
            return Ok(());
        }

        let range = Discarded {
            after: target,
            through: view.seq,
            epoch: view.epoch + 1,
        };

        let mut batch = WriteBatch::default();
        let markers_cf = column_family(&db, MARKERS_CF)?;
        let first_discarded = marker_key(target.next());
        let mut markers = 0usize;
        for item in db.iterator_cf(
            &markers_cf,
            IteratorMode::From(&first_discarded, Direction::Forward),
        ) {
            let (key, _) = item?;
            batch.delete_cf(&markers_cf, &key);
            markers += 1;
        }
        let meta = column_family(&db, META_CF)?;
        batch.put_cf(&meta, range.meta_key(), b"");
        db.write_opt(batch, &self.sync_write_opts)?;

        {
            let mut state = self.state.lock();
            let mut discarded = state.view.discarded.as_ref().clone();
            discarded.push(range);
            state.view = View {
                seq: target,
                epoch: range.epoch,
                discarded: Arc::new(discarded),
            };
        }

        info!(
            path = %self.path.display(),
            seq = target.get(),
            discarded_through = view.seq.get(),
            markers,
            "rolled back engine"
        );

        // Already durable; leftover versions stay hidden and are purged later.
        if let Err(err) = self.purge(&db) {
            warn!(error = %err, "failed to purge rolled back versions");
        }
        Ok(())
    }
}

/// RocksDB storage engine.
///
/// The `default` column family holds versions, `commit_markers` holds one
/// marker per commit and `meta` holds the sequence high-water mark and
/// rollbacks whose versions are not purged yet.
pub struct RocksEngine {
    shared: Arc<Shared>,
}

impl RocksEngine {
    /// Opens the database at `path`.
    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self, EngineError> {
        let opts = config.to_options();
        let db = Db::open_cf(
            &opts,
            path,
            [DEFAULT_COLUMN_FAMILY_NAME, MARKERS_CF, META_CF],
        )?;

        let (last_seq, high_water, discarded) = {
            let markers = column_family(&db, MARKERS_CF)?;
            let last_seq = match db.iterator_cf(&markers, IteratorMode::End).next() {
                Some(item) => {
                    let (key, value) = item?;
                    decode_marker(&key, &value)?.seq
                }
                None => SeqNum::ZERO,
            };

            let meta = column_family(&db, META_CF)?;
            let stored = match db.get_cf(&meta, HIGH_WATER_KEY)? {
                Some(raw) => be_u64(&raw)?,
                None => 0,
            };

            let mut discarded = Vec::new();
            for item in db.iterator_cf(&meta, IteratorMode::From(DISCARD_PREFIX, Direction::Forward)) {
                let (key, _) = item?;
                if !key.starts_with(DISCARD_PREFIX) {
                    break;
                }
                discarded.push(Discarded::from_meta_key(&key, 0)?);
            }

            (last_seq, stored.max(last_seq.get()), discarded)
        };

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(config.durability == DurabilityMode::FsyncEveryWrite);

        let mut sync_write_opts = WriteOptions::default();
        sync_write_opts.set_sync(true);

        let pending_purges = discarded.len();
        let shared = Arc::new(Shared {
            path: path.to_path_buf(),
            db: RwLock::new(Some(db)),
            state: Mutex::new(ViewState {
                view: View {
                    seq: last_seq,
                    epoch: 0,
                    discarded: Arc::new(discarded),
                },
                pins: BTreeMap::new(),
            }),
            high_water: AtomicU64::new(high_water),
            commit_lock: Mutex::new(()),
            write_opts,
            sync_write_opts,
        });

        // Finish purges interrupted by a crash or close.
        if pending_purges > 0 {
            let db = shared.db()?;
            shared.purge(&db)?;
        }

        info!(
            path = %path.display(),
            last_seq = last_seq.get(),
            high_water,
            pending_purges,
            "opened rocksdb engine"
        );

        Ok(Self { shared })
    }

    /// Returns the database path.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Highest sequence number ever allocated, including rolled back commits.
    pub fn high_water(&self) -> SeqNum {
        SeqNum(self.shared.high_water.load(Ordering::Acquire))
    }

    /// Writes a commit marker directly, bypassing the commit path.
    #[cfg(test)]
    pub(crate) fn put_raw_marker(&self, marker: &CommitMarker) -> Result<(), EngineError> {
        let db = self.shared.db()?;
        let cf = column_family(&db, MARKERS_CF)?;
        db.put_cf(&cf, marker_key(marker.seq), encode_marker(marker))?;
        self.shared
            .high_water
            .fetch_max(marker.seq.get(), Ordering::AcqRel);
        let mut state = self.shared.state.lock();
        state.view.seq = state.view.seq.max(marker.seq);
        Ok(())
    }

    /// Number of stored versions, including hidden ones.
    #[cfg(test)]
    pub(crate) fn version_count(&self) -> Result<usize, EngineError> {
        let db = self.shared.db()?;
        let mut count = 0;
        for item in db.iterator(IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl Engine for RocksEngine {
    type Session = RocksSession;

    fn session(&self) -> Result<RocksSession, EngineError> {
        self.shared.ensure_open()?;
        Ok(RocksSession {
            shared: Arc::clone(&self.shared),
            pending: BTreeMap::new(),
            base: self.shared.last_seq(),
        })
    }

    fn last_seq(&self) -> SeqNum {
        self.shared.last_seq()
    }

    fn close(&self) -> Result<(), EngineError> {
        let mut slot = self.shared.db.write();
        let Some(db) = slot.as_ref() else {
            return Ok(());
        };

        db.flush()?;
        for name in [MARKERS_CF, META_CF] {
            let cf = column_family(db, name)?;
            db.flush_cf(&cf)?;
        }

        // Dropping the handle releases the database lock.
        *slot = None;
        info!(path = %self.shared.path.display(), "closed rocksdb engine");
        Ok(())
    }
}

/// A session on a [`RocksEngine`].
pub struct RocksSession {
    shared: Arc<Shared>,
    pending: BTreeMap<Vec<u8>, Pending>,
    /// Newest commit this session has observed.
    base: SeqNum,
}

impl EngineSession for RocksSession {
    type Snapshot = RocksSnapshot;

    fn reset(&mut self) {
        self.pending.clear();
        self.base = self.shared.last_seq();
    }

    fn snapshot(&self, point: SnapshotPoint) -> Result<RocksSnapshot, EngineError> {
        match point {
            SnapshotPoint::At(seq) if seq != SeqNum::ZERO => {
                let db = self.shared.db()?;
                if !marker_exists(&db, seq)? {
                    return Err(EngineError::SnapshotUnavailable { seq });
                }
            }
            _ => self.shared.ensure_open()?,
        }

        let mut snapshot = RocksSnapshot {
            shared: Arc::clone(&self.shared),
            view: self.shared.pin(),
        };

        if let SnapshotPoint::At(seq) = point {
            // A rollback may have discarded the marker since it was checked
            if snapshot.view.hides(seq) {
                return Err(EngineError::SnapshotUnavailable { seq });
            }
            snapshot.view.seq = seq;
        }
        Ok(snapshot)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        match self.pending.get(key) {
            Some(Pending::Put(value)) => Ok(Some(value.clone())),
            Some(Pending::Delete) => Ok(None),
            Some(Pending::Merge { operator, operands }) => {
                let db = self.shared.db()?;
                let existing = read_at(&db, key, &self.shared.view())?;
                fold_operands(
                    operator.as_ref(),
                    key,
                    existing,
                    operands.iter().map(Vec::as_slice),
                )
            }
            None => {
                let db = self.shared.db()?;
                read_at(&db, key, &self.shared.view())
            }
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.apply(&[Mutation::Set { key, value }], None)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), EngineError> {
        self.apply(&[Mutation::Delete { key }], None)
    }

    fn apply(
        &mut self,
        mutations: &[Mutation<'_>],
        merge: Option<&Arc<dyn MergeOperator>>,
    ) -> Result<(), EngineError> {
        let mut staged: BTreeMap<Vec<u8>, Pending> = BTreeMap::new();
        for mutation in mutations {
            let key = mutation.key();
            validate_key(key)?;
            let previous = staged
                .remove(key)
                .or_else(|| self.pending.get(key).cloned());
            staged.insert(key.to_vec(), stage(previous, *mutation, merge)?);
        }
        self.pending.extend(staged);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn commit(&mut self, merge: Option<&dyn MergeOperator>) -> Result<SeqNum, EngineError> {
        let seq = self.shared.commit(&self.pending, self.base, merge)?;
        self.pending.clear();
        self.base = seq;
        Ok(seq)
    }

    fn commit_markers(&self) -> Result<Vec<CommitMarker>, EngineError> {
        let db = self.shared.db()?;
        load_markers(&db)
    }

    fn rollback(&mut self, seq: SeqNum) -> Result<(), EngineError> {
        self.shared.rollback(seq)?;
        self.reset();
        Ok(())
    }
}

/// A snapshot bound to one sequence number.
///
/// The snapshot pins the view it was taken with. Later commits get higher
/// sequence numbers and versions discarded by a later rollback are kept until
/// the snapshot is dropped, so reads stay stable for its lifetime.
pub struct RocksSnapshot {
    shared: Arc<Shared>,
    view: View,
}

impl Drop for RocksSnapshot {
    fn drop(&mut self) {
        self.shared.unpin(self.view.epoch);
    }
}

impl EngineSnapshot for RocksSnapshot {
    fn seq(&self) -> SeqNum {
        self.view.seq
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let db = self.shared.db()?;
        read_at(&db, key, &self.view)
    }

    fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let db = self.shared.db()?;
        scan_at(&db, start, end, limit, &self.view)
    }
}



#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn snapshot_sees_exactly_its_commits(
            values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..8),
        ) {
            let dir = TempDir::new().unwrap();
            let config = EngineConfig::default().with_create_if_missing(true);
            let engine = RocksEngine::open(dir.path(), &config).unwrap();

            let mut session = engine.session().unwrap();
            let mut seqs = Vec::new();
            for value in &values {
                session.set(b"key", value).unwrap();
                seqs.push(session.commit(None).unwrap());
            }

            for (seq, value) in seqs.iter().zip(&values) {
                let snapshot = session.snapshot(SnapshotPoint::At(*seq)).unwrap();
                prop_assert_eq!(snapshot.get(b"key").unwrap(), Some(value.clone()));
            }
        }
    }
}
