// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Watermark-driven partition rollback.
//!
//! The commit history is scanned newest first. For every marker a snapshot
//! is opened at the marker's sequence number and the partition's watermark is
//! read from it. The first marker whose watermark lies strictly below the
//! target is the rollback point, so the newest satisfying commit wins and the
//! least data is discarded.
//!
//! Each marker yields one [`ScanStep`]:
//!
//! - `Continue`: snapshot unavailable, watermark missing or unreadable, or
//!   watermark not below the target.
//! - `Abort`: the marker covers more than one sub-store, or the watermark is
//!   not a valid 8-byte integer. Nothing is changed.
//! - `Found`: roll the engine back to this marker.
//!
//! Open readers keep their view across a rollback. Rolling back while other
//! writers commit is racy: a commit that lands after the marker list was read
//! is newer than the chosen point and is discarded along with everything else
//! above it. Callers quiesce writers first.

use tracing::{debug, info, warn};

use crate::engine::{CommitMarker, EngineSession, EngineSnapshot, SeqNum, SnapshotPoint};

use super::watermark::decode_watermark;
use super::StoreError;

/// Outcome of inspecting one commit marker.
#[derive(Debug)]
pub(crate) enum ScanStep {
    Continue,
    Abort(StoreError),
    Found(SeqNum),
}

/// Decides what a single marker means for the rollback.
///
/// The snapshot opened here is always released before returning.
pub(crate) fn inspect_marker<S: EngineSession>(
    session: &S,
    marker: &CommitMarker,
    partition: &str,
    target: u64,
) -> ScanStep {
    let kvs = match marker.kvs.as_slice() {
        [only] => only,
        kvs => {
            return ScanStep::Abort(StoreError::Consistency {
                seq: marker.seq,
                sub_stores: kvs.len(),
            })
        }
    };

    let raw = {
        let snapshot = match session.snapshot(SnapshotPoint::At(kvs.seq)) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(seq = kvs.seq.get(), error = %err, "skipping marker: snapshot unavailable");
                return ScanStep::Continue;
            }
        };

        match snapshot.get(partition.as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(seq = kvs.seq.get(), "skipping marker: no watermark");
                return ScanStep::Continue;
            }
            Err(err) => {
                debug!(seq = kvs.seq.get(), error = %err, "skipping marker: watermark unreadable");
                return ScanStep::Continue;
            }
        }
    };

    let watermark = match decode_watermark(partition, &raw) {
        Ok(watermark) => watermark,
        Err(err) => return ScanStep::Abort(err),
    };

    if watermark < target {
        ScanStep::Found(kvs.seq)
    } else {
        ScanStep::Continue
    }
}

/// Rolls the store back to the newest commit whose watermark for
/// `partition` is below `target`.
pub(crate) fn rollback_partition<S: EngineSession>(
    session: &mut S,
    partition: &str,
    target: u64,
) -> Result<SeqNum, StoreError> {
    let markers = session.commit_markers()?;
    debug!(markers = markers.len(), "scanning commit history");

    for marker in &markers {
        match inspect_marker(&*session, marker, partition, target) {
            ScanStep::Continue => continue,
            ScanStep::Abort(err) => {
                warn!(seq = marker.seq.get(), error = %err, "rollback aborted");
                return Err(err);
            }
            ScanStep::Found(seq) => {
                session.rollback(seq)?;
                info!(seq = seq.get(), "rolled back partition");
                return Ok(seq);
            }
        }
    }

    Err(StoreError::RollbackUnavailable {
        partition: partition.to_string(),
        target,
    })
}
