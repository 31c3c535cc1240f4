// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Commit marker records.
//!
//! One marker is written in the same batch as each commit.
//! Key: `[seq:u64 BE]`. Value: `[count:u32 BE]` followed by `count` entries of
//! `[name_len:u16 BE][name bytes][seq:u64 BE]`, one per sub-store committed.

use super::{EngineError, SeqNum};

/// Commit point of one sub-store within a commit marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvsMarker {
    pub name: String,
    pub seq: SeqNum,
}

/// A durable record of a completed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMarker {
    /// Store-wide sequence number of the commit.
    pub seq: SeqNum,
    /// Per-sub-store commit points.
    pub kvs: Vec<KvsMarker>,
}

impl CommitMarker {
    /// Creates a marker for a single-namespace commit.
    pub fn single(name: impl Into<String>, seq: SeqNum) -> Self {
        Self {
            seq,
            kvs: vec![KvsMarker {
                name: name.into(),
                seq,
            }],
        }
    }

    /// Number of sub-stores this commit covered.
    #[inline]
    pub fn sub_store_count(&self) -> usize {
        self.kvs.len()
    }
}

/// Encodes the RocksDB key of a marker.
#[inline]
pub fn marker_key(seq: SeqNum) -> [u8; 8] {
    seq.get().to_be_bytes()
}

/// Encodes a marker's value.
pub fn encode_marker(marker: &CommitMarker) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + marker.kvs.len() * 24);
    out.extend_from_slice(&(marker.kvs.len() as u32).to_be_bytes());
    for kvs in &marker.kvs {
        let name = kvs.name.as_bytes();
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&kvs.seq.get().to_be_bytes());
    }
    out
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        if self.buf.len() < n {
            return Err(EngineError::Corruption(format!(
                "commit marker truncated: need {} bytes, have {}",
                n,
                self.buf.len()
            )));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16, EngineError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, EngineError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, EngineError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }
}

/// Decodes a marker from its RocksDB key and value.
pub fn decode_marker(key: &[u8], value: &[u8]) -> Result<CommitMarker, EngineError> {
    let seq_bytes: [u8; 8] = key.try_into().map_err(|_| {
        EngineError::Corruption(format!("commit marker key has {} bytes", key.len()))
    })?;
    let seq = SeqNum(u64::from_be_bytes(seq_bytes));

    let mut cursor = Cursor { buf: value };
    let count = cursor.u32()? as usize;
    let mut kvs = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name_len = cursor.u16()? as usize;
        let name = String::from_utf8(cursor.take(name_len)?.to_vec()).map_err(|e| {
            EngineError::Corruption(format!("commit marker name is not utf-8: {}", e))
        })?;
        let kvs_seq = SeqNum(cursor.u64()?);
        kvs.push(KvsMarker { name, seq: kvs_seq });
    }
    if !cursor.buf.is_empty() {
        return Err(EngineError::Corruption(format!(
            "commit marker {} has {} trailing bytes",
            seq,
            cursor.buf.len()
        )));
    }

    Ok(CommitMarker { seq, kvs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_marker() {
        let marker = CommitMarker::single("default", SeqNum(5));
        assert_eq!(marker.sub_store_count(), 1);
        assert_eq!(marker.kvs[0].seq, SeqNum(5));

        let decoded = decode_marker(&marker_key(SeqNum(5)), &encode_marker(&marker)).unwrap();
        assert_eq!(decoded, marker);
    }

    #[test]
    fn test_multi_kvs_marker() {
        let marker = CommitMarker {
            seq: SeqNum(9),
            kvs: vec![
                KvsMarker { name: "a".to_string(), seq: SeqNum(8) },
                KvsMarker { name: "b".to_string(), seq: SeqNum(9) },
            ],
        };
        let decoded = decode_marker(&marker_key(SeqNum(9)), &encode_marker(&marker)).unwrap();
        assert_eq!(decoded.sub_store_count(), 2);
        assert_eq!(decoded, marker);
    }

    #[test]
    fn test_marker_keys_sort_by_seq() {
        assert!(marker_key(SeqNum(2)) < marker_key(SeqNum(10)));
    }

    #[test]
    fn test_truncated_marker() {
        let mut raw = encode_marker(&CommitMarker::single("default", SeqNum(1)));
        raw.pop();
        assert!(matches!(
            decode_marker(&marker_key(SeqNum(1)), &raw),
            Err(EngineError::Corruption(_))
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut raw = encode_marker(&CommitMarker::single("default", SeqNum(1)));
        raw.push(0);
        assert!(decode_marker(&marker_key(SeqNum(1)), &raw).is_err());
    }

    #[test]
    fn test_bad_key_length() {
        let raw = encode_marker(&CommitMarker::single("default", SeqNum(1)));
        assert!(decode_marker(&[0, 1], &raw).is_err());
    }
}
