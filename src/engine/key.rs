// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Versioned key encoding and decoding.
//!
//! Format: `[escaped key][0x00 0x01][MAX-seq:u64 BE]`
//!
//! Inside the escaped key every `0x00` byte is written as `0x00 0xFF`, and the
//! key is closed by `0x00 0x01`. This keeps user keys in plain lexicographic
//! order under RocksDB's byte-wise comparator, prefixes included. The sequence
//! number is inverted so that newer versions of the same key sort first.
//!
//! Values carry a one-byte tag so that deletions can be stored as versions.

use super::{EngineError, SeqNum};

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

const TAG_TOMBSTONE: u8 = 0;
const TAG_LIVE: u8 = 1;

fn escape_into(key: &[u8], out: &mut Vec<u8>) {
    for &b in key {
        if b == ESCAPE {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
}

/// Returns the encoded form of `key` without its terminator.
///
/// Every version of every user key `>= key` sorts at or after this value,
/// which makes it the seek position for range scans.
#[inline]
pub fn scan_start(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 2);
    escape_into(key, &mut out);
    out
}

/// Returns the prefix shared by all versions of exactly `key`.
#[inline]
pub fn user_key_prefix(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 2);
    escape_into(key, &mut out);
    out.push(ESCAPE);
    out.push(TERMINATOR);
    out
}

/// Encodes a user key at a sequence number into a RocksDB key.
#[inline]
pub fn encode_version_key(key: &[u8], seq: SeqNum) -> Vec<u8> {
    let mut out = user_key_prefix(key);
    out.extend_from_slice(&(u64::MAX - seq.get()).to_be_bytes());
    out
}

/// Unescapes the user key at the head of `encoded`.
///
/// Returns the user key and the offset just past its terminator.
fn split_user_key(encoded: &[u8]) -> Result<(Vec<u8>, usize), EngineError> {
    let mut key = Vec::with_capacity(encoded.len());
    let mut i = 0;
    while i < encoded.len() {
        let b = encoded[i];
        if b != ESCAPE {
            key.push(b);
            i += 1;
            continue;
        }
        match encoded.get(i + 1) {
            Some(&ESCAPED_ZERO) => {
                key.push(ESCAPE);
                i += 2;
            }
            Some(&TERMINATOR) => return Ok((key, i + 2)),
            Some(other) => {
                return Err(EngineError::InvalidKeyEncoding(format!(
                    "invalid escape byte {:#04x} at offset {}",
                    other,
                    i + 1
                )))
            }
            None => break,
        }
    }
    Err(EngineError::InvalidKeyEncoding(
        "missing key terminator".to_string(),
    ))
}

/// Extracts the user key from an encoded version key.
#[inline]
pub fn extract_user_key(encoded: &[u8]) -> Result<Vec<u8>, EngineError> {
    split_user_key(encoded).map(|(key, _)| key)
}

/// Decodes a RocksDB key back into user key and sequence number.
pub fn decode_version_key(encoded: &[u8]) -> Result<(Vec<u8>, SeqNum), EngineError> {
    let (key, offset) = split_user_key(encoded)?;
    let suffix: [u8; 8] = encoded[offset..].try_into().map_err(|_| {
        EngineError::InvalidKeyEncoding(format!(
            "expected 8 sequence bytes, got {}",
            encoded.len() - offset
        ))
    })?;
    Ok((key, SeqNum(u64::MAX - u64::from_be_bytes(suffix))))
}

/// Returns the smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty or all-`0xFF` prefix).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Encodes a stored value; `None` is a tombstone.
#[inline]
pub fn encode_value(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        Some(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(TAG_LIVE);
            out.extend_from_slice(bytes);
            out
        }
        None => vec![TAG_TOMBSTONE],
    }
}

/// Decodes a stored value; `None` is a tombstone.
#[inline]
pub fn decode_value(raw: &[u8]) -> Result<Option<&[u8]>, EngineError> {
    match raw.split_first() {
        Some((&TAG_LIVE, rest)) => Ok(Some(rest)),
        Some((&TAG_TOMBSTONE, [])) => Ok(None),
        Some((tag, _)) => Err(EngineError::Corruption(format!(
            "unexpected value tag {:#04x}",
            tag
        ))),
        None => Err(EngineError::Corruption("empty stored value".to_string())),
    }
}
