// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Partition watermark encoding.
//!
//! A watermark is stored as the value of the partition id key: an 8-byte
//! big-endian `u64` holding the highest sequence number known safe for that
//! partition.

use super::StoreError;

/// Encoded width of a watermark.
pub const WATERMARK_LEN: usize = 8;

/// Encodes a watermark value.
#[inline]
pub fn encode_watermark(seq: u64) -> [u8; WATERMARK_LEN] {
    seq.to_be_bytes()
}

/// Decodes the watermark stored for `partition`.
///
/// Anything other than exactly eight bytes is a format violation.
pub fn decode_watermark(partition: &str, raw: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; WATERMARK_LEN] = raw.try_into().map_err(|_| StoreError::Encoding {
        partition: partition.to_string(),
        len: raw.len(),
    })?;
    Ok(u64::from_be_bytes(bytes))
}
