// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Merge operators for resolving concurrent writes.
//!
//! A merge operator is consulted in two places:
//!
//! - `Merge` operations in a writer batch, combining the operand with the value
//!   the writer currently sees.
//! - Commit-time conflict resolution, when another writer committed the same
//!   key after this writer's lease began.

use std::fmt;

/// Combines an existing value with an incoming one.
pub trait MergeOperator: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Merges `operand` into `existing`.
    ///
    /// Returns `None` if the inputs cannot be merged; the surrounding batch or
    /// commit then fails without applying anything.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>>;
}

/// A merge operator backed by a closure.
pub struct FnMerge<F> {
    name: String,
    f: F,
}

impl<F> FnMerge<F>
where
    F: Fn(&[u8], Option<&[u8]>, &[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    /// Wraps `f` under the given name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> MergeOperator for FnMerge<F>
where
    F: Fn(&[u8], Option<&[u8]>, &[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        (self.f)(key, existing, operand)
    }
}

impl<F> fmt::Debug for FnMerge<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMerge").field("name", &self.name).finish()
    }
}

/// Appends the operand to the existing value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatMerge;

impl MergeOperator for ConcatMerge {
    fn name(&self) -> &str {
        "concat"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        let mut out = existing.map(<[u8]>::to_vec).unwrap_or_default();
        out.extend_from_slice(operand);
        Some(out)
    }
}

/// Adds big-endian `u64` counters, wrapping on overflow.
///
/// Fails when either side is not exactly eight bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64AddMerge;

impl MergeOperator for U64AddMerge {
    fn name(&self) -> &str {
        "u64add"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        let base = match existing {
            Some(raw) => u64::from_be_bytes(raw.try_into().ok()?),
            None => 0,
        };
        let delta = u64::from_be_bytes(operand.try_into().ok()?);
        Some(base.wrapping_add(delta).to_be_bytes().to_vec())
    }
}
