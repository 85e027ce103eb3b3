use serde::{Deserialize, Serialize};

/// Maps an arbitrary input string to a shard in `[0, total_shards)`.
pub trait Sharder {
    /// Shard of `input`. `total_shards` must be non-zero.
    fn get_shard(&self, input: &str, total_shards: u32) -> u32;
}

/// The default (and only) production sharder.
///
/// The hash and byte interpretation are shared with every other client that talks to the same
/// control plane, so they must never change: MD5 of the input, first four bytes read as a
/// big-endian `u32`, modulo `total_shards`.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: &str, total_shards: u32) -> u32 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        value % total_shards
    }
}

/// Lowercase hex MD5 of `input`. Overrides are keyed by this hash of the subject key.
pub(crate) fn content_hash(input: &str) -> String {
    format!("{:x}", md5::compute(input))
}

/// Half-open shard range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    /// First shard in the range.
    pub start: u32,
    /// One past the last shard in the range.
    pub end: u32,
}

impl ShardRange {
    /// Create the range `[start, end)`.
    pub fn new(start: u32, end: u32) -> Self {
        ShardRange { start, end }
    }

    /// Returns `true` if `start <= shard < end`.
    pub fn contains(&self, shard: u32) -> bool {
        self.start <= shard && shard < self.end
    }
}

#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<String, u32>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: &str, total_shards: u32) -> u32 {
        self.0.get(input).copied().unwrap_or(0) % total_shards
    }
}
