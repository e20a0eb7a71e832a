//! Seeded hash family backing the sketch buckets.
//!
//! Three independent roles, all drawn from xxh3 with derived seeds:
//!
//! - the *filter* hash, whose trailing-zero count decides how deep into
//!   the geometric column stack an index is admitted;
//! - the *placement* hash, choosing a bucket within an admitting column;
//! - the *checksum* hash, accumulated into `gamma` so a bucket can prove
//!   it holds a single odd-parity coordinate.

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::types::EdgeIndex;

// Seed-space separation between the hash roles of one sketch.
const FILTER_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const CHECKSUM_SALT: u64 = 0xc2b2_ae3d_27d4_eb4f;

fn hash(idx: EdgeIndex, seed: u64) -> u64 {
    xxh3_64_with_seed(&idx.to_le_bytes(), seed)
}

/// Number of leading columns of a sketch that admit `idx`.
///
/// An index is admitted into column `c` iff its filter hash has at least
/// `c` trailing zeros, so column 0 admits everything and each deeper
/// column halves the expected survivor count. Returns the deepest
/// admitting column, i.e. the trailing-zero count.
pub fn column_depth(idx: EdgeIndex, seed: u64) -> u32 {
    hash(idx, seed ^ FILTER_SALT).trailing_zeros()
}

/// Bucket slot for `idx` within column `col`.
pub fn bucket_slot(idx: EdgeIndex, seed: u64, col: u32, bkt_per_col: u32) -> usize {
    (hash(idx, seed.wrapping_add(col as u64)) % bkt_per_col as u64) as usize
}

/// Checksum accumulated into a bucket's `gamma`.
pub fn checksum(idx: EdgeIndex, seed: u64) -> u64 {
    hash(idx, seed ^ CHECKSUM_SALT)
}
