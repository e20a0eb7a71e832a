//! Single ℓ₀-sampler over the simulated edge-frequency vector.
//!
//! A sketch is a stack of `num_columns` columns, each holding
//! `bkt_per_col` buckets. Every update toggles the target index into one
//! bucket of every column that admits it under geometric subsampling, so
//! across columns the surviving density sweeps from "everything" down to
//! "expected constant", and some column isolates a single nonzero
//! coordinate with good probability.
//!
//! All accumulation is XOR, which makes updates commutative and lets two
//! same-seed sketches merge bucketwise. Duplicate insertions cancel:
//! only odd-parity coordinates are visible.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::hashing::{bucket_slot, checksum, column_depth};
use crate::pairing::{invert_edge_index, vector_len};
use crate::types::{EdgeIndex, NodeId, SketchSample};

/// Extra buckets per column beyond `ceil(log2 n)`, bounding the chance
/// that an isolated survivor shares its bucket.
const BUCKET_SLACK: u32 = 4;

/// One XOR accumulator cell.
///
/// `alpha` accumulates coordinate indices, `gamma` their checksums. A
/// bucket holding exactly one odd-parity coordinate satisfies
/// `gamma == checksum(alpha)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub alpha: u64,
    pub gamma: u64,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.alpha == 0 && self.gamma == 0
    }
}

pub(crate) fn ceil_log2(x: u64) -> u32 {
    match x {
        0 | 1 => 0,
        _ => 64 - (x - 1).leading_zeros(),
    }
}

/// An ℓ₀-sampler column stack with a one-column-per-call sample cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sketch {
    vector_len: u64,
    seed: u64,
    num_columns: u32,
    bkt_per_col: u32,
    cursor: u32,
    buckets: Vec<Bucket>,
}

impl Sketch {
    /// Build a zeroed sketch for an `n`-vertex graph.
    ///
    /// The column count is derived from the simulated vector length
    /// `n(n-1)/2` so that subsampling can thin a quadratic support down
    /// to constant density.
    pub fn new(num_nodes: NodeId, seed: u64) -> Self {
        let len = vector_len(num_nodes).max(1);
        let num_columns = ceil_log2(len).max(1);
        let bkt_per_col = ceil_log2(num_nodes as u64).max(1) + BUCKET_SLACK;
        Self {
            vector_len: len,
            seed,
            num_columns,
            bkt_per_col,
            cursor: 0,
            buckets: vec![Bucket::default(); (num_columns * bkt_per_col) as usize],
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn num_columns(&self) -> u32 {
        self.num_columns
    }

    pub fn bkt_per_col(&self) -> u32 {
        self.bkt_per_col
    }

    /// True once every column has been consumed by [`Sketch::sample`].
    pub fn columns_exhausted(&self) -> bool {
        self.cursor >= self.num_columns
    }

    /// True when every bucket is zero.
    pub fn buckets_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }

    #[inline]
    fn bucket_mut(&mut self, col: u32, slot: usize) -> &mut Bucket {
        &mut self.buckets[(col * self.bkt_per_col) as usize + slot]
    }

    fn column(&self, col: u32) -> &[Bucket] {
        let start = (col * self.bkt_per_col) as usize;
        &self.buckets[start..start + self.bkt_per_col as usize]
    }

    /// Toggle coordinate `idx`. O(`num_columns`) worst case; one filter
    /// hash decides how deep the index goes.
    pub fn update(&mut self, idx: EdgeIndex) {
        debug_assert!(idx < self.vector_len, "index outside simulated vector");
        let depth = column_depth(idx, self.seed);
        let last = depth.min(self.num_columns - 1);
        let check = checksum(idx, self.seed);
        for col in 0..=last {
            let slot = bucket_slot(idx, self.seed, col, self.bkt_per_col);
            let b = self.bucket_mut(col, slot);
            b.alpha ^= idx;
            b.gamma ^= check;
        }
    }

    /// Bucketwise XOR of `other` into `self`.
    ///
    /// Only sketches of the same shape and seed are ever merged; the
    /// supernode layer guarantees this by construction.
    pub fn merge(&mut self, other: &Sketch) {
        debug_assert_eq!(self.seed, other.seed, "merging differently-seeded sketches");
        debug_assert_eq!(self.num_columns, other.num_columns);
        debug_assert_eq!(self.bkt_per_col, other.bkt_per_col);
        for (b, o) in self.buckets.iter_mut().zip(&other.buckets) {
            b.alpha ^= o.alpha;
            b.gamma ^= o.gamma;
        }
    }

    /// Examine the next unconsumed column.
    ///
    /// Returns `Good` on the first bucket that provably holds a single
    /// odd-parity coordinate, `Zero` when the fully-admitting column 0
    /// is entirely empty (the represented vector is certainly zero), and
    /// `Fail` otherwise — including forever after the last column has
    /// been consumed.
    pub fn sample(&mut self) -> SketchSample {
        if self.columns_exhausted() {
            return SketchSample::Fail;
        }
        let col = self.cursor;
        self.cursor += 1;

        let mut all_empty = true;
        for slot in 0..self.bkt_per_col as usize {
            let b = self.column(col)[slot];
            if b.is_empty() {
                continue;
            }
            all_empty = false;
            if b.alpha < self.vector_len
                && b.gamma == checksum(b.alpha, self.seed)
                && column_depth(b.alpha, self.seed) >= col
                && bucket_slot(b.alpha, self.seed, col, self.bkt_per_col) == slot
            {
                return SketchSample::Good(invert_edge_index(b.alpha));
            }
        }
        // An empty deeper column only says the subsample is empty.
        if all_empty && col == 0 {
            SketchSample::Zero
        } else {
            SketchSample::Fail
        }
    }

    /// Zero the buckets and rewind the cursor, keeping shape and seed.
    /// Used to recycle delta-sketch scratch without reallocating.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.buckets.fill(Bucket::default());
    }

    /// Dump `(vector_len, seed, num_columns, bkt_per_col, cursor)` then
    /// the bucket array in column order, little-endian.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.vector_len.to_le_bytes())?;
        w.write_all(&self.seed.to_le_bytes())?;
        w.write_all(&self.num_columns.to_le_bytes())?;
        w.write_all(&self.bkt_per_col.to_le_bytes())?;
        w.write_all(&self.cursor.to_le_bytes())?;
        for b in &self.buckets {
            w.write_all(&b.alpha.to_le_bytes())?;
            w.write_all(&b.gamma.to_le_bytes())?;
        }
        Ok(())
    }

    /// Inverse of [`Sketch::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let vector_len = read_u64(r)?;
        let seed = read_u64(r)?;
        let num_columns = read_u32(r)?;
        let bkt_per_col = read_u32(r)?;
        let cursor = read_u32(r)?;
        if num_columns == 0 || bkt_per_col == 0 {
            return Err(GraphError::BadStateFile(format!(
                "degenerate sketch shape {num_columns}x{bkt_per_col}"
            )));
        }
        let count = num_columns as usize * bkt_per_col as usize;
        let mut buckets = Vec::with_capacity(count);
        for _ in 0..count {
            let alpha = read_u64(r)?;
            let gamma = read_u64(r)?;
            buckets.push(Bucket { alpha, gamma });
        }
        Ok(Self {
            vector_len,
            seed,
            num_columns,
            bkt_per_col,
            cursor,
            buckets,
        })
    }
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::edge_index;
    use crate::types::Edge;

    fn drain(s: &mut Sketch) -> Vec<SketchSample> {
        (0..s.num_columns()).map(|_| s.sample()).collect()
    }

    #[test]
    fn empty_sketch_samples_zero_then_fails() {
        let mut s = Sketch::new(64, 1234);
        assert_eq!(s.sample(), SketchSample::Zero);
        // later columns are subsample-empty, not definitive
        for r in drain(&mut s) {
            assert_eq!(r, SketchSample::Fail);
        }
        assert!(s.columns_exhausted());
        assert_eq!(s.sample(), SketchSample::Fail);
    }

    #[test]
    fn single_update_is_recovered() {
        let mut s = Sketch::new(64, 99);
        let idx = edge_index(3, 17);
        s.update(idx);
        let got = loop {
            match s.sample() {
                SketchSample::Good(e) => break e,
                SketchSample::Fail if !s.columns_exhausted() => continue,
                other => panic!("expected Good before exhaustion, got {other:?}"),
            }
        };
        assert_eq!(got, Edge::new(3, 17));
    }

    #[test]
    fn even_multiplicity_cancels() {
        let mut s = Sketch::new(32, 7);
        for _ in 0..2 {
            s.update(edge_index(0, 1));
        }
        for _ in 0..4 {
            s.update(edge_index(5, 9));
        }
        assert!(s.buckets_empty());
        assert_eq!(s.sample(), SketchSample::Zero);
    }

    #[test]
    fn sample_never_returns_cancelled_coordinate() {
        // one odd coordinate among several cancelled ones
        let mut s = Sketch::new(128, 2024);
        let odd = edge_index(10, 90);
        s.update(odd);
        for j in 1..40u32 {
            s.update(edge_index(0, j));
            s.update(edge_index(0, j));
        }
        while !s.columns_exhausted() {
            if let SketchSample::Good(e) = s.sample() {
                assert_eq!(edge_index(e.src, e.dst), odd);
            }
        }
    }

    #[test]
    fn merge_is_union_of_disjoint_streams() {
        let mut a = Sketch::new(64, 5);
        let mut b = Sketch::new(64, 5);
        a.update(edge_index(1, 2));
        b.update(edge_index(1, 2));
        b.update(edge_index(3, 4));
        a.merge(&b);
        // (1,2) cancelled across the merge, only (3,4) remains
        let mut found = None;
        while !a.columns_exhausted() {
            if let SketchSample::Good(e) = a.sample() {
                found = Some(e);
                break;
            }
        }
        assert_eq!(found, Some(Edge::new(3, 4)));
    }

    #[test]
    fn double_merge_cancels_to_zero() {
        // corruption detector from the test plan: merging the same sketch
        // twice XORs it out entirely
        let mut a = Sketch::new(64, 5);
        let mut b = Sketch::new(64, 5);
        b.update(edge_index(7, 12));
        b.update(edge_index(2, 40));
        a.merge(&b);
        a.merge(&b);
        assert!(a.buckets_empty());
    }

    #[test]
    fn serialization_round_trips() {
        let mut s = Sketch::new(100, 31337);
        for j in 1..30u32 {
            s.update(edge_index(0, j));
        }
        let _ = s.sample(); // cursor state must survive too
        let mut bytes = Vec::new();
        s.write_to(&mut bytes).unwrap();
        let back = Sketch::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn isolates_under_heavy_load() {
        // with ~200 survivors some deeper column should isolate; a single
        // seed can be unlucky, so require success for a majority of seeds
        let mut isolated = 0;
        for seed in 700..710u64 {
            let mut s = Sketch::new(256, seed);
            for j in 1..200u32 {
                s.update(edge_index(0, j));
            }
            while !s.columns_exhausted() {
                if let SketchSample::Good(e) = s.sample() {
                    assert_eq!(e.src, 0);
                    assert!((1..200).contains(&e.dst));
                    isolated += 1;
                    break;
                }
            }
        }
        assert!(isolated >= 7, "only {isolated}/10 seeds isolated a coordinate");
    }
}
