//! Per-vertex stack of independent ℓ₀ sketches plus round bookkeeping.
//!
//! A supernode summarizes the adjacency of one vertex (or, after
//! Borůvka merging, of a whole component) in `ceil(log2 n) + 1`
//! independent sketches. Each connectivity round consumes exactly one
//! level per live supernode; a consumed level is never written or read
//! again, which keeps the surviving levels unconditioned and their
//! samples uniform.
//!
//! Level seeds are shared by every vertex — merging supernode stacks
//! across vertices is only meaningful when level ℓ hashes identically
//! everywhere.

use std::io::{Read, Write};

use rayon::prelude::*;

use crate::error::{GraphError, Result};
use crate::pairing::edge_index;
use crate::sketch::{ceil_log2, read_u32, read_u64, Sketch};
use crate::types::{EdgeIndex, NodeId, SketchSample, SupernodeSample};

/// Seed-space distance between consecutive sketch levels.
const SEED_STRIDE: u64 = 0x51_7c_c1_b7_27_22_0a_95;

fn level_seed(graph_seed: u64, level: usize) -> u64 {
    graph_seed.wrapping_add(SEED_STRIDE.wrapping_mul(level as u64))
}

/// Number of sketch levels for an `n`-vertex graph.
pub fn num_levels(num_nodes: NodeId) -> usize {
    ceil_log2(num_nodes as u64).max(1) as usize + 1
}

/// The per-vertex sketch stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supernode {
    num_nodes: NodeId,
    seed: u64,
    cursor: usize,
    sketches: Vec<Sketch>,
}

impl Supernode {
    pub fn new(num_nodes: NodeId, graph_seed: u64) -> Self {
        let sketches = (0..num_levels(num_nodes))
            .map(|l| Sketch::new(num_nodes, level_seed(graph_seed, l)))
            .collect();
        Self {
            num_nodes,
            seed: graph_seed,
            cursor: 0,
            sketches,
        }
    }

    pub fn num_nodes(&self) -> NodeId {
        self.num_nodes
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Levels not yet consumed by sampling.
    pub fn levels_remaining(&self) -> usize {
        self.sketches.len() - self.cursor
    }

    pub fn sketches_exhausted(&self) -> bool {
        self.cursor >= self.sketches.len()
    }

    /// True when every bucket of every level is zero.
    pub fn buckets_empty(&self) -> bool {
        self.sketches.iter().all(Sketch::buckets_empty)
    }

    /// Toggle one coordinate into every level.
    pub fn update(&mut self, idx: EdgeIndex) {
        for s in &mut self.sketches {
            s.update(idx);
        }
    }

    /// Consume one sketch level and try to isolate an incident edge.
    ///
    /// Walks the level's columns until one isolates a coordinate
    /// (`Good`), the fully-admitting column proves the vector empty
    /// (`Zero`), or the columns run out (`Fail` — the caller retries
    /// next round on the next level). `Exhausted` once no levels remain.
    pub fn sample(&mut self) -> SupernodeSample {
        if self.sketches_exhausted() {
            return SupernodeSample::Exhausted;
        }
        let s = &mut self.sketches[self.cursor];
        self.cursor += 1;
        loop {
            match s.sample() {
                SketchSample::Good(e) => return SupernodeSample::Good(e),
                SketchSample::Zero => return SupernodeSample::Zero,
                SketchSample::Fail => {
                    if s.columns_exhausted() {
                        return SupernodeSample::Fail;
                    }
                }
            }
        }
    }

    /// Pairwise merge of the live levels of `other` into `self`.
    ///
    /// Borůvka merges arrive with aligned cursors (every live
    /// representative samples once per round); delta supernodes arrive
    /// unconsumed. Either way only `self`'s live levels are touched.
    pub fn merge(&mut self, other: &Supernode) {
        debug_assert_eq!(self.seed, other.seed);
        debug_assert!(
            other.cursor == self.cursor || other.cursor == 0,
            "merging supernodes with divergent round histories"
        );
        for l in self.cursor..self.sketches.len() {
            self.sketches[l].merge(&other.sketches[l]);
        }
    }

    /// Zero all buckets and rewind the level cursor, keeping the
    /// allocation. Scratch supernodes are recycled through this.
    pub fn reset(&mut self) {
        self.cursor = 0;
        for s in &mut self.sketches {
            s.reset();
        }
    }

    /// Fill `out` with the sketch-sum of updates `(src, d)` for every
    /// destination in `dsts`, self-edges skipped.
    ///
    /// This is the batching hot path: the edge indices are computed
    /// once, then the independent levels are filled in parallel. `out`
    /// is caller-owned scratch so the calling worker reuses one
    /// allocation across batches.
    pub fn delta(num_nodes: NodeId, graph_seed: u64, src: NodeId, dsts: &[NodeId], out: &mut Supernode) {
        debug_assert_eq!(out.num_nodes, num_nodes);
        debug_assert_eq!(out.seed, graph_seed);
        out.reset();
        let indices: Vec<EdgeIndex> = dsts
            .iter()
            .filter(|&&d| d != src)
            .map(|&d| edge_index(src, d))
            .collect();
        out.sketches.par_iter_mut().for_each(|sketch| {
            for &idx in &indices {
                sketch.update(idx);
            }
        });
    }

    /// Dump `(num_nodes, seed, cursor, level_count)` then each level.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.num_nodes.to_le_bytes())?;
        w.write_all(&self.seed.to_le_bytes())?;
        w.write_all(&(self.cursor as u32).to_le_bytes())?;
        w.write_all(&(self.sketches.len() as u32).to_le_bytes())?;
        for s in &self.sketches {
            s.write_to(w)?;
        }
        Ok(())
    }

    /// Inverse of [`Supernode::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let num_nodes = read_u32(r)?;
        let seed = read_u64(r)?;
        let cursor = read_u32(r)? as usize;
        let levels = read_u32(r)? as usize;
        if levels == 0 || cursor > levels {
            return Err(GraphError::BadStateFile(format!(
                "supernode cursor {cursor} out of range for {levels} levels"
            )));
        }
        let mut sketches = Vec::with_capacity(levels);
        for _ in 0..levels {
            sketches.push(Sketch::read_from(r)?);
        }
        Ok(Self {
            num_nodes,
            seed,
            cursor,
            sketches,
        })
    }
}
