//! Pairing functions between vertex pairs and frequency-vector indices.
//!
//! The sketch simulates a vector with one slot per possible undirected
//! edge. The triangular pairing below is the dense bijection used on the
//! hot path; the concatenation pairing is a sparse alternative kept for
//! debugging and verification.

use crate::types::{Edge, EdgeIndex, NodeId};

/// Length of the simulated frequency vector for an `n`-vertex graph.
pub fn vector_len(num_nodes: NodeId) -> u64 {
    let n = num_nodes as u64;
    if n < 2 {
        return 0;
    }
    n * (n - 1) / 2
}

/// Maps an unordered non-self pair to `lo + hi*(hi-1)/2`.
///
/// Total and injective for `0 <= i != j`; orientation-independent.
pub fn edge_index(i: NodeId, j: NodeId) -> EdgeIndex {
    debug_assert_ne!(i, j, "self edges have no index");
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    let (lo, hi) = (lo as u64, hi as u64);
    lo + hi * (hi - 1) / 2
}

/// Inverts [`edge_index`], returning the endpoints in lexicographic order.
pub fn invert_edge_index(idx: EdgeIndex) -> Edge {
    // hi is the largest integer with hi*(hi-1)/2 <= idx. The discriminant
    // is computed in floating point (8*idx overflows u64 near the top of
    // the domain) and corrected below.
    let mut hi = (((8.0 * idx as f64 + 1.0).sqrt() + 1.0) / 2.0) as u64;
    while hi * (hi - 1) / 2 > idx {
        hi -= 1;
    }
    while (hi + 1) * hi / 2 <= idx {
        hi += 1;
    }
    let lo = idx - hi * (hi - 1) / 2;
    Edge::new(lo as NodeId, hi as NodeId)
}

/// Concatenation pairing: `(lo << 32) | hi`.
pub fn concat_index(i: NodeId, j: NodeId) -> EdgeIndex {
    debug_assert_ne!(i, j, "self edges have no index");
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    ((lo as u64) << 32) | hi as u64
}

/// Inverts [`concat_index`].
pub fn invert_concat_index(idx: EdgeIndex) -> Edge {
    Edge::new((idx >> 32) as NodeId, (idx & 0xffff_ffff) as NodeId)
}
