//! Disjoint-set forest with eager spanning-forest maintenance.
//!
//! The update fast path unions endpoints on every insert while the
//! stream is still deletion-free and acyclic, so connectivity queries
//! can be answered from the forest in near-constant time without
//! touching the sketches. The structure is shared across inserter
//! threads: `parent` is an array of atomics updated only by CAS, and
//! the per-vertex spanning-forest sets are guarded by per-vertex
//! mutexes keyed on the smaller endpoint.
//!
//! Validity is one-way. Any deletion, any duplicate of a recorded tree
//! edge (a parity cancellation), or any cycle-closing insert clears
//! `valid`; from then on only the sketch-based query path is exact.
//! The connectivity driver also reuses this structure serially, via
//! [`EagerDsu::reset`] and [`EagerDsu::union_roots`], to accumulate its
//! merge groups and emit the final partition.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::types::NodeId;

pub struct EagerDsu {
    parent: Vec<AtomicU32>,
    size: Vec<AtomicU32>,
    forest: Vec<Mutex<HashSet<NodeId>>>,
    valid: AtomicBool,
}

impl EagerDsu {
    pub fn new(num_nodes: NodeId) -> Self {
        let n = num_nodes as usize;
        Self {
            parent: (0..num_nodes).map(AtomicU32::new).collect(),
            size: (0..n).map(|_| AtomicU32::new(1)).collect(),
            forest: (0..n).map(|_| Mutex::new(HashSet::new())).collect(),
            valid: AtomicBool::new(true),
        }
    }

    /// True while the forest exactly mirrors the live graph.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// One-way switch to the sketch-based query path.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Root of `v`'s tree. Lock-free; path halving is written with CAS
    /// so a stale shortcut can never clobber a concurrent union.
    pub fn find(&self, mut v: NodeId) -> NodeId {
        loop {
            let p = self.parent[v as usize].load(Ordering::Acquire);
            if p == v {
                return v;
            }
            let gp = self.parent[p as usize].load(Ordering::Acquire);
            if gp == p {
                return p;
            }
            let _ = self.parent[v as usize].compare_exchange_weak(
                p,
                gp,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            v = gp;
        }
    }

    /// Eager update-path union for the insert of `{u, v}`.
    ///
    /// Serialized per smaller endpoint. A repeat of a recorded tree edge
    /// means the edge just cancelled out of the graph; a cycle-closing
    /// edge means the forest can no longer certify connectivity alone.
    /// Both clear `valid`.
    pub fn union_on_edge(&self, u: NodeId, v: NodeId) {
        debug_assert_ne!(u, v);
        let (lo, hi) = if u < v { (u, v) } else { (v, u) };
        let mut tree_edges = self.forest[lo as usize].lock();
        if !self.is_valid() {
            return;
        }
        if tree_edges.contains(&hi) {
            self.invalidate();
            return;
        }
        loop {
            let a = self.find(lo);
            let b = self.find(hi);
            if a == b {
                self.invalidate();
                return;
            }
            let (big, small) = if self.size[a as usize].load(Ordering::Relaxed)
                >= self.size[b as usize].load(Ordering::Relaxed)
            {
                (a, b)
            } else {
                (b, a)
            };
            // only a node that is still its own root may be re-parented
            if self.parent[small as usize]
                .compare_exchange(small, big, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let gained = self.size[small as usize].load(Ordering::Relaxed);
                self.size[big as usize].fetch_add(gained, Ordering::Relaxed);
                tree_edges.insert(hi);
                return;
            }
            // a concurrent union won the root; re-resolve and retry
        }
    }

    /// Serial reinitialization for the connectivity driver. Leaves the
    /// validity flag untouched.
    pub fn reset(&self) {
        for (i, p) in self.parent.iter().enumerate() {
            p.store(i as NodeId, Ordering::Relaxed);
        }
        for s in &self.size {
            s.store(1, Ordering::Relaxed);
        }
        for f in &self.forest {
            f.lock().clear();
        }
    }

    /// Driver-side union of two roots, by size. Single-threaded use.
    pub fn union_roots(&self, a: NodeId, b: NodeId) -> NodeId {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra as usize].load(Ordering::Relaxed)
            >= self.size[rb as usize].load(Ordering::Relaxed)
        {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small as usize].store(big, Ordering::Relaxed);
        let gained = self.size[small as usize].load(Ordering::Relaxed);
        self.size[big as usize].fetch_add(gained, Ordering::Relaxed);
        big
    }

    /// Partition of all vertices by tree, ordered by smallest member.
    pub fn components(&self) -> Vec<HashSet<NodeId>> {
        let mut by_root: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        for v in 0..self.parent.len() as NodeId {
            by_root.entry(self.find(v)).or_default().insert(v);
        }
        let mut comps: Vec<HashSet<NodeId>> = by_root.into_values().collect();
        comps.sort_by_key(|c| c.iter().min().copied());
        comps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn forest_inserts_keep_dsu_valid() {
        let dsu = EagerDsu::new(6);
        dsu.union_on_edge(0, 1);
        dsu.union_on_edge(1, 2);
        dsu.union_on_edge(4, 5);
        assert!(dsu.is_valid());
        assert_eq!(dsu.find(0), dsu.find(2));
        assert_ne!(dsu.find(0), dsu.find(4));
        assert_ne!(dsu.find(3), dsu.find(4));
    }

    #[test]
    fn cycle_closing_edge_invalidates() {
        let dsu = EagerDsu::new(3);
        dsu.union_on_edge(0, 1);
        dsu.union_on_edge(1, 2);
        assert!(dsu.is_valid());
        dsu.union_on_edge(0, 2);
        assert!(!dsu.is_valid());
    }

    #[test]
    fn duplicate_tree_edge_invalidates() {
        // the second insert of the same edge removes it by parity
        let dsu = EagerDsu::new(2);
        dsu.union_on_edge(0, 1);
        assert!(dsu.is_valid());
        dsu.union_on_edge(1, 0); // same undirected edge
        assert!(!dsu.is_valid());
    }

    #[test]
    fn components_group_by_tree() {
        let dsu = EagerDsu::new(5);
        dsu.union_on_edge(0, 1);
        dsu.union_on_edge(2, 3);
        let comps = dsu.components();
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[0], HashSet::from([0, 1]));
        assert_eq!(comps[1], HashSet::from([2, 3]));
        assert_eq!(comps[2], HashSet::from([4]));
    }

    #[test]
    fn driver_reset_and_union_roots() {
        let dsu = EagerDsu::new(4);
        dsu.union_on_edge(0, 1);
        dsu.invalidate();
        dsu.reset();
        assert_ne!(dsu.find(0), dsu.find(1));
        let r = dsu.union_roots(0, 1);
        assert_eq!(dsu.find(0), r);
        assert_eq!(dsu.find(1), r);
    }

    #[test]
    fn concurrent_path_union_connects_everything() {
        let n: NodeId = 512;
        let dsu = Arc::new(EagerDsu::new(n));
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let dsu = Arc::clone(&dsu);
                std::thread::spawn(move || {
                    // each thread unions a strided slice of a path
                    let mut v = t;
                    while v + 1 < n {
                        dsu.union_on_edge(v, v + 1);
                        v += 4;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(dsu.is_valid());
        let root = dsu.find(0);
        for v in 1..n {
            assert_eq!(dsu.find(v), root);
        }
    }
}
