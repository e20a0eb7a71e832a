//! Sampling-trace verification hooks.
//!
//! The driver consults a [`SampleVerifier`] at three points: every
//! sampled edge, the end of every round, and the final partition. The
//! default implementation does nothing and costs nothing on the hot
//! path; [`GraphTruth`] tracks the exact edge set of a (small) test
//! stream and rejects any sample the true graph cannot produce.

use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::types::{Edge, GraphUpdate, NodeId, UpdateType};

pub trait SampleVerifier: Send + Sync {
    /// Called for every `Good` sample before it is merged on.
    fn verify_edge(&self, _round: usize, _edge: Edge) -> Result<()> {
        Ok(())
    }

    /// Called after each round with the surviving representatives.
    fn verify_round(&self, _round: usize, _reps: &[NodeId]) -> Result<()> {
        Ok(())
    }

    /// Called with the final partition before it is returned.
    fn verify_cc(&self, _components: &[HashSet<NodeId>]) -> Result<()> {
        Ok(())
    }
}

/// The default verifier: accepts everything.
pub struct NoopVerifier;

impl SampleVerifier for NoopVerifier {}

/// Exact parity-tracked edge set of a test stream.
#[derive(Debug, Default)]
pub struct GraphTruth {
    edges: HashSet<(NodeId, NodeId)>,
}

impl GraphTruth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the update's edge, mirroring GF(2) stream semantics.
    pub fn apply(&mut self, upd: GraphUpdate) {
        if upd.kind == UpdateType::Breakpoint {
            return;
        }
        let key = upd.edge.ordered();
        if !self.edges.insert(key) {
            self.edges.remove(&key);
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// True components of the tracked graph over `num_nodes` vertices.
    pub fn components(&self, num_nodes: NodeId) -> Vec<HashSet<NodeId>> {
        let mut parent: Vec<NodeId> = (0..num_nodes).collect();
        fn find(parent: &mut [NodeId], mut v: NodeId) -> NodeId {
            while parent[v as usize] != v {
                let gp = parent[parent[v as usize] as usize];
                parent[v as usize] = gp;
                v = gp;
            }
            v
        }
        for &(a, b) in &self.edges {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
                parent[hi as usize] = lo;
            }
        }
        let mut by_root: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        for v in 0..num_nodes {
            let r = find(&mut parent, v);
            by_root.entry(r).or_default().insert(v);
        }
        let mut comps: Vec<HashSet<NodeId>> = by_root.into_values().collect();
        comps.sort_by_key(|c| c.iter().min().copied());
        comps
    }
}

impl SampleVerifier for GraphTruth {
    fn verify_edge(&self, round: usize, edge: Edge) -> Result<()> {
        if self.edges.contains(&edge.ordered()) {
            Ok(())
        } else {
            Err(GraphError::VerificationFailed {
                round,
                edge: Some(edge),
                reason: "sampled edge is not in the live graph".into(),
            })
        }
    }

    fn verify_cc(&self, components: &[HashSet<NodeId>]) -> Result<()> {
        let n = components.iter().map(|c| c.len()).sum::<usize>() as NodeId;
        let truth = self.components(n);
        if truth == components {
            Ok(())
        } else {
            Err(GraphError::VerificationFailed {
                round: 0,
                edge: None,
                reason: format!(
                    "partition has {} components, the graph has {}",
                    components.len(),
                    truth.len()
                ),
            })
        }
    }
}
