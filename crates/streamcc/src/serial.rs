//! On-disk format for the full sketch state of a graph.
//!
//! Header `(u32 num_nodes, u64 seed)` followed by one supernode blob
//! per vertex in id order. The same framing backs both
//! [`crate::Graph::write_binary`] and the disk-resident backup area.

use std::io::{Read, Write};

use crate::error::{GraphError, Result};
use crate::sketch::{read_u32, read_u64};
use crate::supernode::Supernode;
use crate::types::NodeId;

pub fn write_state<'a, W, I>(w: &mut W, num_nodes: NodeId, seed: u64, supernodes: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Supernode>,
{
    w.write_all(&num_nodes.to_le_bytes())?;
    w.write_all(&seed.to_le_bytes())?;
    let mut written = 0u64;
    for sn in supernodes {
        sn.write_to(w)?;
        written += 1;
    }
    if written != num_nodes as u64 {
        return Err(GraphError::BadStateFile(format!(
            "wrote {written} supernodes for a {num_nodes}-vertex graph"
        )));
    }
    Ok(())
}

pub fn read_state<R: Read>(r: &mut R) -> Result<(NodeId, u64, Vec<Supernode>)> {
    let num_nodes = read_u32(r)?;
    let seed = read_u64(r)?;
    let mut supernodes = Vec::with_capacity(num_nodes as usize);
    for _ in 0..num_nodes {
        let sn = Supernode::read_from(r)?;
        if sn.num_nodes() != num_nodes || sn.seed() != seed {
            return Err(GraphError::BadStateFile(
                "supernode header disagrees with graph header".into(),
            ));
        }
        supernodes.push(sn);
    }
    Ok((num_nodes, seed, supernodes))
}
