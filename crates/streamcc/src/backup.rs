//! Snapshot area for the supernode array.
//!
//! Continuation queries consume sketch levels destructively, so the
//! driver snapshots every supernode before the first round and restores
//! afterwards (or before surfacing an error). The snapshot lives in RAM
//! or in a file under the configured disk directory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{GraphError, Result};
use crate::serial;
use crate::supernode::Supernode;
use crate::types::NodeId;

static BACKUP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub enum BackupArea {
    Memory(Vec<Supernode>),
    Disk(PathBuf),
}

impl BackupArea {
    /// Snapshot every supernode, to RAM or to a uniquely-named file in
    /// `dir`.
    pub fn snapshot(
        in_mem: bool,
        dir: &Path,
        num_nodes: NodeId,
        seed: u64,
        supernodes: &[Mutex<Supernode>],
    ) -> Result<Self> {
        if in_mem {
            let copy = supernodes.iter().map(|sn| sn.lock().clone()).collect();
            return Ok(BackupArea::Memory(copy));
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "supernode_backup_{}_{}.bin",
            std::process::id(),
            BACKUP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut out = BufWriter::new(File::create(&path)?);
        {
            let guards: Vec<_> = supernodes.iter().map(|sn| sn.lock()).collect();
            serial::write_state(&mut out, num_nodes, seed, guards.iter().map(|g| &**g))?;
        }
        out.flush()?;
        Ok(BackupArea::Disk(path))
    }

    /// Copy the snapshot back over the live supernodes.
    pub fn restore(&self, supernodes: &[Mutex<Supernode>]) -> Result<()> {
        match self {
            BackupArea::Memory(copy) => {
                for (slot, saved) in supernodes.iter().zip(copy) {
                    *slot.lock() = saved.clone();
                }
                Ok(())
            }
            BackupArea::Disk(path) => {
                let mut input = BufReader::new(File::open(path)?);
                let (_, _, saved) = serial::read_state(&mut input)?;
                if saved.len() != supernodes.len() {
                    return Err(GraphError::BadStateFile(
                        "backup holds a different vertex count".into(),
                    ));
                }
                for (slot, sn) in supernodes.iter().zip(saved) {
                    *slot.lock() = sn;
                }
                Ok(())
            }
        }
    }
}

impl Drop for BackupArea {
    fn drop(&mut self) {
        if let BackupArea::Disk(path) = &*self {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("could not remove backup file {}: {e}", path.display());
            }
        }
    }
}
