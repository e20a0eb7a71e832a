//! Batching layer between the update fast path and the sketches.
//!
//! Sketch updates cost O(log² n) hashing per edge, so raw stream
//! updates are staged per source vertex and applied in bulk. Gutters
//! emit `(src, [dst…])` batches onto a shared queue drained by the
//! graph worker pool; per-source delivery order is serialized by the
//! per-gutter lock.
//!
//! Two backends: `StandaloneGutters` keeps every gutter in memory;
//! `GutterTree` keeps a small in-memory stage per vertex and spills to
//! append-only files under the configured disk directory (the cachetree
//! flavor is the same tree with a batch-sized stage).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::GutterSystem;
use crate::error::Result;
use crate::types::NodeId;

/// One unit of work for the graph workers: every staged destination of
/// a single source vertex.
#[derive(Debug)]
pub struct Batch {
    pub src: NodeId,
    pub dsts: Vec<NodeId>,
}

/// Unbounded batch channel with an outstanding-work counter, so the
/// query driver can wait for full quiescence (queue drained *and* every
/// popped batch applied).
pub struct BatchQueue {
    tx: Sender<Batch>,
    rx: Receiver<Batch>,
    outstanding: AtomicUsize,
    idle_mx: Mutex<()>,
    idle_cv: Condvar,
}

impl BatchQueue {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            tx,
            rx,
            outstanding: AtomicUsize::new(0),
            idle_mx: Mutex::new(()),
            idle_cv: Condvar::new(),
        })
    }

    pub fn push(&self, batch: Batch) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        // receivers live as long as the queue
        let _ = self.tx.send(batch);
    }

    pub fn pop(&self, timeout: Duration) -> Option<Batch> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Workers call this after fully applying a popped batch.
    pub fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_mx.lock();
            self.idle_cv.notify_all();
        }
    }

    /// Block until every pushed batch has been applied.
    pub fn wait_idle(&self) {
        let mut guard = self.idle_mx.lock();
        while self.outstanding.load(Ordering::Acquire) > 0 {
            self.idle_cv.wait(&mut guard);
        }
    }
}

/// The abstract buffering collaborator the engine feeds.
pub trait GutteringSystem: Send + Sync {
    /// Stage one directed copy of an update on behalf of inserter `tid`.
    fn insert(&self, edge: (NodeId, NodeId), tid: usize) -> Result<()>;

    /// Emit every staged update as batches, regardless of fill level.
    fn force_flush(&self) -> Result<()>;
}

/// Fully in-memory gutters, one growable buffer per vertex.
pub struct StandaloneGutters {
    gutters: Vec<Mutex<Vec<NodeId>>>,
    batch_size: usize,
    queue: Arc<BatchQueue>,
}

impl StandaloneGutters {
    pub fn new(num_nodes: NodeId, batch_size: usize, queue: Arc<BatchQueue>) -> Self {
        Self {
            gutters: (0..num_nodes).map(|_| Mutex::new(Vec::new())).collect(),
            batch_size: batch_size.max(1),
            queue,
        }
    }
}

impl GutteringSystem for StandaloneGutters {
    fn insert(&self, edge: (NodeId, NodeId), _tid: usize) -> Result<()> {
        let (src, dst) = edge;
        let mut gutter = self.gutters[src as usize].lock();
        gutter.push(dst);
        if gutter.len() >= self.batch_size {
            self.queue.push(Batch {
                src,
                dsts: std::mem::take(&mut *gutter),
            });
        }
        Ok(())
    }

    fn force_flush(&self) -> Result<()> {
        for (src, gutter) in self.gutters.iter().enumerate() {
            let mut gutter = gutter.lock();
            if !gutter.is_empty() {
                self.queue.push(Batch {
                    src: src as NodeId,
                    dsts: std::mem::take(&mut *gutter),
                });
            }
        }
        Ok(())
    }
}

/// Number of spill files the vertex space is folded onto.
const SPILL_GROUPS: usize = 64;

/// Records staged in one spill file before it is compacted into batches.
const COMPACT_FACTOR: usize = 8;

struct SpillFile {
    file: File,
    records: usize,
}

/// Disk-spilling gutters: a bounded in-memory stage per vertex, backed
/// by append-only `(src, dst)` logs grouped by `src % SPILL_GROUPS`.
pub struct GutterTree {
    stages: Vec<Mutex<Vec<NodeId>>>,
    stage_cap: usize,
    spills: Vec<Mutex<SpillFile>>,
    batch_size: usize,
    queue: Arc<BatchQueue>,
}

impl GutterTree {
    pub fn new(
        num_nodes: NodeId,
        batch_size: usize,
        stage_cap: usize,
        dir: &std::path::Path,
        queue: Arc<BatchQueue>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let groups = SPILL_GROUPS.min(num_nodes as usize).max(1);
        let mut spills = Vec::with_capacity(groups);
        for g in 0..groups {
            let path: PathBuf = dir.join(format!("gutter_spill_{g}.bin"));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            spills.push(Mutex::new(SpillFile { file, records: 0 }));
        }
        Ok(Self {
            stages: (0..num_nodes).map(|_| Mutex::new(Vec::new())).collect(),
            stage_cap: stage_cap.max(1),
            spills,
            batch_size: batch_size.max(1),
            queue,
        })
    }

    fn group(&self, src: NodeId) -> usize {
        src as usize % self.spills.len()
    }

    fn spill_stage(&self, src: NodeId, dsts: &[NodeId]) -> Result<()> {
        let mut spill = self.spills[self.group(src)].lock();
        let mut buf = Vec::with_capacity(dsts.len() * 8);
        for &dst in dsts {
            buf.extend_from_slice(&src.to_le_bytes());
            buf.extend_from_slice(&dst.to_le_bytes());
        }
        spill.file.seek(SeekFrom::End(0))?;
        spill.file.write_all(&buf)?;
        spill.records += dsts.len();
        if spill.records >= self.batch_size * COMPACT_FACTOR {
            self.compact(&mut spill)?;
        }
        Ok(())
    }

    /// Read a spill log back, regroup by source, and emit batches.
    fn compact(&self, spill: &mut SpillFile) -> Result<()> {
        spill.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::with_capacity(spill.records * 8);
        spill.file.read_to_end(&mut bytes)?;
        let mut by_src: std::collections::HashMap<NodeId, Vec<NodeId>> =
            std::collections::HashMap::new();
        for rec in bytes.chunks_exact(8) {
            let src = NodeId::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
            let dst = NodeId::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]);
            by_src.entry(src).or_default().push(dst);
        }
        for (src, dsts) in by_src {
            self.queue.push(Batch { src, dsts });
        }
        spill.file.set_len(0)?;
        spill.file.seek(SeekFrom::Start(0))?;
        spill.records = 0;
        Ok(())
    }
}

impl GutteringSystem for GutterTree {
    fn insert(&self, edge: (NodeId, NodeId), _tid: usize) -> Result<()> {
        let (src, dst) = edge;
        let mut stage = self.stages[src as usize].lock();
        stage.push(dst);
        if stage.len() >= self.stage_cap {
            let dsts = std::mem::take(&mut *stage);
            drop(stage);
            self.spill_stage(src, &dsts)?;
        }
        Ok(())
    }

    fn force_flush(&self) -> Result<()> {
        for (src, stage) in self.stages.iter().enumerate() {
            let mut stage = stage.lock();
            if !stage.is_empty() {
                let dsts = std::mem::take(&mut *stage);
                drop(stage);
                self.spill_stage(src as NodeId, &dsts)?;
            }
        }
        for spill in &self.spills {
            let mut spill = spill.lock();
            if spill.records > 0 {
                self.compact(&mut spill)?;
            }
        }
        Ok(())
    }
}

/// Build the configured backend.
pub fn build_gutters(
    kind: GutterSystem,
    num_nodes: NodeId,
    batch_size: usize,
    disk_dir: &std::path::Path,
    queue: Arc<BatchQueue>,
) -> Result<Arc<dyn GutteringSystem>> {
    Ok(match kind {
        GutterSystem::Standalone => {
            Arc::new(StandaloneGutters::new(num_nodes, batch_size, queue))
        }
        GutterSystem::GutterTree => Arc::new(GutterTree::new(
            num_nodes,
            batch_size,
            batch_size / 8,
            disk_dir,
            queue,
        )?),
        GutterSystem::CacheTree => Arc::new(GutterTree::new(
            num_nodes,
            batch_size,
            batch_size,
            disk_dir,
            queue,
        )?),
    })
}
