//! The streaming engine: update fast path, Borůvka driver, queries.
//!
//! An update fans out to both endpoint gutters and, while the stream is
//! still deletion-free and acyclic, eagerly into the DSU. Connectivity
//! queries first quiesce the batching pipeline; if the eager forest is
//! still valid they answer from it directly, otherwise they run the
//! Borůvka emulation over the supernode array — sampling one cut edge
//! per live component per round, merging the touched supernodes, and
//! repeating until no round makes progress.
//!
//! Sampling consumes sketch levels destructively, so a continuation
//! query snapshots the supernode array first and restores it before
//! returning — including before surfacing any error.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rayon::prelude::*;

use crate::backup::BackupArea;
use crate::config::GraphConfiguration;
use crate::dsu::EagerDsu;
use crate::error::{GraphError, Result};
use crate::gutter::{build_gutters, BatchQueue, GutteringSystem};
use crate::serial;
use crate::sketch::ceil_log2;
use crate::supernode::Supernode;
use crate::types::{GraphUpdate, NodeId, SupernodeSample, UpdateType};
use crate::verify::{NoopVerifier, SampleVerifier};
use crate::worker::WorkerPool;

/// Process-wide guard: temporary files and the backup area are keyed by
/// process, so at most one graph may be open at a time.
static GRAPH_OPEN: AtomicBool = AtomicBool::new(false);

struct OpenHandle;

impl OpenHandle {
    fn claim() -> Result<Self> {
        if GRAPH_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(OpenHandle)
        } else {
            Err(GraphError::GraphAlreadyOpen)
        }
    }
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        GRAPH_OPEN.store(false, Ordering::Release);
    }
}

pub(crate) struct GraphCore {
    pub(crate) num_nodes: NodeId,
    pub(crate) seed: u64,
    pub(crate) config: GraphConfiguration,
    pub(crate) supernodes: Vec<Mutex<Supernode>>,
    pub(crate) dsu: EagerDsu,
    pub(crate) update_locked: AtomicBool,
    pub(crate) num_updates: AtomicU64,
    fail_round_two: AtomicBool,
    verifier: RwLock<Arc<dyn SampleVerifier>>,
    pool: Option<rayon::ThreadPool>,
}

impl GraphCore {
    /// Apply one gutter batch: build the delta supernode in the worker's
    /// scratch, then merge it under the destination's lock.
    pub(crate) fn apply_batch(&self, src: NodeId, dsts: &[NodeId], scratch: &mut Supernode) {
        self.run(|| Supernode::delta(self.num_nodes, self.seed, src, dsts, scratch));
        self.supernodes[src as usize].lock().merge(scratch);
    }

    /// Run `f` on the configured thread pool, or the global one when no
    /// dedicated pool was requested.
    fn run<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn boruvka(&self) -> Result<Vec<HashSet<NodeId>>> {
        let verifier = self.verifier.read().clone();
        self.dsu.reset();
        let mut reps: Vec<NodeId> = (0..self.num_nodes).collect();
        let mut round = 0usize;

        loop {
            round += 1;
            if round == 2 && self.fail_round_two.swap(false, Ordering::AcqRel) {
                return Err(GraphError::VerificationFailed {
                    round,
                    edge: None,
                    reason: "injected failure before round 2".into(),
                });
            }

            let samples: Vec<(NodeId, SupernodeSample)> = self.run(|| {
                reps.par_iter()
                    .map(|&r| (r, self.supernodes[r as usize].lock().sample()))
                    .collect()
            });

            let mut merged_any = false;
            let mut saw_fail = false;
            let mut exhausted = 0usize;
            let mut zero_reps: HashSet<NodeId> = HashSet::new();
            for &(rep, sample) in &samples {
                match sample {
                    SupernodeSample::Good(edge) => {
                        verifier.verify_edge(round, edge)?;
                        if self.dsu.find(edge.src) != self.dsu.find(edge.dst) {
                            self.dsu.union_roots(edge.src, edge.dst);
                            merged_any = true;
                        }
                    }
                    SupernodeSample::Zero => {
                        zero_reps.insert(rep);
                    }
                    SupernodeSample::Fail => saw_fail = true,
                    SupernodeSample::Exhausted => exhausted += 1,
                }
            }
            // a failing representative never blocks the rest of the
            // round; exhaustion surfaces once the round is complete
            if exhausted > 0 {
                return Err(GraphError::SamplingExhausted {
                    round,
                    failed: exhausted,
                    partial: self.dsu.components(),
                });
            }

            let mut groups: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
            for &rep in &reps {
                groups.entry(self.dsu.find(rep)).or_default().push(rep);
            }
            let merge_jobs: Vec<Vec<NodeId>> = groups.into_values().collect();
            self.run(|| {
                merge_jobs.par_iter().for_each(|members| {
                    if members.len() < 2 {
                        return;
                    }
                    // groups are disjoint, so taking the target lock and
                    // then each member lock cannot cross another group
                    let target = members.iter().min().copied().unwrap_or(members[0]);
                    let mut tgt = self.supernodes[target as usize].lock();
                    for &m in members {
                        if m != target {
                            tgt.merge(&self.supernodes[m as usize].lock());
                        }
                    }
                });
            });

            let mut new_reps: Vec<NodeId> = merge_jobs
                .iter()
                .map(|members| members.iter().min().copied().unwrap_or(members[0]))
                .filter(|rep| !zero_reps.contains(rep))
                .collect();
            new_reps.sort_unstable();
            verifier.verify_round(round, &new_reps)?;
            tracing::debug!(
                "round {round}: {} -> {} live representatives",
                reps.len(),
                new_reps.len()
            );
            reps = new_reps;

            // keep going while merges happen or deeper levels may still
            // isolate an edge for a component that failed this round
            if !merged_any && !saw_fail {
                break;
            }
        }

        let components = self.dsu.components();
        verifier.verify_cc(&components)?;
        tracing::info!(
            "connectivity query finished after {round} round(s): {} component(s)",
            components.len()
        );
        Ok(components)
    }
}

/// Undirected streaming graph with `n` vertices labelled `0..n`, no
/// self edges, weights, or multiplicities beyond parity.
pub struct Graph {
    core: Arc<GraphCore>,
    gts: Arc<dyn GutteringSystem>,
    queue: Arc<BatchQueue>,
    workers: WorkerPool,
    num_inserters: usize,
    _open: OpenHandle,
}

impl Graph {
    /// Open a fresh graph with a random sketch seed.
    pub fn new(num_nodes: NodeId, config: GraphConfiguration, num_inserters: usize) -> Result<Self> {
        let seed = rand::thread_rng().gen();
        let supernodes = (0..num_nodes)
            .map(|_| Mutex::new(Supernode::new(num_nodes, seed)))
            .collect();
        Self::build(num_nodes, seed, supernodes, config, num_inserters)
    }

    /// Reheat a graph from a file produced by [`Graph::write_binary`].
    ///
    /// The eager forest cannot be reconstructed from sketches alone, so
    /// a reheated graph always answers queries through the sketch path.
    pub fn from_file(
        path: impl AsRef<Path>,
        config: GraphConfiguration,
        num_inserters: usize,
    ) -> Result<Self> {
        let mut input = BufReader::new(File::open(path.as_ref())?);
        let (num_nodes, seed, supernodes) = serial::read_state(&mut input)?;
        let supernodes = supernodes.into_iter().map(Mutex::new).collect();
        let graph = Self::build(num_nodes, seed, supernodes, config, num_inserters)?;
        graph.core.dsu.invalidate();
        Ok(graph)
    }

    fn build(
        num_nodes: NodeId,
        seed: u64,
        supernodes: Vec<Mutex<Supernode>>,
        config: GraphConfiguration,
        num_inserters: usize,
    ) -> Result<Self> {
        let open = OpenHandle::claim()?;
        tracing::info!("opening a {num_nodes}-vertex graph\n{config}");

        let logn = ceil_log2(num_nodes as u64).max(1) as usize;
        let batch_size = ((config.get_gutter_factor() * (logn * logn) as f64) as usize).max(64);

        let threads = config.get_num_groups() * config.get_group_size();
        let pool = if threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("sketch-{i}"))
                    .build()
                    .map_err(|e| GraphError::Config(format!("cannot build thread pool: {e}")))?,
            )
        } else {
            None
        };

        let queue = BatchQueue::new();
        let gts = build_gutters(
            config.get_gutter_sys(),
            num_nodes,
            batch_size,
            config.get_disk_dir(),
            Arc::clone(&queue),
        )?;

        let core = Arc::new(GraphCore {
            num_nodes,
            seed,
            supernodes,
            dsu: EagerDsu::new(num_nodes),
            update_locked: AtomicBool::new(false),
            num_updates: AtomicU64::new(0),
            fail_round_two: AtomicBool::new(false),
            verifier: RwLock::new(Arc::new(NoopVerifier)),
            pool,
            config,
        });
        let workers = WorkerPool::spawn(
            Arc::clone(&core),
            Arc::clone(&queue),
            core.config.get_num_groups(),
        )?;

        Ok(Self {
            core,
            gts,
            queue,
            workers,
            num_inserters,
            _open: open,
        })
    }

    pub fn nodes(&self) -> NodeId {
        self.core.num_nodes
    }

    pub fn seed(&self) -> u64 {
        self.core.seed
    }

    /// Updates accepted so far.
    pub fn num_updates(&self) -> u64 {
        self.core.num_updates.load(Ordering::Relaxed)
    }

    /// True while the eager forest can still answer queries exactly.
    pub fn dsu_valid(&self) -> bool {
        self.core.dsu.is_valid()
    }

    /// Apply one stream update on behalf of inserter thread `tid`.
    ///
    /// Both orientations are staged so each endpoint's supernode sees
    /// the edge. Inserts feed the eager forest while it is valid; any
    /// delete invalidates it for good.
    pub fn update(&self, update: GraphUpdate, tid: usize) -> Result<()> {
        if self.core.update_locked.load(Ordering::Acquire) {
            return Err(GraphError::UpdateLocked);
        }
        debug_assert!(tid < self.num_inserters.max(1));
        let (src, dst) = (update.edge.src, update.edge.dst);
        if src == dst {
            debug_assert_ne!(src, dst, "self edges are not part of the model");
            return Ok(());
        }
        self.core.num_updates.fetch_add(1, Ordering::Relaxed);
        self.gts.insert((src, dst), tid)?;
        self.gts.insert((dst, src), tid)?;
        match update.kind {
            UpdateType::Insert => {
                if self.core.dsu.is_valid() {
                    self.core.dsu.union_on_edge(src, dst);
                }
            }
            UpdateType::Delete => self.core.dsu.invalidate(),
            UpdateType::Breakpoint => {
                debug_assert!(false, "breakpoints are reader-side sentinels");
            }
        }
        Ok(())
    }

    /// Apply a pre-batched list of destinations for `src`, using
    /// caller-owned delta scratch. This is the gutter callback surface;
    /// normal ingestion goes through [`Graph::update`].
    pub fn batch_update(&self, src: NodeId, dsts: &[NodeId], scratch: &mut Supernode) {
        self.core.apply_batch(src, dsts, scratch);
    }

    /// Drain the gutters and wait for every worker to go idle.
    fn flush_and_quiesce(&self) -> Result<()> {
        let start = Instant::now();
        self.gts.force_flush()?;
        self.queue.wait_idle();
        tracing::debug!("gutter flush + quiesce took {:?}", start.elapsed());
        Ok(())
    }

    /// Compute the connected components.
    ///
    /// With `cont` the graph keeps accepting updates afterwards, paid
    /// for by a full supernode snapshot. Without it the sketches are
    /// consumed and the graph stays locked. If the query fails with
    /// `cont`, the snapshot is restored before the error surfaces.
    pub fn connected_components(&self, cont: bool) -> Result<Vec<HashSet<NodeId>>> {
        self.core.update_locked.store(true, Ordering::Release);
        self.flush_and_quiesce()?;

        if self.core.dsu.is_valid() {
            let components = self.core.dsu.components();
            if cont {
                self.core.update_locked.store(false, Ordering::Release);
            }
            tracing::info!(
                "answered connectivity from the eager forest: {} component(s)",
                components.len()
            );
            return Ok(components);
        }

        let backup = if cont {
            Some(BackupArea::snapshot(
                self.core.config.get_backup_in_mem(),
                self.core.config.get_disk_dir(),
                self.core.num_nodes,
                self.core.seed,
                &self.core.supernodes,
            )?)
        } else {
            None
        };

        let result = self.core.boruvka();
        if let Some(backup) = &backup {
            backup.restore(&self.core.supernodes)?;
            self.core.update_locked.store(false, Ordering::Release);
        }
        result
    }

    /// Are `a` and `b` connected? Always leaves the graph updatable.
    pub fn point_query(&self, a: NodeId, b: NodeId) -> Result<bool> {
        self.core.update_locked.store(true, Ordering::Release);
        self.flush_and_quiesce()?;

        if self.core.dsu.is_valid() {
            let connected = self.core.dsu.find(a) == self.core.dsu.find(b);
            self.core.update_locked.store(false, Ordering::Release);
            return Ok(connected);
        }

        let backup = BackupArea::snapshot(
            self.core.config.get_backup_in_mem(),
            self.core.config.get_disk_dir(),
            self.core.num_nodes,
            self.core.seed,
            &self.core.supernodes,
        )?;
        let result = self.core.boruvka();
        backup.restore(&self.core.supernodes)?;
        self.core.update_locked.store(false, Ordering::Release);
        result.map(|_| self.core.dsu.find(a) == self.core.dsu.find(b))
    }

    /// Serialize the full sketch state. The graph stays updatable.
    pub fn write_binary(&self, path: impl AsRef<Path>) -> Result<()> {
        let was_locked = self.core.update_locked.swap(true, Ordering::AcqRel);
        self.flush_and_quiesce()?;
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        {
            let guards: Vec<_> = self.core.supernodes.iter().map(|sn| sn.lock()).collect();
            serial::write_state(
                &mut out,
                self.core.num_nodes,
                self.core.seed,
                guards.iter().map(|g| &**g),
            )?;
        }
        out.flush()?;
        self.core
            .update_locked
            .store(was_locked, Ordering::Release);
        Ok(())
    }

    /// Install a sampling verifier consulted by the query driver.
    pub fn set_verifier(&self, verifier: Arc<dyn SampleVerifier>) {
        *self.core.verifier.write() = verifier;
    }

    /// Make the next connectivity query abort at the start of round 2.
    /// One-shot; exists to exercise backup/restore.
    pub fn should_fail_cc(&self) {
        self.core.fail_round_two.store(true, Ordering::Release);
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        // drain whatever is still staged so worker shutdown is clean
        if self.gts.force_flush().is_ok() {
            self.queue.wait_idle();
        }
        self.workers.shutdown();
    }
}
