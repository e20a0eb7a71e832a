//! Graph workers: threads that drain gutter batches into supernodes.
//!
//! Each worker owns one delta-supernode scratch for its whole lifetime,
//! so steady-state batch application allocates nothing. Workers block
//! on the batch queue with a short timeout and re-check the shutdown
//! flag between waits; quiescence is observed through the queue's
//! outstanding-work counter, not the workers themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;
use crate::graph::GraphCore;
use crate::gutter::BatchQueue;
use crate::supernode::Supernode;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn spawn(core: Arc<GraphCore>, queue: Arc<BatchQueue>, count: usize) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);
        for wid in 0..count.max(1) {
            let core = Arc::clone(&core);
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("graph-worker-{wid}"))
                .spawn(move || {
                    let mut scratch = Supernode::new(core.num_nodes, core.seed);
                    loop {
                        match queue.pop(POLL_INTERVAL) {
                            Some(batch) => {
                                core.apply_batch(batch.src, &batch.dsts, &mut scratch);
                                queue.task_done();
                            }
                            None => {
                                if shutdown.load(Ordering::Acquire) {
                                    break;
                                }
                            }
                        }
                    }
                })?;
            handles.push(handle);
        }
        Ok(Self { handles, shutdown })
    }

    /// Signal and join every worker. Pending batches are still drained:
    /// the flag is only honored on an empty poll.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("a graph worker panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}
