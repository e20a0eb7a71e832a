//! Multithreaded stream ingestion with query barriers, end to end.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use streamcc::{
    BinaryGraphStreamMt, BinaryStreamWriter, Graph, GraphConfiguration, GraphTruth, GraphUpdate,
    MtStreamReader, NodeId, EDGE_RECORD_SIZE,
};

static GATE: Mutex<()> = Mutex::new(());

const NUM_NODES: NodeId = 40;
const NUM_UPDATES: u32 = 10_000;
const QUERY_AT: u64 = 1000;

fn make_updates() -> Vec<GraphUpdate> {
    (0..NUM_UPDATES)
        .map(|i| {
            let a = (i * 3 + 1) % NUM_NODES;
            let b = (a + 1 + (i * 7) % (NUM_NODES - 1)) % NUM_NODES;
            if i % 6 == 5 {
                GraphUpdate::delete(a, b)
            } else {
                GraphUpdate::insert(a, b)
            }
        })
        .collect()
}

fn write_stream(path: &std::path::Path, updates: &[GraphUpdate]) {
    let mut w = BinaryStreamWriter::create(path, NUM_NODES, updates.len() as u64).unwrap();
    for &u in updates {
        w.write_update(u).unwrap();
    }
    w.finish().unwrap();
}

/// Register a barrier at update 1000 of 10000, query mid-stream with
/// continuation, resume, and check the final result covers the whole
/// stream.
#[test]
fn registered_query_barrier_round_trip() {
    let _gate = GATE.lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("updates.bin");
    let updates = make_updates();
    write_stream(&path, &updates);

    let mid_truth = {
        let mut t = GraphTruth::new();
        for &u in &updates[..QUERY_AT as usize] {
            t.apply(u);
        }
        t
    };
    let full_truth = {
        let mut t = GraphTruth::new();
        for &u in &updates {
            t.apply(u);
        }
        t
    };
    let expected_mid = mid_truth.components(NUM_NODES);
    let expected_full = full_truth.components(NUM_NODES);

    let stream = BinaryGraphStreamMt::open(&path, 32 * EDGE_RECORD_SIZE).unwrap();
    assert_eq!(stream.nodes(), NUM_NODES);
    assert_eq!(stream.edges(), NUM_UPDATES as u64);
    assert!(stream.register_query(QUERY_AT));

    let num_readers = 3usize;
    let graph = Arc::new(Graph::new(NUM_NODES, GraphConfiguration::default(), num_readers).unwrap());
    // every reader parked at the barrier proves no update is in flight
    let at_barrier = Arc::new(Barrier::new(num_readers + 1));
    let resumed = Arc::new(Barrier::new(num_readers + 1));

    let readers: Vec<_> = (0..num_readers)
        .map(|tid| {
            let mut reader = MtStreamReader::new(Arc::clone(&stream));
            let graph = Arc::clone(&graph);
            let at_barrier = Arc::clone(&at_barrier);
            let resumed = Arc::clone(&resumed);
            std::thread::spawn(move || {
                loop {
                    let upd = reader.get_edge().unwrap();
                    if upd.is_breakpoint() {
                        break;
                    }
                    graph.update(upd, tid).unwrap();
                }
                at_barrier.wait();
                resumed.wait();
                loop {
                    let upd = reader.get_edge().unwrap();
                    if upd.is_breakpoint() {
                        break;
                    }
                    graph.update(upd, tid).unwrap();
                }
            })
        })
        .collect();

    at_barrier.wait();
    assert_eq!(graph.num_updates(), QUERY_AT);
    graph.set_verifier(Arc::new(mid_truth));
    let mid = graph.connected_components(true).unwrap();
    assert_eq!(mid, expected_mid);

    stream.post_query_resume();
    resumed.wait();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(graph.num_updates(), NUM_UPDATES as u64);
    graph.set_verifier(Arc::new(full_truth));
    let full = graph.connected_components(false).unwrap();
    assert_eq!(full, expected_full);
}

/// The on-demand flavor of the same protocol: pause anywhere, query,
/// resume, and the final answer still covers every update.
#[test]
fn on_demand_query_barrier_round_trip() {
    let _gate = GATE.lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("updates.bin");
    let updates = make_updates();
    write_stream(&path, &updates);

    let full_truth = {
        let mut t = GraphTruth::new();
        for &u in &updates {
            t.apply(u);
        }
        t
    };
    let expected_full = full_truth.components(NUM_NODES);

    let stream = BinaryGraphStreamMt::open(&path, 64 * EDGE_RECORD_SIZE).unwrap();
    let num_readers = 2usize;
    let graph = Arc::new(Graph::new(NUM_NODES, GraphConfiguration::default(), num_readers).unwrap());
    let at_barrier = Arc::new(Barrier::new(num_readers + 1));
    let resumed = Arc::new(Barrier::new(num_readers + 1));

    let readers: Vec<_> = (0..num_readers)
        .map(|tid| {
            let mut reader = MtStreamReader::new(Arc::clone(&stream));
            let graph = Arc::clone(&graph);
            let at_barrier = Arc::clone(&at_barrier);
            let resumed = Arc::clone(&resumed);
            std::thread::spawn(move || {
                let mut paused_once = false;
                loop {
                    let upd = reader.get_edge().unwrap();
                    if upd.is_breakpoint() {
                        if paused_once {
                            break;
                        }
                        paused_once = true;
                        at_barrier.wait();
                        resumed.wait();
                        continue;
                    }
                    graph.update(upd, tid).unwrap();
                }
            })
        })
        .collect();

    // let the readers make some progress, then pause the stream
    while graph.num_updates() < 500 {
        std::thread::yield_now();
    }
    stream.on_demand_query();
    at_barrier.wait();

    let seen = graph.num_updates();
    assert!(seen >= 500 && seen < NUM_UPDATES as u64);
    let mid = graph.connected_components(true).unwrap();
    assert!(!mid.is_empty());

    stream.post_query_resume();
    resumed.wait();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(graph.num_updates(), NUM_UPDATES as u64);
    graph.set_verifier(Arc::new(full_truth));
    let full = graph.connected_components(false).unwrap();
    assert_eq!(full, expected_full);
}
