use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use streamcc::{Graph, GraphConfiguration, GraphUpdate, NodeId, Supernode};

const NUM_NODES: NodeId = 1024;

fn bench_update_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_path");
    group.throughput(Throughput::Elements(1));

    let graph = Graph::new(NUM_NODES, GraphConfiguration::default(), 1).unwrap();
    let mut i = 0u32;
    group.bench_function("insert", |b| {
        b.iter(|| {
            let a = i % NUM_NODES;
            let d = (a + 1 + (i * 7) % (NUM_NODES - 1)) % NUM_NODES;
            graph
                .update(black_box(GraphUpdate::insert(a, d)), 0)
                .unwrap();
            i = i.wrapping_add(1);
        })
    });
    group.finish();
}

fn bench_delta_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_generation");
    let seed = 0xF00D;
    let mut scratch = Supernode::new(NUM_NODES, seed);
    for batch in [64usize, 512, 4096] {
        let dsts: Vec<NodeId> = (1..=batch as u32).map(|d| d % (NUM_NODES - 1) + 1).collect();
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(format!("batch_{batch}"), |b| {
            b.iter(|| Supernode::delta(NUM_NODES, seed, 0, black_box(&dsts), &mut scratch))
        });
    }
    group.finish();
}

fn bench_supernode_merge(c: &mut Criterion) {
    let seed = 0xBEEF;
    let mut target = Supernode::new(NUM_NODES, seed);
    let mut other = Supernode::new(NUM_NODES, seed);
    Supernode::delta(NUM_NODES, seed, 0, &(1..200).collect::<Vec<_>>(), &mut other);
    c.bench_function("supernode_merge", |b| {
        b.iter(|| target.merge(black_box(&other)))
    });
}

criterion_group!(
    benches,
    bench_update_path,
    bench_delta_generation,
    bench_supernode_merge
);
criterion_main!(benches);
