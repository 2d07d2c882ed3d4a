//! Performance benchmarks for the linkweave synthesis engine.
//!
//! Run with: `cargo bench`
//! Or for a specific bench: `cargo bench --bench synthesis_bench`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use linkweave::beam::BeamEngine;
use linkweave::collective::Collective;
use linkweave::engine::{SourceSelection, SynthesisEngine};
use linkweave::topology::Topology;

const MIB: u64 = 1 << 20;

/// Bidirectional ring of `npus` nodes with mildly varied latencies.
fn ring_topology(npus: usize) -> Arc<Topology> {
    let mut topology = Topology::new(npus).unwrap();
    for npu in 0..npus {
        let next = (npu + 1) % npus;
        let latency = 100.0 + (npu % 4) as f64 * 25.0;
        topology.connect(npu, next, latency, 1.0, true).unwrap();
    }
    topology.set_chunk_size(MIB).unwrap();
    Arc::new(topology)
}

fn bench_baseline_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("baseline_ring_all_gather");

    for npus in [4, 8, 16] {
        let topology = ring_topology(npus);
        let collective = Collective::all_gather(npus, MIB, 1);

        group.bench_with_input(BenchmarkId::from_parameter(npus), &npus, |b, _| {
            b.iter(|| {
                let engine = SynthesisEngine::with_seed(
                    Arc::clone(&topology),
                    &collective,
                    SourceSelection::Random,
                    42,
                )
                .unwrap();
                black_box(engine.synthesize().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_greedy_synthesis(c: &mut Criterion) {
    let topology = ring_topology(8);
    let collective = Collective::all_gather(8, MIB, 1);

    c.bench_function("greedy_ring_all_gather_8", |b| {
        b.iter(|| {
            let engine = SynthesisEngine::with_seed(
                Arc::clone(&topology),
                &collective,
                SourceSelection::greedy(),
                42,
            )
            .unwrap();
            black_box(engine.synthesize().unwrap())
        });
    });
}

fn bench_beam_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("beam_ring_all_gather_8");

    let topology = ring_topology(8);
    let collective = Collective::all_gather(8, MIB, 1);

    for width in [2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let engine = BeamEngine::with_seed(
                    Arc::clone(&topology),
                    &collective,
                    width,
                    SourceSelection::Random,
                    42,
                )
                .unwrap();
                black_box(engine.synthesize().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_baseline_synthesis,
    bench_greedy_synthesis,
    bench_beam_synthesis
);
criterion_main!(benches);
