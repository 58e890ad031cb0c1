//! Criterion benchmarks for the reference simulator.
//!
//! Run with:
//!   cargo bench --bench simulator
//!   cargo bench --bench simulator --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use neurobridge::prelude::*;

fn chain(n_neurons: usize, length: usize) -> Model {
    let mut b = ModelBuilder::new("model").with_seed(42);
    let stim = b.node("stim", NodeOutput::sine(2.0));
    let mut prev: Endpoint = stim.into();
    for i in 0..length {
        let ens = b.ensemble(
            &format!("e{i}"),
            EnsembleParams {
                n_neurons,
                ..EnsembleParams::default()
            },
        );
        b.connect(prev, ens, ConnectionParams::default());
        prev = ens.into();
    }
    b.build().expect("bench model")
}

/// Benchmark step() with varying population sizes.
fn bench_step_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_size");

    for n in [50usize, 100, 200, 400].iter() {
        group.throughput(Throughput::Elements(*n as u64 * 4));
        group.bench_with_input(BenchmarkId::new("chain4", n), n, |b, &n| {
            let model = chain(n, 4);
            let probes: Vec<ProbeSpec> = model
                .ensembles()
                .map(|(id, _)| ProbeSpec::new(Target::Object(id), "decoded_output", 1))
                .collect();
            let (mut sim, handles) = Simulator::new(&model, &probes, 0.001).expect("simulator");
            b.iter(|| {
                sim.step();
                black_box(sim.take_data(handles[0]).len())
            });
        });
    }

    group.finish();
}

/// Benchmark simulator construction (decoder solves dominate).
fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for n in [50usize, 200].iter() {
        group.bench_with_input(BenchmarkId::new("chain4", n), n, |b, &n| {
            let model = chain(n, 4);
            b.iter(|| {
                let (sim, _) = Simulator::new(&model, &[], 0.001).expect("simulator");
                black_box(sim.n_steps())
            });
        });
    }

    group.finish();
}

fn bench_tuning_curves(c: &mut Criterion) {
    let model = chain(200, 1);
    let (sim, _) = Simulator::new(&model, &[], 0.001).expect("simulator");
    let (ens, _) = model.ensembles().next().expect("one ensemble");
    c.bench_function("tuning_curves_200x50", |b| {
        b.iter(|| black_box(sim.tuning_curves(ens, 50).map(|g| g.len()).ok()))
    });
}

criterion_group!(benches, bench_step_sizes, bench_build, bench_tuning_curves);
criterion_main!(benches);
