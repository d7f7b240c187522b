#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, Criterion};
use lsqsim::{coalescer, config, request, sim, trace};

fn requests(stride: u64, num_requests: usize) -> eyre::Result<Vec<request::WarpRequest>> {
    let requests = trace::strided(num_requests, 32, stride, 4, request::Kind::Load)
        .into_iter()
        .map(trace::TraceRequest::build)
        .collect::<Result<_, _>>()?;
    Ok(requests)
}

pub fn run_simulation(stride: u64) -> eyre::Result<()> {
    let mut sim = sim::Simulation::new(&sim::Config::default())?;
    for request in requests(stride, 64)? {
        sim.push(request);
    }
    let _stats = sim.run()?;
    Ok(())
}

pub fn partition_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    let config = config::LSQ::default();

    // fully coalesced, two lines per request and one line per lane
    for stride in [4, 8, 128] {
        let requests = requests(stride, 16).unwrap();
        group.bench_function(format!("stride/{stride}"), |b| {
            b.iter(|| {
                for request in &requests {
                    let _ = coalescer::partition(black_box(request), &config);
                }
            });
        });
    }
}

pub fn simulation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    group.bench_function("stride/4", |b| {
        b.iter(|| run_simulation(black_box(4)));
    });
    group.bench_function("stride/128", |b| {
        b.iter(|| run_simulation(black_box(128)));
    });
}

criterion::criterion_group!(benches, partition_benchmark, simulation_benchmark);
criterion::criterion_main!(benches);
