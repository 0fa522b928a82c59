use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quakescan::lut::TravelTimeGrid;
use quakescan::migration::{CoalescenceMode, MigrationEngine};
use quakescan::params::ScanParams;
use quakescan::signal::{compute_onsets, ThreeComponent};

const RATE: f64 = 100.0;
const NSTATIONS: usize = 8;
const NSAMPLES: usize = 3000;

/// 20 × 20 × 10 grid of 500 m cells, stations scattered on the surface.
fn grid(rng: &mut StdRng) -> TravelTimeGrid {
    let stations: Vec<[f64; 2]> = (0..NSTATIONS)
        .map(|_| [rng.random_range(0.0..10_000.0), rng.random_range(0.0..10_000.0)])
        .collect();
    TravelTimeGrid::from_fn(
        [20, 20, 10],
        [500.0; 3],
        [0.0; 3],
        (0..NSTATIONS).map(|k| format!("ST{k:02}")).collect(),
        |c, k| {
            let d = ((c[0] - stations[k][0]).powi(2) + (c[1] - stations[k][1]).powi(2) + c[2] * c[2])
                .sqrt();
            (d / 5000.0, d / 2900.0)
        },
    )
    .unwrap()
}

fn random_traces(rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((NSTATIONS, NSAMPLES), |_| rng.random_range(0.0..2.0))
}

fn bench_migrate(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let lut = grid(&mut rng);
    let onset_p = random_traces(&mut rng);
    let onset_s = random_traces(&mut rng);

    let mut group = c.benchmark_group("migrate_window");
    for workers in [1, 4] {
        let engine = MigrationEngine::new(workers, CoalescenceMode::Unnormalised).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(workers), &engine, |b, engine| {
            b.iter(|| {
                let out = engine
                    .migrate(
                        black_box(&onset_p),
                        black_box(&onset_s),
                        &lut,
                        RATE,
                        500,
                        800,
                        NSTATIONS,
                    )
                    .unwrap();
                black_box(out.max_value);
            })
        });
    }
    group.finish();
}

fn bench_onsets(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xF11);
    let noise = |rng: &mut StdRng| {
        Array2::from_shape_fn((NSTATIONS, NSAMPLES), |_| rng.random_range(-1.0..1.0))
    };
    let signal = ThreeComponent::new(noise(&mut rng), noise(&mut rng), noise(&mut rng)).unwrap();
    let params = ScanParams::default();

    c.bench_function("compute_onsets/8x3000", |b| {
        b.iter(|| black_box(compute_onsets(black_box(&signal), &params).unwrap()))
    });
}

criterion_group!(benches, bench_migrate, bench_onsets);
criterion_main!(benches);
