mod common;

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3, Array4};
use quakescan::location::LocationEstimator;
use quakescan::lut::{Phase, TravelTimeGrid, TravelTimeIndex};
use quakescan::migration::{CoalescenceMode, MigrationEngine};
use quakescan::params::ScanParams;

use crate::common::{assert_coord_close, station_grid};

const RATE: f64 = 100.0;
const ORIGIN_SAMPLE: usize = 150;
const PRE: usize = 100;
const POST: usize = 400;

/// Log-onset pulses placed at the rounded travel times from `cell`.
fn synthetic_onsets(lut: &TravelTimeGrid, cell: [usize; 3], nsamples: usize) -> [Array2<f64>; 2] {
    let flat = lut.flat_index(cell);
    [Phase::P, Phase::S].map(|phase| {
        let arrivals = lut.travel_time_samples(phase, flat, RATE);
        Array2::from_shape_fn((lut.station_count(), nsamples), |(k, i)| {
            let d = i as f64 - (ORIGIN_SAMPLE + arrivals[k]) as f64;
            (1.0 + 20.0 * (-0.5 * (d / 5.0).powi(2)).exp()).ln()
        })
    })
}

#[test]
fn test_migration_peaks_on_source_cell() {
    let lut = station_grid();
    let truth = [2, 4, 1];
    let [onset_p, onset_s] = synthetic_onsets(&lut, truth, 600);

    for mode in [CoalescenceMode::Unnormalised, CoalescenceMode::Normalised] {
        let engine = MigrationEngine::new(2, mode).unwrap();
        let out = engine
            .migrate(&onset_p, &onset_s, &lut, RATE, PRE, POST, 5)
            .unwrap();
        assert_eq!(out.nsamples(), 100);

        assert_eq!(lut.unflatten(out.max_cell[ORIGIN_SAMPLE - PRE]), truth);
        if mode == CoalescenceMode::Unnormalised {
            let peak = (0..out.nsamples())
                .reduce(|a, b| if out.max_value[b] > out.max_value[a] { b } else { a })
                .unwrap();
            assert_eq!(peak, ORIGIN_SAMPLE - PRE);
        }
    }
}

#[test]
fn test_unnormalised_peak_value_is_rescaled_stack() {
    let lut = station_grid();
    let [onset_p, onset_s] = synthetic_onsets(&lut, [5, 1, 1], 600);
    let engine = MigrationEngine::new(1, CoalescenceMode::Unnormalised).unwrap();
    let out = engine
        .migrate(&onset_p, &onset_s, &lut, RATE, PRE, POST, 5)
        .unwrap();

    // every channel contributes ln(21) at the source cell
    let expected = (21f64.ln() - 1.0).exp();
    assert_abs_diff_eq!(out.max_value[ORIGIN_SAMPLE - PRE], expected, epsilon = 1e-9);
}

#[test]
fn test_migrated_volume_locates_source() {
    let lut = station_grid();
    let truth = [2, 4, 1];
    let [onset_p, onset_s] = synthetic_onsets(&lut, truth, 600);
    let engine = MigrationEngine::new(2, CoalescenceMode::Unnormalised).unwrap();
    let out = engine
        .migrate(&onset_p, &onset_s, &lut, RATE, PRE, POST, 5)
        .unwrap();

    let estimator = LocationEstimator::from_params(&ScanParams::default());
    let location = estimator.locate(&out.volume, &lut).unwrap();
    let expected = lut.cell_to_coord(truth);
    assert_coord_close(location.gaussian, expected, [500.0; 3]);
    assert_coord_close(location.covariance_location, expected, [500.0; 3]);
    assert!(location.gaussian_sigma.iter().all(|s| s.is_finite() && *s > 0.0));
    assert!(location.covariance_sigma.iter().all(|s| s.is_finite()));
}

#[test]
fn test_delta_volume_covariance_location() {
    let lut = station_grid();
    let mut weights = Array3::zeros((7, 7, 3));
    weights[[3, 2, 0]] = 1.0;
    let cov = LocationEstimator::covariance(&weights, &lut).unwrap();
    assert_eq!(cov.location, [3000.0, 2000.0, 0.0]);
    assert!(cov.covariance.iter().all(|&v| v == 0.0));

    let mut volume = Array4::zeros((7, 7, 3, 4));
    volume[[3, 2, 0, 1]] = 1.0;
    let location = LocationEstimator::from_params(&ScanParams::default())
        .locate(&volume, &lut)
        .unwrap();
    assert_eq!(location.covariance_location, [3000.0, 2000.0, 0.0]);
}
