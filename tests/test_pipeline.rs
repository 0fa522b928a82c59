mod common;

use approx::assert_relative_eq;
use hifitime::Epoch;
use ndarray::Axis;
use quakescan::coalescence::EventRecord;
use quakescan::lut::TravelTimeIndex;
use quakescan::migration::{rescale, CoalescenceMode};
use quakescan::picker::PickFailure;
use quakescan::quakescan::QuakeScan;
use quakescan::scanner::{Padding, ScanSummary};
use quakescan::store::MemoryStore;
use quakescan::time::seconds;

use crate::common::{
    assert_coord_close, assert_time_close, reference_epoch, scan_params, station_grid, Quake,
    SyntheticSource,
};

fn quake(origin: f64, hypocentre: [f64; 3]) -> Quake {
    Quake {
        origin: reference_epoch() + seconds(origin),
        hypocentre,
    }
}

fn first_quake() -> Quake {
    quake(25.3, [2000.0, 4000.0, 1000.0])
}

fn second_quake() -> Quake {
    quake(60.0, [5000.0, 1000.0, 1000.0])
}

fn at(offset: f64) -> Epoch {
    reference_epoch() + seconds(offset)
}

fn check_record(record: &EventRecord, truth: &Quake) {
    assert_time_close(record.time, truth.origin, 0.2);
    assert_coord_close(record.coord, truth.hypocentre, [1000.0; 3]);
    assert_coord_close(record.location.gaussian, truth.hypocentre, [600.0, 600.0, 1000.0]);
    assert!(record.location.gaussian_sigma.iter().all(|s| s.is_finite()));
}

#[test]
fn test_scan_detects_and_locates_two_quakes() {
    let source = SyntheticSource::new(vec![first_quake(), second_quake()]);
    let scan = QuakeScan::new(scan_params(), &station_grid()).unwrap();
    let mut store = MemoryStore::new(100.0);

    let summary = scan
        .scan_continuous(&source, &mut store, at(0.0), at(80.0))
        .unwrap();
    assert_eq!(
        summary,
        ScanSummary {
            windows: 8,
            skipped: 0,
            samples: 8000
        }
    );
    assert_eq!(store.series.len(), 8000);

    let records = scan
        .trigger_and_locate(&source, &mut store, at(0.0), at(80.0))
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(store.events, records);
    assert!(store.volumes.is_empty());

    for (record, truth) in records.iter().zip([first_quake(), second_quake()]) {
        check_record(record, &truth);
        assert_eq!(record.picks.len(), 10);
        assert!(record.picked_count() >= 7);
        for pick in record.picks.iter().filter(|p| p.is_picked()) {
            assert!(pick.residual().abs() < 0.2, "{pick:?}");
            assert!(pick.uncertainty > 0.0);
        }
    }
}

#[test]
fn test_dead_station_is_left_unpicked() {
    let mut source = SyntheticSource::new(vec![first_quake()]);
    source.dead[4] = true;
    let scan = QuakeScan::new(scan_params(), &station_grid()).unwrap();
    let mut store = MemoryStore::new(100.0);

    scan.scan_continuous(&source, &mut store, at(0.0), at(40.0))
        .unwrap();
    let records = scan
        .trigger_and_locate(&source, &mut store, at(0.0), at(40.0))
        .unwrap();
    assert_eq!(records.len(), 1);
    check_record(&records[0], &first_quake());

    let dead: Vec<_> = records[0]
        .picks
        .iter()
        .filter(|p| p.station == "MID")
        .collect();
    assert_eq!(dead.len(), 2);
    for pick in dead {
        assert!(!pick.is_picked());
        assert_eq!(pick.failure, Some(PickFailure::BelowThreshold));
    }
}

#[test]
fn test_window_rescaled_with_available_stations() {
    let mut source = SyntheticSource::new(vec![first_quake()]);
    source.dead[4] = true;
    let scan = QuakeScan::new(scan_params(), &station_grid()).unwrap();
    let pad = Padding::from_params(scan.params(), scan.lut());

    let products = scan
        .scanner(&source)
        .compute_window(at(20.0), at(30.0), &pad)
        .unwrap();
    assert_eq!(products.availability, vec![true, true, true, true, false]);
    assert!(products.onsets.p.log.row(4).iter().all(|&v| v == 0.0));
    assert!(products.onsets.s.log.row(4).iter().all(|&v| v == 0.0));

    let migration = &products.migration;
    let ncells = scan.lut().cell_count();
    for (t, &value) in migration.max_value.iter().enumerate() {
        let raw = migration
            .volume
            .index_axis(Axis(3), t)
            .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        assert_relative_eq!(
            value,
            rescale(CoalescenceMode::Unnormalised, raw, 4, ncells),
            max_relative = 1e-12
        );
    }

    let peak = products.peak_sample().unwrap();
    let raw_peak = migration
        .volume
        .index_axis(Axis(3), peak)
        .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    assert!(raw_peak > 0.0);
    let all_stations = rescale(CoalescenceMode::Unnormalised, raw_peak, 5, ncells);
    assert!((migration.max_value[peak] - all_stations).abs() > 1e-6);
}

#[test]
fn test_missing_data_skips_window() {
    let mut source = SyntheticSource::new(vec![first_quake()]);
    source.gaps.push((at(35.0), at(36.0)));
    let scan = QuakeScan::new(scan_params(), &station_grid()).unwrap();
    let mut store = MemoryStore::new(100.0);

    let summary = scan
        .scan_continuous(&source, &mut store, at(0.0), at(40.0))
        .unwrap();
    assert_eq!(summary.windows, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(store.series.len(), 3000);

    let records = scan
        .trigger_and_locate(&source, &mut store, at(0.0), at(40.0))
        .unwrap();
    assert_eq!(records.len(), 1);
    check_record(&records[0], &first_quake());
}

#[test]
fn test_retained_volume_per_event() {
    let source = SyntheticSource::new(vec![first_quake()]);
    let mut params = scan_params();
    params.retain_volume = true;
    let scan = QuakeScan::new(params, &station_grid()).unwrap();
    let mut store = MemoryStore::new(100.0);

    scan.scan_continuous(&source, &mut store, at(0.0), at(30.0))
        .unwrap();
    let records = scan
        .trigger_and_locate(&source, &mut store, at(0.0), at(30.0))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(store.volumes.len(), 1);

    let (id, volume) = &store.volumes[0];
    assert_eq!(id, &records[0].event.event_id);
    let shape = volume.shape();
    assert_eq!(&shape[..3], &[7, 7, 3]);
    assert_eq!(shape[3], 401);
}

#[test]
fn test_grid_is_decimated_once() {
    let mut params = scan_params();
    params.decimate = [2, 2, 1];
    let grid = station_grid();
    let scan = QuakeScan::new(params, &grid).unwrap();
    assert_eq!(scan.lut().shape(), [4, 4, 3]);
    assert_eq!(scan.lut().cell_size(), [2000.0, 2000.0, 1000.0]);
    assert_eq!(grid.shape(), [7, 7, 3]);
}
