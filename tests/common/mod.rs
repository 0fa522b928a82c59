#![allow(dead_code)]

use std::f64::consts::TAU;

use approx::assert_abs_diff_eq;
use hifitime::Epoch;
use ndarray::Array2;
use quakescan::constants::{Hertz, Meter, Seconds};
use quakescan::lut::TravelTimeGrid;
use quakescan::params::ScanParams;
use quakescan::scan_errors::ScanError;
use quakescan::scanner::{WaveformSource, WaveformWindow};
use quakescan::signal::onset::OnsetWindow;
use quakescan::signal::ThreeComponent;
use quakescan::time::{seconds_since, sample_time};

pub const VP: f64 = 5000.0;
pub const VS: f64 = VP / 1.75;

pub fn reference_epoch() -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(2021, 3, 14)
}

pub fn station_names() -> Vec<String> {
    ["SW", "SE", "NW", "NE", "MID"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Surface stations at the corners and centre of the test grid.
pub fn station_positions() -> Vec<[Meter; 3]> {
    vec![
        [0.0, 0.0, 0.0],
        [6000.0, 0.0, 0.0],
        [0.0, 6000.0, 0.0],
        [6000.0, 6000.0, 0.0],
        [3000.0, 3000.0, 0.0],
    ]
}

pub fn distance(a: [Meter; 3], b: [Meter; 3]) -> Meter {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Homogeneous half-space travel times, `(P, S)`.
pub fn travel_times(source: [Meter; 3], station: [Meter; 3]) -> (Seconds, Seconds) {
    let d = distance(source, station);
    (d / VP, d / VS)
}

/// 7 × 7 × 3 grid with 1 km cells, origin at the south-west surface corner.
pub fn station_grid() -> TravelTimeGrid {
    let positions = station_positions();
    TravelTimeGrid::from_fn(
        [7, 7, 3],
        [1000.0; 3],
        [0.0; 3],
        station_names(),
        |coord, k| travel_times(coord, positions[k]),
    )
    .unwrap()
}

pub fn scan_params() -> ScanParams {
    ScanParams::builder()
        .sample_rate(100.0)
        .onset_win_p(OnsetWindow::new(0.1, 1.0))
        .onset_win_s(OnsetWindow::new(0.1, 1.0))
        .time_step(10.0)
        .detection_threshold(3.0)
        .minimum_repeat(10.0)
        .marginal_window(2.0)
        .workers(2)
        .build()
        .unwrap()
}

/// A synthetic earthquake: origin time and hypocentre.
#[derive(Debug, Clone, Copy)]
pub struct Quake {
    pub origin: Epoch,
    pub hypocentre: [Meter; 3],
}

/// Wavelet of an arrival: an 8 Hz sine under a 50 ms Gaussian envelope.
fn wavelet(dt: Seconds) -> f64 {
    if dt.abs() > 0.3 {
        return 0.0;
    }
    (-(dt / 0.05).powi(2)).exp() * (TAU * 8.0 * dt).sin()
}

/// Deterministic low-level noise keyed on the absolute sample number.
fn noise(sample: i64, station: usize, component: usize) -> f64 {
    let x = (sample as f64 * 12.9898 + station as f64 * 78.233 + component as f64 * 37.719)
        .sin()
        * 43758.5453;
    0.02 * (x - x.floor() - 0.5)
}

/// Waveform source synthesising P arrivals on the vertical and S arrivals on both horizontals.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub quakes: Vec<Quake>,
    pub positions: Vec<[Meter; 3]>,
    /// Stations reported as unavailable.
    pub dead: Vec<bool>,
    /// Requests overlapping one of these ranges fail.
    pub gaps: Vec<(Epoch, Epoch)>,
}

impl SyntheticSource {
    pub fn new(quakes: Vec<Quake>) -> Self {
        let positions = station_positions();
        SyntheticSource {
            quakes,
            dead: vec![false; positions.len()],
            positions,
            gaps: Vec::new(),
        }
    }
}

impl WaveformSource for SyntheticSource {
    fn fetch(
        &self,
        stations: &[String],
        start: Epoch,
        end: Epoch,
        rate: Hertz,
    ) -> Result<WaveformWindow, ScanError> {
        if self.gaps.iter().any(|&(a, b)| start <= b && a <= end) {
            return Err(ScanError::WaveformUnavailable(format!(
                "no data between {start} and {end}"
            )));
        }

        let nsamples = (seconds_since(end, start) * rate).round() as usize + 1;
        let offset = seconds_since(start, reference_epoch());
        let mut signal = ThreeComponent::zeros(stations.len(), nsamples);
        let mut components = [
            &mut signal.east,
            &mut signal.north,
            &mut signal.vertical,
        ];

        for k in (0..stations.len()).filter(|&k| !self.dead[k]) {
            for i in 0..nsamples {
                let t = offset + i as f64 / rate;
                let sample = (t * rate).round() as i64;
                let mut value = [
                    noise(sample, k, 0),
                    noise(sample, k, 1),
                    noise(sample, k, 2),
                ];
                for quake in &self.quakes {
                    let (tp, ts) = travel_times(quake.hypocentre, self.positions[k]);
                    let origin = seconds_since(quake.origin, reference_epoch());
                    let s = wavelet(t - origin - ts);
                    value[0] += s;
                    value[1] += 0.8 * s;
                    value[2] += wavelet(t - origin - tp);
                }
                for (c, array) in components.iter_mut().enumerate() {
                    array[[k, i]] = value[c];
                }
            }
        }

        Ok(WaveformWindow {
            start,
            sample_rate: rate,
            signal,
            availability: self.dead.iter().map(|d| !d).collect(),
        })
    }
}

/// Single-station onset trace holding one Gaussian bump.
pub fn gaussian_trace(nsamples: usize, centre: f64, width: f64, amplitude: f64) -> Array2<f64> {
    Array2::from_shape_fn((1, nsamples), |(_, i)| {
        amplitude * (-0.5 * ((i as f64 - centre) / width).powi(2)).exp()
    })
}

pub fn assert_time_close(actual: Epoch, expected: Epoch, tolerance: Seconds) {
    assert_abs_diff_eq!(seconds_since(actual, expected), 0.0, epsilon = tolerance);
}

pub fn assert_coord_close(actual: [Meter; 3], expected: [Meter; 3], tolerance: [Meter; 3]) {
    for axis in 0..3 {
        assert_abs_diff_eq!(actual[axis], expected[axis], epsilon = tolerance[axis]);
    }
}

/// Absolute time of `index` in a trace starting at the reference epoch.
pub fn at_sample(index: usize, rate: Hertz) -> Epoch {
    sample_time(reference_epoch(), rate, index)
}
