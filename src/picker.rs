//! # Arrival picking
//!
//! Per station and phase, the picker looks for the onset peak near the modelled arrival and fits
//! a Gaussian to it.
//!
//! Search window
//! -----------------
//! With `i_p`, `i_s` the modelled P and S arrival samples of a station, the window of a phase
//! arriving at `i` is the intersection of
//!
//! * `int(i ± (i_s − i_p)/2)` (half the S−P separation, in floating point before truncation), and
//! * `i ± int((marginal_window + tt·percentage_tt)·rate)`,
//!
//! clipped to the trace and exclusive at its upper end.
//!
//! Fit
//! -----------------
//! The exceedance level is the `pick_threshold` quantile (linear interpolation) of the whole onset
//! trace. The peak must be strictly greater than that level: a peak equal to it (a flat trace,
//! or `pick_threshold = 1` with the peak at the trace maximum) leaves the phase unpicked.
//! Otherwise the contiguous run of samples above the level around the peak, limited to one period
//! of the low corner on each side, is fitted with `a·exp(−(x−b)²/(2c²))` by Levenberg–Marquardt, seeded with the
//! observed peak, its time and one low-corner period.
//!
//! Failures are returned as [`PickFailure`] and only turned into `-1` sentinels when the
//! [`Pick`] record is assembled.
use hifitime::Epoch;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use thiserror::Error;

use crate::coalescence::Pick;
use crate::constants::{Hertz, Seconds, GAUSS_FIT_MAX_ITER, GAUSS_FIT_TOL};
use crate::lut::Phase;
use crate::params::ScanParams;
use crate::time::{seconds, seconds_since};

/// Why a phase could not be picked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickFailure {
    #[error("search window lies outside the onset trace")]
    EmptyWindow,

    #[error("onset peak does not exceed the pick threshold")]
    BelowThreshold,

    #[error("only {0} sample(s) above the pick threshold")]
    TooFewSamples(usize),

    #[error("Gaussian fit did not converge")]
    NotConverged,

    #[error("Gaussian fit returned non-finite or zero-width parameters")]
    InvalidFit,
}

/// Parameters of `a·exp(−(x−b)²/(2c²))`, with `sigma = |c|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub centre: f64,
    pub sigma: f64,
    pub iterations: usize,
}

#[inline]
fn gaussian(x: f64, p: &Vector3<f64>) -> f64 {
    let d = x - p[1];
    p[0] * (-d * d / (2.0 * p[2] * p[2])).exp()
}

fn sum_sq(x: &[f64], y: &[f64], p: &Vector3<f64>) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - gaussian(xi, p);
            r * r
        })
        .sum()
}

/// `JᵀJ` and `Jᵀr` of the Gaussian model at `p`.
fn normal_equations(x: &[f64], y: &[f64], p: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let (a, b, c) = (p[0], p[1], p[2]);
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    for (&xi, &yi) in x.iter().zip(y) {
        let d = xi - b;
        let e = (-d * d / (2.0 * c * c)).exp();
        let row = Vector3::new(e, a * e * d / (c * c), a * e * d * d / (c * c * c));
        jtj += row * row.transpose();
        jtr += row * (yi - a * e);
    }
    (jtj, jtr)
}

/// Least-squares Gaussian fit by Levenberg–Marquardt.
///
/// Arguments
/// -----------------
/// * `x`, `y`: samples to fit, at least three.
/// * `seed`: initial `[amplitude, centre, width]`.
///
/// Return
/// ----------
/// * The fitted parameters, or the reason the fit was rejected.
pub fn fit_gaussian(x: &[f64], y: &[f64], seed: [f64; 3]) -> Result<GaussianFit, PickFailure> {
    if x.len() != y.len() || x.len() < 3 {
        return Err(PickFailure::TooFewSamples(x.len().min(y.len())));
    }

    let finish = |p: Vector3<f64>, iterations: usize| {
        if p.iter().all(|v| v.is_finite()) && p[2] != 0.0 {
            Ok(GaussianFit {
                amplitude: p[0],
                centre: p[1],
                sigma: p[2].abs(),
                iterations,
            })
        } else {
            Err(PickFailure::InvalidFit)
        }
    };

    let mut p = Vector3::from(seed);
    let mut cost = sum_sq(x, y, &p);
    if !cost.is_finite() {
        return Err(PickFailure::InvalidFit);
    }
    let mut lambda = 1e-3;

    for iter in 1..=GAUSS_FIT_MAX_ITER {
        let (jtj, jtr) = normal_equations(x, y, &p);
        let mut damped = jtj;
        for i in 0..3 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(f64::EPSILON);
        }

        let trial = damped
            .cholesky()
            .map(|ch| p + ch.solve(&jtr))
            .filter(|t| t.iter().all(|v| v.is_finite()));
        let trial_cost = trial.map(|t| sum_sq(x, y, &t));

        match (trial, trial_cost) {
            (Some(t), Some(c)) if c.is_finite() && c <= cost => {
                let converged = (t - p).norm() <= GAUSS_FIT_TOL * (p.norm() + GAUSS_FIT_TOL)
                    || cost - c <= GAUSS_FIT_TOL * cost;
                p = t;
                cost = c;
                lambda = (lambda / 10.0).max(1e-12);
                if converged {
                    return finish(p, iter);
                }
            }
            _ => {
                lambda *= 10.0;
                // no damped step improves the fit any more
                if lambda > 1e16 {
                    return finish(p, iter);
                }
            }
        }
    }
    Err(PickFailure::NotConverged)
}

/// `q`-quantile of `values` with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Gaussian picker of P and S arrivals.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalPicker {
    pub sample_rate: Hertz,
    pub marginal_window: Seconds,
    pub percentage_tt: f64,
    pub pick_threshold: f64,
    pub low_corner_p: Hertz,
    pub low_corner_s: Hertz,
}

impl ArrivalPicker {
    pub fn from_params(params: &ScanParams) -> Self {
        ArrivalPicker {
            sample_rate: params.sample_rate,
            marginal_window: params.marginal_window,
            percentage_tt: params.percentage_tt,
            pick_threshold: params.pick_threshold,
            low_corner_p: params.low_corner(Phase::P),
            low_corner_s: params.low_corner(Phase::S),
        }
    }

    fn low_corner(&self, phase: Phase) -> Hertz {
        match phase {
            Phase::P => self.low_corner_p,
            Phase::S => self.low_corner_s,
        }
    }

    /// Fit one phase on one onset trace.
    ///
    /// Arguments
    /// -----------------
    /// * `trace`: onset trace of the station for this phase.
    /// * `phase`: phase being picked.
    /// * `trace_start`: time of the first sample of `trace`.
    /// * `event_time`: origin time of the event.
    /// * `tt_p`, `tt_s`: modelled travel times to the station (s).
    ///
    /// Return
    /// ----------
    /// * The Gaussian fit, with `centre` in seconds after `trace_start`.
    pub fn fit_phase(
        &self,
        trace: ArrayView1<f64>,
        phase: Phase,
        trace_start: Epoch,
        event_time: Epoch,
        tt_p: Seconds,
        tt_s: Seconds,
    ) -> Result<GaussianFit, PickFailure> {
        let rate = self.sample_rate;
        let n = trace.len() as i64;
        let offset = seconds_since(event_time, trace_start);
        let idx_p = ((offset + tt_p) * rate).round() as i64;
        let idx_s = ((offset + tt_s) * rate).round() as i64;
        let (idx, tt) = match phase {
            Phase::P => (idx_p, tt_p),
            Phase::S => (idx_s, tt_s),
        };

        let half_sep = (idx_s - idx_p) as f64 / 2.0;
        let reach = ((self.marginal_window + tt * self.percentage_tt) * rate) as i64;
        let lo = ((idx as f64 - half_sep) as i64).max(idx - reach).max(0);
        let hi = ((idx as f64 + half_sep) as i64).min(idx + reach).min(n);
        if lo >= hi {
            return Err(PickFailure::EmptyWindow);
        }
        let (lo, hi) = (lo as usize, hi as usize);

        let values: Vec<f64> = trace.iter().copied().collect();
        let threshold = quantile(&values, self.pick_threshold);

        let peak = (lo..hi).fold(lo, |best, i| if values[i] > values[best] { i } else { best });
        if values[peak] <= threshold {
            return Err(PickFailure::BelowThreshold);
        }

        let period = (rate / self.low_corner(phase)) as usize;
        let first = (lo.max(peak.saturating_sub(period))..=peak)
            .rev()
            .take_while(|&i| values[i] > threshold)
            .last()
            .unwrap_or(peak);
        let last = (peak..hi.min(peak + period + 1))
            .take_while(|&i| values[i] > threshold)
            .last()
            .unwrap_or(peak);

        let x: Vec<f64> = (first..=last).map(|i| i as f64 / rate).collect();
        let y = &values[first..=last];
        let seed = [values[peak], peak as f64 / rate, period as f64 / rate];
        fit_gaussian(&x, y, seed)
    }

    /// Pick one phase and wrap the outcome in a [`Pick`] record.
    #[allow(clippy::too_many_arguments)]
    pub fn pick_phase(
        &self,
        station: &str,
        trace: ArrayView1<f64>,
        phase: Phase,
        trace_start: Epoch,
        event_time: Epoch,
        tt_p: Seconds,
        tt_s: Seconds,
    ) -> Pick {
        let tt = match phase {
            Phase::P => tt_p,
            Phase::S => tt_s,
        };
        let modelled_time = event_time + seconds(tt);
        match self.fit_phase(trace, phase, trace_start, event_time, tt_p, tt_s) {
            Ok(fit) => Pick {
                station: station.to_string(),
                phase,
                modelled_time,
                time: Some(trace_start + seconds(fit.centre)),
                uncertainty: fit.sigma,
                amplitude: fit.amplitude,
                failure: None,
            },
            Err(failure) => Pick::unpicked(station.to_string(), phase, modelled_time, failure),
        }
    }

    /// P and S picks of every station, stations processed in parallel.
    ///
    /// Picks come back in station order, P before S.
    #[allow(clippy::too_many_arguments)]
    pub fn pick_all(
        &self,
        stations: &[String],
        onset_p: &Array2<f64>,
        onset_s: &Array2<f64>,
        trace_start: Epoch,
        event_time: Epoch,
        tt_p: &[Seconds],
        tt_s: &[Seconds],
    ) -> Vec<Pick> {
        (0..stations.len())
            .into_par_iter()
            .flat_map_iter(|k| {
                let (tp, ts) = (tt_p[k], tt_s[k]);
                [
                    self.pick_phase(
                        &stations[k],
                        onset_p.row(k),
                        Phase::P,
                        trace_start,
                        event_time,
                        tp,
                        ts,
                    ),
                    self.pick_phase(
                        &stations[k],
                        onset_s.row(k),
                        Phase::S,
                        trace_start,
                        event_time,
                        tp,
                        ts,
                    ),
                ]
            })
            .collect()
    }
}
