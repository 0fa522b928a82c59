//! Centred STA/LTA onset functions.
//!
//! The onset of a channel is the ratio of a short-term to a long-term moving average of its
//! squared amplitude, both computed from one cumulative sum. The short window is centred on the
//! sample, the long window trails it. Samples where either window is incomplete are zeroed.
//!
//! The migration input is `ln(max(1 + ratio, 1))`, which is monotone in the ratio and compresses
//! large values; the raw ratio is kept alongside it for diagnostics.

use ndarray::{Array2, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{Hertz, Seconds};

/// STA/LTA window lengths in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetWindow {
    pub short: Seconds,
    pub long: Seconds,
}

impl OnsetWindow {
    pub fn new(short: Seconds, long: Seconds) -> Self {
        OnsetWindow { short, long }
    }

    /// Inclusive window lengths in samples: `round(seconds · rate) + 1`.
    pub fn samples(&self, rate: Hertz) -> (usize, usize) {
        (
            (self.short * rate).round() as usize + 1,
            (self.long * rate).round() as usize + 1,
        )
    }
}

impl fmt::Display for OnsetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2} s / {:.2} s]", self.short, self.long)
    }
}

/// Raw and log-scaled onset functions, `[station, sample]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetTraces {
    pub raw: Array2<f64>,
    pub log: Array2<f64>,
}

impl OnsetTraces {
    pub fn nstations(&self) -> usize {
        self.log.nrows()
    }

    pub fn nsamples(&self) -> usize {
        self.log.ncols()
    }
}

/// Centred STA/LTA ratio of one channel.
///
/// Arguments
/// -----------------
/// * `a`: channel samples.
/// * `nsta`: short window length in samples.
/// * `nlta`: long window length in samples.
///
/// Return
/// ----------
/// * The ratio, zero over the first `nlta − 1` and the last `nsta` samples. LTA values below
///   `f64::MIN_POSITIVE` are replaced by it, so the division never sees a zero denominator.
pub fn sta_lta_centred(a: &[f64], nsta: usize, nlta: usize) -> Vec<f64> {
    let n = a.len();
    let cumsum: Vec<f64> = a
        .iter()
        .scan(0.0, |acc, &x| {
            *acc += x * x;
            Some(*acc)
        })
        .collect();

    let mut sta = cumsum.clone();
    for i in nsta..n {
        sta[i] = cumsum[i] - cumsum[i - nsta];
    }
    // centre the short window: shift the differenced sums left by nsta
    for i in nsta..n.saturating_sub(nsta) {
        sta[i] = sta[i + nsta];
    }

    let mut lta = cumsum.clone();
    for i in nlta..n {
        lta[i] = cumsum[i] - cumsum[i - nlta];
    }

    let head = nlta.saturating_sub(1).min(n);
    let tail = n.saturating_sub(nsta);

    sta.iter()
        .zip(lta.iter())
        .enumerate()
        .map(|(i, (&s, &l))| {
            if i < head || i >= tail {
                return 0.0;
            }
            let l = (l / nlta as f64).max(f64::MIN_POSITIVE);
            s / nsta as f64 / l
        })
        .collect()
}

fn channel_onset(channel: ArrayView1<f64>, nsta: usize, nlta: usize) -> Vec<f64> {
    let clean: Vec<f64> = channel
        .iter()
        .map(|&x| if x.is_finite() { x } else { 0.0 })
        .collect();
    if clean.iter().all(|&x| x == 0.0) {
        return vec![0.0; clean.len()];
    }
    sta_lta_centred(&clean, nsta, nlta)
        .into_iter()
        .map(|r| if r.is_nan() { 0.0 } else { r.min(f64::MAX) })
        .collect()
}

/// Onset functions of every channel of a `[channel, sample]` matrix, computed independently.
///
/// Channels that are identically zero (or carry no finite sample) produce an all-zero onset.
pub fn onset(signal: &Array2<f64>, nsta: usize, nlta: usize) -> OnsetTraces {
    let mut raw = Array2::zeros(signal.raw_dim());
    for (src, mut dst) in signal.axis_iter(Axis(0)).zip(raw.axis_iter_mut(Axis(0))) {
        dst.iter_mut()
            .zip(channel_onset(src, nsta, nlta))
            .for_each(|(d, v)| *d = v);
    }
    let log = raw.mapv(|r| (1.0 + r).max(1.0).ln());
    OnsetTraces { raw, log }
}

/// P onset: the vertical channel of every station.
pub fn compute_p_onset(vertical: &Array2<f64>, window: &OnsetWindow, rate: Hertz) -> OnsetTraces {
    let (nsta, nlta) = window.samples(rate);
    onset(vertical, nsta, nlta)
}

/// S onset: the east and north onsets combined as `sqrt((e² + n²)/2)`.
pub fn compute_s_onset(
    east: &Array2<f64>,
    north: &Array2<f64>,
    window: &OnsetWindow,
    rate: Hertz,
) -> OnsetTraces {
    let (nsta, nlta) = window.samples(rate);
    let e = onset(east, nsta, nlta);
    let n = onset(north, nsta, nlta);

    let combine = |a: &Array2<f64>, b: &Array2<f64>| {
        Zip::from(a)
            .and(b)
            .map_collect(|&x, &y| ((x * x + y * y) / 2.0).sqrt())
    };
    OnsetTraces {
        raw: combine(&e.raw, &n.raw),
        log: combine(&e.log, &n.log),
    }
}

#[cfg(test)]
mod onset_test {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_window_samples() {
        let win = OnsetWindow::new(0.2, 1.0);
        assert_eq!(win.samples(100.0), (21, 101));
    }

    #[test]
    fn test_zero_channel_gives_zero_onset() {
        let signal = Array2::zeros((3, 400));
        let traces = onset(&signal, 5, 50);
        assert!(traces.raw.iter().all(|&v| v == 0.0));
        assert!(traces.log.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_edges_zeroed_and_finite() {
        let a: Vec<f64> = (0..300).map(|i| ((i as f64) * 0.37).sin()).collect();
        let ratio = sta_lta_centred(&a, 5, 50);
        assert!(ratio[..49].iter().all(|&v| v == 0.0));
        assert!(ratio[295..].iter().all(|&v| v == 0.0));
        assert!(ratio.iter().all(|v| v.is_finite()));
        assert!(ratio[100] > 0.0);
    }

    #[test]
    fn test_constant_energy_ratio_is_one() {
        let a = vec![2.0; 400];
        let ratio = sta_lta_centred(&a, 10, 100);
        assert_relative_eq!(ratio[200], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_leading_silence_uses_numeric_floor() {
        let mut a = vec![0.0; 300];
        a[250] = 1.0;
        let ratio = sta_lta_centred(&a, 5, 20);
        assert!(ratio.iter().all(|v| v.is_finite()));
        assert!(ratio[245] > 0.0);
    }

    #[test]
    fn test_dead_channel_does_not_poison_neighbour() {
        let mut signal = Array2::zeros((2, 300));
        for i in 0..300 {
            signal[[0, i]] = f64::NAN;
            signal[[1, i]] = if i > 150 { 5.0 } else { 1.0 } * ((i as f64) * 0.9).sin();
        }
        let traces = onset(&signal, 5, 50);
        assert!(traces.log.row(0).iter().all(|&v| v == 0.0));
        assert!(traces.log.row(1).iter().any(|&v| v > 1.0));
    }

    #[test]
    fn test_s_onset_combines_horizontals() {
        let mut east = Array2::zeros((1, 300));
        for i in 0..300 {
            east[[0, i]] = if i > 150 { 4.0 } else { 1.0 } * ((i as f64) * 0.7).sin();
        }
        let north = Array2::zeros((1, 300));
        let win = OnsetWindow::new(0.05, 0.5);
        let s = compute_s_onset(&east, &north, &win, 100.0);
        let e = compute_p_onset(&east, &win, 100.0);
        for i in 0..300 {
            assert_relative_eq!(s.log[[0, i]], e.log[[0, i]] / 2f64.sqrt(), epsilon = 1e-12);
        }
    }
}
