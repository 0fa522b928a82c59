//! Zero-phase Butterworth band-pass conditioning.
//!
//! Every channel is zeroed at its first sample, cosine tapered over [`TAPER_FRACTION`] of its
//! length and then filtered twice with the same digital Butterworth band-pass: once over the
//! time-reversed signal and once forward, which cancels the phase response.
//!
//! The digital filter is designed the classic way: `order` analog prototype poles are moved to a
//! band-pass of the pre-warped corners, mapped through the bilinear transform, and realised as
//! second-order sections (transposed direct form II) whose numerator is always `1 - z⁻²`.

use ndarray::{Array2, ArrayView1, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::constants::{Hertz, TAPER_FRACTION};
use crate::scan_errors::ScanError;

/// Band-pass corners and order, `[low, high, order]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPass {
    pub low: Hertz,
    pub high: Hertz,
    pub order: usize,
}

impl BandPass {
    pub fn new(low: Hertz, high: Hertz, order: usize) -> Self {
        BandPass { low, high, order }
    }
}

impl fmt::Display for BandPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}-{:.2} Hz, order {}]",
            self.low, self.high, self.order
        )
    }
}

/// Second-order section with numerator `1 - z⁻²` and denominator `1 + a1·z⁻¹ + a2·z⁻²`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Section {
    a1: f64,
    a2: f64,
}

impl Section {
    /// Run the section in place, starting from rest.
    fn run(&self, samples: &mut [f64]) {
        let (mut s1, mut s2) = (0.0, 0.0);
        for x in samples.iter_mut() {
            let input = *x;
            let output = input + s1;
            s1 = -self.a1 * output + s2;
            s2 = -input - self.a2 * output;
            *x = output;
        }
    }
}

/// Digital Butterworth band-pass as a cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthBandPass {
    sections: Vec<Section>,
    gain: f64,
}

impl ButterworthBandPass {
    /// Design the band-pass for a given sampling rate.
    ///
    /// Arguments
    /// -----------------
    /// * `band`: corners (Hz) and prototype order.
    /// * `rate`: sampling rate (Hz).
    ///
    /// Return
    /// ----------
    /// * The designed filter, or [`ScanError::InvalidFilter`] if the corners are not ordered
    ///   inside `(0, rate/2)` or the order is zero.
    pub fn design(band: &BandPass, rate: Hertz) -> Result<Self, ScanError> {
        let nyquist = rate / 2.0;
        if !(band.low > 0.0 && band.low < band.high && band.high < nyquist) {
            return Err(ScanError::InvalidFilter(format!(
                "corners {band} must satisfy 0 < low < high < {nyquist} Hz"
            )));
        }
        if band.order == 0 {
            return Err(ScanError::InvalidFilter("order must be >= 1".into()));
        }

        let n = band.order;
        let fs2 = 2.0 * rate;
        let wl = fs2 * (PI * band.low / rate).tan();
        let wh = fs2 * (PI * band.high / rate).tan();
        let bw = wh - wl;
        let w0_sq = Complex64::new(wl * wh, 0.0);

        // analog prototype -> analog band-pass (2n poles, n zeros at the origin)
        let mut analog = Vec::with_capacity(2 * n);
        for k in 0..n {
            let m = 2.0 * k as f64 - n as f64 + 1.0;
            let proto = -Complex64::new(0.0, PI * m / (2.0 * n as f64)).exp();
            let shifted = proto * (bw / 2.0);
            let disc = (shifted * shifted - w0_sq).sqrt();
            analog.push(shifted + disc);
            analog.push(shifted - disc);
        }

        // bilinear transform; zeros land on +1 (origin) and -1 (infinity)
        let fs2c = Complex64::new(fs2, 0.0);
        let mut denom = Complex64::new(1.0, 0.0);
        let digital: Vec<Complex64> = analog
            .iter()
            .map(|&p| {
                denom *= fs2c - p;
                (fs2c + p) / (fs2c - p)
            })
            .collect();
        let gain = ((bw * fs2).powi(n as i32) / denom).re;

        let sections = pair_poles(&digital)?;
        Ok(ButterworthBandPass { sections, gain })
    }

    /// Filter a signal forward, starting from rest.
    pub fn apply(&self, samples: &mut [f64]) {
        for section in &self.sections {
            section.run(samples);
        }
        samples.iter_mut().for_each(|x| *x *= self.gain);
    }

    pub fn order(&self) -> usize {
        self.sections.len()
    }
}

/// Group digital poles into conjugate (or real) pairs, one per second-order section.
fn pair_poles(poles: &[Complex64]) -> Result<Vec<Section>, ScanError> {
    const IMAG_EPS: f64 = 1e-12;
    let mut sections = Vec::with_capacity(poles.len() / 2);
    let mut reals = Vec::new();

    for p in poles {
        if p.im > IMAG_EPS {
            sections.push(Section {
                a1: -2.0 * p.re,
                a2: p.norm_sqr(),
            });
        } else if p.im.abs() <= IMAG_EPS {
            reals.push(p.re);
        }
    }

    if reals.len() % 2 != 0 {
        return Err(ScanError::InvalidFilter(
            "unpaired real pole in band-pass design".into(),
        ));
    }
    reals.sort_by(|a, b| a.total_cmp(b));
    for pair in reals.chunks(2) {
        sections.push(Section {
            a1: -(pair[0] + pair[1]),
            a2: pair[0] * pair[1],
        });
    }

    if sections.len() * 2 != poles.len() {
        return Err(ScanError::InvalidFilter(
            "band-pass poles do not come in conjugate pairs".into(),
        ));
    }
    Ok(sections)
}

/// Cosine taper covering `fraction` of `npts` samples, half at each end.
pub fn cosine_taper(npts: usize, fraction: f64) -> Vec<f64> {
    let mut window = vec![1.0; npts];
    let frac = (npts as f64 * fraction / 2.0 + 0.5) as usize;
    if frac == 0 || npts == 0 {
        return window;
    }

    let (idx1, idx2) = (0, frac - 1);
    let (idx3, idx4) = (npts - frac, npts - 1);

    if idx1 == idx2 {
        window[idx1] = 0.0;
    } else {
        for (i, w) in window.iter_mut().enumerate().take(idx2 + 1) {
            *w = 0.5 * (1.0 - (PI * (i - idx1) as f64 / (idx2 - idx1) as f64).cos());
        }
    }

    if idx3 == idx4 {
        window[idx3] = 0.0;
    } else {
        for (i, w) in window.iter_mut().enumerate().skip(idx3) {
            *w = 0.5 * (1.0 + (PI * (idx3 as f64 - i as f64) / (idx4 - idx3) as f64).cos());
        }
    }
    window
}

/// Condition one channel: baseline removal, taper, reverse pass, forward pass.
fn condition_channel(channel: ArrayView1<f64>, taper: &[f64], filter: &ButterworthBandPass) -> Vec<f64> {
    let mut trace: Vec<f64> = channel
        .iter()
        .map(|&x| if x.is_finite() { x } else { 0.0 })
        .collect();
    let Some(&first) = trace.first() else {
        return trace;
    };

    trace
        .iter_mut()
        .zip(taper)
        .for_each(|(x, w)| *x = (*x - first) * w);

    trace.reverse();
    filter.apply(&mut trace);
    trace.reverse();
    filter.apply(&mut trace);
    trace
}

/// Band-pass a `[channel, sample]` matrix, returning a filtered copy of the same shape.
///
/// Non-finite input samples are treated as zeros so that a broken channel cannot spread NaN
/// into the onset of its neighbours.
pub fn condition(signal: &Array2<f64>, rate: Hertz, band: &BandPass) -> Result<Array2<f64>, ScanError> {
    let filter = ButterworthBandPass::design(band, rate)?;
    let taper = cosine_taper(signal.ncols(), TAPER_FRACTION);

    let mut out = Array2::zeros(signal.raw_dim());
    for (src, mut dst) in signal.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let filtered = condition_channel(src, &taper, &filter);
        dst.iter_mut().zip(filtered).for_each(|(d, v)| *d = v);
    }
    Ok(out)
}
