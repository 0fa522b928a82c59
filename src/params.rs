//! # Scan parameters
//!
//! This module defines the [`crate::params::ScanParams`] configuration struct and its builder,
//! which control how the scanner conditions waveforms, computes onset functions, migrates them
//! through the travel-time grid, triggers events and estimates picks and locations.
//!
//! ## Purpose
//!
//! The [`ScanParams`](crate::params::ScanParams) object centralizes every tunable used by
//! [`QuakeScan`](crate::quakescan::QuakeScan). It lets you:
//!
//! - Choose the band-pass corners/order and the STA/LTA windows per phase,
//! - Set the continuous-scan step and the grid decimation applied before a run,
//! - Select the coalescence normalisation mode and the migration worker count,
//! - Tune the trigger (detection threshold, minimum repeat, marginal window),
//! - Tune the picker (pick-threshold quantile, travel-time widening),
//! - Tune the location estimator (sharpening cutoff, quadratic-fit boxes).
//!
//! ## Pipeline overview
//!
//! 1. **Continuous scan**
//!    Windows of `time_step` seconds, widened by the pre/post pads, are band-passed with
//!    `bp_filter_p`/`bp_filter_s`, turned into onset functions with `onset_win_p`/`onset_win_s`
//!    and migrated in `mode` using `workers` threads.
//!
//! 2. **Trigger**
//!    Samples above `detection_threshold` are grouped into runs and merged when closer than
//!    `minimum_repeat`; each event keeps a `marginal_window` on either side of its peak.
//!
//! 3. **Pick & locate**
//!    Per event, arrivals are searched within `marginal_window + percentage_tt·tt` of the
//!    modelled times and fitted above the `pick_threshold` quantile; the coalescence volume is
//!    sharpened above `location_cutoff` and fitted with a quadratic over the
//!    `fit_win`/`fit_mask` boxes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quakescan::params::ScanParams;
//! use quakescan::migration::CoalescenceMode;
//!
//! let params = ScanParams::builder()
//!     .sample_rate(100.0)
//!     .detection_threshold(1.5)
//!     .minimum_repeat(10.0)
//!     .mode(CoalescenceMode::Normalised)
//!     .workers(4)
//!     .build()
//!     .unwrap();
//! ```
use crate::constants::{GridShape, Hertz, Seconds, LOCATION_CUTOFF};
use crate::migration::CoalescenceMode;
use crate::scan_errors::ScanError;
use crate::signal::filter::BandPass;
use crate::signal::onset::OnsetWindow;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

/// Configuration parameters of a scan run.
///
/// Fields
/// -----------------
/// **Signal / onset**
/// * `sample_rate` – rate (Hz) at which waveforms are requested from the source.
/// * `bp_filter_p`, `bp_filter_s` – band-pass `[low, high, order]` for the P (vertical) and
///   S (horizontal) channels.
/// * `onset_win_p`, `onset_win_s` – STA/LTA `[short, long]` windows (s) per phase.
///
/// **Scan**
/// * `time_step` – length (s) of the central region of each continuous-scan window.
/// * `decimate` – per-axis grid decimation applied once before a run.
/// * `mode` – unnormalised or normalised coalescence (never mixed within a run).
/// * `workers` – threads cooperating on one migration call.
/// * `pre_pad`, `post_pad` – optional overrides of the derived pads (s).
///
/// **Trigger**
/// * `detection_threshold` – rescaled coalescence value a sample must exceed.
/// * `minimum_repeat` – minimum spacing (s) between two distinct events.
/// * `marginal_window` – half-width (s) of the re-scan window around an event.
///
/// **Picking / location**
/// * `percentage_tt` – fraction of the travel time added to the pick search half-width.
/// * `pick_threshold` – quantile of the onset trace used as the exceedance level.
/// * `location_cutoff` – fraction of the maximum below which the collapsed volume is discarded.
/// * `fit_win`, `fit_mask`, `fit_thresh` – quadratic-fit boxes and threshold.
/// * `retain_volume` – hand the 4D volume of each event to the result store.
///
/// Defaults
/// -----------------
/// * `sample_rate`: 100 Hz
/// * `bp_filter_p`: 2–16 Hz, order 3; `bp_filter_s`: 2–12 Hz, order 3
/// * `onset_win_p`, `onset_win_s`: 0.2 s / 1.0 s
/// * `time_step`: 10 s, `decimate`: [1, 1, 1], `mode`: unnormalised, `workers`: 1
/// * `detection_threshold`: 1.0, `minimum_repeat`: 30 s, `marginal_window`: 30 s
/// * `percentage_tt`: 0.1, `pick_threshold`: 0.95
/// * `location_cutoff`: 0.88, `fit_win`: 3, `fit_mask`: 7, `fit_thresh`: 0.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    // --- Signal / onset ---
    pub sample_rate: Hertz,
    pub bp_filter_p: BandPass,
    pub bp_filter_s: BandPass,
    pub onset_win_p: OnsetWindow,
    pub onset_win_s: OnsetWindow,

    // --- Scan ---
    pub time_step: Seconds,
    pub decimate: GridShape,
    pub mode: CoalescenceMode,
    pub workers: usize,
    pub pre_pad: Option<Seconds>,
    pub post_pad: Option<Seconds>,

    // --- Trigger ---
    pub detection_threshold: f64,
    pub minimum_repeat: Seconds,
    pub marginal_window: Seconds,

    // --- Picking / location ---
    pub percentage_tt: f64,
    pub pick_threshold: f64,
    pub location_cutoff: f64,
    pub fit_win: usize,
    pub fit_mask: usize,
    pub fit_thresh: f64,
    pub retain_volume: bool,
}

impl ScanParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`ScanParamsBuilder`] initialised with the default values.
    pub fn builder() -> ScanParamsBuilder {
        ScanParamsBuilder::new()
    }

    /// Default pre-pad (s): longest LTA window plus three times the longest STA window.
    pub fn default_pre_pad(&self) -> Seconds {
        self.onset_win_p.long.max(self.onset_win_s.long)
            + 3.0 * self.onset_win_p.short.max(self.onset_win_s.short)
    }

    /// Low corner of the band-pass used for a phase; its period seeds the pick width.
    pub fn low_corner(&self, phase: crate::lut::Phase) -> Hertz {
        match phase {
            crate::lut::Phase::P => self.bp_filter_p.low,
            crate::lut::Phase::S => self.bp_filter_s.low,
        }
    }
}

impl Default for ScanParams {
    fn default() -> Self {
        ScanParams {
            sample_rate: 100.0,
            bp_filter_p: BandPass::new(2.0, 16.0, 3),
            bp_filter_s: BandPass::new(2.0, 12.0, 3),
            onset_win_p: OnsetWindow::new(0.2, 1.0),
            onset_win_s: OnsetWindow::new(0.2, 1.0),

            time_step: 10.0,
            decimate: [1, 1, 1],
            mode: CoalescenceMode::Unnormalised,
            workers: 1,
            pre_pad: None,
            post_pad: None,

            detection_threshold: 1.0,
            minimum_repeat: 30.0,
            marginal_window: 30.0,

            percentage_tt: 0.1,
            pick_threshold: 0.95,
            location_cutoff: LOCATION_CUTOFF,
            fit_win: 3,
            fit_mask: 7,
            fit_thresh: 0.0,
            retain_volume: false,
        }
    }
}

/// Builder for [`ScanParams`], with validation.
#[derive(Debug, Clone)]
pub struct ScanParamsBuilder {
    params: ScanParams,
}

impl Default for ScanParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: ScanParams::default(),
        }
    }

    // --- Signal / onset ---
    pub fn sample_rate(mut self, v: Hertz) -> Self {
        self.params.sample_rate = v;
        self
    }
    pub fn bp_filter_p(mut self, v: BandPass) -> Self {
        self.params.bp_filter_p = v;
        self
    }
    pub fn bp_filter_s(mut self, v: BandPass) -> Self {
        self.params.bp_filter_s = v;
        self
    }
    pub fn onset_win_p(mut self, v: OnsetWindow) -> Self {
        self.params.onset_win_p = v;
        self
    }
    pub fn onset_win_s(mut self, v: OnsetWindow) -> Self {
        self.params.onset_win_s = v;
        self
    }

    // --- Scan ---
    pub fn time_step(mut self, v: Seconds) -> Self {
        self.params.time_step = v;
        self
    }
    pub fn decimate(mut self, v: GridShape) -> Self {
        self.params.decimate = v;
        self
    }
    pub fn mode(mut self, v: CoalescenceMode) -> Self {
        self.params.mode = v;
        self
    }
    pub fn workers(mut self, v: usize) -> Self {
        self.params.workers = v;
        self
    }
    pub fn pre_pad(mut self, v: Seconds) -> Self {
        self.params.pre_pad = Some(v);
        self
    }
    pub fn post_pad(mut self, v: Seconds) -> Self {
        self.params.post_pad = Some(v);
        self
    }

    // --- Trigger ---
    pub fn detection_threshold(mut self, v: f64) -> Self {
        self.params.detection_threshold = v;
        self
    }
    pub fn minimum_repeat(mut self, v: Seconds) -> Self {
        self.params.minimum_repeat = v;
        self
    }
    pub fn marginal_window(mut self, v: Seconds) -> Self {
        self.params.marginal_window = v;
        self
    }

    // --- Picking / location ---
    pub fn percentage_tt(mut self, v: f64) -> Self {
        self.params.percentage_tt = v;
        self
    }
    pub fn pick_threshold(mut self, v: f64) -> Self {
        self.params.pick_threshold = v;
        self
    }
    pub fn location_cutoff(mut self, v: f64) -> Self {
        self.params.location_cutoff = v;
        self
    }
    pub fn fit_win(mut self, v: usize) -> Self {
        self.params.fit_win = v;
        self
    }
    pub fn fit_mask(mut self, v: usize) -> Self {
        self.params.fit_mask = v;
        self
    }
    pub fn fit_thresh(mut self, v: f64) -> Self {
        self.params.fit_thresh = v;
        self
    }
    pub fn retain_volume(mut self, v: bool) -> Self {
        self.params.retain_volume = v;
        self
    }

    // ---- Numeric helpers for PartialOrd (handle NaN as invalid) ----

    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    #[inline]
    fn lt(a: f64, b: f64) -> bool {
        a.partial_cmp(&b) == Some(Less)
    }

    fn check_band(name: &str, band: &BandPass, rate: Hertz) -> Result<(), ScanError> {
        let nyquist = rate / 2.0;
        if !(Self::gt0(band.low) && Self::lt(band.low, band.high) && Self::lt(band.high, nyquist))
        {
            return Err(ScanError::InvalidScanParameter(format!(
                "{name} requires 0 < low < high < sample_rate/2 (got {} - {} Hz at {rate} Hz)",
                band.low, band.high
            )));
        }
        if band.order == 0 {
            return Err(ScanError::InvalidScanParameter(format!(
                "{name} order must be >= 1"
            )));
        }
        Ok(())
    }

    fn check_window(name: &str, win: &OnsetWindow) -> Result<(), ScanError> {
        if !(Self::gt0(win.short) && Self::lt(win.short, win.long)) {
            return Err(ScanError::InvalidScanParameter(format!(
                "{name} requires 0 < short < long (got {} / {} s)",
                win.short, win.long
            )));
        }
        Ok(())
    }

    /// Finalize the builder and produce a [`ScanParams`] instance.
    ///
    /// Validation rules
    /// -----------------
    /// * `sample_rate > 0`, `time_step > 0`.
    /// * Band-pass corners satisfy `0 < low < high < sample_rate/2`, `order ≥ 1`.
    /// * Onset windows satisfy `0 < short < long`.
    /// * `detection_threshold` is finite.
    /// * `minimum_repeat`, `marginal_window`, `percentage_tt`, `fit_thresh` and the pad
    ///   overrides are non-negative.
    /// * `pick_threshold ∈ [0, 1]`, `location_cutoff ∈ [0, 1)`.
    /// * every decimation factor, `workers` and `fit_win` are `≥ 1`; `fit_mask ≥ fit_win`.
    ///
    /// Returns
    /// -----------------
    /// * `Ok(ScanParams)` if every rule holds, [`ScanError::InvalidScanParameter`] otherwise.
    pub fn build(self) -> Result<ScanParams, ScanError> {
        let p = &self.params;

        if !Self::gt0(p.sample_rate) {
            return Err(ScanError::InvalidScanParameter(
                "sample_rate must be > 0".into(),
            ));
        }
        if !Self::gt0(p.time_step) {
            return Err(ScanError::InvalidScanParameter(
                "time_step must be > 0".into(),
            ));
        }

        Self::check_band("bp_filter_p", &p.bp_filter_p, p.sample_rate)?;
        Self::check_band("bp_filter_s", &p.bp_filter_s, p.sample_rate)?;
        Self::check_window("onset_win_p", &p.onset_win_p)?;
        Self::check_window("onset_win_s", &p.onset_win_s)?;

        if !p.detection_threshold.is_finite() {
            return Err(ScanError::InvalidScanParameter(
                "detection_threshold must be finite".into(),
            ));
        }
        if !Self::ge0(p.minimum_repeat) || !Self::ge0(p.marginal_window) {
            return Err(ScanError::InvalidScanParameter(
                "minimum_repeat and marginal_window must be non-negative".into(),
            ));
        }
        if !Self::ge0(p.percentage_tt) {
            return Err(ScanError::InvalidScanParameter(
                "percentage_tt must be non-negative".into(),
            ));
        }
        if !(Self::ge0(p.pick_threshold) && p.pick_threshold <= 1.0) {
            return Err(ScanError::InvalidScanParameter(
                "pick_threshold must lie in [0, 1]".into(),
            ));
        }
        if !(Self::ge0(p.location_cutoff) && Self::lt(p.location_cutoff, 1.0)) {
            return Err(ScanError::InvalidScanParameter(
                "location_cutoff must lie in [0, 1)".into(),
            ));
        }
        if p.pre_pad.is_some_and(|v| !Self::ge0(v)) || p.post_pad.is_some_and(|v| !Self::ge0(v))
        {
            return Err(ScanError::InvalidScanParameter(
                "pad overrides must be non-negative".into(),
            ));
        }

        if p.decimate.iter().any(|&d| d == 0) {
            return Err(ScanError::InvalidScanParameter(
                "decimation factors must be >= 1".into(),
            ));
        }
        if p.workers == 0 {
            return Err(ScanError::InvalidScanParameter(
                "workers must be >= 1".into(),
            ));
        }
        if p.fit_win == 0 || p.fit_mask < p.fit_win {
            return Err(ScanError::InvalidScanParameter(
                "require 1 <= fit_win <= fit_mask".into(),
            ));
        }
        if !Self::ge0(p.fit_thresh) {
            return Err(ScanError::InvalidScanParameter(
                "fit_thresh must be non-negative".into(),
            ));
        }

        Ok(self.params)
    }
}

impl fmt::Display for ScanParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 44;
            writeln!(f, "Scan Parameters")?;
            writeln!(f, "---------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Signal / onset]")?;
            line!("sample_rate         = {:.1} Hz", self.sample_rate, "Requested waveform rate")?;
            line!("bp_filter_p         = {}", self.bp_filter_p, "P band-pass (vertical)")?;
            line!("bp_filter_s         = {}", self.bp_filter_s, "S band-pass (horizontals)")?;
            line!("onset_win_p         = {}", self.onset_win_p, "P STA/LTA windows")?;
            line!("onset_win_s         = {}", self.onset_win_s, "S STA/LTA windows")?;

            writeln!(f, "\n[Scan]")?;
            line!("time_step           = {:.3} s", self.time_step, "Continuous-scan step")?;
            line!("decimate            = {:?}", self.decimate, "Grid decimation factors")?;
            line!("mode                = {:?}", self.mode, "Coalescence normalisation")?;
            line!("workers             = {}", self.workers, "Migration threads")?;

            writeln!(f, "\n[Trigger]")?;
            line!(
                "detection_threshold = {:.3}",
                self.detection_threshold,
                "Rescaled coalescence threshold"
            )?;
            line!("minimum_repeat      = {:.3} s", self.minimum_repeat, "Event merge distance")?;
            line!("marginal_window     = {:.3} s", self.marginal_window, "Event half-window")?;

            writeln!(f, "\n[Picking / location]")?;
            line!("percentage_tt       = {:.3}", self.percentage_tt, "Travel-time widening")?;
            line!("pick_threshold      = {:.3}", self.pick_threshold, "Onset exceedance quantile")?;
            line!("location_cutoff     = {:.3}", self.location_cutoff, "Volume sharpening cutoff")?;
            line!("fit_win / fit_mask  = {}", format!("{} / {}", self.fit_win, self.fit_mask), "Quadratic-fit boxes")?;

            Ok(())
        } else {
            write!(
                f,
                "ScanParams(rate={:.1}Hz, P={}, S={}, step={:.1}s, mode={:?}, workers={}, threshold={:.2}, repeat={:.1}s, marginal={:.1}s)",
                self.sample_rate,
                self.bp_filter_p,
                self.bp_filter_s,
                self.time_step,
                self.mode,
                self.workers,
                self.detection_threshold,
                self.minimum_repeat,
                self.marginal_window,
            )
        }
    }
}
