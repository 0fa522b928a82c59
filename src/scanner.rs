//! # Continuous scanning
//!
//! [`ContinuousScanner`] walks a time range in steps of `time_step` seconds. Each step
//! `[t_i, t_i + time_step]` is fetched from the [`WaveformSource`] widened by the pre/post pads,
//! conditioned, turned into onsets and migrated; the output samples between the pads form the
//! coalescence samples of the step. The last output sample of a step is the first of the next
//! one and is dropped.
//!
//! Padding
//! -----------------
//! * pre-pad: `max(LTA_P, LTA_S) + 3·max(STA_P, STA_S)` unless overridden,
//! * post-pad: `round(1.05 · max S travel time)` unless overridden,
//! * continuous runs add `round(0.06 · (pre + post + time_step))` to both, once.
//!
//! Errors
//! -----------------
//! A fatal [`ScanError`] (configuration) stops the run. Any other error only skips the current
//! window, which is logged and counted in the [`ScanSummary`].
use hifitime::Epoch;
use log::{debug, info, warn};
use ndarray::Axis;

use crate::coalescence::CoalescenceSample;
use crate::constants::{Hertz, Seconds, PAD_INFLATION, POST_PAD_TT_FACTOR};
use crate::iter_timer::{fmt_dur, IterTimer};
use crate::lut::{Phase, TravelTimeIndex};
use crate::migration::{MigrationEngine, MigrationOutput};
use crate::params::ScanParams;
use crate::scan_errors::ScanError;
use crate::signal::{compute_onsets, ThreeComponent, WindowOnsets};
use crate::store::ResultStore;
use crate::time::{sample_time, seconds};

/// Provider of three-component waveforms.
pub trait WaveformSource {
    /// Samples of `stations` (in that order) from `start` to `end` inclusive, at `rate` Hz.
    fn fetch(
        &self,
        stations: &[String],
        start: Epoch,
        end: Epoch,
        rate: Hertz,
    ) -> Result<WaveformWindow, ScanError>;
}

/// Waveforms of one window, `[station, sample]`, with per-station availability.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformWindow {
    pub start: Epoch,
    pub sample_rate: Hertz,
    pub signal: ThreeComponent,
    pub availability: Vec<bool>,
}

impl WaveformWindow {
    pub fn available_count(&self) -> usize {
        self.availability.iter().filter(|&&a| a).count()
    }
}

/// Pre/post pads of a window, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub pre: Seconds,
    pub post: Seconds,
}

impl Padding {
    pub fn from_params<L: TravelTimeIndex>(params: &ScanParams, lut: &L) -> Self {
        Padding {
            pre: params.pre_pad.unwrap_or_else(|| params.default_pre_pad()),
            post: params
                .post_pad
                .unwrap_or_else(|| (lut.max_travel_time(Phase::S) * POST_PAD_TT_FACTOR).round()),
        }
    }

    /// Pads of a continuous run, widened once to absorb the taper.
    pub fn inflated(&self, time_step: Seconds) -> Self {
        let extra = (PAD_INFLATION * (self.pre + self.post + time_step)).round();
        Padding {
            pre: self.pre + extra,
            post: self.post + extra,
        }
    }

    pub fn samples(&self, rate: Hertz) -> (usize, usize) {
        (
            (self.pre * rate).round() as usize,
            (self.post * rate).round() as usize,
        )
    }
}

/// Everything computed for one window.
#[derive(Debug, Clone)]
pub struct WindowProducts {
    /// Time of the first fetched sample.
    pub fetch_start: Epoch,
    /// Time of the first migrated (output) sample.
    pub start: Epoch,
    pub sample_rate: Hertz,
    pub availability: Vec<bool>,
    pub onsets: WindowOnsets,
    pub migration: MigrationOutput,
}

impl WindowProducts {
    /// Index of the first maximum of the rescaled coalescence trace.
    pub fn peak_sample(&self) -> Option<usize> {
        let values = &self.migration.max_value;
        (0..values.len()).reduce(|best, i| if values[i] > values[best] { i } else { best })
    }
}

/// Counters of a continuous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub windows: usize,
    pub skipped: usize,
    pub samples: usize,
}

pub struct ContinuousScanner<'a, L, W> {
    params: &'a ScanParams,
    lut: &'a L,
    source: &'a W,
    engine: &'a MigrationEngine,
}

impl<'a, L, W> ContinuousScanner<'a, L, W>
where
    L: TravelTimeIndex + Sync,
    W: WaveformSource,
{
    pub fn new(
        params: &'a ScanParams,
        lut: &'a L,
        source: &'a W,
        engine: &'a MigrationEngine,
    ) -> Self {
        ContinuousScanner {
            params,
            lut,
            source,
            engine,
        }
    }

    /// Fetch, condition and migrate `[start − pre, end + post]`.
    ///
    /// Arguments
    /// -----------------
    /// * `start`, `end`: central region of the window.
    /// * `pad`: pads added on either side.
    ///
    /// Return
    /// ----------
    /// * The onsets and migration output of the window. Onsets of stations flagged unavailable
    ///   are zeroed and the coalescence is rescaled with the number of available stations.
    pub fn compute_window(
        &self,
        start: Epoch,
        end: Epoch,
        pad: &Padding,
    ) -> Result<WindowProducts, ScanError> {
        let rate = self.params.sample_rate;
        let stations = self.lut.station_names();
        let fetch_start = start - seconds(pad.pre);
        let window = self
            .source
            .fetch(stations, fetch_start, end + seconds(pad.post), rate)?;

        if window.signal.nstations() != stations.len() || window.availability.len() != stations.len()
        {
            return Err(ScanError::ShapeMismatch(format!(
                "source returned {} stations ({} flags) for {} requested",
                window.signal.nstations(),
                window.availability.len(),
                stations.len()
            )));
        }
        if (window.sample_rate - rate).abs() > f64::EPSILON * rate {
            return Err(ScanError::WaveformUnavailable(format!(
                "source delivered {} Hz instead of {rate} Hz",
                window.sample_rate
            )));
        }

        let mut onsets = compute_onsets(&window.signal, self.params)?;
        for (k, _) in window.availability.iter().enumerate().filter(|(_, &a)| !a) {
            for traces in [&mut onsets.p, &mut onsets.s] {
                traces.raw.index_axis_mut(Axis(0), k).fill(0.0);
                traces.log.index_axis_mut(Axis(0), k).fill(0.0);
            }
        }

        let (pre, post) = pad.samples(rate);
        let migration = self.engine.migrate(
            &onsets.p.log,
            &onsets.s.log,
            self.lut,
            rate,
            pre,
            post,
            window.available_count(),
        )?;

        Ok(WindowProducts {
            fetch_start: window.start,
            start: sample_time(window.start, rate, pre),
            sample_rate: rate,
            availability: window.availability,
            onsets,
            migration,
        })
    }

    /// Coalescence samples of a window.
    pub fn samples(&self, products: &WindowProducts) -> Vec<CoalescenceSample> {
        let m = &products.migration;
        m.max_value
            .iter()
            .zip(&m.max_cell)
            .enumerate()
            .map(|(t, (&value, &cell))| {
                let index = self.lut.unflatten(cell);
                CoalescenceSample {
                    time: sample_time(products.start, products.sample_rate, t),
                    value,
                    cell: index,
                    coord: self.lut.cell_to_coord(index),
                }
            })
            .collect()
    }

    /// Scan `[start, end]` and append the coalescence series to `store`.
    ///
    /// Steps `i = 0, 1, …` are processed while `start + time_step·(i + 1) ≤ end`.
    pub fn scan<S>(&self, start: Epoch, end: Epoch, store: &mut S) -> Result<ScanSummary, ScanError>
    where
        S: ResultStore + ?Sized,
    {
        let step = self.params.time_step;
        let pad = Padding::from_params(self.params, self.lut).inflated(step);
        let nsteps = ((end - start).to_seconds() / step + 1e-9).floor().max(0.0) as usize;
        info!(
            "Continuous scan {start} -> {end}: {nsteps} window(s) of {step} s, pads {:.2} s / {:.2} s",
            pad.pre, pad.post
        );

        let mut summary = ScanSummary::default();
        let mut timer = IterTimer::new(0.2);
        for i in 0..nsteps {
            let w_start = start + seconds(step * i as f64);
            let w_end = start + seconds(step * (i + 1) as f64);

            match self.compute_window(w_start, w_end, &pad) {
                Ok(products) => {
                    let mut samples = self.samples(&products);
                    samples.pop();
                    store.append_scan(&samples)?;
                    summary.windows += 1;
                    summary.samples += samples.len();
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping window {w_start} -> {w_end}: {e}");
                    summary.skipped += 1;
                }
            }

            let dt = timer.tick();
            debug!(
                "Window {}/{nsteps} done in {} (avg {}, ~{} left)",
                i + 1,
                fmt_dur(dt),
                fmt_dur(timer.avg()),
                fmt_dur(timer.remaining(nsteps - i - 1))
            );
        }

        info!(
            "Continuous scan done: {} window(s), {} skipped, {} sample(s)",
            summary.windows, summary.skipped, summary.samples
        );
        Ok(summary)
    }
}
