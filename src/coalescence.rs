//! # Scan products
//!
//! Records produced by the scanner and handed to the result store:
//!
//! - [`CoalescenceSample`] / [`CoalescenceSeries`]: the continuous detection trace, one entry per
//!   output sample, append-only and strictly increasing in time.
//! - [`CandidateEvent`]: a merged trigger, immutable once emitted.
//! - [`Pick`]: one arrival estimate per station and phase, with `-1` sentinels when unpicked.
//! - [`LocationEstimate`]: quadratic-fit and covariance locations with their uncertainties.
//! - [`EventRecord`]: everything located for one event.
use std::fmt;

use hifitime::Epoch;
use nalgebra::Matrix3;

use crate::constants::{Hertz, Meter, Seconds, UNPICKED};
use crate::lut::Phase;
use crate::picker::PickFailure;
use crate::scan_errors::ScanError;

/// Maximum coalescence of one output sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoalescenceSample {
    pub time: Epoch,
    /// Rescaled maximum coalescence value.
    pub value: f64,
    pub cell: [usize; 3],
    pub coord: [Meter; 3],
}

/// Continuous coalescence trace sampled at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescenceSeries {
    sample_rate: Hertz,
    samples: Vec<CoalescenceSample>,
}

impl CoalescenceSeries {
    pub fn new(sample_rate: Hertz) -> Self {
        CoalescenceSeries {
            sample_rate,
            samples: Vec::new(),
        }
    }

    /// Build a series from samples already in time order.
    pub fn from_samples(
        sample_rate: Hertz,
        samples: Vec<CoalescenceSample>,
    ) -> Result<Self, ScanError> {
        let mut series = Self::new(sample_rate);
        series.append(&samples)?;
        Ok(series)
    }

    pub fn sample_rate(&self) -> Hertz {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[CoalescenceSample] {
        &self.samples
    }

    pub fn last_time(&self) -> Option<Epoch> {
        self.samples.last().map(|s| s.time)
    }

    /// Append samples, refusing any that would break strict time ordering.
    pub fn append(&mut self, samples: &[CoalescenceSample]) -> Result<(), ScanError> {
        let mut last = self.last_time();
        for s in samples {
            if last.is_some_and(|t| s.time <= t) {
                return Err(ScanError::Store(format!(
                    "coalescence sample at {} does not follow {:?}",
                    s.time, last
                )));
            }
            last = Some(s.time);
        }
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    /// Samples with `start ≤ time ≤ end`.
    pub fn slice(&self, start: Epoch, end: Epoch) -> &[CoalescenceSample] {
        let lo = self.samples.partition_point(|s| s.time < start);
        let hi = self.samples.partition_point(|s| s.time <= end);
        &self.samples[lo..hi.max(lo)]
    }
}

/// A merged trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    /// Position of the event in trigger order, starting at 1.
    pub id: usize,
    /// Digits-only trigger timestamp, see [`crate::time::event_id`].
    pub event_id: String,
    pub trigger_time: Epoch,
    pub value: f64,
    pub cell: [usize; 3],
    pub coord: [Meter; 3],
    pub window_start: Epoch,
    pub window_end: Epoch,
}

impl fmt::Display for CandidateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event #{} [{}] at {} (coa = {:.3}, x = {:.1}, y = {:.1}, z = {:.1})",
            self.id,
            self.event_id,
            self.trigger_time,
            self.value,
            self.coord[0],
            self.coord[1],
            self.coord[2]
        )
    }
}

/// Arrival estimate for one station and phase.
///
/// When the phase is unpicked, `time` is `None`, and `uncertainty` and `amplitude` carry the
/// `-1` sentinel. `failure` tells why.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub station: String,
    pub phase: Phase,
    pub modelled_time: Epoch,
    pub time: Option<Epoch>,
    pub uncertainty: Seconds,
    pub amplitude: f64,
    pub failure: Option<PickFailure>,
}

impl Pick {
    pub fn unpicked(
        station: String,
        phase: Phase,
        modelled_time: Epoch,
        failure: PickFailure,
    ) -> Self {
        Pick {
            station,
            phase,
            modelled_time,
            time: None,
            uncertainty: UNPICKED,
            amplitude: UNPICKED,
            failure: Some(failure),
        }
    }

    pub fn is_picked(&self) -> bool {
        self.time.is_some()
    }

    /// Pick time minus modelled time in seconds, or the `-1` sentinel when unpicked.
    pub fn residual(&self) -> Seconds {
        match self.time {
            Some(t) => (t - self.modelled_time).to_seconds(),
            None => UNPICKED,
        }
    }
}

/// Location of an event with its uncertainties, all in grid coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEstimate {
    /// Minimum of the quadratic fit to `-ln(volume)` (primary location).
    pub gaussian: [Meter; 3],
    /// Axis-aligned Gaussian widths.
    pub gaussian_sigma: [Meter; 3],
    /// Principal-axis Gaussian widths, in the order of the columns of `principal_axes`.
    pub principal_sigma: [Meter; 3],
    pub principal_axes: Matrix3<f64>,
    /// Weighted mean of the sharpened volume.
    pub covariance_location: [Meter; 3],
    pub covariance_sigma: [Meter; 3],
    pub covariance: Matrix3<f64>,
}

/// Everything located for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event: CandidateEvent,
    /// Time of the maximum coalescence in the re-scanned window.
    pub time: Epoch,
    /// Coalescence value at `time`.
    pub value: f64,
    /// Centre of the maximum cell at `time`.
    pub coord: [Meter; 3],
    pub location: LocationEstimate,
    pub picks: Vec<Pick>,
}

impl EventRecord {
    pub fn picked_count(&self) -> usize {
        self.picks.iter().filter(|p| p.is_picked()).count()
    }
}
