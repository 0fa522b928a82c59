//! # Event trigger
//!
//! Turns the continuous coalescence trace into discrete candidate events.
//!
//! 1. Samples above the detection threshold are grouped into runs of consecutive samples
//!    (one sample period apart).
//! 2. Each run is reduced to its peak (first maximum) and its time interval. On either side where
//!    the peak lies within `minimum_repeat` seconds of the run's edge, the interval is extended by
//!    `minimum_repeat` from that edge.
//! 3. Widened intervals are merged by interval union over closed intervals; the peak of each
//!    merged group becomes the event.
//!
//! Every widened interval still contains `[peak − minimum_repeat, peak + minimum_repeat]`. Since a
//! merged group covers that interval for each of its members and distinct groups are disjoint,
//! consecutive trigger times are always more than `2·minimum_repeat` apart, independently of the
//! order in which runs are visited.
use std::cmp::Ordering;

use hifitime::Epoch;
use itertools::Itertools;
use log::{debug, info};

use crate::coalescence::{CandidateEvent, CoalescenceSample, CoalescenceSeries};
use crate::constants::Seconds;
use crate::params::ScanParams;
use crate::time::{event_id, seconds, seconds_since};

/// Contiguous run of above-threshold samples, widened at the edges close to its peak.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Run {
    start: Epoch,
    end: Epoch,
    peak: CoalescenceSample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub detection_threshold: f64,
    pub minimum_repeat: Seconds,
    pub marginal_window: Seconds,
}

impl EventTrigger {
    pub fn new(detection_threshold: f64, minimum_repeat: Seconds, marginal_window: Seconds) -> Self {
        EventTrigger {
            detection_threshold,
            minimum_repeat,
            marginal_window,
        }
    }

    pub fn from_params(params: &ScanParams) -> Self {
        Self::new(
            params.detection_threshold,
            params.minimum_repeat,
            params.marginal_window,
        )
    }

    /// Candidate events of `series` between `start` and `end` (inclusive).
    ///
    /// Arguments
    /// -----------------
    /// * `series`: continuous coalescence trace.
    /// * `start`, `end`: time range to trigger on.
    ///
    /// Return
    /// ----------
    /// * Events in increasing trigger time, numbered from 1, each with a window of
    ///   `± marginal_window` around its trigger time.
    pub fn trigger(
        &self,
        series: &CoalescenceSeries,
        start: Epoch,
        end: Epoch,
    ) -> Vec<CandidateEvent> {
        let samples = series.slice(start, end);
        let runs = self.runs(samples, series.sample_rate());
        debug!(
            "{} samples, {} runs above threshold {:.3}",
            samples.len(),
            runs.len(),
            self.detection_threshold
        );

        let events: Vec<CandidateEvent> = merge_runs(runs)
            .into_iter()
            .enumerate()
            .map(|(i, peak)| CandidateEvent {
                id: i + 1,
                event_id: event_id(peak.time),
                trigger_time: peak.time,
                value: peak.value,
                cell: peak.cell,
                coord: peak.coord,
                window_start: peak.time - seconds(self.marginal_window),
                window_end: peak.time + seconds(self.marginal_window),
            })
            .collect();

        info!(
            "Triggered {} event(s) between {start} and {end}",
            events.len()
        );
        events
    }

    fn runs(&self, samples: &[CoalescenceSample], rate: f64) -> Vec<Run> {
        let Some(first) = samples.first() else {
            return Vec::new();
        };
        let origin = first.time;
        let repeat = seconds(self.minimum_repeat);

        // consecutive samples share `sample number − rank`
        let chunks = samples
            .iter()
            .filter(|s| s.value > self.detection_threshold)
            .enumerate()
            .chunk_by(|(rank, s)| {
                (seconds_since(s.time, origin) * rate).round() as i64 - *rank as i64
            });

        (&chunks)
            .into_iter()
            .filter_map(|(_, run)| {
                let run: Vec<&CoalescenceSample> = run.map(|(_, s)| s).collect();
                let peak = **run
                    .iter()
                    .fold(None::<&&CoalescenceSample>, |best, s| match best {
                        Some(b) if b.value >= s.value => Some(b),
                        _ => Some(s),
                    })?;
                let (first, last) = (run.first()?.time, run.last()?.time);
                let start = if seconds_since(peak.time, first) < self.minimum_repeat {
                    first - repeat
                } else {
                    first
                };
                let end = if seconds_since(last, peak.time) < self.minimum_repeat {
                    last + repeat
                } else {
                    last
                };
                Some(Run { start, end, peak })
            })
            .collect()
    }
}

/// Interval union of widened runs; returns the peak of each merged group.
fn merge_runs(mut runs: Vec<Run>) -> Vec<CoalescenceSample> {
    runs.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(Ordering::Equal));

    let mut groups: Vec<Run> = Vec::new();
    for run in runs {
        match groups.last_mut() {
            Some(group) if run.start <= group.end => {
                group.end = latest(group.end, run.end);
                let replaces = run.peak.value > group.peak.value
                    || (run.peak.value == group.peak.value && run.peak.time < group.peak.time);
                if replaces {
                    group.peak = run.peak;
                }
            }
            _ => groups.push(run),
        }
    }
    groups.into_iter().map(|g| g.peak).collect()
}

fn latest(a: Epoch, b: Epoch) -> Epoch {
    if b > a {
        b
    } else {
        a
    }
}
