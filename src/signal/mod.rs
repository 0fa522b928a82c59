//! # Signal conditioning and onset functions
//!
//! Waveforms enter the scanner as three `[station, sample]` matrices (east, north, vertical).
//! This module band-passes them per phase and turns them into onset functions:
//!
//! - **P**: vertical channel, P band-pass, P STA/LTA windows.
//! - **S**: east and north channels, S band-pass, S STA/LTA windows, combined onset.
//!
//! [`compute_onsets`] is a pure function of its inputs: it returns the filtered copies and both
//! onset pairs in a [`WindowOnsets`] value instead of storing them on a scanner object.
pub mod filter;
pub mod onset;

use ndarray::Array2;

use crate::params::ScanParams;
use crate::scan_errors::ScanError;
use onset::{compute_p_onset, compute_s_onset, OnsetTraces};

/// Three-component samples, each `[station, sample]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreeComponent {
    pub east: Array2<f64>,
    pub north: Array2<f64>,
    pub vertical: Array2<f64>,
}

impl ThreeComponent {
    /// Check that the three components share one `[station, sample]` shape.
    pub fn new(
        east: Array2<f64>,
        north: Array2<f64>,
        vertical: Array2<f64>,
    ) -> Result<Self, ScanError> {
        if east.dim() != north.dim() || east.dim() != vertical.dim() {
            return Err(ScanError::ShapeMismatch(format!(
                "components have shapes E{:?} N{:?} Z{:?}",
                east.dim(),
                north.dim(),
                vertical.dim()
            )));
        }
        Ok(ThreeComponent {
            east,
            north,
            vertical,
        })
    }

    pub fn zeros(nstations: usize, nsamples: usize) -> Self {
        ThreeComponent {
            east: Array2::zeros((nstations, nsamples)),
            north: Array2::zeros((nstations, nsamples)),
            vertical: Array2::zeros((nstations, nsamples)),
        }
    }

    pub fn nstations(&self) -> usize {
        self.vertical.nrows()
    }

    pub fn nsamples(&self) -> usize {
        self.vertical.ncols()
    }
}

/// Filtered signal and onset functions of one window.
#[derive(Debug, Clone)]
pub struct WindowOnsets {
    pub filtered: ThreeComponent,
    pub p: OnsetTraces,
    pub s: OnsetTraces,
}

/// Condition a window and compute its P and S onsets.
pub fn compute_onsets(
    signal: &ThreeComponent,
    params: &ScanParams,
) -> Result<WindowOnsets, ScanError> {
    let rate = params.sample_rate;

    let vertical = filter::condition(&signal.vertical, rate, &params.bp_filter_p)?;
    let east = filter::condition(&signal.east, rate, &params.bp_filter_s)?;
    let north = filter::condition(&signal.north, rate, &params.bp_filter_s)?;

    let p = compute_p_onset(&vertical, &params.onset_win_p, rate);
    let s = compute_s_onset(&east, &north, &params.onset_win_s, rate);

    Ok(WindowOnsets {
        filtered: ThreeComponent {
            east,
            north,
            vertical,
        },
        p,
        s,
    })
}
