//! # Onset migration
//!
//! Stacks P and S onset traces through the travel-time grid into a 4D coalescence volume
//! `(nx, ny, nz, nt)` and extracts, for every output sample, the maximum coalescence value and
//! the flat index of the cell holding it.
//!
//! The P and S onsets are concatenated into `2·nstations` virtual channels. For every cell `c` and
//! output sample `t ∈ [0, nt)` the engine sums, over every channel `k`,
//! `onset[k, pre_pad + t + tt(k, c)]`, where `tt(k, c)` is the rounded travel time in samples.
//! Samples shifted past the end of the window contribute nothing.
//!
//! ## Parallelism
//!
//! The volume is held cell-major (`[cell][t]`), so each cell owns one contiguous chunk of `nt`
//! values. Chunks are filled with `rayon::par_chunks_mut` inside a dedicated pool of `workers`
//! threads. Every chunk is summed by a single thread in channel order, so repeated calls on the
//! same input produce bit-identical volumes whatever the worker count.
//!
//! ## Rescaling
//!
//! The per-sample maximum is rescaled before it reaches the trigger:
//!
//! * [`CoalescenceMode::Unnormalised`]: `exp(v / (2·available) − 1)`
//! * [`CoalescenceMode::Normalised`]: every time slice is divided by its cell sum, then the
//!   maximum is multiplied by the cell count.
use ndarray::{Array2, Array4};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::constants::Hertz;
use crate::lut::{Phase, TravelTimeIndex};
use crate::scan_errors::ScanError;

/// Normalisation of the coalescence volume, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoalescenceMode {
    #[default]
    Unnormalised,
    Normalised,
}

/// Result of one migration call.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutput {
    /// Stacked (or normalised) onset energy, `(nx, ny, nz, nt)`.
    pub volume: Array4<f64>,
    /// Rescaled per-sample maximum.
    pub max_value: Vec<f64>,
    /// Flat C-order index of the maximum cell per sample.
    pub max_cell: Vec<usize>,
}

impl MigrationOutput {
    pub fn nsamples(&self) -> usize {
        self.max_value.len()
    }
}

/// Parallel migration engine.
#[derive(Debug)]
pub struct MigrationEngine {
    mode: CoalescenceMode,
    workers: usize,
    pool: ThreadPool,
}

impl MigrationEngine {
    /// Create an engine running on its own pool of `workers` threads.
    pub fn new(workers: usize, mode: CoalescenceMode) -> Result<Self, ScanError> {
        if workers == 0 {
            return Err(ScanError::InvalidScanParameter(
                "workers must be >= 1".into(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("migrate-{i}"))
            .build()
            .map_err(|e| ScanError::InvalidScanParameter(format!("thread pool: {e}")))?;
        Ok(MigrationEngine {
            mode,
            workers,
            pool,
        })
    }

    pub fn mode(&self) -> CoalescenceMode {
        self.mode
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Migrate one window of onset traces.
    ///
    /// Arguments
    /// -----------------
    /// * `onset_p`, `onset_s`: `[station, sample]` log onsets, station order of `lut`.
    /// * `lut`: travel-time index.
    /// * `rate`: sampling rate of the onsets (Hz).
    /// * `pre_pad`, `post_pad`: samples excluded at each end of the window.
    /// * `available`: number of stations that delivered data in this window.
    ///
    /// Return
    /// ----------
    /// * A [`MigrationOutput`] with `nt = nsamples − pre_pad − post_pad` output samples.
    ///
    /// Errors
    /// ----------
    /// * [`ScanError::ShapeMismatch`] if the onsets do not match each other or the station list.
    /// * [`ScanError::PaddingExceedsWindow`] if `pre_pad + post_pad ≥ nsamples`.
    /// * [`ScanError::NoAvailableStations`] if `available == 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn migrate<L>(
        &self,
        onset_p: &Array2<f64>,
        onset_s: &Array2<f64>,
        lut: &L,
        rate: Hertz,
        pre_pad: usize,
        post_pad: usize,
        available: usize,
    ) -> Result<MigrationOutput, ScanError>
    where
        L: TravelTimeIndex + Sync,
    {
        if onset_p.dim() != onset_s.dim() || onset_p.nrows() != lut.station_count() {
            return Err(ScanError::ShapeMismatch(format!(
                "onsets P{:?} / S{:?} for {} stations",
                onset_p.dim(),
                onset_s.dim(),
                lut.station_count()
            )));
        }
        let nsamples = onset_p.ncols();
        if pre_pad + post_pad >= nsamples {
            return Err(ScanError::PaddingExceedsWindow {
                pre_pad,
                post_pad,
                window: nsamples,
            });
        }
        if available == 0 {
            return Err(ScanError::NoAvailableStations);
        }

        let nt = nsamples - pre_pad - post_pad;
        let ncells = lut.cell_count();

        let channels: Vec<Vec<f64>> = onset_p
            .rows()
            .into_iter()
            .chain(onset_s.rows())
            .map(|row| row.to_vec())
            .collect();

        let mut volume = vec![0.0; ncells * nt];
        self.pool.install(|| {
            volume
                .par_chunks_mut(nt)
                .enumerate()
                .for_each(|(cell, out)| {
                    let shifts = lut
                        .travel_time_samples(Phase::P, cell, rate)
                        .into_iter()
                        .chain(lut.travel_time_samples(Phase::S, cell, rate));
                    for (trace, shift) in channels.iter().zip(shifts) {
                        let first = pre_pad + shift;
                        if first >= nsamples {
                            continue;
                        }
                        let len = (nsamples - first).min(nt);
                        out[..len]
                            .iter_mut()
                            .zip(&trace[first..first + len])
                            .for_each(|(o, v)| *o += v);
                    }
                });
        });

        if self.mode == CoalescenceMode::Normalised {
            self.normalise(&mut volume, nt);
        }

        let (max_raw, max_cell) = slice_maxima(&volume, nt);
        let max_value = max_raw
            .into_iter()
            .map(|v| rescale(self.mode, v, available, ncells))
            .collect();

        let [nx, ny, nz] = lut.shape();
        let volume = Array4::from_shape_vec((nx, ny, nz, nt), volume)
            .map_err(|e| ScanError::ShapeMismatch(format!("coalescence volume: {e}")))?;

        Ok(MigrationOutput {
            volume,
            max_value,
            max_cell,
        })
    }

    /// Divide every time slice by its sum over cells; empty slices stay zero.
    fn normalise(&self, volume: &mut [f64], nt: usize) {
        let mut sums = vec![0.0; nt];
        for chunk in volume.chunks(nt) {
            sums.iter_mut().zip(chunk).for_each(|(s, v)| *s += v);
        }
        self.pool.install(|| {
            volume.par_chunks_mut(nt).for_each(|chunk| {
                chunk.iter_mut().zip(&sums).for_each(|(v, &s)| {
                    if s > 0.0 {
                        *v /= s;
                    }
                })
            })
        });
    }
}

/// Maximum value and its (lowest) flat cell index for every time sample of a cell-major volume.
fn slice_maxima(volume: &[f64], nt: usize) -> (Vec<f64>, Vec<usize>) {
    let mut best = vec![f64::NEG_INFINITY; nt];
    let mut cell_of = vec![0usize; nt];
    for (cell, chunk) in volume.chunks(nt).enumerate() {
        for (t, &v) in chunk.iter().enumerate() {
            if v > best[t] {
                best[t] = v;
                cell_of[t] = cell;
            }
        }
    }
    (best, cell_of)
}

/// Map a raw per-sample maximum to the units compared against the detection threshold.
pub fn rescale(mode: CoalescenceMode, value: f64, available: usize, ncells: usize) -> f64 {
    match mode {
        CoalescenceMode::Unnormalised => (value / (2.0 * available as f64) - 1.0).exp(),
        CoalescenceMode::Normalised => value * ncells as f64,
    }
}

#[cfg(test)]
mod migration_test {
    use super::*;
    use crate::lut::TravelTimeGrid;
    use approx::assert_relative_eq;

    fn line_grid() -> TravelTimeGrid {
        // 4 cells along x, two stations at either end
        TravelTimeGrid::from_fn(
            [4, 1, 1],
            [1.0, 1.0, 1.0],
            [0.0; 3],
            vec!["W".into(), "E".into()],
            |c, s| {
                let d = if s == 0 { c[0] } else { 3.0 - c[0] };
                (0.1 * d, 0.2 * d)
            },
        )
        .unwrap()
    }

    fn spikes(grid: &TravelTimeGrid, origin_cell: usize, t0: usize, n: usize) -> (Array2<f64>, Array2<f64>) {
        let mut p = Array2::zeros((2, n));
        let mut s = Array2::zeros((2, n));
        let tp = grid.travel_time_samples(Phase::P, origin_cell, 10.0);
        let ts = grid.travel_time_samples(Phase::S, origin_cell, 10.0);
        for k in 0..2 {
            p[[k, t0 + tp[k]]] = 1.0;
            s[[k, t0 + ts[k]]] = 1.0;
        }
        (p, s)
    }

    #[test]
    fn test_stack_peaks_at_source() {
        let grid = line_grid();
        let engine = MigrationEngine::new(2, CoalescenceMode::Unnormalised).unwrap();
        let (p, s) = spikes(&grid, 2, 5, 40);
        let out = engine.migrate(&p, &s, &grid, 10.0, 2, 10, 2).unwrap();

        assert_eq!(out.volume.dim(), (4, 1, 1, 28));
        assert_eq!(out.nsamples(), 28);
        // origin at sample 5 of the window -> output sample 3
        assert_eq!(out.volume[[2, 0, 0, 3]], 4.0);
        assert_eq!(out.max_cell[3], 2);
        assert_relative_eq!(out.max_value[3], (4.0f64 / 4.0 - 1.0).exp());
    }

    #[test]
    fn test_padding_exceeds_window() {
        let grid = line_grid();
        let engine = MigrationEngine::new(1, CoalescenceMode::Unnormalised).unwrap();
        let p = Array2::zeros((2, 20));
        let err = engine.migrate(&p, &p, &grid, 10.0, 10, 10, 2).unwrap_err();
        assert_eq!(
            err,
            ScanError::PaddingExceedsWindow {
                pre_pad: 10,
                post_pad: 10,
                window: 20
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_no_available_station() {
        let grid = line_grid();
        let engine = MigrationEngine::new(1, CoalescenceMode::Unnormalised).unwrap();
        let p = Array2::zeros((2, 30));
        assert_eq!(
            engine.migrate(&p, &p, &grid, 10.0, 2, 2, 0).unwrap_err(),
            ScanError::NoAvailableStations
        );
    }

    #[test]
    fn test_repeat_runs_are_bit_identical() {
        let grid = line_grid();
        let n = 60;
        let p = Array2::from_shape_fn((2, n), |(k, i)| ((i * 7 + k * 3) % 11) as f64 * 0.37);
        let s = Array2::from_shape_fn((2, n), |(k, i)| ((i * 5 + k) % 13) as f64 * 0.21);
        let engine = MigrationEngine::new(3, CoalescenceMode::Unnormalised).unwrap();
        let a = engine.migrate(&p, &s, &grid, 10.0, 3, 8, 2).unwrap();
        let b = engine.migrate(&p, &s, &grid, 10.0, 3, 8, 2).unwrap();
        assert_eq!(a, b);

        let single = MigrationEngine::new(1, CoalescenceMode::Unnormalised).unwrap();
        let c = single.migrate(&p, &s, &grid, 10.0, 3, 8, 2).unwrap();
        assert_eq!(a.volume, c.volume);
    }

    #[test]
    fn test_normalised_mode_slices_sum_to_one() {
        let grid = line_grid();
        let p = Array2::from_elem((2, 30), 0.5);
        let s = Array2::from_elem((2, 30), 0.25);
        let engine = MigrationEngine::new(2, CoalescenceMode::Normalised).unwrap();
        let out = engine.migrate(&p, &s, &grid, 10.0, 2, 10, 2).unwrap();
        for t in 0..out.nsamples() {
            let total: f64 = out.volume.iter().skip(t).step_by(out.nsamples()).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
        // a flat slice gives 1/ncells everywhere, rescaled back to 1
        assert_relative_eq!(out.max_value[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rescale_modes() {
        assert_relative_eq!(rescale(CoalescenceMode::Unnormalised, 8.0, 2, 10), 1f64.exp());
        assert_relative_eq!(rescale(CoalescenceMode::Normalised, 0.25, 2, 8), 2.0);
    }
}
