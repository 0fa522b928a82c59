//! # Travel-time lookup
//!
//! Read-only access to precomputed P/S travel times on a regular 3D grid.
//!
//! The scanner only needs a handful of operations from a lookup table, collected in the
//! [`TravelTimeIndex`] trait:
//!
//! - the grid geometry (`shape`, `cell_size`, `origin`) and the ordered station list,
//! - per-cell, per-station travel times for a [`Phase`],
//! - coordinate ↔ cell conversions,
//! - `decimate`, which returns a **new** coarser index instead of mutating the current one.
//!
//! [`TravelTimeGrid`] is the in-memory implementation used by the crate and its tests.
//!
//! Cells are addressed either by their `[ix, iy, iz]` index or by a flat C-order index
//! `(ix·ny + iy)·nz + iz`; the station order of every per-cell slice matches
//! [`TravelTimeIndex::station_names`].
use std::fmt;

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::constants::{GridShape, Hertz, Meter, Seconds};
use crate::scan_errors::ScanError;

/// Seismic phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    P,
    S,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::P => write!(f, "P"),
            Phase::S => write!(f, "S"),
        }
    }
}

/// Read-only travel-time lookup over a regular grid.
pub trait TravelTimeIndex {
    /// Number of cells along each axis.
    fn shape(&self) -> GridShape;

    /// Cell size along each axis (m).
    fn cell_size(&self) -> [Meter; 3];

    /// Coordinates of cell `[0, 0, 0]`.
    fn origin(&self) -> [Meter; 3];

    /// Ordered station identifiers.
    fn station_names(&self) -> &[String];

    /// Travel times (s) from flat cell `cell` to every station, in station order.
    fn travel_times(&self, phase: Phase, cell: usize) -> &[Seconds];

    /// A new index keeping every `factors[k]`-th cell along axis `k`.
    fn decimate(&self, factors: GridShape) -> Result<Self, ScanError>
    where
        Self: Sized;

    fn cell_count(&self) -> usize {
        self.shape().iter().product()
    }

    fn station_count(&self) -> usize {
        self.station_names().len()
    }

    /// Flat C-order index of `[ix, iy, iz]`.
    fn flat_index(&self, index: [usize; 3]) -> usize {
        let [_, ny, nz] = self.shape();
        (index[0] * ny + index[1]) * nz + index[2]
    }

    /// `[ix, iy, iz]` of a flat C-order index.
    fn unflatten(&self, cell: usize) -> [usize; 3] {
        let [_, ny, nz] = self.shape();
        [cell / (ny * nz), (cell / nz) % ny, cell % nz]
    }

    /// Coordinates of the centre of a cell.
    fn cell_to_coord(&self, index: [usize; 3]) -> [Meter; 3] {
        self.index_to_coord([index[0] as f64, index[1] as f64, index[2] as f64])
    }

    /// Coordinates of a fractional cell index (as returned by sub-cell fits).
    fn index_to_coord(&self, index: [f64; 3]) -> [Meter; 3] {
        let (o, d) = (self.origin(), self.cell_size());
        [
            o[0] + index[0] * d[0],
            o[1] + index[1] * d[1],
            o[2] + index[2] * d[2],
        ]
    }

    /// Nearest cell to a coordinate, or `None` when it lies outside the grid.
    fn coord_to_cell(&self, coord: [Meter; 3]) -> Option<[usize; 3]> {
        let (o, d, n) = (self.origin(), self.cell_size(), self.shape());
        let mut index = [0usize; 3];
        for k in 0..3 {
            let i = ((coord[k] - o[k]) / d[k]).round();
            if !(i >= 0.0 && i < n[k] as f64) {
                return None;
            }
            index[k] = i as usize;
        }
        Some(index)
    }

    /// Largest travel time of a phase over every cell and station.
    fn max_travel_time(&self, phase: Phase) -> Seconds {
        (0..self.cell_count())
            .flat_map(|c| self.travel_times(phase, c).iter().copied())
            .fold(0.0, f64::max)
    }

    /// Travel times of a cell converted to whole samples at `rate`.
    fn travel_time_samples(&self, phase: Phase, cell: usize, rate: Hertz) -> Vec<usize> {
        self.travel_times(phase, cell)
            .iter()
            .map(|&tt| (tt * rate).round() as usize)
            .collect()
    }
}

/// In-memory travel-time grid.
///
/// Travel times are stored cell-major: `tt[cell · nstations + station]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTimeGrid {
    shape: GridShape,
    cell_size: [Meter; 3],
    origin: [Meter; 3],
    stations: Vec<String>,
    tt_p: Vec<Seconds>,
    tt_s: Vec<Seconds>,
}

impl TravelTimeGrid {
    /// Build a grid from cell-major travel-time tables.
    ///
    /// Arguments
    /// -----------------
    /// * `shape`: cells along x, y, z.
    /// * `cell_size`: strictly positive cell size per axis (m).
    /// * `origin`: coordinates of cell `[0, 0, 0]`.
    /// * `stations`: station identifiers, fixing the order of every per-cell slice.
    /// * `tt_p`, `tt_s`: `cell_count · nstations` travel times each (s).
    ///
    /// Return
    /// ----------
    /// * The grid, or [`ScanError::InvalidTravelTimes`] when the tables have the wrong length, the
    ///   geometry is empty, or a travel time is negative or not finite.
    pub fn new(
        shape: GridShape,
        cell_size: [Meter; 3],
        origin: [Meter; 3],
        stations: Vec<String>,
        tt_p: Vec<Seconds>,
        tt_s: Vec<Seconds>,
    ) -> Result<Self, ScanError> {
        if shape.iter().any(|&n| n == 0) {
            return Err(ScanError::InvalidTravelTimes(format!(
                "grid shape {shape:?} has an empty axis"
            )));
        }
        if cell_size.iter().any(|&d| !(d > 0.0 && d.is_finite())) {
            return Err(ScanError::InvalidTravelTimes(format!(
                "cell size {cell_size:?} must be positive"
            )));
        }
        if stations.is_empty() {
            return Err(ScanError::InvalidTravelTimes("no station in grid".into()));
        }

        let expected = shape.iter().product::<usize>() * stations.len();
        for (phase, table) in [(Phase::P, &tt_p), (Phase::S, &tt_s)] {
            if table.len() != expected {
                return Err(ScanError::InvalidTravelTimes(format!(
                    "{phase} table holds {} values, expected {expected}",
                    table.len()
                )));
            }
            if let Some(bad) = table.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
                return Err(ScanError::InvalidTravelTimes(format!(
                    "{phase} travel time {bad} is negative or not finite"
                )));
            }
        }

        Ok(TravelTimeGrid {
            shape,
            cell_size,
            origin,
            stations,
            tt_p,
            tt_s,
        })
    }

    /// Build a grid by evaluating a travel-time model at every cell centre.
    ///
    /// `model(coord, station)` returns the `(P, S)` travel times in seconds.
    pub fn from_fn<F>(
        shape: GridShape,
        cell_size: [Meter; 3],
        origin: [Meter; 3],
        stations: Vec<String>,
        mut model: F,
    ) -> Result<Self, ScanError>
    where
        F: FnMut([Meter; 3], usize) -> (Seconds, Seconds),
    {
        let ncells = shape.iter().product::<usize>();
        let mut tt_p = Vec::with_capacity(ncells * stations.len());
        let mut tt_s = Vec::with_capacity(ncells * stations.len());
        for (ix, iy, iz) in iproduct!(0..shape[0], 0..shape[1], 0..shape[2]) {
            let coord = [
                origin[0] + ix as f64 * cell_size[0],
                origin[1] + iy as f64 * cell_size[1],
                origin[2] + iz as f64 * cell_size[2],
            ];
            for station in 0..stations.len() {
                let (p, s) = model(coord, station);
                tt_p.push(p);
                tt_s.push(s);
            }
        }
        Self::new(shape, cell_size, origin, stations, tt_p, tt_s)
    }

    fn table(&self, phase: Phase) -> &[Seconds] {
        match phase {
            Phase::P => &self.tt_p,
            Phase::S => &self.tt_s,
        }
    }
}

impl TravelTimeIndex for TravelTimeGrid {
    fn shape(&self) -> GridShape {
        self.shape
    }

    fn cell_size(&self) -> [Meter; 3] {
        self.cell_size
    }

    fn origin(&self) -> [Meter; 3] {
        self.origin
    }

    fn station_names(&self) -> &[String] {
        &self.stations
    }

    fn travel_times(&self, phase: Phase, cell: usize) -> &[Seconds] {
        let n = self.stations.len();
        &self.table(phase)[cell * n..(cell + 1) * n]
    }

    fn decimate(&self, factors: GridShape) -> Result<Self, ScanError> {
        if factors.iter().any(|&d| d == 0) {
            return Err(ScanError::InvalidScanParameter(format!(
                "decimation factors {factors:?} must be >= 1"
            )));
        }
        if factors == [1, 1, 1] {
            return Ok(self.clone());
        }

        let shape: GridShape = std::array::from_fn(|k| self.shape[k].div_ceil(factors[k]));
        let cell_size: [Meter; 3] = std::array::from_fn(|k| self.cell_size[k] * factors[k] as f64);
        let n = self.stations.len();

        let mut tt_p = Vec::with_capacity(shape.iter().product::<usize>() * n);
        let mut tt_s = Vec::with_capacity(tt_p.capacity());
        for (ix, iy, iz) in iproduct!(0..shape[0], 0..shape[1], 0..shape[2]) {
            let src = self.flat_index([ix * factors[0], iy * factors[1], iz * factors[2]]);
            tt_p.extend_from_slice(self.travel_times(Phase::P, src));
            tt_s.extend_from_slice(self.travel_times(Phase::S, src));
        }

        Ok(TravelTimeGrid {
            shape,
            cell_size,
            origin: self.origin,
            stations: self.stations.clone(),
            tt_p,
            tt_s,
        })
    }
}
