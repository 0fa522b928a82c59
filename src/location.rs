//! # Location and uncertainty
//!
//! The coalescence volume of an event is first collapsed over time with a log-sum-exp and
//! sharpened: normalised by its maximum, clipped below `location_cutoff`, shifted and renormalised
//! so that the retained cells span `[0, 1]`.
//!
//! Two estimates are then drawn from the sharpened volume:
//!
//! * **Covariance** ([`CovarianceEstimate`]): weighted mean and weighted 3×3 covariance of the
//!   cell coordinates, the cell values being the weights.
//! * **Quadratic fit** ([`QuadraticFit`]): around the maximum cell, a 10-term quadratic is fitted
//!   to `−ln(value)` by least squares (SVD pseudo-inverse). Its stationary point is the location,
//!   and `sqrt(0.5/|curvature|)` gives the Gaussian widths, both along the grid axes (diagonal
//!   terms) and along the principal axes (eigen-decomposition).
//!
//! Curvatures are clipped away from zero before any inversion, so flat or singular fits yield
//! large but finite widths.
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use ndarray::{Array3, Array4, ArrayView1, Axis};

use crate::coalescence::LocationEstimate;
use crate::constants::{Meter, CURVATURE_FLOOR, LOG_FLOOR};
use crate::lut::TravelTimeIndex;
use crate::params::ScanParams;
use crate::scan_errors::ScanError;

/// Weighted mean and covariance of the grid coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceEstimate {
    pub location: [Meter; 3],
    pub covariance: Matrix3<f64>,
    /// Square roots of the covariance diagonal.
    pub sigma: [Meter; 3],
}

/// Quadratic fit to `−ln(value)` around the maximum cell.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticFit {
    pub location: [Meter; 3],
    /// Widths along the grid axes.
    pub sigma: [Meter; 3],
    /// Widths along `principal_axes` (one per column).
    pub principal_sigma: [Meter; 3],
    pub principal_axes: Matrix3<f64>,
    /// Value of the fitted Gaussian at its centre.
    pub peak_value: f64,
    /// Number of cells entering the fit.
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationEstimator {
    pub cutoff: f64,
    pub fit_win: usize,
    pub fit_mask: usize,
    pub fit_thresh: f64,
}

fn log_sum_exp(lane: ArrayView1<f64>) -> f64 {
    let m = lane.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !m.is_finite() {
        return m;
    }
    m + lane.iter().map(|&v| (v - m).exp()).sum::<f64>().ln()
}

fn max_of(a: &Array3<f64>) -> f64 {
    a.fold(f64::NEG_INFINITY, |m, &v| m.max(v))
}

/// First maximum of a volume in C order.
fn argmax(a: &Array3<f64>) -> ([usize; 3], f64) {
    a.indexed_iter()
        .fold(([0; 3], f64::NEG_INFINITY), |(bi, bv), ((i, j, k), &v)| {
            if v > bv {
                ([i, j, k], v)
            } else {
                (bi, bv)
            }
        })
}

/// Inverse of a symmetric matrix with eigenvalues kept at least `floor` away from zero.
fn clipped_inverse(m: Matrix3<f64>, floor: f64) -> Matrix3<f64> {
    let eig = m.symmetric_eigen();
    let inv = eig.eigenvalues.map(|l| {
        let sign = if l < 0.0 { -1.0 } else { 1.0 };
        1.0 / (sign * l.abs().max(floor))
    });
    eig.eigenvectors * Matrix3::from_diagonal(&inv) * eig.eigenvectors.transpose()
}

#[inline]
fn width(curvature: f64, floor: f64) -> f64 {
    (0.5 / curvature.abs().max(floor)).sqrt()
}

fn check_shape<L: TravelTimeIndex>(a: &Array3<f64>, lut: &L) -> Result<(), ScanError> {
    let (nx, ny, nz) = a.dim();
    if [nx, ny, nz] != lut.shape() {
        return Err(ScanError::ShapeMismatch(format!(
            "volume {:?} on grid {:?}",
            a.dim(),
            lut.shape()
        )));
    }
    Ok(())
}

impl LocationEstimator {
    pub fn from_params(params: &ScanParams) -> Self {
        LocationEstimator {
            cutoff: params.location_cutoff,
            fit_win: params.fit_win,
            fit_mask: params.fit_mask,
            fit_thresh: params.fit_thresh,
        }
    }

    /// `ln(Σ_t exp(volume[.., t]))` for every cell.
    pub fn collapse(volume: &Array4<f64>) -> Array3<f64> {
        volume.map_axis(Axis(3), log_sum_exp)
    }

    /// Normalise to the maximum, drop everything below the cutoff and rescale to `[0, 1]`.
    pub fn sharpen(&self, collapsed: &Array3<f64>) -> Result<Array3<f64>, ScanError> {
        let max = max_of(collapsed);
        if !(max > 0.0 && max.is_finite()) {
            return Err(ScanError::DegenerateVolume);
        }
        let cutoff = self.cutoff;
        let mut sharp = collapsed.mapv(|v| (v / max).max(cutoff) - cutoff);
        let top = max_of(&sharp);
        if !(top > 0.0) {
            return Err(ScanError::DegenerateVolume);
        }
        sharp.mapv_inplace(|v| v / top);
        Ok(sharp)
    }

    /// Weighted mean location and covariance of the grid, weighted by `weights`.
    ///
    /// Return
    /// ----------
    /// * The estimate, or [`ScanError::DegenerateVolume`] when the weights sum to zero.
    pub fn covariance<L: TravelTimeIndex>(
        weights: &Array3<f64>,
        lut: &L,
    ) -> Result<CovarianceEstimate, ScanError> {
        check_shape(weights, lut)?;
        let total: f64 = weights.sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(ScanError::DegenerateVolume);
        }

        let mut mean = Vector3::zeros();
        for ((i, j, k), &w) in weights.indexed_iter() {
            mean += Vector3::from(lut.cell_to_coord([i, j, k])) * w;
        }
        mean /= total;

        let mut cov = Matrix3::zeros();
        for ((i, j, k), &w) in weights.indexed_iter() {
            let d = Vector3::from(lut.cell_to_coord([i, j, k])) - mean;
            cov += d * d.transpose() * w;
        }
        cov /= total;

        Ok(CovarianceEstimate {
            location: [mean[0], mean[1], mean[2]],
            sigma: [cov[(0, 0)].sqrt(), cov[(1, 1)].sqrt(), cov[(2, 2)].sqrt()],
            covariance: cov,
        })
    }

    /// Quadratic fit of `−ln(pdf)` around the maximum of `pdf`.
    ///
    /// The fit uses every cell within `(fit_win − 1)/2` of the maximum, plus the cells within
    /// `(fit_mask − 1)/2` whose value exceeds `max · exp(−fit_thresh²/2)`. Offsets are taken in
    /// cells; the result is converted to grid coordinates.
    pub fn quadratic_fit<L: TravelTimeIndex>(
        &self,
        pdf: &Array3<f64>,
        lut: &L,
    ) -> Result<QuadraticFit, ScanError> {
        check_shape(pdf, lut)?;
        let (peak, peak_value) = argmax(pdf);
        if !peak_value.is_finite() {
            return Err(ScanError::DegenerateVolume);
        }
        let level = peak_value * (-self.fit_thresh * self.fit_thresh / 2.0).exp();
        let within = |idx: [usize; 3], win: usize| {
            let h = win.saturating_sub(1) / 2;
            (0..3).all(|k| idx[k] + h >= peak[k] && idx[k] <= peak[k] + h)
        };

        let mut offsets: Vec<[f64; 3]> = Vec::new();
        let mut targets: Vec<f64> = Vec::new();
        for ((i, j, k), &v) in pdf.indexed_iter() {
            let idx = [i, j, k];
            if within(idx, self.fit_win) || (v > level && within(idx, self.fit_mask)) {
                offsets.push(std::array::from_fn(|a| idx[a] as f64 - peak[a] as f64));
                targets.push(-v.max(LOG_FLOOR).ln());
            }
        }

        let design = DMatrix::from_fn(offsets.len(), 10, |r, c| {
            let [x, y, z] = offsets[r];
            match c {
                0 => x * x,
                1 => y * y,
                2 => z * z,
                3 => x * y,
                4 => x * z,
                5 => y * z,
                6 => x,
                7 => y,
                8 => z,
                _ => 1.0,
            }
        });
        let svd = design.svd(true, true);
        let eps = 1e-15 * svd.singular_values.max();
        let p = svd
            .solve(&DVector::from_vec(targets), eps)
            .map_err(|_| ScanError::DegenerateVolume)?;

        #[rustfmt::skip]
        let g = -Matrix3::new(
            2.0 * p[0], p[3], p[4],
            p[3], 2.0 * p[1], p[5],
            p[4], p[5], 2.0 * p[2],
        );
        let h = Vector3::new(p[6], p[7], p[8]);
        let c = clipped_inverse(g, CURVATURE_FLOOR) * h;

        let k = p[9]
            - p[0] * c[0] * c[0]
            - p[1] * c[1] * c[1]
            - p[2] * c[2] * c[2]
            - p[3] * c[0] * c[1]
            - p[4] * c[0] * c[2]
            - p[5] * c[1] * c[2];

        let size = lut.cell_size();
        #[rustfmt::skip]
        let m = Matrix3::new(
            p[0], p[3] / 2.0, p[4] / 2.0,
            p[3] / 2.0, p[1], p[5] / 2.0,
            p[4] / 2.0, p[5] / 2.0, p[2],
        );
        let sigma = std::array::from_fn(|a| width(m[(a, a)], CURVATURE_FLOOR) * size[a]);

        // curvature in metres⁻²; the floor is scaled to the coarsest axis
        let scale = Matrix3::from_diagonal(&Vector3::new(1.0 / size[0], 1.0 / size[1], 1.0 / size[2]));
        let coarsest = size.iter().fold(0.0_f64, |a, &b| a.max(b));
        let eig = (scale * m * scale).symmetric_eigen();
        let floor = CURVATURE_FLOOR / (coarsest * coarsest);
        let principal_sigma = std::array::from_fn(|a| width(eig.eigenvalues[a], floor));

        let index = std::array::from_fn(|a| peak[a] as f64 + c[a]);
        Ok(QuadraticFit {
            location: lut.index_to_coord(index),
            sigma,
            principal_sigma,
            principal_axes: eig.eigenvectors,
            peak_value: (-k).exp(),
            cells: offsets.len(),
        })
    }

    /// Full location of an event from its 4D coalescence volume.
    pub fn locate<L: TravelTimeIndex>(
        &self,
        volume: &Array4<f64>,
        lut: &L,
    ) -> Result<LocationEstimate, ScanError> {
        let sharp = self.sharpen(&Self::collapse(volume))?;
        let cov = Self::covariance(&sharp, lut)?;
        let fit = self.quadratic_fit(&sharp, lut)?;
        Ok(LocationEstimate {
            gaussian: fit.location,
            gaussian_sigma: fit.sigma,
            principal_sigma: fit.principal_sigma,
            principal_axes: fit.principal_axes,
            covariance_location: cov.location,
            covariance_sigma: cov.sigma,
            covariance: cov.covariance,
        })
    }
}
