//! # Constants and type definitions for quakescan
//!
//! This module centralizes the **numerical constants** and **common type definitions** used
//! throughout the scanner: unit aliases, fixed policy factors of the continuous scan, and the
//! cutoffs applied before location-uncertainty estimation.
//!
//! ## Overview
//!
//! - Unit aliases (seconds, hertz, metres, samples)
//! - Padding and taper fractions used by the scan loop and the signal conditioner
//! - Location-volume sharpening cutoff and numerical floors of the quadratic fit
//! - Sentinel value written into unpicked [`Pick`](crate::coalescence::Pick) records

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Time span in seconds
pub type Seconds = f64;
/// Frequency in hertz
pub type Hertz = f64;
/// Distance in metres (grid coordinates)
pub type Meter = f64;

/// `[nx, ny, nz]` cell counts or per-axis integer factors
pub type GridShape = [usize; 3];

// -------------------------------------------------------------------------------------------------
// Signal conditioning
// -------------------------------------------------------------------------------------------------

/// Fraction of the trace length covered by the cosine taper (split over both ends)
pub const TAPER_FRACTION: f64 = 0.1;

// -------------------------------------------------------------------------------------------------
// Continuous scan padding
// -------------------------------------------------------------------------------------------------

/// Post-pad multiplier applied to the largest S travel time
pub const POST_PAD_TT_FACTOR: f64 = 1.05;

/// Pads are inflated once per continuous run by this fraction of the full window length
pub const PAD_INFLATION: f64 = 0.06;

// -------------------------------------------------------------------------------------------------
// Location estimation
// -------------------------------------------------------------------------------------------------

/// Collapsed coalescence values below this fraction of the maximum are discarded
pub const LOCATION_CUTOFF: f64 = 0.88;

/// Lower clip applied before taking `-ln` of the sharpened volume
pub const LOG_FLOOR: f64 = 1e-300;

/// Curvature floor of the quadratic fit (eigenvalues and diagonal terms)
pub const CURVATURE_FLOOR: f64 = 1e-10;

// -------------------------------------------------------------------------------------------------
// Picking
// -------------------------------------------------------------------------------------------------

/// Time/uncertainty/amplitude sentinel of an unpicked phase
pub const UNPICKED: f64 = -1.0;

/// Maximum Levenberg–Marquardt iterations for the onset Gaussian fit
pub const GAUSS_FIT_MAX_ITER: usize = 200;

/// Relative step tolerance of the onset Gaussian fit
pub const GAUSS_FIT_TOL: f64 = 1e-12;
