//! Earthquake detection and location by coalescence migration of onset functions through a
//! precomputed travel-time grid. See [`quakescan::QuakeScan`] for the entry point.
pub mod coalescence;
pub mod constants;
pub mod iter_timer;
pub mod location;
pub mod lut;
pub mod migration;
pub mod params;
pub mod picker;
pub mod quakescan;
pub mod scan_errors;
pub mod scanner;
pub mod signal;
pub mod store;
pub mod time;
pub mod trigger;
