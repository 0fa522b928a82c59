//! # QuakeScan: detection and location façade
//!
//! [`QuakeScan`] wires the scanner components together around one validated
//! [`ScanParams`] and one travel-time index:
//!
//! 1. **Continuous scan** ([`QuakeScan::scan_continuous`]): migrates the recording window by
//!    window and appends the coalescence series to a [`ResultStore`].
//! 2. **Trigger and locate** ([`QuakeScan::trigger_and_locate`]): reads the series back,
//!    triggers candidate events, re-scans each event window, picks arrivals, estimates the
//!    location and writes one [`EventRecord`] per event.
//!
//! The travel-time index is decimated once, when the façade is built, and is never modified
//! afterwards; the migration thread pool is also built once and reused by every window.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use quakescan::params::ScanParams;
//! use quakescan::quakescan::QuakeScan;
//! use quakescan::store::MemoryStore;
//! use quakescan::time::parse_epoch;
//! # use quakescan::lut::TravelTimeGrid;
//! # use quakescan::scanner::WaveformSource;
//! # fn run<W: WaveformSource>(grid: TravelTimeGrid, source: W) -> Result<(), quakescan::scan_errors::ScanError> {
//! let params = ScanParams::builder().decimate([2, 2, 1]).workers(4).build()?;
//! let scan = QuakeScan::new(params, &grid)?;
//! let mut store = MemoryStore::new(scan.params().sample_rate);
//!
//! let start = parse_epoch("2021-01-01T00:00:00 UTC")?;
//! let end = parse_epoch("2021-01-01T01:00:00 UTC")?;
//! scan.scan_continuous(&source, &mut store, start, end)?;
//! let events = scan.trigger_and_locate(&source, &mut store, start, end)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Configuration errors ([`ScanError::is_fatal`]) abort a run. Retrieval gaps, silent windows
//! and degenerate volumes only skip the window or event concerned and are logged with
//! `log::warn!`.
use hifitime::Epoch;
use log::{info, warn};

use crate::coalescence::{CandidateEvent, EventRecord};
use crate::iter_timer::{fmt_dur, IterTimer};
use crate::location::LocationEstimator;
use crate::lut::{Phase, TravelTimeIndex};
use crate::migration::{MigrationEngine, MigrationOutput};
use crate::params::ScanParams;
use crate::picker::ArrivalPicker;
use crate::scan_errors::ScanError;
use crate::scanner::{ContinuousScanner, Padding, ScanSummary, WaveformSource};
use crate::store::ResultStore;
use crate::trigger::EventTrigger;
use crate::time::sample_time;

#[derive(Debug)]
pub struct QuakeScan<L> {
    params: ScanParams,
    lut: L,
    engine: MigrationEngine,
}

impl<L> QuakeScan<L>
where
    L: TravelTimeIndex + Sync,
{
    /// Build the façade, decimating `lut` by `params.decimate`.
    ///
    /// Arguments
    /// -----------------
    /// * `params`: validated scan parameters.
    /// * `lut`: full-resolution travel-time index; it is not modified.
    ///
    /// Return
    /// ----------
    /// * The façade, or a configuration error (bad decimation, worker pool failure).
    pub fn new(params: ScanParams, lut: &L) -> Result<Self, ScanError> {
        let lut = lut.decimate(params.decimate)?;
        let engine = MigrationEngine::new(params.workers, params.mode)?;
        info!(
            "QuakeScan ready: grid {:?} ({} cells), {} stations, {params}",
            lut.shape(),
            lut.cell_count(),
            lut.station_count()
        );
        Ok(QuakeScan {
            params,
            lut,
            engine,
        })
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// The decimated travel-time index used by every run.
    pub fn lut(&self) -> &L {
        &self.lut
    }

    pub fn scanner<'a, W: WaveformSource>(&'a self, source: &'a W) -> ContinuousScanner<'a, L, W> {
        ContinuousScanner::new(&self.params, &self.lut, source, &self.engine)
    }

    /// Continuous scan of `[start, end]`, written to `store`.
    pub fn scan_continuous<W, S>(
        &self,
        source: &W,
        store: &mut S,
        start: Epoch,
        end: Epoch,
    ) -> Result<ScanSummary, ScanError>
    where
        W: WaveformSource,
        S: ResultStore + ?Sized,
    {
        self.scanner(source).scan(start, end, store)
    }

    /// Trigger on the stored series of `[start, end]` and locate every event.
    ///
    /// Return
    /// ----------
    /// * The located events, also written to `store`. Events whose window cannot be processed
    ///   are logged and left out.
    pub fn trigger_and_locate<W, S>(
        &self,
        source: &W,
        store: &mut S,
        start: Epoch,
        end: Epoch,
    ) -> Result<Vec<EventRecord>, ScanError>
    where
        W: WaveformSource,
        S: ResultStore + ?Sized,
    {
        let series = store.read_scan(start, end)?;
        let events = EventTrigger::from_params(&self.params).trigger(&series, start, end);

        let mut records = Vec::with_capacity(events.len());
        let mut timer = IterTimer::new(0.5);
        for event in &events {
            info!("Processing {event}");
            match self.process_event(source, event) {
                Ok((record, migration)) => {
                    store.write_event(&record)?;
                    if self.params.retain_volume {
                        store.write_volume(event, &migration.volume)?;
                    }
                    info!(
                        "Event {} located at ({:.1}, {:.1}, {:.1}), {} pick(s), in {}",
                        record.event.event_id,
                        record.location.gaussian[0],
                        record.location.gaussian[1],
                        record.location.gaussian[2],
                        record.picked_count(),
                        fmt_dur(timer.tick())
                    );
                    records.push(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping event {}: {e}", event.event_id);
                    timer.tick();
                }
            }
        }
        Ok(records)
    }

    /// Re-scan, pick and locate one event.
    pub fn locate_event<W: WaveformSource>(
        &self,
        source: &W,
        event: &CandidateEvent,
    ) -> Result<EventRecord, ScanError> {
        self.process_event(source, event).map(|(record, _)| record)
    }

    fn process_event<W: WaveformSource>(
        &self,
        source: &W,
        event: &CandidateEvent,
    ) -> Result<(EventRecord, MigrationOutput), ScanError> {
        let pad = Padding::from_params(&self.params, &self.lut);
        let products =
            self.scanner(source)
                .compute_window(event.window_start, event.window_end, &pad)?;

        let peak = products
            .peak_sample()
            .ok_or(ScanError::DegenerateVolume)?;
        let flat = products.migration.max_cell[peak];
        let cell = self.lut.unflatten(flat);
        let time = sample_time(products.start, products.sample_rate, peak);

        let picks = ArrivalPicker::from_params(&self.params).pick_all(
            self.lut.station_names(),
            &products.onsets.p.log,
            &products.onsets.s.log,
            products.fetch_start,
            time,
            self.lut.travel_times(Phase::P, flat),
            self.lut.travel_times(Phase::S, flat),
        );
        let location =
            LocationEstimator::from_params(&self.params).locate(&products.migration.volume, &self.lut)?;

        let record = EventRecord {
            event: event.clone(),
            time,
            value: products.migration.max_value[peak],
            coord: self.lut.cell_to_coord(cell),
            location,
            picks,
        };
        Ok((record, products.migration))
    }
}
