//! Result persistence.
//!
//! The scanner writes through the [`ResultStore`] trait: an append-only continuous coalescence
//! series, one [`EventRecord`] per located event, and optionally the 4D volume of each event.
//! File formats are left to implementors; [`MemoryStore`] keeps everything in memory.
use hifitime::Epoch;
use ndarray::Array4;

use crate::coalescence::{CandidateEvent, CoalescenceSample, CoalescenceSeries, EventRecord};
use crate::constants::Hertz;
use crate::scan_errors::ScanError;

pub trait ResultStore {
    /// Append samples to the continuous series, in time order.
    fn append_scan(&mut self, samples: &[CoalescenceSample]) -> Result<(), ScanError>;

    /// Continuous series between `start` and `end` (inclusive).
    fn read_scan(&self, start: Epoch, end: Epoch) -> Result<CoalescenceSeries, ScanError>;

    fn write_event(&mut self, record: &EventRecord) -> Result<(), ScanError>;

    /// Keep the coalescence volume of an event; ignored unless implemented.
    fn write_volume(
        &mut self,
        _event: &CandidateEvent,
        _volume: &Array4<f64>,
    ) -> Result<(), ScanError> {
        Ok(())
    }
}

/// In-memory [`ResultStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStore {
    pub series: CoalescenceSeries,
    pub events: Vec<EventRecord>,
    pub volumes: Vec<(String, Array4<f64>)>,
}

impl MemoryStore {
    pub fn new(sample_rate: Hertz) -> Self {
        MemoryStore {
            series: CoalescenceSeries::new(sample_rate),
            events: Vec::new(),
            volumes: Vec::new(),
        }
    }
}

impl ResultStore for MemoryStore {
    fn append_scan(&mut self, samples: &[CoalescenceSample]) -> Result<(), ScanError> {
        self.series.append(samples)
    }

    fn read_scan(&self, start: Epoch, end: Epoch) -> Result<CoalescenceSeries, ScanError> {
        CoalescenceSeries::from_samples(
            self.series.sample_rate(),
            self.series.slice(start, end).to_vec(),
        )
    }

    fn write_event(&mut self, record: &EventRecord) -> Result<(), ScanError> {
        self.events.push(record.clone());
        Ok(())
    }

    fn write_volume(
        &mut self,
        event: &CandidateEvent,
        volume: &Array4<f64>,
    ) -> Result<(), ScanError> {
        self.volumes.push((event.event_id.clone(), volume.clone()));
        Ok(())
    }
}
