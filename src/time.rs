use hifitime::{Duration, Epoch, Unit};
use std::str::FromStr;

use crate::constants::Seconds;
use crate::scan_errors::ScanError;

/// Build a [`Duration`] from a (possibly fractional or negative) number of seconds.
#[inline]
pub fn seconds(value: Seconds) -> Duration {
    Unit::Second * value
}

/// Absolute time of sample `index` in a trace starting at `start` and sampled at `rate` Hz.
#[inline]
pub fn sample_time(start: Epoch, rate: f64, index: usize) -> Epoch {
    start + seconds(index as f64 / rate)
}

/// Signed number of seconds from `reference` to `epoch`.
#[inline]
pub fn seconds_since(epoch: Epoch, reference: Epoch) -> Seconds {
    (epoch - reference).to_seconds()
}

/// Parse an ISO-8601 / hifitime date string into an [`Epoch`].
///
/// Argument
/// --------
/// * `date`: a date in the format `YYYY-MM-ddTHH:mm:ss[.fff] [SCALE]`
///
/// Return
/// ------
/// * the parsed epoch, or [`ScanError::InvalidScanParameter`] with the offending string
pub fn parse_epoch(date: &str) -> Result<Epoch, ScanError> {
    Epoch::from_str(date)
        .map_err(|e| ScanError::InvalidScanParameter(format!("invalid date '{date}': {e}")))
}

/// Event identifier derived from a trigger time: the UTC Gregorian timestamp rendered as
/// digits only, down to milliseconds (`YYYYMMDDhhmmssmmm`).
///
/// Argument
/// --------
/// * `epoch`: trigger time of the event
///
/// Return
/// ------
/// * a 17-digit identifier that sorts in time order
pub fn event_id(epoch: Epoch) -> String {
    let (year, month, day, hour, minute, second, nanos) = epoch.to_gregorian_utc();
    format!(
        "{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}{:03}",
        nanos / 1_000_000
    )
}

#[cfg(test)]
mod time_test {
    use super::*;

    #[test]
    fn test_event_id_digits_only() {
        let epoch = Epoch::from_gregorian_utc(2014, 6, 29, 18, 41, 55, 120_000_000);
        let id = event_id(epoch);
        assert_eq!(id, "20140629184155120");
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_sample_time_and_back() {
        let start = Epoch::from_gregorian_utc_at_midnight(2021, 1, 1);
        let t = sample_time(start, 100.0, 250);
        assert!((seconds_since(t, start) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_epoch() {
        let epoch = parse_epoch("2021-01-01T00:00:00 UTC").unwrap();
        assert_eq!(epoch, Epoch::from_gregorian_utc_at_midnight(2021, 1, 1));
        assert!(parse_epoch("not a date").is_err());
    }
}
