use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan parameter: {0}")]
    InvalidScanParameter(String),

    #[error("Invalid band-pass filter: {0}")]
    InvalidFilter(String),

    #[error(
        "Padding ({pre_pad} + {post_pad} samples) leaves no output sample in a window of {window} samples"
    )]
    PaddingExceedsWindow {
        pre_pad: usize,
        post_pad: usize,
        window: usize,
    },

    #[error("Missing or invalid travel-time data: {0}")]
    InvalidTravelTimes(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Waveform retrieval failed: {0}")]
    WaveformUnavailable(String),

    #[error("No station has data in the requested window")]
    NoAvailableStations,

    #[error("Coalescence volume is empty or flat; no location can be estimated")]
    DegenerateVolume,

    #[error("Result store error: {0}")]
    Store(String),
}

impl ScanError {
    /// Configuration errors abort the whole run; everything else only aborts the
    /// window or event being processed.
    pub fn is_fatal(&self) -> bool {
        use ScanError::*;
        matches!(
            self,
            InvalidScanParameter(_)
                | InvalidFilter(_)
                | PaddingExceedsWindow { .. }
                | InvalidTravelTimes(_)
        )
    }
}

impl PartialEq for ScanError {
    fn eq(&self, other: &Self) -> bool {
        use ScanError::*;
        match (self, other) {
            (InvalidScanParameter(a), InvalidScanParameter(b)) => a == b,
            (InvalidFilter(a), InvalidFilter(b)) => a == b,
            (
                PaddingExceedsWindow {
                    pre_pad: a1,
                    post_pad: a2,
                    window: a3,
                },
                PaddingExceedsWindow {
                    pre_pad: b1,
                    post_pad: b2,
                    window: b3,
                },
            ) => a1 == b1 && a2 == b2 && a3 == b3,
            (InvalidTravelTimes(a), InvalidTravelTimes(b)) => a == b,
            (ShapeMismatch(a), ShapeMismatch(b)) => a == b,
            (WaveformUnavailable(a), WaveformUnavailable(b)) => a == b,
            (Store(a), Store(b)) => a == b,

            (NoAvailableStations, NoAvailableStations) => true,
            (DegenerateVolume, DegenerateVolume) => true,

            _ => false,
        }
    }
}

#[cfg(test)]
mod scan_errors_test {
    use super::*;

    #[test]
    fn test_fatal_split() {
        assert!(ScanError::PaddingExceedsWindow {
            pre_pad: 10,
            post_pad: 10,
            window: 15
        }
        .is_fatal());
        assert!(ScanError::InvalidFilter("order".into()).is_fatal());
        assert!(!ScanError::NoAvailableStations.is_fatal());
        assert!(!ScanError::WaveformUnavailable("gap".into()).is_fatal());
        assert!(!ScanError::DegenerateVolume.is_fatal());
    }

    #[test]
    fn test_variant_equality() {
        assert_eq!(
            ScanError::Store("disk".into()),
            ScanError::Store("disk".into())
        );
        assert_ne!(ScanError::Store("disk".into()), ScanError::DegenerateVolume);
    }
}
