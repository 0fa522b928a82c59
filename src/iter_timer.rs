//! Wall-time tracking for the scan loops.
//!
//! [`IterTimer`] measures the time between two calls to [`IterTimer::tick`] and keeps an
//! exponential moving average of it, `ema ← α·dt + (1 − α)·ema`, seeded with the first interval.
//! The scanner uses it to log per-window cost and the expected time left; [`fmt_dur`] renders
//! durations for those log lines (`"253µs"`, `"42ms"`, `"3.14s"`).
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct IterTimer {
    last: Instant,
    ema_ns: f64,
    alpha: f64,
    count: u64,
}

impl IterTimer {
    /// `alpha` is clamped to `(0, 1]`; 1 disables smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            last: Instant::now(),
            ema_ns: 0.0,
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            count: 0,
        }
    }

    /// Close the current interval and return its length.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let ns = dt.as_nanos() as f64;
        self.ema_ns = match self.count {
            1 => ns,
            _ => self.alpha * ns + (1.0 - self.alpha) * self.ema_ns,
        };
        dt
    }

    pub fn avg(&self) -> Duration {
        Duration::from_nanos(self.ema_ns as u64)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average interval times the number of intervals still to run.
    pub fn remaining(&self, left: usize) -> Duration {
        Duration::from_nanos((self.ema_ns * left as f64) as u64)
    }
}

pub fn fmt_dur(d: Duration) -> String {
    match (d.as_micros(), d.as_millis()) {
        (us, _) if us < 1_000 => format!("{us}µs"),
        (_, ms) if ms < 1_000 => format!("{ms}ms"),
        _ => format!("{:.2}s", d.as_secs_f32()),
    }
}
