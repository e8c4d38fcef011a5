//! Time representation for the synchronization engine.
//! Presentation times are `f64` seconds; container timestamps are integer
//! ticks of a stream `Rational` time base.

use std::sync::OnceLock;
use std::time::Instant;

/// Time in seconds. `NaN` means "unknown".
pub type Time = f64;

/// Time constants for conversions
pub mod constants {
    /// Ticks per second of the session-wide microsecond time base.
    pub const TIME_BASE: i64 = 1_000_000;
    pub const MICROS_PER_MILLI: i64 = 1_000;
}

/// Rational time base (`num / den` seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Microsecond time base used for seek targets and subtitle timestamps.
    pub const MICROS: Rational = Rational::new(1, constants::TIME_BASE as i32);

    /// Value as seconds-per-tick; 0.0 for a degenerate denominator.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn invert(self) -> Rational {
        Rational::new(self.den, self.num)
    }

    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::new(0, 1)
    }
}

/// Rescale `value` from time base `from` to `to`, rounding to nearest.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let half = den.abs() / 2;
    let rounded = if (num >= 0) == (den > 0) {
        (num.abs() + half) / den.abs()
    } else {
        -((num.abs() + half) / den.abs())
    };
    rounded as i64
}

/// Convert ticks in `time_base` to seconds.
#[inline]
pub fn ticks_to_seconds(ticks: i64, time_base: Rational) -> Time {
    ticks as f64 * time_base.to_f64()
}

/// Convert microseconds to seconds
#[inline]
pub fn from_micros(micros: i64) -> Time {
    micros as f64 / constants::TIME_BASE as f64
}

/// Convert seconds to microseconds
#[inline]
pub fn to_micros(seconds: Time) -> i64 {
    (seconds * constants::TIME_BASE as f64) as i64
}

/// Convert milliseconds to seconds
#[inline]
pub fn from_millis(millis: u32) -> Time {
    millis as f64 / 1000.0
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic wall time in seconds since the first call in this process.
pub fn relative_now() -> Time {
    epoch().elapsed().as_secs_f64()
}

/// Format time as HH:MM:SS.mmm, or "--:--:--.---" when unknown.
pub fn format_time(seconds: Time) -> String {
    if !seconds.is_finite() {
        return "--:--:--.---".to_string();
    }
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total_millis = (seconds.abs() * 1000.0).round() as i64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let secs = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;

    format!("{}{:02}:{:02}:{:02}.{:03}", sign, hours, minutes, secs, millis)
}
