use crate::foundation::error::{GearError, GearResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Point on a time axis, in microseconds.
///
/// Used both for nominal (timeline) time and for wall-clock deadlines; which axis a value lives
/// on is determined by the field it is stored in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TimeValue(pub i64);

/// Signed distance between two [`TimeValue`]s, in microseconds.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Offset(pub i64);

impl TimeValue {
    /// Origin of the time axis.
    pub const ZERO: Self = Self(0);
    /// Earliest representable time; "any time is fine".
    pub const ANYTIME: Self = Self(i64::MIN);
    /// Latest representable time; "never due".
    pub const NEVER: Self = Self(i64::MAX);

    /// Build from whole microseconds.
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Build from fractional seconds, rounding to the nearest microsecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    /// Raw microsecond value.
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Value as fractional seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Shift by `off`, saturating at [`TimeValue::ANYTIME`] / [`TimeValue::NEVER`].
    pub fn shifted(self, off: Offset) -> Self {
        Self(self.0.saturating_add(off.0))
    }

    /// Distance from `earlier` to `self`.
    pub fn offset_since(self, earlier: TimeValue) -> Offset {
        Offset(self.0.saturating_sub(earlier.0))
    }
}

impl Offset {
    /// Build from whole microseconds.
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Build from whole milliseconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    /// Raw microsecond value.
    pub const fn micros(self) -> i64 {
        self.0
    }
}

impl From<Duration> for Offset {
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
    }
}

impl std::ops::Add<Offset> for TimeValue {
    type Output = TimeValue;

    fn add(self, rhs: Offset) -> TimeValue {
        self.shifted(rhs)
    }
}

impl std::ops::Sub<Offset> for TimeValue {
    type Output = TimeValue;

    fn sub(self, rhs: Offset) -> TimeValue {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for TimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::ANYTIME => f.write_str("-inf"),
            Self::NEVER => f.write_str("+inf"),
            Self(us) => write!(f, "{:.6}s", us as f64 / 1_000_000.0),
        }
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRate {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl FrameRate {
    /// Create a validated frame rate.
    pub fn new(num: u32, den: u32) -> GearResult<Self> {
        if den == 0 {
            return Err(GearError::validation("FrameRate den must be > 0"));
        }
        if num == 0 {
            return Err(GearError::validation("FrameRate num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Parse `"25"` or `"30000/1001"`.
    pub fn parse(s: &str) -> GearResult<Self> {
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s.trim(), "1"),
        };
        let num = num
            .parse::<u32>()
            .map_err(|e| GearError::validation(format!("invalid frame rate '{s}': {e}")))?;
        let den = den
            .parse::<u32>()
            .map_err(|e| GearError::validation(format!("invalid frame rate '{s}': {e}")))?;
        Self::new(num, den)
    }

    /// Start offset of frame `n` relative to the grid origin, rounded down to whole microseconds.
    ///
    /// Computed from the rational rate directly so that long runs do not accumulate drift.
    pub fn frame_offset(self, n: i64) -> Offset {
        let us = i128::from(n) * 1_000_000 * i128::from(self.den) / i128::from(self.num);
        Offset(us.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }

    /// Duration of one frame.
    pub fn frame_duration(self) -> Offset {
        self.frame_offset(1)
    }
}

/// Source of wall-clock time for deadline decisions.
pub trait Clock: Send + Sync {
    /// Current time on the wall-clock axis.
    fn now(&self) -> TimeValue;
}

/// Monotonic clock measuring microseconds since its creation.
#[derive(Debug)]
pub struct RealClock {
    epoch: Instant,
}

impl RealClock {
    /// Start a clock at [`TimeValue::ZERO`].
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealClock {
    fn now(&self) -> TimeValue {
        TimeValue(Offset::from(self.epoch.elapsed()).0)
    }
}

/// Clock that only moves when told to. Deterministic deadline tests use this.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock standing at `start`.
    pub fn new(start: TimeValue) -> Self {
        Self {
            now: AtomicI64::new(start.0),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, t: TimeValue) {
        self.now.store(t.0, Ordering::SeqCst);
    }

    /// Move forward by `off`.
    pub fn advance(&self, off: Offset) {
        self.now.fetch_add(off.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeValue {
        TimeValue(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/time.rs"]
mod tests;
