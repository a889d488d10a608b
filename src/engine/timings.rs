use crate::engine::job::JobPriority;
use crate::foundation::error::{GearError, GearResult};
use crate::foundation::time::{FrameRate, Offset, TimeValue};

/// Frame grid and wall-clock anchoring of one calculation stream.
///
/// Nominal times live on the timeline axis (`origin` + frame offsets); deadlines live on the
/// scheduler clock axis, where frame 0 is due at `anchor` and every job must be finished
/// `latency` before its frame is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Timings {
    /// Frame rate of the output grid.
    pub grid: FrameRate,
    /// Nominal time of frame 0.
    pub origin: TimeValue,
    /// Clock time at which frame 0 is due.
    pub anchor: TimeValue,
    /// Head start subtracted from every frame's due time.
    pub latency: Offset,
    /// Dispatch class of jobs planned with these timings.
    #[serde(default)]
    pub priority: JobPriority,
}

impl Timings {
    /// Grid starting at nominal and clock time zero, no latency, time-bound delivery.
    pub fn new(grid: FrameRate) -> Self {
        Self {
            grid,
            origin: TimeValue::ZERO,
            anchor: TimeValue::ZERO,
            latency: Offset(0),
            priority: JobPriority::TimeBound,
        }
    }

    /// Shift the nominal time of frame 0.
    pub fn with_origin(mut self, origin: TimeValue) -> Self {
        self.origin = origin;
        self
    }

    /// Clock time at which frame 0 is due.
    pub fn with_anchor(mut self, anchor: TimeValue) -> Self {
        self.anchor = anchor;
        self
    }

    /// Head start every job needs before its frame is due.
    pub fn with_latency(mut self, latency: Offset) -> Self {
        self.latency = latency;
        self
    }

    /// Dispatch class for planned jobs.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Reject negative latency.
    pub fn validate(&self) -> GearResult<()> {
        if self.latency.0 < 0 {
            return Err(GearError::validation("timings latency must be >= 0"));
        }
        Ok(())
    }

    /// Nominal time of frame `n`.
    pub fn frame_start_at(&self, n: i64) -> TimeValue {
        self.origin + self.grid.frame_offset(n)
    }

    /// Number of the frame containing nominal time `time` (frames start inclusive).
    pub fn frame_nr_at(&self, time: TimeValue) -> i64 {
        let rel = i128::from(time.0) - i128::from(self.origin.0);
        let num = i128::from(self.grid.num);
        let per_sec = 1_000_000 * i128::from(self.grid.den);
        let guess = (rel * num).div_euclid(per_sec);
        let guess = guess.clamp(i128::from(i64::MIN), i128::from(i64::MAX - 1)) as i64;
        // frame starts are rounded down to whole microseconds, so the exact quotient may lag by one
        if self.frame_start_at(guess + 1) <= time {
            guess + 1
        } else {
            guess
        }
    }

    /// Clock time by which the jobs of frame `n` must be dispatched.
    pub fn deadline_for(&self, n: i64) -> TimeValue {
        self.anchor + self.grid.frame_offset(n) - self.latency
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/timings.rs"]
mod tests;
