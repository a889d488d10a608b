use crate::foundation::error::{GearError, GearResult};
use crate::foundation::time::Offset;
use std::path::Path;

/// Tuning knobs for a [`crate::Scheduler`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Override the number of rayon worker threads. `None` uses rayon defaults.
    pub workers: Option<usize>,
    /// Queue slots to reserve up front.
    pub queue_reserve: usize,
    /// Jobs whose deadline lies further ahead of the clock than this are rejected.
    pub future_planning_limit_us: i64,
    /// Demote overdue time-bound jobs to expired instead of running them late.
    pub expire_overdue: bool,
    /// How long an idle worker sleeps before re-checking the queue.
    pub idle_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_reserve: 0,
            future_planning_limit_us: 20_000_000,
            expire_overdue: true,
            idle_wait_ms: 20,
        }
    }
}

impl SchedulerConfig {
    /// Parse from a JSON object; missing fields take their defaults, unknown fields are errors.
    pub fn from_json_str(s: &str) -> GearResult<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        if !value.is_object() {
            return Err(GearError::validation(
                "scheduler config must be a JSON object",
            ));
        }
        let cfg: Self = serde_json::from_value(value)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: &Path) -> GearResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GearError::Other(
                anyhow::Error::new(e)
                    .context(format!("read scheduler config '{}'", path.display())),
            )
        })?;
        Self::from_json_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> GearResult<()> {
        if self.workers == Some(0) {
            return Err(GearError::validation(
                "scheduler 'workers' must be >= 1 when set",
            ));
        }
        if self.future_planning_limit_us <= 0 {
            return Err(GearError::validation(
                "scheduler 'future_planning_limit_us' must be > 0",
            ));
        }
        Ok(())
    }

    /// Planning horizon as an offset.
    pub fn future_planning_limit(&self) -> Offset {
        Offset(self.future_planning_limit_us)
    }

    pub(crate) fn idle_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_wait_ms.max(1))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/gear/config.rs"]
mod tests;
