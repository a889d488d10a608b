/// Scheduler tuning.
pub mod config;
pub mod priqueue;
pub mod scheduler;
