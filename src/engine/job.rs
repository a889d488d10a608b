use crate::foundation::time::TimeValue;
use std::fmt;
use std::sync::Arc;
use xxhash_rust::xxh3::{Xxh3, xxh3_64_with_seed};

const XXH3_SEED: u64 = 0x4a6f_6254_6963_6b74;

/// Opaque id attached to each individual job invocation.
///
/// Fed back to the closure on activation; distinguishes repeated invocations of logically the
/// same `(time, closure)` pair.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct InvocationInstanceId(pub u64);

/// The "moving parts" of one job instance. Fixed size and plain data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(C)]
pub struct JobParameter {
    /// Nominal (timeline) time of the frame to produce.
    pub nominal_time: TimeValue,
    /// Per-invocation key.
    pub invocation_id: InvocationInstanceId,
}

/// Classification hint used to route jobs to differently tuned workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Calculating frame data, CPU bound.
    Calc,
    /// Accessing prerequisites, IO bound.
    Load,
    /// Render process self organisation.
    Meta,
}

/// Lifecycle tag maintained by the scheduler around a queued job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Mission accomplished.
    Done,
    /// Currently executing on a worker.
    Running,
    /// Queued, or waiting for prerequisites.
    Waiting,
    /// Refused at submission.
    Rejected,
    /// Deadline missed.
    Expired,
    /// Cancelled from outside, or a prerequisite failed.
    Aborted,
}

impl JobState {
    /// `true` for states a job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Rejected | Self::Expired | Self::Aborted
        )
    }

    /// `true` for terminal states other than [`JobState::Done`].
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != Self::Done
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Waiting, Running | Rejected | Expired | Aborted) => true,
            (Running, Done | Expired | Aborted) => true,
            _ => false,
        }
    }
}

/// Why a job could not be run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum JobFailureReason {
    /// Deadline passed before dispatch.
    Timeout = 0,
    /// A prerequisite job did not complete.
    PrerequisiteNotAvailable = 1,
    /// Cancelled by the render process.
    Aborted = 2,
    /// Refused at submission.
    Rejected = 3,
}

impl JobFailureReason {
    /// Reason for a raw code as passed across the C boundary.
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Timeout),
            1 => Some(Self::PrerequisiteNotAvailable),
            2 => Some(Self::Aborted),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Raw code of this reason.
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Dispatch class of a job.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Regular job scheduled for time-bound delivery; expires when late.
    #[default]
    TimeBound,
    /// Held back until the scheduler resumes paused work.
    Paused,
    /// Freewheeling calculation of final results; never expires.
    Asap,
    /// Background rendering; never expires.
    Background,
}

impl JobPriority {
    /// Only time-bound jobs are demoted to [`JobState::Expired`].
    pub fn expires(self) -> bool {
        self == Self::TimeBound
    }
}

/// Execution context shared by many jobs of one segment and feed.
///
/// Implementations live upstream (media processing) and are immutable once built. All
/// invocation mechanics hide behind this trait; the scheduler only ever sees [`Job`] values.
pub trait JobClosure: Send + Sync {
    /// Perform the actual calculation for one job instance.
    fn invoke_job_operation(&self, parameter: JobParameter);

    /// Notification that the job for `parameter` will not be run.
    fn signal_failure(&self, parameter: JobParameter, reason: JobFailureReason);

    /// Classification used for worker routing.
    fn job_kind(&self) -> JobKind;

    /// Check that this closure can produce data for `nominal_time`.
    fn verify(&self, nominal_time: TimeValue) -> bool;

    /// Derive the invocation seed from a pipeline identity hash.
    fn build_instance_id(&self, seed: u64) -> InvocationInstanceId {
        InvocationInstanceId(xxh3_64_with_seed(&seed.to_le_bytes(), XXH3_SEED))
    }

    /// Hash of one invocation of this closure.
    fn hash_of_instance(&self, id: InvocationInstanceId) -> u64 {
        xxh3_64_with_seed(&id.0.to_le_bytes(), XXH3_SEED)
    }
}

/// Lightweight, copyable descriptor of one unit of calculation.
///
/// Shares (does not own) the closure; the closure's lifetime is tied to the segment that built
/// it. Never mutated after creation.
#[derive(Clone)]
pub struct Job {
    closure: Arc<dyn JobClosure>,
    parameter: JobParameter,
}

impl Job {
    /// Pair a closure with the parameters of one invocation.
    pub fn new(
        closure: Arc<dyn JobClosure>,
        invocation_id: InvocationInstanceId,
        nominal_time: TimeValue,
    ) -> Self {
        Self {
            closure,
            parameter: JobParameter {
                nominal_time,
                invocation_id,
            },
        }
    }

    /// Forward to the closure and perform the calculation.
    pub fn trigger_job(&self) {
        self.closure.invoke_job_operation(self.parameter);
    }

    /// Validity-gated invocation.
    ///
    /// # Panics
    ///
    /// Panics without touching the closure's operation if [`Job::is_valid`] is `false`:
    /// invoking an invalid job is a planning bug.
    pub fn invoke(&self) {
        assert!(
            self.is_valid(),
            "attempt to invoke invalid job (nominal time {}, instance {:#x})",
            self.parameter.nominal_time,
            self.parameter.invocation_id.0
        );
        self.trigger_job();
    }

    /// Tell the closure that this job will not run.
    pub fn signal_failure(&self, reason: JobFailureReason) {
        self.closure.signal_failure(self.parameter, reason);
    }

    /// Closure check for this job's nominal time.
    pub fn is_valid(&self) -> bool {
        self.closure.verify(self.parameter.nominal_time)
    }

    /// Classification hint.
    pub fn kind(&self) -> JobKind {
        self.closure.job_kind()
    }

    /// Nominal time of the frame this job produces.
    pub fn nominal_time(&self) -> TimeValue {
        self.parameter.nominal_time
    }

    /// Invocation key.
    pub fn invocation_id(&self) -> InvocationInstanceId {
        self.parameter.invocation_id
    }

    /// Plain-data parameter block.
    pub fn parameter(&self) -> JobParameter {
        self.parameter
    }

    /// Shared closure.
    pub fn closure(&self) -> &Arc<dyn JobClosure> {
        &self.closure
    }

    /// `true` when this job forwards to exactly `closure`.
    pub fn uses_closure(&self, closure: &Arc<dyn JobClosure>) -> bool {
        closure_addr(&self.closure) == closure_addr(closure)
    }

    /// Hash over closure identity, nominal time and invocation key.
    pub fn identity_hash(&self) -> u64 {
        let mut h = Xxh3::with_seed(XXH3_SEED);
        h.update(&(closure_addr(&self.closure) as u64).to_le_bytes());
        h.update(
            &self
                .closure
                .hash_of_instance(self.parameter.invocation_id)
                .to_le_bytes(),
        );
        h.update(&self.parameter.nominal_time.0.to_le_bytes());
        h.digest()
    }
}

pub(crate) fn closure_addr(closure: &Arc<dyn JobClosure>) -> usize {
    Arc::as_ptr(closure) as *const () as usize
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.identity_hash() == other.identity_hash()
    }
}

impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash());
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("kind", &self.kind())
            .field("nominal_time", &self.parameter.nominal_time)
            .field("invocation_id", &format_args!("{:#x}", self.parameter.invocation_id.0))
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/job.rs"]
mod tests;
