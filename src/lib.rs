//! Render-engine job planning and time-bound dispatch.
//!
//! A frozen segment of the processing graph is turned into [`JobTicket`]s, one per exit node.
//! Tickets generate lightweight [`Job`]s for any [`FrameCoord`] and expose their prerequisite
//! tickets, which an [`ExplorationState`] walks depth-first so that every prerequisite is planned
//! before the job depending on it. The resulting jobs go to a [`Scheduler`], which dispatches
//! them to worker threads in deadline order:
//!
//! - Build a [`Segment`] from an [`ExitNode`] graph (or a JSON [`SegmentSpec`])
//! - Plan frames with a [`FramePlanner`] and hand them to the [`Scheduler`]
//! - Run workers with [`Scheduler::run_until_idle`] or step with [`Scheduler::dispatch_next`]
#![deny(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Execution plans: jobs, tickets, prerequisite exploration, frame planning.
pub mod engine;
pub mod ffi;
/// Time-bound dispatch: priority queue and scheduler.
pub mod gear;

pub use crate::foundation::error::{GearError, GearResult};
pub use crate::foundation::ids::{JobHandle, ManifestationId, SegmentId, TicketId};
pub use crate::foundation::time::{Clock, FrameRate, ManualClock, Offset, RealClock, TimeValue};

pub use crate::engine::closure::{ClosureEvent, DiagnosticClosure, Journal, JournalEntry};
pub use crate::engine::exploration::ExplorationState;
pub use crate::engine::frame_coord::FrameCoord;
pub use crate::engine::job::{
    InvocationInstanceId, Job, JobClosure, JobFailureReason, JobKind, JobParameter, JobPriority,
    JobState,
};
pub use crate::engine::job_ticket::{JobTicket, Prerequisite, Prerequisites, Provision, TicketRef};
pub use crate::engine::planning::{FramePlan, FramePlanner, PlannedJob};
pub use crate::engine::segment::{
    ChannelSpec, ExitLink, ExitNode, LinkSpec, NodeSpec, Segment, SegmentBuilder, SegmentSpec,
    build_segment,
};
pub use crate::engine::timings::Timings;
pub use crate::ffi::{ClosureHandle, ClosureRegistry, JobDefinition};
pub use crate::gear::config::SchedulerConfig;
pub use crate::gear::priqueue::PriorityQueue;
pub use crate::gear::scheduler::{
    META_JOB_TOLERANCE, ScheduleSpec, Scheduler, SchedulerStats, TraceEntry,
};
