use crate::engine::exploration::ExplorationState;
use crate::engine::frame_coord::FrameCoord;
use crate::engine::job::{InvocationInstanceId, Job, JobClosure};
use crate::engine::segment::Segment;
use crate::foundation::ids::TicketId;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use xxhash_rust::xxh3::Xxh3;

static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Reference to a ticket whose job must complete before the dependent job may run.
///
/// Non-owning: indexes into the ticket arena of the same [`Segment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Prerequisite {
    /// Prerequisite ticket.
    pub ticket: TicketId,
    /// Channel of the prerequisite ticket to pull.
    #[serde(default)]
    pub channel: u32,
}

impl Prerequisite {
    /// Prerequisite on `channel` of `ticket`.
    pub fn new(ticket: TicketId, channel: u32) -> Self {
        Self { ticket, channel }
    }
}

/// Ordered prerequisites of one channel.
pub type Prerequisites = SmallVec<[Prerequisite; 4]>;

/// What handling one channel of a ticket entails.
#[derive(Clone)]
pub struct Provision {
    pub(crate) closure: Arc<dyn JobClosure>,
    pub(crate) pipeline_identity: u64,
    pub(crate) invocation_seed: InvocationInstanceId,
}

impl Provision {
    /// Bind `closure` to an exit point identified by `pipeline_identity`.
    pub fn new(closure: Arc<dyn JobClosure>, pipeline_identity: u64) -> Self {
        let invocation_seed = closure.build_instance_id(pipeline_identity);
        Self {
            closure,
            pipeline_identity,
            invocation_seed,
        }
    }

    /// Closure invoked by jobs of this channel.
    pub fn closure(&self) -> &Arc<dyn JobClosure> {
        &self.closure
    }

    /// Identity of the exit point this channel computes.
    pub fn pipeline_identity(&self) -> u64 {
        self.pipeline_identity
    }

    /// Seed mixed into every invocation id of this channel.
    pub fn invocation_seed(&self) -> InvocationInstanceId {
        self.invocation_seed
    }
}

/// Execution plan for pulling one exit point of one segment.
///
/// Acts as a blueprint: combined with a [`FrameCoord`] it yields the concrete [`Job`] for that
/// frame, and it exposes per-channel prerequisite tickets for dependency discovery. Created once
/// per segment build and immutable afterwards; tickets are discarded in bulk together with
/// their [`Segment`].
#[derive(Clone)]
pub struct JobTicket {
    pub(crate) id: TicketId,
    pub(crate) name: String,
    pub(crate) provisions: Vec<Provision>,
    pub(crate) prerequisites: Vec<Prerequisites>,
}

impl JobTicket {
    /// Assemble a ticket; `provisions` and `prerequisites` are indexed by channel.
    pub fn new(
        id: TicketId,
        name: impl Into<String>,
        provisions: Vec<Provision>,
        prerequisites: Vec<Prerequisites>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            provisions,
            prerequisites,
        }
    }

    /// Arena index of this ticket.
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Name of the exit node this ticket was built for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of channels provisioned.
    pub fn channel_count(&self) -> usize {
        self.provisions.len()
    }

    /// Provision of `channel`, if present.
    pub fn provision(&self, channel: u32) -> Option<&Provision> {
        self.provisions.get(channel as usize)
    }

    /// Direct prerequisites of `channel`; empty for leaf tickets and unknown channels.
    pub fn prerequisites(&self, channel: u32) -> &[Prerequisite] {
        self.prerequisites
            .get(channel as usize)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Local structural check: at least one channel, one prerequisite list per channel.
    pub fn is_well_formed(&self) -> bool {
        !self.provisions.is_empty() && self.provisions.len() == self.prerequisites.len()
    }

    /// Produce the job computing `coord` on this exit point.
    ///
    /// Pairs the channel's closure with the nominal time and a fresh invocation id derived from
    /// the channel's seed. Repeated calls yield the same closure and nominal time.
    ///
    /// # Panics
    ///
    /// Panics if `coord.channel` is not provisioned by this ticket.
    pub fn create_job_for(&self, coord: FrameCoord) -> Job {
        let Some(provision) = self.provision(coord.channel) else {
            panic!(
                "job ticket '{}' has no channel {} (channels: {})",
                self.name,
                coord.channel,
                self.channel_count()
            );
        };
        let seq = INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut h = Xxh3::with_seed(provision.invocation_seed.0);
        h.update(&coord.nominal_time.0.to_le_bytes());
        h.update(&seq.to_le_bytes());
        Job::new(
            provision.closure.clone(),
            InvocationInstanceId(h.digest()),
            coord.nominal_time,
        )
    }
}

impl fmt::Debug for JobTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTicket")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channels", &self.provisions.len())
            .field("prerequisites", &self.prerequisites)
            .finish()
    }
}

/// Borrowed view of a ticket together with the segment arena it lives in.
///
/// Prerequisite references are arena indices, so anything that follows them needs the segment;
/// this handle carries it along.
#[derive(Clone, Copy)]
pub struct TicketRef<'a> {
    segment: &'a Segment,
    ticket: &'a JobTicket,
}

impl<'a> TicketRef<'a> {
    pub(crate) fn new(segment: &'a Segment, ticket: &'a JobTicket) -> Self {
        Self { segment, ticket }
    }

    /// Segment owning this ticket.
    pub fn segment(&self) -> &'a Segment {
        self.segment
    }

    /// Underlying ticket.
    pub fn ticket(&self) -> &'a JobTicket {
        self.ticket
    }

    /// Cursor over the prerequisites of `channel`, seeded at the first prerequisite level.
    ///
    /// Empty when the channel has no prerequisites.
    pub fn discover_prerequisites(&self, channel: u32) -> ExplorationState<'a> {
        ExplorationState::over(self.segment, self.ticket.prerequisites(channel))
    }

    /// Cursor over the complete frame plan: every prerequisite, then this ticket itself.
    pub fn start_exploration(&self, channel: u32) -> ExplorationState<'a> {
        ExplorationState::rooted(self.segment, Prerequisite::new(self.ticket.id, channel))
    }

    /// Jobs for `coord` in dependency order: all prerequisites first, this ticket's job last.
    pub fn create_jobs_for(self, coord: FrameCoord) -> impl Iterator<Item = Job> + 'a {
        let segment = self.segment;
        self.start_exploration(coord.channel).map(move |p| {
            segment
                .ticket(p.ticket)
                .create_job_for(coord.with_channel(p.channel))
        })
    }

    /// Structural check of this ticket and, transitively, every ticket it depends on.
    pub fn is_valid(&self) -> bool {
        self.segment.check_reachable(self.ticket.id)
    }
}

impl std::ops::Deref for TicketRef<'_> {
    type Target = JobTicket;

    fn deref(&self) -> &JobTicket {
        self.ticket
    }
}

impl fmt::Debug for TicketRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.ticket, f)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/job_ticket.rs"]
mod tests;
