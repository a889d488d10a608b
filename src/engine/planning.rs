use crate::engine::frame_coord::FrameCoord;
use crate::engine::job::{Job, JobKind};
use crate::engine::job_ticket::Prerequisite;
use crate::engine::segment::Segment;
use crate::engine::timings::Timings;
use crate::foundation::error::{GearError, GearResult};
use crate::foundation::ids::{JobHandle, ManifestationId, TicketId};
use crate::foundation::time::TimeValue;
use crate::gear::scheduler::Scheduler;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::ops::Range;

/// One job of a [`FramePlan`].
#[derive(Clone, Debug, serde::Serialize)]
pub struct PlannedJob {
    /// Exit node the job was generated from.
    pub ticket: String,
    /// Ticket and channel that produced the job.
    pub source: Prerequisite,
    /// Job classification.
    pub kind: JobKind,
    /// The job itself.
    #[serde(skip)]
    pub job: Job,
    /// Positions (within the plan) of the jobs that must finish first.
    pub depends_on: Vec<usize>,
}

/// All jobs needed to deliver one frame, prerequisites first, the frame's own job last.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FramePlan {
    /// Frame number on the timing grid.
    pub frame: i64,
    /// What is being computed.
    pub coord: FrameCoord,
    /// Dispatch deadline shared by every job of the frame.
    pub deadline: TimeValue,
    /// Jobs in dependency order.
    pub jobs: Vec<PlannedJob>,
}

impl FramePlan {
    /// The job producing the frame itself.
    pub fn main_job(&self) -> Option<&PlannedJob> {
        self.jobs.last()
    }
}

/// Turns frame numbers into scheduled jobs for one exit point of one segment.
#[derive(Debug)]
pub struct FramePlanner<'a> {
    segment: &'a Segment,
    root: TicketId,
    channel: u32,
    timings: Timings,
    manifestation: ManifestationId,
}

impl<'a> FramePlanner<'a> {
    /// Plan `channel` of ticket `root` in `segment` on the grid given by `timings`.
    pub fn new(
        segment: &'a Segment,
        root: TicketId,
        channel: u32,
        timings: Timings,
    ) -> GearResult<Self> {
        timings.validate()?;
        let ticket = segment.get(root).ok_or_else(|| {
            GearError::planning(format!(
                "ticket {} is not part of segment {}",
                root.0,
                segment.id().0
            ))
        })?;
        if channel as usize >= ticket.channel_count() {
            return Err(GearError::planning(format!(
                "exit '{}' has no channel {channel}",
                ticket.name()
            )));
        }
        Ok(Self {
            segment,
            root,
            channel,
            timings,
            manifestation: ManifestationId::ALWAYS,
        })
    }

    /// Tag every scheduled job with `manifestation`.
    pub fn with_manifestation(mut self, manifestation: ManifestationId) -> Self {
        self.manifestation = manifestation;
        self
    }

    /// Timing grid in use.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Build the job plan for frame `n`.
    pub fn plan_frame(&self, n: i64) -> FramePlan {
        let coord = FrameCoord::new(
            self.segment.id(),
            self.channel,
            self.timings.frame_start_at(n),
        );
        let mut position = HashMap::<Prerequisite, usize>::new();
        let mut jobs = Vec::new();

        for p in self.segment.ticket(self.root).start_exploration(self.channel) {
            let ticket = self.segment.ticket(p.ticket);
            let job = ticket.create_job_for(coord.with_channel(p.channel));
            // post-order exploration: every prerequisite already has a position
            let depends_on = ticket
                .prerequisites(p.channel)
                .iter()
                .filter_map(|q| position.get(q).copied())
                .collect();
            position.insert(p, jobs.len());
            jobs.push(PlannedJob {
                ticket: ticket.name().to_owned(),
                source: p,
                kind: job.kind(),
                job,
                depends_on,
            });
        }

        FramePlan {
            frame: n,
            coord,
            deadline: self.timings.deadline_for(n),
            jobs,
        }
    }

    /// Plans for every frame in `frames`.
    pub fn plans(&self, frames: Range<i64>) -> impl Iterator<Item = FramePlan> + '_ {
        frames.map(move |n| self.plan_frame(n))
    }

    /// Schedule the jobs of one plan, linking each job to its prerequisites' handles.
    ///
    /// Returns the handles in plan order.
    pub fn dispatch_plan(
        &self,
        scheduler: &Scheduler,
        plan: &FramePlan,
    ) -> GearResult<Vec<JobHandle>> {
        let mut handles: Vec<JobHandle> = Vec::with_capacity(plan.jobs.len());
        for planned in &plan.jobs {
            let after: SmallVec<[JobHandle; 4]> =
                planned.depends_on.iter().map(|&i| handles[i]).collect();
            let h = scheduler
                .schedule(planned.job.clone())
                .deadline(plan.deadline)
                .priority(self.timings.priority)
                .manifestation(self.manifestation)
                .after(&after)
                .post()?;
            handles.push(h);
        }
        Ok(handles)
    }

    /// Plan and schedule every frame in `frames`; returns the handle of each frame's main job.
    #[tracing::instrument(
        skip_all,
        fields(segment = self.segment.id().0, start = frames.start, end = frames.end)
    )]
    pub fn dispatch_range(
        &self,
        scheduler: &Scheduler,
        frames: Range<i64>,
    ) -> GearResult<Vec<JobHandle>> {
        if frames.start > frames.end {
            return Err(GearError::validation(format!(
                "frame range {}..{} is reversed",
                frames.start, frames.end
            )));
        }
        let mut mains = Vec::with_capacity(presize(&frames));
        let mut total = 0usize;
        for plan in self.plans(frames) {
            let handles = self.dispatch_plan(scheduler, &plan)?;
            total += handles.len();
            if let Some(&main) = handles.last() {
                mains.push(main);
            }
        }
        tracing::debug!(frames = mains.len(), jobs = total, "frames dispatched");
        Ok(mains)
    }
}

/// Capacity hint for a frame range, capped so that wide or overflowing ranges stay cheap.
fn presize(frames: &Range<i64>) -> usize {
    const LIMIT: usize = 1024;
    frames
        .end
        .checked_sub(frames.start)
        .and_then(|n| usize::try_from(n).ok())
        .map_or(0, |n| n.min(LIMIT))
}

#[cfg(test)]
#[path = "../../tests/unit/engine/planning.rs"]
mod tests;
