//! Time-bound job dispatch.
//!
//! A [`Scheduler`] accepts [`Job`]s together with a deadline, keeps the ready ones in a
//! deadline-ordered [`PriorityQueue`] and hands the most urgent one to whichever worker asks
//! next. Jobs may name other scheduled jobs as prerequisites; a job only becomes ready once all
//! of them are [`JobState::Done`], and it is aborted with
//! [`JobFailureReason::PrerequisiteNotAvailable`] as soon as one of them fails.
//!
//! All bookkeeping sits behind one mutex. Closures (the job operation, validity checks, identity
//! hashing and failure notifications) are always called with the lock released. A slot drops its
//! job, and with it the reference to the closure, once it reaches a terminal state.

use crate::engine::job::{Job, JobFailureReason, JobKind, JobPriority, JobState};
use crate::foundation::error::{GearError, GearResult};
use crate::foundation::ids::{JobHandle, ManifestationId};
use crate::foundation::time::{Clock, Offset, TimeValue};
use crate::gear::config::SchedulerConfig;
use crate::gear::priqueue::PriorityQueue;
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Slack between the start of a planning job placed by [`Scheduler::continue_meta_job`] and its
/// deadline.
pub const META_JOB_TOLERANCE: Offset = Offset::from_millis(200);

/// Counters over the lifetime of a scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Jobs accepted by [`ScheduleSpec::post`], including ones rejected right away.
    pub submitted: u64,
    /// Jobs whose operation ran to completion.
    pub done: u64,
    /// Jobs refused at submission or dispatch.
    pub rejected: u64,
    /// Jobs demoted because their deadline passed.
    pub expired: u64,
    /// Jobs cancelled, directly or through a failed prerequisite.
    pub aborted: u64,
    /// Invocations of calculation jobs.
    pub invoked_calc: u64,
    /// Invocations of loading jobs.
    pub invoked_load: u64,
    /// Invocations of meta jobs.
    pub invoked_meta: u64,
}

impl SchedulerStats {
    /// Jobs that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.done + self.rejected + self.expired + self.aborted
    }

    fn count_invocation(&mut self, kind: JobKind) {
        match kind {
            JobKind::Calc => self.invoked_calc += 1,
            JobKind::Load => self.invoked_load += 1,
            JobKind::Meta => self.invoked_meta += 1,
        }
    }
}

/// State change observed while tracing mode was active.
///
/// [`JobState::Running`] marks the moment the job was handed to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TraceEntry {
    /// Scheduler slot of the job.
    pub handle: JobHandle,
    /// [`Job::identity_hash`] of the job.
    pub identity: u64,
    /// Nominal time of the job.
    pub nominal_time: TimeValue,
    /// State the job entered.
    pub outcome: JobState,
}

/// Closure-derived facts about a job, gathered before the lock is taken.
#[derive(Clone, Copy)]
struct Profile {
    identity: u64,
    kind: JobKind,
}

impl Profile {
    fn of(job: &Job) -> Self {
        Self {
            identity: job.identity_hash(),
            kind: job.kind(),
        }
    }
}

struct Slot {
    /// `None` once the slot is terminal.
    job: Option<Job>,
    profile: Profile,
    nominal_time: TimeValue,
    start: TimeValue,
    deadline: TimeValue,
    priority: JobPriority,
    manifestation: ManifestationId,
    state: JobState,
    pending: usize,
    dependents: SmallVec<[JobHandle; 4]>,
    queued: bool,
}

#[derive(Clone, Copy, Debug)]
struct Ready {
    deadline: TimeValue,
    seq: u64,
    handle: JobHandle,
}

type Fallout = Vec<(Job, JobFailureReason)>;

enum Pick {
    Settled(JobHandle, JobState),
    /// Taken off the queue and counted as running; validity is checked without the lock.
    Claimed(JobHandle, Job),
}

struct Core {
    slots: Vec<Slot>,
    /// Handles not yet in a terminal state.
    live: BTreeSet<JobHandle>,
    ready: PriorityQueue<Ready>,
    queued: usize,
    paused: Vec<JobHandle>,
    running: usize,
    active: HashSet<ManifestationId>,
    seq: u64,
    stats: SchedulerStats,
    tracing: bool,
    trace: Vec<TraceEntry>,
}

impl Core {
    fn new(reserve: usize) -> Self {
        let mut ready = PriorityQueue::new(|a: &Ready, b: &Ready| {
            a.deadline.cmp(&b.deadline).then(a.seq.cmp(&b.seq))
        });
        if reserve > 0 {
            ready.reserve(reserve);
        }
        Self {
            slots: Vec::new(),
            live: BTreeSet::new(),
            ready,
            queued: 0,
            paused: Vec::new(),
            running: 0,
            active: HashSet::new(),
            seq: 0,
            stats: SchedulerStats::default(),
            tracing: false,
            trace: Vec::new(),
        }
    }

    fn slot(&self, h: JobHandle) -> Option<&Slot> {
        usize::try_from(h.0).ok().and_then(|i| self.slots.get(i))
    }

    fn slot_mut(&mut self, h: JobHandle) -> &mut Slot {
        &mut self.slots[h.0 as usize]
    }

    fn is_enabled(&self, m: ManifestationId) -> bool {
        m == ManifestationId::ALWAYS || self.active.contains(&m)
    }

    fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0
    }

    fn note(&mut self, h: JobHandle, outcome: JobState) {
        if !self.tracing {
            return;
        }
        let slot = &self.slots[h.0 as usize];
        let entry = TraceEntry {
            handle: h,
            identity: slot.profile.identity,
            nominal_time: slot.nominal_time,
            outcome,
        };
        tracing::debug!(handle = h.0, ?outcome, time = %entry.nominal_time, "job trace");
        self.trace.push(entry);
    }

    fn submit(
        &mut self,
        spec: SpecParts,
        profile: Profile,
        now: TimeValue,
        config: &SchedulerConfig,
        fallout: &mut Fallout,
    ) -> GearResult<JobHandle> {
        if let Some(bad) = spec.after.iter().find(|p| self.slot(**p).is_none()) {
            return Err(GearError::dispatch(format!(
                "unknown prerequisite job handle {}",
                bad.0
            )));
        }
        let h = JobHandle(self.slots.len() as u64);
        let nominal_time = spec.job.nominal_time();
        self.slots.push(Slot {
            job: Some(spec.job),
            profile,
            nominal_time,
            start: spec.start,
            deadline: spec.deadline,
            priority: spec.priority,
            manifestation: spec.manifestation,
            state: JobState::Waiting,
            pending: 0,
            dependents: SmallVec::new(),
            queued: false,
        });
        self.live.insert(h);
        self.stats.submitted += 1;
        self.note(h, JobState::Waiting);

        if !self.is_enabled(spec.manifestation) {
            tracing::debug!(
                handle = h.0,
                manifestation = spec.manifestation.0,
                "job rejected: manifestation not active"
            );
            self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
            return Ok(h);
        }
        if spec.priority.expires()
            && spec.deadline != TimeValue::NEVER
            && spec.deadline > now + config.future_planning_limit()
        {
            tracing::debug!(
                handle = h.0,
                deadline = %spec.deadline,
                "job rejected: beyond planning horizon"
            );
            self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
            return Ok(h);
        }

        let mut pending = 0;
        for &p in &spec.after {
            match self.slots[p.0 as usize].state {
                JobState::Done => {}
                JobState::Waiting | JobState::Running => {
                    self.slot_mut(p).dependents.push(h);
                    pending += 1;
                }
                JobState::Rejected | JobState::Expired | JobState::Aborted => {
                    self.fail(
                        h,
                        JobState::Aborted,
                        JobFailureReason::PrerequisiteNotAvailable,
                        fallout,
                    );
                    return Ok(h);
                }
            }
        }
        self.slot_mut(h).pending = pending;
        tracing::trace!(
            handle = h.0,
            pending,
            start = %spec.start,
            deadline = %spec.deadline,
            "job submitted"
        );
        if pending == 0 {
            self.make_ready(h, fallout);
        }
        Ok(h)
    }

    fn make_ready(&mut self, h: JobHandle, fallout: &mut Fallout) {
        if self.slots[h.0 as usize].priority == JobPriority::Paused {
            self.paused.push(h);
        } else {
            self.enqueue(h, fallout);
        }
    }

    fn enqueue(&mut self, h: JobHandle, fallout: &mut Fallout) {
        self.seq += 1;
        let item = Ready {
            deadline: self.slots[h.0 as usize].deadline,
            seq: self.seq,
            handle: h,
        };
        match self.ready.insert(item) {
            Ok(()) => {
                self.slot_mut(h).queued = true;
                self.queued += 1;
            }
            Err(e) => {
                tracing::warn!(handle = h.0, error = %e, "job rejected: queue exhausted");
                self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
            }
        }
    }

    /// Move `h` into a failure state and abort everything waiting on it.
    fn fail(
        &mut self,
        h: JobHandle,
        state: JobState,
        reason: JobFailureReason,
        fallout: &mut Fallout,
    ) {
        let mut work = vec![(h, state, reason)];
        while let Some((h, state, reason)) = work.pop() {
            let slot = self.slot_mut(h);
            if !slot.state.can_transition_to(state) {
                continue;
            }
            slot.state = state;
            let was_queued = std::mem::replace(&mut slot.queued, false);
            if let Some(job) = slot.job.take() {
                fallout.push((job, reason));
            }
            let dependents = std::mem::take(&mut slot.dependents);
            if was_queued {
                self.queued -= 1;
            }
            self.live.remove(&h);
            match state {
                JobState::Rejected => self.stats.rejected += 1,
                JobState::Expired => self.stats.expired += 1,
                _ => self.stats.aborted += 1,
            }
            self.note(h, state);
            work.extend(dependents.into_iter().map(|d| {
                (
                    d,
                    JobState::Aborted,
                    JobFailureReason::PrerequisiteNotAvailable,
                )
            }));
        }
    }

    /// Take the most urgent dispatchable entry off the queue.
    ///
    /// Entries whose start time lies ahead of `now` go back into the queue unchanged.
    fn claim(
        &mut self,
        now: TimeValue,
        expire_overdue: bool,
        fallout: &mut Fallout,
    ) -> Option<Pick> {
        let mut deferred: SmallVec<[Ready; 8]> = SmallVec::new();
        let picked = loop {
            let Some(item) = self.ready.remove() else {
                break None;
            };
            let h = item.handle;
            let slot = &self.slots[h.0 as usize];
            if slot.state != JobState::Waiting || !slot.queued {
                continue;
            }
            let overdue = expire_overdue && slot.priority.expires() && slot.deadline < now;
            let enabled = self.is_enabled(slot.manifestation);
            if enabled && !overdue && slot.start > now {
                deferred.push(item);
                continue;
            }
            let job = slot.job.clone();
            self.slot_mut(h).queued = false;
            self.queued -= 1;

            if !enabled {
                tracing::debug!(handle = h.0, "job rejected: manifestation deactivated");
                self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
                break Some(Pick::Settled(h, JobState::Rejected));
            }
            if overdue {
                tracing::debug!(handle = h.0, now = %now, "job expired before dispatch");
                self.fail(h, JobState::Expired, JobFailureReason::Timeout, fallout);
                break Some(Pick::Settled(h, JobState::Expired));
            }
            let Some(job) = job else {
                self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
                break Some(Pick::Settled(h, JobState::Rejected));
            };
            self.running += 1;
            break Some(Pick::Claimed(h, job));
        };

        for item in deferred {
            if let Err(e) = self.ready.insert(item) {
                tracing::warn!(
                    handle = item.handle.0,
                    error = %e,
                    "job rejected: queue exhausted"
                );
                self.fail(
                    item.handle,
                    JobState::Rejected,
                    JobFailureReason::Rejected,
                    fallout,
                );
            }
        }
        picked
    }

    /// Settle the outcome of a claimed job's validity check.
    ///
    /// Returns [`JobState::Running`] when the job may be invoked, otherwise the state it ended in.
    fn start(&mut self, h: JobHandle, valid: bool, fallout: &mut Fallout) -> JobState {
        let state = self.slots[h.0 as usize].state;
        if state != JobState::Waiting {
            // settled by abort or expiry while the check ran
            self.running -= 1;
            return state;
        }
        if !valid {
            self.running -= 1;
            tracing::warn!(handle = h.0, "job rejected: closure cannot serve nominal time");
            self.fail(h, JobState::Rejected, JobFailureReason::Rejected, fallout);
            return JobState::Rejected;
        }
        let slot = self.slot_mut(h);
        slot.state = JobState::Running;
        let kind = slot.profile.kind;
        self.stats.count_invocation(kind);
        self.note(h, JobState::Running);
        JobState::Running
    }

    fn finish(&mut self, h: JobHandle, completed: bool, fallout: &mut Fallout) -> JobState {
        self.running -= 1;
        let state = self.slots[h.0 as usize].state;
        if state != JobState::Running {
            // cancelled while running; dependents were failed at that point
            return state;
        }
        if !completed {
            self.fail(h, JobState::Aborted, JobFailureReason::Aborted, fallout);
            return JobState::Aborted;
        }

        let slot = self.slot_mut(h);
        slot.state = JobState::Done;
        slot.job = None;
        let dependents = std::mem::take(&mut slot.dependents);
        self.live.remove(&h);
        self.stats.done += 1;
        self.note(h, JobState::Done);
        for d in dependents {
            let dep = self.slot_mut(d);
            dep.pending = dep.pending.saturating_sub(1);
            if dep.pending == 0 && dep.state == JobState::Waiting {
                self.make_ready(d, fallout);
            }
        }
        JobState::Done
    }

    /// Abort every job not yet terminal; returns how many this moved to a failure state.
    fn abort_unfinished(&mut self, fallout: &mut Fallout) -> usize {
        let before = self.live.len();
        let unfinished: Vec<JobHandle> = self.live.iter().copied().collect();
        for h in unfinished {
            self.fail(h, JobState::Aborted, JobFailureReason::Aborted, fallout);
        }
        before - self.live.len()
    }
}

struct SpecParts {
    job: Job,
    start: TimeValue,
    deadline: TimeValue,
    priority: JobPriority,
    manifestation: ManifestationId,
    after: SmallVec<[JobHandle; 4]>,
}

/// Builder for one submission, obtained from [`Scheduler::schedule`].
#[must_use = "a schedule does nothing until posted"]
pub struct ScheduleSpec<'s> {
    scheduler: &'s Scheduler,
    parts: SpecParts,
}

impl ScheduleSpec<'_> {
    /// Earliest clock time at which the job may be dispatched; defaults to [`TimeValue::ANYTIME`].
    pub fn start_time(mut self, start: TimeValue) -> Self {
        self.parts.start = start;
        self
    }

    /// Start `offset` after the current scheduler clock time.
    pub fn start_offset(mut self, offset: Offset) -> Self {
        self.parts.start = self.scheduler.now() + offset;
        self
    }

    /// Set the deadline `window` after the start time (after now, when no start time is set).
    ///
    /// Takes the start time as set so far, so call it after [`ScheduleSpec::start_time`].
    pub fn life_window(mut self, window: Offset) -> Self {
        let base = if self.parts.start == TimeValue::ANYTIME {
            self.scheduler.now()
        } else {
            self.parts.start
        };
        self.parts.deadline = base + window;
        self
    }

    /// Clock time by which the job must have been dispatched.
    pub fn deadline(mut self, deadline: TimeValue) -> Self {
        self.parts.deadline = deadline;
        self
    }

    /// Dispatch class; defaults to [`JobPriority::TimeBound`].
    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.parts.priority = priority;
        self
    }

    /// Tag the job with a manifestation; it only runs while that manifestation is active.
    pub fn manifestation(mut self, manifestation: ManifestationId) -> Self {
        self.parts.manifestation = manifestation;
        self
    }

    /// Hold the job back until all of `prerequisites` are done.
    pub fn after(mut self, prerequisites: &[JobHandle]) -> Self {
        self.parts.after.extend_from_slice(prerequisites);
        self
    }

    /// Hand the job over to the scheduler.
    ///
    /// A job that cannot be accepted still gets a handle; its state is then
    /// [`JobState::Rejected`] (or [`JobState::Aborted`] when a prerequisite already failed) and
    /// its closure has been notified. Only naming an unknown prerequisite handle is an error.
    pub fn post(self) -> GearResult<JobHandle> {
        self.scheduler.submit(self.parts)
    }
}

/// Coordinates time-bound dispatch of jobs to workers.
///
/// Construct one per render engine and pass it around by reference; all methods take `&self`
/// and are safe to call from any thread.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
    wake: Condvar,
}

impl Scheduler {
    /// Create a scheduler reading deadlines against `clock`.
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> GearResult<Self> {
        config.validate()?;
        let core = Core::new(config.queue_reserve);
        Ok(Self {
            config,
            clock,
            core: Mutex::new(core),
            wake: Condvar::new(),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current time on the scheduler clock.
    pub fn now(&self) -> TimeValue {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, fallout: Fallout) {
        for (job, reason) in fallout {
            job.signal_failure(reason);
        }
    }

    /// Start describing a submission of `job`.
    pub fn schedule(&self, job: Job) -> ScheduleSpec<'_> {
        ScheduleSpec {
            scheduler: self,
            parts: SpecParts {
                job,
                start: TimeValue::ANYTIME,
                deadline: TimeValue::NEVER,
                priority: JobPriority::TimeBound,
                manifestation: ManifestationId::ALWAYS,
                after: SmallVec::new(),
            },
        }
    }

    fn submit(&self, parts: SpecParts) -> GearResult<JobHandle> {
        let profile = Profile::of(&parts.job);
        let now = self.clock.now();
        let mut fallout = Fallout::new();
        let handle = self
            .lock()
            .submit(parts, profile, now, &self.config, &mut fallout)?;
        self.deliver(fallout);
        self.wake.notify_all();
        Ok(handle)
    }

    /// Enable dispatch of jobs tagged with `manifestation`.
    pub fn activate(&self, manifestation: ManifestationId) {
        self.lock().active.insert(manifestation);
        tracing::debug!(manifestation = manifestation.0, "manifestation activated");
    }

    /// Stop accepting and dispatching jobs tagged with `manifestation`.
    ///
    /// Queued jobs of that manifestation are rejected when they come up for dispatch.
    pub fn deactivate(&self, manifestation: ManifestationId) {
        self.lock().active.remove(&manifestation);
        tracing::debug!(manifestation = manifestation.0, "manifestation deactivated");
    }

    /// Lifecycle state of `handle`, if it was issued by this scheduler.
    pub fn state_of(&self, handle: JobHandle) -> Option<JobState> {
        self.lock().slot(handle).map(|s| s.state)
    }

    /// Cancel a job that has not reached a terminal state yet.
    ///
    /// Returns `true` if this call moved the job to [`JobState::Aborted`]; aborting again, or
    /// aborting a finished job, is a no-op. A running job keeps running to its end, but counts
    /// as aborted and its dependents are aborted right away.
    pub fn abort(&self, handle: JobHandle) -> bool {
        let mut fallout = Fallout::new();
        let aborted = {
            let mut core = self.lock();
            match core.slot(handle).map(|s| s.state) {
                Some(JobState::Waiting | JobState::Running) => {
                    core.fail(handle, JobState::Aborted, JobFailureReason::Aborted, &mut fallout);
                    true
                }
                _ => false,
            }
        };
        if aborted {
            tracing::debug!(handle = handle.0, "job aborted");
        }
        self.deliver(fallout);
        self.wake.notify_all();
        aborted
    }

    /// Abort every job not yet in a terminal state; returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let mut fallout = Fallout::new();
        let n = self.lock().abort_unfinished(&mut fallout);
        tracing::debug!(aborted = n, "all jobs aborted");
        self.deliver(fallout);
        self.wake.notify_all();
        n
    }

    /// Bring processing down: abort all outstanding work and discard the queues.
    ///
    /// Jobs already running are not interrupted. Jobs posted concurrently either are aborted
    /// too or stay fully queued. The scheduler stays usable afterwards.
    pub fn terminate_processing(&self) {
        let mut fallout = Fallout::new();
        let aborted = {
            let mut core = self.lock();
            let aborted = core.abort_unfinished(&mut fallout);
            core.ready.clear();
            core.queued = 0;
            core.paused.clear();
            aborted
        };
        tracing::debug!(aborted, "processing terminated");
        self.deliver(fallout);
        self.wake.notify_all();
    }

    /// Demote every waiting time-bound job whose deadline has passed; returns how many expired.
    pub fn expire_overdue(&self) -> usize {
        let now = self.clock.now();
        let mut fallout = Fallout::new();
        let mut expired = 0;
        {
            let mut core = self.lock();
            let overdue: Vec<JobHandle> = core
                .live
                .iter()
                .copied()
                .filter(|h| {
                    let s = &core.slots[h.0 as usize];
                    s.state == JobState::Waiting && s.priority.expires() && s.deadline < now
                })
                .collect();
            for h in overdue {
                if core.slots[h.0 as usize].state == JobState::Waiting {
                    core.fail(h, JobState::Expired, JobFailureReason::Timeout, &mut fallout);
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            tracing::debug!(expired, now = %now, "overdue jobs expired");
        }
        self.deliver(fallout);
        self.wake.notify_all();
        expired
    }

    /// Release jobs held back with [`JobPriority::Paused`]; returns how many were queued.
    ///
    /// Resumed jobs keep their priority and therefore never expire.
    pub fn resume_paused(&self) -> usize {
        let mut fallout = Fallout::new();
        let mut resumed = 0;
        {
            let mut core = self.lock();
            let paused = std::mem::take(&mut core.paused);
            for h in paused {
                if core.slots[h.0 as usize].state == JobState::Waiting {
                    core.enqueue(h, &mut fallout);
                    resumed += 1;
                }
            }
        }
        self.deliver(fallout);
        self.wake.notify_all();
        resumed
    }

    /// Place a planning job that prepares the next chunk of work at `next_start`.
    ///
    /// The job is not dispatched before `next_start`, is ordered by a deadline
    /// [`META_JOB_TOLERANCE`] later and never expires. Its closure is expected to post the work
    /// jobs of one chunk and then continue itself with the start of the following chunk.
    pub fn continue_meta_job(
        &self,
        next_start: TimeValue,
        planning_job: Job,
        manifestation: ManifestationId,
    ) -> GearResult<JobHandle> {
        self.schedule(planning_job)
            .start_time(next_start)
            .deadline(next_start + META_JOB_TOLERANCE)
            .priority(JobPriority::Asap)
            .manifestation(manifestation)
            .post()
    }

    /// Enable `manifestation` and place its first planning job right away.
    pub fn seed_calc_stream(
        &self,
        planning_job: Job,
        manifestation: ManifestationId,
    ) -> GearResult<JobHandle> {
        self.activate(manifestation);
        self.continue_meta_job(self.now(), planning_job, manifestation)
    }

    /// Take the most urgent ready job and settle it on the calling thread.
    ///
    /// The job is either invoked, or (when overdue, disabled or invalid) failed without
    /// invocation. Jobs whose start time has not come yet stay queued. Returns the handle and
    /// the state it ended in, or `None` when nothing can be dispatched right now.
    pub fn dispatch_next(&self) -> Option<(JobHandle, JobState)> {
        let now = self.clock.now();
        let mut fallout = Fallout::new();
        let picked = self
            .lock()
            .claim(now, self.config.expire_overdue, &mut fallout);
        self.deliver(fallout);

        let (h, job) = match picked? {
            Pick::Settled(h, state) => {
                self.wake.notify_all();
                return Some((h, state));
            }
            Pick::Claimed(h, job) => (h, job),
        };

        let valid = job.is_valid();
        let mut fallout = Fallout::new();
        let started = self.lock().start(h, valid, &mut fallout);
        self.deliver(fallout);
        if started != JobState::Running {
            self.wake.notify_all();
            return Some((h, started));
        }

        let completed = std::panic::catch_unwind(AssertUnwindSafe(|| job.trigger_job())).is_ok();
        if !completed {
            tracing::warn!(handle = h.0, job = ?job, "job operation panicked");
        }
        let mut fallout = Fallout::new();
        let state = self.lock().finish(h, completed, &mut fallout);
        self.deliver(fallout);
        self.wake.notify_all();
        Some((h, state))
    }

    /// Run worker threads until nothing is queued or running.
    ///
    /// Jobs still waiting for a paused or never-finishing prerequisite are left waiting. Queued
    /// jobs with a start time ahead keep the workers polling until that time has come.
    pub fn run_until_idle(&self) -> GearResult<()> {
        let pool = build_thread_pool(self.config.workers)?;
        let workers = pool.current_num_threads();
        tracing::debug!(workers, "worker pool started");
        pool.scope(|s| {
            for worker in 0..workers {
                s.spawn(move |_| self.work(worker));
            }
        });
        tracing::debug!(stats = ?self.stats(), "worker pool idle");
        Ok(())
    }

    fn work(&self, worker: usize) {
        let mut handled = 0usize;
        loop {
            if self.dispatch_next().is_some() {
                handled += 1;
                continue;
            }
            let core = self.lock();
            if core.is_idle() {
                self.wake.notify_all();
                break;
            }
            drop(
                self.wake
                    .wait_timeout(core, self.config.idle_wait())
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
        tracing::trace!(worker, handled, "worker done");
    }

    /// `true` when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Number of jobs ready for dispatch.
    pub fn queued(&self) -> usize {
        self.lock().queued
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats
    }

    /// Ready jobs per worker thread; values above 1 mean work is piling up.
    pub fn load_indicator(&self) -> f64 {
        let workers = self
            .config
            .workers
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        self.lock().queued as f64 / workers as f64
    }

    /// Start recording a trace of job state changes, discarding any previous trace.
    pub fn activate_tracing(&self) {
        let mut core = self.lock();
        core.tracing = true;
        core.trace.clear();
    }

    /// Stop recording; the trace collected so far stays available.
    pub fn disable_tracing(&self) {
        self.lock().tracing = false;
    }

    /// `true` while tracing mode is active.
    pub fn is_tracing(&self) -> bool {
        self.lock().tracing
    }

    /// Recorded trace, oldest first.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.lock().trace.clone()
    }

    /// `true` if the trace shows `job` being handed to a worker.
    pub fn was_invoked(&self, job: &Job) -> bool {
        let identity = job.identity_hash();
        self.lock()
            .trace
            .iter()
            .any(|e| e.identity == identity && e.outcome == JobState::Running)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("jobs", &core.slots.len())
            .field("live", &core.live.len())
            .field("queued", &core.queued)
            .field("running", &core.running)
            .field("stats", &core.stats)
            .finish()
    }
}

fn build_thread_pool(workers: Option<usize>) -> GearResult<rayon::ThreadPool> {
    if let Some(n) = workers
        && n == 0
    {
        return Err(GearError::validation(
            "scheduler 'workers' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("gear-worker-{i}"));
    if let Some(n) = workers {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| GearError::dispatch(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/gear/scheduler.rs"]
mod tests;
