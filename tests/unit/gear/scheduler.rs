use super::*;
use crate::engine::closure::{DiagnosticClosure, Journal};
use crate::engine::job::{InvocationInstanceId, JobClosure, JobParameter};
use crate::foundation::time::{ManualClock, Offset};

fn scheduler_at(t: i64) -> (Scheduler, Arc<ManualClock>) {
    scheduler_with(SchedulerConfig::default(), t)
}

fn scheduler_with(config: SchedulerConfig, t: i64) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(TimeValue(t)));
    (Scheduler::new(config, clock.clone()).unwrap(), clock)
}

fn recorder(label: &str, journal: &Journal) -> Arc<DiagnosticClosure> {
    DiagnosticClosure::new(label, JobKind::Calc)
        .with_journal(journal.clone())
        .into_shared()
}

fn job(c: &Arc<DiagnosticClosure>, t: i64) -> Job {
    Job::new(c.clone(), InvocationInstanceId(t as u64 + 1), TimeValue(t))
}

fn drain(s: &Scheduler) -> Vec<(JobHandle, JobState)> {
    std::iter::from_fn(|| s.dispatch_next()).collect()
}

#[test]
fn most_urgent_deadline_is_dispatched_first() {
    let (s, _) = scheduler_at(0);
    let journal = Journal::new();
    for (label, deadline) in [("late", 300), ("early", 100), ("middle", 200)] {
        let c = recorder(label, &journal);
        s.schedule(job(&c, 0))
            .deadline(TimeValue(deadline))
            .post()
            .unwrap();
    }
    assert_eq!(s.queued(), 3);
    let outcomes = drain(&s);
    assert!(outcomes.iter().all(|(_, st)| *st == JobState::Done));
    assert_eq!(journal.invoked_labels(), vec!["early", "middle", "late"]);
    assert!(s.is_idle());
    assert_eq!(s.stats().done, 3);
    assert_eq!(s.stats().invoked_calc, 3);
}

#[test]
fn equal_deadlines_keep_submission_order() {
    let (s, _) = scheduler_at(0);
    let journal = Journal::new();
    for label in ["a", "b", "c"] {
        let c = recorder(label, &journal);
        s.schedule(job(&c, 0)).deadline(TimeValue(50)).post().unwrap();
    }
    drain(&s);
    assert_eq!(journal.invoked_labels(), vec!["a", "b", "c"]);
}

#[test]
fn overdue_job_expires_instead_of_running() {
    let (s, clock) = scheduler_at(0);
    let c = DiagnosticClosure::new("stale", JobKind::Calc).into_shared();
    let h = s.schedule(job(&c, 0)).deadline(TimeValue(100)).post().unwrap();

    clock.set(TimeValue(101));
    assert_eq!(s.dispatch_next(), Some((h, JobState::Expired)));
    assert_eq!(c.invocation_count(), 0);
    assert_eq!(c.failures()[0].1, JobFailureReason::Timeout);
    assert_eq!(s.state_of(h), Some(JobState::Expired));
    assert_eq!(s.stats().expired, 1);
}

#[test]
fn expiry_sweep_demotes_waiting_jobs() {
    let (s, clock) = scheduler_at(0);
    let c = DiagnosticClosure::new("x", JobKind::Calc).into_shared();
    let overdue = s.schedule(job(&c, 0)).deadline(TimeValue(10)).post().unwrap();
    let timely = s.schedule(job(&c, 1)).deadline(TimeValue(1_000)).post().unwrap();
    let freewheel = s
        .schedule(job(&c, 2))
        .deadline(TimeValue(10))
        .priority(JobPriority::Asap)
        .post()
        .unwrap();

    clock.advance(Offset(500));
    assert_eq!(s.expire_overdue(), 1);
    assert_eq!(s.state_of(overdue), Some(JobState::Expired));
    assert_eq!(s.state_of(timely), Some(JobState::Waiting));
    assert_eq!(s.queued(), 2);

    drain(&s);
    assert_eq!(s.state_of(timely), Some(JobState::Done));
    assert_eq!(s.state_of(freewheel), Some(JobState::Done));
}

#[test]
fn expiry_can_be_disabled() {
    let config = SchedulerConfig {
        expire_overdue: false,
        ..SchedulerConfig::default()
    };
    let (s, clock) = scheduler_with(config, 0);
    let c = DiagnosticClosure::new("late", JobKind::Calc).into_shared();
    let h = s.schedule(job(&c, 0)).deadline(TimeValue(1)).post().unwrap();
    clock.set(TimeValue(1_000));
    assert_eq!(s.dispatch_next(), Some((h, JobState::Done)));
}

#[test]
fn aborting_twice_signals_once() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("victim", JobKind::Calc).into_shared();
    let h = s.schedule(job(&c, 0)).deadline(TimeValue(100)).post().unwrap();

    assert!(s.abort(h));
    assert!(!s.abort(h));
    assert_eq!(s.state_of(h), Some(JobState::Aborted));
    assert_eq!(c.failures(), vec![(job(&c, 0).parameter(), JobFailureReason::Aborted)]);
    assert_eq!(s.dispatch_next(), None);
    assert_eq!(c.invocation_count(), 0);
    assert_eq!(s.stats().aborted, 1);
}

#[test]
fn finished_jobs_cannot_be_aborted() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("done", JobKind::Calc).into_shared();
    let h = s.schedule(job(&c, 0)).post().unwrap();
    drain(&s);
    assert!(!s.abort(h));
    assert_eq!(s.state_of(h), Some(JobState::Done));
    assert_eq!(c.failure_count(), 0);
    assert!(!s.abort(JobHandle(999)));
    assert_eq!(s.state_of(JobHandle(999)), None);
}

#[test]
fn prerequisites_complete_before_dependents() {
    let (s, _) = scheduler_at(0);
    let journal = Journal::new();
    let input = recorder("input", &journal);
    let output = recorder("output", &journal);

    let pre = s.schedule(job(&input, 0)).deadline(TimeValue(500)).post().unwrap();
    // more urgent, but has to wait
    let dep = s
        .schedule(job(&output, 0))
        .deadline(TimeValue(100))
        .after(&[pre])
        .post()
        .unwrap();
    assert_eq!(s.queued(), 1);
    assert_eq!(s.state_of(dep), Some(JobState::Waiting));

    assert_eq!(s.dispatch_next(), Some((pre, JobState::Done)));
    assert_eq!(s.queued(), 1);
    assert_eq!(s.dispatch_next(), Some((dep, JobState::Done)));
    assert_eq!(journal.invoked_labels(), vec!["input", "output"]);
}

#[test]
fn failed_prerequisite_aborts_dependents() {
    let (s, _) = scheduler_at(0);
    let base = DiagnosticClosure::new("base", JobKind::Load).into_shared();
    let mid = DiagnosticClosure::new("mid", JobKind::Calc).into_shared();
    let top = DiagnosticClosure::new("top", JobKind::Calc).into_shared();

    let b = s.schedule(job(&base, 0)).post().unwrap();
    let m = s.schedule(job(&mid, 0)).after(&[b]).post().unwrap();
    let t = s.schedule(job(&top, 0)).after(&[m]).post().unwrap();

    assert!(s.abort(b));
    assert_eq!(s.state_of(m), Some(JobState::Aborted));
    assert_eq!(s.state_of(t), Some(JobState::Aborted));
    assert_eq!(mid.failures()[0].1, JobFailureReason::PrerequisiteNotAvailable);
    assert_eq!(top.failures()[0].1, JobFailureReason::PrerequisiteNotAvailable);

    let late = s.schedule(job(&top, 1)).after(&[b]).post().unwrap();
    assert_eq!(s.state_of(late), Some(JobState::Aborted));
    assert_eq!(s.dispatch_next(), None);
    assert_eq!(base.invocation_count() + mid.invocation_count() + top.invocation_count(), 0);
}

#[test]
fn unknown_prerequisite_is_an_error() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("x", JobKind::Calc).into_shared();
    let err = s.schedule(job(&c, 0)).after(&[JobHandle(42)]).post().unwrap_err();
    assert!(err.to_string().starts_with("dispatch error"));
    assert_eq!(s.stats().submitted, 0);
}

#[test]
fn inactive_manifestation_is_rejected() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("m", JobKind::Calc).into_shared();
    let feed = ManifestationId(5);

    let h = s.schedule(job(&c, 0)).manifestation(feed).post().unwrap();
    assert_eq!(s.state_of(h), Some(JobState::Rejected));
    assert_eq!(c.failures()[0].1, JobFailureReason::Rejected);

    s.activate(feed);
    let accepted = s.schedule(job(&c, 1)).manifestation(feed).post().unwrap();
    let queued_then_dropped = s.schedule(job(&c, 2)).manifestation(feed).post().unwrap();
    assert_eq!(s.dispatch_next(), Some((accepted, JobState::Done)));

    s.deactivate(feed);
    assert_eq!(s.dispatch_next(), Some((queued_then_dropped, JobState::Rejected)));
    assert_eq!(c.invocation_count(), 1);
    assert_eq!(s.stats().rejected, 2);
}

#[test]
fn deadlines_beyond_planning_horizon_are_rejected() {
    let (s, _) = scheduler_at(1_000);
    let c = DiagnosticClosure::new("far", JobKind::Calc).into_shared();
    let far = s
        .schedule(job(&c, 0))
        .deadline(TimeValue(1_000 + 30_000_000))
        .post()
        .unwrap();
    let near = s
        .schedule(job(&c, 1))
        .deadline(TimeValue(1_000 + 19_000_000))
        .post()
        .unwrap();
    let background = s
        .schedule(job(&c, 2))
        .deadline(TimeValue(1_000 + 30_000_000))
        .priority(JobPriority::Background)
        .post()
        .unwrap();
    assert_eq!(s.state_of(far), Some(JobState::Rejected));
    assert_eq!(s.state_of(near), Some(JobState::Waiting));
    assert_eq!(s.state_of(background), Some(JobState::Waiting));
}

#[test]
fn paused_jobs_wait_for_resume() {
    let (s, clock) = scheduler_at(0);
    let c = DiagnosticClosure::new("p", JobKind::Calc).into_shared();
    let h = s
        .schedule(job(&c, 0))
        .deadline(TimeValue(10))
        .priority(JobPriority::Paused)
        .post()
        .unwrap();
    assert_eq!(s.dispatch_next(), None);
    assert!(s.is_idle());

    clock.set(TimeValue(1_000));
    assert_eq!(s.expire_overdue(), 0);
    assert_eq!(s.resume_paused(), 1);
    assert_eq!(s.dispatch_next(), Some((h, JobState::Done)));
    assert_eq!(s.resume_paused(), 0);
}

#[test]
fn invalid_job_is_rejected_without_invocation() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("window", JobKind::Calc)
        .with_valid_range(TimeValue(0), TimeValue(100))
        .into_shared();
    let h = s.schedule(job(&c, 500)).post().unwrap();
    assert_eq!(s.dispatch_next(), Some((h, JobState::Rejected)));
    assert_eq!(c.invocation_count(), 0);
    assert_eq!(c.failures()[0].1, JobFailureReason::Rejected);
}

struct Exploding;

impl JobClosure for Exploding {
    fn invoke_job_operation(&self, _: JobParameter) {
        panic!("calculation blew up");
    }
    fn signal_failure(&self, _: JobParameter, _: JobFailureReason) {}
    fn job_kind(&self) -> JobKind {
        JobKind::Calc
    }
    fn verify(&self, _: TimeValue) -> bool {
        true
    }
}

#[test]
fn panicking_job_is_aborted_with_its_dependents() {
    let (s, _) = scheduler_at(0);
    let after = DiagnosticClosure::new("after", JobKind::Calc).into_shared();
    let boom = s
        .schedule(Job::new(Arc::new(Exploding), InvocationInstanceId(1), TimeValue(0)))
        .post()
        .unwrap();
    let dep = s.schedule(job(&after, 0)).after(&[boom]).post().unwrap();

    assert_eq!(s.dispatch_next(), Some((boom, JobState::Aborted)));
    assert_eq!(s.state_of(dep), Some(JobState::Aborted));
    assert!(s.is_idle());
}

#[test]
fn terminate_discards_outstanding_work() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("t", JobKind::Calc).into_shared();
    let handles: Vec<JobHandle> = (0..5)
        .map(|i| s.schedule(job(&c, i)).post().unwrap())
        .collect();
    s.terminate_processing();
    assert!(handles.iter().all(|h| s.state_of(*h) == Some(JobState::Aborted)));
    assert_eq!(s.queued(), 0);
    assert_eq!(s.dispatch_next(), None);
    assert_eq!(c.failure_count(), 5);

    let again = s.schedule(job(&c, 9)).post().unwrap();
    assert_eq!(s.dispatch_next(), Some((again, JobState::Done)));
}

#[test]
fn load_indicator_counts_ready_jobs_per_worker() {
    let config = SchedulerConfig {
        workers: Some(2),
        ..SchedulerConfig::default()
    };
    let (s, _) = scheduler_with(config, 0);
    let c = DiagnosticClosure::new("l", JobKind::Calc).into_shared();
    assert_eq!(s.load_indicator(), 0.0);
    for i in 0..4 {
        s.schedule(job(&c, i)).post().unwrap();
    }
    assert_eq!(s.load_indicator(), 2.0);
}

fn run_scenario(s: &Scheduler, clock: &ManualClock) -> (Vec<(JobHandle, JobState)>, Vec<String>) {
    let journal = Journal::new();
    let a = recorder("a", &journal);
    let b = recorder("b", &journal);
    let late = recorder("late", &journal);
    let pa = s.schedule(job(&a, 0)).deadline(TimeValue(300)).post().unwrap();
    s.schedule(job(&b, 0))
        .deadline(TimeValue(200))
        .after(&[pa])
        .post()
        .unwrap();
    s.schedule(job(&late, 0)).deadline(TimeValue(50)).post().unwrap();
    clock.set(TimeValue(100));
    (drain(s), journal.invoked_labels())
}

#[test]
fn tracing_observes_without_changing_decisions() {
    let (plain, plain_clock) = scheduler_at(0);
    let untraced = run_scenario(&plain, &plain_clock);

    let (traced, traced_clock) = scheduler_at(0);
    traced.activate_tracing();
    assert!(traced.is_tracing());
    let with_trace = run_scenario(&traced, &traced_clock);

    assert_eq!(untraced, with_trace);
    assert_eq!(plain.stats(), traced.stats());
    assert!(plain.trace().is_empty());

    let trace = traced.trace();
    assert!(trace.iter().any(|e| e.outcome == JobState::Expired));
    assert_eq!(trace.iter().filter(|e| e.outcome == JobState::Running).count(), 2);

    traced.disable_tracing();
    assert!(!traced.is_tracing());
    assert_eq!(traced.trace(), trace);
}

#[test]
fn was_invoked_distinguishes_run_from_failed_jobs() {
    let (s, clock) = scheduler_at(0);
    s.activate_tracing();
    let c = DiagnosticClosure::new("loader", JobKind::Load).into_shared();
    let runs = job(&c, 1);
    let misses = job(&c, 2);
    s.schedule(runs.clone()).deadline(TimeValue(1_000)).post().unwrap();
    s.schedule(misses.clone()).deadline(TimeValue(10)).post().unwrap();
    clock.set(TimeValue(100));
    drain(&s);

    assert!(s.was_invoked(&runs));
    assert!(!s.was_invoked(&misses));
    assert_eq!(s.stats().invoked_load, 1);
}

#[test]
fn worker_pool_runs_dependency_chains_to_completion() {
    let config = SchedulerConfig {
        workers: Some(4),
        idle_wait_ms: 1,
        ..SchedulerConfig::default()
    };
    let (s, _) = scheduler_with(config, 0);
    let journal = Journal::new();

    let mut tops = Vec::new();
    for frame in 0..8 {
        let src = recorder(&format!("src{frame}"), &journal);
        let fx = DiagnosticClosure::new(format!("fx{frame}"), JobKind::Calc)
            .with_work(std::time::Duration::from_micros(200))
            .with_journal(journal.clone())
            .into_shared();
        let out = recorder(&format!("out{frame}"), &journal);
        let h_src = s.schedule(job(&src, frame)).post().unwrap();
        let h_fx = s.schedule(job(&fx, frame)).after(&[h_src]).post().unwrap();
        let h_out = s
            .schedule(job(&out, frame))
            .after(&[h_src, h_fx])
            .post()
            .unwrap();
        tops.push(h_out);
    }

    s.run_until_idle().unwrap();
    assert!(s.is_idle());
    assert_eq!(s.stats().done, 24);
    assert!(tops.iter().all(|h| s.state_of(*h) == Some(JobState::Done)));

    let order = journal.invoked_labels();
    let pos = |l: &str| order.iter().position(|x| x == l).unwrap();
    for frame in 0..8 {
        assert!(pos(&format!("src{frame}")) < pos(&format!("fx{frame}")));
        assert!(pos(&format!("fx{frame}")) < pos(&format!("out{frame}")));
    }
}

#[test]
fn zero_workers_are_rejected() {
    let clock = Arc::new(ManualClock::new(TimeValue(0)));
    let config = SchedulerConfig {
        workers: Some(0),
        ..SchedulerConfig::default()
    };
    assert!(Scheduler::new(config, clock).is_err());
}

#[test]
fn settled_jobs_release_their_closure() {
    let (s, clock) = scheduler_at(0);
    s.activate_tracing();
    let c = DiagnosticClosure::new("shared", JobKind::Calc).into_shared();
    for i in 0..200 {
        s.schedule(job(&c, i)).deadline(TimeValue(1_000)).post().unwrap();
    }
    let late = s.schedule(job(&c, 0)).deadline(TimeValue(10)).post().unwrap();
    let cancelled = s.schedule(job(&c, 1)).post().unwrap();
    let orphan = s.schedule(job(&c, 2)).after(&[cancelled]).post().unwrap();
    assert!(Arc::strong_count(&c) > 200);

    assert!(s.abort(cancelled));
    clock.set(TimeValue(100));
    drain(&s);

    assert_eq!(s.state_of(late), Some(JobState::Expired));
    assert_eq!(s.state_of(orphan), Some(JobState::Aborted));
    assert_eq!(s.stats().done, 200);
    assert_eq!(Arc::strong_count(&c), 1);
    assert!(!s.trace().is_empty());
}

/// Calls back into the scheduler from every closure hook.
#[derive(Default)]
struct Reentrant {
    scheduler: std::sync::OnceLock<std::sync::Weak<Scheduler>>,
    observed: Mutex<Vec<usize>>,
}

impl Reentrant {
    fn look(&self) {
        if let Some(s) = self.scheduler.get().and_then(std::sync::Weak::upgrade) {
            let queued = s.queued();
            self.observed.lock().unwrap().push(queued);
        }
    }
}

impl JobClosure for Reentrant {
    fn invoke_job_operation(&self, _: JobParameter) {
        self.look();
    }
    fn signal_failure(&self, _: JobParameter, _: JobFailureReason) {
        self.look();
    }
    fn job_kind(&self) -> JobKind {
        self.look();
        JobKind::Calc
    }
    fn verify(&self, nominal_time: TimeValue) -> bool {
        self.look();
        nominal_time >= TimeValue::ZERO
    }
    fn hash_of_instance(&self, id: InvocationInstanceId) -> u64 {
        self.look();
        id.0
    }
}

#[test]
fn closures_may_call_back_into_the_scheduler() {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let clock = Arc::new(ManualClock::new(TimeValue(0)));
        let s = Arc::new(Scheduler::new(SchedulerConfig::default(), clock).unwrap());
        let c = Arc::new(Reentrant::default());
        c.scheduler.set(Arc::downgrade(&s)).unwrap();
        s.activate_tracing();

        let valid = s
            .schedule(Job::new(c.clone(), InvocationInstanceId(1), TimeValue(0)))
            .post()
            .unwrap();
        let invalid = s
            .schedule(Job::new(c.clone(), InvocationInstanceId(2), TimeValue(-5)))
            .post()
            .unwrap();
        let outcomes = drain(&s);
        let looked = c.observed.lock().unwrap().len();
        tx.send((outcomes, valid, invalid, looked)).unwrap();
    });

    let (outcomes, valid, invalid, looked) = rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("scheduler deadlocked on a reentrant closure");
    assert_eq!(
        outcomes,
        vec![(valid, JobState::Done), (invalid, JobState::Rejected)]
    );
    assert!(looked >= 6);
}

#[test]
fn job_aborted_during_validity_check_is_not_invoked() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("racing", JobKind::Calc).into_shared();
    let h = s.schedule(job(&c, 0)).post().unwrap();

    let mut fallout = Fallout::new();
    let claimed = s.lock().claim(TimeValue(0), true, &mut fallout);
    assert!(matches!(claimed, Some(Pick::Claimed(x, _)) if x == h));
    assert!(!s.is_idle());
    assert!(s.abort(h));

    let state = s.lock().start(h, true, &mut fallout);
    assert_eq!(state, JobState::Aborted);
    assert!(fallout.is_empty());
    assert!(s.is_idle());
    assert_eq!(c.invocation_count(), 0);
    assert_eq!(s.stats().invoked_calc, 0);
}

#[test]
fn terminate_racing_with_posts_strands_nothing() {
    let (s, _) = scheduler_at(0);
    let c = DiagnosticClosure::new("busy", JobKind::Calc).into_shared();

    let handles = std::thread::scope(|scope| {
        let poster = scope.spawn(|| {
            (0..500)
                .map(|i| s.schedule(job(&c, i)).post().unwrap())
                .collect::<Vec<_>>()
        });
        for _ in 0..100 {
            s.terminate_processing();
            std::thread::yield_now();
        }
        poster.join().unwrap()
    });
    drain(&s);

    assert!(s.is_idle());
    for h in handles {
        let state = s.state_of(h).unwrap();
        assert!(
            matches!(state, JobState::Done | JobState::Aborted),
            "job {h:?} left {state:?}"
        );
    }
    assert_eq!(s.stats().settled(), 500);
}

#[test]
fn jobs_wait_for_their_start_time() {
    let (s, clock) = scheduler_at(0);
    let journal = Journal::new();
    let early = recorder("later-start", &journal);
    let plain = recorder("anytime", &journal);

    let held = s
        .schedule(job(&early, 0))
        .start_time(TimeValue(500))
        .deadline(TimeValue(1_000))
        .post()
        .unwrap();
    let free = s
        .schedule(job(&plain, 0))
        .deadline(TimeValue(2_000))
        .post()
        .unwrap();

    assert_eq!(s.dispatch_next(), Some((free, JobState::Done)));
    assert_eq!(s.dispatch_next(), None);
    assert_eq!(s.queued(), 1);
    assert!(!s.is_idle());
    assert_eq!(s.state_of(held), Some(JobState::Waiting));

    clock.set(TimeValue(500));
    assert_eq!(s.dispatch_next(), Some((held, JobState::Done)));
    assert_eq!(journal.invoked_labels(), vec!["anytime", "later-start"]);
}

#[test]
fn start_offset_and_life_window_are_relative() {
    let (s, clock) = scheduler_at(100);
    let c = DiagnosticClosure::new("window", JobKind::Calc).into_shared();
    let h = s
        .schedule(job(&c, 0))
        .start_offset(Offset(50))
        .life_window(Offset(100))
        .post()
        .unwrap();

    clock.set(TimeValue(149));
    assert_eq!(s.dispatch_next(), None);
    clock.set(TimeValue(251));
    assert_eq!(s.dispatch_next(), Some((h, JobState::Expired)));

    let relaxed = s
        .schedule(job(&c, 1))
        .life_window(Offset(10))
        .post()
        .unwrap();
    assert_eq!(s.dispatch_next(), Some((relaxed, JobState::Done)));
}

#[test]
fn meta_job_continues_at_next_start_and_never_expires() {
    let (s, clock) = scheduler_at(0);
    let planner = DiagnosticClosure::new("plan", JobKind::Meta).into_shared();
    let feed = ManifestationId(4);

    let first = s.seed_calc_stream(job(&planner, 0), feed).unwrap();
    assert_eq!(s.dispatch_next(), Some((first, JobState::Done)));

    let next = s
        .continue_meta_job(TimeValue(40_000), job(&planner, 40_000), feed)
        .unwrap();
    clock.set(TimeValue(39_999));
    assert_eq!(s.dispatch_next(), None);

    clock.set(TimeValue(40_000) + META_JOB_TOLERANCE + Offset(1));
    assert_eq!(s.dispatch_next(), Some((next, JobState::Done)));
    assert_eq!(s.stats().invoked_meta, 2);

    let other = ManifestationId(9);
    let gated = s
        .continue_meta_job(s.now(), job(&planner, 80_000), other)
        .unwrap();
    assert_eq!(s.state_of(gated), Some(JobState::Rejected));
}
