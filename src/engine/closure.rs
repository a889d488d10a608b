//! Diagnostic [`JobClosure`] implementation.
//!
//! Stands in for the media-processing layer: records every invocation and failure signal, can
//! simulate work by sleeping, and can be restricted to a validity window. The CLI runs planned
//! segments against it, and tests use it to observe what the scheduler did.

use crate::engine::job::{
    InvocationInstanceId, JobClosure, JobFailureReason, JobKind, JobParameter,
};
use crate::foundation::time::TimeValue;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One observation made by a [`DiagnosticClosure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClosureEvent {
    /// The job operation ran.
    Invoked {
        /// Parameters passed to the operation.
        parameter: JobParameter,
    },
    /// A failure was signalled instead.
    Failed {
        /// Parameters of the job that will not run.
        parameter: JobParameter,
        /// Reason passed by the scheduler.
        reason: JobFailureReason,
    },
}

/// Entry of a [`Journal`] shared between several closures.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct JournalEntry {
    /// Label of the closure that made the observation.
    pub label: String,
    /// What happened.
    #[serde(flatten)]
    pub event: ClosureEvent,
}

/// Shared, ordered record of closure activity across a whole segment.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: JournalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of all entries in the order they were recorded.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Labels of invoked closures, in invocation order.
    pub fn invoked_labels(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| matches!(e.event, ClosureEvent::Invoked { .. }))
            .map(|e| e.label)
            .collect()
    }
}

/// Recording closure for diagnostics and tests.
#[derive(Debug)]
pub struct DiagnosticClosure {
    label: String,
    kind: JobKind,
    valid_from: TimeValue,
    valid_until: TimeValue,
    work: Option<Duration>,
    journal: Option<Journal>,
    events: Mutex<Vec<ClosureEvent>>,
}

impl DiagnosticClosure {
    /// Closure of the given kind, valid for all times.
    pub fn new(label: impl Into<String>, kind: JobKind) -> Self {
        Self {
            label: label.into(),
            kind,
            valid_from: TimeValue::ANYTIME,
            valid_until: TimeValue::NEVER,
            work: None,
            journal: None,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Restrict [`JobClosure::verify`] to `[from, until)`.
    pub fn with_valid_range(mut self, from: TimeValue, until: TimeValue) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    /// Sleep for `work` inside every invocation.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = Some(work);
        self
    }

    /// Mirror all observations into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Finish building and share.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Label given at construction.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn record(&self, event: ClosureEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        if let Some(journal) = &self.journal {
            journal.push(JournalEntry {
                label: self.label.clone(),
                event,
            });
        }
    }

    /// All observations so far.
    pub fn events(&self) -> Vec<ClosureEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parameters of every invocation, in order.
    pub fn invocations(&self) -> Vec<JobParameter> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClosureEvent::Invoked { parameter } => Some(parameter),
                ClosureEvent::Failed { .. } => None,
            })
            .collect()
    }

    /// Every failure signal, in order.
    pub fn failures(&self) -> Vec<(JobParameter, JobFailureReason)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClosureEvent::Failed { parameter, reason } => Some((parameter, reason)),
                ClosureEvent::Invoked { .. } => None,
            })
            .collect()
    }

    /// Number of invocations.
    pub fn invocation_count(&self) -> usize {
        self.invocations().len()
    }

    /// Number of failure signals.
    pub fn failure_count(&self) -> usize {
        self.failures().len()
    }
}

impl JobClosure for DiagnosticClosure {
    fn invoke_job_operation(&self, parameter: JobParameter) {
        if let Some(work) = self.work {
            std::thread::sleep(work);
        }
        tracing::trace!(label = %self.label, time = %parameter.nominal_time, "job invoked");
        self.record(ClosureEvent::Invoked { parameter });
    }

    fn signal_failure(&self, parameter: JobParameter, reason: JobFailureReason) {
        tracing::trace!(label = %self.label, ?reason, "job failure signalled");
        self.record(ClosureEvent::Failed { parameter, reason });
    }

    fn job_kind(&self) -> JobKind {
        self.kind
    }

    fn verify(&self, nominal_time: TimeValue) -> bool {
        self.valid_from <= nominal_time && nominal_time < self.valid_until
    }

    fn build_instance_id(&self, seed: u64) -> InvocationInstanceId {
        InvocationInstanceId(seed ^ xxhash_rust::xxh3::xxh3_64(self.label.as_bytes()))
    }
}
