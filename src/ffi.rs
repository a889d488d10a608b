//! C-ABI boundary for handing jobs across a language split.
//!
//! The C side only ever sees a plain-data [`JobDefinition`]: an opaque [`ClosureHandle`] plus
//! the [`JobParameter`] block. Handles are issued by the process-wide [`ClosureRegistry`], which
//! keeps the exported closure alive until the handle is retracted, and resolve back to the trait
//! object on the Rust side.
#![allow(unsafe_code)]

use crate::engine::job::{Job, JobClosure, JobFailureReason, JobParameter, closure_addr};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Opaque reference to an exported closure. `0` is never issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClosureHandle(pub u64);

/// Fixed-size, plain-data job descriptor passed by value across the C boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct JobDefinition {
    /// Closure executing the job.
    pub closure: ClosureHandle,
    /// Moving parts of this invocation.
    pub parameter: JobParameter,
}

struct Exported {
    closure: Arc<dyn JobClosure>,
    exports: usize,
}

#[derive(Default)]
struct Tables {
    next: u64,
    by_handle: HashMap<u64, Exported>,
    by_addr: HashMap<usize, u64>,
}

/// Maps closure handles to live closures.
#[derive(Default)]
pub struct ClosureRegistry {
    tables: RwLock<Tables>,
}

static REGISTRY: OnceLock<ClosureRegistry> = OnceLock::new();

impl ClosureRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry used by the `extern "C"` entry points.
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(Self::new)
    }

    /// Issue a handle for `closure`, keeping it alive until retracted.
    ///
    /// Exporting the same closure again returns the same handle; each export must be matched by
    /// one [`ClosureRegistry::retract_closure`].
    pub fn export_closure(&self, closure: &Arc<dyn JobClosure>) -> ClosureHandle {
        let addr = closure_addr(closure);
        let mut t = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&h) = t.by_addr.get(&addr)
            && let Some(entry) = t.by_handle.get_mut(&h)
        {
            entry.exports += 1;
            return ClosureHandle(h);
        }
        t.next += 1;
        let h = t.next;
        t.by_addr.insert(addr, h);
        t.by_handle.insert(
            h,
            Exported {
                closure: closure.clone(),
                exports: 1,
            },
        );
        tracing::trace!(handle = h, "closure exported");
        ClosureHandle(h)
    }

    /// Drop one export of `handle`; returns `false` for unknown handles.
    pub fn retract_closure(&self, handle: ClosureHandle) -> bool {
        let mut t = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = t.by_handle.get_mut(&handle.0) else {
            return false;
        };
        entry.exports -= 1;
        if entry.exports == 0 {
            let addr = closure_addr(&entry.closure);
            t.by_handle.remove(&handle.0);
            t.by_addr.remove(&addr);
            tracing::trace!(handle = handle.0, "closure retracted");
        }
        true
    }

    /// Closure behind `handle`, if still exported.
    pub fn resolve(&self, handle: ClosureHandle) -> Option<Arc<dyn JobClosure>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_handle
            .get(&handle.0)
            .map(|e| e.closure.clone())
    }

    /// Number of distinct closures currently exported.
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_handle
            .len()
    }

    /// `true` when nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn job_for(&self, def: JobDefinition) -> Job {
        let Some(closure) = self.resolve(def.closure) else {
            panic!(
                "job definition refers to unknown closure handle {}",
                def.closure.0
            );
        };
        Job::from_parts(closure, def.parameter)
    }
}

impl Job {
    /// Export this job's closure through the global registry and describe the job as plain data.
    pub fn to_definition(&self) -> JobDefinition {
        JobDefinition {
            closure: ClosureRegistry::global().export_closure(self.closure()),
            parameter: self.parameter(),
        }
    }

    /// Rebuild a job from a definition issued by [`Job::to_definition`].
    ///
    /// `None` when the closure handle was already retracted.
    pub fn from_definition(def: JobDefinition) -> Option<Job> {
        ClosureRegistry::global()
            .resolve(def.closure)
            .map(|closure| Job::from_parts(closure, def.parameter))
    }

    fn from_parts(closure: Arc<dyn JobClosure>, parameter: JobParameter) -> Job {
        Job::new(closure, parameter.invocation_id, parameter.nominal_time)
    }
}

fn invoke_definition(registry: &ClosureRegistry, def: JobDefinition) {
    registry.job_for(def).invoke();
}

fn fail_definition(registry: &ClosureRegistry, def: JobDefinition, reason: JobFailureReason) {
    registry.job_for(def).signal_failure(reason);
}

fn fail_definition_code(registry: &ClosureRegistry, def: JobDefinition, code: u32) {
    let Some(reason) = JobFailureReason::from_raw(code) else {
        panic!("unknown job failure reason code {code}");
    };
    fail_definition(registry, def, reason);
}

/// Validate and run the job described by `def`.
///
/// An invalid job, or an unknown closure handle, is a fatal error.
#[unsafe(no_mangle)]
pub extern "C" fn lumiera_job_invoke(def: JobDefinition) {
    invoke_definition(ClosureRegistry::global(), def);
}

/// Notify the job's closure that the job described by `def` will not run.
///
/// `reason` is the raw code of a [`JobFailureReason`]; an unknown code is a fatal error.
#[unsafe(no_mangle)]
pub extern "C" fn lumiera_job_failure(def: JobDefinition, reason: u32) {
    fail_definition_code(ClosureRegistry::global(), def, reason);
}

/// Identity hash of the job described by `def`.
#[unsafe(no_mangle)]
pub extern "C" fn lumiera_job_get_hash(def: JobDefinition) -> u64 {
    ClosureRegistry::global().job_for(def).identity_hash()
}

#[cfg(test)]
#[path = "../tests/unit/ffi.rs"]
mod tests;
