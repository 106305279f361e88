//! Dependency-ordered jobs
//!
//! A job runs on the rayon pool once every job it depends on has finished.
//! Handles are cheap to clone and can be combined, so callers express
//! ordering as a graph instead of taking locks around shared data.
//!
//! ```ignore
//! let write = jobs::schedule(&[], move || fill(&chunk));
//! let read = jobs::schedule(&[write.clone()], move || scan(&chunk));
//! let release = set.dispose_after(&[read])?;
//! release.complete();
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    state: Arc<JobState>,
}

#[derive(Debug, Default)]
struct JobState {
    inner: Mutex<JobInner>,
    finished: Condvar,
}

#[derive(Default)]
struct JobInner {
    done: bool,
    panicked: bool,
    dependents: Vec<Arc<PendingJob>>,
}

impl std::fmt::Debug for JobInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInner")
            .field("done", &self.done)
            .field("panicked", &self.panicked)
            .field("dependents", &self.dependents.len())
            .finish()
    }
}

/// A job still waiting on dependencies.
struct PendingJob {
    waiting: AtomicUsize,
    work: Mutex<Option<Work>>,
    state: Arc<JobState>,
}

impl JobState {
    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `job` to be released when this job finishes.
    /// Returns false if this job already finished.
    fn add_dependent(&self, job: &Arc<PendingJob>) -> bool {
        let mut inner = self.lock();
        if inner.done {
            false
        } else {
            inner.dependents.push(Arc::clone(job));
            true
        }
    }

    fn finish(&self, panicked: bool) {
        let dependents = {
            let mut inner = self.lock();
            inner.done = true;
            inner.panicked = panicked;
            std::mem::take(&mut inner.dependents)
        };
        self.finished.notify_all();
        for job in dependents {
            job.release_one();
        }
    }
}

impl PendingJob {
    fn release_one(self: Arc<Self>) {
        if self.waiting.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let work = self
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let state = Arc::clone(&self.state);
        rayon::spawn(move || {
            let panicked = match work {
                Some(work) => panic::catch_unwind(AssertUnwindSafe(work)).is_err(),
                None => false,
            };
            if panicked {
                tracing::error!("scheduled job panicked");
            }
            state.finish(panicked);
        });
    }
}

/// Schedule `work` to run after every job in `deps` has finished.
pub fn schedule<F>(deps: &[JobHandle], work: F) -> JobHandle
where
    F: FnOnce() + Send + 'static,
{
    let work: Work = Box::new(work);
    let state = Arc::new(JobState::default());
    let pending = Arc::new(PendingJob {
        // One extra count keeps the job parked until every dependency is wired.
        waiting: AtomicUsize::new(deps.len() + 1),
        work: Mutex::new(Some(work)),
        state: Arc::clone(&state),
    });

    for dep in deps {
        if !dep.state.add_dependent(&pending) {
            Arc::clone(&pending).release_one();
        }
    }
    tracing::trace!(deps = deps.len(), "scheduled job");
    pending.release_one();

    JobHandle { state }
}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        let state = JobState::default();
        state.lock().done = true;
        Self {
            state: Arc::new(state),
        }
    }

    /// A handle completed by firing the returned trigger, for work that
    /// finishes outside the job graph.
    pub fn external() -> (Self, JobTrigger) {
        let state = Arc::new(JobState::default());
        let trigger = JobTrigger {
            state: Arc::clone(&state),
            fired: false,
        };
        (Self { state }, trigger)
    }

    /// A handle that completes once every handle in `deps` has completed.
    pub fn combine(deps: &[JobHandle]) -> Self {
        match deps {
            [] => Self::completed(),
            [single] => single.clone(),
            _ => schedule(deps, || {}),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().done
    }

    /// Whether the job's work panicked. Dependents still run.
    pub fn panicked(&self) -> bool {
        self.state.lock().panicked
    }

    /// Block the calling thread until the job has finished.
    pub fn complete(&self) {
        let mut inner = self.state.lock();
        while !inner.done {
            inner = self
                .state
                .finished
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Completes the handle returned alongside it by [`JobHandle::external`].
///
/// Dropping the trigger without firing it still completes the handle, marked
/// as panicked, so dependents are never parked forever.
#[derive(Debug)]
pub struct JobTrigger {
    state: Arc<JobState>,
    fired: bool,
}

impl JobTrigger {
    pub fn fire(mut self) {
        self.fired = true;
    }
}

impl Drop for JobTrigger {
    fn drop(&mut self) {
        if !self.fired {
            tracing::warn!("job trigger dropped without firing");
        }
        self.state.finish(!self.fired);
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::completed()
    }
}
