//! Bounded worker pool shared by every parallel phase of a run.
//!
//! The pool is built once at startup and reused for discovery, staging and
//! dependency resolution. A batch returns only after every task has finished;
//! a panicking task is contained and contributes its `Default` value.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, error};

use crate::artifact::Artifact;
use crate::resolver::{DependencyHint, RawDependencies};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

pub struct TaskPool {
    pool: ThreadPool,
    threads: usize,
}

impl TaskPool {
    /// Build a pool with `threads` workers, or one per available CPU when `None`.
    pub fn new(threads: Option<usize>) -> Result<Self, SchedulerError> {
        let threads = threads.filter(|n| *n > 0).unwrap_or_else(available_parallelism);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("revdep-worker-{idx}"))
            .build()?;
        debug!(threads, "worker pool ready");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task` over every item and join.
    ///
    /// Results keep the input order. A task that panics yields `R::default()`
    /// and never affects its siblings.
    pub fn run_batch<T, R, F>(&self, label: &str, items: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send + Default,
        F: Fn(&T) -> R + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| match catch_unwind(AssertUnwindSafe(|| task(item))) {
                    Ok(result) => result,
                    Err(payload) => {
                        error!(batch = label, panic = %panic_message(&*payload), "task panicked");
                        R::default()
                    }
                })
                .collect()
        })
    }

    /// Resolve raw dependencies for every artifact of a batch.
    pub fn resolve_batch<A, F>(&self, artifacts: &[A], resolve: F) -> Vec<RawDependencies>
    where
        A: Artifact + Sync,
        F: Fn(&A) -> Vec<DependencyHint> + Sync,
    {
        let label = A::KIND.label();
        let hints = self.run_batch(label, artifacts, resolve);
        artifacts
            .iter()
            .zip(hints)
            .map(|(artifact, hints)| RawDependencies::new(artifact.path(), hints))
            .collect()
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
