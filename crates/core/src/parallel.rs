//! Worker pool and shared work cursor.

use crate::error::CorError;
use log::warn;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

pub const MAX_THREADS: usize = 128;
pub const MIN_SIZE_FOR_THREADING: usize = 100;

/// Number of workers for a problem of `problem_size` cells. A request of 0 or
/// above [`MAX_THREADS`] means all available cores; small problems get fewer
/// workers.
pub fn choose_threads(problem_size: usize, requested: usize) -> usize {
    let mut nt = if requested == 0 || requested > MAX_THREADS {
        thread::available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .min(MAX_THREADS)
    } else {
        requested
    };
    if problem_size < nt * MIN_SIZE_FOR_THREADING {
        nt = problem_size / MIN_SIZE_FOR_THREADING + 1;
    }
    nt
}

/// Runs one task per worker and waits for all of them.
pub enum Executor {
    Sequential,
    Pool(ThreadPool),
}

impl Executor {
    /// Builds an executor with `n_threads` workers. The flag is set when the
    /// pool could not be started and the executor degraded to sequential.
    pub fn new(n_threads: usize, strict: bool) -> Result<(Executor, bool), CorError> {
        if n_threads <= 1 {
            return Ok((Executor::Sequential, false));
        }
        let built = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("fastcor-{i}"))
            .build();
        Self::from_build(built, strict)
    }

    fn from_build<E: Display>(
        built: Result<ThreadPool, E>,
        strict: bool,
    ) -> Result<(Executor, bool), CorError> {
        match built {
            Ok(pool) => Ok((Executor::Pool(pool), false)),
            Err(e) if strict => Err(CorError::ThreadStart(e.to_string())),
            Err(e) => {
                warn!("could not start worker threads ({e}); continuing on one thread");
                Ok((Executor::Sequential, true))
            }
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            Executor::Sequential => 1,
            Executor::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Calls `task(worker_index)` once on every worker. Returns after the last
    /// one finished, with the results in worker order.
    pub fn run<R, F>(&self, task: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Sync,
        R: Send,
    {
        match self {
            Executor::Sequential => vec![task(0)],
            Executor::Pool(pool) => pool.broadcast(|ctx| task(ctx.index())),
        }
    }
}

/// A mutex-guarded iterator shared by the workers of one phase. Every item is
/// handed out exactly once.
pub struct WorkQueue<I> {
    inner: Mutex<Option<I>>,
}

impl<I: Iterator> WorkQueue<I> {
    pub fn new(iter: I) -> Self {
        WorkQueue {
            inner: Mutex::new(Some(iter)),
        }
    }

    pub fn claim(&self) -> Option<I::Item> {
        self.lock().as_mut().and_then(Iterator::next)
    }

    /// Drops the remaining items; later claims return `None`.
    pub fn close(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<I>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
