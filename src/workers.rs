//! Fixed-size worker pool for processing coverage files in parallel.
//!
//! Each worker owns a private accumulator, so there is no shared mutable
//! state while parsing: only fully-formed per-worker results cross the
//! thread boundary, after a join barrier. Merge is associative and
//! commutative, so the caller can fold the accumulators in any order.

use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::error::Result;
use crate::model::CovData;

/// Process `jobs` on up to `nthreads` OS threads. `work` is invoked once
/// per job with the worker's private accumulator.
///
/// Returns one accumulator per worker. When any worker fails, the
/// remaining workers drain the pending jobs and the first error is
/// propagated.
pub fn parallel_process<T, F>(jobs: &[T], nthreads: usize, work: F) -> Result<Vec<CovData>>
where
    T: Sync,
    F: Fn(&T, &mut CovData) -> Result<()> + Sync,
{
    let nthreads = nthreads.clamp(1, jobs.len().max(1));
    let next_job = AtomicUsize::new(0);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..nthreads)
            .map(|_| {
                scope.spawn(|| {
                    let mut accumulator = CovData::new();
                    loop {
                        let index = next_job.fetch_add(1, Ordering::Relaxed);
                        let Some(job) = jobs.get(index) else {
                            break;
                        };
                        work(job, &mut accumulator)?;
                    }
                    Ok(accumulator)
                })
            })
            .collect();

        let mut accumulators = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(accumulator)) => accumulators.push(accumulator),
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(accumulators),
        }
    })
}
