//! Fixed-size worker pool for the expensive similarity comparisons.
//!
//! One job compares one needle descriptor against a candidate batch and
//! posts its matches as typed messages on a channel once the whole batch
//! is done; an aborted job posts nothing. Jobs hold `Arc` clones of the
//! descriptors, so removing an entity while jobs are in flight is safe;
//! the coordinator filters stale ids out when it merges results.
//! Completion order is nondeterministic, which is why
//! [`SimilarityPool::take_results`] returns matches sorted by submission
//! index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::core::item::ItemId;
use crate::core::similarity::SimilarityData;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// One above-threshold comparison result. `index` is the submission
/// index of the job that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub a: ItemId,
    pub b: ItemId,
    pub rank: f64,
    pub index: usize,
}

struct PoolShared {
    completed: Mutex<usize>,
    done: Condvar,
    abort: AtomicBool,
}

impl PoolShared {
    fn mark_done(&self) {
        let mut completed = self.completed.lock().unwrap();
        *completed += 1;
        self.done.notify_all();
    }
}

pub struct SimilarityPool {
    pool: rayon::ThreadPool,
    shared: Arc<PoolShared>,
    sender: Sender<SearchMatch>,
    receiver: Receiver<SearchMatch>,
    threshold: f64,
    submitted: usize,
}

impl SimilarityPool {
    /// `threads` of `None` sizes the pool to the available cores.
    pub fn new(threads: Option<usize>, threshold: f64) -> Result<Self, PoolError> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        log::debug!("similarity pool: {threads} threads, threshold {threshold}");
        let (sender, receiver) = channel();
        Ok(Self {
            pool,
            shared: Arc::new(PoolShared {
                completed: Mutex::new(0),
                done: Condvar::new(),
                abort: AtomicBool::new(false),
            }),
            sender,
            receiver,
            threshold,
            submitted: 0,
        })
    }

    /// Queue one needle against a candidate batch. The job always counts
    /// toward completion; a job cut short by the abort flag posts no
    /// results at all, not a partial set.
    pub fn submit(
        &mut self,
        needle: (ItemId, Arc<SimilarityData>),
        candidates: Vec<(ItemId, Arc<SimilarityData>)>,
    ) {
        let index = self.submitted;
        self.submitted += 1;
        let shared = Arc::clone(&self.shared);
        let sender = self.sender.clone();
        let threshold = self.threshold;

        self.pool.spawn(move || {
            let (id, simd) = needle;
            let mut found: Vec<SearchMatch> = Vec::new();
            let mut aborted = shared.abort.load(Ordering::SeqCst);
            if !aborted {
                for (other, other_simd) in &candidates {
                    if shared.abort.load(Ordering::SeqCst) {
                        aborted = true;
                        break;
                    }
                    if *other == id {
                        continue;
                    }
                    let fraction = simd.compare_fast(other_simd, threshold);
                    if fraction >= threshold {
                        found.push(SearchMatch {
                            a: id,
                            b: *other,
                            rank: fraction * 100.0,
                            index,
                        });
                    }
                }
            }
            if !aborted {
                for m in found {
                    // The receiver only disappears when the pool is
                    // dropped, at which point the result is moot.
                    let _ = sender.send(m);
                }
            }
            shared.mark_done();
        });
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn completed(&self) -> usize {
        *self.shared.completed.lock().unwrap()
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.submitted
    }

    /// Ask in-flight jobs to stop comparing. They still run to completion
    /// and count as done; there is no forced termination.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::SeqCst);
    }

    /// Block until every submitted job has completed.
    pub fn wait(&self) {
        let mut completed = self.shared.completed.lock().unwrap();
        while *completed < self.submitted {
            completed = self.shared.done.wait(completed).unwrap();
        }
    }

    /// Block up to `timeout`; true when all jobs have completed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut completed = self.shared.completed.lock().unwrap();
        while *completed < self.submitted {
            let (guard, result) = self.shared.done.wait_timeout(completed, timeout).unwrap();
            completed = guard;
            if result.timed_out() {
                return *completed >= self.submitted;
            }
        }
        true
    }

    /// Drain the posted matches, ordered by submission index. Within a
    /// job, matches keep candidate order, so the combined order is fully
    /// deterministic regardless of scheduling.
    pub fn take_results(&mut self) -> Vec<SearchMatch> {
        self.wait();
        let mut results: Vec<SearchMatch> = self.receiver.try_iter().collect();
        results.sort_by_key(|m| m.index);
        results
    }
}
