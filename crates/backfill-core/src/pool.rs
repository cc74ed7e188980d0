//! Bounded-concurrency pool for page fetch operations.

use std::{future::Future, sync::Arc};

use tokio::{runtime::Handle, sync::Semaphore, task::JoinHandle};

/// Runs at most `max_concurrency` submitted futures at a time.
///
/// Every submitted future is spawned immediately and waits for a permit; the
/// permit is held until the future completes. Queued futures start in no
/// particular order once a permit frees up.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    runtime: Handle,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize, runtime: Handle) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            runtime,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of jobs currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    /// Queue a job. Returns without waiting for a free slot.
    pub fn submit<F>(&self, job: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return None;
            };
            Some(job.await)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn runs_submitted_jobs_and_returns_output() {
        let pool = WorkerPool::new(2, Handle::current());
        let output = pool.submit(async { 40 + 2 }).await.expect("join");
        assert_eq!(output, Some(42));
    }

    #[tokio::test]
    async fn zero_concurrency_is_raised_to_one() {
        let pool = WorkerPool::new(0, Handle::current());
        assert_eq!(pool.max_concurrency(), 1);
        assert_eq!(pool.submit(async { 1 }).await.expect("join"), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_than_max_concurrency_jobs() {
        let pool = WorkerPool::new(3, Handle::current());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.expect("join");
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency was {peak}");
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn queued_job_starts_when_a_slot_frees() {
        let pool = WorkerPool::new(1, Handle::current());
        let release = Arc::new(Notify::new());

        let blocker = {
            let release = Arc::clone(&release);
            pool.submit(async move { release.notified().await })
        };
        let queued = pool.submit(async { "ran" });

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.active(), 1);
        assert!(!queued.is_finished());

        release.notify_one();
        blocker.await.expect("join");
        assert_eq!(queued.await.expect("join"), Some("ran"));
    }
}
