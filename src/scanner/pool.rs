//! Bounded dispatch of probe tasks.
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;

use log::debug;
use tokio::sync::Semaphore;

/// Runs one task per item with at most `capacity` tasks alive at once.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    capacity: NonZeroU32,
}

impl WorkerPool {
    pub fn new(capacity: NonZeroU32) -> Self {
        Self { capacity }
    }

    /// Dispatches `task(item)` for every item in order and returns once all
    /// of them have completed.
    ///
    /// The dispatcher waits for a free permit before spawning each task, and
    /// a task gives its permit back when it ends, whether it finished, bailed
    /// out early or panicked. After the last dispatch every permit is taken
    /// back at once, which can only happen after the last task is done.
    pub async fn run<I, F, Fut>(&self, items: I, task: F)
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.capacity.get() as usize));
        let mut dispatched = 0usize;

        for item in items {
            // The semaphore is never closed, so acquiring cannot fail.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let job = task(item);
            tokio::spawn(async move {
                let _permit = permit;
                job.await;
            });
            dispatched += 1;
        }

        debug!("Dispatched {dispatched} tasks, waiting for them to drain");
        let _drained = permits.acquire_many(self.capacity.get()).await;
    }
}
