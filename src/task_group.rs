//! Structured-concurrency primitive: N-at-a-time fan-out with per-task results.
//!
//! Generalizes `utils.BoundedTaskGroup` from the Python source. Best-effort
//! semantics: one task failing does not cancel its siblings.

use crate::error::CsToolsError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct BoundedTaskGroup<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> BoundedTaskGroup<T> {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Queue a task. It runs once a slot is available; does not block the caller.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit_source = self.semaphore.clone();
        self.tasks.spawn(async move {
            let _permit = permit_source
                .acquire_owned()
                .await
                .expect("task group semaphore is never closed");
            future.await
        });
    }

    /// Wait for every spawned task, collecting per-task outcomes. A panicking
    /// or cancelled task becomes `Err(CsToolsError::TaskFailure)`; it does not
    /// abort the remaining tasks.
    pub async fn join_all(mut self) -> Vec<Result<T, CsToolsError>> {
        let mut results = Vec::new();
        while let Some(outcome) = self.tasks.join_next().await {
            match outcome {
                Ok(value) => results.push(Ok(value)),
                Err(join_error) => {
                    results.push(Err(CsToolsError::task_failure(
                        "task_group_member",
                        join_error.to_string(),
                    )));
                }
            }
        }
        results
    }

    /// Cooperative cancellation: unstarted tasks are dropped, running tasks are
    /// asked to abort at their next await point.
    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn never_exceeds_bound() {
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let observed_peak = Arc::new(AtomicUsize::new(0));
        let mut group = BoundedTaskGroup::new(5);

        for _ in 0..50 {
            let max_in_flight = max_in_flight.clone();
            let observed_peak = observed_peak.clone();
            group.spawn(async move {
                let current = max_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                observed_peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                max_in_flight.fetch_sub(1, Ordering::SeqCst);
                current
            });
        }

        let results = group.join_all().await;
        assert_eq!(results.len(), 50);
        assert!(observed_peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let mut group: BoundedTaskGroup<Result<u32, &'static str>> = BoundedTaskGroup::new(3);
        for i in 0..5u32 {
            group.spawn(async move {
                if i == 2 {
                    Err("boom")
                } else {
                    Ok(i)
                }
            });
        }
        let results = group.join_all().await;
        assert_eq!(results.len(), 5);
        let ok_count = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(ok_count, 4);
    }
}
