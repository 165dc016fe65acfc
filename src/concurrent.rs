use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Concurrent task executor with a fixed cap on in-flight tasks.
///
/// Tasks are spawned only after a permit is available, so the number of live
/// tasks never exceeds the cap no matter how long the input is. Once the
/// cancellation token fires, no further tasks are started.
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    completed: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
    skipped: Arc<AtomicUsize>,
}

/// Counters after an `execute` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub completed: usize,
    /// Tasks that panicked.
    pub errors: usize,
    /// Tasks never started because of cancellation.
    pub skipped: usize,
}

impl BoundedExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            completed: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            skipped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `task_fn` over every task, at most `concurrency` at a time.
    ///
    /// Outputs arrive in completion order; `None` marks a task that panicked.
    pub async fn execute<T, F, Fut>(
        &self,
        tasks: Vec<T>,
        cancel: &CancellationToken,
        task_fn: F,
    ) -> Vec<Option<Fut::Output>>
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        T: Send + 'static,
    {
        let mut futures = FuturesUnordered::new();
        let total = tasks.len();
        let mut started = 0usize;

        for task in tasks {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            started += 1;
            let task_fn = task_fn.clone();
            let completed = self.completed.clone();

            futures.push(tokio::spawn(async move {
                let result = task_fn(task).await;
                completed.fetch_add(1, Ordering::Relaxed);
                drop(permit); // Release semaphore
                result
            }));
        }
        self.skipped.fetch_add(total - started, Ordering::Relaxed);

        let mut results = Vec::with_capacity(started);
        while let Some(result) = futures.next().await {
            match result {
                Ok(output) => results.push(Some(output)),
                Err(e) => {
                    tracing::error!(error = %e, "executor task failed");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    results.push(None);
                }
            }
        }

        results
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Child token of `parent` that also cancels itself after `after`.
///
/// Drop a `drop_guard()` of the returned token when the guarded work finishes so
/// the timer task exits early.
pub fn deadline_token(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    token
}

/// Drive `fut` to completion unless `cancel` fires and `grace` then elapses.
///
/// Returns `None` when the work was abandoned.
pub async fn with_grace<F: Future>(fut: F, cancel: &CancellationToken, grace: Duration) -> Option<F::Output> {
    tokio::select! {
        out = fut => Some(out),
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => None,
    }
}
