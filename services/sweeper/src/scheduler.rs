//! Bounded-concurrency scheduler
//!
//! Drains a shared work list with `max(1, min(limit, items.len()))` worker
//! futures, each repeatedly taking one remaining item (any order, items are
//! independent) and running the task on it until the list is empty. Returns
//! only after every worker has finished. Task failures are the task body's
//! problem; one failing item never aborts sibling workers.
//!
//! The workers are plain futures joined in place rather than spawned tasks,
//! so task closures may borrow from the caller. Used for the probe phase
//! (higher limit) and the deletion phase (lower limit, deletion being
//! destructive and more sensitive to upstream load).

use std::future::Future;

use tokio::sync::Mutex;

/// Run `task` over every item with at most `limit` invocations in flight.
pub async fn run_with_limit<T, F, Fut>(items: Vec<T>, limit: usize, task: F)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    if items.is_empty() {
        return;
    }
    let workers = limit.clamp(1, items.len());
    let queue = Mutex::new(items);

    let worker_loops = (0..workers).map(|_| {
        let queue = &queue;
        let task = &task;
        async move {
            loop {
                let next = queue.lock().await.pop();
                match next {
                    Some(item) => task(item).await,
                    None => break,
                }
            }
        }
    });

    futures_util::future::join_all(worker_loops).await;
}
