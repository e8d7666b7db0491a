//! Fixed-size worker pool over a shared task queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{Mutex, mpsc};

/// Runs `step` over every task with at most `worker_count` in flight.
///
/// All tasks are queued up front; each worker pops one, awaits its step and
/// pushes the result to the output channel until the queue is drained.
/// Returns once every worker has finished. Results are in completion order.
///
/// Every task comes back exactly once. When a step panics, the worker logs it,
/// hands a copy of the task as it was queued to `on_panic` together with the
/// panic message, returns that instead and carries on.
pub async fn run<T, F, Fut, P>(tasks: Vec<T>, worker_count: usize, step: F, on_panic: P) -> Vec<T>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    P: Fn(T, String) -> T + Send + Sync + 'static,
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = worker_count.clamp(1, total);
    debug!("{} tasks over {} workers", total, workers);

    let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
    let (tx, mut rx) = mpsc::channel::<T>(total);
    let step = Arc::new(step);
    let on_panic = Arc::new(on_panic);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let queue = queue.clone();
        let tx = tx.clone();
        let step = step.clone();
        let on_panic = on_panic.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let Some(task) = queue.lock().await.pop_front() else {
                    break;
                };
                let queued = task.clone();
                let done = match tokio::spawn(step(task)).await {
                    Ok(done) => done,
                    Err(err) => {
                        error!("worker {} step failed: {}", worker, err);
                        on_panic(queued, err.to_string())
                    }
                };
                if tx.send(done).await.is_err() {
                    break;
                }
            }
            debug!("worker {} finished", worker);
        }));
    }
    drop(tx);

    for handle in handles {
        if let Err(err) = handle.await {
            error!("worker exited abnormally: {}", err);
        }
    }

    let mut results = Vec::with_capacity(total);
    while let Some(done) = rx.recv().await {
        results.push(done);
    }
    results
}
