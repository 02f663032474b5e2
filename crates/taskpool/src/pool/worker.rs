use crate::job::BoxJob;
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{Barrier, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A worker's offer to take exactly one job.
///
/// A worker places a fresh `Handoff` in the ready registry every time it
/// becomes idle. The dispatcher owns it from then on: sending a job through
/// `tx` hands the job to that worker, dropping `tx` unsent tells the worker
/// to stop.
pub(crate) struct Handoff {
    pub(crate) worker_id: usize,
    pub(crate) tx: oneshot::Sender<BoxJob>,
}

/// Worker task that executes jobs handed to it by the dispatcher.
///
/// The worker publishes its first registration, then waits on the pool's
/// startup barrier, so once `start` returns every worker is already in the
/// ready registry. From then on it alternates between two states until it is
/// stopped:
///
/// - *Registering*: publish a [`Handoff`] in the ready registry and wait for
///   either a job or a stop.
/// - *Executing*: run the job to completion inside a panic boundary.
///
/// # Arguments
///
/// - `worker_id`: Ordinal of this worker (used for logs/tracing).
/// - `ready`: Sending side of the pool's ready registry.
/// - `startup`: Barrier shared with the pool's `start` call.
/// - `stop`: Signals the worker to exit while it is registering.
///
/// # Termination
///
/// The worker stops when its pending handoff is closed by the dispatcher's
/// drain, when `stop` is cancelled, or when the ready registry has been
/// closed. It never stops in the middle of a job.
pub(crate) async fn worker_loop(
    worker_id: usize,
    ready: mpsc::Sender<Handoff>,
    startup: Arc<Barrier>,
    stop: CancellationToken,
) {
    // The barrier is passed even if registering failed, so `start` never hangs.
    let mut pending = register(worker_id, &ready).await;
    startup.wait().await;
    tracing::trace!("Worker {worker_id} started");

    while let Some(rx) = pending {
        let job = tokio::select! {
            biased;
            () = stop.cancelled() => {
                tracing::debug!("Worker {worker_id} received shutdown signal");
                break;
            }
            job = rx => match job {
                Ok(job) => job,
                // The dispatcher dropped our handoff while draining.
                Err(_) => break,
            },
        };

        run_job(worker_id, job).await;
        pending = register(worker_id, &ready).await;
    }

    tracing::trace!("Worker {worker_id} stopped");
}

/// Places a fresh handoff in the ready registry and returns its receiving
/// side, or `None` if the registry is closed.
async fn register(
    worker_id: usize,
    ready: &mpsc::Sender<Handoff>,
) -> Option<oneshot::Receiver<BoxJob>> {
    let (tx, rx) = oneshot::channel();
    if ready.send(Handoff { worker_id, tx }).await.is_err() {
        tracing::debug!("Worker {worker_id} found the ready registry closed");
        return None;
    }
    Some(rx)
}

/// Runs `job` and contains any panic it raises, so the worker survives and
/// pool capacity is preserved.
async fn run_job(worker_id: usize, job: BoxJob) {
    // `execute` itself may panic before returning a future.
    let outcome = AssertUnwindSafe(async move { job.execute().await })
        .catch_unwind()
        .await;

    if let Err(panic) = outcome {
        tracing::error!(
            "Job panicked on worker {worker_id}: {}",
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_registers_runs_and_reregisters() {
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let startup = Arc::new(Barrier::new(2));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(
            7,
            ready_tx,
            Arc::clone(&startup),
            stop.clone(),
        ));
        startup.wait().await;

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let handoff = timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();
            assert_eq!(handoff.worker_id, 7);
            let counter = Arc::clone(&counter);
            let job: BoxJob = Box::new(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(handoff.tx.send(job).is_ok());
        }

        // The fourth registration proves the third job has finished.
        let handoff = timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        drop(handoff);
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_registers_before_passing_startup_barrier() {
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let startup = Arc::new(Barrier::new(2));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(
            3,
            ready_tx,
            Arc::clone(&startup),
            stop.clone(),
        ));

        timeout(WAIT, startup.wait()).await.unwrap();
        let handoff = ready_rx.try_recv().unwrap();
        assert_eq!(handoff.worker_id, 3);

        stop.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    async fn failing_job() {
        panic!("job failure")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_survives_panicking_job() {
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let startup = Arc::new(Barrier::new(1));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(0, ready_tx, startup, stop.clone()));

        let handoff = timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();
        let job: BoxJob = Box::new(failing_job);
        assert!(handoff.tx.send(job).is_ok());

        // Registering again means the worker contained the panic.
        let _handoff = timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();

        stop.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn worker_exits_when_registry_closed() {
        let (ready_tx, mut ready_rx) = mpsc::channel::<Handoff>(1);
        ready_rx.close();
        let startup = Arc::new(Barrier::new(1));
        let handle = tokio::spawn(worker_loop(
            0,
            ready_tx,
            startup,
            CancellationToken::new(),
        ));
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[test]
    fn panic_message_extracts_strings() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
