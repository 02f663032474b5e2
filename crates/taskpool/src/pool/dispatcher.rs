use crate::{job::BoxJob, pool::worker::Handoff};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A job offered to the dispatcher, together with the acknowledgement that
/// releases the submitter once the dispatcher has taken it.
pub(crate) struct Submission {
    pub(crate) job: BoxJob,
    pub(crate) accepted: oneshot::Sender<()>,
}

/// The single task that matches submitted jobs to idle workers.
///
/// Each submission is acknowledged, then handed to the first worker found in
/// the ready registry, waiting for one if every worker is busy. When
/// `shutdown` is cancelled the dispatcher drains the registry (see [`drain`])
/// and returns. A job that has been acknowledged is always handed off before
/// shutdown is observed.
pub(crate) async fn dispatch_loop(
    size: usize,
    mut submissions: mpsc::Receiver<Submission>,
    mut ready: mpsc::Receiver<Handoff>,
    shutdown: CancellationToken,
) {
    tracing::debug!("Dispatcher started for {size} workers");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            submission = submissions.recv() => {
                let Some(Submission { job, accepted }) = submission else {
                    break;
                };
                // A submitter that gave up waiting still had its job
                // accepted, so the job is dispatched regardless.
                let _ = accepted.send(());

                if hand_off(&mut ready, job).await.is_err() {
                    tracing::error!("Ready registry closed, dropping job");
                    return;
                }
            }
        }
    }

    // Anything still queued was never acknowledged and is rejected once the
    // receiver goes away.
    submissions.close();
    drain(size, &mut ready).await;
    tracing::info!("Dispatcher drained {size} workers");
}

/// Sends `job` to the next ready worker, skipping workers that have already
/// exited. Returns the job if the registry closes before anyone takes it.
async fn hand_off(ready: &mut mpsc::Receiver<Handoff>, mut job: BoxJob) -> Result<usize, BoxJob> {
    while let Some(Handoff { worker_id, tx }) = ready.recv().await {
        match tx.send(job) {
            Ok(()) => {
                tracing::trace!("Dispatched job to worker {worker_id}");
                return Ok(worker_id);
            }
            Err(returned) => {
                tracing::warn!("Worker {worker_id} went away, retrying with another worker");
                job = returned;
            }
        }
    }
    Err(job)
}

/// Reclaims every worker's registration and closes it.
///
/// Pulls exactly `size` handoffs from the registry, which waits for every
/// in-flight job to finish (its worker re-registers afterwards). Dropping a
/// handoff unsent closes it and makes the owning worker exit. The registry
/// itself is closed last.
async fn drain(size: usize, ready: &mut mpsc::Receiver<Handoff>) {
    for reclaimed in 0..size {
        match ready.recv().await {
            Some(Handoff { worker_id, tx }) => {
                tracing::trace!("Closing worker {worker_id} ({}/{size})", reclaimed + 1);
                drop(tx);
            }
            None => {
                tracing::warn!("Ready registry closed after reclaiming {reclaimed}/{size} workers");
                break;
            }
        }
    }
    ready.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn noop() -> BoxJob {
        Box::new(|| async {})
    }

    #[tokio::test]
    async fn hand_off_skips_departed_workers() {
        let (ready_tx, mut ready_rx) = mpsc::channel(2);

        let (gone_tx, gone_rx) = oneshot::channel();
        drop(gone_rx);
        let (live_tx, live_rx) = oneshot::channel();
        assert!(ready_tx.send(Handoff { worker_id: 0, tx: gone_tx }).await.is_ok());
        assert!(ready_tx.send(Handoff { worker_id: 1, tx: live_tx }).await.is_ok());

        let worker = timeout(WAIT, hand_off(&mut ready_rx, noop())).await.unwrap();
        assert_eq!(worker.ok(), Some(1));
        assert!(live_rx.await.is_ok());
    }

    #[tokio::test]
    async fn hand_off_returns_job_when_registry_closed() {
        let (ready_tx, mut ready_rx) = mpsc::channel::<Handoff>(1);
        drop(ready_tx);
        assert!(hand_off(&mut ready_rx, noop()).await.is_err());
    }

    #[tokio::test]
    async fn drain_closes_every_handoff() {
        let (ready_tx, mut ready_rx) = mpsc::channel(3);
        let mut receivers = Vec::new();
        for worker_id in 0..3 {
            let (tx, rx) = oneshot::channel();
            assert!(ready_tx.send(Handoff { worker_id, tx }).await.is_ok());
            receivers.push(rx);
        }

        timeout(WAIT, drain(3, &mut ready_rx)).await.unwrap();

        for rx in receivers {
            assert!(rx.await.is_err(), "handoff should be closed");
        }
        let (tx, _rx) = oneshot::channel();
        assert!(ready_tx.send(Handoff { worker_id: 9, tx }).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_rejects_queued_submissions() {
        let (sub_tx, sub_rx) = mpsc::channel(1);
        let (_ready_tx, ready_rx) = mpsc::channel::<Handoff>(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (accepted_tx, accepted_rx) = oneshot::channel();
        assert!(
            sub_tx
                .send(Submission { job: noop(), accepted: accepted_tx })
                .await
                .is_ok()
        );

        // Size 0: nothing to drain.
        timeout(WAIT, dispatch_loop(0, sub_rx, ready_rx, shutdown)).await.unwrap();
        assert!(accepted_rx.await.is_err());
    }
}
