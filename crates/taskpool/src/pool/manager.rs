//! Bounded task pool with rendezvous dispatch.
//!
//! This module defines the [`TaskPool`] struct, which owns a fixed set of
//! worker tasks and a single dispatcher task. Callers submit [`Job`]s; the
//! dispatcher hands each one to whichever worker registered as idle first, so
//! at most `size` jobs run at any instant and a burst of submissions is
//! throttled by the pool's ability to find idle workers.
//!
//! ## Lifecycle
//!
//! `Idle` → (`start`) → `Running` → (`stop`) → `Stopped`.
//!
//! - `resize` is only accepted while `Idle`.
//! - `start` blocks on a barrier until every worker is up, and only then
//!   launches the dispatcher, so a submission can never race an unstarted
//!   worker.
//! - `stop` drains: it returns once every accepted job has completed and every
//!   worker task has exited. The drain runs in its own task, so dropping a
//!   `stop` future does not interrupt it; calling `stop` again waits for it.
//!
//! Misuse (submitting before `start`, stopping twice, ...) is reported through
//! [`Error`] instead of blocking or panicking.

use crate::{
    config::{
        DEFAULT_POOL_SIZE, MAX_POOL_SIZE, MemConfig, PoolOptions, is_valid_size,
        resolve_pool_size,
    },
    error::{Error, Result},
    job::{BlockingJob, BoxJob, Job},
    pool::{
        dispatcher::{Submission, dispatch_loop},
        worker::{Handoff, worker_loop},
    },
};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::{
    sync::{Barrier, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, Span};

static SHARED: OnceLock<TaskPool> = OnceLock::new();

/// A fixed-size pool of workers fed by a single dispatcher.
///
/// The pool is caller-owned: create one with [`TaskPool::new`], or use
/// [`TaskPool::shared`] for a process-wide instance.
///
/// ```
/// use taskpool::{PoolOptions, TaskPool};
///
/// # #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
/// # async fn main() -> taskpool::Result<()> {
/// let pool = TaskPool::new(PoolOptions::new().with_size(2));
/// pool.start().await?;
/// pool.submit(|| async { println!("hello from a worker") }).await?;
/// pool.submit_fn(|| println!("hello from the blocking pool")).await?;
/// pool.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskPool {
    size: AtomicUsize,
    span: Span,
    state: Mutex<State>,
}

enum State {
    Idle,
    Starting,
    Running(Running),
    Stopping(ShutdownHandle),
    Stopped,
}

/// Outcome of the background shutdown, awaitable by every `stop` caller.
type ShutdownHandle = Shared<BoxFuture<'static, Result<()>>>;

/// Handles owned by a started pool.
struct Running {
    submissions: mpsc::Sender<Submission>,
    // Kept to measure the registry; the dispatcher owns the receiver.
    ready: mpsc::Sender<Handoff>,
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
    stop_tokens: Vec<CancellationToken>,
    workers: TaskTracker,
}

impl TaskPool {
    /// Constructs an idle pool. The worker count is resolved from `options`
    /// (see [`resolve_pool_size`]); no task is spawned
    /// until [`TaskPool::start`].
    pub fn new(options: PoolOptions) -> Self {
        let PoolOptions { size, span, config } = options;
        let config = config.unwrap_or_else(|| Arc::new(MemConfig::new()));
        let size = resolve_pool_size(size, config.as_ref());
        let span = span.unwrap_or_else(|| tracing::info_span!("taskpool"));

        span.in_scope(|| tracing::info!("Task pool configured with {size} workers"));

        Self {
            size: AtomicUsize::new(size),
            span,
            state: Mutex::new(State::Idle),
        }
    }

    /// Returns the process-wide pool, constructing it from `options` on the
    /// first call. Later calls return the same instance and ignore `options`.
    pub fn shared(options: PoolOptions) -> &'static TaskPool {
        SHARED.get_or_init(|| Self::new(options))
    }

    /// Returns the process-wide pool, constructing it with default options if
    /// [`TaskPool::shared`] has not been called yet.
    pub fn global() -> &'static TaskPool {
        SHARED.get_or_init(|| Self::new(PoolOptions::default()))
    }

    /// Configured number of workers.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Changes the worker count of a pool that has not been started.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSize`] if `size` is not in `(0, MAX_POOL_SIZE)`.
    /// - [`Error::AlreadyStarted`] if the pool is starting, running or
    ///   stopping; [`Error::Stopped`] if it has been stopped.
    pub fn resize(&self, size: usize) -> Result<()> {
        if !is_valid_size(size) {
            return Err(Error::InvalidSize {
                size,
                max: MAX_POOL_SIZE,
            });
        }

        let state = self.state.lock();
        match *state {
            State::Idle => {
                self.size.store(size, Ordering::Release);
                self.span
                    .in_scope(|| tracing::info!("Task pool resized to {size} workers"));
                Ok(())
            }
            State::Stopped => Err(Error::Stopped),
            State::Starting | State::Running(_) | State::Stopping(_) => {
                Err(Error::AlreadyStarted)
            }
        }
    }

    /// Spawns the workers, waits until every one of them is registered as idle,
    /// then spawns the dispatcher. When this returns, `available() == size()`.
    ///
    /// Must be called from within a Tokio runtime and awaited to completion.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] if the pool was started before,
    /// [`Error::Stopped`] if it has been stopped.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                State::Idle => *state = State::Starting,
                State::Stopped => return Err(Error::Stopped),
                _ => return Err(Error::AlreadyStarted),
            }
        }

        let size = self.size();
        let (submissions_tx, submissions_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = mpsc::channel(size);
        let startup = Arc::new(Barrier::new(size + 1));
        let workers = TaskTracker::new();
        let mut stop_tokens = Vec::with_capacity(size);

        for worker_id in 0..size {
            let stop = CancellationToken::new();
            stop_tokens.push(stop.clone());
            let span = tracing::debug_span!(parent: &self.span, "worker", worker_id);
            workers.spawn(
                worker_loop(worker_id, ready_tx.clone(), Arc::clone(&startup), stop)
                    .instrument(span),
            );
        }

        startup.wait().await;
        self.span
            .in_scope(|| tracing::info!("All {size} workers started"));

        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(
            dispatch_loop(size, submissions_rx, ready_rx, shutdown.clone())
                .instrument(tracing::debug_span!(parent: &self.span, "dispatcher")),
        );

        *self.state.lock() = State::Running(Running {
            submissions: submissions_tx,
            ready: ready_tx,
            shutdown,
            dispatcher,
            stop_tokens,
            workers,
        });
        Ok(())
    }

    /// Submits an asynchronous job.
    ///
    /// Returns once the dispatcher has accepted the job, which happens only
    /// when it is free to match it with a worker. The job then runs exactly
    /// once on exactly one worker.
    ///
    /// # Errors
    ///
    /// - [`Error::NotStarted`] before [`TaskPool::start`] has completed.
    /// - [`Error::ShuttingDown`] if the pool began stopping before the job was
    ///   accepted; the job is dropped without running.
    /// - [`Error::Stopped`] after [`TaskPool::stop`].
    pub async fn submit(&self, job: impl Job) -> Result<()> {
        self.submit_boxed(Box::new(job)).await
    }

    /// Submits a synchronous callable, run through [`BlockingJob`].
    ///
    /// # Errors
    ///
    /// Same as [`TaskPool::submit`].
    pub async fn submit_fn<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_boxed(Box::new(BlockingJob::new(func))).await
    }

    /// Submits an already boxed job.
    ///
    /// # Errors
    ///
    /// Same as [`TaskPool::submit`].
    pub async fn submit_boxed(&self, job: BoxJob) -> Result<()> {
        let submissions = self.submission_sender()?;
        let (accepted_tx, accepted_rx) = oneshot::channel();

        submissions
            .send(Submission {
                job,
                accepted: accepted_tx,
            })
            .await
            .map_err(|_| Error::ShuttingDown)?;

        accepted_rx.await.map_err(|_| Error::ShuttingDown)
    }

    /// Submits each job in turn, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Same as [`TaskPool::submit`]; jobs after the failing one are dropped.
    pub async fn add_jobs<I>(&self, jobs: I) -> Result<()>
    where
        I: IntoIterator<Item = BoxJob>,
    {
        for job in jobs {
            self.submit_boxed(job).await?;
        }
        Ok(())
    }

    /// Number of workers that are currently not registered as idle, i.e.
    /// executing a job or about to receive one.
    ///
    /// Always within `0..=size`; `0` unless the pool is running.
    pub fn concurrency(&self) -> usize {
        match &*self.state.lock() {
            State::Running(running) => {
                let size = self.size();
                size.saturating_sub(registry_len(&running.ready).min(size))
            }
            _ => 0,
        }
    }

    /// Number of workers currently registered as idle; `0` unless the pool is
    /// running.
    pub fn available(&self) -> usize {
        match &*self.state.lock() {
            State::Running(running) => registry_len(&running.ready).min(self.size()),
            _ => 0,
        }
    }

    /// Stops the pool after every accepted job has completed.
    ///
    /// - Stops accepting new submissions.
    /// - Cancels the dispatcher, which reclaims every worker as soon as it
    ///   finishes its current job, then closes the ready registry.
    /// - Signals every worker to stop and waits until all worker tasks have
    ///   exited.
    ///
    /// The shutdown runs in a background task. If this future is dropped
    /// before it completes, the shutdown carries on and a later `stop` (from
    /// any caller) waits for the same shutdown and returns its outcome.
    ///
    /// A job that never completes makes `stop` wait forever.
    ///
    /// # Errors
    ///
    /// - [`Error::NotStarted`] if the pool was never started.
    /// - [`Error::Stopped`] if the pool was already stopped.
    /// - [`Error::TaskFailed`] if the dispatcher task failed; the workers are
    ///   still signalled and awaited.
    pub async fn stop(&self) -> Result<()> {
        let shutdown = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => {
                    let handle = tokio::spawn(shut_down(running).instrument(self.span.clone()))
                        .map(|joined| joined.map_err(Error::from).and_then(|res| res))
                        .boxed()
                        .shared();
                    *state = State::Stopping(handle.clone());
                    handle
                }
                State::Stopping(handle) => {
                    *state = State::Stopping(handle.clone());
                    handle
                }
                previous @ (State::Idle | State::Starting) => {
                    *state = previous;
                    return Err(Error::NotStarted);
                }
                State::Stopped => return Err(Error::Stopped),
            }
        };

        let res = shutdown.await;

        let mut state = self.state.lock();
        if matches!(*state, State::Stopping(_)) {
            *state = State::Stopped;
        }
        res
    }

    fn submission_sender(&self) -> Result<mpsc::Sender<Submission>> {
        match &*self.state.lock() {
            State::Running(running) => Ok(running.submissions.clone()),
            State::Idle | State::Starting => Err(Error::NotStarted),
            State::Stopping(_) => Err(Error::ShuttingDown),
            State::Stopped => Err(Error::Stopped),
        }
    }
}

impl Default for TaskPool {
    /// An idle pool of [`DEFAULT_POOL_SIZE`] workers.
    fn default() -> Self {
        Self::new(PoolOptions::new().with_size(DEFAULT_POOL_SIZE))
    }
}

impl core::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match &*self.state.lock() {
            State::Idle => "idle",
            State::Starting => "starting",
            State::Running(_) => "running",
            State::Stopping(_) => "stopping",
            State::Stopped => "stopped",
        };
        f.debug_struct("TaskPool")
            .field("size", &self.size())
            .field("state", &state)
            .finish()
    }
}

/// Cancels the dispatcher, waits for its drain, then stops and awaits every
/// worker.
async fn shut_down(running: Running) -> Result<()> {
    let Running {
        submissions,
        ready,
        shutdown,
        dispatcher,
        stop_tokens,
        workers,
    } = running;
    drop(submissions);
    drop(ready);

    tracing::info!("Stopping task pool, waiting for in-flight jobs");
    shutdown.cancel();
    let drained = dispatcher.await;

    // Cancelling never blocks, whatever state the worker is in.
    for token in &stop_tokens {
        token.cancel();
    }
    workers.close();
    workers.wait().await;

    match drained {
        Ok(()) => {
            tracing::info!("Task pool shutdown complete");
            Ok(())
        }
        Err(err) => {
            tracing::error!("Dispatcher failed during shutdown: {err}");
            Err(err.into())
        }
    }
}

/// Number of handoffs currently sitting in the ready registry.
fn registry_len(ready: &mpsc::Sender<Handoff>) -> usize {
    ready.max_capacity() - ready.capacity()
}
