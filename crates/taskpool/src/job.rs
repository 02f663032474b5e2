use futures::future::BoxFuture;

/// A unit of work executed by exactly one worker, exactly once.
///
/// A job takes no arguments and produces no value. Anything it needs to report
/// (a result, an error) must travel through state the job captures itself,
/// e.g. a channel or a shared slot.
///
/// Any `FnOnce() -> impl Future<Output = ()>` closure is a job:
///
/// ```
/// use taskpool::{BoxJob, Job};
///
/// let job: BoxJob = Box::new(|| async {
///     // do some work
/// });
/// # let _ = job;
/// ```
///
/// Synchronous callables are wrapped in [`BlockingJob`].
pub trait Job: Send + 'static {
    /// Consumes the job and returns the future that performs the work.
    ///
    /// The returned future is polled on a worker task. It must not rely on
    /// running on any particular worker, and it should not block the thread:
    /// use [`BlockingJob`] for synchronous work.
    fn execute(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Type-erased job as it travels through the submission queue, the
/// dispatcher and a worker's handoff.
pub type BoxJob = Box<dyn Job>;

impl<F, Fut> Job for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn execute(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin((*self)())
    }
}

/// Adapts a synchronous, zero-argument callable into a [`Job`].
///
/// The callable runs on Tokio's blocking thread pool while the worker that
/// received it waits for completion, so a slow or blocking callable occupies
/// exactly one worker without starving the async runtime. If the callable
/// panics, the panic is resumed on the worker so that it is handled like a
/// panic from any other job.
pub struct BlockingJob<F> {
    func: F,
}

impl<F> BlockingJob<F>
where
    F: FnOnce() + Send + 'static,
{
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Job for BlockingJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn execute(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Self { func } = *self;
        Box::pin(async move {
            if let Err(err) = tokio::task::spawn_blocking(func).await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn closure_job_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job: BoxJob = {
            let counter = Arc::clone(&counter);
            Box::new(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        job.execute().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_job_runs_on_blocking_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job: BoxJob = {
            let counter = Arc::clone(&counter);
            Box::new(BlockingJob::new(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        };

        job.execute().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_job_panic_is_resumed() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        fn boom() {
            panic!("boom")
        }

        let job: BoxJob = Box::new(BlockingJob::new(boom));
        let outcome = AssertUnwindSafe(job.execute()).catch_unwind().await;
        assert!(outcome.is_err());
    }
}
