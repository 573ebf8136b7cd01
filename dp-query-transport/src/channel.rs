use std::sync::Arc;

use dp_query_types::{DataRequest, QueryData, TransportError};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::instrument;

use crate::{
    buffer::MessageBuffer,
    transport::WireTransport,
    worker::{StreamWorker, WorkerHandle},
};

/// Fans a (possibly client-decomposed) request out across a pool of Stream
/// Workers, bounded to at most `max_concurrent` in flight at once, and
/// collects every forwarded payload into one shared `MessageBuffer` (C3).
pub struct Channel<T: WireTransport> {
    transport: Arc<T>,
    max_concurrent: usize,
}

impl<T: WireTransport + 'static> Channel<T> {
    pub fn new(transport: Arc<T>, max_concurrent: usize) -> Self {
        Self {
            transport,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Splits `request` into at most `max_parts` sub-requests (§6.2's
    /// client-supplied decomposition) and starts one Stream Worker per part
    /// immediately. Returns a handle that can be cancelled and must be
    /// `join`ed to find out whether the fan-out as a whole succeeded.
    #[instrument(skip_all)]
    pub fn spawn(&self, request: DataRequest, max_parts: usize, buffer_capacity: usize) -> ChannelRun {
        let parts = request.decompose(max_parts);
        let buffer = Arc::new(MessageBuffer::new(buffer_capacity));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let mut worker_handles = Vec::with_capacity(parts.len());
        let mut join_set = JoinSet::new();
        for part in parts {
            let worker = StreamWorker::new(self.transport.clone());
            worker_handles.push(worker.handle());

            let buffer = buffer.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("channel semaphore is never closed");
                worker.run(part, buffer).await
            });
        }

        ChannelRun {
            buffer,
            worker_handles,
            join_set,
        }
    }
}

/// One in-flight (or finished) fan-out started by [`Channel::spawn`].
pub struct ChannelRun {
    buffer: Arc<MessageBuffer<QueryData>>,
    worker_handles: Vec<WorkerHandle>,
    join_set: JoinSet<Result<(), TransportError>>,
}

impl ChannelRun {
    /// The shared sink every Stream Worker in this fan-out forwards into.
    /// Callers may start draining it (e.g. via `take`/`poll`) before the
    /// fan-out finishes.
    pub fn buffer(&self) -> Arc<MessageBuffer<QueryData>> {
        self.buffer.clone()
    }

    /// Requests cooperative cancellation of every worker, tagged
    /// `"cancelled"`, and immediately discards whatever is still queued in
    /// the shared buffer (§5's bounded cooperative cancellation window: the
    /// caller does not block here).
    pub async fn cancel_now(&self) {
        self.cancel_now_with_reason("cancelled").await;
    }

    /// Same as `cancel_now`, but tags every worker's cancellation with
    /// `reason` instead of the generic `"cancelled"` string — e.g.
    /// `"Timeout"` when a facade deadline fires — so the two triggers show
    /// up distinctly in a worker's resulting `Errored` status.
    pub async fn cancel_now_with_reason(&self, reason: &str) {
        for handle in &self.worker_handles {
            handle.cancel(reason.to_string());
        }
        self.buffer.shutdown_now().await;
    }

    /// Waits for every worker to finish, then closes the shared buffer.
    /// Reports the first non-success worker's cause as the overall result;
    /// a later worker's failure is not masked by an earlier success. A
    /// worker task panicking is itself a bug in this crate and is not
    /// caught here — `join_next` propagates the panic.
    ///
    /// Takes `&mut self` rather than consuming `self` so a caller racing
    /// this against a deadline (via `tokio::time::timeout`) can let the
    /// timer win without losing `self` — only the borrow is dropped, the
    /// underlying `JoinSet` (and its still-running tasks) survives, so a
    /// subsequent call to `join` can let a cooperative cancellation finish
    /// this same fan-out instead of the tasks being force-aborted.
    pub async fn join(&mut self) -> Result<(), TransportError> {
        let mut first_error = None;
        while let Some(outcome) = self.join_set.join_next().await {
            let result = outcome.expect("stream worker task panicked");
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match &first_error {
            Some(_) => self.buffer.shutdown_now().await,
            None => self.buffer.shutdown().await,
        }
        first_error.map_or(Ok(()), Err)
    }
}
