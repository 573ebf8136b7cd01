use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex as StdMutex,
};

use dp_query_types::{DataRequest, QueryData, RpcResponse, StreamMode, TransportError};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::{
    buffer::MessageBuffer,
    transport::{BidiSession, Cursor, ServerStream, WireTransport},
};

/// `Created → Started → {Receiving ↔ Acknowledging} → {Completed | Rejected | Errored}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Created,
    Started,
    Receiving,
    Acknowledging,
    Completed,
    Rejected,
    Errored,
}

/// Success flag plus optional message/cause, as exposed by a finished (or
/// in-flight) Stream Worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultStatus {
    pub success: bool,
    pub message: Option<String>,
    pub cause: Option<String>,
}

impl ResultStatus {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            cause: None,
        }
    }

    fn failed(message: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            cause,
        }
    }
}

/// Cheaply cloneable live view of a running (or finished) Stream Worker —
/// `started`, `completed`, `responseCount`, `ResultStatus` (§4.2).
#[derive(Clone)]
pub struct WorkerHandle {
    phase: Arc<Mutex<WorkerPhase>>,
    response_count: Arc<AtomicU64>,
    status: Arc<Mutex<Option<ResultStatus>>>,
    cancel: Arc<StdMutex<Option<String>>>,
}

impl WorkerHandle {
    fn new() -> Self {
        Self {
            phase: Arc::new(Mutex::new(WorkerPhase::Created)),
            response_count: Arc::new(AtomicU64::new(0)),
            status: Arc::new(Mutex::new(None)),
            cancel: Arc::new(StdMutex::new(None)),
        }
    }

    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.lock().await
    }

    pub async fn started(&self) -> bool {
        !matches!(self.phase().await, WorkerPhase::Created)
    }

    pub async fn completed(&self) -> bool {
        matches!(self.phase().await, WorkerPhase::Completed)
    }

    pub fn response_count(&self) -> u64 {
        self.response_count.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> Option<ResultStatus> {
        self.status.lock().await.clone()
    }

    /// Cooperative cancellation: records `reason` for the worker to observe
    /// between responses (§5); does not forcibly interrupt an in-flight
    /// `recv`. `reason` distinguishes an explicit cancel (`"cancelled"`)
    /// from a facade deadline firing (`"Timeout"`) in the worker's
    /// resulting `Errored` status.
    pub fn cancel(&self, reason: impl Into<String>) {
        *self.cancel.lock().unwrap() = Some(reason.into());
    }

    async fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.lock().await = phase;
    }

    async fn finish(&self, phase: WorkerPhase, status: ResultStatus) {
        *self.phase.lock().await = phase;
        *self.status.lock().await = Some(status);
    }

    fn cancellation(&self) -> Option<String> {
        self.cancel.lock().unwrap().clone()
    }
}

/// Drives exactly one streaming RPC for one (sub)request (C2).
pub struct StreamWorker<T: WireTransport> {
    transport: Arc<T>,
    handle: WorkerHandle,
}

impl<T: WireTransport + 'static> StreamWorker<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            handle: WorkerHandle::new(),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Runs the worker to completion, forwarding every accepted data
    /// payload into `sink`. `request.stream_mode` selects unidirectional
    /// (server stream) vs. bidirectional (cursor) semantics; `Unary` is
    /// rejected — unary requests are handled directly by the Query Facade,
    /// never by a Stream Worker (§4.8).
    #[instrument(skip_all, fields(mode = ?request.stream_mode))]
    pub async fn run(
        self,
        request: DataRequest,
        sink: Arc<MessageBuffer<QueryData>>,
    ) -> Result<(), TransportError> {
        self.handle.set_phase(WorkerPhase::Started).await;
        let outcome = match request.stream_mode {
            StreamMode::ServerStream => self.run_unidirectional(&request, &sink).await,
            StreamMode::BidiStream => self.run_bidirectional(&request, &sink).await,
            StreamMode::Unary => Err(TransportError::Terminated(
                "StreamWorker does not drive Unary requests".to_string(),
            )),
        };

        match &outcome {
            Ok(()) => {
                debug!(responses = self.handle.response_count(), "worker completed");
                self.handle.finish(WorkerPhase::Completed, ResultStatus::ok()).await;
            }
            Err(TransportError::Rejected { code, message }) => {
                warn!(code, message, "worker rejected on first response");
                self.handle
                    .finish(
                        WorkerPhase::Rejected,
                        ResultStatus::failed(message.clone(), Some(code.clone())),
                    )
                    .await;
            }
            Err(other) => {
                warn!(error = %other, "worker errored");
                self.handle
                    .finish(WorkerPhase::Errored, ResultStatus::failed(other.to_string(), None))
                    .await;
            }
        }
        outcome
    }

    async fn run_unidirectional(
        &self,
        request: &DataRequest,
        sink: &MessageBuffer<QueryData>,
    ) -> Result<(), TransportError> {
        self.handle.set_phase(WorkerPhase::Receiving).await;
        let mut stream = self
            .transport
            .server_stream(request)
            .await
            .map_err(|e| TransportError::Terminated(e.to_string()))?;

        let mut first = true;
        loop {
            if let Some(reason) = self.handle.cancellation() {
                return Err(TransportError::Terminated(reason));
            }
            let response = stream
                .recv()
                .await
                .map_err(|e| TransportError::Terminated(e.to_string()))?;
            match response {
                None => return Ok(()),
                Some(response) => {
                    self.accept_response(response, first, sink).await?;
                    first = false;
                }
            }
        }
    }

    async fn run_bidirectional(
        &self,
        request: &DataRequest,
        sink: &MessageBuffer<QueryData>,
    ) -> Result<(), TransportError> {
        self.handle.set_phase(WorkerPhase::Receiving).await;
        let mut session = self
            .transport
            .bidi_stream(request)
            .await
            .map_err(|e| TransportError::Terminated(e.to_string()))?;

        let mut first = true;
        loop {
            if let Some(reason) = self.handle.cancellation() {
                session.ack(Cursor::Finish).await.ok();
                return Err(TransportError::Terminated(reason));
            }
            let response = session
                .recv()
                .await
                .map_err(|e| TransportError::Terminated(e.to_string()))?;
            match response {
                None => return Ok(()),
                Some(response) => {
                    self.accept_response(response, first, sink).await?;
                    first = false;
                    self.handle.set_phase(WorkerPhase::Acknowledging).await;
                    session
                        .ack(Cursor::Next)
                        .await
                        .map_err(|e| TransportError::Terminated(e.to_string()))?;
                    self.handle.set_phase(WorkerPhase::Receiving).await;
                }
            }
        }
    }

    /// Applies the first-response-may-be-exceptional / later-response-is-an-
    /// error contract (§4.2) and forwards accepted data into `sink`.
    async fn accept_response(
        &self,
        response: RpcResponse,
        is_first: bool,
        sink: &MessageBuffer<QueryData>,
    ) -> Result<(), TransportError> {
        self.handle.response_count.fetch_add(1, Ordering::AcqRel);
        match response {
            RpcResponse::Data(data) => {
                sink.offer(data).await.map_err(|_| {
                    TransportError::Terminated("response buffer no longer accepting".to_string())
                })?;
                Ok(())
            }
            RpcResponse::Exceptional(result) if is_first => Err(TransportError::Rejected {
                code: result.code,
                message: result.message,
            }),
            RpcResponse::Exceptional(result) => Err(TransportError::Errored {
                code: result.code,
                message: result.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use dp_query_types::{ExceptionalResult, Instant, PvName, TimeInterval};

    use super::*;

    fn request() -> DataRequest {
        DataRequest::new(
            None,
            StreamMode::ServerStream,
            TimeInterval::new(Instant::from_nanos(0), Instant::from_nanos(10)).unwrap(),
            vec![PvName::new("pv:a").unwrap()],
        )
        .unwrap()
    }

    struct FakeServerStream {
        responses: std::vec::IntoIter<RpcResponse>,
    }

    #[async_trait::async_trait]
    impl ServerStream for FakeServerStream {
        async fn recv(&mut self) -> anyhow::Result<Option<RpcResponse>> {
            Ok(self.responses.next())
        }
    }

    struct FakeBidiSession {
        responses: std::vec::IntoIter<RpcResponse>,
        acks: Arc<StdMutex<Vec<Cursor>>>,
    }

    #[async_trait::async_trait]
    impl BidiSession for FakeBidiSession {
        async fn recv(&mut self) -> anyhow::Result<Option<RpcResponse>> {
            Ok(self.responses.next())
        }

        async fn ack(&mut self, cursor: Cursor) -> anyhow::Result<()> {
            self.acks.lock().unwrap().push(cursor);
            Ok(())
        }
    }

    struct FakeTransport {
        responses: Vec<RpcResponse>,
        acks: Arc<StdMutex<Vec<Cursor>>>,
    }

    impl FakeTransport {
        fn new(responses: Vec<RpcResponse>) -> Self {
            Self {
                responses,
                acks: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    #[async_trait::async_trait]
    impl WireTransport for FakeTransport {
        async fn unary_query(&self, _request: &DataRequest) -> anyhow::Result<RpcResponse> {
            unimplemented!("not exercised by worker tests")
        }

        async fn server_stream(&self, _request: &DataRequest) -> anyhow::Result<Box<dyn ServerStream>> {
            Ok(Box::new(FakeServerStream {
                responses: self.responses.clone().into_iter(),
            }))
        }

        async fn bidi_stream(&self, _request: &DataRequest) -> anyhow::Result<Box<dyn BidiSession>> {
            Ok(Box::new(FakeBidiSession {
                responses: self.responses.clone().into_iter(),
                acks: self.acks.clone(),
            }))
        }
    }

    fn data(bucket_count: usize) -> RpcResponse {
        let buckets = (0..bucket_count)
            .map(|i| {
                dp_query_types::RawBucket::new(
                    PvName::new(format!("pv:{i}")).unwrap(),
                    dp_query_types::Provenance::TmsList(vec![Instant::from_nanos(0)]),
                    vec![dp_query_types::Value::Int32(i as i32)],
                )
            })
            .collect();
        RpcResponse::Data(QueryData { buckets })
    }

    fn exceptional(code: &str) -> RpcResponse {
        RpcResponse::Exceptional(ExceptionalResult {
            code: code.to_string(),
            message: "boom".to_string(),
        })
    }

    #[tokio::test]
    async fn unidirectional_forwards_every_data_response_and_completes() {
        let transport = Arc::new(FakeTransport::new(vec![data(1), data(1)]));
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);
        let handle = worker.handle();

        worker.run(request(), sink.clone()).await.unwrap();

        assert!(handle.completed().await);
        assert_eq!(handle.response_count(), 2);
        assert_eq!(sink.len().await, 2);
        assert!(handle.status().await.unwrap().success);
    }

    #[tokio::test]
    async fn first_exceptional_response_is_a_rejection() {
        let transport = Arc::new(FakeTransport::new(vec![exceptional("NOT_FOUND")]));
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);
        let handle = worker.handle();

        let err = worker.run(request(), sink.clone()).await.unwrap_err();

        assert!(matches!(err, TransportError::Rejected { .. }));
        assert_eq!(handle.phase().await, WorkerPhase::Rejected);
        assert_eq!(sink.len().await, 0);
    }

    #[tokio::test]
    async fn later_exceptional_response_is_an_error_not_a_rejection() {
        let transport = Arc::new(FakeTransport::new(vec![data(1), exceptional("INTERNAL")]));
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);
        let handle = worker.handle();

        let err = worker.run(request(), sink.clone()).await.unwrap_err();

        assert!(matches!(err, TransportError::Errored { .. }));
        assert_eq!(handle.phase().await, WorkerPhase::Errored);
        assert_eq!(sink.len().await, 1, "the first accepted payload was already forwarded");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn rejection_is_logged_at_warn() {
        let transport = Arc::new(FakeTransport::new(vec![exceptional("NOT_FOUND")]));
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);

        worker.run(request(), sink).await.unwrap_err();

        assert!(logs_contain("worker rejected"));
    }

    #[tokio::test]
    async fn cancellation_reason_is_carried_into_the_terminated_error() {
        let transport = Arc::new(FakeTransport::new(vec![data(1), data(1)]));
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);
        let handle = worker.handle();
        handle.cancel("Timeout");

        let err = worker.run(request(), sink.clone()).await.unwrap_err();

        assert_eq!(err, TransportError::Terminated("Timeout".to_string()));
        assert_eq!(handle.phase().await, WorkerPhase::Errored);
        assert_eq!(sink.len().await, 0, "cancelled before any response was accepted");
    }

    #[tokio::test]
    async fn bidirectional_acks_next_after_each_response_and_finishes_on_close() {
        let transport = Arc::new(FakeTransport::new(vec![data(1), data(1)]));
        let acks = transport.acks.clone();
        let sink = Arc::new(MessageBuffer::new(8));
        let worker = StreamWorker::new(transport);

        let mut req = request();
        req.stream_mode = StreamMode::BidiStream;
        worker.run(req, sink.clone()).await.unwrap();

        assert_eq!(*acks.lock().unwrap(), vec![Cursor::Next, Cursor::Next]);
    }
}
