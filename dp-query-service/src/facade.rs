use std::sync::Arc;

use dp_query_transport::{Channel, ChannelRun, MessageBuffer, WireTransport};
use dp_query_types::{
    Aggregate, DataRequest, DpQueryConfig, DpQueryError, QueryData, RpcResponse, StreamMode, SuperDomain,
    TransportError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::{
    correlator::Correlator,
    materializer::Materializer,
    table::{self, Table},
    time_domain,
};

/// Orchestrates C3 through C7 behind the three request modes of §4.8.
///
/// Exactly one correlator is constructed per call (never shared across
/// calls); the single `single_flight` guard is what the spec means by "one
/// correlator and one assembler exist per facade instance" — it keeps two
/// overlapping streaming calls on the same facade from interleaving into
/// each other's Correlator.
pub struct QueryFacade<T: WireTransport> {
    transport: Arc<T>,
    config: DpQueryConfig,
    single_flight: Arc<Mutex<()>>,
}

impl<T: WireTransport + 'static> QueryFacade<T> {
    pub fn new(transport: Arc<T>, config: DpQueryConfig) -> Self {
        Self {
            transport,
            config,
            single_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Single blocking RPC, correlate, aggregate, return a table (§4.8
    /// "Unary").
    #[instrument(skip_all)]
    pub async fn unary(&self, request: DataRequest) -> Result<Box<dyn Table>, DpQueryError> {
        request.validate()?;
        if request.stream_mode != StreamMode::Unary {
            return Err(DpQueryError::InvalidStreamMode(format!("{:?}", request.stream_mode)));
        }
        let _guard = self.single_flight.clone().lock_owned().await;

        let response = tokio::time::timeout(self.config.timeout.as_duration(), self.transport.unary_query(&request))
            .await
            .map_err(|_elapsed| DpQueryError::Timeout("unary query".to_string()))?
            .map_err(|cause| TransportError::Terminated(cause.to_string()))?;

        let data = match response {
            RpcResponse::Data(data) => data,
            RpcResponse::Exceptional(result) => {
                warn!(code = %result.code, "unary query rejected");
                return Err(TransportError::Rejected {
                    code: result.code,
                    message: result.message,
                }
                .into());
            }
        };

        let correlator = Arc::new(Correlator::new(self.config.error_checking, self.config.concurrency));
        correlator.ingest(data).await?;
        self.assemble(correlator).await
    }

    /// One or many logical requests, fanned out via the Channel, correlated,
    /// resolved and materialized into an Aggregate/Table (§4.8 "Streamed").
    #[instrument(skip_all)]
    pub async fn streamed(
        &self,
        request: DataRequest,
        max_parts: usize,
        buffer_capacity: usize,
    ) -> Result<Box<dyn Table>, DpQueryError> {
        request.validate()?;
        if request.stream_mode == StreamMode::Unary {
            return Err(DpQueryError::InvalidStreamMode(format!("{:?}", request.stream_mode)));
        }
        let _guard = self.single_flight.clone().lock_owned().await;

        let channel = Channel::new(self.transport.clone(), self.config.concurrency.max_threads);
        let mut run = channel.spawn(request, max_parts, buffer_capacity);
        let timeout = self.config.timeout.as_duration();

        let outcome = tokio::time::timeout(timeout, self.drain_and_join(run.buffer(), &mut run)).await;

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!("streamed query timed out");
                // §5: transition workers to Errored("Timeout") cooperatively
                // rather than force-aborting them. `run` (and its JoinSet)
                // survived the race above — `drain_and_join` only borrowed
                // it — so workers are still running and can notice this
                // between responses. Give them one more deadline's worth of
                // time to wind down on their own before letting `run` drop
                // at the end of this function, which aborts whatever is
                // still stuck (e.g. a transport that never returns from
                // `recv`, which cooperative cancellation cannot interrupt).
                run.cancel_now_with_reason("Timeout").await;
                let _ = tokio::time::timeout(timeout, run.join()).await;
                Err(DpQueryError::Timeout("streamed query".to_string()))
            }
        }
    }

    /// Drives every worker via `run.join()` concurrently with draining
    /// `buffer` into a fresh Correlator. `run.join()` finishing with a
    /// transport error (e.g. the first response is exceptional, S7) takes
    /// precedence: the buffer has already been shut down by that point, so
    /// the drain side observes a clean `Closed` rather than its own error.
    async fn drain_and_join(
        &self,
        buffer: Arc<MessageBuffer<QueryData>>,
        run: &mut ChannelRun,
    ) -> Result<Box<dyn Table>, DpQueryError> {
        let correlator = Arc::new(Correlator::new(self.config.error_checking, self.config.concurrency));

        let drain = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                loop {
                    match buffer.take().await {
                        Ok(data) => correlator.ingest(data).await?,
                        Err(TransportError::Closed) => return Ok(()),
                        Err(err) => return Err(DpQueryError::from(err)),
                    }
                }
            })
        };

        let join_result = run.join().await;
        let drain_result = drain.await.expect("drain task panicked");

        join_result?;
        drain_result?;

        self.assemble(correlator).await
    }

    /// Returns a raw stream-buffer handle the caller drives itself, with no
    /// correlation performed (§4.8 "Raw stream"). Still single-flight: the
    /// facade's guard is held for the handle's lifetime.
    #[instrument(skip_all)]
    pub fn raw_stream(
        &self,
        request: DataRequest,
        max_parts: usize,
        buffer_capacity: usize,
    ) -> Result<RawStreamHandle, DpQueryError> {
        request.validate()?;
        if request.stream_mode == StreamMode::Unary {
            return Err(DpQueryError::InvalidStreamMode(format!("{:?}", request.stream_mode)));
        }

        let guard = self
            .single_flight
            .clone()
            .try_lock_owned()
            .map_err(|_| DpQueryError::InvalidRequest("a streaming call is already in flight on this facade".to_string()))?;

        let channel = Channel::new(self.transport.clone(), self.config.concurrency.max_threads);
        let run = channel.spawn(request, max_parts, buffer_capacity);
        Ok(RawStreamHandle {
            run,
            _single_flight: guard,
        })
    }

    /// C4 (finish) → C5 → C6 per domain → C7 selection, in that order
    /// (§4.8's pipeline tail, shared by `unary` and `streamed`).
    #[instrument(skip_all)]
    async fn assemble(&self, correlator: Arc<Correlator>) -> Result<Box<dyn Table>, DpQueryError> {
        let blocks = correlator.finish()?;
        let (disjoint, supers) = time_domain::partition(blocks);

        let mut domains: Vec<_> = disjoint
            .into_iter()
            .map(|block| SuperDomain::new(vec![block]).expect("single block forms a non-empty domain"))
            .collect();
        domains.extend(supers);
        // A domain made up entirely of zero-sample blocks has no enclosing
        // range at all; sort it first rather than panicking on it.
        domains.sort_by_key(|domain| domain.enclosing_range().map(|r| r.begin()));

        let materializer = Materializer::new(self.config.concurrency, self.config.allow_equal_duplicate_coalesce);
        let mut aggregate = Aggregate::new();
        for domain in domains {
            let sampled = materializer.materialize(domain).await?;
            aggregate.push(sampled)?;
        }

        info!(blocks = aggregate.len(), "assembled aggregate");
        Ok(table::select_table(aggregate, &self.config.table)?)
    }
}

/// A `Channel` fan-out the caller drives directly: no Correlator involved.
pub struct RawStreamHandle {
    run: ChannelRun,
    _single_flight: OwnedMutexGuard<()>,
}

impl RawStreamHandle {
    pub fn buffer(&self) -> Arc<MessageBuffer<QueryData>> {
        self.run.buffer()
    }

    pub async fn cancel_now(&self) {
        self.run.cancel_now().await;
    }

    pub async fn join(mut self) -> Result<(), TransportError> {
        self.run.join().await
    }
}
