use async_trait::async_trait;
use dp_query_types::{DataRequest, RpcResponse};

/// Cursor acknowledgement sent by a bidirectional Stream Worker after each
/// response it receives (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Next,
    Finish,
}

/// One receive handle for a server-streaming RPC: repeated calls to `recv`
/// yield successive responses until the stream closes (`Ok(None)`).
#[async_trait]
pub trait ServerStream: Send {
    async fn recv(&mut self) -> anyhow::Result<Option<RpcResponse>>;
}

/// One session of a bidirectional cursor-driven RPC: `recv` yields the next
/// response, `ack` sends the `NEXT`/`FINISH` cursor message on the forward
/// channel.
#[async_trait]
pub trait BidiSession: Send {
    async fn recv(&mut self) -> anyhow::Result<Option<RpcResponse>>;
    async fn ack(&mut self, cursor: Cursor) -> anyhow::Result<()>;
}

/// The RPC layer this crate assumes but does not define (§6.1): a single
/// wire dependency exposing unary, server-streaming and bidirectional
/// cursor-streaming operations. An upstream wires a concrete gRPC (or
/// other) client to this trait; everything in `dp-query-transport` and
/// `dp-query-service` is generic over it.
///
/// Mirrors the shape of the teacher's `Request`/`Response` trait pair
/// (`request-response/src/request.rs`): the protocol logic never names a
/// concrete wire type.
#[async_trait]
pub trait WireTransport: Send + Sync {
    async fn unary_query(&self, request: &DataRequest) -> anyhow::Result<RpcResponse>;

    async fn server_stream(&self, request: &DataRequest) -> anyhow::Result<Box<dyn ServerStream>>;

    async fn bidi_stream(&self, request: &DataRequest) -> anyhow::Result<Box<dyn BidiSession>>;
}
