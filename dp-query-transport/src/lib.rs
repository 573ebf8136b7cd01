//! Bounded message buffer, Stream Workers and Channel fan-out (C1-C3): the
//! concurrency plumbing that sits between the wire and the Correlator.

pub mod buffer;
pub mod channel;
pub mod transport;
pub mod worker;

pub use buffer::MessageBuffer;
pub use channel::{Channel, ChannelRun};
pub use transport::{BidiSession, Cursor, ServerStream, WireTransport};
pub use worker::{ResultStatus, StreamWorker, WorkerHandle, WorkerPhase};
