//! Data model, error taxonomy, configuration and request surface for the
//! client-side query pipeline. No I/O lives here — see `dp-query-transport`
//! for the streaming plumbing and `dp-query-service` for the correlation
//! and materialization stages built on top of these types.

pub mod block;
pub mod bucket;
pub mod config;
pub mod error;
pub mod instant;
pub mod interval;
pub mod logging;
pub mod pv_name;
pub mod request;
pub mod value;

pub use block::{Aggregate, CorrelatedBlock, SampledBlock, SuperDomain};
pub use bucket::{Provenance, RawBucket};
pub use config::{ConcurrencyConfig, DpQueryConfig, LoggingConfig, TableConfig, TimeUnit, TimeoutConfig};
pub use error::{CorrelatorError, DpQueryError, MaterializeError, TableError, TransportError};
pub use instant::Instant;
pub use interval::TimeInterval;
pub use pv_name::PvName;
pub use request::{DataRequest, ExceptionalResult, QueryData, RpcResponse, StreamMode};
pub use value::{SupportedType, Value};
