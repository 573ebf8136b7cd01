use serde::{Deserialize, Serialize};

use crate::{
    bucket::RawBucket, error::DpQueryError, instant::Instant, interval::TimeInterval,
    pv_name::PvName,
};

/// Preferred stream mode for a `DataRequest` (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    Unary,
    ServerStream,
    BidiStream,
}

/// A user-level data request (§6.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Opaque, caller-assigned id; not interpreted by this crate.
    pub request_id: Option<String>,
    pub stream_mode: StreamMode,
    pub range: TimeInterval,
    pub pv_names: Vec<PvName>,
}

impl DataRequest {
    pub fn new(
        request_id: Option<String>,
        stream_mode: StreamMode,
        range: TimeInterval,
        pv_names: Vec<PvName>,
    ) -> Result<Self, DpQueryError> {
        let request = Self {
            request_id,
            stream_mode,
            range,
            pv_names,
        };
        request.validate()?;
        Ok(request)
    }

    /// Builds a request from a raw `(begin, end)` pair instead of an
    /// already-validated `TimeInterval`, the entry point a caller deserializing
    /// a request off the wire actually has available. An inverted range
    /// (`end < begin`) is rejected here with `InvalidRange` rather than
    /// silently rounding or panicking.
    pub fn from_bounds(
        request_id: Option<String>,
        stream_mode: StreamMode,
        begin: Instant,
        end: Instant,
        pv_names: Vec<PvName>,
    ) -> Result<Self, DpQueryError> {
        let range = TimeInterval::new(begin, end).ok_or(DpQueryError::InvalidRange)?;
        Self::new(request_id, stream_mode, range, pv_names)
    }

    pub fn validate(&self) -> Result<(), DpQueryError> {
        if self.pv_names.is_empty() {
            return Err(DpQueryError::EmptyRequest);
        }
        Ok(())
    }

    /// Splits this request into up to `max_parts` sub-requests by PV name,
    /// the client-supplied decomposition the Channel (C3) fans out across
    /// Stream Workers. A single request with `max_parts == 1` (or fewer PVs
    /// than `max_parts`) is returned unchanged.
    pub fn decompose(&self, max_parts: usize) -> Vec<DataRequest> {
        let max_parts = max_parts.max(1).min(self.pv_names.len().max(1));
        if max_parts <= 1 || self.pv_names.len() <= 1 {
            return vec![self.clone()];
        }
        let chunk_size = self.pv_names.len().div_ceil(max_parts);
        self.pv_names
            .chunks(chunk_size)
            .map(|chunk| DataRequest {
                request_id: self.request_id.clone(),
                stream_mode: self.stream_mode,
                range: self.range,
                pv_names: chunk.to_vec(),
            })
            .collect()
    }
}

/// `code`/`message` pair carried by an exceptional server response (§6.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionalResult {
    pub code: String,
    pub message: String,
}

/// One or more Raw Buckets, as carried by a successful response (§6.1).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryData {
    pub buckets: Vec<RawBucket>,
}

/// A single message received over the wire: either data or an exceptional
/// result (§6.1). The RPC transport/codec that produces these is an
/// external collaborator — this type is the seam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Data(QueryData),
    Exceptional(ExceptionalResult),
}

#[cfg(test)]
mod tests {
    use crate::instant::Instant;

    use super::*;

    fn pv(name: &str) -> PvName {
        PvName::new(name).unwrap()
    }

    fn range() -> TimeInterval {
        TimeInterval::new(Instant::from_nanos(0), Instant::from_nanos(100)).unwrap()
    }

    #[test]
    fn empty_pv_list_is_invalid() {
        let err = DataRequest::new(None, StreamMode::Unary, range(), vec![]).unwrap_err();
        assert_eq!(err, DpQueryError::EmptyRequest);
    }

    #[test]
    fn inverted_range_is_invalid() {
        let err = DataRequest::from_bounds(
            None,
            StreamMode::Unary,
            Instant::from_nanos(100),
            Instant::from_nanos(0),
            vec![pv("A")],
        )
        .unwrap_err();
        assert_eq!(err, DpQueryError::InvalidRange);
    }

    #[test]
    fn decompose_splits_into_at_most_max_parts_chunks() {
        let req = DataRequest::new(
            None,
            StreamMode::ServerStream,
            range(),
            vec![pv("A"), pv("B"), pv("C"), pv("D"), pv("E")],
        )
        .unwrap();
        let parts = req.decompose(2);
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts.iter().map(|p| p.pv_names.len()).sum::<usize>(),
            5
        );
    }

    #[test]
    fn decompose_is_identity_for_a_single_part() {
        let req = DataRequest::new(None, StreamMode::Unary, range(), vec![pv("A"), pv("B")]).unwrap();
        let parts = req.decompose(1);
        assert_eq!(parts, vec![req]);
    }
}
