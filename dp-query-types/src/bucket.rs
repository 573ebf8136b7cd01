use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::CorrelatorError, instant::Instant, pv_name::PvName, value::Value};

/// The timestamp basis of a Raw Bucket: either a uniform clock or an
/// explicit timestamp list.
///
/// Doubles as the **provenance key** (glossary) — two buckets share a
/// Correlated Block iff their `Provenance` compares equal, which for
/// `Clocked` means byte-equal clock parameters and for `TmsList` means a
/// byte-equal timestamp list. Deriving `Hash`/`Eq` structurally gives that
/// for free since `Instant`/`Duration`/`Vec<Instant>` are themselves
/// structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    Clocked {
        start: Instant,
        period: Duration,
        count: u64,
    },
    TmsList(Vec<Instant>),
}

impl Provenance {
    /// Builds a `Provenance` from the wire's optional clock/list fields
    /// (§4.4 item c). Neither field is a `Provenance` variant on its own in
    /// the wire payload — a Raw Bucket's timestamp basis is carried as two
    /// independent optional fields there, only one of which is expected to
    /// be populated. `source` is the owning bucket's PV name, used only to
    /// label the error.
    pub fn from_wire(
        source: &PvName,
        clock: Option<(Instant, Duration, u64)>,
        list: Option<Vec<Instant>>,
    ) -> Result<Self, CorrelatorError> {
        match (clock, list) {
            (Some((start, period, count)), _) => Ok(Provenance::Clocked { start, period, count }),
            (None, Some(ts)) => Ok(Provenance::TmsList(ts)),
            (None, None) => Err(CorrelatorError::UnsupportedProvenance {
                source_name: source.to_string(),
            }),
        }
    }

    pub fn sample_count(&self) -> usize {
        match self {
            Provenance::Clocked { count, .. } => *count as usize,
            Provenance::TmsList(ts) => ts.len(),
        }
    }

    /// The dense timestamp vector this provenance implies.
    pub fn timestamps(&self) -> Vec<Instant> {
        match self {
            Provenance::Clocked {
                start,
                period,
                count,
            } => (0..*count).map(|i| start.advanced_by(*period, i)).collect(),
            Provenance::TmsList(ts) => ts.clone(),
        }
    }

    pub fn time_range(&self) -> Option<(Instant, Instant)> {
        match self {
            Provenance::Clocked {
                start,
                period,
                count,
            } if *count > 0 => Some((*start, start.advanced_by(*period, count - 1))),
            Provenance::Clocked { .. } => None,
            Provenance::TmsList(ts) => Some((*ts.first()?, *ts.last()?)),
        }
    }
}

/// One column's samples for a contiguous time range, plus provenance.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBucket {
    pub source: PvName,
    pub provenance: Provenance,
    pub values: Vec<Value>,
}

impl RawBucket {
    pub fn new(source: PvName, provenance: Provenance, values: Vec<Value>) -> Self {
        Self {
            source,
            provenance,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocked_provenance_generates_uniform_timestamps() {
        let p = Provenance::Clocked {
            start: Instant::from_nanos(1_000),
            period: Duration::from_nanos(1_000),
            count: 3,
        };
        assert_eq!(
            p.timestamps(),
            vec![
                Instant::from_nanos(1_000),
                Instant::from_nanos(2_000),
                Instant::from_nanos(3_000),
            ]
        );
        assert_eq!(
            p.time_range(),
            Some((Instant::from_nanos(1_000), Instant::from_nanos(3_000)))
        );
    }

    #[test]
    fn tms_list_provenance_is_the_list_itself() {
        let ts = vec![Instant::from_nanos(5), Instant::from_nanos(9)];
        let p = Provenance::TmsList(ts.clone());
        assert_eq!(p.timestamps(), ts);
        assert_eq!(p.sample_count(), 2);
    }

    #[test]
    fn wire_bucket_with_neither_clock_nor_list_is_unsupported() {
        let source = PvName::new("A").unwrap();
        let err = Provenance::from_wire(&source, None, None).unwrap_err();
        assert!(matches!(err, CorrelatorError::UnsupportedProvenance { .. }));
    }

    #[test]
    fn byte_equal_clock_params_are_the_same_provenance_key() {
        let a = Provenance::Clocked {
            start: Instant::from_nanos(0),
            period: Duration::from_nanos(10),
            count: 5,
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
