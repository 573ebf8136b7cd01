use indexmap::IndexMap;

use crate::{
    bucket::{Provenance, RawBucket},
    error::CorrelatorError,
    instant::Instant,
    interval::TimeInterval,
    pv_name::PvName,
    value::{SupportedType, Value},
};

/// Set of columns sharing one provenance key (glossary).
///
/// Ordered by `(start, creation_index)` rather than `start` alone: two
/// blocks with the same start would otherwise compare equal under a plain
/// `start`-only `Ord`, and sorted containers (e.g. `BTreeSet`) silently drop
/// same-start siblings. `creation_index` is handed out by whichever
/// Correlator instance created the block, so it is a stable, monotonically
/// increasing tie-breaker rather than the source's original "never return
/// Equal" trick (design note §9), which is not a real total order.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedBlock {
    provenance: Provenance,
    columns: IndexMap<PvName, Vec<Value>>,
    creation_index: u64,
}

impl CorrelatedBlock {
    pub fn from_bucket(bucket: RawBucket, creation_index: u64) -> Self {
        let mut columns = IndexMap::new();
        columns.insert(bucket.source, bucket.values);
        Self {
            provenance: bucket.provenance,
            columns,
            creation_index,
        }
    }

    /// Appends `bucket`'s column, enforcing the block's remaining
    /// invariants: unique source name, column length matching the
    /// provenance's sample count. The caller (the Correlator's
    /// get-or-create lookup) is responsible for only ever calling this with
    /// a bucket whose provenance matches this block's — that part of the
    /// invariant is a programmer error, not a reportable `CorrelatorError`,
    /// if violated.
    pub fn try_insert(&mut self, bucket: RawBucket) -> Result<(), CorrelatorError> {
        debug_assert_eq!(
            bucket.provenance, self.provenance,
            "try_insert called with a bucket whose provenance doesn't match this block"
        );
        if self.columns.contains_key(&bucket.source) {
            return Err(CorrelatorError::DuplicateSource {
                source_name: bucket.source.to_string(),
            });
        }
        let expected = self.provenance.sample_count();
        if bucket.values.len() != expected {
            return Err(CorrelatorError::BadColumnSize {
                source_name: bucket.source.to_string(),
                expected,
                actual: bucket.values.len(),
            });
        }
        self.columns.insert(bucket.source, bucket.values);
        Ok(())
    }

    /// Appends `bucket`'s column without the `DuplicateSource`/
    /// `BadColumnSize` checks `try_insert` performs — used when
    /// `data.errorChecking` is configured off. A duplicate source
    /// overwrites the earlier column rather than erroring.
    pub fn insert_unchecked(&mut self, bucket: RawBucket) {
        debug_assert_eq!(
            bucket.provenance, self.provenance,
            "insert_unchecked called with a bucket whose provenance doesn't match this block"
        );
        self.columns.insert(bucket.source, bucket.values);
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn creation_index(&self) -> u64 {
        self.creation_index
    }

    pub fn sources(&self) -> impl Iterator<Item = &PvName> {
        self.columns.keys()
    }

    pub fn column(&self, source: &PvName) -> Option<&[Value]> {
        self.columns.get(source).map(Vec::as_slice)
    }

    pub fn timestamps(&self) -> Vec<Instant> {
        self.provenance.timestamps()
    }

    /// `[firstTimestamp, lastTimestamp]`. `None` for a zero-sample
    /// provenance (an empty `TmsList`, or a `Clocked` bucket with
    /// `count == 0`) — degenerate but spec-legal, since nothing upstream
    /// rejects an empty Raw Bucket arriving over the wire.
    pub fn time_range(&self) -> Option<TimeInterval> {
        let (begin, end) = self.provenance.time_range()?;
        Some(TimeInterval::new_unchecked(begin, end))
    }

    pub fn start(&self) -> Option<Instant> {
        self.time_range().map(|r| r.begin())
    }
}

impl PartialOrd for CorrelatedBlock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for CorrelatedBlock {}

impl Ord for CorrelatedBlock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start()
            .cmp(&other.start())
            .then(self.creation_index.cmp(&other.creation_index))
    }
}

/// Non-empty connected component under "time ranges intersect" (glossary).
#[derive(Debug, Clone, PartialEq)]
pub struct SuperDomain {
    blocks: Vec<CorrelatedBlock>,
}

impl SuperDomain {
    /// `None` if `blocks` is empty — a Super Domain is non-empty by
    /// definition. Connectivity of `blocks` under time-range intersection is
    /// the Time-Domain Processor's responsibility to establish before
    /// calling this constructor; it is not re-checked here.
    pub fn new(mut blocks: Vec<CorrelatedBlock>) -> Option<Self> {
        if blocks.is_empty() {
            return None;
        }
        blocks.sort();
        Some(Self { blocks })
    }

    pub fn blocks(&self) -> &[CorrelatedBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<CorrelatedBlock> {
        self.blocks
    }

    /// `[min(block.start), max(block.end)]` — not necessarily covered by the
    /// union of the member blocks' own ranges. `None` if every member is a
    /// zero-sample block with no range of its own (degenerate but
    /// spec-legal); a non-trivial domain with at least one intersecting pair
    /// always has at least one member with a range, since two `None` ranges
    /// never intersect.
    pub fn enclosing_range(&self) -> Option<TimeInterval> {
        self.blocks
            .iter()
            .filter_map(CorrelatedBlock::time_range)
            .reduce(|a, b| a.enclosing(&b))
    }
}

/// Dense materialization of one coherent time base: one timestamp vector,
/// one PV list, one `N x M` value matrix.
///
/// The three lookup views (ordered PV list, name→index, name→type) are all
/// derived from `pv_order` in a single pass at construction and treated as
/// immutable afterward (design note §9's "cyclic lookup maps").
#[derive(Debug, Clone, PartialEq)]
pub struct SampledBlock {
    timestamps: Vec<Instant>,
    pv_index: IndexMap<PvName, usize>,
    pv_type: IndexMap<PvName, SupportedType>,
    values: Vec<Vec<Value>>,
}

impl SampledBlock {
    /// `pv_order` gives the column order; `pv_type` must have an entry for
    /// every name in `pv_order`; `values[row].len() == pv_order.len()` for
    /// every row.
    pub fn new(
        timestamps: Vec<Instant>,
        pv_order: Vec<PvName>,
        pv_type: IndexMap<PvName, SupportedType>,
        values: Vec<Vec<Value>>,
    ) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        debug_assert!(values.iter().all(|row| row.len() == pv_order.len()));
        debug_assert!(pv_order.iter().all(|pv| pv_type.contains_key(pv)));

        let pv_index = pv_order
            .into_iter()
            .enumerate()
            .map(|(i, pv)| (pv, i))
            .collect();
        Self {
            timestamps,
            pv_index,
            pv_type,
            values,
        }
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column_count(&self) -> usize {
        self.pv_index.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &PvName> {
        self.pv_index.keys()
    }

    pub fn timestamps(&self) -> &[Instant] {
        &self.timestamps
    }

    pub fn time_range(&self) -> Option<TimeInterval> {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(&a), Some(&b)) => Some(TimeInterval::new_unchecked(a, b)),
            _ => None,
        }
    }

    pub fn has_column(&self, name: &PvName) -> bool {
        self.pv_index.contains_key(name)
    }

    pub fn column_index(&self, name: &PvName) -> Option<usize> {
        self.pv_index.get(name).copied()
    }

    pub fn column_type(&self, name: &PvName) -> Option<SupportedType> {
        self.pv_type.get(name).cloned()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.values.get(row)?.get(col)
    }

    pub fn column_by_index(&self, col: usize) -> Option<Vec<&Value>> {
        if col >= self.column_count() {
            return None;
        }
        Some(self.values.iter().map(|row| &row[col]).collect())
    }

    pub fn column_by_name(&self, name: &PvName) -> Option<Vec<&Value>> {
        self.column_by_index(self.column_index(name)?)
    }
}

/// Ordered sequence of Sampled Blocks with pairwise disjoint time ranges —
/// the final result of a request (glossary).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Aggregate {
    blocks: Vec<SampledBlock>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `block`, enforcing that it stays disjoint from and ordered
    /// after every block already present.
    pub fn push(&mut self, block: SampledBlock) -> Result<(), crate::error::TableError> {
        if let (Some(last), Some(incoming)) = (
            self.blocks.last().and_then(SampledBlock::time_range),
            block.time_range(),
        ) {
            if last.intersects(&incoming) || incoming.begin() < last.begin() {
                return Err(crate::error::TableError::NotRepresentable);
            }
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn blocks(&self) -> &[SampledBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}
