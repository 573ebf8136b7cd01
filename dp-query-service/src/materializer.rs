use std::collections::BTreeMap;

use dp_query_types::{
    ConcurrencyConfig, CorrelatedBlock, Instant, MaterializeError, PvName, SampledBlock, SupportedType,
    SuperDomain, Value,
};
use indexmap::IndexMap;
use tokio::task::JoinSet;
use tracing::instrument;

/// Builds one Sampled Block from a Super Domain (§4.6).
pub struct Materializer {
    concurrency: ConcurrencyConfig,
    allow_equal_duplicate_coalesce: bool,
}

impl Materializer {
    pub fn new(concurrency: ConcurrencyConfig, allow_equal_duplicate_coalesce: bool) -> Self {
        Self {
            concurrency,
            allow_equal_duplicate_coalesce,
        }
    }

    #[instrument(skip_all)]
    pub async fn materialize(&self, domain: SuperDomain) -> Result<SampledBlock, MaterializeError> {
        let blocks = domain.into_blocks();

        // Step 1: PV union & type check, preserving first-seen order
        // ("cyclic lookup maps", design note §9).
        let pv_type = self.pv_union_and_check_types(&blocks)?;

        // Step 2: row assembly into a sorted map keyed by timestamp.
        let mut rows_by_ts: BTreeMap<Instant, IndexMap<PvName, Value>> = BTreeMap::new();
        for block in &blocks {
            let timestamps = block.timestamps();
            for source in block.sources() {
                let column = block.column(source).expect("source came from this block's own sources()");
                for (k, ts) in timestamps.iter().enumerate() {
                    let row = rows_by_ts.entry(*ts).or_default();
                    match row.get(source) {
                        None => {
                            row.insert(source.clone(), column[k].clone());
                        }
                        Some(existing) => {
                            let contributed = &column[k];
                            if self.allow_equal_duplicate_coalesce && existing == contributed {
                                // Same value contributed twice for the same (ts, pv): coalesce.
                            } else {
                                return Err(MaterializeError::DuplicateCell {
                                    timestamp: *ts,
                                    pv: source.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        // Step 3: phantom fill, one PV's column per task when parallelism is
        // enabled for this many cells.
        let timestamps: Vec<Instant> = rows_by_ts.keys().copied().collect();
        let pv_order: Vec<PvName> = pv_type.keys().cloned().collect();
        let row_count = timestamps.len();
        let col_count = pv_order.len();

        let mut rows: Vec<IndexMap<PvName, Value>> = rows_by_ts.into_values().collect();
        if self.concurrency.enabled && row_count * col_count >= self.concurrency.pivot_size {
            self.fill_phantoms_parallel(&mut rows, &pv_order).await;
        } else {
            fill_phantoms(&mut rows, &pv_order);
        }

        // Step 4: transpose to the dense N x M matrix.
        let values: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|mut row| pv_order.iter().map(|pv| row.shift_remove(pv).unwrap_or(Value::Absent)).collect())
            .collect();

        Ok(SampledBlock::new(timestamps, pv_order, pv_type, values))
    }

    fn pv_union_and_check_types(
        &self,
        blocks: &[CorrelatedBlock],
    ) -> Result<IndexMap<PvName, SupportedType>, MaterializeError> {
        let mut pv_type: IndexMap<PvName, SupportedType> = IndexMap::new();
        for block in blocks {
            for source in block.sources() {
                let column = block.column(source).expect("source came from this block's own sources()");
                // A Raw Bucket's column always carries concrete, typed
                // samples (`Value::Absent` only appears once materialization
                // itself introduces it); a zero-sample column has no type
                // evidence to contribute and is skipped here.
                let Some(observed) = column.first().and_then(Value::type_of) else {
                    continue;
                };
                match pv_type.get(source) {
                    None => {
                        pv_type.insert(source.clone(), observed);
                    }
                    Some(existing) if *existing != observed => {
                        return Err(MaterializeError::InconsistentType { pv: source.to_string() });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(pv_type)
    }

    async fn fill_phantoms_parallel(&self, rows: &mut [IndexMap<PvName, Value>], pv_order: &[PvName]) {
        // Each task owns a distinct PV's cells across every row — matching
        // the spec's "each PV's column of cells is touched by one worker".
        let mut tasks = JoinSet::new();
        for (col, pv) in pv_order.iter().enumerate() {
            let pv = pv.clone();
            let mut missing_rows: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| !row.contains_key(&pv))
                .map(|(i, _)| i)
                .collect();
            if missing_rows.is_empty() {
                continue;
            }
            missing_rows.shrink_to_fit();
            tasks.spawn(async move { (col, pv, missing_rows) });
        }

        let mut fills = Vec::new();
        while let Some(outcome) = tasks.join_next().await {
            fills.push(outcome.expect("phantom-fill task panicked"));
        }
        for (_, pv, missing_rows) in fills {
            for row_idx in missing_rows {
                rows[row_idx].insert(pv.clone(), Value::Absent);
            }
        }
    }
}

fn fill_phantoms(rows: &mut [IndexMap<PvName, Value>], pv_order: &[PvName]) {
    for row in rows.iter_mut() {
        for pv in pv_order {
            row.entry(pv.clone()).or_insert(Value::Absent);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dp_query_types::{Provenance, RawBucket};
    use pretty_assertions::assert_eq;

    use super::*;

    fn default_concurrency() -> ConcurrencyConfig {
        ConcurrencyConfig {
            enabled: false,
            max_threads: 1,
            pivot_size: 64,
        }
    }

    fn pv(name: &str) -> PvName {
        PvName::new(name).unwrap()
    }

    fn clocked_block(source: &str, start: i128, values: Vec<i64>, creation_index: u64) -> CorrelatedBlock {
        let count = values.len() as u64;
        let bucket = RawBucket::new(
            pv(source),
            Provenance::Clocked {
                start: Instant::from_nanos(start),
                period: Duration::from_nanos(1),
                count,
            },
            values.into_iter().map(Value::Int64).collect(),
        );
        CorrelatedBlock::from_bucket(bucket, creation_index)
    }

    #[tokio::test]
    async fn materializes_with_gap_scenario_s5() {
        let b1 = clocked_block("X", 0, vec![1, 2, 3], 0);
        let b2 = clocked_block("Y", 2, vec![40, 50, 60], 1);
        let domain = SuperDomain::new(vec![b1, b2]).unwrap();
        let materializer = Materializer::new(default_concurrency(), false);

        let sampled = materializer.materialize(domain).await.unwrap();

        assert_eq!(sampled.row_count(), 5);
        assert_eq!(sampled.column_count(), 2);
        let x = pv("X");
        let y = pv("Y");
        let row = |ts: i128| {
            let idx = sampled.timestamps().iter().position(|t| *t == Instant::from_nanos(ts)).unwrap();
            (
                sampled.cell(idx, sampled.column_index(&x).unwrap()).unwrap().clone(),
                sampled.cell(idx, sampled.column_index(&y).unwrap()).unwrap().clone(),
            )
        };
        assert_eq!(row(0), (Value::Int64(1), Value::Absent));
        assert_eq!(row(1), (Value::Int64(2), Value::Absent));
        assert_eq!(row(2), (Value::Int64(3), Value::Int64(40)));
        assert_eq!(row(3), (Value::Absent, Value::Int64(50)));
        assert_eq!(row(4), (Value::Absent, Value::Int64(60)));
    }

    #[tokio::test]
    async fn type_conflict_is_rejected_scenario_s6() {
        let f32_bucket = RawBucket::new(
            pv("T"),
            Provenance::Clocked {
                start: Instant::from_nanos(0),
                period: Duration::from_nanos(1),
                count: 1,
            },
            vec![Value::Float32(1.0)],
        );
        let b1 = CorrelatedBlock::from_bucket(f32_bucket, 0);
        let bucket2 = RawBucket::new(
            pv("T"),
            Provenance::Clocked {
                start: Instant::from_nanos(5),
                period: Duration::from_nanos(1),
                count: 1,
            },
            vec![Value::Float64(1.0)],
        );
        let b2 = CorrelatedBlock::from_bucket(bucket2, 1);
        let domain = SuperDomain::new(vec![b1, b2]).unwrap();
        let materializer = Materializer::new(default_concurrency(), false);

        let err = materializer.materialize(domain).await.unwrap_err();
        assert!(matches!(err, MaterializeError::InconsistentType { .. }));
    }

    #[tokio::test]
    async fn duplicate_cell_with_differing_values_fails_loud_by_default() {
        // Two clocked blocks whose non-prime periods align on one shared
        // timestamp for the same PV, contributing different values there.
        let b1 = clocked_block("A", 0, vec![1, 2], 0);
        let b2 = clocked_block("A", 1, vec![99, 100], 1);
        let domain = SuperDomain::new(vec![b1, b2]).unwrap();
        let materializer = Materializer::new(default_concurrency(), false);

        let err = materializer.materialize(domain).await.unwrap_err();
        assert!(matches!(err, MaterializeError::DuplicateCell { .. }));
    }

    #[tokio::test]
    async fn duplicate_cell_with_equal_values_coalesces_when_configured() {
        let b1 = clocked_block("A", 0, vec![1, 2], 0);
        let b2 = clocked_block("A", 1, vec![2, 3], 1);
        let domain = SuperDomain::new(vec![b1, b2]).unwrap();
        let materializer = Materializer::new(default_concurrency(), true);

        let sampled = materializer.materialize(domain).await.unwrap();
        assert_eq!(sampled.row_count(), 3);
    }
}
