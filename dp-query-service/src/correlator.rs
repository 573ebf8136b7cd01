use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use dashmap::{mapref::entry::Entry, DashMap};
use dp_query_types::{ConcurrencyConfig, CorrelatedBlock, CorrelatorError, Provenance, QueryData, RawBucket};
use tokio::task::JoinSet;
use tracing::instrument;

/// Transforms a stream of response-data messages into a sorted set of
/// Correlated Blocks (C4).
///
/// The provenance-keyed map is the one piece of shared mutable state in the
/// pipeline (§5): `DashMap` gives lock-free reads and per-shard locking for
/// the get-or-create, and a `std::sync::Mutex` around each block serializes
/// insertion into that single block without blocking unrelated provenances.
pub struct Correlator {
    blocks: DashMap<Provenance, Mutex<CorrelatedBlock>>,
    next_creation_index: AtomicU64,
    processed_bytes: AtomicU64,
    error_checking: bool,
    concurrency: ConcurrencyConfig,
}

impl Correlator {
    pub fn new(error_checking: bool, concurrency: ConcurrencyConfig) -> Self {
        Self {
            blocks: DashMap::new(),
            next_creation_index: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            error_checking,
            concurrency,
        }
    }

    /// Ingests every Raw Bucket of one response message. Above
    /// `concurrency.pivot_size` buckets (and with `concurrency.enabled`),
    /// insertions fan out across a `JoinSet`; below it, insertion runs
    /// inline. Either way, insertion *into* a given block is always
    /// serialized via that block's own mutex.
    #[instrument(skip_all, fields(buckets = data.buckets.len()))]
    pub async fn ingest(self: &Arc<Self>, data: QueryData) -> Result<(), CorrelatorError> {
        for bucket in &data.buckets {
            self.processed_bytes.fetch_add(estimate_bytes(bucket), Ordering::Relaxed);
        }

        if self.concurrency.enabled && data.buckets.len() >= self.concurrency.pivot_size {
            let mut tasks = JoinSet::new();
            for bucket in data.buckets {
                let this = self.clone();
                tasks.spawn(async move { this.insert_one(bucket) });
            }
            let mut first_error = None;
            while let Some(outcome) = tasks.join_next().await {
                if let Err(err) = outcome.expect("correlator insertion task panicked") {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
            first_error.map_or(Ok(()), Err)
        } else {
            for bucket in data.buckets {
                self.insert_one(bucket)?;
            }
            Ok(())
        }
    }

    /// Atomic get-or-create on the provenance key (glossary: provenance
    /// key), then a checked or unchecked append depending on
    /// `data.errorChecking` (§4.4).
    fn insert_one(&self, bucket: RawBucket) -> Result<(), CorrelatorError> {
        match self.blocks.entry(bucket.provenance.clone()) {
            Entry::Occupied(entry) => {
                let mut block = entry.get().lock().expect("correlated block mutex poisoned");
                if self.error_checking {
                    block.try_insert(bucket)
                } else {
                    block.insert_unchecked(bucket);
                    Ok(())
                }
            }
            Entry::Vacant(entry) => {
                let index = self.next_creation_index.fetch_add(1, Ordering::SeqCst);
                entry.insert(Mutex::new(CorrelatedBlock::from_bucket(bucket, index)));
                Ok(())
            }
        }
    }

    /// Drains the current state into a sorted `Vec<CorrelatedBlock>` and
    /// resets the instance (§4.4's reset contract) so it can be reused for
    /// the next request. When `error_checking` is on, also verifies the
    /// output is strictly increasing by start time (`BadOrdering`).
    #[instrument(skip_all)]
    pub fn finish(&self) -> Result<Vec<CorrelatedBlock>, CorrelatorError> {
        let mut blocks: Vec<CorrelatedBlock> = self
            .blocks
            .iter()
            .map(|entry| entry.value().lock().expect("correlated block mutex poisoned").clone())
            .collect();
        blocks.sort();

        if self.error_checking {
            for index in 1..blocks.len() {
                if blocks[index].start() <= blocks[index - 1].start() {
                    self.reset();
                    return Err(CorrelatorError::BadOrdering { index });
                }
            }
        }

        self.reset();
        Ok(blocks)
    }

    /// Clears internal state and zeroes the processed-bytes counter. Called
    /// automatically by `finish`; exposed so a caller can discard
    /// in-progress state without emitting an output set (e.g. on
    /// cancellation).
    pub fn reset(&self) {
        self.blocks.clear();
        self.processed_bytes.store(0, Ordering::SeqCst);
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }
}

fn estimate_bytes(bucket: &RawBucket) -> u64 {
    (bucket.source.as_str().len() + bucket.values.len() * 8) as u64
}
