use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unit for `TimeoutConfig::limit`, mirroring the `timeout.unit` recognized
/// option (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millis,
    Secs,
}

/// `timeout.limit` / `timeout.unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub limit: u64,
    pub unit: TimeUnit,
}

impl TimeoutConfig {
    pub fn as_duration(&self) -> Duration {
        match self.unit {
            TimeUnit::Millis => Duration::from_millis(self.limit),
            TimeUnit::Secs => Duration::from_secs(self.limit),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            limit: 30,
            unit: TimeUnit::Secs,
        }
    }
}

/// `logging.enabled` / `logging.level`. Governs whether this crate's stages
/// emit `tracing` events at all (some embeddings run with a subscriber that
/// would rather not see per-row diagnostics); it never installs a
/// subscriber itself (see `crate::logging`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

/// `concurrency.enabled` / `concurrency.maxThreads` / `concurrency.pivotSize`.
///
/// Supersedes the teacher-analogous source's second, parallel
/// `data.table.construction.concurrency.*` path (design note §9) — there is
/// exactly one concurrency configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub enabled: bool,
    pub max_threads: usize,
    pub pivot_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_threads: num_cpus(),
            pivot_size: 64,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// `table.static.isDefault` / `table.static.hasMaxSize` / `table.static.maxSize`
/// / `table.dynamic.enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub static_is_default: bool,
    pub static_has_max_size: bool,
    pub static_max_size: usize,
    pub dynamic_enable: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            static_is_default: true,
            static_has_max_size: false,
            static_max_size: 0,
            dynamic_enable: true,
        }
    }
}

/// The single configuration record captured at Query Facade construction
/// (§6.3). Consolidates what the teacher-analogous source kept as two
/// historical, overlapping configuration paths; nothing here reads
/// configuration mid-request (design note §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpQueryConfig {
    pub timeout: TimeoutConfig,
    pub logging: LoggingConfig,
    pub concurrency: ConcurrencyConfig,
    pub table: TableConfig,

    /// `data.errorChecking` — toggle the Correlator's verification passes.
    pub error_checking: bool,

    /// Resolution for the "duplicate (ts, pv) with equal values" open
    /// question (design note §9, SPEC_FULL.md §9): when `true`, the
    /// Materializer coalesces a duplicate contribution at the same `(ts,
    /// pv)` *only* if the two contributed values compare equal; any
    /// disagreement always fails loud with `DuplicateCell`, default `false`.
    pub allow_equal_duplicate_coalesce: bool,
}

impl Default for DpQueryConfig {
    fn default() -> Self {
        Self {
            timeout: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            table: TableConfig::default(),
            error_checking: true,
            allow_equal_duplicate_coalesce: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_prefers_static_table() {
        let config = DpQueryConfig::default();
        assert!(config.table.static_is_default);
        assert!(!config.table.static_has_max_size);
    }

    #[test]
    fn timeout_converts_units() {
        let millis = TimeoutConfig {
            limit: 500,
            unit: TimeUnit::Millis,
        };
        assert_eq!(millis.as_duration(), Duration::from_millis(500));
        let secs = TimeoutConfig {
            limit: 2,
            unit: TimeUnit::Secs,
        };
        assert_eq!(secs.as_duration(), Duration::from_secs(2));
    }
}
