use std::time::Duration;

use derive_more::{Add, Display, From, Sub};
use serde::{Deserialize, Serialize};

/// Absolute time with nanosecond resolution, counted from the Unix epoch.
///
/// `Instant` is deliberately not `std::time::Instant` (which is
/// monotonic-but-opaque and unsuitable for cross-process correlation of
/// sample timestamps) nor `chrono::DateTime` (more machinery than a single
/// `i128` nanosecond count needs).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, Sub, From, Display, Serialize, Deserialize,
)]
#[display("{_0}ns")]
pub struct Instant(i128);

impl Instant {
    pub const EPOCH: Instant = Instant(0);

    pub fn from_nanos(nanos: i128) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> i128 {
        self.0
    }

    /// `self + period * count`, used when deriving the timestamp vector of a
    /// uniform clock provenance.
    pub fn advanced_by(&self, period: Duration, count: u64) -> Self {
        Self(self.0 + period.as_nanos() as i128 * count as i128)
    }
}
