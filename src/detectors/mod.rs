//! Event detectors: gap, feed-outage, spoofing, loitering, STS, convoy,
//! draught, MMSI-cloning. Each exposes a `detect(db, range, config) ->
//! Result<Stats>` entry point per §4.2's shared contract. Every insert goes
//! through an `INSERT OR IGNORE` natural-key dedup in `db::events`, so
//! re-running a detector over the same window is a no-op the second time.
//!
//! Detectors run sequentially within a pipeline run (§5) — no intra-detector
//! parallelism is assumed, and every detector must be commutative with
//! respect to vessel iteration order.

pub mod convoy;
pub mod draught;
pub mod feed_outage;
pub mod gap;
pub mod loitering;
pub mod mmsi_cloning;
pub mod spoofing;
pub mod sts;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detector run statistics — the `Stats` half of §4.2's `Detect(ctx, db,
/// dateRange, config) -> Stats` contract.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Stats {
    pub candidates_examined: u64,
    pub events_inserted: u64,
    pub vessels_scanned: u64,
}

impl Stats {
    pub fn merge(&mut self, other: &Stats) {
        self.candidates_examined += other.candidates_examined;
        self.events_inserted += other.events_inserted;
        self.vessels_scanned += other.vessels_scanned;
    }

    pub(crate) fn record(&mut self, inserted: Option<i64>) {
        self.candidates_examined += 1;
        if inserted.is_some() {
            self.events_inserted += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}
