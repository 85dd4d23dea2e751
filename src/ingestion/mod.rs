//! AIS ingestion and normalization: push-style streaming sessions and
//! pull-style batch ingest, both funneling through `normalize` before
//! touching the database. See SPEC_FULL.md §4.1.

pub mod batch;
pub mod normalize;
pub mod stream;
pub mod watchlist;

use serde::{Deserialize, Serialize};

/// Result of an `IngestBatch` call — §4.1's contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub stored: u64,
    pub vessels_updated: u64,
    pub duplicates_skipped: u64,
    pub errors: u64,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.stored += other.stored;
        self.vessels_updated += other.vessels_updated;
        self.duplicates_skipped += other.duplicates_skipped;
        self.errors += other.errors;
    }
}

/// A single pull-style batch record, shaped the way §6's AIS stream message
/// is shaped but flattened for use across the GeoJSON/CSV/protocol-specific
/// batch formats §4.1 names. The batch ingest path accepts whichever of
/// `ShipStaticData`'s fields the upstream row carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPositionRecord {
    pub mmsi: String,
    pub time_utc: String,
    pub lat: f64,
    pub lon: f64,
    pub sog_kn: Option<f64>,
    pub cog_deg: Option<f64>,
    pub heading_deg: Option<f64>,
    pub nav_status: Option<i32>,
    pub draught_m: Option<f64>,
    pub destination: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStaticRecord {
    pub mmsi: String,
    pub imo: Option<String>,
    pub name: Option<String>,
    pub callsign: Option<String>,
    pub vessel_type: Option<String>,
    pub length_m: Option<f64>,
    pub width_m: Option<f64>,
}
