//! `IngestBatch` — the pull-style batch ingest contract from §4.1. A batch
//! attempts every row; an individual row's validation failure increments
//! `errors` and the batch continues, it never aborts the whole call.

use chrono::Utc;
use tracing::{instrument, warn};

use super::{normalize, IngestStats, RawPositionRecord, RawStaticRecord};
use crate::db::Database;
use crate::error::Result;
use crate::models::AisClass;

#[instrument(skip(db, records), fields(count = records.len()))]
pub fn ingest_position_batch(db: &Database, records: &[RawPositionRecord]) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let now = Utc::now();

    for record in records {
        match ingest_one_position(db, record, now) {
            Ok(Inserted::New) => stats.stored += 1,
            Ok(Inserted::Duplicate) => stats.duplicates_skipped += 1,
            Err(e) => {
                warn!(mmsi = %record.mmsi, error = %e, "dropping invalid position record");
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

#[instrument(skip(db, records), fields(count = records.len()))]
pub fn ingest_static_batch(db: &Database, records: &[RawStaticRecord]) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    for record in records {
        match ingest_one_static(db, record) {
            Ok(()) => stats.vessels_updated += 1,
            Err(e) => {
                warn!(mmsi = %record.mmsi, error = %e, "dropping invalid static-data record");
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

/// Runs both buffers of a streaming session (or a mixed pull batch) through
/// ingestion and merges the resulting stats — the shape `IngestBatch`
/// presents to callers per §4.1.
pub fn ingest_batch(
    db: &Database,
    positions: &[RawPositionRecord],
    statics: &[RawStaticRecord],
) -> Result<IngestStats> {
    let mut stats = ingest_position_batch(db, positions)?;
    let static_stats = ingest_static_batch(db, statics)?;
    stats.merge(&static_stats);
    Ok(stats)
}

enum Inserted {
    New,
    Duplicate,
}

fn ingest_one_position(
    db: &Database,
    record: &RawPositionRecord,
    now: chrono::DateTime<Utc>,
) -> Result<Inserted> {
    let mmsi = normalize::normalize_vessel_mmsi(&record.mmsi)?;
    normalize::validate_lat_lon(record.lat, record.lon)?;
    let ts = normalize::parse_timestamp_batch(&record.time_utc, now)?;
    let heading = normalize::normalize_heading(record.heading_deg);

    let flag = normalize::derive_flag(&mmsi);
    let flag_risk = normalize::flag_risk_for(flag);
    let vessel_id = db.upsert_vessel(&mmsi, flag, flag_risk)?;
    let canonical_id = db.resolve_canonical_vessel(vessel_id)?;

    let inserted = db.insert_position(
        canonical_id,
        ts,
        record.lat,
        record.lon,
        record.sog_kn,
        record.cog_deg,
        heading,
        record.nav_status,
        record.draught_m,
        record.destination.as_deref(),
        AisClass::Unknown,
        &record.source,
    )?;

    Ok(match inserted {
        Some(_) => Inserted::New,
        None => Inserted::Duplicate,
    })
}

fn ingest_one_static(db: &Database, record: &RawStaticRecord) -> Result<()> {
    let mmsi = normalize::normalize_vessel_mmsi(&record.mmsi)?;
    let flag = normalize::derive_flag(&mmsi);
    let flag_risk = normalize::flag_risk_for(flag);
    let vessel_id = db.upsert_vessel(&mmsi, flag, flag_risk)?;
    let canonical_id = db.resolve_canonical_vessel(vessel_id)?;
    db.update_vessel_static(
        canonical_id,
        record.imo.as_deref(),
        record.name.as_deref(),
        record.callsign.as_deref(),
        record.vessel_type.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mmsi: &str, time_utc: &str) -> RawPositionRecord {
        RawPositionRecord {
            mmsi: mmsi.into(),
            time_utc: time_utc.into(),
            lat: 10.0,
            lon: 20.0,
            sog_kn: Some(5.0),
            cog_deg: Some(90.0),
            heading_deg: Some(511.0),
            nav_status: Some(0),
            draught_m: None,
            destination: None,
            source: "test".into(),
        }
    }

    #[test]
    fn batch_continues_past_individual_failures() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let records = vec![
            position("209010000", &now.to_rfc3339()),
            position("not-a-number", &now.to_rfc3339()),
            position("111222333", &now.to_rfc3339()),
        ];
        let stats = ingest_position_batch(&db, &records).unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn duplicate_row_counted_not_errored() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let rec = position("209010000", &now.to_rfc3339());
        let records = vec![rec.clone(), rec];
        let stats = ingest_position_batch(&db, &records).unwrap();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn heading_511_stored_as_null() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let records = vec![position("209010000", &now.to_rfc3339())];
        ingest_position_batch(&db, &records).unwrap();
        let vessel = db.get_vessel_by_mmsi("209010000").unwrap().unwrap();
        let positions = db
            .positions_in_range(vessel.vessel_id, now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].heading_deg, None);
    }
}
