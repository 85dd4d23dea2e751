//! AIS position repository. Positions are unique per (vessel, timestamp);
//! duplicate inserts are dropped rather than erroring, per §3.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;
use crate::models::{AisClass, AisObservation, AisPosition};

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<AisPosition> {
    let ts: String = row.get("timestamp_utc")?;
    let ais_class: String = row.get("ais_class")?;
    Ok(AisPosition {
        position_id: row.get("position_id")?,
        vessel_id: row.get("vessel_id")?,
        timestamp_utc: chrono::DateTime::parse_from_rfc3339(&ts)
            .unwrap()
            .with_timezone(&Utc),
        lat: row.get("lat")?,
        lon: row.get("lon")?,
        sog_kn: row.get("sog_kn")?,
        cog_deg: row.get("cog_deg")?,
        heading_deg: row.get("heading_deg")?,
        nav_status: row.get("nav_status")?,
        draught_m: row.get("draught_m")?,
        destination: row.get("destination")?,
        ais_class: match ais_class.as_str() {
            "a" | "A" => AisClass::A,
            "b" | "B" => AisClass::B,
            _ => AisClass::Unknown,
        },
        source: row.get("source")?,
    })
}

impl Database {
    /// Inserts a position; returns `None` if it was a duplicate of an
    /// existing (vessel_id, timestamp_utc) row (dropped, not an error).
    #[allow(clippy::too_many_arguments)]
    pub fn insert_position(
        &self,
        vessel_id: i64,
        ts: DateTime<Utc>,
        lat: f64,
        lon: f64,
        sog_kn: Option<f64>,
        cog_deg: Option<f64>,
        heading_deg: Option<f64>,
        nav_status: Option<i32>,
        draught_m: Option<f64>,
        destination: Option<&str>,
        ais_class: AisClass,
        source: &str,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let class_str = match ais_class {
            AisClass::A => "a",
            AisClass::B => "b",
            AisClass::Unknown => "unknown",
        };
        let changed = conn.execute(
            "INSERT OR IGNORE INTO ais_positions
                (vessel_id, timestamp_utc, lat, lon, sog_kn, cog_deg, heading_deg,
                 nav_status, draught_m, destination, ais_class, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                vessel_id,
                ts.to_rfc3339(),
                lat,
                lon,
                sog_kn,
                cog_deg,
                heading_deg,
                nav_status,
                draught_m,
                destination,
                class_str,
                source
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    /// All positions for a vessel within [from, to], in timestamp order —
    /// every detector's iteration order guarantee.
    pub fn positions_in_range(
        &self,
        vessel_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AisPosition>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ais_positions
             WHERE vessel_id = ?1 AND timestamp_utc >= ?2 AND timestamp_utc <= ?3
             ORDER BY timestamp_utc ASC",
        )?;
        let rows = stmt
            .query_map(
                params![vessel_id, from.to_rfc3339(), to.to_rfc3339()],
                row_to_position,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every vessel with at least one position in [from, to] — the universe
    /// a pipeline run's detectors iterate over.
    pub fn vessel_ids_with_positions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT vessel_id FROM ais_positions
             WHERE timestamp_utc >= ?1 AND timestamp_utc <= ?2
             ORDER BY vessel_id ASC",
        )?;
        let ids = stmt
            .query_map(params![from.to_rfc3339(), to.to_rfc3339()], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// A single position by its primary key — used to look up the draught
    /// readings bracketing an AIS gap for the "straddles-gap" sub-check.
    pub fn position_by_id(&self, position_id: i64) -> Result<Option<AisPosition>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM ais_positions WHERE position_id = ?1")?;
        Ok(stmt
            .query_row(params![position_id], row_to_position)
            .optional()?)
    }

    /// Most recent N positions for a vessel, newest first — used by the
    /// Arctic no-ice-class and destination-deviation sub-detectors.
    pub fn recent_positions(&self, vessel_id: i64, limit: i64) -> Result<Vec<AisPosition>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ais_positions WHERE vessel_id = ?1
             ORDER BY timestamp_utc DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![vessel_id, limit], row_to_position)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records one receiver's raw sighting of an MMSI at a timestamp. Unlike
    /// `ais_positions` (one canonical row per vessel/timestamp after
    /// dedup/merge), `ais_observations` keeps every receiving source's claim
    /// side by side so the cross-receiver-disagreement detector can compare
    /// them — a short-retention table, purged by `purge_observations_before`.
    pub fn insert_observation(
        &self,
        mmsi: &str,
        ts: DateTime<Utc>,
        source: &str,
        lat: f64,
        lon: f64,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO ais_observations
                (mmsi, timestamp_utc, source, lat, lon, received_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![mmsi, ts.to_rfc3339(), source, lat, lon, received_at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// All receivers' observations of an MMSI within a timestamp window,
    /// ordered by timestamp then source — the cross-receiver-disagreement
    /// detector groups these by timestamp to compare simultaneous claims.
    pub fn observations_in_range(
        &self,
        mmsi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AisObservation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT mmsi, timestamp_utc, source, lat, lon, received_utc FROM ais_observations
             WHERE mmsi = ?1 AND timestamp_utc >= ?2 AND timestamp_utc <= ?3
             ORDER BY timestamp_utc ASC, source ASC",
        )?;
        let rows = stmt
            .query_map(params![mmsi, from.to_rfc3339(), to.to_rfc3339()], row_to_observation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<AisObservation> {
    let ts: String = row.get("timestamp_utc")?;
    let received: String = row.get("received_utc")?;
    Ok(AisObservation {
        mmsi: row.get("mmsi")?,
        timestamp_utc: chrono::DateTime::parse_from_rfc3339(&ts)
            .unwrap()
            .with_timezone(&Utc),
        source: row.get("source")?,
        lat: row.get("lat")?,
        lon: row.get("lon")?,
        received_utc: chrono::DateTime::parse_from_rfc3339(&received)
            .unwrap()
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlagRisk;
    use chrono::TimeZone;

    #[test]
    fn duplicate_position_is_dropped_not_errored() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let first = db
            .insert_position(vid, ts, 1.0, 2.0, Some(5.0), None, None, None, None, None, AisClass::A, "test")
            .unwrap();
        let second = db
            .insert_position(vid, ts, 1.0, 2.0, Some(5.0), None, None, None, None, None, AisClass::A, "test")
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn duplicate_observation_from_same_source_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let first = db.insert_observation("209010000", ts, "terrestrial-a", 1.0, 2.0, ts).unwrap();
        let second = db.insert_observation("209010000", ts, "terrestrial-a", 1.0, 2.0, ts).unwrap();
        assert!(first);
        assert!(!second);
        let obs = db.observations_in_range("209010000", ts, ts).unwrap();
        assert_eq!(obs.len(), 1);
    }

    #[test]
    fn observations_from_distinct_sources_both_kept() {
        let db = Database::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_observation("209010000", ts, "terrestrial-a", 1.0, 2.0, ts).unwrap();
        db.insert_observation("209010000", ts, "satellite-b", 5.0, 6.0, ts).unwrap();
        let obs = db.observations_in_range("209010000", ts, ts).unwrap();
        assert_eq!(obs.len(), 2);
    }

    #[test]
    fn positions_in_range_ordered_by_time() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        db.insert_position(vid, t1, 1.0, 2.0, None, None, None, None, None, None, AisClass::A, "t").unwrap();
        db.insert_position(vid, t0, 1.0, 2.0, None, None, None, None, None, None, AisClass::A, "t").unwrap();
        let positions = db.positions_in_range(vid, t0, t1).unwrap();
        assert_eq!(positions.len(), 2);
        assert!(positions[0].timestamp_utc < positions[1].timestamp_utc);
    }
}
