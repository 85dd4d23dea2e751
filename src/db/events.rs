//! Repositories for corridors, dark zones, detector-produced events, merge
//! records, ownership, fingerprints, evidence cards, and pipeline runs.
//!
//! Each `insert_*` follows the natural-key dedup contract §4.2 requires of
//! detectors: `INSERT OR IGNORE` against a `UNIQUE` constraint on the
//! natural key, so re-running a detector over the same window is a no-op
//! on the second pass.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;
use crate::geo::BoundingBox;
use crate::models::*;

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn corridor_type_str(t: CorridorType) -> &'static str {
    match t {
        CorridorType::ExportRoute => "export_route",
        CorridorType::StsZone => "sts_zone",
        CorridorType::AnchorageHolding => "anchorage_holding",
        CorridorType::DarkZone => "dark_zone",
        CorridorType::Other => "other",
    }
}

fn parse_corridor_type(s: &str) -> CorridorType {
    match s {
        "export_route" => CorridorType::ExportRoute,
        "sts_zone" => CorridorType::StsZone,
        "anchorage_holding" => CorridorType::AnchorageHolding,
        "dark_zone" => CorridorType::DarkZone,
        _ => CorridorType::Other,
    }
}

fn row_to_corridor(row: &rusqlite::Row) -> rusqlite::Result<Corridor> {
    let corridor_type: String = row.get("corridor_type")?;
    let tags: Option<String> = row.get("tags")?;
    Ok(Corridor {
        corridor_id: row.get("corridor_id")?,
        name: row.get("name")?,
        corridor_type: parse_corridor_type(&corridor_type),
        bbox: BoundingBox {
            min_lat: row.get("min_lat")?,
            max_lat: row.get("max_lat")?,
            min_lon: row.get("min_lon")?,
            max_lon: row.get("max_lon")?,
        },
        risk_weight: row.get("risk_weight")?,
        is_jamming_zone: row.get::<_, i64>("is_jamming_zone")? != 0,
        tags: tags
            .map(|t| serde_json::from_str(&t).unwrap_or_default())
            .unwrap_or_default(),
    })
}

impl Database {
    // --- corridors / dark zones -------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_corridor(
        &self,
        name: &str,
        corridor_type: CorridorType,
        bbox: BoundingBox,
        risk_weight: f64,
        is_jamming_zone: bool,
        tags: &[String],
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO corridors
                (name, corridor_type, min_lat, max_lat, min_lon, max_lon, risk_weight, is_jamming_zone, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                name,
                corridor_type_str(corridor_type),
                bbox.min_lat,
                bbox.max_lat,
                bbox.min_lon,
                bbox.max_lon,
                risk_weight,
                is_jamming_zone as i64,
                serde_json::to_string(tags).unwrap_or_default(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn all_corridors(&self) -> Result<Vec<Corridor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM corridors")?;
        let rows = stmt
            .query_map([], row_to_corridor)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_corridor(&self, corridor_id: i64) -> Result<Option<Corridor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM corridors WHERE corridor_id = ?1")?;
        Ok(stmt.query_row(params![corridor_id], row_to_corridor).optional()?)
    }

    /// Corridors whose bounding box intersects `(lat, lon)` within
    /// `tolerance_deg` on every edge — the gap detector's corridor
    /// assignment rule.
    pub fn corridors_containing(
        &self,
        lat: f64,
        lon: f64,
        tolerance_deg: f64,
    ) -> Result<Vec<Corridor>> {
        Ok(self
            .all_corridors()?
            .into_iter()
            .filter(|c| c.bbox.contains_with_tolerance(lat, lon, tolerance_deg))
            .collect())
    }

    pub fn insert_dark_zone(&self, name: &str, bbox: BoundingBox) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dark_zones (name, min_lat, max_lat, min_lon, max_lon) VALUES (?1,?2,?3,?4,?5)",
            params![name, bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn all_dark_zones(&self) -> Result<Vec<DarkZone>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM dark_zones")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DarkZone {
                    dark_zone_id: row.get("dark_zone_id")?,
                    name: row.get("name")?,
                    bbox: BoundingBox {
                        min_lat: row.get("min_lat")?,
                        max_lat: row.get("max_lat")?,
                        min_lon: row.get("min_lon")?,
                        max_lon: row.get("max_lon")?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn in_dark_zone(&self, lat: f64, lon: f64, tolerance_deg: f64) -> Result<bool> {
        Ok(self
            .all_dark_zones()?
            .iter()
            .any(|z| z.bbox.contains_with_tolerance(lat, lon, tolerance_deg)))
    }

    // --- AIS gap events ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_gap_event(
        &self,
        vessel_id: i64,
        start_point_id: i64,
        end_point_id: i64,
        gap_start_utc: DateTime<Utc>,
        gap_end_utc: DateTime<Utc>,
        pre_gap_sog_kn: Option<f64>,
        actual_gap_distance_nm: f64,
        max_plausible_distance_nm: f64,
        impossible_speed_flag: bool,
        velocity_plausibility_ratio: f64,
        corridor_id: Option<i64>,
        in_dark_zone: bool,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let duration_minutes = (gap_end_utc - gap_start_utc).num_seconds() as f64 / 60.0;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO ais_gap_events
                (vessel_id, start_point_id, end_point_id, gap_start_utc, gap_end_utc,
                 duration_minutes, pre_gap_sog_kn, actual_gap_distance_nm,
                 max_plausible_distance_nm, impossible_speed_flag,
                 velocity_plausibility_ratio, corridor_id, in_dark_zone)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                vessel_id,
                start_point_id,
                end_point_id,
                to_rfc3339(gap_start_utc),
                to_rfc3339(gap_end_utc),
                duration_minutes,
                pre_gap_sog_kn,
                actual_gap_distance_nm,
                max_plausible_distance_nm,
                impossible_speed_flag as i64,
                velocity_plausibility_ratio,
                corridor_id,
                in_dark_zone as i64,
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn gap_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AisGapEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ais_gap_events WHERE gap_start_utc >= ?1 AND gap_start_utc <= ?2
             ORDER BY gap_start_utc ASC",
        )?;
        let rows = stmt
            .query_map(params![to_rfc3339(from), to_rfc3339(to)], row_to_gap_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_gap_event(&self, gap_event_id: i64) -> Result<Option<AisGapEvent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM ais_gap_events WHERE gap_event_id = ?1")?;
        Ok(stmt
            .query_row(params![gap_event_id], row_to_gap_event)
            .optional()?)
    }

    pub fn set_gap_feed_outage(&self, gap_event_id: i64, is_feed_outage: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ais_gap_events SET is_feed_outage = ?1 WHERE gap_event_id = ?2",
            params![is_feed_outage as i64, gap_event_id],
        )?;
        Ok(())
    }

    pub fn set_gap_coverage_quality(&self, gap_event_id: i64, quality: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ais_gap_events SET coverage_quality = ?1 WHERE gap_event_id = ?2",
            params![quality, gap_event_id],
        )?;
        Ok(())
    }

    pub fn set_gap_score(
        &self,
        gap_event_id: i64,
        score: i32,
        breakdown: &std::collections::HashMap<String, i32>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ais_gap_events SET risk_score = ?1, risk_breakdown_json = ?2 WHERE gap_event_id = ?3",
            params![score, serde_json::to_string(breakdown).unwrap_or_default(), gap_event_id],
        )?;
        Ok(())
    }

    pub fn set_gap_status(&self, gap_event_id: i64, status: AnalystStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ais_gap_events SET status = ?1 WHERE gap_event_id = ?2",
            params![analyst_status_str(status), gap_event_id],
        )?;
        Ok(())
    }

    /// All vessels with a gap opening within `window` minutes of each other
    /// inside the same corridor — the feed-outage detector's clustering
    /// input.
    pub fn gaps_by_corridor_window(
        &self,
        corridor_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<AisGapEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ais_gap_events
             WHERE corridor_id = ?1 AND gap_start_utc >= ?2 AND gap_start_utc < ?3",
        )?;
        let rows = stmt
            .query_map(
                params![corridor_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                row_to_gap_event,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_gap_event(row: &rusqlite::Row) -> rusqlite::Result<AisGapEvent> {
    let status: String = row.get("status")?;
    let breakdown: Option<String> = row.get("risk_breakdown_json")?;
    Ok(AisGapEvent {
        gap_event_id: row.get("gap_event_id")?,
        vessel_id: row.get("vessel_id")?,
        start_point_id: row.get("start_point_id")?,
        end_point_id: row.get("end_point_id")?,
        gap_start_utc: from_rfc3339(&row.get::<_, String>("gap_start_utc")?),
        gap_end_utc: from_rfc3339(&row.get::<_, String>("gap_end_utc")?),
        duration_minutes: row.get("duration_minutes")?,
        pre_gap_sog_kn: row.get("pre_gap_sog_kn")?,
        actual_gap_distance_nm: row.get("actual_gap_distance_nm")?,
        max_plausible_distance_nm: row.get("max_plausible_distance_nm")?,
        impossible_speed_flag: row.get::<_, i64>("impossible_speed_flag")? != 0,
        velocity_plausibility_ratio: row.get("velocity_plausibility_ratio")?,
        corridor_id: row.get("corridor_id")?,
        in_dark_zone: row.get::<_, i64>("in_dark_zone")? != 0,
        is_feed_outage: row.get::<_, i64>("is_feed_outage")? != 0,
        coverage_quality: row.get("coverage_quality")?,
        risk_score: row.get("risk_score")?,
        risk_breakdown: breakdown.and_then(|b| serde_json::from_str(&b).ok()),
        status: parse_analyst_status(&status),
        analyst_notes: row.get("analyst_notes")?,
    })
}

fn analyst_status_str(s: AnalystStatus) -> &'static str {
    match s {
        AnalystStatus::New => "new",
        AnalystStatus::UnderReview => "under_review",
        AnalystStatus::Confirmed => "confirmed",
        AnalystStatus::Dismissed => "dismissed",
        AnalystStatus::Archived => "archived",
    }
}

fn parse_analyst_status(s: &str) -> AnalystStatus {
    match s {
        "under_review" => AnalystStatus::UnderReview,
        "confirmed" => AnalystStatus::Confirmed,
        "dismissed" => AnalystStatus::Dismissed,
        "archived" => AnalystStatus::Archived,
        _ => AnalystStatus::New,
    }
}

fn spoofing_type_str(t: SpoofingType) -> &'static str {
    match t {
        SpoofingType::MmsiReuse => "mmsi_reuse",
        SpoofingType::NavStatusMismatch => "nav_status_mismatch",
        SpoofingType::CircleSpoof => "circle_spoof",
        SpoofingType::AnchorSpoof => "anchor_spoof",
        SpoofingType::ErraticNavStatus => "erratic_nav_status",
        SpoofingType::CrossReceiverDisagreement => "cross_receiver_disagreement",
        SpoofingType::IdentitySwap => "identity_swap",
        SpoofingType::FakePortCall => "fake_port_call",
        SpoofingType::StaleAisData => "stale_ais_data",
        SpoofingType::SyntheticTrack => "synthetic_track",
        SpoofingType::ImoFraud => "imo_fraud",
        SpoofingType::TrackReplay => "track_replay",
        SpoofingType::DestinationDeviation => "destination_deviation",
    }
}

fn parse_spoofing_type(s: &str) -> SpoofingType {
    match s {
        "mmsi_reuse" => SpoofingType::MmsiReuse,
        "nav_status_mismatch" => SpoofingType::NavStatusMismatch,
        "circle_spoof" => SpoofingType::CircleSpoof,
        "anchor_spoof" => SpoofingType::AnchorSpoof,
        "erratic_nav_status" => SpoofingType::ErraticNavStatus,
        "cross_receiver_disagreement" => SpoofingType::CrossReceiverDisagreement,
        "identity_swap" => SpoofingType::IdentitySwap,
        "fake_port_call" => SpoofingType::FakePortCall,
        "stale_ais_data" => SpoofingType::StaleAisData,
        "synthetic_track" => SpoofingType::SyntheticTrack,
        "imo_fraud" => SpoofingType::ImoFraud,
        "track_replay" => SpoofingType::TrackReplay,
        _ => SpoofingType::DestinationDeviation,
    }
}

impl Database {
    // --- spoofing anomalies -------------------------------------------------

    pub fn insert_spoofing_anomaly(
        &self,
        vessel_id: i64,
        spoofing_type: SpoofingType,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        detail: serde_json::Value,
        risk_component: i32,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO spoofing_anomalies
                (vessel_id, spoofing_type, start_utc, end_utc, detail_json, risk_component)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                vessel_id,
                spoofing_type_str(spoofing_type),
                to_rfc3339(start_utc),
                to_rfc3339(end_utc),
                detail.to_string(),
                risk_component,
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn spoofing_anomalies_for_vessel(
        &self,
        vessel_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpoofingAnomaly>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM spoofing_anomalies
             WHERE vessel_id = ?1 AND start_utc >= ?2 AND start_utc <= ?3 ORDER BY start_utc",
        )?;
        let rows = stmt
            .query_map(
                params![vessel_id, to_rfc3339(from), to_rfc3339(to)],
                row_to_anomaly,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Whether `vessel_id` has any spoofing anomaly overlapping
    /// `[center - window, center + window]` — used by the feed-outage
    /// detector's evasion exclusion.
    pub fn has_spoofing_near(
        &self,
        vessel_id: i64,
        center: DateTime<Utc>,
        window_hours: i64,
    ) -> Result<bool> {
        let from = center - chrono::Duration::hours(window_hours);
        let to = center + chrono::Duration::hours(window_hours);
        Ok(!self.spoofing_anomalies_for_vessel(vessel_id, from, to)?.is_empty())
    }
}

fn row_to_anomaly(row: &rusqlite::Row) -> rusqlite::Result<SpoofingAnomaly> {
    let spoofing_type: String = row.get("spoofing_type")?;
    let detail: Option<String> = row.get("detail_json")?;
    Ok(SpoofingAnomaly {
        anomaly_id: row.get("anomaly_id")?,
        vessel_id: row.get("vessel_id")?,
        spoofing_type: parse_spoofing_type(&spoofing_type),
        start_utc: from_rfc3339(&row.get::<_, String>("start_utc")?),
        end_utc: from_rfc3339(&row.get::<_, String>("end_utc")?),
        detail_json: detail
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or(serde_json::Value::Null),
        risk_component: row.get("risk_component")?,
    })
}

fn sts_type_str(t: StsDetectionType) -> &'static str {
    match t {
        StsDetectionType::VisibleVisible => "visible_visible",
        StsDetectionType::VisibleDark => "visible_dark",
        StsDetectionType::DarkDark => "dark_dark",
    }
}

fn parse_sts_type(s: &str) -> StsDetectionType {
    match s {
        "visible_dark" => StsDetectionType::VisibleDark,
        "dark_dark" => StsDetectionType::DarkDark,
        _ => StsDetectionType::VisibleVisible,
    }
}

impl Database {
    // --- STS transfer events ------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_sts_event(
        &self,
        vessel_a_id: i64,
        vessel_b_id: i64,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        mean_lat: f64,
        mean_lon: f64,
        detection_type: StsDetectionType,
        risk_component: i32,
    ) -> Result<Option<i64>> {
        let (a, b) = (vessel_a_id.min(vessel_b_id), vessel_a_id.max(vessel_b_id));
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO sts_transfer_events
                (vessel_a_id, vessel_b_id, start_utc, end_utc, mean_lat, mean_lon, detection_type, risk_component)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                a,
                b,
                to_rfc3339(start_utc),
                to_rfc3339(end_utc),
                mean_lat,
                mean_lon,
                sts_type_str(detection_type),
                risk_component,
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn sts_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StsTransferEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM sts_transfer_events WHERE start_utc >= ?1 AND start_utc <= ?2 ORDER BY start_utc",
        )?;
        let rows = stmt
            .query_map(params![to_rfc3339(from), to_rfc3339(to)], row_to_sts)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn sts_events_for_vessel(
        &self,
        vessel_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StsTransferEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM sts_transfer_events
             WHERE (vessel_a_id = ?1 OR vessel_b_id = ?1) AND start_utc >= ?2 AND start_utc <= ?3",
        )?;
        let rows = stmt
            .query_map(
                params![vessel_id, to_rfc3339(from), to_rfc3339(to)],
                row_to_sts,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn has_sts_near(&self, vessel_id: i64, center: DateTime<Utc>, window_hours: i64) -> Result<bool> {
        let from = center - chrono::Duration::hours(window_hours);
        let to = center + chrono::Duration::hours(window_hours);
        Ok(!self.sts_events_for_vessel(vessel_id, from, to)?.is_empty())
    }

    pub fn sts_event_count_for_vessel(&self, vessel_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM sts_transfer_events WHERE vessel_a_id = ?1 OR vessel_b_id = ?1",
            params![vessel_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}

fn row_to_sts(row: &rusqlite::Row) -> rusqlite::Result<StsTransferEvent> {
    let detection_type: String = row.get("detection_type")?;
    Ok(StsTransferEvent {
        sts_event_id: row.get("sts_event_id")?,
        vessel_a_id: row.get("vessel_a_id")?,
        vessel_b_id: row.get("vessel_b_id")?,
        start_utc: from_rfc3339(&row.get::<_, String>("start_utc")?),
        end_utc: from_rfc3339(&row.get::<_, String>("end_utc")?),
        mean_lat: row.get("mean_lat")?,
        mean_lon: row.get("mean_lon")?,
        detection_type: parse_sts_type(&detection_type),
        risk_component: row.get("risk_component")?,
    })
}

impl Database {
    // --- loitering events ----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_loitering_event(
        &self,
        vessel_id: i64,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        median_sog_kn: f64,
        mean_lat: f64,
        mean_lon: f64,
        corridor_id: Option<i64>,
        preceding_gap_id: Option<i64>,
        following_gap_id: Option<i64>,
        risk_component: i32,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO loitering_events
                (vessel_id, start_utc, end_utc, median_sog_kn, mean_lat, mean_lon,
                 corridor_id, preceding_gap_id, following_gap_id, risk_component)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                vessel_id,
                to_rfc3339(start_utc),
                to_rfc3339(end_utc),
                median_sog_kn,
                mean_lat,
                mean_lon,
                corridor_id,
                preceding_gap_id,
                following_gap_id,
                risk_component,
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn loitering_events_for_vessel(
        &self,
        vessel_id: i64,
    ) -> Result<Vec<LoiteringEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM loitering_events WHERE vessel_id = ?1 ORDER BY start_utc",
        )?;
        let rows = stmt
            .query_map(params![vessel_id], row_to_loitering)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total loitering hours accumulated for a vessel — the floating-storage
    /// sub-detector's `>= 720h` threshold input.
    pub fn total_loitering_hours(&self, vessel_id: i64) -> Result<f64> {
        let events = self.loitering_events_for_vessel(vessel_id)?;
        Ok(events
            .iter()
            .map(|e| (e.end_utc - e.start_utc).num_seconds() as f64 / 3600.0)
            .sum())
    }
}

fn row_to_loitering(row: &rusqlite::Row) -> rusqlite::Result<LoiteringEvent> {
    Ok(LoiteringEvent {
        loitering_event_id: row.get("loitering_event_id")?,
        vessel_id: row.get("vessel_id")?,
        start_utc: from_rfc3339(&row.get::<_, String>("start_utc")?),
        end_utc: from_rfc3339(&row.get::<_, String>("end_utc")?),
        median_sog_kn: row.get("median_sog_kn")?,
        mean_lat: row.get("mean_lat")?,
        mean_lon: row.get("mean_lon")?,
        corridor_id: row.get("corridor_id")?,
        preceding_gap_id: row.get("preceding_gap_id")?,
        following_gap_id: row.get("following_gap_id")?,
        risk_component: row.get("risk_component")?,
    })
}

fn flag_kind_str(k: Option<FlagKind>) -> Option<&'static str> {
    match k {
        Some(FlagKind::FloatingStorage) => Some("floating_storage"),
        Some(FlagKind::ArcticNoIceClass) => Some("arctic_no_ice_class"),
        None => None,
    }
}

fn parse_flag_kind(s: Option<String>) -> Option<FlagKind> {
    match s.as_deref() {
        Some("floating_storage") => Some(FlagKind::FloatingStorage),
        Some("arctic_no_ice_class") => Some(FlagKind::ArcticNoIceClass),
        _ => None,
    }
}

impl Database {
    // --- convoy events (also floating-storage / arctic flag container) ----

    #[allow(clippy::too_many_arguments)]
    pub fn insert_convoy_event(
        &self,
        vessel_a_id: i64,
        vessel_b_id: i64,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        risk_component: i32,
        flag_kind: Option<FlagKind>,
        evidence: Option<serde_json::Value>,
    ) -> Result<Option<i64>> {
        let (a, b) = if vessel_a_id == vessel_b_id {
            (vessel_a_id, vessel_b_id)
        } else {
            (vessel_a_id.min(vessel_b_id), vessel_a_id.max(vessel_b_id))
        };
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO convoy_events
                (vessel_a_id, vessel_b_id, start_utc, end_utc, risk_component, flag_kind, evidence_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                a,
                b,
                to_rfc3339(start_utc),
                to_rfc3339(end_utc),
                risk_component,
                flag_kind_str(flag_kind),
                evidence.map(|e| e.to_string()),
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn convoy_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConvoyEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM convoy_events WHERE start_utc >= ?1 AND start_utc <= ?2 ORDER BY start_utc",
        )?;
        let rows = stmt
            .query_map(params![to_rfc3339(from), to_rfc3339(to)], row_to_convoy)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn convoy_events_for_vessel(&self, vessel_id: i64) -> Result<Vec<ConvoyEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM convoy_events WHERE vessel_a_id = ?1 OR vessel_b_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![vessel_id], row_to_convoy)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_convoy(row: &rusqlite::Row) -> rusqlite::Result<ConvoyEvent> {
    let flag_kind: Option<String> = row.get("flag_kind")?;
    let evidence: Option<String> = row.get("evidence_json")?;
    Ok(ConvoyEvent {
        convoy_event_id: row.get("convoy_event_id")?,
        vessel_a_id: row.get("vessel_a_id")?,
        vessel_b_id: row.get("vessel_b_id")?,
        start_utc: from_rfc3339(&row.get::<_, String>("start_utc")?),
        end_utc: from_rfc3339(&row.get::<_, String>("end_utc")?),
        risk_component: row.get("risk_component")?,
        flag_kind: parse_flag_kind(flag_kind),
        evidence_json: evidence.and_then(|e| serde_json::from_str(&e).ok()),
    })
}

impl Database {
    // --- draught change events ----------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_draught_event(
        &self,
        vessel_id: i64,
        changed_at_utc: DateTime<Utc>,
        before_draught_m: f64,
        after_draught_m: f64,
        straddles_gap: bool,
        risk_component: i32,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let delta = after_draught_m - before_draught_m;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO draught_change_events
                (vessel_id, changed_at_utc, before_draught_m, after_draught_m, delta_m, straddles_gap, risk_component)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                vessel_id,
                to_rfc3339(changed_at_utc),
                before_draught_m,
                after_draught_m,
                delta,
                straddles_gap as i64,
                risk_component,
            ],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn draught_events_for_vessel(&self, vessel_id: i64) -> Result<Vec<DraughtChangeEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM draught_change_events WHERE vessel_id = ?1 ORDER BY changed_at_utc",
        )?;
        let rows = stmt
            .query_map(params![vessel_id], |row| {
                Ok(DraughtChangeEvent {
                    draught_event_id: row.get("draught_event_id")?,
                    vessel_id: row.get("vessel_id")?,
                    changed_at_utc: from_rfc3339(&row.get::<_, String>("changed_at_utc")?),
                    before_draught_m: row.get("before_draught_m")?,
                    after_draught_m: row.get("after_draught_m")?,
                    delta_m: row.get("delta_m")?,
                    straddles_gap: row.get::<_, i64>("straddles_gap")? != 0,
                    risk_component: row.get("risk_component")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- MMSI cloning events -------------------------------------------------

    pub fn insert_cloning_event(
        &self,
        vessel_id: i64,
        position_a_id: i64,
        position_b_id: i64,
        distance_nm: f64,
        implied_speed_kn: f64,
        risk_component: i32,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO mmsi_cloning_events
                (vessel_id, position_a_id, position_b_id, distance_nm, implied_speed_kn, risk_component)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![vessel_id, position_a_id, position_b_id, distance_nm, implied_speed_kn, risk_component],
        )?;
        if changed == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    pub fn cloning_event_count_for_vessel(&self, vessel_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM mmsi_cloning_events WHERE vessel_id = ?1",
            params![vessel_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}

fn merge_status_str(s: MergeCandidateStatus) -> &'static str {
    match s {
        MergeCandidateStatus::Pending => "pending",
        MergeCandidateStatus::AutoMerged => "auto_merged",
        MergeCandidateStatus::AnalystMerged => "analyst_merged",
        MergeCandidateStatus::Rejected => "rejected",
    }
}

fn parse_merge_status(s: &str) -> MergeCandidateStatus {
    match s {
        "auto_merged" => MergeCandidateStatus::AutoMerged,
        "analyst_merged" => MergeCandidateStatus::AnalystMerged,
        "rejected" => MergeCandidateStatus::Rejected,
        _ => MergeCandidateStatus::Pending,
    }
}

impl Database {
    // --- merge candidates / operations / chains -----------------------------

    pub fn insert_merge_candidate(
        &self,
        dark_vessel_id: i64,
        new_vessel_id: i64,
        confidence: f64,
        breakdown: &std::collections::HashMap<String, f64>,
        status: MergeCandidateStatus,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO merge_candidates
                (dark_vessel_id, new_vessel_id, confidence, breakdown_json, status, created_at_utc)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(dark_vessel_id, new_vessel_id) DO UPDATE SET
                confidence = excluded.confidence,
                breakdown_json = excluded.breakdown_json,
                status = excluded.status",
            params![
                dark_vessel_id,
                new_vessel_id,
                confidence,
                serde_json::to_string(breakdown).unwrap_or_default(),
                merge_status_str(status),
                Utc::now().to_rfc3339(),
            ],
        )?;
        conn.query_row(
            "SELECT merge_candidate_id FROM merge_candidates WHERE dark_vessel_id = ?1 AND new_vessel_id = ?2",
            params![dark_vessel_id, new_vessel_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn get_merge_candidate(&self, id: i64) -> Result<Option<MergeCandidate>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM merge_candidates WHERE merge_candidate_id = ?1")?;
        Ok(stmt.query_row(params![id], row_to_candidate).optional()?)
    }

    pub fn set_merge_candidate_status(&self, id: i64, status: MergeCandidateStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE merge_candidates SET status = ?1 WHERE merge_candidate_id = ?2",
            params![merge_status_str(status), id],
        )?;
        Ok(())
    }

    pub fn pending_merge_candidates(&self) -> Result<Vec<MergeCandidate>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM merge_candidates WHERE status = 'pending'")?;
        let rows = stmt
            .query_map([], row_to_candidate)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes any persisted merge chain whose `links_json` contains
    /// `candidate_id` — invoked on candidate rejection per §4.5.
    pub fn invalidate_merge_chains_containing(&self, candidate_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT merge_chain_id, links_json FROM merge_chains")?;
        let doomed: Vec<i64> = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let links: String = row.get(1)?;
                Ok((id, links))
            })?
            .filter_map(|r| r.ok())
            .filter(|(_, links)| {
                serde_json::from_str::<Vec<i64>>(links)
                    .map(|v| v.contains(&candidate_id))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect();
        drop(stmt);
        let n = doomed.len();
        for id in doomed {
            conn.execute("DELETE FROM merge_chains WHERE merge_chain_id = ?1", params![id])?;
        }
        Ok(n)
    }

    pub fn insert_merge_chain(&self, canonical_vessel_id: i64, links: &[i64]) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO merge_chains (canonical_vessel_id, links_json) VALUES (?1, ?2)",
            params![canonical_vessel_id, serde_json::to_string(links).unwrap_or_default()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn execute_merge(
        &self,
        dark_vessel_id: i64,
        surviving_vessel_id: i64,
        confidence: f64,
        breakdown: &std::collections::HashMap<String, f64>,
        status: MergeCandidateStatus,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE vessels SET merged_into_vessel_id = ?1 WHERE vessel_id = ?2",
            params![surviving_vessel_id, dark_vessel_id],
        )?;
        conn.execute(
            "INSERT INTO merge_operations
                (dark_vessel_id, surviving_vessel_id, confidence, breakdown_json, executed_at_utc, status)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                dark_vessel_id,
                surviving_vessel_id,
                confidence,
                serde_json::to_string(breakdown).unwrap_or_default(),
                Utc::now().to_rfc3339(),
                merge_status_str(status),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// BFS over executed merges only (`AUTO_MERGED`/`ANALYST_MERGED`) to
    /// build the chain of vessels that resolve to `canonical_vessel_id`.
    /// `PENDING` candidates never appear — only `merge_operations` rows feed
    /// this traversal.
    pub fn merge_chain_for(&self, canonical_vessel_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT dark_vessel_id FROM merge_operations
             WHERE surviving_vessel_id = ?1 AND status IN ('auto_merged', 'analyst_merged')",
        )?;
        let direct: Vec<i64> = stmt
            .query_map(params![canonical_vessel_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut visited = std::collections::HashSet::new();
        let mut queue: std::collections::VecDeque<i64> = direct.into_iter().collect();
        let mut chain = Vec::new();
        let mut depth = 0;
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            chain.push(id);
            depth += 1;
            if depth > crate::db::vessels::MAX_MERGE_CHAIN_HOPS as usize * 50 {
                break;
            }
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT dark_vessel_id FROM merge_operations
                 WHERE surviving_vessel_id = ?1 AND status IN ('auto_merged', 'analyst_merged')",
            )?;
            let more: Vec<i64> = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            drop(conn);
            queue.extend(more);
        }
        Ok(chain)
    }
}

fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<MergeCandidate> {
    let status: String = row.get("status")?;
    let breakdown: Option<String> = row.get("breakdown_json")?;
    Ok(MergeCandidate {
        merge_candidate_id: row.get("merge_candidate_id")?,
        dark_vessel_id: row.get("dark_vessel_id")?,
        new_vessel_id: row.get("new_vessel_id")?,
        confidence: row.get("confidence")?,
        breakdown: breakdown
            .and_then(|b| serde_json::from_str(&b).ok())
            .unwrap_or_default(),
        status: parse_merge_status(&status),
        created_at_utc: from_rfc3339(&row.get::<_, String>("created_at_utc")?),
    })
}

impl Database {
    // --- owners / owner clusters ---------------------------------------------

    pub fn insert_owner(
        &self,
        name: &str,
        country: Option<&str>,
        address: Option<&str>,
        parent_owner_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let normalized = name.trim().to_lowercase();
        conn.execute(
            "INSERT INTO owners (name, normalized_name, country, address, parent_owner_id)
             VALUES (?1,?2,?3,?4,?5)",
            params![name, normalized, country, address, parent_owner_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn all_owners(&self) -> Result<Vec<Owner>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM owners")?;
        let rows = stmt
            .query_map([], row_to_owner)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_owner_sanctioned(&self, owner_id: i64, sanctioned: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE owners SET is_sanctioned = ?1 WHERE owner_id = ?2",
            params![sanctioned as i64, owner_id],
        )?;
        Ok(())
    }

    pub fn insert_owner_cluster(&self, member_owner_ids: &[i64], is_sanctioned: bool) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO owner_clusters (member_owner_ids_json, is_sanctioned) VALUES (?1, ?2)",
            params![
                serde_json::to_string(member_owner_ids).unwrap_or_default(),
                is_sanctioned as i64
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn all_owner_clusters(&self) -> Result<Vec<OwnerCluster>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM owner_clusters")?;
        let rows = stmt
            .query_map([], |row| {
                let members: String = row.get("member_owner_ids_json")?;
                Ok(OwnerCluster {
                    owner_cluster_id: row.get("owner_cluster_id")?,
                    member_owner_ids: serde_json::from_str(&members).unwrap_or_default(),
                    is_sanctioned: row.get::<_, i64>("is_sanctioned")? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_owner_cluster_sanctioned(&self, owner_cluster_id: i64, sanctioned: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE owner_clusters SET is_sanctioned = ?1 WHERE owner_cluster_id = ?2",
            params![sanctioned as i64, owner_cluster_id],
        )?;
        Ok(())
    }

    pub fn insert_fleet_alert(&self, owner_cluster_id: i64, description: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fleet_alerts (owner_cluster_id, description, created_at_utc) VALUES (?1,?2,?3)",
            params![owner_cluster_id, description, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn row_to_owner(row: &rusqlite::Row) -> rusqlite::Result<Owner> {
    Ok(Owner {
        owner_id: row.get("owner_id")?,
        name: row.get("name")?,
        normalized_name: row.get("normalized_name")?,
        country: row.get("country")?,
        address: row.get("address")?,
        parent_owner_id: row.get("parent_owner_id")?,
        is_sanctioned: row.get::<_, i64>("is_sanctioned")? != 0,
    })
}

impl Database {
    // --- vessel fingerprints --------------------------------------------------

    pub fn upsert_fingerprint(&self, fp: &VesselFingerprint) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vessel_fingerprints (vessel_id, computed_at_utc, mean_json, covariance_json, sample_count)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(vessel_id) DO UPDATE SET
                computed_at_utc = excluded.computed_at_utc,
                mean_json = excluded.mean_json,
                covariance_json = excluded.covariance_json,
                sample_count = excluded.sample_count",
            params![
                fp.vessel_id,
                to_rfc3339(fp.computed_at_utc),
                serde_json::to_string(&fp.mean).unwrap_or_default(),
                serde_json::to_string(&fp.covariance).unwrap_or_default(),
                fp.sample_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_fingerprint(&self, vessel_id: i64) -> Result<Option<VesselFingerprint>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM vessel_fingerprints WHERE vessel_id = ?1")?;
        Ok(stmt
            .query_row(params![vessel_id], |row| {
                let mean: String = row.get("mean_json")?;
                let cov: String = row.get("covariance_json")?;
                Ok(VesselFingerprint {
                    vessel_id: row.get("vessel_id")?,
                    computed_at_utc: from_rfc3339(&row.get::<_, String>("computed_at_utc")?),
                    mean: serde_json::from_str(&mean).unwrap_or_default(),
                    covariance: serde_json::from_str(&cov).unwrap_or_default(),
                    sample_count: row.get::<_, i64>("sample_count")? as usize,
                })
            })
            .optional()?)
    }

    // --- evidence cards --------------------------------------------------------

    pub fn next_evidence_version(&self, gap_event_id: i64) -> Result<i32> {
        let conn = self.conn.lock();
        let max: Option<i32> = conn
            .query_row(
                "SELECT MAX(version) FROM evidence_cards WHERE gap_event_id = ?1",
                params![gap_event_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn insert_evidence_card(
        &self,
        gap_event_id: i64,
        version: i32,
        export_format: &str,
        score_snapshot: i32,
        breakdown_snapshot: &std::collections::HashMap<String, i32>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO evidence_cards
                (gap_event_id, version, export_format, created_at_utc, score_snapshot, breakdown_snapshot_json)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                gap_event_id,
                version,
                export_format,
                Utc::now().to_rfc3339(),
                score_snapshot,
                serde_json::to_string(breakdown_snapshot).unwrap_or_default(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // --- pipeline runs -----------------------------------------------------

    pub fn insert_pipeline_run_start(
        &self,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pipeline_runs (date_from, date_to, started_at_utc, run_status)
             VALUES (?1,?2,?3,'partial')",
            params![to_rfc3339(date_from), to_rfc3339(date_to), Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_pipeline_run(
        &self,
        pipeline_run_id: i64,
        run_status: RunStatus,
        steps: &std::collections::HashMap<String, StepResult>,
        detector_counts: &std::collections::HashMap<String, i64>,
        drift_disabled_detectors: &[String],
    ) -> Result<()> {
        let conn = self.conn.lock();
        let status_str = match run_status {
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        conn.execute(
            "UPDATE pipeline_runs SET finished_at_utc = ?1, run_status = ?2,
                steps_json = ?3, detector_counts_json = ?4, drift_disabled_detectors_json = ?5
             WHERE pipeline_run_id = ?6",
            params![
                Utc::now().to_rfc3339(),
                status_str,
                serde_json::to_string(steps).unwrap_or_default(),
                serde_json::to_string(detector_counts).unwrap_or_default(),
                serde_json::to_string(drift_disabled_detectors).unwrap_or_default(),
                pipeline_run_id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_pipeline_runs(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM pipeline_runs ORDER BY pipeline_run_id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<PipelineRun> {
    let status: String = row.get("run_status")?;
    let finished: Option<String> = row.get("finished_at_utc")?;
    let steps: Option<String> = row.get("steps_json")?;
    let counts: Option<String> = row.get("detector_counts_json")?;
    let drift: Option<String> = row.get("drift_disabled_detectors_json")?;
    Ok(PipelineRun {
        pipeline_run_id: row.get("pipeline_run_id")?,
        date_from: from_rfc3339(&row.get::<_, String>("date_from")?),
        date_to: from_rfc3339(&row.get::<_, String>("date_to")?),
        started_at_utc: from_rfc3339(&row.get::<_, String>("started_at_utc")?),
        finished_at_utc: finished.map(|s| from_rfc3339(&s)),
        run_status: match status.as_str() {
            "complete" => RunStatus::Complete,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Partial,
        },
        steps: steps
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        detector_counts: counts
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        drift_disabled_detectors: drift
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlagRisk;

    #[test]
    fn gap_event_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let p1 = db
            .insert_position(vid, Utc::now(), 1.0, 1.0, None, None, None, None, None, None, AisClass::A, "t")
            .unwrap()
            .unwrap();
        let p2 = db
            .insert_position(vid, Utc::now() + chrono::Duration::hours(3), 1.0, 1.0, None, None, None, None, None, None, AisClass::A, "t")
            .unwrap()
            .unwrap();
        let start = Utc::now();
        let end = start + chrono::Duration::hours(3);
        let first = db
            .insert_gap_event(vid, p1, p2, start, end, Some(10.0), 5.0, 40.0, false, 0.125, None, false)
            .unwrap();
        let second = db
            .insert_gap_event(vid, p1, p2, start, end, Some(10.0), 5.0, 40.0, false, 0.125, None, false)
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn merge_chain_excludes_pending() {
        let db = Database::open_in_memory().unwrap();
        let dark = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let newv = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        let breakdown = std::collections::HashMap::new();
        db.insert_merge_candidate(dark, newv, 60.0, &breakdown, MergeCandidateStatus::Pending)
            .unwrap();
        let chain = db.merge_chain_for(newv).unwrap();
        assert!(chain.is_empty());

        db.execute_merge(dark, newv, 90.0, &breakdown, MergeCandidateStatus::AutoMerged)
            .unwrap();
        let chain = db.merge_chain_for(newv).unwrap();
        assert_eq!(chain, vec![dark]);
    }

    #[test]
    fn reject_candidate_invalidates_chain_referencing_it() {
        let db = Database::open_in_memory().unwrap();
        let breakdown = std::collections::HashMap::new();
        let chain_id = db.insert_merge_chain(1, &[42, 7]).unwrap();
        let n = db.invalidate_merge_chains_containing(42).unwrap();
        assert_eq!(n, 1);
        let conn = db.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM merge_chains WHERE merge_chain_id = ?1",
                params![chain_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
        let _ = breakdown;
    }
}
