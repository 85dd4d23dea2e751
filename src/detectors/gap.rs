//! AIS gap detector: opens an event whenever consecutive positions for a
//! vessel are more than `min_gap_hours` apart, records the plausibility of
//! the implied transit, and assigns the corridor/dark-zone the gap's
//! endpoints fall inside.

use chrono::Duration;
use tracing::{instrument, warn};

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::haversine_nm;

const DEFAULT_MIN_GAP_HOURS: f64 = 2.0;
const IMPOSSIBLE_SPEED_KN: f64 = 30.0;
const PLAUSIBLE_SPEED_MULTIPLIER: f64 = 1.25;
const CORRIDOR_TOLERANCE_DEG: f64 = 0.1;

#[instrument(skip(db, _settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, _settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;

    for vessel_id in vessel_ids {
        stats.vessels_scanned += 1;
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;
        for pair in positions.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let duration_h = (b.timestamp_utc - a.timestamp_utc).num_seconds() as f64 / 3600.0;
            if duration_h <= DEFAULT_MIN_GAP_HOURS {
                continue;
            }

            let actual_gap_distance_nm = haversine_nm(a.lat, a.lon, b.lat, b.lon);
            let pre_gap_sog_kn = a.sog_kn;
            let max_plausible_distance_nm =
                pre_gap_sog_kn.unwrap_or(0.0) * duration_h * PLAUSIBLE_SPEED_MULTIPLIER;
            let implied_speed_kn = actual_gap_distance_nm / duration_h;
            let impossible_speed_flag = implied_speed_kn > IMPOSSIBLE_SPEED_KN;
            let velocity_plausibility_ratio = if max_plausible_distance_nm > 0.0 {
                actual_gap_distance_nm / max_plausible_distance_nm
            } else if actual_gap_distance_nm > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };

            let (corridor_id, in_dark_zone) = match classify_gap_location(db, a.lat, a.lon, b.lat, b.lon) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%vessel_id, error = %e, "gap corridor classification failed, leaving unassigned");
                    (None, false)
                }
            };

            let inserted = db.insert_gap_event(
                vessel_id,
                a.position_id,
                b.position_id,
                a.timestamp_utc,
                b.timestamp_utc,
                pre_gap_sog_kn,
                actual_gap_distance_nm,
                max_plausible_distance_nm,
                impossible_speed_flag,
                velocity_plausibility_ratio,
                corridor_id,
                in_dark_zone,
            )?;
            stats.record(inserted);
        }
    }

    Ok(stats)
}

/// Checks both gap endpoints against corridor and dark-zone bounding boxes
/// (with tolerance) to assign the straight-line endpoint trajectory a
/// corridor and dark-zone membership. First matching corridor wins.
fn classify_gap_location(
    db: &Database,
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<(Option<i64>, bool)> {
    let mut corridor_id = None;
    for (lat, lon) in [(lat1, lon1), (lat2, lon2)] {
        let matches = db.corridors_containing(lat, lon, CORRIDOR_TOLERANCE_DEG)?;
        if let Some(c) = matches.into_iter().next() {
            corridor_id = Some(c.corridor_id);
            break;
        }
    }
    let in_dark_zone = db.in_dark_zone(lat1, lon1, CORRIDOR_TOLERANCE_DEG)?
        || db.in_dark_zone(lat2, lon2, CORRIDOR_TOLERANCE_DEG)?;
    Ok((corridor_id, in_dark_zone))
}

#[allow(dead_code)]
fn gap_linkage_window(hours: i64) -> Duration {
    Duration::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AisClass, FlagRisk};
    use chrono::{TimeZone, Utc};

    fn settings() -> Settings {
        Settings::from_env().unwrap()
    }

    #[test]
    fn opens_gap_above_threshold_and_flags_impossible_speed() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(3);
        db.insert_position(vid, t0, 0.0, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        // ~180nm in 3h implies 60kn, far beyond what 5kn pre-gap SOG makes plausible.
        db.insert_position(vid, t1, 3.0, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let stats = detect(&db, DateRange::new(t0, t1), &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);

        let events = db.gap_events_in_range(t0, t1).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].impossible_speed_flag);
        assert!(events[0].velocity_plausibility_ratio > 1.0);
    }

    #[test]
    fn short_interval_does_not_open_a_gap() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(30);
        db.insert_position(vid, t0, 0.0, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        db.insert_position(vid, t1, 0.01, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let stats = detect(&db, DateRange::new(t0, t1), &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }

    #[test]
    fn rerunning_over_same_window_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(5);
        db.insert_position(vid, t0, 0.0, 0.0, Some(1.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        db.insert_position(vid, t1, 0.05, 0.0, Some(1.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let first = detect(&db, DateRange::new(t0, t1), &settings()).unwrap();
        let second = detect(&db, DateRange::new(t0, t1), &settings()).unwrap();
        assert_eq!(first.events_inserted, 1);
        assert_eq!(second.events_inserted, 0);
    }
}
