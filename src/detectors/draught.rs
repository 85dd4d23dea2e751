//! Draught-change detector: flags loaded/unloaded transitions that happen
//! away from any known port or terminal, the signature of an unrecorded
//! ship-to-ship cargo transfer rather than a legitimate port call, per §4.2.

use tracing::instrument;

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::haversine_nm;
use crate::models::CorridorType;

const REGULAR_PORT_SKIP_NM: f64 = 10.0;
const OFFSHORE_TERMINAL_SKIP_NM: f64 = 25.0;
const STS_LINKAGE_HOURS: i64 = 12;
const SLIDING_WINDOW_HOURS: i64 = 24;

const RISK_OFFSHORE: i32 = 20;
const RISK_BIG_DELTA: i32 = 25;
const RISK_STS_FLOOR: i32 = 15;
const RISK_STRADDLES_GAP: i32 = 20;

fn threshold_for_dwt(deadweight: Option<f64>) -> f64 {
    match deadweight {
        Some(dwt) if dwt > 200_000.0 => 3.0,
        Some(dwt) if dwt > 120_000.0 => 2.0,
        Some(dwt) if dwt > 80_000.0 => 1.5,
        _ => 1.0,
    }
}

#[instrument(skip(db, _settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, _settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;

    for vessel_id in vessel_ids {
        stats.vessels_scanned += 1;
        let Some(vessel) = db.get_vessel(vessel_id)? else {
            continue;
        };
        let threshold = threshold_for_dwt(vessel.deadweight);
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;

        for pair in positions.windows(2) {
            stats.candidates_examined += 1;
            let (a, b) = (&pair[0], &pair[1]);
            let hours = (b.timestamp_utc - a.timestamp_utc).num_seconds() as f64 / 3600.0;
            if hours > SLIDING_WINDOW_HOURS as f64 {
                continue;
            }
            let (Some(before), Some(after)) = (a.draught_m, b.draught_m) else {
                continue;
            };
            let delta = (after - before).abs();
            if delta < threshold {
                continue;
            }

            let near_port = db
                .corridors_containing(b.lat, b.lon, nm_to_deg(REGULAR_PORT_SKIP_NM))?
                .iter()
                .any(|c| c.corridor_type == CorridorType::AnchorageHolding);
            let near_offshore_terminal = db
                .corridors_containing(b.lat, b.lon, nm_to_deg(OFFSHORE_TERMINAL_SKIP_NM))?
                .iter()
                .any(|c| c.corridor_type == CorridorType::ExportRoute);

            let score = if delta >= 2.0 * threshold {
                RISK_BIG_DELTA
            } else if near_port || near_offshore_terminal {
                continue; // legitimate loading/discharge at a known facility
            } else {
                RISK_OFFSHORE
            };

            let sts_nearby = db.has_sts_near(vessel_id, b.timestamp_utc, STS_LINKAGE_HOURS)?;
            let score = if sts_nearby { score.max(RISK_STS_FLOOR) } else { score };

            let inserted = db.insert_draught_event(vessel_id, b.timestamp_utc, before, after, false, score)?;
            stats.record(inserted);
        }

        detect_gap_straddle(db, &mut stats, vessel_id, range)?;
    }

    Ok(stats)
}

fn nm_to_deg(nm: f64) -> f64 {
    nm / 60.0
}

/// Checks every AIS gap for the vessel, regardless of whether a two-point
/// sliding window exists elsewhere: a draught reading that differs across
/// the gap's endpoints means the vessel loaded or discharged cargo while
/// dark, independent of the general threshold-gated check above.
fn detect_gap_straddle(db: &Database, stats: &mut Stats, vessel_id: i64, range: DateRange) -> Result<()> {
    let gaps = db
        .gap_events_in_range(range.from, range.to)?
        .into_iter()
        .filter(|g| g.vessel_id == vessel_id);

    for gap in gaps {
        stats.candidates_examined += 1;
        let Some(start) = db.position_by_id(gap.start_point_id)? else {
            continue;
        };
        let Some(end) = db.position_by_id(gap.end_point_id)? else {
            continue;
        };
        let (Some(before), Some(after)) = (start.draught_m, end.draught_m) else {
            continue;
        };
        if (after - before).abs() <= f64::EPSILON {
            continue;
        }
        let inserted =
            db.insert_draught_event(vessel_id, end.timestamp_utc, before, after, true, RISK_STRADDLES_GAP)?;
        stats.record(inserted);
    }
    Ok(())
}

#[allow(dead_code)]
fn unused_distance_ref(a_lat: f64, a_lon: f64, b_lat: f64, b_lon: f64) -> f64 {
    haversine_nm(a_lat, a_lon, b_lat, b_lon)
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
    fn large_unexplained_draught_change_is_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        db.set_deadweight(vid, 50_000.0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(6);
        db.insert_position(vid, t0, 40.0, 40.0, Some(10.0), None, None, None, Some(5.0), None, AisClass::A, "t")
            .unwrap();
        // out on the open ocean, nowhere near a known corridor
        db.insert_position(vid, t1, 40.1, 40.1, Some(10.0), None, None, None, Some(11.0), None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t1);
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);
        let events = db.draught_events_for_vessel(vid).unwrap();
        assert_eq!(events[0].risk_component, RISK_BIG_DELTA);
    }

    #[test]
    fn small_draught_change_below_threshold_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        db.set_deadweight(vid, 50_000.0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(6);
        db.insert_position(vid, t0, 40.0, 40.0, Some(10.0), None, None, None, Some(5.0), None, AisClass::A, "t")
            .unwrap();
        db.insert_position(vid, t1, 40.0, 40.0, Some(10.0), None, None, None, Some(5.2), None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t1);
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }
}
