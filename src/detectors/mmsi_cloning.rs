//! MMSI-cloning detector: two consecutive positions under the same vessel ID
//! implying a speed no single hull can sustain, tiered by how far beyond
//! plausible the implied speed runs, per §4.2. Distinct from the spoofing
//! detector's `mmsi_reuse` anomaly (30kn threshold, narrative-oriented
//! detail) — this one is the dedicated cloning-event ledger scoring reads
//! directly, at a higher bar to avoid double-counting ordinary gap noise.

use tracing::instrument;

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::haversine_nm;

const CLONING_SPEED_THRESHOLD_KN: f64 = 50.0;
const CLONING_SPEED_TIER_2_KN: f64 = 100.0;
const CLONING_SPEED_TIER_3_KN: f64 = 200.0;

const RISK_TIER_1: i32 = 20;
const RISK_TIER_2: i32 = 35;
const RISK_TIER_3: i32 = 50;

#[instrument(skip(db, _settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, _settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;

    for vessel_id in vessel_ids {
        stats.vessels_scanned += 1;
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;

        for pair in positions.windows(2) {
            stats.candidates_examined += 1;
            let (a, b) = (&pair[0], &pair[1]);
            let hours = (b.timestamp_utc - a.timestamp_utc).num_seconds() as f64 / 3600.0;
            if hours <= 0.0 {
                continue;
            }
            let distance_nm = haversine_nm(a.lat, a.lon, b.lat, b.lon);
            let implied_speed_kn = distance_nm / hours;
            if implied_speed_kn <= CLONING_SPEED_THRESHOLD_KN {
                continue;
            }

            let risk_component = if implied_speed_kn > CLONING_SPEED_TIER_3_KN {
                RISK_TIER_3
            } else if implied_speed_kn > CLONING_SPEED_TIER_2_KN {
                RISK_TIER_2
            } else {
                RISK_TIER_1
            };

            let inserted = db.insert_cloning_event(
                vessel_id,
                a.position_id,
                b.position_id,
                distance_nm,
                implied_speed_kn,
                risk_component,
            )?;
            stats.record(inserted);
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AisClass, FlagRisk};
    use chrono::{Duration, TimeZone, Utc};

    fn settings() -> Settings {
        Settings::from_env().unwrap()
    }

    #[test]
    fn extreme_implied_speed_hits_top_tier() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        db.insert_position(vid, t0, 0.0, 0.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        // 250nm in 1h.
        db.insert_position(vid, t1, 4.1666, 0.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t1);
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);
        assert_eq!(db.cloning_event_count_for_vessel(vid).unwrap(), 1);
    }

    #[test]
    fn moderate_speed_under_threshold_is_not_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        db.insert_position(vid, t0, 0.0, 0.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        db.insert_position(vid, t1, 0.2, 0.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t1);
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }
}
