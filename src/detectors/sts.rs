//! Ship-to-ship transfer detector: finds pairs of vessels running slow and
//! close together for a sustained run of time buckets, per §4.2. Both
//! vessels here are AIS-visible; the dark-counterpart variants
//! (`visible_dark`/`dark_dark`) are produced by the dark-vessel discovery
//! supplement, not this detector.

use std::collections::HashMap;

use tracing::instrument;

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::{grid_cell, haversine_nm, heading_delta_deg, time_bucket_15m};
use crate::models::{AisPosition, StsDetectionType};

const STS_DISTANCE_NM: f64 = 1.0;
const STS_MAX_SOG_KN: f64 = 3.0;
const STS_HEADING_DELTA_DEG: f64 = 30.0;
const STS_MIN_CONSECUTIVE_BUCKETS: usize = 3; // 3 * 15min = 45min
const STS_BASE_RISK_COMPONENT: i32 = 15;

fn effective_heading(p: &AisPosition) -> Option<f64> {
    p.cog_deg.or(p.heading_deg)
}

/// Builds the spatial index: for each (15-min bucket, 1° grid cell), the
/// single latest position per vessel within that bucket.
fn build_index(positions: &[(i64, AisPosition)]) -> HashMap<(i64, i32, i32), HashMap<i64, AisPosition>> {
    let mut index: HashMap<(i64, i32, i32), HashMap<i64, AisPosition>> = HashMap::new();
    for (vessel_id, p) in positions {
        let key = (time_bucket_15m(p.timestamp_utc), grid_cell(p.lat, p.lon).0, grid_cell(p.lat, p.lon).1);
        let bucket = index.entry(key).or_default();
        match bucket.get(vessel_id) {
            Some(existing) if existing.timestamp_utc >= p.timestamp_utc => {}
            _ => {
                bucket.insert(*vessel_id, p.clone());
            }
        }
    }
    index
}

#[instrument(skip(db, _settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, _settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;
    let mut positions = Vec::new();
    for &vessel_id in &vessel_ids {
        stats.vessels_scanned += 1;
        for p in db.positions_in_range(vessel_id, range.from, range.to)? {
            positions.push((vessel_id, p));
        }
    }

    let index = build_index(&positions);

    // Collect, per 15-min bucket, the set of pairs in contact at that bucket.
    let mut by_bucket: std::collections::BTreeMap<i64, Vec<((i64, i64), AisPosition, AisPosition)>> =
        Default::default();
    for ((bucket, _cx, _cy), members) in &index {
        let ids: Vec<&i64> = members.keys().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a_id, b_id) = (*ids[i], *ids[j]);
                let a = &members[&a_id];
                let b = &members[&b_id];
                stats.candidates_examined += 1;
                let distance = haversine_nm(a.lat, a.lon, b.lat, b.lon);
                if distance >= STS_DISTANCE_NM {
                    continue;
                }
                if a.sog_kn.unwrap_or(f64::MAX) >= STS_MAX_SOG_KN || b.sog_kn.unwrap_or(f64::MAX) >= STS_MAX_SOG_KN {
                    continue;
                }
                match (effective_heading(a), effective_heading(b)) {
                    (Some(ha), Some(hb)) if heading_delta_deg(ha, hb) > STS_HEADING_DELTA_DEG => continue,
                    _ => {}
                }
                let (min_id, max_id) = (a_id.min(b_id), a_id.max(b_id));
                by_bucket
                    .entry(*bucket)
                    .or_default()
                    .push(((min_id, max_id), a.clone(), b.clone()));
            }
        }
    }

    // Track consecutive-bucket runs per pair key.
    let mut active: HashMap<(i64, i64), (i64, i64, Vec<AisPosition>)> = HashMap::new(); // key -> (run_start_bucket, last_bucket, positions)
    let buckets: Vec<i64> = by_bucket.keys().copied().collect();
    for bucket in &buckets {
        let pairs = &by_bucket[bucket];
        let present: std::collections::HashSet<(i64, i64)> = pairs.iter().map(|(k, _, _)| *k).collect();

        for (key, a, b) in pairs {
            active
                .entry(*key)
                .and_modify(|(_, last, positions)| {
                    if *last == *bucket - 1 {
                        positions.push(a.clone());
                        positions.push(b.clone());
                        *last = *bucket;
                    } else {
                        *positions = vec![a.clone(), b.clone()];
                        *last = *bucket;
                    }
                })
                .or_insert_with(|| (*bucket, *bucket, vec![a.clone(), b.clone()]));
        }

        // Flush any active run whose pair is not present this bucket.
        let finished: Vec<(i64, i64)> = active
            .keys()
            .filter(|k| !present.contains(k))
            .copied()
            .collect();
        for key in finished {
            if let Some((start_bucket, last_bucket, positions)) = active.remove(&key) {
                flush_sts_run(db, &mut stats, key, start_bucket, last_bucket, &positions)?;
            }
        }
    }
    for (key, (start_bucket, last_bucket, positions)) in active {
        flush_sts_run(db, &mut stats, key, start_bucket, last_bucket, &positions)?;
    }

    Ok(stats)
}

fn flush_sts_run(
    db: &Database,
    stats: &mut Stats,
    _key: (i64, i64),
    start_bucket: i64,
    last_bucket: i64,
    positions: &[AisPosition],
) -> Result<()> {
    let run_length = (last_bucket - start_bucket + 1) as usize;
    if run_length < STS_MIN_CONSECUTIVE_BUCKETS || positions.is_empty() {
        return Ok(());
    }
    let start_utc = positions.iter().map(|p| p.timestamp_utc).min().unwrap();
    let end_utc = positions.iter().map(|p| p.timestamp_utc).max().unwrap();
    let mean_lat = positions.iter().map(|p| p.lat).sum::<f64>() / positions.len() as f64;
    let mean_lon = positions.iter().map(|p| p.lon).sum::<f64>() / positions.len() as f64;

    let vessel_a = positions[0].vessel_id;
    let vessel_b = positions.iter().map(|p| p.vessel_id).find(|id| *id != vessel_a).unwrap_or(vessel_a);

    let inserted = db.insert_sts_event(
        vessel_a,
        vessel_b,
        start_utc,
        end_utc,
        mean_lat,
        mean_lon,
        StsDetectionType::VisibleVisible,
        STS_BASE_RISK_COMPONENT,
    )?;
    stats.record(inserted);
    Ok(())
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
    fn sustained_close_slow_pair_opens_sts_event() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let b = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..4 {
            let ts = t0 + Duration::minutes(15 * i);
            db.insert_position(a, ts, 10.0, 10.0, Some(1.0), None, None, None, None, None, AisClass::A, "t")
                .unwrap();
            db.insert_position(b, ts, 10.001, 10.001, Some(1.0), None, None, None, None, None, AisClass::A, "t")
                .unwrap();
        }
        let range = DateRange::new(t0, t0 + Duration::hours(1));
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);
    }

    #[test]
    fn brief_encounter_does_not_open_event() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let b = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_position(a, t0, 10.0, 10.0, Some(1.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        db.insert_position(b, t0, 10.001, 10.001, Some(1.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        let range = DateRange::new(t0, t0 + Duration::hours(1));
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }
}
