//! Convoy detector: finds pairs of vessels transiting together at speed for
//! a sustained run, plus two flag-shaped sub-detectors that reuse the same
//! `convoy_events` table self-referentially: floating storage (sustained
//! loitering + repeated STS contact) and Arctic transit without an
//! ice-class rating, per §4.2/§9.

use std::collections::HashMap;

use tracing::instrument;

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::{grid_cell, haversine_nm, heading_delta_deg, time_bucket_15m};
use crate::models::{AisPosition, FlagKind};

const CONVOY_DISTANCE_NM: f64 = 5.0;
const CONVOY_MIN_SOG_KN: f64 = 3.0;
const CONVOY_HEADING_DELTA_DEG: f64 = 15.0;
const CONVOY_MIN_CONSECUTIVE_BUCKETS: usize = 16; // 16 * 15min = 4h

const FLOATING_STORAGE_MIN_HOURS: f64 = 720.0;
const FLOATING_STORAGE_MIN_STS: i64 = 2;
const FLOATING_STORAGE_RISK: i32 = 25;

const ARCTIC_LAT_THRESHOLD: f64 = 66.5;
const ARCTIC_RECENT_POSITIONS: i64 = 50;
const ARCTIC_RISK: i32 = 25;
const ICE_CLASS_KEYWORDS: &[&str] =
    &["ice", "arctic", "polar", "ice class", "ice-class", "1a", "1b", "1c"];

fn effective_heading(p: &AisPosition) -> Option<f64> {
    p.cog_deg.or(p.heading_deg)
}

fn convoy_score(duration_hours: f64) -> i32 {
    if duration_hours >= 24.0 {
        35
    } else if duration_hours >= 8.0 {
        25
    } else {
        15
    }
}

fn build_index(positions: &[(i64, AisPosition)]) -> HashMap<(i64, i32, i32), HashMap<i64, AisPosition>> {
    let mut index: HashMap<(i64, i32, i32), HashMap<i64, AisPosition>> = HashMap::new();
    for (vessel_id, p) in positions {
        let cell = grid_cell(p.lat, p.lon);
        let key = (time_bucket_15m(p.timestamp_utc), cell.0, cell.1);
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

#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, settings: &Settings) -> Result<Stats> {
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
                if distance >= CONVOY_DISTANCE_NM {
                    continue;
                }
                if a.sog_kn.unwrap_or(0.0) <= CONVOY_MIN_SOG_KN || b.sog_kn.unwrap_or(0.0) <= CONVOY_MIN_SOG_KN {
                    continue;
                }
                match (effective_heading(a), effective_heading(b)) {
                    (Some(ha), Some(hb)) if heading_delta_deg(ha, hb) > CONVOY_HEADING_DELTA_DEG => continue,
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

    let mut active: HashMap<(i64, i64), (i64, i64, Vec<AisPosition>)> = HashMap::new();
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

        let finished: Vec<(i64, i64)> = active.keys().filter(|k| !present.contains(k)).copied().collect();
        for key in finished {
            if let Some((start_bucket, last_bucket, positions)) = active.remove(&key) {
                flush_convoy_run(db, &mut stats, start_bucket, last_bucket, &positions)?;
            }
        }
    }
    for (_key, (start_bucket, last_bucket, positions)) in active {
        flush_convoy_run(db, &mut stats, start_bucket, last_bucket, &positions)?;
    }

    if settings.convoy_detection_enabled {
        for &vessel_id in &vessel_ids {
            detect_floating_storage(db, &mut stats, vessel_id)?;
            detect_arctic_no_ice_class(db, &mut stats, vessel_id)?;
        }
    }

    Ok(stats)
}

fn flush_convoy_run(
    db: &Database,
    stats: &mut Stats,
    start_bucket: i64,
    last_bucket: i64,
    positions: &[AisPosition],
) -> Result<()> {
    let run_length = (last_bucket - start_bucket + 1) as usize;
    if run_length < CONVOY_MIN_CONSECUTIVE_BUCKETS || positions.is_empty() {
        return Ok(());
    }
    let start_utc = positions.iter().map(|p| p.timestamp_utc).min().unwrap();
    let end_utc = positions.iter().map(|p| p.timestamp_utc).max().unwrap();
    let duration_hours = (end_utc - start_utc).num_seconds() as f64 / 3600.0;

    let vessel_a = positions[0].vessel_id;
    let vessel_b = positions.iter().map(|p| p.vessel_id).find(|id| *id != vessel_a).unwrap_or(vessel_a);

    let inserted = db.insert_convoy_event(
        vessel_a,
        vessel_b,
        start_utc,
        end_utc,
        convoy_score(duration_hours),
        None,
        None,
    )?;
    stats.record(inserted);
    Ok(())
}

/// A vessel loitering at least 720h total and party to at least two STS
/// events reads as floating storage — a self-referential convoy row flags
/// it rather than a pairwise one.
fn detect_floating_storage(db: &Database, stats: &mut Stats, vessel_id: i64) -> Result<()> {
    stats.candidates_examined += 1;
    let total_hours = db.total_loitering_hours(vessel_id)?;
    let sts_count = db.sts_event_count_for_vessel(vessel_id)?;
    if total_hours < FLOATING_STORAGE_MIN_HOURS || sts_count < FLOATING_STORAGE_MIN_STS {
        return Ok(());
    }
    let now = chrono::Utc::now();
    let inserted = db.insert_convoy_event(
        vessel_id,
        vessel_id,
        now,
        now,
        FLOATING_STORAGE_RISK,
        Some(FlagKind::FloatingStorage),
        Some(serde_json::json!({ "total_loitering_hours": total_hours, "sts_event_count": sts_count })),
    )?;
    stats.record(inserted);
    Ok(())
}

/// A tanker whose recent track intersects an Arctic corridor above 66.5°N
/// without an ice-class rating in its vessel type string.
fn detect_arctic_no_ice_class(db: &Database, stats: &mut Stats, vessel_id: i64) -> Result<()> {
    stats.candidates_examined += 1;
    let Some(vessel) = db.get_vessel(vessel_id)? else {
        return Ok(());
    };
    let Some(vessel_type) = &vessel.vessel_type else {
        return Ok(());
    };
    let lower_type = vessel_type.to_lowercase();
    if !lower_type.contains("tanker") {
        return Ok(());
    }
    if ICE_CLASS_KEYWORDS.iter().any(|kw| lower_type.contains(kw)) {
        return Ok(());
    }

    let recent = db.recent_positions(vessel_id, ARCTIC_RECENT_POSITIONS)?;
    let arctic_hit = recent.iter().any(|p| {
        if p.lat > ARCTIC_LAT_THRESHOLD {
            return true;
        }
        db.corridors_containing(p.lat, p.lon, 0.1)
            .map(|cs| {
                cs.iter().any(|c| {
                    c.tags.iter().any(|t| {
                        let t = t.to_lowercase();
                        t == "arctic" || t == "nsr" || t == "ice_class_required"
                    })
                })
            })
            .unwrap_or(false)
    });
    if !arctic_hit {
        return Ok(());
    }

    let now = chrono::Utc::now();
    let inserted = db.insert_convoy_event(
        vessel_id,
        vessel_id,
        now,
        now,
        ARCTIC_RISK,
        Some(FlagKind::ArcticNoIceClass),
        Some(serde_json::json!({ "vessel_type": vessel_type })),
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
    fn sustained_fast_close_pair_opens_convoy_event() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let b = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..17 {
            let ts = t0 + Duration::minutes(15 * i);
            db.insert_position(a, ts, 10.0, 10.0, Some(10.0), Some(90.0), None, None, None, None, AisClass::A, "t")
                .unwrap();
            db.insert_position(b, ts, 10.01, 10.01, Some(10.0), Some(90.0), None, None, None, None, AisClass::A, "t")
                .unwrap();
        }
        let range = DateRange::new(t0, t0 + Duration::hours(5));
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);
    }

    #[test]
    fn arctic_tanker_without_ice_class_is_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        db.update_vessel_static(vid, None, None, None, Some("Crude Oil Tanker")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_position(vid, t0, 70.0, 30.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let mut stats = Stats::default();
        detect_arctic_no_ice_class(&db, &mut stats, vid).unwrap();
        assert_eq!(stats.events_inserted, 1);
        let events = db.convoy_events_for_vessel(vid).unwrap();
        assert_eq!(events[0].flag_kind, Some(FlagKind::ArcticNoIceClass));
    }

    #[test]
    fn ice_class_tanker_is_not_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        db.update_vessel_static(vid, None, None, None, Some("Ice Class 1A Tanker")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_position(vid, t0, 70.0, 30.0, Some(10.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let mut stats = Stats::default();
        detect_arctic_no_ice_class(&db, &mut stats, vid).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }
}
