//! Feed-outage detector: distinguishes a regional AIS blackout (many vessels
//! losing signal in the same corridor at once) from individual dark-vessel
//! behavior, per §4.2. Runs after the gap detector, before scoring, since it
//! only classifies gaps the gap detector already opened.

use std::collections::HashMap;

use chrono::Duration;
use tracing::{info, instrument};

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::models::FlagRisk;

const CLUSTER_WINDOW_HOURS: i64 = 2;
const BASELINE_LOOKBACK_DAYS: i64 = 90;
const MIN_BASELINE_WINDOWS: usize = 10;
const DEFAULT_THRESHOLD: usize = 5;
const EVASION_WINDOW_HOURS: i64 = 6;

#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let corridors = db.all_corridors()?;

    let mut window_start = range.from;
    while window_start < range.to {
        let window_end = (window_start + Duration::hours(CLUSTER_WINDOW_HOURS)).min(range.to);

        for corridor in &corridors {
            let gaps = db.gaps_by_corridor_window(corridor.corridor_id, window_start, window_end)?;
            stats.candidates_examined += gaps.len() as u64;
            if gaps.is_empty() {
                continue;
            }

            let distinct_vessels: std::collections::HashSet<i64> =
                gaps.iter().map(|g| g.vessel_id).collect();
            let threshold = outage_threshold(db, corridor.corridor_id, window_start)?;
            if distinct_vessels.len() < threshold {
                continue;
            }

            if already_high_risk_ratio(db, &distinct_vessels)? > settings.max_outage_ratio {
                info!(
                    corridor_id = corridor.corridor_id,
                    "feed-outage cluster rejected by anti-decoy guard"
                );
                continue;
            }

            for gap in &gaps {
                let evasive = db.has_spoofing_near(gap.vessel_id, gap.gap_start_utc, EVASION_WINDOW_HOURS)?
                    || db.has_sts_near(gap.vessel_id, gap.gap_start_utc, EVASION_WINDOW_HOURS)?;
                if evasive {
                    continue;
                }
                db.set_gap_feed_outage(gap.gap_event_id, true)?;
                stats.events_inserted += 1;
            }
        }

        window_start = window_end;
    }

    Ok(stats)
}

/// `max(3, 3 * P95(historical per-corridor per-2h gap counts over the
/// trailing 90 days))`, falling back to a fixed default of 5 when fewer than
/// `MIN_BASELINE_WINDOWS` historical windows exist — §9's resolved open
/// question on the feed-outage baseline.
fn outage_threshold(db: &Database, corridor_id: i64, as_of: chrono::DateTime<chrono::Utc>) -> Result<usize> {
    let lookback_start = as_of - Duration::days(BASELINE_LOOKBACK_DAYS);
    let history = db.gaps_by_corridor_window(corridor_id, lookback_start, as_of)?;

    let mut per_window: HashMap<i64, usize> = HashMap::new();
    for gap in &history {
        let window = gap.gap_start_utc.timestamp() / (CLUSTER_WINDOW_HOURS * 3600);
        *per_window.entry(window).or_insert(0) += 1;
    }

    if per_window.len() < MIN_BASELINE_WINDOWS {
        return Ok(DEFAULT_THRESHOLD);
    }

    let mut counts: Vec<usize> = per_window.into_values().collect();
    counts.sort_unstable();
    let idx = ((counts.len() as f64) * 0.95).ceil() as usize;
    let idx = idx.saturating_sub(1).min(counts.len() - 1);
    let p95 = counts[idx];

    Ok((3 * p95).max(3))
}

/// Fraction of the clustered vessels already carrying a high-risk flag
/// state — the anti-decoy guard rejects a cluster dominated by vessels that
/// would read as high-risk regardless of this outage.
fn already_high_risk_ratio(db: &Database, vessel_ids: &std::collections::HashSet<i64>) -> Result<f64> {
    if vessel_ids.is_empty() {
        return Ok(0.0);
    }
    let mut high_risk = 0usize;
    for &vessel_id in vessel_ids {
        if let Some(v) = db.get_vessel(vessel_id)? {
            if v.flag_risk == FlagRisk::HighRisk {
                high_risk += 1;
            }
        }
    }
    Ok(high_risk as f64 / vessel_ids.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;
    use crate::models::{AisClass, CorridorType};
    use chrono::{TimeZone, Utc};

    fn settings() -> Settings {
        Settings::from_env().unwrap()
    }

    fn open_gap(db: &Database, mmsi: &str, corridor_id: i64, start: chrono::DateTime<Utc>) -> i64 {
        let vid = db.upsert_vessel(mmsi, None, FlagRisk::Unknown).unwrap();
        let a = db
            .insert_position(vid, start, 10.0, 10.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap()
            .unwrap();
        let end = start + Duration::hours(3);
        let b = db
            .insert_position(vid, end, 10.0, 10.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap()
            .unwrap();
        db.insert_gap_event(vid, a, b, start, end, Some(5.0), 0.0, 10.0, false, 0.0, Some(corridor_id), false)
            .unwrap();
        vid
    }

    #[test]
    fn cluster_above_fallback_threshold_marks_feed_outage() {
        let db = Database::open_in_memory().unwrap();
        let corridor_id = db
            .insert_corridor(
                "Test Strait",
                CorridorType::ExportRoute,
                BoundingBox { min_lat: 0.0, max_lat: 20.0, min_lon: 0.0, max_lon: 20.0 },
                1.0,
                false,
                &[],
            )
            .unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            open_gap(&db, &format!("20901000{i}"), corridor_id, start);
        }

        let stats = detect(&db, DateRange::new(start, start + Duration::hours(2)), &settings()).unwrap();
        assert_eq!(stats.events_inserted, 5);
    }

    #[test]
    fn below_threshold_cluster_is_not_marked() {
        let db = Database::open_in_memory().unwrap();
        let corridor_id = db
            .insert_corridor(
                "Test Strait",
                CorridorType::ExportRoute,
                BoundingBox { min_lat: 0.0, max_lat: 20.0, min_lon: 0.0, max_lon: 20.0 },
                1.0,
                false,
                &[],
            )
            .unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        open_gap(&db, "209010001", corridor_id, start);
        open_gap(&db, "209010002", corridor_id, start);

        let stats = detect(&db, DateRange::new(start, start + Duration::hours(2)), &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }
}
