//! Loitering detector: finds sustained low-speed dwelling, and the related
//! laid-up classification that flags a vessel anchored in one place for
//! weeks at a time, per §4.2.

use std::collections::BTreeMap;

use chrono::Duration;
use tracing::instrument;

use super::{DateRange, Stats};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::geo::{day_index, time_bucket_1h, BoundingBox};
use crate::models::CorridorType;

const SOG_LOITER_THRESHOLD_KN: f64 = 0.5;
const MIN_LOITER_BUCKETS: usize = 4; // 4 * 1h = MIN_LOITER_HOURS
const SUSTAINED_LOITER_HOURS: f64 = 12.0;
const RISK_BASELINE: i32 = 8;
const RISK_SUSTAINED: i32 = 20;
const CORRIDOR_TOLERANCE_DEG: f64 = 0.1;

const LAID_UP_TOLERANCE_DEG: f64 = 0.033; // approx 2 nm
const LAID_UP_30D: usize = 30;
const LAID_UP_60D: usize = 60;

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;

    for vessel_id in vessel_ids {
        stats.vessels_scanned += 1;
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;
        if positions.is_empty() {
            continue;
        }

        let mut buckets: BTreeMap<i64, Vec<&crate::models::AisPosition>> = BTreeMap::new();
        for p in &positions {
            buckets.entry(time_bucket_1h(p.timestamp_utc)).or_default().push(p);
        }

        let mut low_sog_buckets: Vec<i64> = Vec::new();
        for (&bucket, members) in &buckets {
            let mut sogs: Vec<f64> = members.iter().filter_map(|p| p.sog_kn).collect();
            let med = median(&mut sogs);
            if med.is_nan() || med < SOG_LOITER_THRESHOLD_KN {
                low_sog_buckets.push(bucket);
            }
        }

        let runs = contiguous_runs(&low_sog_buckets);
        for run in runs {
            stats.candidates_examined += 1;
            if run.len() < MIN_LOITER_BUCKETS {
                continue;
            }

            let first_bucket = run[0];
            let last_bucket = *run.last().unwrap();
            let run_positions: Vec<&crate::models::AisPosition> = run
                .iter()
                .filter_map(|b| buckets.get(b))
                .flatten()
                .copied()
                .collect();
            if run_positions.is_empty() {
                continue;
            }

            let start_utc = run_positions.iter().map(|p| p.timestamp_utc).min().unwrap();
            let end_utc = run_positions.iter().map(|p| p.timestamp_utc).max().unwrap();
            let mean_lat = run_positions.iter().map(|p| p.lat).sum::<f64>() / run_positions.len() as f64;
            let mean_lon = run_positions.iter().map(|p| p.lon).sum::<f64>() / run_positions.len() as f64;
            let mut sogs: Vec<f64> = run_positions.iter().filter_map(|p| p.sog_kn).collect();
            let median_sog_kn = median(&mut sogs);
            let median_sog_kn = if median_sog_kn.is_nan() { 0.0 } else { median_sog_kn };

            let corridor_id = db
                .corridors_containing(mean_lat, mean_lon, CORRIDOR_TOLERANCE_DEG)?
                .into_iter()
                .next()
                .map(|c| c.corridor_id);

            let duration_hours = (end_utc - start_utc).num_seconds() as f64 / 3600.0;
            let risk_component = if duration_hours >= SUSTAINED_LOITER_HOURS && corridor_id.is_some() {
                RISK_SUSTAINED
            } else {
                RISK_BASELINE
            };

            let linkage = Duration::hours(settings.loiter_gap_linkage_hours);
            let preceding_gap_id = db
                .gap_events_in_range(start_utc - linkage, start_utc)?
                .into_iter()
                .find(|g| g.vessel_id == vessel_id)
                .map(|g| g.gap_event_id);
            let following_gap_id = db
                .gap_events_in_range(end_utc, end_utc + linkage)?
                .into_iter()
                .find(|g| g.vessel_id == vessel_id)
                .map(|g| g.gap_event_id);
            let _ = first_bucket;
            let _ = last_bucket;

            let inserted = db.insert_loitering_event(
                vessel_id,
                start_utc,
                end_utc,
                median_sog_kn,
                mean_lat,
                mean_lon,
                corridor_id,
                preceding_gap_id,
                following_gap_id,
                risk_component,
            )?;
            stats.record(inserted);
        }

        detect_laid_up(db, vessel_id, range)?;
    }

    Ok(stats)
}

/// Splits a sorted list of bucket indices into runs of exactly-adjacent
/// indices (no gap tolerance between buckets within a run).
fn contiguous_runs(buckets: &[i64]) -> Vec<Vec<i64>> {
    let mut runs = Vec::new();
    let mut current: Vec<i64> = Vec::new();
    for &b in buckets {
        match current.last() {
            Some(&prev) if b == prev + 1 => current.push(b),
            None => current.push(b),
            _ => {
                runs.push(std::mem::take(&mut current));
                current.push(b);
            }
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Classifies a vessel as laid-up when its daily median position stays
/// within `LAID_UP_TOLERANCE_DEG` of a fixed run-anchor for 30/60+
/// consecutive days. The anchor is set once at the start of a run and never
/// re-anchored day to day; the run ends the first day a position falls
/// outside the anchor's tolerance box.
fn detect_laid_up(db: &Database, vessel_id: i64, range: DateRange) -> Result<()> {
    let lookback_start = range.from - Duration::days(LAID_UP_60D as i64 + 5);
    let positions = db.positions_in_range(vessel_id, lookback_start, range.to)?;
    if positions.is_empty() {
        return Ok(());
    }

    let mut by_day: BTreeMap<i64, Vec<&crate::models::AisPosition>> = BTreeMap::new();
    for p in &positions {
        by_day.entry(day_index(p.timestamp_utc)).or_default().push(p);
    }

    let mut daily_medians: Vec<(i64, f64, f64)> = Vec::new();
    for (&day, members) in &by_day {
        let mut lats: Vec<f64> = members.iter().map(|p| p.lat).collect();
        let mut lons: Vec<f64> = members.iter().map(|p| p.lon).collect();
        daily_medians.push((day, median(&mut lats), median(&mut lons)));
    }

    let mut best_run_len = 0usize;
    let mut best_anchor: Option<(f64, f64)> = None;
    let mut anchor: Option<(f64, f64)> = None;
    let mut run_len = 0usize;
    let mut prev_day: Option<i64> = None;

    for (day, lat, lon) in &daily_medians {
        let contiguous = prev_day.map(|p| *day == p + 1).unwrap_or(false);
        let within_anchor = anchor
            .map(|(alat, alon)| {
                BoundingBox {
                    min_lat: alat - LAID_UP_TOLERANCE_DEG,
                    max_lat: alat + LAID_UP_TOLERANCE_DEG,
                    min_lon: alon - LAID_UP_TOLERANCE_DEG,
                    max_lon: alon + LAID_UP_TOLERANCE_DEG,
                }
                .contains(*lat, *lon)
            })
            .unwrap_or(false);

        if contiguous && within_anchor {
            run_len += 1;
        } else {
            anchor = Some((*lat, *lon));
            run_len = 1;
        }

        if run_len > best_run_len {
            best_run_len = run_len;
            best_anchor = anchor;
        }
        prev_day = Some(*day);
    }

    let laid_up_30d = best_run_len >= LAID_UP_30D;
    let laid_up_60d = best_run_len >= LAID_UP_60D;
    let laid_up_in_sts_zone = if let Some((alat, alon)) = best_anchor {
        db.corridors_containing(alat, alon, CORRIDOR_TOLERANCE_DEG)?
            .iter()
            .any(|c| c.corridor_type == CorridorType::StsZone)
    } else {
        false
    };

    if laid_up_30d || laid_up_60d || laid_up_in_sts_zone {
        db.set_laid_up_flags(vessel_id, laid_up_30d, laid_up_60d, laid_up_in_sts_zone)?;
    }
    Ok(())
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
    fn sustained_low_sog_run_opens_loitering_event() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for h in 0..6 {
            let ts = t0 + Duration::hours(h);
            db.insert_position(vid, ts, 5.0, 5.0, Some(0.1), None, None, None, None, None, AisClass::A, "t")
                .unwrap();
        }
        let range = DateRange::new(t0, t0 + Duration::hours(6));
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 1);
        let events = db.loitering_events_for_vessel(vid).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn short_low_sog_run_does_not_open_event() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for h in 0..2 {
            let ts = t0 + Duration::hours(h);
            db.insert_position(vid, ts, 5.0, 5.0, Some(0.1), None, None, None, None, None, AisClass::A, "t")
                .unwrap();
        }
        let range = DateRange::new(t0, t0 + Duration::hours(2));
        let stats = detect(&db, range, &settings()).unwrap();
        assert_eq!(stats.events_inserted, 0);
    }

    #[test]
    fn contiguous_runs_split_on_nonadjacent_buckets() {
        let runs = contiguous_runs(&[1, 2, 3, 7, 8]);
        assert_eq!(runs, vec![vec![1, 2, 3], vec![7, 8]]);
    }
}
