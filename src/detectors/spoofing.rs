//! Spoofing & AIS-integrity detector: the widest detector in the fleet,
//! covering thirteen distinct anomaly sub-types per §4.2.3 — circular and
//! anchored-at-speed position spoofing, nav-status inconsistency, impossible
//! position jumps, stale repeated telemetry, cross-receiver disagreement,
//! shared-identity handshakes, implausible high-speed transits, statistically
//! synthetic tracks, scrapped-IMO reuse, track replay, and destination-field
//! manipulation. Every sub-check writes through `insert_spoofing_anomaly`,
//! so re-running a window is idempotent the same way every other detector is.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{instrument, warn};

use super::{DateRange, Stats};
use crate::config::{Settings, ScrappedVesselsConfig};
use crate::db::Database;
use crate::error::Result;
use crate::geo::{bearing_deg, grid_cell, haversine_nm, heading_delta_deg, time_bucket_15m};
use crate::models::{AisPosition, CorridorType, SpoofingType, Vessel};

const CIRCLE_MIN_POSITIONS: usize = 12;
const CIRCLE_STDEV_DEG: f64 = 0.05;
const CIRCLE_MIN_MEDIAN_SOG_KN: f64 = 3.0;
const CIRCLE_RISK: i32 = 20;

const ANCHOR_NAV_STATUS: i32 = 1;
const ANCHOR_MAX_SOG_KN: f64 = 0.1;
const ANCHOR_MIN_HOURS: f64 = 72.0;
const ANCHOR_RISK: i32 = 15;
const CORRIDOR_TOLERANCE_DEG: f64 = 0.1;

const NAV_MISMATCH_SOG_KN: f64 = 2.0;
const NAV_MISMATCH_RISK: i32 = 15;

const ERRATIC_WINDOW_MINUTES: i64 = 60;
const ERRATIC_MIN_TRANSITIONS: usize = 3;
const ERRATIC_RISK: i32 = 15;

const IMPOSSIBLE_JUMP_SPEED_KN: f64 = 30.0;
const IMPOSSIBLE_JUMP_EXTREME_KN: f64 = 100.0;
const MMSI_REUSE_RISK_MODERATE: i32 = 40;
const MMSI_REUSE_RISK_EXTREME: i32 = 55;

const STALE_MIN_CONSECUTIVE: usize = 10;
const STALE_MIN_SPAN_HOURS: f64 = 2.0;
const STALE_MIN_MEDIAN_SOG_KN: f64 = 0.5;
const STALE_RISK: i32 = 20;

const CROSS_RECEIVER_WINDOW_MINUTES: i64 = 10;
const CROSS_RECEIVER_DISTANCE_NM: f64 = 5.0;
const CROSS_RECEIVER_RISK: i32 = 15;

const IDENTITY_SWAP_DISTANCE_NM: f64 = 1.0;
const IDENTITY_SWAP_WINDOW_MINUTES: i64 = 60;
const IDENTITY_SWAP_RISK: i32 = 30;

const FAKE_POSITION_SPEED_KN: f64 = 25.0;
const FAKE_POSITION_MIN_GAP_SECONDS: i64 = 36;
const FAKE_POSITION_MIN_DISTANCE_NM: f64 = 1.0;
const FAKE_POSITION_RISK: i32 = 20;

const SYNTHETIC_TRACK_WINDOW_HOURS: i64 = 48;
const SYNTHETIC_TRACK_MIN_POSITIONS: usize = 10;

const IMO_FRAUD_RISK: i32 = 30;

const TRACK_REPLAY_MIN_POSITIONS: usize = 200;
const TRACK_REPLAY_WINDOW_DAYS: i64 = 7;
const TRACK_REPLAY_LOOKBACK_MIN_DAYS: i64 = 30;
const TRACK_REPLAY_LOOKBACK_MAX_DAYS: i64 = 90;
const TRACK_REPLAY_MIN_CORRELATION: f64 = 0.9;
const TRACK_REPLAY_RISK: i32 = 25;

const DESTINATION_WINDOW_DAYS: i64 = 7;
const DESTINATION_MAX_DISTINCT: usize = 3;
const DESTINATION_STS_BEARING_DELTA_DEG: f64 = 30.0;
const DESTINATION_RISK: i32 = 15;
const GENERIC_DESTINATIONS: &[&str] = &["unknown", "n/a", "na", "none", "tbd", "for orders", "at sea", "xxxxxxx"];
const EU_PORT_HINTS: &[&str] = &[
    "rotterdam", "antwerp", "hamburg", "gdansk", "piraeus", "valencia", "marseille", "le havre",
];

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

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..a.len() {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va <= 0.0 || vb <= 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn detect(db: &Database, range: DateRange, settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    let scrapped_cfg = load_scrapped_config(settings);

    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;
    for &vessel_id in &vessel_ids {
        stats.vessels_scanned += 1;
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;
        if positions.is_empty() {
            continue;
        }
        let Some(vessel) = db.get_vessel(vessel_id)? else {
            continue;
        };

        detect_circle_spoof(db, &mut stats, vessel_id, &positions)?;
        detect_anchor_spoof(db, &mut stats, vessel_id, &positions)?;
        detect_nav_status_mismatch(db, &mut stats, vessel_id, &positions)?;
        detect_erratic_nav_status(db, &mut stats, vessel_id, &positions)?;
        detect_impossible_jump(db, &mut stats, vessel_id, &positions)?;
        detect_stale_ais(db, &mut stats, vessel_id, &positions)?;
        detect_cross_receiver_disagreement(db, &mut stats, &vessel, range)?;
        detect_fake_position(db, &mut stats, vessel_id, &positions)?;
        detect_synthetic_track(db, &mut stats, vessel_id, &positions)?;
        detect_track_replay(db, &mut stats, &vessel, range)?;
        detect_destination_deviation(db, &mut stats, vessel_id, &positions, range)?;
        if let Some(cfg) = &scrapped_cfg {
            detect_scrapped_imo_reuse(db, &mut stats, &vessel, cfg)?;
        }
    }

    detect_identity_swap(db, &mut stats, &vessel_ids, range)?;

    Ok(stats)
}

fn load_scrapped_config(settings: &Settings) -> Option<ScrappedVesselsConfig> {
    let path = std::path::Path::new(&settings.config_dir).join("scrapped_vessels.yaml");
    match ScrappedVesselsConfig::load(&path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(error = %e, "scrapped_vessels.yaml unavailable, skipping scrapped-IMO check");
            None
        }
    }
}

/// Tight circular dwelling at speed: low positional spread but a median
/// speed over threshold, the signature of a spoofer orbiting a fixed point
/// instead of actually loitering.
fn detect_circle_spoof(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    stats.candidates_examined += 1;
    if positions.len() < CIRCLE_MIN_POSITIONS {
        return Ok(());
    }
    let lats: Vec<f64> = positions.iter().map(|p| p.lat).collect();
    let lons: Vec<f64> = positions.iter().map(|p| p.lon).collect();
    let mean_lat = mean(&lats);
    let lat_stdev = stdev(&lats);
    let lon_stdev_corrected = stdev(&lons) * mean_lat.to_radians().cos().abs().max(1e-6);
    let mut sogs: Vec<f64> = positions.iter().filter_map(|p| p.sog_kn).collect();
    let median_sog = median(&mut sogs);

    if lat_stdev < CIRCLE_STDEV_DEG
        && lon_stdev_corrected < CIRCLE_STDEV_DEG
        && !median_sog.is_nan()
        && median_sog > CIRCLE_MIN_MEDIAN_SOG_KN
    {
        let start = positions.iter().map(|p| p.timestamp_utc).min().unwrap();
        let end = positions.iter().map(|p| p.timestamp_utc).max().unwrap();
        let inserted = db.insert_spoofing_anomaly(
            vessel_id,
            SpoofingType::CircleSpoof,
            start,
            end,
            serde_json::json!({ "lat_stdev_deg": lat_stdev, "lon_stdev_deg": lon_stdev_corrected, "median_sog_kn": median_sog }),
            CIRCLE_RISK,
        )?;
        stats.record(inserted);
    }
    Ok(())
}

/// Reports "at anchor" (`nav_status == 1`) with essentially zero speed for
/// days at a stretch while not inside an anchorage-holding corridor — a
/// vessel parked somewhere it has no legitimate reason to be anchored.
fn detect_anchor_spoof(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    let mut run_start: Option<usize> = None;
    for (i, p) in positions.iter().enumerate() {
        let anchored = p.nav_status == Some(ANCHOR_NAV_STATUS) && p.sog_kn.unwrap_or(0.0) <= ANCHOR_MAX_SOG_KN;
        if anchored {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            flush_anchor_run(db, stats, vessel_id, &positions[start..i])?;
        }
    }
    if let Some(start) = run_start {
        flush_anchor_run(db, stats, vessel_id, &positions[start..])?;
    }
    Ok(())
}

fn flush_anchor_run(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    run: &[AisPosition],
) -> Result<()> {
    stats.candidates_examined += 1;
    if run.len() < 2 {
        return Ok(());
    }
    let start = run.first().unwrap().timestamp_utc;
    let end = run.last().unwrap().timestamp_utc;
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    if hours < ANCHOR_MIN_HOURS {
        return Ok(());
    }
    let mean_lat = mean(&run.iter().map(|p| p.lat).collect::<Vec<_>>());
    let mean_lon = mean(&run.iter().map(|p| p.lon).collect::<Vec<_>>());
    let in_anchorage = db
        .corridors_containing(mean_lat, mean_lon, CORRIDOR_TOLERANCE_DEG)?
        .iter()
        .any(|c| c.corridor_type == CorridorType::AnchorageHolding);
    if in_anchorage {
        return Ok(());
    }
    let inserted = db.insert_spoofing_anomaly(
        vessel_id,
        SpoofingType::AnchorSpoof,
        start,
        end,
        serde_json::json!({ "duration_hours": hours, "mean_lat": mean_lat, "mean_lon": mean_lon }),
        ANCHOR_RISK,
    )?;
    stats.record(inserted);
    Ok(())
}

/// A position reporting "at anchor" while moving faster than anchored
/// vessels plausibly drift.
fn detect_nav_status_mismatch(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    for p in positions {
        stats.candidates_examined += 1;
        if p.nav_status == Some(ANCHOR_NAV_STATUS) && p.sog_kn.unwrap_or(0.0) > NAV_MISMATCH_SOG_KN {
            let inserted = db.insert_spoofing_anomaly(
                vessel_id,
                SpoofingType::NavStatusMismatch,
                p.timestamp_utc,
                p.timestamp_utc,
                serde_json::json!({ "sog_kn": p.sog_kn }),
                NAV_MISMATCH_RISK,
            )?;
            stats.record(inserted);
        }
    }
    Ok(())
}

/// Flags bursts of nav-status changes clustered tightly in time — a greedy,
/// non-overlapping scan over 60-minute windows so one erratic burst isn't
/// double-counted across adjacent windows.
fn detect_erratic_nav_status(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    let mut i = 0;
    while i < positions.len() {
        stats.candidates_examined += 1;
        let window_end = positions[i].timestamp_utc + Duration::minutes(ERRATIC_WINDOW_MINUTES);
        let mut j = i;
        let mut transitions = 0usize;
        let mut last_status = positions[i].nav_status;
        while j + 1 < positions.len() && positions[j + 1].timestamp_utc <= window_end {
            j += 1;
            if positions[j].nav_status != last_status {
                transitions += 1;
                last_status = positions[j].nav_status;
            }
        }
        if transitions >= ERRATIC_MIN_TRANSITIONS {
            let inserted = db.insert_spoofing_anomaly(
                vessel_id,
                SpoofingType::ErraticNavStatus,
                positions[i].timestamp_utc,
                positions[j].timestamp_utc,
                serde_json::json!({ "transitions": transitions }),
                ERRATIC_RISK,
            )?;
            stats.record(inserted);
            i = j + 1; // non-overlapping: skip past this window entirely
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// A transit between consecutive positions implying a speed no vessel can
/// sustain — the MMSI most likely jumped between two physically distinct
/// craft broadcasting the same identity.
fn detect_impossible_jump(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    for pair in positions.windows(2) {
        stats.candidates_examined += 1;
        let (a, b) = (&pair[0], &pair[1]);
        let hours = (b.timestamp_utc - a.timestamp_utc).num_seconds() as f64 / 3600.0;
        if hours <= 0.0 {
            continue;
        }
        let distance_nm = haversine_nm(a.lat, a.lon, b.lat, b.lon);
        let implied_speed_kn = distance_nm / hours;
        if implied_speed_kn > IMPOSSIBLE_JUMP_SPEED_KN {
            let risk = if implied_speed_kn > IMPOSSIBLE_JUMP_EXTREME_KN {
                MMSI_REUSE_RISK_EXTREME
            } else {
                MMSI_REUSE_RISK_MODERATE
            };
            let inserted = db.insert_spoofing_anomaly(
                vessel_id,
                SpoofingType::MmsiReuse,
                a.timestamp_utc,
                b.timestamp_utc,
                serde_json::json!({ "implied_speed_kn": implied_speed_kn, "distance_nm": distance_nm }),
                risk,
            )?;
            stats.record(inserted);
        }
    }
    Ok(())
}

/// Identical heading/SOG/COG repeated across many consecutive positions
/// spanning hours, excluding genuinely anchored vessels — a receiver or
/// spoofer replaying one stale fix rather than a live feed.
fn detect_stale_ais(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    let mut run_start = 0usize;
    for i in 1..=positions.len() {
        let same_as_prev = i < positions.len()
            && positions[i].heading_deg == positions[i - 1].heading_deg
            && positions[i].sog_kn == positions[i - 1].sog_kn
            && positions[i].cog_deg == positions[i - 1].cog_deg;
        if !same_as_prev {
            flush_stale_run(db, stats, vessel_id, &positions[run_start..i])?;
            run_start = i;
        }
    }
    Ok(())
}

fn flush_stale_run(db: &Database, stats: &mut Stats, vessel_id: i64, run: &[AisPosition]) -> Result<()> {
    stats.candidates_examined += 1;
    if run.len() < STALE_MIN_CONSECUTIVE {
        return Ok(());
    }
    let start = run.first().unwrap().timestamp_utc;
    let end = run.last().unwrap().timestamp_utc;
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    if hours < STALE_MIN_SPAN_HOURS {
        return Ok(());
    }
    if run.iter().any(|p| p.nav_status == Some(ANCHOR_NAV_STATUS)) {
        return Ok(());
    }
    let mut sogs: Vec<f64> = run.iter().filter_map(|p| p.sog_kn).collect();
    let median_sog = median(&mut sogs);
    if median_sog.is_nan() || median_sog < STALE_MIN_MEDIAN_SOG_KN {
        return Ok(());
    }
    let inserted = db.insert_spoofing_anomaly(
        vessel_id,
        SpoofingType::StaleAisData,
        start,
        end,
        serde_json::json!({ "run_length": run.len(), "span_hours": hours }),
        STALE_RISK,
    )?;
    stats.record(inserted);
    Ok(())
}

/// Two receivers claiming materially different positions for the same MMSI
/// at nearly the same instant — the receivers aren't disagreeing about a
/// moving target, they're disagreeing about where it is right now.
fn detect_cross_receiver_disagreement(
    db: &Database,
    stats: &mut Stats,
    vessel: &Vessel,
    range: DateRange,
) -> Result<()> {
    let observations = db.observations_in_range(&vessel.mmsi, range.from, range.to)?;
    let mut by_window: HashMap<i64, Vec<&crate::models::AisObservation>> = HashMap::new();
    for obs in &observations {
        let window = obs.timestamp_utc.timestamp() / (CROSS_RECEIVER_WINDOW_MINUTES * 60);
        by_window.entry(window).or_default().push(obs);
    }
    for (_window, obs) in by_window {
        stats.candidates_examined += 1;
        for i in 0..obs.len() {
            for j in (i + 1)..obs.len() {
                if obs[i].source == obs[j].source {
                    continue;
                }
                let distance_nm = haversine_nm(obs[i].lat, obs[i].lon, obs[j].lat, obs[j].lon);
                if distance_nm > CROSS_RECEIVER_DISTANCE_NM {
                    let inserted = db.insert_spoofing_anomaly(
                        vessel.vessel_id,
                        SpoofingType::CrossReceiverDisagreement,
                        obs[i].timestamp_utc.min(obs[j].timestamp_utc),
                        obs[i].timestamp_utc.max(obs[j].timestamp_utc),
                        serde_json::json!({
                            "source_a": obs[i].source, "source_b": obs[j].source, "distance_nm": distance_nm
                        }),
                        CROSS_RECEIVER_RISK,
                    )?;
                    stats.record(inserted);
                }
            }
        }
    }
    Ok(())
}

/// Two distinct vessels sharing a reported IMO number while passing within a
/// nautical mile of one another — the handshake signature of an identity
/// swap, since a real IMO belongs to exactly one hull.
fn detect_identity_swap(
    db: &Database,
    stats: &mut Stats,
    vessel_ids: &[i64],
    range: DateRange,
) -> Result<()> {
    let mut by_imo: HashMap<String, Vec<i64>> = HashMap::new();
    for &vessel_id in vessel_ids {
        if let Some(v) = db.get_vessel(vessel_id)? {
            if let Some(imo) = v.imo {
                by_imo.entry(imo).or_default().push(vessel_id);
            }
        }
    }

    for (imo, vessels) in by_imo {
        if vessels.len() < 2 {
            continue;
        }
        for i in 0..vessels.len() {
            for j in (i + 1)..vessels.len() {
                stats.candidates_examined += 1;
                let (a_id, b_id) = (vessels[i], vessels[j]);
                let a_positions = db.positions_in_range(a_id, range.from, range.to)?;
                let b_positions = db.positions_in_range(b_id, range.from, range.to)?;
                if let Some((ts, distance_nm)) = closest_encounter(&a_positions, &b_positions) {
                    if distance_nm <= IDENTITY_SWAP_DISTANCE_NM {
                        let window = Duration::minutes(IDENTITY_SWAP_WINDOW_MINUTES);
                        for (vid, other) in [(a_id, b_id), (b_id, a_id)] {
                            let inserted = db.insert_spoofing_anomaly(
                                vid,
                                SpoofingType::IdentitySwap,
                                ts - window,
                                ts + window,
                                serde_json::json!({ "shared_imo": imo, "other_vessel_id": other, "distance_nm": distance_nm }),
                                IDENTITY_SWAP_RISK,
                            )?;
                            stats.record(inserted);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Nearest-in-time pair of positions between two tracks, with the distance
/// between them at that instant.
fn closest_encounter(a: &[AisPosition], b: &[AisPosition]) -> Option<(DateTime<Utc>, f64)> {
    let mut best: Option<(DateTime<Utc>, f64)> = None;
    for pa in a {
        for pb in b {
            let delta = (pa.timestamp_utc - pb.timestamp_utc).num_minutes().abs();
            if delta > IDENTITY_SWAP_WINDOW_MINUTES {
                continue;
            }
            let distance_nm = haversine_nm(pa.lat, pa.lon, pb.lat, pb.lon);
            if best.map(|(_, d)| distance_nm < d).unwrap_or(true) {
                best = Some((pa.timestamp_utc.max(pb.timestamp_utc), distance_nm));
            }
        }
    }
    best
}

/// A high-speed transit implying the vessel covered real distance in too
/// short an interval to have actually broadcast a position along the way —
/// a fabricated waypoint rather than a missed one.
fn detect_fake_position(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    for pair in positions.windows(2) {
        stats.candidates_examined += 1;
        let (a, b) = (&pair[0], &pair[1]);
        let seconds = (b.timestamp_utc - a.timestamp_utc).num_seconds();
        if seconds < FAKE_POSITION_MIN_GAP_SECONDS {
            continue;
        }
        let distance_nm = haversine_nm(a.lat, a.lon, b.lat, b.lon);
        if distance_nm < FAKE_POSITION_MIN_DISTANCE_NM {
            continue;
        }
        let implied_speed_kn = distance_nm / (seconds as f64 / 3600.0);
        if implied_speed_kn > FAKE_POSITION_SPEED_KN {
            let inserted = db.insert_spoofing_anomaly(
                vessel_id,
                SpoofingType::FakePortCall,
                a.timestamp_utc,
                b.timestamp_utc,
                serde_json::json!({ "implied_speed_kn": implied_speed_kn, "distance_nm": distance_nm }),
                FAKE_POSITION_RISK,
            )?;
            stats.record(inserted);
        }
    }
    Ok(())
}

/// Scores a 48-hour window against five statistical tests a genuinely noisy
/// AIS track almost never passes all of at once: near-constant reporting
/// interval, near-constant speed, bearing deltas that change by a fixed
/// increment, COG tracking the great-circle bearing exactly, and a
/// monotonic course with no reversals.
fn detect_synthetic_track(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
) -> Result<()> {
    if positions.is_empty() {
        return Ok(());
    }
    let window_start_limit = positions.last().unwrap().timestamp_utc - Duration::hours(SYNTHETIC_TRACK_WINDOW_HOURS);
    let window: Vec<&AisPosition> = positions
        .iter()
        .filter(|p| p.timestamp_utc >= window_start_limit)
        .collect();
    stats.candidates_examined += 1;
    if window.len() < SYNTHETIC_TRACK_MIN_POSITIONS {
        return Ok(());
    }

    let intervals: Vec<f64> = window
        .windows(2)
        .map(|w| (w[1].timestamp_utc - w[0].timestamp_utc).num_seconds() as f64)
        .collect();
    let interval_mean = mean(&intervals);
    let interval_regular = interval_mean > 0.0 && stdev(&intervals) / interval_mean < 0.05;

    let sogs: Vec<f64> = window.iter().filter_map(|p| p.sog_kn).collect();
    let speed_constant = sogs.len() == window.len() && stdev(&sogs) < 0.1;

    let bearings: Vec<f64> = window
        .windows(2)
        .map(|w| bearing_deg(w[0].lat, w[0].lon, w[1].lat, w[1].lon))
        .collect();
    let bearing_deltas: Vec<f64> = bearings.windows(2).map(|w| heading_delta_deg(w[0], w[1])).collect();
    let bearing_linear = !bearing_deltas.is_empty() && stdev(&bearing_deltas) < 1.0;

    let cog_matches_bearing = window.windows(2).zip(&bearings).all(|(w, bearing)| {
        w[0].cog_deg
            .map(|cog| heading_delta_deg(cog, *bearing) < 1.0)
            .unwrap_or(false)
    });

    let no_reversals = bearing_deltas.iter().all(|d| *d < 90.0);

    let passed = [interval_regular, speed_constant, bearing_linear, cog_matches_bearing, no_reversals]
        .iter()
        .filter(|p| **p)
        .count();

    let risk = match passed {
        5 => Some(45),
        4 => Some(35),
        3 => Some(25),
        _ => None,
    };

    if let Some(risk) = risk {
        let inserted = db.insert_spoofing_anomaly(
            vessel_id,
            SpoofingType::SyntheticTrack,
            window.first().unwrap().timestamp_utc,
            window.last().unwrap().timestamp_utc,
            serde_json::json!({ "tests_passed": passed }),
            risk,
        )?;
        stats.record(inserted);
    }
    Ok(())
}

/// A vessel's IMO number matching a registry-confirmed scrapped hull — the
/// physical vessel no longer exists, so whatever is broadcasting under its
/// IMO is necessarily misrepresenting its identity.
fn detect_scrapped_imo_reuse(
    db: &Database,
    stats: &mut Stats,
    vessel: &Vessel,
    cfg: &ScrappedVesselsConfig,
) -> Result<()> {
    stats.candidates_examined += 1;
    let Some(imo) = &vessel.imo else {
        return Ok(());
    };
    if !cfg.is_scrapped(imo) {
        return Ok(());
    }
    let now = Utc::now();
    let inserted = db.insert_spoofing_anomaly(
        vessel.vessel_id,
        SpoofingType::ImoFraud,
        now,
        now,
        serde_json::json!({ "imo": imo }),
        IMO_FRAUD_RISK,
    )?;
    stats.record(inserted);
    Ok(())
}

/// Correlates the current week's track, binned by hour-of-day, against a
/// track from 30-90 days prior — a near-perfect correlation suggests the
/// same recorded track is being replayed rather than genuinely sailed.
fn detect_track_replay(db: &Database, stats: &mut Stats, vessel: &Vessel, range: DateRange) -> Result<()> {
    stats.candidates_examined += 1;
    if vessel.vessel_laid_up_30d {
        return Ok(()); // anchored vessels are excluded
    }
    let recent_start = range.to - Duration::days(TRACK_REPLAY_WINDOW_DAYS);
    let recent = db.positions_in_range(vessel.vessel_id, recent_start, range.to)?;
    if recent.len() < TRACK_REPLAY_MIN_POSITIONS {
        return Ok(());
    }

    let prior_end = range.to - Duration::days(TRACK_REPLAY_LOOKBACK_MIN_DAYS);
    let prior_start = range.to - Duration::days(TRACK_REPLAY_LOOKBACK_MAX_DAYS);
    let prior = db.positions_in_range(vessel.vessel_id, prior_start, prior_end)?;
    if prior.len() < TRACK_REPLAY_MIN_POSITIONS {
        return Ok(());
    }

    let recent_bins = hour_of_day_bins(&recent);
    let prior_bins = hour_of_day_bins(&prior);
    let correlation = pearson(&recent_bins, &prior_bins);

    if correlation >= TRACK_REPLAY_MIN_CORRELATION {
        let inserted = db.insert_spoofing_anomaly(
            vessel.vessel_id,
            SpoofingType::TrackReplay,
            recent_start,
            range.to,
            serde_json::json!({ "correlation": correlation }),
            TRACK_REPLAY_RISK,
        )?;
        stats.record(inserted);
    }
    Ok(())
}

/// 24-length vector of mean latitude per hour-of-day bin (0.0 for empty
/// bins), used to compare two tracks' diurnal shape independent of date.
fn hour_of_day_bins(positions: &[AisPosition]) -> Vec<f64> {
    let mut bins: Vec<Vec<f64>> = vec![Vec::new(); 24];
    for p in positions {
        bins[p.timestamp_utc.hour() as usize].push(p.lat);
    }
    bins.iter().map(|b| mean(b)).collect()
}

/// Flags destination-field manipulation: a blank/generic destination, an
/// implausible number of distinct destinations in a week, or a declared EU
/// port paired with a course aimed at a known STS zone instead.
fn detect_destination_deviation(
    db: &Database,
    stats: &mut Stats,
    vessel_id: i64,
    positions: &[AisPosition],
    range: DateRange,
) -> Result<()> {
    stats.candidates_examined += 1;
    let window_start = range.to - Duration::days(DESTINATION_WINDOW_DAYS);
    let window: Vec<&AisPosition> = positions.iter().filter(|p| p.timestamp_utc >= window_start).collect();
    if window.is_empty() {
        return Ok(());
    }

    let destinations: Vec<&str> = window.iter().filter_map(|p| p.destination.as_deref()).collect();
    let distinct: std::collections::HashSet<String> =
        destinations.iter().map(|d| d.trim().to_lowercase()).collect();

    let generic_hit = destinations
        .iter()
        .any(|d| GENERIC_DESTINATIONS.contains(&d.trim().to_lowercase().as_str()));
    let too_many_destinations = distinct.len() > DESTINATION_MAX_DISTINCT;

    let last = window.last().unwrap();
    let eu_bound = last
        .destination
        .as_deref()
        .map(|d| {
            let lower = d.to_lowercase();
            EU_PORT_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .unwrap_or(false);

    let mut sts_deviation = false;
    if eu_bound {
        if let Some(cog) = last.cog_deg {
            for corridor in db.all_corridors()? {
                if corridor.corridor_type != CorridorType::StsZone {
                    continue;
                }
                let center_lat = (corridor.bbox.min_lat + corridor.bbox.max_lat) / 2.0;
                let center_lon = (corridor.bbox.min_lon + corridor.bbox.max_lon) / 2.0;
                let bearing = bearing_deg(last.lat, last.lon, center_lat, center_lon);
                if heading_delta_deg(cog, bearing) <= DESTINATION_STS_BEARING_DELTA_DEG {
                    sts_deviation = true;
                    break;
                }
            }
        }
    }

    if generic_hit || too_many_destinations || sts_deviation {
        let inserted = db.insert_spoofing_anomaly(
            vessel_id,
            SpoofingType::DestinationDeviation,
            window.first().unwrap().timestamp_utc,
            last.timestamp_utc,
            serde_json::json!({
                "distinct_destinations": distinct.len(),
                "generic_hit": generic_hit,
                "sts_deviation": sts_deviation,
            }),
            DESTINATION_RISK,
        )?;
        stats.record(inserted);
    }
    Ok(())
}

#[allow(dead_code)]
fn grid_hint(lat: f64, lon: f64) -> (i32, i32) {
    grid_cell(lat, lon)
}

#[allow(dead_code)]
fn bucket_hint(ts: DateTime<Utc>) -> i64 {
    time_bucket_15m(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AisClass, FlagRisk};
    use chrono::TimeZone;

    fn settings() -> Settings {
        Settings::from_env().unwrap()
    }

    #[test]
    fn tight_circle_at_speed_is_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..18 {
            let ts = t0 + Duration::minutes(10 * i);
            let jitter = (i % 3) as f64 * 0.001;
            db.insert_position(
                vid, ts, 10.0 + jitter, 10.0 + jitter, Some(8.0), None, None, None, None, None, AisClass::A, "t",
            )
            .unwrap();
        }
        let range = DateRange::new(t0, t0 + Duration::hours(4));
        let stats = detect(&db, range, &settings()).unwrap();
        assert!(stats.events_inserted >= 1);
        let anomalies = db.spoofing_anomalies_for_vessel(vid, t0, t0 + Duration::hours(4)).unwrap();
        assert!(anomalies.iter().any(|a| a.spoofing_type == SpoofingType::CircleSpoof));
    }

    #[test]
    fn implausible_transit_flags_mmsi_reuse() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        db.insert_position(vid, t0, 0.0, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        // 200nm in 1h = 200kn, far past the impossible-jump threshold.
        db.insert_position(vid, t1, 3.33, 0.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t1);
        let stats = detect(&db, range, &settings()).unwrap();
        assert!(stats.events_inserted >= 1);
        let anomalies = db.spoofing_anomalies_for_vessel(vid, t0, t1).unwrap();
        let reuse = anomalies.iter().find(|a| a.spoofing_type == SpoofingType::MmsiReuse).unwrap();
        assert_eq!(reuse.risk_component, MMSI_REUSE_RISK_EXTREME);
    }

    #[test]
    fn nav_status_anchored_but_fast_is_flagged() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_position(vid, t0, 1.0, 1.0, Some(10.0), None, None, Some(1), None, None, AisClass::A, "t")
            .unwrap();
        let mut stats = Stats::default();
        let positions = db.positions_in_range(vid, t0, t0).unwrap();
        detect_nav_status_mismatch(&db, &mut stats, vid, &positions).unwrap();
        assert_eq!(stats.events_inserted, 1);
    }

    #[test]
    fn shared_imo_within_one_nm_flags_identity_swap() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let b = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        db.update_vessel_static(a, Some("9123456"), None, None, None).unwrap();
        db.update_vessel_static(b, Some("9123456"), None, None, None).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert_position(a, t0, 10.0, 10.0, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();
        db.insert_position(b, t0, 10.005, 10.005, Some(5.0), None, None, None, None, None, AisClass::A, "t")
            .unwrap();

        let range = DateRange::new(t0, t0 + Duration::hours(1));
        let stats = detect(&db, range, &settings()).unwrap();
        assert!(stats.events_inserted >= 2);
        let anomalies = db.spoofing_anomalies_for_vessel(a, t0 - Duration::hours(2), t0 + Duration::hours(2)).unwrap();
        assert!(anomalies.iter().any(|x| x.spoofing_type == SpoofingType::IdentitySwap));
    }
}
