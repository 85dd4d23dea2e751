//! Identity resolution: links a vessel that went dark across a long AIS gap
//! to a "new" vessel identity that surfaces near the gap's last known
//! position, the signature of an MMSI swap or spoofed re-registration.
//! Candidate generation is eliminative first (cheap rejects before any
//! scoring), then weighted-scored, then thresholded into
//! auto-merge/pending/discard per §4.5.

pub mod fingerprint;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::db::Database;
use crate::detectors::{DateRange, Stats};
use crate::error::Result;
use crate::geo::haversine_nm;
use crate::models::{MergeCandidateStatus, Vessel};

/// A dark vessel's gap must run at least this long before it is eligible for
/// identity-resolution candidate generation — short gaps are handled by
/// the gap detector's own scoring, not identity merge.
const MIN_GAP_HOURS_FOR_CANDIDACY: f64 = 12.0;

/// A "new" vessel identity must first appear within this many hours of the
/// dark vessel's gap closing to be considered a candidate at all.
const NEW_IDENTITY_WINDOW_HOURS: i64 = 168;

/// Eliminative prefilter: a new identity more than this far from the dark
/// vessel's last position cannot plausibly be the same hull reappearing.
const MAX_REAPPEARANCE_DISTANCE_NM: f64 = 150.0;

const AUTO_MERGE_THRESHOLD: f64 = 85.0;
const PENDING_THRESHOLD: f64 = 50.0;

const WEIGHT_STATIC_ATTRIBUTES: f64 = 35.0;
const WEIGHT_SPATIOTEMPORAL: f64 = 30.0;
const WEIGHT_FINGERPRINT: f64 = 35.0;

/// Scans gap events in `range`, generates merge candidates for each
/// dark-vessel/new-identity pair that survives the eliminative prefilter,
/// scores them, and persists every candidate (even discards, for audit).
#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn resolve(db: &Database, range: DateRange, settings: &Settings) -> Result<Stats> {
    let mut stats = Stats::default();
    if !settings.fingerprint_detection_enabled {
        info!("fingerprint-assisted identity resolution disabled; running without the bonus term");
    }

    // Auto-hunt gate: once a gap has been scored, only gaps that cleared the
    // operator's minimum score are worth spending identity-resolution work
    // on. Unscored gaps (scoring hasn't run yet this pipeline invocation)
    // still pass on duration alone so identity resolution never silently
    // no-ops on a fresh database.
    let gaps: Vec<_> = db
        .gap_events_in_range(range.from, range.to)?
        .into_iter()
        .filter(|g| g.duration_minutes / 60.0 >= MIN_GAP_HOURS_FOR_CANDIDACY && !g.is_feed_outage)
        .filter(|g| g.risk_score.map(|s| s >= settings.auto_hunt_min_gap_score).unwrap_or(true))
        .collect();

    for gap in gaps {
        stats.candidates_examined += 1;
        let Some(dark_vessel) = db.get_vessel(gap.vessel_id)? else {
            continue;
        };
        let Some(last_position) = db.position_by_id(gap.end_point_id)? else {
            continue;
        };

        let window_end = gap.gap_end_utc + Duration::hours(NEW_IDENTITY_WINDOW_HOURS);
        let candidate_ids = db.vessel_ids_with_positions_in_range(gap.gap_end_utc, window_end)?;

        for candidate_id in candidate_ids {
            if candidate_id == dark_vessel.vessel_id {
                continue;
            }
            let Some(candidate) = db.get_vessel(candidate_id)? else {
                continue;
            };
            if candidate.is_absorbed() || dark_vessel.is_absorbed() {
                continue;
            }
            if !eliminate(&dark_vessel, &candidate) {
                continue;
            }

            let Some(first_seen) = candidate.mmsi_first_seen_utc else {
                continue;
            };
            if first_seen < gap.gap_end_utc || first_seen > window_end {
                continue;
            }

            let first_positions = db.positions_in_range(candidate_id, first_seen, first_seen + Duration::hours(6))?;
            let Some(first_position) = first_positions.first() else {
                continue;
            };
            let distance_nm = haversine_nm(last_position.lat, last_position.lon, first_position.lat, first_position.lon);
            if distance_nm > MAX_REAPPEARANCE_DISTANCE_NM {
                continue;
            }

            let (confidence, breakdown) = score_pair(db, &dark_vessel, &candidate, distance_nm, settings, gap.gap_start_utc, window_end)?;
            let status = status_for(confidence);
            let inserted = db.insert_merge_candidate(dark_vessel.vessel_id, candidate_id, confidence, &breakdown, status)?;
            stats.record(Some(inserted));

            if status == MergeCandidateStatus::AutoMerged {
                db.execute_merge(dark_vessel.vessel_id, candidate_id, confidence, &breakdown, status)?;
                warn!(dark = dark_vessel.vessel_id, candidate = candidate_id, confidence, "auto-merged identity");
            }
        }
    }

    Ok(stats)
}

/// Cheap rejects that never need a database round-trip: incompatible AIS
/// class, flatly contradictory vessel type, or a deadweight mismatch too
/// large to be measurement noise.
fn eliminate(dark: &Vessel, candidate: &Vessel) -> bool {
    if dark.ais_class != candidate.ais_class {
        return false;
    }
    if let (Some(dt), Some(ct)) = (&dark.vessel_type, &candidate.vessel_type) {
        if dt != ct {
            return false;
        }
    }
    if let (Some(dw), Some(cw)) = (dark.deadweight, candidate.deadweight) {
        if (dw - cw).abs() / dw.max(1.0) > 0.25 {
            return false;
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn score_pair(
    db: &Database,
    dark: &Vessel,
    candidate: &Vessel,
    distance_nm: f64,
    settings: &Settings,
    sts_window_start: DateTime<Utc>,
    sts_window_end: DateTime<Utc>,
) -> Result<(f64, HashMap<String, f64>)> {
    let mut breakdown = HashMap::new();

    let static_score = static_attribute_score(dark, candidate);
    breakdown.insert("static_attributes".to_string(), static_score * WEIGHT_STATIC_ATTRIBUTES);

    let spatial_score = (1.0 - (distance_nm / MAX_REAPPEARANCE_DISTANCE_NM).min(1.0)).max(0.0);
    breakdown.insert("spatiotemporal_proximity".to_string(), spatial_score * WEIGHT_SPATIOTEMPORAL);

    if settings.fingerprint_detection_enabled {
        if let (Some(dark_fp), Some(candidate_fp)) = (db.get_fingerprint(dark.vessel_id)?, db.get_fingerprint(candidate.vessel_id)?) {
            if let Some(d2) = fingerprint::mahalanobis_distance(&dark_fp, &candidate_fp) {
                let bonus = fingerprint::similarity_bonus(d2);
                breakdown.insert("fingerprint_similarity".to_string(), bonus * WEIGHT_FINGERPRINT);
            }
        }
    }

    // STS dark confirmation: a visible/dark or dark/dark transfer touching
    // either identity around the gap corroborates that the dark hull is
    // still operating under a different name, independent of static or
    // spatial similarity.
    let sts_confirmed = db
        .sts_events_for_vessel(candidate.vessel_id, sts_window_start, sts_window_end)?
        .iter()
        .any(|e| matches!(e.detection_type, crate::models::StsDetectionType::VisibleDark | crate::models::StsDetectionType::DarkDark));
    if sts_confirmed {
        breakdown.insert("sts_dark_confirmation".to_string(), 10.0);
    }

    let confidence: f64 = breakdown.values().sum();
    Ok((confidence.clamp(0.0, 100.0), breakdown))
}

fn static_attribute_score(dark: &Vessel, candidate: &Vessel) -> f64 {
    let mut matches = 0.0;
    let mut checked = 0.0;

    if let (Some(a), Some(b)) = (&dark.flag, &candidate.flag) {
        checked += 1.0;
        if a == b {
            matches += 1.0;
        }
    }
    if let (Some(a), Some(b)) = (&dark.vessel_type, &candidate.vessel_type) {
        checked += 1.0;
        if a == b {
            matches += 1.0;
        }
    }
    if let (Some(a), Some(b)) = (dark.year_built, candidate.year_built) {
        checked += 1.0;
        if a == b {
            matches += 1.0;
        }
    }
    if let (Some(a), Some(b)) = (dark.deadweight, candidate.deadweight) {
        checked += 1.0;
        let rel_error = (a - b).abs() / a.max(1.0);
        matches += (1.0 - rel_error.min(1.0)).max(0.0);
    }

    if checked == 0.0 {
        0.5 // no comparable static fields at all: neither corroborates nor refutes
    } else {
        matches / checked
    }
}

fn status_for(confidence: f64) -> MergeCandidateStatus {
    if confidence >= AUTO_MERGE_THRESHOLD {
        MergeCandidateStatus::AutoMerged
    } else if confidence >= PENDING_THRESHOLD {
        MergeCandidateStatus::Pending
    } else {
        MergeCandidateStatus::Rejected
    }
}

/// Recomputes and persists a fingerprint for every vessel with at least one
/// position in `range`, feeding the Mahalanobis bonus term above. Run as its
/// own pipeline sub-step since it is independent of gap detection timing.
#[instrument(skip(db), fields(from = %range.from, to = %range.to))]
pub fn refresh_fingerprints(db: &Database, range: DateRange, computed_at: DateTime<Utc>) -> Result<Stats> {
    let mut stats = Stats::default();
    let vessel_ids = db.vessel_ids_with_positions_in_range(range.from, range.to)?;
    for vessel_id in vessel_ids {
        stats.vessels_scanned += 1;
        let positions = db.positions_in_range(vessel_id, range.from, range.to)?;
        if let Some(fp) = fingerprint::compute_fingerprint(vessel_id, &positions, computed_at) {
            db.upsert_fingerprint(&fp)?;
            stats.events_inserted += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AisClass, FlagRisk, PiStatus};

    fn test_vessel(id: i64, flag: &str, dwt: f64) -> Vessel {
        Vessel {
            vessel_id: id,
            mmsi: format!("1000000{id}"),
            imo: None,
            name: None,
            callsign: None,
            flag: Some(flag.to_string()),
            flag_risk: FlagRisk::Unknown,
            vessel_type: Some("tanker".to_string()),
            deadweight: Some(dwt),
            year_built: Some(2005),
            ais_class: AisClass::A,
            mmsi_first_seen_utc: None,
            vessel_laid_up_30d: false,
            vessel_laid_up_60d: false,
            vessel_laid_up_in_sts_zone: false,
            pi_status: PiStatus::Unknown,
            ism_manager: None,
            merged_into_vessel_id: None,
        }
    }

    #[test]
    fn eliminate_rejects_different_ais_class() {
        let mut a = test_vessel(1, "PA", 80_000.0);
        let b = test_vessel(2, "PA", 80_000.0);
        a.ais_class = AisClass::B;
        assert!(!eliminate(&a, &b));
    }

    #[test]
    fn eliminate_rejects_large_deadweight_mismatch() {
        let a = test_vessel(1, "PA", 80_000.0);
        let b = test_vessel(2, "PA", 200_000.0);
        assert!(!eliminate(&a, &b));
    }

    #[test]
    fn status_thresholds_match_bands() {
        assert_eq!(status_for(90.0), MergeCandidateStatus::AutoMerged);
        assert_eq!(status_for(60.0), MergeCandidateStatus::Pending);
        assert_eq!(status_for(20.0), MergeCandidateStatus::Rejected);
    }

    #[test]
    fn static_attribute_score_rewards_exact_match() {
        let a = test_vessel(1, "PA", 80_000.0);
        let b = test_vessel(2, "PA", 80_000.0);
        assert!((static_attribute_score(&a, &b) - 1.0).abs() < 1e-9);
    }
}
