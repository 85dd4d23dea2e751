//! Declarative risk scoring engine: reads detector output for a gap plus the
//! vessel's static metadata, assembles a signed point breakdown under
//! `risk_scoring.yaml`'s sections, applies the subsumption/mutual-exclusion
//! rules and multipliers, and clamps to [0, 200], per §4.3. Every gap not
//! already marked `is_feed_outage` gets scored exactly once per run; scoring
//! a gap twice with the same inputs reproduces the same breakdown, since
//! nothing here reads wall-clock time except through the caller-supplied
//! `scoring_date`.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::instrument;

use crate::config::{FraudulentRegistriesConfig, PiClubsConfig, RiskScoringConfig, Settings};
use crate::detectors::{DateRange, Stats};
use crate::db::Database;
use crate::error::Result;
use crate::models::{AisGapEvent, CorridorType, PiStatus, SpoofingType, Vessel};

const SPOOFING_CORROBORATION_WINDOW_HOURS: i64 = 48;
const STS_LINKAGE_WINDOW_HOURS: i64 = 24;
const OTHER_DARK_VESSELS_THRESHOLD: usize = 2;
const SPIKE_BONUS_MULTIPLIER: f64 = 1.4;
const SCORE_MIN: i32 = 0;
const SCORE_MAX: i32 = 200;

/// Loads the three config files scoring depends on from `settings.config_dir`
/// and scores every not-yet-feed-outage gap in `range`.
#[instrument(skip(db, settings), fields(from = %range.from, to = %range.to))]
pub fn score_all(db: &Database, range: DateRange, settings: &Settings, scoring_date: DateTime<Utc>) -> Result<Stats> {
    let mut stats = Stats::default();
    let config_dir = Path::new(&settings.config_dir);
    let scoring_cfg = RiskScoringConfig::load(&config_dir.join("risk_scoring.yaml"))?;
    let pi_cfg = PiClubsConfig::load(&config_dir.join("legitimate_pi_clubs.yaml"))?;
    let fraud_cfg = FraudulentRegistriesConfig::load(&config_dir.join("fraudulent_registries.yaml"))?;

    let gaps: Vec<AisGapEvent> = db
        .gap_events_in_range(range.from, range.to)?
        .into_iter()
        .filter(|g| !g.is_feed_outage)
        .collect();

    for gap in gaps {
        stats.candidates_examined += 1;
        let Some(vessel) = db.get_vessel(gap.vessel_id)? else {
            continue;
        };
        let breakdown = score_gap(db, &gap, settings, &scoring_cfg, &pi_cfg, &fraud_cfg, &vessel, scoring_date)?;
        let score = clamp_score(total_score(db, &breakdown, &vessel, &gap)?);
        db.set_gap_score(gap.gap_event_id, score, &breakdown)?;
        stats.events_inserted += 1;
    }

    Ok(stats)
}

/// Assembles the signed point breakdown for a single gap. Returns a map of
/// contributing-signal-key to signed point value (deductions negative);
/// multipliers are applied afterward in `total_score`, not folded in here,
/// since they apply to the sum of positive signals only.
#[allow(clippy::too_many_arguments)]
pub fn score_gap(
    db: &Database,
    gap: &AisGapEvent,
    settings: &Settings,
    cfg: &RiskScoringConfig,
    pi_cfg: &PiClubsConfig,
    fraud_cfg: &FraudulentRegistriesConfig,
    vessel: &Vessel,
    scoring_date: DateTime<Utc>,
) -> Result<HashMap<String, i32>> {
    let mut b: HashMap<String, i32> = HashMap::new();

    gap_duration_signal(gap, cfg, &mut b);
    gap_frequency_signal(db, gap, cfg, &mut b)?;
    speed_signal(db, gap, cfg, settings, &mut b)?;
    dark_zone_signal(db, gap, cfg, &mut b)?;
    corridor_signal(db, gap, cfg, &mut b)?;
    vessel_age_signal(vessel, cfg, scoring_date, &mut b);

    if settings.spoofing_scoring_enabled {
        spoofing_signals(db, gap, cfg, &mut b)?;
    }
    if settings.sts_scoring_enabled {
        sts_signal(db, gap, cfg, &mut b)?;
    }
    if settings.convoy_scoring_enabled {
        convoy_signal(db, gap, cfg, &mut b)?;
    }
    if settings.loitering_scoring_enabled {
        loitering_signal(db, gap, cfg, &mut b)?;
    }
    if settings.draught_scoring_enabled {
        draught_signal(db, gap, cfg, &mut b)?;
    }

    metadata_signals(vessel, cfg, fraud_cfg, &mut b);
    legitimacy_deductions(vessel, cfg, pi_cfg, scoring_date, &mut b);

    voyage_cycle_signal(cfg, &mut b);
    reactivation_signal(gap, cfg, &mut b);

    Ok(b)
}

fn gap_duration_signal(gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) {
    let hours = gap.duration_minutes / 60.0;
    let key = if hours >= 24.0 {
        "over_24h"
    } else if hours >= 12.0 {
        "12h_24h"
    } else if hours >= 4.0 {
        "4h_12h"
    } else {
        "2h_4h"
    };
    if let Some(points) = cfg.points("gap_duration", key) {
        b.insert(key.to_string(), points);
    }
}

fn gap_frequency_signal(
    db: &Database,
    gap: &AisGapEvent,
    cfg: &RiskScoringConfig,
    b: &mut HashMap<String, i32>,
) -> Result<()> {
    let lookback_start = gap.gap_start_utc - Duration::days(90);
    let count = db
        .gap_events_in_range(lookback_start, gap.gap_start_utc)?
        .into_iter()
        .filter(|g| g.vessel_id == gap.vessel_id)
        .count();

    let key = if count <= 1 {
        "rare"
    } else if count <= 3 {
        "occasional"
    } else if count <= 6 {
        "frequent"
    } else {
        "chronic"
    };
    if let Some(points) = cfg.points("gap_frequency", key) {
        b.insert(key.to_string(), points);
    }
    Ok(())
}

/// Exactly one of `speed_impossible` / `speed_spoof` / `speed_spike_before_gap`
/// fires. `speed_impossible` supersedes the other two outright; only
/// `speed_spike_before_gap` earns the 1.4x gap-duration bonus.
fn speed_signal(
    db: &Database,
    gap: &AisGapEvent,
    cfg: &RiskScoringConfig,
    settings: &Settings,
    b: &mut HashMap<String, i32>,
) -> Result<()> {
    if gap.impossible_speed_flag {
        if let Some(points) = cfg.points("spoofing", "speed_impossible") {
            b.insert("speed_impossible".to_string(), points);
        }
        return Ok(());
    }
    if gap.velocity_plausibility_ratio <= 1.0 {
        return Ok(());
    }

    let corroborated = settings.spoofing_detection_enabled
        && db
            .spoofing_anomalies_for_vessel(
                gap.vessel_id,
                gap.gap_start_utc - Duration::hours(SPOOFING_CORROBORATION_WINDOW_HOURS),
                gap.gap_end_utc + Duration::hours(SPOOFING_CORROBORATION_WINDOW_HOURS),
            )?
            .iter()
            .any(|a| a.spoofing_type == SpoofingType::MmsiReuse);

    if corroborated {
        if let Some(points) = cfg.points("spoofing", "speed_spoof") {
            b.insert("speed_spoof".to_string(), points);
        }
    } else {
        let base = cfg.points("spoofing", "speed_spike_before_gap").unwrap_or(0);
        let duration_points = b.get("over_24h").or(b.get("12h_24h")).or(b.get("4h_12h")).or(b.get("2h_4h")).copied().unwrap_or(0);
        let bonus = (duration_points as f64 * SPIKE_BONUS_MULTIPLIER).round() as i32;
        b.insert("speed_spike_before_gap".to_string(), base + bonus);
    }
    Ok(())
}

/// `selective_dark_zone_evasion` fires only when few other vessels went dark
/// in the same dark-zone window; otherwise (or with no DB evidence either
/// way) `dark_zone_deduction` applies. Exactly one of the two fires, and
/// only when the gap is inside a dark zone at all.
fn dark_zone_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    if !gap.in_dark_zone {
        return Ok(());
    }
    let others = match gap.corridor_id {
        Some(corridor_id) => db
            .gaps_by_corridor_window(corridor_id, gap.gap_start_utc, gap.gap_end_utc)?
            .into_iter()
            .filter(|g| g.vessel_id != gap.vessel_id && g.in_dark_zone)
            .count(),
        None => OTHER_DARK_VESSELS_THRESHOLD + 1, // no corridor context: default to the deduction branch
    };

    let key = if others <= OTHER_DARK_VESSELS_THRESHOLD {
        "selective_dark_zone_evasion"
    } else {
        "dark_zone_deduction"
    };
    if let Some(points) = cfg.points("dark_zone", key) {
        b.insert(key.to_string(), points);
    }
    Ok(())
}

/// Positive `corridor` signal keyed by the gap's corridor type, when the
/// gap has one and the section defines a point value for it. The
/// multiplicative side of the corridor (its `risk_weight`) is applied
/// separately in `total_score`, since multipliers apply to the whole
/// positive-signal sum, not to this key alone.
fn corridor_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let Some(corridor_id) = gap.corridor_id else { return Ok(()) };
    let Some(corridor) = db.get_corridor(corridor_id)? else { return Ok(()) };
    let key = corridor_type_key(corridor.corridor_type);
    if let Some(points) = cfg.points("corridor", key) {
        b.insert(key.to_string(), points);
    }
    Ok(())
}

fn corridor_type_key(t: CorridorType) -> &'static str {
    match t {
        CorridorType::ExportRoute => "corridor_export_route",
        CorridorType::StsZone => "corridor_sts_zone",
        CorridorType::AnchorageHolding => "corridor_anchorage_holding",
        CorridorType::DarkZone => "corridor_dark_zone",
        CorridorType::Other => "corridor_other",
    }
}

/// Vessel-age tier, computed from `scoring_date - year_built` rather than
/// wall-clock time so a re-run with the same `scoring_date` reproduces the
/// same tier key (§8's reproducibility-over-time property). Ages at or
/// below `YOUNG_VESSEL_MAX_AGE_YEARS` don't get a positive tier at all —
/// that case is instead a legitimacy deduction, see `legitimacy_deductions`.
fn vessel_age_signal(vessel: &Vessel, cfg: &RiskScoringConfig, scoring_date: DateTime<Utc>, b: &mut HashMap<String, i32>) {
    let Some(age_years) = vessel_age_years(vessel, scoring_date) else { return };
    let key = if age_years > 25 {
        "over_25y"
    } else if age_years > 15 {
        "15y_25y"
    } else if age_years > 5 {
        "5y_15y"
    } else {
        return;
    };
    if let Some(points) = cfg.points("vessel_age", key) {
        b.insert(key.to_string(), points);
    }
}

const YOUNG_VESSEL_MAX_AGE_YEARS: i32 = 5;

fn vessel_age_years(vessel: &Vessel, scoring_date: DateTime<Utc>) -> Option<i32> {
    let year_built = vessel.year_built?;
    let age = scoring_date.year() - year_built;
    (age >= 0).then_some(age)
}

fn spoofing_signals(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let window_start = gap.gap_start_utc - Duration::hours(SPOOFING_CORROBORATION_WINDOW_HOURS);
    let window_end = gap.gap_end_utc + Duration::hours(SPOOFING_CORROBORATION_WINDOW_HOURS);
    let anomalies = db.spoofing_anomalies_for_vessel(gap.vessel_id, window_start, window_end)?;

    let mut seen_types = std::collections::HashSet::new();
    for a in anomalies {
        // speed-related types are handled exclusively by speed_signal.
        if matches!(a.spoofing_type, SpoofingType::MmsiReuse) || !seen_types.insert(a.spoofing_type) {
            continue;
        }
        let key = spoofing_type_key(a.spoofing_type);
        let points = cfg.points("spoofing", key).unwrap_or(a.risk_component);
        b.insert(key.to_string(), points);
    }
    Ok(())
}

fn spoofing_type_key(t: SpoofingType) -> &'static str {
    match t {
        SpoofingType::MmsiReuse => "mmsi_reuse",
        SpoofingType::NavStatusMismatch => "nav_status_mismatch",
        SpoofingType::CircleSpoof => "circle_spoof",
        SpoofingType::AnchorSpoof => "anchor_spoof",
        SpoofingType::ErraticNavStatus => "erratic_nav_status",
        SpoofingType::CrossReceiverDisagreement => "cross_receiver_disagreement",
        SpoofingType::IdentitySwap => "identity_swap",
        SpoofingType::FakePortCall => "fake_port_call",
        SpoofingType::StaleAisData => "stale_ais",
        SpoofingType::SyntheticTrack => "synthetic_track",
        SpoofingType::ImoFraud => "scrapped_imo_reuse",
        SpoofingType::TrackReplay => "track_replay",
        SpoofingType::DestinationDeviation => "destination_deviation",
    }
}

fn sts_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let window_start = gap.gap_start_utc - Duration::hours(STS_LINKAGE_WINDOW_HOURS);
    let window_end = gap.gap_end_utc + Duration::hours(STS_LINKAGE_WINDOW_HOURS);
    let events = db.sts_events_for_vessel(gap.vessel_id, window_start, window_end)?;
    if events.is_empty() {
        return Ok(());
    }
    let key = "sts_event_near_gap";
    let points = cfg.points("sts", key).unwrap_or_else(|| events.iter().map(|e| e.risk_component).max().unwrap_or(0));
    b.insert(key.to_string(), points);
    Ok(())
}

fn convoy_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let events = db.convoy_events_for_vessel(gap.vessel_id)?;
    let window_start = gap.gap_start_utc - Duration::hours(STS_LINKAGE_WINDOW_HOURS);
    let window_end = gap.gap_end_utc + Duration::hours(STS_LINKAGE_WINDOW_HOURS);
    let relevant = events.iter().filter(|e| e.end_utc >= window_start && e.start_utc <= window_end);
    if let Some(max_risk) = relevant.map(|e| e.risk_component).max() {
        let key = "convoy_near_gap";
        let points = cfg.points("convoy", key).unwrap_or(max_risk);
        b.insert(key.to_string(), points);
    }
    Ok(())
}

fn loitering_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let events = db.loitering_events_for_vessel(gap.vessel_id)?;
    let linked = events
        .iter()
        .find(|e| e.preceding_gap_id == Some(gap.gap_event_id) || e.following_gap_id == Some(gap.gap_event_id));
    if let Some(event) = linked {
        let key = "loitering_linked_to_gap";
        let points = cfg.points("behavioral", key).unwrap_or(event.risk_component);
        b.insert(key.to_string(), points);
    }
    Ok(())
}

fn draught_signal(db: &Database, gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) -> Result<()> {
    let events = db.draught_events_for_vessel(gap.vessel_id)?;
    if let Some(straddling) = events.iter().find(|e| e.straddles_gap && e.changed_at_utc >= gap.gap_start_utc && e.changed_at_utc <= gap.gap_end_utc + Duration::hours(STS_LINKAGE_WINDOW_HOURS)) {
        let key = "draught_change_straddles_gap";
        let points = cfg.points("behavioral", key).unwrap_or(straddling.risk_component);
        b.insert(key.to_string(), points);
    }
    Ok(())
}

/// Flag-risk tier and registry-fraud tier stand in for the flag-change
/// history this schema doesn't retain; `flag_changes_3plus_90d` supersedes
/// `flag_hopping` whenever both would otherwise apply.
fn metadata_signals(
    vessel: &Vessel,
    cfg: &RiskScoringConfig,
    fraud_cfg: &FraudulentRegistriesConfig,
    b: &mut HashMap<String, i32>,
) {
    if let Some(cc) = &vessel.flag {
        if let Some(tier) = fraud_cfg.tier_for_country(cc) {
            let key = match tier {
                0 => "fraudulent_registry_tier_0",
                1 => "fraudulent_registry_tier_1",
                _ => "fraudulent_registry_tier_2",
            };
            if let Some(points) = cfg.points("fraudulent_registry", key) {
                b.insert(key.to_string(), points);
            }
        }
    }

    if vessel.flag_risk == crate::models::FlagRisk::HighRisk {
        if let Some(points) = cfg.points("metadata", "flag_changes_3plus_90d") {
            b.insert("flag_changes_3plus_90d".to_string(), points);
        }
    } else if vessel.flag_risk == crate::models::FlagRisk::MediumRisk {
        if let Some(points) = cfg.points("metadata", "flag_hopping") {
            b.insert("flag_hopping".to_string(), points);
        }
    }
}

fn legitimacy_deductions(
    vessel: &Vessel,
    cfg: &RiskScoringConfig,
    pi_cfg: &PiClubsConfig,
    scoring_date: DateTime<Utc>,
    b: &mut HashMap<String, i32>,
) {
    if vessel.pi_status == PiStatus::IgClubMember {
        if let Some(points) = cfg.points("legitimacy", "ig_club_member") {
            b.insert("ig_club_member".to_string(), -points.abs());
        }
    }
    if let Some(manager) = &vessel.ism_manager {
        if pi_cfg.is_legitimate(manager) {
            if let Some(points) = cfg.points("legitimacy", "ism_continuity") {
                b.insert("ism_continuity_legitimate".to_string(), -points.abs());
            }
        }
    }
    if let Some(age_years) = vessel_age_years(vessel, scoring_date) {
        if age_years <= YOUNG_VESSEL_MAX_AGE_YEARS {
            if let Some(points) = cfg.points("legitimacy", "young_vessel") {
                b.insert("young_vessel".to_string(), -points.abs());
            }
        }
    }
}

/// `voyage_cycle_pattern` fires only once the breakdown already carries a
/// Russian-port signal, an STS signal, and a gap-frequency signal — never
/// standalone.
fn voyage_cycle_signal(cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) {
    let has_russian_port = b.keys().any(|k| k.contains("russian_port"));
    let has_sts = b.keys().any(|k| k.starts_with("sts_event"));
    let has_frequency = ["rare", "occasional", "frequent", "chronic"].iter().any(|k| b.contains_key(*k));
    if has_russian_port && has_sts && has_frequency {
        if let Some(points) = cfg.points("behavioral", "voyage_cycle_pattern") {
            b.insert("voyage_cycle_pattern".to_string(), points);
        }
    }
}

/// `gap_reactivation_in_jamming_zone` never fires off `gap_duration` alone —
/// it needs at least one other non-structural signal (spoofing, STS,
/// identity) corroborating it.
fn reactivation_signal(gap: &AisGapEvent, cfg: &RiskScoringConfig, b: &mut HashMap<String, i32>) {
    if !gap.in_dark_zone {
        return;
    }
    let has_corroboration = b
        .keys()
        .any(|k| !matches!(k.as_str(), "2h_4h" | "4h_12h" | "12h_24h" | "over_24h" | "rare" | "occasional" | "frequent" | "chronic"));
    if has_corroboration {
        if let Some(points) = cfg.points("behavioral", "gap_reactivation_in_jamming_zone") {
            b.insert("gap_reactivation_in_jamming_zone".to_string(), points);
        }
    }
}

fn vessel_size_multiplier(vessel: &Vessel) -> f64 {
    match vessel.deadweight {
        Some(dwt) if dwt >= 200_000.0 => 1.3,
        Some(dwt) if dwt >= 100_000.0 => 1.2,
        Some(dwt) if dwt >= 50_000.0 => 1.1,
        _ => 1.0,
    }
}

/// `corridor_multiplier` — the gap's corridor `risk_weight` when it has a
/// corridor, else 1.0 (no corridor context, no amplification).
fn corridor_multiplier(db: &Database, gap: &AisGapEvent) -> Result<f64> {
    let Some(corridor_id) = gap.corridor_id else { return Ok(1.0) };
    Ok(db.get_corridor(corridor_id)?.map(|c| c.risk_weight).unwrap_or(1.0))
}

/// Sums positive signals, applies the vessel-size and corridor multipliers
/// to that sum only, then adds the (already-negative) deductions.
fn total_score(db: &Database, b: &HashMap<String, i32>, vessel: &Vessel, gap: &AisGapEvent) -> Result<i32> {
    let positive: i32 = b.values().filter(|v| **v > 0).sum();
    let negative: i32 = b.values().filter(|v| **v < 0).sum();
    let multiplier = vessel_size_multiplier(vessel) * corridor_multiplier(db, gap)?;
    Ok(((positive as f64) * multiplier).round() as i32 + negative)
}

fn clamp_score(score: i32) -> i32 {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_score_within_bounds() {
        assert_eq!(clamp_score(-10), 0);
        assert_eq!(clamp_score(500), 200);
        assert_eq!(clamp_score(90), 90);
    }

    #[test]
    fn vessel_size_multiplier_tiers() {
        let mut v = test_vessel();
        v.deadweight = Some(250_000.0);
        assert!((vessel_size_multiplier(&v) - 1.3).abs() < 1e-9);
        v.deadweight = Some(10_000.0);
        assert!((vessel_size_multiplier(&v) - 1.0).abs() < 1e-9);
    }

    fn test_cfg(sections: &[(&str, &[(&str, i32)])]) -> RiskScoringConfig {
        let mut sections_map = HashMap::new();
        for (section, entries) in sections {
            let mut inner = HashMap::new();
            for (key, points) in *entries {
                inner.insert(key.to_string(), *points);
            }
            sections_map.insert(section.to_string(), inner);
        }
        RiskScoringConfig { last_updated: "2026-01-01".to_string(), sections: sections_map }
    }

    #[test]
    fn vessel_age_crosses_tier_boundary_across_scoring_dates() {
        use chrono::TimeZone;
        let mut v = test_vessel();
        v.year_built = Some(2001);
        let cfg = test_cfg(&[("vessel_age", &[("15y_25y", 5), ("over_25y", 10)])]);

        let mut b_2026 = HashMap::new();
        vessel_age_signal(&v, &cfg, Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(), &mut b_2026);
        assert_eq!(b_2026.get("15y_25y"), Some(&5));
        assert!(!b_2026.contains_key("over_25y"));

        let mut b_2028 = HashMap::new();
        vessel_age_signal(&v, &cfg, Utc.with_ymd_and_hms(2028, 6, 1, 0, 0, 0).unwrap(), &mut b_2028);
        assert_eq!(b_2028.get("over_25y"), Some(&10));
        assert!(!b_2028.contains_key("15y_25y"));
    }

    #[test]
    fn young_vessel_earns_a_legitimacy_deduction_not_an_age_tier() {
        use chrono::TimeZone;
        let mut v = test_vessel();
        v.year_built = Some(2024);
        let cfg = test_cfg(&[("legitimacy", &[("young_vessel", 15)])]);
        let scoring_date = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let mut age_breakdown = HashMap::new();
        vessel_age_signal(&v, &cfg, scoring_date, &mut age_breakdown);
        assert!(age_breakdown.is_empty());

        let mut b = HashMap::new();
        let pi_cfg = PiClubsConfig {
            legitimate_clubs: Vec::new(),
            known_fraudulent: Vec::new(),
            last_updated: "2026-01-01".to_string(),
        };
        legitimacy_deductions(&v, &cfg, &pi_cfg, scoring_date, &mut b);
        assert_eq!(b.get("young_vessel"), Some(&-15));
    }

    #[test]
    fn corridor_multiplier_resolves_risk_weight_from_the_gap_corridor() {
        let db = Database::open_in_memory().unwrap();
        let corridor_id = db
            .insert_corridor(
                "Test STS zone",
                CorridorType::StsZone,
                crate::geo::BoundingBox { min_lat: 0.0, max_lat: 1.0, min_lon: 0.0, max_lon: 1.0 },
                1.5,
                false,
                &[],
            )
            .unwrap();
        let vid = db.upsert_vessel("123456789", None, crate::models::FlagRisk::Unknown).unwrap();
        let start = Utc::now();
        let end = start + Duration::hours(3);
        let gap_id = db
            .insert_gap_event(vid, 1, 2, start, end, Some(10.0), 5.0, 40.0, false, 0.125, Some(corridor_id), false)
            .unwrap()
            .unwrap();
        let gap = db.get_gap_event(gap_id).unwrap().unwrap();

        assert!((corridor_multiplier(&db, &gap).unwrap() - 1.5).abs() < 1e-9);

        let cfg = test_cfg(&[("corridor", &[("corridor_sts_zone", 20)])]);
        let mut b = HashMap::new();
        corridor_signal(&db, &gap, &cfg, &mut b).unwrap();
        assert_eq!(b.get("corridor_sts_zone"), Some(&20));
    }

    #[test]
    fn corridor_multiplier_defaults_to_one_without_a_corridor() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, crate::models::FlagRisk::Unknown).unwrap();
        let start = Utc::now();
        let end = start + Duration::hours(3);
        let gap_id = db
            .insert_gap_event(vid, 1, 2, start, end, Some(10.0), 5.0, 40.0, false, 0.125, None, false)
            .unwrap()
            .unwrap();
        let gap = db.get_gap_event(gap_id).unwrap().unwrap();
        assert!((corridor_multiplier(&db, &gap).unwrap() - 1.0).abs() < 1e-9);
    }

    fn test_vessel() -> Vessel {
        Vessel {
            vessel_id: 1,
            mmsi: "123456789".into(),
            imo: None,
            name: None,
            callsign: None,
            flag: None,
            flag_risk: crate::models::FlagRisk::Unknown,
            vessel_type: None,
            deadweight: None,
            year_built: None,
            ais_class: crate::models::AisClass::Unknown,
            mmsi_first_seen_utc: None,
            vessel_laid_up_30d: false,
            vessel_laid_up_60d: false,
            vessel_laid_up_in_sts_zone: false,
            pi_status: PiStatus::Unknown,
            ism_manager: None,
            merged_into_vessel_id: None,
        }
    }
}
