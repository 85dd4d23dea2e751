//! Evidence card assembly: renders a gap event, its scoring breakdown, and
//! the vessel's identity into the analyst-facing and government-package
//! export formats, per §4.6. Every card carries the same fixed disclaimer
//! regardless of format — this system produces investigative leads, not
//! a legal finding.

use chrono::{DateTime, Utc};

use crate::config;
use crate::db::Database;
use crate::error::{RadianceError, Result};
use crate::models::{AisGapEvent, AnalystStatus, ConfidenceBand, Vessel};

pub const DISCLAIMER: &str = "DISCLAIMER: This is investigative triage, not a legal determination. \
This tool identifies patterns warranting further investigation. No conclusions about sanctions \
violations or criminal activity should be drawn from this output without independent expert verification.";

/// Analyst export: internal working format.
pub const FORMAT_ANALYST: &str = "analyst";

/// Government-package export.
pub const FORMAT_GOVERNMENT: &str = "government";

#[derive(Debug, Clone)]
pub struct RenderedEvidence {
    pub gap_event_id: i64,
    pub version: i32,
    pub export_format: String,
    pub mmsi: String,
    pub vessel_name: Option<String>,
    pub flag: Option<String>,
    pub gap_start_utc: DateTime<Utc>,
    pub gap_end_utc: DateTime<Utc>,
    pub duration_hours: f64,
    pub risk_score: i32,
    pub confidence_band: ConfidenceBand,
    pub coverage_quality: &'static str,
    pub breakdown: std::collections::HashMap<String, i32>,
    pub disclaimer: String,
    pub markdown: String,
}

/// Builds and persists the analyst-format evidence card for a gap. Still
/// refused for a `new` gap — no export format may snapshot an unreviewed
/// automated finding (§7).
pub fn build_analyst_card(db: &Database, gap_event_id: i64) -> Result<RenderedEvidence> {
    build_card(db, gap_event_id, FORMAT_ANALYST)
}

/// Builds and persists the government-package variant.
pub fn build_government_package(db: &Database, gap_event_id: i64) -> Result<RenderedEvidence> {
    build_card(db, gap_event_id, FORMAT_GOVERNMENT)
}

/// Shared export path for every format. Refuses before any snapshot is
/// persisted when the gap's analyst status is still `new` — an unreviewed
/// automated finding must not leave the system as if an analyst had looked
/// at it, in any format.
fn build_card(db: &Database, gap_event_id: i64, export_format: &str) -> Result<RenderedEvidence> {
    let gap = db
        .get_gap_event(gap_event_id)?
        .ok_or_else(|| RadianceError::Validation { field: "gap_event_id".to_string(), reason: "not found".to_string() })?;
    if gap.status == AnalystStatus::New {
        return Err(RadianceError::Validation {
            field: "status".to_string(),
            reason: "evidence card export requires analyst review past `new`".to_string(),
        });
    }
    let vessel = db
        .get_vessel(gap.vessel_id)?
        .ok_or_else(|| RadianceError::Validation { field: "vessel_id".to_string(), reason: "not found".to_string() })?;

    let score = gap.risk_score.unwrap_or(0);
    let breakdown = gap.risk_breakdown.clone().unwrap_or_default();
    let band = crate::confidence::classify(score, &breakdown, gap.status);
    let corridor_name = match gap.corridor_id {
        Some(id) => db.get_corridor(id)?.map(|c| c.name),
        None => None,
    };
    let coverage = config::coverage_quality(corridor_name.as_deref());

    let markdown = render_markdown(&gap, &vessel, score, band, coverage, &breakdown, export_format);
    let version = db.next_evidence_version(gap_event_id)?;
    db.insert_evidence_card(gap_event_id, version, export_format, score, &breakdown)?;

    Ok(RenderedEvidence {
        gap_event_id,
        version,
        export_format: export_format.to_string(),
        mmsi: vessel.mmsi.clone(),
        vessel_name: vessel.name.clone(),
        flag: vessel.flag.clone(),
        gap_start_utc: gap.gap_start_utc,
        gap_end_utc: gap.gap_end_utc,
        duration_hours: gap.duration_minutes / 60.0,
        risk_score: score,
        confidence_band: band,
        coverage_quality: coverage,
        breakdown,
        disclaimer: DISCLAIMER.to_string(),
        markdown,
    })
}

fn render_markdown(
    gap: &AisGapEvent,
    vessel: &Vessel,
    score: i32,
    band: ConfidenceBand,
    coverage: &str,
    breakdown: &std::collections::HashMap<String, i32>,
    export_format: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Evidence card — gap {}\n\n", gap.gap_event_id));
    out.push_str(&format!("**Format:** {export_format}\n\n"));
    out.push_str(&format!(
        "**Vessel:** {} (MMSI {}{})\n\n",
        vessel.name.as_deref().unwrap_or("unknown"),
        vessel.mmsi,
        vessel.flag.as_ref().map(|f| format!(", flag {f}")).unwrap_or_default(),
    ));
    out.push_str(&format!(
        "**Gap window:** {} → {} ({:.1}h)\n\n",
        gap.gap_start_utc.to_rfc3339(),
        gap.gap_end_utc.to_rfc3339(),
        gap.duration_minutes / 60.0
    ));
    out.push_str(&format!("**Risk score:** {score} / 200 — confidence: {band:?}\n\n"));
    out.push_str(&format!("**AIS coverage in this area:** {coverage}\n\n"));
    out.push_str("## Contributing signals\n\n");
    let mut keys: Vec<&String> = breakdown.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(&format!("- `{key}`: {}\n", breakdown[key]));
    }
    out.push_str("\n---\n\n");
    out.push_str(DISCLAIMER);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{AisClass, FlagRisk, PiStatus};
    use chrono::TimeZone;

    fn test_gap(status: AnalystStatus) -> AisGapEvent {
        AisGapEvent {
            gap_event_id: 1,
            vessel_id: 1,
            start_point_id: 1,
            end_point_id: 2,
            gap_start_utc: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            gap_end_utc: Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap(),
            duration_minutes: 360.0,
            pre_gap_sog_kn: Some(12.0),
            actual_gap_distance_nm: 50.0,
            max_plausible_distance_nm: 60.0,
            impossible_speed_flag: false,
            velocity_plausibility_ratio: 0.8,
            corridor_id: None,
            in_dark_zone: true,
            is_feed_outage: false,
            coverage_quality: None,
            risk_score: Some(140),
            risk_breakdown: None,
            status,
            analyst_notes: None,
        }
    }

    fn test_vessel() -> Vessel {
        Vessel {
            vessel_id: 1,
            mmsi: "123456789".into(),
            imo: None,
            name: Some("MV Example".into()),
            callsign: None,
            flag: Some("PA".into()),
            flag_risk: FlagRisk::Unknown,
            vessel_type: None,
            deadweight: None,
            year_built: None,
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
    fn markdown_always_includes_disclaimer() {
        let gap = test_gap(AnalystStatus::Confirmed);
        let vessel = test_vessel();
        let md = render_markdown(&gap, &vessel, 140, ConfidenceBand::Confirmed, "GOOD", &Default::default(), FORMAT_ANALYST);
        assert!(md.contains(DISCLAIMER));
        assert!(md.contains("MV Example"));
    }

    #[test]
    fn new_status_gap_refuses_export_and_persists_no_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let vid = db.upsert_vessel("123456789", None, FlagRisk::Unknown).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(3);
        let gap_id = db
            .insert_gap_event(vid, 1, 2, start, end, Some(10.0), 5.0, 40.0, false, 0.125, None, false)
            .unwrap()
            .unwrap();

        let analyst_result = build_analyst_card(&db, gap_id);
        assert!(analyst_result.is_err());
        let government_result = build_government_package(&db, gap_id);
        assert!(government_result.is_err());
        assert_eq!(db.next_evidence_version(gap_id).unwrap(), 1);
    }
}
