//! Entity types for the detection and scoring core.
//!
//! Plain structs carrying only typed, nullable-where-appropriate fields —
//! no dynamic attribute access, no ORM session threading. Detectors and the
//! scoring engine accept references to these, not a raw database handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagRisk {
    LowRisk,
    MediumRisk,
    HighRisk,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AisClass {
    A,
    B,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystStatus {
    New,
    UnderReview,
    Confirmed,
    Dismissed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiStatus {
    IgClubMember,
    NonIgClub,
    Uninsured,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeCandidateStatus {
    Pending,
    AutoMerged,
    AnalystMerged,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorridorType {
    ExportRoute,
    StsZone,
    AnchorageHolding,
    DarkZone,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Confirmed,
    High,
    Medium,
    Low,
    None,
}

/// Tagged variant for every spoofing/anomaly sub-detection, replacing the
/// runtime string-tag comparisons the original implementation relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoofingType {
    MmsiReuse,
    NavStatusMismatch,
    CircleSpoof,
    AnchorSpoof,
    ErraticNavStatus,
    CrossReceiverDisagreement,
    IdentitySwap,
    FakePortCall,
    StaleAisData,
    SyntheticTrack,
    ImoFraud,
    TrackReplay,
    DestinationDeviation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vessel {
    pub vessel_id: i64,
    pub mmsi: String,
    pub imo: Option<String>,
    pub name: Option<String>,
    pub callsign: Option<String>,
    pub flag: Option<String>,
    pub flag_risk: FlagRisk,
    pub vessel_type: Option<String>,
    pub deadweight: Option<f64>,
    pub year_built: Option<i32>,
    pub ais_class: AisClass,
    pub mmsi_first_seen_utc: Option<DateTime<Utc>>,
    pub vessel_laid_up_30d: bool,
    pub vessel_laid_up_60d: bool,
    pub vessel_laid_up_in_sts_zone: bool,
    pub pi_status: PiStatus,
    pub ism_manager: Option<String>,
    pub merged_into_vessel_id: Option<i64>,
}

impl Vessel {
    pub fn is_absorbed(&self) -> bool {
        self.merged_into_vessel_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisPosition {
    pub position_id: i64,
    pub vessel_id: i64,
    pub timestamp_utc: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub sog_kn: Option<f64>,
    pub cog_deg: Option<f64>,
    pub heading_deg: Option<f64>,
    pub nav_status: Option<i32>,
    pub draught_m: Option<f64>,
    pub destination: Option<String>,
    pub ais_class: AisClass,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisObservation {
    pub mmsi: String,
    pub timestamp_utc: DateTime<Utc>,
    pub source: String,
    pub lat: f64,
    pub lon: f64,
    pub received_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub corridor_id: i64,
    pub name: String,
    pub corridor_type: CorridorType,
    pub bbox: crate::geo::BoundingBox,
    pub risk_weight: f64,
    pub is_jamming_zone: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkZone {
    pub dark_zone_id: i64,
    pub name: String,
    pub bbox: crate::geo::BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisGapEvent {
    pub gap_event_id: i64,
    pub vessel_id: i64,
    pub start_point_id: i64,
    pub end_point_id: i64,
    pub gap_start_utc: DateTime<Utc>,
    pub gap_end_utc: DateTime<Utc>,
    pub duration_minutes: f64,
    pub pre_gap_sog_kn: Option<f64>,
    pub actual_gap_distance_nm: f64,
    pub max_plausible_distance_nm: f64,
    pub impossible_speed_flag: bool,
    pub velocity_plausibility_ratio: f64,
    pub corridor_id: Option<i64>,
    pub in_dark_zone: bool,
    pub is_feed_outage: bool,
    pub coverage_quality: Option<String>,
    pub risk_score: Option<i32>,
    pub risk_breakdown: Option<HashMap<String, i32>>,
    pub status: AnalystStatus,
    pub analyst_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoofingAnomaly {
    pub anomaly_id: i64,
    pub vessel_id: i64,
    pub spoofing_type: SpoofingType,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub detail_json: serde_json::Value,
    pub risk_component: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StsDetectionType {
    VisibleVisible,
    VisibleDark,
    DarkDark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StsTransferEvent {
    pub sts_event_id: i64,
    pub vessel_a_id: i64,
    pub vessel_b_id: i64,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub mean_lat: f64,
    pub mean_lon: f64,
    pub detection_type: StsDetectionType,
    pub risk_component: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoiteringEvent {
    pub loitering_event_id: i64,
    pub vessel_id: i64,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub median_sog_kn: f64,
    pub mean_lat: f64,
    pub mean_lon: f64,
    pub corridor_id: Option<i64>,
    pub preceding_gap_id: Option<i64>,
    pub following_gap_id: Option<i64>,
    pub risk_component: i32,
}

/// Also used, self-referentially (`vessel_a_id == vessel_b_id`), as the
/// container for floating-storage and Arctic-no-ice-class flags, per §9's
/// "single Flag table with a kind discriminator" strategy. `flag_kind` is
/// `None` for an ordinary convoy row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvoyEvent {
    pub convoy_event_id: i64,
    pub vessel_a_id: i64,
    pub vessel_b_id: i64,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub risk_component: i32,
    pub flag_kind: Option<FlagKind>,
    pub evidence_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    FloatingStorage,
    ArcticNoIceClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraughtChangeEvent {
    pub draught_event_id: i64,
    pub vessel_id: i64,
    pub changed_at_utc: DateTime<Utc>,
    pub before_draught_m: f64,
    pub after_draught_m: f64,
    pub delta_m: f64,
    pub straddles_gap: bool,
    pub risk_component: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetAlert {
    pub fleet_alert_id: i64,
    pub owner_cluster_id: i64,
    pub description: String,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub merge_candidate_id: i64,
    pub dark_vessel_id: i64,
    pub new_vessel_id: i64,
    pub confidence: f64,
    pub breakdown: HashMap<String, f64>,
    pub status: MergeCandidateStatus,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOperation {
    pub merge_operation_id: i64,
    pub dark_vessel_id: i64,
    pub surviving_vessel_id: i64,
    pub confidence: f64,
    pub breakdown: HashMap<String, f64>,
    pub executed_at_utc: DateTime<Utc>,
    pub status: MergeCandidateStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeChain {
    pub merge_chain_id: i64,
    pub canonical_vessel_id: i64,
    pub links_json: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: i64,
    pub name: String,
    pub normalized_name: String,
    pub country: Option<String>,
    pub address: Option<String>,
    pub parent_owner_id: Option<i64>,
    pub is_sanctioned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerCluster {
    pub owner_cluster_id: i64,
    pub member_owner_ids: Vec<i64>,
    pub is_sanctioned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselFingerprint {
    pub vessel_id: i64,
    pub computed_at_utc: DateTime<Utc>,
    pub mean: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationLog {
    pub verification_log_id: i64,
    pub gap_event_id: i64,
    pub provider: String,
    pub review_status: String,
    pub scene_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub pipeline_run_id: i64,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: Option<DateTime<Utc>>,
    pub run_status: RunStatus,
    pub steps: HashMap<String, StepResult>,
    pub detector_counts: HashMap<String, i64>,
    pub drift_disabled_detectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceCard {
    pub evidence_card_id: i64,
    pub gap_event_id: i64,
    pub version: i32,
    pub export_format: String,
    pub created_at_utc: DateTime<Utc>,
    pub score_snapshot: i32,
    pub breakdown_snapshot: HashMap<String, i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbed_vessel_detection() {
        let v = Vessel {
            vessel_id: 1,
            mmsi: "123456789".into(),
            imo: None,
            name: None,
            callsign: None,
            flag: None,
            flag_risk: FlagRisk::Unknown,
            vessel_type: None,
            deadweight: None,
            year_built: None,
            ais_class: AisClass::Unknown,
            mmsi_first_seen_utc: None,
            vessel_laid_up_30d: false,
            vessel_laid_up_60d: false,
            vessel_laid_up_in_sts_zone: false,
            pi_status: PiStatus::Unknown,
            ism_manager: None,
            merged_into_vessel_id: Some(2),
        };
        assert!(v.is_absorbed());
    }
}
