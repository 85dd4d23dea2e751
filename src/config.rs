//! Configuration: environment-driven runtime settings plus the five YAML
//! files the external interface section enumerates. A missing file or a
//! missing expected section is a fatal `RadianceError::Configuration` at
//! load time — never deferred to first use inside a detector.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RadianceError, Result};

/// Runtime settings read from the environment, following the same
/// `env::var(...).unwrap_or_else(...).parse().unwrap_or(default)` shape the
/// rest of this codebase's ambient config uses.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: String,
    pub config_dir: String,

    // Detection flags (`*_DETECTION_ENABLED`); default true for stable
    // detectors, false for experimental ones per §6.
    pub gap_detection_enabled: bool,
    pub spoofing_detection_enabled: bool,
    pub loitering_detection_enabled: bool,
    pub sts_detection_enabled: bool,
    pub convoy_detection_enabled: bool,
    pub draught_detection_enabled: bool,
    pub mmsi_cloning_detection_enabled: bool,
    pub stale_ais_detection_enabled: bool,
    pub feed_outage_detection_enabled: bool,
    pub track_naturalness_detection_enabled: bool,
    pub fingerprint_detection_enabled: bool,

    // Scoring flags (`*_SCORING_ENABLED`).
    pub spoofing_scoring_enabled: bool,
    pub sts_scoring_enabled: bool,
    pub loitering_scoring_enabled: bool,
    pub convoy_scoring_enabled: bool,
    pub draught_scoring_enabled: bool,
    pub track_naturalness_scoring_enabled: bool,

    pub max_outage_ratio: f64,
    pub loiter_gap_linkage_hours: i64,
    pub auto_hunt_min_gap_score: i32,

    // External watchlist sources (§4.1/§6). Refresh is a soft pipeline step;
    // a feed being unreachable never blocks detection on stale data already
    // on disk.
    pub watchlist_refresh_enabled: bool,
    pub ofac_sdn_url: String,
    pub opensanctions_url: String,
    pub fleetleaks_url: String,
    pub gur_url: String,
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./radiancefleet.db".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "./config".to_string());

        Ok(Self {
            database_path,
            config_dir,

            gap_detection_enabled: env_bool("GAP_DETECTION_ENABLED", true),
            spoofing_detection_enabled: env_bool("SPOOFING_DETECTION_ENABLED", true),
            loitering_detection_enabled: env_bool("LOITERING_DETECTION_ENABLED", true),
            sts_detection_enabled: env_bool("STS_DETECTION_ENABLED", true),
            convoy_detection_enabled: env_bool("CONVOY_DETECTION_ENABLED", true),
            draught_detection_enabled: env_bool("DRAUGHT_DETECTION_ENABLED", true),
            mmsi_cloning_detection_enabled: env_bool("MMSI_CLONING_DETECTION_ENABLED", true),
            stale_ais_detection_enabled: env_bool("STALE_AIS_DETECTION_ENABLED", true),
            feed_outage_detection_enabled: env_bool("FEED_OUTAGE_DETECTION_ENABLED", true),
            track_naturalness_detection_enabled: env_bool(
                "TRACK_NATURALNESS_DETECTION_ENABLED",
                false,
            ),
            fingerprint_detection_enabled: env_bool("FINGERPRINT_DETECTION_ENABLED", false),

            spoofing_scoring_enabled: env_bool("SPOOFING_SCORING_ENABLED", true),
            sts_scoring_enabled: env_bool("STS_SCORING_ENABLED", true),
            loitering_scoring_enabled: env_bool("LOITERING_SCORING_ENABLED", true),
            convoy_scoring_enabled: env_bool("CONVOY_SCORING_ENABLED", true),
            draught_scoring_enabled: env_bool("DRAUGHT_SCORING_ENABLED", true),
            track_naturalness_scoring_enabled: env_bool(
                "TRACK_NATURALNESS_SCORING_ENABLED",
                false,
            ),

            max_outage_ratio: env_f64("MAX_OUTAGE_RATIO", 0.3),
            loiter_gap_linkage_hours: env_i64("LOITER_GAP_LINKAGE_HOURS", 6),
            auto_hunt_min_gap_score: env_i64("AUTO_HUNT_MIN_GAP_SCORE", 50) as i32,

            watchlist_refresh_enabled: env_bool("WATCHLIST_REFRESH_ENABLED", true),
            ofac_sdn_url: std::env::var("OFAC_SDN_URL")
                .unwrap_or_else(|_| "https://www.treasury.gov/ofac/downloads/sdn.csv".to_string()),
            opensanctions_url: std::env::var("OPENSANCTIONS_URL")
                .unwrap_or_else(|_| "https://data.opensanctions.org/datasets/latest/default/targets.simple.json".to_string()),
            fleetleaks_url: std::env::var("FLEETLEAKS_URL").unwrap_or_else(|_| "https://fleetleaks.example/api/vessels.json".to_string()),
            gur_url: std::env::var("GUR_URL").unwrap_or_else(|_| "https://gur.example/shadow-fleet.csv".to_string()),
        })
    }
}

// --- risk_scoring.yaml ---------------------------------------------------

pub const EXPECTED_SCORING_SECTIONS: &[&str] = &[
    "gap_duration",
    "gap_frequency",
    "spoofing",
    "metadata",
    "legitimacy",
    "dark_zone",
    "corridor",
    "sts",
    "behavioral",
    "watchlist",
    "convoy",
    "pi_validation",
    "fraudulent_registry",
    "track_naturalness",
    "stale_ais",
    "at_sea_operations",
    "ism_continuity",
    "rename_velocity",
    "destination",
    "scrapped_registry",
    "track_replay",
    "ownership_graph",
    "vessel_age",
    "pi_insurance",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoringConfig {
    pub last_updated: String,
    #[serde(flatten)]
    pub sections: std::collections::HashMap<String, std::collections::HashMap<String, i32>>,
}

impl RiskScoringConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RadianceError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let cfg: RiskScoringConfig = serde_yaml::from_str(&raw)
            .map_err(|e| RadianceError::Configuration(format!("invalid risk_scoring.yaml: {e}")))?;

        let present: HashSet<&str> = cfg.sections.keys().map(|s| s.as_str()).collect();
        let missing: Vec<&str> = EXPECTED_SCORING_SECTIONS
            .iter()
            .filter(|s| !present.contains(*s))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(RadianceError::Configuration(format!(
                "risk_scoring.yaml missing sections: {}",
                missing.join(", ")
            )));
        }
        Ok(cfg)
    }

    pub fn points(&self, section: &str, key: &str) -> Option<i32> {
        self.sections.get(section).and_then(|m| m.get(key)).copied()
    }
}

// --- legitimate_pi_clubs.yaml ---------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiClub {
    pub name: String,
    pub short: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiClubsConfig {
    pub legitimate_clubs: Vec<PiClub>,
    pub known_fraudulent: Vec<String>,
    pub last_updated: String,
}

impl PiClubsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path, "legitimate_pi_clubs.yaml")
    }

    pub fn is_legitimate(&self, club_name: &str) -> bool {
        self.legitimate_clubs
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(club_name) || c.short.eq_ignore_ascii_case(club_name))
    }
}

// --- fraudulent_registries.yaml -------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub country_code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudulentRegistriesConfig {
    pub tier_0_fraudulent: Vec<RegistryEntry>,
    pub tier_1_high_risk: Vec<RegistryEntry>,
    pub tier_2_monitored: Vec<RegistryEntry>,
}

impl FraudulentRegistriesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path, "fraudulent_registries.yaml")
    }

    /// Returns the registry tier (0 = most fraudulent) a flag country
    /// belongs to, if any.
    pub fn tier_for_country(&self, country_code: &str) -> Option<u8> {
        if self
            .tier_0_fraudulent
            .iter()
            .any(|e| e.country_code == country_code)
        {
            Some(0)
        } else if self
            .tier_1_high_risk
            .iter()
            .any(|e| e.country_code == country_code)
        {
            Some(1)
        } else if self
            .tier_2_monitored
            .iter()
            .any(|e| e.country_code == country_code)
        {
            Some(2)
        } else {
            None
        }
    }
}

// --- scrapped_vessels.yaml -------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrappedImo {
    pub imo: String,
    pub name: String,
    pub scrapped_year: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrappedVesselsConfig {
    pub scrapped_imos: Vec<ScrappedImo>,
}

impl ScrappedVesselsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path, "scrapped_vessels.yaml")
    }

    pub fn is_scrapped(&self, imo: &str) -> bool {
        self.scrapped_imos.iter().any(|e| e.imo == imo)
    }
}

// --- corridors.yaml ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorDef {
    pub name: String,
    pub corridor_type: String,
    pub bbox: String,
    pub risk_weight: f64,
    pub is_jamming_zone: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorsConfig {
    pub corridors: Vec<CorridorDef>,
}

impl CorridorsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path, "corridors.yaml")
    }
}

fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path, label: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RadianceError::Configuration(format!("cannot read {label}: {e}")))?;
    serde_yaml::from_str(&raw).map_err(|e| RadianceError::Configuration(format!("invalid {label}: {e}")))
}

/// Static coverage-quality table from §6, matched case-insensitively in the
/// listed order — first substring match wins.
pub const COVERAGE_TABLE: &[(&str, &str)] = &[
    ("Baltic", "GOOD"),
    ("Turkish Straits", "GOOD"),
    ("Black Sea", "POOR"),
    ("Persian Gulf", "NONE"),
    ("Singapore", "PARTIAL"),
    ("Mediterranean", "MODERATE"),
    ("Far East", "PARTIAL"),
    ("Nakhodka", "PARTIAL"),
];

pub fn coverage_quality(corridor_name: Option<&str>) -> &'static str {
    let Some(name) = corridor_name else {
        return "UNKNOWN";
    };
    let lower = name.to_lowercase();
    for (key, quality) in COVERAGE_TABLE {
        if lower.contains(&key.to_lowercase()) {
            return quality;
        }
    }
    "UNKNOWN"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_table_first_match_wins_in_listed_order() {
        assert_eq!(coverage_quality(Some("Baltic Export Route")), "GOOD");
        assert_eq!(coverage_quality(Some("Eastern Black Sea Corridor")), "POOR");
        assert_eq!(coverage_quality(Some("Gulf of Nowhere")), "UNKNOWN");
        assert_eq!(coverage_quality(None), "UNKNOWN");
    }

    #[test]
    fn risk_scoring_config_rejects_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_scoring.yaml");
        std::fs::write(&path, "last_updated: '2026-01-01'\ngap_duration:\n  2h_4h: 5\n").unwrap();
        let err = RiskScoringConfig::load(&path).unwrap_err();
        assert!(matches!(err, RadianceError::Configuration(_)));
    }
}
