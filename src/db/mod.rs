//! Persistence layer. The database is the single source of truth (§5): each
//! pipeline step opens its own transaction and owns its commit/rollback.
//!
//! Schema and connection handling follow the teacher's `signals/db_storage.rs`
//! shape: a single `SCHEMA_SQL` constant run once via `execute_batch`, WAL
//! mode, and a shared connection guarded by `parking_lot::Mutex` rather than
//! a pool — this system has one writer-of-record per pipeline run, not a
//! swarm of independent web handlers, so a single guarded connection is
//! sufficient the same way it was sufficient for the teacher's signal store.

pub mod events;
pub mod positions;
pub mod vessels;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::error::Result;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS vessels (
    vessel_id INTEGER PRIMARY KEY AUTOINCREMENT,
    mmsi TEXT NOT NULL UNIQUE,
    imo TEXT,
    name TEXT,
    callsign TEXT,
    flag TEXT,
    flag_risk TEXT NOT NULL DEFAULT 'unknown',
    vessel_type TEXT,
    deadweight REAL,
    year_built INTEGER,
    ais_class TEXT NOT NULL DEFAULT 'unknown',
    mmsi_first_seen_utc TEXT,
    vessel_laid_up_30d INTEGER NOT NULL DEFAULT 0,
    vessel_laid_up_60d INTEGER NOT NULL DEFAULT 0,
    vessel_laid_up_in_sts_zone INTEGER NOT NULL DEFAULT 0,
    pi_status TEXT NOT NULL DEFAULT 'unknown',
    ism_manager TEXT,
    merged_into_vessel_id INTEGER REFERENCES vessels(vessel_id)
);

CREATE TABLE IF NOT EXISTS ais_positions (
    position_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    timestamp_utc TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    sog_kn REAL,
    cog_deg REAL,
    heading_deg REAL,
    nav_status INTEGER,
    draught_m REAL,
    destination TEXT,
    ais_class TEXT NOT NULL DEFAULT 'unknown',
    source TEXT NOT NULL,
    UNIQUE(vessel_id, timestamp_utc)
);
CREATE INDEX IF NOT EXISTS idx_positions_vessel_time ON ais_positions(vessel_id, timestamp_utc);

CREATE TABLE IF NOT EXISTS ais_observations (
    mmsi TEXT NOT NULL,
    timestamp_utc TEXT NOT NULL,
    source TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    received_utc TEXT NOT NULL,
    PRIMARY KEY (mmsi, timestamp_utc, source)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_observations_received ON ais_observations(received_utc);

CREATE TABLE IF NOT EXISTS corridors (
    corridor_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    corridor_type TEXT NOT NULL,
    min_lat REAL NOT NULL,
    max_lat REAL NOT NULL,
    min_lon REAL NOT NULL,
    max_lon REAL NOT NULL,
    risk_weight REAL NOT NULL DEFAULT 1.0,
    is_jamming_zone INTEGER NOT NULL DEFAULT 0,
    tags TEXT
);

CREATE TABLE IF NOT EXISTS dark_zones (
    dark_zone_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    min_lat REAL NOT NULL,
    max_lat REAL NOT NULL,
    min_lon REAL NOT NULL,
    max_lon REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS ais_gap_events (
    gap_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    start_point_id INTEGER NOT NULL,
    end_point_id INTEGER NOT NULL,
    gap_start_utc TEXT NOT NULL,
    gap_end_utc TEXT NOT NULL,
    duration_minutes REAL NOT NULL,
    pre_gap_sog_kn REAL,
    actual_gap_distance_nm REAL NOT NULL,
    max_plausible_distance_nm REAL NOT NULL,
    impossible_speed_flag INTEGER NOT NULL DEFAULT 0,
    velocity_plausibility_ratio REAL NOT NULL,
    corridor_id INTEGER REFERENCES corridors(corridor_id),
    in_dark_zone INTEGER NOT NULL DEFAULT 0,
    is_feed_outage INTEGER NOT NULL DEFAULT 0,
    coverage_quality TEXT,
    risk_score INTEGER,
    risk_breakdown_json TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    analyst_notes TEXT,
    UNIQUE(vessel_id, gap_start_utc)
);
CREATE INDEX IF NOT EXISTS idx_gap_vessel ON ais_gap_events(vessel_id);
CREATE INDEX IF NOT EXISTS idx_gap_corridor_start ON ais_gap_events(corridor_id, gap_start_utc);

CREATE TABLE IF NOT EXISTS spoofing_anomalies (
    anomaly_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    spoofing_type TEXT NOT NULL,
    start_utc TEXT NOT NULL,
    end_utc TEXT NOT NULL,
    detail_json TEXT,
    risk_component INTEGER NOT NULL DEFAULT 0,
    UNIQUE(vessel_id, spoofing_type, start_utc)
);

CREATE TABLE IF NOT EXISTS sts_transfer_events (
    sts_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_a_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    vessel_b_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    start_utc TEXT NOT NULL,
    end_utc TEXT NOT NULL,
    mean_lat REAL NOT NULL,
    mean_lon REAL NOT NULL,
    detection_type TEXT NOT NULL,
    risk_component INTEGER NOT NULL DEFAULT 0,
    UNIQUE(vessel_a_id, vessel_b_id, start_utc)
);
CREATE INDEX IF NOT EXISTS idx_sts_vessel_a ON sts_transfer_events(vessel_a_id);
CREATE INDEX IF NOT EXISTS idx_sts_vessel_b ON sts_transfer_events(vessel_b_id);

CREATE TABLE IF NOT EXISTS loitering_events (
    loitering_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    start_utc TEXT NOT NULL,
    end_utc TEXT NOT NULL,
    median_sog_kn REAL NOT NULL,
    mean_lat REAL NOT NULL,
    mean_lon REAL NOT NULL,
    corridor_id INTEGER REFERENCES corridors(corridor_id),
    preceding_gap_id INTEGER REFERENCES ais_gap_events(gap_event_id),
    following_gap_id INTEGER REFERENCES ais_gap_events(gap_event_id),
    risk_component INTEGER NOT NULL DEFAULT 0,
    UNIQUE(vessel_id, start_utc)
);

CREATE TABLE IF NOT EXISTS convoy_events (
    convoy_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_a_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    vessel_b_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    start_utc TEXT NOT NULL,
    end_utc TEXT NOT NULL,
    risk_component INTEGER NOT NULL DEFAULT 0,
    flag_kind TEXT,
    evidence_json TEXT,
    UNIQUE(vessel_a_id, vessel_b_id, start_utc)
);

CREATE TABLE IF NOT EXISTS draught_change_events (
    draught_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    changed_at_utc TEXT NOT NULL,
    before_draught_m REAL NOT NULL,
    after_draught_m REAL NOT NULL,
    delta_m REAL NOT NULL,
    straddles_gap INTEGER NOT NULL DEFAULT 0,
    risk_component INTEGER NOT NULL DEFAULT 0,
    UNIQUE(vessel_id, changed_at_utc)
);

CREATE TABLE IF NOT EXISTS mmsi_cloning_events (
    cloning_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    position_a_id INTEGER NOT NULL,
    position_b_id INTEGER NOT NULL,
    distance_nm REAL NOT NULL,
    implied_speed_kn REAL NOT NULL,
    risk_component INTEGER NOT NULL DEFAULT 0,
    UNIQUE(vessel_id, position_a_id, position_b_id)
);

CREATE TABLE IF NOT EXISTS merge_candidates (
    merge_candidate_id INTEGER PRIMARY KEY AUTOINCREMENT,
    dark_vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    new_vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    confidence REAL NOT NULL,
    breakdown_json TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at_utc TEXT NOT NULL,
    UNIQUE(dark_vessel_id, new_vessel_id)
);

CREATE TABLE IF NOT EXISTS merge_operations (
    merge_operation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    dark_vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    surviving_vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    confidence REAL NOT NULL,
    breakdown_json TEXT,
    executed_at_utc TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS merge_chains (
    merge_chain_id INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_vessel_id INTEGER NOT NULL REFERENCES vessels(vessel_id),
    links_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS owners (
    owner_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    country TEXT,
    address TEXT,
    parent_owner_id INTEGER REFERENCES owners(owner_id),
    is_sanctioned INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_owners_normalized_name ON owners(normalized_name);

CREATE TABLE IF NOT EXISTS owner_clusters (
    owner_cluster_id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_owner_ids_json TEXT NOT NULL,
    is_sanctioned INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS vessel_fingerprints (
    vessel_id INTEGER PRIMARY KEY REFERENCES vessels(vessel_id),
    computed_at_utc TEXT NOT NULL,
    mean_json TEXT NOT NULL,
    covariance_json TEXT NOT NULL,
    sample_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS evidence_cards (
    evidence_card_id INTEGER PRIMARY KEY AUTOINCREMENT,
    gap_event_id INTEGER NOT NULL REFERENCES ais_gap_events(gap_event_id),
    version INTEGER NOT NULL,
    export_format TEXT NOT NULL,
    created_at_utc TEXT NOT NULL,
    score_snapshot INTEGER NOT NULL,
    breakdown_snapshot_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fleet_alerts (
    fleet_alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_cluster_id INTEGER NOT NULL REFERENCES owner_clusters(owner_cluster_id),
    description TEXT NOT NULL,
    created_at_utc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS verification_logs (
    verification_log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    gap_event_id INTEGER NOT NULL REFERENCES ais_gap_events(gap_event_id),
    provider TEXT NOT NULL,
    review_status TEXT NOT NULL,
    scene_refs_json TEXT
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    pipeline_run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    date_from TEXT NOT NULL,
    date_to TEXT NOT NULL,
    started_at_utc TEXT NOT NULL,
    finished_at_utc TEXT,
    run_status TEXT NOT NULL DEFAULT 'partial',
    steps_json TEXT,
    detector_counts_json TEXT,
    drift_disabled_detectors_json TEXT
);
"#;

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_lowercase() != "wal" {
            warn!(mode = %journal_mode, "expected WAL journal mode");
        }
        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Purges short-retention observation rows older than the cutoff.
    /// Per §5, this must not auto-commit — the caller drives the
    /// transaction this runs inside of.
    pub fn purge_observations_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM ais_observations WHERE received_utc < ?1",
            [cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }
}

pub(crate) fn sqlite_is_uniqueness_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
