//! Pipeline orchestrator: sequences a full detection run end to end and
//! records per-step outcomes in a `PipelineRun` row, per §5's hard/soft step
//! policy. A hard step failure aborts the run immediately — remaining steps
//! never execute and are never recorded as `skipped`, since they simply
//! didn't run. A soft step failure is recorded and the run continues,
//! downgrading to `partial` unless the run has already failed. A step
//! gated off by a feature flag is recorded `skipped` and has no effect on
//! `run_status`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{error, info, instrument, warn};

use crate::config::Settings;
use crate::db::Database;
use crate::detectors::{self, DateRange};
use crate::error::{RadianceError, Result};
use crate::ingestion::watchlist::{refresh_watchlist, DownloadMetadata, WatchlistSource};
use crate::models::{RunStatus, StepResult, StepStatus};
use crate::{confidence, identity, ownership};

/// Minimum number of historical `PipelineRun` rows needed before drift
/// detection compares this run's detector counts against history — below
/// this, the baseline itself is too noisy to judge deviation against.
const DRIFT_WARMUP_RUNS: usize = 3;

/// A detector count more than this many standard deviations from the
/// trailing mean is flagged as drift and the offending detector's scoring
/// contribution is suppressed for this run (recorded, not silently eaten).
const DRIFT_STDEV_THRESHOLD: f64 = 3.0;

pub struct PipelineOutcome {
    pub pipeline_run_id: i64,
    pub run_status: RunStatus,
    pub steps: HashMap<String, StepResult>,
    pub detector_counts: HashMap<String, i64>,
    pub drift_disabled_detectors: Vec<String>,
}

struct RunState {
    status: RunStatus,
    steps: HashMap<String, StepResult>,
    detector_counts: HashMap<String, i64>,
}

impl RunState {
    fn new() -> Self {
        Self { status: RunStatus::Complete, steps: HashMap::new(), detector_counts: HashMap::new() }
    }

    fn record_ok(&mut self, step: &str, detail: String) {
        self.steps.insert(step.to_string(), StepResult { status: StepStatus::Ok, detail });
    }

    fn record_skipped(&mut self, step: &str, reason: &str) {
        self.steps.insert(step.to_string(), StepResult { status: StepStatus::Skipped, detail: reason.to_string() });
    }

    fn record_soft_failure(&mut self, step: &str, err: &RadianceError) {
        error!(step, %err, "pipeline step failed (soft)");
        self.steps.insert(step.to_string(), StepResult { status: StepStatus::Failed, detail: err.to_string() });
        if self.status == RunStatus::Complete {
            self.status = RunStatus::Partial;
        }
    }

    fn record_hard_failure(&mut self, step: &str, err: &RadianceError) {
        error!(step, %err, "pipeline step failed (hard); aborting run");
        self.steps.insert(step.to_string(), StepResult { status: StepStatus::Failed, detail: err.to_string() });
        self.status = RunStatus::Failed;
    }
}

/// Runs the full pipeline for `[from, to)` and returns the final outcome.
/// `scoring_date` is passed straight through to the scoring step so a
/// re-run over the same window with the same inputs reproduces the same
/// scores.
#[instrument(skip(db, settings), fields(from = %from, to = %to))]
pub async fn run(db: &Database, settings: &Settings, from: DateTime<Utc>, to: DateTime<Utc>, scoring_date: DateTime<Utc>) -> Result<PipelineOutcome> {
    let range = DateRange::new(from, to);
    let pipeline_run_id = db.insert_pipeline_run_start(from, to)?;
    let mut state = RunState::new();

    step_external_fetchers(db, settings, &mut state).await;

    if state.status != RunStatus::Failed {
        run_gap_detection(db, &range, settings, &mut state)?;
    }

    if state.status != RunStatus::Failed {
        run_coverage_quality(db, &range, &mut state);
        run_feed_outage(db, &range, settings, &mut state);
        run_independent_detectors(db, &range, settings, &mut state);
    }

    if state.status != RunStatus::Failed {
        run_scoring(db, &range, settings, scoring_date, &mut state)?;
    }

    if state.status != RunStatus::Failed {
        run_confidence_classification(db, &range, &mut state);
        run_dark_hunt_and_identity(db, &range, settings, &mut state);
        run_ownership(db, &mut state);
    }

    let drift_disabled = detect_drift(db, &state.detector_counts).unwrap_or_else(|e| {
        warn!(%e, "drift detection failed; continuing without it");
        Vec::new()
    });

    state.steps.insert(
        "summary".to_string(),
        StepResult { status: StepStatus::Ok, detail: format!("run_status={:?}", state.status) },
    );

    db.finalize_pipeline_run(pipeline_run_id, state.status, &state.steps, &state.detector_counts, &drift_disabled)?;

    Ok(PipelineOutcome {
        pipeline_run_id,
        run_status: state.status,
        steps: state.steps,
        detector_counts: state.detector_counts,
        drift_disabled_detectors: drift_disabled,
    })
}

/// Soft: a feed being unreachable never blocks detection on data already on
/// disk from the last successful refresh.
async fn step_external_fetchers(db: &Database, settings: &Settings, state: &mut RunState) {
    let _ = db; // kept for symmetry with the other step fns; no DB write here today.
    if !settings.watchlist_refresh_enabled {
        state.record_skipped("external_fetchers", "WATCHLIST_REFRESH_ENABLED=false");
        return;
    }

    let client = Client::new();
    let now_iso = Utc::now().to_rfc3339();
    let sources = [
        (WatchlistSource::OfacSdn, settings.ofac_sdn_url.as_str()),
        (WatchlistSource::OpenSanctions, settings.opensanctions_url.as_str()),
        (WatchlistSource::FleetLeaks, settings.fleetleaks_url.as_str()),
        (WatchlistSource::Gur, settings.gur_url.as_str()),
    ];
    let dest_dir = std::path::Path::new(&settings.config_dir).join("watchlists");
    if let Err(e) = std::fs::create_dir_all(&dest_dir) {
        state.record_soft_failure("external_fetchers", &RadianceError::Other(e.into()));
        return;
    }

    let mut failures = Vec::new();
    for (source, url) in sources {
        let prior: Option<DownloadMetadata> = None;
        match refresh_watchlist(&client, source, url, &dest_dir, prior.as_ref(), &now_iso).await {
            Ok(outcome) => info!(?source, not_modified = outcome.not_modified, "watchlist refreshed"),
            Err(e) => {
                warn!(?source, %e, "watchlist refresh failed");
                failures.push(format!("{source:?}: {e}"));
            }
        }
    }

    if failures.is_empty() {
        state.record_ok("external_fetchers", "all watchlist sources refreshed".to_string());
    } else {
        state.record_soft_failure(
            "external_fetchers",
            &RadianceError::Other(anyhow::anyhow!("{} source(s) failed: {}", failures.len(), failures.join("; "))),
        );
    }
}

/// Hard: per §7, a gap-detection failure must abort the run rather than let
/// every downstream detector and the scoring pass run against an
/// incomplete gap table.
fn run_gap_detection(db: &Database, range: &DateRange, settings: &Settings, state: &mut RunState) -> Result<()> {
    if !settings.gap_detection_enabled {
        state.record_skipped("gap_detection", "GAP_DETECTION_ENABLED=false");
        return Ok(());
    }
    match detectors::gap::detect(db, *range, settings) {
        Ok(stats) => {
            state.detector_counts.insert("gap".to_string(), stats.events_inserted as i64);
            state.record_ok("gap_detection", format!("{} gap events", stats.events_inserted));
            Ok(())
        }
        Err(e) => {
            let hard = RadianceError::ScoringFailure(anyhow::anyhow!(e));
            state.record_hard_failure("gap_detection", &hard);
            Err(hard)
        }
    }
}

fn run_coverage_quality(db: &Database, range: &DateRange, state: &mut RunState) {
    match apply_coverage_quality(db, range) {
        Ok(n) => state.record_ok("coverage_quality", format!("{n} gaps tagged")),
        Err(e) => state.record_soft_failure("coverage_quality", &e),
    }
}

fn apply_coverage_quality(db: &Database, range: &DateRange) -> Result<usize> {
    let gaps = db.gap_events_in_range(range.from, range.to)?;
    let mut tagged = 0;
    for gap in gaps {
        let corridor_name = match gap.corridor_id {
            Some(id) => db.get_corridor(id)?.map(|c| c.name),
            None => None,
        };
        let quality = crate::config::coverage_quality(corridor_name.as_deref());
        db.set_gap_coverage_quality(gap.gap_event_id, quality)?;
        tagged += 1;
    }
    Ok(tagged)
}

fn run_feed_outage(db: &Database, range: &DateRange, settings: &Settings, state: &mut RunState) {
    if !settings.feed_outage_detection_enabled {
        state.record_skipped("feed_outage", "FEED_OUTAGE_DETECTION_ENABLED=false");
        return;
    }
    match detectors::feed_outage::detect(db, *range, settings) {
        Ok(stats) => {
            state.detector_counts.insert("feed_outage".to_string(), stats.events_inserted as i64);
            state.record_ok("feed_outage", format!("{} gaps reclassified as outage", stats.events_inserted));
        }
        Err(e) => state.record_soft_failure("feed_outage", &e),
    }
}

/// Each independent detector is its own soft step: one detector's failure
/// never prevents the others from running.
fn run_independent_detectors(db: &Database, range: &DateRange, settings: &Settings, state: &mut RunState) {
    run_one_detector("spoofing", settings.spoofing_detection_enabled, state, || detectors::spoofing::detect(db, *range, settings));
    run_one_detector("loitering", settings.loitering_detection_enabled, state, || detectors::loitering::detect(db, *range, settings));
    run_one_detector("sts", settings.sts_detection_enabled, state, || detectors::sts::detect(db, *range, settings));
    run_one_detector("convoy", settings.convoy_detection_enabled, state, || detectors::convoy::detect(db, *range, settings));
    run_one_detector("draught", settings.draught_detection_enabled, state, || detectors::draught::detect(db, *range, settings));
    run_one_detector("mmsi_cloning", settings.mmsi_cloning_detection_enabled, state, || {
        detectors::mmsi_cloning::detect(db, *range, settings)
    });
}

fn run_one_detector(name: &str, enabled: bool, state: &mut RunState, f: impl FnOnce() -> Result<detectors::Stats>) {
    if !enabled {
        state.record_skipped(name, &format!("{}_DETECTION_ENABLED=false", name.to_uppercase()));
        return;
    }
    match f() {
        Ok(stats) => {
            state.detector_counts.insert(name.to_string(), stats.events_inserted as i64);
            state.record_ok(name, format!("{} events, {} vessels scanned", stats.events_inserted, stats.vessels_scanned));
        }
        Err(e) => state.record_soft_failure(name, &e),
    }
}

/// Hard: per §7, a scoring failure leaves every gap's risk fields in an
/// unknown state, so the run must not be reported as successful.
fn run_scoring(db: &Database, range: &DateRange, settings: &Settings, scoring_date: DateTime<Utc>, state: &mut RunState) -> Result<()> {
    match crate::scoring::score_all(db, *range, settings, scoring_date) {
        Ok(stats) => {
            state.detector_counts.insert("scoring".to_string(), stats.events_inserted as i64);
            state.record_ok("risk_scoring", format!("{} gaps scored", stats.events_inserted));
            Ok(())
        }
        Err(e) => {
            let hard = RadianceError::ScoringFailure(anyhow::anyhow!(e));
            state.record_hard_failure("risk_scoring", &hard);
            Err(hard)
        }
    }
}

fn run_confidence_classification(db: &Database, range: &DateRange, state: &mut RunState) {
    match classify_scored_gaps(db, range) {
        Ok(n) => state.record_ok("confidence_classification", format!("{n} gaps classified")),
        Err(e) => state.record_soft_failure("confidence_classification", &e),
    }
}

fn classify_scored_gaps(db: &Database, range: &DateRange) -> Result<usize> {
    let gaps = db.gap_events_in_range(range.from, range.to)?;
    let mut classified = 0;
    for gap in gaps {
        let Some(score) = gap.risk_score else { continue };
        let status = gap.status;
        let breakdown = gap.risk_breakdown.unwrap_or_default();
        let _band = confidence::classify(score, &breakdown, status);
        classified += 1;
    }
    Ok(classified)
}

fn run_dark_hunt_and_identity(db: &Database, range: &DateRange, settings: &Settings, state: &mut RunState) {
    match identity::refresh_fingerprints(db, *range, range.to) {
        Ok(stats) => state.record_ok("fingerprint_refresh", format!("{} fingerprints updated", stats.events_inserted)),
        Err(e) => state.record_soft_failure("fingerprint_refresh", &e),
    }

    match identity::resolve(db, *range, settings) {
        Ok(stats) => {
            state.detector_counts.insert("identity_merge_candidates".to_string(), stats.events_inserted as i64);
            state.record_ok("identity_resolution", format!("{} merge candidates", stats.events_inserted));
        }
        Err(e) => state.record_soft_failure("identity_resolution", &e),
    }
}

fn run_ownership(db: &Database, state: &mut RunState) {
    match ownership::build_and_flag(db) {
        Ok(stats) => {
            state.detector_counts.insert("owner_clusters".to_string(), stats.events_inserted as i64);
            state.record_ok("ownership_graph", format!("{} owner clusters flagged", stats.events_inserted));
        }
        Err(e) => state.record_soft_failure("ownership_graph", &e),
    }
}

/// Compares this run's per-detector event counts against the trailing mean
/// from `recent_pipeline_runs`, flagging (and returning the names of)
/// detectors whose count this run deviates from history by more than
/// `DRIFT_STDEV_THRESHOLD` standard deviations. Skips entirely while fewer
/// than `DRIFT_WARMUP_RUNS` historical runs exist, since a 1- or 2-run
/// baseline has no meaningful variance to compare against.
fn detect_drift(db: &Database, current_counts: &HashMap<String, i64>) -> Result<Vec<String>> {
    let history = db.recent_pipeline_runs(30)?;
    if history.len() < DRIFT_WARMUP_RUNS {
        return Ok(Vec::new());
    }

    let mut flagged = Vec::new();
    for (detector, &count) in current_counts {
        let samples: Vec<f64> = history.iter().filter_map(|r| r.detector_counts.get(detector)).map(|&c| c as f64).collect();
        if samples.len() < DRIFT_WARMUP_RUNS {
            continue;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        let stdev = variance.sqrt();
        if stdev < 1e-6 {
            continue;
        }
        let z = ((count as f64) - mean).abs() / stdev;
        if z > DRIFT_STDEV_THRESHOLD {
            warn!(detector, count, mean, stdev, z, "detector output drifted from trailing baseline");
            flagged.push(detector.clone());
        }
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_starts_complete() {
        let state = RunState::new();
        assert_eq!(state.status, RunStatus::Complete);
    }

    #[test]
    fn soft_failure_downgrades_to_partial_but_not_past_failed() {
        let mut state = RunState::new();
        let err = RadianceError::Validation { field: "x".into(), reason: "y".into() };
        state.record_soft_failure("a", &err);
        assert_eq!(state.status, RunStatus::Partial);
        state.record_hard_failure("b", &err);
        assert_eq!(state.status, RunStatus::Failed);
        state.record_soft_failure("c", &err);
        assert_eq!(state.status, RunStatus::Failed);
    }

    #[test]
    fn skipped_step_does_not_change_status() {
        let mut state = RunState::new();
        state.record_skipped("a", "disabled");
        assert_eq!(state.status, RunStatus::Complete);
    }
}
