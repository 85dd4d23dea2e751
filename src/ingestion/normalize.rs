//! Normalization rules for inbound AIS records, per §4.1.
//!
//! Every rule here is pure and synchronous: no I/O, no database access. The
//! streaming and batch ingest paths both funnel records through these
//! functions before they ever reach `upsert_vessel`/`insert_position`.

use chrono::{DateTime, Duration, Utc};

use crate::error::{RadianceError, Result};
use crate::models::FlagRisk;

/// Coast-station, SAR-aircraft, and AtoN MMSI ranges all use a leading `0`
/// (MID digit position occupied by a service-range marker rather than a
/// flag administration) and are not vessel identities.
pub fn is_coast_sar_or_aton(padded: &str) -> bool {
    padded.starts_with('0')
}

/// Strips whitespace, rejects non-numeric input, and left-pads to 9 digits.
/// This is the padding/shape rule alone — `normalize("21100000") ==
/// "021100000"` per §8 — independent of whether the padded value happens to
/// fall in a coast-station/SAR/AtoN range. Callers that need to reject those
/// ranges call `is_coast_sar_or_aton` on the result (see
/// `normalize_vessel_mmsi`, used by the ingestion path that creates/updates
/// vessel identities).
pub fn normalize_mmsi(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(RadianceError::Validation {
            field: "mmsi".into(),
            reason: format!("non-numeric or empty MMSI: {raw:?}"),
        });
    }
    if trimmed.len() > 9 {
        return Err(RadianceError::Validation {
            field: "mmsi".into(),
            reason: format!("MMSI too long: {raw:?}"),
        });
    }
    Ok(format!("{trimmed:0>9}"))
}

/// Normalizes and validates an MMSI as a *vessel* identity: pads, then
/// rejects coast-station/SAR/AtoN ranges. This is what the ingestion upsert
/// path calls before creating or updating a `Vessel` row.
pub fn normalize_vessel_mmsi(raw: &str) -> Result<String> {
    let padded = normalize_mmsi(raw)?;
    if is_coast_sar_or_aton(&padded) {
        return Err(RadianceError::Validation {
            field: "mmsi".into(),
            reason: format!("coast-station/SAR/AtoN MMSI range: {padded}"),
        });
    }
    Ok(padded)
}

/// Rejects coordinates outside `[-90, 90]` x `[-180, 180]`.
pub fn validate_lat_lon(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(RadianceError::Validation {
            field: "lat".into(),
            reason: format!("out of range: {lat}"),
        });
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(RadianceError::Validation {
            field: "lon".into(),
            reason: format!("out of range: {lon}"),
        });
    }
    Ok(())
}

/// `511` is AIS's "heading not available" sentinel; translated to `None`.
pub fn normalize_heading(raw: Option<f64>) -> Option<f64> {
    match raw {
        Some(h) if (h - 511.0).abs() < f64::EPSILON => None,
        other => other,
    }
}

/// Clock-skew tolerance for inbound timestamps: accepted up to 5 minutes
/// ahead of wall clock, rejected beyond that.
pub const CLOCK_SKEW_TOLERANCE_MINUTES: i64 = 5;

/// Parses an ISO-8601 timestamp and enforces the clock-skew tolerance. The
/// caller decides what to do with a parse failure — streaming ingestion may
/// substitute `now`, batch ingestion never does (see `parse_timestamp_batch`
/// / `parse_timestamp_streaming` below).
fn parse_timestamp_checked(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RadianceError::Validation {
            field: "timestamp".into(),
            reason: format!("unparseable ISO-8601 timestamp {raw:?}: {e}"),
        })?;
    if parsed > now + Duration::minutes(CLOCK_SKEW_TOLERANCE_MINUTES) {
        return Err(RadianceError::Validation {
            field: "timestamp".into(),
            reason: format!("timestamp {parsed} is more than {CLOCK_SKEW_TOLERANCE_MINUTES}m in the future"),
        });
    }
    Ok(parsed)
}

/// Batch ingest path: an unparseable timestamp is a dropped-record
/// validation error, never substituted with `now`.
pub fn parse_timestamp_batch(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_timestamp_checked(raw, now)
}

/// Streaming path: an unparseable timestamp falls back to `now` rather than
/// dropping the record outright (a single malformed field in an otherwise
/// live feed shouldn't cost a position), but a timestamp that parses fine
/// and is simply too far in the future is still rejected.
pub fn parse_timestamp_streaming(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => {
            let dt = dt.with_timezone(&Utc);
            if dt > now + Duration::minutes(CLOCK_SKEW_TOLERANCE_MINUTES) {
                Err(RadianceError::Validation {
                    field: "timestamp".into(),
                    reason: format!("timestamp {dt} is more than {CLOCK_SKEW_TOLERANCE_MINUTES}m in the future"),
                })
            } else {
                Ok(dt)
            }
        }
        Err(_) => Ok(now),
    }
}

/// Maritime Identification Digits: the first three digits of an MMSI.
pub fn mid(padded_mmsi: &str) -> Option<&str> {
    padded_mmsi.get(0..3)
}

/// A small, representative MID -> ISO-2 flag table. The full IMO MID
/// registry is an external reference table loaded by the (out-of-scope)
/// file fetchers; this core ships the subset needed for flag-risk
/// derivation and the sanctions-evasion-relevant flags the detectors
/// actually reason about. Unknown MIDs resolve to `None`.
const MID_TABLE: &[(&str, &str)] = &[
    ("201", "AL"), ("205", "BE"), ("209", "CY"), ("212", "CY"),
    ("218", "DE"), ("224", "ES"), ("228", "FR"), ("247", "IT"),
    ("256", "MT"), ("257", "NO"), ("266", "SE"), ("273", "RU"),
    ("275", "RU"), ("303", "US"), ("338", "US"), ("341", "PA"),
    ("351", "PA"), ("352", "PA"), ("353", "PA"), ("354", "PA"),
    ("355", "PA"), ("356", "PA"), ("357", "PA"), ("370", "PA"),
    ("371", "PA"), ("372", "PA"), ("373", "PA"), ("374", "PA"),
    ("401", "KP"), ("412", "CN"), ("413", "CN"), ("414", "CN"),
    ("416", "TW"), ("431", "JP"), ("432", "JP"), ("441", "KR"),
    ("445", "KR"), ("477", "HK"), ("512", "NZ"), ("538", "MH"),
    ("563", "SG"), ("566", "SG"), ("605", "MA"), ("636", "LR"),
    ("667", "LR"), ("669", "LR"), ("677", "TZ"), ("710", "BR"),
];

/// Derives an ISO-2 flag from an MMSI's MID. `None` when the MID isn't in
/// the known-flags table.
pub fn derive_flag(padded_mmsi: &str) -> Option<&'static str> {
    let m = mid(padded_mmsi)?;
    MID_TABLE.iter().find(|(k, _)| *k == m).map(|(_, v)| *v)
}

/// Open registries and flags-of-convenience commonly cited in
/// sanctions-evasion literature: high risk. Recognized open registries with
/// active PSC programs: medium risk. Everything else recognized: low risk.
/// Unrecognized flag: unknown.
const HIGH_RISK_FLAGS: &[&str] = &["PA", "KP", "RU", "TZ", "CM", "TG", "GA", "KM"];
const MEDIUM_RISK_FLAGS: &[&str] = &["LR", "MH", "MT", "CY", "BS", "VU", "HK", "SG"];

pub fn flag_risk_for(flag: Option<&str>) -> FlagRisk {
    match flag {
        None => FlagRisk::Unknown,
        Some(f) if HIGH_RISK_FLAGS.contains(&f) => FlagRisk::HighRisk,
        Some(f) if MEDIUM_RISK_FLAGS.contains(&f) => FlagRisk::MediumRisk,
        Some(_) => FlagRisk::LowRisk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_mmsi() {
        assert_eq!(normalize_mmsi("21100000").unwrap(), "021100000");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(normalize_mmsi("  209010000  ").unwrap(), "209010000");
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(normalize_mmsi("21A100000").is_err());
    }

    #[test]
    fn vessel_mmsi_rejects_coast_station_range_even_after_padding() {
        // "21100000" left-pads to "021100000", which begins with 0 -- a
        // coast-station/SAR/AtoN range, not a vessel identity.
        assert!(normalize_mmsi("21100000").is_ok());
        assert!(normalize_vessel_mmsi("21100000").is_err());
        assert!(normalize_vessel_mmsi("209010000").is_ok());
    }

    #[test]
    fn heading_511_becomes_none() {
        assert_eq!(normalize_heading(Some(511.0)), None);
        assert_eq!(normalize_heading(Some(90.0)), Some(90.0));
        assert_eq!(normalize_heading(None), None);
    }

    #[test]
    fn timestamp_within_skew_tolerance_accepted() {
        let now = Utc::now();
        let ts = (now + Duration::minutes(4)).to_rfc3339();
        assert!(parse_timestamp_batch(&ts, now).is_ok());
    }

    #[test]
    fn timestamp_beyond_skew_tolerance_rejected() {
        let now = Utc::now();
        let ts = (now + Duration::minutes(10)).to_rfc3339();
        assert!(parse_timestamp_batch(&ts, now).is_err());
    }

    #[test]
    fn streaming_path_substitutes_now_for_unparseable() {
        let now = Utc::now();
        let result = parse_timestamp_streaming("not-a-timestamp", now).unwrap();
        assert_eq!(result, now);
    }

    #[test]
    fn batch_path_never_substitutes_now() {
        let now = Utc::now();
        assert!(parse_timestamp_batch("not-a-timestamp", now).is_err());
    }

    #[test]
    fn flag_risk_tiers() {
        assert_eq!(flag_risk_for(Some("PA")), FlagRisk::HighRisk);
        assert_eq!(flag_risk_for(Some("LR")), FlagRisk::MediumRisk);
        assert_eq!(flag_risk_for(Some("US")), FlagRisk::LowRisk);
        assert_eq!(flag_risk_for(None), FlagRisk::Unknown);
    }
}
