//! Sanctions/watchlist downloader contracts, per §4.1/§6.
//!
//! Each source (OFAC SDN, OpenSanctions, FleetLeaks, GUR) is fetched over
//! HTTP, validated against its expected shape, and written atomically (via a
//! temp file + rename) so a crash mid-download never leaves a partial file
//! where a consumer expects a complete one. ETag/Last-Modified are recorded
//! so a scheduled refresh can send a conditional GET.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{RadianceError, Result};

/// The four watchlist sources named in §6, each with its own shape and
/// validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchlistSource {
    OfacSdn,
    OpenSanctions,
    FleetLeaks,
    Gur,
}

impl WatchlistSource {
    pub fn file_name(&self) -> &'static str {
        match self {
            WatchlistSource::OfacSdn => "ofac_sdn.csv",
            WatchlistSource::OpenSanctions => "opensanctions.json",
            WatchlistSource::FleetLeaks => "fleetleaks.json",
            WatchlistSource::Gur => "gur.csv",
        }
    }
}

/// Cache metadata persisted alongside each downloaded file so a future
/// refresh can send `If-None-Match` / `If-Modified-Since`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetched_at_utc: String,
    pub row_count: usize,
}

/// Result of one source's refresh attempt.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub source: WatchlistSource,
    pub path: PathBuf,
    pub metadata: DownloadMetadata,
    pub not_modified: bool,
}

/// Downloads `url` into `dest_dir/<source.file_name()>`, validates the body
/// against the source's expected shape, and swaps it into place atomically.
/// Honors a prior ETag/Last-Modified via `prior` to short-circuit on 304.
#[instrument(skip(client, prior), fields(source = ?source))]
pub async fn refresh_watchlist(
    client: &Client,
    source: WatchlistSource,
    url: &str,
    dest_dir: &Path,
    prior: Option<&DownloadMetadata>,
    now_iso: &str,
) -> Result<RefreshOutcome> {
    let mut request = client.get(url);
    if let Some(p) = prior {
        if let Some(etag) = &p.etag {
            request = request.header("If-None-Match", etag.clone());
        }
        if let Some(lm) = &p.last_modified {
            request = request.header("If-Modified-Since", lm.clone());
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| RadianceError::TransientNetwork(e.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        info!(%url, "watchlist source unchanged");
        return Ok(RefreshOutcome {
            source,
            path: dest_dir.join(source.file_name()),
            metadata: prior.cloned().unwrap_or_default(),
            not_modified: true,
        });
    }

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS || response.status().is_server_error() {
        return Err(RadianceError::TransientNetwork(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    if !response.status().is_success() {
        return Err(RadianceError::Other(anyhow::anyhow!(
            "{url} returned non-retryable status {}",
            response.status()
        )));
    }

    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let last_modified = response
        .headers()
        .get("last-modified")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = response
        .text()
        .await
        .map_err(|e| RadianceError::TransientNetwork(e.to_string()))?;

    let row_count = validate_source_shape(source, &body)?;

    let dest_path = dest_dir.join(source.file_name());
    write_atomically(&dest_path, &body)?;

    Ok(RefreshOutcome {
        source,
        path: dest_path,
        metadata: DownloadMetadata {
            etag,
            last_modified,
            fetched_at_utc: now_iso.to_string(),
            row_count,
        },
        not_modified: false,
    })
}

/// Writes `body` to `path` via a sibling temp file + rename, so a reader
/// never observes a half-written file.
fn write_atomically(path: &Path, body: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| RadianceError::Other(anyhow::anyhow!(e)))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RadianceError::Other(anyhow::anyhow!(e)))?;
    tmp.write_all(body.as_bytes())
        .map_err(|e| RadianceError::Other(anyhow::anyhow!(e)))?;
    tmp.persist(path).map_err(|e| RadianceError::Other(anyhow::anyhow!(e.error)))?;
    Ok(())
}

/// Minimal structural validation per source, so a malformed or truncated
/// download is caught before it reaches the watchlist-matching detectors
/// rather than silently matching zero rows forever.
fn validate_source_shape(source: WatchlistSource, body: &str) -> Result<usize> {
    match source {
        WatchlistSource::OfacSdn | WatchlistSource::Gur => {
            let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());
            let headers = reader
                .headers()
                .map_err(|e| RadianceError::Validation {
                    field: "watchlist_csv".into(),
                    reason: format!("unreadable CSV header: {e}"),
                })?
                .clone();
            if headers.is_empty() {
                return Err(RadianceError::Validation {
                    field: "watchlist_csv".into(),
                    reason: "empty CSV header row".into(),
                });
            }
            let mut count = 0usize;
            for record in reader.records() {
                record.map_err(|e| RadianceError::Validation {
                    field: "watchlist_csv".into(),
                    reason: format!("malformed row: {e}"),
                })?;
                count += 1;
            }
            if count == 0 {
                warn!(?source, "watchlist CSV parsed but contained zero data rows");
            }
            Ok(count)
        }
        WatchlistSource::OpenSanctions | WatchlistSource::FleetLeaks => {
            let value: serde_json::Value = serde_json::from_str(body).map_err(|e| RadianceError::Validation {
                field: "watchlist_json".into(),
                reason: format!("malformed JSON: {e}"),
            })?;
            let count = match &value {
                serde_json::Value::Array(items) => items.len(),
                serde_json::Value::Object(map) => map
                    .get("results")
                    .or_else(|| map.get("entities"))
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .ok_or_else(|| RadianceError::Validation {
                        field: "watchlist_json".into(),
                        reason: "expected top-level array or object with a `results`/`entities` array".into(),
                    })?,
                _ => {
                    return Err(RadianceError::Validation {
                        field: "watchlist_json".into(),
                        reason: "expected a JSON array or object".into(),
                    })
                }
            };
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_csv_with_header_and_rows() {
        let body = "mmsi,name,program\n209010000,TESTSHIP,SDN\n";
        let count = validate_source_shape(WatchlistSource::OfacSdn, body).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_empty_csv_header() {
        let body = "";
        assert!(validate_source_shape(WatchlistSource::Gur, body).is_err());
    }

    #[test]
    fn validates_json_array_shape() {
        let body = r#"[{"mmsi": "209010000"}]"#;
        let count = validate_source_shape(WatchlistSource::FleetLeaks, body).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn validates_json_wrapped_results_shape() {
        let body = r#"{"results": [{"mmsi": "209010000"}, {"mmsi": "111111111"}]}"#;
        let count = validate_source_shape(WatchlistSource::OpenSanctions, body).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn rejects_json_without_recognizable_shape() {
        let body = r#"{"unexpected": "shape"}"#;
        assert!(validate_source_shape(WatchlistSource::OpenSanctions, body).is_err());
    }

    #[test]
    fn write_atomically_produces_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_atomically(&path, "a,b\n1,2\n").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,b\n1,2\n");
    }
}
