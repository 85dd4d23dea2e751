//! `StreamFeed` — the push-style streaming ingestion session from §4.1.
//!
//! A session is single-task: it owns a WebSocket connection, accumulates
//! position reports and static-data updates into two in-memory buffers, and
//! flushes each buffer into the database every `batch_interval` seconds or
//! at session end. Suspension happens at every network receive and at every
//! batch-flush point (§5).

use std::time::Duration as StdDuration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, instrument, warn};

use super::{batch, IngestStats, RawPositionRecord, RawStaticRecord};
use crate::db::Database;
use crate::error::{RadianceError, Result};

/// Stats returned at the end of a streaming session — §4.1's `SessionStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub messages_received: u64,
    pub batches_flushed: u64,
    pub ingest: IngestStats,
    pub disconnected: bool,
}

/// The subset of the subscribed AIS stream message shape (§6) this core
/// parses. `MessageType` discriminates `PositionReport` vs `ShipStaticData`.
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "MetaData")]
    meta: StreamMeta,
    #[serde(rename = "Message")]
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct StreamMeta {
    #[serde(rename = "MMSI")]
    mmsi: i64,
    #[serde(rename = "time_utc")]
    time_utc: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(rename = "PositionReport")]
    position_report: Option<PositionReportBody>,
    #[serde(rename = "ShipStaticData")]
    ship_static_data: Option<ShipStaticDataBody>,
}

#[derive(Debug, Deserialize)]
struct PositionReportBody {
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Sog")]
    sog: Option<f64>,
    #[serde(rename = "Cog")]
    cog: Option<f64>,
    #[serde(rename = "TrueHeading")]
    true_heading: Option<f64>,
    #[serde(rename = "NavigationalStatus")]
    navigational_status: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ShipStaticDataBody {
    #[serde(rename = "ImoNumber")]
    imo_number: Option<i64>,
    #[serde(rename = "Type")]
    vessel_type: Option<i32>,
    #[serde(rename = "CallSign")]
    call_sign: Option<String>,
    #[serde(rename = "Dimension")]
    dimension: Option<Dimension>,
}

#[derive(Debug, Deserialize)]
struct Dimension {
    #[serde(rename = "A")]
    a: Option<f64>,
    #[serde(rename = "B")]
    b: Option<f64>,
    #[serde(rename = "C")]
    c: Option<f64>,
    #[serde(rename = "D")]
    d: Option<f64>,
}

fn parse_stream_message(raw: &str, ship_name: Option<String>) -> Option<(Option<RawPositionRecord>, Option<RawStaticRecord>)> {
    let parsed: StreamMessage = serde_json::from_str(raw).ok()?;
    let mmsi = parsed.meta.mmsi.to_string();

    match parsed.message_type.as_str() {
        "PositionReport" => {
            let body = parsed.message.position_report?;
            Some((
                Some(RawPositionRecord {
                    mmsi,
                    time_utc: parsed.meta.time_utc,
                    lat: body.latitude,
                    lon: body.longitude,
                    sog_kn: body.sog,
                    cog_deg: body.cog,
                    heading_deg: body.true_heading,
                    nav_status: body.navigational_status,
                    draught_m: None,
                    destination: None,
                    source: "aisstream".into(),
                }),
                None,
            ))
        }
        "ShipStaticData" => {
            let body = parsed.message.ship_static_data?;
            let (length_m, width_m) = body
                .dimension
                .as_ref()
                .and_then(|d| match (d.a, d.b, d.c, d.d) {
                    (Some(a), Some(b), Some(c), Some(d)) if a > 0.0 && c > 0.0 => {
                        Some((Some(a + b), Some(c + d)))
                    }
                    _ => None,
                })
                .unwrap_or((None, None));
            let _ = (length_m, width_m); // dimensions recorded on Vessel via the fingerprint pipeline, not here
            Some((
                None,
                Some(RawStaticRecord {
                    mmsi,
                    imo: body.imo_number.map(|n| n.to_string()),
                    name: ship_name,
                    callsign: body.call_sign,
                    vessel_type: body.vessel_type.map(|t| t.to_string()),
                    length_m,
                    width_m,
                }),
            ))
        }
        _ => None,
    }
}

/// Drives one streaming session against a WebSocket URL (the production
/// default would be an AIS stream provider endpoint carrying `api_key` and
/// `bounding_boxes` in its subscription payload). Runs until `duration`
/// elapses (`None` = unlimited), flushing every `batch_interval`.
#[instrument(skip(db, url, api_key, bounding_boxes))]
pub async fn stream_feed(
    db: &Database,
    url: &str,
    api_key: &str,
    bounding_boxes: &[[[f64; 2]; 2]],
    duration: Option<StdDuration>,
    batch_interval: StdDuration,
) -> Result<SessionStats> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| RadianceError::TransientNetwork(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "APIKey": api_key,
        "BoundingBoxes": bounding_boxes,
    });
    use futures_util::SinkExt;
    write
        .send(WsMessage::Text(subscribe.to_string()))
        .await
        .map_err(|e| RadianceError::TransientNetwork(e.to_string()))?;

    let mut stats = SessionStats::default();
    let mut position_buf: Vec<RawPositionRecord> = Vec::new();
    let mut static_buf: Vec<RawStaticRecord> = Vec::new();

    let deadline = duration.map(|d| Instant::now() + d);
    let mut flush_at = Instant::now() + batch_interval;

    loop {
        let sleep_until = match deadline {
            Some(d) => d.min(flush_at),
            None => flush_at,
        };

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        stats.messages_received += 1;
                        if let Some((pos, st)) = parse_stream_message(&text, None) {
                            if let Some(p) = pos { position_buf.push(p); }
                            if let Some(s) = st { static_buf.push(s); }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("stream closed by peer");
                        stats.disconnected = true;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error, ending session gracefully");
                        stats.disconnected = true;
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(sleep_until) => {
                if Instant::now() >= flush_at {
                    let flushed = batch::ingest_batch(db, &position_buf, &static_buf)?;
                    stats.ingest.merge(&flushed);
                    stats.batches_flushed += 1;
                    position_buf.clear();
                    static_buf.clear();
                    flush_at = Instant::now() + batch_interval;
                }
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        break;
                    }
                }
            }
        }
    }

    // Final flush before returning, per §5's cancellation contract.
    let flushed = batch::ingest_batch(db, &position_buf, &static_buf)?;
    stats.ingest.merge(&flushed);
    if !position_buf.is_empty() || !static_buf.is_empty() {
        stats.batches_flushed += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_position_report_heading_and_mmsi() {
        let raw = serde_json::json!({
            "MessageType": "PositionReport",
            "MetaData": {"MMSI": 209010000_i64, "ShipName": "TESTSHIP", "time_utc": "2026-01-01T00:00:00Z"},
            "Message": {
                "PositionReport": {
                    "Latitude": 10.5,
                    "Longitude": 20.5,
                    "Sog": 12.0,
                    "Cog": 180.0,
                    "TrueHeading": 511.0,
                    "NavigationalStatus": 0
                }
            }
        })
        .to_string();
        let (pos, st) = parse_stream_message(&raw, None).unwrap();
        assert!(st.is_none());
        let pos = pos.unwrap();
        assert_eq!(pos.mmsi, "209010000");
        assert_eq!(pos.heading_deg, Some(511.0)); // normalization happens downstream in batch ingest
    }

    #[test]
    fn parses_ship_static_data_dimensions() {
        let raw = serde_json::json!({
            "MessageType": "ShipStaticData",
            "MetaData": {"MMSI": 209010000_i64, "time_utc": "2026-01-01T00:00:00Z"},
            "Message": {
                "ShipStaticData": {
                    "ImoNumber": 9000001_i64,
                    "Type": 70,
                    "CallSign": "ABC123",
                    "Dimension": {"A": 100.0, "B": 20.0, "C": 10.0, "D": 10.0}
                }
            }
        })
        .to_string();
        let (pos, st) = parse_stream_message(&raw, Some("TESTSHIP".into())).unwrap();
        assert!(pos.is_none());
        let st = st.unwrap();
        assert_eq!(st.length_m, Some(120.0));
        assert_eq!(st.width_m, Some(20.0));
    }
}
