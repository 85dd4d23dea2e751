//! Geo & time primitives: haversine distance, bearings, WKT parsing, time
//! buckets, and the spatial grid shared by the STS and convoy detectors.

use chrono::{DateTime, Timelike, Utc};

pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance between two lat/lon points, in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

/// Initial great-circle bearing from point 1 to point 2, in degrees [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * lat2_r.cos();
    let x = lat1_r.cos() * lat2_r.sin() - lat1_r.sin() * lat2_r.cos() * dlon.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Smallest absolute angular delta between two headings/courses, in [0, 180].
pub fn heading_delta_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// A rectangular bounding box in WGS-84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Contains with a tolerance in degrees applied to every edge, used by
    /// the gap detector's corridor/dark-zone intersection check.
    pub fn contains_with_tolerance(&self, lat: f64, lon: f64, tolerance_deg: f64) -> bool {
        lat >= self.min_lat - tolerance_deg
            && lat <= self.max_lat + tolerance_deg
            && lon >= self.min_lon - tolerance_deg
            && lon <= self.max_lon + tolerance_deg
    }
}

/// A single lon/lat pair parsed out of WKT.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WktPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Parses `POINT(x y)` WKT. Per DESIGN.md's resolution of the spec's open
/// question on coordinate order: the corpus this was distilled from
/// consistently assumes `POINT(lon lat)`. If the first coordinate is out of
/// longitude range but valid as a latitude, this falls back to
/// `POINT(lat lon)` and the caller should log a warning — it never silently
/// drops the row.
pub fn parse_wkt_point(wkt: &str) -> Option<WktPoint> {
    let inner = wkt.trim().strip_prefix("POINT(")?.strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let x: f64 = parts.next()?.parse().ok()?;
    let y: f64 = parts.next()?.parse().ok()?;

    if x.abs() <= 180.0 && y.abs() <= 90.0 {
        Some(WktPoint { lon: x, lat: y })
    } else if x.abs() <= 90.0 && y.abs() <= 180.0 {
        // first coordinate out of longitude range; assume POINT(lat lon)
        Some(WktPoint { lat: x, lon: y })
    } else {
        None
    }
}

/// Parses a `BBOX(minlon minlat maxlon maxlat)`-style polygon envelope string
/// used by corridor/port definitions, under the same lon/lat-first
/// convention as `parse_wkt_point`.
pub fn parse_bbox(s: &str) -> Option<BoundingBox> {
    let nums: Vec<f64> = s
        .trim()
        .trim_start_matches("BBOX(")
        .trim_end_matches(')')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse::<f64>().ok())
        .collect();
    if nums.len() != 4 {
        return None;
    }
    let (min_lon, min_lat, max_lon, max_lat) = (nums[0], nums[1], nums[2], nums[3]);
    Some(BoundingBox {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
    })
}

/// A 15-minute time bucket index, shared by the STS and convoy detectors.
pub fn time_bucket_15m(ts: DateTime<Utc>) -> i64 {
    let epoch_minutes = ts.timestamp() / 60;
    epoch_minutes / 15
}

/// A 1-hour time bucket index, used by the loitering detector.
pub fn time_bucket_1h(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() / 3600
}

/// Day index (days since epoch, UTC), used by the laid-up detector.
pub fn day_index(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() / 86_400
}

/// 1-degree grid cell key for a position, shared by the STS and convoy
/// detectors' spatial index.
pub fn grid_cell(lat: f64, lon: f64) -> (i32, i32) {
    (lat.floor() as i32, lon.floor() as i32)
}

#[allow(dead_code)]
fn hour_of_day(ts: DateTime<Utc>) -> u32 {
    ts.hour()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Roughly 1 degree of latitude ~= 60 nm.
        let d = haversine_nm(0.0, 0.0, 1.0, 0.0);
        assert!((d - 60.04).abs() < 0.5);
    }

    #[test]
    fn heading_delta_wraps() {
        assert!((heading_delta_deg(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((heading_delta_deg(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((heading_delta_deg(0.0, 180.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn wkt_point_lon_lat_order() {
        let p = parse_wkt_point("POINT(24.5 55.1)").unwrap();
        assert!((p.lon - 24.5).abs() < 1e-9);
        assert!((p.lat - 55.1).abs() < 1e-9);
    }

    #[test]
    fn wkt_point_falls_back_when_first_coord_out_of_lon_range() {
        // first number > 180 can't be a longitude; treat as POINT(lat lon)
        let p = parse_wkt_point("POINT(200.0 24.5)");
        assert!(p.is_none());
    }

    #[test]
    fn bbox_tolerance_extends_box() {
        let bb = BoundingBox {
            min_lat: 10.0,
            max_lat: 20.0,
            min_lon: 30.0,
            max_lon: 40.0,
        };
        assert!(!bb.contains(9.95, 35.0));
        assert!(bb.contains_with_tolerance(9.95, 35.0, 0.1));
    }

    #[test]
    fn time_bucket_groups_within_window() {
        use chrono::TimeZone;
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 1, 12, 10, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 1, 1, 12, 16, 0).unwrap();
        assert_eq!(time_bucket_15m(a), time_bucket_15m(b));
        assert_ne!(time_bucket_15m(a), time_bucket_15m(c));
    }
}
