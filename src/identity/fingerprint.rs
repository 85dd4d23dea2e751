//! Behavioral fingerprints: a 10-feature mean/covariance summary of a
//! vessel's track, used as the Mahalanobis-distance bonus signal in merge
//! candidate scoring. Grounded in the same idea as AIS-class/flag static
//! matching but over continuous movement statistics instead of categorical
//! fields, since a cloned identity usually cannot fully imitate another
//! hull's handling characteristics.

use nalgebra::{DMatrix, DVector};

use crate::models::{AisPosition, VesselFingerprint};

const FEATURE_COUNT: usize = 10;

/// Fixed chi-squared quantiles at 10 degrees of freedom, used to translate a
/// raw Mahalanobis distance into a bounded similarity bonus without needing
/// `statrs`'s full distribution machinery at call time.
const CHI2_10_Q1: f64 = 2.60;
const CHI2_10_MEDIAN: f64 = 3.06;
const CHI2_10_Q3: f64 = 3.54;

/// Builds a fingerprint from a vessel's positions in the training window.
/// Returns `None` when there are too few samples for a stable covariance
/// estimate (fewer than `FEATURE_COUNT + 1` positions).
pub fn compute_fingerprint(vessel_id: i64, positions: &[AisPosition], computed_at: chrono::DateTime<chrono::Utc>) -> Option<VesselFingerprint> {
    if positions.len() < FEATURE_COUNT + 1 {
        return None;
    }

    let samples: Vec<[f64; FEATURE_COUNT]> = positions.windows(2).map(|pair| extract_features(&pair[0], &pair[1])).collect();
    if samples.len() < FEATURE_COUNT + 1 {
        return None;
    }

    let n = samples.len();
    let mut mean = [0.0f64; FEATURE_COUNT];
    for s in &samples {
        for i in 0..FEATURE_COUNT {
            mean[i] += s[i];
        }
    }
    for m in mean.iter_mut() {
        *m /= n as f64;
    }

    let mut covariance = vec![vec![0.0f64; FEATURE_COUNT]; FEATURE_COUNT];
    for s in &samples {
        for i in 0..FEATURE_COUNT {
            for j in 0..FEATURE_COUNT {
                covariance[i][j] += (s[i] - mean[i]) * (s[j] - mean[j]);
            }
        }
    }
    let denom = (n - 1).max(1) as f64;
    for row in covariance.iter_mut() {
        for v in row.iter_mut() {
            *v /= denom;
        }
    }
    // ridge regularization so the matrix stays invertible with small samples
    for i in 0..FEATURE_COUNT {
        covariance[i][i] += 1e-6;
    }

    Some(VesselFingerprint {
        vessel_id,
        computed_at_utc: computed_at,
        mean: mean.to_vec(),
        covariance,
        sample_count: n,
    })
}

fn extract_features(a: &AisPosition, b: &AisPosition) -> [f64; FEATURE_COUNT] {
    let hours = ((b.timestamp_utc - a.timestamp_utc).num_seconds() as f64 / 3600.0).max(1e-6);
    let distance_nm = crate::geo::haversine_nm(a.lat, a.lon, b.lat, b.lon);
    let speed = distance_nm / hours;
    let bearing = crate::geo::bearing_deg(a.lat, a.lon, b.lat, b.lon);
    let heading_delta = match (a.heading_deg, b.heading_deg) {
        (Some(h0), Some(h1)) => crate::geo::heading_delta_deg(h0, h1),
        _ => 0.0,
    };
    let sog_delta = match (a.sog_kn, b.sog_kn) {
        (Some(s0), Some(s1)) => (s1 - s0).abs(),
        _ => 0.0,
    };
    [
        speed,
        a.sog_kn.unwrap_or(0.0),
        b.sog_kn.unwrap_or(0.0),
        sog_delta,
        bearing,
        heading_delta,
        a.cog_deg.unwrap_or(0.0),
        b.cog_deg.unwrap_or(0.0),
        a.draught_m.unwrap_or(0.0),
        hours.min(24.0),
    ]
}

/// Squared Mahalanobis distance between two fingerprints' means, using the
/// average of their covariance matrices (pooled estimate) as the metric.
/// Returns `None` if the pooled matrix is singular even after ridging.
pub fn mahalanobis_distance(a: &VesselFingerprint, b: &VesselFingerprint) -> Option<f64> {
    if a.mean.len() != FEATURE_COUNT || b.mean.len() != FEATURE_COUNT {
        return None;
    }
    let diff = DVector::from_iterator(FEATURE_COUNT, a.mean.iter().zip(&b.mean).map(|(x, y)| x - y));

    let mut pooled = DMatrix::<f64>::zeros(FEATURE_COUNT, FEATURE_COUNT);
    for i in 0..FEATURE_COUNT {
        for j in 0..FEATURE_COUNT {
            let av = a.covariance.get(i).and_then(|r| r.get(j)).copied().unwrap_or(0.0);
            let bv = b.covariance.get(i).and_then(|r| r.get(j)).copied().unwrap_or(0.0);
            pooled[(i, j)] = (av + bv) / 2.0;
        }
    }

    let inv = pooled.try_inverse()?;
    let d2 = (diff.transpose() * inv * diff)[(0, 0)];
    Some(d2.max(0.0))
}

/// Converts a squared Mahalanobis distance into a `[0, 1]` similarity bonus
/// using the fixed 10-DoF chi-squared quantiles: distances below the
/// quantile-1 threshold are treated as maximally similar, distances above
/// the quantile-3 threshold as unrelated, with a linear ramp in between.
pub fn similarity_bonus(distance_sq: f64) -> f64 {
    if distance_sq <= CHI2_10_Q1 {
        1.0
    } else if distance_sq >= CHI2_10_Q3 {
        0.0
    } else if distance_sq <= CHI2_10_MEDIAN {
        1.0 - 0.5 * (distance_sq - CHI2_10_Q1) / (CHI2_10_MEDIAN - CHI2_10_Q1)
    } else {
        0.5 * (1.0 - (distance_sq - CHI2_10_MEDIAN) / (CHI2_10_Q3 - CHI2_10_MEDIAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AisClass;
    use chrono::{Duration, TimeZone, Utc};

    fn pos(vessel_id: i64, id: i64, hour: i64, lat: f64, lon: f64, sog: f64) -> AisPosition {
        AisPosition {
            position_id: id,
            vessel_id,
            timestamp_utc: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            lat,
            lon,
            sog_kn: Some(sog),
            cog_deg: Some(90.0),
            heading_deg: Some(90.0),
            nav_status: Some(0),
            draught_m: Some(10.0),
            destination: None,
            ais_class: AisClass::A,
            source: "t".into(),
        }
    }

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn identical_tracks_produce_zero_distance() {
        let positions: Vec<AisPosition> = (0..14).map(|i| pos(1, i, i, i as f64 * 0.1, 0.0, 12.0)).collect();
        let t = fixed_now();
        let fp_a = compute_fingerprint(1, &positions, t).unwrap();
        let fp_b = compute_fingerprint(2, &positions, t).unwrap();
        let d2 = mahalanobis_distance(&fp_a, &fp_b).unwrap();
        assert!(d2 < 1e-6);
        assert_eq!(similarity_bonus(d2), 1.0);
    }

    #[test]
    fn too_few_samples_returns_none() {
        let positions: Vec<AisPosition> = (0..3).map(|i| pos(1, i, i, 0.0, 0.0, 10.0)).collect();
        assert!(compute_fingerprint(1, &positions, fixed_now()).is_none());
    }

    #[test]
    fn similarity_bonus_ramps_down_with_distance() {
        assert_eq!(similarity_bonus(0.0), 1.0);
        assert_eq!(similarity_bonus(10.0), 0.0);
        assert!(similarity_bonus(CHI2_10_MEDIAN) > 0.0 && similarity_bonus(CHI2_10_MEDIAN) < 1.0);
    }
}
