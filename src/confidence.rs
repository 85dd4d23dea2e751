//! Confidence band classifier: maps a gap's final risk score and the
//! diversity of corroborating signal categories onto one of five ordered
//! bands, per §4.4. Rules are evaluated top to bottom; the first one that
//! matches wins — there is no weighting or averaging across rules.

use std::collections::HashMap;

use crate::models::{AnalystStatus, ConfidenceBand};

/// The signal-category a scoring breakdown key belongs to, for diversity
/// counting. Unrecognized keys fall into `Other` rather than being dropped,
/// so a future scoring key still counts toward diversity without a second
/// edit here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalCategory {
    AisGap,
    Spoofing,
    StsTransfer,
    IdentityChange,
    Watchlist,
    Other,
}

/// Classifies a breakdown key into its signal category. Matched by prefix
/// since scoring keys are stable string literals defined in `scoring::`.
pub fn classify_key(key: &str) -> SignalCategory {
    if key.starts_with("over_24h")
        || key.starts_with("12h_24h")
        || key.starts_with("4h_12h")
        || key.starts_with("2h_4h")
        || matches!(key, "rare" | "occasional" | "frequent" | "chronic")
        || key.starts_with("dark_zone")
        || key.starts_with("selective_dark_zone")
        || key.starts_with("gap_reactivation")
    {
        SignalCategory::AisGap
    } else if key.starts_with("speed_")
        || key.contains("spoof")
        || key.contains("mmsi_reuse")
        || key.contains("nav_status")
        || key.contains("circle")
        || key.contains("anchor_spoof")
        || key.contains("erratic")
        || key.contains("cross_receiver")
        || key.contains("fake_port_call")
        || key.contains("stale_ais")
        || key.contains("synthetic_track")
        || key.contains("scrapped_imo")
        || key.contains("track_replay")
        || key.contains("destination_deviation")
    {
        SignalCategory::Spoofing
    } else if key.contains("sts_event") || key.contains("convoy") || key.contains("floating_storage") {
        SignalCategory::StsTransfer
    } else if key.contains("identity_swap") || key.contains("flag_changes") || key.contains("flag_hopping") {
        SignalCategory::IdentityChange
    } else if key.contains("fraudulent_registry") || key.contains("sanctioned") {
        SignalCategory::Watchlist
    } else {
        SignalCategory::Other
    }
}

/// Sums positive-valued breakdown points per signal category. Negative
/// (legitimacy-deduction) entries never contribute to a category's total —
/// only corroborating evidence counts toward diversity or per-category
/// strength.
fn category_positive_sums(breakdown: &HashMap<String, i32>) -> HashMap<SignalCategory, i32> {
    let mut sums: HashMap<SignalCategory, i32> = HashMap::new();
    for (key, value) in breakdown {
        if *value > 0 {
            *sums.entry(classify_key(key)).or_insert(0) += value;
        }
    }
    sums
}

/// Classifies a scored gap's final confidence band per §4.4. `score` is the
/// clamped `[0, 200]` value `scoring::score_all` persisted; `breakdown` is
/// the same signed point map; `status` is the gap's current analyst review
/// status. Rules are evaluated in order and the first match wins:
///
/// 1. A Watchlist-category signal contributed, or the gap is already
///    analyst-confirmed → Confirmed.
/// 2. Score ≥ 76 and either ≥ 2 categories contributed or a single category
///    reached ≥ 80 points → High.
/// 3. Score ≥ 51 and a single category reached ≥ 30 points → Medium.
/// 4. Score in `[21, 50]` → Low.
/// 5. Otherwise → None.
pub fn classify(score: i32, breakdown: &HashMap<String, i32>, status: AnalystStatus) -> ConfidenceBand {
    let sums = category_positive_sums(breakdown);
    let watchlist_match = sums.get(&SignalCategory::Watchlist).copied().unwrap_or(0) > 0;
    let categories = sums.len();
    let max_category_points = sums.values().copied().max().unwrap_or(0);

    if watchlist_match || status == AnalystStatus::Confirmed {
        ConfidenceBand::Confirmed
    } else if score >= 76 && (categories >= 2 || max_category_points >= 80) {
        ConfidenceBand::High
    } else if score >= 51 && max_category_points >= 30 {
        ConfidenceBand::Medium
    } else if (21..=50).contains(&score) {
        ConfidenceBand::Low
    } else {
        ConfidenceBand::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchlist_signal_forces_confirmed_regardless_of_score() {
        let mut b = HashMap::new();
        b.insert("sanctioned_owner".to_string(), 10);
        assert_eq!(classify(30, &b, AnalystStatus::New), ConfidenceBand::Confirmed);
    }

    #[test]
    fn analyst_confirmed_status_forces_confirmed_regardless_of_score() {
        let b = HashMap::new();
        assert_eq!(classify(5, &b, AnalystStatus::Confirmed), ConfidenceBand::Confirmed);
    }

    #[test]
    fn high_needs_two_categories_or_one_strong_category() {
        let mut diverse = HashMap::new();
        diverse.insert("over_24h".to_string(), 40);
        diverse.insert("mmsi_reuse".to_string(), 40);
        assert_eq!(classify(80, &diverse, AnalystStatus::New), ConfidenceBand::High);

        let mut single_strong = HashMap::new();
        single_strong.insert("over_24h".to_string(), 85);
        assert_eq!(classify(80, &single_strong, AnalystStatus::New), ConfidenceBand::High);
    }

    #[test]
    fn high_score_single_weak_category_is_not_high() {
        // one category, below the 80-pt single-category floor, so rule 2
        // falls through to the medium check instead.
        let mut b = HashMap::new();
        b.insert("over_24h".to_string(), 40);
        b.insert("rare".to_string(), 10);
        assert_eq!(classify(80, &b, AnalystStatus::New), ConfidenceBand::Medium);
    }

    #[test]
    fn medium_requires_a_category_reaching_30_points() {
        let mut strong_enough = HashMap::new();
        strong_enough.insert("over_24h".to_string(), 35);
        assert_eq!(classify(55, &strong_enough, AnalystStatus::New), ConfidenceBand::Medium);

        let mut too_weak = HashMap::new();
        too_weak.insert("over_24h".to_string(), 20);
        assert_eq!(classify(55, &too_weak, AnalystStatus::New), ConfidenceBand::Low);
    }

    #[test]
    fn low_score_falls_to_none() {
        let b = HashMap::new();
        assert_eq!(classify(10, &b, AnalystStatus::New), ConfidenceBand::None);
    }

    #[test]
    fn score_in_low_band_range_is_low() {
        let b = HashMap::new();
        assert_eq!(classify(21, &b, AnalystStatus::New), ConfidenceBand::Low);
        assert_eq!(classify(50, &b, AnalystStatus::New), ConfidenceBand::Low);
    }

    #[test]
    fn classify_key_buckets_known_prefixes() {
        assert_eq!(classify_key("speed_impossible"), SignalCategory::Spoofing);
        assert_eq!(classify_key("over_24h"), SignalCategory::AisGap);
        assert_eq!(classify_key("sts_event_near_gap"), SignalCategory::StsTransfer);
        assert_eq!(classify_key("identity_swap"), SignalCategory::IdentityChange);
        assert_eq!(classify_key("something_new"), SignalCategory::Other);
    }
}
