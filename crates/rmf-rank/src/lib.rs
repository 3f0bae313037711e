//! Reverence scoring and the filter/sort pipeline over parish records.

pub mod browse;
pub mod notes;

use std::cmp::Reverse;

use rmf_core::{CommunityNote, ParishRecord, Source, WeightConfig};

pub const CRATE_NAME: &str = "rmf-rank";

pub const CONFESSION_CEILING: f64 = 10.0;
pub const ADORATION_CEILING: f64 = 40.0;
pub const REVIEW_CEILING: f64 = 5.0;
pub const IMAGE_SIGNAL_CEILING: f64 = 5.0;
pub const CROWD_WEIGHT: f64 = 2.0;

/// Scale `value` into [0, 1] against a domain ceiling.
pub fn normalize(value: f64, ceiling: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value / ceiling).min(1.0)
}

pub fn crowd_average(notes: &[CommunityNote]) -> f64 {
    if notes.is_empty() {
        return 0.0;
    }
    let total: f64 = notes.iter().map(|n| f64::from(n.rating)).sum();
    total / notes.len() as f64
}

/// Weighted 0..=100 reverence score. Image signals share the review weight.
pub fn score(parish: &ParishRecord, weights: &WeightConfig) -> u8 {
    let confession = normalize(parish.confession_hours_per_week, CONFESSION_CEILING) * weights.confession;
    let adoration = normalize(parish.adoration_hours_per_week, ADORATION_CEILING) * weights.adoration;
    let review = normalize(parish.online_review_score, REVIEW_CEILING) * weights.review;
    let image = normalize(f64::from(parish.reverent_image_signals), IMAGE_SIGNAL_CEILING) * weights.review;
    let crowd = normalize(crowd_average(&parish.community_notes), REVIEW_CEILING) * CROWD_WEIGHT;

    let weighted_total = confession + adoration + review + image + crowd;
    let max_possible = weights.confession + weights.adoration + 2.0 * weights.review + CROWD_WEIGHT;
    if !(max_possible.is_finite() && max_possible > 0.0) {
        return 0;
    }

    let pct = (weighted_total / max_possible * 100.0).round();
    if pct.is_nan() {
        0
    } else {
        pct.clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedParish {
    pub parish: ParishRecord,
    pub score: u8,
}

/// Keep parishes whose location or zip contains `query` (trimmed,
/// lowercased) and that carry every tag in `required_details`. Input order is
/// preserved.
pub fn apply_search(parishes: &[ParishRecord], query: &str, required_details: &[String]) -> Vec<ParishRecord> {
    let query = query.trim().to_lowercase();
    parishes
        .iter()
        .filter(|parish| {
            let location_match = query.is_empty()
                || parish.location.to_lowercase().contains(&query)
                || parish.zip.contains(&query);
            let detail_match = required_details.iter().all(|tag| parish.has_detail(tag));
            location_match && detail_match
        })
        .cloned()
        .collect()
}

/// Score and order parishes, highest first. Ties keep input order.
pub fn rank(parishes: Vec<ParishRecord>, weights: &WeightConfig) -> Vec<RankedParish> {
    let mut ranked: Vec<RankedParish> = parishes
        .into_iter()
        .map(|parish| RankedParish {
            score: score(&parish, weights),
            parish,
        })
        .collect();
    ranked.sort_by_key(|r| Reverse(r.score));
    ranked
}

pub fn filter_and_rank(
    parishes: &[ParishRecord],
    query: &str,
    required_details: &[String],
    weights: &WeightConfig,
) -> Vec<RankedParish> {
    rank(apply_search(parishes, query, required_details), weights)
}

/// Status line for a result set. `active_query` selects the empty-state
/// wording.
pub fn results_summary(ranked: &[RankedParish], active_query: &str) -> String {
    let active_query = active_query.trim();
    match ranked.first() {
        None if !active_query.is_empty() => format!(
            "No sanctuaries matched \"{active_query}\" yet. Try a nearby city, ZIP, or fewer detail filters."
        ),
        None => "No sanctuaries available yet.".to_string(),
        Some(top) => format!(
            "Showing {} sanctuaries. Current top match: {} ({}/100).",
            ranked.len(),
            top.parish.name,
            top.score
        ),
    }
}

/// "ad-orientem" -> "Ad Orientem".
pub fn format_detail_label(detail: &str) -> String {
    detail
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[allow(clippy::too_many_arguments)]
fn seed(
    id: &str,
    name: &str,
    location: &str,
    zip: &str,
    details: &[&str],
    hours: (f64, f64),
    reverent_image_signals: u32,
    online_review_score: f64,
    liturgy_notes: &[&str],
    web_signals: &[&str],
    community_notes: &[(u8, &str)],
) -> ParishRecord {
    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }
    ParishRecord {
        id: id.to_string(),
        name: name.to_string(),
        location: location.to_string(),
        zip: zip.to_string(),
        details: strings(details),
        confession_hours_per_week: hours.0,
        adoration_hours_per_week: hours.1,
        reverent_image_signals,
        online_review_score,
        liturgy_notes: strings(liturgy_notes),
        web_signals: strings(web_signals),
        community_notes: community_notes
            .iter()
            .map(|(rating, comment)| CommunityNote {
                rating: *rating,
                comment: comment.to_string(),
            })
            .collect(),
        source: Source::Diocese,
        external: None,
    }
}

/// Built-in parishes shown when no synced dataset is available.
pub fn seed_parishes() -> Vec<ParishRecord> {
    vec![
        seed(
            "st-john-vianney",
            "St. John Vianney Parish",
            "Dallas, TX",
            "75230",
            &["latin", "ad-orientem", "tongue", "altar-rail"],
            (8.0, 30.0),
            4,
            4.6,
            &[
                "Kneelers well maintained and broadly used",
                "Regular use of incense and chant",
                "Homilies frequently reference Church teaching",
            ],
            &[
                "Google reviews mention reverence 26 times",
                "Parish Instagram shows ad orientem liturgies",
                "Website posts weekly confession schedule updates",
            ],
            &[
                (5, "Very prayerful atmosphere before and after Mass."),
                (4, "Music supports worship instead of performance."),
            ],
        ),
        seed(
            "holy-trinity",
            "Holy Trinity Catholic Church",
            "Irving, TX",
            "75039",
            &["tongue"],
            (4.0, 12.0),
            3,
            4.2,
            &[
                "Frequent confessions before weekend Masses",
                "Communion paten used during major feasts",
            ],
            &[
                "Parish bulletin includes confession reminders",
                "Public photos show modest sanctuary decor",
                "Recent reviews praise respectful liturgical tone",
            ],
            &[(4, "Confession lines are steady and priests are available.")],
        ),
        seed(
            "our-lady-angel",
            "Our Lady of the Angels",
            "Plano, TX",
            "75074",
            &["latin"],
            (2.0, 6.0),
            2,
            3.8,
            &[
                "Quiet adoration chapel open most weekdays",
                "Growing young family attendance",
            ],
            &[
                "Mixed review sentiment around music choices",
                "Photos show occasional incense use",
                "Website lists monthly adoration nights",
            ],
            &[(3, "Good parish, but reverence can vary by Mass time.")],
        ),
    ]
}
