//! Core domain model for the ReverentMass parish directory.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "rmf-core";

/// Sentinel used when no 5-digit zip could be recovered from an address.
pub const UNKNOWN_ZIP: &str = "00000";

/// Where a parish record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Diocese,
    Google,
    GoogleLive,
    Merged,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Diocese => "diocese",
            Source::Google => "google",
            Source::GoogleLive => "google-live",
            Source::Merged => "merged",
        }
    }
}

/// A user-submitted rating + comment. Ratings are 1..=5 once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityNote {
    pub rating: u8,
    pub comment: String,
}

/// Identifiers carried over from the places lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExternalRef {
    pub place_id: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

/// One directory entry. Serialized with the camelCase field names of the
/// dataset file; list and numeric fields tolerate being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParishRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "unknown_zip")]
    pub zip: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub confession_hours_per_week: f64,
    #[serde(default)]
    pub adoration_hours_per_week: f64,
    #[serde(default)]
    pub reverent_image_signals: u32,
    #[serde(default)]
    pub online_review_score: f64,
    #[serde(default)]
    pub liturgy_notes: Vec<String>,
    #[serde(default)]
    pub web_signals: Vec<String>,
    #[serde(default)]
    pub community_notes: Vec<CommunityNote>,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRef>,
}

fn unknown_zip() -> String {
    UNKNOWN_ZIP.to_string()
}

impl ParishRecord {
    pub fn has_detail(&self, tag: &str) -> bool {
        self.details.iter().any(|d| d == tag)
    }

    /// Lowercased `name|zip` key used to collapse duplicates across sources.
    pub fn merge_key(&self) -> String {
        format!("{}|{}", self.name, self.zip).to_lowercase()
    }
}

/// User-chosen weights for the reverence score. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub confession: f64,
    pub adoration: f64,
    pub review: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            confession: 3.0,
            adoration: 2.0,
            review: 2.0,
        }
    }
}
