//! Source adapters: diocesan directory seeds and the places lookup.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rmf_core::{ExternalRef, ParishRecord, Source, UNKNOWN_ZIP};
use rmf_storage::{FetchError, HttpFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "rmf-adapters";

pub const NEARBY_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
pub const TEXT_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
pub const DEFAULT_RADIUS_METERS: u32 = 20_000;

/// One row of the diocesan directory export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiocesanSeed {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub details: Vec<String>,
    pub confession_hours_per_week: Option<f64>,
    pub adoration_hours_per_week: Option<f64>,
    #[serde(default, rename = "source_url")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// A metro area to sweep with a nearby search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetroTarget {
    pub label: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: Option<u32>,
}

impl MetroTarget {
    pub fn radius(&self) -> u32 {
        self.radius_meters.unwrap_or(DEFAULT_RADIUS_METERS)
    }
}

/// Subset of a places API result that the directory uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaceResult {
    pub place_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub vicinity: Option<String>,
    pub formatted_address: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u64>,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlacesPayload {
    #[serde(default)]
    pub results: Vec<PlaceResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocation {
    pub location: String,
    pub zip: String,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Lowercase, collapse every run outside `[a-z0-9]` to `-`, trim dashes.
/// Falls back to `"parish"` so identifiers are never empty.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "parish".to_string()
    } else {
        out
    }
}

/// Byte range of the first run of five ASCII digits.
fn first_zip_run(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut run_start = 0;
    let mut run_len = 0;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == 5 {
                return Some((run_start, i + 1));
            }
        } else {
            run_len = 0;
        }
    }
    None
}

/// Split a free-text `street, city, STATE zip[, country]` address.
pub fn parse_location(address: &str) -> ParsedLocation {
    let parts: Vec<&str> = address.split(',').map(str::trim).collect();
    let city = if parts.len() > 1 { parts[1] } else { "Unknown" };
    let state_zip = if parts.len() > 2 { parts[2] } else { "" };

    let zip_span = first_zip_run(state_zip);
    let zip = zip_span
        .map(|(start, end)| state_zip[start..end].to_string())
        .unwrap_or_else(|| UNKNOWN_ZIP.to_string());

    let location = if !city.is_empty() && !state_zip.is_empty() {
        let state = match zip_span {
            Some((start, end)) => format!("{}{}", &state_zip[..start], &state_zip[end..]),
            None => state_zip.to_string(),
        };
        let joined = format!("{}, {}", city, state.trim());
        joined.trim_end().trim_end_matches(',').trim_end().to_string()
    } else {
        city.to_string()
    };

    ParsedLocation { location, zip }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

pub fn diocesan_parish(seed: &DiocesanSeed) -> ParishRecord {
    let parsed = parse_location(&seed.address);
    ParishRecord {
        id: slugify(&seed.name),
        name: seed.name.clone(),
        location: parsed.location,
        zip: parsed.zip,
        details: dedup_preserving_order(seed.details.clone()),
        confession_hours_per_week: seed.confession_hours_per_week.unwrap_or(1.0),
        adoration_hours_per_week: seed.adoration_hours_per_week.unwrap_or(1.0),
        reverent_image_signals: 2,
        online_review_score: 4.0,
        liturgy_notes: vec![
            format!(
                "Imported from diocesan directory: {}",
                seed.source_url.as_deref().unwrap_or("unknown")
            ),
            format!("Website: {}", seed.website.as_deref().unwrap_or("unknown")),
        ],
        web_signals: vec![
            "Data source: official diocesan directory".to_string(),
            "Google enrichment pending API key configuration".to_string(),
        ],
        community_notes: Vec::new(),
        source: Source::Diocese,
        external: None,
    }
}

/// Map a places result into a record. `fallback_location` is used when the
/// address yields no city (nearby search passes the metro label).
pub fn place_to_parish(place: &PlaceResult, fallback_location: &str, source: Source) -> ParishRecord {
    let address = place
        .formatted_address
        .as_deref()
        .or(place.vicinity.as_deref())
        .unwrap_or(fallback_location);
    let parsed = parse_location(address);
    let location = if parsed.location.is_empty() {
        fallback_location.to_string()
    } else {
        parsed.location
    };
    // Empty ids and zero ratings count as missing.
    let place_id = place.place_id.as_deref().filter(|id| !id.is_empty());
    let rating = place.rating.filter(|r| r.is_finite() && *r != 0.0);

    ParishRecord {
        id: slugify(place_id.unwrap_or(&place.name)),
        name: place.name.clone(),
        location,
        zip: parsed.zip,
        details: Vec::new(),
        confession_hours_per_week: 1.0,
        adoration_hours_per_week: 1.0,
        reverent_image_signals: 1,
        online_review_score: rating.unwrap_or(4.0),
        liturgy_notes: vec!["Imported from Google Places".to_string()],
        web_signals: vec![format!(
            "Google rating count: {}",
            place.user_ratings_total.unwrap_or(0)
        )],
        community_notes: Vec::new(),
        source,
        external: Some(ExternalRef {
            place_id: place_id.map(ToString::to_string),
            types: place.types.clone(),
        }),
    }
}

pub fn load_diocesan_seeds(path: impl AsRef<Path>) -> Result<Vec<DiocesanSeed>> {
    read_json_file(path)
}

pub fn load_metro_targets(path: impl AsRef<Path>) -> Result<Vec<MetroTarget>> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// External places lookup used by the merge tool (nearby sweeps) and the
/// live search endpoint (text search).
#[async_trait]
pub trait PlacesLookup: Send + Sync {
    async fn nearby(&self, metro: &MetroTarget) -> Result<Vec<PlaceResult>, AdapterError>;

    async fn text_search(&self, query: &str) -> Result<Vec<PlaceResult>, AdapterError>;
}

pub struct GooglePlacesClient {
    http: HttpFetcher,
    api_key: String,
}

impl GooglePlacesClient {
    pub fn new(http: HttpFetcher, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    pub fn nearby_url(&self, metro: &MetroTarget) -> Result<reqwest::Url, AdapterError> {
        reqwest::Url::parse_with_params(
            NEARBY_SEARCH_URL,
            &[
                ("location", format!("{},{}", metro.lat, metro.lng)),
                ("radius", metro.radius().to_string()),
                ("keyword", "Catholic parish".to_string()),
                ("key", self.api_key.clone()),
            ],
        )
        .map_err(|err| AdapterError::Message(format!("building nearby url: {err}")))
    }

    pub fn text_search_url(&self, query: &str) -> Result<reqwest::Url, AdapterError> {
        reqwest::Url::parse_with_params(
            TEXT_SEARCH_URL,
            &[
                ("query", format!("Catholic church {}", query.trim())),
                ("key", self.api_key.clone()),
            ],
        )
        .map_err(|err| AdapterError::Message(format!("building text search url: {err}")))
    }
}

#[async_trait]
impl PlacesLookup for GooglePlacesClient {
    async fn nearby(&self, metro: &MetroTarget) -> Result<Vec<PlaceResult>, AdapterError> {
        let url = self.nearby_url(metro)?;
        let payload: PlacesPayload = self.http.fetch_json(url.as_str()).await?;
        debug!(metro = %metro.label, results = payload.results.len(), "nearby search");
        Ok(payload.results)
    }

    async fn text_search(&self, query: &str) -> Result<Vec<PlaceResult>, AdapterError> {
        let url = self.text_search_url(query)?;
        let payload: PlacesPayload = self.http.fetch_json(url.as_str()).await?;
        debug!(results = payload.results.len(), "text search");
        Ok(payload.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmf_storage::HttpClientConfig;

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("St. John Vianney Parish"), "st-john-vianney-parish");
        assert_eq!(slugify("  --Our Lady of the Angels!! "), "our-lady-of-the-angels");
        assert_eq!(slugify("ChIJ_abc123"), "chij-abc123");
        assert_eq!(slugify("***"), "parish");
    }

    #[test]
    fn parse_location_handles_full_address() {
        let parsed = parse_location("1234 Main St, Dallas, TX 75230");
        assert_eq!(parsed.location, "Dallas, TX");
        assert_eq!(parsed.zip, "75230");
    }

    #[test]
    fn parse_location_keeps_city_without_state() {
        let parsed = parse_location("500 Oak Ave, Irving");
        assert_eq!(parsed.location, "Irving");
        assert_eq!(parsed.zip, UNKNOWN_ZIP);
    }

    #[test]
    fn parse_location_defaults_when_unparseable() {
        let parsed = parse_location("somewhere");
        assert_eq!(parsed.location, "Unknown");
        assert_eq!(parsed.zip, UNKNOWN_ZIP);
    }

    #[test]
    fn parse_location_drops_zip_only_state_segment() {
        let parsed = parse_location("1 Church Rd, Plano, 75074, USA");
        assert_eq!(parsed.location, "Plano");
        assert_eq!(parsed.zip, "75074");
    }

    #[test]
    fn parse_location_takes_first_five_digit_run() {
        let parsed = parse_location("1 Church Rd, Plano, TX 750741234");
        assert_eq!(parsed.zip, "75074");
        let parsed = parse_location("1 Church Rd, Plano, TX 7507");
        assert_eq!(parsed.zip, UNKNOWN_ZIP);
    }

    #[test]
    fn diocesan_seed_defaults_missing_hours() {
        let seed: DiocesanSeed = serde_json::from_str(
            r#"{
                "name": "Holy Trinity Catholic Church",
                "address": "3811 Oak Lawn Ave, Dallas, TX 75219",
                "details": ["tongue", "tongue", "latin"],
                "source_url": "https://www.cathdal.org/parishes",
                "website": "https://holytrinitydallas.org"
            }"#,
        )
        .unwrap();
        let parish = diocesan_parish(&seed);
        assert_eq!(parish.id, "holy-trinity-catholic-church");
        assert_eq!(parish.location, "Dallas, TX");
        assert_eq!(parish.zip, "75219");
        assert_eq!(parish.details, vec!["tongue", "latin"]);
        assert_eq!(parish.confession_hours_per_week, 1.0);
        assert_eq!(parish.adoration_hours_per_week, 1.0);
        assert_eq!(parish.source, Source::Diocese);
        assert_eq!(
            parish.liturgy_notes[0],
            "Imported from diocesan directory: https://www.cathdal.org/parishes"
        );
    }

    #[test]
    fn place_maps_with_rating_default_and_metro_fallback() {
        let place = PlaceResult {
            place_id: Some("ChIJ123".into()),
            name: "St. Monica".into(),
            vicinity: Some("9933 Midway Rd".into()),
            user_ratings_total: Some(87),
            types: vec!["church".into()],
            ..Default::default()
        };
        let parish = place_to_parish(&place, "Dallas, TX", Source::Google);
        assert_eq!(parish.id, "chij123");
        // A single-segment vicinity parses to "Unknown", not an empty city.
        assert_eq!(parish.location, "Unknown");
        assert_eq!(parish.zip, UNKNOWN_ZIP);
        assert_eq!(parish.online_review_score, 4.0);
        assert_eq!(parish.reverent_image_signals, 1);
        assert_eq!(parish.web_signals, vec!["Google rating count: 87"]);
        assert_eq!(parish.external.unwrap().types, vec!["church"]);
    }

    #[test]
    fn place_with_empty_city_uses_fallback_location() {
        let place = PlaceResult {
            name: "St. Rita".into(),
            formatted_address: Some("12521 Inwood Rd, , TX 75244".into()),
            rating: Some(4.8),
            ..Default::default()
        };
        let parish = place_to_parish(&place, "Dallas metro", Source::GoogleLive);
        assert_eq!(parish.id, "st-rita");
        assert_eq!(parish.location, "Dallas metro");
        assert_eq!(parish.zip, "75244");
        assert_eq!(parish.online_review_score, 4.8);
        assert_eq!(parish.source, Source::GoogleLive);
    }

    #[test]
    fn zero_rating_and_empty_place_id_count_as_missing() {
        let place = PlaceResult {
            place_id: Some(String::new()),
            name: "Holy Family".into(),
            formatted_address: Some("1 Main St, Fort Worth, TX 76102".into()),
            rating: Some(0.0),
            ..Default::default()
        };
        let parish = place_to_parish(&place, "Fort Worth", Source::Google);
        assert_eq!(parish.id, "holy-family");
        assert_eq!(parish.online_review_score, 4.0);
        assert_eq!(parish.external.unwrap().place_id, None);
    }

    #[test]
    fn nearby_url_carries_search_parameters() {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let client = GooglePlacesClient::new(http, "test-key");
        let metro = MetroTarget {
            label: "Dallas".into(),
            lat: 32.7767,
            lng: -96.797,
            radius_meters: None,
        };
        let url = client.nearby_url(&metro).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("location".into(), "32.7767,-96.797".into())));
        assert!(pairs.contains(&("radius".into(), "20000".into())));
        assert!(pairs.contains(&("keyword".into(), "Catholic parish".into())));
        assert!(pairs.contains(&("key".into(), "test-key".into())));
    }

    #[test]
    fn seed_files_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metro-seeds.json");
        std::fs::write(
            &path,
            r#"[{"label": "Dallas", "lat": 32.7, "lng": -96.8, "radiusMeters": 15000}]"#,
        )
        .unwrap();
        let metros = load_metro_targets(&path).unwrap();
        assert_eq!(metros[0].radius(), 15000);
        assert!(load_diocesan_seeds(dir.path().join("missing.json")).is_err());
    }
}
