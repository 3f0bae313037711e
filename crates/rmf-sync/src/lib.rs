//! Offline merge tool: diocesan seeds + optional places sweep -> one dataset.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rmf_adapters::{
    diocesan_parish, load_diocesan_seeds, load_metro_targets, place_to_parish, GooglePlacesClient, MetroTarget,
    PlacesLookup,
};
use rmf_core::{ParishRecord, Source};
use rmf_storage::{DatasetStore, HttpClientConfig, HttpFetcher};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rmf-sync";

pub const PLACES_API_KEY_VAR: &str = "GOOGLE_PLACES_API_KEY";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub diocesan_seed_path: PathBuf,
    pub metro_seed_path: PathBuf,
    pub output_path: PathBuf,
    pub places_api_key: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("RMF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        Self::for_data_dir(data_dir)
    }

    /// Config rooted at `data_dir` with the fixed seed/output file names;
    /// network settings still come from the environment.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            diocesan_seed_path: data_dir.join("diocesan-seed.json"),
            metro_seed_path: data_dir.join("metro-seeds.json"),
            output_path: data_dir.join("parishes.json"),
            places_api_key: std::env::var(PLACES_API_KEY_VAR)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            user_agent: std::env::var("RMF_USER_AGENT")
                .unwrap_or_else(|_| "reverentmass-sync/0.1".to_string()),
            http_timeout_secs: std::env::var("RMF_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

/// Outcome of the optional places enrichment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PlacesStatus {
    Skipped,
    Fetched(usize),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub diocesan_records: usize,
    pub places: PlacesStatus,
    pub merged_records: usize,
    pub output_path: String,
    pub dataset_sha256: String,
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    union_into(&mut out, items);
    out
}

fn combine(existing: &mut ParishRecord, incoming: &ParishRecord) {
    union_into(&mut existing.details, &incoming.details);
    existing.confession_hours_per_week = existing
        .confession_hours_per_week
        .max(incoming.confession_hours_per_week);
    existing.adoration_hours_per_week = existing
        .adoration_hours_per_week
        .max(incoming.adoration_hours_per_week);
    existing.online_review_score = existing.online_review_score.max(incoming.online_review_score);
    union_into(&mut existing.liturgy_notes, &incoming.liturgy_notes);
    union_into(&mut existing.web_signals, &incoming.web_signals);
    if existing.source != incoming.source {
        existing.source = Source::Merged;
    }
}

/// Collapse records sharing a lowercased `name|zip` key, keeping first-seen
/// order. Set-like fields are unioned, numeric signals take the maximum.
pub fn merge_parishes(parishes: Vec<ParishRecord>) -> Vec<ParishRecord> {
    let mut merged: Vec<ParishRecord> = Vec::with_capacity(parishes.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for mut parish in parishes {
        let key = parish.merge_key();
        match index_by_key.get(&key) {
            Some(&idx) => combine(&mut merged[idx], &parish),
            None => {
                parish.details = dedup(&parish.details);
                parish.liturgy_notes = dedup(&parish.liturgy_notes);
                parish.web_signals = dedup(&parish.web_signals);
                index_by_key.insert(key, merged.len());
                merged.push(parish);
            }
        }
    }

    merged
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: DatasetStore,
    places: Option<Box<dyn PlacesLookup>>,
}

impl SyncPipeline {
    /// Build a pipeline; the places lookup is wired only when an API key is
    /// configured.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let places: Option<Box<dyn PlacesLookup>> = match &config.places_api_key {
            Some(key) => {
                let http = HttpFetcher::new(config.http_client_config())?;
                Some(Box::new(GooglePlacesClient::new(http, key.clone())))
            }
            None => None,
        };
        let store = DatasetStore::new(config.output_path.clone());
        Ok(Self { config, store, places })
    }

    pub fn with_places(mut self, places: Option<Box<dyn PlacesLookup>>) -> Self {
        self.places = places;
        self
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let diocesan = load_diocesan_seeds(&self.config.diocesan_seed_path)?
            .iter()
            .map(diocesan_parish)
            .collect::<Vec<_>>();
        let metros = load_metro_targets(&self.config.metro_seed_path)?;
        info!(%run_id, diocesan = diocesan.len(), metros = metros.len(), "loaded seeds");

        let (google, places) = match &self.places {
            Some(lookup) => match fetch_places(lookup.as_ref(), &metros).await {
                Ok(records) => {
                    info!(count = records.len(), "fetched places");
                    let count = records.len();
                    (records, PlacesStatus::Fetched(count))
                }
                Err(err) => {
                    warn!(error = %err, "places fetch failed; continuing with diocesan seed only");
                    (Vec::new(), PlacesStatus::Failed(format!("{err:#}")))
                }
            },
            None => {
                info!("{PLACES_API_KEY_VAR} not set; generating data from diocesan seed only");
                (Vec::new(), PlacesStatus::Skipped)
            }
        };

        let diocesan_records = diocesan.len();
        let mut all = diocesan;
        all.extend(google);
        let merged = merge_parishes(all);

        let written = self
            .store
            .write_json(&merged)
            .await
            .with_context(|| format!("writing dataset {}", self.store.path().display()))?;
        info!(
            records = merged.len(),
            path = %written.path.display(),
            sha256 = %written.content_hash,
            "wrote dataset"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            diocesan_records,
            places,
            merged_records: merged.len(),
            output_path: written.path.display().to_string(),
            dataset_sha256: written.content_hash,
        })
    }
}

/// Sweep metro targets one at a time; the first failure aborts the sweep.
async fn fetch_places(lookup: &dyn PlacesLookup, metros: &[MetroTarget]) -> Result<Vec<ParishRecord>> {
    let mut collected = Vec::new();
    for metro in metros {
        let places = lookup
            .nearby(metro)
            .await
            .with_context(|| format!("nearby search for {}", metro.label))?;
        collected.extend(
            places
                .iter()
                .map(|place| place_to_parish(place, &metro.label, Source::Google)),
        );
    }
    Ok(collected)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rmf_adapters::{AdapterError, PlaceResult};
    use tempfile::tempdir;

    fn record(name: &str, zip: &str, source: Source) -> ParishRecord {
        ParishRecord {
            id: rmf_adapters::slugify(name),
            name: name.to_string(),
            location: "Dallas, TX".into(),
            zip: zip.to_string(),
            details: vec![],
            confession_hours_per_week: 1.0,
            adoration_hours_per_week: 1.0,
            reverent_image_signals: 2,
            online_review_score: 4.0,
            liturgy_notes: vec![],
            web_signals: vec![],
            community_notes: vec![],
            source,
            external: None,
        }
    }

    #[test]
    fn collisions_union_tags_and_take_maxima() {
        let mut a = record("St. Rita", "75244", Source::Diocese);
        a.details = vec!["latin".into()];
        a.confession_hours_per_week = 6.0;
        a.liturgy_notes = vec!["Diocesan".into()];
        let mut b = record("ST. RITA", "75244", Source::Google);
        b.details = vec!["latin".into(), "tongue".into()];
        b.adoration_hours_per_week = 20.0;
        b.online_review_score = 4.7;
        b.liturgy_notes = vec!["Diocesan".into(), "Places".into()];

        let merged = merge_parishes(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.id, "st-rita");
        assert_eq!(m.details, vec!["latin", "tongue"]);
        assert_eq!(m.confession_hours_per_week, 6.0);
        assert_eq!(m.adoration_hours_per_week, 20.0);
        assert_eq!(m.online_review_score, 4.7);
        assert_eq!(m.liturgy_notes, vec!["Diocesan", "Places"]);
        assert_eq!(m.source, Source::Merged);
    }

    #[test]
    fn same_source_collision_keeps_source() {
        let merged = merge_parishes(vec![
            record("St. Rita", "75244", Source::Google),
            record("St. Rita", "75244", Source::Google),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, Source::Google);
    }

    #[test]
    fn different_zip_is_a_different_parish() {
        let merged = merge_parishes(vec![
            record("St. Joseph", "75001", Source::Diocese),
            record("St. Joseph", "76001", Source::Diocese),
            record("Holy Family", "75001", Source::Diocese),
        ]);
        let ids: Vec<_> = merged.iter().map(|p| p.zip.as_str()).collect();
        assert_eq!(ids, vec!["75001", "76001", "75001"]);
    }

    #[test]
    fn merging_a_list_with_itself_is_idempotent() {
        let mut a = record("St. Rita", "75244", Source::Diocese);
        a.details = vec!["latin".into(), "latin".into()];
        let b = record("Holy Trinity", "75219", Source::Google);
        let once = merge_parishes(vec![a.clone(), b.clone()]);
        let doubled = merge_parishes(vec![a.clone(), b.clone(), a, b]);
        assert_eq!(once, doubled);
        assert_eq!(merge_parishes(once.clone()), once);
        assert_eq!(once[0].details, vec!["latin"]);
    }

    struct FakePlaces {
        fail: bool,
    }

    #[async_trait]
    impl PlacesLookup for FakePlaces {
        async fn nearby(&self, metro: &MetroTarget) -> Result<Vec<PlaceResult>, AdapterError> {
            if self.fail {
                return Err(AdapterError::Message("network down".into()));
            }
            Ok(vec![
                PlaceResult {
                    place_id: Some(format!("{}-1", metro.label)),
                    name: "St. Rita Catholic Community".into(),
                    formatted_address: Some("12521 Inwood Rd, Dallas, TX 75244, USA".into()),
                    rating: Some(4.9),
                    ..Default::default()
                },
                PlaceResult {
                    place_id: Some(format!("{}-2", metro.label)),
                    name: "Mission San Juan".into(),
                    vicinity: Some("1 Mission Rd, Irving".into()),
                    ..Default::default()
                },
            ])
        }

        async fn text_search(&self, _query: &str) -> Result<Vec<PlaceResult>, AdapterError> {
            Ok(vec![])
        }
    }

    fn write_seeds(dir: &std::path::Path) {
        std::fs::write(
            dir.join("diocesan-seed.json"),
            r#"[
                {
                    "name": "St. Rita Catholic Community",
                    "address": "12521 Inwood Rd, Dallas, TX 75244",
                    "details": ["latin"],
                    "confessionHoursPerWeek": 5,
                    "source_url": "https://www.cathdal.org/parishes",
                    "website": "https://strita.net"
                },
                {
                    "name": "Holy Trinity Catholic Church",
                    "address": "3811 Oak Lawn Ave, Dallas, TX 75219",
                    "source_url": "https://www.cathdal.org/parishes",
                    "website": "https://holytrinitydallas.org"
                }
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("metro-seeds.json"),
            r#"[{"label": "Dallas, TX", "lat": 32.7767, "lng": -96.797}]"#,
        )
        .unwrap();
    }

    fn config_for(dir: &std::path::Path) -> SyncConfig {
        SyncConfig {
            places_api_key: None,
            ..SyncConfig::for_data_dir(dir)
        }
    }

    #[tokio::test]
    async fn missing_key_runs_diocesan_only() {
        let dir = tempdir().unwrap();
        write_seeds(dir.path());
        let pipeline = SyncPipeline::new(config_for(dir.path())).unwrap();
        let summary = pipeline.run_once().await.unwrap();

        assert_eq!(summary.places, PlacesStatus::Skipped);
        assert_eq!(summary.merged_records, 2);
        let written: Vec<ParishRecord> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("parishes.json")).unwrap()).unwrap();
        assert!(written.iter().all(|p| p.source == Source::Diocese));
        assert_eq!(written[1].confession_hours_per_week, 1.0);
    }

    #[tokio::test]
    async fn places_results_merge_with_diocesan_records() {
        let dir = tempdir().unwrap();
        write_seeds(dir.path());
        let pipeline = SyncPipeline::new(config_for(dir.path()))
            .unwrap()
            .with_places(Some(Box::new(FakePlaces { fail: false })));
        let summary = pipeline.run_once().await.unwrap();

        assert_eq!(summary.places, PlacesStatus::Fetched(2));
        assert_eq!(summary.merged_records, 3);
        let written: Vec<ParishRecord> =
            serde_json::from_str(&std::fs::read_to_string(&summary.output_path).unwrap()).unwrap();
        let rita = written.iter().find(|p| p.zip == "75244").unwrap();
        assert_eq!(rita.source, Source::Merged);
        assert_eq!(rita.id, "st-rita-catholic-community");
        assert_eq!(rita.online_review_score, 4.9);
        assert_eq!(rita.confession_hours_per_week, 5.0);
        let mission = written.iter().find(|p| p.name == "Mission San Juan").unwrap();
        assert_eq!(mission.source, Source::Google);
        assert_eq!(mission.location, "Irving");
    }

    #[tokio::test]
    async fn places_failure_degrades_to_diocesan_only() {
        let dir = tempdir().unwrap();
        write_seeds(dir.path());
        let pipeline = SyncPipeline::new(config_for(dir.path()))
            .unwrap()
            .with_places(Some(Box::new(FakePlaces { fail: true })));
        let summary = pipeline.run_once().await.unwrap();
        assert!(matches!(summary.places, PlacesStatus::Failed(_)));
        assert_eq!(summary.merged_records, 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["places"]["status"], "failed");
        assert!(json["places"]["detail"].as_str().unwrap().contains("network down"));
        assert_eq!(json["merged_records"], 2);
        assert_eq!(json["dataset_sha256"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn rerun_with_unchanged_inputs_is_byte_identical() {
        let dir = tempdir().unwrap();
        write_seeds(dir.path());
        let pipeline = SyncPipeline::new(config_for(dir.path()))
            .unwrap()
            .with_places(Some(Box::new(FakePlaces { fail: false })));
        let first = pipeline.run_once().await.unwrap();
        let second = pipeline.run_once().await.unwrap();
        assert_eq!(first.dataset_sha256, second.dataset_sha256);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn missing_seed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let pipeline = SyncPipeline::new(config_for(dir.path())).unwrap();
        let err = pipeline.run_once().await.unwrap_err();
        assert!(format!("{err:#}").contains("diocesan-seed.json"));
    }
}
