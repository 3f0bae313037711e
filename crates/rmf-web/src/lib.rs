//! Thin axum serving layer: static page, version stamp and two read-only
//! JSON endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rmf_adapters::{place_to_parish, GooglePlacesClient, PlacesLookup};
use rmf_core::{ParishRecord, Source};
use rmf_storage::{DatasetStore, HttpClientConfig, HttpFetcher};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "rmf-web";
pub const APP_NAME: &str = "reverentmass-finder";

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub public_dir: PathBuf,
    pub dataset_path: PathBuf,
    pub places_api_key: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl ServeConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            public_dir: std::env::var("RMF_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("public")),
            dataset_path: std::env::var("RMF_DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/parishes.json")),
            places_api_key: std::env::var("GOOGLE_PLACES_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            user_agent: std::env::var("RMF_USER_AGENT")
                .unwrap_or_else(|_| "reverentmass-web/0.1".to_string()),
            http_timeout_secs: std::env::var("RMF_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub public_root: PathBuf,
    pub dataset: DatasetStore,
    pub places: Option<Arc<dyn PlacesLookup>>,
}

impl AppState {
    pub fn new(public_root: impl Into<PathBuf>, dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into(),
            dataset: DatasetStore::new(dataset_path),
            places: None,
        }
    }

    pub fn with_places(mut self, places: Arc<dyn PlacesLookup>) -> Self {
        self.places = Some(places);
        self
    }

    pub fn from_config(config: &ServeConfig) -> anyhow::Result<Self> {
        let state = Self::new(&config.public_dir, &config.dataset_path);
        let Some(key) = &config.places_api_key else {
            return Ok(state);
        };
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(state.with_places(Arc::new(GooglePlacesClient::new(http, key.clone()))))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub app: &'static str,
    pub version: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/__version", get(version_handler))
        .route("/api/parishes", get(parishes_handler))
        .route("/api/search-parishes", get(search_parishes_handler))
        .fallback(static_handler)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .with_state(Arc::new(state))
}

pub async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    if state.places.is_none() {
        info!("GOOGLE_PLACES_API_KEY not set; live search returns no results");
    }
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("ReverentMass Finder running at http://{}:{}", config.host, config.port);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(ServeConfig::from_env()).await
}

async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        app: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Serves the dataset document as written; records are not re-shaped.
async fn parishes_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.dataset.read_json::<Value>().await {
        Ok(records @ Value::Array(_)) => Json(records),
        Ok(_) => {
            warn!("dataset is not a JSON array; serving empty list");
            Json(Value::Array(Vec::new()))
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "dataset unavailable; serving empty list");
            Json(Value::Array(Vec::new()))
        }
    }
}

async fn search_parishes_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Vec<ParishRecord>> {
    // First `q` wins when the parameter repeats.
    let q = params
        .iter()
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.trim())
        .unwrap_or_default();
    let Some(places) = &state.places else {
        return Json(Vec::new());
    };
    if q.is_empty() {
        return Json(Vec::new());
    }

    match places.text_search(q).await {
        Ok(results) => Json(
            results
                .iter()
                .map(|place| place_to_parish(place, q, Source::GoogleLive))
                .collect(),
        ),
        Err(err) => {
            warn!(error = %err, "live search failed");
            Json(Vec::new())
        }
    }
}

async fn static_handler(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let Some(file_path) = resolve_static_path(&state.public_root, uri.path()) else {
        return plain(StatusCode::BAD_REQUEST, "Bad request");
    };

    if let Ok(bytes) = read_file(&file_path).await {
        return ([(header::CONTENT_TYPE, content_type_for(&file_path))], bytes).into_response();
    }

    match read_file(&state.public_root.join("index.html")).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], bytes).into_response(),
        Err(_) => plain(StatusCode::NOT_FOUND, "Not found"),
    }
}

async fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// Map a request path onto a file under `root`. `None` when the decoded path
/// climbs above the root or is not valid UTF-8.
pub fn resolve_static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let decoded = if decoded == "/" { "/index.html" } else { &*decoded };

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let mut path = root.to_path_buf();
    path.extend(segments);
    Some(path)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" => "text/html; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        _ => "application/octet-stream",
    }
}
