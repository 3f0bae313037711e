//! Dataset file storage + HTTP fetch utilities for the parish directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rmf-storage";

#[derive(Debug, Clone)]
pub struct WrittenDataset {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
}

/// Owns the canonical dataset file: the boundary between the merge tool and
/// the serving layer.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    path: PathBuf,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Replace the dataset with `bytes` through a temp file + rename, so a
    /// concurrent reader sees either the old or the new document.
    pub async fn write_bytes(&self, bytes: &[u8]) -> anyhow::Result<WrittenDataset> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating dataset directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp dataset file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp dataset file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp dataset file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp dataset {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        Ok(WrittenDataset {
            path: self.path.clone(),
            content_hash: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        })
    }

    pub async fn write_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<WrittenDataset> {
        let bytes = serde_json::to_vec_pretty(value).context("serializing dataset")?;
        self.write_bytes(&bytes).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Command-line HTTP client tried when the in-process client fails.
    /// Invoked as `<command> -s <url>`; `None` disables the fallback.
    pub fallback_command: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            fallback_command: Some("curl".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("fallback `{command}` failed: {reason}")]
    Fallback { command: String, reason: String },
    #[error("fetch failed ({primary}); fallback failed ({fallback})")]
    BothTransportsFailed {
        primary: Box<FetchError>,
        fallback: Box<FetchError>,
    },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    fallback_command: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            fallback_command: config.fallback_command,
        })
    }

    /// GET `url` and decode the body as JSON. Network failures and
    /// non-success statuses fall through to the command-line client; only
    /// when both transports fail is an error returned.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", host = %redacted_host(url));
        async {
            let primary = match self.fetch_primary(url).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(command) = &self.fallback_command else {
                return Err(primary);
            };
            warn!(error = %primary, command = %command, "primary fetch failed; trying fallback");

            match self.fetch_fallback(command, url).await {
                Ok(value) => Ok(value),
                Err(fallback) => Err(FetchError::BothTransportsFailed {
                    primary: Box::new(primary),
                    fallback: Box::new(fallback),
                }),
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_primary<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().path().to_string(),
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn fetch_fallback<T: DeserializeOwned>(&self, command: &str, url: &str) -> Result<T, FetchError> {
        let output = Command::new(command)
            .arg("-s")
            .arg(url)
            .output()
            .await
            .map_err(|err| FetchError::Fallback {
                command: command.to_string(),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(FetchError::Fallback {
                command: command.to_string(),
                reason: format!("exited with {}", output.status),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

// Query strings carry API keys; only the host goes into spans.
fn redacted_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "<local>".to_string())
}
