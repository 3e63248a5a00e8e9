//! Retrieval of the objects we are asked to classify.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{P2pError, Result};

/// Number of header lookups remembered.
const HEADER_CACHE_SIZE: usize = 256;

/// What a `HEAD` request tells us about an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeaders {
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// An object downloaded for scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub size: u64,
    pub retrieve_ms: u64,
}

/// Fetches objects by URL.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn headers(&self, url: &str) -> Result<ObjectHeaders>;

    async fn download(&self, url: &str) -> Result<Downloaded>;
}

/// [`Retriever`] over HTTP, downloading into `download_dir`.
pub struct HttpRetriever {
    client: reqwest::Client,
    download_dir: PathBuf,
    timeout: Duration,
    header_cache: Mutex<LruCache<String, ObjectHeaders>>,
}

impl HttpRetriever {
    pub fn new(download_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(HEADER_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            client: reqwest::Client::new(),
            download_dir: download_dir.into(),
            timeout,
            header_cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn cached(&self, url: &str) -> Option<ObjectHeaders> {
        self.header_cache.lock().ok()?.get(url).cloned()
    }

    fn remember(&self, url: &str, headers: &ObjectHeaders) {
        if let Ok(mut cache) = self.header_cache.lock() {
            cache.put(url.to_string(), headers.clone());
        }
    }
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn headers(&self, url: &str) -> Result<ObjectHeaders> {
        if let Some(hit) = self.cached(url) {
            return Ok(hit);
        }
        let response = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v: &reqwest::header::HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        let headers = ObjectHeaders {
            size: header(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            last_modified: header(LAST_MODIFIED).as_deref().and_then(parse_http_date),
        };
        self.remember(url, &headers);
        Ok(headers)
    }

    async fn download(&self, url: &str) -> Result<Downloaded> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(Uuid::new_v4().to_string());

        let fetch = async {
            let mut response = self.client.get(url).send().await?.error_for_status()?;
            let mut file = tokio::fs::File::create(&path).await?;
            let mut size = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, P2pError>(size)
        };
        let size = tokio::time::timeout(self.timeout, fetch).await??;

        let retrieve_ms = started.elapsed().as_millis() as u64;
        debug!(%url, size, retrieve_ms, "object downloaded");
        Ok(Downloaded { path, size, retrieve_ms })
    }
}
