// http_fetch.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::content_cache::{CacheEntry, ContentCache, Retriever};

/// Plain GET retriever for result pages.
///
/// The body is kept byte for byte whatever the status code; decoding
/// happens when a page is parsed.
pub struct PageRetriever {
    client: reqwest::Client,
}

impl PageRetriever {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client for result pages")?;
        Ok(Self { client })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.fetch_timeout, &config.user_agent)
    }
}

#[async_trait]
impl Retriever for PageRetriever {
    async fn retrieve(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("GET {} failed: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("GET {} returned {}; keeping the body", url, response.status());
        }
        match response.bytes().await {
            Ok(body) => Some(body.to_vec()),
            Err(e) => {
                debug!("Reading body of {} failed: {}", url, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub requested: usize,
    pub already_cached: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Fetches every key not already in the cache index, at most `concurrency`
/// at a time. `on_done` is called once per attempted key.
pub async fn fetch_all<R, F>(
    cache: &ContentCache<R>,
    keys: impl IntoIterator<Item = String>,
    concurrency: usize,
    mut on_done: F,
) -> Result<FetchSummary>
where
    R: Retriever,
    F: FnMut(&str, &CacheEntry),
{
    let cached: HashSet<String> = cache.list_cached().await?.into_iter().collect();
    let mut summary = FetchSummary::default();
    let mut queued = HashSet::new();
    let mut pending = Vec::new();
    for key in keys {
        summary.requested += 1;
        if cached.contains(&key) {
            summary.already_cached += 1;
        } else if queued.insert(key.clone()) {
            pending.push(key);
        }
    }
    info!(
        "Fetching {} keys ({} already cached, concurrency {})",
        pending.len(),
        summary.already_cached,
        concurrency
    );

    let mut attempts = stream::iter(pending)
        .map(|key| async move {
            let entry = cache.fetch(&key).await;
            (key, entry)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((key, entry)) = attempts.next().await {
        let entry = entry.with_context(|| format!("Failed to cache {}", key))?;
        if entry.is_failure() {
            summary.failed += 1;
        } else {
            summary.fetched += 1;
        }
        on_done(&key, &entry);
    }

    info!(
        "Fetch finished: {} fetched, {} recorded failures",
        summary.fetched, summary.failed
    );
    Ok(summary)
}
