// geocoder.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::content_cache::{ContentCache, Retriever};
use crate::http_fetch::fetch_all;
use crate::models::Coordinates;

const FIRST_POSITION: &str = "/response/GeoObjectCollection/featureMember/0/GeoObject/Point/pos";

/// Calls the geocoding endpoint; only a 200 response counts as data.
pub struct GeocoderRetriever {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeocoderRetriever {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client for the geocoder")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for GeocoderRetriever {
    async fn retrieve(&self, address: &str) -> Option<Vec<u8>> {
        let mut query = vec![("format", "json"), ("geocode", address)];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }
        let response = match self.client.get(&self.endpoint).query(&query).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Geocoder request for '{}' failed: {}", address, e);
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!("Geocoder returned {} for '{}'", response.status(), address);
            return None;
        }
        response.bytes().await.ok().map(|body| body.to_vec())
    }
}

/// First candidate's `pos` ("<longitude> <latitude>") from a geocoder
/// response. Any missing key or malformed value yields `None`.
pub fn parse_geocoder_response(body: &[u8]) -> Option<Coordinates> {
    let data: Value = serde_json::from_slice(body).ok()?;
    let pos = data.pointer(FIRST_POSITION)?.as_str()?;
    let (longitude, latitude) = pos.trim().split_once(' ')?;
    Some(Coordinates {
        longitude: longitude.trim().parse().ok()?,
        latitude: latitude.trim().parse().ok()?,
    })
}

/// Best-effort address to coordinates resolution through a content cache.
pub struct AddressGeocoder<R> {
    cache: ContentCache<R>,
}

impl AddressGeocoder<GeocoderRetriever> {
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        let retriever = GeocoderRetriever::new(
            &config.geocoder_url,
            config.geocoder_api_key.clone(),
            config.fetch_timeout,
            &config.user_agent,
        )?;
        Ok(Self::with_cache(ContentCache::open(
            config.address_dir(),
            "json",
            retriever,
        )?))
    }
}

impl<R: Retriever> AddressGeocoder<R> {
    pub fn with_cache(cache: ContentCache<R>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ContentCache<R> {
        &self.cache
    }

    /// Coordinates for `address`, calling the geocoder on a cache miss.
    pub async fn resolve(&self, address: &str) -> Result<Option<Coordinates>> {
        let entry = self.cache.fetch(address).await?;
        Ok(entry.payload().and_then(parse_geocoder_response))
    }

    /// Coordinates for `address` from the cache only.
    pub async fn cached(&self, address: &str) -> Result<Option<Coordinates>> {
        let entry = self.cache.load(address).await?;
        Ok(entry
            .as_ref()
            .and_then(|e| e.payload())
            .and_then(parse_geocoder_response))
    }

    /// Geocodes every address not yet cached, then returns all addresses
    /// that resolved. Unresolved ones are simply absent from the map.
    pub async fn resolve_all<F>(
        &self,
        addresses: &[String],
        concurrency: usize,
        mut on_done: F,
    ) -> Result<HashMap<String, Coordinates>>
    where
        F: FnMut(&str),
    {
        fetch_all(&self.cache, addresses.iter().cloned(), concurrency, |address, _| {
            on_done(address)
        })
        .await?;
        self.cached_map(addresses).await
    }

    /// Resolved coordinates for the addresses already in the cache.
    pub async fn cached_map(&self, addresses: &[String]) -> Result<HashMap<String, Coordinates>> {
        let mut resolved = HashMap::new();
        for address in addresses {
            if let Some(coordinates) = self.cached(address).await? {
                resolved.insert(address.clone(), coordinates);
            }
        }
        info!(
            "{} of {} addresses have coordinates",
            resolved.len(),
            addresses.len()
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KIROV: &str = r#"{"response":{"GeoObjectCollection":{"metaDataProperty":{},
        "featureMember":[{"GeoObject":{"name":"улица Ленина, 1","Point":{"pos":"49.668023 58.603595"}}},
                         {"GeoObject":{"Point":{"pos":"0 0"}}}]}}}"#;

    struct Canned {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Retriever for Canned {
        async fn retrieve(&self, address: &str) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match address {
                "Киров, Ленина 1" => Some(KIROV.as_bytes().to_vec()),
                "nowhere" => Some(br#"{"response":{"GeoObjectCollection":{"featureMember":[]}}}"#.to_vec()),
                _ => None,
            }
        }
    }

    #[test]
    fn takes_first_candidate() {
        let coordinates = parse_geocoder_response(KIROV.as_bytes()).unwrap();
        assert_eq!(coordinates.longitude, 49.668023);
        assert_eq!(coordinates.latitude, 58.603595);
    }

    #[test]
    fn missing_keys_are_not_errors() {
        assert_eq!(parse_geocoder_response(b"null"), None);
        assert_eq!(parse_geocoder_response(b"{}"), None);
        assert_eq!(parse_geocoder_response(b"{\"response\":{}}"), None);
        assert_eq!(
            parse_geocoder_response(br#"{"response":{"GeoObjectCollection":{"featureMember":[]}}}"#),
            None
        );
        assert_eq!(
            parse_geocoder_response(
                br#"{"response":{"GeoObjectCollection":{"featureMember":[{"GeoObject":{"Point":{"pos":"abc"}}}]}}}"#
            ),
            None
        );
        assert_eq!(parse_geocoder_response(b"<html>"), None);
    }

    #[tokio::test]
    async fn resolves_through_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let canned = Canned { calls: AtomicUsize::new(0) };
        let cache = ContentCache::open(dir.path(), "json", canned).unwrap();
        let geocoder = AddressGeocoder::with_cache(cache);

        assert!(geocoder.cached("Киров, Ленина 1").await.unwrap().is_none());
        let first = geocoder.resolve("Киров, Ленина 1").await.unwrap();
        let again = geocoder.resolve("Киров, Ленина 1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first, again);
        assert_eq!(first, geocoder.cached("Киров, Ленина 1").await.unwrap());
        assert_eq!(geocoder.cache().retriever().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_keeps_only_resolved_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let canned = Canned { calls: AtomicUsize::new(0) };
        let cache = ContentCache::open(dir.path(), "json", canned).unwrap();
        let geocoder = AddressGeocoder::with_cache(cache);
        let addresses: Vec<String> = ["Киров, Ленина 1", "nowhere", "offline"]
            .into_iter()
            .map(String::from)
            .collect();

        let mut done = 0;
        let resolved = geocoder.resolve_all(&addresses, 2, |_| done += 1).await.unwrap();

        assert_eq!(done, 3);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("Киров, Ленина 1"));
        assert!(geocoder.cache().load("offline").await.unwrap().unwrap().is_failure());
    }
}
