// crawl.rs
use anyhow::Result;
use log::{debug, info};
use std::collections::HashSet;

use crate::content_cache::{CacheEntry, ContentCache, Retriever};
use crate::http_fetch::fetch_all;
use crate::result_table::{child_region_links, decode_page};

/// Follows child-region links `depth` times from `root`, fetching every page
/// on the way through the cache. Returns the keys of the last level reached,
/// which are the pages holding station tables.
pub async fn crawl<R, F>(
    cache: &ContentCache<R>,
    root: &str,
    depth: usize,
    concurrency: usize,
    mut on_done: F,
) -> Result<Vec<String>>
where
    R: Retriever,
    F: FnMut(&str, &CacheEntry),
{
    let mut frontier = vec![root.to_string()];
    for level in 0..depth {
        fetch_all(cache, frontier.clone(), concurrency, &mut on_done).await?;

        let mut seen = HashSet::new();
        let mut next = Vec::new();
        for key in &frontier {
            let Some(CacheEntry::Payload(bytes)) = cache.load(key).await? else {
                debug!("No page stored for {}; not descending", key);
                continue;
            };
            let html = decode_page(&bytes);
            for link in child_region_links(&html) {
                let url = resolve_link(key, &link.url);
                if seen.insert(url.clone()) {
                    next.push(url);
                }
            }
        }
        info!(
            "Crawl level {}: {} pages led to {} child pages",
            level + 1,
            frontier.len(),
            next.len()
        );
        frontier = next;
    }
    fetch_all(cache, frontier.clone(), concurrency, &mut on_done).await?;
    Ok(frontier)
}

// Hrefs are normally absolute; relative ones are resolved against the page.
fn resolve_link(page: &str, href: &str) -> String {
    reqwest::Url::parse(page)
        .and_then(|base| base.join(href))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| href.to_string())
}
