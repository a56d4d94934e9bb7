use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::io::{BufWriter, Write};
use std::path::Path;

use uik_recon::cell_store;
use uik_recon::config::PipelineConfig;
use uik_recon::content_cache::{CacheEntry, ContentCache, Retriever};
use uik_recon::crawl::crawl;
use uik_recon::env_loader;
use uik_recon::feature_schema::FeatureSchema;
use uik_recon::geocoder::AddressGeocoder;
use uik_recon::http_fetch::PageRetriever;
use uik_recon::models::{PollingStationRecord, ResultCell};
use uik_recon::reconcile::reconcile;
use uik_recon::result_table::{decode_page, parse_result_page};
use uik_recon::roster;

#[tokio::main]
async fn main() -> Result<()> {
    env_loader::load_env();
    env_logger::init();

    info!("Starting polling station reconciliation...");
    let config = PipelineConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;

    let schema = FeatureSchema::duma_2011();
    let cells_path = config.cells_path();
    let cells = if cells_path.exists() {
        info!("Reusing parsed cells from {:?}", cells_path);
        cell_store::load_cells(&cells_path, &schema)?
    } else {
        let retriever = PageRetriever::from_config(&config)?;
        let pages = ContentCache::open(config.html_dir(), "html", retriever)?;
        let cells = scrape_cells(&pages, &config, &schema).await?;
        cell_store::dump_cells(&cells_path, &cells, &schema)?;
        cells
    };

    let records = roster::load_roster(&config.roster_path)?;
    let geocoder = AddressGeocoder::open(&config)?;
    let coordinates = geocoder
        .cached_map(&roster::roster_addresses(&records))
        .await?;
    let stations = roster::build_commission_tree(records, &coordinates)?;

    let joined = reconcile(stations, cells)?;
    info!("Join report: {:?}", joined.report);

    let timestamp_suffix = Local::now().format("%Y%m%d%H%M%S").to_string();
    let output_path = config.output_path(&timestamp_suffix);
    write_records(&output_path, &joined.records)?;
    info!(
        "Wrote {} polling station records to {:?}",
        joined.records.len(),
        output_path
    );
    Ok(())
}

/// Crawls down to the station pages and parses every one that was fetched.
async fn scrape_cells<R: Retriever>(
    pages: &ContentCache<R>,
    config: &PipelineConfig,
    schema: &FeatureSchema,
) -> Result<Vec<ResultCell>> {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} pages fetched {msg}")?,
    );
    let leaves = crawl(
        pages,
        &config.root_url,
        config.crawl_depth,
        config.fetch_concurrency,
        |_, entry| {
            if entry.is_failure() {
                progress.set_message("(with failures)");
            }
            progress.inc(1);
        },
    )
    .await?;
    progress.finish_and_clear();
    info!("Crawl reached {} station pages", leaves.len());

    let mut cells = Vec::new();
    let mut skipped = 0usize;
    for key in &leaves {
        match pages.load(key).await?.and_then(CacheEntry::into_payload) {
            Some(bytes) => {
                let html = decode_page(&bytes);
                cells.extend(parse_result_page(key, &html, schema)?);
            }
            None => {
                warn!("No page for {}; skipping", key);
                skipped += 1;
            }
        }
    }
    info!(
        "Parsed {} cells from {} pages ({} skipped)",
        cells.len(),
        leaves.len() - skipped,
        skipped
    );
    Ok(cells)
}

fn write_records(path: &Path, records: &[PollingStationRecord]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("Failed to write records to {:?}", path))?;
    writer.flush()?;
    Ok(())
}
