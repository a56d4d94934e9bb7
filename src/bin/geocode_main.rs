use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use uik_recon::config::PipelineConfig;
use uik_recon::env_loader;
use uik_recon::geocoder::AddressGeocoder;
use uik_recon::roster;

#[tokio::main]
async fn main() -> Result<()> {
    env_loader::load_env();
    env_logger::init();

    info!("Starting roster geocoding...");
    let config = PipelineConfig::from_env();

    let records = roster::load_roster(&config.roster_path)?;
    let addresses = roster::roster_addresses(&records);
    let geocoder = AddressGeocoder::open(&config)?;

    let progress = ProgressBar::new(addresses.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} addresses")?
            .progress_chars("##-"),
    );
    let resolved = geocoder
        .resolve_all(&addresses, config.fetch_concurrency, |_| progress.inc(1))
        .await?;
    progress.finish_and_clear();

    info!(
        "Geocoding finished: {} of {} addresses resolved, cache at {:?}",
        resolved.len(),
        addresses.len(),
        geocoder.cache().dir()
    );
    Ok(())
}
