use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;

const ENV_FILES: [&str; 3] = [".env", ".env.local", "../.env"];

/// Merges the first readable env file into the process environment.
/// Variables already set in the environment win over the file.
pub fn load_env() {
    let loaded = ENV_FILES
        .iter()
        .filter(|path| Path::new(path).exists())
        .find(|path| match load_env_from_file(path) {
            Ok(count) => {
                info!("Took {} variables from {}", count, path);
                true
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", path, e);
                false
            }
        });
    if loaded.is_none() {
        info!("No env file loaded; using the process environment as is");
    }
}

// Returns how many variables were set from the file.
fn load_env_from_file(file_path: &str) -> Result<usize> {
    let text = std::fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read env file {}", file_path))?;
    let mut count = 0;
    for (key, value) in parse_env_lines(&text) {
        if std::env::var(&key).is_err() {
            count += 1;
            debug!(
                "Set env var from file: {} = {}",
                key,
                if key.contains("API_KEY") { "[hidden]" } else { value.as_str() }
            );
            std::env::set_var(key, value);
        }
    }
    Ok(count)
}

/// `KEY=value` pairs from `.env` text; comments, blank lines and lines
/// without `=` are ignored, surrounding quotes are stripped.
pub fn parse_env_lines(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}
