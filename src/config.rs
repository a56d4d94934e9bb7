// config.rs
use log::info;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ROOT_URL: &str = "http://www.kirov.vybory.izbirkom.ru/region/region/kirov?action=show&root=1&tvd=100100028713304&vrn=100100028713299&region=43&global=&sub_region=43&prver=0&pronetvd=null&vibid=100100028713304&type=233";
const DEFAULT_GEOCODER_URL: &str = "http://geocode-maps.yandex.ru/1.x/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.3; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/37.0.2049.0 Safari/537.36";

/// Paths, endpoints and limits for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub root_url: String,
    pub roster_path: PathBuf,
    pub geocoder_url: String,
    pub geocoder_api_key: Option<String>,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub crawl_depth: usize,
    pub user_agent: String,
}

impl PipelineConfig {
    /// Reads `UIK_*` variables from the process environment.
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|name| std::env::var(name).ok());
        info!(
            "Config: data_dir={:?}, roster={:?}, timeout={:?}, concurrency={}, crawl_depth={}",
            config.data_dir,
            config.roster_path,
            config.fetch_timeout,
            config.fetch_concurrency,
            config.crawl_depth
        );
        config
    }

    /// Builds the config from any variable source; unset or unparsable
    /// values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let data_dir = PathBuf::from(var("UIK_DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let roster_path = var("UIK_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("cik_uik_20160229.csv"));
        let timeout_secs = var("UIK_FETCH_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        let fetch_concurrency = var("UIK_FETCH_CONCURRENCY")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(8);
        let crawl_depth = var("UIK_CRAWL_DEPTH")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(2);

        Self {
            root_url: var("UIK_ROOT_URL").unwrap_or_else(|| DEFAULT_ROOT_URL.to_string()),
            roster_path,
            geocoder_url: var("UIK_GEOCODER_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            geocoder_api_key: var("UIK_GEOCODER_API_KEY"),
            fetch_timeout: Duration::from_secs(timeout_secs),
            fetch_concurrency,
            crawl_depth,
            user_agent: var("UIK_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            data_dir,
        }
    }

    pub fn html_dir(&self) -> PathBuf {
        self.data_dir.join("html")
    }

    pub fn address_dir(&self) -> PathBuf {
        self.data_dir.join("address")
    }

    pub fn cells_path(&self) -> PathBuf {
        self.data_dir.join("uik_cells_2011.json")
    }

    /// Output file for joined records, suffixed with the run timestamp.
    pub fn output_path(&self, timestamp_suffix: &str) -> PathBuf {
        self.data_dir.join(format!("stations_{}.json", timestamp_suffix))
    }
}
