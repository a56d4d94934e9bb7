pub mod cell_store;
pub mod config;
pub mod content_cache;
pub mod crawl;
pub mod env_loader;
pub mod error;
pub mod feature_schema;
pub mod geocoder;
pub mod http_fetch;
pub mod models;
pub mod reconcile;
pub mod result_table;
pub mod roster;
pub mod station_number;
