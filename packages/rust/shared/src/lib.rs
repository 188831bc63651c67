//! Shared types, error model, and configuration for PostHarvest.
//!
//! This crate is the foundation depended on by all other PostHarvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Post`], [`SourceName`], [`StoredPost`], [`SourceStats`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, FetchSection, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{Post, SourceName, SourceStats, StoredPost, Watermark, readable_utc};
