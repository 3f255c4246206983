//! Shared types, error model, and configuration for cryptfeed.
//!
//! This crate is the foundation depended on by all other cryptfeed crates.
//! It provides:
//! - [`CryptfeedError`]: the unified error type
//! - Domain types ([`Record`], [`RecordId`], [`CollectionName`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FeedConfig, HttpConfig, NewscatcherConfig, RunConfig, StoreConfig, StoreTarget,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_secret,
};
pub use error::{CryptfeedError, Result};
pub use types::{CollectionName, ID_FIELD, Record, RecordId};
