//! Parsing and validation of `memo.toml` cache configuration files.
//!
//! This crate reads the cache configuration file and produces a strongly-typed
//! [`CacheConfig`] describing where the store lives and how blobs are published.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
