//! Configuration system for Loom.
//!
//! Provides TOML-based configuration with:
//! - Pipeline engine defaults (`[pipeline]`): services file, default
//!   collection, retry and timeout fallbacks, bridge search depth
//! - Log output settings (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, ConfigPaths, ConfigSource, LoadedConfig, load_config_file, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
