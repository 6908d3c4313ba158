//! Config file discovery and layered merging.
//!
//! Two layers, later overriding earlier section by section:
//! 1. user: `config.toml` in `--config-dir`, `$LOOM_CONFIG_DIR` or the
//!    platform config directory (`~/.config/loom` on Linux)
//! 2. project: `loom.toml` in the working directory
//!
//! A missing layer is skipped. A layer that fails to parse or validate is
//! skipped too, with a warning, so a typo never stops the CLI from starting.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, LoomConfig, Result};

const PROJECT_CONFIG_FILE: &str = "loom.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const APP_NAME: &str = "loom";
const CONFIG_DIR_ENV: &str = "LOOM_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    User,
    Project,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ConfigLayer::User => "user",
            ConfigLayer::Project => "project",
        })
    }
}

/// One config file that was looked for.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: ConfigLayer,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Where each layer lives.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// `None` when no config directory can be determined.
    pub user: Option<PathBuf>,
    pub project: PathBuf,
}

impl ConfigPaths {
    /// Resolve layer paths.
    ///
    /// `project_dir` defaults to the working directory. `config_dir`
    /// overrides both `LOOM_CONFIG_DIR` and the platform default.
    pub fn resolve(project_dir: Option<&Path>, config_dir: Option<&Path>) -> Self {
        let user = match config_dir {
            Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
            None => xdg_config_path(),
        };
        let project = match project_dir {
            Some(dir) => dir.join(PROJECT_CONFIG_FILE),
            None => PathBuf::from(PROJECT_CONFIG_FILE),
        };
        Self { user, project }
    }

    /// Load and merge every layer that exists.
    pub fn load(&self) -> LoadedConfig {
        let mut loaded = LoadedConfig {
            config: LoomConfig::new(),
            sources: Vec::new(),
            warnings: Vec::new(),
            user_path: self.user.clone(),
        };
        if let Some(user) = &self.user {
            loaded.apply(ConfigLayer::User, user);
        }
        loaded.apply(ConfigLayer::Project, &self.project);
        loaded
    }
}

/// Merged configuration plus what was looked at to build it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: LoomConfig,
    /// Layers in precedence order (lowest first).
    pub sources: Vec<ConfigSource>,
    /// One entry per layer that existed but could not be used.
    pub warnings: Vec<String>,
    user_path: Option<PathBuf>,
}

impl LoadedConfig {
    /// Paths of the layers that were merged.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    /// User-layer file, whether or not it exists yet.
    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_path.as_deref()
    }

    fn apply(&mut self, layer: ConfigLayer, path: &Path) {
        let loaded = path.is_file()
            && match load_config_file(path) {
                Ok(parsed) => {
                    self.config.merge(parsed);
                    true
                }
                Err(e) => {
                    self.warnings
                        .push(format!("Ignoring {layer} config {}: {e}", path.display()));
                    false
                }
            };
        self.sources.push(ConfigSource {
            layer,
            path: path.to_path_buf(),
            loaded,
        });
    }
}

/// Read and validate one config file.
pub fn load_config_file(path: &Path) -> Result<LoomConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    LoomConfig::from_toml(&contents)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(config: &LoomConfig, path: &Path) -> Result<()> {
    let write_err = |p: &Path, e| ConfigError::WriteFile {
        path: p.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// `config.toml` inside [`xdg_config_dir`].
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `$LOOM_CONFIG_DIR` when set and non-empty, else `<platform config dir>/loom`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}
