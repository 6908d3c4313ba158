//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use loom_config::LoadedConfig;
use loom_pipeline::{
    ActivityCatalog, ActivityDefaults, PipelineExecutor, PipelineRegistry, ServicesFile,
    TransformRegistry,
};

pub mod activities;
pub mod bridge;
pub mod config;
pub mod pipelines;
pub mod run;
pub mod validate;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Services file given on the command line, if any.
    pub services: Option<PathBuf>,
    /// Layered configuration.
    pub config: LoadedConfig,
}

/// Catalog, transforms and pipelines built from the services file.
pub struct Services {
    pub path: PathBuf,
    pub catalog: Arc<ActivityCatalog>,
    pub transforms: Arc<TransformRegistry>,
    pub pipelines: Arc<PipelineRegistry>,
}

impl Context {
    /// Services file to load: `--services` first, then `[pipeline].services_file`.
    pub fn services_path(&self) -> Option<PathBuf> {
        self.services
            .clone()
            .or_else(|| self.config.config.pipeline().services_file)
    }

    /// Load and register everything the services file declares.
    pub fn load_services(&self) -> Result<Services> {
        let Some(path) = self.services_path() else {
            bail!("No services file: pass --services or set [pipeline].services_file");
        };

        let section = self.config.config.pipeline();
        let (catalog, transforms, definitions) = ServicesFile::from_file(&path)?
            .into_parts(&ActivityDefaults::from(&section))
            .with_context(|| format!("Invalid services file {}", path.display()))?;

        let mut pipelines = PipelineRegistry::new();
        for definition in definitions {
            pipelines.register(definition)?;
        }

        Ok(Services {
            path,
            catalog: Arc::new(catalog),
            transforms: Arc::new(transforms),
            pipelines: Arc::new(pipelines),
        })
    }
}

impl Services {
    /// Executor over these services using the configured defaults.
    pub fn executor(&self, ctx: &Context) -> PipelineExecutor {
        PipelineExecutor::new(
            self.catalog.clone(),
            self.transforms.clone(),
            self.pipelines.clone(),
        )
        .with_config((&ctx.config.config.pipeline()).into())
    }
}
