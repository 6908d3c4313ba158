//! Declarative services file loader.
//!
//! Parses the YAML file describing services, their activities and the
//! pipelines built from them, and turns it into the core types. Entries are
//! registered in file order.
//!
//! # Example YAML
//!
//! ```yaml
//! services:
//!   local_activities:
//!     chunk_documents:
//!       timeout_minutes: 5
//!       parameters:
//!         - { name: documents, type: documents }
//!       returns: { type: chunks }
//!
//!   embedding_service:
//!     task_queue: embedding-queue
//!     activities:
//!       embed_and_index:
//!         timeout_minutes: 10
//!         retry_attempts: 3
//!         parameters:
//!           - { name: chunks, type: chunks+collection }
//!           - { name: collection, type: collection_name, required: false }
//!         returns: { type: index_result }
//!
//! pipelines:
//!   document_ingestion:
//!     description: Chunk documents and index the chunks
//!     input_shape: documents
//!     steps:
//!       - activity: chunk_documents
//!         type: local
//!       - activity: embed_and_index
//!         type: remote
//!         service: embedding_service
//!         input_transform: chunked_docs_with_collection
//! ```
//!
//! `local_activities` lists its activities directly; every other service
//! nests them under `activities` next to its `task_queue`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::catalog::{
    ActivityCatalog, ActivityDescriptor, ActivityKey, ActivityKind, Parameter, RetryPolicy,
};
use crate::definition::{PipelineDefinition, PipelineStep};
use crate::error::{PipelineError, Result};
use crate::shape::{ShapePattern, ShapeTag};
use crate::transform::{TransformOp, TransformRegistry, TransformSpec};

/// Service whose activities run in-process.
pub const LOCAL_SERVICE: &str = "local_activities";

/// Shape recorded for activities that declare no return type.
const UNSPECIFIED_SHAPE: &str = "unspecified";

/// Values applied to activities that leave them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDefaults {
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&loom_config::PipelineSection> for ActivityDefaults {
    fn from(section: &loom_config::PipelineSection) -> Self {
        Self {
            timeout: section.default_timeout(),
            retry_policy: RetryPolicy {
                max_attempts: section.default_retry_attempts,
                initial_interval: section.default_retry_initial_interval(),
                backoff_coefficient: section.default_backoff_coefficient,
                maximum_interval: section.default_retry_max_interval(),
            },
        }
    }
}

/// Raw contents of a services file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: Mapping,

    #[serde(default)]
    pub transforms: Mapping,

    #[serde(default)]
    pub pipelines: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ServiceEntry {
    task_queue: Option<String>,
    activities: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ActivityEntry {
    description: String,
    timeout_minutes: Option<f64>,
    timeout_seconds: Option<f64>,
    retry_attempts: Option<u32>,
    retry_initial_interval_seconds: Option<f64>,
    retry_maximum_interval_seconds: Option<f64>,
    backoff_coefficient: Option<f64>,
    parameters: Vec<Parameter>,
    returns: Option<ReturnEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReturnEntry {
    #[serde(rename = "type")]
    shape: ShapeTag,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformEntry {
    op: String,
    source: ShapePattern,
    target: ShapePattern,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PipelineEntry {
    description: String,
    input_shape: Option<ShapeTag>,
    steps: Vec<StepEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct StepEntry {
    activity: String,
    #[serde(rename = "type", default)]
    kind: Option<ActivityKind>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    input_transform: Option<String>,
}

impl ServicesFile {
    /// Parse a services file from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a services file from a path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file = Self::from_yaml(&content)?;
        info!(path = %path.display(), "Loaded services file");
        Ok(file)
    }

    /// Build the catalog, transform registry and pipeline definitions.
    ///
    /// Transforms declared in the file are registered on top of the built-ins.
    pub fn into_parts(
        self,
        defaults: &ActivityDefaults,
    ) -> Result<(ActivityCatalog, TransformRegistry, Vec<PipelineDefinition>)> {
        let catalog = build_catalog(&self.services, defaults)?;
        let transforms = build_transforms(&self.transforms)?;

        let mut pipelines = Vec::new();
        for (name, entry) in entries::<PipelineEntry>(&self.pipelines, "pipeline")? {
            pipelines.push(build_pipeline(&catalog, name, entry)?);
        }

        debug!(
            activities = catalog.len(),
            transforms = transforms.all().count(),
            pipelines = pipelines.len(),
            "Built services"
        );
        Ok((catalog, transforms, pipelines))
    }
}

/// Decode every value of `mapping` as `T`, keeping file order.
fn entries<T: DeserializeOwned>(mapping: &Mapping, what: &str) -> Result<Vec<(String, T)>> {
    mapping
        .iter()
        .map(|(key, value)| {
            let name = key
                .as_str()
                .ok_or_else(|| {
                    PipelineError::InvalidDefinition(format!("{what} name must be a string"))
                })?
                .to_string();
            // A key with no body (`name:`) is an entry with every field defaulted.
            let value = match value {
                Value::Null => Value::Mapping(Mapping::new()),
                other => other.clone(),
            };
            let parsed = serde_yaml::from_value(value).map_err(|e| {
                PipelineError::InvalidDefinition(format!("{what} '{name}': {e}"))
            })?;
            Ok((name, parsed))
        })
        .collect()
}

fn build_catalog(services: &Mapping, defaults: &ActivityDefaults) -> Result<ActivityCatalog> {
    let mut catalog = ActivityCatalog::new();

    for (service, body) in entries::<Mapping>(services, "service")? {
        if service == LOCAL_SERVICE {
            for (name, entry) in entries::<ActivityEntry>(&body, "activity")? {
                catalog.register(descriptor(&service, name, entry, defaults)?)?;
            }
            continue;
        }

        let entry: ServiceEntry = serde_yaml::from_value(Value::Mapping(body)).map_err(|e| {
            PipelineError::InvalidDefinition(format!("service '{service}': {e}"))
        })?;
        let queue = entry.task_queue.unwrap_or_default();
        for (name, activity) in entries::<ActivityEntry>(&entry.activities, "activity")? {
            let d = descriptor(&service, name, activity, defaults)?.remote(queue.clone());
            catalog.register(d)?;
        }
    }

    Ok(catalog)
}

fn descriptor(
    service: &str,
    name: String,
    entry: ActivityEntry,
    defaults: &ActivityDefaults,
) -> Result<ActivityDescriptor> {
    let field = |what: &str, secs: Option<f64>| -> Result<Option<Duration>> {
        secs.map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| {
                PipelineError::InvalidDefinition(format!(
                    "service '{service}' activity '{name}': {what} out of range"
                ))
            })
        })
        .transpose()
    };

    let timeout_secs = entry
        .timeout_seconds
        .or(entry.timeout_minutes.map(|m| m * 60.0))
        .filter(|secs| *secs != 0.0);
    let timeout = field("timeout", timeout_secs)?.unwrap_or(defaults.timeout);

    let base = &defaults.retry_policy;
    let initial_interval = field(
        "retry_initial_interval_seconds",
        entry.retry_initial_interval_seconds,
    )?;
    let maximum_interval = field(
        "retry_maximum_interval_seconds",
        entry.retry_maximum_interval_seconds,
    )?;
    let retry_policy = RetryPolicy {
        max_attempts: entry.retry_attempts.unwrap_or(base.max_attempts),
        initial_interval: initial_interval.unwrap_or(base.initial_interval),
        backoff_coefficient: entry.backoff_coefficient.unwrap_or(base.backoff_coefficient),
        maximum_interval: maximum_interval.unwrap_or(base.maximum_interval),
    };

    let return_type = entry
        .returns
        .map(|r| r.shape)
        .unwrap_or_else(|| ShapeTag::new(UNSPECIFIED_SHAPE));

    let mut d = ActivityDescriptor::new(service, name, return_type)
        .with_description(entry.description)
        .with_timeout(timeout)
        .with_retry_policy(retry_policy);
    d.parameters = entry.parameters;
    Ok(d)
}

fn build_transforms(declared: &Mapping) -> Result<TransformRegistry> {
    let mut registry = TransformRegistry::with_builtins();
    for (name, entry) in entries::<TransformEntry>(declared, "transform")? {
        let op = TransformOp::builtin(&entry.op).ok_or_else(|| {
            PipelineError::InvalidDefinition(format!(
                "transform '{name}': unknown operation '{}'",
                entry.op
            ))
        })?;
        registry.register(TransformSpec::new(name, entry.source, entry.target, op))?;
    }
    Ok(registry)
}

fn build_pipeline(
    catalog: &ActivityCatalog,
    name: String,
    entry: PipelineEntry,
) -> Result<PipelineDefinition> {
    let mut definition = PipelineDefinition::new(name).with_description(entry.description);
    definition.input_shape = entry.input_shape;

    for step in entry.steps {
        let (activity, default_kind) = resolve_step_activity(catalog, &step);
        let kind = step.kind.unwrap_or(default_kind);
        definition.steps.push(PipelineStep {
            activity,
            kind,
            transform: step.input_transform,
        });
    }

    Ok(definition)
}

/// Work out which activity a step refers to.
///
/// An explicit `service` wins. A `local` step without one belongs to
/// [`LOCAL_SERVICE`]. Otherwise the bare name is looked up across services;
/// names that cannot be resolved are kept as written so the validator can
/// report them.
fn resolve_step_activity(
    catalog: &ActivityCatalog,
    step: &StepEntry,
) -> (ActivityKey, ActivityKind) {
    if let Some(service) = &step.service {
        let key = ActivityKey::new(service.as_str(), step.activity.as_str());
        let kind = catalog.get(&key).map(|d| d.kind).unwrap_or(ActivityKind::Remote);
        return (key, kind);
    }

    if step.kind == Some(ActivityKind::Local) {
        return (
            ActivityKey::new(LOCAL_SERVICE, step.activity.as_str()),
            ActivityKind::Local,
        );
    }

    match catalog.lookup_by_name(&step.activity) {
        Ok(d) => (d.key.clone(), d.kind),
        Err(_) => {
            let key = step
                .activity
                .parse()
                .unwrap_or_else(|_| ActivityKey::new(LOCAL_SERVICE, step.activity.as_str()));
            (key, step.kind.unwrap_or(ActivityKind::Local))
        }
    }
}
