//! Pipeline definitions: named, ordered chains of activity steps.
//!
//! Definitions are plain typed structures. They may be built before the
//! catalog is complete and are only checked against it by the
//! [`crate::validate::Validator`], at validation or execution time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ActivityKey, ActivityKind};
use crate::error::{PipelineError, Result};
use crate::shape::ShapeTag;

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// The catalog activity this step runs.
    pub activity: ActivityKey,
    /// Whether the step runs in-process or on a remote worker.
    pub kind: ActivityKind,
    /// Transform applied to the previous output. `None` passes it unchanged.
    #[serde(default)]
    pub transform: Option<String>,
}

impl PipelineStep {
    pub fn local(service: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            activity: ActivityKey::new(service, activity),
            kind: ActivityKind::Local,
            transform: None,
        }
    }

    pub fn remote(service: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            activity: ActivityKey::new(service, activity),
            kind: ActivityKind::Remote,
            transform: None,
        }
    }

    /// Name the transform explicitly instead of leaving it to resolution.
    pub fn with_transform(mut self, name: impl Into<String>) -> Self {
        self.transform = Some(name.into());
        self
    }
}

/// A complete pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Unique pipeline name.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Declared shape of the external input payload. When absent the payload
    /// is assumed to already match the first step's parameter.
    #[serde(default)]
    pub input_shape: Option<ShapeTag>,

    /// Steps, executed strictly in order.
    pub steps: Vec<PipelineStep>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_shape: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_shape(mut self, shape: impl Into<ShapeTag>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Problems with the definition as a whole, independent of the catalog.
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("Pipeline name cannot be empty".to_string());
        }
        if self.steps.is_empty() {
            problems.push("Pipeline must have at least one step".to_string());
        }
        problems
    }
}

/// Pipelines available for execution, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
    order: Vec<String>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Fails if the name is already taken.
    pub fn register(&mut self, definition: PipelineDefinition) -> Result<()> {
        if self.pipelines.contains_key(&definition.name) {
            return Err(PipelineError::DuplicatePipeline(definition.name));
        }
        debug!(
            "Registering pipeline '{}' with {} steps",
            definition.name,
            definition.steps.len()
        );
        self.order.push(definition.name.clone());
        self.pipelines
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<PipelineDefinition>> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::PipelineNotFound(name.to_string()))
    }

    /// Pipeline names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineDefinition> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.pipelines.get(name).map(|p| p.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest() -> PipelineDefinition {
        PipelineDefinition::new("ingest")
            .with_description("Chunk and index documents")
            .with_input_shape("documents")
            .step(PipelineStep::local("local_activities", "chunk_documents"))
            .step(
                PipelineStep::remote("embedding_service", "embed_and_index")
                    .with_transform("chunked_docs_with_collection"),
            )
    }

    #[test]
    fn test_builder() {
        let p = ingest();
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].kind, ActivityKind::Local);
        assert!(p.steps[0].transform.is_none());
        assert_eq!(
            p.steps[1].transform.as_deref(),
            Some("chunked_docs_with_collection")
        );
        assert_eq!(p.input_shape, Some(ShapeTag::new("documents")));
    }

    #[test]
    fn test_structural_problems() {
        assert!(ingest().structural_problems().is_empty());

        let empty = PipelineDefinition::new("empty");
        let problems = empty.structural_problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("at least one step"));

        let nameless = PipelineDefinition::new("  ");
        assert_eq!(nameless.structural_problems().len(), 2);
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = PipelineRegistry::new();
        registry.register(ingest()).unwrap();
        assert_eq!(registry.get("ingest").unwrap().steps.len(), 2);
        assert_eq!(registry.names(), ["ingest".to_string()]);
        assert!(matches!(
            registry.get("missing"),
            Err(PipelineError::PipelineNotFound(ref n)) if n == "missing"
        ));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PipelineRegistry::new();
        registry.register(ingest()).unwrap();
        assert!(matches!(
            registry.register(ingest()),
            Err(PipelineError::DuplicatePipeline(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_step_serde_roundtrip() {
        let step = PipelineStep::remote("svc", "act").with_transform("documents");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["kind"], "remote");
        let back: PipelineStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
