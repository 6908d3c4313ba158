//! Pipeline validation against the activity catalog and transform registry.
//!
//! Every step is checked and the report carries one entry per step. Problems
//! are returned as data, never as errors.
//!
//! The validator only *reports* gaps between steps. Finding an intermediate
//! activity that closes a gap is the job of [`crate::bridge::GapBridger`];
//! incompatible entries carry a [`BridgeRequest`] for it.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::catalog::{ActivityCatalog, ActivityKey, ActivityKind};
use crate::definition::PipelineDefinition;
use crate::error::PipelineError;
use crate::shape::ShapeTag;
use crate::transform::TransformRegistry;

/// Outcome of checking one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCheck {
    Ok,
    /// The step references an activity missing from the catalog.
    UnknownActivity,
    /// A remote step whose activity declares no task queue.
    MissingTaskQueue,
    /// The step names a transform that is not registered.
    UnknownTransform,
    /// The named transform exists but its shapes do not fit the step.
    TransformMismatch,
    /// Several transforms fit and none was named.
    AmbiguousTransform,
    /// No transform connects the previous output to this step.
    Incompatible,
    /// Could not be checked because the previous step's shape is unknown.
    Unverified,
}

impl fmt::Display for StepCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepCheck::Ok => "ok",
            StepCheck::UnknownActivity => "unknown_activity",
            StepCheck::MissingTaskQueue => "missing_task_queue",
            StepCheck::UnknownTransform => "unknown_transform",
            StepCheck::TransformMismatch => "transform_mismatch",
            StepCheck::AmbiguousTransform => "ambiguous_transform",
            StepCheck::Incompatible => "incompatible",
            StepCheck::Unverified => "unverified",
        };
        f.write_str(s)
    }
}

/// A gap the validator could not close, handed to the gap bridger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeRequest {
    /// Activity producing the output. `None` when the gap is at the external input.
    pub from: Option<ActivityKey>,
    pub to: ActivityKey,
    pub output_shape: ShapeTag,
    pub input_shape: ShapeTag,
}

/// Result of checking one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationEntry {
    pub step_index: usize,
    pub activity: ActivityKey,
    pub status: StepCheck,
    pub message: String,
    /// Transform the executor will apply at this boundary (named or resolved).
    pub transform: Option<String>,
    /// Present on `Incompatible` entries.
    pub bridge: Option<BridgeRequest>,
}

impl ValidationEntry {
    pub fn is_ok(&self) -> bool {
        self.status == StepCheck::Ok
    }
}

/// Complete validation result for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub pipeline: String,
    pub ok: bool,
    /// Problems with the definition as a whole (empty name, no steps).
    pub problems: Vec<String>,
    /// One entry per step, in step order.
    pub entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    /// Entries that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_ok())
    }

    /// Incompatible steps that want a bridge suggestion.
    pub fn bridge_requests(&self) -> impl Iterator<Item = &BridgeRequest> + '_ {
        self.entries.iter().filter_map(|e| e.bridge.as_ref())
    }

    /// One-line description of what failed.
    pub fn summary(&self) -> String {
        if self.ok {
            return format!("{} steps ok", self.entries.len());
        }
        let mut parts: Vec<String> = self.problems.clone();
        parts.extend(
            self.failures()
                .map(|e| format!("step {} ({}): {}", e.step_index, e.status, e.message)),
        );
        parts.join("; ")
    }
}

/// Checks pipeline definitions against a catalog and transform registry.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    catalog: &'a ActivityCatalog,
    transforms: &'a TransformRegistry,
}

/// Shape flowing into the step currently being checked.
enum Upstream {
    /// External input with no declared shape: assumed to match.
    Undeclared,
    /// Previous step could not be resolved.
    Unknown,
    Known {
        from: Option<ActivityKey>,
        shape: ShapeTag,
    },
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a ActivityCatalog, transforms: &'a TransformRegistry) -> Self {
        Self {
            catalog,
            transforms,
        }
    }

    /// Validate every step of `definition`.
    pub fn validate(&self, definition: &PipelineDefinition) -> ValidationReport {
        let problems = definition.structural_problems();
        let mut entries = Vec::with_capacity(definition.steps.len());

        let mut upstream = match &definition.input_shape {
            Some(shape) => Upstream::Known {
                from: None,
                shape: shape.clone(),
            },
            None => Upstream::Undeclared,
        };

        for (index, step) in definition.steps.iter().enumerate() {
            let mut entry = ValidationEntry {
                step_index: index,
                activity: step.activity.clone(),
                status: StepCheck::Ok,
                message: String::new(),
                transform: step.transform.clone(),
                bridge: None,
            };

            let descriptor = match self.catalog.get(&step.activity) {
                Ok(d) => d,
                Err(e) => {
                    entry.status = StepCheck::UnknownActivity;
                    entry.message = e.to_string();
                    entries.push(entry);
                    upstream = Upstream::Unknown;
                    continue;
                }
            };

            if step.kind == ActivityKind::Remote && descriptor.task_queue.trim().is_empty() {
                entry.status = StepCheck::MissingTaskQueue;
                entry.message =
                    format!("remote step '{}' has no task queue declared", step.activity);
            } else {
                match descriptor.first_param_shape() {
                    Some(expected) => self.check_boundary(&mut entry, &upstream, expected),
                    None => {
                        entry.message = "activity takes no parameters".to_string();
                    }
                }
            }

            entries.push(entry);
            upstream = Upstream::Known {
                from: Some(descriptor.key.clone()),
                shape: descriptor.return_type.clone(),
            };
        }

        let ok = problems.is_empty() && entries.iter().all(ValidationEntry::is_ok);
        debug!(
            pipeline = %definition.name,
            ok,
            steps = entries.len(),
            "Validated pipeline"
        );

        ValidationReport {
            pipeline: definition.name.clone(),
            ok,
            problems,
            entries,
        }
    }

    fn check_boundary(&self, entry: &mut ValidationEntry, upstream: &Upstream, expected: &ShapeTag) {
        if let Some(name) = entry.transform.clone() {
            self.check_named_transform(entry, upstream, &name, expected);
            return;
        }

        let (from, shape) = match upstream {
            Upstream::Undeclared => {
                entry.message = format!("external input assumed to be '{expected}'");
                return;
            }
            Upstream::Unknown => {
                entry.status = StepCheck::Unverified;
                entry.message = "previous step could not be resolved".to_string();
                return;
            }
            Upstream::Known { from, shape } => (from, shape),
        };

        match self.transforms.resolve(shape, expected) {
            Ok(Some(t)) => {
                entry.message = format!("'{shape}' -> '{expected}' via {}", t.name);
                entry.transform = (!t.is_identity()).then(|| t.name.clone());
            }
            Ok(None) => {
                entry.status = StepCheck::Incompatible;
                entry.message = format!("no transform converts '{shape}' into '{expected}'");
                entry.bridge = Some(BridgeRequest {
                    from: from.clone(),
                    to: entry.activity.clone(),
                    output_shape: shape.clone(),
                    input_shape: expected.clone(),
                });
            }
            Err(PipelineError::AmbiguousTransform { candidates, .. }) => {
                entry.status = StepCheck::AmbiguousTransform;
                entry.message = format!(
                    "several transforms convert '{shape}' into '{expected}' ({}); name one explicitly",
                    candidates.join(", ")
                );
            }
            Err(other) => {
                entry.status = StepCheck::Incompatible;
                entry.message = other.to_string();
            }
        }
    }

    fn check_named_transform(
        &self,
        entry: &mut ValidationEntry,
        upstream: &Upstream,
        name: &str,
        expected: &ShapeTag,
    ) {
        let transform = match self.transforms.get(name) {
            Ok(t) => t,
            Err(e) => {
                entry.status = StepCheck::UnknownTransform;
                entry.message = e.to_string();
                return;
            }
        };

        if !transform.is_identity() && !transform.produces(expected) {
            entry.status = StepCheck::TransformMismatch;
            entry.message = format!(
                "transform '{name}' produces '{}' but the step expects '{expected}'",
                transform.target
            );
            return;
        }

        if let Upstream::Known { shape, .. } = upstream {
            let fits = if transform.is_identity() {
                shape == expected
            } else {
                transform.source.matches(shape)
            };
            if !fits {
                entry.status = StepCheck::TransformMismatch;
                entry.message = format!(
                    "transform '{name}' accepts '{}' but the previous step returns '{shape}'",
                    transform.source
                );
                return;
            }
        }

        entry.message = format!("explicit transform '{name}'");
    }
}
