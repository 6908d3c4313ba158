//! Configuration-driven pipeline orchestration for Loom.
//!
//! A pipeline is a named, ordered chain of activities. Each activity is
//! declared once in the [`ActivityCatalog`] with its parameter and return
//! shapes, timeout, retry policy and (for remote activities) task queue.
//! Between steps a named transform reshapes one activity's output into the
//! next activity's input.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌────────────────────┐
//! │ ServicesFile     │──▶│ ActivityCatalog    │◀──────────────────┐
//! │ (YAML loader)    │   │ TransformRegistry  │                   │
//! └──────────────────┘   │ PipelineRegistry   │                   │
//!                        └─────────┬──────────┘                   │
//!                                  │                              │
//!           ┌──────────────────────┼──────────────────────┐       │
//!           ▼                      ▼                      ▼       │
//!    ┌────────────┐       ┌──────────────────┐      ┌────────────┐│
//!    │ Validator  │──────▶│ PipelineExecutor │      │ GapBridger ├┘
//!    │ (report)   │       │ retry + timeout  │      │ (BFS)      │
//!    └────────────┘       └────────┬─────────┘      └────────────┘
//!                                  │
//!                  ┌───────────────┴───────────────┐
//!                  ▼                               ▼
//!           HandlerTable (local)        RemoteDispatcher (task queues)
//! ```

pub mod bridge;
pub mod builtin;
pub mod catalog;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod loader;
pub mod shape;
pub mod store;
pub mod transform;
pub mod validate;

pub use bridge::{BridgeHop, BridgeSuggestion, DEFAULT_MAX_HOPS, GapBridger};
pub use catalog::{
    ActivityCatalog, ActivityDescriptor, ActivityKey, ActivityKind, Parameter, RetryPolicy,
};
pub use definition::{PipelineDefinition, PipelineRegistry, PipelineStep};
pub use dispatch::{
    ActivityHandler, ActivityResult, FnHandler, HandlerTable, QueuedTask, RemoteDispatcher,
    TaskQueueHub,
};
pub use engine::{
    ExecutorConfig, PipelineExecutor, PipelineRun, RunFailure, RunStatus, StepResult, StepStatus,
};
pub use error::{ActivityError, PipelineError, Result};
pub use loader::{ActivityDefaults, LOCAL_SERVICE, ServicesFile};
pub use shape::{ShapePattern, ShapeTag};
pub use store::{InMemoryRunStore, RunStore};
pub use transform::{
    PASSTHROUGH, TransformContext, TransformFn, TransformOp, TransformRegistry, TransformSpec,
};
pub use validate::{BridgeRequest, StepCheck, ValidationEntry, ValidationReport, Validator};
