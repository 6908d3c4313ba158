//! Activity catalog: the static registry of activity descriptors.
//!
//! Loaded once at startup (see [`crate::loader`]) and read-only afterwards.
//! Every other component resolves activities through it: the validator for
//! schema checks, the executor for timeouts, retry policy and task queues, and
//! the gap bridger for its search graph.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::shape::ShapeTag;

/// Unique identity of an activity: owning service plus activity name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub service: String,
    pub activity: String,
}

impl ActivityKey {
    pub fn new(service: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            activity: activity.into(),
        }
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.activity)
    }
}

/// Parses the qualified `service.activity` form.
impl FromStr for ActivityKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((service, activity)) if !service.is_empty() && !activity.is_empty() => {
                Ok(Self::new(service, activity))
            }
            _ => Err(PipelineError::UnknownActivity(format!(
                "'{s}' is not a qualified service.activity name"
            ))),
        }
    }
}

/// Where an activity runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// In-process handler.
    Local,
    /// Remote worker reached through a task queue.
    Remote,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Local => f.write_str("local"),
            ActivityKind::Remote => f.write_str("remote"),
        }
    }
}

/// Retry policy applied around each dispatch of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay.
    pub maximum_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `failed_attempt` (1-based) before trying again.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = secs.min(self.maximum_interval.as_secs_f64());
        if !(capped.is_finite() && capped > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(capped).unwrap_or(self.maximum_interval)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// One declared parameter of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Declared type tag.
    #[serde(rename = "type")]
    pub shape: ShapeTag,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Parameter {
    pub fn new(name: impl Into<String>, shape: impl Into<ShapeTag>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Static description of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDescriptor {
    pub key: ActivityKey,
    #[serde(default)]
    pub description: String,
    /// Where the activity normally runs; steps may still choose explicitly.
    pub kind: ActivityKind,
    /// Task queue remote workers listen on. Empty for in-process activities.
    #[serde(default)]
    pub task_queue: String,
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub parameters: Vec<Parameter>,
    pub return_type: ShapeTag,
}

impl ActivityDescriptor {
    /// Create a descriptor with default timeout (5 minutes) and retry policy.
    pub fn new(
        service: impl Into<String>,
        activity: impl Into<String>,
        return_type: impl Into<ShapeTag>,
    ) -> Self {
        Self {
            key: ActivityKey::new(service, activity),
            description: String::new(),
            kind: ActivityKind::Local,
            task_queue: String::new(),
            timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
            parameters: Vec::new(),
            return_type: return_type.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the activity as remote, served on `task_queue`.
    pub fn remote(mut self, task_queue: impl Into<String>) -> Self {
        self.kind = ActivityKind::Remote;
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_param(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.key.activity
    }

    pub fn service(&self) -> &str {
        &self.key.service
    }

    /// Shape of the first declared parameter, the one fed by the previous step.
    pub fn first_param_shape(&self) -> Option<&ShapeTag> {
        self.parameters.first().map(|p| &p.shape)
    }
}

/// In-memory registry of activity descriptors, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ActivityCatalog {
    entries: Vec<ActivityDescriptor>,
    index: HashMap<ActivityKey, usize>,
}

impl ActivityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if its `(service, name)` is already present.
    pub fn register(&mut self, descriptor: ActivityDescriptor) -> Result<()> {
        if self.index.contains_key(&descriptor.key) {
            return Err(PipelineError::DuplicateActivity(descriptor.key));
        }
        self.index.insert(descriptor.key.clone(), self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    /// Look up an activity by service and name.
    pub fn lookup(&self, service: &str, name: &str) -> Result<&ActivityDescriptor> {
        self.get(&ActivityKey::new(service, name))
    }

    /// Look up an activity by key.
    pub fn get(&self, key: &ActivityKey) -> Result<&ActivityDescriptor> {
        self.index
            .get(key)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| PipelineError::UnknownActivity(key.to_string()))
    }

    /// Resolve a bare activity name across all services.
    ///
    /// A qualified `service.activity` name is looked up directly.
    pub fn lookup_by_name(&self, name: &str) -> Result<&ActivityDescriptor> {
        if let Ok(key) = name.parse::<ActivityKey>()
            && let Ok(found) = self.get(&key)
        {
            return Ok(found);
        }

        let matches: Vec<&ActivityDescriptor> =
            self.entries.iter().filter(|d| d.name() == name).collect();
        match matches.as_slice() {
            [] => Err(PipelineError::UnknownActivity(name.to_string())),
            [one] => Ok(*one),
            many => Err(PipelineError::AmbiguousActivity {
                name: name.to_string(),
                services: many.iter().map(|d| d.service().to_string()).collect(),
            }),
        }
    }

    /// All descriptors in registration order. The iterator can be cloned to restart.
    pub fn all(&self) -> impl Iterator<Item = &ActivityDescriptor> + Clone + '_ {
        self.entries.iter()
    }

    /// Descriptors owned by one service.
    pub fn by_service<'a>(
        &'a self,
        service: &'a str,
    ) -> impl Iterator<Item = &'a ActivityDescriptor> + 'a {
        self.entries.iter().filter(move |d| d.service() == service)
    }

    /// Service names in order of first registration.
    pub fn services(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for d in &self.entries {
            if !seen.contains(&d.service()) {
                seen.push(d.service());
            }
        }
        seen
    }

    pub fn contains(&self, key: &ActivityKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
