//! Result store for finished pipeline runs.
//!
//! Runs are owned by the executing task while in flight. Once terminal, the
//! executor hands a copy to the configured [`RunStore`] so status queries never
//! touch live run state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::PipelineRun;
use crate::error::Result;

/// Storage for terminal pipeline runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a run, replacing any earlier copy with the same id.
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    async fn get(&self, run_id: Uuid) -> Option<PipelineRun>;

    /// Runs in save order, optionally filtered by pipeline name.
    async fn list(&self, pipeline: Option<&str>) -> Vec<PipelineRun>;
}

/// Process-local [`RunStore`].
///
/// Keeps every saved run for the life of the process; nothing is evicted.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: RwLock<Runs>,
}

#[derive(Debug, Default)]
struct Runs {
    by_id: HashMap<Uuid, PipelineRun>,
    order: Vec<Uuid>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.inner.write().await;
        if runs.by_id.insert(run.run_id, run.clone()).is_none() {
            runs.order.push(run.run_id);
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.inner.read().await.by_id.get(&run_id).cloned()
    }

    async fn list(&self, pipeline: Option<&str>) -> Vec<PipelineRun> {
        let runs = self.inner.read().await;
        runs.order
            .iter()
            .filter_map(|id| runs.by_id.get(id))
            .filter(|run| pipeline.is_none_or(|name| run.pipeline_name == name))
            .cloned()
            .collect()
    }
}
