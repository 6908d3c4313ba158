//! Integration tests for PipelineExecutor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use loom_pipeline::{
    ActivityCatalog, ActivityDescriptor, ActivityError, ActivityKey, ExecutorConfig,
    HandlerTable, InMemoryRunStore, LOCAL_SERVICE, Parameter, PipelineDefinition,
    PipelineExecutor, PipelineRegistry, PipelineStep, RetryPolicy, RunStatus, RunStore,
    StepStatus, TaskQueueHub, TransformRegistry, builtin,
};

const EMBEDDING: &str = "embedding_service";
const EMBEDDING_QUEUE: &str = "embedding-queue";

fn ingestion_catalog() -> ActivityCatalog {
    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(LOCAL_SERVICE, "chunk_documents", "chunks")
                .with_param(Parameter::new("documents", "documents")),
        )
        .unwrap();
    catalog
        .register(
            ActivityDescriptor::new(EMBEDDING, "embed_and_index", "index_result")
                .remote(EMBEDDING_QUEUE)
                .with_param(Parameter::new("chunks", "chunks+collection"))
                .with_timeout(Duration::from_secs(10)),
        )
        .unwrap();
    catalog
}

fn ingestion_pipeline() -> PipelineDefinition {
    PipelineDefinition::new("document_ingestion")
        .with_input_shape("documents")
        .step(PipelineStep::local(LOCAL_SERVICE, "chunk_documents"))
        .step(PipelineStep::remote(EMBEDDING, "embed_and_index"))
}

fn executor_for(catalog: ActivityCatalog, definitions: Vec<PipelineDefinition>) -> PipelineExecutor {
    let mut pipelines = PipelineRegistry::new();
    for definition in definitions {
        pipelines.register(definition).unwrap();
    }
    PipelineExecutor::new(
        Arc::new(catalog),
        Arc::new(TransformRegistry::with_builtins()),
        Arc::new(pipelines),
    )
}

fn retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts,
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 2.0,
        maximum_interval: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn test_chunk_then_embed_scenario() {
    let hub = TaskQueueHub::new();
    let received: Arc<Mutex<Vec<Value>>> = Arc::default();

    let mut workers = HandlerTable::new();
    let seen = received.clone();
    workers.insert_fn(ActivityKey::new(EMBEDDING, "embed_and_index"), move |input| {
        seen.lock().unwrap().push(input.clone());
        async move {
            let count = input["chunks"].as_array().map_or(0, Vec::len);
            Ok(json!({ "indexed": count, "collection": input["collection"] }))
        }
    });
    let cancel = CancellationToken::new();
    hub.spawn_worker(EMBEDDING_QUEUE, workers, cancel.clone())
        .unwrap();

    let executor = executor_for(ingestion_catalog(), vec![ingestion_pipeline()])
        .with_handlers(builtin::handlers())
        .with_remote(Arc::new(hub))
        .with_config(ExecutorConfig {
            default_collection: "research_docs".into(),
            ..ExecutorConfig::default()
        });

    let input = json!({
        "documents": [
            { "id": "a", "text": "alpha beta gamma" },
            { "id": "b", "text": "delta epsilon" }
        ]
    });
    let run = executor.execute("document_ingestion", input).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps.len(), 2);
    assert!(run.steps[0].output["chunks"].is_array());
    assert_eq!(
        run.steps[1].transform.as_deref(),
        Some("chunked_docs_with_collection")
    );

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["collection"], "research_docs");
    assert_eq!(received[0]["chunks"].as_array().unwrap().len(), 2);
    assert_eq!(
        run.final_output(),
        Some(&json!({ "indexed": 2, "collection": "research_docs" }))
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_collection_taken_from_run_input() {
    let hub = TaskQueueHub::new();
    let mut workers = HandlerTable::new();
    workers.insert_fn(ActivityKey::new(EMBEDDING, "embed_and_index"), |input| async move {
        Ok(input)
    });
    hub.spawn_worker(EMBEDDING_QUEUE, workers, CancellationToken::new())
        .unwrap();

    let executor = executor_for(ingestion_catalog(), vec![ingestion_pipeline()])
        .with_handlers(builtin::handlers())
        .with_remote(Arc::new(hub));

    let input = json!({
        "documents": [{ "id": "a", "text": "one two" }],
        "collection": "notes"
    });
    let run = executor.execute("document_ingestion", input).await.unwrap();
    assert!(run.is_success());
    assert_eq!(run.final_output().unwrap()["collection"], "notes");
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_on_third_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "flaky"), move |input| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(ActivityError::Transient(format!("attempt {n} failed")))
            } else {
                Ok(input)
            }
        }
    });

    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(LOCAL_SERVICE, "flaky", "text")
                .with_param(Parameter::new("text", "text"))
                .with_retry_policy(retry(3)),
        )
        .unwrap();
    let definition =
        PipelineDefinition::new("flaky").step(PipelineStep::local(LOCAL_SERVICE, "flaky"));
    let executor = executor_for(catalog, vec![definition]).with_handlers(handlers);

    let run = executor.execute("flaky", json!("payload")).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.steps[0].status, StepStatus::Succeeded);
    assert_eq!(run.steps[0].attempt_count, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_keep_prior_results() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "prepare"), |input| async move {
        Ok(input)
    });
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "always_fails"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(ActivityError::Transient("worker unavailable".into())) }
    });
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "never_reached"), |input| async move {
        Ok(input)
    });

    let mut catalog = ActivityCatalog::new();
    for name in ["prepare", "always_fails", "never_reached"] {
        catalog
            .register(
                ActivityDescriptor::new(LOCAL_SERVICE, name, "text")
                    .with_param(Parameter::new("text", "text"))
                    .with_retry_policy(retry(3)),
            )
            .unwrap();
    }
    let definition = PipelineDefinition::new("doomed")
        .step(PipelineStep::local(LOCAL_SERVICE, "prepare"))
        .step(PipelineStep::local(LOCAL_SERVICE, "always_fails"))
        .step(PipelineStep::local(LOCAL_SERVICE, "never_reached"));
    let executor = executor_for(catalog, vec![definition]).with_handlers(handlers);

    let run = executor.execute("doomed", json!("x")).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    assert_eq!(run.steps.len(), 2);
    assert!(run.steps[0].succeeded());
    assert_eq!(run.steps[0].output, json!("x"));
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert_eq!(run.steps[1].attempt_count, 3);

    let failure = run.failure.unwrap();
    assert_eq!(failure.step_index, 1);
    assert!(failure.retryable);
    assert!(failure.message.contains("worker unavailable"));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "strict"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(ActivityError::Permanent("malformed payload".into())) }
    });

    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(LOCAL_SERVICE, "strict", "text")
                .with_param(Parameter::new("text", "text"))
                .with_retry_policy(retry(5)),
        )
        .unwrap();
    let definition =
        PipelineDefinition::new("strict").step(PipelineStep::local(LOCAL_SERVICE, "strict"));
    let executor = executor_for(catalog, vec![definition]).with_handlers(handlers);

    let run = executor.execute("strict", json!("x")).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!run.failure.unwrap().retryable);
}

#[tokio::test(start_paused = true)]
async fn test_remote_step_without_worker_times_out() {
    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(EMBEDDING, "embed_and_index", "index_result")
                .remote(EMBEDDING_QUEUE)
                .with_param(Parameter::new("chunks", "chunks+collection"))
                .with_timeout(Duration::from_secs(5))
                .with_retry_policy(retry(2)),
        )
        .unwrap();
    let definition = PipelineDefinition::new("orphan")
        .step(PipelineStep::remote(EMBEDDING, "embed_and_index"));
    let executor = executor_for(catalog, vec![definition]);

    let run = executor
        .execute("orphan", json!({ "chunks": [], "collection": "c" }))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.steps[0].attempt_count, 2);
    let failure = run.failure.unwrap();
    assert!(failure.retryable);
    assert!(failure.message.contains("timed out"));
}

#[tokio::test]
async fn test_cancel_between_steps_discards_in_flight_result() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "first"), |input| async move {
        Ok(input)
    });
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "second"), move |input| {
        trigger.cancel();
        async move { Ok(input) }
    });
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "third"), |input| async move {
        Ok(input)
    });

    let mut catalog = ActivityCatalog::new();
    for name in ["first", "second", "third"] {
        catalog
            .register(
                ActivityDescriptor::new(LOCAL_SERVICE, name, "text")
                    .with_param(Parameter::new("text", "text")),
            )
            .unwrap();
    }
    let definition = PipelineDefinition::new("interruptible")
        .step(PipelineStep::local(LOCAL_SERVICE, "first"))
        .step(PipelineStep::local(LOCAL_SERVICE, "second"))
        .step(PipelineStep::local(LOCAL_SERVICE, "third"));
    let executor = executor_for(catalog, vec![definition]).with_handlers(handlers);

    let run = executor
        .execute_with_cancel("interruptible", json!("x"), cancel)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.steps[0].activity, ActivityKey::new(LOCAL_SERVICE, "first"));
    assert!(run.failure.is_none());
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "double"), |input| async move {
        tokio::task::yield_now().await;
        let n = input.as_i64().unwrap_or_default();
        Ok(json!(n * 2))
    });

    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(LOCAL_SERVICE, "double", "number")
                .with_param(Parameter::new("n", "number")),
        )
        .unwrap();
    let definition = PipelineDefinition::new("quadruple")
        .step(PipelineStep::local(LOCAL_SERVICE, "double"))
        .step(PipelineStep::local(LOCAL_SERVICE, "double"));
    let executor = Arc::new(executor_for(catalog, vec![definition]).with_handlers(handlers));

    let handles: Vec<_> = (0..16)
        .map(|n| {
            let executor = executor.clone();
            tokio::spawn(async move { (n, executor.execute("quadruple", json!(n)).await) })
        })
        .collect();

    let mut run_ids = std::collections::HashSet::new();
    for handle in handles {
        let (n, run) = handle.await.unwrap();
        let run = run.unwrap();
        assert!(run.is_success());
        assert_eq!(run.final_output(), Some(&json!(n * 4)));
        assert!(run_ids.insert(run.run_id));
    }
}

#[tokio::test]
async fn test_terminal_runs_are_published() {
    let store = Arc::new(InMemoryRunStore::new());

    let mut handlers = HandlerTable::new();
    handlers.insert_fn(ActivityKey::new(LOCAL_SERVICE, "echo"), |input| async move {
        Ok(input)
    });
    let mut catalog = ActivityCatalog::new();
    catalog
        .register(
            ActivityDescriptor::new(LOCAL_SERVICE, "echo", "any")
                .with_param(Parameter::new("value", "any")),
        )
        .unwrap();
    let executor = executor_for(
        catalog,
        vec![
            PipelineDefinition::new("first").step(PipelineStep::local(LOCAL_SERVICE, "echo")),
            PipelineDefinition::new("second").step(PipelineStep::local(LOCAL_SERVICE, "echo")),
        ],
    )
    .with_handlers(handlers)
    .with_store(store.clone());

    let a = executor.execute("first", json!(1)).await.unwrap();
    executor.execute("second", json!(2)).await.unwrap();
    executor.execute("first", json!(3)).await.unwrap();

    let stored = store.get(a.run_id).await.unwrap();
    assert_eq!(stored, a);
    assert_eq!(store.list(Some("first")).await.len(), 2);
    assert_eq!(store.list(None).await.len(), 3);
}
