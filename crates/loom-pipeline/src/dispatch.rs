//! Activity dispatch: in-process handlers and the task-queue substrate.
//!
//! Local steps call an [`ActivityHandler`] looked up in a [`HandlerTable`].
//! Remote steps go through a [`RemoteDispatcher`], which enqueues a task on a
//! named queue and awaits the worker's reply. [`TaskQueueHub`] is the
//! in-process implementation: one bounded channel per queue, consumed by
//! workers started with [`TaskQueueHub::spawn_worker`].
//!
//! A task enqueued on a queue nobody consumes stays in the channel until a
//! worker subscribes. The dispatcher does not report "no worker"; the
//! executor's per-attempt timeout bounds the wait. Workers skip tasks whose
//! dispatcher already gave up, so a timed-out attempt is never run late.
//! A task that times out while a handler is running still runs to completion;
//! its reply is dropped and the retry runs as a fresh task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::ActivityKey;
use crate::error::ActivityError;

/// Result of one activity invocation.
pub type ActivityResult = std::result::Result<Value, ActivityError>;

/// Boxed future returned by closure handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ActivityResult> + Send>>;

/// An in-process activity implementation.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, input: Value) -> ActivityResult;
}

/// Adapts an async closure into an [`ActivityHandler`].
pub struct FnHandler {
    f: Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult> + Send + 'static,
    {
        Self {
            f: Arc::new(move |input| Box::pin(f(input))),
        }
    }
}

#[async_trait]
impl ActivityHandler for FnHandler {
    async fn handle(&self, input: Value) -> ActivityResult {
        (self.f)(input).await
    }
}

/// Handlers keyed by activity. Built once, read per call.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<ActivityKey, Arc<dyn ActivityHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ActivityKey, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(key, handler);
    }

    /// Register an async closure as the handler for `key`.
    pub fn insert_fn<F, Fut>(&mut self, key: ActivityKey, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult> + Send + 'static,
    {
        self.insert(key, Arc::new(FnHandler::new(f)));
    }

    /// Merge another table into this one. Entries in `other` win.
    pub fn extend(&mut self, other: HandlerTable) {
        self.handlers.extend(other.handlers);
    }

    pub fn get(&self, key: &ActivityKey) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &ActivityKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Keys with a registered handler, sorted.
    pub fn keys(&self) -> Vec<&ActivityKey> {
        let mut keys: Vec<&ActivityKey> = self.handlers.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler for `key`. A missing handler is a permanent failure.
    pub async fn invoke(&self, key: &ActivityKey, input: Value) -> ActivityResult {
        match self.get(key) {
            Some(handler) => handler.handle(input).await,
            None => Err(ActivityError::Permanent(format!(
                "no handler registered for activity '{key}'"
            ))),
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("activities", &self.keys())
            .finish()
    }
}

/// Sends work to remote workers through named task queues.
#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    /// Enqueue `input` for `activity` on `task_queue` and await the reply.
    async fn dispatch(&self, task_queue: &str, activity: &ActivityKey, input: Value)
    -> ActivityResult;
}

/// A unit of work waiting on a task queue.
#[derive(Debug)]
pub struct QueuedTask {
    pub activity: ActivityKey,
    pub input: Value,
    reply: oneshot::Sender<ActivityResult>,
}

impl QueuedTask {
    /// Send the result back to the dispatcher. Ignored if it stopped waiting.
    pub fn respond(self, result: ActivityResult) {
        if self.reply.send(result).is_err() {
            debug!(activity = %self.activity, "Dispatcher stopped waiting; reply dropped");
        }
    }
}

struct QueueSlot {
    tx: mpsc::Sender<QueuedTask>,
    /// Present until a worker subscribes.
    rx: Option<mpsc::Receiver<QueuedTask>>,
}

impl QueueSlot {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Some(rx) }
    }
}

/// In-process task-queue substrate.
///
/// Each queue is a bounded channel created on first use by either side. Only
/// one consumer may hold a queue at a time; when it exits the queue is
/// recreated for the next subscriber.
#[derive(Clone)]
pub struct TaskQueueHub {
    queues: Arc<Mutex<HashMap<String, QueueSlot>>>,
    capacity: usize,
}

impl Default for TaskQueueHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueueHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, queue: &str) -> mpsc::Sender<QueuedTask> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueSlot::new(self.capacity));
        if slot.tx.is_closed() {
            *slot = QueueSlot::new(self.capacity);
        }
        slot.tx.clone()
    }

    /// Take the consuming end of `queue`. `None` if another worker holds it.
    pub fn subscribe(&self, queue: &str) -> Option<mpsc::Receiver<QueuedTask>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueSlot::new(self.capacity));
        if slot.rx.is_none() && slot.tx.is_closed() {
            *slot = QueueSlot::new(self.capacity);
        }
        slot.rx.take()
    }

    /// Whether a worker is currently consuming `queue`.
    pub fn has_consumer(&self, queue: &str) -> bool {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(queue)
            .is_some_and(|slot| slot.rx.is_none() && !slot.tx.is_closed())
    }

    /// Names of every queue created so far, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a worker serving `queue` with `handlers` until `cancel` fires.
    ///
    /// Returns `None` if the queue already has a consumer. Tasks run
    /// concurrently, each on its own tokio task.
    pub fn spawn_worker(
        &self,
        queue: &str,
        handlers: HandlerTable,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut rx = self.subscribe(queue)?;
        let queue = queue.to_string();
        let handlers = Arc::new(handlers);
        debug!(queue = %queue, activities = handlers.len(), "Starting worker");

        Some(tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = cancel.cancelled() => break,
                    task = rx.recv() => task,
                };
                let Some(task) = task else { break };
                if task.reply.is_closed() {
                    debug!(queue = %queue, activity = %task.activity, "Skipping abandoned task");
                    continue;
                }
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    let result = handlers.invoke(&task.activity, task.input.clone()).await;
                    task.respond(result);
                });
            }
            debug!(queue = %queue, "Worker stopped");
        }))
    }
}

impl std::fmt::Debug for TaskQueueHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueueHub")
            .field("queues", &self.queue_names())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl RemoteDispatcher for TaskQueueHub {
    async fn dispatch(
        &self,
        task_queue: &str,
        activity: &ActivityKey,
        input: Value,
    ) -> ActivityResult {
        let (reply, response) = oneshot::channel();
        let task = QueuedTask {
            activity: activity.clone(),
            input,
            reply,
        };

        debug!(queue = %task_queue, activity = %activity, "Enqueueing task");
        if self.sender(task_queue).send(task).await.is_err() {
            return Err(ActivityError::Transient(format!(
                "task queue '{task_queue}' closed before the task was accepted"
            )));
        }

        response.await.unwrap_or_else(|_| {
            warn!(queue = %task_queue, activity = %activity, "Worker dropped task without replying");
            Err(ActivityError::Transient(format!(
                "worker on '{task_queue}' dropped the task without replying"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn key(name: &str) -> ActivityKey {
        ActivityKey::new("svc", name)
    }

    fn echo_table() -> HandlerTable {
        let mut table = HandlerTable::new();
        table.insert_fn(key("echo"), |input| async move { Ok(input) });
        table
    }

    #[tokio::test]
    async fn test_handler_table_invoke() {
        let table = echo_table();
        let out = table.invoke(&key("echo"), json!({"a": 1})).await.unwrap();
        assert_eq!(out, json!({"a": 1}));

        let err = table.invoke(&key("missing"), json!(null)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_dispatch_to_worker() {
        let hub = TaskQueueHub::new();
        let cancel = CancellationToken::new();
        let worker = hub.spawn_worker("q", echo_table(), cancel.clone()).unwrap();
        assert!(hub.has_consumer("q"));

        let out = hub.dispatch("q", &key("echo"), json!("hi")).await.unwrap();
        assert_eq!(out, json!("hi"));

        cancel.cancel();
        worker.await.unwrap();
        assert!(!hub.has_consumer("q"));
    }

    #[tokio::test]
    async fn test_second_worker_on_same_queue_is_refused() {
        let hub = TaskQueueHub::new();
        let cancel = CancellationToken::new();
        let _worker = hub.spawn_worker("q", echo_table(), cancel.clone()).unwrap();
        assert!(hub.spawn_worker("q", echo_table(), cancel.clone()).is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_task_waits_for_late_worker() {
        let hub = TaskQueueHub::new();
        let dispatcher = hub.clone();
        let pending =
            tokio::spawn(async move { dispatcher.dispatch("late", &key("echo"), json!(7)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        let cancel = CancellationToken::new();
        hub.spawn_worker("late", echo_table(), cancel.clone()).unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), json!(7));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_queue_never_replies() {
        let hub = TaskQueueHub::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            hub.dispatch("nobody", &key("echo"), json!(1)),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(hub.queue_names(), vec!["nobody".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_task_is_not_run_by_late_worker() {
        let hub = TaskQueueHub::new();
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            hub.dispatch("late", &key("count"), json!("first")),
        )
        .await;
        assert!(abandoned.is_err());

        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        let mut table = HandlerTable::new();
        table.insert_fn(key("count"), move |input| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(input) }
        });

        let cancel = CancellationToken::new();
        hub.spawn_worker("late", table, cancel.clone()).unwrap();
        let out = hub.dispatch("late", &key("count"), json!("second")).await.unwrap();
        assert_eq!(out, json!("second"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_worker_reports_missing_handler() {
        let hub = TaskQueueHub::new();
        let cancel = CancellationToken::new();
        hub.spawn_worker("q", echo_table(), cancel.clone()).unwrap();
        let err = hub.dispatch("q", &key("other"), json!(1)).await.unwrap_err();
        assert!(matches!(err, ActivityError::Permanent(_)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_queue_reusable_after_worker_exit() {
        let hub = TaskQueueHub::new();
        let first = CancellationToken::new();
        let worker = hub.spawn_worker("q", echo_table(), first.clone()).unwrap();
        first.cancel();
        worker.await.unwrap();

        let second = CancellationToken::new();
        hub.spawn_worker("q", echo_table(), second.clone()).unwrap();
        let out = hub.dispatch("q", &key("echo"), json!(2)).await.unwrap();
        assert_eq!(out, json!(2));
        second.cancel();
    }
}
