use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use nudge_core::error::{NudgeError, Result};
use tokio::sync::mpsc;

type Task = BoxFuture<'static, ()>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_CONTEXT: ContextId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// Handle to the execution context that runs fired callbacks.
///
/// `submit` only enqueues, so it is safe to call from any thread, including
/// ones with no tokio runtime. The paired [`ContextLoop`] drains the queue on
/// the runtime it is spawned on.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ContextId,
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Task>,
}

impl ExecutionContext {
    pub fn new(name: &str) -> (Self, ContextLoop) {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::unbounded_channel();
        let context = Self {
            id,
            name: name.clone(),
            tx,
        };
        (context, ContextLoop { id, name, rx })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task to run on this context.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(task.boxed()).map_err(|_| {
            NudgeError::Scheduler(format!("execution context '{}' is closed", self.name))
        })
    }

    /// Context the calling task was submitted through, if any.
    pub fn current() -> Option<ContextId> {
        CURRENT_CONTEXT.try_with(|id| *id).ok()
    }

    pub fn is_current(&self) -> bool {
        Self::current() == Some(self.id)
    }
}

/// Receiving half of an [`ExecutionContext`]. Spawn `run` once on the
/// application runtime during startup.
pub struct ContextLoop {
    id: ContextId,
    name: Arc<str>,
    rx: mpsc::UnboundedReceiver<Task>,
}

impl ContextLoop {
    /// Run submitted tasks until every `ExecutionContext` handle is dropped.
    /// Each task is spawned so a slow one does not hold up the queue.
    pub async fn run(mut self) {
        tracing::debug!(context = %self.name, "execution context loop started");
        while let Some(task) = self.rx.recv().await {
            tokio::spawn(CURRENT_CONTEXT.scope(self.id, task));
        }
        tracing::debug!(context = %self.name, "execution context loop stopped");
    }
}
