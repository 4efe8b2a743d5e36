use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use holdfast_core::storage::{RepositoryError, Result};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A deferred write.
///
/// Tasks with a key are coalesced: a newer task for the same key replaces one
/// that has not started yet.
pub struct WriteTask {
    key: Option<String>,
    description: String,
    action: Action,
}

impl WriteTask {
    pub fn new<F, Fut>(description: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            key: None,
            description: description.into(),
            action: Box::new(move || action().boxed()),
        }
    }

    /// Sets the coalescing key. Keys are trimmed; a blank key means unkeyed.
    pub fn keyed(mut self, key: &str) -> Self {
        let key = key.trim();
        self.key = (!key.is_empty()).then(|| key.to_string());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Runs the action; a panic inside it is reported as an error.
    pub(crate) async fn run(self) -> Result<()> {
        match AssertUnwindSafe((self.action)()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::QueryFailed(format!(
                "write task panicked: {}",
                self.description
            ))),
        }
    }
}

impl fmt::Debug for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTask")
            .field("key", &self.key)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A task plus the waiter to resolve once it has run or been superseded.
pub(crate) struct Job {
    pub task: WriteTask,
    completion: Option<oneshot::Sender<bool>>,
}

impl Job {
    pub fn new(task: WriteTask) -> Self {
        Self {
            task,
            completion: None,
        }
    }

    pub fn with_completion(task: WriteTask, completion: oneshot::Sender<bool>) -> Self {
        Self {
            task,
            completion: Some(completion),
        }
    }

    /// Resolves the waiter, if any.
    pub fn complete(self, executed: bool) {
        if let Some(completion) = self.completion {
            let _ = completion.send(executed);
        }
    }

    /// Runs the task and resolves the waiter with its success.
    pub async fn execute(self) -> bool {
        let Job { task, completion } = self;
        let description = task.description.clone();
        let ok = match task.run().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(task = %description, error = %err, "Write task failed");
                false
            }
        };
        if let Some(completion) = completion {
            let _ = completion.send(ok);
        }
        ok
    }
}

/// What the queue holds: unkeyed jobs inline, keyed jobs by placeholder.
pub(crate) enum QueueItem {
    Unkeyed(Job),
    Keyed(String),
}
