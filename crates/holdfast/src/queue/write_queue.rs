//! Bounded asynchronous write queue.
//!
//! One worker task drains a bounded channel. Keyed tasks are held in a map
//! and represented in the channel by a placeholder, so a newer task for the
//! same key replaces the pending one without taking a second slot. Execution
//! of one key is serialized across the worker, inline fallbacks and the
//! shutdown drain by striped key locks.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use holdfast_core::config::{QueueConfig, QueueFullPolicy};

use super::task::{Job, QueueItem, WriteTask};

const KEY_LOCK_STRIPES: usize = 64;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of a [`WriteQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Stopped,
    Started,
    Stopping,
}

impl QueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => QueueState::Started,
            2 => QueueState::Stopping,
            _ => QueueState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            QueueState::Stopped => 0,
            QueueState::Started => 1,
            QueueState::Stopping => 2,
        }
    }
}

/// How a task got past admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Queued,
    Coalesced,
    ExecutedInline,
    Dropped,
    Rejected,
}

impl Admission {
    fn accepted(self) -> bool {
        !matches!(self, Admission::Dropped | Admission::Rejected)
    }
}

/// Outcome of [`WriteQueue::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ShutdownReport {
    /// The worker emptied the queue before the deadline.
    pub drained_gracefully: bool,
    /// Tasks run on the caller after the deadline.
    pub executed_inline: usize,
}

struct Shared {
    config: QueueConfig,
    sender: mpsc::Sender<QueueItem>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueueItem>>,
    pending: Mutex<HashMap<String, Job>>,
    key_locks: Vec<tokio::sync::Mutex<()>>,
    /// Held for reading during admission, for writing to stop accepting.
    admission: RwLock<()>,
    state: AtomicU8,
    in_flight: AtomicUsize,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: QueueState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_lock(&self, key: &str) -> &tokio::sync::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.key_locks[(hasher.finish() % self.key_locks.len() as u64) as usize]
    }

    fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn is_drained(&self) -> bool {
        self.depth() == 0 && self.pending().is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }

    // ========================================================================
    // Admission
    // ========================================================================

    async fn admit(&self, job: Job) -> Admission {
        let _admission = self.admission.read().await;
        if self.state() != QueueState::Started {
            tracing::debug!(task = %job.task.description(), "Write queue is not accepting tasks");
            job.complete(false);
            return Admission::Rejected;
        }

        match job.task.key().map(str::to_string) {
            None => self.admit_unkeyed(job).await,
            Some(key) => self.admit_keyed(key, job).await,
        }
    }

    async fn admit_unkeyed(&self, job: Job) -> Admission {
        let job = match self.offer(QueueItem::Unkeyed(job)).await {
            Ok(()) => return Admission::Queued,
            Err(QueueItem::Unkeyed(job)) => job,
            Err(QueueItem::Keyed(_)) => return Admission::Rejected,
        };

        if self.config.full_policy == QueueFullPolicy::Drop {
            tracing::warn!(task = %job.task.description(), "Write queue full, dropping task");
            job.complete(false);
            return Admission::Dropped;
        }
        tracing::debug!(task = %job.task.description(), "Write queue full, running task inline");
        job.execute().await;
        Admission::ExecutedInline
    }

    async fn admit_keyed(&self, key: String, job: Job) -> Admission {
        let previous = self.pending().insert(key.clone(), job);
        if let Some(previous) = previous {
            tracing::trace!(key = %key, task = %previous.task.description(), "Coalesced pending write");
            previous.complete(false);
            return Admission::Coalesced;
        }

        if self.offer(QueueItem::Keyed(key.clone())).await.is_ok() {
            return Admission::Queued;
        }

        // No placeholder made it in: resolve whatever task now owns the key.
        let _guard = self.key_lock(&key).lock().await;
        let Some(job) = self.pending().remove(&key) else {
            return Admission::Coalesced;
        };
        if self.config.full_policy == QueueFullPolicy::Drop {
            tracing::warn!(key = %key, task = %job.task.description(), "Write queue full, dropping task");
            job.complete(false);
            return Admission::Dropped;
        }
        tracing::debug!(key = %key, task = %job.task.description(), "Write queue full, running task inline");
        job.execute().await;
        Admission::ExecutedInline
    }

    /// Offers an item, waiting for space only under the block policy.
    async fn offer(&self, item: QueueItem) -> Result<(), QueueItem> {
        let item = match self.sender.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item) | TrySendError::Closed(item)) => item,
        };

        let timeout = self.config.full_timeout();
        if self.config.full_policy != QueueFullPolicy::Block || timeout.is_zero() {
            return Err(item);
        }
        match self.sender.send_timeout(item, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item) | SendTimeoutError::Closed(item)) => {
                tracing::debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for write queue space"
                );
                Err(item)
            }
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn process(&self, item: QueueItem) -> bool {
        match item {
            QueueItem::Unkeyed(job) => {
                job.execute().await;
                true
            }
            QueueItem::Keyed(key) => self.execute_keyed(&key).await,
        }
    }

    /// Runs the pending task for `key`, if one is still registered.
    async fn execute_keyed(&self, key: &str) -> bool {
        let _guard = self.key_lock(key).lock().await;
        let job = self.pending().remove(key);
        match job {
            Some(job) => {
                job.execute().await;
                true
            }
            None => false,
        }
    }

    /// Runs everything left in the channel and the key map on the caller.
    async fn drain_inline(&self) -> usize {
        let mut executed = 0;
        loop {
            let item = self.receiver.lock().await.try_recv().ok();
            let Some(item) = item else { break };
            if self.process(item).await {
                executed += 1;
            }
        }

        let leftovers: Vec<(String, Job)> = self.pending().drain().collect();
        for (key, job) in leftovers {
            let _guard = self.key_lock(&key).lock().await;
            job.execute().await;
            executed += 1;
        }
        executed
    }
}

async fn run_worker(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    tracing::debug!("Write queue worker started");
    loop {
        if *stop.borrow() {
            break;
        }
        let item = {
            let mut receiver = shared.receiver.lock().await;
            let item = tokio::select! {
                biased;
                _ = stop.changed() => None,
                item = receiver.recv() => item,
            };
            if item.is_some() {
                shared.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            item
        };
        let Some(item) = item else { break };
        shared.process(item).await;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!("Write queue worker stopped");
}

/// Bounded write-behind queue with coalescing and full-queue policies.
pub struct WriteQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    pub fn new(config: QueueConfig) -> Self {
        let config = QueueConfig {
            max_size: config.max_size.max(1),
            ..config
        };
        let (sender, receiver) = mpsc::channel(config.max_size);
        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                pending: Mutex::new(HashMap::new()),
                key_locks: (0..KEY_LOCK_STRIPES)
                    .map(|_| tokio::sync::Mutex::new(()))
                    .collect(),
                admission: RwLock::new(()),
                state: AtomicU8::new(QueueState::Stopped.as_u8()),
                in_flight: AtomicUsize::new(0),
                stop,
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts accepting tasks and spawns the worker. No-op when running.
    pub fn start(&self) {
        let mut worker = self.worker();
        if self.shared.state() != QueueState::Stopped || worker.is_some() {
            return;
        }
        self.shared.stop.send_replace(false);
        let stop = self.shared.stop.subscribe();
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.shared), stop)));
        self.shared.set_state(QueueState::Started);
        tracing::info!(
            max_size = self.shared.config.max_size,
            full_policy = %self.shared.config.full_policy,
            full_timeout_ms = self.shared.config.full_timeout_ms,
            "Write queue started"
        );
    }

    /// Admits a task without waiting for it to run.
    ///
    /// Returns false when the task was dropped by a full queue or the queue is
    /// not accepting. A task run inline under the sync or block policy counts
    /// as accepted even if it failed.
    pub async fn enqueue(&self, task: WriteTask) -> bool {
        self.shared.admit(Job::new(task)).await.accepted()
    }

    /// Admits a task and waits up to `timeout` for it to run.
    ///
    /// Returns true only if the task itself ran and succeeded. A task
    /// superseded by a newer one for the same key resolves false.
    pub async fn enqueue_and_wait(&self, task: WriteTask, timeout: Duration) -> bool {
        let description = task.description().to_string();
        let (tx, rx) = oneshot::channel();
        if !self
            .shared
            .admit(Job::with_completion(task, tx))
            .await
            .accepted()
        {
            return false;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(executed)) => executed,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::debug!(
                    task = %description,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for write"
                );
                false
            }
        }
    }

    /// Stops accepting, waits up to `timeout` for the worker to drain, then
    /// runs whatever is left on the caller. No admitted task is lost.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        {
            let _gate = self.shared.admission.write().await;
            if self.shared.state() != QueueState::Started {
                return ShutdownReport {
                    drained_gracefully: true,
                    executed_inline: 0,
                };
            }
            self.shared.set_state(QueueState::Stopping);
        }

        let drained = self.wait_idle(timeout).await;
        if !drained {
            tracing::warn!(
                depth = self.shared.depth(),
                pending_keys = self.pending_keys(),
                timeout_ms = timeout.as_millis() as u64,
                "Write queue did not drain in time, draining inline"
            );
        }

        self.shared.stop.send_replace(true);
        let worker = self.worker().take();
        if let Some(handle) = worker {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Write queue worker ended abnormally");
            }
        }

        let executed_inline = self.shared.drain_inline().await;
        if executed_inline > 0 {
            tracing::info!(executed = executed_inline, "Executed remaining writes inline");
        }
        self.shared.set_state(QueueState::Stopped);
        tracing::info!(drained_gracefully = drained, "Write queue stopped");

        ShutdownReport {
            drained_gracefully: drained,
            executed_inline,
        }
    }

    /// Waits up to `timeout` until nothing is queued, pending or running.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.is_drained() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn state(&self) -> QueueState {
        self.shared.state()
    }

    pub fn is_started(&self) -> bool {
        self.state() == QueueState::Started
    }

    /// Items currently in the channel.
    pub fn depth(&self) -> usize {
        self.shared.depth()
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.max_size
    }

    /// Keyed tasks not yet started.
    pub fn pending_keys(&self) -> usize {
        self.shared.pending().len()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        if self.shared.state() == QueueState::Started {
            tracing::warn!(
                depth = self.shared.depth(),
                pending_keys = self.shared.pending().len(),
                "Write queue dropped without shutdown"
            );
        }
        self.shared.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    use holdfast_core::storage::RepositoryError;

    /// Records applied writes per key.
    #[derive(Default)]
    struct Sink {
        writes: Mutex<Vec<(String, u32)>>,
    }

    impl Sink {
        fn task(self: &Arc<Self>, key: &str, value: u32) -> WriteTask {
            let sink = Arc::clone(self);
            let owned = key.to_string();
            WriteTask::new(format!("save {key}={value}"), move || async move {
                sink.writes.lock().unwrap().push((owned, value));
                Ok(())
            })
            .keyed(key)
        }

        fn writes(&self) -> Vec<(String, u32)> {
            self.writes.lock().unwrap().clone()
        }
    }

    /// A task that parks the worker until released.
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                entered: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
            }
        }

        fn task(&self) -> WriteTask {
            let (entered, release) = (self.entered.clone(), self.release.clone());
            WriteTask::new("gate", move || async move {
                entered.notify_one();
                release.notified().await;
                Ok(())
            })
        }

        /// Enqueues the gate and waits until the worker is parked in it.
        async fn park(&self, queue: &WriteQueue) {
            assert!(queue.enqueue(self.task()).await);
            self.entered.notified().await;
        }

        fn open(&self) {
            self.release.notify_one();
        }
    }

    fn flag_task(flag: &Arc<AtomicBool>) -> WriteTask {
        let flag = flag.clone();
        WriteTask::new("flag", move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn started(max_size: usize, policy: QueueFullPolicy, timeout_ms: u64) -> WriteQueue {
        let queue = WriteQueue::new(QueueConfig::new(
            max_size,
            policy,
            Duration::from_millis(timeout_ms),
        ));
        queue.start();
        queue
    }

    #[tokio::test]
    async fn test_enqueue_before_start_is_rejected() {
        let queue = WriteQueue::new(QueueConfig::default());
        let flag = Arc::new(AtomicBool::new(false));

        assert!(!queue.enqueue(flag_task(&flag)).await);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_coalesced_saves_write_once_with_latest_value() {
        let queue = Arc::new(started(10, QueueFullPolicy::Block, 200));
        let sink = Arc::new(Sink::default());
        let gate = Gate::new();
        gate.park(&queue).await;

        let first = tokio::spawn({
            let (queue, task) = (queue.clone(), sink.task("meta:a", 1));
            async move { queue.enqueue_and_wait(task, Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.pending_keys(), 1);
        assert!(queue.enqueue(sink.task("meta:a", 2)).await);

        assert!(!first.await.unwrap());
        assert_eq!(queue.depth(), 1);
        gate.open();
        let report = queue.shutdown(Duration::from_secs(2)).await;

        assert!(report.drained_gracefully);
        assert_eq!(sink.writes(), vec![("meta:a".to_string(), 2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_key_never_runs_concurrently() {
        let queue = Arc::new(started(1, QueueFullPolicy::Sync, 0));
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let (queue, running, overlaps, runs) =
                    (queue.clone(), running.clone(), overlaps.clone(), runs.clone());
                tokio::spawn(async move {
                    let task = WriteTask::new(format!("save meta:a #{i}"), move || async move {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .keyed("meta:a");
                    queue.enqueue(task).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        queue.shutdown(Duration::from_secs(2)).await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_applies_last_value_of_every_key() {
        let queue = started(100, QueueFullPolicy::Block, 200);
        let sink = Arc::new(Sink::default());
        let gate = Gate::new();
        gate.park(&queue).await;

        for round in 1..=5 {
            for key in 0..10 {
                assert!(queue.enqueue(sink.task(&format!("meta:{key}"), round)).await);
            }
        }
        let release = gate.release.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            release.notify_one();
        });

        let report = queue.shutdown(Duration::from_millis(20)).await;

        assert!(!report.drained_gracefully);
        assert_eq!(report.executed_inline, 10);
        let mut writes = sink.writes();
        writes.sort();
        let expected: Vec<_> = (0..10).map(|key| (format!("meta:{key}"), 5)).collect();
        assert_eq!(writes, expected);
        assert_eq!(queue.state(), QueueState::Stopped);
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_full() {
        let queue = started(1, QueueFullPolicy::Drop, 0);
        let gate = Gate::new();
        gate.park(&queue).await;
        let second = Arc::new(AtomicBool::new(false));
        let third = Arc::new(AtomicBool::new(false));

        assert!(queue.enqueue(flag_task(&second)).await);
        assert!(!queue.enqueue(flag_task(&third)).await);

        gate.open();
        queue.shutdown(Duration::from_secs(2)).await;
        assert!(second.load(Ordering::SeqCst));
        assert!(!third.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drop_policy_releases_key_for_later_writes() {
        let queue = started(1, QueueFullPolicy::Drop, 0);
        let sink = Arc::new(Sink::default());
        let gate = Gate::new();
        gate.park(&queue).await;
        let filler = Arc::new(AtomicBool::new(false));
        assert!(queue.enqueue(flag_task(&filler)).await);

        assert!(!queue.enqueue(sink.task("meta:a", 1)).await);
        assert_eq!(queue.pending_keys(), 0);

        gate.open();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.enqueue(sink.task("meta:a", 2)).await);
        queue.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sink.writes(), vec![("meta:a".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_sync_policy_runs_on_caller_when_full() {
        let queue = started(1, QueueFullPolicy::Sync, 0);
        let gate = Gate::new();
        gate.park(&queue).await;
        let second = Arc::new(AtomicBool::new(false));
        let third = Arc::new(AtomicBool::new(false));

        assert!(queue.enqueue(flag_task(&second)).await);
        assert!(queue.enqueue(flag_task(&third)).await);

        assert!(third.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));
        gate.open();
        queue.shutdown(Duration::from_secs(2)).await;
        assert!(second.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_block_policy_falls_back_to_sync_after_timeout() {
        let queue = started(1, QueueFullPolicy::Block, 60);
        let gate = Gate::new();
        gate.park(&queue).await;
        let second = Arc::new(AtomicBool::new(false));
        let third = Arc::new(AtomicBool::new(false));
        assert!(queue.enqueue(flag_task(&second)).await);

        let started_at = Instant::now();
        assert!(queue.enqueue(flag_task(&third)).await);

        assert!(started_at.elapsed() >= Duration::from_millis(60));
        assert!(third.load(Ordering::SeqCst));
        gate.open();
        queue.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        let queue = started(1, QueueFullPolicy::Block, 2_000);
        let gate = Gate::new();
        gate.park(&queue).await;
        let second = Arc::new(AtomicBool::new(false));
        let third = Arc::new(AtomicBool::new(false));
        assert!(queue.enqueue(flag_task(&second)).await);

        let release = gate.release.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            release.notify_one();
        });
        assert!(queue.enqueue(flag_task(&third)).await);

        let report = queue.shutdown(Duration::from_secs(2)).await;
        assert!(report.drained_gracefully);
        assert!(second.load(Ordering::SeqCst));
        assert!(third.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_reports_task_result() {
        let queue = started(10, QueueFullPolicy::Block, 200);
        let flag = Arc::new(AtomicBool::new(false));

        assert!(
            queue
                .enqueue_and_wait(flag_task(&flag), Duration::from_secs(2))
                .await
        );
        assert!(flag.load(Ordering::SeqCst));

        let failing = WriteTask::new("fail", || async {
            Err(RepositoryError::Io("disk full".to_string()))
        });
        assert!(!queue.enqueue_and_wait(failing, Duration::from_secs(2)).await);
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_times_out() {
        let queue = started(10, QueueFullPolicy::Block, 200);
        let gate = Gate::new();
        gate.park(&queue).await;
        let flag = Arc::new(AtomicBool::new(false));

        assert!(
            !queue
                .enqueue_and_wait(flag_task(&flag), Duration::from_millis(30))
                .await
        );

        gate.open();
        queue.shutdown(Duration::from_secs(2)).await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue = started(10, QueueFullPolicy::Sync, 0);
        let report = queue.shutdown(Duration::from_millis(100)).await;
        assert!(report.drained_gracefully);
        assert_eq!(report.executed_inline, 0);

        let flag = Arc::new(AtomicBool::new(false));
        assert!(!queue.enqueue(flag_task(&flag)).await);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_queue_can_restart_after_shutdown() {
        let queue = started(10, QueueFullPolicy::Block, 200);
        queue.shutdown(Duration::from_millis(100)).await;
        queue.start();
        let flag = Arc::new(AtomicBool::new(false));

        assert!(
            queue
                .enqueue_and_wait(flag_task(&flag), Duration::from_secs(2))
                .await
        );
        assert!(queue.is_started());
        queue.shutdown(Duration::from_secs(1)).await;
    }
}
