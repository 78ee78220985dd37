//! Task queue: unbounded multi-producer queue drained by one worker task.
//!
//! # Responsibilities
//! - Accept tasks from any thread without blocking
//! - Drain periodically, on request in the background, or synchronously
//! - Suspend per-item broadcasting during a drain and broadcast once after
//!
//! # Design Decisions
//! - A single worker owns the receiving side; drains never overlap
//! - Per-item failures go to agent health and never abort the drain

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::dispatch::task::QueuedTask;
use crate::harvest::{AgentHealthException, HarvestLifecycleAware, HarvestSink};
use crate::measurement::Measurements;
use crate::observability::metrics::{SupportabilityStats, TASK_QUEUE_DEQUEUED};

/// Default drain period.
pub const DEQUEUE_PERIOD: Duration = Duration::from_millis(1000);

enum Command {
    Drain(Option<oneshot::Sender<usize>>),
    Start,
    Stop,
    Clear(oneshot::Sender<usize>),
    Shutdown,
}

struct Worker {
    tasks: mpsc::UnboundedReceiver<QueuedTask>,
    pending: Arc<AtomicUsize>,
    measurements: Arc<Measurements>,
    sink: Arc<dyn HarvestSink>,
    stats: Arc<SupportabilityStats>,
}

impl Worker {
    async fn run(
        mut self,
        period: Duration,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scheduled = false;

        loop {
            tokio::select! {
                _ = ticker.tick(), if scheduled => {
                    self.drain();
                }
                command = commands.recv() => match command {
                    Some(Command::Drain(done)) => {
                        let drained = self.drain();
                        if let Some(done) = done {
                            let _ = done.send(drained);
                        }
                    }
                    Some(Command::Start) => {
                        if !scheduled {
                            scheduled = true;
                            ticker.reset_immediately();
                        }
                    }
                    Some(Command::Stop) => scheduled = false,
                    Some(Command::Clear(done)) => {
                        let _ = done.send(self.discard());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Task queue received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn drain(&mut self) -> usize {
        if self.pending.load(Ordering::Acquire) == 0 {
            return 0;
        }

        self.measurements.set_broadcast_new_measurements(false);

        let mut drained = 0;
        while let Ok(task) = self.tasks.try_recv() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            drained += 1;
            let kind = task.kind();
            if let Err(e) = task.dispatch(&self.measurements, self.sink.as_ref()) {
                tracing::warn!(kind, error = %e, "Failed to dispatch queued task");
                self.sink
                    .add_health_exception(AgentHealthException::from_error(&e));
            }
        }

        self.measurements.broadcast();
        self.measurements.set_broadcast_new_measurements(true);

        self.stats.inc_by(TASK_QUEUE_DEQUEUED, drained as u64);
        tracing::trace!(drained, "Task queue drained");
        drained
    }

    fn discard(&mut self) -> usize {
        let mut discarded = 0;
        while self.tasks.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            discarded += 1;
        }
        discarded
    }
}

/// Queue of domain objects bound for the measurement engine and harvest.
pub struct TaskQueue {
    tasks: mpsc::UnboundedSender<QueuedTask>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Spawn the worker on the current runtime. The schedule starts stopped;
    /// call [`start`](Self::start) to enable periodic drains.
    pub fn new(
        measurements: Arc<Measurements>,
        sink: Arc<dyn HarvestSink>,
        stats: Arc<SupportabilityStats>,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            tasks: tasks_rx,
            pending: pending.clone(),
            measurements,
            sink,
            stats,
        };
        let handle = tokio::spawn(worker.run(period, commands_rx, shutdown));

        Self {
            tasks: tasks_tx,
            commands: commands_tx,
            pending,
            worker: Mutex::new(Some(handle)),
        }
    }

    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Queue a task. Never blocks and never fails; tasks sent after
    /// shutdown are dropped.
    pub fn enqueue(&self, task: impl Into<QueuedTask>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tasks.send(task.into()).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("Task queue is shut down; dropping task");
        }
    }

    /// Schedule a drain without waiting for it.
    pub fn background_dequeue(&self) {
        self.send(Command::Drain(None));
    }

    /// Drain and wait for completion. Returns the number of tasks dispatched.
    pub async fn synchronous_dequeue(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Drain(Some(tx))) {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Start the periodic drain. The first drain runs immediately.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Tasks queued but not yet dispatched.
    pub fn size(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Discard every queued task. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Clear(tx)) {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the worker. Queued tasks that were not drained are dropped.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Task queue worker ended abnormally");
            }
        }
    }
}

impl HarvestLifecycleAware for TaskQueue {
    fn on_harvest_before(&self) -> BoxFuture<'_, ()> {
        async move {
            let drained = self.synchronous_dequeue().await;
            tracing::debug!(drained, "Task queue flushed for harvest");
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{HarvestData, HarvestLimits};
    use crate::lifecycle::Shutdown;
    use crate::measurement::{ActivityTrace, HttpTransaction, Trace};

    struct Fixture {
        queue: TaskQueue,
        data: Arc<HarvestData>,
        measurements: Arc<Measurements>,
        stats: Arc<SupportabilityStats>,
        _shutdown: Shutdown,
    }

    fn fixture(period: Duration) -> Fixture {
        let stats = Arc::new(SupportabilityStats::new());
        let data = Arc::new(HarvestData::with_limits(
            stats.clone(),
            HarvestLimits {
                max_transactions: 10,
                max_activity_traces: 1,
            },
        ));
        let measurements = Arc::new(Measurements::new(data.clone()));
        measurements.initialize();
        let shutdown = Shutdown::new();
        let queue = TaskQueue::new(
            measurements.clone(),
            data.clone(),
            stats.clone(),
            period,
            shutdown.subscribe(),
        );
        Fixture {
            queue,
            data,
            measurements,
            stats,
            _shutdown: shutdown,
        }
    }

    fn transaction() -> HttpTransaction {
        HttpTransaction::new("https://example.com/a", "GET", 200, 0, 0, 0.2, 10, 20, None)
    }

    fn activity_trace(name: &str) -> ActivityTrace {
        ActivityTrace {
            activity_name: name.into(),
            root_trace: Trace::new(name, 0, 5),
        }
    }

    #[tokio::test]
    async fn test_synchronous_dequeue_dispatches_everything() {
        let f = fixture(Duration::from_secs(3600));
        f.queue.enqueue(transaction());
        f.queue.enqueue(Trace::new("doWork", 0, 10));
        f.queue.enqueue(transaction());
        assert_eq!(f.queue.size(), 3);

        assert_eq!(f.queue.synchronous_dequeue().await, 3);
        assert_eq!(f.queue.size(), 0);
        assert_eq!(f.data.transaction_count(), 2);
        assert!(f.measurements.broadcast_new_measurements());
        assert_eq!(f.stats.count(TASK_QUEUE_DEQUEUED), 3);
    }

    #[tokio::test]
    async fn test_rejected_item_does_not_abort_drain() {
        let f = fixture(Duration::from_secs(3600));
        f.queue.enqueue(activity_trace("First"));
        f.queue.enqueue(activity_trace("Second"));
        f.queue.enqueue(transaction());

        assert_eq!(f.queue.synchronous_dequeue().await, 3);
        assert_eq!(f.data.activity_trace_count(), 1);
        assert_eq!(f.data.transaction_count(), 1);
        assert_eq!(f.data.health().len(), 1);
        assert_eq!(f.stats.count("Supportability/AgentHealth/DispatchError"), 1);
    }

    #[tokio::test]
    async fn test_periodic_drain_after_start() {
        let f = fixture(Duration::from_millis(20));
        f.queue.enqueue(transaction());
        f.queue.start();

        for _ in 0..100 {
            if f.queue.size() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.queue.size(), 0);
        assert_eq!(f.data.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_shutdown() {
        let f = fixture(Duration::from_secs(3600));
        f.queue.enqueue(transaction());
        f.queue.enqueue(transaction());
        assert_eq!(f.queue.clear().await, 2);
        assert_eq!(f.queue.size(), 0);

        f.queue.shutdown().await;
        f.queue.enqueue(transaction());
        assert_eq!(f.queue.size(), 0);
        assert_eq!(f.queue.synchronous_dequeue().await, 0);
    }
}
