//! Measured activities: named spans of work with their own pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;

use crate::measurement::pool::{MeasurementConsumer, MeasurementPool};
use crate::measurement::types::{now_millis, MeasurementError, MeasurementResult, ThreadInfo};

/// Where an activity's pool stands relative to the root pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The attach task has not run yet.
    Pending,
    /// The pool receives root broadcasts.
    Attached,
    /// The activity ended before the attach task ran; it never will attach.
    Abandoned,
}

#[derive(Debug)]
struct ActivityState {
    attached: bool,
    finished: bool,
}

/// A named, time-bounded unit of work.
#[derive(Debug)]
pub struct MeasuredActivity {
    name: RwLock<String>,
    start_time: u64,
    end_time: AtomicU64,
    start_thread: ThreadInfo,
    auto_instrumented: bool,
    pool: Arc<MeasurementPool>,
    state: Mutex<ActivityState>,
    attachment: watch::Sender<Attachment>,
}

impl MeasuredActivity {
    pub(crate) fn new(name: &str, auto_instrumented: bool) -> Self {
        let (attachment, _) = watch::channel(Attachment::Pending);
        Self {
            name: RwLock::new(name.to_string()),
            start_time: now_millis(),
            end_time: AtomicU64::new(0),
            start_thread: ThreadInfo::current(),
            auto_instrumented,
            pool: Arc::new(MeasurementPool::new()),
            state: Mutex::new(ActivityState {
                attached: false,
                finished: false,
            }),
            attachment,
        }
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// End time in epoch ms, zero while running.
    pub fn end_time(&self) -> u64 {
        self.end_time.load(Ordering::Acquire)
    }

    pub fn start_thread(&self) -> &ThreadInfo {
        &self.start_thread
    }

    pub fn is_auto_instrumented(&self) -> bool {
        self.auto_instrumented
    }

    pub fn measurement_pool(&self) -> &Arc<MeasurementPool> {
        &self.pool
    }

    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
    }

    pub fn attachment(&self) -> Attachment {
        *self.attachment.borrow()
    }

    /// Wait until the attach task has run. Returns true if the pool joined
    /// the root pool, false if the activity ended first.
    pub async fn wait_attached(&self) -> bool {
        let mut rx = self.attachment.subscribe();
        let attached = match rx.wait_for(|a| *a != Attachment::Pending).await {
            Ok(state) => *state == Attachment::Attached,
            Err(_) => false,
        };
        attached
    }

    /// Join the root pool unless already finished.
    pub(crate) fn attach_to(&self, root: &MeasurementPool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            self.attachment.send_replace(Attachment::Abandoned);
            return;
        }
        root.add_measurement_consumer(self.pool.clone());
        state.attached = true;
        self.attachment.send_replace(Attachment::Attached);
    }

    /// Leave the root pool and mark finished.
    pub(crate) fn finish(&self, root: &MeasurementPool) -> MeasurementResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return Err(MeasurementError::ActivityNotStarted(self.name()));
        }
        state.finished = true;
        self.end_time.store(now_millis(), Ordering::Release);

        if state.attached {
            let pool: Arc<dyn MeasurementConsumer> = self.pool.clone();
            root.remove_measurement_consumer(&pool);
            state.attached = false;
        } else {
            self.attachment.send_replace(Attachment::Abandoned);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_before_attach_never_attaches() {
        let root = MeasurementPool::new();
        let activity = MeasuredActivity::new("Main", false);

        activity.finish(&root).unwrap();
        activity.attach_to(&root);

        assert_eq!(activity.attachment(), Attachment::Abandoned);
        assert!(root.consumers().is_empty());
    }

    #[test]
    fn test_attach_then_finish_detaches() {
        let root = MeasurementPool::new();
        let activity = MeasuredActivity::new("Main", true);

        activity.attach_to(&root);
        assert!(root.has_consumer(activity.measurement_pool()));

        activity.finish(&root).unwrap();
        assert!(root.consumers().is_empty());
        assert!(activity.end_time() >= activity.start_time());
        assert!(activity.finish(&root).is_err());
    }

    #[tokio::test]
    async fn test_wait_attached_reports_outcome() {
        let root = MeasurementPool::new();

        let attached = MeasuredActivity::new("Attached", false);
        attached.attach_to(&root);
        assert!(attached.wait_attached().await);

        let abandoned = MeasuredActivity::new("Abandoned", false);
        abandoned.finish(&root).unwrap();
        assert!(!abandoned.wait_attached().await);
    }
}
