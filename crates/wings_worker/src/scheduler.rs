use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::service::Trigger;

/// Asks the host to run the worker again at a wall-clock time.
pub trait Scheduler: Send + Sync {
    fn trigger_worker_at(&self, at: DateTime<Utc>);
}

/// In-process alarm. A new request replaces the pending one.
#[derive(Debug)]
pub struct TokioScheduler {
    trigger: Trigger,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            pending: Mutex::new(None),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn trigger_worker_at(&self, at: DateTime<Utc>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(at = %at, error = %err, "no runtime to schedule worker trigger");
                return;
            }
        };

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let trigger = self.trigger.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.kick();
        });

        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
        debug!(at = %at, delay_ms = delay.as_millis() as u64, "worker trigger scheduled");
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let pending = self
            .pending
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}

/// Keeps every request for inspection.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<DateTime<Utc>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<DateTime<Utc>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.requests().last().copied()
    }
}

impl Scheduler for RecordingScheduler {
    fn trigger_worker_at(&self, at: DateTime<Utc>) {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(at);
    }
}
