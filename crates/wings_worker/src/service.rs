use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wings_contract::Destination;
use wings_storage::ShareStore;

use crate::processor::QueueProcessor;

pub type WorkerTask = JoinHandle<()>;

/// Wakes the worker. At most one wake-up is ever queued, so a burst of
/// kicks while a cycle runs collapses into a single follow-up cycle.
#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

pub fn trigger_channel() -> (Trigger, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, TriggerReceiver { rx })
}

impl Trigger {
    /// Returns `false` when a wake-up was already pending or the worker is gone.
    pub fn kick(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("worker trigger already pending");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("worker trigger closed");
                false
            }
        }
    }
}

impl TriggerReceiver {
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Inbound surface of the queue: enqueue, unlink, kicks.
///
/// Owns the single worker task; cycles never overlap because only that
/// task calls `run_cycle`.
pub struct Wings {
    processor: Arc<QueueProcessor>,
    trigger: Trigger,
    shutdown: watch::Sender<bool>,
}

impl Wings {
    pub fn start(
        processor: Arc<QueueProcessor>,
        trigger: Trigger,
        triggers: TriggerReceiver,
    ) -> (Self, WorkerTask) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(processor.clone(), triggers, shutdown_rx));
        info!(endpoints = processor.endpoints().len(), "wings worker started");

        (
            Self {
                processor,
                trigger,
                shutdown,
            },
            worker,
        )
    }

    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    pub fn store(&self) -> &ShareStore {
        self.processor.store()
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn kick(&self) -> bool {
        self.trigger.kick()
    }

    /// Persists a share request and wakes the worker. `false` means the
    /// request was not stored.
    pub async fn enqueue(&self, file_path: &Path, destination: Destination) -> bool {
        let Some(id) = self.store().create(file_path, destination).await else {
            return false;
        };
        info!(id = %id, destination = %destination, "share request enqueued");
        self.kick();
        true
    }

    /// Drops every queued request for `destination` and unlinks its endpoint.
    pub async fn unlink_destination(&self, destination: Destination) -> u64 {
        let deleted = self.store().delete_by_destination(destination).await;
        match self.processor.endpoint(destination.endpoint_id) {
            Some(endpoint) => endpoint.unlink().await,
            None => warn!(destination = %destination, "no endpoint registered for destination"),
        }
        deleted
    }

    /// Delayed kick, used once after boot.
    pub fn kick_after(&self, delay: Duration) -> JoinHandle<()> {
        let trigger = self.trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.kick();
        })
    }

    /// Stops the worker after any in-flight cycle completes.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_worker(
    processor: Arc<QueueProcessor>,
    mut triggers: TriggerReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = triggers.recv() => match received {
                Some(()) => {
                    processor.run_cycle().await;
                }
                None => break,
            },
        }
    }
    info!("wings worker stopped");
}
