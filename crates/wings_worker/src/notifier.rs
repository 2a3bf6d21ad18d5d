use tokio::sync::broadcast;
use tracing::{debug, info};
use wings_contract::DeliveryNotification;

/// Surfaces successful batches to the user.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notification: &DeliveryNotification);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, notification: &DeliveryNotification) {
        info!(
            id = notification.id,
            title = %notification.title,
            message = %notification.message,
            "delivery notification"
        );
    }
}

/// Fans notifications out to live subscribers, e.g. the SSE stream.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DeliveryNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryNotification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(128)
    }
}

impl Notifier for BroadcastNotifier {
    fn dispatch(&self, notification: &DeliveryNotification) {
        LogNotifier.dispatch(notification);
        if self.tx.send(notification.clone()).is_err() {
            debug!(id = notification.id, "no notification subscribers");
        }
    }
}
