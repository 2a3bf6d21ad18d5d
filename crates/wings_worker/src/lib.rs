mod notifier;
mod processor;
mod retry;
mod scheduler;
mod service;
mod wake;

pub use notifier::{BroadcastNotifier, LogNotifier, Notifier};
pub use processor::{CycleOutcome, CycleReport, EndpointRegistryError, QueueProcessor};
pub use retry::RetryPolicy;
pub use scheduler::{RecordingScheduler, Scheduler, TokioScheduler};
pub use service::{trigger_channel, Trigger, TriggerReceiver, Wings, WorkerTask};
pub use wake::{RefCountedWakeHold, WakeGuard, WakeHold};
