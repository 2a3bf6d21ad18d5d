use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Keeps the host awake while a drain cycle runs.
pub trait WakeHold: Send + Sync {
    fn acquire(&self);
    fn release(&self);
    fn held(&self) -> bool;
}

/// Reference-counted hold: nested acquires need the same number of releases.
#[derive(Debug, Default)]
pub struct RefCountedWakeHold {
    count: AtomicUsize,
}

impl RefCountedWakeHold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl WakeHold for RefCountedWakeHold {
    fn acquire(&self) {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("wake hold acquired");
        }
    }

    fn release(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
        match previous {
            Ok(1) => debug!("wake hold released"),
            Ok(_) => {}
            Err(_) => warn!("wake hold released more often than acquired"),
        }
    }

    fn held(&self) -> bool {
        self.count() > 0
    }
}

/// Releases its hold on drop, including while unwinding.
pub struct WakeGuard {
    hold: Arc<dyn WakeHold>,
}

impl WakeGuard {
    pub fn acquire(hold: Arc<dyn WakeHold>) -> Self {
        hold.acquire();
        Self { hold }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.hold.release();
    }
}
