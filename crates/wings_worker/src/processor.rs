use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wings_contract::{DeliveryNotification, RetryState};
use wings_endpoint::Endpoint;
use wings_storage::ShareStore;

use crate::notifier::Notifier;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::wake::{WakeGuard, WakeHold};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointRegistryError {
    #[error("endpoint id {0} is registered more than once")]
    DuplicateEndpoint(u16),
}

/// What one drain cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    /// Records found in `Processing` at the start and reset to `Pending`.
    pub recovered: u64,
    pub notifications: Vec<DeliveryNotification>,
    /// Records left after purge; `None` when purge itself failed.
    pub remaining: Option<u64>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub panicked: bool,
}

impl CycleOutcome {
    pub fn rescheduled(&self) -> bool {
        self.next_run_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    pub retry: RetryState,
}

pub struct QueueProcessor {
    store: ShareStore,
    endpoints: Vec<Arc<dyn Endpoint>>,
    policy: RetryPolicy,
    scheduler: Arc<dyn Scheduler>,
    wake: Arc<dyn WakeHold>,
    notifier: Arc<dyn Notifier>,
}

impl QueueProcessor {
    pub fn new(
        store: ShareStore,
        endpoints: Vec<Arc<dyn Endpoint>>,
        policy: RetryPolicy,
        scheduler: Arc<dyn Scheduler>,
        wake: Arc<dyn WakeHold>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EndpointRegistryError> {
        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.endpoint_id()) {
                return Err(EndpointRegistryError::DuplicateEndpoint(endpoint.endpoint_id()));
            }
        }

        Ok(Self {
            store,
            endpoints,
            policy,
            scheduler,
            wake,
            notifier,
        })
    }

    pub fn store(&self) -> &ShareStore {
        &self.store
    }

    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, endpoint_id: u16) -> Option<&Arc<dyn Endpoint>> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.endpoint_id() == endpoint_id)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Recovers stuck records, lets every linked endpoint process its
    /// queue, purges, then resets or advances the backoff. The wake hold is
    /// taken once and covers the whole cycle.
    ///
    /// Any panic below this point counts as a failed cycle and reschedules.
    pub async fn run_cycle(&self) -> CycleReport {
        let _wake = WakeGuard::acquire(self.wake.clone());
        let mut outcome = CycleOutcome::default();

        let purged = AssertUnwindSafe(self.process_endpoints(&mut outcome))
            .catch_unwind()
            .await;
        outcome.remaining = match purged {
            Ok(remaining) => remaining,
            Err(_panic) => {
                error!("drain cycle panicked");
                outcome.panicked = true;
                None
            }
        };

        let retry = self.settle_backoff(&mut outcome).await;

        info!(
            recovered = outcome.recovered,
            notifications = outcome.notifications.len(),
            remaining = ?outcome.remaining,
            next_run_at = ?outcome.next_run_at,
            consecutive_failures = retry.consecutive_failures,
            panicked = outcome.panicked,
            "drain cycle finished"
        );
        CycleReport { outcome, retry }
    }

    /// The counter is read and bumped in the store at this point, so a
    /// request created while endpoints were running still resets it.
    async fn settle_backoff(&self, outcome: &mut CycleOutcome) -> RetryState {
        if outcome.remaining == Some(0) && !outcome.panicked {
            if !self.store.reset_retry_state().await {
                warn!("retry state reset not persisted");
            }
            debug!("queue drained, backoff reset");
            return RetryState::default();
        }

        let mut retry = match self.store.increment_retry_state().await {
            Some(previous) => previous,
            None => {
                warn!("retry state unavailable, rescheduling without backoff");
                RetryState::default()
            }
        };
        let delay = self.policy.increment_and_get_time(&mut retry);
        let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        let next_run_at = self
            .store
            .now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.scheduler.trigger_worker_at(next_run_at);
        outcome.next_run_at = Some(next_run_at);
        retry
    }

    async fn process_endpoints(&self, outcome: &mut CycleOutcome) -> Option<u64> {
        outcome.recovered = self.store.reset_stuck().await;

        for endpoint in &self.endpoints {
            if !endpoint.is_linked().await {
                debug!(endpoint = %endpoint.name(), "endpoint not linked, skipping");
                continue;
            }

            let processed = AssertUnwindSafe(endpoint.process_share_requests(&self.store))
                .catch_unwind()
                .await;
            match processed {
                Ok(notifications) => {
                    for notification in notifications {
                        self.notifier.dispatch(&notification);
                        outcome.notifications.push(notification);
                    }
                }
                Err(_panic) => {
                    error!(
                        endpoint = %endpoint.name(),
                        endpoint_id = endpoint.endpoint_id(),
                        "endpoint panicked while processing share requests"
                    );
                    outcome.panicked = true;
                }
            }
        }

        self.store.purge().await
    }
}
