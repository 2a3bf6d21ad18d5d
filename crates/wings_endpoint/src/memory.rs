use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use wings_contract::{DeliveryNotification, Destination, ShareRecord};
use wings_storage::ShareStore;

use crate::endpoint::{process_batch, Endpoint, UploadError, Uploader, DEFAULT_UPLOAD_TIMEOUT};

/// What the in-memory endpoint does with the next upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail(UploadError),
    /// Never completes; the batch timeout decides.
    Hang,
    Panic,
}

/// Endpoint that keeps everything in process. Used by tests and dry runs.
#[derive(Debug)]
pub struct InMemoryEndpoint {
    endpoint_id: u16,
    name: String,
    destinations: Vec<u16>,
    upload_timeout: Duration,
    linked: AtomicBool,
    unlinks: AtomicUsize,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Mutex<Behavior>,
    uploaded: Mutex<Vec<(Destination, PathBuf)>>,
}

impl InMemoryEndpoint {
    pub fn new(endpoint_id: u16, name: impl Into<String>, destinations: Vec<u16>) -> Self {
        Self {
            endpoint_id,
            name: name.into(),
            destinations,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            linked: AtomicBool::new(true),
            unlinks: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Behavior::Succeed),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_upload_timeout(mut self, upload_timeout: Duration) -> Self {
        self.upload_timeout = upload_timeout;
        self
    }

    pub fn unlinked(self) -> Self {
        self.linked.store(false, Ordering::SeqCst);
        self
    }

    /// Queues behaviours consumed one per upload, ahead of the fallback.
    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        lock(&self.script).extend(behaviors);
    }

    /// Behaviour used once the script runs dry.
    pub fn set_fallback(&self, behavior: Behavior) {
        *lock(&self.fallback) = behavior;
    }

    pub fn link(&self) {
        self.linked.store(true, Ordering::SeqCst);
    }

    pub fn uploaded(&self) -> Vec<(Destination, PathBuf)> {
        lock(&self.uploaded).clone()
    }

    pub fn unlink_count(&self) -> usize {
        self.unlinks.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> Behavior {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.fallback).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Uploader for InMemoryEndpoint {
    async fn upload(&self, record: &ShareRecord) -> Result<(), UploadError> {
        match self.next_behavior() {
            Behavior::Succeed => {
                lock(&self.uploaded).push((record.destination, record.file_path.clone()));
                Ok(())
            }
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::Panic => panic!("scripted upload panic for {}", record.id),
        }
    }
}

#[async_trait]
impl Endpoint for InMemoryEndpoint {
    fn endpoint_id(&self) -> u16 {
        self.endpoint_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    async fn unlink(&self) {
        self.linked.store(false, Ordering::SeqCst);
        self.unlinks.fetch_add(1, Ordering::SeqCst);
    }

    fn destination_ids(&self) -> Vec<u16> {
        self.destinations.clone()
    }

    async fn linked_account_name(&self) -> Option<String> {
        self.is_linked()
            .await
            .then(|| format!("{}@memory", self.name.to_lowercase()))
    }

    async fn destination_description(&self, destination_id: u16) -> Option<String> {
        if !self.is_linked().await || !self.destinations.contains(&destination_id) {
            return None;
        }
        Some(format!("{} #{destination_id}", self.name))
    }

    async fn process_share_requests(&self, store: &ShareStore) -> Vec<DeliveryNotification> {
        let mut notifications = Vec::new();
        for &destination_id in &self.destinations {
            let destination = Destination::new(self.endpoint_id, destination_id);
            let report = process_batch(store, destination, self, self.upload_timeout).await;

            if report.shared > 0 {
                notifications.push(DeliveryNotification::shared(
                    destination,
                    &self.name,
                    &format!("{} #{destination_id}", self.name),
                    report.shared,
                    None,
                ));
            }
            if report.revoked {
                self.unlink().await;
                break;
            }
        }
        notifications
    }
}
