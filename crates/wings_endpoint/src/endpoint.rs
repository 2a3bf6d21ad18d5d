use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{info, warn};
use wings_contract::{DeliveryNotification, Destination, ShareRecord};
use wings_storage::ShareStore;

/// Upper bound for a single upload before it is abandoned and marked failed.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Why a single upload did not go through. Every variant ends in
/// `mark_failed`; `Unauthorized` also unlinks the endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("file missing or unreadable: {0}")]
    FileMissing(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote rejected upload: {0}")]
    Remote(String),
    #[error("credentials revoked: {0}")]
    Unauthorized(String),
    #[error("upload timed out after {0:?}")]
    TimedOut(Duration),
    #[error("unexpected upload failure: {0}")]
    Unexpected(String),
}

/// A destination family (one service) that drains its own pending records.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn endpoint_id(&self) -> u16;

    fn name(&self) -> &str;

    async fn is_linked(&self) -> bool;

    /// Forgets stored credentials. Queued records are left to the caller.
    async fn unlink(&self);

    /// Sub-destination ids this endpoint drains, linked or not.
    fn destination_ids(&self) -> Vec<u16>;

    /// The account (or equivalent) the endpoint is linked to.
    async fn linked_account_name(&self) -> Option<String>;

    async fn destination_description(&self, destination_id: u16) -> Option<String>;

    /// Checks out and uploads every pending record for this endpoint's
    /// destinations. Must not panic or fail: per-record problems are
    /// recorded with `mark_failed`.
    async fn process_share_requests(&self, store: &ShareStore) -> Vec<DeliveryNotification>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, record: &ShareRecord) -> Result<(), UploadError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub shared: usize,
    pub failed: usize,
    pub revoked: bool,
}

/// Drains one destination: checkout, upload each record under `upload_timeout`,
/// and resolve it in the store.
///
/// Once an upload reports `Unauthorized` the rest of the batch is failed
/// without being attempted and `revoked` is set, so the caller can unlink.
pub async fn process_batch(
    store: &ShareStore,
    destination: Destination,
    uploader: &dyn Uploader,
    upload_timeout: Duration,
) -> BatchReport {
    let records = store.checkout(destination).await;
    let mut report = BatchReport::default();
    if records.is_empty() {
        return report;
    }

    for record in &records {
        if report.revoked {
            store.mark_failed(record.id).await;
            report.failed += 1;
            continue;
        }

        let attempt = AssertUnwindSafe(uploader.upload(record)).catch_unwind();
        let outcome = match tokio::time::timeout(upload_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(UploadError::Unexpected("uploader panicked".to_string())),
            Err(_elapsed) => Err(UploadError::TimedOut(upload_timeout)),
        };

        match outcome {
            Ok(()) => {
                store.mark_successful(record.id).await;
                report.shared += 1;
            }
            Err(error) => {
                warn!(
                    id = %record.id,
                    destination = %destination,
                    error = %error,
                    "share upload failed"
                );
                if matches!(error, UploadError::Unauthorized(_)) {
                    report.revoked = true;
                }
                store.mark_failed(record.id).await;
                report.failed += 1;
            }
        }
    }

    info!(
        destination = %destination,
        shared = report.shared,
        failed = report.failed,
        revoked = report.revoked,
        "share batch processed"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use tempfile::TempDir;
    use wings_contract::ShareState;

    use super::*;
    use crate::testing;

    const DEST: Destination = Destination::new(4, 0);

    struct Scripted {
        outcomes: Mutex<Vec<Result<(), UploadError>>>,
    }

    #[async_trait]
    impl Uploader for Scripted {
        async fn upload(&self, _record: &ShareRecord) -> Result<(), UploadError> {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Uploader for Hangs {
        async fn upload(&self, _record: &ShareRecord) -> Result<(), UploadError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Uploader for Panics {
        async fn upload(&self, _record: &ShareRecord) -> Result<(), UploadError> {
            panic!("upload exploded");
        }
    }

    #[tokio::test]
    async fn every_failure_kind_is_recorded_as_failed() {
        let dir = TempDir::new().unwrap();
        let store = testing::store(&dir).await;
        for name in ["a", "b", "c", "d"] {
            store
                .create(Path::new(&format!("/photos/{name}.jpg")), DEST)
                .await
                .unwrap();
        }

        let uploader = Scripted {
            outcomes: Mutex::new(vec![
                Ok(()),
                Err(UploadError::FileMissing("gone".into())),
                Err(UploadError::Transport("reset".into())),
                Err(UploadError::Remote("503".into())),
            ]),
        };

        let report = process_batch(&store, DEST, &uploader, DEFAULT_UPLOAD_TIMEOUT).await;
        assert_eq!(report, BatchReport { shared: 1, failed: 3, revoked: false });

        let pending = store.list(Some(ShareState::Pending), 10).await;
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|record| record.fail_count == 1));
        assert_eq!(store.counts().await.processed, 1);
    }

    #[tokio::test]
    async fn revoked_credentials_fail_the_rest_of_the_batch() {
        let dir = TempDir::new().unwrap();
        let store = testing::store(&dir).await;
        for name in ["a", "b", "c"] {
            store
                .create(Path::new(&format!("/photos/{name}.jpg")), DEST)
                .await
                .unwrap();
        }

        let uploader = Scripted {
            outcomes: Mutex::new(vec![Err(UploadError::Unauthorized("token expired".into()))]),
        };

        let report = process_batch(&store, DEST, &uploader, DEFAULT_UPLOAD_TIMEOUT).await;
        assert_eq!(report, BatchReport { shared: 0, failed: 3, revoked: true });
        assert_eq!(store.counts().await.pending, 3);
    }

    #[tokio::test]
    async fn stalled_upload_times_out() {
        let dir = TempDir::new().unwrap();
        let store = testing::store(&dir).await;
        let id = store.create(Path::new("/photos/a.jpg"), DEST).await.unwrap();

        let report = process_batch(&store, DEST, &Hangs, Duration::from_millis(20)).await;
        assert_eq!(report.failed, 1);

        let record = store.get(id).await.unwrap();
        assert_eq!(record.state, ShareState::Pending);
        assert_eq!(record.fail_count, 1);
    }

    #[tokio::test]
    async fn panicking_uploader_is_contained() {
        let dir = TempDir::new().unwrap();
        let store = testing::store(&dir).await;
        store.create(Path::new("/photos/a.jpg"), DEST).await.unwrap();

        let report = process_batch(&store, DEST, &Panics, DEFAULT_UPLOAD_TIMEOUT).await;
        assert_eq!(report.failed, 1);
        assert_eq!(store.counts().await.processing, 0);
    }

    #[tokio::test]
    async fn empty_destination_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = testing::store(&dir).await;

        let report = process_batch(&store, DEST, &Panics, DEFAULT_UPLOAD_TIMEOUT).await;
        assert_eq!(report, BatchReport::default());
    }
}
