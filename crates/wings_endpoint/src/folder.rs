use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use wings_contract::{DeliveryNotification, Destination, ShareRecord};
use wings_storage::ShareStore;

use crate::endpoint::{process_batch, Endpoint, UploadError, Uploader};

#[derive(Debug, Clone)]
pub struct FolderEndpointConfig {
    pub endpoint_id: u16,
    pub name: String,
    /// Where the link is remembered between restarts.
    pub link_state_path: PathBuf,
    /// One destination per entry, `destination_id` is the index. Empty means
    /// a single destination (id 0) writing into the linked root.
    pub subfolders: Vec<String>,
    pub upload_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderLink {
    pub root: PathBuf,
    pub linked_at: DateTime<Utc>,
}

/// What `link_state_path` holds. A missing file means the endpoint was never
/// linked; an explicit unlink is remembered so it outlives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum LinkRecord {
    Linked(FolderLink),
    Unlinked { unlinked_at: DateTime<Utc> },
}

/// Shares into a linked directory (a mounted drive, a synced cloud folder).
///
/// The link plays the role of an account credential: losing access to the
/// root mid-batch is treated like a revoked token.
pub struct FolderEndpoint {
    config: FolderEndpointConfig,
    state: RwLock<Option<LinkRecord>>,
}

struct FolderUploader<'a> {
    root: &'a Path,
    target: PathBuf,
}

impl FolderEndpoint {
    pub async fn open(config: FolderEndpointConfig) -> Result<Self> {
        let state = match tokio::fs::read_to_string(&config.link_state_path).await {
            Ok(raw) => Some(serde_json::from_str::<LinkRecord>(&raw).with_context(|| {
                format!("invalid link state {}", config.link_state_path.display())
            })?),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read {}", config.link_state_path.display())
                })
            }
        };

        Ok(Self {
            config,
            state: RwLock::new(state),
        })
    }

    pub async fn link(&self, root: &Path) -> Result<()> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("failed to create {}", root.display()))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("failed to resolve {}", root.display()))?;

        let shown = root.display().to_string();
        let record = LinkRecord::Linked(FolderLink {
            root,
            linked_at: Utc::now(),
        });
        self.persist(&record).await?;
        info!(endpoint = %self.config.name, root = %shown, "folder endpoint linked");
        *self.state.write().await = Some(record);
        Ok(())
    }

    /// Links to `root` only when no link state was ever recorded. An
    /// endpoint the user unlinked stays unlinked. Returns whether it linked.
    pub async fn seed_link(&self, root: &Path) -> Result<bool> {
        if self.state.read().await.is_some() {
            return Ok(false);
        }
        self.link(root).await?;
        Ok(true)
    }

    pub async fn current_link(&self) -> Option<FolderLink> {
        match self.state.read().await.as_ref() {
            Some(LinkRecord::Linked(link)) => Some(link.clone()),
            _ => None,
        }
    }

    async fn persist(&self, record: &LinkRecord) -> Result<()> {
        let serialized = serde_json::to_string_pretty(record).context("serialize folder link")?;
        if let Some(parent) = self.config.link_state_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.config.link_state_path, serialized)
            .await
            .with_context(|| format!("failed writing {}", self.config.link_state_path.display()))
    }

    pub fn destinations(&self) -> Vec<Destination> {
        let count = self.config.subfolders.len().max(1);
        (0..count)
            .filter_map(|index| u16::try_from(index).ok())
            .map(|destination_id| Destination::new(self.config.endpoint_id, destination_id))
            .collect()
    }

    fn subfolder(&self, destination_id: u16) -> Option<&str> {
        if self.config.subfolders.is_empty() {
            return (destination_id == 0).then_some("");
        }
        self.config
            .subfolders
            .get(usize::from(destination_id))
            .map(String::as_str)
    }
}

#[async_trait]
impl Endpoint for FolderEndpoint {
    fn endpoint_id(&self) -> u16 {
        self.config.endpoint_id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_linked(&self) -> bool {
        self.current_link().await.is_some()
    }

    async fn unlink(&self) {
        let record = LinkRecord::Unlinked {
            unlinked_at: Utc::now(),
        };
        if let Err(err) = self.persist(&record).await {
            warn!(
                endpoint = %self.config.name,
                error = %format!("{err:#}"),
                "failed to persist folder unlink"
            );
        }
        *self.state.write().await = Some(record);
        info!(endpoint = %self.config.name, "folder endpoint unlinked");
    }

    fn destination_ids(&self) -> Vec<u16> {
        self.destinations()
            .into_iter()
            .map(|destination| destination.destination_id)
            .collect()
    }

    async fn linked_account_name(&self) -> Option<String> {
        let link = self.current_link().await?;
        Some(link.root.display().to_string())
    }

    async fn destination_description(&self, destination_id: u16) -> Option<String> {
        let link = self.current_link().await?;
        let subfolder = self.subfolder(destination_id)?;
        Some(format!(
            "{} folder {}",
            self.config.name,
            link.root.join(subfolder).display()
        ))
    }

    async fn process_share_requests(&self, store: &ShareStore) -> Vec<DeliveryNotification> {
        let mut notifications = Vec::new();
        let Some(link) = self.current_link().await else {
            return notifications;
        };

        for destination in self.destinations() {
            let Some(subfolder) = self.subfolder(destination.destination_id) else {
                continue;
            };
            let uploader = FolderUploader {
                root: &link.root,
                target: link.root.join(subfolder),
            };

            let report =
                process_batch(store, destination, &uploader, self.config.upload_timeout).await;

            if report.shared > 0 {
                let location = if subfolder.is_empty() {
                    link.root.display().to_string()
                } else {
                    subfolder.to_string()
                };
                notifications.push(DeliveryNotification::shared(
                    destination,
                    &self.config.name,
                    &location,
                    report.shared,
                    Some(format!("file://{}", uploader.target.display())),
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

#[async_trait]
impl Uploader for FolderUploader<'_> {
    async fn upload(&self, record: &ShareRecord) -> Result<(), UploadError> {
        match tokio::fs::metadata(&record.file_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(UploadError::FileMissing(format!(
                    "{} is not a regular file",
                    record.file_path.display()
                )))
            }
            Err(err) => {
                return Err(UploadError::FileMissing(format!(
                    "{}: {err}",
                    record.file_path.display()
                )))
            }
        }

        if !tokio::fs::try_exists(self.root).await.unwrap_or(false) {
            return Err(UploadError::Unauthorized(format!(
                "linked folder {} is no longer reachable",
                self.root.display()
            )));
        }

        let file_name = record.file_path.file_name().ok_or_else(|| {
            UploadError::Unexpected(format!("{} has no file name", record.file_path.display()))
        })?;

        tokio::fs::create_dir_all(&self.target)
            .await
            .map_err(|err| map_io_error(&self.target, err))?;

        let destination = self.target.join(file_name);
        tokio::fs::copy(&record.file_path, &destination)
            .await
            .map_err(|err| map_io_error(&destination, err))?;
        Ok(())
    }
}

fn map_io_error(path: &Path, err: std::io::Error) -> UploadError {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            UploadError::Unauthorized(format!("{}: {err}", path.display()))
        }
        ErrorKind::NotFound => UploadError::FileMissing(format!("{}: {err}", path.display())),
        _ => UploadError::Transport(format!("{}: {err}", path.display())),
    }
}
