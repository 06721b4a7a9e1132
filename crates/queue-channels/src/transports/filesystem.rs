//! # Filesystem Queue Transport
//!
//! Durable queue transport backed by a local directory tree, usable from
//! several processes at once.
//!
//! Layout under the root directory:
//!
//! ```text
//! queues/.creating-<uuid>/            queue being built, renamed into place
//! queues/<queue>/queue.json            queue descriptor (mode)
//! queues/<queue>/messages/<seq>.json   one file per visible envelope
//! transactions/<id>/sends/<queue>/     envelopes staged until commit
//! transactions/<id>/receives/<queue>/  envelopes claimed by the transaction
//! ```
//!
//! Every hand-over between those locations is a single `rename`, so a file is
//! only ever claimed by one consumer.

use crate::error::TransportError;
use crate::message::{Envelope, MessageId, QueueName, QueueRef, Timestamp, TransactionId};
use crate::transport::{check_transaction_mode, QueueTransport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;

const QUEUES_DIR: &str = "queues";
const TRANSACTIONS_DIR: &str = "transactions";
const MESSAGES_DIR: &str = "messages";
const DESCRIPTOR_FILE: &str = "queue.json";

/// Queue descriptor persisted next to the messages
#[derive(Debug, Serialize, Deserialize)]
struct QueueDescriptor {
    transactional: bool,
    created_at: Timestamp,
}

/// Filesystem-based queue transport
///
/// # Examples
///
/// ```no_run
/// use queue_channels::FilesystemTransport;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = FilesystemTransport::new(PathBuf::from("./data/queues")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemTransport {
    root: PathBuf,
    sequence: Arc<AtomicU64>,
}

impl FilesystemTransport {
    /// Create a transport rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the root cannot be created or accessed.
    pub async fn new(root: PathBuf) -> Result<Self, TransportError> {
        for dir in [root.join(QUEUES_DIR), root.join(TRANSACTIONS_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| map_io(format!("create {}", dir.display()), e))?;
        }

        Ok(Self {
            root,
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn queue_dir(&self, queue: &QueueName) -> PathBuf {
        self.root.join(QUEUES_DIR).join(queue.as_str())
    }

    fn messages_dir(&self, queue: &QueueName) -> PathBuf {
        self.queue_dir(queue).join(MESSAGES_DIR)
    }

    fn transaction_dir(&self, transaction: &TransactionId) -> PathBuf {
        self.root.join(TRANSACTIONS_DIR).join(transaction.as_str())
    }

    /// File name that sorts in enqueue order across processes
    fn next_file_name(&self) -> String {
        let nanos = Timestamp::now()
            .as_datetime()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let counter = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{:020}-{:010}-{}.json",
            nanos,
            counter,
            uuid::Uuid::new_v4().simple()
        )
    }

    async fn read_descriptor(&self, queue: &QueueName) -> Result<QueueDescriptor, TransportError> {
        let path = self.queue_dir(queue).join(DESCRIPTOR_FILE);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransportError::queue_not_found(queue))
            }
            Err(e) => return Err(map_io(format!("read {}", path.display()), e)),
        };

        serde_json::from_str(&json).map_err(|e| TransportError::Corrupted {
            message: format!("queue descriptor {}: {}", path.display(), e),
        })
    }

    async fn ensure_transaction(&self, transaction: &TransactionId) -> Result<PathBuf, TransportError> {
        let dir = self.transaction_dir(transaction);
        if fs::metadata(&dir).await.is_err() {
            return Err(TransportError::TransactionNotFound {
                transaction_id: transaction.to_string(),
            });
        }
        Ok(dir)
    }

    /// Take the oldest visible envelope by renaming it to `claim_dir`
    async fn claim_next(
        &self,
        queue: &QueueName,
        claim_dir: &Path,
    ) -> Result<Option<PathBuf>, TransportError> {
        for candidate in list_json_files(&self.messages_dir(queue)).await? {
            let Some(file_name) = candidate.file_name() else {
                continue;
            };
            let claimed = claim_dir.join(file_name);
            match fs::rename(&candidate, &claimed).await {
                Ok(()) => return Ok(Some(claimed)),
                // Another consumer won the race for this one
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(map_io(format!("claim {}", candidate.display()), e)),
            }
        }
        Ok(None)
    }

    async fn load_claimed(&self, path: &Path) -> Result<Envelope, TransportError> {
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| map_io(format!("read {}", path.display()), e))?;

        match serde_json::from_str::<Envelope>(&json) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                let quarantine = path.with_extension("corrupt");
                if let Err(rename_err) = fs::rename(path, &quarantine).await {
                    warn!(path = %path.display(), error = %rename_err, "Could not quarantine corrupted message");
                }
                Err(TransportError::Corrupted {
                    message: format!("{}: {}", path.display(), e),
                })
            }
        }
    }

    /// Lay out a complete queue directory at `dir`
    async fn build_queue_dir(&self, dir: &Path, transactional: bool) -> Result<(), TransportError> {
        fs::create_dir_all(dir.join(MESSAGES_DIR))
            .await
            .map_err(|e| map_io(format!("create {}", dir.display()), e))?;

        let descriptor = QueueDescriptor {
            transactional,
            created_at: Timestamp::now(),
        };
        let json = serde_json::to_vec_pretty(&descriptor)?;
        write_atomically(dir, &dir.join(DESCRIPTOR_FILE), &json, true).await
    }

    /// Rename a fully built queue directory into place.
    ///
    /// The queue appears together with its descriptor, so no instance ever
    /// observes a half-built queue.
    async fn publish_queue_dir(&self, queue: &QueueName, built: &Path) -> Result<(), TransportError> {
        let queue_dir = self.queue_dir(queue);
        let error = match fs::rename(built, &queue_dir).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if self.exists(queue).await? {
            return Err(TransportError::QueueAlreadyExists {
                queue_name: queue.to_string(),
            });
        }
        Err(map_io(format!("create {}", queue_dir.display()), error))
    }

    /// Move every file of `from/<queue>/` into the queue's messages directory
    async fn publish_staged(&self, from: &Path) -> Result<(), TransportError> {
        for queue_dir in list_dirs(from).await? {
            let Some(queue) = queue_dir
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| QueueName::new(n).ok())
            else {
                continue;
            };

            let target = self.messages_dir(&queue);
            if fs::metadata(&target).await.is_err() {
                debug!(queue = %queue, "Queue vanished before commit; staged envelopes discarded");
                continue;
            }

            for file in list_json_files(&queue_dir).await? {
                if let Some(file_name) = file.file_name() {
                    fs::rename(&file, target.join(file_name))
                        .await
                        .map_err(|e| map_io(format!("publish {}", file.display()), e))?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for FilesystemTransport {
    async fn exists(&self, queue: &QueueName) -> Result<bool, TransportError> {
        match self.read_descriptor(queue).await {
            Ok(_) => Ok(true),
            Err(TransportError::QueueNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, queue: &QueueName, transactional: bool) -> Result<(), TransportError> {
        if self.exists(queue).await? {
            return Err(TransportError::QueueAlreadyExists {
                queue_name: queue.to_string(),
            });
        }

        // Not a valid queue name, so never mistaken for one
        let building = self
            .root
            .join(QUEUES_DIR)
            .join(format!(".creating-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = self.build_queue_dir(&building, transactional).await {
            let _ = fs::remove_dir_all(&building).await;
            return Err(e);
        }

        let result = self.publish_queue_dir(queue, &building).await;
        if result.is_err() {
            let _ = fs::remove_dir_all(&building).await;
        }
        result
    }

    async fn open(&self, queue: &QueueName) -> Result<QueueRef, TransportError> {
        let descriptor = self.read_descriptor(queue).await?;
        Ok(QueueRef::new(queue.clone(), descriptor.transactional))
    }

    async fn delete(&self, queue: &QueueName) -> Result<(), TransportError> {
        let queue_dir = self.queue_dir(queue);
        match fs::remove_dir_all(&queue_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransportError::queue_not_found(queue)),
            Err(e) => Err(map_io(format!("delete {}", queue_dir.display()), e)),
        }
    }

    async fn send(
        &self,
        queue: &QueueRef,
        envelope: &Envelope,
        transaction: Option<&TransactionId>,
    ) -> Result<(MessageId, Timestamp), TransportError> {
        let descriptor = self.read_descriptor(queue.name()).await?;
        check_transaction_mode(queue, descriptor.transactional, transaction)?;

        let id = MessageId::new();
        let sent_at = Timestamp::now();
        let mut stored = envelope.clone();
        stored.assign_identity(id.clone(), sent_at.clone());
        let json = serde_json::to_vec(&stored)?;
        let file_name = self.next_file_name();

        let target_dir = match transaction {
            Some(tx) => {
                let dir = self
                    .ensure_transaction(tx)
                    .await?
                    .join("sends")
                    .join(queue.name().as_str());
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| map_io("create staging directory", e))?;
                dir
            }
            None => self.messages_dir(queue.name()),
        };

        let staging_dir = self.queue_dir(queue.name());
        write_atomically(
            &staging_dir,
            &target_dir.join(file_name),
            &json,
            envelope.persistent,
        )
        .await?;

        Ok((id, sent_at))
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<Envelope>, TransportError> {
        let descriptor = self.read_descriptor(queue.name()).await?;
        check_transaction_mode(queue, descriptor.transactional, transaction)?;

        let claim_dir = match transaction {
            Some(tx) => {
                let dir = self
                    .ensure_transaction(tx)
                    .await?
                    .join("receives")
                    .join(queue.name().as_str());
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| map_io("create claim directory", e))?;
                dir
            }
            None => self.queue_dir(queue.name()),
        };

        let Some(claimed) = self.claim_next(queue.name(), &claim_dir).await? else {
            return Ok(None);
        };

        let envelope = self.load_claimed(&claimed).await?;
        if transaction.is_none() {
            fs::remove_file(&claimed)
                .await
                .map_err(|e| map_io(format!("remove {}", claimed.display()), e))?;
        }

        Ok(Some(envelope.filtered(queue.read_filter())))
    }

    async fn receive_by_correlation(
        &self,
        queue: &QueueRef,
        correlation_id: &MessageId,
    ) -> Result<Envelope, TransportError> {
        // Surface a missing queue as such rather than as "not found yet"
        self.read_descriptor(queue.name()).await?;

        for candidate in list_json_files(&self.messages_dir(queue.name())).await? {
            let json = match fs::read_to_string(&candidate).await {
                Ok(json) => json,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(map_io(format!("read {}", candidate.display()), e)),
            };

            // Corrupted files are only reported to the consumer that claims them
            let Ok(envelope) = serde_json::from_str::<Envelope>(&json) else {
                continue;
            };
            if envelope.correlation_id.as_ref() != Some(correlation_id) {
                continue;
            }

            let Some(file_name) = candidate.file_name() else {
                continue;
            };
            let claimed = self.queue_dir(queue.name()).join(file_name);
            match fs::rename(&candidate, &claimed).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(map_io(format!("claim {}", candidate.display()), e)),
            }
            fs::remove_file(&claimed)
                .await
                .map_err(|e| map_io(format!("remove {}", claimed.display()), e))?;

            return Ok(envelope.filtered(queue.read_filter()));
        }

        Err(TransportError::CorrelationNotFound {
            queue_name: queue.name().to_string(),
            correlation_id: correlation_id.clone(),
        })
    }

    async fn begin_transaction(&self) -> Result<TransactionId, TransportError> {
        let id = TransactionId::new();
        let dir = self.transaction_dir(&id);
        fs::create_dir(&dir)
            .await
            .map_err(|e| map_io(format!("create {}", dir.display()), e))?;
        Ok(id)
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        let dir = self.ensure_transaction(transaction).await?;
        self.publish_staged(&dir.join("sends")).await?;

        // Claimed receives are final once the directory is gone
        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| map_io(format!("remove {}", dir.display()), e))
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        let dir = self.ensure_transaction(transaction).await?;

        // Original file names put the envelopes back in their old position
        self.publish_staged(&dir.join("receives")).await?;

        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| map_io(format!("remove {}", dir.display()), e))
    }

    fn transport_name(&self) -> &'static str {
        "filesystem"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn map_io(context: impl Into<String>, error: std::io::Error) -> TransportError {
    let context = context.into();
    match error.kind() {
        ErrorKind::PermissionDenied => TransportError::PermissionDenied { operation: context },
        _ => TransportError::io(context, error),
    }
}

/// Write to a temporary file in `staging_dir`, then rename into place
async fn write_atomically(
    staging_dir: &Path,
    target: &Path,
    contents: &[u8],
    durable: bool,
) -> Result<(), TransportError> {
    let temp_path = staging_dir.join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| map_io(format!("create {}", temp_path.display()), e))?;
    file.write_all(contents)
        .await
        .map_err(|e| map_io(format!("write {}", temp_path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| map_io(format!("flush {}", temp_path.display()), e))?;
    if durable {
        file.sync_all()
            .await
            .map_err(|e| map_io(format!("sync {}", temp_path.display()), e))?;
    }
    drop(file);

    if let Err(e) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(map_io(format!("rename into {}", target.display()), e));
    }
    Ok(())
}

/// `.json` files directly inside `dir`, oldest name first
async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, TransportError> {
    let mut files = Vec::new();
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(map_io(format!("list {}", dir.display()), e)),
    };

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| map_io(format!("list {}", dir.display()), e))?
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, TransportError> {
    let mut dirs = Vec::new();
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(map_io(format!("list {}", dir.display()), e)),
    };

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| map_io(format!("list {}", dir.display()), e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        }
    }

    Ok(dirs)
}
