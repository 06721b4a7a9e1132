//! In-memory queue transport for testing and single-process use.
//!
//! This module provides a fully functional in-memory transport that:
//! - Honours queue modes and transactional visibility
//! - Supports consuming lookup by correlation id
//! - Simulates a transport restart to exercise the persistence flag
//! - Provides thread-safe concurrent access

use crate::error::TransportError;
use crate::message::{Envelope, MessageId, QueueName, QueueRef, Timestamp, TransactionId};
use crate::transport::{check_transaction_mode, QueueTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues and open transactions
#[derive(Default)]
struct TransportStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    transactions: HashMap<TransactionId, PendingWork>,
}

/// Internal state for a single queue
struct InMemoryQueue {
    transactional: bool,
    /// FIFO order
    envelopes: VecDeque<Envelope>,
}

/// Work staged by an open transaction
#[derive(Default)]
struct PendingWork {
    sends: Vec<(QueueName, Envelope)>,
    receives: Vec<(QueueName, Envelope)>,
}

impl TransportStorage {
    fn queue(&self, name: &QueueName) -> Result<&InMemoryQueue, TransportError> {
        self.queues
            .get(name)
            .ok_or_else(|| TransportError::queue_not_found(name))
    }

    fn queue_mut(&mut self, name: &QueueName) -> Result<&mut InMemoryQueue, TransportError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| TransportError::queue_not_found(name))
    }

    fn pending_mut(&mut self, id: &TransactionId) -> Result<&mut PendingWork, TransportError> {
        self.transactions
            .get_mut(id)
            .ok_or_else(|| TransportError::TransactionNotFound {
                transaction_id: id.to_string(),
            })
    }

    /// Put received envelopes back at the front of their queues, oldest first
    fn restore_receives(&mut self, receives: Vec<(QueueName, Envelope)>) {
        for (queue_name, envelope) in receives.into_iter().rev() {
            // A queue deleted meanwhile takes its envelopes with it
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.envelopes.push_front(envelope);
            }
        }
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    storage: Arc<RwLock<TransportStorage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TransportStorage>, TransportError> {
        self.storage.read().map_err(|_| TransportError::Internal {
            message: "in-memory storage lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TransportStorage>, TransportError> {
        self.storage.write().map_err(|_| TransportError::Internal {
            message: "in-memory storage lock poisoned".to_string(),
        })
    }

    /// Number of envelopes currently visible in a queue
    pub fn depth(&self, queue: &QueueName) -> Result<usize, TransportError> {
        Ok(self.read()?.queue(queue)?.envelopes.len())
    }

    /// Behave as if the transport process had restarted.
    ///
    /// Open transactions are rolled back and forgotten, then every envelope
    /// not marked persistent is discarded.
    pub fn simulate_restart(&self) -> Result<(), TransportError> {
        let mut storage = self.write()?;

        let pending: Vec<PendingWork> = storage.transactions.drain().map(|(_, w)| w).collect();
        for work in pending {
            storage.restore_receives(work.receives);
        }

        let mut discarded = 0usize;
        for queue in storage.queues.values_mut() {
            let before = queue.envelopes.len();
            queue.envelopes.retain(|envelope| envelope.persistent);
            discarded += before - queue.envelopes.len();
        }

        debug!(discarded = discarded, "In-memory transport restarted");
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn exists(&self, queue: &QueueName) -> Result<bool, TransportError> {
        Ok(self.read()?.queues.contains_key(queue))
    }

    async fn create(&self, queue: &QueueName, transactional: bool) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        if storage.queues.contains_key(queue) {
            return Err(TransportError::QueueAlreadyExists {
                queue_name: queue.to_string(),
            });
        }

        storage.queues.insert(
            queue.clone(),
            InMemoryQueue {
                transactional,
                envelopes: VecDeque::new(),
            },
        );
        Ok(())
    }

    async fn open(&self, queue: &QueueName) -> Result<QueueRef, TransportError> {
        let storage = self.read()?;
        let stored = storage.queue(queue)?;
        Ok(QueueRef::new(queue.clone(), stored.transactional))
    }

    async fn delete(&self, queue: &QueueName) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        storage
            .queues
            .remove(queue)
            .map(|_| ())
            .ok_or_else(|| TransportError::queue_not_found(queue))
    }

    async fn send(
        &self,
        queue: &QueueRef,
        envelope: &Envelope,
        transaction: Option<&TransactionId>,
    ) -> Result<(MessageId, Timestamp), TransportError> {
        let mut storage = self.write()?;
        let transactional = storage.queue(queue.name())?.transactional;
        check_transaction_mode(queue, transactional, transaction)?;

        let id = MessageId::new();
        let sent_at = Timestamp::now();
        let mut stored = envelope.clone();
        stored.assign_identity(id.clone(), sent_at.clone());

        match transaction {
            Some(tx) => storage
                .pending_mut(tx)?
                .sends
                .push((queue.name().clone(), stored)),
            None => storage
                .queue_mut(queue.name())?
                .envelopes
                .push_back(stored),
        }

        Ok((id, sent_at))
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<Envelope>, TransportError> {
        let mut storage = self.write()?;
        let transactional = storage.queue(queue.name())?.transactional;
        check_transaction_mode(queue, transactional, transaction)?;

        if let Some(tx) = transaction {
            // Fail before dequeuing so an unknown transaction loses nothing
            storage.pending_mut(tx)?;
        }

        let Some(envelope) = storage.queue_mut(queue.name())?.envelopes.pop_front() else {
            return Ok(None);
        };

        if let Some(tx) = transaction {
            storage
                .pending_mut(tx)?
                .receives
                .push((queue.name().clone(), envelope.clone()));
        }

        Ok(Some(envelope.filtered(queue.read_filter())))
    }

    async fn receive_by_correlation(
        &self,
        queue: &QueueRef,
        correlation_id: &MessageId,
    ) -> Result<Envelope, TransportError> {
        let mut storage = self.write()?;
        let stored = storage.queue_mut(queue.name())?;

        let position = stored
            .envelopes
            .iter()
            .position(|envelope| envelope.correlation_id.as_ref() == Some(correlation_id))
            .ok_or_else(|| TransportError::CorrelationNotFound {
                queue_name: queue.name().to_string(),
                correlation_id: correlation_id.clone(),
            })?;

        let envelope = stored
            .envelopes
            .remove(position)
            .ok_or_else(|| TransportError::Internal {
                message: "correlated envelope vanished under lock".to_string(),
            })?;

        Ok(envelope.filtered(queue.read_filter()))
    }

    async fn begin_transaction(&self) -> Result<TransactionId, TransportError> {
        let id = TransactionId::new();
        self.write()?
            .transactions
            .insert(id.clone(), PendingWork::default());
        Ok(id)
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        let work = storage.transactions.remove(transaction).ok_or_else(|| {
            TransportError::TransactionNotFound {
                transaction_id: transaction.to_string(),
            }
        })?;

        for (queue_name, envelope) in work.sends {
            // Queues deleted before commit silently lose their staged sends
            if let Some(queue) = storage.queues.get_mut(&queue_name) {
                queue.envelopes.push_back(envelope);
            }
        }

        Ok(())
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        let work = storage.transactions.remove(transaction).ok_or_else(|| {
            TransportError::TransactionNotFound {
                transaction_id: transaction.to_string(),
            }
        })?;

        storage.restore_receives(work.receives);
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "in-memory"
    }
}
