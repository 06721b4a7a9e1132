//! The queue transport primitive the channels are layered on.

use crate::error::TransportError;
use crate::message::{Envelope, MessageId, QueueName, QueueRef, Timestamp, TransactionId};
use async_trait::async_trait;

/// Enqueue/dequeue primitive with optional transactions and lookup by
/// correlation id.
///
/// Sends made inside a transaction become visible when it commits. Receives
/// made inside a transaction take the envelope off the queue immediately and
/// put it back at the front if the transaction rolls back.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Check whether a queue with this name exists
    async fn exists(&self, queue: &QueueName) -> Result<bool, TransportError>;

    /// Create a queue; fails with `QueueAlreadyExists` if one is present
    async fn create(&self, queue: &QueueName, transactional: bool) -> Result<(), TransportError>;

    /// Reference an existing queue with its actual mode
    async fn open(&self, queue: &QueueName) -> Result<QueueRef, TransportError>;

    /// Remove a queue and everything in it
    async fn delete(&self, queue: &QueueName) -> Result<(), TransportError>;

    /// Enqueue an envelope, returning the identity the transport assigned
    async fn send(
        &self,
        queue: &QueueRef,
        envelope: &Envelope,
        transaction: Option<&TransactionId>,
    ) -> Result<(MessageId, Timestamp), TransportError>;

    /// Dequeue the envelope at the front of the queue, if any
    async fn receive(
        &self,
        queue: &QueueRef,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<Envelope>, TransportError>;

    /// Dequeue the envelope whose correlation id matches.
    ///
    /// Fails with `CorrelationNotFound` when no such envelope is queued.
    async fn receive_by_correlation(
        &self,
        queue: &QueueRef,
        correlation_id: &MessageId,
    ) -> Result<Envelope, TransportError>;

    /// Start a unit of work
    async fn begin_transaction(&self) -> Result<TransactionId, TransportError>;

    /// Make the unit of work's sends visible and its receives final
    async fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError>;

    /// Discard the unit of work's sends and return its receives to their queues
    async fn rollback(&self, transaction: &TransactionId) -> Result<(), TransportError>;

    /// Short name used in logs
    fn transport_name(&self) -> &'static str;
}

/// Check that transaction usage matches the queue's mode
pub(crate) fn check_transaction_mode(
    queue: &QueueRef,
    transactional_queue: bool,
    transaction: Option<&TransactionId>,
) -> Result<(), TransportError> {
    match (transactional_queue, transaction) {
        (true, None) => Err(TransportError::TransactionalMismatch {
            queue_name: queue.name().to_string(),
            message: "transactional queue requires a transaction".to_string(),
        }),
        (false, Some(_)) => Err(TransportError::TransactionalMismatch {
            queue_name: queue.name().to_string(),
            message: "non-transactional queue cannot take part in a transaction".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Send outside any caller transaction.
///
/// A transactional queue gets a single-envelope transaction of its own.
pub(crate) async fn send_standalone(
    transport: &dyn QueueTransport,
    queue: &QueueRef,
    envelope: &Envelope,
) -> Result<(MessageId, Timestamp), TransportError> {
    if !queue.is_transactional() {
        return transport.send(queue, envelope, None).await;
    }

    let transaction = transport.begin_transaction().await?;
    match transport.send(queue, envelope, Some(&transaction)).await {
        Ok(identity) => {
            transport.commit(&transaction).await?;
            Ok(identity)
        }
        Err(e) => {
            // The send error is the one worth reporting
            let _ = transport.rollback(&transaction).await;
            Err(e)
        }
    }
}

/// Receive outside any caller transaction.
///
/// A transactional queue is read inside a single-receive transaction that is
/// committed straight away.
pub(crate) async fn receive_standalone(
    transport: &dyn QueueTransport,
    queue: &QueueRef,
) -> Result<Option<Envelope>, TransportError> {
    if !queue.is_transactional() {
        return transport.receive(queue, None).await;
    }

    let transaction = transport.begin_transaction().await?;
    match transport.receive(queue, Some(&transaction)).await {
        Ok(envelope) => {
            transport.commit(&transaction).await?;
            Ok(envelope)
        }
        Err(e) => {
            let _ = transport.rollback(&transaction).await;
            Err(e)
        }
    }
}
