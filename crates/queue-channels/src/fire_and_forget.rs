//! One-way, best-effort delivery through a single queue.

use crate::error::{ChannelError, TransportError};
use crate::message::{Envelope, QueueRef, SendOutcome, TransactionId};
use crate::provisioner::{queue_name_argument, QueueProvisioner};
use crate::transaction::TransactionScope;
use crate::transport::QueueTransport;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "fire_and_forget_tests.rs"]
mod tests;

/// Construction options for [`FireAndForgetChannel`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Mark sent envelopes to survive a transport restart
    pub persistent: bool,
    /// Fail construction when an existing queue has a different mode
    pub strict_mode_check: bool,
}

impl ChannelOptions {
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn strict_mode_check(mut self, strict: bool) -> Self {
        self.strict_mode_check = strict;
        self
    }
}

/// Sends or receives single payloads through one queue.
///
/// A transactional channel requires an open [`TransactionScope`] for every
/// send and receive. Sends to a queue that no longer exists are dropped
/// without error; receives from one report no message.
pub struct FireAndForgetChannel {
    transport: Arc<dyn QueueTransport>,
    queue: QueueRef,
    persistent: bool,
}

impl FireAndForgetChannel {
    /// Create a channel, provisioning the queue if it does not exist
    pub async fn new(
        transport: Arc<dyn QueueTransport>,
        queue_name: &str,
        transactional: bool,
    ) -> Result<Self, ChannelError> {
        Self::with_options(transport, queue_name, transactional, ChannelOptions::default()).await
    }

    pub async fn with_options(
        transport: Arc<dyn QueueTransport>,
        queue_name: &str,
        transactional: bool,
        options: ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let name = queue_name_argument("queue_name", queue_name)?;
        let queue = QueueProvisioner::new(transport.clone())
            .with_strict_mode_check(options.strict_mode_check)
            .ensure(&name, transactional)
            .await?;

        Ok(Self {
            transport,
            queue,
            persistent: options.persistent,
        })
    }

    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    /// Follows the mode the queue actually has
    pub fn is_transactional(&self) -> bool {
        self.queue.is_transactional()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// A fresh, unopened scope on this channel's transport
    pub fn transaction_scope(&self) -> TransactionScope {
        TransactionScope::new(self.transport.clone())
    }

    /// Send one payload.
    ///
    /// Returns [`SendOutcome::Dropped`] when the queue does not exist.
    ///
    /// # Errors
    ///
    /// * `TransactionRequired` - transactional channel without an open scope
    /// * `InvalidArgument` - open scope given to a non-transactional channel
    /// * `Transport` - any transport failure
    pub async fn send(
        &self,
        body: impl Into<Bytes>,
        transaction: Option<&TransactionScope>,
    ) -> Result<SendOutcome, ChannelError> {
        if !self.transport.exists(self.queue.name()).await? {
            warn!(queue = %self.queue, "Queue does not exist; message dropped");
            return Ok(SendOutcome::Dropped);
        }

        let transaction_id = self.transaction_for(transaction)?;
        let envelope = Envelope::new(body).with_persistence(self.persistent);

        match self
            .transport
            .send(&self.queue, &envelope, transaction_id)
            .await
        {
            Ok((message_id, _)) => {
                debug!(
                    queue = %self.queue,
                    message_id = %message_id,
                    persistent = self.persistent,
                    "Message sent"
                );
                Ok(SendOutcome::Sent(message_id))
            }
            // Deleted between the existence check and the send
            Err(TransportError::QueueNotFound { .. }) => {
                warn!(queue = %self.queue, "Queue does not exist; message dropped");
                Ok(SendOutcome::Dropped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Single-shot poll for the next payload; never waits.
    ///
    /// Returns `None` if the queue is empty or does not exist.
    pub async fn receive(
        &self,
        transaction: Option<&TransactionScope>,
    ) -> Result<Option<Bytes>, ChannelError> {
        Ok(self
            .receive_envelope(transaction)
            .await?
            .map(|envelope| envelope.body))
    }

    /// Like [`receive`](Self::receive), decoding the payload as UTF-8
    pub async fn receive_text(
        &self,
        transaction: Option<&TransactionScope>,
    ) -> Result<Option<String>, ChannelError> {
        match self.receive_envelope(transaction).await? {
            Some(envelope) => Ok(Some(envelope.body_text()?.to_string())),
            None => Ok(None),
        }
    }

    /// Like [`receive`](Self::receive), returning the whole envelope
    pub async fn receive_envelope(
        &self,
        transaction: Option<&TransactionScope>,
    ) -> Result<Option<Envelope>, ChannelError> {
        if !self.transport.exists(self.queue.name()).await? {
            return Ok(None);
        }

        let transaction_id = self.transaction_for(transaction)?;

        match self.transport.receive(&self.queue, transaction_id).await {
            Ok(envelope) => {
                if let Some(envelope) = &envelope {
                    debug!(queue = %self.queue, message_id = ?envelope.id(), "Message received");
                }
                Ok(envelope)
            }
            Err(TransportError::QueueNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the transaction to use, enforcing the channel's mode
    fn transaction_for<'a>(
        &self,
        transaction: Option<&'a TransactionScope>,
    ) -> Result<Option<&'a TransactionId>, ChannelError> {
        let open = transaction.and_then(|scope| scope.transaction_id());

        match (self.is_transactional(), open) {
            (true, Some(id)) => Ok(Some(id)),
            (true, None) => Err(ChannelError::TransactionRequired {
                queue_name: self.queue.name().to_string(),
            }),
            (false, Some(_)) => Err(ChannelError::invalid_argument(
                "transaction",
                format!("queue {} is not transactional", self.queue.name()),
            )),
            (false, None) => Ok(None),
        }
    }
}

impl std::fmt::Debug for FireAndForgetChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireAndForgetChannel")
            .field("queue", &self.queue)
            .field("persistent", &self.persistent)
            .finish()
    }
}
