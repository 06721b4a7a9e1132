//! Correlated request/response over two one-way queues.
//!
//! The requester sends into the request queue with its own response queue as
//! the reply destination, keeps the identifier the transport assigned, and
//! later polls the response queue for the envelope whose correlation id
//! equals that identifier.
//!
//! A correlation lookup that finds nothing is reported by the transport as
//! [`TransportError::CorrelationNotFound`](crate::TransportError::CorrelationNotFound). The reply loop treats that, and
//! only that, as "not arrived yet"; every other transport error ends the wait
//! and is returned unchanged.

use crate::error::ChannelError;
use crate::message::{Envelope, MessageId, QueueRef, ReadFilter};
use crate::poll::ReplyPollPolicy;
use crate::provisioner::{queue_name_argument, QueueProvisioner};
use crate::transport::{send_standalone, QueueTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
#[path = "request_response_tests.rs"]
mod tests;

/// Requester side of the request/response pattern.
///
/// Holds no per-request state, so one channel can have several requests
/// outstanding and wait for their replies from different tasks.
pub struct RequestResponseChannel {
    transport: Arc<dyn QueueTransport>,
    request_queue: QueueRef,
    response_queue: QueueRef,
    policy: ReplyPollPolicy,
}

impl RequestResponseChannel {
    /// Create a channel, provisioning both queues as non-transactional
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if either queue name is empty or malformed.
    pub async fn new(
        transport: Arc<dyn QueueTransport>,
        request_queue_name: &str,
        response_queue_name: &str,
    ) -> Result<Self, ChannelError> {
        Self::with_policy(
            transport,
            request_queue_name,
            response_queue_name,
            ReplyPollPolicy::default(),
        )
        .await
    }

    pub async fn with_policy(
        transport: Arc<dyn QueueTransport>,
        request_queue_name: &str,
        response_queue_name: &str,
        policy: ReplyPollPolicy,
    ) -> Result<Self, ChannelError> {
        let request_name = queue_name_argument("request_queue_name", request_queue_name)?;
        let response_name = queue_name_argument("response_queue_name", response_queue_name)?;

        let provisioner = QueueProvisioner::new(transport.clone());
        let request_queue = provisioner.ensure(&request_name, false).await?;
        // Replies are matched on correlation metadata, so read all of it
        let response_queue = provisioner
            .ensure(&response_name, false)
            .await?
            .with_read_filter(ReadFilter::All);

        Ok(Self {
            transport,
            request_queue,
            response_queue,
            policy,
        })
    }

    pub fn request_queue(&self) -> &QueueRef {
        &self.request_queue
    }

    pub fn response_queue(&self) -> &QueueRef {
        &self.response_queue
    }

    pub fn policy(&self) -> &ReplyPollPolicy {
        &self.policy
    }

    /// Send a request with this channel's response queue as reply destination.
    ///
    /// Returns the submitted envelope; its [`id`](Envelope::id) is the key
    /// for [`receive`](Self::receive).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the envelope was already sent.
    pub async fn send(&self, mut envelope: Envelope) -> Result<Envelope, ChannelError> {
        if let Some(id) = envelope.id() {
            return Err(ChannelError::invalid_argument(
                "envelope",
                format!("envelope {} has already been sent", id),
            ));
        }

        envelope.set_response_queue(QueueRef::new(
            self.response_queue.name().clone(),
            self.response_queue.is_transactional(),
        ));

        let (message_id, sent_at) =
            send_standalone(self.transport.as_ref(), &self.request_queue, &envelope).await?;
        envelope.assign_identity(message_id, sent_at);

        info!(
            request_queue = %self.request_queue,
            response_queue = %self.response_queue,
            message_id = ?envelope.id(),
            "Request sent"
        );
        Ok(envelope)
    }

    /// Wait for the reply correlated to `request_id`.
    ///
    /// Blocks until the reply arrives unless the channel's policy carries a
    /// timeout, in which case `ReceiveTimedOut` is returned once it expires.
    pub async fn receive(&self, request_id: &MessageId) -> Result<Envelope, ChannelError> {
        self.poll_reply(request_id, self.policy.timeout, None).await
    }

    /// Wait for the reply for at most `timeout`
    pub async fn receive_timeout(
        &self,
        request_id: &MessageId,
        timeout: Duration,
    ) -> Result<Envelope, ChannelError> {
        self.poll_reply(request_id, Some(timeout), None).await
    }

    /// Wait for the reply until it arrives or `cancel` fires.
    ///
    /// Cancellation is only observed between lookups, so a reply is never
    /// taken off the queue and then discarded.
    pub async fn receive_with_cancellation(
        &self,
        request_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<Envelope, ChannelError> {
        self.poll_reply(request_id, self.policy.timeout, Some(cancel))
            .await
    }

    async fn poll_reply(
        &self,
        request_id: &MessageId,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Envelope, ChannelError> {
        let started = Instant::now();
        // A timeout too large to represent is no deadline at all
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(ChannelError::ReceiveCancelled {
                    request_id: request_id.clone(),
                });
            }

            match self
                .transport
                .receive_by_correlation(&self.response_queue, request_id)
                .await
            {
                Ok(reply) => {
                    info!(
                        response_queue = %self.response_queue,
                        request_id = %request_id,
                        attempts = attempt + 1,
                        "Reply received"
                    );
                    return Ok(reply);
                }
                Err(e) if e.is_correlation_not_found() => {}
                Err(e) => return Err(e.into()),
            }

            let mut delay = self.policy.calculate_delay(attempt);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ChannelError::ReceiveTimedOut {
                        request_id: request_id.clone(),
                        waited: now - started,
                    });
                }
                delay = delay.min(deadline - now);
            }

            debug!(
                request_id = %request_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Reply not available yet"
            );
            attempt = attempt.saturating_add(1);

            self.pause(delay, cancel, request_id).await?;
        }
    }

    async fn pause(
        &self,
        delay: Duration,
        cancel: Option<&CancellationToken>,
        request_id: &MessageId,
    ) -> Result<(), ChannelError> {
        if delay.is_zero() {
            // Let a responder on the same runtime make progress
            tokio::task::yield_now().await;
            return Ok(());
        }

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ChannelError::ReceiveCancelled {
                        request_id: request_id.clone(),
                    }),
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RequestResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestResponseChannel")
            .field("request_queue", &self.request_queue)
            .field("response_queue", &self.response_queue)
            .field("policy", &self.policy)
            .finish()
    }
}
