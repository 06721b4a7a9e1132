//! Serving side of the request/response pattern.

use crate::error::ChannelError;
use crate::message::{Envelope, MessageId, QueueRef, ReadFilter};
use crate::provisioner::{queue_name_argument, QueueProvisioner};
use crate::transport::{receive_standalone, send_standalone, QueueTransport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "responder_tests.rs"]
mod tests;

/// Takes requests off a request queue and answers them.
///
/// The request queue is read with [`ReadFilter::All`] so every request shows
/// where its reply should go.
pub struct Responder {
    transport: Arc<dyn QueueTransport>,
    request_queue: QueueRef,
}

impl Responder {
    pub async fn new(
        transport: Arc<dyn QueueTransport>,
        request_queue_name: &str,
    ) -> Result<Self, ChannelError> {
        let name = queue_name_argument("request_queue_name", request_queue_name)?;
        let request_queue = QueueProvisioner::new(transport.clone())
            .ensure(&name, false)
            .await?
            .with_read_filter(ReadFilter::All);

        Ok(Self {
            transport,
            request_queue,
        })
    }

    pub fn request_queue(&self) -> &QueueRef {
        &self.request_queue
    }

    /// Take the next request, if one is waiting
    pub async fn next_request(&self) -> Result<Option<Envelope>, ChannelError> {
        let request = receive_standalone(self.transport.as_ref(), &self.request_queue).await?;
        if let Some(request) = &request {
            debug!(
                queue = %self.request_queue,
                message_id = ?request.id(),
                "Request taken"
            );
        }
        Ok(request)
    }

    /// Answer `request` with `body`.
    ///
    /// The reply goes to the request's reply destination with its
    /// correlation id set to the request's id.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the request has no id or no reply destination.
    pub async fn reply(
        &self,
        request: &Envelope,
        body: impl Into<Bytes>,
    ) -> Result<MessageId, ChannelError> {
        let request_id = request.id().ok_or_else(|| {
            ChannelError::invalid_argument("request", "request has not been sent")
        })?;
        let reply_to = request.response_queue().ok_or_else(|| {
            ChannelError::invalid_argument(
                "request",
                format!("request {} has no reply destination", request_id),
            )
        })?;

        let reply = Envelope::new(body)
            .with_correlation_id(request_id.clone())
            .with_persistence(request.persistent);
        let (reply_id, _) = send_standalone(self.transport.as_ref(), reply_to, &reply).await?;

        info!(
            response_queue = %reply_to,
            request_id = %request_id,
            message_id = %reply_id,
            "Reply sent"
        );
        Ok(reply_id)
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("request_queue", &self.request_queue)
            .finish()
    }
}
