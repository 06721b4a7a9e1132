//! Create-if-absent provisioning of named queues.

use crate::error::{ChannelError, TransportError};
use crate::message::{QueueName, QueueRef};
use crate::transport::QueueTransport;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "provisioner_tests.rs"]
mod tests;

/// Parse a caller-supplied queue name, reporting problems as `InvalidArgument`
pub(crate) fn queue_name_argument(argument: &str, value: &str) -> Result<QueueName, ChannelError> {
    if value.trim().is_empty() {
        return Err(ChannelError::invalid_argument(argument, "queue name is required"));
    }
    QueueName::new(value).map_err(|e| ChannelError::invalid_argument(argument, e.to_string()))
}

/// Ensures queues exist before channels use them.
///
/// Provisioning is idempotent. An existing queue keeps the mode it was
/// created with; a mismatch with the requested mode is logged and, unless
/// strict checking is enabled, otherwise ignored.
#[derive(Clone)]
pub struct QueueProvisioner {
    transport: Arc<dyn QueueTransport>,
    strict_mode_check: bool,
}

impl QueueProvisioner {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            strict_mode_check: false,
        }
    }

    /// Fail with `QueueModeMismatch` instead of logging a warning
    pub fn with_strict_mode_check(mut self, strict: bool) -> Self {
        self.strict_mode_check = strict;
        self
    }

    /// Make sure `queue` exists, creating it with `transactional` if absent.
    ///
    /// Returns a reference carrying the queue's actual mode.
    pub async fn ensure(
        &self,
        queue: &QueueName,
        transactional: bool,
    ) -> Result<QueueRef, ChannelError> {
        if !self.transport.exists(queue).await? {
            match self.transport.create(queue, transactional).await {
                Ok(()) => info!(
                    queue = %queue,
                    transactional = transactional,
                    transport = self.transport.transport_name(),
                    "Created queue"
                ),
                // Lost a create race against another instance
                Err(TransportError::QueueAlreadyExists { .. }) => {
                    debug!(queue = %queue, "Queue created concurrently")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let queue_ref = self.transport.open(queue).await?;
        if queue_ref.is_transactional() != transactional {
            if self.strict_mode_check {
                return Err(ChannelError::QueueModeMismatch {
                    queue_name: queue.to_string(),
                    requested: transactional,
                    actual: queue_ref.is_transactional(),
                });
            }
            warn!(
                queue = %queue,
                requested = transactional,
                actual = queue_ref.is_transactional(),
                "Queue exists with a different transactional mode; keeping existing mode"
            );
        }

        Ok(queue_ref)
    }
}
