//! Common test utilities for queue-channels integration tests
//!
//! This module provides:
//! - Transport fixtures (in-memory and filesystem)
//! - A background responder that answers requests the way the CLI does

use queue_channels::{
    CancellationToken, ChannelError, FilesystemTransport, InMemoryTransport, MessageId,
    QueueTransport, Responder,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const REQUEST_QUEUE: &str = "request-q";
pub const RESPONSE_QUEUE: &str = "response-q";

/// Reply body the responder produces for a request
pub fn happy_response(request_id: &MessageId) -> String {
    format!("Happy response for message {}", request_id)
}

#[allow(dead_code)]
pub fn memory_transport() -> (InMemoryTransport, Arc<dyn QueueTransport>) {
    let transport = InMemoryTransport::new();
    let shared: Arc<dyn QueueTransport> = Arc::new(transport.clone());
    (transport, shared)
}

/// Filesystem transport in a fresh directory; keep the `TempDir` alive
#[allow(dead_code)]
pub async fn filesystem_transport() -> (TempDir, Arc<dyn QueueTransport>) {
    let dir = TempDir::new().unwrap();
    let transport = FilesystemTransport::new(dir.path().to_path_buf())
        .await
        .unwrap();
    (dir, Arc::new(transport))
}

/// Answer requests on `request_queue` until `shutdown` fires
///
/// Returns the number of requests answered.
#[allow(dead_code)]
pub fn spawn_responder(
    transport: Arc<dyn QueueTransport>,
    request_queue: &'static str,
    shutdown: CancellationToken,
) -> JoinHandle<Result<usize, ChannelError>> {
    tokio::spawn(async move {
        let responder = Responder::new(transport, request_queue).await?;
        let mut answered = 0;

        while !shutdown.is_cancelled() {
            match responder.next_request().await? {
                Some(request) => {
                    if let Some(id) = request.id() {
                        responder.reply(&request, happy_response(id)).await?;
                        answered += 1;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }

        Ok(answered)
    })
}
