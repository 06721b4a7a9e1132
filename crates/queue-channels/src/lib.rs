//! # Queue Channels
//!
//! Messaging channels layered over a durable, transactional queue transport.
//!
//! This library provides:
//! - Create-if-absent queue provisioning
//! - Explicit transaction scopes for transactional queues
//! - Fire-and-forget delivery through a single queue
//! - Correlated request/response over a request and a response queue
//! - In-memory and filesystem transports
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for transports, channels and configuration
//! - [`message`] - Envelopes, queue references and identifiers
//! - [`transport`] - The transport trait the channels are built on
//! - [`transports`] - Transport implementations
//! - [`fire_and_forget`] / [`request_response`] / [`responder`] - The channels
//! - [`config`] - Configuration loading
//!
//! ## Example
//!
//! ```rust
//! use queue_channels::{Envelope, InMemoryTransport, RequestResponseChannel, Responder};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), queue_channels::ChannelError> {
//! let transport = Arc::new(InMemoryTransport::new());
//! let requester = RequestResponseChannel::new(transport.clone(), "request", "response").await?;
//! let responder = Responder::new(transport, "request").await?;
//!
//! let sent = requester.send(Envelope::new("Hello World")).await?;
//! if let Some(request) = responder.next_request().await? {
//!     responder.reply(&request, "Hello back").await?;
//! }
//!
//! if let Some(id) = sent.id() {
//!     let reply = requester.receive(id).await?;
//!     assert_eq!(reply.body_text()?, "Hello back");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fire_and_forget;
pub mod message;
pub mod poll;
pub mod provisioner;
pub mod request_response;
pub mod responder;
pub mod transaction;
pub mod transport;
pub mod transports;

pub use config::{MessagingConfig, ReplyPollSettings, TransportConfig};
pub use error::{ChannelError, ConfigurationError, TransportError, ValidationError};
pub use fire_and_forget::{ChannelOptions, FireAndForgetChannel};
pub use message::{
    Envelope, MessageId, QueueName, QueueRef, ReadFilter, SendOutcome, Timestamp, TransactionId,
};
pub use poll::ReplyPollPolicy;
pub use provisioner::QueueProvisioner;
pub use request_response::RequestResponseChannel;
pub use responder::Responder;
pub use transaction::{TransactionScope, TransactionState};
pub use transport::QueueTransport;
pub use transports::{FilesystemTransport, InMemoryTransport};

pub use tokio_util::sync::CancellationToken;
