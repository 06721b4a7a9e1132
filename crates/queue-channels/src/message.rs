//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        // Names double as directory names for the filesystem transport
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Transport-assigned identifier of an envelope.
///
/// A reply carries the identifier of its request as its correlation id, so
/// the same type serves both purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque handle of a transport-level unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S%.6f"))
    }
}

// ============================================================================
// Queue References
// ============================================================================

/// Which envelope properties a receive populates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadFilter {
    /// Body, identifier, correlation id, persistence flag and send time
    #[default]
    Standard,
    /// Everything in `Standard` plus the reply destination
    All,
}

impl ReadFilter {
    pub fn includes_response_queue(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// Reference to a provisioned queue.
///
/// The transactional flag is the queue's mode as reported by the transport;
/// it is fixed when the queue is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRef {
    name: QueueName,
    transactional: bool,
    #[serde(default)]
    read_filter: ReadFilter,
}

impl QueueRef {
    pub fn new(name: QueueName, transactional: bool) -> Self {
        Self {
            name,
            transactional,
            read_filter: ReadFilter::default(),
        }
    }

    /// Reference the same queue with a different read filter
    pub fn with_read_filter(mut self, read_filter: ReadFilter) -> Self {
        self.read_filter = read_filter;
        self
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn read_filter(&self) -> ReadFilter {
        self.read_filter
    }
}

impl std::fmt::Display for QueueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A unit of transport: an opaque body plus routing metadata.
///
/// `id` and `sent_at` are assigned by the transport when the envelope is
/// sent and cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    id: Option<MessageId>,
    pub correlation_id: Option<MessageId>,
    response_queue: Option<QueueRef>,
    pub persistent: bool,
    sent_at: Option<Timestamp>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        general_purpose::STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Envelope {
    /// Create new envelope with body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            id: None,
            correlation_id: None,
            response_queue: None,
            persistent: false,
            sent_at: None,
        }
    }

    /// Link this envelope to the request it answers
    pub fn with_correlation_id(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Mark the envelope to survive a transport restart
    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Identifier assigned by the transport, `None` until sent
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    /// Reply destination, present only on requests expecting a response
    pub fn response_queue(&self) -> Option<&QueueRef> {
        self.response_queue.as_ref()
    }

    /// Time the transport accepted the envelope
    pub fn sent_at(&self) -> Option<&Timestamp> {
        self.sent_at.as_ref()
    }

    /// Decode the body as UTF-8 text
    pub fn body_text(&self) -> Result<&str, ValidationError> {
        std::str::from_utf8(&self.body).map_err(|e| ValidationError::InvalidFormat {
            field: "body".to_string(),
            message: e.to_string(),
        })
    }

    pub(crate) fn set_response_queue(&mut self, queue: QueueRef) {
        self.response_queue = Some(queue);
    }

    /// Record the identity the transport gave this envelope.
    ///
    /// An identifier that is already present is kept.
    pub(crate) fn assign_identity(&mut self, id: MessageId, sent_at: Timestamp) {
        if self.id.is_none() {
            self.id = Some(id);
            self.sent_at = Some(sent_at);
        }
    }

    /// Drop properties the read filter does not request
    pub(crate) fn filtered(mut self, filter: ReadFilter) -> Self {
        if !filter.includes_response_queue() {
            self.response_queue = None;
        }
        self
    }
}

/// Result of a fire-and-forget send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the envelope
    Sent(MessageId),
    /// The queue no longer existed and the envelope was discarded
    Dropped,
}

impl SendOutcome {
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Sent(id) => Some(id),
            Self::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
