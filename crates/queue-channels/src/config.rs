//! Configuration for transports and reply polling.
//!
//! Sources, later ones overriding earlier ones:
//!  1. Built-in defaults (in-memory transport, default poll policy)
//!  2. An optional configuration file (format chosen by extension)
//!  3. Environment variables prefixed `QC__` with `__` as separator,
//!     e.g. `QC__TRANSPORT__KIND=filesystem` and `QC__TRANSPORT__ROOT=/var/qc`

use crate::error::ConfigurationError;
use crate::poll::ReplyPollPolicy;
use crate::transport::QueueTransport;
use crate::transports::{FilesystemTransport, InMemoryTransport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "QC";

/// Top-level messaging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub transport: TransportConfig,
    pub reply_poll: ReplyPollSettings,
    /// Fail instead of warning when an existing queue has a different mode
    pub strict_mode_check: bool,
}

/// Which transport to run on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Process-local queues, lost on exit
    #[default]
    InMemory,
    /// Durable queues shared between processes through a directory
    Filesystem { root: PathBuf },
}

/// Reply polling settings in configuration-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyPollSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub jitter_percent: f64,
    /// `None` waits for a reply indefinitely
    pub timeout_secs: Option<u64>,
}

impl Default for ReplyPollSettings {
    fn default() -> Self {
        Self::from(&ReplyPollPolicy::default())
    }
}

impl From<&ReplyPollPolicy> for ReplyPollSettings {
    fn from(policy: &ReplyPollPolicy) -> Self {
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            use_jitter: policy.use_jitter,
            jitter_percent: policy.jitter_percent,
            timeout_secs: policy.timeout.map(|t| t.as_secs()),
        }
    }
}

impl ReplyPollSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.initial_delay_ms == 0 {
            return Err(invalid("reply_poll.initial_delay_ms must be greater than zero"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(invalid(
                "reply_poll.max_delay_ms must not be less than reply_poll.initial_delay_ms",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("reply_poll.backoff_multiplier must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(invalid("reply_poll.jitter_percent must be between 0.0 and 1.0"));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("reply_poll.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn to_policy(&self) -> ReplyPollPolicy {
        let mut policy = ReplyPollPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter_percent(self.jitter_percent);
        policy.use_jitter = self.use_jitter;
        policy.timeout = self.timeout_secs.map(Duration::from_secs);
        policy
    }
}

impl MessagingConfig {
    /// Load from defaults, an optional file and `QC__` environment variables
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let TransportConfig::Filesystem { root } = &self.transport {
            if root.as_os_str().is_empty() {
                return Err(invalid("transport.root is required for the filesystem transport"));
            }
        }
        self.reply_poll.validate()
    }

    /// Replace the transport with a filesystem transport rooted at `root`
    pub fn with_data_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.transport = TransportConfig::Filesystem { root: root.into() };
        self
    }

    pub async fn build_transport(&self) -> Result<Arc<dyn QueueTransport>, ConfigurationError> {
        let transport: Arc<dyn QueueTransport> = match &self.transport {
            TransportConfig::InMemory => Arc::new(InMemoryTransport::new()),
            TransportConfig::Filesystem { root } => {
                Arc::new(FilesystemTransport::new(root.clone()).await?)
            }
        };
        info!(transport = transport.transport_name(), "Transport ready");
        Ok(transport)
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}
