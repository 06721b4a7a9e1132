//! # Queue Channels CLI
//!
//! Console harness for the queue channels library.
//!
//! This module provides CLI commands for:
//! - One-way sends and single-shot receives
//! - Sending a request and waiting for its reply
//! - Serving requests as a responder
//! - A fire-and-forget round trip through a transactional queue

use clap::{Parser, Subcommand};
use queue_channels::{
    CancellationToken, ChannelError, ChannelOptions, ConfigurationError, Envelope,
    FireAndForgetChannel, MessagingConfig, QueueTransport, RequestResponseChannel, Responder,
    SendOutcome, TransactionScope,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Queue used by the `demo` command
pub const DEMO_QUEUE: &str = "unsubscribe-newsletter";

/// Payload sent by the `demo` command
pub const DEMO_PAYLOAD: &str = "rahman.mahmoodi@gmail.com";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Channels CLI - fire-and-forget and request/response messaging
#[derive(Parser)]
#[command(name = "queue-channels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, receive, request and respond over durable queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_CHANNELS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Use the filesystem transport rooted at this directory
    #[arg(short, long, env = "QUEUE_CHANNELS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Send one message to a queue
    Send {
        #[arg(short, long)]
        queue: String,

        /// Send inside a transaction
        #[arg(short, long)]
        transactional: bool,

        /// Mark the message to survive a transport restart
        #[arg(short, long)]
        persistent: bool,

        /// Message body
        body: String,
    },

    /// Take one message off a queue, if there is one
    Receive {
        #[arg(short, long)]
        queue: String,

        /// Receive inside a transaction
        #[arg(short, long)]
        transactional: bool,
    },

    /// Send a request and wait for the reply
    Request {
        #[arg(long, default_value = "request")]
        request_queue: String,

        #[arg(long, default_value = "response")]
        response_queue: String,

        /// Give up waiting after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,

        /// Request body
        #[arg(default_value = "Hello World")]
        body: String,
    },

    /// Answer requests until stopped
    Respond {
        #[arg(long, default_value = "request")]
        request_queue: String,

        /// Stop after answering this many requests
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Delay between polls of an empty request queue
        #[arg(long, default_value = "100")]
        poll_ms: u64,
    },

    /// Round trip one message through a transactional queue
    Demo {
        #[arg(short, long, default_value = DEMO_QUEUE)]
        queue: String,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI error types
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Main Entry Point
// ============================================================================

pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli.log_level, cli.json_logs)?;

    let mut config = MessagingConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config = config.with_data_dir(data_dir.clone());
        config.validate()?;
    }
    let transport = config.build_transport().await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    execute(cli.command, &config, transport, &shutdown, &mut stdout).await
}

/// Install the tracing subscriber; `RUST_LOG` overrides `level`
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    // Command output owns stdout
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Run one command against `transport`, writing its output to `out`
pub async fn execute(
    command: Commands,
    config: &MessagingConfig,
    transport: Arc<dyn QueueTransport>,
    shutdown: &CancellationToken,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    match command {
        Commands::Send {
            queue,
            transactional,
            persistent,
            body,
        } => {
            let options = ChannelOptions::default()
                .persistent(persistent)
                .strict_mode_check(config.strict_mode_check);
            execute_send(transport, &queue, transactional, options, body, out).await
        }
        Commands::Receive {
            queue,
            transactional,
        } => execute_receive(transport, &queue, transactional, config, out).await,
        Commands::Request {
            request_queue,
            response_queue,
            timeout_secs,
            body,
        } => {
            execute_request(
                transport,
                &request_queue,
                &response_queue,
                timeout_secs,
                body,
                config,
                shutdown,
                out,
            )
            .await
        }
        Commands::Respond {
            request_queue,
            count,
            poll_ms,
        } => execute_respond(transport, &request_queue, count, poll_ms, shutdown, out).await,
        Commands::Demo { queue } => execute_demo(transport, &queue, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_send(
    transport: Arc<dyn QueueTransport>,
    queue: &str,
    transactional: bool,
    options: ChannelOptions,
    body: String,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let channel = FireAndForgetChannel::with_options(transport, queue, transactional, options).await?;

    let outcome = if channel.is_transactional() {
        let mut scope = channel.transaction_scope();
        scope.begin().await?;
        match channel.send(body, Some(&scope)).await {
            Ok(outcome) => {
                scope.commit().await?;
                outcome
            }
            Err(e) => {
                abandon(&mut scope).await;
                return Err(e.into());
            }
        }
    } else {
        channel.send(body, None).await?
    };

    match outcome {
        SendOutcome::Sent(id) => writeln!(out, "Sent message {} to {}", id, queue)?,
        SendOutcome::Dropped => writeln!(out, "Queue {} does not exist; message dropped", queue)?,
    }
    Ok(())
}

async fn execute_receive(
    transport: Arc<dyn QueueTransport>,
    queue: &str,
    transactional: bool,
    config: &MessagingConfig,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let options = ChannelOptions::default().strict_mode_check(config.strict_mode_check);
    let channel = FireAndForgetChannel::with_options(transport, queue, transactional, options).await?;

    let envelope = if channel.is_transactional() {
        let mut scope = channel.transaction_scope();
        scope.begin().await?;
        match channel.receive_envelope(Some(&scope)).await {
            Ok(envelope) => {
                scope.commit().await?;
                envelope
            }
            Err(e) => {
                abandon(&mut scope).await;
                return Err(e.into());
            }
        }
    } else {
        channel.receive_envelope(None).await?
    };

    match envelope {
        Some(envelope) => writeln!(out, "{}", body_for_display(&envelope))?,
        None => writeln!(out, "no message")?,
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn execute_request(
    transport: Arc<dyn QueueTransport>,
    request_queue: &str,
    response_queue: &str,
    timeout_secs: Option<u64>,
    body: String,
    config: &MessagingConfig,
    shutdown: &CancellationToken,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let mut policy = config.reply_poll.to_policy();
    if let Some(secs) = timeout_secs {
        policy = policy.with_timeout(Duration::from_secs(secs));
    }

    let channel =
        RequestResponseChannel::with_policy(transport, request_queue, response_queue, policy)
            .await?;

    let sent = channel.send(Envelope::new(body)).await?;
    let request_id = sent.id().cloned().ok_or_else(|| CliError::InvalidArgument {
        arg: "body".to_string(),
        message: "transport did not assign a message id".to_string(),
    })?;

    writeln!(out, "Message id: {}", request_id)?;
    if let Some(reply_to) = sent.response_queue() {
        writeln!(out, "Reply to: {}", reply_to)?;
    }
    writeln!(out, "Body: {}", body_for_display(&sent))?;
    out.flush()?;

    let reply = channel
        .receive_with_cancellation(&request_id, shutdown)
        .await?;

    writeln!(out, "Reply correlation id: {}", request_id)?;
    writeln!(out, "Reply: {}", body_for_display(&reply))?;
    Ok(())
}

async fn execute_respond(
    transport: Arc<dyn QueueTransport>,
    request_queue: &str,
    count: Option<usize>,
    poll_ms: u64,
    shutdown: &CancellationToken,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    if count == Some(0) {
        return Err(CliError::InvalidArgument {
            arg: "count".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    let responder = Responder::new(transport, request_queue).await?;
    let poll_interval = Duration::from_millis(poll_ms);
    let mut answered = 0usize;
    info!(queue = %responder.request_queue(), "Responder started");

    while !shutdown.is_cancelled() {
        let request = match responder.next_request().await? {
            Some(request) => request,
            None => {
                debug!(queue = %responder.request_queue(), "No request waiting");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
        };

        let Some(request_id) = request.id().cloned() else {
            continue;
        };
        writeln!(
            out,
            "Request {}: {}",
            request_id,
            body_for_display(&request)
        )?;

        let reply = format!("Happy response for message {}", request_id);
        if let Err(e) = responder.reply(&request, reply).await {
            warn!(request = %request_id, error = %e, "Could not reply to request; skipping");
            continue;
        }
        writeln!(out, "Replied to {}", request_id)?;
        out.flush()?;

        answered += 1;
        if count.is_some_and(|limit| answered >= limit) {
            break;
        }
    }

    info!(answered = answered, "Responder stopped");
    Ok(())
}

async fn execute_demo(
    transport: Arc<dyn QueueTransport>,
    queue: &str,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let writer = FireAndForgetChannel::new(transport.clone(), queue, true).await?;
    let mut scope = writer.transaction_scope();
    scope.begin().await?;
    if let Err(e) = writer.send(DEMO_PAYLOAD, Some(&scope)).await {
        abandon(&mut scope).await;
        return Err(e.into());
    }
    scope.commit().await?;
    writeln!(out, "Sent: {}", DEMO_PAYLOAD)?;

    // A fresh channel on the same queue, as a separate consumer would have
    let reader = FireAndForgetChannel::new(transport, queue, true).await?;
    let mut scope = reader.transaction_scope();
    scope.begin().await?;
    let received = match reader.receive_text(Some(&scope)).await {
        Ok(received) => received,
        Err(e) => {
            abandon(&mut scope).await;
            return Err(e.into());
        }
    };
    scope.commit().await?;

    match received {
        Some(body) => writeln!(out, "Received: {}", body)?,
        None => writeln!(out, "no message")?,
    }
    Ok(())
}

/// Roll back after a failed operation, keeping the caller's error
async fn abandon(scope: &mut TransactionScope) {
    if let Err(e) = scope.rollback().await {
        warn!(error = %e, "Rollback after failed operation also failed");
    }
}

fn body_for_display(envelope: &Envelope) -> String {
    String::from_utf8_lossy(&envelope.body).into_owned()
}
