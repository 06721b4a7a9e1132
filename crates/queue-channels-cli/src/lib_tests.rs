//! Tests for the queue-channels-cli library module.

use super::*;
use queue_channels::{InMemoryTransport, QueueName};
use tempfile::TempDir;

fn output_text(out: Vec<u8>) -> String {
    String::from_utf8(out).unwrap()
}

async fn run(command: Commands, transport: &InMemoryTransport) -> Result<String, CliError> {
    let mut out = Vec::new();
    execute(
        command,
        &MessagingConfig::default(),
        Arc::new(transport.clone()),
        &CancellationToken::new(),
        &mut out,
    )
    .await?;
    Ok(output_text(out))
}

// ============================================================================
// Parsing Tests
// ============================================================================

mod parsing {
    use super::*;

    #[test]
    fn test_send_parsing() {
        let cli = Cli::try_parse_from([
            "queue-channels",
            "send",
            "--queue",
            "orders",
            "--transactional",
            "hello",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Commands::Send {
                queue: "orders".to_string(),
                transactional: true,
                persistent: false,
                body: "hello".to_string(),
            }
        );
        assert_eq!(cli.log_level, "info");
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_request_defaults() {
        let cli = Cli::try_parse_from(["queue-channels", "request"]).unwrap();

        assert_eq!(
            cli.command,
            Commands::Request {
                request_queue: "request".to_string(),
                response_queue: "response".to_string(),
                timeout_secs: None,
                body: "Hello World".to_string(),
            }
        );
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from([
            "queue-channels",
            "--data-dir",
            "/tmp/queues",
            "--json-logs",
            "--log-level",
            "debug",
            "respond",
            "-n",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/queues")));
        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Respond { count, poll_ms, .. } => {
                assert_eq!(count, Some(3));
                assert_eq!(poll_ms, 100);
            }
            other => panic!("Expected Respond command, got {:?}", other),
        }
    }

    #[test]
    fn test_send_requires_queue() {
        let result = Cli::try_parse_from(["queue-channels", "send", "hello"]);
        assert!(result.is_err());
    }
}

// ============================================================================
// Command Tests
// ============================================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_send_then_receive() {
        let transport = InMemoryTransport::new();

        let sent = run(
            Commands::Send {
                queue: "orders".to_string(),
                transactional: true,
                persistent: false,
                body: "order 42".to_string(),
            },
            &transport,
        )
        .await
        .unwrap();
        assert!(sent.starts_with("Sent message "));

        let received = run(
            Commands::Receive {
                queue: "orders".to_string(),
                transactional: true,
            },
            &transport,
        )
        .await
        .unwrap();
        assert_eq!(received, "order 42\n");
    }

    #[tokio::test]
    async fn test_receive_from_empty_queue() {
        let transport = InMemoryTransport::new();

        let received = run(
            Commands::Receive {
                queue: "orders".to_string(),
                transactional: false,
            },
            &transport,
        )
        .await
        .unwrap();

        assert_eq!(received, "no message\n");
    }

    #[tokio::test]
    async fn test_demo_round_trip() {
        let transport = InMemoryTransport::new();

        let output = run(
            Commands::Demo {
                queue: DEMO_QUEUE.to_string(),
            },
            &transport,
        )
        .await
        .unwrap();

        assert!(output.contains(&format!("Received: {}", DEMO_PAYLOAD)));
        let queue = QueueName::new(DEMO_QUEUE).unwrap();
        assert_eq!(transport.depth(&queue).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_respond_answers_waiting_request() {
        let transport = InMemoryTransport::new();
        let requester =
            RequestResponseChannel::new(Arc::new(transport.clone()), "request", "response")
                .await
                .unwrap();
        let sent = requester.send(Envelope::new("Hello World")).await.unwrap();
        let request_id = sent.id().unwrap().clone();

        let output = run(
            Commands::Respond {
                request_queue: "request".to_string(),
                count: Some(1),
                poll_ms: 10,
            },
            &transport,
        )
        .await
        .unwrap();

        assert!(output.contains(&format!("Request {}: Hello World", request_id)));
        let reply = requester.receive(&request_id).await.unwrap();
        assert_eq!(
            reply.body_text().unwrap(),
            format!("Happy response for message {}", request_id)
        );
    }

    #[tokio::test]
    async fn test_respond_rejects_zero_count() {
        let transport = InMemoryTransport::new();

        let result = run(
            Commands::Respond {
                request_queue: "request".to_string(),
                count: Some(0),
                poll_ms: 10,
            },
            &transport,
        )
        .await;

        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_respond_stops_on_shutdown() {
        let transport = InMemoryTransport::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut out = Vec::new();

        execute(
            Commands::Respond {
                request_queue: "request".to_string(),
                count: None,
                poll_ms: 10,
            },
            &MessagingConfig::default(),
            Arc::new(transport),
            &shutdown,
            &mut out,
        )
        .await
        .unwrap();

        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_request_and_respond_together() {
        let transport = InMemoryTransport::new();

        let responder_transport = transport.clone();
        let responder = tokio::spawn(async move {
            run(
                Commands::Respond {
                    request_queue: "request".to_string(),
                    count: Some(1),
                    poll_ms: 5,
                },
                &responder_transport,
            )
            .await
        });

        let output = run(
            Commands::Request {
                request_queue: "request".to_string(),
                response_queue: "response".to_string(),
                timeout_secs: Some(30),
                body: "Hello World".to_string(),
            },
            &transport,
        )
        .await
        .unwrap();

        responder.await.unwrap().unwrap();
        assert!(output.contains("Body: Hello World"));
        assert!(output.contains("Reply: Happy response for message "));
    }

    #[tokio::test]
    async fn test_request_reports_timeout() {
        let transport = InMemoryTransport::new();

        let result = run(
            Commands::Request {
                request_queue: "request".to_string(),
                response_queue: "response".to_string(),
                timeout_secs: Some(1),
                body: "nobody listening".to_string(),
            },
            &transport,
        )
        .await;

        assert!(matches!(
            result,
            Err(CliError::Channel(ChannelError::ReceiveTimedOut { .. }))
        ));
    }

    #[tokio::test]
    async fn test_commands_share_filesystem_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = MessagingConfig::default().with_data_dir(dir.path());

        let mut out = Vec::new();
        execute(
            Commands::Send {
                queue: "durable".to_string(),
                transactional: false,
                persistent: true,
                body: "kept on disk".to_string(),
            },
            &config,
            config.build_transport().await.unwrap(),
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        // A second transport instance stands in for a second process
        let mut out = Vec::new();
        execute(
            Commands::Receive {
                queue: "durable".to_string(),
                transactional: false,
            },
            &config,
            config.build_transport().await.unwrap(),
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(output_text(out), "kept on disk\n");
    }

    #[tokio::test]
    async fn test_respond_skips_request_without_reply_destination() {
        let transport = InMemoryTransport::new();
        let requester =
            RequestResponseChannel::new(Arc::new(transport.clone()), "request", "response")
                .await
                .unwrap();

        // A one-way message on the request queue has nowhere to send a reply
        let stray = FireAndForgetChannel::new(Arc::new(transport.clone()), "request", false)
            .await
            .unwrap();
        stray.send("no reply wanted", None).await.unwrap();
        let sent = requester.send(Envelope::new("Hello World")).await.unwrap();
        let request_id = sent.id().unwrap().clone();

        let output = run(
            Commands::Respond {
                request_queue: "request".to_string(),
                count: Some(1),
                poll_ms: 10,
            },
            &transport,
        )
        .await
        .unwrap();

        assert!(output.contains(&format!("Replied to {}", request_id)));
        let reply = requester.receive(&request_id).await.unwrap();
        assert_eq!(
            reply.body_text().unwrap(),
            format!("Happy response for message {}", request_id)
        );
    }

    #[tokio::test]
    async fn test_failed_demo_receive_keeps_message_queued() {
        let transport = InMemoryTransport::new();
        let queue = QueueName::new(DEMO_QUEUE).unwrap();
        let channel = FireAndForgetChannel::new(Arc::new(transport.clone()), DEMO_QUEUE, true)
            .await
            .unwrap();
        let mut scope = channel.transaction_scope();
        scope.begin().await.unwrap();
        channel
            .send(vec![0xff_u8, 0xfe], Some(&scope))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        // The demo payload queues behind a body that is not text
        let result = run(
            Commands::Demo {
                queue: DEMO_QUEUE.to_string(),
            },
            &transport,
        )
        .await;

        assert!(matches!(result, Err(CliError::Channel(_))));
        assert_eq!(transport.depth(&queue).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let transport = InMemoryTransport::new();
        let channel = FireAndForgetChannel::new(Arc::new(transport.clone()), "orders", true)
            .await
            .unwrap();
        let mut scope = channel.transaction_scope();
        scope.begin().await.unwrap();

        // The transport loses the transaction, so both send and rollback fail
        transport.simulate_restart().unwrap();
        let error = channel.send("lost", Some(&scope)).await.unwrap_err();
        abandon(&mut scope).await;

        assert!(matches!(error, ChannelError::Transport(_)));
        assert!(scope.is_open());
    }
}
