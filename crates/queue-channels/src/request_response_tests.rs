//! Tests for the request/response channel.

use super::*;
use crate::error::TransportError;
use crate::message::{QueueName, Timestamp, TransactionId};
use crate::transports::InMemoryTransport;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const REQUEST_QUEUE: &str = "request";
const RESPONSE_QUEUE: &str = "response";

fn name(value: &str) -> QueueName {
    QueueName::new(value).unwrap()
}

/// What a scripted correlation lookup does
#[derive(Debug, Clone, Copy)]
enum Lookup {
    Missing,
    Denied,
}

/// Wraps the in-memory transport and overrides correlation lookups with a
/// script. Once the script runs out lookups go to the real queue.
struct ScriptedTransport {
    inner: InMemoryTransport,
    script: Mutex<VecDeque<Lookup>>,
    lookups: AtomicUsize,
}

impl ScriptedTransport {
    fn new(inner: InMemoryTransport, script: impl IntoIterator<Item = Lookup>) -> Self {
        Self {
            inner,
            script: Mutex::new(script.into_iter().collect()),
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueTransport for ScriptedTransport {
    async fn exists(&self, queue: &QueueName) -> Result<bool, TransportError> {
        self.inner.exists(queue).await
    }

    async fn create(&self, queue: &QueueName, transactional: bool) -> Result<(), TransportError> {
        self.inner.create(queue, transactional).await
    }

    async fn open(&self, queue: &QueueName) -> Result<QueueRef, TransportError> {
        self.inner.open(queue).await
    }

    async fn delete(&self, queue: &QueueName) -> Result<(), TransportError> {
        self.inner.delete(queue).await
    }

    async fn send(
        &self,
        queue: &QueueRef,
        envelope: &Envelope,
        transaction: Option<&TransactionId>,
    ) -> Result<(MessageId, Timestamp), TransportError> {
        self.inner.send(queue, envelope, transaction).await
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<Envelope>, TransportError> {
        self.inner.receive(queue, transaction).await
    }

    async fn receive_by_correlation(
        &self,
        queue: &QueueRef,
        correlation_id: &MessageId,
    ) -> Result<Envelope, TransportError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Lookup::Missing) => Err(TransportError::CorrelationNotFound {
                queue_name: queue.name().to_string(),
                correlation_id: correlation_id.clone(),
            }),
            Some(Lookup::Denied) => Err(TransportError::PermissionDenied {
                operation: "receive_by_correlation".to_string(),
            }),
            None => self.inner.receive_by_correlation(queue, correlation_id).await,
        }
    }

    async fn begin_transaction(&self) -> Result<TransactionId, TransportError> {
        self.inner.begin_transaction().await
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        self.inner.commit(transaction).await
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        self.inner.rollback(transaction).await
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

async fn create_channel(transport: &InMemoryTransport) -> RequestResponseChannel {
    RequestResponseChannel::new(Arc::new(transport.clone()), REQUEST_QUEUE, RESPONSE_QUEUE)
        .await
        .unwrap()
}

/// Play the responder: take the next request and answer it with `body`
async fn answer_next(transport: &InMemoryTransport, body: &str) -> MessageId {
    let request_queue = transport
        .open(&name(REQUEST_QUEUE))
        .await
        .unwrap()
        .with_read_filter(ReadFilter::All);
    let request = transport.receive(&request_queue, None).await.unwrap().unwrap();
    let request_id = request.id().unwrap().clone();
    let reply_to = request.response_queue().unwrap().clone();

    let reply = Envelope::new(body.to_string()).with_correlation_id(request_id.clone());
    transport.send(&reply_to, &reply, None).await.unwrap();
    request_id
}

// ============================================================================
// Construction Tests
// ============================================================================

mod construction {
    use super::*;

    #[tokio::test]
    async fn test_construction_provisions_both_queues() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;

        assert!(transport.exists(&name(REQUEST_QUEUE)).await.unwrap());
        assert!(transport.exists(&name(RESPONSE_QUEUE)).await.unwrap());
        assert!(!channel.request_queue().is_transactional());
        assert_eq!(channel.response_queue().read_filter(), ReadFilter::All);
    }

    #[tokio::test]
    async fn test_empty_request_queue_name() {
        let transport = Arc::new(InMemoryTransport::new());

        let result = RequestResponseChannel::new(transport, "", RESPONSE_QUEUE).await;

        match result {
            Err(ChannelError::InvalidArgument { argument, .. }) => {
                assert_eq!(argument, "request_queue_name")
            }
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_response_queue_name() {
        let transport = Arc::new(InMemoryTransport::new());

        let result = RequestResponseChannel::new(transport, REQUEST_QUEUE, " ").await;

        match result {
            Err(ChannelError::InvalidArgument { argument, .. }) => {
                assert_eq!(argument, "response_queue_name")
            }
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }
}

// ============================================================================
// Send Tests
// ============================================================================

mod send {
    use super::*;

    #[tokio::test]
    async fn test_send_assigns_identity_and_reply_destination() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;

        let sent = channel.send(Envelope::new("Hello World")).await.unwrap();

        assert!(sent.id().is_some());
        assert!(sent.sent_at().is_some());
        assert_eq!(
            sent.response_queue().unwrap().name().as_str(),
            RESPONSE_QUEUE
        );
        assert_eq!(transport.depth(&name(REQUEST_QUEUE)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_rejects_already_sent_envelope() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("once")).await.unwrap();

        let result = channel.send(sent).await;

        assert!(matches!(result, Err(ChannelError::InvalidArgument { .. })));
        assert_eq!(transport.depth(&name(REQUEST_QUEUE)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_to_transactional_request_queue() {
        let transport = InMemoryTransport::new();
        transport.create(&name(REQUEST_QUEUE), true).await.unwrap();
        let channel = create_channel(&transport).await;

        channel.send(Envelope::new("in a transaction")).await.unwrap();

        assert!(channel.request_queue().is_transactional());
        assert_eq!(transport.depth(&name(REQUEST_QUEUE)).unwrap(), 1);
    }
}

// ============================================================================
// Reply Tests
// ============================================================================

mod reply {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;

        let sent = channel.send(Envelope::new("Hello World")).await.unwrap();
        let request_id = answer_next(&transport, "Happy response").await;
        assert_eq!(Some(&request_id), sent.id());

        let reply = channel.receive(sent.id().unwrap()).await.unwrap();

        assert_eq!(reply.body_text().unwrap(), "Happy response");
        assert_eq!(reply.correlation_id.as_ref(), sent.id());
    }

    #[tokio::test]
    async fn test_replies_are_matched_by_correlation() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;

        let first = channel.send(Envelope::new("a")).await.unwrap();
        let second = channel.send(Envelope::new("b")).await.unwrap();
        answer_next(&transport, "reply a").await;
        answer_next(&transport, "reply b").await;

        let reply_b = channel.receive(second.id().unwrap()).await.unwrap();
        let reply_a = channel.receive(first.id().unwrap()).await.unwrap();

        assert_eq!(reply_b.body_text().unwrap(), "reply b");
        assert_eq!(reply_a.body_text().unwrap(), "reply a");
        assert_eq!(transport.depth(&name(RESPONSE_QUEUE)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_not_found_lookups_are_retried() {
        let memory = InMemoryTransport::new();
        let scripted = Arc::new(ScriptedTransport::new(
            memory.clone(),
            [Lookup::Missing, Lookup::Missing, Lookup::Missing],
        ));
        let channel = RequestResponseChannel::with_policy(
            scripted.clone(),
            REQUEST_QUEUE,
            RESPONSE_QUEUE,
            ReplyPollPolicy::immediate(),
        )
        .await
        .unwrap();

        let sent = channel.send(Envelope::new("ping")).await.unwrap();
        answer_next(&memory, "pong").await;

        let reply = channel.receive(sent.id().unwrap()).await.unwrap();

        assert_eq!(reply.body_text().unwrap(), "pong");
        assert_eq!(scripted.lookups(), 4);
    }

    #[tokio::test]
    async fn test_other_lookup_errors_end_the_wait() {
        let memory = InMemoryTransport::new();
        let scripted = Arc::new(ScriptedTransport::new(
            memory.clone(),
            [Lookup::Missing, Lookup::Missing, Lookup::Denied],
        ));
        let channel = RequestResponseChannel::with_policy(
            scripted.clone(),
            REQUEST_QUEUE,
            RESPONSE_QUEUE,
            ReplyPollPolicy::immediate(),
        )
        .await
        .unwrap();

        let sent = channel.send(Envelope::new("ping")).await.unwrap();
        answer_next(&memory, "never read").await;

        let result = channel.receive(sent.id().unwrap()).await;

        assert!(matches!(
            result,
            Err(ChannelError::Transport(TransportError::PermissionDenied { .. }))
        ));
        assert_eq!(scripted.lookups(), 3);
        // The reply was left where it was
        assert_eq!(memory.depth(&name(RESPONSE_QUEUE)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deleted_response_queue_is_reported() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("ping")).await.unwrap();
        transport.delete(&name(RESPONSE_QUEUE)).await.unwrap();

        let result = channel.receive(sent.id().unwrap()).await;

        assert!(matches!(
            result,
            Err(ChannelError::Transport(TransportError::QueueNotFound { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_arriving_later_is_picked_up() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("slow")).await.unwrap();

        let responder = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            answer_next(&responder, "eventually").await;
        });

        let reply = channel.receive(sent.id().unwrap()).await.unwrap();

        assert_eq!(reply.body_text().unwrap(), "eventually");
    }
}

// ============================================================================
// Timeout and Cancellation Tests
// ============================================================================

mod bounded_waits {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout_expires() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("unanswered")).await.unwrap();

        let result = channel
            .receive_timeout(sent.id().unwrap(), Duration::from_secs(5))
            .await;

        match result {
            Err(ChannelError::ReceiveTimedOut { request_id, waited }) => {
                assert_eq!(Some(&request_id), sent.id());
                assert!(waited >= Duration::from_secs(5));
            }
            other => panic!("expected ReceiveTimedOut, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_timeout_applies_to_receive() {
        let transport = InMemoryTransport::new();
        let channel = RequestResponseChannel::with_policy(
            Arc::new(transport.clone()),
            REQUEST_QUEUE,
            RESPONSE_QUEUE,
            ReplyPollPolicy::default().with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let sent = channel.send(Envelope::new("unanswered")).await.unwrap();

        let result = channel.receive(sent.id().unwrap()).await;

        assert!(matches!(result, Err(ChannelError::ReceiveTimedOut { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_waits_without_deadline() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;

        let first = channel.send(Envelope::new("queued")).await.unwrap();
        answer_next(&transport, "already there").await;
        let reply = channel
            .receive_timeout(first.id().unwrap(), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(reply.body_text().unwrap(), "already there");

        let second = channel.send(Envelope::new("later")).await.unwrap();
        let responder = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            answer_next(&responder, "eventually").await;
        });
        let reply = channel
            .receive_timeout(second.id().unwrap(), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(reply.body_text().unwrap(), "eventually");
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("ping")).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = channel
            .receive_with_cancellation(sent.id().unwrap(), &token)
            .await;

        assert!(matches!(result, Err(ChannelError::ReceiveCancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("ping")).await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let result = channel
            .receive_with_cancellation(sent.id().unwrap(), &token)
            .await;

        assert!(matches!(result, Err(ChannelError::ReceiveCancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_leaves_reply_queued() {
        let transport = InMemoryTransport::new();
        let channel = create_channel(&transport).await;
        let sent = channel.send(Envelope::new("ping")).await.unwrap();
        answer_next(&transport, "pong").await;
        let token = CancellationToken::new();
        token.cancel();

        let cancelled = channel
            .receive_with_cancellation(sent.id().unwrap(), &token)
            .await;
        assert!(cancelled.is_err());

        let reply = channel.receive(sent.id().unwrap()).await.unwrap();
        assert_eq!(reply.body_text().unwrap(), "pong");
    }
}
