use crate::nats::MessageAcker;
use anyhow::Result;
use async_nats::jetstream;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Subject envelopes are published to on queue `queue`
pub fn envelope_subject(queue: &str) -> String {
    format!("{queue}.envelopes")
}

/// Subject filter covering every message of queue `queue`
pub fn queue_subjects(queue: &str) -> String {
    format!("{queue}.>")
}

/// A message delivered from a queue, together with its acknowledgment handle.
///
/// Dropping the message without calling [`QueueMessage::ack`] leaves it
/// unacknowledged; the broker redelivers it once its ack wait elapses.
pub struct QueueMessage {
    pub subject: String,
    pub payload: Bytes,
    acker: Box<dyn MessageAcker>,
}

impl QueueMessage {
    pub fn new(subject: impl Into<String>, payload: Bytes, acker: Box<dyn MessageAcker>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("subject", &self.subject)
            .field("payload_bytes", &self.payload.len())
            .finish()
    }
}

/// Request type for processing a single queue message through Tower.
///
/// Owns the message data so it can pass through middleware layers without
/// lifetime concerns. The acknowledgment handle stays with the consumer.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// The subject the message was published to
    pub subject: String,
    /// The message payload
    pub payload: Bytes,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes) -> Self {
        Self { subject, payload }
    }
}

/// Settings of a queue consumer (either delivery variant)
#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    /// Queue (JetStream stream) to consume from
    pub queue_name: String,
    /// Durable consumer name
    pub consumer_name: String,
    /// Bounded wait of a single receive
    pub max_wait: Duration,
    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Maximum deliveries of one message (-1 for unlimited)
    pub max_deliver: i64,
    /// Deadline of one handler invocation
    pub handler_timeout: Duration,
}

impl QueueConsumerConfig {
    pub fn new(queue_name: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            consumer_name: consumer_name.into(),
            max_wait: Duration::from_secs(5),
            ack_wait: Duration::from_secs(600),
            max_deliver: 10,
            handler_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    /// Durable pull consumer configuration with explicit acknowledgment
    pub fn pull_config(&self) -> jetstream::consumer::pull::Config {
        jetstream::consumer::pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: queue_subjects(&self.queue_name),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            ..Default::default()
        }
    }
}
