use crate::domain::{DomainResult, EnvelopeSender, MessageEnvelope, ProcessResponse};
use crate::nats::delivery::process_delivery;
use crate::nats::{ConsumeRequest, EnvelopeProducer, JetStreamConsumer, QueueConsumerConfig};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info};

/// Thread-blocking queue transport.
///
/// Holds one consumer handle for the whole receive loop and blocks the
/// calling thread on each network operation. Messages are processed one at
/// a time, in arrival order. Must not be driven from inside an async task;
/// use [`BlockingQueue::spawn`] to give it a dedicated thread.
pub struct BlockingQueue<S> {
    runtime: Handle,
    jetstream: Arc<dyn JetStreamConsumer>,
    producer: EnvelopeProducer,
    config: QueueConsumerConfig,
    service: S,
}

impl<S> BlockingQueue<S>
where
    S: Service<ConsumeRequest, Response = ProcessResponse, Error = anyhow::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        runtime: Handle,
        jetstream: Arc<dyn JetStreamConsumer>,
        producer: EnvelopeProducer,
        config: QueueConsumerConfig,
        service: S,
    ) -> Self {
        Self {
            runtime,
            jetstream,
            producer,
            config,
            service,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    pub fn generate_message(&self, envelope: &MessageEnvelope) -> DomainResult<Bytes> {
        self.producer.generate_message(envelope)
    }

    /// Send an envelope to `queue`, or to this transport's own queue when `None`.
    /// Blocks until the broker confirms or rejects the publish.
    pub fn send_message(&self, envelope: &MessageEnvelope, queue: Option<&str>) -> ProcessResponse {
        let queue = queue.unwrap_or(&self.config.queue_name);
        self.runtime
            .block_on(self.producer.send_message(envelope, queue))
    }

    /// Receive and process messages until cancellation or a transport failure.
    ///
    /// The consumer handle is released on every exit path.
    pub fn receive_loop(&mut self, ctx: CancellationToken) -> Result<()> {
        let consumer = self
            .runtime
            .block_on(
                self.jetstream
                    .create_consumer(self.config.pull_config(), &self.config.queue_name),
            )
            .context("failed to open queue consumer")?;

        info!(
            queue = %self.config.queue_name,
            consumer = %self.config.consumer_name,
            "listening for messages"
        );

        let result = loop {
            let fetched = self.runtime.block_on(async {
                tokio::select! {
                    _ = ctx.cancelled() => None,
                    result = consumer.fetch_messages(1, self.config.max_wait) => Some(result),
                }
            });

            let messages = match fetched {
                None => {
                    info!(queue = %self.config.queue_name, "received shutdown signal, stopping consumer");
                    break Ok(());
                }
                Some(Err(e)) => {
                    error!(
                        queue = %self.config.queue_name,
                        error = %e,
                        "queue transport failed, stopping consumer"
                    );
                    break Err(e.context("failed to receive from queue"));
                }
                Some(Ok(messages)) => messages,
            };

            for message in messages {
                debug!(subject = %message.subject, "received message");
                let timeout = self.config.handler_timeout;
                self.runtime
                    .block_on(process_delivery(&mut self.service, message, timeout));
            }
        };

        drop(consumer);
        info!(queue = %self.config.queue_name, "queue consumer closed");
        result
    }

    /// Move the transport onto a dedicated OS thread running [`Self::receive_loop`]
    pub fn spawn(mut self, ctx: CancellationToken) -> std::io::Result<JoinHandle<Result<()>>> {
        let name = format!("queue-consumer-{}", self.config.queue_name);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.receive_loop(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{
        DropMessageService, MockJetStreamConsumer, MockJetStreamPublisher, MockMessageAcker,
        MockPullConsumer, QueueMessage,
    };
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Runtime;
    use tower::service_fn;

    fn message(acks: Arc<AtomicUsize>) -> QueueMessage {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().returning(move || {
            acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        QueueMessage::new("work.envelopes", Bytes::from("{}"), Box::new(acker))
    }

    /// Consumer that delivers `count` single-message batches, then fails
    fn consumer_then_failure(count: usize, acks: Arc<AtomicUsize>) -> MockJetStreamConsumer {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(move |_, _| {
                let acks = acks.clone();
                let mut remaining = count;
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages().returning(move |_, _| {
                    if remaining == 0 {
                        return Err(anyhow::anyhow!("connection closed"));
                    }
                    remaining -= 1;
                    Ok(vec![message(acks.clone())])
                });
                Ok(Box::new(pull))
            });
        jetstream
    }

    fn producer() -> EnvelopeProducer {
        EnvelopeProducer::new(Arc::new(MockJetStreamPublisher::new()))
    }

    #[test]
    fn test_receive_loop_acks_until_transport_failure() {
        let runtime = Runtime::new().unwrap();
        let acks = Arc::new(AtomicUsize::new(0));
        let mut queue = BlockingQueue::new(
            runtime.handle().clone(),
            Arc::new(consumer_then_failure(2, acks.clone())),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );

        let result = queue.receive_loop(CancellationToken::new());

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("connection closed"));
        assert_eq!(acks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_receive_loop_never_acks_failed_messages() {
        let runtime = Runtime::new().unwrap();
        let acks = Arc::new(AtomicUsize::new(0));
        let service = service_fn(|_req: ConsumeRequest| async move {
            Ok::<_, anyhow::Error>(ProcessResponse::failure("MockedFail"))
        });
        let mut queue = BlockingQueue::new(
            runtime.handle().clone(),
            Arc::new(consumer_then_failure(3, acks.clone())),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            service,
        );

        assert!(queue.receive_loop(CancellationToken::new()).is_err());
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_receive_loop_returns_ok_on_cancellation() {
        let runtime = Runtime::new().unwrap();
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream.expect_create_consumer().times(1).returning(|_, _| {
            let mut pull = MockPullConsumer::new();
            pull.expect_fetch_messages()
                .returning(|_, _| Ok(vec![]));
            Ok(Box::new(pull))
        });
        let mut queue = BlockingQueue::new(
            runtime.handle().clone(),
            Arc::new(jetstream),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );
        let ctx = CancellationToken::new();
        ctx.cancel();

        assert!(queue.receive_loop(ctx).is_ok());
    }

    #[test]
    fn test_spawned_consumer_reports_open_failure() {
        let runtime = Runtime::new().unwrap();
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream not found")));
        let queue = BlockingQueue::new(
            runtime.handle().clone(),
            Arc::new(jetstream),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );

        let handle = queue.spawn(CancellationToken::new()).unwrap();
        let result = handle.join().unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_send_message_blocks_until_published() {
        let runtime = Runtime::new().unwrap();
        let mut publisher = MockJetStreamPublisher::new();
        publisher
            .expect_publish()
            .withf(|subject: &String, _| subject == "other.envelopes")
            .times(1)
            .returning(|_, _| Ok(()));
        let queue = BlockingQueue::new(
            runtime.handle().clone(),
            Arc::new(MockJetStreamConsumer::new()),
            EnvelopeProducer::new(Arc::new(publisher)),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );
        let envelope = MessageEnvelope::new("X", Map::new(), Map::new(), "manual", 1688821684);

        let response = queue.send_message(&envelope, Some("other"));
        assert!(response.success);
    }
}
