use crate::domain::{DomainResult, EnvelopeSender, MessageEnvelope, ProcessResponse};
use crate::nats::delivery::process_delivery;
use crate::nats::{ConsumeRequest, EnvelopeProducer, JetStreamConsumer, QueueConsumerConfig};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info};

/// Suspend-on-I/O queue transport.
///
/// Each receive cycle opens a consumer handle, waits (bounded) for at most
/// one message, processes it and releases the handle. The task only
/// suspends at network operations; processing between them is sequential.
pub struct AsyncQueue<S> {
    jetstream: Arc<dyn JetStreamConsumer>,
    producer: EnvelopeProducer,
    config: QueueConsumerConfig,
    service: S,
}

impl<S> AsyncQueue<S>
where
    S: Service<ConsumeRequest, Response = ProcessResponse, Error = anyhow::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        producer: EnvelopeProducer,
        config: QueueConsumerConfig,
        service: S,
    ) -> Self {
        Self {
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

    /// Send an envelope to `queue`, or to this transport's own queue when `None`
    pub async fn send_message(&self, envelope: &MessageEnvelope, queue: Option<&str>) -> ProcessResponse {
        let queue = queue.unwrap_or(&self.config.queue_name);
        self.producer.send_message(envelope, queue).await
    }

    /// Perform one bounded receive and process what arrived (zero or one message).
    ///
    /// Returns an error only when the transport itself fails.
    pub async fn receive_once(&mut self) -> Result<Vec<ProcessResponse>> {
        let consumer = self
            .jetstream
            .create_consumer(self.config.pull_config(), &self.config.queue_name)
            .await
            .context("failed to open queue consumer")?;

        let messages = consumer
            .fetch_messages(1, self.config.max_wait)
            .await
            .context("failed to receive from queue")?;

        let mut responses = Vec::with_capacity(messages.len());
        for message in messages {
            debug!(subject = %message.subject, "received message");
            let response =
                process_delivery(&mut self.service, message, self.config.handler_timeout).await;
            responses.push(response);
        }

        drop(consumer);
        debug!(queue = %self.config.queue_name, "released queue consumer");
        Ok(responses)
    }

    /// Run receive cycles until cancellation or a transport failure
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            queue = %self.config.queue_name,
            consumer = %self.config.consumer_name,
            "starting async queue consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        queue = %self.config.queue_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.receive_once() => {
                    if let Err(e) = result {
                        error!(
                            queue = %self.config.queue_name,
                            error = %e,
                            "queue transport failed, stopping consumer"
                        );
                        return Err(e);
                    }
                }
            }
        }

        debug!(queue = %self.config.queue_name, "consumer stopped gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{
        DropMessageService, MockJetStreamConsumer, MockJetStreamPublisher, MockMessageAcker,
        MockPullConsumer, QueueMessage,
    };
    use async_nats::jetstream;
    use serde_json::Map;
    use std::time::Duration;
    use tower::service_fn;

    fn acked_message(times: usize) -> QueueMessage {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().times(times).returning(|| Ok(()));
        QueueMessage::new("work.envelopes", Bytes::from("{}"), Box::new(acker))
    }

    fn consumer_delivering(times: usize, ack_times: usize) -> MockJetStreamConsumer {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .withf(|config: &jetstream::consumer::pull::Config, stream: &str| {
                config.durable_name.as_deref() == Some("work-consumer") && stream == "work"
            })
            .times(times)
            .returning(move |_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages()
                    .withf(|max, expires| *max == 1 && *expires == Duration::from_secs(5))
                    .times(1)
                    .returning(move |_, _| Ok(vec![acked_message(ack_times)]));
                Ok(Box::new(pull))
            });
        jetstream
    }

    fn producer() -> EnvelopeProducer {
        EnvelopeProducer::new(Arc::new(MockJetStreamPublisher::new()))
    }

    #[tokio::test]
    async fn test_receive_once_acknowledges_successful_message() {
        let mut queue = AsyncQueue::new(
            Arc::new(consumer_delivering(1, 1)),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );

        let responses = queue.receive_once().await.unwrap();

        assert_eq!(responses.len(), 1);
        assert!(responses[0].success);
    }

    #[tokio::test]
    async fn test_receive_once_leaves_failed_message_unacknowledged() {
        let service = service_fn(|_req: ConsumeRequest| async move {
            Ok::<_, anyhow::Error>(ProcessResponse::failure("MockedFail"))
        });
        let mut queue = AsyncQueue::new(
            Arc::new(consumer_delivering(1, 0)),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            service,
        );

        let responses = queue.receive_once().await.unwrap();

        assert_eq!(responses.len(), 1);
        assert!(!responses[0].success);
        assert_eq!(responses[0].message, "MockedFail");
    }

    #[tokio::test]
    async fn test_receive_once_with_empty_wait() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream.expect_create_consumer().times(1).returning(|_, _| {
            let mut pull = MockPullConsumer::new();
            pull.expect_fetch_messages()
                .times(1)
                .returning(|_, _| Ok(vec![]));
            Ok(Box::new(pull))
        });
        let mut queue = AsyncQueue::new(
            Arc::new(jetstream),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );

        let responses = queue.receive_once().await.unwrap();
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_transport_failure() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));
        let queue = AsyncQueue::new(
            Arc::new(jetstream),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );

        let result = queue.run(CancellationToken::new()).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("failed to open queue consumer"));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream.expect_create_consumer().returning(|_, _| {
            let mut pull = MockPullConsumer::new();
            pull.expect_fetch_messages().returning(|_, _| Ok(vec![]));
            Ok(Box::new(pull))
        });
        let queue = AsyncQueue::new(
            Arc::new(jetstream),
            producer(),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );
        let ctx = CancellationToken::new();
        ctx.cancel();

        let result = queue.run(ctx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_message_defaults_to_own_queue() {
        let mut publisher = MockJetStreamPublisher::new();
        publisher
            .expect_publish()
            .withf(|subject: &String, _| subject == "work.envelopes")
            .times(1)
            .returning(|_, _| Ok(()));
        let queue = AsyncQueue::new(
            Arc::new(MockJetStreamConsumer::new()),
            EnvelopeProducer::new(Arc::new(publisher)),
            QueueConsumerConfig::new("work", "work-consumer"),
            DropMessageService,
        );
        let envelope = MessageEnvelope::new("X", Map::new(), Map::new(), "manual", 1688821684);

        let response = queue.send_message(&envelope, None).await;
        assert!(response.success);
    }
}
