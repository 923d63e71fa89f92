use crate::domain::{DomainResult, EnvelopeSender, MessageEnvelope, ProcessResponse};
use crate::nats::{envelope_subject, JetStreamPublisher};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Publishes message envelopes onto named queues
#[derive(Clone)]
pub struct EnvelopeProducer {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl EnvelopeProducer {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }

    /// Serialize an envelope into its wire message
    pub fn generate_message(&self, envelope: &MessageEnvelope) -> DomainResult<Bytes> {
        envelope.to_wire()
    }
}

#[async_trait]
impl EnvelopeSender for EnvelopeProducer {
    #[instrument(skip(self, envelope), fields(queue = %queue, handler = %envelope.handler_name))]
    async fn send_message(&self, envelope: &MessageEnvelope, queue: &str) -> ProcessResponse {
        let payload = match self.generate_message(envelope) {
            Ok(payload) => payload,
            Err(e) => return ProcessResponse::failure(e.to_string()),
        };

        match self.publisher.publish(envelope_subject(queue), payload).await {
            Ok(()) => {
                debug!(queue = %queue, "sent envelope");
                ProcessResponse::ok(format!("Sent message to {queue}"))
            }
            Err(e) => {
                error!(queue = %queue, error = %e, "failed to send envelope");
                ProcessResponse::failure(format!("{e:#}"))
            }
        }
    }
}
