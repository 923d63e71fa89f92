use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, MessageAcker, PullConsumer};
use crate::nats::{queue_subjects, QueueMessage};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig, stream::RetentionPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Shared connection to the NATS server.
///
/// One client is reused by every queue operation; consumers and publishes
/// borrow it per call and release their own handles when the call ends.
pub struct NatsClient {
    connection: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to queue broker");

        let connection = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to NATS at {url}"))?;
        let jetstream = jetstream::new(connection.clone());

        info!("connected to queue broker");
        Ok(Self {
            connection,
            jetstream,
        })
    }

    /// Ensure the work queue `queue_name` exists as a JetStream stream
    pub async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        if self.jetstream.get_stream(queue_name).await.is_ok() {
            info!(queue = %queue_name, "queue already exists");
            return Ok(());
        }

        self.jetstream
            .create_stream(queue_stream_config(queue_name))
            .await
            .with_context(|| format!("failed to create queue {queue_name}"))?;
        info!(queue = %queue_name, "created queue");
        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer {
            context: self.jetstream.clone(),
        })
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher {
            context: self.jetstream.clone(),
        })
    }

    /// Flush pending publishes; the socket closes with the last handle
    pub async fn close(self) {
        info!("closing queue broker connection");
        if let Err(e) = self.connection.flush().await {
            warn!(error = %e, "failed to flush queue broker connection");
        }
    }
}

/// Work-queue retention removes a message once it is acknowledged
fn queue_stream_config(queue_name: &str) -> StreamConfig {
    StreamConfig {
        name: queue_name.to_string(),
        subjects: vec![queue_subjects(queue_name)],
        retention: RetentionPolicy::WorkQueue,
        description: Some("Finding ingestion work queue".to_string()),
        ..Default::default()
    }
}

struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .with_context(|| format!("failed to open consumer on queue {stream_name}"))?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(&self, max_messages: usize, expires: Duration) -> Result<Vec<QueueMessage>> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to request messages from queue")?;

        // A broken delivery inside the batch is skipped; the broker redelivers it
        let delivered = batch
            .filter_map(|delivery| async move {
                match delivery {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable delivery");
                        None
                    }
                }
            })
            .map(|message| {
                QueueMessage::new(
                    message.subject.to_string(),
                    message.payload.clone(),
                    Box::new(NatsMessageAcker { message }),
                )
            })
            .collect()
            .await;

        Ok(delivered)
    }
}

struct NatsMessageAcker {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAcker for NatsMessageAcker {
    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("failed to acknowledge message: {e}"))
    }
}

struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    #[instrument(skip(self, payload), fields(subject = %subject, payload_bytes = payload.len()))]
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        self.context
            .publish(subject, payload)
            .await
            .context("failed to publish to queue")?
            .await
            .context("queue did not acknowledge the publish")?;
        Ok(())
    }
}
