use crate::domain::Dispatcher;
use crate::nats::DispatchService;
use anyhow::{anyhow, bail, Context, Result};
use common::nats::{
    AsyncQueue, BlockingQueue, EnvelopeProducer, JetStreamConsumer, QueueConsumeLoggingLayer,
    QueueConsumeLoggingService, QueueConsumerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

/// Delivery model of the worker's queue consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Suspend-on-I/O consumer on the async runtime
    Async,
    /// Dedicated OS thread blocking on each receive
    Blocking,
}

impl ConsumerMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "async" => Ok(ConsumerMode::Async),
            "blocking" => Ok(ConsumerMode::Blocking),
            other => bail!("unknown consumer mode {other:?}, expected \"async\" or \"blocking\""),
        }
    }
}

pub struct IngestWorkerConfig {
    pub source_queue: String,
    pub consumer_name: String,
    pub mode: ConsumerMode,
    pub receive_wait: Duration,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub handler_timeout: Duration,
}

impl IngestWorkerConfig {
    fn consumer_config(&self) -> QueueConsumerConfig {
        QueueConsumerConfig::new(&self.source_queue, &self.consumer_name)
            .with_max_wait(self.receive_wait)
            .with_ack_wait(self.ack_wait)
            .with_max_deliver(self.max_deliver)
            .with_handler_timeout(self.handler_timeout)
    }
}

/// Consumes envelopes from the source queue and dispatches them
pub struct IngestWorker {
    dispatcher: Arc<Dispatcher>,
    jetstream: Arc<dyn JetStreamConsumer>,
    producer: EnvelopeProducer,
    config: IngestWorkerConfig,
}

impl IngestWorker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        jetstream: Arc<dyn JetStreamConsumer>,
        producer: EnvelopeProducer,
        config: IngestWorkerConfig,
    ) -> Self {
        info!(
            queue = %config.source_queue,
            mode = ?config.mode,
            "Initializing ingest worker"
        );
        Self {
            dispatcher,
            jetstream,
            producer,
            config,
        }
    }

    fn service(&self) -> QueueConsumeLoggingService<DispatchService> {
        ServiceBuilder::new()
            .layer(QueueConsumeLoggingLayer::new())
            .service(DispatchService::new(Arc::clone(&self.dispatcher)))
    }

    /// Consume until `ctx` is cancelled or the transport fails
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let service = self.service();
        let consumer_config = self.config.consumer_config();

        match self.config.mode {
            ConsumerMode::Async => {
                AsyncQueue::new(self.jetstream, self.producer, consumer_config, service)
                    .run(ctx)
                    .await
            }
            ConsumerMode::Blocking => {
                let queue = BlockingQueue::new(
                    Handle::current(),
                    self.jetstream,
                    self.producer,
                    consumer_config,
                    service,
                );
                let thread = queue
                    .spawn(ctx)
                    .context("failed to spawn blocking consumer thread")?;

                tokio::task::spawn_blocking(move || thread.join())
                    .await
                    .context("failed to join blocking consumer thread")?
                    .map_err(|_| anyhow!("blocking consumer thread panicked"))?
            }
        }
    }
}
