use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::domain::ProcessResponse;
use crate::nats::ConsumeRequest;
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Tower layer that logs the outcome of every consumed queue message
#[derive(Clone, Default)]
pub struct QueueConsumeLoggingLayer;

impl QueueConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for QueueConsumeLoggingLayer {
    type Service = QueueConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        QueueConsumeLoggingService { inner: service }
    }
}

/// Service that logs single message consumption
#[derive(Clone)]
pub struct QueueConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for QueueConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ProcessResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_size = req.payload.len();
        let start = Instant::now();
        // Take the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(response) if response.success => {
                        info!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            outcome = "ack",
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms [ack]"
                        );
                    }
                    Ok(response) => {
                        warn!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            outcome = "unacked",
                            duration_ms = %duration_ms,
                            reason = %response.message,
                            "consumed from {subject} in {duration_ms}ms [unacked]"
                        );
                    }
                    Err(e) => {
                        error!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {subject} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
