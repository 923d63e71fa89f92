use crate::domain::ProcessResponse;
use crate::nats::ConsumeRequest;
use futures::future::{ready, Ready};
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;

/// Default message processor: treats every message as handled.
///
/// Queue consumers are built over any `Service<ConsumeRequest>`; handlers
/// replace this one with a service that dispatches by handler name.
#[derive(Debug, Clone, Default)]
pub struct DropMessageService;

impl Service<ConsumeRequest> for DropMessageService {
    type Response = ProcessResponse;
    type Error = anyhow::Error;
    type Future = Ready<Result<ProcessResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        debug!(subject = %req.subject, payload_bytes = req.payload.len(), "dropping message");
        ready(Ok(ProcessResponse::ok("Default response. Message dropped.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_default_processor_reports_success() {
        let response = DropMessageService
            .oneshot(ConsumeRequest::new("q.envelopes".to_string(), Bytes::from("{}")))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.message, "Default response. Message dropped.");
    }
}
