use crate::domain::Dispatcher;
use common::domain::ProcessResponse;
use common::nats::ConsumeRequest;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;

/// Tower service handing each consumed message to the [`Dispatcher`]
#[derive(Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<ConsumeRequest> for DispatchService {
    type Response = ProcessResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ProcessResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);

        Box::pin(async move {
            debug!(subject = %req.subject, "dispatching message");
            Ok(dispatcher.dispatch(&req.payload).await)
        })
    }
}
