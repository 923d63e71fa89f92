use crate::domain::ProcessResponse;
use crate::nats::{ConsumeRequest, QueueMessage};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tower::{Service, ServiceExt};
use tracing::{debug, error, warn};

/// Hand one delivered message to the processing service and gate the
/// acknowledgment on its outcome.
///
/// The message is acknowledged iff the response reports success. Service
/// errors, panics and deadline expiry become failure responses; in every
/// failure case the message is left unacknowledged for redelivery.
pub(crate) async fn process_delivery<S>(
    service: &mut S,
    message: QueueMessage,
    handler_timeout: Duration,
) -> ProcessResponse
where
    S: Service<ConsumeRequest, Response = ProcessResponse, Error = anyhow::Error> + Send,
    S::Future: Send,
{
    let request = ConsumeRequest::new(message.subject.clone(), message.payload.clone());
    let response = invoke(service, request, handler_timeout).await;

    if response.success {
        match message.ack().await {
            Ok(()) => debug!(subject = %message.subject, "acknowledged message"),
            Err(e) => error!(
                subject = %message.subject,
                error = %e,
                "failed to acknowledge message"
            ),
        }
    } else {
        warn!(
            subject = %message.subject,
            reason = %response.message,
            "leaving message unacknowledged for redelivery"
        );
    }

    response
}

async fn invoke<S>(service: &mut S, request: ConsumeRequest, handler_timeout: Duration) -> ProcessResponse
where
    S: Service<ConsumeRequest, Response = ProcessResponse, Error = anyhow::Error> + Send,
    S::Future: Send,
{
    let subject = request.subject.clone();
    let call = async move { service.ready().await?.call(request).await };

    match tokio::time::timeout(handler_timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(Ok(response))) => response,
        Ok(Ok(Err(e))) => {
            error!(subject = %subject, error = %e, "service error processing message");
            ProcessResponse::failure(format!("Error : {e:#}"))
        }
        Ok(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!(subject = %subject, reason = %reason, "handler panicked while processing message");
            ProcessResponse::failure(format!("Handler panicked: {reason}"))
        }
        Err(_) => {
            error!(
                subject = %subject,
                timeout_secs = handler_timeout.as_secs(),
                "handler exceeded its deadline"
            );
            ProcessResponse::failure(format!(
                "Handler exceeded deadline of {}s",
                handler_timeout.as_secs()
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockMessageAcker;
    use bytes::Bytes;
    use tower::service_fn;

    fn message_expecting_acks(times: usize) -> QueueMessage {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().times(times).returning(|| Ok(()));
        QueueMessage::new("work.envelopes", Bytes::from("{}"), Box::new(acker))
    }

    #[tokio::test]
    async fn test_success_acknowledges() {
        let mut service = service_fn(|_req: ConsumeRequest| async move {
            Ok::<_, anyhow::Error>(ProcessResponse::ok("done"))
        });

        let response =
            process_delivery(&mut service, message_expecting_acks(1), Duration::from_secs(5)).await;

        assert!(response.success);
    }

    #[tokio::test]
    async fn test_failure_leaves_message_unacknowledged() {
        let mut service = service_fn(|_req: ConsumeRequest| async move {
            Ok::<_, anyhow::Error>(ProcessResponse::failure("MockedFail"))
        });

        let response =
            process_delivery(&mut service, message_expecting_acks(0), Duration::from_secs(5)).await;

        assert!(!response.success);
        assert_eq!(response.message, "MockedFail");
    }

    #[tokio::test]
    async fn test_service_error_becomes_failure_response() {
        let mut service = service_fn(|_req: ConsumeRequest| async move {
            Err::<ProcessResponse, _>(anyhow::anyhow!("database unreachable"))
        });

        let response =
            process_delivery(&mut service, message_expecting_acks(0), Duration::from_secs(5)).await;

        assert!(!response.success);
        assert_eq!(response.message, "Error : database unreachable");
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_response() {
        let mut service = service_fn(|req: ConsumeRequest| async move {
            if req.payload.len() < 100 {
                panic!("handler blew up");
            }
            Ok::<_, anyhow::Error>(ProcessResponse::ok("unreachable"))
        });

        let response =
            process_delivery(&mut service, message_expecting_acks(0), Duration::from_secs(5)).await;

        assert!(!response.success);
        assert_eq!(response.message, "Handler panicked: handler blew up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_becomes_failure_response() {
        let mut service = service_fn(|_req: ConsumeRequest| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, anyhow::Error>(ProcessResponse::ok("too late"))
        });

        let response =
            process_delivery(&mut service, message_expecting_acks(0), Duration::from_secs(1)).await;

        assert!(!response.success);
        assert_eq!(response.message, "Handler exceeded deadline of 1s");
    }

    #[tokio::test]
    async fn test_ack_failure_keeps_success_response() {
        let mut acker = MockMessageAcker::new();
        acker
            .expect_ack()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("connection reset")));
        let message = QueueMessage::new("work.envelopes", Bytes::from("{}"), Box::new(acker));
        let mut service = service_fn(|_req: ConsumeRequest| async move {
            Ok::<_, anyhow::Error>(ProcessResponse::ok("done"))
        });

        let response = process_delivery(&mut service, message, Duration::from_secs(5)).await;

        assert!(response.success);
    }
}
