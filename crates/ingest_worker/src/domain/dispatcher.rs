use crate::domain::{Destination, HandlerRegistry};
use chrono::Utc;
use common::domain::{
    DomainError, EnvelopeSender, Finding, FindingRepository, MessageEnvelope, OnConflict,
    ProcessResponse, UpsertFindingsInput,
};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Handler name of envelopes carrying already-normalized findings
pub const FORWARDED_FINDINGS_HANDLER: &str = "VoltronFindings";
/// `messageSource` of envelopes the dispatcher forwards
pub const DISPATCHER_SOURCE: &str = "voltron-dispatcher";

/// Progress of one message through the dispatcher.
///
/// The transport acknowledges the message after [`DispatchStage::Persisted`]
/// is reached; a failure at any stage leaves it unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    HandlerResolved,
    Collected,
    Normalized,
    Persisted,
}

impl DispatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStage::Received => "RECEIVED",
            DispatchStage::HandlerResolved => "HANDLER_RESOLVED",
            DispatchStage::Collected => "COLLECTED",
            DispatchStage::Normalized => "NORMALIZED",
            DispatchStage::Persisted => "PERSISTED",
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct DispatchFailure {
    stage: DispatchStage,
    error: DomainError,
}

impl DispatchFailure {
    fn at(stage: DispatchStage) -> impl FnOnce(DomainError) -> Self {
        move |error| Self { stage, error }
    }
}

struct DispatchOutcome {
    findings: usize,
    skipped: usize,
    destination: Destination,
}

/// Routes envelopes to their registered handler: collect, normalize,
/// then persist to the handler's destination.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    repository: Arc<dyn FindingRepository>,
    sender: Arc<dyn EnvelopeSender>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        repository: Arc<dyn FindingRepository>,
        sender: Arc<dyn EnvelopeSender>,
    ) -> Self {
        Self {
            registry,
            repository,
            sender,
        }
    }

    /// Process one wire message. Never panics on bad input; every failure is
    /// reported in the returned response.
    #[instrument(skip_all, fields(payload_bytes = payload.len()))]
    pub async fn dispatch(&self, payload: &[u8]) -> ProcessResponse {
        match MessageEnvelope::from_wire(payload) {
            Ok(envelope) => self.dispatch_envelope(&envelope).await,
            Err(error) => {
                warn!(error = %error, "rejecting malformed message");
                ProcessResponse::failure(error.to_string())
                    .with_data("handler", Value::Null)
                    .with_data("failedStage", DispatchStage::Received.as_str())
            }
        }
    }

    #[instrument(skip_all, fields(handler = %envelope.handler_name, source = %envelope.message_source))]
    pub async fn dispatch_envelope(&self, envelope: &MessageEnvelope) -> ProcessResponse {
        match self.run(envelope).await {
            Ok(outcome) => {
                info!(
                    findings = outcome.findings,
                    skipped = outcome.skipped,
                    destination = %outcome.destination,
                    "dispatched message"
                );
                ProcessResponse::ok(format!("Processed {} findings", outcome.findings))
                    .with_data("handler", envelope.handler_name.as_str())
                    .with_data("findings", outcome.findings)
                    .with_data("skipped", outcome.skipped)
                    .with_data("destination", outcome.destination.to_string())
            }
            Err(DispatchFailure { stage, error }) => {
                warn!(stage = %stage, error = %error, "dispatch failed");
                ProcessResponse::failure(error.to_string())
                    .with_data("handler", envelope.handler_name.as_str())
                    .with_data("failedStage", stage.as_str())
            }
        }
    }

    async fn run(&self, envelope: &MessageEnvelope) -> Result<DispatchOutcome, DispatchFailure> {
        let mut stage = DispatchStage::Received;

        let handler = self
            .registry
            .resolve(&envelope.handler_name)
            .ok_or_else(|| DomainError::UnknownHandler(envelope.handler_name.clone()))
            .map_err(DispatchFailure::at(stage))?;
        let destination = Destination::resolve(&handler.destination, &envelope.handler_config)
            .map_err(DispatchFailure::at(stage))?;
        stage = advance(stage, DispatchStage::HandlerResolved);

        let raw = handler
            .collector
            .collect(envelope)
            .await
            .map_err(|e| DomainError::CollectionFailed(e.to_string()))
            .map_err(DispatchFailure::at(stage))?;
        stage = advance(stage, DispatchStage::Collected);

        let batch = handler.normalizer.normalize_batch(&raw, Utc::now());
        let findings = batch.findings.len();
        let skipped = batch.rejected.len();
        stage = advance(stage, DispatchStage::Normalized);

        self.persist(batch.findings, &destination)
            .await
            .map_err(DispatchFailure::at(stage))?;
        advance(stage, DispatchStage::Persisted);

        Ok(DispatchOutcome {
            findings,
            skipped,
            destination,
        })
    }

    async fn persist(&self, findings: Vec<Finding>, destination: &Destination) -> Result<(), DomainError> {
        match destination {
            Destination::Table(table) => {
                self.repository
                    .upsert_findings(UpsertFindingsInput {
                        table: table.clone(),
                        findings,
                        on_conflict: OnConflict::refresh_extract_date(),
                    })
                    .await?;
                Ok(())
            }
            Destination::Queue(queue) => {
                let envelope = forwarded_findings_envelope(&findings)?;
                let response = self.sender.send_message(&envelope, queue).await;
                if response.success {
                    Ok(())
                } else {
                    Err(DomainError::PublishFailed(response.message))
                }
            }
        }
    }
}

fn advance(from: DispatchStage, to: DispatchStage) -> DispatchStage {
    debug!(from = %from, to = %to, "dispatch stage");
    to
}

/// Envelope that hands normalized findings to the next queue
pub fn forwarded_findings_envelope(findings: &[Finding]) -> Result<MessageEnvelope, DomainError> {
    let findings = serde_json::to_value(findings)
        .map_err(|e| DomainError::PublishFailed(format!("failed to encode findings: {e}")))?;
    let mut handler_data = Map::new();
    handler_data.insert("findings".to_string(), findings);

    Ok(MessageEnvelope::new(
        FORWARDED_FINDINGS_HANDLER,
        Map::new(),
        handler_data,
        DISPATCHER_SOURCE,
        Utc::now().timestamp(),
    ))
}
