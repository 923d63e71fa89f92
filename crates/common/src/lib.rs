pub mod domain;
pub mod nats;
pub mod postgres;
pub mod telemetry;

pub use domain::*;
pub use nats::*;
pub use postgres::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEnvelopeSender;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockFindingRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockMessageAcker;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
