pub mod domain;
pub mod http;

pub use domain::*;
pub use http::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCollector;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPageSource;
