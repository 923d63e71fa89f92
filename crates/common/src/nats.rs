mod async_queue;
mod blocking_queue;
mod client;
mod delivery;
mod middleware;
mod processor;
mod producer;
mod traits;
mod types;

pub use async_queue::*;
pub use blocking_queue::*;
pub use client::*;
pub use middleware::*;
pub use processor::*;
pub use producer::*;
pub use traits::*;
pub use types::*;
