mod collector;
mod error;
mod normalize;
mod page;
mod paginator;
mod retry;

pub use collector::*;
pub use error::*;
pub use normalize::*;
pub use page::*;
pub use paginator::*;
pub use retry::*;
