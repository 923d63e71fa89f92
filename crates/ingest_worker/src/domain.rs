mod destination;
mod dispatcher;
mod handler_registry;

pub use destination::*;
pub use dispatcher::*;
pub use handler_registry::*;
