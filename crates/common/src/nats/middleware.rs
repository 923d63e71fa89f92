mod consume_logging;

pub use consume_logging::*;
