mod envelope;
mod finding;
mod repository;
mod response;
mod result;

pub use envelope::*;
pub use finding::*;
pub use repository::*;
pub use response::*;
pub use result::*;
