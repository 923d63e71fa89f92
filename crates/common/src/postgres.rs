mod client;
mod config;
mod finding_repository;
mod schema;
mod writer;

pub use client::*;
pub use config::*;
pub use finding_repository::*;
pub use schema::*;
pub use writer::*;
