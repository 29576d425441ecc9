//! Types shared by every crate of the ordered event pipeline.

pub mod types;

pub use types::ObjectId;
