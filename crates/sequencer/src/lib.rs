//! Per-object ordered transform/publish pipeline.
//!
//! Events for one object id may arrive, and finish transforming, in any
//! order. The [`Dispatcher`] deduplicates them, records each in the object's
//! history, and publishes strictly in ascending version order: a version is
//! released only when it is exactly one above the object's watermark
//! ([`OrderingGate`]). Versions that are ready early stay buffered and are
//! released as soon as their predecessor's publish completes.
//!
//! Objects are independent. Exchanges with the transform and publish
//! collaborators ([`PipelineCoordinator`]) never hold a per-object lock.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod outcome;
pub mod registry;
pub mod services;

pub use config::SequencerConfig;
pub use coordinator::PipelineCoordinator;
pub use dispatcher::{Dispatcher, RestoreSummary};
pub use error::SequencerError;
pub use gate::OrderingGate;
pub use outcome::{Disposition, DropReason, Stage};
pub use registry::{HistoryRegistry, ObjectSlot};
pub use services::{
    InMemoryPublishService, InMemoryTransformService, PublishReceipt, PublishService,
    PublishedMessage, TransformService,
};
