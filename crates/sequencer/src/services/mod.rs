//! Transform and publish collaborators with in-memory implementations.

pub mod publish;
pub mod transform;

pub use publish::{InMemoryPublishService, PublishReceipt, PublishService, PublishedMessage};
pub use transform::{InMemoryTransformService, TransformService};

/// Appends `item` to an exchange log, dropping the oldest entries beyond
/// `limit`.
pub(crate) fn record_bounded<T>(
    log: &mut std::collections::VecDeque<T>,
    limit: Option<usize>,
    item: T,
) {
    log.push_back(item);
    if let Some(limit) = limit {
        while log.len() > limit {
            log.pop_front();
        }
    }
}
