//! Shared application state.

use event_store::{EventStore, HistoryStore};
use sequencer::{Dispatcher, InMemoryPublishService, InMemoryTransformService};

/// Dispatcher wired to the simulated transform and publish collaborators.
pub type PipelineDispatcher<E, H> =
    Dispatcher<E, H, InMemoryTransformService, InMemoryPublishService>;

/// Shared application state accessible from all handlers.
pub struct AppState<E: EventStore, H: HistoryStore> {
    pub dispatcher: PipelineDispatcher<E, H>,
    /// Handles on the collaborators the dispatcher talks to.
    pub transform: InMemoryTransformService,
    pub publish: InMemoryPublishService,
}
