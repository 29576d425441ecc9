use crate::{Event, MessageGroup, ObjectId, ProcessingState, Version};

/// Builder for filtering stored events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by object id.
    pub object_id: Option<ObjectId>,

    /// Filter by processing state (any of these).
    pub states: Option<Vec<ProcessingState>>,

    /// Filter by message group.
    pub group: Option<MessageGroup>,

    /// Filter by minimum version (inclusive).
    pub from_version: Option<Version>,

    /// Filter by maximum version (inclusive).
    pub to_version: Option<Version>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip.
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific object.
    pub fn for_object(object_id: impl Into<ObjectId>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            ..Default::default()
        }
    }

    pub fn object_id(mut self, object_id: impl Into<ObjectId>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn state(mut self, state: ProcessingState) -> Self {
        self.states = Some(vec![state]);
        self
    }

    pub fn states(mut self, states: Vec<ProcessingState>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn group(mut self, group: MessageGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `event` passes every filter of this query.
    ///
    /// Paging (`limit`/`offset`) is not part of matching.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref object_id) = self.object_id
            && &event.object_id != object_id
        {
            return false;
        }
        if let Some(ref states) = self.states
            && !states.contains(&event.state)
        {
            return false;
        }
        if let Some(group) = self.group
            && event.group != group
        {
            return false;
        }
        if let Some(from) = self.from_version
            && event.version < from
        {
            return false;
        }
        if let Some(to) = self.to_version
            && event.version > to
        {
            return false;
        }
        true
    }
}
