//! Events emitted by record changes.

use uuid::Uuid;

use crate::model::Container;

/// Events emitted when a container record changes.
///
/// These events are dispatched via a broadcast channel to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new record was inserted.
    ContainerCreated(Container),
    /// A record was updated.
    ContainerUpdated {
        id: Uuid,
        old: Container,
        new: Container,
    },
    /// A record was removed.
    ContainerDeleted { id: Uuid, project_id: String },
}

impl Event {
    /// Short name of the change.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ContainerCreated(_) => "created",
            Event::ContainerUpdated { .. } => "updated",
            Event::ContainerDeleted { .. } => "deleted",
        }
    }

    /// Get the container UUID for this event.
    pub fn container_id(&self) -> Uuid {
        match self {
            Event::ContainerCreated(c) => c.uuid,
            Event::ContainerUpdated { id, .. } => *id,
            Event::ContainerDeleted { id, .. } => *id,
        }
    }

    /// Project owning the record.
    pub fn project_id(&self) -> &str {
        match self {
            Event::ContainerCreated(c) => &c.project_id,
            Event::ContainerUpdated { new, .. } => &new.project_id,
            Event::ContainerDeleted { project_id, .. } => project_id,
        }
    }

    /// Record state after the change, when one still exists.
    pub fn container(&self) -> Option<&Container> {
        match self {
            Event::ContainerCreated(c) => Some(c),
            Event::ContainerUpdated { new, .. } => Some(new),
            Event::ContainerDeleted { .. } => None,
        }
    }
}
