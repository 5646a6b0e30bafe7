use serde::Serialize;
use utoipa::ToSchema;

use crate::model::Container;
use crate::store::Event;

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Response for listing containers
#[derive(Serialize, ToSchema)]
pub struct ContainerListResponse {
    pub containers: Vec<Container>,
}

/// Payload of one server-sent container event
#[derive(Serialize, ToSchema)]
pub struct ContainerEvent {
    /// created, updated or deleted
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    /// Record after the change; absent for deletions
    pub container: Option<Container>,
}

impl From<&Event> for ContainerEvent {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.kind().to_string(),
            id: event.container_id().to_string(),
            container: event.container().cloned(),
        }
    }
}
