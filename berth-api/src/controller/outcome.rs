//! What a lifecycle operation hands back to its caller.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::driver::{Archive, ContainerStats, ProcessList};
use crate::model::Container;

/// Handle for work that continues after the call returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Tracking {
    pub container: Uuid,
    pub action: ActionKind,
    pub request_id: Uuid,
    /// Exec instance started by `execute`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_id: Option<String>,
    /// Image reference produced by `commit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Tracking {
    pub fn new(container: Uuid, action: ActionKind) -> Self {
        Self {
            container,
            action,
            request_id: Uuid::new_v4(),
            exec_id: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttachInfo {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogOutput {
    pub logs: String,
}

/// Result of an operation that finished before returning.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionResult {
    Container(Container),
    Logs(LogOutput),
    Stats(ContainerStats),
    Top(ProcessList),
    Attach(AttachInfo),
    Archive(Archive),
    Empty,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(ActionResult),
    Accepted(Tracking),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn tracking(&self) -> Option<&Tracking> {
        match self {
            Outcome::Accepted(t) => Some(t),
            Outcome::Completed(_) => None,
        }
    }
}
