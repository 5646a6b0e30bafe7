//! Controller error types.

use thiserror::Error;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::driver::DriverError;
use crate::model::ContainerState;
use crate::network::NetworkError;
use crate::store::StoreError;

/// Errors surfaced by the dispatcher and lifecycle controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The action is not legal in the container's current state.
    #[error("Cannot {action} container {uuid} in {state} state")]
    InvalidState {
        action: ActionKind,
        uuid: Uuid,
        state: ContainerState,
    },

    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// The identity does not resolve in the caller's scope.
    #[error("{0}")]
    NotFound(String),

    /// Version mismatch or duplicate name.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("store: {0}")]
    Store(StoreError),
}

impl ControllerError {
    pub fn container_not_found(ident: impl std::fmt::Display) -> Self {
        ControllerError::NotFound(format!("Container {} could not be found.", ident))
    }

    /// Failures of the runtime driver or network coordinator.
    pub fn is_collaborator(&self) -> bool {
        matches!(self, ControllerError::Driver(_) | ControllerError::Network(_))
    }
}

impl From<StoreError> for ControllerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ControllerError::NotFound(msg),
            StoreError::Conflict(msg) => ControllerError::Conflict(msg),
            StoreError::VersionMismatch { expected, actual } => ControllerError::Conflict(
                format!("Version mismatch: expected {}, got {}", expected, actual),
            ),
            other => ControllerError::Store(other),
        }
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
