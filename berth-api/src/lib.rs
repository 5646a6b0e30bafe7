pub mod action;
pub mod audit;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod model;
pub mod network;
pub mod rest;
pub mod state;
pub mod store;
pub mod test_util;

pub use action::{Action, ActionKind, ActionParams};
pub use audit::ApiAuditLogger;
pub use config::ControllerConfig;
pub use context::{RequestContext, Scope};
pub use controller::{LifecycleController, Outcome, Tracking};
pub use dispatcher::Dispatcher;
pub use driver::{InMemoryRuntime, RuntimeDriver};
pub use error::{ControllerError, Result};
pub use model::{Container, ContainerState};
pub use network::{LocalNetworks, NetworkCoordinator};
pub use store::{ContainerStore, Event, MemoryStore, StoreError};
