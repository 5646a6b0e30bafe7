//! Test utilities: instrumented collaborators and a wired-up controller.
//!
//! Used by the unit tests in this crate and by the integration tests under
//! `tests/`.

mod driver;
mod network;

pub use driver::{DriverCall, RecordingDriver};
pub use network::{NetworkCall, RecordingNetworks};

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::ApiAuditLogger;
use crate::config::ControllerConfig;
use crate::context::RequestContext;
use crate::controller::LifecycleController;
use crate::dispatcher::Dispatcher;
use crate::model::{
    Container, ContainerPatch, ContainerState, CreateRequest, ImageDriver, NewContainer,
};
use crate::store::{ContainerStore, MemoryStore};

/// A record that never went through a store, in `Created`.
pub fn sample_container(name: &str) -> Container {
    Container {
        uuid: Uuid::new_v4(),
        id: 1,
        name: name.to_string(),
        project_id: "demo".to_string(),
        user_id: "alice".to_string(),
        status: ContainerState::Created,
        status_reason: None,
        image: "ubuntu".to_string(),
        image_tag: "latest".to_string(),
        image_driver: ImageDriver::Docker,
        image_pull_policy: None,
        command: Some("env".to_string()),
        memory: Some("512M".to_string()),
        cpu: None,
        environment: BTreeMap::new(),
        workdir: None,
        labels: BTreeMap::new(),
        restart_policy: None,
        interactive: false,
        requested_networks: Vec::new(),
        security_groups: Vec::new(),
        addresses: Vec::new(),
        version: 1,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

/// Insert payload for a `Creating` ubuntu container.
pub fn new_container(project_id: &str, name: &str) -> NewContainer {
    let spec = CreateRequest {
        name: Some(name.to_string()),
        image: "ubuntu".to_string(),
        command: Some("env".to_string()),
        memory: Some("512".to_string()),
        ..Default::default()
    }
    .validate(&ControllerConfig::default())
    .expect("valid create request");

    NewContainer {
        uuid: Uuid::new_v4(),
        project_id: project_id.to_string(),
        user_id: "alice".to_string(),
        status: ContainerState::Creating,
        status_reason: None,
        spec,
    }
}

/// Controller and dispatcher wired to in-memory, instrumented collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub driver: Arc<RecordingDriver>,
    pub networks: Arc<RecordingNetworks>,
    pub controller: LifecycleController,
    pub dispatcher: Dispatcher,
    pub context: RequestContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let driver = Arc::new(RecordingDriver::new());
        let networks = Arc::new(RecordingNetworks::new(&config.default_network));
        let controller = LifecycleController::new(
            store.clone(),
            driver.clone(),
            networks.clone(),
            Arc::new(ApiAuditLogger::new_noop()),
            config,
        );
        let dispatcher = Dispatcher::new(controller.clone());

        Self {
            store,
            driver,
            networks,
            controller,
            dispatcher,
            context: RequestContext::new("demo", "alice"),
        }
    }

    /// Create a container and wait until it has left `Creating`.
    pub async fn create(&self, name: &str) -> Container {
        self.create_with(name, false).await
    }

    /// Create a container with `run=true` and wait for it to be started.
    pub async fn create_running(&self, name: &str) -> Container {
        self.create_with(name, true).await
    }

    async fn create_with(&self, name: &str, run: bool) -> Container {
        let spec = CreateRequest {
            name: Some(name.to_string()),
            image: "ubuntu".to_string(),
            command: Some("env".to_string()),
            memory: Some("512".to_string()),
            ..Default::default()
        }
        .validate(self.controller.config())
        .expect("valid create request");

        let (record, _) = self
            .controller
            .create(&self.context, spec, run)
            .await
            .expect("create container");
        self.settle(record.uuid).await;
        self.reload(record.uuid).await
    }

    pub async fn settle(&self, uuid: Uuid) {
        self.controller.settle(uuid).await;
    }

    pub async fn find(&self, uuid: Uuid) -> Option<Container> {
        self.store.get_by_uuid(uuid).await.expect("store read")
    }

    pub async fn reload(&self, uuid: Uuid) -> Container {
        self.find(uuid).await.expect("container exists")
    }

    /// Force a state directly in the store, bypassing the controller.
    pub async fn set_state(&self, container: &Container, state: ContainerState) -> Container {
        let current = self.reload(container.uuid).await;
        self.store
            .update(
                current.uuid,
                ContainerPatch::transition(state, "set by test"),
                current.version,
            )
            .await
            .expect("state update")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
