//! The lifecycle controller.
//!
//! Every mutating operation validates the persisted state, takes the
//! container's lock, re-reads and re-validates the record, then calls the
//! network coordinator and runtime driver before persisting the result with
//! a version-checked update. Accepted operations move the lock guard into a
//! spawned task, so the lock stays held until the work is done.

mod lock;
mod outcome;

pub use crate::error::{ControllerError, Result};
pub use lock::{ContainerGuard, LockRegistry};
pub use outcome::{ActionResult, AttachInfo, LogOutput, Outcome, Tracking};

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action::{ActionKind, LogOptions};
use crate::audit::ApiAuditLogger;
use crate::config::ControllerConfig;
use crate::context::{RequestContext, Scope};
use crate::driver::RuntimeDriver;
use crate::model::{
    Container, ContainerPatch, ContainerSpec, ContainerState, NewContainer, RequestedNetwork,
};
use crate::network::{NetworkCoordinator, PortInfo};
use crate::state;
use crate::store::{ContainerStore, StoreError};

#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn ContainerStore>,
    driver: Arc<dyn RuntimeDriver>,
    network: Arc<dyn NetworkCoordinator>,
    locks: Arc<LockRegistry>,
    audit: Arc<ApiAuditLogger>,
    config: Arc<ControllerConfig>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn ContainerStore>,
        driver: Arc<dyn RuntimeDriver>,
        network: Arc<dyn NetworkCoordinator>,
        audit: Arc<ApiAuditLogger>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            driver,
            network,
            locks: Arc::new(LockRegistry::new()),
            audit,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContainerStore> {
        &self.store
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Wait until no action is in flight for the container.
    pub async fn settle(&self, uuid: Uuid) {
        drop(self.locks.acquire(uuid).await);
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn reload(&self, uuid: Uuid) -> Result<Container> {
        self.store
            .get_by_uuid(uuid)
            .await?
            .ok_or_else(|| ControllerError::container_not_found(uuid))
    }

    /// Validate, lock, then validate again against the record as it is once
    /// the lock is ours.
    async fn begin(
        &self,
        container: &Container,
        kind: ActionKind,
    ) -> Result<(ContainerGuard, Container)> {
        state::check(container, kind)?;
        let guard = self.locks.acquire(container.uuid).await;
        let current = self.reload(container.uuid).await?;
        state::check(&current, kind)?;
        Ok((guard, current))
    }

    async fn commit_transition(
        &self,
        container: &Container,
        patch: ContainerPatch,
    ) -> Result<Container> {
        Ok(self
            .store
            .update(container.uuid, patch, container.version)
            .await?)
    }

    async fn transition(
        &self,
        container: &Container,
        status: ContainerState,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.commit_transition(container, ContainerPatch::transition(status, reason))
            .await
            .map(drop)
    }

    fn spawn_action<F>(&self, guard: ContainerGuard, tracking: Tracking, work: F) -> Outcome
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let Tracking {
            container, action, ..
        } = tracking;
        self.audit
            .action_accepted(container, action, tracking.request_id);

        let controller = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match work.await {
                Ok(()) => debug!(container = %container, action = %action, "Action completed"),
                Err(e) => controller.record_failure(container, action, &e).await,
            }
        });

        Outcome::Accepted(tracking)
    }

    /// Collaborator failures leave the record in `Error` with the failure
    /// text as its reason. Other failures are only logged.
    async fn record_failure(&self, uuid: Uuid, action: ActionKind, err: &ControllerError) {
        let reason = err.to_string();
        warn!(container = %uuid, action = %action, error = %reason, "Action failed");
        self.audit.action_failed(uuid, action, &reason);

        if !err.is_collaborator() {
            return;
        }
        let marked = match self.reload(uuid).await {
            Ok(current) => self.transition(&current, ContainerState::Error, reason).await,
            Err(e) => Err(e),
        };
        if let Err(e) = marked {
            error!(container = %uuid, error = %e, "Failed to record error state");
        }
    }

    async fn fail<T>(&self, uuid: Uuid, action: ActionKind, err: ControllerError) -> Result<T> {
        self.record_failure(uuid, action, &err).await;
        Err(err)
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Persist the record in `Creating` and provision it in the background.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        spec: ContainerSpec,
        run: bool,
    ) -> Result<(Container, Tracking)> {
        let uuid = Uuid::new_v4();
        let guard = self.locks.acquire(uuid).await;

        let record = self
            .store
            .create(NewContainer {
                uuid,
                project_id: ctx.project_id.clone(),
                user_id: ctx.user_id.clone(),
                status: ContainerState::Creating,
                status_reason: Some("Creating container".to_string()),
                spec,
            })
            .await?;
        info!(container = %uuid, name = %record.name, project = %record.project_id, "Container record created");
        self.audit
            .container_created(uuid, &record.name, &record.project_id);

        let tracking = Tracking::new(uuid, ActionKind::Create);
        let this = self.clone();
        let target = record.clone();
        self.spawn_action(guard, tracking.clone(), async move {
            this.provision(target, run).await
        });

        Ok((record, tracking))
    }

    async fn provision(&self, record: Container, run: bool) -> Result<()> {
        let addresses = self
            .network
            .allocate_or_reuse(record.uuid, &record.requested_networks)
            .await?;
        // Ports are on the record before anything else can fail
        let bound = self
            .commit_transition(
                &record,
                ContainerPatch {
                    addresses: Some(addresses),
                    ..Default::default()
                },
            )
            .await?;
        for group in &bound.security_groups {
            self.network.add_security_group(bound.uuid, group).await?;
        }

        let created = self
            .commit_transition(
                &bound,
                ContainerPatch::transition(ContainerState::Created, "Container created"),
            )
            .await?;

        if run {
            self.driver.start(&created).await?;
            self.transition(&created, ContainerState::Running, "Container started")
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Status sync
    // =========================================================================

    /// Refresh a settled record from the runtime. Drift is persisted with a
    /// version-checked update. A runtime failure reports the container as
    /// `Unknown` without persisting it. Records with an action in flight are
    /// returned as stored.
    pub async fn sync_status(&self, container: Container) -> Container {
        use ContainerState::*;

        if !matches!(container.status, Running | Paused | Stopped)
            || self.locks.is_held(container.uuid)
        {
            return container;
        }

        match self.driver.inspect(&container).await {
            Ok(Some(observed)) if observed != container.status => {
                let patch =
                    ContainerPatch::transition(observed, format!("Runtime reports {}", observed));
                match self
                    .store
                    .update(container.uuid, patch, container.version)
                    .await
                {
                    Ok(synced) => {
                        info!(container = %synced.uuid, from = %container.status, to = %observed, "Container status synced");
                        synced
                    }
                    Err(e) => {
                        debug!(container = %container.uuid, error = %e, "Status sync lost a race");
                        container
                    }
                }
            }
            Ok(_) => container,
            Err(e) => {
                warn!(container = %container.uuid, error = %e, "Could not refresh container status");
                Container {
                    status: Unknown,
                    status_reason: Some(e.to_string()),
                    ..container
                }
            }
        }
    }

    // =========================================================================
    // Power actions
    // =========================================================================

    pub async fn start(&self, container: &Container) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Start).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Start),
            async move {
                this.driver.start(&current).await?;
                this.transition(&current, ContainerState::Running, "Container started")
                    .await
            },
        ))
    }

    pub async fn stop(&self, container: &Container, timeout: u64) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Stop).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Stop),
            async move {
                this.driver.stop(&current, timeout).await?;
                this.transition(&current, ContainerState::Stopped, "Container stopped")
                    .await
            },
        ))
    }

    pub async fn pause(&self, container: &Container) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Pause).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Pause),
            async move {
                this.driver.pause(&current).await?;
                this.transition(&current, ContainerState::Paused, "Container paused")
                    .await
            },
        ))
    }

    pub async fn unpause(&self, container: &Container) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Unpause).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Unpause),
            async move {
                this.driver.unpause(&current).await?;
                this.transition(&current, ContainerState::Running, "Container unpaused")
                    .await
            },
        ))
    }

    pub async fn reboot(&self, container: &Container, timeout: u64) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Reboot).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Reboot),
            async move {
                this.driver.reboot(&current, timeout).await?;
                this.transition(&current, ContainerState::Running, "Container rebooted")
                    .await
            },
        ))
    }

    pub async fn kill(&self, container: &Container, signal: Option<u32>) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Kill).await?;
        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Kill),
            async move {
                let still_running = this.driver.kill(&current, signal).await?;
                let status = if still_running {
                    current.status
                } else {
                    ContainerState::Stopped
                };
                let reason = match signal {
                    Some(s) => format!("Container killed with signal {}", s),
                    None => "Container killed".to_string(),
                };
                this.transition(&current, status, reason).await
            },
        ))
    }

    // =========================================================================
    // Exec and tty
    // =========================================================================

    pub async fn execute(
        &self,
        container: &Container,
        command: String,
        run: bool,
        interactive: bool,
    ) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Execute).await?;
        let exec_id = Uuid::new_v4().to_string();
        let tracking = Tracking {
            exec_id: Some(exec_id.clone()),
            ..Tracking::new(current.uuid, ActionKind::Execute)
        };

        let this = self.clone();
        Ok(self.spawn_action(guard, tracking, async move {
            let result = this
                .driver
                .exec(&current, &exec_id, &command, run, interactive)
                .await?;
            debug!(container = %current.uuid, exec_id = %exec_id, exit_code = ?result.exit_code, "Exec finished");
            Ok(())
        }))
    }

    /// Resizes an exec tty. Takes no lock and leaves the state alone.
    pub async fn exec_resize(
        &self,
        container: &Container,
        exec_id: &str,
        height: u32,
        width: u32,
    ) -> Result<Outcome> {
        state::check(container, ActionKind::ExecResize)?;
        self.driver
            .exec_resize(container, exec_id, height, width)
            .await?;
        Ok(Outcome::Completed(ActionResult::Empty))
    }

    pub async fn resize(&self, container: &Container, height: u32, width: u32) -> Result<Outcome> {
        let (_guard, current) = self.begin(container, ActionKind::Resize).await?;
        self.driver.resize(&current, height, width).await?;
        Ok(Outcome::Completed(ActionResult::Empty))
    }

    // =========================================================================
    // Read-only actions
    // =========================================================================

    pub async fn attach(&self, container: &Container) -> Result<Outcome> {
        state::check(container, ActionKind::Attach)?;
        let url = self.driver.attach(container).await?;
        Ok(Outcome::Completed(ActionResult::Attach(AttachInfo { url })))
    }

    pub async fn logs(&self, container: &Container, options: &LogOptions) -> Result<Outcome> {
        state::check(container, ActionKind::Logs)?;
        let logs = self.driver.logs(container, options).await?;
        Ok(Outcome::Completed(ActionResult::Logs(LogOutput { logs })))
    }

    pub async fn stats(&self, container: &Container) -> Result<Outcome> {
        state::check(container, ActionKind::Stats)?;
        let stats = self.driver.stats(container).await?;
        Ok(Outcome::Completed(ActionResult::Stats(stats)))
    }

    pub async fn top(&self, container: &Container, ps_args: Option<&str>) -> Result<Outcome> {
        state::check(container, ActionKind::Top)?;
        let processes = self.driver.top(container, ps_args).await?;
        Ok(Outcome::Completed(ActionResult::Top(processes)))
    }

    pub async fn get_archive(&self, container: &Container, path: &str) -> Result<Outcome> {
        state::check(container, ActionKind::GetArchive)?;
        let archive = self.driver.get_archive(container, path).await?;
        Ok(Outcome::Completed(ActionResult::Archive(archive)))
    }

    // =========================================================================
    // Synchronous mutations
    // =========================================================================

    pub async fn put_archive(&self, container: &Container, path: &str, data: &str) -> Result<Outcome> {
        let (_guard, current) = self.begin(container, ActionKind::PutArchive).await?;
        if let Err(e) = self.driver.put_archive(&current, path, data).await {
            return self.fail(current.uuid, ActionKind::PutArchive, e.into()).await;
        }
        Ok(Outcome::Completed(ActionResult::Empty))
    }

    pub async fn rename(&self, container: &Container, name: &str) -> Result<Outcome> {
        let same_name = || {
            ControllerError::Validation(
                "The new name for the container is the same as the old one.".to_string(),
            )
        };
        if container.name == name {
            return Err(same_name());
        }

        let (_guard, current) = self.begin(container, ActionKind::Rename).await?;
        if current.name == name {
            return Err(same_name());
        }
        let in_use = self
            .store
            .get_by_name(&Scope::Project(current.project_id.clone()), name)
            .await?
            .iter()
            .any(|c| c.uuid != current.uuid);
        if in_use {
            return Err(ControllerError::Conflict(format!(
                "A container with name {} already exists in project {}.",
                name, current.project_id
            )));
        }

        let renamed = self
            .commit_transition(
                &current,
                ContainerPatch {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.audit.container_renamed(current.uuid, &current.name, name);
        Ok(Outcome::Completed(ActionResult::Container(renamed)))
    }

    /// Change memory and cpu limits.
    pub async fn update(
        &self,
        container: &Container,
        memory: Option<String>,
        cpu: Option<f64>,
    ) -> Result<Outcome> {
        let (_guard, current) = self.begin(container, ActionKind::Update).await?;
        if let Err(e) = self.driver.update(&current, memory.as_deref(), cpu).await {
            return self.fail(current.uuid, ActionKind::Update, e.into()).await;
        }

        let updated = self
            .commit_transition(
                &current,
                ContainerPatch {
                    memory,
                    cpu,
                    ..Default::default()
                },
            )
            .await?;
        self.audit.container_updated(current.uuid);
        Ok(Outcome::Completed(ActionResult::Container(updated)))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    pub async fn delete(&self, container: &Container, force: bool) -> Result<Outcome> {
        if force {
            return self.force_delete(container).await;
        }

        let (guard, current) = self.begin(container, ActionKind::Delete).await?;
        let deleting = self
            .commit_transition(
                &current,
                ContainerPatch::transition(ContainerState::Deleting, "Deleting container"),
            )
            .await?;

        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::Delete),
            async move { this.teardown(deleting).await },
        ))
    }

    async fn teardown(&self, container: Container) -> Result<()> {
        self.driver.delete(&container, false).await?;
        let live = self.network.list_ports(container.uuid).await?;
        for network in bound_networks(&container, &live) {
            self.network.detach(container.uuid, &network).await?;
        }
        self.store.delete(container.uuid).await?;
        info!(container = %container.uuid, "Container deleted");
        self.audit.container_deleted(container.uuid, false);
        Ok(())
    }

    /// Legal from any state. Collaborator failures are logged and skipped;
    /// the record is always removed.
    async fn force_delete(&self, container: &Container) -> Result<Outcome> {
        let guard = self.locks.acquire(container.uuid).await;
        let current = self.reload(container.uuid).await?;
        let marked = match self
            .commit_transition(
                &current,
                ContainerPatch::transition(ContainerState::Deleting, "Force deleting container"),
            )
            .await
        {
            Ok(marked) => marked,
            Err(e) => {
                warn!(container = %current.uuid, error = %e, "Could not mark container as deleting");
                current
            }
        };

        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(marked.uuid, ActionKind::Delete),
            async move { this.force_teardown(marked).await },
        ))
    }

    async fn force_teardown(&self, container: Container) -> Result<()> {
        let uuid = container.uuid;
        if let Err(e) = self.driver.delete(&container, true).await {
            warn!(container = %uuid, error = %e, "Ignoring runtime failure during forced delete");
        }
        let live = match self.network.list_ports(uuid).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(container = %uuid, error = %e, "Could not list ports during forced delete");
                Vec::new()
            }
        };
        for network in bound_networks(&container, &live) {
            if let Err(e) = self.network.detach(uuid, &network).await {
                warn!(container = %uuid, network = %network, error = %e, "Ignoring detach failure during forced delete");
            }
        }
        match self.store.delete(uuid).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(container = %uuid, "Container force-deleted");
        self.audit.container_deleted(uuid, true);
        Ok(())
    }

    // =========================================================================
    // Networking
    // =========================================================================

    pub async fn network_attach(&self, container: &Container, network: &str) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::NetworkAttach).await?;
        if current.is_attached_to(network) {
            return Err(ControllerError::Validation(format!(
                "Container {} is already connected to network {}",
                current.uuid, network
            )));
        }

        let this = self.clone();
        let network = network.to_string();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::NetworkAttach),
            async move {
                let bindings = this
                    .network
                    .allocate_or_reuse(current.uuid, &[RequestedNetwork::network(network.clone())])
                    .await?;
                let mut addresses = current.addresses.clone();
                addresses.extend(bindings);
                this.commit_transition(
                    &current,
                    ContainerPatch {
                        addresses: Some(addresses),
                        status_reason: Some(format!("Attached to network {}", network)),
                        ..Default::default()
                    },
                )
                .await
                .map(drop)
            },
        ))
    }

    pub async fn network_detach(&self, container: &Container, network: &str) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::NetworkDetach).await?;
        if !current.is_attached_to(network) {
            return Err(ControllerError::Validation(format!(
                "Container {} is not connected to network {}",
                current.uuid, network
            )));
        }

        let this = self.clone();
        let network = network.to_string();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::NetworkDetach),
            async move {
                this.network.detach(current.uuid, &network).await?;
                let addresses = current
                    .addresses
                    .iter()
                    .filter(|b| b.network_id != network)
                    .cloned()
                    .collect();
                this.commit_transition(
                    &current,
                    ContainerPatch {
                        addresses: Some(addresses),
                        status_reason: Some(format!("Detached from network {}", network)),
                        ..Default::default()
                    },
                )
                .await
                .map(drop)
            },
        ))
    }

    /// True when the group is on the record or on any live port.
    async fn has_security_group(&self, container: &Container, group: &str) -> Result<bool> {
        if container.security_groups.iter().any(|g| g == group) {
            return Ok(true);
        }
        let ports = self.network.list_ports(container.uuid).await?;
        Ok(ports
            .iter()
            .any(|p| p.security_groups.iter().any(|g| g == group)))
    }

    pub async fn add_security_group(&self, container: &Container, group: Uuid) -> Result<Outcome> {
        let (guard, current) = self
            .begin(container, ActionKind::AddSecurityGroup)
            .await?;
        let group = group.to_string();
        if self.has_security_group(&current, &group).await? {
            return Err(ControllerError::Validation(format!(
                "security_group {} already present in container",
                group
            )));
        }

        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::AddSecurityGroup),
            async move {
                this.network
                    .add_security_group(current.uuid, &group)
                    .await?;
                let mut groups = current.security_groups.clone();
                groups.push(group);
                this.commit_transition(
                    &current,
                    ContainerPatch {
                        security_groups: Some(groups),
                        ..Default::default()
                    },
                )
                .await
                .map(drop)
            },
        ))
    }

    pub async fn remove_security_group(
        &self,
        container: &Container,
        group: Uuid,
    ) -> Result<Outcome> {
        let (guard, current) = self
            .begin(container, ActionKind::RemoveSecurityGroup)
            .await?;
        let group = group.to_string();
        if !self.has_security_group(&current, &group).await? {
            return Err(ControllerError::Validation(format!(
                "security_group {} not present in container",
                group
            )));
        }

        let this = self.clone();
        Ok(self.spawn_action(
            guard,
            Tracking::new(current.uuid, ActionKind::RemoveSecurityGroup),
            async move {
                this.network
                    .remove_security_group(current.uuid, &group)
                    .await?;
                let groups = current
                    .security_groups
                    .iter()
                    .filter(|g| **g != group)
                    .cloned()
                    .collect();
                this.commit_transition(
                    &current,
                    ContainerPatch {
                        security_groups: Some(groups),
                        ..Default::default()
                    },
                )
                .await
                .map(drop)
            },
        ))
    }

    // =========================================================================
    // Commit
    // =========================================================================

    pub async fn commit(
        &self,
        container: &Container,
        repository: &str,
        tag: Option<&str>,
    ) -> Result<Outcome> {
        let (guard, current) = self.begin(container, ActionKind::Commit).await?;
        let repository = repository.to_string();
        let tag = tag.unwrap_or("latest").to_string();
        let tracking = Tracking {
            image: Some(format!("{}:{}", repository, tag)),
            ..Tracking::new(current.uuid, ActionKind::Commit)
        };

        let this = self.clone();
        Ok(self.spawn_action(guard, tracking, async move {
            let image = this.driver.commit(&current, &repository, &tag).await?;
            info!(container = %current.uuid, image = %image, "Container committed");
            Ok(())
        }))
    }
}

/// Distinct networks the container holds ports on: the bindings on the
/// record first, then any live port the record never learned about.
fn bound_networks(container: &Container, live: &[PortInfo]) -> Vec<String> {
    let recorded = container.addresses.iter().map(|b| &b.network_id);
    let mut networks: Vec<String> = Vec::new();
    for network in recorded.chain(live.iter().map(|p| &p.network_id)) {
        if !networks.contains(network) {
            networks.push(network.clone());
        }
    }
    networks
}
