//! Maps `(container, action name, parameters)` onto controller operations.

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::action::{Action, ActionKind, ActionParams, parse_bool};
use crate::context::RequestContext;
use crate::controller::{LifecycleController, Outcome, Tracking};
use crate::error::{ControllerError, Result};
use crate::model::{Container, ContainerState, CreateRequest, UpdateRequest};
use crate::store::{ContainerStore, Event, ListFilters, ListQuery, SortDir, SortKey};

/// Resolves targets within the caller's scope and forwards parsed actions.
#[derive(Clone)]
pub struct Dispatcher {
    controller: LifecycleController,
}

impl Dispatcher {
    pub fn new(controller: LifecycleController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    fn store(&self) -> &dyn ContainerStore {
        self.controller.store().as_ref()
    }

    /// Subscribe to record change events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.store().subscribe()
    }

    /// Find a container by UUID or by a name that is unique in scope.
    pub async fn resolve(&self, ctx: &RequestContext, ident: &str) -> Result<Container> {
        let scope = ctx.scope();

        if let Ok(uuid) = Uuid::parse_str(ident) {
            return match self.store().get_by_uuid(uuid).await? {
                Some(c) if scope.contains(&c) => Ok(c),
                _ => Err(ControllerError::container_not_found(ident)),
            };
        }

        let mut found = self.store().get_by_name(&scope, ident).await?;
        match found.len() {
            0 => Err(ControllerError::container_not_found(ident)),
            1 => Ok(found.remove(0)),
            _ => Err(ControllerError::Validation(format!(
                "Multiple containers exist with name {}. Please use the container uuid instead.",
                ident
            ))),
        }
    }

    /// Parse `action` and its parameters, resolve the target and run it.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        ident: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<Outcome> {
        let kind = ActionKind::from_name(action)
            .ok_or_else(|| ControllerError::Validation(format!("Unknown action {}", action)))?;
        let action = Action::parse(kind, params, self.controller.config())?;
        let container = self.resolve(ctx, ident).await?;
        debug!(container = %container.uuid, action = %kind, "Dispatching action");
        self.execute(&container, action).await
    }

    pub async fn execute(&self, container: &Container, action: Action) -> Result<Outcome> {
        let c = &self.controller;
        match action {
            Action::Start => c.start(container).await,
            Action::Stop { timeout } => c.stop(container, timeout).await,
            Action::Pause => c.pause(container).await,
            Action::Unpause => c.unpause(container).await,
            Action::Reboot { timeout } => c.reboot(container, timeout).await,
            Action::Kill { signal } => c.kill(container, signal).await,
            Action::Execute {
                command,
                run,
                interactive,
            } => c.execute(container, command, run, interactive).await,
            Action::ExecResize {
                exec_id,
                height,
                width,
            } => c.exec_resize(container, &exec_id, height, width).await,
            Action::Resize { height, width } => c.resize(container, height, width).await,
            Action::Attach => c.attach(container).await,
            Action::GetArchive { path } => c.get_archive(container, &path).await,
            Action::PutArchive { path, data } => c.put_archive(container, &path, &data).await,
            Action::Top { ps_args } => c.top(container, ps_args.as_deref()).await,
            Action::Stats => c.stats(container).await,
            Action::Logs(options) => c.logs(container, &options).await,
            Action::Commit { repository, tag } => {
                c.commit(container, &repository, tag.as_deref()).await
            }
            Action::Rename { name } => c.rename(container, &name).await,
            Action::Delete { force } => c.delete(container, force).await,
            Action::NetworkAttach { network } => c.network_attach(container, &network).await,
            Action::NetworkDetach { network } => c.network_detach(container, &network).await,
            Action::AddSecurityGroup { group } => c.add_security_group(container, group).await,
            Action::RemoveSecurityGroup { group } => {
                c.remove_security_group(container, group).await
            }
        }
    }

    /// Validate a create request and hand it to the controller.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: CreateRequest,
        run: Option<&str>,
    ) -> Result<(Container, Tracking)> {
        let run = run
            .map(|v| parse_bool("run", v))
            .transpose()?
            .unwrap_or(false);
        let spec = request.validate(self.controller.config())?;
        self.controller.create(ctx, spec, run).await
    }

    /// Resolve a container and refresh its status from the runtime.
    pub async fn get(&self, ctx: &RequestContext, ident: &str) -> Result<Container> {
        let container = self.resolve(ctx, ident).await?;
        Ok(self.controller.sync_status(container).await)
    }

    pub async fn list(&self, ctx: &RequestContext, params: &ActionParams) -> Result<Vec<Container>> {
        let query = self.list_query(params)?;
        let containers = self.store().list(&ctx.scope(), &query).await?;
        Ok(join_all(
            containers
                .into_iter()
                .map(|c| self.controller.sync_status(c)),
        )
        .await)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        ident: &str,
        request: UpdateRequest,
    ) -> Result<Outcome> {
        let (memory, cpu) = request.validate()?;
        let container = self.resolve(ctx, ident).await?;
        self.controller.update(&container, memory, cpu).await
    }

    fn list_query(&self, params: &ActionParams) -> Result<ListQuery> {
        let max = self.controller.config().max_list_limit;
        let invalid = |name: &str| {
            ControllerError::Validation(format!("Invalid input for query parameters {}", name))
        };
        let text = |name: &str| params.get(name).filter(|v| !v.is_empty()).cloned();

        let limit = match params.get("limit") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n.min(max),
                _ => return Err(invalid("limit")),
            },
            None => max,
        };
        let marker = params
            .get("marker")
            .map(|raw| Uuid::parse_str(raw).map_err(|_| invalid("marker")))
            .transpose()?;
        let sort_key = params
            .get("sort_key")
            .map(|raw| raw.parse::<SortKey>().map_err(ControllerError::Validation))
            .transpose()?
            .unwrap_or_default();
        let sort_dir = params
            .get("sort_dir")
            .map(|raw| raw.parse::<SortDir>().map_err(ControllerError::Validation))
            .transpose()?
            .unwrap_or_default();
        let status = params
            .get("status")
            .map(|raw| raw.parse::<ContainerState>().map_err(ControllerError::Validation))
            .transpose()?;

        Ok(ListQuery {
            limit,
            marker,
            sort_key,
            sort_dir,
            filters: ListFilters {
                name: text("name"),
                image: text("image"),
                status,
                project_id: text("project_id"),
                user_id: text("user_id"),
            },
        })
    }
}
