//! In-process record store.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{ContainerStore, Event, ListQuery, Result, SortDir, SortKey, StoreError};
use crate::context::Scope;
use crate::model::{Container, ContainerPatch, NewContainer};

#[derive(Default)]
struct Records {
    next_id: u64,
    containers: HashMap<Uuid, Container>,
}

impl Records {
    fn name_taken(&self, project_id: &str, name: &str, except: Option<Uuid>) -> bool {
        self.containers.values().any(|c| {
            c.project_id == project_id && c.name == name && Some(c.uuid) != except
        })
    }
}

/// Container store held in memory, broadcasting every change.
pub struct MemoryStore {
    records: RwLock<Records>,
    events: broadcast::Sender<Event>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            records: RwLock::new(Records::default()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn compare(a: &Container, b: &Container, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Id => a.id.cmp(&b.id),
        SortKey::Uuid => a.uuid.cmp(&b.uuid),
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn create(&self, new: NewContainer) -> Result<Container> {
        let mut records = self.records.write().await;

        if records.containers.contains_key(&new.uuid) {
            return Err(StoreError::Conflict(format!(
                "A container with UUID {} already exists.",
                new.uuid
            )));
        }
        if records.name_taken(&new.project_id, &new.spec.name, None) {
            return Err(StoreError::Conflict(format!(
                "A container with name {} already exists in project {}.",
                new.spec.name, new.project_id
            )));
        }

        records.next_id += 1;
        let timestamp = now();
        let spec = new.spec;
        let container = Container {
            uuid: new.uuid,
            id: records.next_id,
            name: spec.name,
            project_id: new.project_id,
            user_id: new.user_id,
            status: new.status,
            status_reason: new.status_reason,
            image: spec.image,
            image_tag: spec.image_tag,
            image_driver: spec.image_driver,
            image_pull_policy: spec.image_pull_policy,
            command: spec.command,
            memory: spec.memory,
            cpu: spec.cpu,
            environment: spec.environment,
            workdir: spec.workdir,
            labels: spec.labels,
            restart_policy: spec.restart_policy,
            interactive: spec.interactive,
            requested_networks: spec.requested_networks,
            security_groups: spec.security_groups,
            addresses: Vec::new(),
            version: 1,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };

        records.containers.insert(container.uuid, container.clone());
        drop(records);

        self.emit(Event::ContainerCreated(container.clone()));
        Ok(container)
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Container>> {
        Ok(self.records.read().await.containers.get(&uuid).cloned())
    }

    async fn get_by_name(&self, scope: &Scope, name: &str) -> Result<Vec<Container>> {
        let records = self.records.read().await;
        let mut found: Vec<Container> = records
            .containers
            .values()
            .filter(|c| c.name == name && scope.contains(c))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn list(&self, scope: &Scope, query: &ListQuery) -> Result<Vec<Container>> {
        let records = self.records.read().await;
        let mut found: Vec<&Container> = records
            .containers
            .values()
            .filter(|c| scope.contains(c) && query.filters.matches(c))
            .collect();

        found.sort_by(|a, b| {
            let ord = compare(a, b, query.sort_key);
            match query.sort_dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            }
        });

        let start = match query.marker {
            Some(marker) => {
                let pos = found.iter().position(|c| c.uuid == marker).ok_or_else(|| {
                    StoreError::NotFound(format!("Marker {} could not be found.", marker))
                })?;
                pos + 1
            }
            None => 0,
        };

        Ok(found
            .into_iter()
            .skip(start)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        uuid: Uuid,
        patch: ContainerPatch,
        expected_version: u64,
    ) -> Result<Container> {
        let mut records = self.records.write().await;

        let current = records
            .containers
            .get(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("Container {} could not be found.", uuid)))?;
        if current.version != expected_version {
            return Err(StoreError::VersionMismatch {
                expected: expected_version,
                actual: current.version,
            });
        }
        if let Some(name) = &patch.name {
            if records.name_taken(&current.project_id, name, Some(uuid)) {
                return Err(StoreError::Conflict(format!(
                    "A container with name {} already exists in project {}.",
                    name, current.project_id
                )));
            }
        }

        let old = current.clone();
        let mut new = old.clone();
        patch.apply(&mut new);
        new.version += 1;
        new.updated_at = now();

        records.containers.insert(uuid, new.clone());
        drop(records);

        self.emit(Event::ContainerUpdated {
            id: uuid,
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn delete(&self, uuid: Uuid) -> Result<()> {
        let removed = self.records.write().await.containers.remove(&uuid);
        match removed {
            Some(container) => {
                self.emit(Event::ContainerDeleted {
                    id: uuid,
                    project_id: container.project_id,
                });
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "Container {} could not be found.",
                uuid
            ))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
