//! Store traits and query types.

use async_trait::async_trait;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{Event, Result};
use crate::context::Scope;
use crate::model::{Container, ContainerPatch, ContainerState, NewContainer};

// =============================================================================
// List query
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Id,
    Uuid,
    Name,
    Status,
    CreatedAt,
    UpdatedAt,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "uuid" => Ok(SortKey::Uuid),
            "name" => Ok(SortKey::Name),
            "status" => Ok(SortKey::Status),
            "created_at" => Ok(SortKey::CreatedAt),
            "updated_at" => Ok(SortKey::UpdatedAt),
            other => Err(format!("Invalid sort_key {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDir {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(format!("Invalid sort_dir {}: must be asc or desc", other)),
        }
    }
}

/// Exact-match filters for listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilters {
    pub name: Option<String>,
    pub image: Option<String>,
    pub status: Option<ContainerState>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
}

impl ListFilters {
    pub fn matches(&self, c: &Container) -> bool {
        self.name.as_ref().is_none_or(|n| *n == c.name)
            && self.image.as_ref().is_none_or(|i| *i == c.image)
            && self.status.is_none_or(|s| s == c.status)
            && self.project_id.as_ref().is_none_or(|p| *p == c.project_id)
            && self.user_id.as_ref().is_none_or(|u| *u == c.user_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub limit: usize,
    /// Return records sorted after this one.
    pub marker: Option<Uuid>,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
    pub filters: ListFilters,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 1000,
            marker: None,
            sort_key: SortKey::default(),
            sort_dir: SortDir::default(),
            filters: ListFilters::default(),
        }
    }
}

// =============================================================================
// Store trait
// =============================================================================

/// Persistence for container records with optimistic versioning.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Insert a new record. Names are unique within a project.
    async fn create(&self, new: NewContainer) -> Result<Container>;
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Container>>;
    /// All records in scope with this exact name.
    async fn get_by_name(&self, scope: &Scope, name: &str) -> Result<Vec<Container>>;
    async fn list(&self, scope: &Scope, query: &ListQuery) -> Result<Vec<Container>>;
    /// Apply a patch if the stored version equals `expected_version`.
    async fn update(
        &self,
        uuid: Uuid,
        patch: ContainerPatch,
        expected_version: u64,
    ) -> Result<Container>;
    async fn delete(&self, uuid: Uuid) -> Result<()>;

    /// Subscribe to record change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
