//! Caller identity and the visibility scope derived from it.

use crate::model::Container;

/// Security context of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub project_id: String,
    pub user_id: String,
    pub all_tenants: bool,
}

/// Which records a request may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Project(String),
    AllTenants,
}

impl RequestContext {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
            all_tenants: false,
        }
    }

    pub fn with_all_tenants(mut self, all_tenants: bool) -> Self {
        self.all_tenants = all_tenants;
        self
    }

    pub fn scope(&self) -> Scope {
        if self.all_tenants {
            Scope::AllTenants
        } else {
            Scope::Project(self.project_id.clone())
        }
    }
}

impl Scope {
    pub fn contains(&self, container: &Container) -> bool {
        self.includes_project(&container.project_id)
    }

    pub fn includes_project(&self, project_id: &str) -> bool {
        match self {
            Scope::Project(project) => project == project_id,
            Scope::AllTenants => true,
        }
    }
}
