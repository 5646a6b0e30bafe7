use tracing::info;
use uuid::Uuid;

use crate::action::ActionKind;

/// Audit trail for container lifecycle events, written to the `audit`
/// tracing target.
pub struct ApiAuditLogger {
    component: &'static str,
    enabled: bool,
}

impl ApiAuditLogger {
    pub fn new() -> Self {
        Self {
            component: "berth-api",
            enabled: true,
        }
    }

    pub fn new_noop() -> Self {
        Self {
            component: "berth-api",
            enabled: false,
        }
    }

    fn log(&self, message: String, object_ids: Vec<String>) {
        if self.enabled {
            info!(target: "audit", component = self.component, objects = ?object_ids, "{}", message);
        }
    }

    pub fn container_created(&self, id: Uuid, name: &str, project_id: &str) {
        self.log(
            format!("Container created: {} in project {}", name, project_id),
            vec![id.to_string()],
        );
    }

    pub fn action_accepted(&self, id: Uuid, action: ActionKind, request_id: Uuid) {
        self.log(
            format!("Container {} accepted (request {})", action, request_id),
            vec![id.to_string()],
        );
    }

    pub fn action_failed(&self, id: Uuid, action: ActionKind, reason: &str) {
        self.log(
            format!("Container {} failed: {}", action, reason),
            vec![id.to_string()],
        );
    }

    pub fn container_renamed(&self, id: Uuid, old: &str, new: &str) {
        self.log(
            format!("Container renamed: {} -> {}", old, new),
            vec![id.to_string()],
        );
    }

    pub fn container_updated(&self, id: Uuid) {
        self.log("Container limits updated".to_string(), vec![id.to_string()]);
    }

    pub fn container_deleted(&self, id: Uuid, forced: bool) {
        let message = if forced {
            "Container force-deleted"
        } else {
            "Container deleted"
        };
        self.log(message.to_string(), vec![id.to_string()]);
    }
}

impl Default for ApiAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_logger_doesnt_panic() {
        let logger = ApiAuditLogger::new_noop();
        let id = Uuid::new_v4();
        logger.container_created(id, "web", "demo");
        logger.action_accepted(id, ActionKind::Start, Uuid::new_v4());
        logger.action_failed(id, ActionKind::Start, "boom");
        logger.container_renamed(id, "web", "api");
        logger.container_updated(id);
        logger.container_deleted(id, true);
    }
}
