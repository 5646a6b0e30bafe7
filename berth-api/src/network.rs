//! Network coordinator interface and a local implementation.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::model::{NetworkBinding, RequestedNetwork};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network {0} not found")]
    NetworkNotFound(String),

    #[error("port {0} is already in use")]
    PortInUse(String),

    #[error("container {container} is not attached to network {network}")]
    NotAttached { container: Uuid, network: String },

    #[error("container {0} has no ports")]
    NoPorts(Uuid),

    #[error("network operation failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// A port as reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PortInfo {
    pub port_id: String,
    pub network_id: String,
    pub security_groups: Vec<String>,
}

/// Allocates network endpoints for containers and manages their
/// security groups.
#[async_trait]
pub trait NetworkCoordinator: Send + Sync {
    /// Bind the container to each requested network, reusing a given port
    /// when the request names one.
    async fn allocate_or_reuse(
        &self,
        container: Uuid,
        requested: &[RequestedNetwork],
    ) -> Result<Vec<NetworkBinding>>;

    async fn detach(&self, container: Uuid, network_id: &str) -> Result<()>;

    async fn list_ports(&self, container: Uuid) -> Result<Vec<PortInfo>>;

    async fn add_security_group(&self, container: Uuid, group: &str) -> Result<()>;

    async fn remove_security_group(&self, container: Uuid, group: &str) -> Result<()>;
}

// =============================================================================
// LocalNetworks
// =============================================================================

/// Single-host coordinator that hands out port ids from memory. Networks
/// exist on first use.
pub struct LocalNetworks {
    default_network: String,
    ports: Mutex<HashMap<Uuid, Vec<PortInfo>>>,
}

impl LocalNetworks {
    pub fn new(default_network: impl Into<String>) -> Self {
        Self {
            default_network: default_network.into(),
            ports: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NetworkCoordinator for LocalNetworks {
    async fn allocate_or_reuse(
        &self,
        container: Uuid,
        requested: &[RequestedNetwork],
    ) -> Result<Vec<NetworkBinding>> {
        let mut ports = self.ports.lock().await;
        let mut bindings = Vec::with_capacity(requested.len());

        for req in requested {
            let network_id = req
                .network
                .clone()
                .unwrap_or_else(|| self.default_network.clone());
            if network_id.is_empty() {
                return Err(NetworkError::NetworkNotFound(network_id));
            }

            let port_id = match &req.port {
                Some(port) => {
                    let taken = ports
                        .iter()
                        .any(|(owner, list)| *owner != container && list.iter().any(|p| p.port_id == *port));
                    if taken {
                        return Err(NetworkError::PortInUse(port.clone()));
                    }
                    port.clone()
                }
                None => Uuid::new_v4().to_string(),
            };

            let list = ports.entry(container).or_default();
            if !list.iter().any(|p| p.port_id == port_id) {
                list.push(PortInfo {
                    port_id: port_id.clone(),
                    network_id: network_id.clone(),
                    security_groups: Vec::new(),
                });
            }
            debug!(container = %container, network = %network_id, port = %port_id, "Port bound");
            bindings.push(NetworkBinding {
                network_id,
                port_id,
            });
        }

        Ok(bindings)
    }

    async fn detach(&self, container: Uuid, network_id: &str) -> Result<()> {
        let mut ports = self.ports.lock().await;
        let list = ports.get_mut(&container).ok_or_else(|| NetworkError::NotAttached {
            container,
            network: network_id.to_string(),
        })?;

        let before = list.len();
        list.retain(|p| p.network_id != network_id);
        if list.len() == before {
            return Err(NetworkError::NotAttached {
                container,
                network: network_id.to_string(),
            });
        }
        if list.is_empty() {
            ports.remove(&container);
        }
        Ok(())
    }

    async fn list_ports(&self, container: Uuid) -> Result<Vec<PortInfo>> {
        Ok(self
            .ports
            .lock()
            .await
            .get(&container)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_security_group(&self, container: Uuid, group: &str) -> Result<()> {
        let mut ports = self.ports.lock().await;
        let list = ports
            .get_mut(&container)
            .filter(|l| !l.is_empty())
            .ok_or(NetworkError::NoPorts(container))?;
        for port in list.iter_mut() {
            if !port.security_groups.iter().any(|g| g == group) {
                port.security_groups.push(group.to_string());
            }
        }
        Ok(())
    }

    async fn remove_security_group(&self, container: Uuid, group: &str) -> Result<()> {
        let mut ports = self.ports.lock().await;
        let list = ports
            .get_mut(&container)
            .ok_or(NetworkError::NoPorts(container))?;
        for port in list.iter_mut() {
            port.security_groups.retain(|g| g != group);
        }
        Ok(())
    }
}
