//! Network coordinator wrapper that records calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::model::{NetworkBinding, RequestedNetwork};
use crate::network::{LocalNetworks, NetworkCoordinator, NetworkError, PortInfo, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCall {
    pub container: Uuid,
    pub action: &'static str,
    /// Network or security group the call was about.
    pub target: String,
}

/// Wraps [`LocalNetworks`] with a call log and fault injection.
pub struct RecordingNetworks {
    inner: LocalNetworks,
    calls: Mutex<Vec<NetworkCall>>,
    failures: Mutex<HashMap<&'static str, String>>,
}

impl RecordingNetworks {
    pub fn new(default_network: &str) -> Self {
        Self {
            inner: LocalNetworks::new(default_network),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped coordinator; calls made on it are not recorded.
    pub fn inner(&self) -> &LocalNetworks {
        &self.inner
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Every recorded call except `list_ports`.
    pub fn mutations(&self) -> Vec<NetworkCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.action != "list_ports")
            .collect()
    }

    pub fn fail_on(&self, action: &'static str, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(action, reason.to_string());
    }

    fn record(&self, container: Uuid, action: &'static str, target: &str) -> Result<()> {
        self.calls.lock().unwrap().push(NetworkCall {
            container,
            action,
            target: target.to_string(),
        });
        match self.failures.lock().unwrap().get(action) {
            Some(reason) => Err(NetworkError::Failed(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NetworkCoordinator for RecordingNetworks {
    async fn allocate_or_reuse(
        &self,
        container: Uuid,
        requested: &[RequestedNetwork],
    ) -> Result<Vec<NetworkBinding>> {
        let targets: Vec<&str> = requested
            .iter()
            .filter_map(|r| r.network.as_deref().or(r.port.as_deref()))
            .collect();
        self.record(container, "allocate_or_reuse", &targets.join(","))?;
        self.inner.allocate_or_reuse(container, requested).await
    }

    async fn detach(&self, container: Uuid, network_id: &str) -> Result<()> {
        self.record(container, "detach", network_id)?;
        self.inner.detach(container, network_id).await
    }

    async fn list_ports(&self, container: Uuid) -> Result<Vec<PortInfo>> {
        self.record(container, "list_ports", "")?;
        self.inner.list_ports(container).await
    }

    async fn add_security_group(&self, container: Uuid, group: &str) -> Result<()> {
        self.record(container, "add_security_group", group)?;
        self.inner.add_security_group(container, group).await
    }

    async fn remove_security_group(&self, container: Uuid, group: &str) -> Result<()> {
        self.record(container, "remove_security_group", group)?;
        self.inner.remove_security_group(container, group).await
    }
}
