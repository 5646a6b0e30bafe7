//! Runtime driver wrapper that records calls and detects overlap.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::action::LogOptions;
use crate::driver::{
    Archive, ContainerStats, DriverError, ExecResult, InMemoryRuntime, ProcessList, Result,
    RuntimeDriver,
};
use crate::model::{Container, ContainerState};

/// One call into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub container: Uuid,
    pub action: &'static str,
}

type Hook = Arc<dyn Fn(Uuid) -> BoxFuture<'static, ()> + Send + Sync>;

// Calls that may legitimately run next to a locked action.
const SHARED_CALLS: [&str; 7] = [
    "logs",
    "stats",
    "top",
    "attach",
    "get_archive",
    "exec_resize",
    "inspect",
];

/// Wraps [`InMemoryRuntime`] with a call log, per-call fault injection,
/// per-container gates and hooks that run before a named call.
#[derive(Default)]
pub struct RecordingDriver {
    inner: InMemoryRuntime,
    calls: Mutex<Vec<DriverCall>>,
    in_flight: Mutex<HashSet<Uuid>>,
    overlaps: AtomicUsize,
    failures: Mutex<HashMap<&'static str, String>>,
    gates: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    hooks: Mutex<HashMap<&'static str, Hook>>,
    latency: Mutex<Duration>,
}

struct InFlight<'a> {
    driver: &'a RecordingDriver,
    id: Uuid,
    owned: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.driver.in_flight.lock().unwrap().remove(&self.id);
        }
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime(&self) -> &InMemoryRuntime {
        &self.inner
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Action names called for one container, in order.
    pub fn calls_for(&self, id: Uuid) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.container == id)
            .map(|c| c.action)
            .collect()
    }

    /// Number of times an exclusive call started while another exclusive
    /// call on the same container was still running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Make every call named `action` fail with `reason`.
    pub fn fail_on(&self, action: &'static str, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(action, reason.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Block calls for the container until [`release`](Self::release).
    pub fn hold(&self, id: Uuid) {
        self.gates
            .lock()
            .unwrap()
            .insert(id, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, id: Uuid) {
        if let Some(gate) = self.gates.lock().unwrap().remove(&id) {
            gate.close();
        }
    }

    /// Run `hook` before every call named `action`.
    pub fn before<F>(&self, action: &'static str, hook: F)
    where
        F: Fn(Uuid) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().insert(action, Arc::new(hook));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn enter(&self, id: Uuid, action: &'static str) -> Result<InFlight<'_>> {
        self.calls
            .lock()
            .unwrap()
            .push(DriverCall { container: id, action });

        let owned = if SHARED_CALLS.contains(&action) {
            false
        } else {
            let fresh = self.in_flight.lock().unwrap().insert(id);
            if !fresh {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            fresh
        };
        let call = InFlight {
            driver: self,
            id,
            owned,
        };

        let gate = self.gates.lock().unwrap().get(&id).cloned();
        if let Some(gate) = gate {
            // Closed on release
            let _ = gate.acquire().await;
        }
        let hook = self.hooks.lock().unwrap().get(action).cloned();
        if let Some(hook) = hook {
            hook(id).await;
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failures.lock().unwrap().get(action).cloned();
        match failure {
            Some(reason) => Err(DriverError::Failed { action, reason }),
            None => Ok(call),
        }
    }
}

#[async_trait]
impl RuntimeDriver for RecordingDriver {
    async fn start(&self, container: &Container) -> Result<()> {
        let _call = self.enter(container.uuid, "start").await?;
        self.inner.start(container).await
    }

    async fn stop(&self, container: &Container, timeout: u64) -> Result<()> {
        let _call = self.enter(container.uuid, "stop").await?;
        self.inner.stop(container, timeout).await
    }

    async fn pause(&self, container: &Container) -> Result<()> {
        let _call = self.enter(container.uuid, "pause").await?;
        self.inner.pause(container).await
    }

    async fn unpause(&self, container: &Container) -> Result<()> {
        let _call = self.enter(container.uuid, "unpause").await?;
        self.inner.unpause(container).await
    }

    async fn reboot(&self, container: &Container, timeout: u64) -> Result<()> {
        let _call = self.enter(container.uuid, "reboot").await?;
        self.inner.reboot(container, timeout).await
    }

    async fn kill(&self, container: &Container, signal: Option<u32>) -> Result<bool> {
        let _call = self.enter(container.uuid, "kill").await?;
        self.inner.kill(container, signal).await
    }

    async fn exec(
        &self,
        container: &Container,
        exec_id: &str,
        command: &str,
        run: bool,
        interactive: bool,
    ) -> Result<ExecResult> {
        let _call = self.enter(container.uuid, "exec").await?;
        self.inner
            .exec(container, exec_id, command, run, interactive)
            .await
    }

    async fn exec_resize(
        &self,
        container: &Container,
        exec_id: &str,
        height: u32,
        width: u32,
    ) -> Result<()> {
        let _call = self.enter(container.uuid, "exec_resize").await?;
        self.inner
            .exec_resize(container, exec_id, height, width)
            .await
    }

    async fn resize(&self, container: &Container, height: u32, width: u32) -> Result<()> {
        let _call = self.enter(container.uuid, "resize").await?;
        self.inner.resize(container, height, width).await
    }

    async fn commit(&self, container: &Container, repository: &str, tag: &str) -> Result<String> {
        let _call = self.enter(container.uuid, "commit").await?;
        self.inner.commit(container, repository, tag).await
    }

    async fn get_archive(&self, container: &Container, path: &str) -> Result<Archive> {
        let _call = self.enter(container.uuid, "get_archive").await?;
        self.inner.get_archive(container, path).await
    }

    async fn put_archive(&self, container: &Container, path: &str, data: &str) -> Result<()> {
        let _call = self.enter(container.uuid, "put_archive").await?;
        self.inner.put_archive(container, path, data).await
    }

    async fn stats(&self, container: &Container) -> Result<ContainerStats> {
        let _call = self.enter(container.uuid, "stats").await?;
        self.inner.stats(container).await
    }

    async fn top(&self, container: &Container, ps_args: Option<&str>) -> Result<ProcessList> {
        let _call = self.enter(container.uuid, "top").await?;
        self.inner.top(container, ps_args).await
    }

    async fn logs(&self, container: &Container, options: &LogOptions) -> Result<String> {
        let _call = self.enter(container.uuid, "logs").await?;
        self.inner.logs(container, options).await
    }

    async fn attach(&self, container: &Container) -> Result<String> {
        let _call = self.enter(container.uuid, "attach").await?;
        self.inner.attach(container).await
    }

    async fn delete(&self, container: &Container, force: bool) -> Result<()> {
        let _call = self.enter(container.uuid, "delete").await?;
        self.inner.delete(container, force).await
    }

    async fn inspect(&self, container: &Container) -> Result<Option<ContainerState>> {
        let _call = self.enter(container.uuid, "inspect").await?;
        self.inner.inspect(container).await
    }

    async fn update(
        &self,
        container: &Container,
        memory: Option<&str>,
        cpu: Option<f64>,
    ) -> Result<()> {
        let _call = self.enter(container.uuid, "update").await?;
        self.inner.update(container, memory, cpu).await
    }
}
