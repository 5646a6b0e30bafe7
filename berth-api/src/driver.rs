//! Runtime driver interface and an in-process runtime.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::action::LogOptions;
use crate::model::{Container, ContainerState};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{action} failed: {reason}")]
    Failed {
        action: &'static str,
        reason: String,
    },

    #[error("container {0} is not running")]
    NotRunning(Uuid),

    #[error("exec instance {0} not found")]
    ExecNotFound(String),

    #[error("could not find the file {0} in container")]
    PathNotFound(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExecResult {
    pub exec_id: String,
    pub output: Option<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Archive {
    pub path: String,
    pub data: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub pids: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProcessList {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

/// Executes lifecycle operations against container instances. Every call
/// is coarse-grained: it returns once the runtime has finished the work.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    async fn start(&self, container: &Container) -> Result<()>;
    async fn stop(&self, container: &Container, timeout: u64) -> Result<()>;
    async fn pause(&self, container: &Container) -> Result<()>;
    async fn unpause(&self, container: &Container) -> Result<()>;
    async fn reboot(&self, container: &Container, timeout: u64) -> Result<()>;
    /// Deliver a signal; returns whether the container is still running.
    async fn kill(&self, container: &Container, signal: Option<u32>) -> Result<bool>;
    async fn exec(
        &self,
        container: &Container,
        exec_id: &str,
        command: &str,
        run: bool,
        interactive: bool,
    ) -> Result<ExecResult>;
    async fn exec_resize(&self, container: &Container, exec_id: &str, height: u32, width: u32)
    -> Result<()>;
    async fn resize(&self, container: &Container, height: u32, width: u32) -> Result<()>;
    /// Snapshot the container into `repository:tag`, returning the image reference.
    async fn commit(&self, container: &Container, repository: &str, tag: &str) -> Result<String>;
    async fn get_archive(&self, container: &Container, path: &str) -> Result<Archive>;
    async fn put_archive(&self, container: &Container, path: &str, data: &str) -> Result<()>;
    async fn stats(&self, container: &Container) -> Result<ContainerStats>;
    async fn top(&self, container: &Container, ps_args: Option<&str>) -> Result<ProcessList>;
    async fn logs(&self, container: &Container, options: &LogOptions) -> Result<String>;
    /// Returns the URL a client connects to for an attached session.
    async fn attach(&self, container: &Container) -> Result<String>;
    async fn delete(&self, container: &Container, force: bool) -> Result<()>;
    /// The state the runtime observes for the instance, or `None` when it
    /// has no instance for the container.
    async fn inspect(&self, container: &Container) -> Result<Option<ContainerState>>;
    async fn update(&self, container: &Container, memory: Option<&str>, cpu: Option<f64>)
    -> Result<()>;
}

// =============================================================================
// InMemoryRuntime
// =============================================================================

#[derive(Debug, Default)]
struct Instance {
    running: bool,
    paused: bool,
    files: BTreeMap<String, String>,
    execs: HashMap<String, String>,
    log: Vec<(i64, String)>,
    images: Vec<String>,
}

impl Instance {
    fn record(&mut self, line: impl Into<String>) {
        self.log.push((chrono::Utc::now().timestamp(), line.into()));
    }
}

/// Runtime that keeps instance state in memory.
#[derive(Default)]
pub struct InMemoryRuntime {
    instances: Mutex<HashMap<Uuid, Instance>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images produced by `commit` for a container.
    pub async fn committed_images(&self, id: Uuid) -> Vec<String> {
        self.instances
            .lock()
            .await
            .get(&id)
            .map(|i| i.images.clone())
            .unwrap_or_default()
    }
}

fn memory_bytes(memory: Option<&str>) -> u64 {
    let Some(memory) = memory else {
        return 0;
    };
    let (digits, unit) = memory.split_at(memory.len().saturating_sub(1));
    let value: u64 = digits.parse().unwrap_or(0);
    match unit {
        "K" => value << 10,
        "M" => value << 20,
        "G" => value << 30,
        _ => value,
    }
}

#[async_trait]
impl RuntimeDriver for InMemoryRuntime {
    async fn start(&self, container: &Container) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        instance.running = true;
        instance.paused = false;
        instance.record(format!("started {}", container.image_ref()));
        debug!(container = %container.uuid, "Instance started");
        Ok(())
    }

    async fn stop(&self, container: &Container, timeout: u64) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        instance.running = false;
        instance.paused = false;
        instance.record(format!("stopped (timeout {}s)", timeout));
        Ok(())
    }

    async fn pause(&self, container: &Container) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&container.uuid)
            .filter(|i| i.running)
            .ok_or(DriverError::NotRunning(container.uuid))?;
        instance.paused = true;
        instance.record("paused");
        Ok(())
    }

    async fn unpause(&self, container: &Container) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&container.uuid)
            .filter(|i| i.running)
            .ok_or(DriverError::NotRunning(container.uuid))?;
        instance.paused = false;
        instance.record("unpaused");
        Ok(())
    }

    async fn reboot(&self, container: &Container, timeout: u64) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        instance.running = true;
        instance.paused = false;
        instance.record(format!("rebooted (timeout {}s)", timeout));
        Ok(())
    }

    async fn kill(&self, container: &Container, signal: Option<u32>) -> Result<bool> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        // SIGKILL when unspecified; only KILL/TERM/INT end the process here
        let signal = signal.unwrap_or(9);
        if matches!(signal, 2 | 9 | 15) {
            instance.running = false;
            instance.paused = false;
        }
        instance.record(format!("received signal {}", signal));
        Ok(instance.running)
    }

    async fn exec(
        &self,
        container: &Container,
        exec_id: &str,
        command: &str,
        run: bool,
        _interactive: bool,
    ) -> Result<ExecResult> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&container.uuid)
            .filter(|i| i.running)
            .ok_or(DriverError::NotRunning(container.uuid))?;
        instance.execs.insert(exec_id.to_string(), command.to_string());
        instance.record(format!("exec {}: {}", exec_id, command));

        Ok(if run {
            ExecResult {
                exec_id: exec_id.to_string(),
                output: Some(format!("{}\n", command)),
                exit_code: Some(0),
            }
        } else {
            ExecResult {
                exec_id: exec_id.to_string(),
                output: None,
                exit_code: None,
            }
        })
    }

    async fn exec_resize(
        &self,
        container: &Container,
        exec_id: &str,
        height: u32,
        width: u32,
    ) -> Result<()> {
        let instances = self.instances.lock().await;
        let known = instances
            .get(&container.uuid)
            .is_some_and(|i| i.execs.contains_key(exec_id));
        if !known {
            return Err(DriverError::ExecNotFound(exec_id.to_string()));
        }
        debug!(container = %container.uuid, exec_id, height, width, "Exec tty resized");
        Ok(())
    }

    async fn resize(&self, container: &Container, height: u32, width: u32) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&container.uuid)
            .filter(|i| i.running)
            .ok_or(DriverError::NotRunning(container.uuid))?;
        instance.record(format!("tty resized to {}x{}", height, width));
        Ok(())
    }

    async fn commit(&self, container: &Container, repository: &str, tag: &str) -> Result<String> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        let image = format!("{}:{}", repository, tag);
        instance.images.push(image.clone());
        instance.record(format!("committed to {}", image));
        Ok(image)
    }

    async fn get_archive(&self, container: &Container, path: &str) -> Result<Archive> {
        let instances = self.instances.lock().await;
        let data = instances
            .get(&container.uuid)
            .and_then(|i| i.files.get(path))
            .ok_or_else(|| DriverError::PathNotFound(path.to_string()))?;
        Ok(Archive {
            path: path.to_string(),
            data: data.clone(),
            size: data.len(),
        })
    }

    async fn put_archive(&self, container: &Container, path: &str, data: &str) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        instance.files.insert(path.to_string(), data.to_string());
        Ok(())
    }

    async fn stats(&self, container: &Container) -> Result<ContainerStats> {
        let instances = self.instances.lock().await;
        let running = instances.get(&container.uuid).is_some_and(|i| i.running);
        Ok(ContainerStats {
            cpu_percent: 0.0,
            memory_usage: if running { 4 << 20 } else { 0 },
            memory_limit: memory_bytes(container.memory.as_deref()),
            pids: u32::from(running),
        })
    }

    async fn top(&self, container: &Container, ps_args: Option<&str>) -> Result<ProcessList> {
        let instances = self.instances.lock().await;
        let instance = instances
            .get(&container.uuid)
            .filter(|i| i.running)
            .ok_or(DriverError::NotRunning(container.uuid))?;

        let mut titles = vec!["PID".to_string(), "CMD".to_string()];
        if ps_args.is_some_and(|a| a.contains('u')) {
            titles.insert(0, "USER".to_string());
        }
        let mut processes = vec![vec![
            "1".to_string(),
            container.command.clone().unwrap_or_else(|| "/bin/sh".to_string()),
        ]];
        for (n, command) in instance.execs.values().enumerate() {
            processes.push(vec![(n + 2).to_string(), command.clone()]);
        }
        if titles.len() == 3 {
            for row in processes.iter_mut() {
                row.insert(0, "root".to_string());
            }
        }
        Ok(ProcessList { titles, processes })
    }

    async fn logs(&self, container: &Container, options: &LogOptions) -> Result<String> {
        let instances = self.instances.lock().await;
        let Some(instance) = instances.get(&container.uuid) else {
            return Ok(String::new());
        };
        if !options.stdout {
            return Ok(String::new());
        }

        let lines: Vec<String> = instance
            .log
            .iter()
            .filter(|(ts, _)| options.since.is_none_or(|since| *ts >= since as i64))
            .map(|(ts, line)| {
                if options.timestamps {
                    let stamp = chrono::DateTime::from_timestamp(*ts, 0)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    format!("{} {}", stamp, line)
                } else {
                    line.clone()
                }
            })
            .collect();
        let skip = match options.tail {
            Some(n) => lines.len().saturating_sub(n as usize),
            None => 0,
        };

        let mut out = String::new();
        for line in &lines[skip..] {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    async fn attach(&self, container: &Container) -> Result<String> {
        Ok(format!("ws://localhost/containers/{}/attach", container.uuid))
    }

    async fn delete(&self, container: &Container, force: bool) -> Result<()> {
        let mut instances = self.instances.lock().await;
        if !force && instances.get(&container.uuid).is_some_and(|i| i.running) {
            return Err(DriverError::Failed {
                action: "delete",
                reason: "container is running".to_string(),
            });
        }
        instances.remove(&container.uuid);
        Ok(())
    }

    async fn inspect(&self, container: &Container) -> Result<Option<ContainerState>> {
        let instances = self.instances.lock().await;
        Ok(instances.get(&container.uuid).map(|i| match (i.running, i.paused) {
            (true, true) => ContainerState::Paused,
            (true, false) => ContainerState::Running,
            (false, _) => ContainerState::Stopped,
        }))
    }

    async fn update(
        &self,
        container: &Container,
        memory: Option<&str>,
        cpu: Option<f64>,
    ) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances.entry(container.uuid).or_default();
        instance.record(format!("limits updated memory={:?} cpu={:?}", memory, cpu));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_container;

    #[tokio::test]
    async fn test_lifecycle_and_logs() {
        let runtime = InMemoryRuntime::new();
        let c = sample_container("web");

        assert_eq!(runtime.inspect(&c).await.unwrap(), None);
        runtime.start(&c).await.unwrap();
        runtime.pause(&c).await.unwrap();
        assert_eq!(
            runtime.inspect(&c).await.unwrap(),
            Some(ContainerState::Paused)
        );
        runtime.unpause(&c).await.unwrap();
        runtime.stop(&c, 10).await.unwrap();
        assert_eq!(
            runtime.inspect(&c).await.unwrap(),
            Some(ContainerState::Stopped)
        );

        let logs = runtime.logs(&c, &LogOptions::default()).await.unwrap();
        assert_eq!(logs.lines().count(), 4);

        let tail = LogOptions {
            tail: Some(1),
            ..Default::default()
        };
        let last = runtime.logs(&c, &tail).await.unwrap();
        assert_eq!(last, "stopped (timeout 10s)\n");
    }

    #[tokio::test]
    async fn test_kill_signals() {
        let runtime = InMemoryRuntime::new();
        let c = sample_container("web");
        runtime.start(&c).await.unwrap();

        assert!(runtime.kill(&c, Some(1)).await.unwrap());
        assert!(!runtime.kill(&c, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_exec_requires_running() {
        let runtime = InMemoryRuntime::new();
        let c = sample_container("web");

        let err = runtime.exec(&c, "e1", "ls", true, false).await.unwrap_err();
        assert!(matches!(err, DriverError::NotRunning(_)));

        runtime.start(&c).await.unwrap();
        let result = runtime.exec(&c, "e1", "ls", true, false).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        runtime.exec_resize(&c, "e1", 24, 80).await.unwrap();
        assert!(runtime.exec_resize(&c, "e2", 24, 80).await.is_err());
    }

    #[tokio::test]
    async fn test_archive_roundtrip() {
        let runtime = InMemoryRuntime::new();
        let c = sample_container("web");

        assert!(matches!(
            runtime.get_archive(&c, "/etc/motd").await.unwrap_err(),
            DriverError::PathNotFound(_)
        ));
        runtime.put_archive(&c, "/etc/motd", "hello").await.unwrap();
        let archive = runtime.get_archive(&c, "/etc/motd").await.unwrap();
        assert_eq!(archive.data, "hello");
        assert_eq!(archive.size, 5);
    }

    #[test]
    fn test_memory_bytes() {
        assert_eq!(memory_bytes(Some("512M")), 512 << 20);
        assert_eq!(memory_bytes(Some("1G")), 1 << 30);
        assert_eq!(memory_bytes(None), 0);
    }
}
