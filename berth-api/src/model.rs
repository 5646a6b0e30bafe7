//! Container records and the validated inputs that produce them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};

// =============================================================================
// Container state
// =============================================================================

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ContainerState {
    Creating,
    Created,
    Running,
    Stopped,
    Paused,
    Rebuilding,
    Deleting,
    Deleted,
    Error,
    Unknown,
}

impl ContainerState {
    pub const ALL: [ContainerState; 10] = [
        ContainerState::Creating,
        ContainerState::Created,
        ContainerState::Running,
        ContainerState::Stopped,
        ContainerState::Paused,
        ContainerState::Rebuilding,
        ContainerState::Deleting,
        ContainerState::Deleted,
        ContainerState::Error,
        ContainerState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Creating => "Creating",
            ContainerState::Created => "Created",
            ContainerState::Running => "Running",
            ContainerState::Stopped => "Stopped",
            ContainerState::Paused => "Paused",
            ContainerState::Rebuilding => "Rebuilding",
            ContainerState::Deleting => "Deleting",
            ContainerState::Deleted => "Deleted",
            ContainerState::Error => "Error",
            ContainerState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContainerState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid container status {}", s))
    }
}

// =============================================================================
// Resource spec types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyName {
    No,
    OnFailure,
    Always,
    UnlessStopped,
}

impl FromStr for RestartPolicyName {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no" => Ok(RestartPolicyName::No),
            "on-failure" => Ok(RestartPolicyName::OnFailure),
            "always" => Ok(RestartPolicyName::Always),
            "unless-stopped" => Ok(RestartPolicyName::UnlessStopped),
            other => Err(ControllerError::Validation(format!(
                "Invalid restart policy name {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RestartPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestartPolicyName::No => "no",
            RestartPolicyName::OnFailure => "on-failure",
            RestartPolicyName::Always => "always",
            RestartPolicyName::UnlessStopped => "unless-stopped",
        })
    }
}

/// Normalised restart policy as persisted on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RestartPolicy {
    #[serde(rename = "Name")]
    pub name: RestartPolicyName,
    #[serde(rename = "MaximumRetryCount")]
    pub maximum_retry_count: String,
}

/// Restart policy as supplied by a caller.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RestartPolicyRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MaximumRetryCount", default)]
    pub maximum_retry_count: Option<String>,
}

impl RestartPolicy {
    /// Validates a requested policy. The retry count only survives for
    /// `on-failure`; `no` and `unless-stopped` are coerced to "0".
    pub fn normalize(request: &RestartPolicyRequest) -> Result<RestartPolicy> {
        let name: RestartPolicyName = request.name.parse()?;
        let count = match request.maximum_retry_count.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                ControllerError::Validation(format!("Invalid MaximumRetryCount {}", raw))
            })?,
        };

        let maximum_retry_count = match name {
            RestartPolicyName::OnFailure => count.to_string(),
            RestartPolicyName::Always if count != 0 => {
                return Err(ControllerError::Validation(format!(
                    "maximum retry count not valid with restart policy name {}",
                    name
                )));
            }
            _ => "0".to_string(),
        };

        Ok(RestartPolicy {
            name,
            maximum_retry_count,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageDriver {
    #[default]
    Docker,
    Glance,
}

impl FromStr for ImageDriver {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(ImageDriver::Docker),
            "glance" => Ok(ImageDriver::Glance),
            _ => Err(ControllerError::Validation(format!(
                "Invalid image driver {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImagePullPolicy {
    Always,
    Never,
    IfNotPresent,
}

impl FromStr for ImagePullPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(ImagePullPolicy::Always),
            "never" => Ok(ImagePullPolicy::Never),
            "ifnotpresent" => Ok(ImagePullPolicy::IfNotPresent),
            _ => Err(ControllerError::Validation(format!(
                "Invalid image pull policy {}",
                s
            ))),
        }
    }
}

/// A network the caller asked for, by network id, by pre-existing port, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RequestedNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl RequestedNetwork {
    pub fn network(id: impl Into<String>) -> Self {
        Self {
            network: Some(id.into()),
            port: None,
        }
    }
}

/// A port bound to the container on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NetworkBinding {
    pub network_id: String,
    pub port_id: String,
}

// =============================================================================
// Container record
// =============================================================================

/// The persisted container record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Container {
    pub uuid: Uuid,
    pub id: u64,
    pub name: String,
    pub project_id: String,
    pub user_id: String,
    pub status: ContainerState,
    pub status_reason: Option<String>,
    pub image: String,
    pub image_tag: String,
    pub image_driver: ImageDriver,
    pub image_pull_policy: Option<ImagePullPolicy>,
    pub command: Option<String>,
    pub memory: Option<String>,
    pub cpu: Option<f64>,
    pub environment: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
    pub interactive: bool,
    pub requested_networks: Vec<RequestedNetwork>,
    pub security_groups: Vec<String>,
    pub addresses: Vec<NetworkBinding>,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl Container {
    /// Full image reference including the tag.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }

    pub fn is_attached_to(&self, network_id: &str) -> bool {
        self.addresses.iter().any(|b| b.network_id == network_id)
    }
}

/// Everything needed to insert a new record; the store assigns `id`,
/// `version` and timestamps.
#[derive(Debug, Clone)]
pub struct NewContainer {
    pub uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub status: ContainerState,
    pub status_reason: Option<String>,
    pub spec: ContainerSpec,
}

/// Partial update applied by the store under a version check.
#[derive(Debug, Clone, Default)]
pub struct ContainerPatch {
    pub name: Option<String>,
    pub status: Option<ContainerState>,
    pub status_reason: Option<String>,
    pub memory: Option<String>,
    pub cpu: Option<f64>,
    pub addresses: Option<Vec<NetworkBinding>>,
    pub security_groups: Option<Vec<String>>,
}

impl ContainerPatch {
    /// A state change; every transition carries a reason.
    pub fn transition(status: ContainerState, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            status_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn apply(self, container: &mut Container) {
        if let Some(name) = self.name {
            container.name = name;
        }
        if let Some(status) = self.status {
            container.status = status;
        }
        if let Some(reason) = self.status_reason {
            container.status_reason = Some(reason);
        }
        if let Some(memory) = self.memory {
            container.memory = Some(memory);
        }
        if let Some(cpu) = self.cpu {
            container.cpu = Some(cpu);
        }
        if let Some(addresses) = self.addresses {
            container.addresses = addresses;
        }
        if let Some(groups) = self.security_groups {
            container.security_groups = groups;
        }
    }
}

// =============================================================================
// Input validation
// =============================================================================

/// Checks a container name: 2-255 characters, alphanumeric first, then
/// alphanumerics or `-`, `_`, `.`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let len = name.chars().count();

    if valid_first && valid_rest && (2..=255).contains(&len) {
        Ok(())
    } else {
        Err(ControllerError::Validation(format!(
            "Invalid container name '{}': must be 2 to 255 characters of [a-zA-Z0-9-_.] starting with a letter or digit",
            name
        )))
    }
}

/// Normalises a memory limit: "512" becomes "512M", "1g" becomes "1G".
pub fn normalize_memory(memory: &str) -> Result<String> {
    let invalid = || ControllerError::Validation(format!("Invalid memory value {}", memory));
    let memory = memory.trim();
    if memory.is_empty() {
        return Err(invalid());
    }

    let (digits, unit) = match memory.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&memory[..idx], Some(c)),
        _ => (memory, None),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    match unit {
        None => Ok(format!("{}M", digits)),
        Some(u) if matches!(u.to_ascii_lowercase(), 'b' | 'k' | 'm' | 'g') => {
            Ok(format!("{}{}", digits, u.to_ascii_uppercase()))
        }
        Some(_) => Err(invalid()),
    }
}

pub fn validate_cpu(cpu: f64) -> Result<f64> {
    if cpu.is_finite() && cpu > 0.0 {
        Ok(cpu)
    } else {
        Err(ControllerError::Validation(format!(
            "Invalid cpu value {}: must be a positive number",
            cpu
        )))
    }
}

/// Splits `repo[:tag]` into repository and tag. A colon inside a registry
/// host (before the last `/`) is not a tag separator.
pub fn parse_image(image: &str) -> Result<(String, String)> {
    let image = image.trim();
    if image.is_empty() || image.contains(char::is_whitespace) {
        return Err(ControllerError::Validation(format!(
            "Invalid image reference '{}'",
            image
        )));
    }

    let tag_start = image
        .rfind(':')
        .filter(|&idx| image.rfind('/').is_none_or(|slash| idx > slash));
    match tag_start {
        Some(idx) if idx + 1 < image.len() => {
            Ok((image[..idx].to_string(), image[idx + 1..].to_string()))
        }
        Some(_) => Err(ControllerError::Validation(format!(
            "Invalid image reference '{}'",
            image
        ))),
        None => Ok((image.to_string(), "latest".to_string())),
    }
}

/// Generated name for containers created without one.
pub fn generate_name() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("berth-{}", &simple[..8])
}

// =============================================================================
// Request DTOs
// =============================================================================

/// Request to create a container
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateRequest {
    /// Container name (generated when absent)
    pub name: Option<String>,
    /// Image reference, optionally with a tag
    pub image: String,
    pub command: Option<String>,
    /// Memory limit, e.g. "512", "512m", "1G"
    pub memory: Option<String>,
    pub cpu: Option<f64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub restart_policy: Option<RestartPolicyRequest>,
    #[serde(default)]
    pub interactive: bool,
    /// Requested networks; empty means the default network
    #[serde(default)]
    pub nets: Vec<RequestedNetwork>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// docker or glance
    pub image_driver: Option<String>,
    /// always, never or ifnotpresent
    pub image_pull_policy: Option<String>,
}

/// Request to update resource limits
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    pub memory: Option<String>,
    pub cpu: Option<f64>,
}

/// A validated create request.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub image_tag: String,
    pub image_driver: ImageDriver,
    pub image_pull_policy: Option<ImagePullPolicy>,
    pub command: Option<String>,
    pub memory: Option<String>,
    pub cpu: Option<f64>,
    pub environment: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
    pub interactive: bool,
    pub requested_networks: Vec<RequestedNetwork>,
    pub security_groups: Vec<String>,
}

impl CreateRequest {
    /// Check and normalise the request. A request without networks gets
    /// the configured default network.
    pub fn validate(self, config: &ControllerConfig) -> Result<ContainerSpec> {
        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => generate_name(),
        };
        let (image, image_tag) = parse_image(&self.image)?;
        let memory = self.memory.as_deref().map(normalize_memory).transpose()?;
        let cpu = self.cpu.map(validate_cpu).transpose()?;
        let restart_policy = self
            .restart_policy
            .as_ref()
            .map(RestartPolicy::normalize)
            .transpose()?;
        let image_driver = self
            .image_driver
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        let image_pull_policy = self
            .image_pull_policy
            .as_deref()
            .map(str::parse)
            .transpose()?;

        if self.environment.keys().any(|k| k.is_empty()) {
            return Err(ControllerError::Validation(
                "Environment variable names must not be empty".to_string(),
            ));
        }

        for net in &self.nets {
            let has_network = net.network.as_deref().is_some_and(|n| !n.is_empty());
            let has_port = net.port.as_deref().is_some_and(|p| !p.is_empty());
            if !has_network && !has_port {
                return Err(ControllerError::Validation(
                    "Each requested network needs a network or a port".to_string(),
                ));
            }
        }

        let requested_networks = if self.nets.is_empty() {
            vec![RequestedNetwork::network(&config.default_network)]
        } else {
            self.nets
        };

        let mut security_groups: Vec<String> = Vec::with_capacity(self.security_groups.len());
        for group in self.security_groups {
            if group.is_empty() {
                return Err(ControllerError::Validation(
                    "Security group ids must not be empty".to_string(),
                ));
            }
            if security_groups.contains(&group) {
                return Err(ControllerError::Validation(format!(
                    "Duplicate security group {}",
                    group
                )));
            }
            security_groups.push(group);
        }

        Ok(ContainerSpec {
            name,
            image,
            image_tag,
            image_driver,
            image_pull_policy,
            command: self.command,
            memory,
            cpu,
            environment: self.environment,
            workdir: self.workdir,
            labels: self.labels,
            restart_policy,
            interactive: self.interactive,
            requested_networks,
            security_groups,
        })
    }
}

impl UpdateRequest {
    /// Returns the normalised memory and cpu; at least one must be present.
    pub fn validate(self) -> Result<(Option<String>, Option<f64>)> {
        if self.memory.is_none() && self.cpu.is_none() {
            return Err(ControllerError::Validation(
                "Nothing to update: supply memory or cpu".to_string(),
            ));
        }
        let memory = self.memory.as_deref().map(normalize_memory).transpose()?;
        let cpu = self.cpu.map(validate_cpu).transpose()?;
        Ok((memory, cpu))
    }
}
