//! The action vocabulary and parameter parsing.
//!
//! Parameters arrive as strings (query parameters on the REST surface) and
//! are turned into a typed [`Action`] before any container is touched.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::model::validate_name;

/// Raw action parameters keyed by name.
pub type ActionParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Start,
    Stop,
    Pause,
    Unpause,
    Reboot,
    Kill,
    Execute,
    ExecResize,
    Resize,
    Attach,
    GetArchive,
    PutArchive,
    Top,
    Stats,
    Logs,
    Commit,
    Rename,
    Update,
    Delete,
    NetworkAttach,
    NetworkDetach,
    AddSecurityGroup,
    RemoveSecurityGroup,
}

impl ActionKind {
    /// Actions addressable by name on an existing container.
    pub const VOCABULARY: [ActionKind; 22] = [
        ActionKind::Start,
        ActionKind::Stop,
        ActionKind::Pause,
        ActionKind::Unpause,
        ActionKind::Reboot,
        ActionKind::Kill,
        ActionKind::Execute,
        ActionKind::ExecResize,
        ActionKind::Resize,
        ActionKind::Attach,
        ActionKind::GetArchive,
        ActionKind::PutArchive,
        ActionKind::Top,
        ActionKind::Stats,
        ActionKind::Logs,
        ActionKind::Commit,
        ActionKind::Rename,
        ActionKind::Delete,
        ActionKind::NetworkAttach,
        ActionKind::NetworkDetach,
        ActionKind::AddSecurityGroup,
        ActionKind::RemoveSecurityGroup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Pause => "pause",
            ActionKind::Unpause => "unpause",
            ActionKind::Reboot => "reboot",
            ActionKind::Kill => "kill",
            ActionKind::Execute => "execute",
            ActionKind::ExecResize => "exec_resize",
            ActionKind::Resize => "resize",
            ActionKind::Attach => "attach",
            ActionKind::GetArchive => "get_archive",
            ActionKind::PutArchive => "put_archive",
            ActionKind::Top => "top",
            ActionKind::Stats => "stats",
            ActionKind::Logs => "logs",
            ActionKind::Commit => "commit",
            ActionKind::Rename => "rename",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::NetworkAttach => "network_attach",
            ActionKind::NetworkDetach => "network_detach",
            ActionKind::AddSecurityGroup => "add_security_group",
            ActionKind::RemoveSecurityGroup => "remove_security_group",
        }
    }

    pub fn from_name(name: &str) -> Option<ActionKind> {
        Self::VOCABULARY.into_iter().find(|kind| kind.name() == name)
    }

    /// Read-only actions never take the container lock and never change state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ActionKind::Logs
                | ActionKind::Stats
                | ActionKind::Top
                | ActionKind::Attach
                | ActionKind::GetArchive
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options for fetching container logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Number of trailing lines; `None` means all.
    pub tail: Option<u64>,
    /// Only lines at or after this epoch second.
    pub since: Option<u64>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
            since: None,
        }
    }
}

/// A fully parsed action on an existing container.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start,
    Stop { timeout: u64 },
    Pause,
    Unpause,
    Reboot { timeout: u64 },
    Kill { signal: Option<u32> },
    Execute { command: String, run: bool, interactive: bool },
    ExecResize { exec_id: String, height: u32, width: u32 },
    Resize { height: u32, width: u32 },
    Attach,
    GetArchive { path: String },
    PutArchive { path: String, data: String },
    Top { ps_args: Option<String> },
    Stats,
    Logs(LogOptions),
    Commit { repository: String, tag: Option<String> },
    Rename { name: String },
    Delete { force: bool },
    NetworkAttach { network: String },
    NetworkDetach { network: String },
    AddSecurityGroup { group: Uuid },
    RemoveSecurityGroup { group: Uuid },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Start => ActionKind::Start,
            Action::Stop { .. } => ActionKind::Stop,
            Action::Pause => ActionKind::Pause,
            Action::Unpause => ActionKind::Unpause,
            Action::Reboot { .. } => ActionKind::Reboot,
            Action::Kill { .. } => ActionKind::Kill,
            Action::Execute { .. } => ActionKind::Execute,
            Action::ExecResize { .. } => ActionKind::ExecResize,
            Action::Resize { .. } => ActionKind::Resize,
            Action::Attach => ActionKind::Attach,
            Action::GetArchive { .. } => ActionKind::GetArchive,
            Action::PutArchive { .. } => ActionKind::PutArchive,
            Action::Top { .. } => ActionKind::Top,
            Action::Stats => ActionKind::Stats,
            Action::Logs(_) => ActionKind::Logs,
            Action::Commit { .. } => ActionKind::Commit,
            Action::Rename { .. } => ActionKind::Rename,
            Action::Delete { .. } => ActionKind::Delete,
            Action::NetworkAttach { .. } => ActionKind::NetworkAttach,
            Action::NetworkDetach { .. } => ActionKind::NetworkDetach,
            Action::AddSecurityGroup { .. } => ActionKind::AddSecurityGroup,
            Action::RemoveSecurityGroup { .. } => ActionKind::RemoveSecurityGroup,
        }
    }

    /// Parses the string parameters for `kind`. Unknown parameters are ignored.
    pub fn parse(kind: ActionKind, params: &ActionParams, config: &ControllerConfig) -> Result<Action> {
        let p = Params(params);
        let action = match kind {
            ActionKind::Start => Action::Start,
            ActionKind::Stop => Action::Stop {
                timeout: p.u64("timeout")?.unwrap_or(config.default_stop_timeout),
            },
            ActionKind::Pause => Action::Pause,
            ActionKind::Unpause => Action::Unpause,
            ActionKind::Reboot => Action::Reboot {
                timeout: p.u64("timeout")?.unwrap_or(config.default_stop_timeout),
            },
            ActionKind::Kill => Action::Kill {
                signal: p
                    .u64("signal")?
                    .map(|s| u32::try_from(s).map_err(|_| invalid_param("signal")))
                    .transpose()?,
            },
            ActionKind::Execute => Action::Execute {
                command: p.required("command")?.to_string(),
                run: p.bool("run")?.unwrap_or(true),
                interactive: p.bool("interactive")?.unwrap_or(false),
            },
            ActionKind::ExecResize => Action::ExecResize {
                exec_id: p.required("exec_id")?.to_string(),
                height: p.dimension("h")?,
                width: p.dimension("w")?,
            },
            ActionKind::Resize => Action::Resize {
                height: p.dimension("h")?,
                width: p.dimension("w")?,
            },
            ActionKind::Attach => Action::Attach,
            ActionKind::GetArchive => Action::GetArchive {
                path: p.required("path")?.to_string(),
            },
            ActionKind::PutArchive => Action::PutArchive {
                path: p.required("path")?.to_string(),
                data: p.required("data")?.to_string(),
            },
            ActionKind::Top => Action::Top {
                ps_args: p.optional("ps_args").map(String::from),
            },
            ActionKind::Stats => Action::Stats,
            ActionKind::Logs => Action::Logs(LogOptions {
                stdout: p.bool("stdout")?.unwrap_or(true),
                stderr: p.bool("stderr")?.unwrap_or(true),
                timestamps: p.bool("timestamps")?.unwrap_or(false),
                tail: match p.optional("tail") {
                    None => None,
                    Some(t) if t.eq_ignore_ascii_case("all") => None,
                    Some(_) => p.u64("tail")?,
                },
                since: p.u64("since")?,
            }),
            ActionKind::Commit => Action::Commit {
                repository: p.required("repository")?.to_string(),
                tag: p.optional("tag").map(String::from),
            },
            ActionKind::Rename => {
                let name = p.required("name")?;
                validate_name(name)?;
                Action::Rename {
                    name: name.to_string(),
                }
            }
            ActionKind::Delete => Action::Delete {
                force: p.bool("force")?.unwrap_or(false),
            },
            ActionKind::NetworkAttach => Action::NetworkAttach {
                network: p.required("network")?.to_string(),
            },
            ActionKind::NetworkDetach => Action::NetworkDetach {
                network: p.required("network")?.to_string(),
            },
            ActionKind::AddSecurityGroup => Action::AddSecurityGroup {
                group: p.uuid("uuid")?,
            },
            ActionKind::RemoveSecurityGroup => Action::RemoveSecurityGroup {
                group: p.uuid("uuid")?,
            },
            ActionKind::Create | ActionKind::Update => {
                return Err(ControllerError::Validation(format!(
                    "Action {} is not addressable on an existing container",
                    kind
                )));
            }
        };
        Ok(action)
    }
}

/// Parses a boolean the way query strings spell them.
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "on" | "y" | "yes" => Ok(true),
        "0" | "f" | "false" | "off" | "n" | "no" => Ok(false),
        _ => Err(invalid_param(name)),
    }
}

fn invalid_param(name: &str) -> ControllerError {
    ControllerError::Validation(format!("Invalid input for query parameters {}", name))
}

struct Params<'a>(&'a ActionParams);

impl Params<'_> {
    fn optional(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str> {
        match self.optional(name).map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ControllerError::Validation(format!(
                "Missing required parameter {}",
                name
            ))),
        }
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        self.optional(name).map(|v| parse_bool(name, v)).transpose()
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        self.optional(name)
            .map(|v| v.parse::<u64>().map_err(|_| invalid_param(name)))
            .transpose()
    }

    fn dimension(&self, name: &str) -> Result<u32> {
        let raw = self.required(name)?;
        match raw.parse::<u32>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(invalid_param(name)),
        }
    }

    fn uuid(&self, name: &str) -> Result<Uuid> {
        let raw = self.required(name)?;
        Uuid::parse_str(raw).map_err(|_| {
            ControllerError::Validation(format!("Expected a uuid but received {}.", raw))
        })
    }
}
