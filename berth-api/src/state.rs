//! Which actions are legal in which container states.

use crate::action::ActionKind;
use crate::error::{ControllerError, Result};
use crate::model::{Container, ContainerState};

/// Returns true when `action` may run against a container in `state`.
/// `Delete` here is the non-forced form; a forced delete skips the table.
pub fn permits(action: ActionKind, state: ContainerState) -> bool {
    use ContainerState::*;

    match action {
        ActionKind::Create => state == Creating,
        ActionKind::Start => matches!(state, Created | Stopped | Error),
        ActionKind::Stop | ActionKind::Pause => state == Running,
        ActionKind::Unpause => state == Paused,
        ActionKind::Reboot => matches!(state, Running | Stopped),
        ActionKind::Kill => matches!(state, Running | Paused),
        ActionKind::Delete => matches!(state, Created | Stopped | Error | Deleted),
        ActionKind::Execute | ActionKind::ExecResize | ActionKind::Resize => state == Running,
        ActionKind::Attach => state == Running,
        ActionKind::Logs | ActionKind::Rename => !matches!(state, Creating | Deleting),
        ActionKind::GetArchive | ActionKind::PutArchive => !matches!(state, Deleting | Error),
        ActionKind::Commit => matches!(state, Running | Stopped | Paused),
        ActionKind::Top => matches!(state, Running | Paused),
        ActionKind::Stats => matches!(state, Running | Paused | Stopped | Created),
        ActionKind::Update
        | ActionKind::NetworkAttach
        | ActionKind::NetworkDetach
        | ActionKind::AddSecurityGroup
        | ActionKind::RemoveSecurityGroup => matches!(state, Created | Running | Stopped | Paused),
    }
}

/// Fails with `InvalidState` when `kind` is not legal for the container.
pub fn check(container: &Container, kind: ActionKind) -> Result<()> {
    if permits(kind, container.status) {
        Ok(())
    } else {
        Err(ControllerError::InvalidState {
            action: kind,
            uuid: container.uuid,
            state: container.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContainerState::*;

    fn allowed(action: ActionKind) -> Vec<ContainerState> {
        ContainerState::ALL
            .into_iter()
            .filter(|s| permits(action, *s))
            .collect()
    }

    #[test]
    fn test_lifecycle_table() {
        assert_eq!(allowed(ActionKind::Start), vec![Created, Stopped, Error]);
        assert_eq!(allowed(ActionKind::Stop), vec![Running]);
        assert_eq!(allowed(ActionKind::Pause), vec![Running]);
        assert_eq!(allowed(ActionKind::Unpause), vec![Paused]);
        assert_eq!(allowed(ActionKind::Reboot), vec![Running, Stopped]);
        assert_eq!(allowed(ActionKind::Kill), vec![Running, Paused]);
        assert_eq!(
            allowed(ActionKind::Delete),
            vec![Created, Stopped, Deleted, Error]
        );
        assert_eq!(allowed(ActionKind::Execute), vec![Running]);
        assert_eq!(allowed(ActionKind::ExecResize), vec![Running]);
        assert_eq!(allowed(ActionKind::Resize), vec![Running]);
        assert_eq!(allowed(ActionKind::Commit), vec![Running, Stopped, Paused]);
    }

    #[test]
    fn test_read_only_table() {
        let logs = allowed(ActionKind::Logs);
        assert!(!logs.contains(&Creating));
        assert!(!logs.contains(&Deleting));
        assert_eq!(logs.len(), 8);

        let archive = allowed(ActionKind::GetArchive);
        assert!(!archive.contains(&Deleting));
        assert!(!archive.contains(&Error));
        assert_eq!(archive, allowed(ActionKind::PutArchive));

        assert_eq!(allowed(ActionKind::Top), vec![Running, Paused]);
        assert_eq!(allowed(ActionKind::Attach), vec![Running]);
    }

    #[test]
    fn test_check_reports_action_and_state() {
        let mut container = crate::test_util::sample_container("stopped");
        container.status = Stopped;
        let err = check(&container, ActionKind::Kill).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("kill"));
        assert!(msg.contains("Stopped"));
    }
}
