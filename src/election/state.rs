use crate::leader::{Tenure, TenureEnd};

/// Externally observable election state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Election timer armed, following whoever sends heartbeats.
    Pending,
    /// Emitting heartbeats, mission running.
    Leading,
    /// Shutdown observed, the election loop has exited.
    Terminated,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Pending => write!(f, "pending"),
            ElectionState::Leading => write!(f, "leading"),
            ElectionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Role owned by the election loop.
///
/// The tenure only exists while leading, so "timer fires while leading"
/// and "leading without heartbeat" cannot be represented.
#[derive(Debug, Default)]
pub(crate) enum Role {
    #[default]
    Pending,
    Leading(Tenure),
}

impl Role {
    pub(crate) fn is_leading(&self) -> bool {
        matches!(self, Role::Leading(_))
    }

    pub(crate) fn state(&self) -> ElectionState {
        match self {
            Role::Pending => ElectionState::Pending,
            Role::Leading(_) => ElectionState::Leading,
        }
    }

    /// Resolves once the current tenure's heartbeat loop has exited.
    /// Never resolves while pending.
    pub(crate) async fn tenure_ended(&mut self) -> TenureEnd {
        match self {
            Role::Leading(tenure) => tenure.ended().await,
            Role::Pending => std::future::pending().await,
        }
    }

    /// Leaves the leading role, handing back the finished tenure.
    pub(crate) fn step_down(&mut self) -> Option<Tenure> {
        match std::mem::take(self) {
            Role::Leading(tenure) => Some(tenure),
            Role::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_role_is_pending() {
        let role = Role::default();
        assert!(!role.is_leading());
        assert_eq!(role.state(), ElectionState::Pending);
    }

    #[test]
    fn step_down_while_pending_is_noop() {
        let mut role = Role::Pending;
        assert!(role.step_down().is_none());
        assert_eq!(role.state(), ElectionState::Pending);
    }

    #[test]
    fn state_display() {
        assert_eq!(ElectionState::Pending.to_string(), "pending");
        assert_eq!(ElectionState::Leading.to_string(), "leading");
        assert_eq!(ElectionState::Terminated.to_string(), "terminated");
    }

    #[tokio::test]
    async fn pending_role_never_ends_a_tenure() {
        let mut role = Role::Pending;
        let ended = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            role.tenure_ended(),
        )
        .await;
        assert!(ended.is_err());
    }
}
