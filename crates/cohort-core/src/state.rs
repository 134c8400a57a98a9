use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent.
///
/// ```text
/// Registering -> Idle <-> Assigned -> Executing <-> AwaitingAssistance
///                 ^                       |
///                 +------ Reporting <-----+
/// any -> ShuttingDown (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Waiting for the orchestrator to acknowledge registration.
    Registering,
    /// Free for work.
    Idle,
    /// Reserved for a task, not yet started.
    Assigned,
    /// Running a task.
    Executing,
    /// Blocked on another agent's help.
    AwaitingAssistance,
    /// Sending the result.
    Reporting,
    /// Stopping. Terminal.
    ShuttingDown,
}

impl AgentState {
    /// Whether `self -> next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,
            (Registering, Idle)
            | (Idle, Assigned)
            | (Assigned, Idle)
            | (Assigned, Executing)
            | (Executing, AwaitingAssistance)
            | (AwaitingAssistance, Executing)
            | (Executing, Reporting)
            | (Reporting, Idle) => true,
            _ => false,
        }
    }

    /// Whether the agent holds (or is about to hold) a task.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            AgentState::Assigned
                | AgentState::Executing
                | AgentState::AwaitingAssistance
                | AgentState::Reporting
        )
    }

    /// Whether this is [`AgentState::ShuttingDown`].
    pub fn is_terminal(self) -> bool {
        self == AgentState::ShuttingDown
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Registering => "registering",
            AgentState::Idle => "idle",
            AgentState::Assigned => "assigned",
            AgentState::Executing => "executing",
            AgentState::AwaitingAssistance => "awaiting_assistance",
            AgentState::Reporting => "reporting",
            AgentState::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            AgentState::Registering,
            AgentState::Idle,
            AgentState::Assigned,
            AgentState::Executing,
            AgentState::AwaitingAssistance,
            AgentState::Executing,
            AgentState::Reporting,
            AgentState::Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_decline_returns_to_idle() {
        assert!(AgentState::Assigned.can_transition_to(AgentState::Idle));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!AgentState::Idle.can_transition_to(AgentState::Executing));
        assert!(!AgentState::Registering.can_transition_to(AgentState::Assigned));
        assert!(!AgentState::Reporting.can_transition_to(AgentState::Executing));
    }

    #[test]
    fn test_shutdown_is_terminal_and_reachable() {
        for state in [AgentState::Idle, AgentState::Executing, AgentState::Registering] {
            assert!(state.can_transition_to(AgentState::ShuttingDown));
        }
        assert!(!AgentState::ShuttingDown.can_transition_to(AgentState::Idle));
        assert!(AgentState::ShuttingDown.is_terminal());
    }
}
