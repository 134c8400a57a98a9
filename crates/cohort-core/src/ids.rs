use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a task in the task graph.
pub type TaskId = Uuid;

/// Identifier of a submitted project.
pub type ProjectId = Uuid;

/// Identifier of an agent (e.g. `implementer-003`).
///
/// Agent ids are human-readable strings and totally ordered, which gives the
/// scheduler a deterministic final tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Reserved id used by the orchestrator as sender and recipient.
    pub const ORCHESTRATOR: &'static str = "orchestrator";

    /// Wraps `id` as is.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The orchestrator's own id.
    pub fn orchestrator() -> Self {
        Self::new(Self::ORCHESTRATOR)
    }

    /// Whether this is the orchestrator's id.
    pub fn is_orchestrator(&self) -> bool {
        self.0 == Self::ORCHESTRATOR
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_ordering_is_lexicographic() {
        let a = AgentId::from("implementer-001");
        let b = AgentId::from("implementer-002");
        assert!(a < b);
    }

    #[test]
    fn test_agent_id_serializes_as_plain_string() {
        let id = AgentId::from("planner-001");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"planner-001\"");
    }

    #[test]
    fn test_orchestrator_id() {
        assert!(AgentId::orchestrator().is_orchestrator());
        assert!(!AgentId::from("validator-001").is_orchestrator());
    }
}
