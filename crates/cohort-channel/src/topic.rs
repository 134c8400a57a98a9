use cohort_core::{AgentId, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const REPLY_PREFIX: &str = "reply.";

/// Name of a channel topic.
///
/// Well-known topics: `orchestrator` (orchestrator inbox), `agent.<id>`
/// (agent inboxes), `broadcast`, `reply.<correlation-id>` (one-shot reply
/// topics), `progress`, `escalations` and `health`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// A topic with an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The orchestrator's inbox.
    pub fn orchestrator() -> Self {
        Self::new(AgentId::ORCHESTRATOR)
    }

    /// Inbox of an agent. The orchestrator's inbox is [`Topic::orchestrator`].
    pub fn inbox(agent: &AgentId) -> Self {
        if agent.is_orchestrator() {
            Self::orchestrator()
        } else {
            Self::new(format!("agent.{agent}"))
        }
    }

    /// Messages without a recipient.
    pub fn broadcast() -> Self {
        Self::new("broadcast")
    }

    /// One-shot topic for the reply to `correlation_id`.
    pub fn reply(correlation_id: Uuid) -> Self {
        Self::new(format!("{REPLY_PREFIX}{correlation_id}"))
    }

    /// Project progress reports.
    pub fn progress() -> Self {
        Self::new("progress")
    }

    /// Permanently failed tasks.
    pub fn escalations() -> Self {
        Self::new("escalations")
    }

    /// Liveness sweep results.
    pub fn health() -> Self {
        Self::new("health")
    }

    /// Route by recipient: addressed messages go to the recipient's inbox,
    /// unaddressed ones to `broadcast`.
    pub fn for_message(message: &Message) -> Self {
        match &message.recipient {
            Some(recipient) => Self::inbox(recipient),
            None => Self::broadcast(),
        }
    }

    /// Reply topics keep no history and disappear with their last subscriber.
    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with(REPLY_PREFIX)
    }

    /// The topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{MessageBody, ShutdownNotice};

    fn shutdown(recipient: Option<AgentId>) -> Message {
        Message::from_orchestrator(
            recipient,
            MessageBody::Shutdown(ShutdownNotice {
                reason: "idle".into(),
            }),
        )
    }

    #[test]
    fn test_routing_by_recipient() {
        let to_agent = shutdown(Some(AgentId::from("designer-001")));
        assert_eq!(Topic::for_message(&to_agent).as_str(), "agent.designer-001");
        assert_eq!(Topic::for_message(&shutdown(None)), Topic::broadcast());
    }

    #[test]
    fn test_orchestrator_inbox() {
        assert_eq!(Topic::inbox(&AgentId::orchestrator()), Topic::orchestrator());
    }

    #[test]
    fn test_reply_topics_are_ephemeral() {
        assert!(Topic::reply(Uuid::new_v4()).is_ephemeral());
        assert!(!Topic::progress().is_ephemeral());
    }
}
