use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A named skill an agent advertises and a task requires.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Breaks requirements into a plan.
    pub const PLANNER: &'static str = "planner";
    /// Writes code.
    pub const IMPLEMENTER: &'static str = "implementer";
    /// Tests and reviews work.
    pub const VALIDATOR: &'static str = "validator";
    /// UI and UX design.
    pub const DESIGNER: &'static str = "designer";
    /// System architecture.
    pub const ARCHITECTURE: &'static str = "architecture";
    /// Reviewing code.
    pub const CODE_REVIEW: &'static str = "code_review";
    /// Writing documentation.
    pub const DOCUMENTATION: &'static str = "documentation";

    /// Capability names are case-insensitive and stored lowercase.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// The normalised name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Capability profile of an agent.
///
/// The set is closed; behaviour differences between roles are data (the
/// capability set and the prompts attached to the role), not subtyping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Decomposes project requirements into a task graph.
    Planner,
    /// Produces code and other implementation artifacts.
    Implementer,
    /// Writes and runs tests, validates artifacts.
    Validator,
    /// Produces UI designs and mockups.
    Designer,
}

impl AgentRole {
    /// Every role, in scheduling-preference order.
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Planner,
        AgentRole::Implementer,
        AgentRole::Validator,
        AgentRole::Designer,
    ];

    /// The capability this role exists to serve.
    pub fn primary_capability(&self) -> Capability {
        Capability::new(self.as_str())
    }

    /// Capabilities an agent of this role advertises by default.
    pub fn default_capabilities(&self) -> Vec<Capability> {
        let extra: &[&str] = match self {
            AgentRole::Planner => &[Capability::ARCHITECTURE],
            AgentRole::Implementer => &[Capability::CODE_REVIEW, Capability::DOCUMENTATION],
            AgentRole::Validator => &[Capability::CODE_REVIEW],
            AgentRole::Designer => &[],
        };
        std::iter::once(self.primary_capability())
            .chain(extra.iter().map(|c| Capability::new(c)))
            .collect()
    }

    /// Pick the role to recruit for a capability: the role whose primary
    /// capability matches, else the first role advertising it.
    pub fn for_capability(capability: &Capability) -> Option<AgentRole> {
        Self::ALL
            .iter()
            .find(|r| &r.primary_capability() == capability)
            .or_else(|| {
                Self::ALL
                    .iter()
                    .find(|r| r.default_capabilities().contains(capability))
            })
            .copied()
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Implementer => "implementer",
            AgentRole::Validator => "validator",
            AgentRole::Designer => "designer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = crate::CohortError;

    /// Accepts the canonical names plus the job titles planners tend to use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "planner" | "project_manager" | "manager" | "architect" => Ok(AgentRole::Planner),
            "implementer" | "developer" | "coder" | "engineer" => Ok(AgentRole::Implementer),
            "validator" | "tester" | "qa" | "reviewer" => Ok(AgentRole::Validator),
            "designer" | "ui_designer" | "ux_designer" => Ok(AgentRole::Designer),
            other => Err(crate::CohortError::Config(format!("unknown agent role '{other}'"))),
        }
    }
}

/// Task priority. Higher values are scheduled first; `LOWEST` is reserved
/// for assistance work.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Assistance work.
    pub const LOWEST: Priority = Priority(0);
    /// Default for planned tasks.
    pub const NORMAL: Priority = Priority(1);
    /// Scheduled before everything else.
    pub const HIGHEST: Priority = Priority(u8::MAX);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_is_normalized() {
        assert_eq!(Capability::new(" Implementer "), Capability::from("implementer"));
    }

    #[test]
    fn test_role_primary_capability_is_first_default() {
        for role in AgentRole::ALL {
            assert_eq!(role.default_capabilities()[0], role.primary_capability());
        }
    }

    #[test]
    fn test_role_for_capability() {
        assert_eq!(
            AgentRole::for_capability(&Capability::from("implementer")),
            Some(AgentRole::Implementer)
        );
        // Shared capability resolves to the first role advertising it.
        assert_eq!(
            AgentRole::for_capability(&Capability::from("code_review")),
            Some(AgentRole::Implementer)
        );
        assert_eq!(AgentRole::for_capability(&Capability::from("astrology")), None);
    }

    #[test]
    fn test_role_parse_aliases() {
        assert_eq!("developer".parse::<AgentRole>().unwrap(), AgentRole::Implementer);
        assert_eq!("UI Designer".parse::<AgentRole>().unwrap(), AgentRole::Designer);
        assert_eq!("project-manager".parse::<AgentRole>().unwrap(), AgentRole::Planner);
        assert!("juggler".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(AgentRole::Validator.to_string(), "validator");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::LOWEST < Priority::NORMAL);
        assert!(Priority(5) > Priority(2));
    }
}
