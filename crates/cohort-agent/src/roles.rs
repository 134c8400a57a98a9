use crate::config::ModelProfile;
use crate::inference::CompletionRequest;
use cohort_core::{AgentRole, Capability, TaskAssignment};

/// Line prefix a model uses to ask another capability for help.
pub const ASSISTANCE_MARKER: &str = "NEEDS_ASSISTANCE:";

/// Everything that distinguishes one role from another: its capability set,
/// its sampling settings and its system prompt.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    /// The role this profile describes.
    pub role: AgentRole,
    /// Capabilities the agent advertises.
    pub capabilities: Vec<Capability>,
    /// Sampling settings for this role.
    pub model: ModelProfile,
    /// Instructions prepended to every request.
    pub system_prompt: String,
}

impl AgentProfile {
    /// The default profile of `role`, derived from a base model profile.
    pub fn for_role(role: AgentRole, base: &ModelProfile) -> Self {
        let mut model = base.clone();
        let system_prompt = match role {
            AgentRole::Planner => {
                model.temperature = 0.3;
                PLANNER_PROMPT
            }
            AgentRole::Implementer => {
                model.temperature = 0.2;
                IMPLEMENTER_PROMPT
            }
            AgentRole::Validator => {
                model.temperature = 0.2;
                VALIDATOR_PROMPT
            }
            AgentRole::Designer => {
                model.temperature = 0.6;
                DESIGNER_PROMPT
            }
        };

        Self {
            role,
            capabilities: role.default_capabilities(),
            model,
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Whether the profile advertises `capability`.
    pub fn serves(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Build the inference request for an assignment.
    pub fn build_request(&self, assignment: &TaskAssignment) -> CompletionRequest {
        let mut prompt = String::new();
        if let Some(requester) = &assignment.assistance_for {
            prompt.push_str(&format!(
                "Another agent ({requester}) needs your help as a {}.\n\n",
                assignment.capability
            ));
        }
        prompt.push_str(&format!("Task: {}\n\n{}\n", assignment.title, assignment.description));
        if let Some(context) = &assignment.context {
            prompt.push_str(&format!("\nContext:\n{context}\n"));
        }
        if assignment.assistance_for.is_none() {
            prompt.push_str(&format!(
                "\nIf you cannot finish without help from another specialist, answer with a \
                 single line `{ASSISTANCE_MARKER} <capability>: <question>`.\n"
            ));
        }
        CompletionRequest::new(prompt).with_system(self.system_prompt.clone())
    }

    /// Follow-up request once an assistance round has finished.
    pub fn build_follow_up(
        &self,
        assignment: &TaskAssignment,
        help: Option<&str>,
    ) -> CompletionRequest {
        let mut prompt = format!("Task: {}\n\n{}\n", assignment.title, assignment.description);
        if let Some(context) = &assignment.context {
            prompt.push_str(&format!("\nContext:\n{context}\n"));
        }
        match help {
            Some(answer) => prompt.push_str(&format!(
                "\nA colleague answered your question:\n{answer}\n\nNow complete the task.\n"
            )),
            None => prompt.push_str(
                "\nNo colleague was available to help. Complete the task as well as you can \
                 and state any assumptions you made.\n",
            ),
        }
        CompletionRequest::new(prompt).with_system(self.system_prompt.clone())
    }
}

/// Default profiles for every role.
pub fn default_profiles(base: &ModelProfile) -> Vec<AgentProfile> {
    AgentRole::ALL
        .iter()
        .map(|role| AgentProfile::for_role(*role, base))
        .collect()
}

/// A help request found in model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistanceNeed {
    /// Capability asked for.
    pub capability: Capability,
    /// What the model wants to know.
    pub question: String,
}

/// Find the first `NEEDS_ASSISTANCE: <capability>: <question>` line.
pub fn parse_assistance_need(output: &str) -> Option<AssistanceNeed> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(ASSISTANCE_MARKER)?;
        let (capability, question) = rest.split_once(':')?;
        let capability = capability.trim();
        let question = question.trim();
        if capability.is_empty() || question.is_empty() {
            return None;
        }
        Some(AssistanceNeed {
            capability: Capability::new(capability),
            question: question.to_string(),
        })
    })
}

/// Drop assistance marker lines from a final artifact.
pub fn strip_assistance_markers(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with(ASSISTANCE_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

const PLANNER_PROMPT: &str = "\
You are the Planner agent in a pool of autonomous software agents. \
Your job is to turn project requirements into a plan of small, concrete tasks.

Answer with a JSON array only. Each element is an object with the fields:
- \"title\": short task title
- \"description\": what must be produced
- \"priority\": integer, higher is more urgent
- \"role\": one of planner, implementer, validator, designer
- \"depends_on\": list of titles of tasks that must finish first
- \"sprint\": optional sprint number starting at 1

Rules:
1. Keep tasks independent where possible.
2. Put design before implementation and implementation before validation.
3. Do not write code yourself.
";

const IMPLEMENTER_PROMPT: &str = "\
You are the Implementer agent in a pool of autonomous software agents. \
You write clean, complete, working code for the task you are given.

Rules:
1. Produce the full artifact, not a sketch.
2. Follow the design and context you are given.
3. Keep functions small and name things clearly.
4. Document public items briefly.
";

const VALIDATOR_PROMPT: &str = "\
You are the Validator agent in a pool of autonomous software agents. \
You write tests for the artifacts you are given and report defects.

Rules:
1. Cover normal cases, edge cases and error paths.
2. Each test checks one behaviour.
3. Report every defect you find with the input that triggers it.
";

const DESIGNER_PROMPT: &str = "\
You are the Designer agent in a pool of autonomous software agents. \
You produce user interface designs: layouts, components, states and copy.

Rules:
1. Describe every screen and its components.
2. Cover empty, loading and error states.
3. Keep the design accessible.
";
