//! Turning a planner agent's output into a task graph batch.
//!
//! Three formats are accepted, tried in order:
//!
//! 1. a JSON array of task objects (the format the planner prompt asks for),
//! 2. `Title:` / `Description:` / `Priority:` / `Role:` line blocks,
//! 3. nothing usable, which yields a single "Setup project" task.

use crate::types::Task;
use cohort_core::{AgentRole, Priority, ProjectId, TaskId};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// One task of a parsed plan. Dependencies are indices into the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    /// Short title.
    pub title: String,
    /// What to do.
    pub description: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Role whose primary capability the task requires.
    pub role: AgentRole,
    /// Indices of tasks that must complete first.
    pub depends_on: Vec<usize>,
    /// Explicit sprint, if the plan gave one.
    pub sprint: Option<u32>,
}

impl PlannedTask {
    /// A task with normal priority and its title as description.
    pub fn new(title: impl Into<String>, role: AgentRole) -> Self {
        let title = title.into();
        Self {
            description: title.clone(),
            title,
            priority: Priority::NORMAL,
            role,
            depends_on: Vec::new(),
            sprint: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependencies, as plan indices.
    pub fn depends_on(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = indices;
        self
    }

    /// Place the task in `sprint`.
    pub fn in_sprint(mut self, sprint: u32) -> Self {
        self.sprint = Some(sprint);
        self
    }
}

/// An ordered list of planned tasks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    /// Tasks in plan order.
    pub tasks: Vec<PlannedTask>,
}

impl Plan {
    /// A plan of `tasks`.
    pub fn new(tasks: Vec<PlannedTask>) -> Self {
        Self { tasks }
    }

    /// The plan used when the planner's output is unusable.
    pub fn fallback() -> Self {
        Self::new(vec![PlannedTask::new("Setup project", AgentRole::Implementer)
            .with_description("Initialize project structure")])
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The same plan with every dependency edge removed.
    pub fn without_dependencies(mut self) -> Self {
        for task in &mut self.tasks {
            task.depends_on.clear();
        }
        self
    }

    /// Sprint of every task: the explicit one, else dependency depth + 1.
    pub fn sprints(&self) -> Vec<u32> {
        let mut memo: Vec<Option<u32>> = vec![None; self.tasks.len()];
        (0..self.tasks.len())
            .map(|i| {
                let mut visiting = vec![false; self.tasks.len()];
                self.sprint_of(i, &mut memo, &mut visiting)
            })
            .collect()
    }

    /// A plan never needs more sprints than it has tasks.
    fn max_sprint(&self) -> u32 {
        u32::try_from(self.tasks.len()).unwrap_or(u32::MAX).max(1)
    }

    fn sprint_of(&self, i: usize, memo: &mut [Option<u32>], visiting: &mut [bool]) -> u32 {
        if let Some(s) = memo[i] {
            return s;
        }
        if let Some(explicit) = self.tasks[i].sprint {
            let sprint = explicit.clamp(1, self.max_sprint());
            memo[i] = Some(sprint);
            return sprint;
        }
        if visiting[i] {
            // Cycle; the graph rejects it later.
            return 1;
        }
        visiting[i] = true;
        let depth = self.tasks[i]
            .depends_on
            .iter()
            .filter(|d| **d < self.tasks.len())
            .map(|d| self.sprint_of(*d, memo, visiting))
            .max()
            .map_or(1, |s| s.saturating_add(1));
        visiting[i] = false;
        memo[i] = Some(depth);
        depth
    }

    /// Materialise the plan as graph tasks of `project_id`, in plan order.
    pub fn into_tasks(self, project_id: ProjectId) -> Vec<Task> {
        let sprints = self.sprints();
        let ids: Vec<TaskId> = self.tasks.iter().map(|_| Uuid::new_v4()).collect();
        self.tasks
            .into_iter()
            .enumerate()
            .map(|(i, planned)| {
                let deps = planned
                    .depends_on
                    .iter()
                    .filter_map(|d| ids.get(*d).copied())
                    .collect();
                let mut task = Task::new(project_id, planned.title, planned.role.primary_capability())
                    .with_description(planned.description)
                    .with_priority(planned.priority)
                    .with_dependencies(deps)
                    .with_sprint(sprints[i]);
                task.id = ids[i];
                task
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default, alias = "suggested_role", alias = "capability")]
    role: Option<String>,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<Value>,
    #[serde(default)]
    sprint: Option<u32>,
}

/// Parse a planner's output. Never fails: the last resort is [`Plan::fallback`].
pub fn parse_plan(output: &str) -> Plan {
    if let Some(plan) = parse_json(output) {
        debug!(tasks = plan.len(), "Parsed JSON plan");
        return plan;
    }
    if let Some(plan) = parse_lines(output) {
        debug!(tasks = plan.len(), "Parsed line-format plan");
        return plan;
    }
    warn!("Planner output unusable, falling back to a single setup task");
    Plan::fallback()
}

fn parse_json(output: &str) -> Option<Plan> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;
    if end <= start {
        return None;
    }
    let raw: Vec<RawTask> = serde_json::from_str(&output[start..=end]).ok()?;
    if raw.is_empty() {
        return None;
    }

    let titles: HashMap<String, usize> = raw
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.title.as_deref().map(|title| (normalize(title), i)))
        .collect();

    let tasks = raw
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let title = t
                .title
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Untitled Task".to_string());
            let depends_on = t
                .depends_on
                .iter()
                .filter_map(|dep| resolve_dependency(dep, &titles, raw.len()))
                .filter(|d| *d != i)
                .collect();
            PlannedTask {
                description: t.description.clone().unwrap_or_else(|| title.clone()),
                title,
                priority: t.priority.as_ref().map_or(Priority::NORMAL, priority_from_value),
                role: role_or_default(t.role.as_deref()),
                depends_on,
                sprint: t.sprint,
            }
        })
        .collect();
    Some(Plan::new(tasks))
}

/// A dependency is either a task title or a 1-based position in the plan.
fn resolve_dependency(dep: &Value, titles: &HashMap<String, usize>, len: usize) -> Option<usize> {
    let found = match dep {
        Value::String(title) => titles.get(&normalize(title)).copied(),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| (1..=len).contains(n))
            .map(|n| n - 1),
        _ => None,
    };
    if found.is_none() {
        warn!(dependency = %dep, "Dropping unresolvable plan dependency");
    }
    found
}

fn parse_lines(output: &str) -> Option<Plan> {
    let mut tasks: Vec<PlannedTask> = Vec::new();
    let mut pending_deps: Vec<Vec<String>> = Vec::new();

    for line in output.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        if let Some(title) = field(line, "Title:") {
            tasks.push(PlannedTask::new(title, AgentRole::Implementer));
            pending_deps.push(Vec::new());
            continue;
        }
        let (Some(current), Some(deps)) = (tasks.last_mut(), pending_deps.last_mut()) else {
            continue;
        };
        if let Some(description) = field(line, "Description:") {
            current.description = description.to_string();
        } else if let Some(priority) = field(line, "Priority:") {
            current.priority = priority_from_str(priority);
        } else if let Some(role) = field(line, "Role:") {
            current.role = role_or_default(Some(role));
        } else if let Some(list) = field(line, "Depends on:") {
            deps.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
    }
    if tasks.is_empty() {
        return None;
    }

    let titles: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (normalize(&t.title), i))
        .collect();
    for (i, deps) in pending_deps.into_iter().enumerate() {
        tasks[i].depends_on = deps
            .iter()
            .filter_map(|d| titles.get(&normalize(d)).copied())
            .filter(|d| *d != i)
            .collect();
    }
    Some(Plan::new(tasks))
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name).map(str::trim)
}

fn normalize(title: &str) -> String {
    title.trim().to_lowercase()
}

fn role_or_default(role: Option<&str>) -> AgentRole {
    role.and_then(|r| r.parse().ok()).unwrap_or(AgentRole::Implementer)
}

fn priority_from_value(value: &Value) -> Priority {
    match value {
        Value::Number(n) => n.as_u64().map_or(Priority::NORMAL, clamp_priority),
        Value::String(s) => priority_from_str(s),
        _ => Priority::NORMAL,
    }
}

fn priority_from_str(s: &str) -> Priority {
    if let Ok(n) = s.trim().parse::<u64>() {
        return clamp_priority(n);
    }
    match s.trim().to_lowercase().as_str() {
        "low" => Priority(1),
        "medium" | "normal" => Priority(2),
        "high" => Priority(3),
        "critical" | "urgent" => Priority(4),
        _ => Priority::NORMAL,
    }
}

/// Plan work never gets priority 0, which assistance work uses.
fn clamp_priority(n: u64) -> Priority {
    Priority(n.clamp(1, u64::from(u8::MAX)) as u8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_core::Capability;

    #[test]
    fn test_json_plan_with_title_dependencies() {
        let output = r#"Here is the plan:
[
  {"title": "Design schema", "description": "Tables", "priority": 3, "role": "designer"},
  {"title": "Build API", "priority": "high", "role": "developer", "depends_on": ["design schema"]},
  {"title": "Test API", "role": "tester", "depends_on": ["Build API"]}
]
Good luck."#;
        let plan = parse_plan(output);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.tasks[0].role, AgentRole::Designer);
        assert_eq!(plan.tasks[0].priority, Priority(3));
        assert_eq!(plan.tasks[1].role, AgentRole::Implementer);
        assert_eq!(plan.tasks[1].priority, Priority(3));
        assert_eq!(plan.tasks[1].depends_on, vec![0]);
        assert_eq!(plan.tasks[2].role, AgentRole::Validator);
        assert_eq!(plan.tasks[2].depends_on, vec![1]);
        assert_eq!(plan.tasks[2].description, "Test API");
        assert_eq!(plan.sprints(), vec![1, 2, 3]);
    }

    #[test]
    fn test_json_numeric_dependencies_are_one_based() {
        let output = r#"[{"title": "A"}, {"title": "B", "depends_on": [1, 7]}]"#;
        let plan = parse_plan(output);
        assert_eq!(plan.tasks[1].depends_on, vec![0]);
    }

    #[test]
    fn test_explicit_sprints_win() {
        let output = r#"[{"title": "A", "sprint": 2}, {"title": "B", "depends_on": ["A"]}]"#;
        assert_eq!(parse_plan(output).sprints(), vec![2, 3]);
    }

    #[test]
    fn test_oversized_explicit_sprint_is_clamped() {
        let output = r#"[{"title": "A", "sprint": 4294967295}, {"title": "B", "depends_on": ["A"]}]"#;
        assert_eq!(parse_plan(output).sprints(), vec![2, 3]);

        let plan = Plan::new(vec![PlannedTask::new("Only", AgentRole::Implementer).in_sprint(0)]);
        assert_eq!(plan.sprints(), vec![1]);
    }

    #[test]
    fn test_line_format() {
        let output = "\
- Title: Create wireframes
Description: Landing page mockups
Priority: 2
Role: UI Designer
- Title: Implement landing page
Role: developer
Depends on: Create wireframes
Priority: oops";
        let plan = parse_plan(output);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.tasks[0].role, AgentRole::Designer);
        assert_eq!(plan.tasks[0].description, "Landing page mockups");
        assert_eq!(plan.tasks[0].priority, Priority(2));
        assert_eq!(plan.tasks[1].priority, Priority::NORMAL);
        assert_eq!(plan.tasks[1].depends_on, vec![0]);
    }

    #[test]
    fn test_garbage_falls_back() {
        let plan = parse_plan("I could not come up with anything [sorry]");
        assert_eq!(plan, Plan::fallback());
        assert_eq!(plan.tasks[0].title, "Setup project");
    }

    #[test]
    fn test_into_tasks_wires_ids_and_capabilities() {
        let plan = Plan::new(vec![
            PlannedTask::new("A", AgentRole::Designer),
            PlannedTask::new("B", AgentRole::Validator).depends_on(vec![0]),
        ]);
        let project = Uuid::new_v4();
        let tasks = plan.into_tasks(project);
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id]);
        assert_eq!(tasks[0].capability, Capability::from("designer"));
        assert_eq!(tasks[1].sprint, Some(2));
        assert!(tasks.iter().all(|t| t.project_id == project));
    }

    #[test]
    fn test_cyclic_plan_still_gets_sprints() {
        let plan = Plan::new(vec![
            PlannedTask::new("A", AgentRole::Implementer).depends_on(vec![1]),
            PlannedTask::new("B", AgentRole::Implementer).depends_on(vec![0]),
        ]);
        assert_eq!(plan.sprints().len(), 2);
        assert!(plan.without_dependencies().sprints().iter().all(|s| *s == 1));
    }

    #[test]
    fn test_priority_zero_is_raised() {
        let plan = parse_plan(r#"[{"title": "A", "priority": 0}]"#);
        assert_eq!(plan.tasks[0].priority, Priority(1));
    }
}
