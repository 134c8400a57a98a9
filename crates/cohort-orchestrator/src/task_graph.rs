use crate::types::{Artifact, Task, TaskState};
use chrono::Utc;
use cohort_core::{AgentId, CohortError, CohortResult, ProjectId, TaskId};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of [`TaskGraph::mark_completed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The task completed now; `unlocked` dependents became Ready.
    Applied { unlocked: Vec<TaskId> },
    /// The task had already completed. Nothing changed.
    Duplicate,
}

/// Result of [`TaskGraph::record_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Back to Ready for another attempt.
    Requeued { retry_count: u32 },
    /// Failed for good; `blocked` dependents now wait for resolution.
    Exhausted { blocked: Vec<TaskId> },
    /// The task was already terminal.
    Ignored,
}

/// Decomposed work items with dependency edges.
///
/// Readiness is maintained eagerly: a Pending task becomes Ready the moment
/// its last dependency completes, and Blocked the moment any dependency fails
/// for good.
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    dependents: HashMap<TaskId, Vec<TaskId>>,
    next_seq: u64,
}

impl TaskGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            dependents: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Rebuild a graph from persisted tasks. Tasks held by agents go back to
    /// Ready; the agents of a previous run are gone.
    pub fn restore(tasks: Vec<Task>) -> Self {
        let mut graph = Self::new();
        for mut task in tasks {
            if task.state.is_active() {
                task.state = TaskState::Ready;
                task.assigned_agent = None;
            }
            graph.next_seq = graph.next_seq.max(task.seq + 1);
            for dep in &task.dependencies {
                graph.dependents.entry(*dep).or_default().push(task.id);
            }
            graph.tasks.insert(task.id, task);
        }
        graph
    }

    /// Add a single task.
    pub fn add_task(&mut self, task: Task) -> CohortResult<TaskId> {
        let id = task.id;
        self.add_tasks(vec![task])?;
        Ok(id)
    }

    /// Add a batch of tasks atomically. Unknown dependencies, duplicate ids
    /// or a cycle reject the whole batch.
    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> CohortResult<Vec<TaskId>> {
        let batch: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        if batch.len() != tasks.len() {
            return Err(CohortError::Plan("duplicate task id in batch".into()));
        }
        for task in &tasks {
            if self.tasks.contains_key(&task.id) {
                return Err(CohortError::Plan(format!("task {} already exists", task.id)));
            }
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) && !batch.contains(dep) {
                    return Err(CohortError::Plan(format!(
                        "task '{}' depends on unknown task {dep}",
                        task.title
                    )));
                }
            }
        }

        // Existing tasks cannot depend on new ones, so a cycle lies inside the batch.
        let edges: HashMap<TaskId, &[TaskId]> = tasks
            .iter()
            .map(|t| (t.id, t.dependencies.as_slice()))
            .collect();
        if edges_have_cycle(&edges) {
            return Err(CohortError::Plan("dependency cycle in batch".into()));
        }

        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        for mut task in tasks {
            task.seq = self.next_seq;
            self.next_seq += 1;
            task.state = TaskState::Pending;
            task.assigned_agent = None;
            for dep in &task.dependencies {
                self.dependents.entry(*dep).or_default().push(task.id);
            }
            self.tasks.insert(task.id, task);
        }
        self.settle(&ids);
        Ok(ids)
    }

    /// Recompute Pending/Ready/Blocked for `ids` until nothing changes.
    fn settle(&mut self, ids: &[TaskId]) {
        loop {
            let mut changed = false;
            for id in ids {
                let Some(current) = self.tasks.get(id).map(|t| t.state) else {
                    continue;
                };
                if !matches!(
                    current,
                    TaskState::Pending | TaskState::Ready | TaskState::Blocked
                ) {
                    continue;
                }
                let next = self.derived_state(*id);
                if next != current {
                    if let Some(task) = self.tasks.get_mut(id) {
                        task.state = next;
                        if next == TaskState::Blocked && task.failure.is_none() {
                            task.failure = Some("dependency failed".into());
                        }
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// The state a not-yet-started task should be in given its dependencies.
    fn derived_state(&self, id: TaskId) -> TaskState {
        let Some(task) = self.tasks.get(&id) else {
            return TaskState::Pending;
        };
        let mut all_completed = true;
        for dep in &task.dependencies {
            match self.tasks.get(dep).map(|d| d.state) {
                Some(TaskState::Completed) => {}
                Some(TaskState::Failed) | Some(TaskState::Blocked) => return TaskState::Blocked,
                Some(_) => all_completed = false,
                // Archived dependencies were completed.
                None => {}
            }
        }
        if all_completed {
            TaskState::Ready
        } else {
            TaskState::Pending
        }
    }

    /// Reserve a Ready task for an agent.
    pub fn mark_assigned(&mut self, id: TaskId, agent: &AgentId) -> CohortResult<()> {
        let task = self.task_mut(id)?;
        if task.state != TaskState::Ready {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} is {} and cannot be assigned",
                task.state
            )));
        }
        task.state = TaskState::Assigned;
        task.assigned_agent = Some(agent.clone());
        Ok(())
    }

    /// The assigned agent reported it is executing.
    pub fn mark_in_progress(&mut self, id: TaskId) -> CohortResult<()> {
        let task = self.task_mut(id)?;
        match task.state {
            TaskState::InProgress => Ok(()),
            TaskState::Assigned => {
                task.state = TaskState::InProgress;
                Ok(())
            }
            other => Err(CohortError::InvalidTransition(format!(
                "task {id} is {other} and cannot start"
            ))),
        }
    }

    /// Complete a task and unlock its dependents. Idempotent.
    pub fn mark_completed(&mut self, id: TaskId, artifact: Artifact) -> CohortResult<Completion> {
        let task = self.task_mut(id)?;
        match task.state {
            TaskState::Completed => return Ok(Completion::Duplicate),
            TaskState::Ready | TaskState::Assigned | TaskState::InProgress => {}
            other => {
                return Err(CohortError::InvalidTransition(format!(
                    "task {id} is {other} and cannot complete"
                )))
            }
        }
        task.state = TaskState::Completed;
        task.artifact = Some(artifact);
        task.completed_at = Some(Utc::now());

        let dependents = self.dependents.get(&id).cloned().unwrap_or_default();
        let mut unlocked = Vec::new();
        for dep_id in dependents {
            let pending = self
                .tasks
                .get(&dep_id)
                .is_some_and(|t| t.state == TaskState::Pending);
            if pending && self.derived_state(dep_id) == TaskState::Ready {
                if let Some(t) = self.tasks.get_mut(&dep_id) {
                    t.state = TaskState::Ready;
                    unlocked.push(dep_id);
                }
            }
        }
        Ok(Completion::Applied { unlocked })
    }

    /// Count a failed attempt: back to Ready while under `max_retries`
    /// failures, else failed for good.
    pub fn record_failure(
        &mut self,
        id: TaskId,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> CohortResult<Failure> {
        let reason = reason.into();
        let task = self.task(id)?;
        if task.state.is_terminal() || task.state == TaskState::Blocked {
            return Ok(Failure::Ignored);
        }
        if task.retry_count + 1 >= max_retries {
            let task = self.task_mut(id)?;
            task.retry_count += 1;
            let blocked = self.mark_failed(id, reason)?;
            Ok(Failure::Exhausted { blocked })
        } else {
            let retry_count = self.requeue(id, reason)?;
            Ok(Failure::Requeued { retry_count })
        }
    }

    /// Return a held task to Ready, counting a failed attempt.
    pub fn requeue(&mut self, id: TaskId, reason: impl Into<String>) -> CohortResult<u32> {
        let task = self.task_mut(id)?;
        if task.state.is_terminal() || task.state == TaskState::Blocked {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} is {} and cannot be requeued",
                task.state
            )));
        }
        task.retry_count += 1;
        task.failure = Some(reason.into());
        task.assigned_agent = None;
        task.state = TaskState::Ready;
        Ok(task.retry_count)
    }

    /// Return a held task to Ready without counting a failure (declined
    /// assignment, agent gone before starting).
    pub fn release(&mut self, id: TaskId) -> CohortResult<()> {
        let task = self.task_mut(id)?;
        if !task.state.is_active() {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} is {} and cannot be released",
                task.state
            )));
        }
        task.state = TaskState::Ready;
        task.assigned_agent = None;
        Ok(())
    }

    /// Fail a task for good. Every transitive dependent that has not finished
    /// becomes Blocked; their ids are returned.
    pub fn mark_failed(&mut self, id: TaskId, reason: impl Into<String>) -> CohortResult<Vec<TaskId>> {
        let task = self.task_mut(id)?;
        if task.state == TaskState::Completed {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} already completed"
            )));
        }
        task.state = TaskState::Failed;
        task.failure = Some(reason.into());
        task.assigned_agent = None;
        task.completed_at = Some(Utc::now());

        let mut blocked = Vec::new();
        for dep_id in self.transitive_dependents(id) {
            if let Some(t) = self.tasks.get_mut(&dep_id) {
                if !t.state.is_terminal() && t.state != TaskState::Blocked {
                    t.state = TaskState::Blocked;
                    t.assigned_agent = None;
                    t.failure = Some(format!("dependency {id} failed"));
                    blocked.push(dep_id);
                }
            }
        }
        Ok(blocked)
    }

    /// Resolve a failed task by trying again: it returns to Ready with a
    /// fresh retry budget and its Blocked dependents are re-evaluated.
    /// Returns the dependents that left Blocked.
    pub fn retry(&mut self, id: TaskId) -> CohortResult<Vec<TaskId>> {
        let task = self.task_mut(id)?;
        if task.state != TaskState::Failed {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} is {} and cannot be retried",
                task.state
            )));
        }
        task.retry_count = 0;
        task.failure = None;
        task.completed_at = None;
        task.state = TaskState::Pending;

        let mut affected = vec![id];
        for dep_id in self.transitive_dependents(id) {
            if let Some(t) = self.tasks.get_mut(&dep_id) {
                if t.state == TaskState::Blocked {
                    t.state = TaskState::Pending;
                    t.failure = None;
                    affected.push(dep_id);
                }
            }
        }
        self.settle(&affected);

        Ok(affected
            .into_iter()
            .skip(1)
            .filter(|t| self.tasks.get(t).is_some_and(|t| t.state != TaskState::Blocked))
            .collect())
    }

    /// Resolve a failed task by giving up: its Blocked dependents fail too.
    pub fn abandon(&mut self, id: TaskId) -> CohortResult<Vec<TaskId>> {
        let task = self.task(id)?;
        if task.state != TaskState::Failed {
            return Err(CohortError::InvalidTransition(format!(
                "task {id} is {} and cannot be abandoned",
                task.state
            )));
        }
        let mut abandoned = Vec::new();
        let now = Utc::now();
        for dep_id in self.transitive_dependents(id) {
            if let Some(t) = self.tasks.get_mut(&dep_id) {
                if t.state == TaskState::Blocked {
                    t.state = TaskState::Failed;
                    t.failure = Some(format!("abandoned: dependency {id} failed"));
                    t.completed_at = Some(now);
                    abandoned.push(dep_id);
                }
            }
        }
        Ok(abandoned)
    }

    fn transitive_dependents(&self, id: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<TaskId> = self.dependents.get(&id).cloned().unwrap_or_default().into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                order.push(next);
                if let Some(more) = self.dependents.get(&next) {
                    queue.extend(more.iter().copied());
                }
            }
        }
        order
    }

    /// Ready tasks sorted by capability, then priority (highest first), then
    /// creation order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Ready)
            .collect();
        ready.sort_by_key(|t| (t.capability.clone(), Reverse(t.priority), t.seq));
        ready
    }

    /// Remove terminal tasks none of whose dependents still needs them.
    pub fn archive_terminal(&mut self) -> Vec<Task> {
        self.archive_terminal_where(|_| true)
    }

    /// [`archive_terminal`](Self::archive_terminal) restricted to tasks
    /// accepted by `eligible`.
    pub fn archive_terminal_where(&mut self, eligible: impl Fn(&Task) -> bool) -> Vec<Task> {
        let archivable: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state.is_terminal() && eligible(t))
            .filter(|t| {
                self.dependents.get(&t.id).map_or(true, |deps| {
                    deps.iter()
                        .all(|d| self.tasks.get(d).map_or(true, |d| d.state.is_terminal()))
                })
            })
            .map(|t| t.id)
            .collect();

        let mut archived = Vec::with_capacity(archivable.len());
        for id in archivable {
            self.dependents.remove(&id);
            if let Some(task) = self.tasks.remove(&id) {
                archived.push(task);
            }
        }
        archived.sort_by_key(|t| t.seq);
        archived
    }

    /// Check the whole graph for cycles.
    pub fn has_cycle(&self) -> bool {
        let edges: HashMap<TaskId, &[TaskId]> = self
            .tasks
            .values()
            .map(|t| (t.id, t.dependencies.as_slice()))
            .collect();
        edges_have_cycle(&edges)
    }

    /// A task by id.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    fn task(&self, id: TaskId) -> CohortResult<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| CohortError::NotFound(format!("task {id}")))
    }

    fn task_mut(&mut self, id: TaskId) -> CohortResult<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| CohortError::NotFound(format!("task {id}")))
    }

    /// Tasks of one project in creation order.
    pub fn project_tasks(&self, project_id: ProjectId) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Tasks currently held by `agent`.
    pub fn held_by(&self, agent: &AgentId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.state.is_active() && t.assigned_agent.as_ref() == Some(agent))
            .map(|t| t.id)
            .collect()
    }

    /// Every task in creation order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Number of tasks in `state`.
    pub fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn edges_have_cycle(edges: &HashMap<TaskId, &[TaskId]>) -> bool {
    let mut visited = HashMap::new();
    edges.keys().any(|id| dfs_cycle(*id, edges, &mut visited))
}

fn dfs_cycle(id: TaskId, edges: &HashMap<TaskId, &[TaskId]>, visited: &mut HashMap<TaskId, u8>) -> bool {
    match visited.get(&id) {
        Some(1) => return true,  // back edge
        Some(2) => return false, // done
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(deps) = edges.get(&id) {
        for dep in deps.iter() {
            if dfs_cycle(*dep, edges, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_core::{Capability, Priority};
    use uuid::Uuid;

    fn task(title: &str, capability: &str) -> Task {
        Task::new(Uuid::nil(), title, Capability::from(capability))
    }

    fn artifact() -> Artifact {
        Artifact::new("done", AgentId::from("implementer-001"))
    }

    fn state(graph: &TaskGraph, id: TaskId) -> TaskState {
        graph.get(id).unwrap().state
    }

    #[test]
    fn test_empty_graph() {
        let graph = TaskGraph::new();
        assert!(graph.is_empty());
        assert!(graph.ready_tasks().is_empty());
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_independent_task_is_ready() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        assert_eq!(state(&graph, id), TaskState::Ready);
    }

    #[test]
    fn test_completion_unlocks_dependents() {
        let mut graph = TaskGraph::new();
        let a = task("A", "designer");
        let b = task("B", "implementer").with_dependencies(vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        graph.add_tasks(vec![a, b]).unwrap();
        assert_eq!(state(&graph, b_id), TaskState::Pending);

        graph.mark_assigned(a_id, &AgentId::from("designer-001")).unwrap();
        graph.mark_in_progress(a_id).unwrap();
        let outcome = graph.mark_completed(a_id, artifact()).unwrap();
        assert_eq!(outcome, Completion::Applied { unlocked: vec![b_id] });
        assert_eq!(state(&graph, b_id), TaskState::Ready);
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        graph.mark_assigned(id, &AgentId::from("implementer-001")).unwrap();
        graph.mark_completed(id, artifact()).unwrap();
        let before = graph.get(id).unwrap().clone();

        assert_eq!(graph.mark_completed(id, artifact()).unwrap(), Completion::Duplicate);
        assert_eq!(graph.get(id).unwrap(), &before);
    }

    #[test]
    fn test_unknown_dependency_rejects_batch() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "implementer").with_dependencies(vec![Uuid::new_v4()]);
        assert!(matches!(graph.add_tasks(vec![a, b]), Err(CohortError::Plan(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cycle_rejects_batch() {
        let mut graph = TaskGraph::new();
        let mut a = task("A", "implementer");
        let mut b = task("B", "implementer");
        a.dependencies = vec![b.id];
        b.dependencies = vec![a.id];
        assert!(graph.add_tasks(vec![a, b]).is_err());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_ready_order_is_capability_priority_then_creation() {
        let mut graph = TaskGraph::new();
        let low = task("low", "implementer").with_priority(Priority(1));
        let high = task("high", "implementer").with_priority(Priority(5));
        let later_high = task("later-high", "implementer").with_priority(Priority(5));
        let design = task("design", "designer").with_priority(Priority(0));
        graph.add_tasks(vec![low, high, later_high, design]).unwrap();

        let titles: Vec<&str> = graph.ready_tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["design", "high", "later-high", "low"]);
    }

    #[test]
    fn test_assignment_is_exclusive() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        graph.mark_assigned(id, &AgentId::from("implementer-001")).unwrap();
        assert!(graph.mark_assigned(id, &AgentId::from("implementer-002")).is_err());
        assert_eq!(graph.held_by(&AgentId::from("implementer-001")), vec![id]);
    }

    #[test]
    fn test_retry_ceiling() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        let agent = AgentId::from("implementer-001");

        for attempt in 1..3 {
            graph.mark_assigned(id, &agent).unwrap();
            let outcome = graph.record_failure(id, "boom", 3).unwrap();
            assert_eq!(outcome, Failure::Requeued { retry_count: attempt });
            assert_eq!(state(&graph, id), TaskState::Ready);
        }

        graph.mark_assigned(id, &agent).unwrap();
        let outcome = graph.record_failure(id, "boom", 3).unwrap();
        assert_eq!(outcome, Failure::Exhausted { blocked: vec![] });
        assert_eq!(state(&graph, id), TaskState::Failed);
        assert_eq!(graph.get(id).unwrap().retry_count, 3);
        assert!(graph.mark_assigned(id, &agent).is_err());
        assert_eq!(graph.record_failure(id, "again", 3).unwrap(), Failure::Ignored);
    }

    #[test]
    fn test_failure_blocks_transitive_dependents() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "validator").with_dependencies(vec![a.id]);
        let c = task("C", "validator").with_dependencies(vec![b.id]);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        graph.add_tasks(vec![a, b, c]).unwrap();

        let blocked = graph.mark_failed(a_id, "model unavailable").unwrap();
        assert_eq!(blocked, vec![b_id, c_id]);
        assert_eq!(state(&graph, c_id), TaskState::Blocked);

        // A task added later on top of a failed one starts Blocked.
        let d = task("D", "implementer").with_dependencies(vec![a_id]);
        let d_id = graph.add_task(d).unwrap();
        assert_eq!(state(&graph, d_id), TaskState::Blocked);
    }

    #[test]
    fn test_retry_unblocks_dependents() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "validator").with_dependencies(vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        graph.add_tasks(vec![a, b]).unwrap();
        graph.mark_failed(a_id, "boom").unwrap();

        let unblocked = graph.retry(a_id).unwrap();
        assert_eq!(unblocked, vec![b_id]);
        assert_eq!(state(&graph, a_id), TaskState::Ready);
        assert_eq!(state(&graph, b_id), TaskState::Pending);
        assert_eq!(graph.get(a_id).unwrap().retry_count, 0);
    }

    #[test]
    fn test_retry_keeps_tasks_blocked_by_another_failure() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "designer");
        let c = task("C", "validator").with_dependencies(vec![a.id, b.id]);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        graph.add_tasks(vec![a, b, c]).unwrap();
        graph.mark_failed(a_id, "boom").unwrap();
        graph.mark_failed(b_id, "boom").unwrap();

        assert!(graph.retry(a_id).unwrap().is_empty());
        assert_eq!(state(&graph, c_id), TaskState::Blocked);
    }

    #[test]
    fn test_abandon_fails_blocked_dependents() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "validator").with_dependencies(vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        graph.add_tasks(vec![a, b]).unwrap();
        graph.mark_failed(a_id, "boom").unwrap();

        assert_eq!(graph.abandon(a_id).unwrap(), vec![b_id]);
        assert_eq!(state(&graph, b_id), TaskState::Failed);
    }

    #[test]
    fn test_release_does_not_count_a_failure() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        graph.mark_assigned(id, &AgentId::from("designer-001")).unwrap();
        graph.release(id).unwrap();
        let t = graph.get(id).unwrap();
        assert_eq!(t.state, TaskState::Ready);
        assert_eq!(t.retry_count, 0);
        assert!(t.assigned_agent.is_none());
    }

    #[test]
    fn test_archive_keeps_tasks_still_needed() {
        let mut graph = TaskGraph::new();
        let a = task("A", "implementer");
        let b = task("B", "validator").with_dependencies(vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        graph.add_tasks(vec![a, b]).unwrap();
        graph.mark_completed(a_id, artifact()).unwrap();

        assert!(graph.archive_terminal().is_empty());

        graph.mark_completed(b_id, artifact()).unwrap();
        let archived = graph.archive_terminal();
        assert_eq!(archived.len(), 2);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_restore_returns_held_tasks_to_ready() {
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task("A", "implementer")).unwrap();
        graph.mark_assigned(id, &AgentId::from("implementer-001")).unwrap();
        let tasks: Vec<Task> = graph.all_tasks().into_iter().cloned().collect();

        let restored = TaskGraph::restore(tasks);
        assert_eq!(state(&restored, id), TaskState::Ready);
        assert!(restored.get(id).unwrap().assigned_agent.is_none());
    }
}
