use crate::config::OrchestratorConfig;
use crate::monitor::{HealthMonitor, MetricsRecorder, PoolMetrics};
use crate::planner::{parse_plan, Plan};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::scaling::{AutoScaler, ScalingDecision};
use crate::snapshot::{OrchestratorSnapshot, SnapshotStore};
use crate::spawner::AgentSpawner;
use crate::task_graph::{Completion, Failure, TaskGraph};
use crate::types::{Artifact, Project, Task, TaskOrigin, TaskState};
use chrono::{DateTime, Utc};
use cohort_channel::{Deduplicator, MessageChannel, Subscription, Topic};
use cohort_core::{
    AgentId, AgentReady, AgentRole, AgentState, AssistanceRequest, AssistanceResponse, Capability,
    CohortError, CohortResult, Escalation, HealthReport, Message, MessageBody, Priority,
    ProgressReport, ProjectId, ProjectState, RegistrationAck, ShutdownNotice, StatusUpdate,
    TaskAssignment, TaskCompleted, TaskDeclined, TaskFailed, TaskId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Archived task ids remembered for recognising late results.
const ARCHIVE_WINDOW: usize = 1024;

/// How to resolve an escalated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Run the failed task again with a fresh retry budget.
    Retry,
    /// Give up on the failed task and fail everything it blocked.
    Abandon,
}

/// Read-only view of the whole pool, refreshed after every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Registered agents.
    pub agents: Vec<AgentRecord>,
    /// Tasks still in the graph.
    pub tasks: Vec<Task>,
    /// Progress of every project.
    pub projects: Vec<ProgressReport>,
    /// Pool counters.
    pub metrics: PoolMetrics,
    /// Assignment is paused because the channel is unavailable.
    pub channel_paused: bool,
}

impl OrchestratorStatus {
    /// Progress of one project.
    pub fn project(&self, id: ProjectId) -> Option<&ProgressReport> {
        self.projects.iter().find(|p| p.project_id == id)
    }

    /// One registered agent.
    pub fn agent(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.iter().find(|a| &a.id == id)
    }
}

enum Command {
    SubmitProject {
        requirements: String,
        reply: oneshot::Sender<ProjectId>,
    },
    SubmitPlan {
        requirements: String,
        plan: Plan,
        reply: oneshot::Sender<CohortResult<ProjectId>>,
    },
    Status {
        reply: oneshot::Sender<OrchestratorStatus>,
    },
    SpawnAgent {
        role: AgentRole,
        reply: oneshot::Sender<CohortResult<AgentId>>,
    },
    ResolveEscalation {
        task_id: TaskId,
        resolution: Resolution,
        reply: oneshot::Sender<CohortResult<Vec<TaskId>>>,
    },
    Snapshot {
        reply: oneshot::Sender<OrchestratorSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Recruit {
    role: AgentRole,
    since: DateTime<Utc>,
}

struct Outage {
    attempts: u32,
    retry_at: DateTime<Utc>,
}

/// The coordination core.
///
/// Owns the agent registry and the task graph and mutates them from a single
/// task: front-end commands, channel messages and timer ticks are processed
/// one at a time. [`Orchestrator::start`] runs the loop; the message and tick
/// handlers are public so the loop can also be driven step by step.
pub struct Orchestrator {
    config: OrchestratorConfig,
    channel: Arc<dyn MessageChannel>,
    spawner: Arc<dyn AgentSpawner>,
    store: Option<Arc<dyn SnapshotStore>>,
    graph: TaskGraph,
    /// Ids of recently archived tasks, so late results are recognised.
    archived: Deduplicator,
    registry: AgentRegistry,
    projects: BTreeMap<ProjectId, Project>,
    health: HealthMonitor,
    scaler: AutoScaler,
    metrics: MetricsRecorder,
    dedup: Deduplicator,
    recruits: HashMap<AgentId, Recruit>,
    outage: Option<Outage>,
    status_tx: watch::Sender<OrchestratorStatus>,
}

impl Orchestrator {
    /// An orchestrator with empty state. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: OrchestratorConfig,
        channel: Arc<dyn MessageChannel>,
        spawner: Arc<dyn AgentSpawner>,
    ) -> Self {
        let health = HealthMonitor::new(config.heartbeat_interval(), config.max_missed_heartbeats);
        let scaler = AutoScaler::new(config.scaling.clone());
        let (status_tx, _) = watch::channel(OrchestratorStatus::default());
        Self {
            config,
            channel,
            spawner,
            store: None,
            graph: TaskGraph::new(),
            archived: Deduplicator::new(ARCHIVE_WINDOW),
            registry: AgentRegistry::new(),
            projects: BTreeMap::new(),
            health,
            scaler,
            metrics: MetricsRecorder::new(),
            dedup: Deduplicator::new(4096),
            recruits: HashMap::new(),
            outage: None,
            status_tx,
        }
    }

    /// Persist snapshots to `store` on every tick and at shutdown.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load tasks, projects and metrics from a snapshot. Agents of the
    /// previous run are not restored; tasks they held go back to Ready.
    /// Call before [`start`](Self::start).
    pub fn restore(&mut self, snapshot: OrchestratorSnapshot) {
        info!(
            tasks = snapshot.tasks.len(),
            projects = snapshot.projects.len(),
            taken_at = %snapshot.taken_at,
            "Restoring orchestrator state"
        );
        self.graph = TaskGraph::restore(snapshot.tasks);
        self.archived = Deduplicator::new(ARCHIVE_WINDOW);
        self.projects = snapshot.projects.into_iter().map(|p| (p.id, p)).collect();
        self.metrics = MetricsRecorder::restore(snapshot.metrics);
    }

    /// Restore from the configured store, if it holds a snapshot.
    pub async fn restore_from_store(&mut self) -> CohortResult<bool> {
        let Some(store) = self.store.clone() else {
            return Ok(false);
        };
        match store.load().await? {
            Some(snapshot) => {
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The task graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// The agent registry.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The metrics sink.
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// A submitted project.
    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    /// A task still held by the graph. Archived tasks are gone.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.graph.get(id)
    }

    /// State of a project task. Only finished tasks of completed projects
    /// are archived, so a task missing from such a project completed.
    fn state_in(&self, project: &Project, id: TaskId) -> Option<TaskState> {
        match self.graph.get(id) {
            Some(task) => Some(task.state),
            None if project.state == ProjectState::Completed => Some(TaskState::Completed),
            None => None,
        }
    }

    /// Whether assignment is paused by a channel outage.
    pub fn is_paused(&self) -> bool {
        self.outage.is_some()
    }

    /// Spawn the event loop and return a handle to it.
    pub fn start(self) -> OrchestratorHandle {
        let (commands, rx) = mpsc::channel(64);
        let handle = OrchestratorHandle {
            commands,
            status: self.status_tx.subscribe(),
            metrics: self.metrics.clone(),
            channel: self.channel.clone(),
        };
        tokio::spawn(self.run(rx).instrument(info_span!("orchestrator")));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut inbox = match self.channel.subscribe(&Topic::orchestrator()).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(error = %e, "Cannot subscribe to the orchestrator topic");
                return;
            }
        };
        self.boot().await;

        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(agents = self.config.initial_agents.len(), "Orchestrator started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                next = inbox.recv() => match next {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        error!("Orchestrator subscription closed");
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.tick_at(Utc::now()).await,
            }
            self.publish_status().await;
        }
        info!("Orchestrator stopped");
    }

    async fn boot(&mut self) {
        let now = Utc::now();
        for role in self.config.initial_agents.clone() {
            if let Err(e) = self.recruit(role, now).await {
                warn!(role = %role, error = %e, "Initial agent could not be spawned");
            }
        }
        self.schedule().await;
        self.publish_status().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SubmitProject {
                requirements,
                reply,
            } => {
                let id = self.submit_project(requirements).await;
                let _ = reply.send(id);
            }
            Command::SubmitPlan {
                requirements,
                plan,
                reply,
            } => {
                let result = self.submit_plan(requirements, plan).await;
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status().await);
            }
            Command::SpawnAgent { role, reply } => {
                let _ = reply.send(self.recruit(role, Utc::now()).await);
            }
            Command::ResolveEscalation {
                task_id,
                resolution,
                reply,
            } => {
                let _ = reply.send(self.resolve_escalation(task_id, resolution).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot().await);
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    // ---------------------------------------------------------------
    // Projects
    // ---------------------------------------------------------------

    /// Accept project requirements and queue their decomposition.
    pub async fn submit_project(&mut self, requirements: impl Into<String>) -> ProjectId {
        let requirements = requirements.into();
        let mut project = Project::new(requirements.clone());
        let planning = Task::new(
            project.id,
            "Decompose project requirements",
            Capability::new(Capability::PLANNER),
        )
        .with_description(requirements)
        .with_priority(Priority::HIGHEST)
        .with_origin(TaskOrigin::Decomposition);
        project.planning_task = Some(planning.id);
        let project_id = project.id;
        self.projects.insert(project_id, project);

        if let Err(e) = self.graph.add_task(planning) {
            error!(%project_id, error = %e, "Decomposition task rejected");
        }
        info!(%project_id, "Project submitted");
        self.report_progress(project_id, "project submitted").await;
        self.schedule().await;
        project_id
    }

    /// Accept a project with its plan already decomposed.
    pub async fn submit_plan(
        &mut self,
        requirements: impl Into<String>,
        plan: Plan,
    ) -> CohortResult<ProjectId> {
        if plan.is_empty() {
            return Err(CohortError::Plan("plan has no tasks".into()));
        }
        let project = Project::new(requirements);
        let project_id = project.id;
        self.projects.insert(project_id, project);
        let count = match self.install_plan(project_id, plan) {
            Ok(count) => count,
            Err(e) => {
                self.projects.remove(&project_id);
                return Err(e);
            }
        };
        info!(%project_id, tasks = count, "Plan submitted");
        self.report_progress(project_id, format!("plan ready with {count} tasks"))
            .await;
        self.schedule().await;
        Ok(project_id)
    }

    /// Add a plan's tasks to the graph. A plan whose dependencies are
    /// rejected is installed again without them.
    fn install_plan(&mut self, project_id: ProjectId, plan: Plan) -> CohortResult<usize> {
        if !self.projects.contains_key(&project_id) {
            return Err(CohortError::NotFound(format!("project {project_id}")));
        }
        let ids = match self.graph.add_tasks(plan.clone().into_tasks(project_id)) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(%project_id, error = %e, "Plan rejected, installing it without dependencies");
                self.graph
                    .add_tasks(plan.without_dependencies().into_tasks(project_id))?
            }
        };

        let Some(project) = self.projects.get_mut(&project_id) else {
            return Err(CohortError::NotFound(format!("project {project_id}")));
        };
        for id in &ids {
            let sprint = self.graph.get(*id).and_then(|t| t.sprint).unwrap_or(1);
            project.sprints.entry(sprint).or_default().push(*id);
        }
        project.tasks.extend(ids.iter().copied());
        project.state = ProjectState::InProgress;
        Ok(ids.len())
    }

    fn progress_of(&self, project_id: ProjectId, note: &str) -> Option<ProgressReport> {
        let project = self.projects.get(&project_id)?;
        let states: Vec<TaskState> = project
            .tasks
            .iter()
            .filter_map(|id| self.state_in(project, *id))
            .collect();
        let count = |wanted: &[TaskState]| states.iter().filter(|s| wanted.contains(s)).count();
        let completed = count(&[TaskState::Completed]);
        let failed = count(&[TaskState::Failed]);
        let blocked = count(&[TaskState::Blocked]);
        let in_flight = count(&[TaskState::Assigned, TaskState::InProgress]);

        let planning_failed = project
            .planning_task
            .and_then(|id| self.state_in(project, id))
            .is_some_and(|state| state == TaskState::Failed);
        let state = if states.is_empty() {
            if planning_failed {
                ProjectState::Failed
            } else {
                ProjectState::Planning
            }
        } else if completed + failed + blocked == states.len() {
            if failed + blocked > 0 {
                ProjectState::Failed
            } else {
                ProjectState::Completed
            }
        } else {
            ProjectState::InProgress
        };

        let sprint_done = |ids: &[TaskId]| {
            ids.iter()
                .all(|id| self.state_in(project, *id) == Some(TaskState::Completed))
        };
        let current_sprint = project
            .sprints
            .iter()
            .find(|(_, ids)| !sprint_done(ids.as_slice()))
            .map(|(sprint, _)| *sprint);
        let sprint_completed = project
            .sprints
            .iter()
            .take_while(|(_, ids)| sprint_done(ids.as_slice()))
            .last()
            .map(|(sprint, _)| *sprint)
            .filter(|sprint| *sprint > project.sprints_announced);

        let note = match sprint_completed {
            Some(sprint) if note.is_empty() => format!("sprint {sprint} completed"),
            Some(sprint) => format!("{note}; sprint {sprint} completed"),
            None => note.to_string(),
        };

        Some(ProgressReport {
            project_id,
            state,
            degraded: project.degraded,
            total: states.len(),
            completed,
            failed,
            blocked,
            in_flight,
            current_sprint,
            sprint_completed,
            note,
        })
    }

    async fn report_progress(&mut self, project_id: ProjectId, note: impl AsRef<str>) {
        let Some(report) = self.progress_of(project_id, note.as_ref()) else {
            return;
        };
        if let Some(project) = self.projects.get_mut(&project_id) {
            if project.state != report.state {
                info!(%project_id, state = ?report.state, "Project state changed");
            }
            project.state = report.state;
            project.completed_at = match report.state {
                ProjectState::Completed => project.completed_at.or_else(|| Some(Utc::now())),
                _ => None,
            };
            if let Some(sprint) = report.sprint_completed {
                info!(%project_id, sprint, "Sprint completed");
                project.sprints_announced = sprint;
            }
        }
        let message = Message::from_orchestrator(None, MessageBody::ProgressReport(report));
        self.publish(&Topic::progress(), message, Utc::now()).await;
    }

    fn mark_degraded(&mut self, project_id: ProjectId) {
        if let Some(project) = self.projects.get_mut(&project_id) {
            project.degraded = true;
        }
    }

    /// Settle an escalation.
    pub async fn resolve_escalation(
        &mut self,
        task_id: TaskId,
        resolution: Resolution,
    ) -> CohortResult<Vec<TaskId>> {
        let project_id = self
            .graph
            .get(task_id)
            .map(|t| t.project_id)
            .ok_or_else(|| CohortError::NotFound(format!("task {task_id}")))?;
        let affected = match resolution {
            Resolution::Retry => self.graph.retry(task_id)?,
            Resolution::Abandon => self.graph.abandon(task_id)?,
        };
        info!(%task_id, ?resolution, affected = affected.len(), "Escalation resolved");
        self.report_progress(project_id, format!("escalation resolved: {resolution:?}"))
            .await;
        self.schedule().await;
        Ok(affected)
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Process one message from the orchestrator topic.
    ///
    /// Liveness is judged on the message timestamp.
    pub async fn handle_message(&mut self, message: Message) {
        if !self.dedup.first_seen(message.id) {
            debug!(message_id = %message.id, "Duplicate message ignored");
            return;
        }
        let Message {
            id,
            sender,
            correlation_id,
            body,
            timestamp: now,
            ..
        } = message;
        let correlation = correlation_id.unwrap_or(id);

        match body {
            MessageBody::AgentReady(ready) => self.on_agent_ready(ready, correlation, now).await,
            MessageBody::StatusUpdate(update) => self.on_status(update, now).await,
            MessageBody::TaskCompleted(done) => self.on_completed(done, now).await,
            MessageBody::TaskFailed(failed) => self.on_failed(failed, now).await,
            MessageBody::TaskDeclined(declined) => self.on_declined(declined, now).await,
            MessageBody::AssistanceRequest(request) => {
                self.on_assistance_request(request, correlation, now).await
            }
            other => debug!(kind = %other.kind(), %sender, "Ignoring message"),
        }
        self.schedule().await;
    }

    async fn on_agent_ready(&mut self, ready: AgentReady, correlation: Uuid, now: DateTime<Utc>) {
        let id = ready.agent_id;
        // A restarted agent forgot whatever it held.
        for task_id in self.graph.held_by(&id) {
            if let Err(e) = self.graph.release(task_id) {
                debug!(%task_id, error = %e, "Release on re-registration failed");
            }
        }
        self.recruits.remove(&id);
        self.registry
            .register(id.clone(), ready.role, ready.capabilities, now);
        info!(agent_id = %id, role = %ready.role, "Agent registered");

        let ack = Message::from_orchestrator(
            Some(id.clone()),
            MessageBody::RegistrationAck(RegistrationAck { agent_id: id }),
        )
        .with_correlation(correlation);
        self.publish(&Topic::reply(correlation), ack, now).await;
    }

    async fn on_status(&mut self, update: StatusUpdate, now: DateTime<Utc>) {
        let id = update.agent_id;
        if !self.registry.heartbeat(&id, update.state, now) {
            if update.state != AgentState::ShuttingDown {
                warn!(agent_id = %id, "Status from an unknown agent, telling it to stop");
                self.send_shutdown(&id, "unknown agent", now).await;
            }
            return;
        }

        match update.state {
            AgentState::ShuttingDown => self.deregister(&id),
            AgentState::Executing => {
                let Some(task_id) = update.current_task else {
                    return;
                };
                let held = self.graph.get(task_id).is_some_and(|t| {
                    t.state == TaskState::Assigned && t.assigned_agent.as_ref() == Some(&id)
                });
                if held {
                    if let Err(e) = self.graph.mark_in_progress(task_id) {
                        debug!(%task_id, error = %e, "Cannot mark task in progress");
                    }
                }
            }
            AgentState::Idle => {
                let held_back = self
                    .registry
                    .get(&id)
                    .is_some_and(|r| r.state == AgentState::Assigned && r.current_task.is_none());
                if held_back {
                    self.registry.release(&id, now);
                }
            }
            _ => {}
        }
    }

    fn deregister(&mut self, id: &AgentId) {
        for task_id in self.graph.held_by(id) {
            if let Err(e) = self.graph.release(task_id) {
                debug!(%task_id, error = %e, "Release on shutdown failed");
            }
        }
        if self.registry.remove(id).is_some() {
            info!(agent_id = %id, "Agent left the pool");
        }
    }

    async fn on_completed(&mut self, done: TaskCompleted, now: DateTime<Utc>) {
        let Some(task) = self.graph.get(done.task_id).cloned() else {
            if self.archived.contains(&done.task_id) {
                debug!(task_id = %done.task_id, "Completion for an archived task ignored");
            } else {
                warn!(task_id = %done.task_id, "Completion for an unknown task");
            }
            self.release_if_holding(&done.agent_id, done.task_id, now);
            return;
        };
        self.release_if_holding(&done.agent_id, done.task_id, now);

        let artifact = Artifact::new(done.artifact.clone(), done.agent_id.clone())
            .with_duration(done.duration_ms)
            .degraded(done.degraded);
        match self.graph.mark_completed(done.task_id, artifact) {
            Ok(Completion::Applied { unlocked }) => {
                info!(
                    task_id = %done.task_id,
                    agent_id = %done.agent_id,
                    duration_ms = done.duration_ms,
                    unlocked = unlocked.len(),
                    "Task completed"
                );
            }
            Ok(Completion::Duplicate) => {
                debug!(task_id = %done.task_id, "Duplicate completion ignored");
                return;
            }
            Err(e) => {
                warn!(task_id = %done.task_id, error = %e, "Completion rejected");
                return;
            }
        }
        self.registry
            .record_completion(&done.agent_id, &task.capability, done.duration_ms);
        self.metrics
            .task_completed(&task.capability, done.duration_ms)
            .await;

        match task.origin {
            TaskOrigin::Decomposition => {
                let plan = parse_plan(&done.artifact);
                match self.install_plan(task.project_id, plan) {
                    Ok(count) => {
                        info!(project_id = %task.project_id, tasks = count, "Plan installed");
                        self.report_progress(task.project_id, format!("plan ready with {count} tasks"))
                            .await;
                    }
                    Err(e) => error!(project_id = %task.project_id, error = %e, "Plan could not be installed"),
                }
            }
            TaskOrigin::Assistance {
                requester,
                correlation_id,
                ..
            } => {
                info!(%requester, helper = %done.agent_id, "Assistance granted");
                let response = AssistanceResponse::granted(done.agent_id.clone(), done.artifact);
                self.answer_assistance(&requester, correlation_id, response, now)
                    .await;
                self.metrics.assistance(true).await;
            }
            TaskOrigin::Project => {
                if done.degraded {
                    self.mark_degraded(task.project_id);
                }
                self.report_progress(task.project_id, format!("task '{}' completed", task.title))
                    .await;
            }
        }
    }

    async fn on_failed(&mut self, failed: TaskFailed, now: DateTime<Utc>) {
        let Some(task) = self.graph.get(failed.task_id).cloned() else {
            warn!(task_id = %failed.task_id, "Failure for an unknown task");
            return;
        };
        if task.assigned_agent.as_ref() != Some(&failed.agent_id) {
            debug!(
                task_id = %failed.task_id,
                agent_id = %failed.agent_id,
                "Failure from an agent that no longer holds the task ignored"
            );
            self.release_if_holding(&failed.agent_id, failed.task_id, now);
            return;
        }
        if failed.terminated {
            self.registry.mark_retiring(&failed.agent_id);
        } else {
            self.registry.release(&failed.agent_id, now);
        }
        self.registry.record_failure(&failed.agent_id, &task.capability);
        self.fail_attempt(&task, &failed.reason, now).await;
    }

    /// Count one failed attempt of `task`.
    async fn fail_attempt(&mut self, task: &Task, reason: &str, now: DateTime<Utc>) {
        if let TaskOrigin::Assistance {
            requester,
            correlation_id,
            ..
        } = &task.origin
        {
            // Assistance is best effort and never retried.
            if let Err(e) = self.graph.mark_failed(task.id, reason) {
                debug!(task_id = %task.id, error = %e, "Cannot fail assistance task");
            }
            warn!(task_id = %task.id, %requester, %reason, "Assistance failed");
            self.answer_assistance(requester, *correlation_id, AssistanceResponse::denied(reason), now)
                .await;
            self.metrics.assistance(false).await;
            self.metrics.task_failed().await;
            return;
        }

        match self.graph.record_failure(task.id, reason, self.config.max_retries) {
            Ok(Failure::Requeued { retry_count }) => {
                warn!(task_id = %task.id, retry_count, %reason, "Task failed, requeued");
                self.metrics.task_retried().await;
            }
            Ok(Failure::Exhausted { blocked }) => {
                error!(task_id = %task.id, %reason, blocked = blocked.len(), "Task failed for good");
                self.metrics.task_failed().await;
                self.escalate(task, reason, blocked).await;
            }
            Ok(Failure::Ignored) => return,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Failure could not be recorded");
                return;
            }
        }
        self.report_progress(task.project_id, format!("task '{}' failed: {reason}", task.title))
            .await;
    }

    async fn escalate(&mut self, task: &Task, reason: &str, blocked: Vec<TaskId>) {
        self.mark_degraded(task.project_id);
        self.metrics.escalation().await;
        for dependent in &blocked {
            let error = CohortError::DependencyFailed {
                task_id: *dependent,
                dependency: task.id,
            };
            debug!(error = %error, "Task blocked");
        }
        let escalation = Escalation {
            task_id: task.id,
            project_id: task.project_id,
            reason: reason.to_string(),
            blocked,
        };
        let message = Message::from_orchestrator(None, MessageBody::Escalation(escalation));
        self.publish(&Topic::escalations(), message, Utc::now()).await;
    }

    async fn on_declined(&mut self, declined: TaskDeclined, now: DateTime<Utc>) {
        let agent = &declined.agent_id;
        let Some(task) = self.graph.get(declined.task_id).cloned() else {
            return;
        };
        if task.state.is_active() && task.assigned_agent.as_ref() == Some(agent) {
            if let Err(e) = self.graph.release(task.id) {
                debug!(task_id = %task.id, error = %e, "Release after decline failed");
            }
        }

        if declined.capability_mismatch {
            let error = CohortError::CapabilityMismatch {
                task_id: task.id,
                capability: task.capability.clone(),
            };
            warn!(agent_id = %agent, error = %error, "Agent declined a capability it advertised");
            self.registry.remove_capability(agent, &task.capability);
            self.registry.release(agent, now);
        } else {
            info!(agent_id = %agent, task_id = %task.id, reason = %declined.reason, "Assignment declined");
            // Busy: unavailable until the agent reports Idle.
            self.registry.hold(agent);
        }
    }

    async fn on_assistance_request(
        &mut self,
        request: AssistanceRequest,
        correlation: Uuid,
        now: DateTime<Utc>,
    ) {
        let AssistanceRequest {
            requester,
            capability,
            question,
            task_id,
        } = request;

        let recruitable = AgentRole::for_capability(&capability).is_some();
        if !recruitable && self.registry.serving(&capability) == 0 {
            info!(%requester, %capability, "Nobody can serve the requested capability");
            let response =
                AssistanceResponse::denied(format!("no agent serves capability '{capability}'"));
            self.answer_assistance(&requester, correlation, response, now)
                .await;
            self.metrics.assistance(false).await;
            return;
        }

        let project_id = task_id
            .and_then(|id| self.task(id))
            .map_or(Uuid::nil(), |t| t.project_id);
        let wait = chrono::Duration::from_std(self.config.assistance_wait())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let task = Task::new(
            project_id,
            format!("Assist {requester} with {capability}"),
            capability.clone(),
        )
        .with_description(question)
        .with_priority(Priority::LOWEST)
        .with_origin(TaskOrigin::Assistance {
            requester: requester.clone(),
            correlation_id: correlation,
            deadline: now + wait,
        });

        match self.graph.add_task(task) {
            Ok(id) => info!(task_id = %id, %requester, %capability, "Assistance queued"),
            Err(e) => {
                warn!(%requester, error = %e, "Assistance task rejected");
                self.answer_assistance(&requester, correlation, AssistanceResponse::denied(e.to_string()), now)
                    .await;
            }
        }
    }

    async fn answer_assistance(
        &mut self,
        requester: &AgentId,
        correlation_id: Uuid,
        response: AssistanceResponse,
        now: DateTime<Utc>,
    ) {
        let message = Message::from_orchestrator(
            Some(requester.clone()),
            MessageBody::AssistanceResponse(response),
        )
        .with_correlation(correlation_id);
        self.publish(&Topic::reply(correlation_id), message, now).await;
    }

    fn release_if_holding(&mut self, agent: &AgentId, task_id: TaskId, now: DateTime<Utc>) {
        let holding = self
            .registry
            .get(agent)
            .is_some_and(|r| r.current_task == Some(task_id));
        if holding {
            self.registry.release(agent, now);
        }
    }

    // ---------------------------------------------------------------
    // Assignment
    // ---------------------------------------------------------------

    /// Match every Ready task with the best idle agent; recruit where none fits.
    pub async fn schedule(&mut self) {
        if self.outage.is_some() {
            return;
        }
        let now = Utc::now();
        let ready: Vec<(TaskId, Capability, Option<AgentId>)> = self
            .graph
            .ready_tasks()
            .into_iter()
            .map(|t| (t.id, t.capability.clone(), requester_of(t)))
            .collect();

        for (task_id, capability, requester) in ready {
            match self.registry.select_for(&capability, requester.as_ref()) {
                Some(agent) => {
                    if let Err(e) = self.assign(task_id, &agent, now).await {
                        if e.is_channel_outage() {
                            self.enter_outage(now);
                            return;
                        }
                        warn!(%task_id, agent_id = %agent, error = %e, "Assignment failed");
                    }
                }
                None => self.recruit_for(&capability, requester.is_some(), now).await,
            }
        }
    }

    async fn assign(&mut self, task_id: TaskId, agent: &AgentId, now: DateTime<Utc>) -> CohortResult<()> {
        self.graph.mark_assigned(task_id, agent)?;
        if let Err(e) = self.registry.reserve(agent, task_id) {
            let _ = self.graph.release(task_id);
            return Err(e);
        }
        let assignment = match self.graph.get(task_id) {
            Some(task) => self.assignment_for(task),
            None => return Err(CohortError::NotFound(format!("task {task_id}"))),
        };
        let message = Message::from_orchestrator(
            Some(agent.clone()),
            MessageBody::TaskAssignment(assignment),
        );
        if let Err(e) = self.channel.send(message).await {
            let _ = self.graph.release(task_id);
            self.registry.release(agent, now);
            return Err(e);
        }
        info!(%task_id, agent_id = %agent, "Task assigned");
        Ok(())
    }

    fn assignment_for(&self, task: &Task) -> TaskAssignment {
        let context: Vec<String> = task
            .dependencies
            .iter()
            .filter_map(|id| self.task(*id))
            .filter_map(|dep| {
                dep.artifact
                    .as_ref()
                    .map(|a| format!("## {}\n{}", dep.title, a.content))
            })
            .collect();
        TaskAssignment {
            task_id: task.id,
            project_id: task.project_id,
            title: task.title.clone(),
            description: task.description.clone(),
            capability: task.capability.clone(),
            priority: task.priority,
            context: (!context.is_empty()).then(|| context.join("\n\n")),
            assistance_for: requester_of(task),
        }
    }

    /// Spawn an agent for `capability` when nobody serves it, or when help
    /// is waiting and nobody is idle.
    async fn recruit_for(&mut self, capability: &Capability, assistance: bool, now: DateTime<Utc>) {
        let Some(role) = AgentRole::for_capability(capability) else {
            return;
        };
        if self.recruits.values().any(|r| r.role == role) {
            return;
        }
        if !assistance && self.registry.serving(capability) > 0 {
            return;
        }
        let population = self.registry.population_by_role().values().sum::<usize>() + self.recruits.len();
        if population >= self.config.scaling.max_population {
            debug!(%capability, population, "Cannot recruit, pool at its ceiling");
            return;
        }
        info!(%capability, role = %role, "Recruiting agent");
        if let Err(e) = self.recruit(role, now).await {
            warn!(role = %role, error = %e, "Recruitment failed");
        }
    }

    async fn recruit(&mut self, role: AgentRole, now: DateTime<Utc>) -> CohortResult<AgentId> {
        let id = self.spawner.spawn(role).await?;
        self.recruits.insert(id.clone(), Recruit { role, since: now });
        self.metrics.agent_spawned().await;
        Ok(id)
    }

    async fn send_shutdown(&mut self, id: &AgentId, reason: &str, now: DateTime<Utc>) {
        let message = Message::from_orchestrator(
            Some(id.clone()),
            MessageBody::Shutdown(ShutdownNotice {
                reason: reason.to_string(),
            }),
        );
        if let Err(e) = self.channel.send(message).await {
            self.on_publish_error(e, now);
        }
    }

    async fn publish(&mut self, topic: &Topic, message: Message, now: DateTime<Utc>) {
        if let Err(e) = self.channel.publish(topic, message).await {
            self.on_publish_error(e, now);
        }
    }

    fn on_publish_error(&mut self, error: CohortError, now: DateTime<Utc>) {
        if error.is_channel_outage() {
            self.enter_outage(now);
        } else {
            warn!(error = %error, "Publish failed");
        }
    }

    fn enter_outage(&mut self, now: DateTime<Utc>) {
        if self.outage.is_none() {
            let delay = self.config.channel_backoff(0);
            warn!(delay_ms = delay.as_millis() as u64, "Channel unavailable, assignment paused");
            self.outage = Some(Outage {
                attempts: 0,
                retry_at: now + to_chrono(delay),
            });
        }
    }

    // ---------------------------------------------------------------
    // Periodic sweep
    // ---------------------------------------------------------------

    /// One health and scaling sweep at `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        if !self.check_channel(now).await {
            return;
        }
        self.evict_unresponsive(now).await;
        self.reclaim_orphans();
        self.expire_assistance(now).await;

        let recruit_timeout = to_chrono(self.health.timeout());
        self.recruits.retain(|id, recruit| {
            let waiting = now - recruit.since < recruit_timeout;
            if !waiting {
                warn!(agent_id = %id, "Recruited agent never registered");
            }
            waiting
        });

        self.scale(now).await;
        self.archive(now);
        self.save_snapshot().await;
        self.schedule().await;
    }

    /// Probe the channel. Returns false while it is unavailable.
    async fn check_channel(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(outage) = &self.outage {
            if now < outage.retry_at {
                return false;
            }
        }
        let report = HealthReport {
            population: self.registry.len(),
            idle: self.registry.idle_count(),
            backlog: self.graph.count_in(TaskState::Ready),
            unresponsive: self.health.unresponsive(&self.registry, now),
        };
        let probe = match self.channel.probe().await {
            Ok(()) => {
                let message = Message::from_orchestrator(None, MessageBody::HealthReport(report));
                self.channel.publish(&Topic::health(), message).await
            }
            Err(e) => Err(e),
        };

        match probe {
            Ok(()) => {
                if let Some(outage) = self.outage.take() {
                    info!(attempts = outage.attempts, "Channel recovered, resuming assignment");
                    // Heartbeats could not arrive during the outage.
                    self.registry.touch_all(now);
                }
                true
            }
            Err(e) => {
                let attempts = self.outage.as_ref().map_or(0, |o| o.attempts + 1);
                let delay = self.config.channel_backoff(attempts);
                warn!(
                    error = %e,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Channel unavailable, assignment paused"
                );
                self.outage = Some(Outage {
                    attempts,
                    retry_at: now + to_chrono(delay),
                });
                false
            }
        }
    }

    async fn evict_unresponsive(&mut self, now: DateTime<Utc>) {
        for id in self.health.unresponsive(&self.registry, now) {
            let error = CohortError::AgentUnresponsive(id.clone());
            warn!(error = %error, "Evicting agent");
            let held = self.graph.held_by(&id);
            self.registry.remove(&id);
            self.metrics.agent_evicted().await;
            for task_id in held {
                if let Some(task) = self.graph.get(task_id).cloned() {
                    self.fail_attempt(&task, "agent unresponsive", now).await;
                }
            }
            self.send_shutdown(&id, "evicted after missed heartbeats", now)
                .await;
            self.retire_in_background(id);
        }
    }

    /// Ask the spawner to stop an agent without holding up the loop.
    fn retire_in_background(&self, id: AgentId) {
        let spawner = self.spawner.clone();
        tokio::spawn(async move {
            if let Err(e) = spawner.retire(&id).await {
                warn!(agent_id = %id, error = %e, "Retire failed");
            }
        });
    }

    /// Held tasks whose agent is no longer registered go back to Ready.
    fn reclaim_orphans(&mut self) {
        let orphans: Vec<TaskId> = self
            .graph
            .all_tasks()
            .into_iter()
            .filter(|t| t.state.is_active())
            .filter(|t| {
                t.assigned_agent
                    .as_ref()
                    .map_or(true, |agent| !self.registry.contains(agent))
            })
            .map(|t| t.id)
            .collect();
        for task_id in orphans {
            warn!(%task_id, "Reclaiming orphaned task");
            if let Err(e) = self.graph.release(task_id) {
                debug!(%task_id, error = %e, "Orphan release failed");
            }
        }
    }

    async fn expire_assistance(&mut self, now: DateTime<Utc>) {
        let expired: Vec<Task> = self
            .graph
            .ready_tasks()
            .into_iter()
            .filter(|t| matches!(&t.origin, TaskOrigin::Assistance { deadline, .. } if *deadline <= now))
            .cloned()
            .collect();
        for task in expired {
            self.fail_attempt(&task, "no helper available in time", now)
                .await;
        }
    }

    async fn scale(&mut self, now: DateTime<Utc>) {
        let mut backlog: BTreeMap<Capability, usize> = BTreeMap::new();
        for task in self.graph.ready_tasks() {
            *backlog.entry(task.capability.clone()).or_insert(0) += 1;
        }
        let decisions = self
            .scaler
            .evaluate(&backlog, &self.registry, self.recruits.len(), now);
        for decision in decisions {
            match decision {
                ScalingDecision::Spawn(role) => {
                    info!(role = %role, "Scaling up");
                    if let Err(e) = self.recruit(role, now).await {
                        warn!(role = %role, error = %e, "Scale-up spawn failed");
                    }
                }
                ScalingDecision::Retire(id) => {
                    info!(agent_id = %id, "Scaling down idle agent");
                    self.registry.mark_retiring(&id);
                    self.metrics.agent_retired().await;
                    self.send_shutdown(&id, "scaled down", now).await;
                    self.retire_in_background(id);
                }
            }
        }
        self.metrics
            .set_population(self.registry.population_by_role())
            .await;
        self.metrics
            .set_agent_durations(self.registry.average_durations())
            .await;
    }

    /// Drop finished assistance, and the tasks of projects completed more
    /// than `archive_after_ms` ago. Only their ids are remembered, in a
    /// bounded window.
    fn archive(&mut self, now: DateTime<Utc>) {
        let retention = chrono::Duration::milliseconds(
            i64::try_from(self.config.archive_after_ms).unwrap_or(i64::MAX),
        );
        let completed: Vec<ProjectId> = self
            .projects
            .values()
            .filter(|p| p.state == ProjectState::Completed)
            .filter(|p| p.completed_at.map_or(true, |at| now.signed_duration_since(at) >= retention))
            .map(|p| p.id)
            .collect();
        let archived = self
            .graph
            .archive_terminal_where(|t| t.is_assistance() || completed.contains(&t.project_id));
        if !archived.is_empty() {
            debug!(count = archived.len(), "Archived finished tasks");
        }
        for task in archived {
            self.archived.first_seen(task.id);
        }
    }

    // ---------------------------------------------------------------
    // Status and persistence
    // ---------------------------------------------------------------

    fn all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.graph.all_tasks().into_iter().cloned().collect();
        tasks.sort_by_key(|t| (t.created_at, t.seq));
        tasks
    }

    /// Status of the whole pool as of now.
    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            agents: self.registry.agents().cloned().collect(),
            tasks: self.all_tasks(),
            projects: self
                .projects
                .keys()
                .filter_map(|id| self.progress_of(*id, ""))
                .collect(),
            metrics: self.metrics.snapshot().await,
            channel_paused: self.outage.is_some(),
        }
    }

    async fn publish_status(&self) {
        let status = self.status().await;
        self.status_tx.send_replace(status);
    }

    /// Everything needed to restore this orchestrator.
    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            taken_at: Utc::now(),
            agents: self.registry.agents().cloned().collect(),
            tasks: self.all_tasks(),
            projects: self.projects.values().cloned().collect(),
            metrics: self.metrics.snapshot().await,
        }
    }

    async fn save_snapshot(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.snapshot().await;
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "Snapshot could not be saved");
        }
    }

    async fn shutdown(&mut self) {
        info!("Orchestrator shutting down");
        let notice = Message::from_orchestrator(
            None,
            MessageBody::Shutdown(ShutdownNotice {
                reason: "orchestrator shutdown".into(),
            }),
        );
        if let Err(e) = self.channel.publish(&Topic::broadcast(), notice).await {
            debug!(error = %e, "Shutdown broadcast failed");
        }
        self.spawner.shutdown_all().await;
        self.save_snapshot().await;
    }
}

fn requester_of(task: &Task) -> Option<AgentId> {
    match &task.origin {
        TaskOrigin::Assistance { requester, .. } => Some(requester.clone()),
        _ => None,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(1))
}

fn stopped() -> CohortError {
    CohortError::Orchestrator("orchestrator is not running".into())
}

/// Cloneable front end to a running [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<OrchestratorStatus>,
    metrics: MetricsRecorder,
    channel: Arc<dyn MessageChannel>,
}

impl OrchestratorHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> CohortResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Submit requirements; a planner decomposes them.
    pub async fn submit_project(&self, requirements: impl Into<String>) -> CohortResult<ProjectId> {
        let requirements = requirements.into();
        self.call(move |reply| Command::SubmitProject {
            requirements,
            reply,
        })
        .await
    }

    /// Submit requirements with an already decomposed plan.
    pub async fn submit_plan(
        &self,
        requirements: impl Into<String>,
        plan: Plan,
    ) -> CohortResult<ProjectId> {
        let requirements = requirements.into();
        self.call(move |reply| Command::SubmitPlan {
            requirements,
            plan,
            reply,
        })
        .await?
    }

    /// A fresh status computed by the loop.
    pub async fn status(&self) -> CohortResult<OrchestratorStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// The status published after the most recent event.
    pub fn watch_status(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.clone()
    }

    /// Start an agent of `role` now.
    pub async fn spawn_agent(&self, role: AgentRole) -> CohortResult<AgentId> {
        self.call(move |reply| Command::SpawnAgent { role, reply })
            .await?
    }

    /// Settle an escalated task. Returns the tasks that changed state.
    pub async fn resolve_escalation(
        &self,
        task_id: TaskId,
        resolution: Resolution,
    ) -> CohortResult<Vec<TaskId>> {
        self.call(move |reply| Command::ResolveEscalation {
            task_id,
            resolution,
            reply,
        })
        .await?
    }

    /// A snapshot taken by the loop.
    pub async fn snapshot(&self) -> CohortResult<OrchestratorSnapshot> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Metrics, readable without a round trip to the loop.
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Progress reports published from now on.
    pub async fn subscribe_progress(&self) -> CohortResult<Subscription> {
        self.channel.subscribe(&Topic::progress()).await
    }

    /// Escalations published from now on.
    pub async fn subscribe_escalations(&self) -> CohortResult<Subscription> {
        self.channel.subscribe(&Topic::escalations()).await
    }

    /// Wait until a project completes or fails.
    pub async fn wait_for_project(
        &self,
        project_id: ProjectId,
        timeout: Duration,
    ) -> CohortResult<ProgressReport> {
        let mut status = self.status.clone();
        let wait = async move {
            loop {
                let finished = status
                    .borrow_and_update()
                    .project(project_id)
                    .filter(|p| p.state.is_finished())
                    .cloned();
                if let Some(report) = finished {
                    return Ok(report);
                }
                if status.changed().await.is_err() {
                    return Err(stopped());
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            CohortError::Timeout(format!(
                "project {project_id} not finished within {}ms",
                timeout.as_millis()
            ))
        })?
    }

    /// Stop the loop and every agent it started.
    pub async fn shutdown(&self) -> CohortResult<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::planner::PlannedTask;
    use async_trait::async_trait;
    use cohort_channel::InMemoryChannel;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NullSpawner {
        spawned: Mutex<Vec<AgentRole>>,
    }

    #[async_trait]
    impl AgentSpawner for NullSpawner {
        async fn spawn(&self, role: AgentRole) -> CohortResult<AgentId> {
            let mut spawned = self.spawned.lock();
            spawned.push(role);
            Ok(AgentId::new(format!("{}-{:03}", role.as_str(), spawned.len())))
        }

        async fn retire(&self, _id: &AgentId) -> CohortResult<()> {
            Ok(())
        }

        async fn shutdown_all(&self) {}
    }

    fn orchestrator() -> (Orchestrator, Arc<NullSpawner>) {
        let spawner = Arc::new(NullSpawner::default());
        let config = OrchestratorConfig {
            initial_agents: Vec::new(),
            ..OrchestratorConfig::default()
        };
        let channel: Arc<dyn MessageChannel> = Arc::new(InMemoryChannel::default());
        (Orchestrator::new(config, channel, spawner.clone()), spawner)
    }

    #[tokio::test]
    async fn test_project_submission_recruits_a_planner() {
        let (mut orch, spawner) = orchestrator();
        let project_id = orch.submit_project("Build a todo app").await;

        let project = orch.project(project_id).unwrap();
        assert_eq!(project.state, ProjectState::Planning);
        let planning = orch.graph().get(project.planning_task.unwrap()).unwrap();
        assert_eq!(planning.state, TaskState::Ready);
        assert_eq!(planning.capability, Capability::from("planner"));
        assert_eq!(*spawner.spawned.lock(), vec![AgentRole::Planner]);

        // A second project does not recruit a second planner while one is pending.
        orch.submit_project("Another").await;
        assert_eq!(spawner.spawned.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let (mut orch, _) = orchestrator();
        let err = orch.submit_plan("nothing", Plan::default()).await.unwrap_err();
        assert!(matches!(err, CohortError::Plan(_)));
    }

    #[tokio::test]
    async fn test_progress_counts_and_sprints() {
        let (mut orch, _) = orchestrator();
        let plan = Plan::new(vec![
            PlannedTask::new("A", AgentRole::Implementer),
            PlannedTask::new("B", AgentRole::Validator).depends_on(vec![0]),
        ]);
        let project_id = orch.submit_plan("two steps", plan).await.unwrap();
        let project = orch.project(project_id).unwrap().clone();
        assert_eq!(project.sprints.len(), 2);

        let report = orch.progress_of(project_id, "").unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.state, ProjectState::InProgress);
        assert_eq!(report.current_sprint, Some(1));
        assert_eq!(report.sprint_completed, None);
    }

    #[tokio::test]
    async fn test_status_reflects_projects() {
        let (mut orch, _) = orchestrator();
        let project_id = orch.submit_project("Status").await;
        let status = orch.status().await;
        assert_eq!(status.project(project_id).unwrap().state, ProjectState::Planning);
        assert_eq!(status.tasks.len(), 1);
        assert!(!status.channel_paused);
    }
}
