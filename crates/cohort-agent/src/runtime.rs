use crate::config::RuntimeConfig;
use crate::inference::CompletionRequest;
use crate::retry::RetryingInference;
use crate::roles::{parse_assistance_need, strip_assistance_markers, AgentProfile, AssistanceNeed};
use cohort_channel::{Deduplicator, MessageChannel, Subscription, Topic};
use cohort_core::{
    AgentId, AgentReady, AgentRole, AgentState, AssistanceRequest, Capability, CohortError,
    CohortResult, Message, MessageBody, MessageKind, StatusUpdate, TaskAssignment, TaskCompleted,
    TaskDeclined, TaskFailed, TaskId,
};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Failure reason reported for a task whose agent was shut down.
pub const TERMINATED_REASON: &str = "agent terminated";

enum Outcome {
    Completed {
        artifact: String,
        degraded: bool,
        duration_ms: u64,
    },
    Failed(String),
    Cancelled,
}

type Execution = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// Owns the agent's observable state and publishes every change of it.
#[derive(Clone)]
struct Reporter {
    id: AgentId,
    role: AgentRole,
    capabilities: Vec<Capability>,
    channel: Arc<dyn MessageChannel>,
    state: Arc<watch::Sender<AgentState>>,
    current_task: Arc<Mutex<Option<TaskId>>>,
}

impl Reporter {
    fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    fn current_task(&self) -> Option<TaskId> {
        *self.current_task.lock()
    }

    fn set_current_task(&self, task: Option<TaskId>) {
        *self.current_task.lock() = task;
    }

    /// Apply a lifecycle edge and publish it. Illegal edges are refused.
    async fn transition(&self, next: AgentState) -> bool {
        let current = self.state();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Illegal state transition refused");
            return false;
        }
        self.state.send_replace(next);
        debug!(from = %current, to = %next, "State change");
        self.publish_status().await;
        true
    }

    async fn publish_status(&self) {
        let update = StatusUpdate {
            agent_id: self.id.clone(),
            role: self.role,
            state: self.state(),
            current_task: self.current_task(),
            capabilities: self.capabilities.clone(),
        };
        self.report(MessageBody::StatusUpdate(update)).await;
    }

    async fn report(&self, body: MessageBody) {
        let kind = body.kind();
        let message = Message::to_orchestrator(self.id.clone(), body);
        if let Err(e) = self.channel.send(message).await {
            warn!(%kind, error = %e, "Failed to publish to orchestrator");
        }
    }
}

/// The work of one task: inference, an optional assistance round, and the
/// follow-up inference. Runs as a future polled by the runtime loop.
struct Executor {
    reporter: Reporter,
    profile: AgentProfile,
    inference: Arc<RetryingInference>,
    assistance_timeout: Duration,
    cancel: CancellationToken,
}

impl Executor {
    async fn run(self, assignment: TaskAssignment) -> Outcome {
        let started = Instant::now();
        self.reporter.transition(AgentState::Executing).await;

        let first = match self.infer(self.profile.build_request(&assignment)).await {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };

        // Helpers answer directly; they never ask for help themselves.
        let need = match assignment.assistance_for {
            Some(_) => None,
            None => parse_assistance_need(&first),
        };
        let Some(need) = need else {
            return Outcome::Completed {
                artifact: first,
                degraded: false,
                duration_ms: elapsed_ms(started),
            };
        };

        self.reporter.transition(AgentState::AwaitingAssistance).await;
        let help = self.request_assistance(&assignment, need).await;
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        self.reporter.transition(AgentState::Executing).await;

        let degraded = help.is_none();
        match self
            .infer(self.profile.build_follow_up(&assignment, help.as_deref()))
            .await
        {
            Ok(text) => Outcome::Completed {
                artifact: strip_assistance_markers(&text),
                degraded,
                duration_ms: elapsed_ms(started),
            },
            Err(outcome) => outcome,
        }
    }

    async fn infer(&self, request: CompletionRequest) -> Result<String, Outcome> {
        match self
            .inference
            .complete(&request, &self.profile.model, &self.cancel)
            .await
        {
            Ok(text) => Ok(text),
            Err(CohortError::Cancelled(_)) => Err(Outcome::Cancelled),
            Err(e) => {
                warn!(error = %e, "Inference failed");
                Err(Outcome::Failed(e.to_string()))
            }
        }
    }

    /// Ask the orchestrator for help. `None` means denied or timed out.
    async fn request_assistance(
        &self,
        assignment: &TaskAssignment,
        need: AssistanceNeed,
    ) -> Option<String> {
        info!(capability = %need.capability, "Requesting assistance");
        let request = Message::to_orchestrator(
            self.reporter.id.clone(),
            MessageBody::AssistanceRequest(AssistanceRequest {
                requester: self.reporter.id.clone(),
                capability: need.capability,
                question: need.question,
                task_id: Some(assignment.task_id),
            }),
        );

        let topic = Topic::orchestrator();
        let reply = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            r = self.reporter.channel.request(&topic, request, self.assistance_timeout) => r,
        };

        match reply {
            Ok(Message {
                body: MessageBody::AssistanceResponse(response),
                ..
            }) => {
                if response.granted {
                    info!(helper = ?response.helper, "Assistance granted");
                    response.answer
                } else {
                    info!(reason = ?response.reason, "Assistance denied, continuing degraded");
                    None
                }
            }
            Ok(other) => {
                warn!(kind = %other.kind(), "Unexpected reply to assistance request");
                None
            }
            Err(e) => {
                warn!(error = %e, "No assistance received, continuing degraded");
                None
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn poll_execution(execution: &mut Option<Execution>) -> Outcome {
    match execution.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn heartbeat_loop(reporter: Reporter, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; registration already reported.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => reporter.publish_status().await,
        }
    }
}

/// A worker agent: registers with the orchestrator, then serves task
/// assignments one at a time until cancelled or told to shut down.
pub struct AgentRuntime {
    id: AgentId,
    profile: AgentProfile,
    channel: Arc<dyn MessageChannel>,
    inference: Arc<RetryingInference>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    /// A runtime for agent `id`. Nothing runs until it is spawned.
    pub fn new(
        id: AgentId,
        profile: AgentProfile,
        channel: Arc<dyn MessageChannel>,
        inference: Arc<RetryingInference>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            id,
            profile,
            channel,
            inference,
            config,
        }
    }

    /// The agent's id.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Start the agent on its own tokio task.
    pub fn spawn(self) -> AgentHandle {
        self.spawn_with_token(CancellationToken::new())
    }

    /// Start the agent, stopping it when `cancel` fires.
    pub fn spawn_with_token(self, cancel: CancellationToken) -> AgentHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Registering);
        let id = self.id.clone();
        let role = self.profile.role;
        let span = info_span!("agent", agent_id = %id, role = %role);
        let join = tokio::spawn(self.run(cancel.clone(), Arc::new(state_tx)).instrument(span));
        AgentHandle {
            id,
            role,
            cancel,
            state: state_rx,
            join,
        }
    }

    async fn open_inbox(&self) -> CohortResult<Subscription> {
        let inbox = self.channel.subscribe(&Topic::inbox(&self.id)).await?;
        let broadcast = self.channel.subscribe(&Topic::broadcast()).await?;
        Ok(inbox.merge(broadcast))
    }

    /// Advertise capabilities until acknowledged. Bounded attempts.
    async fn register(&self, cancel: &CancellationToken) -> bool {
        let attempts = self.config.registration_attempts.max(1);
        for attempt in 1..=attempts {
            let ready = Message::to_orchestrator(
                self.id.clone(),
                MessageBody::AgentReady(AgentReady {
                    agent_id: self.id.clone(),
                    role: self.profile.role,
                    capabilities: self.profile.capabilities.clone(),
                }),
            );
            let topic = Topic::orchestrator();
            let reply = tokio::select! {
                _ = cancel.cancelled() => return false,
                r = self.channel.request(&topic, ready, self.config.registration_timeout()) => r,
            };

            match reply {
                Ok(message) if message.kind() == MessageKind::RegistrationAck => return true,
                Ok(message) => {
                    warn!(attempt, kind = %message.kind(), "Unexpected registration reply");
                }
                Err(CohortError::Timeout(_)) => {
                    warn!(attempt, "Registration not acknowledged in time");
                    continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Registration attempt failed");
                }
            }

            // Immediate failures (transport down) back off before retrying.
            let delay = Duration::from_millis(200u64.saturating_mul(1 << attempt.min(8)));
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        false
    }

    async fn decline(&self, task_id: TaskId, reason: String, capability_mismatch: bool, reporter: &Reporter) {
        reporter
            .report(MessageBody::TaskDeclined(TaskDeclined {
                task_id,
                agent_id: self.id.clone(),
                reason,
                capability_mismatch,
            }))
            .await;
    }

    /// Accept an assignment and build its execution, or decline it.
    async fn accept(
        &self,
        reporter: &Reporter,
        assignment: TaskAssignment,
        busy: bool,
        cancel: &CancellationToken,
    ) -> Option<Execution> {
        let task_id = assignment.task_id;
        if busy || reporter.state() != AgentState::Idle {
            info!(%task_id, state = %reporter.state(), "Declining assignment while busy");
            self.decline(task_id, "agent busy".into(), false, reporter).await;
            return None;
        }
        if !self.profile.serves(&assignment.capability) {
            warn!(%task_id, capability = %assignment.capability, "Assignment outside capability set");
            self.decline(
                task_id,
                format!("capability '{}' not served", assignment.capability),
                true,
                reporter,
            )
            .await;
            return None;
        }

        reporter.set_current_task(Some(task_id));
        reporter.transition(AgentState::Assigned).await;
        info!(%task_id, title = %assignment.title, "Task accepted");

        let executor = Executor {
            reporter: reporter.clone(),
            profile: self.profile.clone(),
            inference: self.inference.clone(),
            assistance_timeout: self.config.assistance_timeout(),
            cancel: cancel.clone(),
        };
        Some(Box::pin(
            executor
                .run(assignment)
                .instrument(info_span!("task", %task_id)),
        ))
    }

    /// Publish the outcome of a finished execution and return to Idle.
    async fn finish(&self, reporter: &Reporter, outcome: Outcome) {
        let Some(task_id) = reporter.current_task() else {
            return;
        };
        match outcome {
            Outcome::Completed {
                artifact,
                degraded,
                duration_ms,
            } => {
                reporter.transition(AgentState::Reporting).await;
                reporter
                    .report(MessageBody::TaskCompleted(TaskCompleted {
                        task_id,
                        agent_id: self.id.clone(),
                        artifact,
                        duration_ms,
                        degraded,
                    }))
                    .await;
                info!(%task_id, duration_ms, degraded, "Task completed");
            }
            Outcome::Failed(reason) => {
                reporter.transition(AgentState::Reporting).await;
                warn!(%task_id, %reason, "Task failed");
                reporter
                    .report(MessageBody::TaskFailed(TaskFailed {
                        task_id,
                        agent_id: self.id.clone(),
                        reason,
                        terminated: false,
                    }))
                    .await;
            }
            // Shutdown reports the in-flight task.
            Outcome::Cancelled => return,
        }
        reporter.set_current_task(None);
        reporter.transition(AgentState::Idle).await;
    }

    async fn run(self, cancel: CancellationToken, state: Arc<watch::Sender<AgentState>>) {
        let reporter = Reporter {
            id: self.id.clone(),
            role: self.profile.role,
            capabilities: self.profile.capabilities.clone(),
            channel: self.channel.clone(),
            state,
            current_task: Arc::new(Mutex::new(None)),
        };

        let mut inbox = match self.open_inbox().await {
            Ok(sub) => sub,
            Err(e) => {
                error!(error = %e, "Cannot subscribe to inbox");
                reporter.state.send_replace(AgentState::ShuttingDown);
                return;
            }
        };

        if !self.register(&cancel).await {
            warn!("Registration failed, shutting down");
            reporter.state.send_replace(AgentState::ShuttingDown);
            return;
        }
        reporter.transition(AgentState::Idle).await;
        info!(capabilities = ?self.profile.capabilities, "Agent registered");

        let heartbeat_cancel = cancel.child_token();
        let heartbeat = tokio::spawn(
            heartbeat_loop(
                reporter.clone(),
                self.config.heartbeat_interval(),
                heartbeat_cancel.clone(),
            )
            .in_current_span(),
        );

        let mut dedup = Deduplicator::new(self.config.dedup_window);
        let mut execution: Option<Execution> = None;
        let mut stop_reason = String::from("cancelled");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = poll_execution(&mut execution) => {
                    execution = None;
                    self.finish(&reporter, outcome).await;
                }
                next = inbox.recv() => {
                    let Some(message) = next else {
                        warn!("Inbox closed");
                        stop_reason = "inbox closed".into();
                        break;
                    };
                    if !dedup.first_seen(message.id) {
                        debug!(message_id = %message.id, "Duplicate message ignored");
                        continue;
                    }
                    match message.body {
                        MessageBody::TaskAssignment(assignment) => {
                            let busy = execution.is_some();
                            if let Some(next) = self.accept(&reporter, assignment, busy, &cancel).await {
                                execution = Some(next);
                            }
                        }
                        MessageBody::Shutdown(notice) => {
                            info!(reason = %notice.reason, "Shutdown requested");
                            stop_reason = notice.reason;
                            break;
                        }
                        other => debug!(kind = %other.kind(), "Ignoring message"),
                    }
                }
            }
        }

        // Dropping the execution drops any pending inference or assistance wait.
        drop(execution);
        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat.await {
            debug!(error = %e, "Heartbeat task ended abnormally");
        }

        if let Some(task_id) = reporter.current_task() {
            warn!(%task_id, "Releasing in-flight task");
            reporter
                .report(MessageBody::TaskFailed(TaskFailed {
                    task_id,
                    agent_id: self.id.clone(),
                    reason: TERMINATED_REASON.into(),
                    terminated: true,
                }))
                .await;
        }
        reporter.transition(AgentState::ShuttingDown).await;
        info!(reason = %stop_reason, "Agent stopped");
    }
}

/// Handle to a running agent.
pub struct AgentHandle {
    id: AgentId,
    role: AgentRole,
    cancel: CancellationToken,
    state: watch::Receiver<AgentState>,
    join: JoinHandle<()>,
}

impl AgentHandle {
    /// The agent's id.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// The agent's role.
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Last state the agent published.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Follow the agent's state changes.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Request termination. Returns immediately.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether the agent task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the agent task to end.
    pub async fn join(self) -> CohortResult<()> {
        self.join
            .await
            .map_err(|e| CohortError::Cancelled(format!("agent task aborted: {e}")))
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
