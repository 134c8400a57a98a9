//! Coordination core of the Cohort agent pool.
//!
//! The [`Orchestrator`] turns project requirements into a dependency graph of
//! tasks, matches Ready tasks with idle agents by capability, watches agent
//! heartbeats, retries and escalates failures, brokers assistance between
//! agents and scales the pool with the backlog. All of its state is owned by
//! one task and mutated in response to commands, channel messages and timer
//! ticks.
//!
//! # Main types
//!
//! - [`Orchestrator`] / [`OrchestratorHandle`]: the event loop and its front end.
//! - [`TaskGraph`]: tasks, dependencies and the task state machine.
//! - [`AgentRegistry`]: known agents, availability and per-capability stats.
//! - [`AutoScaler`]: debounced spawn and retire decisions.
//! - [`AgentSpawner`] / [`LocalSpawner`]: how new agents come into being.
//! - [`FileSnapshotStore`]: optional persistence of the orchestrator state.

/// Orchestrator settings.
pub mod config;
/// The event loop.
pub mod engine;
/// Heartbeat checks and pool metrics.
pub mod monitor;
/// Plan parsing and materialisation.
pub mod planner;
/// Agent registry and assignment choice.
pub mod registry;
/// Backlog-driven auto-scaling.
pub mod scaling;
/// State snapshots.
pub mod snapshot;
/// Agent creation.
pub mod spawner;
/// Task dependency graph.
pub mod task_graph;
/// Tasks, artifacts and projects.
pub mod types;

pub use config::OrchestratorConfig;
pub use engine::{Orchestrator, OrchestratorHandle, OrchestratorStatus, Resolution};
pub use monitor::{HealthMonitor, LatencyStats, MetricsRecorder, PoolMetrics};
pub use planner::{parse_plan, Plan, PlannedTask};
pub use registry::{AgentRecord, AgentRegistry, CapabilityStats};
pub use scaling::{AutoScaler, ScalingConfig, ScalingDecision};
pub use snapshot::{FileSnapshotStore, OrchestratorSnapshot, SnapshotStore};
pub use spawner::{AgentSpawner, LocalSpawner};
pub use task_graph::{Completion, Failure, TaskGraph};
pub use types::{Artifact, Project, Task, TaskOrigin, TaskState};
