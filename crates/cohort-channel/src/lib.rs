//! Message channel for the Cohort agent pool.
//!
//! Provides the [`MessageChannel`] abstraction (publish/subscribe,
//! point-to-point delivery, request/response with correlation ids and a
//! bounded per-topic history) and an in-process implementation,
//! [`InMemoryChannel`], used by the orchestrator, the agents and the tests.

/// The channel trait and subscription stream.
pub mod channel;
/// Bounded duplicate-id filter for idempotent consumers.
pub mod dedup;
/// In-process broadcast-backed implementation.
pub mod memory;
/// Topic names and routing.
pub mod topic;

pub use channel::{MessageChannel, Subscription};
pub use dedup::Deduplicator;
pub use memory::{ChannelConfig, InMemoryChannel};
pub use topic::Topic;
