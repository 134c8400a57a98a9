use crate::channel::{MessageChannel, Subscription};
use crate::topic::Topic;
use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult, Message};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Sizing of the in-memory channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Per-topic buffer of undelivered messages before slow subscribers lag.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Messages retained per topic for replay and audit.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Retained messages replayed to a new subscriber by default.
    #[serde(default)]
    pub replay: usize,
}

fn default_capacity() -> usize {
    256
}

fn default_history_limit() -> usize {
    100
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            history_limit: default_history_limit(),
            replay: 0,
        }
    }
}

struct TopicState {
    sender: broadcast::Sender<Message>,
    history: VecDeque<Message>,
}

impl TopicState {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            history: VecDeque::new(),
        }
    }
}

/// In-process [`MessageChannel`] backed by one broadcast channel and one
/// bounded history ring per topic.
pub struct InMemoryChannel {
    config: ChannelConfig,
    topics: Mutex<HashMap<Topic, TopicState>>,
    available: AtomicBool,
}

impl InMemoryChannel {
    /// An empty channel with no topics yet.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            topics: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a transport outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether publishing currently succeeds.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of topics currently tracked.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    fn ensure_available(&self) -> CohortResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CohortError::ChannelUnavailable(
                "in-memory transport is offline".into(),
            ))
        }
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, topic: &Topic, message: Message) -> CohortResult<()> {
        self.ensure_available()?;

        let mut topics = self.topics.lock();
        if topic.is_ephemeral() {
            // Nobody is waiting for this reply any more.
            let Some(state) = topics.get(topic) else {
                debug!(topic = %topic, "Dropping reply without a waiting requester");
                return Ok(());
            };
            let _ = state.sender.send(message);
            if state.sender.receiver_count() == 0 {
                topics.remove(topic);
            }
            return Ok(());
        }

        let state = topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(self.config.capacity));
        state.history.push_back(message.clone());
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        // No active subscriber is fine: the message stays in history.
        let _ = state.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> CohortResult<Subscription> {
        self.subscribe_with_replay(topic, self.config.replay).await
    }

    async fn subscribe_with_replay(
        &self,
        topic: &Topic,
        replay: usize,
    ) -> CohortResult<Subscription> {
        self.ensure_available()?;

        let (backlog, receiver) = {
            let mut topics = self.topics.lock();
            if topic.is_ephemeral() {
                topics.retain(|t, s| !t.is_ephemeral() || s.sender.receiver_count() > 0);
            }
            let state = topics
                .entry(topic.clone())
                .or_insert_with(|| TopicState::new(self.config.capacity));
            // Snapshot and live receiver under one lock: no gap, no overlap.
            let skip = state.history.len().saturating_sub(replay);
            let backlog: Vec<Message> = state.history.iter().skip(skip).cloned().collect();
            (backlog, state.sender.subscribe())
        };

        let topic_name = topic.clone();
        let live = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(topic = %topic_name, skipped, "Subscriber lagged, messages dropped");
                None
            }
        });

        Ok(Subscription::new(
            topic.clone(),
            tokio_stream::iter(backlog).chain(live),
        ))
    }

    async fn history(&self, topic: &Topic, limit: usize) -> Vec<Message> {
        let topics = self.topics.lock();
        topics
            .get(topic)
            .map(|state| {
                let skip = state.history.len().saturating_sub(limit);
                state.history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    async fn probe(&self) -> CohortResult<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_core::{AgentId, MessageBody, ShutdownNotice};
    use std::time::Duration;

    fn note(reason: &str) -> Message {
        Message::from_orchestrator(
            None,
            MessageBody::Shutdown(ShutdownNotice {
                reason: reason.into(),
            }),
        )
    }

    fn reason(message: &Message) -> String {
        match &message.body {
            MessageBody::Shutdown(n) => n.reason.clone(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_then_subscribe_sees_only_new_messages() {
        let channel = InMemoryChannel::default();
        let topic = Topic::broadcast();
        channel.publish(&topic, note("before")).await.unwrap();

        let mut sub = channel.subscribe(&topic).await.unwrap();
        channel.publish(&topic, note("after")).await.unwrap();

        let got = sub.recv().await.unwrap();
        assert_eq!(reason(&got), "after");
    }

    #[tokio::test]
    async fn test_backlog_replay() {
        let channel = InMemoryChannel::default();
        let topic = Topic::progress();
        for i in 0..5 {
            channel.publish(&topic, note(&format!("m{i}"))).await.unwrap();
        }

        let mut sub = channel.subscribe_with_replay(&topic, 2).await.unwrap();
        channel.publish(&topic, note("live")).await.unwrap();

        assert_eq!(reason(&sub.recv().await.unwrap()), "m3");
        assert_eq!(reason(&sub.recv().await.unwrap()), "m4");
        assert_eq!(reason(&sub.recv().await.unwrap()), "live");
    }

    #[tokio::test]
    async fn test_fifo_per_topic() {
        let channel = InMemoryChannel::default();
        let topic = Topic::new("work");
        let mut sub = channel.subscribe(&topic).await.unwrap();
        for i in 0..20 {
            channel.publish(&topic, note(&i.to_string())).await.unwrap();
        }
        for i in 0..20 {
            assert_eq!(reason(&sub.recv().await.unwrap()), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let channel = InMemoryChannel::new(ChannelConfig {
            history_limit: 3,
            ..ChannelConfig::default()
        });
        let topic = Topic::escalations();
        for i in 0..10 {
            channel.publish(&topic, note(&i.to_string())).await.unwrap();
        }
        let history = channel.history(&topic, 100).await;
        let reasons: Vec<String> = history.iter().map(reason).collect();
        assert_eq!(reasons, vec!["7", "8", "9"]);

        let last_two = channel.history(&topic, 2).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(reason(&last_two[1]), "9");
    }

    #[tokio::test]
    async fn test_unavailable_transport() {
        let channel = InMemoryChannel::default();
        channel.set_available(false);
        let err = channel.publish(&Topic::broadcast(), note("x")).await.unwrap_err();
        assert!(err.is_channel_outage());
        assert!(channel.probe().await.is_err());

        channel.set_available(true);
        assert!(channel.probe().await.is_ok());
        assert!(channel.publish(&Topic::broadcast(), note("x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let channel = std::sync::Arc::new(InMemoryChannel::default());
        let server_topic = Topic::new("service");
        let mut server = channel.subscribe(&server_topic).await.unwrap();

        let responder = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let request = server.recv().await.unwrap();
                let reply = request.reply(AgentId::from("service"), note("pong").body);
                let topic = Topic::reply(reply.correlation_id.unwrap());
                channel.publish(&topic, reply).await.unwrap();
            })
        };

        let reply = channel
            .request(&server_topic, note("ping"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reason(&reply), "pong");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let channel = InMemoryChannel::default();
        let err = channel
            .request(&Topic::new("nobody"), note("ping"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_late_reply_is_dropped_and_reply_topics_do_not_accumulate() {
        let channel = InMemoryChannel::default();
        let correlation = uuid::Uuid::new_v4();
        // No requester waiting: the reply vanishes without creating a topic.
        channel.publish(&Topic::reply(correlation), note("late")).await.unwrap();
        assert_eq!(channel.topic_count(), 0);
        assert!(channel.history(&Topic::reply(correlation), 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_merged_subscriptions() {
        let channel = InMemoryChannel::default();
        let inbox = Topic::inbox(&AgentId::from("validator-001"));
        let mut sub = channel
            .subscribe(&inbox)
            .await
            .unwrap()
            .merge(channel.subscribe(&Topic::broadcast()).await.unwrap());

        channel.publish(&inbox, note("direct")).await.unwrap();
        channel.publish(&Topic::broadcast(), note("everyone")).await.unwrap();

        let mut got = vec![reason(&sub.recv().await.unwrap()), reason(&sub.recv().await.unwrap())];
        got.sort();
        assert_eq!(got, vec!["direct", "everyone"]);
    }
}
