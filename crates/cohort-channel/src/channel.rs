use crate::topic::Topic;
use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult, Message};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// A lazy, infinite stream of messages from one or more topics.
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    topic: Topic,
    inner: Pin<Box<dyn Stream<Item = Message> + Send>>,
}

impl Subscription {
    /// Wrap a message stream for `topic`.
    pub fn new(topic: Topic, stream: impl Stream<Item = Message> + Send + 'static) -> Self {
        Self {
            topic,
            inner: Box::pin(stream),
        }
    }

    /// The topic this subscription was opened on (the first one when merged).
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next message. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inner.next().await
    }

    /// Interleave two subscriptions. Per-topic order is preserved.
    pub fn merge(self, other: Subscription) -> Subscription {
        let topic = self.topic.clone();
        Subscription::new(topic, self.inner.merge(other.inner))
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Publish/subscribe and point-to-point delivery substrate.
///
/// Delivery is at-least-once to active subscribers and FIFO per publisher
/// within a topic; there is no order across topics. Consumers deduplicate on
/// [`Message::id`].
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish a message. Fails only when the transport is unavailable.
    async fn publish(&self, topic: &Topic, message: Message) -> CohortResult<()>;

    /// Subscribe with the channel's default backlog replay.
    async fn subscribe(&self, topic: &Topic) -> CohortResult<Subscription>;

    /// Subscribe, first replaying up to `replay` retained messages.
    async fn subscribe_with_replay(&self, topic: &Topic, replay: usize)
        -> CohortResult<Subscription>;

    /// The most recent `limit` retained messages of a topic, oldest first.
    async fn history(&self, topic: &Topic, limit: usize) -> Vec<Message>;

    /// Liveness check of the transport.
    async fn probe(&self) -> CohortResult<()>;

    /// Publish `message` to `target` and wait for one reply on the
    /// correlation's reply topic.
    async fn request(
        &self,
        target: &Topic,
        message: Message,
        timeout: Duration,
    ) -> CohortResult<Message> {
        let correlation_id = message.correlation_id.unwrap_or(message.id);
        let message = message.with_correlation(correlation_id);
        let reply_topic = Topic::reply(correlation_id);

        // Subscribe before publishing so a fast reply cannot be missed.
        let mut replies = self.subscribe_with_replay(&reply_topic, 0).await?;
        self.publish(target, message).await?;

        match tokio::time::timeout(timeout, replies.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(CohortError::ChannelUnavailable(format!(
                "reply stream {reply_topic} closed"
            ))),
            Err(_) => {
                debug!(topic = %target, %correlation_id, "Request timed out");
                Err(CohortError::Timeout(format!(
                    "no reply on {reply_topic} within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Publish to the topic the message's recipient routes to.
    async fn send(&self, message: Message) -> CohortResult<()> {
        let topic = Topic::for_message(&message);
        self.publish(&topic, message).await
    }
}
