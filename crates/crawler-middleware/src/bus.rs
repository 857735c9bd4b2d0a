//! Topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber gets
//! every message and a slow subscriber never blocks the publisher.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Commands`] | One [`CommandMessage`][crawler_types::CommandMessage] per tick for the leader |
//! | [`Topic::GroupCommands`] | The derived broadcast for followers |
//! | [`Topic::Telemetry`] | Free-text log lines |
//! | [`Topic::SystemAlerts`] | Faults and operator stop requests |

use crawler_types::{CrawlerError, Event};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (events buffered before the oldest are dropped
/// for lagging subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Commands,
    GroupCommands,
    Telemetry,
    SystemAlerts,
}

/// Shared event bus. Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    commands: broadcast::Sender<Event>,
    group_commands: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity);
        let (group_commands, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            commands,
            group_commands,
            telemetry,
            system_alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of subscribers that were handed the event.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, CrawlerError> {
        self.sender(topic)
            .send(event)
            .map_err(|_| CrawlerError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Commands => &self.commands,
            Topic::GroupCommands => &self.group_commands,
            Topic::Telemetry => &self.telemetry,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Async receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// Lag is logged and skipped over. Returns `None` once every sender has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
