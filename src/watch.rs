//! Change feed for reactive cache invalidation.
//!
//! Complements the per-key listeners: every successful mutation is also
//! published as a [`StoreEvent`] on a broadcast channel, and subscribers
//! filter by topic pattern.
//!
//! Topics:
//! - `subjects/<type>/<identifier>`
//! - `ladders/<lowercased name>`
//! - `context-inheritance`

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::data::{ContextInheritance, ImmutableSubjectData, RankLadder, SubjectDataKey};

/// Topic of the store-wide context inheritance.
pub const CONTEXT_INHERITANCE_TOPIC: &str = "context-inheritance";

/// What kind of change occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A value was written.
    Updated,
    /// A value was removed.
    Removed,
}

/// A change to a stored value.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Subject {
        key: SubjectDataKey,
        data: Option<ImmutableSubjectData>,
    },
    RankLadder {
        name: String,
        ladder: Option<RankLadder>,
    },
    ContextInheritance(ContextInheritance),
}

impl StoreEvent {
    /// Topic the event is published under.
    pub fn topic(&self) -> String {
        match self {
            StoreEvent::Subject { key, .. } => {
                format!("subjects/{}/{}", key.subject_type, key.identifier)
            }
            StoreEvent::RankLadder { name, .. } => format!("ladders/{}", name.to_lowercase()),
            StoreEvent::ContextInheritance(_) => CONTEXT_INHERITANCE_TOPIC.to_string(),
        }
    }

    /// Whether the event stores or removes a value.
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Subject { data: None, .. } | StoreEvent::RankLadder { ladder: None, .. } => {
                EventKind::Removed
            }
            _ => EventKind::Updated,
        }
    }
}

/// Whether `topic` matches `pattern` (exact, or prefix when ending in `*`).
fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => topic == pattern,
    }
}

/// A stream of store events for a specific topic pattern.
///
/// Events missed because the subscriber lagged behind are skipped.
pub struct WatchStream {
    inner: Pin<Box<dyn Stream<Item = StoreEvent> + Send>>,
    pattern: String,
}

impl WatchStream {
    /// Stream of the events on `receiver` matching `pattern`.
    pub fn new(receiver: broadcast::Receiver<StoreEvent>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let filter = pattern.clone();
        let inner = BroadcastStream::new(receiver).filter_map(move |event| match event {
            Ok(event) if topic_matches(&filter, &event.topic()) => Some(event),
            _ => None,
        });
        Self {
            inner: Box::pin(inner),
            pattern,
        }
    }

    /// Topic pattern this stream filters on.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.pattern, topic)
    }
}

impl Stream for WatchStream {
    type Item = StoreEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Handle for publishing store events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<StoreEvent>,
}

impl WatchSender {
    /// Sender buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; without subscribers it is dropped.
    pub fn send(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events matching `pattern`.
    pub fn subscribe(&self, pattern: impl Into<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern)
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics() {
        let subject = StoreEvent::Subject {
            key: SubjectDataKey::new("user", "alice"),
            data: None,
        };
        assert_eq!(subject.topic(), "subjects/user/alice");
        assert_eq!(subject.kind(), EventKind::Removed);

        let ladder = StoreEvent::RankLadder {
            name: "Staff".to_string(),
            ladder: Some(RankLadder::new("Staff")),
        };
        assert_eq!(ladder.topic(), "ladders/staff");
        assert_eq!(ladder.kind(), EventKind::Updated);

        let inheritance = StoreEvent::ContextInheritance(ContextInheritance::new());
        assert_eq!(inheritance.topic(), CONTEXT_INHERITANCE_TOPIC);
    }

    #[test]
    fn test_pattern_matching() {
        let sender = WatchSender::new(16);
        let stream = sender.subscribe("subjects/user/*");

        assert!(stream.matches("subjects/user/alice"));
        assert!(!stream.matches("subjects/group/admin"));

        let exact = sender.subscribe("ladders/staff");
        assert!(exact.matches("ladders/staff"));
        assert!(!exact.matches("ladders/staffers"));
        assert_eq!(sender.receiver_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_filters_events() {
        let sender = WatchSender::new(16);
        let mut stream = sender.subscribe("subjects/*");

        sender.send(StoreEvent::ContextInheritance(ContextInheritance::new()));
        sender.send(StoreEvent::Subject {
            key: SubjectDataKey::new("user", "bob"),
            data: Some(ImmutableSubjectData::new()),
        });

        let event = stream.next().await.unwrap();
        assert_eq!(event.topic(), "subjects/user/bob");
    }
}
