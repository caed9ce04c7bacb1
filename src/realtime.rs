use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Topic shared by every client of the room.
pub const CHAT_TOPIC: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Ephemeral payloads carried on a broadcast topic. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Signal {
    Clear,
    Typing { username: String },
    StoppedTyping { username: String },
}

impl Signal {
    pub fn username(&self) -> Option<&str> {
        match self {
            Signal::Clear => None,
            Signal::Typing { username } | Signal::StoppedTyping { username } => Some(username.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Change(Change),
    Broadcast { topic: String, signal: Signal },
}

/// In-process fan-out of change notifications and broadcasts.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new(256)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Hub {
        Hub { tx: broadcast::channel(capacity).0 }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RealtimeEvent) {
        // no subscribers is fine
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::trace!(receivers, "published realtime event");
    }

    pub fn changed(&self, table: Table, kind: ChangeKind) {
        self.publish(RealtimeEvent::Change(Change { table, kind }));
    }

    pub fn broadcast(&self, topic: &str, signal: Signal) {
        self.publish(RealtimeEvent::Broadcast { topic: topic.to_owned(), signal });
    }
}
