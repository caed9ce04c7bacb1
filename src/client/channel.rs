use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::realtime::{RealtimeEvent, Signal};

use super::{BackendError, ChatBackend};

struct Topic {
    name: String,
    backend: Arc<dyn ChatBackend>,
}

impl Drop for Topic {
    fn drop(&mut self) {
        tracing::debug!(topic = %self.name, "channel closed");
    }
}

/// Per-session registry of broadcast topics. Every component joining the same
/// topic shares one handle; the topic closes when its last handle drops.
pub struct Channels {
    backend: Arc<dyn ChatBackend>,
    open: Mutex<HashMap<String, Weak<Topic>>>,
}

impl Channels {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Channels {
        Channels { backend, open: Mutex::new(HashMap::new()) }
    }

    pub fn join(&self, topic: &str) -> ChannelHandle {
        let mut open = self.open.lock();
        open.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = open.get(topic).and_then(Weak::upgrade) {
            return ChannelHandle { topic: existing };
        }

        tracing::debug!(topic, "channel opened");
        let created = Arc::new(Topic { name: topic.to_owned(), backend: self.backend.clone() });
        open.insert(topic.to_owned(), Arc::downgrade(&created));
        ChannelHandle { topic: created }
    }

    pub fn open_topics(&self) -> usize {
        self.open.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }
}

#[derive(Clone)]
pub struct ChannelHandle {
    topic: Arc<Topic>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.topic)
    }

    pub async fn send(&self, signal: Signal) -> Result<(), BackendError> {
        self.topic.backend.broadcast(&self.topic.name, signal).await
    }

    pub fn subscribe(&self) -> SignalReceiver {
        SignalReceiver {
            rx: self.topic.backend.events(),
            topic: self.topic.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Signal(Signal),
    /// The receiver fell behind and this many events, signals or not, were
    /// dropped unseen.
    Missed(u64),
}

/// Signals for one topic, filtered out of the session's event stream.
pub struct SignalReceiver {
    rx: broadcast::Receiver<RealtimeEvent>,
    topic: String,
}

impl SignalReceiver {
    /// `None` once the realtime connection is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(RealtimeEvent::Broadcast { topic, signal }) if topic == self.topic => {
                    return Some(Delivery::Signal(signal));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "signal receiver lagged");
                    return Some(Delivery::Missed(skipped));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Like [`SignalReceiver::next`] for consumers that can live with gaps.
    pub async fn recv(&mut self) -> Option<Signal> {
        loop {
            match self.next().await? {
                Delivery::Signal(signal) => return Some(signal),
                Delivery::Missed(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::testing::FakeBackend, realtime::Hub};

    #[test]
    fn one_topic_shared_by_all_handles() {
        let channels = Channels::new(Arc::new(FakeBackend::default()));

        let a = channels.join("chat");
        let b = channels.join("chat");
        assert_eq!(a.handles(), 2);
        assert_eq!(channels.open_topics(), 1);

        let other = channels.join("staff");
        assert_eq!(channels.open_topics(), 2);

        drop(other);
        assert_eq!(channels.open_topics(), 1);

        drop(a);
        assert_eq!(b.handles(), 1);
        drop(b);
        assert_eq!(channels.open_topics(), 0);

        let reopened = channels.join("chat");
        assert_eq!(reopened.handles(), 1);
    }

    #[tokio::test]
    async fn receiver_only_sees_its_topic() {
        let channels = Channels::new(Arc::new(FakeBackend::default()));
        let chat = channels.join("chat");
        let staff = channels.join("staff");
        let mut rx = chat.subscribe();

        staff.send(Signal::Clear).await.unwrap();
        chat.send(Signal::Typing { username: "ada".into() }).await.unwrap();

        assert_eq!(rx.recv().await, Some(Signal::Typing { username: "ada".into() }));
    }

    #[tokio::test]
    async fn falling_behind_is_reported() {
        let backend = FakeBackend { hub: Hub::new(2), ..FakeBackend::default() };
        let channels = Channels::new(Arc::new(backend));
        let chat = channels.join("chat");
        let mut rx = chat.subscribe();

        chat.send(Signal::Clear).await.unwrap();
        for name in ["ada", "bob", "cy"] {
            chat.send(Signal::Typing { username: name.into() }).await.unwrap();
        }

        assert_eq!(rx.next().await, Some(Delivery::Missed(2)));
        assert_eq!(rx.next().await, Some(Delivery::Signal(Signal::Typing { username: "bob".into() })));
        assert_eq!(rx.recv().await, Some(Signal::Typing { username: "cy".into() }));
    }
}
