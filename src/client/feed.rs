use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{model::Message, realtime::{Signal, Table}};

use super::{
    channel::{ChannelHandle, Delivery},
    reconciler::{ChangeReceiver, Reconciler, Source, Subscription},
    BackendError, ChatBackend, ClientConfig,
};

/// Keeps the newest `limit` messages by `created_at`, oldest first.
pub fn window(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
    messages.sort_by_key(|m| m.created_at);
    let excess = messages.len().saturating_sub(limit);
    messages.drain(..excess);
    messages
}

struct RecentMessages {
    backend: Arc<dyn ChatBackend>,
    limit: u32,
}

#[async_trait]
impl Source for RecentMessages {
    type Snapshot = Vec<Message>;

    async fn fetch(&self) -> Result<Vec<Message>, BackendError> {
        let messages = self.backend.recent_messages(self.limit).await?;
        Ok(window(messages, self.limit as usize))
    }
}

/// Read side of the feed, cheap to clone into other components.
#[derive(Clone)]
pub struct FeedView {
    state: Arc<Reconciler<Vec<Message>>>,
}

impl FeedView {
    pub fn messages(&self) -> Vec<Message> {
        self.state.current()
    }

    /// Every update is a cue for the view to scroll to the bottom.
    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.state.watch()
    }

    pub fn remove_local(&self, id: Uuid) {
        self.state.modify(|messages| messages.retain(|m| m.id != id));
    }

    pub fn clear_local(&self) {
        self.state.modify(Vec::clear);
    }
}

/// The message window. Re-fetched wholesale on every message change
/// notification; emptied immediately on a `clear` broadcast, and re-fetched
/// when broadcasts were missed, since one of them may have been a `clear`.
pub struct MessageFeed {
    view: FeedView,
    _sync: Subscription,
    _clear: Subscription,
}

impl MessageFeed {
    pub fn start(backend: Arc<dyn ChatBackend>, channel: &ChannelHandle, config: &ClientConfig) -> MessageFeed {
        let state = Reconciler::new(Vec::new());
        let changes = ChangeReceiver::new(backend.events(), Table::Messages);
        let source = Arc::new(RecentMessages { backend, limit: config.feed_limit });
        let sync = state.spawn(source.clone(), changes, None);

        let mut signals = channel.subscribe();
        let view = FeedView { state };
        let clear_view = view.clone();
        let clear = Subscription::spawn(async move {
            while let Some(delivery) = signals.next().await {
                match delivery {
                    Delivery::Signal(Signal::Clear) => {
                        tracing::info!("feed cleared by broadcast");
                        clear_view.clear_local();
                    }
                    Delivery::Signal(_) => {}
                    Delivery::Missed(skipped) => {
                        tracing::info!(skipped, "feed missed broadcasts, refetching");
                        clear_view.state.refresh(&*source).await;
                    }
                }
            }
        });

        MessageFeed { view, _sync: sync, _clear: clear }
    }

    pub fn view(&self) -> FeedView {
        self.view.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.view.messages()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.view.watch()
    }
}
