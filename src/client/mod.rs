//! Client-side synchronization: keeps local view state (feed, roster, typing
//! set) reconciled with the shared tables and broadcast topic of the storage
//! service, and gates the write paths (composer, moderation).
//!
//! Every check made here is advisory. The rate limit in particular is not
//! enforced anywhere else.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    identity::Identity,
    model::{Message, NewMessage, Presence, FEED_LIMIT, MAX_MESSAGE_LEN},
    realtime::{RealtimeEvent, Signal},
};

pub mod channel;
pub mod composer;
pub mod country;
pub mod feed;
pub mod http;
pub mod local;
pub mod moderation;
pub mod notice;
pub mod presence;
pub mod profanity;
pub mod reconciler;
pub mod session;
pub mod typing;

pub use channel::{ChannelHandle, Channels, Delivery};
pub use composer::{Composer, SubmitError};
pub use feed::{FeedView, MessageFeed};
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use moderation::{ModerationError, Moderator};
pub use presence::{Heartbeat, LeaveTrigger, PresenceRoster, Roster};
pub use session::ChatSession;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Storage refused or failed the statement; the text is shown to the user as-is.
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("not signed in")]
    Unauthorized,
    #[error("connection: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Storage, realtime and account operations as seen from one signed-in client.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    async fn me(&self) -> Result<Identity, BackendError>;

    async fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, BackendError>;
    async fn insert_message(&self, new: NewMessage) -> Result<Message, BackendError>;
    async fn delete_message(&self, id: Uuid) -> Result<(), BackendError>;
    async fn clear_messages(&self) -> Result<(), BackendError>;

    async fn active_presence(&self, window: Duration) -> Result<Vec<Presence>, BackendError>;
    async fn upsert_presence(&self, presence: Presence) -> Result<(), BackendError>;
    async fn delete_presence(&self, user_id: &str) -> Result<(), BackendError>;

    async fn disable_account(&self, user_id: &str) -> Result<(), BackendError>;

    async fn broadcast(&self, topic: &str, signal: Signal) -> Result<(), BackendError>;
    /// Change notifications and broadcasts for every table and topic.
    fn events(&self) -> broadcast::Receiver<RealtimeEvent>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub feed_limit: u32,
    pub heartbeat_every: Duration,
    pub presence_poll: Duration,
    pub active_window: Duration,
    pub typing_timeout: Duration,
    pub send_cooldown: Duration,
    pub notice_ttl: Duration,
    pub max_message_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            feed_limit: FEED_LIMIT,
            heartbeat_every: Duration::from_secs(5),
            presence_poll: Duration::from_secs(3),
            active_window: Duration::from_secs(10),
            typing_timeout: Duration::from_millis(1200),
            send_cooldown: Duration::from_millis(2000),
            notice_ttl: Duration::from_secs(3),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

/// Where the terminal client connects and with which credentials.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: reqwest::Url,
    pub session: String,
    pub ipinfo_token: Option<String>,
}

impl Endpoint {
    pub fn from_env() -> anyhow::Result<Endpoint> {
        use anyhow::Context;

        let base_url = dotenv::var("GLOBALCHAT_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        Ok(Endpoint {
            base_url: base_url.parse().with_context(|| format!("GLOBALCHAT_URL {base_url:?}"))?,
            session: dotenv::var("GLOBALCHAT_SESSION").context("GLOBALCHAT_SESSION must be set")?,
            ipinfo_token: dotenv::var("IPINFO_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory backend for unit tests that need to count or fail calls.

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use parking_lot::Mutex;
    use time::OffsetDateTime;

    use super::*;
    use crate::realtime::Hub;

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) hub: Hub,
        pub(crate) messages: Mutex<Vec<Message>>,
        pub(crate) presence: Arc<Mutex<Vec<Presence>>>,
        /// Upserts land this long after they are issued, even if the caller
        /// stops waiting for them.
        pub(crate) upsert_delay: Mutex<Option<Duration>>,
        pub(crate) fail_reads: Mutex<bool>,
        pub(crate) fail_writes: Mutex<Option<String>>,
        pub(crate) fetches: AtomicUsize,
        pub(crate) inserts: AtomicUsize,
        pub(crate) disabled: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub(crate) fn insert_count(&self) -> usize {
            self.inserts.load(Ordering::SeqCst)
        }

        fn write(&self) -> Result<(), BackendError> {
            match self.fail_writes.lock().clone() {
                Some(text) => Err(BackendError::Storage(text)),
                None => Ok(()),
            }
        }
    }

    pub(crate) fn message(i: u32) -> Message {
        Message {
            id: Uuid::from_u128(u128::from(i) + 1),
            username: "ada".into(),
            country: None,
            message: format!("message {i}"),
            created_at: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(i64::from(i)),
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn me(&self) -> Result<Identity, BackendError> {
            Ok(Identity::new("fake"))
        }

        async fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, BackendError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if *self.fail_reads.lock() {
                return Err(BackendError::Transport("offline".into()));
            }
            let messages = self.messages.lock();
            let skip = messages.len().saturating_sub(limit as usize);
            Ok(messages[skip..].to_vec())
        }

        async fn insert_message(&self, new: NewMessage) -> Result<Message, BackendError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.write()?;
            let mut messages = self.messages.lock();
            let mut message = message(messages.len() as u32);
            message.username = new.username;
            message.country = new.country;
            message.message = new.message;
            messages.push(message.clone());
            Ok(message)
        }

        async fn delete_message(&self, id: Uuid) -> Result<(), BackendError> {
            self.write()?;
            self.messages.lock().retain(|m| m.id != id);
            Ok(())
        }

        async fn clear_messages(&self) -> Result<(), BackendError> {
            self.write()?;
            self.messages.lock().clear();
            Ok(())
        }

        async fn active_presence(&self, window: Duration) -> Result<Vec<Presence>, BackendError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if *self.fail_reads.lock() {
                return Err(BackendError::Transport("offline".into()));
            }
            let now = OffsetDateTime::now_utc();
            Ok(self.presence.lock().iter().filter(|p| p.is_active(now, window)).cloned().collect())
        }

        async fn upsert_presence(&self, presence: Presence) -> Result<(), BackendError> {
            self.write()?;
            let records = self.presence.clone();
            let commit = move || {
                let mut records = records.lock();
                records.retain(|p| p.user_id != presence.user_id);
                records.push(presence);
            };
            let delay = *self.upsert_delay.lock();
            match delay {
                None => commit(),
                Some(delay) => {
                    let landed = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        commit();
                    });
                    let _ = landed.await;
                }
            }
            Ok(())
        }

        async fn delete_presence(&self, user_id: &str) -> Result<(), BackendError> {
            self.write()?;
            self.presence.lock().retain(|p| p.user_id != user_id);
            Ok(())
        }

        async fn disable_account(&self, user_id: &str) -> Result<(), BackendError> {
            self.write()?;
            self.disabled.lock().push(user_id.to_owned());
            Ok(())
        }

        async fn broadcast(&self, topic: &str, signal: Signal) -> Result<(), BackendError> {
            self.hub.broadcast(topic, signal);
            Ok(())
        }

        fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
            self.hub.subscribe()
        }
    }
}
