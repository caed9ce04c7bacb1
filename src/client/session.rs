use std::sync::Arc;

use crate::{identity::Identity, model::CountryCode, realtime::CHAT_TOPIC};

use super::{
    channel::{ChannelHandle, Channels},
    composer::Composer,
    country::CountryResolver,
    feed::MessageFeed,
    moderation::Moderator,
    presence::{Heartbeat, LeaveTrigger, PresenceRoster},
    typing::{TypingIndicator, TypingNotifier},
    BackendError, ChatBackend, ClientConfig,
};

/// Everything one signed-in view runs: feed and roster subscriptions, the
/// presence heartbeat, typing in both directions, and the write paths.
/// Dropping it tears all of them down.
pub struct ChatSession {
    identity: Identity,
    channels: Channels,
    chat: ChannelHandle,
    feed: MessageFeed,
    roster: PresenceRoster,
    typing: TypingIndicator,
    heartbeat: Option<Heartbeat>,
    composer: Composer,
    moderator: Moderator,
}

impl ChatSession {
    /// Asks the backend who we are and where we are, then starts.
    pub async fn connect(
        backend: Arc<dyn ChatBackend>,
        resolver: Option<&CountryResolver>,
        config: ClientConfig,
    ) -> Result<ChatSession, BackendError> {
        let identity = backend.me().await?;
        let country = match resolver {
            Some(resolver) => resolver.resolve().await,
            None => None,
        };
        Ok(ChatSession::start(backend, identity, country, config))
    }

    pub fn start(
        backend: Arc<dyn ChatBackend>,
        identity: Identity,
        country: Option<CountryCode>,
        config: ClientConfig,
    ) -> ChatSession {
        let username = identity.display_name();
        tracing::info!(user_id = %identity.user_id, username = ?username, "chat session starting");

        let channels = Channels::new(backend.clone());
        let chat = channels.join(CHAT_TOPIC);

        let feed = MessageFeed::start(backend.clone(), &chat, &config);
        let roster = PresenceRoster::start(backend.clone(), &config);
        let heartbeat = Heartbeat::start(backend.clone(), &identity, country, config.heartbeat_every);
        if heartbeat.is_none() {
            tracing::warn!(user_id = %identity.user_id, "no display name, presence disabled");
        }
        let typing = TypingIndicator::start(&chat, username.clone().unwrap_or_default(), config.typing_timeout);

        let mut composer = Composer::new(backend.clone(), identity.clone(), &config);
        if let Some(username) = username {
            composer = composer.with_typing(TypingNotifier::new(chat.clone(), username, config.typing_timeout));
        }
        composer.set_country(country);

        let moderator = Moderator::new(backend, identity.clone(), chat.clone()).with_feed(feed.view());

        ChatSession { identity, channels, chat, feed, roster, typing, heartbeat, composer, moderator }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn chat(&self) -> &ChannelHandle {
        &self.chat
    }

    pub fn feed(&self) -> &MessageFeed {
        &self.feed
    }

    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    pub fn typing(&self) -> &TypingIndicator {
        &self.typing
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn moderator(&self) -> &Moderator {
        &self.moderator
    }

    pub async fn leave(&mut self, trigger: LeaveTrigger) {
        if let Some(heartbeat) = &mut self.heartbeat {
            heartbeat.leave(trigger).await;
        }
    }

    /// Back from a page-hide.
    pub fn resume(&mut self) {
        if let Some(heartbeat) = &mut self.heartbeat {
            heartbeat.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::testing::FakeBackend, identity::Role};

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn shares_one_chat_channel() {
        let backend = Arc::new(FakeBackend::default());
        let session = ChatSession::start(backend, Identity::new("u1").with_handle("ada"), None, ClientConfig::default());
        // session, notifier, moderator
        assert_eq!(session.chat().handles(), 3);
        assert_eq!(session.channels().open_topics(), 1);
    }

    #[tokio::test]
    async fn connect_uses_backend_identity_and_advertises_presence() {
        let backend = Arc::new(FakeBackend::default());
        let mut session = ChatSession::connect(backend.clone(), None, ClientConfig::default()).await.unwrap();
        settle().await;
        assert_eq!(session.identity().user_id, "fake");
        assert_eq!(backend.presence.lock().len(), 1);
        assert_eq!(backend.presence.lock()[0].role, Role::Member);

        session.leave(LeaveTrigger::SignOut).await;
        assert!(backend.presence.lock().is_empty());
        assert!(!session.moderator().is_permitted());
    }
}
