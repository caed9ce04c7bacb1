use std::sync::Arc;

use uuid::Uuid;

use crate::{identity::Identity, realtime::Signal};

use super::{channel::ChannelHandle, feed::FeedView, BackendError, ChatBackend};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModerationError {
    #[error("You are not allowed to moderate.")]
    NotPermitted,
    #[error("Failed to ban user.")]
    BanFailed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Moderator actions. The role check here only hides the controls; storage
/// checks the same claim again.
pub struct Moderator {
    backend: Arc<dyn ChatBackend>,
    identity: Identity,
    channel: ChannelHandle,
    feed: Option<FeedView>,
}

impl Moderator {
    pub fn new(backend: Arc<dyn ChatBackend>, identity: Identity, channel: ChannelHandle) -> Moderator {
        Moderator { backend, identity, channel, feed: None }
    }

    /// Feed to patch optimistically after a successful delete or clear.
    pub fn with_feed(mut self, feed: FeedView) -> Moderator {
        self.feed = Some(feed);
        self
    }

    pub fn is_permitted(&self) -> bool {
        self.identity.can_moderate()
    }

    fn check(&self) -> Result<(), ModerationError> {
        if self.is_permitted() {
            Ok(())
        } else {
            Err(ModerationError::NotPermitted)
        }
    }

    pub async fn delete_message(&self, id: Uuid) -> Result<(), ModerationError> {
        self.check()?;
        self.backend.delete_message(id).await?;
        tracing::info!(%id, "message deleted");
        if let Some(feed) = &self.feed {
            feed.remove_local(id);
        }
        Ok(())
    }

    /// Deletes everything, then tells every viewer to clear without waiting
    /// for the change notification.
    pub async fn clear_all(&self) -> Result<(), ModerationError> {
        self.check()?;
        self.backend.clear_messages().await?;
        if let Err(err) = self.channel.send(Signal::Clear).await {
            tracing::warn!("clear broadcast failed: {err}");
        }
        tracing::info!("all messages cleared");
        if let Some(feed) = &self.feed {
            feed.clear_local();
        }
        Ok(())
    }

    /// Removes the target from the roster until their own heartbeat re-upserts.
    pub async fn kick(&self, user_id: &str) -> Result<(), ModerationError> {
        self.check()?;
        self.backend.delete_presence(user_id).await?;
        tracing::info!(user_id, "user kicked");
        Ok(())
    }

    pub async fn ban(&self, user_id: &str) -> Result<(), ModerationError> {
        self.check()?;
        match self.backend.disable_account(user_id).await {
            Ok(()) => {
                tracing::info!(user_id, "user banned");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(user_id, "ban failed: {err}");
                Err(ModerationError::BanFailed)
            }
        }
    }
}
