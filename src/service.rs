use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db,
    identity::Identity,
    model::{Message, NewMessage, Presence, FEED_LIMIT, MAX_MESSAGE_LEN},
    realtime::{ChangeKind, Hub, Signal, Table},
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not signed in")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("account provider: {0}")]
    Provider(anyhow::Error),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

/// Account-disable operation of the identity provider.
#[async_trait]
pub trait AccountAdmin: Send + Sync {
    async fn disable_account(&self, user_id: &str) -> anyhow::Result<()>;
}

/// The two tables plus their change notifications. Every mutation publishes
/// a change on the hub after the statement commits.
#[derive(Clone)]
pub struct ChatService {
    pool: SqlitePool,
    hub: Hub,
    accounts: Arc<dyn AccountAdmin>,
}

impl ChatService {
    pub fn new(pool: SqlitePool, hub: Hub, accounts: Arc<dyn AccountAdmin>) -> ChatService {
        ChatService { pool, hub, accounts }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    fn moderator(actor: &Identity) -> Result<(), ServiceError> {
        if actor.can_moderate() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("moderator role required"))
        }
    }

    pub async fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, ServiceError> {
        Ok(db::recent_messages(&self.pool, limit.min(FEED_LIMIT)).await?)
    }

    fn speaker(actor: &Identity) -> Result<String, ServiceError> {
        actor
            .display_name()
            .ok_or_else(|| ServiceError::Invalid("could not determine your username".into()))
    }

    /// Stores a message under the actor's display name, whatever the payload claims.
    pub async fn insert_message(&self, actor: &Identity, new: NewMessage) -> Result<Message, ServiceError> {
        let text = new.message.trim();
        if text.is_empty() {
            return Err(ServiceError::Invalid("message is empty".into()));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(ServiceError::Invalid(format!("message is longer than {MAX_MESSAGE_LEN} characters")));
        }

        let username = Self::speaker(actor)?;
        if username != new.username {
            tracing::debug!(user_id = %actor.user_id, claimed = %new.username, "replacing message username");
        }
        let new = NewMessage { username, message: text.to_owned(), country: new.country };
        let message = db::insert_message(&self.pool, &new).await?;
        tracing::debug!(id = %message.id, username = %message.username, "message stored");
        self.hub.changed(Table::Messages, ChangeKind::Insert);
        Ok(message)
    }

    pub async fn delete_message(&self, actor: &Identity, id: Uuid) -> Result<bool, ServiceError> {
        Self::moderator(actor)?;
        let deleted = db::delete_message(&self.pool, id).await?;
        if deleted {
            tracing::info!(%id, by = %actor.user_id, "message deleted");
            self.hub.changed(Table::Messages, ChangeKind::Delete);
        }
        Ok(deleted)
    }

    pub async fn clear_messages(&self, actor: &Identity) -> Result<u64, ServiceError> {
        Self::moderator(actor)?;
        let deleted = db::clear_messages(&self.pool).await?;
        tracing::info!(deleted, by = %actor.user_id, "messages cleared");
        self.hub.changed(Table::Messages, ChangeKind::Delete);
        Ok(deleted)
    }

    pub async fn active_presence(&self, window: Duration) -> Result<Vec<Presence>, ServiceError> {
        Ok(db::active_presence(&self.pool, OffsetDateTime::now_utc(), window).await?)
    }

    /// Upserts the actor's own record; key and role come from the actor, not the payload.
    pub async fn upsert_presence(&self, actor: &Identity, presence: Presence) -> Result<(), ServiceError> {
        let presence = Presence {
            user_id: actor.user_id.clone(),
            role: actor.role,
            ..presence
        };
        db::upsert_presence(&self.pool, &presence).await?;
        self.hub.changed(Table::Presence, ChangeKind::Update);
        Ok(())
    }

    /// Own record for anyone, any record for moderators (kick).
    pub async fn delete_presence(&self, actor: &Identity, user_id: &str) -> Result<bool, ServiceError> {
        if actor.user_id != user_id {
            Self::moderator(actor)?;
            tracing::info!(user_id, by = %actor.user_id, "presence kicked");
        }
        let deleted = db::delete_presence(&self.pool, user_id).await?;
        if deleted {
            self.hub.changed(Table::Presence, ChangeKind::Delete);
        }
        Ok(deleted)
    }

    pub async fn ban(&self, actor: &Identity, user_id: &str) -> Result<(), ServiceError> {
        Self::moderator(actor)?;
        self.accounts
            .disable_account(user_id)
            .await
            .map_err(ServiceError::Provider)?;
        tracing::info!(user_id, by = %actor.user_id, "account disabled");
        Ok(())
    }

    /// `clear` needs a moderator; typing signals may only name the actor.
    pub fn broadcast(&self, actor: &Identity, topic: &str, signal: Signal) -> Result<(), ServiceError> {
        if signal == Signal::Clear {
            Self::moderator(actor)?;
        }
        if let Some(claimed) = signal.username() {
            if claimed != Self::speaker(actor)? {
                return Err(ServiceError::Forbidden("cannot signal on behalf of another user"));
            }
        }
        self.hub.broadcast(topic, signal);
        Ok(())
    }
}
