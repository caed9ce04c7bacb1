use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    identity::Identity,
    model::{Message, NewMessage, Presence},
    realtime::{RealtimeEvent, Signal},
    service::{ChatService, ServiceError},
};

use super::{BackendError, ChatBackend};

impl From<ServiceError> for BackendError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized => BackendError::Unauthorized,
            ServiceError::Forbidden(reason) => BackendError::Forbidden(reason.to_owned()),
            other => BackendError::Storage(other.to_string()),
        }
    }
}

/// In-process backend acting as `identity` directly against a [`ChatService`].
#[derive(Clone)]
pub struct LocalBackend {
    service: ChatService,
    identity: Identity,
}

impl LocalBackend {
    pub fn new(service: ChatService, identity: Identity) -> LocalBackend {
        LocalBackend { service, identity }
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn me(&self) -> Result<Identity, BackendError> {
        Ok(self.identity.clone())
    }

    async fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, BackendError> {
        Ok(self.service.recent_messages(limit).await?)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, BackendError> {
        Ok(self.service.insert_message(&self.identity, new).await?)
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), BackendError> {
        self.service.delete_message(&self.identity, id).await?;
        Ok(())
    }

    async fn clear_messages(&self) -> Result<(), BackendError> {
        self.service.clear_messages(&self.identity).await?;
        Ok(())
    }

    async fn active_presence(&self, window: Duration) -> Result<Vec<Presence>, BackendError> {
        Ok(self.service.active_presence(window).await?)
    }

    async fn upsert_presence(&self, presence: Presence) -> Result<(), BackendError> {
        Ok(self.service.upsert_presence(&self.identity, presence).await?)
    }

    async fn delete_presence(&self, user_id: &str) -> Result<(), BackendError> {
        self.service.delete_presence(&self.identity, user_id).await?;
        Ok(())
    }

    async fn disable_account(&self, user_id: &str) -> Result<(), BackendError> {
        Ok(self.service.ban(&self.identity, user_id).await?)
    }

    async fn broadcast(&self, topic: &str, signal: Signal) -> Result<(), BackendError> {
        Ok(self.service.broadcast(&self.identity, topic, signal)?)
    }

    fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.service.hub().subscribe()
    }
}
