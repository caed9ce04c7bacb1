use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    identity::Identity,
    model::{CountryCode, Message, NewMessage},
};

use super::{
    notice::Notice,
    profanity::{ProfanityFilter, WordList},
    typing::TypingNotifier,
    BackendError, ChatBackend, ClientConfig,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Message is empty.")]
    Empty,
    #[error("Message is too long ({len} characters, at most {max}).")]
    TooLong { len: usize, max: usize },
    #[error("Could not determine your username.")]
    NoIdentity,
    #[error("Profanity is not allowed. Please use appropriate language.")]
    Profane,
    #[error("Please wait before sending another message.")]
    RateLimited,
    #[error("{0}")]
    Storage(String),
}

impl From<BackendError> for SubmitError {
    fn from(err: BackendError) -> Self {
        SubmitError::Storage(err.to_string())
    }
}

/// Minimum spacing between accepted sends from this client.
#[derive(Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> RateLimiter {
        RateLimiter { cooldown, last: None }
    }

    /// Records `now` when permitted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// The send path. Everything up to the insert is checked locally, so a
/// rejected message never reaches storage.
pub struct Composer {
    backend: Arc<dyn ChatBackend>,
    identity: Identity,
    country: Mutex<Option<CountryCode>>,
    filter: Box<dyn ProfanityFilter>,
    limiter: Mutex<RateLimiter>,
    max_len: usize,
    notice: Notice,
    typing: Option<TypingNotifier>,
}

impl Composer {
    pub fn new(backend: Arc<dyn ChatBackend>, identity: Identity, config: &ClientConfig) -> Composer {
        Composer {
            backend,
            identity,
            country: Mutex::new(None),
            filter: Box::new(WordList::default()),
            limiter: Mutex::new(RateLimiter::new(config.send_cooldown)),
            max_len: config.max_message_len,
            notice: Notice::new(config.notice_ttl),
            typing: None,
        }
    }

    pub fn with_filter(mut self, filter: impl ProfanityFilter + 'static) -> Composer {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_typing(mut self, typing: TypingNotifier) -> Composer {
        self.typing = Some(typing);
        self
    }

    /// Country attached to every later send; resolved once per session.
    pub fn set_country(&self, country: Option<CountryCode>) {
        *self.country.lock() = country;
    }

    /// Content and identity checks, without touching the rate limit.
    pub fn validate(&self, text: &str) -> Result<NewMessage, SubmitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }
        let len = text.chars().count();
        if len > self.max_len {
            return Err(SubmitError::TooLong { len, max: self.max_len });
        }
        let username = self.identity.display_name().ok_or(SubmitError::NoIdentity)?;
        if self.filter.is_profane(text) {
            return Err(SubmitError::Profane);
        }

        Ok(NewMessage {
            username,
            country: *self.country.lock(),
            message: text.to_owned(),
        })
    }

    pub async fn submit(&self, text: &str) -> Result<Message, SubmitError> {
        match self.try_submit(text).await {
            Ok(message) => {
                self.notice.dismiss();
                if let Some(typing) = &self.typing {
                    typing.sent().await;
                }
                Ok(message)
            }
            Err(err) => {
                tracing::info!("message rejected: {err}");
                self.notice.post(err.to_string());
                Err(err)
            }
        }
    }

    async fn try_submit(&self, text: &str) -> Result<Message, SubmitError> {
        let new = self.validate(text)?;
        if !self.limiter.lock().try_acquire(Instant::now()) {
            return Err(SubmitError::RateLimited);
        }
        Ok(self.backend.insert_message(new).await?)
    }

    pub async fn keystroke(&self) {
        if let Some(typing) = &self.typing {
            typing.keystroke().await;
        }
    }

    pub async fn blur(&self) {
        if let Some(typing) = &self.typing {
            typing.blur().await;
        }
    }

    pub fn notice(&self) -> &Notice {
        &self.notice
    }
}
