use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderValue, COOKIE},
    Response, StatusCode, Url,
};
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};
use uuid::Uuid;

use crate::{
    identity::Identity,
    model::{Message, NewMessage, Presence},
    realtime::{RealtimeEvent, Signal},
};

use super::{BackendError, ChatBackend};

/// Cookie name the server's session layer issues.
const SESSION_COOKIE: &str = "id";
const EVENT_BUFFER: usize = 256;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to a running server over its REST routes and realtime socket,
/// authenticated by an existing session cookie.
pub struct HttpBackend {
    http: reqwest::Client,
    base: Url,
    events: broadcast::Sender<RealtimeEvent>,
    outgoing: mpsc::UnboundedSender<RealtimeEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl HttpBackend {
    pub async fn connect(base: Url, session: &str) -> Result<HttpBackend, BackendError> {
        let cookie = format!("{SESSION_COOKIE}={session}");
        let cookie_value = HeaderValue::from_str(&cookie).map_err(|e| BackendError::Transport(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie_value.clone());
        let http = reqwest::Client::builder().default_headers(headers).build()?;

        let mut ws_url = endpoint(&base, &["api", "realtime"])?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        ws_url
            .set_scheme(scheme)
            .map_err(|()| BackendError::Transport(format!("cannot derive socket url from {base}")))?;

        let mut request = ws_url.as_str().into_client_request().map_err(transport)?;
        request.headers_mut().insert(COOKIE, cookie_value);
        let (stream, _) = tokio_tungstenite::connect_async(request).await.map_err(transport)?;
        tracing::info!(%ws_url, "realtime connected");

        let (mut sink, mut source) = stream.split();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outgoing, mut queue) = mpsc::unbounded_channel::<RealtimeEvent>();

        let inbound = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(tungstenite::Message::Text(text)) => text,
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::warn!("realtime read failed: {err}");
                        break;
                    }
                };
                match serde_json::from_str::<RealtimeEvent>(&text) {
                    Ok(event) => {
                        let _ = inbound.send(event);
                    }
                    Err(err) => tracing::debug!("unreadable realtime frame: {err}"),
                }
            }
            tracing::warn!("realtime disconnected");
        });

        let writer = tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if let Err(err) = sink.send(tungstenite::Message::Text(text.into())).await {
                    tracing::warn!("realtime write failed: {err}");
                    break;
                }
            }
        });

        Ok(HttpBackend { http, base, events, outgoing, reader, writer })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        endpoint(&self.base, segments)
    }
}

impl Drop for HttpBackend {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| BackendError::Transport(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport(err: tungstenite::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

/// Maps a non-success response to the error the user should see.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized,
        StatusCode::FORBIDDEN => BackendError::Forbidden(text),
        _ => BackendError::Storage(text),
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn me(&self) -> Result<Identity, BackendError> {
        let response = self.http.get(self.url(&["api", "me"])?).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, BackendError> {
        let response = self
            .http
            .get(self.url(&["api", "messages"])?)
            .query(&[("limit", limit)])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, BackendError> {
        let response = self.http.post(self.url(&["api", "messages"])?).json(&new).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), BackendError> {
        let id = id.to_string();
        let response = self.http.delete(self.url(&["api", "messages", &id])?).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn clear_messages(&self) -> Result<(), BackendError> {
        let response = self.http.delete(self.url(&["api", "messages"])?).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn active_presence(&self, window: Duration) -> Result<Vec<Presence>, BackendError> {
        let response = self
            .http
            .get(self.url(&["api", "presence"])?)
            .query(&[("window_secs", window.as_secs().max(1))])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn upsert_presence(&self, presence: Presence) -> Result<(), BackendError> {
        let response = self.http.put(self.url(&["api", "presence"])?).json(&presence).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_presence(&self, user_id: &str) -> Result<(), BackendError> {
        let response = self.http.delete(self.url(&["api", "presence", user_id])?).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn disable_account(&self, user_id: &str) -> Result<(), BackendError> {
        let response = self.http.post(self.url(&["api", "admin", "ban", user_id])?).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn broadcast(&self, topic: &str, signal: Signal) -> Result<(), BackendError> {
        self.outgoing
            .send(RealtimeEvent::Broadcast { topic: topic.to_owned(), signal })
            .map_err(|_| BackendError::Transport("realtime connection closed".into()))
    }

    fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }
}
