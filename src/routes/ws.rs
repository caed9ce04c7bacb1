use axum::{debug_handler, extract::{ws::Message, State, WebSocketUpgrade}, response::Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tower_sessions::Session;

use crate::{realtime::RealtimeEvent, session, AppResult, AppState, ChatService};

/// Server to client: every change and broadcast on the hub.
/// Client to server: broadcasts only; change events cannot be injected.
#[debug_handler(state = AppState)]
pub async fn realtime_ws(
    State(service): State<ChatService>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let identity = session::identity(&session).await?;

    Ok(ws.on_upgrade(async move |stream| {
        let mut rx = service.hub().subscribe();
        let (mut sender, mut receiver) = stream.split();
        tracing::debug!(user_id = %identity.user_id, "realtime connected");

        let broadcast_task = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "realtime subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Ok(text) = serde_json::to_string(&event) else {
                    continue
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
            let Ok(event) = serde_json::from_slice::<RealtimeEvent>(&msg.into_data()) else {
                continue
            };

            match event {
                RealtimeEvent::Broadcast { topic, signal } => {
                    if let Err(err) = service.broadcast(&identity, &topic, signal) {
                        tracing::debug!(user_id = %identity.user_id, "broadcast refused: {err}");
                    }
                }
                RealtimeEvent::Change(_) => {
                    tracing::debug!(user_id = %identity.user_id, "ignoring client change event");
                }
            }
        }

        broadcast_task.abort();
        tracing::debug!(user_id = %identity.user_id, "realtime disconnected");
    }))
}
