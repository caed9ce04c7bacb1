use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{model::{Message, NewMessage, FEED_LIMIT}, session, AppResult, AppState, ChatService};

#[derive(Deserialize)]
pub(crate) struct RecentQuery {
    limit: Option<u32>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn recent(
    State(service): State<ChatService>,
    Query(RecentQuery { limit }): Query<RecentQuery>,
    session: Session,
) -> AppResult<Json<Vec<Message>>> {
    session::identity(&session).await?;
    let messages = service.recent_messages(limit.unwrap_or(FEED_LIMIT)).await?;
    Ok(Json(messages))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    State(service): State<ChatService>,
    session: Session,
    Json(new): Json<NewMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let identity = session::identity(&session).await?;
    let message = service.insert_message(&identity, new).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_one(
    State(service): State<ChatService>,
    Path(id): Path<Uuid>,
    session: Session,
) -> AppResult<StatusCode> {
    let identity = session::identity(&session).await?;
    service.delete_message(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn clear(
    State(service): State<ChatService>,
    session: Session,
) -> AppResult<StatusCode> {
    let identity = session::identity(&session).await?;
    service.clear_messages(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}
