use std::time::Duration;

use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{model::Presence, session, AppResult, AppState, ChatService};

const DEFAULT_WINDOW_SECS: u64 = 10;

#[derive(Deserialize)]
pub(crate) struct ActiveQuery {
    window_secs: Option<u64>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn active(
    State(service): State<ChatService>,
    Query(ActiveQuery { window_secs }): Query<ActiveQuery>,
    session: Session,
) -> AppResult<Json<Vec<Presence>>> {
    session::identity(&session).await?;
    let window = Duration::from_secs(window_secs.unwrap_or(DEFAULT_WINDOW_SECS));
    Ok(Json(service.active_presence(window).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn upsert(
    State(service): State<ChatService>,
    session: Session,
    Json(presence): Json<Presence>,
) -> AppResult<StatusCode> {
    let identity = session::identity(&session).await?;
    service.upsert_presence(&identity, presence).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    State(service): State<ChatService>,
    Path(user_id): Path<String>,
    session: Session,
) -> AppResult<StatusCode> {
    let identity = session::identity(&session).await?;
    service.delete_presence(&identity, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
