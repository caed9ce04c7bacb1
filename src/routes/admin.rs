use axum::{debug_handler, extract::{Path, State}, http::StatusCode};
use tower_sessions::Session;

use crate::{session, AppResult, AppState, ChatService};

#[debug_handler(state = AppState)]
pub(crate) async fn ban(
    State(service): State<ChatService>,
    Path(user_id): Path<String>,
    session: Session,
) -> AppResult<StatusCode> {
    let identity = session::identity(&session).await?;
    service.ban(&identity, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
