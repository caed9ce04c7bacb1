use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{identity::Identity, session::{return_target, IDENTITY}, AppResult, AppState, ChatService};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

/// Signing out also drops the user's presence record.
#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(service): State<ChatService>,
    session: Session
) -> AppResult<Redirect> {
    if let Some(identity) = session.get::<Identity>(IDENTITY).await? {
        service.delete_presence(&identity, &identity.user_id).await?;
        tracing::info!(user_id = %identity.user_id, "signed out");
    }
    session.clear().await;
    Ok(Redirect::to(return_target(return_url.as_deref())))
}
