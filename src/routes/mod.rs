mod admin;
mod messages;
mod presence;
mod ws;

use axum::{debug_handler, routing::{delete, get, post}, Json, Router};
use tower_sessions::Session;

use crate::{identity::Identity, session, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/messages", get(messages::recent).post(messages::send).delete(messages::clear))
        .route("/messages/{id}", delete(messages::delete_one))
        .route("/presence", get(presence::active).put(presence::upsert))
        .route("/presence/{user_id}", delete(presence::remove))
        .route("/admin/ban/{user_id}", post(admin::ban))
        .route("/realtime", get(ws::realtime_ws))
}

#[debug_handler]
async fn me(session: Session) -> AppResult<Json<Identity>> {
    Ok(Json(session::identity(&session).await?))
}
