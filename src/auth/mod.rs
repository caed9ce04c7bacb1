use axum::{routing::get, Router};

use crate::AppState;

mod accounts;
mod clients;
mod login;
mod lockin;
mod logout;

pub use accounts::FirebaseAccounts;
pub use clients::{ClientProvider, Clients};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/{provider}", get(login::login))
        .route("/lockin/{provider}", get(lockin::lockin))
        .route("/logout", get(logout::logout))
}
