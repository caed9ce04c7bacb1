use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect, Response}};
use oauth2::{CsrfToken, PkceCodeChallenge, Scope};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{session::{PendingSignIn, PENDING_SIGN_IN}, AppResult, AppState};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    pub(crate) return_url: Option<String>,
}

/// Starts the authorization-code flow with PKCE. A second login before the
/// first completes replaces the pending one.
#[debug_handler(state = AppState)]
pub(crate) async fn login(
    Path(provider): Path<ClientProvider>,
    Query(LoginQuery { return_url }): Query<LoginQuery>,
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let client = clients.get_client(provider)?;
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(provider.scopes().iter().map(|s| Scope::new((*s).to_owned())))
        .set_pkce_challenge(challenge)
        .url();

    let pending = PendingSignIn {
        provider,
        csrf_state: csrf_state.secret().clone(),
        pkce_verifier: verifier.secret().clone(),
        return_url,
    };
    session.insert(PENDING_SIGN_IN, &pending).await?;

    tracing::debug!(%provider, "redirecting to identity provider");
    Ok(Redirect::to(authorize_url.as_str()).into_response())
}
