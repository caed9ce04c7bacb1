use std::{collections::HashSet, sync::Arc};

use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect}};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    identity::{Identity, Role},
    session::{return_target, PendingSignIn, IDENTITY, PENDING_SIGN_IN},
    AppResult, AppState, Config, GetField,
};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[derive(Serialize)]
struct FirebaseRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

/// Builds the session identity from a `signInWithIdp` response. The admin
/// claim is granted here and nowhere else.
pub(crate) fn identity_from_idp(body: &serde_json::Value, admins: &HashSet<String>) -> AppResult<Identity> {
    let user_id = body.get_str_field("localId")?;
    let role = if admins.contains(&user_id) { Role::Admin } else { Role::Member };

    Ok(Identity {
        handle: body.get_opt_str_field("screenName"),
        first_name: body.get_opt_str_field("firstName"),
        last_name: body.get_opt_str_field("lastName"),
        full_name: body.get_opt_str_field("fullName").or(body.get_opt_str_field("displayName")),
        role,
        user_id,
    })
}

#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or(anyhow::anyhow!("OAuth: without state"))?);
    let code = AuthorizationCode::new(code.ok_or(anyhow::anyhow!("OAuth: without code"))?);

    let Some(pending) = session.remove::<PendingSignIn>(PENDING_SIGN_IN).await? else {
        return Err(anyhow::anyhow!("no sign-in in progress"))?;
    };
    if pending.provider != provider {
        return Err(anyhow::anyhow!("sign-in started with {} but returned from {provider}", pending.provider))?;
    }
    if state.secret().as_str() != pending.csrf_state.as_str() {
        return Err(anyhow::anyhow!("csrf tokens don't match"))?;
    }

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    // disabled (banned) accounts are refused here by the provider
    let body: serde_json::Value = http_client.post(clients.firebase_idpurl)
        .json(&FirebaseRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: config.public_url.clone(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let identity = identity_from_idp(&body, &config.admin_user_ids)?;
    tracing::info!(user_id = %identity.user_id, role = %identity.role, "signed in");
    session.insert(IDENTITY, &identity).await?;

    Ok(Redirect::to(return_target(pending.return_url.as_deref())))
}
