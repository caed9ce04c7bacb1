use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{auth::ClientProvider, identity::Identity, service::ServiceError, AppResult};

pub const PENDING_SIGN_IN: &str = "pending_sign_in";
pub const IDENTITY: &str = "identity";

/// Carried across the round trip to the identity provider; consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignIn {
    pub provider: ClientProvider,
    pub csrf_state: String,
    pub pkce_verifier: String,
    pub return_url: Option<String>,
}

pub async fn identity(session: &Session) -> AppResult<Identity> {
    match session.get::<Identity>(IDENTITY).await? {
        Some(identity) => Ok(identity),
        None => Err(ServiceError::Unauthorized)?,
    }
}

/// Only same-site paths are followed after sign-in or sign-out.
pub fn return_target(return_url: Option<&str>) -> &str {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => url,
        _ => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_target_stays_on_site() {
        assert_eq!(return_target(Some("/chat?x=1")), "/chat?x=1");
        assert_eq!(return_target(None), "/");
        assert_eq!(return_target(Some("https://evil.example/")), "/");
        assert_eq!(return_target(Some("//evil.example/")), "/");
        assert_eq!(return_target(Some("/\\evil.example")), "/");
    }
}
