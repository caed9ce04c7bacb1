use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Serialize;

use crate::service::AccountAdmin;

const ACCOUNTS_UPDATE_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:update";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DisableRequest<'a> {
    local_id: &'a str,
    disable_user: bool,
}

/// Disables accounts through the identity toolkit admin API. Requires an
/// OAuth access token for a service account with user-management rights.
pub struct FirebaseAccounts {
    http: reqwest::Client,
    token: Option<String>,
}

impl FirebaseAccounts {
    pub fn new(token: Option<String>) -> FirebaseAccounts {
        FirebaseAccounts {
            http: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl AccountAdmin for FirebaseAccounts {
    async fn disable_account(&self, user_id: &str) -> anyhow::Result<()> {
        let token = self
            .token
            .as_deref()
            .ok_or(anyhow!("FIREBASE_ADMIN_TOKEN is not configured"))?;

        self.http
            .post(ACCOUNTS_UPDATE_URL)
            .bearer_auth(token)
            .json(&DisableRequest { local_id: user_id, disable_user: true })
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("disabling {user_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(DisableRequest { local_id: "abc", disable_user: true }).unwrap();
        assert_eq!(body, serde_json::json!({"localId": "abc", "disableUser": true}));
    }

    #[tokio::test]
    async fn missing_token_fails_without_network() {
        let err = FirebaseAccounts::new(None).disable_account("abc").await.unwrap_err();
        assert!(err.to_string().contains("FIREBASE_ADMIN_TOKEN"));
    }
}
