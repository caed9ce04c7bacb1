use std::fmt;

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppResult, GetField};

type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    /// Enough to read the profile fields the display name is built from.
    pub fn scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Google => &["openid", "email", "profile"],
            Github => &["read:user"],
        }
    }

    fn key(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone)]
pub struct Clients {
    pub(crate) firebase_idpurl: String,
    google_client: Option<HappyClient>,
    github_client: Option<HappyClient>,
}

impl Clients {
    /// `json` is the client secrets file: `{"firebase": {"apikey"}, "google"?: {...}, "github"?: {...}}`.
    pub fn from_json(json: Value, public_url: &str) -> AppResult<Clients> {
        let firebase_idpurl = format!(
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp?key={}",
            json.get_obj_field("firebase")?.get_str_field("apikey")?
        );

        let client = |provider: ClientProvider| -> AppResult<Option<HappyClient>> {
            let Some(json) = json.get(provider.key()) else {
                return Ok(None);
            };
            let (auth_url, token_url) = provider.endpoints();
            let client_id = ClientId::new(json.get_str_field("client_id")?);
            let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);
            let redirect_url = RedirectUrl::new(format!("{public_url}/lockin/{}", provider.key()))?;

            Ok(Some(
                BasicClient::new(client_id)
                .set_client_secret(client_secret)
                .set_auth_uri(AuthUrl::new(auth_url.to_owned())?)
                .set_token_uri(TokenUrl::new(token_url.to_owned())?)
                .set_redirect_uri(redirect_url)
            ))
        };

        Ok(
            Clients {
                google_client: client(ClientProvider::Google)?,
                github_client: client(ClientProvider::Github)?,
                firebase_idpurl,
            }
        )
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<HappyClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or(anyhow::anyhow!("OAuth provider {provider} keys not supplied").into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn clients_from_secrets_file() {
        let clients = Clients::from_json(
            json!({
                "firebase": {"apikey": "k"},
                "github": {"client_id": "id", "client_secret": "secret"},
            }),
            "http://localhost:8080",
        )
        .unwrap();

        assert!(clients.firebase_idpurl.ends_with("?key=k"));
        assert!(clients.get_client(ClientProvider::Github).is_ok());
        assert!(clients.get_client(ClientProvider::Google).is_err());
    }

    #[test]
    fn firebase_key_is_required() {
        assert!(Clients::from_json(json!({}), "http://localhost:8080").is_err());
    }

    #[test]
    fn provider_path_segment() {
        let provider: ClientProvider = serde_json::from_value(json!("github")).unwrap();
        assert_eq!(provider, ClientProvider::Github);
        assert_eq!(provider.id(), "github.com");
    }
}
