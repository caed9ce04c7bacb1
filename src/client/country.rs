use serde::Deserialize;

use crate::model::CountryCode;

const IPINFO_URL: &str = "https://ipinfo.io/json";

#[derive(Debug, thiserror::Error)]
pub enum CountryError {
    #[error("lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lookup returned no usable country ({0:?})")]
    Missing(Option<String>),
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    #[serde(default)]
    country: Option<String>,
}

impl IpInfo {
    fn country_code(self) -> Result<CountryCode, CountryError> {
        self.country
            .as_deref()
            .and_then(CountryCode::parse)
            .ok_or(CountryError::Missing(self.country))
    }
}

/// One-shot IP geolocation of the caller.
#[derive(Debug, Clone)]
pub struct CountryResolver {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl CountryResolver {
    pub fn new(http: reqwest::Client, token: Option<String>) -> CountryResolver {
        CountryResolver {
            http,
            url: IPINFO_URL.to_owned(),
            token,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> CountryResolver {
        self.url = url.into();
        self
    }

    pub async fn lookup(&self) -> Result<CountryCode, CountryError> {
        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let info: IpInfo = request.send().await?.error_for_status()?.json().await?;
        info.country_code()
    }

    /// Unknown on any failure; messages are still sent without a country.
    pub async fn resolve(&self) -> Option<CountryCode> {
        match self.lookup().await {
            Ok(code) => {
                tracing::debug!(%code, "country resolved");
                Some(code)
            }
            Err(err) => {
                tracing::warn!("country lookup failed: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipinfo_body() {
        let info: IpInfo = serde_json::from_str(r#"{"ip":"1.2.3.4","country":"de","city":"Berlin"}"#).unwrap();
        assert_eq!(info.country_code().unwrap().as_str(), "DE");
    }

    #[test]
    fn missing_or_bogus_country_is_an_error() {
        let info: IpInfo = serde_json::from_str(r#"{"ip":"1.2.3.4"}"#).unwrap();
        assert!(matches!(info.country_code(), Err(CountryError::Missing(None))));

        let info: IpInfo = serde_json::from_str(r#"{"country":"Germany"}"#).unwrap();
        assert!(matches!(info.country_code(), Err(CountryError::Missing(Some(_)))));
    }

    #[tokio::test]
    async fn unreachable_service_resolves_to_unknown() {
        let resolver = CountryResolver::new(reqwest::Client::new(), None)
            .with_url("http://127.0.0.1:9/json");
        assert_eq!(resolver.resolve().await, None);
    }
}
