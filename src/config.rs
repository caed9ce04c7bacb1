use std::{collections::HashSet, path::PathBuf};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    /// Origin the OAuth providers redirect back to.
    pub public_url: String,
    pub client_secrets: PathBuf,
    /// Identity-provider ids granted the admin claim at sign-in.
    pub admin_user_ids: HashSet<String>,
    pub firebase_admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            listen_addr: dotenv::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            public_url: dotenv::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_owned(),
            client_secrets: dotenv::var("CLIENT_SECRETS")
                .unwrap_or_else(|_| "client_secret.json".into())
                .into(),
            admin_user_ids: parse_list(&dotenv::var("ADMIN_USER_IDS").unwrap_or_default()),
            firebase_admin_token: dotenv::var("FIREBASE_ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

pub(crate) fn parse_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}
