pub mod appresult;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod identity;
pub mod model;
pub mod realtime;
pub mod routes;
pub mod service;
pub mod session;

use std::sync::Arc;

use axum::extract::FromRef;
use serde_json::Value;

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use realtime::Hub;
pub use service::ChatService;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub service: ChatService,
    pub clients: auth::Clients,
    pub config: Arc<Config>,
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
    fn get_opt_str_field(&self, field: &str) -> Option<String>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(anyhow::anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or(anyhow::anyhow!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(anyhow::anyhow!("expected {field} in {self}").into())
    }

    fn get_opt_str_field(&self, field: &str) -> Option<String> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn get_field_helpers() {
        let body = json!({"localId": "abc", "screenName": "  ", "nested": {"k": 1}, "n": 3});
        assert_eq!(body.get_str_field("localId").unwrap(), "abc");
        assert!(body.get_str_field("n").is_err());
        assert!(body.get_str_field("missing").is_err());
        assert!(body.get_obj_field("nested").is_ok());
        assert_eq!(body.get_opt_str_field("screenName"), None);
        assert_eq!(body.get_opt_str_field("localId").as_deref(), Some("abc"));
    }
}
