use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};

use crate::service::ServiceError;

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<ServiceError>() {
            Some(ServiceError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Some(ServiceError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Some(ServiceError::Invalid(_)) => StatusCode::BAD_REQUEST,
            Some(ServiceError::Provider(_)) => StatusCode::BAD_GATEWAY,
            Some(ServiceError::Storage(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{:#}\n{}", self.0, self.0.backtrace());
        } else {
            tracing::debug!(%status, "{:#}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
