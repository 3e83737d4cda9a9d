use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("сервер {0} не найден")]
    NotFound(u64),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("некорректный запрос: {0}")]
    InvalidArgument(String),
    #[error("ошибка хранилища: {0}")]
    Storage(String),
    #[error("ошибка удалённого выполнения: {0}")]
    Transport(String),
}

impl MonitorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidOperation(_) | MonitorError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            MonitorError::Storage(_) | MonitorError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "внутренняя ошибка сервера".to_string()
        } else {
            self.to_string()
        };
        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(e: serde_json::Error) -> Self {
        MonitorError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::Storage(e.to_string())
    }
}
