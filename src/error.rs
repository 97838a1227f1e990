use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised by request handling and the services it calls.
#[derive(Error, Debug)]
pub enum AppError {
    /// A submitted value does not follow the expected encoding.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A file has selected columns but no column to join on.
    #[error("No join column selected for file {file_id}")]
    MissingJoinColumn { file_id: String },

    /// A form failed validation; the message is shown to the user.
    #[error("{0}")]
    Validation(String),

    /// A collaborator API answered with something other than `SUCCESS`.
    #[error("{message}")]
    Upstream { message: String },

    #[error("Not logged in")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload could not be read: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mail error: {0}")]
    Mail(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedInput(_)
            | AppError::MissingJoinColumn { .. }
            | AppError::Validation(_)
            | AppError::Multipart(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message is safe and useful to show in a flash banner.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::MalformedInput(_)
                | AppError::MissingJoinColumn { .. }
                | AppError::Validation(_)
                | AppError::Upstream { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}
