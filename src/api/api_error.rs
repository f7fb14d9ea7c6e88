use crate::acme::{IssueError, StepError};
use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub(crate) struct APIError(anyhow::Error);

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::InvalidDomain(_) | Error::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        Error::RecordExists(_) => StatusCode::CONFLICT,
        Error::RecordNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rejection_status(err: &JsonRejection) -> StatusCode {
    match err {
        JsonRejection::JsonDataError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn issue_status(err: &IssueError) -> StatusCode {
    match err {
        IssueError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        IssueError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        IssueError::Step {
            source: StepError::Store(err),
            ..
        } => error_status(err),
        IssueError::Step { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let any_err = self.0;
        let status = if let Some(err) = any_err.downcast_ref::<Error>() {
            error_status(err)
        } else if let Some(err) = any_err.downcast_ref::<IssueError>() {
            issue_status(err)
        } else if let Some(err) = any_err.downcast_ref::<JsonRejection>() {
            rejection_status(err)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::warn!("API request failed: {any_err:#}");
        }
        let body = Json(json!({
            "error": format!("{any_err}"),
        }));
        (status, body).into_response()
    }
}

impl<E> From<E> for APIError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
