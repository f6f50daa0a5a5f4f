use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mockup_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Map a missing row to a not-found error naming `what`.
    pub fn missing(what: &'static str) -> impl FnOnce(StoreError) -> ServerError {
        move |e| match e {
            StoreError::NotFound => ServerError::NotFound(what),
            other => other.into(),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record"),
            conflict @ StoreError::FrameConflict(_) => {
                ServerError::BadRequest(conflict.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::InsufficientCredits => (StatusCode::PAYMENT_REQUIRED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::InsufficientCredits, StatusCode::PAYMENT_REQUIRED),
            (ServerError::NotFound("Project"), StatusCode::NOT_FOUND),
            (ServerError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ServerError::Internal("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_missing_names_the_entity() {
        let err = ServerError::missing("Frame")(StoreError::NotFound);
        assert_eq!(err.to_string(), "Frame not found");

        let err = ServerError::missing("Frame")(StoreError::Migration("x".into()));
        assert!(matches!(err, ServerError::Internal(_)));
    }

    #[test]
    fn test_frame_conflict_is_a_bad_request() {
        let err: ServerError = StoreError::FrameConflict("f1".into()).into();
        assert_eq!(err.to_string(), "Invalid request: Frame f1 belongs to another project");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ServerError::RateLimited.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
