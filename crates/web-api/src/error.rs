use application::{ApplicationError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.body.error
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        let status = match &error {
            DomainError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            DomainError::UserNotFound
            | DomainError::RoomNotFound
            | DomainError::MessageNotFound => StatusCode::NOT_FOUND,
            DomainError::UserAlreadyExists | DomainError::DuplicateMessage => {
                StatusCode::CONFLICT
            }
            DomainError::InsufficientPermissions => StatusCode::FORBIDDEN,
        };
        ApiError::new(status, error.to_string())
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(err) => err.into(),
            AppErr::RateLimited(err) => {
                tracing::debug!(reason = %err, "请求被限流");
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, err.to_string())
            }
            AppErr::Authentication(message) => ApiError::unauthorized(message),
            AppErr::Authorization(message) => ApiError::forbidden(message),
            AppErr::Store(StoreError::Timeout { operation }) => {
                tracing::error!(operation, "存储操作超时");
                ApiError::internal_server_error("storage timeout")
            }
            AppErr::Store(err) => {
                tracing::error!(error = %err, "存储操作失败");
                ApiError::internal_server_error("storage error")
            }
            AppErr::Password(err) => {
                tracing::error!(error = %err, "密码处理失败");
                ApiError::internal_server_error("password error")
            }
            AppErr::Infrastructure(message) => {
                tracing::error!(error = %message, "基础设施错误");
                ApiError::internal_server_error(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::RateLimitError;

    #[test]
    fn domain_errors_map_to_conventional_statuses() {
        let cases = [
            (DomainError::invalid_argument("username", "too short"), StatusCode::BAD_REQUEST),
            (DomainError::UserNotFound, StatusCode::NOT_FOUND),
            (DomainError::RoomNotFound, StatusCode::NOT_FOUND),
            (DomainError::MessageNotFound, StatusCode::NOT_FOUND),
            (DomainError::UserAlreadyExists, StatusCode::CONFLICT),
            (DomainError::DuplicateMessage, StatusCode::CONFLICT),
            (DomainError::InsufficientPermissions, StatusCode::FORBIDDEN),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn rate_limit_keeps_reason() {
        let error: ApiError = ApplicationError::from(RateLimitError::MinInterval {
            interval_ms: 2000,
        })
        .into();
        assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(error.message().contains("2000ms"));
    }

    #[test]
    fn store_failures_are_internal() {
        let error: ApiError =
            ApplicationError::from(StoreError::Timeout { operation: "GET" }).into();
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let error: ApiError = ApplicationError::authorization("not a member").into();
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }
}
