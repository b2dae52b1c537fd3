use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use interface::QuoteError;
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::store::StoreError;

/// 요청 단위 에러. 모두 요청 경계에서 복구 가능하다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid symbol: {0}")]
    UnknownSymbol(String),

    #[error("can't afford")]
    InsufficientFunds,

    #[error("too many shares")]
    InsufficientShares,

    #[error("username already exists")]
    UsernameTaken,

    #[error(
        "password must be 6-20 characters combining uppercase, lowercase, numbers and symbols (@$!%*#?&)"
    )]
    WeakPassword,

    #[error("passwords must match")]
    PasswordMismatch,

    #[error("invalid username and/or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthorized,

    #[error("quote provider unavailable: {0}")]
    QuoteUnavailable(#[from] QuoteError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "InvalidInput",
            Error::UnknownSymbol(_) => "UnknownSymbol",
            Error::InsufficientFunds => "InsufficientFunds",
            Error::InsufficientShares => "InsufficientShares",
            Error::UsernameTaken => "UsernameTaken",
            Error::WeakPassword => "WeakPassword",
            Error::PasswordMismatch => "PasswordMismatch",
            Error::InvalidCredentials => "InvalidCredentials",
            Error::Unauthorized => "Unauthorized",
            Error::QuoteUnavailable(_) => "QuoteUnavailable",
            Error::StoreUnavailable(_) => "StoreUnavailable",
            Error::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_)
            | Error::UnknownSymbol(_)
            | Error::InsufficientFunds
            | Error::InsufficientShares
            | Error::UsernameTaken
            | Error::WeakPassword
            | Error::PasswordMismatch => StatusCode::BAD_REQUEST,
            Error::InvalidCredentials => StatusCode::FORBIDDEN,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::QuoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for Error {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { .. } => Error::InsufficientFunds,
            LedgerError::InsufficientShares { .. } => Error::InsufficientShares,
            other => Error::InvalidInput(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Rejected(rejection) => rejection.into(),
            StoreError::DuplicateUsername(_) => Error::UsernameTaken,
            // 토큰은 유효하지만 계정이 없는 경우
            StoreError::UserNotFound(_) => Error::Unauthorized,
            other => Error::StoreUnavailable(other),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        // 내부 장애 상세는 응답에 싣지 않는다
        let message = match &self {
            Error::QuoteUnavailable(_) => "quote provider unavailable".to_string(),
            Error::StoreUnavailable(_) => "store unavailable".to_string(),
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({ "error": self.kind(), "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_classes() {
        assert_eq!(Error::InsufficientFunds.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::WeakPassword.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::InvalidCredentials.status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::StoreUnavailable(StoreError::Conflict).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::QuoteUnavailable(QuoteError::Other("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Internal("hash".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = Error::Internal("argon2 params".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal");
        assert_eq!(body["message"], "internal error");
    }

    #[test]
    fn test_store_rejections_map_to_business_errors() {
        let err: Error = StoreError::Rejected(LedgerError::InsufficientFunds {
            required: dec!(500),
            available: dec!(100),
        })
        .into();
        assert!(matches!(err, Error::InsufficientFunds));

        let err: Error = StoreError::Rejected(LedgerError::InsufficientShares {
            requested: 5,
            held: 1,
        })
        .into();
        assert!(matches!(err, Error::InsufficientShares));

        let err: Error = StoreError::DuplicateUsername("alice".into()).into();
        assert!(matches!(err, Error::UsernameTaken));

        let err: Error = StoreError::Corrupt("bad row".into()).into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
