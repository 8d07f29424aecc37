//! HTTP-facing error type.
//!
//! Every handler returns `Result<T, AppError>`. The body is always
//! `{"error": "<message>"}`; server-side failures are logged and answered
//! with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::domain::aggregates::{CartError, OrderError, ProductError};
use crate::domain::value_objects::{EmailError, ImageError, PriceError, QuantityError};
use crate::services::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::EmptyCart
        | OrderError::NoShippingAddress
        | OrderError::UnknownStatus(_)
        | OrderError::TotalTooLarge
        | OrderError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
        OrderError::IllegalTransition { .. } | OrderError::PaymentExists | OrderError::PaymentNotPending => StatusCode::CONFLICT,
    }
}

fn cart_status(err: &CartError) -> StatusCode {
    match err {
        CartError::CartNotFound | CartError::ItemNotFound => StatusCode::NOT_FOUND,
        CartError::QuantityOverflow | CartError::AmountOverflow => StatusCode::BAD_REQUEST,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(err) => match err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                StoreError::Order(e) => order_status(e),
                StoreError::Cart(e) => cart_status(e),
                StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                StoreError::Corrupt(_) | StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Store(StoreError::Corrupt(_) | StoreError::Database(_)) => "internal server error".into(),
            Self::Store(StoreError::Unavailable(_)) => "service temporarily unavailable".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self { Self::Store(StoreError::Order(err)) }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self { Self::Store(StoreError::Cart(err)) }
}

impl From<ProductError> for AppError {
    fn from(err: ProductError) -> Self {
        match err {
            ProductError::NotOwner => Self::Forbidden(err.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::WeakPassword => Self::BadRequest(err.to_string()),
            AuthError::IdentityUnavailable => Self::Unavailable(err.to_string()),
            AuthError::PasswordHash | AuthError::BadSecret => Self::Internal(err.to_string()),
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::TokenExpired | AuthError::IdentityRejected(_) => {
                Self::Unauthorized(err.to_string())
            }
        }
    }
}

macro_rules! bad_request_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for AppError {
            fn from(err: $ty) -> Self { Self::BadRequest(err.to_string()) }
        })*
    };
}

bad_request_from!(EmailError, PriceError, QuantityError, ImageError);

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| *field);
        let message = fields
            .first()
            .and_then(|(field, errs)| {
                errs.first().map(|e| e.message.as_ref().map_or_else(|| format!("{field} is invalid"), |m| m.to_string()))
            })
            .unwrap_or_else(|| "invalid request".to_string());
        Self::BadRequest(message)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use rust_decimal::Decimal;
    use validator::Validate;

    use super::*;
    use crate::domain::aggregates::OrderStatus;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn status_codes() {
        assert_eq!(AppError::from(OrderError::EmptyCart).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(OrderError::NoShippingAddress).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(OrderError::AmountMismatch { given: Decimal::ONE, expected: Decimal::TEN }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(OrderError::IllegalTransition { from: OrderStatus::Delivered, to: OrderStatus::Pending }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::from(OrderError::PaymentExists).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from(OrderError::TotalTooLarge).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(CartError::AmountOverflow).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(PriceError::TooLarge).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(ProductError::NotOwner).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(ProductError::MissingName).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(CartError::ItemNotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(StoreError::NotFound("order")).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(StoreError::Conflict("dup".into())).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from(StoreError::Invalid("too wide".into())).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(StoreError::Unavailable("down".into())).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::Unauthorized("no".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(AuthError::TokenExpired).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(AuthError::WeakPassword).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(AuthError::IdentityUnavailable).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn body_carries_message() {
        let (status, body) = body_of(StoreError::NotFound("product").into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "product not found");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = body_of(StoreError::Corrupt("order 1 references missing address".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 6, message = "password must be at least 6 characters"))]
        password: String,
    }

    #[test]
    fn validation_message_is_surfaced() {
        let err = Sample { password: "123".into() }.validate().unwrap_err();
        match AppError::from(err) {
            AppError::BadRequest(msg) => assert_eq!(msg, "password must be at least 6 characters"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
