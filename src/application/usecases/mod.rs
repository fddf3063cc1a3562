use thiserror::Error;

use crate::infrastructure::stripe::{
    errors::{StripeError, StripeErrorDetails, StripeErrorKind},
    types::LastPaymentError,
};

pub mod admin;
pub mod checkout;
pub mod reconcile;
pub mod refunds;
pub mod webhook;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment credentials are not configured: {0}")]
    ConfigurationMissing(String),
    #[error("invalid payment request: {0}")]
    Validation(String),
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("invalid webhook payload: {0}")]
    InvalidWebhook(String),
    #[error("webhook signature verification failed")]
    SignatureInvalid,
    #[error("order not found")]
    OrderNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::ConfigurationMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::Declined(_) => StatusCode::PAYMENT_REQUIRED,
            PaymentError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
            PaymentError::SignatureInvalid => StatusCode::BAD_REQUEST,
            PaymentError::OrderNotFound => StatusCode::NOT_FOUND,
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a processor failure onto the caller-facing taxonomy. Declines and
    /// invalid requests carry the shopper-facing localized text.
    pub fn from_stripe(err: StripeError) -> Self {
        match err.kind() {
            StripeErrorKind::CardDeclined => PaymentError::Declined(err.localized_message()),
            StripeErrorKind::InvalidRequest => PaymentError::Validation(err.localized_message()),
            _ => PaymentError::Internal(anyhow::anyhow!(err)),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, PaymentError>;

/// Shopper-facing text for an intent's last payment error.
pub(crate) fn localized_last_error(err: &LastPaymentError) -> String {
    StripeError::Api(StripeErrorDetails {
        type_: err.type_.clone(),
        code: err.code.clone(),
        decline_code: err.decline_code.clone(),
        message: err.message.clone(),
        param: None,
    })
    .localized_message()
}
