use serde::Deserialize;
use thiserror::Error;

/// Error envelope body returned by the Stripe API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeErrorDetails {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
    pub param: Option<String>,
}

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("stripe api error: {}", .0.message.as_deref().unwrap_or("unknown"))]
    Api(StripeErrorDetails),
    #[error("stripe request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("webhook signature rejected: {0}")]
    Signature(String),
    #[error("unexpected stripe response: {0}")]
    Protocol(String),
}

/// Stable classification of Stripe failures, derived from `{type, code}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeErrorKind {
    CardDeclined,
    InvalidRequest,
    Authentication,
    IdempotencyConflict,
    RateLimit,
    Connection,
    ApiError,
    Other,
}

impl StripeError {
    pub fn kind(&self) -> StripeErrorKind {
        match self {
            StripeError::Network(_) => StripeErrorKind::Connection,
            StripeError::Signature(_) | StripeError::Protocol(_) => StripeErrorKind::Other,
            StripeError::Api(details) => match details.type_.as_deref() {
                Some("card_error") => StripeErrorKind::CardDeclined,
                Some("idempotency_error") => StripeErrorKind::IdempotencyConflict,
                Some("rate_limit_error") => StripeErrorKind::RateLimit,
                Some("invalid_request_error") => StripeErrorKind::InvalidRequest,
                Some("authentication_error") => StripeErrorKind::Authentication,
                Some("api_connection_error") => StripeErrorKind::Connection,
                Some("api_error") => StripeErrorKind::ApiError,
                _ => StripeErrorKind::Other,
            },
        }
    }

    /// Whether a fresh attempt with a regenerated idempotency key is worth
    /// making. Declines, invalid requests and invalid mandates are final for
    /// this attempt.
    pub fn is_retryable(&self) -> bool {
        if let StripeError::Api(details) = self {
            if details.code.as_deref() == Some("payment_intent_mandate_invalid") {
                return false;
            }
        }
        matches!(
            self.kind(),
            StripeErrorKind::IdempotencyConflict
                | StripeErrorKind::RateLimit
                | StripeErrorKind::Connection
                | StripeErrorKind::ApiError
        )
    }

    /// An idempotency key replayed with different parameters. The caller
    /// bumps the key suffix and retries exactly once.
    pub fn is_idempotency_parameter_mismatch(&self) -> bool {
        match self {
            StripeError::Api(details) => {
                self.kind() == StripeErrorKind::IdempotencyConflict
                    || details
                        .message
                        .as_deref()
                        .is_some_and(|m| m.contains("same parameters"))
            }
            _ => false,
        }
    }

    /// Shopper-facing text. Declines map from the decline code, other card
    /// errors from the error code; unmapped codes fall back to Stripe's raw
    /// message.
    pub fn localized_message(&self) -> String {
        let details = match self {
            StripeError::Api(details) => details,
            StripeError::Network(_) => {
                return "We could not reach the payment processor. Please try again.".to_string();
            }
            other => return other.to_string(),
        };

        let key = if details.code.as_deref() == Some("card_declined") {
            details.decline_code.as_deref()
        } else {
            details.code.as_deref()
        };

        let mapped = key.and_then(|key| match key {
            "generic_decline" => Some("Your card was declined."),
            "insufficient_funds" => Some("Your card has insufficient funds."),
            "lost_card" => Some("Your card was declined. Please contact your card issuer."),
            "stolen_card" => Some("Your card was declined. Please contact your card issuer."),
            "card_velocity_exceeded" => {
                Some("Your card was declined for making repeated attempts too frequently.")
            }
            "expired_card" => Some("Your card has expired."),
            "incorrect_cvc" | "invalid_cvc" => Some("Your card's security code is incorrect."),
            "incorrect_number" | "invalid_number" => Some("Your card number is incorrect."),
            "invalid_expiry_month" => Some("Your card's expiration month is invalid."),
            "invalid_expiry_year" => Some("Your card's expiration year is invalid."),
            "processing_error" => {
                Some("An error occurred while processing your card. Please try again.")
            }
            "authentication_required" => {
                Some("This transaction requires authentication. Please try again.")
            }
            "email_invalid" => Some("Invalid email address. Please check and try again."),
            "amount_too_small" => Some("The order total is below the minimum chargeable amount."),
            _ => None,
        });

        match mapped {
            Some(text) => text.to_string(),
            None => details
                .message
                .clone()
                .unwrap_or_else(|| "An unexpected payment error occurred.".to_string()),
        }
    }
}
