use std::sync::Arc;

use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;

use crate::{
    config::config_model::StripeSettings,
    domain::value_objects::enums::{
        capture_methods::CaptureMethod, payment_modes::PaymentMode,
    },
};

use super::{
    errors::{StripeError, StripeErrorDetails},
    types::{
        BalanceTransaction, Customer, PaymentIntent, Refund, StripeEvent, WebhookEndpoint,
    },
};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Event types subscribed when the gateway registers its own webhook
/// endpoint.
pub const WEBHOOK_ENABLED_EVENTS: &[&str] = &[
    "charge.succeeded",
    "charge.captured",
    "charge.failed",
    "charge.refunded",
    "charge.dispute.created",
    "charge.dispute.closed",
    "review.opened",
    "review.closed",
    "payment_intent.succeeded",
    "payment_intent.requires_action",
];

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

/// Stripe client built on reqwest. Every call names the mode it runs in so a
/// webhook delivered for one mode never reaches the other mode's account.
pub struct StripeClient {
    http: reqwest::Client,
    settings: Arc<StripeSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateIntentParams {
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub customer: Option<String>,
    pub capture_method: CaptureMethod,
    pub setup_future_usage: Option<String>,
    pub description: Option<String>,
    pub statement_descriptor: Option<String>,
    /// Stamped into metadata and checked on inbound webhooks.
    pub site_url: String,
    pub order_id: String,
    pub order_key: String,
}

impl CreateIntentParams {
    /// Form body with empty optionals stripped; Stripe rejects blank values
    /// for fields like `customer`.
    fn to_form(&self) -> Vec<(String, String)> {
        let mut body: Vec<(String, String)> = vec![
            ("amount".to_string(), self.amount_minor.to_string()),
            ("currency".to_string(), self.currency.to_lowercase()),
            (
                "capture_method".to_string(),
                self.capture_method.as_str().to_string(),
            ),
            ("metadata[site_url]".to_string(), self.site_url.clone()),
            ("metadata[order_id]".to_string(), self.order_id.clone()),
            ("metadata[order_key]".to_string(), self.order_key.clone()),
        ];

        let optionals = [
            ("payment_method", &self.payment_method),
            ("customer", &self.customer),
            ("setup_future_usage", &self.setup_future_usage),
            ("description", &self.description),
            ("statement_descriptor", &self.statement_descriptor),
        ];
        for (key, value) in optionals {
            if let Some(value) = value {
                if !value.is_empty() {
                    body.push((key.to_string(), value.clone()));
                }
            }
        }

        body
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateRefundParams {
    /// Either an intent id (`pi_...`) or a raw charge id.
    pub target_id: String,
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl CreateRefundParams {
    fn to_form(&self) -> Vec<(String, String)> {
        let param = if self.target_id.starts_with("pi_") {
            "payment_intent"
        } else {
            "charge"
        };
        let mut body: Vec<(String, String)> =
            vec![(param.to_string(), self.target_id.clone())];

        if let Some(amount) = self.amount_minor {
            body.push(("amount".to_string(), amount.to_string()));
        }
        if let Some(reason) = &self.reason {
            if !reason.is_empty() {
                body.push(("reason".to_string(), reason.clone()));
            }
        }

        // Fraud signals of the requester, forwarded for Stripe Radar.
        let signals = [
            ("metadata[client_ip]", &self.client_ip),
            ("metadata[user_agent]", &self.user_agent),
            ("metadata[referer]", &self.referer),
        ];
        for (key, value) in signals {
            if let Some(value) = value {
                if !value.is_empty() {
                    body.push((key.to_string(), value.clone()));
                }
            }
        }

        body
    }
}

impl StripeClient {
    pub fn new(settings: Arc<StripeSettings>) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn secret_key(&self, mode: PaymentMode) -> Result<&str, StripeError> {
        self.settings
            .secret_key_for(mode)
            .map_err(|err| StripeError::Protocol(err.to_string()))
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, StripeError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_default();

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.type_,
            stripe_error_code = ?details.code,
            stripe_decline_code = ?details.decline_code,
            stripe_error_message = ?details.message,
            context = %context,
            "stripe api request failed"
        );

        Err(StripeError::Api(details))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        mode: PaymentMode,
        path: &str,
        context: &str,
    ) -> Result<T, StripeError> {
        let resp = self
            .http
            .get(format!("{API_BASE}/{path}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key(mode)?))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, context).await?;

        Ok(resp.json().await?)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        mode: PaymentMode,
        path: &str,
        body: &[(String, String)],
        idempotency_key: Option<&str>,
        context: &str,
    ) -> Result<T, StripeError> {
        let mut req = self
            .http
            .post(format!("{API_BASE}/{path}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key(mode)?))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req.form(body).send().await?;
        let resp = Self::ensure_success(resp, context).await?;

        Ok(resp.json().await?)
    }

    pub async fn create_payment_intent(
        &self,
        mode: PaymentMode,
        params: &CreateIntentParams,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeError> {
        // https://stripe.com/docs/api/payment_intents/create
        self.post_form(
            mode,
            "payment_intents",
            &params.to_form(),
            Some(idempotency_key),
            "create payment intent",
        )
        .await
    }

    pub async fn retrieve_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.get_json(
            mode,
            &format!("payment_intents/{intent_id}"),
            "retrieve payment intent",
        )
        .await
    }

    pub async fn capture_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<PaymentIntent, StripeError> {
        // https://stripe.com/docs/api/payment_intents/capture
        let mut body: Vec<(String, String)> = Vec::new();
        if let Some(amount) = amount_minor {
            body.push(("amount_to_capture".to_string(), amount.to_string()));
        }

        self.post_form(
            mode,
            &format!("payment_intents/{intent_id}/capture"),
            &body,
            None,
            "capture payment intent",
        )
        .await
    }

    pub async fn cancel_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.post_form(
            mode,
            &format!("payment_intents/{intent_id}/cancel"),
            &[],
            None,
            "cancel payment intent",
        )
        .await
    }

    pub async fn create_refund(
        &self,
        mode: PaymentMode,
        params: &CreateRefundParams,
    ) -> Result<Refund, StripeError> {
        // https://stripe.com/docs/api/refunds/create
        self.post_form(mode, "refunds", &params.to_form(), None, "create refund")
            .await
    }

    pub async fn create_customer(
        &self,
        mode: PaymentMode,
        email: Option<&str>,
        description: &str,
    ) -> Result<Customer, StripeError> {
        let mut body: Vec<(String, String)> =
            vec![("description".to_string(), description.to_string())];
        if let Some(email) = email {
            if !email.is_empty() {
                body.push(("email".to_string(), email.to_string()));
            }
        }

        self.post_form(mode, "customers", &body, None, "create customer")
            .await
    }

    pub async fn retrieve_customer(
        &self,
        mode: PaymentMode,
        customer_id: &str,
    ) -> Result<Customer, StripeError> {
        self.get_json(
            mode,
            &format!("customers/{customer_id}"),
            "retrieve customer",
        )
        .await
    }

    pub async fn update_customer_description(
        &self,
        mode: PaymentMode,
        customer_id: &str,
        description: &str,
    ) -> Result<Customer, StripeError> {
        let body = vec![("description".to_string(), description.to_string())];

        self.post_form(
            mode,
            &format!("customers/{customer_id}"),
            &body,
            None,
            "update customer",
        )
        .await
    }

    pub async fn retrieve_balance_transaction(
        &self,
        mode: PaymentMode,
        txn_id: &str,
    ) -> Result<BalanceTransaction, StripeError> {
        self.get_json(
            mode,
            &format!("balance_transactions/{txn_id}"),
            "retrieve balance transaction",
        )
        .await
    }

    pub async fn create_webhook_endpoint(
        &self,
        mode: PaymentMode,
        url: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        let mut body: Vec<(String, String)> = vec![("url".to_string(), url.to_string())];
        for (idx, event) in WEBHOOK_ENABLED_EVENTS.iter().enumerate() {
            body.push((format!("enabled_events[{idx}]"), event.to_string()));
        }

        self.post_form(mode, "webhook_endpoints", &body, None, "create webhook endpoint")
            .await
    }

    pub async fn retrieve_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        self.get_json(
            mode,
            &format!("webhook_endpoints/{endpoint_id}"),
            "retrieve webhook endpoint",
        )
        .await
    }

    pub async fn delete_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<(), StripeError> {
        let resp = self
            .http
            .delete(format!("{API_BASE}/webhook_endpoints/{endpoint_id}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key(mode)?))
            .send()
            .await?;
        Self::ensure_success(resp, "delete webhook endpoint").await?;

        Ok(())
    }
}

/// Verifies the Stripe-Signature header against `secret` and parses the
/// event. https://stripe.com/docs/webhooks/signatures
pub fn construct_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<StripeEvent, StripeError> {
    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("t=") {
            timestamp = Some(rest);
        } else if let Some(rest) = part.strip_prefix("v1=") {
            signature = Some(rest);
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| StripeError::Signature("missing timestamp in stripe-signature".into()))?;
    let signature = signature
        .ok_or_else(|| StripeError::Signature("missing v1 in stripe-signature".into()))?;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| StripeError::Signature(err.to_string()))?;
    mac.update(signed_payload.as_bytes());
    let expected = mac.finalize().into_bytes();
    let provided =
        hex::decode(signature).map_err(|err| StripeError::Signature(err.to_string()))?;

    if expected[..] != provided[..] {
        return Err(StripeError::Signature("signature mismatch".into()));
    }

    serde_json::from_slice(payload).map_err(|err| StripeError::Protocol(err.to_string()))
}

/// Reads the livemode flag from the raw payload without verifying it. The
/// flag only selects which shared secret to verify against; verification
/// itself still decides whether the event is accepted.
pub fn peek_livemode(payload: &[u8]) -> Option<bool> {
    #[derive(Deserialize)]
    struct LivemodePeek {
        livemode: Option<bool>,
    }

    serde_json::from_slice::<LivemodePeek>(payload)
        .ok()
        .and_then(|peek| peek.livemode)
}
