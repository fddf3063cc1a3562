use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// The event types the gateway handles explicitly. Everything else falls
/// through to registered extension hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    ChargeSucceeded,
    ChargeCaptured,
    ChargeFailed,
    ChargeRefunded,
    ChargeDisputeCreated,
    ChargeDisputeClosed,
    ReviewOpened,
    ReviewClosed,
    PaymentIntentSucceeded,
    PaymentIntentRequiresAction,
    Other,
}

impl WebhookEventKind {
    pub fn from_type_str(s: &str) -> Self {
        match s {
            "charge.succeeded" => WebhookEventKind::ChargeSucceeded,
            "charge.captured" => WebhookEventKind::ChargeCaptured,
            "charge.failed" => WebhookEventKind::ChargeFailed,
            "charge.refunded" => WebhookEventKind::ChargeRefunded,
            "charge.dispute.created" => WebhookEventKind::ChargeDisputeCreated,
            "charge.dispute.closed" => WebhookEventKind::ChargeDisputeClosed,
            "review.opened" => WebhookEventKind::ReviewOpened,
            "review.closed" => WebhookEventKind::ReviewClosed,
            "payment_intent.succeeded" => WebhookEventKind::PaymentIntentSucceeded,
            "payment_intent.requires_action" => WebhookEventKind::PaymentIntentRequiresAction,
            _ => WebhookEventKind::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub client_secret: Option<String>,
    pub capture_method: Option<String>,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    pub setup_future_usage: Option<String>,
    pub last_payment_error: Option<LastPaymentError>,
    #[serde(default)]
    pub charges: ChargeList,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    /// The most recent charge attempt, which carries the card details and
    /// capture state the order record is projected from.
    pub fn latest_charge(&self) -> Option<&Charge> {
        self.charges.data.last()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChargeList {
    pub data: Vec<Charge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub status: Option<String>,
    pub captured: Option<bool>,
    pub amount: Option<i64>,
    pub amount_captured: Option<i64>,
    pub amount_refunded: Option<i64>,
    pub currency: Option<String>,
    pub payment_intent: Option<String>,
    pub balance_transaction: Option<String>,
    pub payment_method_details: Option<PaymentMethodDetails>,
    #[serde(default)]
    pub refunds: RefundList,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodDetails {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub card: Option<CardDetails>,
    pub link: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub wallet: Option<WalletDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletDetails {
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RefundList {
    pub data: Vec<Refund>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub balance_transaction: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub status: Option<String>,
    pub payment_intent: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub id: String,
    pub reason: Option<String>,
    pub payment_intent: Option<String>,
    pub open: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub fee: Option<i64>,
    pub net: Option<i64>,
    pub currency: Option<String>,
    pub exchange_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub secret: Option<String>,
}
