use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    order_statuses::OrderStatus, payment_modes::PaymentMode,
};

/// A storefront order as seen by the payment layer.
///
/// The checkout flow creates orders; this system owns them exclusively while
/// a payment is being processed. Payment bookkeeping lives in typed fields
/// rather than an associative metadata bag.
#[derive(Debug, Clone)]
pub struct OrderEntity {
    pub id: Uuid,
    /// Human-facing order key, used in idempotency keys and return URLs.
    pub order_key: String,
    pub total_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: String,
    pub customer_email: Option<String>,

    pub intent_id: Option<String>,
    pub client_secret: Option<String>,
    pub customer_id: Option<String>,
    pub source_id: Option<String>,
    pub payment_mode: Option<PaymentMode>,
    pub retry_count: u32,

    pub transaction_id: Option<String>,
    pub charge_captured: bool,
    pub stock_reduced: bool,

    pub refund_id: Option<String>,
    pub refund_status: Option<String>,
    /// Running totals across all balance transactions seen for this order.
    /// Refund deltas accumulate; they never overwrite.
    pub fee_minor: i64,
    pub net_minor: i64,
    pub balance_currency: Option<String>,

    pub status_before_dispute: Option<OrderStatus>,
    pub status_before_review: Option<OrderStatus>,
    /// Set while an admin-side refund is in flight so the refund webhook
    /// does not double-process it.
    pub webhook_lock_at: Option<DateTime<Utc>>,

    /// Subscription renewals are excluded from the charge-failure path.
    pub is_renewal: bool,

    /// Append-only audit trail.
    pub notes: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderEntity {
    pub fn new(
        id: Uuid,
        order_key: impl Into<String>,
        total_minor: i64,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        OrderEntity {
            id,
            order_key: order_key.into(),
            total_minor,
            currency: currency.into(),
            status: OrderStatus::Pending,
            payment_method: "card".to_string(),
            customer_email: None,
            intent_id: None,
            client_secret: None,
            customer_id: None,
            source_id: None,
            payment_mode: None,
            retry_count: 0,
            transaction_id: None,
            charge_captured: false,
            stock_reduced: false,
            refund_id: None,
            refund_status: None,
            fee_minor: 0,
            net_minor: 0,
            balance_currency: None,
            status_before_dispute: None,
            status_before_review: None,
            webhook_lock_at: None,
            is_renewal: false,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status.is_paid()
    }
}
