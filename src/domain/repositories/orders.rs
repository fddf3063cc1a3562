use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    entities::orders::OrderEntity,
    value_objects::enums::{order_statuses::OrderStatus, payment_modes::PaymentMode},
};

/// Keyed access to order records.
///
/// Implementations must apply each mutation against the current stored state
/// (re-read inside the call), since the redirect path and webhook deliveries
/// race over the same order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<OrderEntity>>;

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<OrderEntity>>;

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<OrderEntity>>;

    async fn save_intent_ref(
        &self,
        order_id: Uuid,
        intent_id: &str,
        client_secret: &str,
        mode: PaymentMode,
    ) -> Result<()>;

    async fn set_retry_count(&self, order_id: Uuid, retry_count: u32) -> Result<()>;

    async fn save_payment_source(
        &self,
        order_id: Uuid,
        source_id: Option<String>,
        customer_id: Option<String>,
    ) -> Result<()>;

    async fn set_transaction_id(&self, order_id: Uuid, charge_id: &str) -> Result<()>;

    async fn set_charge_captured(&self, order_id: Uuid, captured: bool) -> Result<()>;

    async fn set_total(&self, order_id: Uuid, total_minor: i64) -> Result<()>;

    /// Moves the order to `to` and appends `note`, but only when its current
    /// status is one of `allowed_from`. Returns whether the transition was
    /// applied; callers use a `false` return as their idempotence signal.
    async fn transition_status(
        &self,
        order_id: Uuid,
        allowed_from: &[OrderStatus],
        to: OrderStatus,
        note: &str,
    ) -> Result<bool>;

    async fn add_note(&self, order_id: Uuid, note: &str) -> Result<()>;

    /// Reduces stock for the order unless the stock-reduced flag is already
    /// set. Returns whether a reduction happened.
    async fn reduce_stock_once(&self, order_id: Uuid) -> Result<bool>;

    /// Records balance fee/net data. With `accumulate` the deltas add onto
    /// the order's running totals (refunds); otherwise they replace them.
    async fn record_balance(
        &self,
        order_id: Uuid,
        fee_minor: i64,
        net_minor: i64,
        currency: &str,
        accumulate: bool,
    ) -> Result<()>;

    async fn save_refund_ref(
        &self,
        order_id: Uuid,
        refund_id: &str,
        refund_status: &str,
    ) -> Result<()>;

    async fn set_webhook_lock(&self, order_id: Uuid, at: Option<DateTime<Utc>>) -> Result<()>;

    async fn set_status_before_dispute(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<()>;

    async fn set_status_before_review(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<()>;
}
