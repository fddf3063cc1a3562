use std::{collections::HashMap, sync::Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    entities::orders::OrderEntity,
    repositories::orders::OrderRepository,
    value_objects::enums::{order_statuses::OrderStatus, payment_modes::PaymentMode},
};

/// Keyed in-memory order store.
///
/// Every mutator re-reads the stored entity under the map lock, so two
/// handlers interleaving over the same order cannot lose updates; the status
/// guard in `transition_status` is evaluated against current state, not a
/// caller's stale copy.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<Uuid, OrderEntity>>,
    stock_reductions: Mutex<HashMap<Uuid, u32>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: OrderEntity) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    /// How many times stock was actually reduced for the order. Replay-safe
    /// flows must keep this at one.
    pub fn stock_reduction_count(&self, order_id: Uuid) -> u32 {
        self.stock_reductions
            .lock()
            .unwrap()
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }

    fn mutate<T>(
        &self,
        order_id: Uuid,
        f: impl FnOnce(&mut OrderEntity) -> T,
    ) -> Result<T> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| anyhow!("order {order_id} not found"))?;
        let result = f(order);
        order.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<OrderEntity>> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<OrderEntity>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<OrderEntity>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.transaction_id.as_deref() == Some(charge_id))
            .cloned())
    }

    async fn save_intent_ref(
        &self,
        order_id: Uuid,
        intent_id: &str,
        client_secret: &str,
        mode: PaymentMode,
    ) -> Result<()> {
        self.mutate(order_id, |order| {
            order.intent_id = Some(intent_id.to_string());
            order.client_secret = Some(client_secret.to_string());
            order.payment_mode = Some(mode);
        })
    }

    async fn set_retry_count(&self, order_id: Uuid, retry_count: u32) -> Result<()> {
        self.mutate(order_id, |order| order.retry_count = retry_count)
    }

    async fn save_payment_source(
        &self,
        order_id: Uuid,
        source_id: Option<String>,
        customer_id: Option<String>,
    ) -> Result<()> {
        self.mutate(order_id, |order| {
            if source_id.is_some() {
                order.source_id = source_id;
            }
            if customer_id.is_some() {
                order.customer_id = customer_id;
            }
        })
    }

    async fn set_transaction_id(&self, order_id: Uuid, charge_id: &str) -> Result<()> {
        self.mutate(order_id, |order| {
            order.transaction_id = Some(charge_id.to_string())
        })
    }

    async fn set_charge_captured(&self, order_id: Uuid, captured: bool) -> Result<()> {
        self.mutate(order_id, |order| order.charge_captured = captured)
    }

    async fn set_total(&self, order_id: Uuid, total_minor: i64) -> Result<()> {
        self.mutate(order_id, |order| order.total_minor = total_minor)
    }

    async fn transition_status(
        &self,
        order_id: Uuid,
        allowed_from: &[OrderStatus],
        to: OrderStatus,
        note: &str,
    ) -> Result<bool> {
        self.mutate(order_id, |order| {
            if !allowed_from.contains(&order.status) {
                return false;
            }
            order.status = to;
            order.notes.push(note.to_string());
            true
        })
    }

    async fn add_note(&self, order_id: Uuid, note: &str) -> Result<()> {
        self.mutate(order_id, |order| order.notes.push(note.to_string()))
    }

    async fn reduce_stock_once(&self, order_id: Uuid) -> Result<bool> {
        let reduced = self.mutate(order_id, |order| {
            if order.stock_reduced {
                return false;
            }
            order.stock_reduced = true;
            true
        })?;
        if reduced {
            *self
                .stock_reductions
                .lock()
                .unwrap()
                .entry(order_id)
                .or_insert(0) += 1;
        }
        Ok(reduced)
    }

    async fn record_balance(
        &self,
        order_id: Uuid,
        fee_minor: i64,
        net_minor: i64,
        currency: &str,
        accumulate: bool,
    ) -> Result<()> {
        self.mutate(order_id, |order| {
            if accumulate {
                order.fee_minor += fee_minor;
                order.net_minor += net_minor;
            } else {
                order.fee_minor = fee_minor;
                order.net_minor = net_minor;
            }
            if !currency.is_empty() {
                order.balance_currency = Some(currency.to_string());
            }
        })
    }

    async fn save_refund_ref(
        &self,
        order_id: Uuid,
        refund_id: &str,
        refund_status: &str,
    ) -> Result<()> {
        self.mutate(order_id, |order| {
            order.refund_id = Some(refund_id.to_string());
            order.refund_status = Some(refund_status.to_string());
        })
    }

    async fn set_webhook_lock(&self, order_id: Uuid, at: Option<DateTime<Utc>>) -> Result<()> {
        self.mutate(order_id, |order| order.webhook_lock_at = at)
    }

    async fn set_status_before_dispute(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<()> {
        self.mutate(order_id, |order| order.status_before_dispute = status)
    }

    async fn set_status_before_review(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<()> {
        self.mutate(order_id, |order| order.status_before_review = status)
    }
}
