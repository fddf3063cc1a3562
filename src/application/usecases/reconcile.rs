use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    application::stripe_gateway::StripeGateway,
    domain::{
        entities::orders::OrderEntity,
        repositories::orders::OrderRepository,
        value_objects::{
            enums::{
                order_statuses::{OrderStatus, PAYMENT_PROCESSING_STATUSES},
                payment_modes::PaymentMode,
            },
            money::format_amount,
        },
    },
    infrastructure::stripe::types::Charge,
};

use super::{PaymentError, UseCaseResult};

/// Projects a processor charge onto the order lifecycle, idempotently.
///
/// Every mutation re-checks the stored status through the guarded
/// transition, so replayed or out-of-order deliveries converge on the same
/// final state with exactly one set of side effects.
pub struct ChargeReconciler<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    order_repo: Arc<R>,
    stripe_client: Arc<G>,
}

impl<R, G> ChargeReconciler<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(order_repo: Arc<R>, stripe_client: Arc<G>) -> Self {
        Self {
            order_repo,
            stripe_client,
        }
    }

    pub async fn process_charge(
        &self,
        mode: PaymentMode,
        charge: &Charge,
        order_id: Uuid,
    ) -> UseCaseResult<()> {
        let order = self
            .order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "reconcile: failed to load order");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::OrderNotFound)?;

        let captured = charge.captured.unwrap_or(false);
        let status = charge.status.as_deref().unwrap_or("");

        self.order_repo
            .set_charge_captured(order_id, captured)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "reconcile: failed to record captured flag");
                PaymentError::Internal(err)
            })?;

        match (captured, status) {
            (_, "failed") => {
                if order.is_renewal {
                    info!(
                        %order_id,
                        charge_id = %charge.id,
                        "reconcile: skipping failure path for renewal order"
                    );
                    return Ok(());
                }
                let note = format!("Charge {} failed at the processor.", charge.id);
                let applied = self
                    .transition(
                        order_id,
                        &[OrderStatus::Pending, OrderStatus::OnHold],
                        OrderStatus::Failed,
                        &note,
                    )
                    .await?;
                if applied {
                    info!(%order_id, charge_id = %charge.id, "reconcile: order marked failed");
                }
            }
            (true, "succeeded") => {
                self.record_balance(mode, charge, order_id).await;
                self.complete_payment(charge, &order).await?;
            }
            (true, "pending" | "processing") => {
                let note = format!(
                    "Charge {} accepted, awaiting confirmation from the processor.",
                    charge.id
                );
                let applied = self
                    .transition(
                        order_id,
                        &PAYMENT_PROCESSING_STATUSES,
                        OrderStatus::OnHold,
                        &note,
                    )
                    .await?;
                if applied {
                    self.record_charge_side_effects(order_id, charge).await?;
                }
            }
            (false, _) => {
                // Manual capture: funds are earmarked but not yet settled.
                let note = format!(
                    "Charge {} authorized for {}; capture pending.",
                    charge.id,
                    format_amount(
                        charge.amount.unwrap_or(order.total_minor),
                        charge.currency.as_deref().unwrap_or(&order.currency),
                    )
                );
                let applied = self
                    .transition(
                        order_id,
                        &PAYMENT_PROCESSING_STATUSES,
                        OrderStatus::OnHold,
                        &note,
                    )
                    .await?;
                if applied {
                    self.record_charge_side_effects(order_id, charge).await?;
                }
            }
            _ => {
                debug!(
                    %order_id,
                    charge_id = %charge.id,
                    charge_status = status,
                    "reconcile: no transition for charge state"
                );
            }
        }

        Ok(())
    }

    async fn complete_payment(&self, charge: &Charge, order: &OrderEntity) -> UseCaseResult<()> {
        let order_id = order.id;
        let amount = charge
            .amount_captured
            .or(charge.amount)
            .unwrap_or(order.total_minor);
        let currency = charge.currency.as_deref().unwrap_or(&order.currency);
        let refunded = charge.amount_refunded.unwrap_or(0);

        let note = if refunded > 0 {
            format!(
                "Payment of {} captured via Stripe (charge {}); {} of the authorization was released.",
                format_amount(amount, currency),
                charge.id,
                format_amount(refunded, currency),
            )
        } else {
            format!(
                "Payment of {} completed via Stripe (charge {}).",
                format_amount(amount, currency),
                charge.id,
            )
        };

        let applied = self
            .transition(
                order_id,
                &PAYMENT_PROCESSING_STATUSES,
                OrderStatus::Completed,
                &note,
            )
            .await?;
        if !applied {
            info!(
                %order_id,
                charge_id = %charge.id,
                "reconcile: order already finalized, skipping completion"
            );
            return Ok(());
        }

        if refunded > 0 {
            // Partial capture: the order owes what was actually captured,
            // not the original authorization.
            self.order_repo
                .set_total(order_id, amount)
                .await
                .map_err(|err| {
                    error!(%order_id, db_error = ?err, "reconcile: failed to adjust order total");
                    PaymentError::Internal(err)
                })?;
        }

        self.record_charge_side_effects(order_id, charge).await?;

        if let Some(detail) = payment_detail_note(charge) {
            self.order_repo
                .add_note(order_id, &detail)
                .await
                .map_err(|err| {
                    error!(%order_id, db_error = ?err, "reconcile: failed to add payment detail note");
                    PaymentError::Internal(err)
                })?;
        }

        info!(%order_id, charge_id = %charge.id, "reconcile: payment completed");
        Ok(())
    }

    async fn record_charge_side_effects(
        &self,
        order_id: Uuid,
        charge: &Charge,
    ) -> UseCaseResult<()> {
        self.order_repo
            .set_transaction_id(order_id, &charge.id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "reconcile: failed to set transaction id");
                PaymentError::Internal(err)
            })?;

        let reduced = self
            .order_repo
            .reduce_stock_once(order_id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "reconcile: failed to reduce stock");
                PaymentError::Internal(err)
            })?;
        if reduced {
            info!(%order_id, "reconcile: stock reduced");
        }

        Ok(())
    }

    async fn transition(
        &self,
        order_id: Uuid,
        allowed_from: &[OrderStatus],
        to: OrderStatus,
        note: &str,
    ) -> UseCaseResult<bool> {
        self.order_repo
            .transition_status(order_id, allowed_from, to, note)
            .await
            .map_err(|err| {
                error!(
                    %order_id,
                    to = %to,
                    db_error = ?err,
                    "reconcile: failed to transition order status"
                );
                PaymentError::Internal(err)
            })
    }

    /// Records fee/net from the charge's balance transaction. Best effort:
    /// a lookup failure must not block the order transition.
    async fn record_balance(&self, mode: PaymentMode, charge: &Charge, order_id: Uuid) {
        let Some(txn_id) = charge.balance_transaction.as_deref() else {
            return;
        };

        match self
            .stripe_client
            .retrieve_balance_transaction(mode, txn_id)
            .await
        {
            Ok(txn) => {
                let result = self
                    .order_repo
                    .record_balance(
                        order_id,
                        txn.fee.unwrap_or(0),
                        txn.net.unwrap_or(0),
                        txn.currency.as_deref().unwrap_or(""),
                        false,
                    )
                    .await;
                if let Err(err) = result {
                    warn!(%order_id, db_error = ?err, "reconcile: failed to store balance data");
                }
            }
            Err(err) => {
                warn!(
                    %order_id,
                    balance_transaction = txn_id,
                    error = ?err,
                    "reconcile: failed to retrieve balance transaction"
                );
            }
        }
    }
}

/// Audit line identifying how the shopper paid, when the charge carries
/// card or wallet details.
fn payment_detail_note(charge: &Charge) -> Option<String> {
    let details = charge.payment_method_details.as_ref()?;

    if let Some(card) = &details.card {
        let brand = card.brand.as_deref().unwrap_or("card");
        let mut note = match &card.last4 {
            Some(last4) => format!("Paid with {brand} ending in {last4}"),
            None => format!("Paid with {brand}"),
        };
        if let Some(wallet) = card.wallet.as_ref().and_then(|w| w.type_.as_deref()) {
            note.push_str(&format!(" via {wallet}"));
        }
        note.push('.');
        return Some(note);
    }

    if details.link.is_some() {
        return Some("Paid with Link.".to_string());
    }

    details
        .type_
        .as_ref()
        .map(|type_| format!("Paid with {type_}."))
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::{
        application::stripe_gateway::MockStripeGateway,
        domain::{
            entities::orders::OrderEntity, repositories::orders::MockOrderRepository,
        },
    };

    fn charge_from(value: serde_json::Value) -> Charge {
        serde_json::from_value(value).unwrap()
    }

    fn order(id: Uuid) -> OrderEntity {
        OrderEntity::new(id, "wc_order_abc", 4999, "usd")
    }

    #[tokio::test]
    async fn captured_succeeded_charge_completes_order() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_1",
            "status": "succeeded",
            "captured": true,
            "amount": 4999,
            "amount_captured": 4999,
            "currency": "usd",
            "payment_method_details": {
                "type": "card",
                "card": {"brand": "visa", "last4": "4242"}
            }
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_set_charge_captured()
            .with(eq(order_id), eq(true))
            .returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, _, to, note| {
                *to == OrderStatus::Completed && note.contains("49.99 USD")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_transaction_id()
            .with(eq(order_id), eq("ch_1"))
            .returning(|_, _| Ok(()));
        repo.expect_reduce_stock_once()
            .times(1)
            .returning(|_| Ok(true));
        repo.expect_add_note()
            .withf(|_, note| note.contains("visa ending in 4242"))
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(MockStripeGateway::new()));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn partial_capture_adjusts_the_order_total() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_1",
            "status": "succeeded",
            "captured": true,
            "amount": 4999,
            "amount_captured": 3000,
            "amount_refunded": 1999,
            "currency": "usd"
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, _, to, note| {
                *to == OrderStatus::Completed
                    && note.contains("30.00 USD")
                    && note.contains("19.99 USD")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_total()
            .with(eq(order_id), eq(3000))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_set_transaction_id().returning(|_, _| Ok(()));
        repo.expect_reduce_stock_once().returning(|_| Ok(true));

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(MockStripeGateway::new()));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn already_completed_order_is_left_alone() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_1",
            "status": "succeeded",
            "captured": true
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.status = OrderStatus::Completed;
            Ok(Some(o))
        });
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .returning(|_, _, _, _| Ok(false));
        repo.expect_set_transaction_id().times(0);
        repo.expect_reduce_stock_once().times(0);
        repo.expect_add_note().times(0);

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(MockStripeGateway::new()));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn uncaptured_charge_moves_order_to_on_hold() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_2",
            "status": "succeeded",
            "captured": false,
            "amount": 4999,
            "currency": "usd"
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_set_charge_captured()
            .with(eq(order_id), eq(false))
            .returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, _, to, note| *to == OrderStatus::OnHold && note.contains("capture pending"))
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_transaction_id().returning(|_, _| Ok(()));
        repo.expect_reduce_stock_once()
            .times(1)
            .returning(|_| Ok(true));

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(MockStripeGateway::new()));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_charge_is_skipped_for_renewals() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_3",
            "status": "failed",
            "captured": false
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.is_renewal = true;
            Ok(Some(o))
        });
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status().times(0);

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(MockStripeGateway::new()));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn balance_lookup_failure_does_not_block_completion() {
        let order_id = Uuid::new_v4();
        let charge = charge_from(json!({
            "id": "ch_4",
            "status": "succeeded",
            "captured": true,
            "balance_transaction": "txn_1"
        }));

        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_transaction_id().returning(|_, _| Ok(()));
        repo.expect_reduce_stock_once().returning(|_| Ok(true));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_balance_transaction()
            .returning(|_, _| {
                Err(crate::infrastructure::stripe::errors::StripeError::Protocol(
                    "boom".into(),
                ))
            });

        let reconciler = ChargeReconciler::new(Arc::new(repo), Arc::new(stripe));
        reconciler
            .process_charge(PaymentMode::Test, &charge, order_id)
            .await
            .unwrap();
    }
}
