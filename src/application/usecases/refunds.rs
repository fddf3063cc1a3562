use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::stripe_gateway::StripeGateway,
    config::config_model::StripeSettings,
    domain::{
        entities::orders::OrderEntity,
        repositories::orders::OrderRepository,
        value_objects::{enums::{order_statuses::OrderStatus, payment_modes::PaymentMode}, money::format_amount},
    },
    infrastructure::stripe::{
        client::CreateRefundParams,
        types::{Charge, Dispute, Refund, Review},
    },
};

use super::{PaymentError, UseCaseResult};

/// How long after an admin-side refund submission the matching
/// `charge.refunded` webhook is treated as an echo and skipped.
const WEBHOOK_LOCK_WINDOW_SECS: i64 = 60;

/// Originating request details forwarded to the processor as fraud signals.
#[derive(Debug, Clone, Default)]
pub struct RequesterInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

pub struct RefundWorkflow<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    order_repo: Arc<R>,
    stripe_client: Arc<G>,
    settings: Arc<StripeSettings>,
}

impl<R, G> RefundWorkflow<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(order_repo: Arc<R>, stripe_client: Arc<G>, settings: Arc<StripeSettings>) -> Self {
        Self {
            order_repo,
            stripe_client,
            settings,
        }
    }

    /// Issues a refund against the order's intent (or raw charge) and folds
    /// the resulting fee/net deltas onto the order's running totals.
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount_minor: Option<i64>,
        reason: Option<String>,
        requester: RequesterInfo,
    ) -> UseCaseResult<String> {
        let order = self.load_order(order_id).await?;
        let mode = order
            .payment_mode
            .unwrap_or_else(|| self.settings.effective_mode(true));

        let target_id = order
            .intent_id
            .clone()
            .or_else(|| order.transaction_id.clone())
            .ok_or_else(|| {
                let err =
                    PaymentError::Validation("order has no charge to refund".to_string());
                warn!(
                    %order_id,
                    status = err.status_code().as_u16(),
                    "refunds: refund requested without a charge"
                );
                err
            })?;

        // Mark the order so the charge.refunded webhook echoing this refund
        // is skipped instead of double-processed.
        self.set_webhook_lock(order_id, true).await?;

        let params = CreateRefundParams {
            target_id,
            amount_minor,
            reason,
            client_ip: requester.ip,
            user_agent: requester.user_agent,
            referer: requester.referer,
        };

        let refund = match self.stripe_client.create_refund(mode, &params).await {
            Ok(refund) => refund,
            Err(err) => {
                error!(%order_id, error = ?err, "refunds: refund submission failed");
                self.set_webhook_lock(order_id, false).await?;
                return Err(PaymentError::from_stripe(err));
            }
        };

        self.accumulate_balance(mode, order_id, refund.balance_transaction.as_deref())
            .await;
        self.save_refund_ref(order_id, &refund).await?;

        let amount = refund.amount.or(amount_minor).unwrap_or(order.total_minor);
        let currency = refund.currency.as_deref().unwrap_or(&order.currency);
        self.add_note(
            order_id,
            &format!(
                "Refunded {} via Stripe (refund {}).",
                format_amount(amount, currency),
                refund.id
            ),
        )
        .await?;

        info!(%order_id, refund_id = %refund.id, "refunds: refund completed");
        Ok(refund.id)
    }

    /// Reacts to a `charge.refunded` delivery that originated outside this
    /// system (e.g. the processor dashboard).
    pub async fn handle_charge_refunded(
        &self,
        mode: PaymentMode,
        charge: &Charge,
        order: &OrderEntity,
    ) -> UseCaseResult<()> {
        let order_id = order.id;

        // A charge from a superseded intent (e.g. the shopper retried with a
        // new payment attempt) must not touch the current payment's order.
        if let (Some(event_intent), Some(order_intent)) =
            (charge.payment_intent.as_deref(), order.intent_id.as_deref())
        {
            if event_intent != order_intent {
                info!(
                    %order_id,
                    event_intent,
                    order_intent,
                    "refunds: refund webhook references a superseded intent, skipping"
                );
                return Ok(());
            }
        }

        if let Some(locked_at) = order.webhook_lock_at {
            if Utc::now() - locked_at < Duration::seconds(WEBHOOK_LOCK_WINDOW_SECS) {
                info!(
                    %order_id,
                    "refunds: skipping refund webhook issued by this system"
                );
                return Ok(());
            }
        }

        let Some(refund) = charge.refunds.data.last() else {
            warn!(
                %order_id,
                charge_id = %charge.id,
                "refunds: charge.refunded carried no refund object"
            );
            return Ok(());
        };

        if order.refund_id.as_deref() == Some(refund.id.as_str()) {
            info!(
                %order_id,
                refund_id = %refund.id,
                "refunds: refund already recorded, skipping"
            );
            return Ok(());
        }

        if !charge.captured.unwrap_or(true) {
            // Releasing an uncaptured authorization voids the payment.
            let applied = self
                .order_repo
                .transition_status(
                    order_id,
                    &[OrderStatus::Pending, OrderStatus::OnHold, OrderStatus::Processing],
                    OrderStatus::Cancelled,
                    &format!("Authorization {} was voided at the processor.", charge.id),
                )
                .await
                .map_err(|err| {
                    error!(%order_id, db_error = ?err, "refunds: failed to cancel voided order");
                    PaymentError::Internal(err)
                })?;
            if applied {
                info!(%order_id, charge_id = %charge.id, "refunds: voided authorization cancelled order");
            }
            return Ok(());
        }

        self.accumulate_balance(mode, order_id, refund.balance_transaction.as_deref())
            .await;
        self.save_refund_ref(order_id, refund).await?;

        let amount = refund.amount.unwrap_or(charge.amount_refunded.unwrap_or(0));
        let currency = refund
            .currency
            .as_deref()
            .or(charge.currency.as_deref())
            .unwrap_or(&order.currency);
        self.add_note(
            order_id,
            &format!(
                "Refund of {} processed at Stripe (refund {}).",
                format_amount(amount, currency),
                refund.id
            ),
        )
        .await?;

        Ok(())
    }

    /// Snapshot the current status before moving the order on hold, so a won
    /// dispute can restore it.
    pub async fn dispute_created(
        &self,
        order: &OrderEntity,
        dispute: &Dispute,
    ) -> UseCaseResult<()> {
        let order_id = order.id;

        self.order_repo
            .set_status_before_dispute(order_id, Some(order.status))
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to snapshot pre-dispute status");
                PaymentError::Internal(err)
            })?;

        let note = format!(
            "Dispute {} opened ({}); order placed on hold pending resolution.",
            dispute.id,
            dispute.reason.as_deref().unwrap_or("unspecified"),
        );
        self.order_repo
            .transition_status(
                order_id,
                &[
                    OrderStatus::Pending,
                    OrderStatus::Processing,
                    OrderStatus::Completed,
                    OrderStatus::Failed,
                ],
                OrderStatus::OnHold,
                &note,
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to hold disputed order");
                PaymentError::Internal(err)
            })?;

        info!(%order_id, dispute_id = %dispute.id, "refunds: dispute opened");
        Ok(())
    }

    pub async fn dispute_closed(
        &self,
        order: &OrderEntity,
        dispute: &Dispute,
    ) -> UseCaseResult<()> {
        let order_id = order.id;

        match dispute.status.as_deref() {
            Some("lost") => {
                self.order_repo
                    .transition_status(
                        order_id,
                        &[OrderStatus::OnHold],
                        OrderStatus::Failed,
                        &format!("Dispute {} lost; payment reversed.", dispute.id),
                    )
                    .await
                    .map_err(|err| {
                        error!(%order_id, db_error = ?err, "refunds: failed to fail lost dispute");
                        PaymentError::Internal(err)
                    })?;
            }
            Some("won" | "warning_closed") => {
                let restored = order.status_before_dispute.unwrap_or(OrderStatus::Processing);
                self.order_repo
                    .transition_status(
                        order_id,
                        &[OrderStatus::OnHold],
                        restored,
                        &format!("Dispute {} resolved in your favor.", dispute.id),
                    )
                    .await
                    .map_err(|err| {
                        error!(%order_id, db_error = ?err, "refunds: failed to restore disputed order");
                        PaymentError::Internal(err)
                    })?;
            }
            other => {
                self.add_note(
                    order_id,
                    &format!(
                        "Dispute {} closed with outcome {}.",
                        dispute.id,
                        other.unwrap_or("unknown")
                    ),
                )
                .await?;
            }
        }

        self.order_repo
            .set_status_before_dispute(order_id, None)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to clear dispute snapshot");
                PaymentError::Internal(err)
            })?;

        info!(
            %order_id,
            dispute_id = %dispute.id,
            outcome = ?dispute.status,
            "refunds: dispute closed"
        );
        Ok(())
    }

    pub async fn review_opened(&self, order: &OrderEntity, review: &Review) -> UseCaseResult<()> {
        let order_id = order.id;

        self.order_repo
            .set_status_before_review(order_id, Some(order.status))
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to snapshot pre-review status");
                PaymentError::Internal(err)
            })?;

        self.order_repo
            .transition_status(
                order_id,
                &[
                    OrderStatus::Pending,
                    OrderStatus::Processing,
                    OrderStatus::Completed,
                    OrderStatus::Failed,
                ],
                OrderStatus::OnHold,
                &format!(
                    "Payment flagged for review ({}); order placed on hold.",
                    review.reason.as_deref().unwrap_or("unspecified"),
                ),
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to hold reviewed order");
                PaymentError::Internal(err)
            })?;

        Ok(())
    }

    pub async fn review_closed(&self, order: &OrderEntity, review: &Review) -> UseCaseResult<()> {
        let order_id = order.id;
        let restored = order.status_before_review.unwrap_or(OrderStatus::Processing);

        self.order_repo
            .transition_status(
                order_id,
                &[OrderStatus::OnHold],
                restored,
                &format!(
                    "Payment review closed ({}).",
                    review.reason.as_deref().unwrap_or("approved"),
                ),
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to restore reviewed order");
                PaymentError::Internal(err)
            })?;

        self.order_repo
            .set_status_before_review(order_id, None)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to clear review snapshot");
                PaymentError::Internal(err)
            })?;

        Ok(())
    }

    /// Folds a balance transaction's fee/net onto the order's running
    /// totals. Best effort, like the completion-side balance recording.
    async fn accumulate_balance(&self, mode: PaymentMode, order_id: Uuid, txn_id: Option<&str>) {
        let Some(txn_id) = txn_id else { return };

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
                        true,
                    )
                    .await;
                if let Err(err) = result {
                    warn!(%order_id, db_error = ?err, "refunds: failed to accumulate balance data");
                }
            }
            Err(err) => {
                warn!(
                    %order_id,
                    balance_transaction = txn_id,
                    error = ?err,
                    "refunds: failed to retrieve refund balance transaction"
                );
            }
        }
    }

    async fn save_refund_ref(&self, order_id: Uuid, refund: &Refund) -> UseCaseResult<()> {
        self.order_repo
            .save_refund_ref(
                order_id,
                &refund.id,
                refund.status.as_deref().unwrap_or("succeeded"),
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to persist refund reference");
                PaymentError::Internal(err)
            })
    }

    async fn set_webhook_lock(&self, order_id: Uuid, locked: bool) -> UseCaseResult<()> {
        let at = locked.then(Utc::now);
        self.order_repo
            .set_webhook_lock(order_id, at)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to update webhook lock");
                PaymentError::Internal(err)
            })
    }

    async fn add_note(&self, order_id: Uuid, note: &str) -> UseCaseResult<()> {
        self.order_repo.add_note(order_id, note).await.map_err(|err| {
            error!(%order_id, db_error = ?err, "refunds: failed to append order note");
            PaymentError::Internal(err)
        })
    }

    async fn load_order(&self, order_id: Uuid) -> UseCaseResult<OrderEntity> {
        self.order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "refunds: failed to load order");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::OrderNotFound)
    }
}
