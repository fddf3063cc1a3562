use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::stripe_gateway::StripeGateway,
    config::config_model::StripeSettings,
    domain::{
        entities::orders::OrderEntity,
        repositories::orders::OrderRepository,
        value_objects::enums::{order_statuses::OrderStatus, payment_modes::PaymentMode},
    },
};

use super::{reconcile::ChargeReconciler, PaymentError, UseCaseResult};

/// Capture and void actions exposed to admin tooling for orders that were
/// authorized with manual capture.
pub struct AdminChargeUseCase<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    order_repo: Arc<R>,
    stripe_client: Arc<G>,
    reconciler: Arc<ChargeReconciler<R, G>>,
    settings: Arc<StripeSettings>,
}

impl<R, G> AdminChargeUseCase<R, G>
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(
        order_repo: Arc<R>,
        stripe_client: Arc<G>,
        reconciler: Arc<ChargeReconciler<R, G>>,
        settings: Arc<StripeSettings>,
    ) -> Self {
        Self {
            order_repo,
            stripe_client,
            reconciler,
            settings,
        }
    }

    /// Settles an authorized-but-uncaptured intent, optionally for less than
    /// the authorized amount, then projects the resulting charge onto the
    /// order.
    pub async fn capture_charge(
        &self,
        order_id: Uuid,
        amount_minor: Option<i64>,
    ) -> UseCaseResult<()> {
        let (order, intent_id) = self.load_order_with_intent(order_id).await?;
        let mode = self.mode_for(&order);

        info!(
            %order_id,
            intent_id = %intent_id,
            amount_minor = ?amount_minor,
            "admin: capturing charge"
        );

        let intent = self
            .stripe_client
            .capture_payment_intent(mode, &intent_id, amount_minor)
            .await
            .map_err(|err| {
                error!(%order_id, intent_id = %intent_id, error = ?err, "admin: capture failed");
                PaymentError::from_stripe(err)
            })?;

        if let Some(charge) = intent.latest_charge() {
            self.reconciler.process_charge(mode, charge, order_id).await?;
        } else {
            warn!(
                %order_id,
                intent_id = %intent_id,
                "admin: captured intent carried no charge"
            );
        }

        Ok(())
    }

    /// Releases an uncaptured authorization and cancels the order.
    pub async fn void_charge(&self, order_id: Uuid) -> UseCaseResult<()> {
        let (order, intent_id) = self.load_order_with_intent(order_id).await?;
        let mode = self.mode_for(&order);

        info!(%order_id, intent_id = %intent_id, "admin: voiding authorization");

        self.stripe_client
            .cancel_payment_intent(mode, &intent_id)
            .await
            .map_err(|err| {
                error!(%order_id, intent_id = %intent_id, error = ?err, "admin: void failed");
                PaymentError::from_stripe(err)
            })?;

        self.order_repo
            .transition_status(
                order_id,
                &[OrderStatus::Pending, OrderStatus::OnHold],
                OrderStatus::Cancelled,
                &format!("Authorization on intent {intent_id} voided."),
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "admin: failed to cancel voided order");
                PaymentError::Internal(err)
            })?;

        Ok(())
    }

    async fn load_order_with_intent(
        &self,
        order_id: Uuid,
    ) -> UseCaseResult<(OrderEntity, String)> {
        let order = self
            .order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "admin: failed to load order");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::OrderNotFound)?;

        let intent_id = order.intent_id.clone().ok_or_else(|| {
            let err = PaymentError::Validation("order has no payment intent".to_string());
            warn!(
                %order_id,
                status = err.status_code().as_u16(),
                "admin: action requested without an intent"
            );
            err
        })?;

        Ok((order, intent_id))
    }

    fn mode_for(&self, order: &OrderEntity) -> PaymentMode {
        order
            .payment_mode
            .unwrap_or_else(|| self.settings.effective_mode(true))
    }
}
