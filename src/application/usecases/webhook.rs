use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::stripe_gateway::StripeGateway,
    config::config_model::StripeSettings,
    domain::{
        entities::orders::OrderEntity,
        repositories::{
            orders::OrderRepository,
            payment_locks::{LockOutcome, PaymentLockStore, LOCK_IN_PROGRESS},
        },
        value_objects::enums::{order_statuses::OrderStatus, payment_modes::PaymentMode},
    },
    infrastructure::stripe::{
        client::{construct_event, peek_livemode},
        types::{Charge, Dispute, PaymentIntent, Review, StripeEvent, WebhookEventKind},
    },
};

use super::{
    localized_last_error, reconcile::ChargeReconciler, refunds::RefundWorkflow, PaymentError,
    UseCaseResult,
};

/// Cross-cutting consumers of event types the gateway has no handler for.
/// Registered at startup; new processor event types never require gateway
/// changes to observe.
#[async_trait]
pub trait ExtensionHook: Send + Sync {
    async fn on_event(&self, mode: PaymentMode, event: &StripeEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeHealth {
    pub began_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-mode delivery timestamps surfaced on the health endpoint.
#[derive(Debug, Default)]
pub struct WebhookHealth {
    test: Mutex<ModeHealth>,
    live: Mutex<ModeHealth>,
}

impl WebhookHealth {
    fn slot(&self, mode: PaymentMode) -> &Mutex<ModeHealth> {
        match mode {
            PaymentMode::Test => &self.test,
            PaymentMode::Live => &self.live,
        }
    }

    fn record_began(&self, mode: PaymentMode) {
        let mut health = self.slot(mode).lock().unwrap();
        if health.began_at.is_none() {
            health.began_at = Some(Utc::now());
        }
    }

    fn record_success(&self, mode: PaymentMode) {
        let mut health = self.slot(mode).lock().unwrap();
        health.last_success_at = Some(Utc::now());
    }

    fn record_failure(&self, mode: PaymentMode, reason: &str) {
        let mut health = self.slot(mode).lock().unwrap();
        health.last_failure_at = Some(Utc::now());
        health.last_error = Some(reason.to_string());
    }

    pub fn snapshot(&self, mode: PaymentMode) -> ModeHealth {
        self.slot(mode).lock().unwrap().clone()
    }
}

pub struct WebhookUseCase<R, L, G>
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    order_repo: Arc<R>,
    lock_store: Arc<L>,
    stripe_client: Arc<G>,
    reconciler: Arc<ChargeReconciler<R, G>>,
    refunds: Arc<RefundWorkflow<R, G>>,
    settings: Arc<StripeSettings>,
    site_url: String,
    health: Arc<WebhookHealth>,
    hooks: Vec<Arc<dyn ExtensionHook>>,
}

impl<R, L, G> WebhookUseCase<R, L, G>
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_repo: Arc<R>,
        lock_store: Arc<L>,
        stripe_client: Arc<G>,
        reconciler: Arc<ChargeReconciler<R, G>>,
        refunds: Arc<RefundWorkflow<R, G>>,
        settings: Arc<StripeSettings>,
        site_url: String,
        health: Arc<WebhookHealth>,
    ) -> Self {
        Self {
            order_repo,
            lock_store,
            stripe_client,
            reconciler,
            refunds,
            settings,
            site_url,
            health,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ExtensionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn health(&self) -> &WebhookHealth {
        &self.health
    }

    /// Verifies and routes one delivery.
    ///
    /// The `livemode` flag is read from the raw payload before verification
    /// so the matching shared secret is selected; the signature check itself
    /// still decides whether the event is accepted. Once a payload is
    /// structurally valid the response is 200 even if a handler no-ops, so
    /// the processor does not retry indefinitely.
    pub async fn handle(&self, payload: &[u8], signature_header: &str) -> UseCaseResult<()> {
        let Some(livemode) = peek_livemode(payload) else {
            warn!("webhook: payload missing livemode flag");
            return Err(PaymentError::InvalidWebhook(
                "payload missing livemode flag".to_string(),
            ));
        };
        let mode = PaymentMode::from_livemode(livemode);
        self.health.record_began(mode);

        let secret = match self.settings.webhook_secret_for(mode) {
            Ok(secret) => secret,
            Err(err) => {
                warn!(%mode, error = %err, "webhook: no shared secret for delivery mode");
                self.health.record_failure(mode, &err.to_string());
                return Err(PaymentError::InvalidWebhook(err.to_string()));
            }
        };

        let event = match construct_event(payload, signature_header, secret) {
            Ok(event) => event,
            Err(err) => {
                warn!(%mode, error = %err, "webhook: signature verification failed");
                self.health
                    .record_failure(mode, "signature verification failed");
                return Err(PaymentError::SignatureInvalid);
            }
        };

        if !event.data.object.is_object() {
            self.health.record_failure(mode, "missing embedded object");
            return Err(PaymentError::InvalidWebhook(
                "event carries no embedded object".to_string(),
            ));
        }

        // Cross-environment replays share the processor account but carry a
        // different origin; ignore them without mutating anything.
        if let Some(origin) = event
            .data
            .object
            .pointer("/metadata/site_url")
            .and_then(|v| v.as_str())
        {
            if origin != self.site_url {
                info!(
                    %mode,
                    event_type = %event.type_,
                    origin,
                    "webhook: ignoring event for another deployment"
                );
                self.health.record_success(mode);
                return Ok(());
            }
        }

        info!(
            %mode,
            event_id = ?event.id,
            event_type = %event.type_,
            "webhook: event verified"
        );

        match self.dispatch(mode, &event).await {
            Ok(()) => {
                self.health.record_success(mode);
                Ok(())
            }
            Err(err) => {
                // Structurally valid; acknowledge so the processor stops
                // retrying, but keep the failure visible.
                error!(
                    %mode,
                    event_type = %event.type_,
                    error = ?err,
                    "webhook: handler failed"
                );
                self.health.record_failure(mode, &err.to_string());
                Ok(())
            }
        }
    }

    async fn dispatch(&self, mode: PaymentMode, event: &StripeEvent) -> UseCaseResult<()> {
        match WebhookEventKind::from_type_str(&event.type_) {
            WebhookEventKind::ChargeSucceeded | WebhookEventKind::ChargeCaptured => {
                let charge = self.parse_object::<Charge>(event)?;
                let Some(order) = self.resolve_order_for_charge(&charge).await? else {
                    return Ok(());
                };
                self.finalize_charge(mode, &charge, &order).await
            }
            WebhookEventKind::ChargeFailed => {
                let charge = self.parse_object::<Charge>(event)?;
                let Some(order) = self.resolve_order_for_charge(&charge).await? else {
                    return Ok(());
                };
                self.handle_charge_failed(mode, &charge, &order).await
            }
            WebhookEventKind::ChargeRefunded => {
                let charge = self.parse_object::<Charge>(event)?;
                let Some(order) = self.resolve_order_for_charge(&charge).await? else {
                    return Ok(());
                };
                self.refunds
                    .handle_charge_refunded(mode, &charge, &order)
                    .await
            }
            WebhookEventKind::ChargeDisputeCreated => {
                let dispute = self.parse_object::<Dispute>(event)?;
                let Some(order) = self
                    .resolve_order_by_intent(dispute.payment_intent.as_deref())
                    .await?
                else {
                    return Ok(());
                };
                self.refunds.dispute_created(&order, &dispute).await
            }
            WebhookEventKind::ChargeDisputeClosed => {
                let dispute = self.parse_object::<Dispute>(event)?;
                let Some(order) = self
                    .resolve_order_by_intent(dispute.payment_intent.as_deref())
                    .await?
                else {
                    return Ok(());
                };
                self.refunds.dispute_closed(&order, &dispute).await
            }
            WebhookEventKind::ReviewOpened => {
                let review = self.parse_object::<Review>(event)?;
                let Some(order) = self
                    .resolve_order_by_intent(review.payment_intent.as_deref())
                    .await?
                else {
                    return Ok(());
                };
                self.refunds.review_opened(&order, &review).await
            }
            WebhookEventKind::ReviewClosed => {
                let review = self.parse_object::<Review>(event)?;
                let Some(order) = self
                    .resolve_order_by_intent(review.payment_intent.as_deref())
                    .await?
                else {
                    return Ok(());
                };
                self.refunds.review_closed(&order, &review).await
            }
            WebhookEventKind::PaymentIntentSucceeded => {
                let intent = self.parse_object::<PaymentIntent>(event)?;
                let Some(order) = self.resolve_order_for_intent(&intent).await? else {
                    return Ok(());
                };
                match intent.latest_charge() {
                    Some(charge) => self.finalize_charge(mode, charge, &order).await,
                    None => {
                        info!(
                            order_id = %order.id,
                            intent_id = %intent.id,
                            "webhook: succeeded intent carried no charge"
                        );
                        Ok(())
                    }
                }
            }
            WebhookEventKind::PaymentIntentRequiresAction => {
                let intent = self.parse_object::<PaymentIntent>(event)?;
                let Some(order) = self.resolve_order_for_intent(&intent).await? else {
                    return Ok(());
                };
                self.order_repo
                    .add_note(order.id, "Awaiting customer authentication at the processor.")
                    .await
                    .map_err(|err| {
                        error!(order_id = %order.id, db_error = ?err, "webhook: failed to add note");
                        PaymentError::Internal(err)
                    })?;
                Ok(())
            }
            WebhookEventKind::Other => {
                for hook in &self.hooks {
                    if let Err(err) = hook.on_event(mode, event).await {
                        warn!(
                            event_type = %event.type_,
                            error = ?err,
                            "webhook: extension hook failed"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Finalization shared by the charge and intent success paths, guarded
    /// by the payment lock against the redirect handler racing in.
    async fn finalize_charge(
        &self,
        mode: PaymentMode,
        charge: &Charge,
        order: &OrderEntity,
    ) -> UseCaseResult<()> {
        let lock_key = charge.payment_intent.as_deref().unwrap_or(LOCK_IN_PROGRESS);
        if self.lock_store.try_lock(order.id, lock_key) == LockOutcome::Held {
            info!(
                order_id = %order.id,
                charge_id = %charge.id,
                "webhook: order is being finalized elsewhere, skipping"
            );
            return Ok(());
        }

        let result = self.reconciler.process_charge(mode, charge, order.id).await;
        self.lock_store.unlock(order.id);
        result
    }

    async fn handle_charge_failed(
        &self,
        mode: PaymentMode,
        charge: &Charge,
        order: &OrderEntity,
    ) -> UseCaseResult<()> {
        if order.is_renewal || order.is_paid() {
            info!(
                order_id = %order.id,
                charge_id = %charge.id,
                "webhook: ignoring charge failure for renewal or settled order"
            );
            return Ok(());
        }

        // The intent's last_payment_error carries the decline details the
        // charge object lacks.
        let mut reason = None;
        if let Some(intent_id) = charge.payment_intent.as_deref() {
            match self.stripe_client.retrieve_payment_intent(mode, intent_id).await {
                Ok(intent) => {
                    reason = intent.last_payment_error.as_ref().map(localized_last_error);
                }
                Err(err) => {
                    warn!(
                        order_id = %order.id,
                        intent_id,
                        error = ?err,
                        "webhook: could not retrieve intent for failure details"
                    );
                }
            }
        }

        let note = match reason {
            Some(reason) => format!("Payment failed: {reason}"),
            None => format!("Charge {} failed at the processor.", charge.id),
        };

        self.order_repo
            .transition_status(
                order.id,
                &[OrderStatus::Pending, OrderStatus::OnHold],
                OrderStatus::Failed,
                &note,
            )
            .await
            .map_err(|err| {
                error!(order_id = %order.id, db_error = ?err, "webhook: failed to mark order failed");
                PaymentError::Internal(err)
            })?;

        Ok(())
    }

    fn parse_object<T: serde::de::DeserializeOwned>(
        &self,
        event: &StripeEvent,
    ) -> UseCaseResult<T> {
        serde_json::from_value(event.data.object.clone()).map_err(|err| {
            warn!(
                event_type = %event.type_,
                error = %err,
                "webhook: embedded object does not match event type"
            );
            PaymentError::InvalidWebhook("embedded object does not match event type".to_string())
        })
    }

    async fn resolve_order_for_charge(
        &self,
        charge: &Charge,
    ) -> UseCaseResult<Option<OrderEntity>> {
        if let Some(order) = self.find_by_metadata(&charge.metadata).await? {
            return Ok(Some(order));
        }
        if let Some(intent_id) = charge.payment_intent.as_deref() {
            if let Some(order) = self.find_by_intent(intent_id).await? {
                return Ok(Some(order));
            }
        }
        let order = self
            .order_repo
            .find_by_charge_id(&charge.id)
            .await
            .map_err(PaymentError::Internal)?;
        if order.is_none() {
            info!(charge_id = %charge.id, "webhook: no order matches charge, ignoring");
        }
        Ok(order)
    }

    async fn resolve_order_for_intent(
        &self,
        intent: &PaymentIntent,
    ) -> UseCaseResult<Option<OrderEntity>> {
        if let Some(order) = self.find_by_metadata(&intent.metadata).await? {
            return Ok(Some(order));
        }
        let order = self.find_by_intent(&intent.id).await?;
        if order.is_none() {
            info!(intent_id = %intent.id, "webhook: no order matches intent, ignoring");
        }
        Ok(order)
    }

    async fn resolve_order_by_intent(
        &self,
        intent_id: Option<&str>,
    ) -> UseCaseResult<Option<OrderEntity>> {
        let Some(intent_id) = intent_id else {
            warn!("webhook: event object carries no intent reference");
            return Ok(None);
        };
        let order = self.find_by_intent(intent_id).await?;
        if order.is_none() {
            info!(intent_id, "webhook: no order matches intent, ignoring");
        }
        Ok(order)
    }

    async fn find_by_metadata(
        &self,
        metadata: &std::collections::HashMap<String, String>,
    ) -> UseCaseResult<Option<OrderEntity>> {
        let Some(order_id) = metadata
            .get("order_id")
            .and_then(|value| Uuid::parse_str(value).ok())
        else {
            return Ok(None);
        };
        self.order_repo
            .find_by_id(order_id)
            .await
            .map_err(PaymentError::Internal)
    }

    async fn find_by_intent(&self, intent_id: &str) -> UseCaseResult<Option<OrderEntity>> {
        self.order_repo
            .find_by_intent_id(intent_id)
            .await
            .map_err(PaymentError::Internal)
    }
}
