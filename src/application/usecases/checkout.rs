use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::stripe_gateway::StripeGateway,
    config::config_model::{RetryPolicy, StoreConfig, StripeSettings},
    domain::{
        entities::orders::OrderEntity,
        repositories::{
            orders::OrderRepository,
            payment_locks::{LockOutcome, PaymentLockStore},
        },
        value_objects::{
            enums::{
                intent_statuses::IntentStatus,
                order_statuses::OrderStatus,
                payment_modes::PaymentMode,
            },
            idempotency_keys::IdempotencyKey,
            money::MINIMUM_AMOUNT_MINOR,
        },
    },
    infrastructure::stripe::{
        client::CreateIntentParams,
        errors::{StripeError, StripeErrorKind},
        types::PaymentIntent,
    },
};

use super::{localized_last_error, reconcile::ChargeReconciler, PaymentError, UseCaseResult};

/// What the checkout UI should do next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentNextStep {
    /// Payment is settled or being settled; send the shopper to the
    /// order-received page.
    Redirect { redirect_url: String },
    /// The shopper must complete authentication client-side before the
    /// charge can proceed.
    RequiresAction { client_secret: String },
}

pub struct CheckoutUseCase<R, L, G>
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    order_repo: Arc<R>,
    lock_store: Arc<L>,
    stripe_client: Arc<G>,
    reconciler: Arc<ChargeReconciler<R, G>>,
    settings: Arc<StripeSettings>,
    store: StoreConfig,
}

impl<R, L, G> CheckoutUseCase<R, L, G>
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(
        order_repo: Arc<R>,
        lock_store: Arc<L>,
        stripe_client: Arc<G>,
        reconciler: Arc<ChargeReconciler<R, G>>,
        settings: Arc<StripeSettings>,
        store: StoreConfig,
    ) -> Self {
        Self {
            order_repo,
            lock_store,
            stripe_client,
            reconciler,
            settings,
            store,
        }
    }

    /// Creates or reuses the order's payment intent and tells the checkout
    /// UI what to do next.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_method: Option<String>,
    ) -> UseCaseResult<PaymentNextStep> {
        info!(%order_id, "checkout: confirm payment requested");

        let order = self.load_order(order_id).await?;
        if order.is_paid() {
            info!(%order_id, "checkout: order already paid");
            return Ok(self.redirect(&order));
        }

        if order.total_minor < MINIMUM_AMOUNT_MINOR {
            let err = PaymentError::Validation(
                "order total is below the minimum chargeable amount".to_string(),
            );
            warn!(
                %order_id,
                total_minor = order.total_minor,
                status = err.status_code().as_u16(),
                "checkout: order below minimum amount"
            );
            return Err(err);
        }

        let mode = self
            .settings
            .resolve(false)
            .map_err(|err| PaymentError::ConfigurationMissing(err.to_string()))?
            .mode;

        // A stored terminal-success intent means the webhook (or an earlier
        // request) already settled this order; reconcile and bounce the
        // shopper instead of creating anything.
        if let Some(intent_id) = order.intent_id.clone() {
            if let Some(step) = self
                .resume_existing_intent(mode, &order, &intent_id)
                .await?
            {
                return Ok(step);
            }
        }

        let source_id = payment_method
            .or_else(|| order.source_id.clone())
            .ok_or_else(|| {
                let err = PaymentError::Validation("no payment method supplied".to_string());
                warn!(
                    %order_id,
                    status = err.status_code().as_u16(),
                    "checkout: missing payment method"
                );
                err
            })?;

        let customer_id = self.resolve_customer(mode, &order).await?;
        self.order_repo
            .save_payment_source(order_id, Some(source_id.clone()), customer_id.clone())
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "checkout: failed to persist payment source");
                PaymentError::Internal(err)
            })?;

        let params = CreateIntentParams {
            amount_minor: order.total_minor,
            currency: order.currency.clone(),
            payment_method: Some(source_id.clone()),
            customer: customer_id,
            capture_method: self.settings.capture_method,
            setup_future_usage: self
                .settings
                .save_cards
                .then(|| "off_session".to_string()),
            description: Some(format!("Order {}", order.order_key)),
            statement_descriptor: self.settings.statement_descriptor.clone(),
            site_url: self.store.site_url.clone(),
            order_id: order.id.to_string(),
            order_key: order.order_key.clone(),
        };

        let (intent, retry_count) = match self
            .create_intent_with_retry(mode, &order, &source_id, params)
            .await
        {
            Ok(created) => created,
            Err(PaymentError::Declined(reason)) => {
                self.mark_payment_failed(order_id, &reason).await?;
                return Err(PaymentError::Declined(reason));
            }
            Err(err) => return Err(err),
        };

        self.order_repo
            .save_intent_ref(
                order_id,
                &intent.id,
                intent.client_secret.as_deref().unwrap_or_default(),
                mode,
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "checkout: failed to persist intent reference");
                PaymentError::Internal(err)
            })?;
        // Bump the counter so a second physical retry of this logical
        // request derives a key the system can disambiguate locally.
        self.order_repo
            .set_retry_count(order_id, retry_count + 1)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "checkout: failed to persist retry counter");
                PaymentError::Internal(err)
            })?;

        info!(
            %order_id,
            intent_id = %intent.id,
            intent_status = ?intent.status,
            "checkout: payment intent ready"
        );

        self.next_step_for(mode, &order, &intent).await
    }

    /// Redirect-return handler. Re-reads the intent and finalizes the order
    /// under the payment lock, so a racing webhook delivery cannot apply the
    /// same transition twice.
    pub async fn verify_intent(
        &self,
        order_id: Uuid,
        order_key: &str,
    ) -> UseCaseResult<PaymentNextStep> {
        let order = self.load_order(order_id).await?;
        if order.order_key != order_key {
            let err = PaymentError::Validation("order key mismatch".to_string());
            warn!(
                %order_id,
                status = err.status_code().as_u16(),
                "checkout: order key mismatch on verify"
            );
            return Err(err);
        }

        if order.is_paid() {
            return Ok(self.redirect(&order));
        }

        let Some(intent_id) = order.intent_id.clone() else {
            let err = PaymentError::Validation("order has no payment intent".to_string());
            warn!(
                %order_id,
                status = err.status_code().as_u16(),
                "checkout: verify called without intent"
            );
            return Err(err);
        };

        let mode = order
            .payment_mode
            .unwrap_or_else(|| self.settings.effective_mode(false));

        if self.lock_store.try_lock(order_id, &intent_id) == LockOutcome::Held {
            info!(
                %order_id,
                intent_id = %intent_id,
                "checkout: order is being finalized elsewhere, returning early"
            );
            return Ok(self.redirect(&order));
        }

        let result = self.finalize_from_intent(mode, &order, &intent_id).await;
        self.lock_store.unlock(order_id);
        result?;

        Ok(self.redirect(&order))
    }

    async fn finalize_from_intent(
        &self,
        mode: PaymentMode,
        order: &OrderEntity,
        intent_id: &str,
    ) -> UseCaseResult<()> {
        let intent = self
            .stripe_client
            .retrieve_payment_intent(mode, intent_id)
            .await
            .map_err(|err| {
                error!(
                    order_id = %order.id,
                    intent_id,
                    error = ?err,
                    "checkout: failed to retrieve intent on verify"
                );
                PaymentError::from_stripe(err)
            })?;

        match intent.status.as_deref().and_then(IntentStatus::from_str) {
            Some(
                IntentStatus::Succeeded | IntentStatus::RequiresCapture | IntentStatus::Processing,
            ) => {
                if let Some(charge) = intent.latest_charge() {
                    self.reconciler
                        .process_charge(mode, charge, order.id)
                        .await?;
                }
            }
            Some(IntentStatus::RequiresPaymentMethod) => {
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .map(localized_last_error)
                    .unwrap_or_else(|| "The payment was not completed.".to_string());
                self.mark_payment_failed(order.id, &reason).await?;
            }
            _ => {
                info!(
                    order_id = %order.id,
                    intent_status = ?intent.status,
                    "checkout: intent not finalizable yet"
                );
            }
        }

        Ok(())
    }

    async fn resume_existing_intent(
        &self,
        mode: PaymentMode,
        order: &OrderEntity,
        intent_id: &str,
    ) -> UseCaseResult<Option<PaymentNextStep>> {
        let intent = match self.stripe_client.retrieve_payment_intent(mode, intent_id).await {
            Ok(intent) => intent,
            Err(err) => {
                // A stale reference (e.g. mode switched) falls through to a
                // fresh creation instead of blocking checkout.
                warn!(
                    order_id = %order.id,
                    intent_id,
                    error = ?err,
                    "checkout: stored intent could not be retrieved, creating a new one"
                );
                return Ok(None);
            }
        };

        let status = intent.status.as_deref().and_then(IntentStatus::from_str);
        if status.is_some_and(|s| s.is_terminal_success()) {
            info!(
                order_id = %order.id,
                intent_id,
                "checkout: stored intent already succeeded, reconciling"
            );
            if let Some(charge) = intent.latest_charge() {
                self.reconciler
                    .process_charge(mode, charge, order.id)
                    .await?;
            }
            return Ok(Some(self.redirect(order)));
        }

        if matches!(
            status,
            Some(IntentStatus::RequiresAction | IntentStatus::RequiresConfirmation)
        ) {
            if let Some(secret) = intent.client_secret {
                return Ok(Some(PaymentNextStep::RequiresAction {
                    client_secret: secret,
                }));
            }
        }

        Ok(None)
    }

    async fn create_intent_with_retry(
        &self,
        mode: PaymentMode,
        order: &OrderEntity,
        source_id: &str,
        params: CreateIntentParams,
    ) -> UseCaseResult<(PaymentIntent, u32)> {
        let mut retry_count = order.retry_count;
        let key = IdempotencyKey::derive(source_id, &order.order_key, retry_count);

        let first_err = match self
            .stripe_client
            .create_payment_intent(mode, &params, key.as_str())
            .await
        {
            Ok(intent) => return Ok((intent, retry_count)),
            Err(err) => err,
        };

        if first_err.is_idempotency_parameter_mismatch() {
            // The key was used with different parameters; regenerate and
            // retry exactly once.
            retry_count += 1;
            self.order_repo
                .set_retry_count(order.id, retry_count)
                .await
                .map_err(|err| {
                    error!(order_id = %order.id, db_error = ?err, "checkout: failed to bump retry counter");
                    PaymentError::Internal(err)
                })?;
            let bumped = IdempotencyKey::derive(source_id, &order.order_key, retry_count);
            warn!(
                order_id = %order.id,
                idempotency_key = %bumped,
                "checkout: idempotency parameter mismatch, retrying with bumped key"
            );
            let intent = self
                .stripe_client
                .create_payment_intent(mode, &params, bumped.as_str())
                .await
                .map_err(PaymentError::from_stripe)?;
            return Ok((intent, retry_count));
        }

        if self.settings.retry_policy == RetryPolicy::Auto
            && params.setup_future_usage.is_some()
            && first_err.kind() == StripeErrorKind::InvalidRequest
        {
            // Some payment methods reject off-session setup; retry once
            // without tokenization rather than failing the checkout.
            warn!(
                order_id = %order.id,
                error = ?first_err,
                "checkout: retrying without card tokenization"
            );
            let mut without_setup = params.clone();
            without_setup.setup_future_usage = None;
            let intent = self
                .stripe_client
                .create_payment_intent(mode, &without_setup, key.as_str())
                .await
                .map_err(PaymentError::from_stripe)?;
            self.order_repo
                .add_note(
                    order.id,
                    "Payment method could not be saved for future use; charged without tokenization.",
                )
                .await
                .map_err(|err| {
                    error!(order_id = %order.id, db_error = ?err, "checkout: failed to add note");
                    PaymentError::Internal(err)
                })?;
            return Ok((intent, retry_count));
        }

        if first_err.is_retryable() {
            warn!(
                order_id = %order.id,
                error = ?first_err,
                "checkout: transient processor error, retrying once"
            );
            let intent = self
                .stripe_client
                .create_payment_intent(mode, &params, key.as_str())
                .await
                .map_err(PaymentError::from_stripe)?;
            return Ok((intent, retry_count));
        }

        Err(PaymentError::from_stripe(first_err))
    }

    async fn next_step_for(
        &self,
        mode: PaymentMode,
        order: &OrderEntity,
        intent: &PaymentIntent,
    ) -> UseCaseResult<PaymentNextStep> {
        let status = intent
            .status
            .as_deref()
            .and_then(IntentStatus::from_str)
            .ok_or_else(|| {
                PaymentError::Internal(anyhow!(
                    "intent {} returned unrecognized status {:?}",
                    intent.id,
                    intent.status
                ))
            })?;

        match status {
            IntentStatus::RequiresAction | IntentStatus::RequiresConfirmation => {
                let secret = intent.client_secret.clone().ok_or_else(|| {
                    PaymentError::Internal(anyhow!("intent {} is missing client secret", intent.id))
                })?;
                Ok(PaymentNextStep::RequiresAction {
                    client_secret: secret,
                })
            }
            IntentStatus::RequiresPaymentMethod => {
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .map(localized_last_error)
                    .unwrap_or_else(|| "A valid payment method is required.".to_string());
                self.mark_payment_failed(order.id, &reason).await?;
                Err(PaymentError::Declined(reason))
            }
            IntentStatus::Canceled => Err(PaymentError::Validation(
                "the payment intent was canceled".to_string(),
            )),
            IntentStatus::Succeeded | IntentStatus::RequiresCapture | IntentStatus::Processing => {
                if let Some(charge) = intent.latest_charge() {
                    self.reconciler
                        .process_charge(mode, charge, order.id)
                        .await?;
                }
                Ok(self.redirect(order))
            }
        }
    }

    /// A decline ends this attempt: the order moves to failed with the
    /// shopper-facing reason on the audit trail.
    async fn mark_payment_failed(&self, order_id: Uuid, reason: &str) -> UseCaseResult<()> {
        self.order_repo
            .transition_status(
                order_id,
                &[OrderStatus::Pending, OrderStatus::OnHold],
                OrderStatus::Failed,
                &format!("Payment failed: {reason}"),
            )
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "checkout: failed to mark order failed");
                PaymentError::Internal(err)
            })?;
        Ok(())
    }

    /// Reuses the order's processor customer, healing a dangling reference,
    /// or creates one when cards are being saved.
    async fn resolve_customer(
        &self,
        mode: PaymentMode,
        order: &OrderEntity,
    ) -> UseCaseResult<Option<String>> {
        let description = format!("Storefront order {}", order.order_key);

        if let Some(customer_id) = &order.customer_id {
            match self.stripe_client.retrieve_customer(mode, customer_id).await {
                Ok(customer) if !customer.deleted => {
                    if let Err(err) = self
                        .stripe_client
                        .update_customer_description(mode, customer_id, &description)
                        .await
                    {
                        warn!(
                            order_id = %order.id,
                            customer_id,
                            error = ?err,
                            "checkout: failed to refresh customer description"
                        );
                    }
                    return Ok(Some(customer_id.clone()));
                }
                Ok(_) | Err(StripeError::Api(_)) => {
                    info!(
                        order_id = %order.id,
                        customer_id,
                        "checkout: stored customer unusable, creating a new one"
                    );
                }
                Err(err) => {
                    error!(
                        order_id = %order.id,
                        customer_id,
                        error = ?err,
                        "checkout: failed to retrieve customer"
                    );
                    return Err(PaymentError::from_stripe(err));
                }
            }
        } else if !self.settings.save_cards && order.customer_email.is_none() {
            return Ok(None);
        }

        let customer = self
            .stripe_client
            .create_customer(mode, order.customer_email.clone(), &description)
            .await
            .map_err(|err| {
                error!(order_id = %order.id, error = ?err, "checkout: failed to create customer");
                PaymentError::from_stripe(err)
            })?;

        Ok(Some(customer.id))
    }

    async fn load_order(&self, order_id: Uuid) -> UseCaseResult<OrderEntity> {
        self.order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(%order_id, db_error = ?err, "checkout: failed to load order");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::OrderNotFound)
    }

    fn redirect(&self, order: &OrderEntity) -> PaymentNextStep {
        PaymentNextStep::Redirect {
            redirect_url: format!(
                "{}?order_id={}&key={}",
                self.store.checkout_url, order.id, order.order_key
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        application::stripe_gateway::MockStripeGateway,
        config::config_model::ConfiguredMode,
        domain::repositories::{
            orders::MockOrderRepository, payment_locks::MockPaymentLockStore,
        },
        infrastructure::stripe::errors::StripeErrorDetails,
    };

    fn settings() -> StripeSettings {
        StripeSettings {
            mode: ConfiguredMode::Test,
            test_publishable_key: Some("pk_test_1".into()),
            test_secret_key: Some("sk_test_1".into()),
            live_publishable_key: None,
            live_secret_key: None,
            test_webhook_secret: Some("whsec_test".into()),
            live_webhook_secret: None,
            test_webhook_endpoint_id: None,
            live_webhook_endpoint_id: None,
            capture_method: crate::domain::value_objects::enums::capture_methods::CaptureMethod::Automatic,
            save_cards: false,
            register_webhooks: false,
            retry_policy: RetryPolicy::Auto,
            statement_descriptor: None,
        }
    }

    fn store() -> StoreConfig {
        StoreConfig {
            site_url: "https://shop.example".to_string(),
            checkout_url: "https://shop.example/checkout/received".to_string(),
        }
    }

    fn order(id: Uuid) -> OrderEntity {
        let mut order = OrderEntity::new(id, "wc_order_abc", 4999, "usd");
        order.customer_email = None;
        order
    }

    fn usecase(
        repo: MockOrderRepository,
        locks: MockPaymentLockStore,
        stripe: MockStripeGateway,
    ) -> CheckoutUseCase<MockOrderRepository, MockPaymentLockStore, MockStripeGateway> {
        let repo = Arc::new(repo);
        let stripe = Arc::new(stripe);
        let reconciler = Arc::new(ChargeReconciler::new(repo.clone(), stripe.clone()));
        CheckoutUseCase::new(
            repo,
            Arc::new(locks),
            stripe,
            reconciler,
            Arc::new(settings()),
            store(),
        )
    }

    fn intent_from(value: serde_json::Value) -> PaymentIntent {
        serde_json::from_value(value).unwrap()
    }

    fn idempotency_conflict() -> StripeError {
        StripeError::Api(StripeErrorDetails {
            type_: Some("idempotency_error".to_string()),
            code: None,
            decline_code: None,
            message: Some(
                "Keys for idempotent requests can only be used with the same parameters".into(),
            ),
            param: None,
        })
    }

    #[tokio::test]
    async fn below_minimum_amount_fails_validation() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.total_minor = 30;
            Ok(Some(o))
        });

        let uc = usecase(repo, MockPaymentLockStore::new(), MockStripeGateway::new());
        let err = uc.confirm_payment(order_id, Some("pm_1".into())).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn stored_succeeded_intent_short_circuits_creation() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.intent_id = Some("pi_1".to_string());
            Ok(Some(o))
        });
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .returning(|_, _, _, _| Ok(false));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_payment_intent()
            .returning(|_, _| {
                Ok(intent_from(json!({
                    "id": "pi_1",
                    "status": "succeeded",
                    "charges": {"data": [{"id": "ch_1", "status": "succeeded", "captured": true}]}
                })))
            });
        stripe.expect_create_payment_intent().times(0);

        let uc = usecase(repo, MockPaymentLockStore::new(), stripe);
        let step = uc.confirm_payment(order_id, Some("pm_1".into())).await.unwrap();
        assert!(matches!(step, PaymentNextStep::Redirect { .. }));
    }

    #[tokio::test]
    async fn parameter_mismatch_bumps_key_and_retries_once() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_save_payment_source().returning(|_, _, _| Ok(()));
        repo.expect_set_retry_count().returning(|_, _| Ok(()));
        repo.expect_save_intent_ref().returning(|_, _, _, _| Ok(()));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_payment_intent()
            .withf(|_, _, key| key == "pm_1_wc_order_abc")
            .times(1)
            .returning(|_, _, _| Err(idempotency_conflict()));
        stripe
            .expect_create_payment_intent()
            .withf(|_, _, key| key == "pm_1_wc_order_abc_1")
            .times(1)
            .returning(|_, _, _| {
                Ok(intent_from(json!({
                    "id": "pi_2",
                    "status": "requires_action",
                    "client_secret": "pi_2_secret"
                })))
            });

        let uc = usecase(repo, MockPaymentLockStore::new(), stripe);
        let step = uc.confirm_payment(order_id, Some("pm_1".into())).await.unwrap();
        assert_eq!(
            step,
            PaymentNextStep::RequiresAction {
                client_secret: "pi_2_secret".to_string()
            }
        );
    }

    #[tokio::test]
    async fn declined_card_surfaces_localized_message() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_save_payment_source().returning(|_, _, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, _, to, note| {
                *to == OrderStatus::Failed
                    && note.contains("Your card has insufficient funds.")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut stripe = MockStripeGateway::new();
        stripe.expect_create_payment_intent().returning(|_, _, _| {
            Err(StripeError::Api(StripeErrorDetails {
                type_: Some("card_error".to_string()),
                code: Some("card_declined".to_string()),
                decline_code: Some("insufficient_funds".to_string()),
                message: Some("Your card has insufficient funds.".to_string()),
                param: None,
            }))
        });

        let uc = usecase(repo, MockPaymentLockStore::new(), stripe);
        let err = uc.confirm_payment(order_id, Some("pm_1".into())).await.unwrap_err();
        match err {
            PaymentError::Declined(message) => {
                assert_eq!(message, "Your card has insufficient funds.")
            }
            other => panic!("expected decline, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn intent_needing_a_new_payment_method_fails_the_order() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(order(order_id))));
        repo.expect_save_payment_source().returning(|_, _, _| Ok(()));
        repo.expect_save_intent_ref().returning(|_, _, _, _| Ok(()));
        repo.expect_set_retry_count().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, from, to, note| {
                from.contains(&OrderStatus::Pending)
                    && *to == OrderStatus::Failed
                    && note.contains("Your card was declined.")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut stripe = MockStripeGateway::new();
        stripe.expect_create_payment_intent().returning(|_, _, _| {
            Ok(intent_from(json!({
                "id": "pi_3",
                "status": "requires_payment_method",
                "last_payment_error": {
                    "type": "card_error",
                    "code": "card_declined",
                    "decline_code": "generic_decline",
                    "message": "raw"
                }
            })))
        });

        let uc = usecase(repo, MockPaymentLockStore::new(), stripe);
        let err = uc.confirm_payment(order_id, Some("pm_1".into())).await.unwrap_err();
        match err {
            PaymentError::Declined(message) => {
                assert_eq!(message, "Your card was declined.")
            }
            other => panic!("expected decline, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_returns_early_when_lock_is_held() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.intent_id = Some("pi_1".to_string());
            o.payment_mode = Some(PaymentMode::Test);
            Ok(Some(o))
        });

        let mut locks = MockPaymentLockStore::new();
        locks
            .expect_try_lock()
            .returning(|_, _| LockOutcome::Held);

        let mut stripe = MockStripeGateway::new();
        stripe.expect_retrieve_payment_intent().times(0);

        let uc = usecase(repo, locks, stripe);
        let step = uc.verify_intent(order_id, "wc_order_abc").await.unwrap();
        assert!(matches!(step, PaymentNextStep::Redirect { .. }));
    }

    #[tokio::test]
    async fn verify_finalizes_succeeded_intent_under_lock() {
        let order_id = Uuid::new_v4();
        let mut repo = MockOrderRepository::new();
        repo.expect_find_by_id().returning(move |_| {
            let mut o = order(order_id);
            o.intent_id = Some("pi_1".to_string());
            o.payment_mode = Some(PaymentMode::Test);
            Ok(Some(o))
        });
        repo.expect_set_charge_captured().returning(|_, _| Ok(()));
        repo.expect_transition_status()
            .withf(|_, _, to, _| *to == OrderStatus::Completed)
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_transaction_id().returning(|_, _| Ok(()));
        repo.expect_reduce_stock_once().returning(|_| Ok(true));

        let mut locks = MockPaymentLockStore::new();
        locks
            .expect_try_lock()
            .returning(|_, _| LockOutcome::Acquired);
        locks.expect_unlock().times(1).returning(|_| ());

        let mut stripe = MockStripeGateway::new();
        stripe.expect_retrieve_payment_intent().returning(|_, _| {
            Ok(intent_from(json!({
                "id": "pi_1",
                "status": "succeeded",
                "charges": {"data": [{"id": "ch_1", "status": "succeeded", "captured": true}]}
            })))
        });

        let uc = usecase(repo, locks, stripe);
        let step = uc.verify_intent(order_id, "wc_order_abc").await.unwrap();
        assert!(matches!(step, PaymentNextStep::Redirect { .. }));
    }
}
