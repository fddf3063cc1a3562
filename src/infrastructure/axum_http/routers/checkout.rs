use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    application::{
        stripe_gateway::StripeGateway,
        usecases::{checkout::CheckoutUseCase, reconcile::ChargeReconciler},
    },
    config::config_model::{StoreConfig, StripeSettings},
    domain::repositories::{orders::OrderRepository, payment_locks::PaymentLockStore},
    infrastructure::{
        locks::InMemoryPaymentLockStore, memory::orders::InMemoryOrderRepository,
        stripe::client::StripeClient,
    },
};

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyIntentQuery {
    pub order_id: Uuid,
    pub key: String,
}

pub fn routes(
    order_repo: Arc<InMemoryOrderRepository>,
    lock_store: Arc<InMemoryPaymentLockStore>,
    stripe_client: Arc<StripeClient>,
    reconciler: Arc<ChargeReconciler<InMemoryOrderRepository, StripeClient>>,
    settings: Arc<StripeSettings>,
    store: StoreConfig,
) -> Router {
    let checkout_usecase = CheckoutUseCase::new(
        order_repo,
        lock_store,
        stripe_client,
        reconciler,
        settings,
        store,
    );

    Router::new()
        .route("/confirm", post(confirm_payment))
        .route("/verify", get(verify_intent))
        .with_state(Arc::new(checkout_usecase))
}

pub async fn confirm_payment<R, L, G>(
    State(checkout_usecase): State<Arc<CheckoutUseCase<R, L, G>>>,
    Json(body): Json<ConfirmPaymentRequest>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    match checkout_usecase
        .confirm_payment(body.order_id, body.payment_method)
        .await
    {
        Ok(next_step) => Json(next_step).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Return-from-redirect verification. The shopper lands here after an
/// off-site confirmation step, so the outcome is re-read from the intent.
pub async fn verify_intent<R, L, G>(
    State(checkout_usecase): State<Arc<CheckoutUseCase<R, L, G>>>,
    Query(query): Query<VerifyIntentQuery>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    match checkout_usecase
        .verify_intent(query.order_id, &query.key)
        .await
    {
        Ok(next_step) => Json(next_step).into_response(),
        Err(err) => err.into_response(),
    }
}
