use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    application::{
        stripe_gateway::StripeGateway,
        usecases::{
            reconcile::ChargeReconciler,
            refunds::RefundWorkflow,
            webhook::{WebhookHealth, WebhookUseCase},
        },
    },
    config::config_model::StripeSettings,
    domain::{
        repositories::{orders::OrderRepository, payment_locks::PaymentLockStore},
        value_objects::enums::payment_modes::PaymentMode,
    },
    infrastructure::{
        locks::InMemoryPaymentLockStore, memory::orders::InMemoryOrderRepository,
        stripe::client::StripeClient,
    },
};

#[allow(clippy::too_many_arguments)]
pub fn routes(
    order_repo: Arc<InMemoryOrderRepository>,
    lock_store: Arc<InMemoryPaymentLockStore>,
    stripe_client: Arc<StripeClient>,
    reconciler: Arc<ChargeReconciler<InMemoryOrderRepository, StripeClient>>,
    refunds: Arc<RefundWorkflow<InMemoryOrderRepository, StripeClient>>,
    settings: Arc<StripeSettings>,
    site_url: String,
) -> Router {
    let webhook_usecase = WebhookUseCase::new(
        order_repo,
        lock_store,
        stripe_client,
        reconciler,
        refunds,
        settings,
        site_url,
        Arc::new(WebhookHealth::default()),
    );

    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/webhook/health", get(webhook_health))
        .with_state(Arc::new(webhook_usecase))
}

pub async fn handle_webhook<R, L, G>(
    State(webhook_usecase): State<Arc<WebhookUseCase<R, L, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match webhook_usecase.handle(&body, signature).await {
        Ok(()) => Json(json!({"received": true})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn webhook_health<R, L, G>(
    State(webhook_usecase): State<Arc<WebhookUseCase<R, L, G>>>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    L: PaymentLockStore + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    let health = webhook_usecase.health();
    Json(json!({
        "test": health.snapshot(PaymentMode::Test),
        "live": health.snapshot(PaymentMode::Live),
    }))
    .into_response()
}
