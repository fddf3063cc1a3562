use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    application::{
        stripe_gateway::StripeGateway,
        usecases::{
            admin::AdminChargeUseCase,
            reconcile::ChargeReconciler,
            refunds::{RefundWorkflow, RequesterInfo},
        },
    },
    config::config_model::StripeSettings,
    domain::repositories::orders::OrderRepository,
    infrastructure::{memory::orders::InMemoryOrderRepository, stripe::client::StripeClient},
};

#[derive(Debug, Deserialize)]
pub struct CaptureChargeRequest {
    pub amount_minor: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RefundChargeRequest {
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
}

type AdminState<R, G> = (Arc<AdminChargeUseCase<R, G>>, Arc<RefundWorkflow<R, G>>);

pub fn routes(
    order_repo: Arc<InMemoryOrderRepository>,
    stripe_client: Arc<StripeClient>,
    reconciler: Arc<ChargeReconciler<InMemoryOrderRepository, StripeClient>>,
    refunds: Arc<RefundWorkflow<InMemoryOrderRepository, StripeClient>>,
    settings: Arc<StripeSettings>,
) -> Router {
    let admin_usecase = Arc::new(AdminChargeUseCase::new(
        order_repo,
        stripe_client,
        reconciler,
        settings,
    ));

    Router::new()
        .route("/:order_id/capture", post(capture_charge))
        .route("/:order_id/void", post(void_charge))
        .route("/:order_id/refund", post(refund_charge))
        .with_state((admin_usecase, refunds))
}

pub async fn capture_charge<R, G>(
    State((admin_usecase, _)): State<AdminState<R, G>>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CaptureChargeRequest>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    match admin_usecase
        .capture_charge(order_id, body.amount_minor)
        .await
    {
        Ok(()) => Json(json!({"captured": true})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn void_charge<R, G>(
    State((admin_usecase, _)): State<AdminState<R, G>>,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    match admin_usecase.void_charge(order_id).await {
        Ok(()) => Json(json!({"voided": true})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn refund_charge<R, G>(
    State((_, refund_workflow)): State<AdminState<R, G>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RefundChargeRequest>,
) -> impl IntoResponse
where
    R: OrderRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    let requester = requester_info(&headers);
    match refund_workflow
        .refund(order_id, body.amount_minor, body.reason, requester)
        .await
    {
        Ok(refund_id) => Json(json!({"refund_id": refund_id})).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Originating request details forwarded to the processor as fraud signals.
fn requester_info(headers: &HeaderMap) -> RequesterInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    RequesterInfo {
        ip: header("x-forwarded-for"),
        user_agent: header("user-agent"),
        referer: header("referer"),
    }
}
