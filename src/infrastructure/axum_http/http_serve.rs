use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    application::usecases::{reconcile::ChargeReconciler, refunds::RefundWorkflow},
    config::config_model::DotEnvyConfig,
    infrastructure::{
        axum_http::{default_routers, routers},
        locks::InMemoryPaymentLockStore,
        memory::orders::InMemoryOrderRepository,
        stripe::client::StripeClient,
    },
};

pub async fn start(config: Arc<DotEnvyConfig>) -> Result<()> {
    let settings = Arc::new(config.stripe.clone());
    let order_repo = Arc::new(InMemoryOrderRepository::new());
    let lock_store = Arc::new(InMemoryPaymentLockStore::new());
    let stripe_client = Arc::new(StripeClient::new(Arc::clone(&settings)));
    let reconciler = Arc::new(ChargeReconciler::new(
        Arc::clone(&order_repo),
        Arc::clone(&stripe_client),
    ));
    let refunds = Arc::new(RefundWorkflow::new(
        Arc::clone(&order_repo),
        Arc::clone(&stripe_client),
        Arc::clone(&settings),
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/checkout",
            routers::checkout::routes(
                Arc::clone(&order_repo),
                Arc::clone(&lock_store),
                Arc::clone(&stripe_client),
                Arc::clone(&reconciler),
                Arc::clone(&settings),
                config.store.clone(),
            ),
        )
        .nest(
            "/api/v1/stripe",
            routers::stripe_webhook::routes(
                Arc::clone(&order_repo),
                Arc::clone(&lock_store),
                Arc::clone(&stripe_client),
                Arc::clone(&reconciler),
                Arc::clone(&refunds),
                Arc::clone(&settings),
                config.store.site_url.clone(),
            ),
        )
        .nest(
            "/api/v1/admin/orders",
            routers::admin_charges::routes(
                Arc::clone(&order_repo),
                Arc::clone(&stripe_client),
                Arc::clone(&reconciler),
                Arc::clone(&refunds),
                Arc::clone(&settings),
            ),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout)))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit.try_into()?))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
