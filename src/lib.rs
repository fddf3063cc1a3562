pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    application::stripe_gateway::StripeGateway,
    config::config_model::StripeSettings,
    domain::value_objects::enums::payment_modes::PaymentMode,
    infrastructure::{axum_http::http_serve, stripe::client::StripeClient},
};

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dotenvy_env = config::config_loader::load()?;
    info!("ENV has been loaded");

    let config = Arc::new(dotenvy_env);

    if config.stripe.register_webhooks {
        let settings = Arc::new(config.stripe.clone());
        let stripe_client = StripeClient::new(Arc::clone(&settings));
        register_webhook_endpoints(&settings, &stripe_client, &config.store.site_url).await;
    }

    http_serve::start(config).await?;

    Ok(())
}

/// Registers this deployment's webhook receiver with the processor for every
/// mode that has credentials. A previously registered endpoint is kept when
/// it still points at this receiver and replaced when it does not.
/// Registration failures are logged and do not stop startup; deliveries can
/// still be configured by hand.
async fn register_webhook_endpoints<G>(settings: &StripeSettings, stripe_client: &G, site_url: &str)
where
    G: StripeGateway,
{
    let url = format!("{site_url}/api/v1/stripe/webhook");

    for mode in [PaymentMode::Test, PaymentMode::Live] {
        if settings.secret_key_for(mode).is_err() {
            continue;
        }

        if let Some(endpoint_id) = settings.webhook_endpoint_id_for(mode) {
            match stripe_client
                .retrieve_webhook_endpoint(mode, endpoint_id)
                .await
            {
                Ok(existing) if existing.url.as_deref() == Some(url.as_str()) => {
                    info!(%mode, endpoint_id, "webhook endpoint already registered");
                    continue;
                }
                Ok(_) => {
                    // Points at another receiver (e.g. the site URL changed);
                    // replace it so deliveries reach this deployment.
                    if let Err(err) = stripe_client
                        .delete_webhook_endpoint(mode, endpoint_id)
                        .await
                    {
                        warn!(
                            %mode,
                            endpoint_id,
                            error = ?err,
                            "failed to remove stale webhook endpoint"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        %mode,
                        endpoint_id,
                        error = ?err,
                        "failed to inspect registered webhook endpoint, registering a new one"
                    );
                }
            }
        }

        match stripe_client.create_webhook_endpoint(mode, &url).await {
            Ok(endpoint) => {
                info!(%mode, endpoint_id = %endpoint.id, "webhook endpoint registered");
            }
            Err(err) => {
                warn!(%mode, error = ?err, "webhook endpoint registration failed");
            }
        }
    }
}
