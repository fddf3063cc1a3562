use anyhow::Result;

use crate::domain::value_objects::enums::capture_methods::CaptureMethod;

use super::config_model::{ConfiguredMode, DotEnvyConfig, RetryPolicy, StripeSettings};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = super::config_model::Server {
        port: std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .unwrap_or_else(|_| "524288".to_string())
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .unwrap_or_else(|_| "60".to_string())
            .parse()?,
    };

    let stripe = StripeSettings {
        mode: ConfiguredMode::from_str(
            &std::env::var("STRIPE_MODE").unwrap_or_else(|_| "live".to_string()),
        ),
        test_publishable_key: std::env::var("STRIPE_TEST_PUBLISHABLE_KEY").ok(),
        test_secret_key: std::env::var("STRIPE_TEST_SECRET_KEY").ok(),
        live_publishable_key: std::env::var("STRIPE_LIVE_PUBLISHABLE_KEY").ok(),
        live_secret_key: std::env::var("STRIPE_LIVE_SECRET_KEY").ok(),
        test_webhook_secret: std::env::var("STRIPE_TEST_WEBHOOK_SECRET").ok(),
        live_webhook_secret: std::env::var("STRIPE_LIVE_WEBHOOK_SECRET").ok(),
        test_webhook_endpoint_id: std::env::var("STRIPE_TEST_WEBHOOK_ENDPOINT_ID").ok(),
        live_webhook_endpoint_id: std::env::var("STRIPE_LIVE_WEBHOOK_ENDPOINT_ID").ok(),
        capture_method: match std::env::var("STRIPE_CAPTURE_METHOD").as_deref() {
            Ok("manual") => CaptureMethod::Manual,
            _ => CaptureMethod::Automatic,
        },
        save_cards: std::env::var("STRIPE_SAVE_CARDS")
            .map(|v| v == "true")
            .unwrap_or(false),
        register_webhooks: std::env::var("STRIPE_REGISTER_WEBHOOKS")
            .map(|v| v == "true")
            .unwrap_or(false),
        retry_policy: match std::env::var("STRIPE_RETRY_POLICY").as_deref() {
            Ok("never") => RetryPolicy::Never,
            _ => RetryPolicy::Auto,
        },
        statement_descriptor: std::env::var("STRIPE_STATEMENT_DESCRIPTOR").ok(),
    };

    let store = super::config_model::StoreConfig {
        site_url: std::env::var("STORE_SITE_URL").expect("STORE_SITE_URL is invalid"),
        checkout_url: std::env::var("STORE_CHECKOUT_URL").expect("STORE_CHECKOUT_URL is invalid"),
    };

    Ok(DotEnvyConfig {
        server,
        stripe,
        store,
    })
}
