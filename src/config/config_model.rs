use thiserror::Error;

use crate::domain::value_objects::enums::{
    capture_methods::CaptureMethod, payment_modes::PaymentMode,
};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub stripe: StripeSettings,
    pub store: StoreConfig,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Canonical storefront URL, stamped into intent metadata and matched
    /// against incoming webhook payloads.
    pub site_url: String,
    pub checkout_url: String,
}

/// Which credential pair the gateway runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfiguredMode {
    Test,
    #[default]
    Live,
    /// Live for shoppers while privileged callers keep exercising the test
    /// keys. Used to rehearse flows on a live store.
    TestAdminOnly,
}

impl ConfiguredMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "test" => ConfiguredMode::Test,
            "test_admin_only" => ConfiguredMode::TestAdminOnly,
            _ => ConfiguredMode::Live,
        }
    }
}

/// What to do when a confirmation fails with an error that a fresh attempt
/// without a saved payment method might clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Auto,
    Never,
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub mode: ConfiguredMode,
    pub test_publishable_key: Option<String>,
    pub test_secret_key: Option<String>,
    pub live_publishable_key: Option<String>,
    pub live_secret_key: Option<String>,
    pub test_webhook_secret: Option<String>,
    pub live_webhook_secret: Option<String>,
    /// Endpoint ids from an earlier registration, reconciled against the
    /// current receiver URL at startup.
    pub test_webhook_endpoint_id: Option<String>,
    pub live_webhook_endpoint_id: Option<String>,
    pub capture_method: CaptureMethod,
    pub save_cards: bool,
    pub register_webhooks: bool,
    pub retry_policy: RetryPolicy,
    pub statement_descriptor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub mode: PaymentMode,
    pub publishable_key: String,
    pub secret_key: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("stripe {0} keys are not configured")]
    MissingKeys(PaymentMode),
    #[error("stripe {0} webhook secret is not configured")]
    MissingWebhookSecret(PaymentMode),
}

impl StripeSettings {
    /// Which mode a caller operates in. `TestAdminOnly` splits on privilege
    /// so admins can rehearse against test keys on a live store.
    pub fn effective_mode(&self, privileged: bool) -> PaymentMode {
        match self.mode {
            ConfiguredMode::Test => PaymentMode::Test,
            ConfiguredMode::Live => PaymentMode::Live,
            ConfiguredMode::TestAdminOnly => {
                if privileged {
                    PaymentMode::Test
                } else {
                    PaymentMode::Live
                }
            }
        }
    }

    pub fn resolve(&self, privileged: bool) -> Result<ResolvedCredentials, ConfigError> {
        let mode = self.effective_mode(privileged);
        let (publishable, secret) = match mode {
            PaymentMode::Test => (&self.test_publishable_key, &self.test_secret_key),
            PaymentMode::Live => (&self.live_publishable_key, &self.live_secret_key),
        };
        match (publishable, secret) {
            (Some(p), Some(s)) if !p.is_empty() && !s.is_empty() => Ok(ResolvedCredentials {
                mode,
                publishable_key: p.clone(),
                secret_key: s.clone(),
            }),
            _ => Err(ConfigError::MissingKeys(mode)),
        }
    }

    pub fn secret_key_for(&self, mode: PaymentMode) -> Result<&str, ConfigError> {
        let key = match mode {
            PaymentMode::Test => self.test_secret_key.as_deref(),
            PaymentMode::Live => self.live_secret_key.as_deref(),
        };
        key.filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingKeys(mode))
    }

    pub fn webhook_endpoint_id_for(&self, mode: PaymentMode) -> Option<&str> {
        let id = match mode {
            PaymentMode::Test => self.test_webhook_endpoint_id.as_deref(),
            PaymentMode::Live => self.live_webhook_endpoint_id.as_deref(),
        };
        id.filter(|id| !id.is_empty())
    }

    /// Fails closed: a delivery for a mode with no configured secret is
    /// rejected rather than verified against the other mode's secret.
    pub fn webhook_secret_for(&self, mode: PaymentMode) -> Result<&str, ConfigError> {
        let secret = match mode {
            PaymentMode::Test => self.test_webhook_secret.as_deref(),
            PaymentMode::Live => self.live_webhook_secret.as_deref(),
        };
        secret
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingWebhookSecret(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StripeSettings {
        StripeSettings {
            mode: ConfiguredMode::Test,
            test_publishable_key: Some("pk_test_1".into()),
            test_secret_key: Some("sk_test_1".into()),
            live_publishable_key: Some("pk_live_1".into()),
            live_secret_key: Some("sk_live_1".into()),
            test_webhook_secret: Some("whsec_test".into()),
            live_webhook_secret: None,
            test_webhook_endpoint_id: None,
            live_webhook_endpoint_id: None,
            capture_method: CaptureMethod::Automatic,
            save_cards: true,
            register_webhooks: false,
            retry_policy: RetryPolicy::Auto,
            statement_descriptor: None,
        }
    }

    #[test]
    fn test_admin_only_splits_on_privilege() {
        let mut s = settings();
        s.mode = ConfiguredMode::TestAdminOnly;

        assert_eq!(s.effective_mode(true), PaymentMode::Test);
        assert_eq!(s.effective_mode(false), PaymentMode::Live);
    }

    #[test]
    fn resolve_rejects_blank_keys() {
        let mut s = settings();
        s.test_secret_key = Some(String::new());

        assert!(matches!(
            s.resolve(false),
            Err(ConfigError::MissingKeys(PaymentMode::Test))
        ));
    }

    #[test]
    fn webhook_secret_fails_closed_per_mode() {
        let s = settings();

        assert_eq!(s.webhook_secret_for(PaymentMode::Test).unwrap(), "whsec_test");
        assert!(matches!(
            s.webhook_secret_for(PaymentMode::Live),
            Err(ConfigError::MissingWebhookSecret(PaymentMode::Live))
        ));
    }
}
