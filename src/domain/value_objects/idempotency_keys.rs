use std::fmt::Display;

/// Idempotency key handed to the processor when creating a payment intent.
///
/// The key is derived from the payment source token and the order key so a
/// retried network attempt of the same logical request deduplicates on the
/// processor side. Once a previous attempt failed with a key/parameter
/// mismatch, the order's retry counter is appended, producing a fresh key the
/// processor treats as new while the system can still correlate it locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(source_id: &str, order_key: &str, retry_count: u32) -> Self {
        let base = format!("{}_{}", source_id, order_key);
        if retry_count > 0 {
            IdempotencyKey(format!("{}_{}", base, retry_count))
        } else {
            IdempotencyKey(base)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_stable_key_without_retries() {
        let a = IdempotencyKey::derive("pm_123", "wc_order_abc", 0);
        let b = IdempotencyKey::derive("pm_123", "wc_order_abc", 0);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "pm_123_wc_order_abc");
    }

    #[test]
    fn retry_counter_bumps_the_key() {
        let base = IdempotencyKey::derive("pm_123", "wc_order_abc", 0);
        let bumped = IdempotencyKey::derive("pm_123", "wc_order_abc", 2);
        assert_ne!(base, bumped);
        assert_eq!(bumped.as_str(), "pm_123_wc_order_abc_2");
    }
}
