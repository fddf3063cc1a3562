use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Whether a payment runs against the processor's test or live environment.
/// For webhooks this is always derived from the payload's `livemode` flag,
/// never from local configuration, so a test payload can never be verified
/// against a live secret (or vice versa).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMode {
    Test,
    Live,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Test => "test",
            PaymentMode::Live => "live",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "test" => Some(PaymentMode::Test),
            "live" => Some(PaymentMode::Live),
            _ => None,
        }
    }

    pub fn from_livemode(livemode: bool) -> Self {
        if livemode {
            PaymentMode::Live
        } else {
            PaymentMode::Test
        }
    }
}

impl Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
