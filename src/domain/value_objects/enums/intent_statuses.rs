use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a processor-side payment intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Processing,
    Succeeded,
    Canceled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Processing => "processing",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "requires_payment_method" => Some(IntentStatus::RequiresPaymentMethod),
            "requires_confirmation" => Some(IntentStatus::RequiresConfirmation),
            "requires_action" => Some(IntentStatus::RequiresAction),
            "requires_capture" => Some(IntentStatus::RequiresCapture),
            "processing" => Some(IntentStatus::Processing),
            "succeeded" => Some(IntentStatus::Succeeded),
            "canceled" => Some(IntentStatus::Canceled),
            _ => None,
        }
    }

    /// Terminal-success check used to short-circuit intent creation when a
    /// customer reloads the return URL after the webhook already completed
    /// the order.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, IntentStatus::Succeeded)
    }
}

impl Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
