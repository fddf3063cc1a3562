use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    OnHold,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::OnHold => "on-hold",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "on-hold" => Some(OrderStatus::OnHold),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses from which a payment flow may still move an order forward.
    /// Completed and cancelled orders are never revisited.
    pub fn allows_payment_processing(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Failed | OrderStatus::OnHold
        )
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Completed)
    }
}

/// The set of statuses eligible for forward payment transitions.
pub const PAYMENT_PROCESSING_STATUSES: [OrderStatus; 3] = [
    OrderStatus::Pending,
    OrderStatus::Failed,
    OrderStatus::OnHold,
];

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
