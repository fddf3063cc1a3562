pub mod capture_methods;
pub mod intent_statuses;
pub mod order_statuses;
pub mod payment_modes;
