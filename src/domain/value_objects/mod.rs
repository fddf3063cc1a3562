pub mod enums;
pub mod idempotency_keys;
pub mod money;
