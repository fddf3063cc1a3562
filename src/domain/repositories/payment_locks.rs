use uuid::Uuid;

/// Marker value stored while a request holds the lock before an intent id
/// exists yet.
pub const LOCK_IN_PROGRESS: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// An unexpired marker for the same intent (or the in-progress marker)
    /// already exists; the competing request is expected to finish the
    /// transition, so callers return early instead of blocking.
    Held,
}

/// Short-TTL advisory lock guarding the race between the redirect
/// confirmation path and webhook deliveries finalizing the same order.
///
/// Markers expire on their own (five minutes), so a request dying mid-flight
/// never leaves an order permanently locked.
#[cfg_attr(test, mockall::automock)]
pub trait PaymentLockStore: Send + Sync {
    /// Attempts to mark `order_id` as being finalized for `intent_id`.
    /// Callers that have no intent id yet pass [`LOCK_IN_PROGRESS`].
    fn try_lock(&self, order_id: Uuid, intent_id: &str) -> LockOutcome;

    fn unlock(&self, order_id: Uuid);
}
