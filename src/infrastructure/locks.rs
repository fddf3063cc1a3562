use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;
use uuid::Uuid;

use crate::domain::repositories::payment_locks::{LockOutcome, PaymentLockStore};

const LOCK_TTL: Duration = Duration::from_secs(300);

/// Process-local payment lock. Markers carry the intent id being finalized
/// and expire after five minutes, so a crashed request never wedges an
/// order.
pub struct InMemoryPaymentLockStore {
    markers: Mutex<HashMap<Uuid, (String, Instant)>>,
    ttl: Duration,
}

impl InMemoryPaymentLockStore {
    pub fn new() -> Self {
        Self::with_ttl(LOCK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            markers: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for InMemoryPaymentLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentLockStore for InMemoryPaymentLockStore {
    fn try_lock(&self, order_id: Uuid, intent_id: &str) -> LockOutcome {
        use crate::domain::repositories::payment_locks::LOCK_IN_PROGRESS;

        let mut markers = self.markers.lock().unwrap();

        if let Some((stored, taken_at)) = markers.get(&order_id) {
            let unexpired = taken_at.elapsed() < self.ttl;
            if unexpired && (stored == intent_id || stored == LOCK_IN_PROGRESS) {
                debug!(%order_id, intent_id, "payment lock held");
                return LockOutcome::Held;
            }
        }

        markers.insert(order_id, (intent_id.to_string(), Instant::now()));
        LockOutcome::Acquired
    }

    fn unlock(&self, order_id: Uuid) {
        self.markers.lock().unwrap().remove(&order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_for_same_intent_is_held() {
        let locks = InMemoryPaymentLockStore::new();
        let order_id = Uuid::new_v4();

        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Acquired);
        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Held);

        locks.unlock(order_id);
        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Acquired);
    }

    #[test]
    fn in_progress_marker_blocks_any_intent() {
        use crate::domain::repositories::payment_locks::LOCK_IN_PROGRESS;

        let locks = InMemoryPaymentLockStore::new();
        let order_id = Uuid::new_v4();

        assert_eq!(
            locks.try_lock(order_id, LOCK_IN_PROGRESS),
            LockOutcome::Acquired
        );
        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Held);
    }

    #[test]
    fn a_different_intent_takes_over_the_marker() {
        let locks = InMemoryPaymentLockStore::new();
        let order_id = Uuid::new_v4();

        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Acquired);
        assert_eq!(locks.try_lock(order_id, "pi_2"), LockOutcome::Acquired);
        assert_eq!(locks.try_lock(order_id, "pi_2"), LockOutcome::Held);
    }

    #[test]
    fn expired_marker_can_be_reacquired() {
        let locks = InMemoryPaymentLockStore::with_ttl(Duration::from_millis(10));
        let order_id = Uuid::new_v4();

        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Acquired);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(locks.try_lock(order_id, "pi_1"), LockOutcome::Acquired);
    }

    #[test]
    fn locks_are_scoped_per_order() {
        let locks = InMemoryPaymentLockStore::new();

        assert_eq!(locks.try_lock(Uuid::new_v4(), "pi_1"), LockOutcome::Acquired);
        assert_eq!(locks.try_lock(Uuid::new_v4(), "pi_1"), LockOutcome::Acquired);
    }
}
