use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use outlay_core::domain::expense::ExpenseId;

/// Per-expense serialization. Two decisions racing on the same expense are
/// applied one after the other; decisions on different expenses never wait
/// on each other.
#[derive(Default)]
pub struct ExpenseLockMap {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExpenseLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, expense_id: &ExpenseId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // A count of one means no guard is held and no acquirer is
            // waiting, so the entry can go; the map must not grow with
            // every expense ever decided.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(expense_id.0.clone()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn entry_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}
