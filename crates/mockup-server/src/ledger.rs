//! Post-generation credit accounting.
//!
//! [`CreditLedger::charge`] turns a [`TokenUsage`] into a cost and removes
//! it from the user's balance. The single-statement decrement is the normal
//! path. The read-modify-write path is only taken when the store reports
//! the atomic statement unavailable *and* the fallback is switched on; two
//! generations of the same user finishing together can then lose one
//! deduction.
//!
//! A failed charge never fails the generation: it is logged and the caller
//! simply does not announce a deduction.

use std::sync::Arc;

use async_trait::async_trait;
use mockup_shared::cost::{apply_deduction, TokenUsage};
use mockup_store::{Database, StoreError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of an atomic decrement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// Applied; carries the new balance.
    Applied(i64),
    /// The store cannot run the atomic statement.
    Unavailable,
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get(&self, user: Uuid) -> Result<i64, StoreError>;

    /// Subtract `amount`, flooring at zero, in one step.
    async fn atomic_decrement(&self, user: Uuid, amount: u64) -> Result<Decrement, StoreError>;

    async fn set(&self, user: Uuid, balance: i64) -> Result<(), StoreError>;
}

/// Balances kept on the SQLite profile rows.
pub struct SqliteBalances {
    db: Arc<Mutex<Database>>,
}

impl SqliteBalances {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BalanceStore for SqliteBalances {
    async fn get(&self, user: Uuid) -> Result<i64, StoreError> {
        self.db.lock().await.get_credits(user)
    }

    async fn atomic_decrement(&self, user: Uuid, amount: u64) -> Result<Decrement, StoreError> {
        match self.db.lock().await.deduct_credits(user, amount) {
            Ok(balance) => Ok(Decrement::Applied(balance)),
            Err(e) if e.is_unsupported_statement() => {
                warn!(error = %e, "atomic credit decrement unavailable");
                Ok(Decrement::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, user: Uuid, balance: i64) -> Result<(), StoreError> {
        self.db.lock().await.set_credits(user, balance)
    }
}

/// A deduction that went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub cost: u64,
    pub balance: i64,
}

pub struct CreditLedger {
    store: Arc<dyn BalanceStore>,
    allow_fallback: bool,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn BalanceStore>, allow_fallback: bool) -> Self {
        Self {
            store,
            allow_fallback,
        }
    }

    pub async fn balance(&self, user: Uuid) -> Result<i64, StoreError> {
        self.store.get(user).await
    }

    /// Charge `usage` to `user`. Returns `None` when no path succeeded.
    pub async fn charge(&self, user: Uuid, usage: TokenUsage) -> Option<Charge> {
        let cost = usage.credit_cost();

        let balance = match self.store.atomic_decrement(user, cost).await {
            Ok(Decrement::Applied(balance)) => balance,
            Ok(Decrement::Unavailable) if self.allow_fallback => {
                match self.read_modify_write(user, cost).await {
                    Ok(balance) => balance,
                    Err(e) => {
                        error!(user = %user, cost, error = %e, "fallback credit deduction failed");
                        return None;
                    }
                }
            }
            Ok(Decrement::Unavailable) => {
                error!(user = %user, cost, "credit deduction skipped: atomic path unavailable and fallback disabled");
                return None;
            }
            Err(e) => {
                error!(user = %user, cost, error = %e, "credit deduction failed");
                return None;
            }
        };

        info!(
            user = %user,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost,
            balance,
            "credits deducted"
        );
        Some(Charge { cost, balance })
    }

    async fn read_modify_write(&self, user: Uuid, cost: u64) -> Result<i64, StoreError> {
        let current = self.store.get(user).await?;
        let balance = apply_deduction(current, cost);
        self.store.set(user, balance).await?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory balances whose atomic path can be switched off.
    struct MemoryBalances {
        balances: Mutex<HashMap<Uuid, i64>>,
        atomic_available: bool,
        fail_writes: bool,
    }

    impl MemoryBalances {
        fn with(user: Uuid, balance: i64) -> Self {
            Self {
                balances: Mutex::new(HashMap::from([(user, balance)])),
                atomic_available: true,
                fail_writes: false,
            }
        }
    }

    #[async_trait]
    impl BalanceStore for MemoryBalances {
        async fn get(&self, user: Uuid) -> Result<i64, StoreError> {
            self.balances
                .lock()
                .await
                .get(&user)
                .copied()
                .ok_or(StoreError::NotFound)
        }

        async fn atomic_decrement(
            &self,
            user: Uuid,
            amount: u64,
        ) -> Result<Decrement, StoreError> {
            if !self.atomic_available {
                return Ok(Decrement::Unavailable);
            }
            let mut balances = self.balances.lock().await;
            let balance = balances.get_mut(&user).ok_or(StoreError::NotFound)?;
            *balance = apply_deduction(*balance, amount);
            Ok(Decrement::Applied(*balance))
        }

        async fn set(&self, user: Uuid, balance: i64) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Migration("read-only".into()));
            }
            self.balances.lock().await.insert(user, balance);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_atomic_path_floors_at_zero() {
        let user = Uuid::new_v4();
        let ledger = CreditLedger::new(Arc::new(MemoryBalances::with(user, 3)), false);

        let charge = ledger.charge(user, TokenUsage::new(0, 10_000)).await;
        assert_eq!(charge, Some(Charge { cost: 11, balance: 0 }));
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_without_fallback_charges_nothing() {
        let user = Uuid::new_v4();
        let mut store = MemoryBalances::with(user, 40);
        store.atomic_available = false;
        let ledger = CreditLedger::new(Arc::new(store), false);

        assert_eq!(ledger.charge(user, TokenUsage::new(1000, 1000)).await, None);
        assert_eq!(ledger.balance(user).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_fallback_used_when_enabled() {
        let user = Uuid::new_v4();
        let mut store = MemoryBalances::with(user, 40);
        store.atomic_available = false;
        let ledger = CreditLedger::new(Arc::new(store), true);

        let charge = ledger.charge(user, TokenUsage::new(1000, 1000)).await;
        assert_eq!(charge, Some(Charge { cost: 2, balance: 38 }));
    }

    #[tokio::test]
    async fn test_failed_fallback_is_swallowed() {
        let user = Uuid::new_v4();
        let mut store = MemoryBalances::with(user, 40);
        store.atomic_available = false;
        store.fail_writes = true;
        let ledger = CreditLedger::new(Arc::new(store), true);

        assert_eq!(ledger.charge(user, TokenUsage::default()).await, None);
        assert_eq!(ledger.balance(user).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_charged() {
        let ledger = CreditLedger::new(Arc::new(MemoryBalances::with(Uuid::new_v4(), 9)), true);
        assert_eq!(ledger.charge(Uuid::new_v4(), TokenUsage::default()).await, None);
    }

    #[tokio::test]
    async fn test_sqlite_balances_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.ensure_profile(user, 10).unwrap();
        let store = SqliteBalances::new(Arc::new(Mutex::new(db)));

        assert_eq!(store.atomic_decrement(user, 4).await.unwrap(), Decrement::Applied(6));
        store.set(user, 2).await.unwrap();
        assert_eq!(store.get(user).await.unwrap(), 2);
    }
}
