use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Account, AccountId, CustomerId, Loan, LoanId, LoanPayment, Transaction};

/// Errors surfaced by a unit of work.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An exclusive hold could not be acquired within the configured wait.
    #[error("Timed out waiting for a lock on {0}")]
    LockTimeout(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Tuning shared by every store backend.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Upper bound on how long an operation waits for a row lock
    pub lock_timeout: Duration,
    pub max_connections: u32,
}

impl StoreOptions {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_connections: 8,
        }
    }
}

/// A store that hands out units of work for ledger operations.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;

    async fn begin(&self) -> StoreResult<Self::Unit>;
}

/// One atomic scope over account and loan rows.
///
/// `lock_*` returns the current row and holds it exclusively until the unit
/// commits or rolls back. Rows may only be saved after being locked by the
/// same unit. Dropping a unit without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn save_account(&mut self, account: &Account) -> StoreResult<()>;

    /// Insert an immutable ledger entry, assigning its sequence number.
    async fn append_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()>;

    async fn lock_loan(&mut self, id: LoanId) -> StoreResult<Option<Loan>>;

    async fn save_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    async fn append_payment(&mut self, payment: &LoanPayment) -> StoreResult<()>;

    /// Whether `customer_id` is on record as a holder of `account_id`.
    async fn is_account_holder(
        &mut self,
        customer_id: CustomerId,
        account_id: AccountId,
    ) -> StoreResult<bool>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}
