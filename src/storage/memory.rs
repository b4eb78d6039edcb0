//! In-process ledger store.
//!
//! Every account and loan row sits behind its own async mutex. A unit of work
//! owns the guards of the rows it locked and stages its writes privately, so
//! nothing becomes visible to other units until commit. Faults can be injected
//! to exercise rollback paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Account, AccountHolder, AccountId, CustomerId, HolderRole, Loan, LoanId, LoanPayment,
    Transaction,
};

use super::{LedgerStore, StoreError, StoreOptions, StoreResult, UnitOfWork};

/// A write step that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SaveAccount,
    AppendTransaction,
    SaveLoan,
    AppendPayment,
    Commit,
}

#[derive(Default)]
struct MemoryState {
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
    loans: DashMap<LoanId, Arc<Mutex<Loan>>>,
    holders: DashMap<(CustomerId, AccountId), HolderRole>,
    transactions: Mutex<Vec<Transaction>>,
    payments: Mutex<Vec<LoanPayment>>,
    sequence: AtomicI64,
    faults: DashSet<Fault>,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            lock_timeout: options.lock_timeout,
        }
    }

    pub fn insert_account(&self, account: Account) {
        self.state
            .accounts
            .insert(account.id, Arc::new(Mutex::new(account)));
    }

    pub fn insert_loan(&self, loan: Loan) {
        self.state.loans.insert(loan.id, Arc::new(Mutex::new(loan)));
    }

    pub fn link_holder(&self, holder: &AccountHolder) {
        self.state
            .holders
            .insert((holder.customer_id, holder.account_id), holder.role);
    }

    /// Make the next occurrence of `fault` fail with a backend error.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.faults.insert(fault);
    }

    /// Committed state of an account. Waits for any unit holding the row.
    pub async fn account(&self, id: AccountId) -> Option<Account> {
        let row = self.state.accounts.get(&id).map(|r| Arc::clone(r.value()))?;
        let account = row.lock().await.clone();
        Some(account)
    }

    pub async fn loan(&self, id: LoanId) -> Option<Loan> {
        let row = self.state.loans.get(&id).map(|r| Arc::clone(r.value()))?;
        let loan = row.lock().await.clone();
        Some(loan)
    }

    /// Committed transactions for an account, in sequence order.
    pub async fn transactions(&self, account_id: AccountId) -> Vec<Transaction> {
        let mut entries: Vec<Transaction> = self
            .state
            .transactions
            .lock()
            .await
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(|t| t.sequence);
        entries
    }

    pub async fn payments(&self, loan_id: LoanId) -> Vec<LoanPayment> {
        self.state
            .payments
            .lock()
            .await
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> StoreResult<MemoryUnit> {
        Ok(MemoryUnit {
            state: Arc::clone(&self.state),
            lock_timeout: self.lock_timeout,
            accounts: HashMap::new(),
            loans: HashMap::new(),
            staged_accounts: HashMap::new(),
            staged_loans: HashMap::new(),
            staged_transactions: Vec::new(),
            staged_payments: Vec::new(),
        })
    }
}

pub struct MemoryUnit {
    state: Arc<MemoryState>,
    lock_timeout: Duration,
    accounts: HashMap<AccountId, OwnedMutexGuard<Account>>,
    loans: HashMap<LoanId, OwnedMutexGuard<Loan>>,
    staged_accounts: HashMap<AccountId, Account>,
    staged_loans: HashMap<LoanId, Loan>,
    staged_transactions: Vec<Transaction>,
    staged_payments: Vec<LoanPayment>,
}

impl MemoryUnit {
    fn trip(&self, fault: Fault) -> StoreResult<()> {
        if self.state.faults.remove(&fault).is_some() {
            return Err(anyhow::anyhow!("injected fault: {:?}", fault).into());
        }
        Ok(())
    }

    async fn acquire<T>(&self, row: Arc<Mutex<T>>, what: String) -> StoreResult<OwnedMutexGuard<T>> {
        tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(what))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        if let Some(staged) = self.staged_accounts.get(&id) {
            return Ok(Some(staged.clone()));
        }
        if let Some(guard) = self.accounts.get(&id) {
            return Ok(Some((**guard).clone()));
        }

        // Clone the row handle out so no map shard stays locked across the wait
        let Some(row) = self.state.accounts.get(&id).map(|r| Arc::clone(r.value())) else {
            return Ok(None);
        };
        let guard = self.acquire(row, format!("account {}", id)).await?;
        let account = (*guard).clone();
        self.accounts.insert(id, guard);
        Ok(Some(account))
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        self.trip(Fault::SaveAccount)?;
        if !self.accounts.contains_key(&account.id) {
            return Err(anyhow::anyhow!("Account {} was not locked by this unit", account.id).into());
        }
        self.staged_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn append_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()> {
        self.trip(Fault::AppendTransaction)?;
        transaction.sequence = self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.staged_transactions.push(transaction.clone());
        Ok(())
    }

    async fn lock_loan(&mut self, id: LoanId) -> StoreResult<Option<Loan>> {
        if let Some(staged) = self.staged_loans.get(&id) {
            return Ok(Some(staged.clone()));
        }
        if let Some(guard) = self.loans.get(&id) {
            return Ok(Some((**guard).clone()));
        }

        let Some(row) = self.state.loans.get(&id).map(|r| Arc::clone(r.value())) else {
            return Ok(None);
        };
        let guard = self.acquire(row, format!("loan {}", id)).await?;
        let loan = (*guard).clone();
        self.loans.insert(id, guard);
        Ok(Some(loan))
    }

    async fn save_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        self.trip(Fault::SaveLoan)?;
        if !self.loans.contains_key(&loan.id) {
            return Err(anyhow::anyhow!("Loan {} was not locked by this unit", loan.id).into());
        }
        self.staged_loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn append_payment(&mut self, payment: &LoanPayment) -> StoreResult<()> {
        self.trip(Fault::AppendPayment)?;
        self.staged_payments.push(payment.clone());
        Ok(())
    }

    async fn is_account_holder(
        &mut self,
        customer_id: CustomerId,
        account_id: AccountId,
    ) -> StoreResult<bool> {
        Ok(self.state.holders.contains_key(&(customer_id, account_id)))
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.trip(Fault::Commit)?;

        // Rows are released before the log entries appear, so any entry a
        // reader sees already has its row published.
        let state = Arc::clone(&self.state);
        let mut transactions = state.transactions.lock().await;
        let mut payments = state.payments.lock().await;

        for (id, account) in self.staged_accounts.drain() {
            if let Some(guard) = self.accounts.get_mut(&id) {
                **guard = account;
            }
        }
        for (id, loan) in self.staged_loans.drain() {
            if let Some(guard) = self.loans.get_mut(&id) {
                **guard = loan;
            }
        }
        self.accounts.clear();
        self.loans.clear();

        transactions.append(&mut self.staged_transactions);
        payments.append(&mut self.staged_payments);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        // Staged writes are discarded and the row guards released on drop
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;

    fn store_with_account(balance: i64) -> (MemoryStore, AccountId) {
        let store = MemoryStore::new();
        let mut account = Account::open();
        account.balance = balance;
        let id = account.id;
        store.insert_account(account);
        (store, id)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, id) = store_with_account(500);

        let mut unit = store.begin().await.unwrap();
        let mut account = unit.lock_account(id).await.unwrap().unwrap();
        account.balance = 900;
        unit.save_account(&account).await.unwrap();

        // Re-reading inside the unit sees the staged value
        assert_eq!(unit.lock_account(id).await.unwrap().unwrap().balance, 900);
        unit.rollback().await.unwrap();

        assert_eq!(store.account(id).await.unwrap().balance, 500);
    }

    #[tokio::test]
    async fn test_commit_publishes_rows_and_records() {
        let (store, id) = store_with_account(0);

        let mut unit = store.begin().await.unwrap();
        let mut account = unit.lock_account(id).await.unwrap().unwrap();
        account.balance = 250;
        unit.save_account(&account).await.unwrap();
        let mut tx = Transaction::new(id, TransactionKind::Deposit, 250, 250);
        unit.append_transaction(&mut tx).await.unwrap();
        unit.commit().await.unwrap();

        assert_eq!(store.account(id).await.unwrap().balance, 250);
        let log = store.transactions(id).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sequence, tx.sequence);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_logged_entries_never_run_ahead_of_rows() {
        let (store, id) = store_with_account(0);

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let mut unit = store.begin().await.unwrap();
                    let mut account = unit.lock_account(id).await.unwrap().unwrap();
                    account.balance += 10;
                    unit.save_account(&account).await.unwrap();
                    let mut tx =
                        Transaction::new(id, TransactionKind::Deposit, 10, account.balance);
                    unit.append_transaction(&mut tx).await.unwrap();
                    unit.commit().await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let logged = store
                .transactions(id)
                .await
                .last()
                .map_or(0, |t| t.balance);
            let balance = store.account(id).await.unwrap().balance;
            assert!(
                balance >= logged,
                "row at {} behind logged balance {}",
                balance,
                logged
            );
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(store.account(id).await.unwrap().balance, 2_000);
        assert_eq!(store.transactions(id).await.len(), 200);
    }

    #[tokio::test]
    async fn test_save_requires_lock() {
        let (store, id) = store_with_account(0);
        let mut unit = store.begin().await.unwrap();
        let account = store.account(id).await.unwrap();

        let result = unit.save_account(&account).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_lock_times_out_while_held() {
        let (store, id) = store_with_account(0);
        let impatient = MemoryStore {
            state: Arc::clone(&store.state),
            lock_timeout: Duration::from_millis(20),
        };

        let mut holder = store.begin().await.unwrap();
        holder.lock_account(id).await.unwrap();

        let mut waiter = impatient.begin().await.unwrap();
        let result = waiter.lock_account(id).await;
        assert!(matches!(result, Err(StoreError::LockTimeout(_))));

        drop(holder);
        assert!(waiter.lock_account(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = MemoryStore::new();
        let mut unit = store.begin().await.unwrap();
        assert!(unit.lock_account(AccountId::new_v4()).await.unwrap().is_none());
        assert!(unit.lock_loan(LoanId::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let (store, id) = store_with_account(0);
        store.inject_fault(Fault::AppendTransaction);

        let mut unit = store.begin().await.unwrap();
        let mut tx = Transaction::new(id, TransactionKind::Deposit, 1, 1);
        assert!(unit.append_transaction(&mut tx).await.is_err());
        assert!(unit.append_transaction(&mut tx).await.is_ok());
    }
}
